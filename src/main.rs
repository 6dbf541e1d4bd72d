use branch_chat::branch::SiblingPosition;
use branch_chat::config::{self, Cli, Command, MemoryCommand};
use branch_chat::reconcile::{Speaker, Step};
use branch_chat::{ApiClient, logging, to_render_messages, ui};
use clap::Parser;

type MainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let command = cli.resolved_command();

    // The TUI owns the terminal, so interactive sessions log to a file.
    let _log_guard = match command {
        Command::Chat { .. } => logging::init_file(&config::data_dir().join("branch-chat.log")),
        _ => {
            logging::init_stderr();
            None
        }
    };

    let client = ApiClient::new(cli.client_config())?;

    match command {
        Command::Chat { conversation } => ui::run_tui(client, conversation)?,
        Command::Conversations => {
            for conversation in client.list_conversations().await? {
                println!(
                    "{}\t{}\t{}",
                    conversation.id, conversation.updated_at, conversation.title
                );
            }
        }
        Command::Messages { conversation_id } => {
            let server = client.conversation_messages(&conversation_id).await?;
            print_transcript(&to_render_messages(&server));
        }
        Command::Login { username, password } => {
            let response = client.login(&username, &password).await?;
            if response.token.is_empty() {
                return Err(response
                    .message
                    .unwrap_or_else(|| "Login failed".to_string())
                    .into());
            }
            let path = config::token_path();
            config::write_token_file(&path, &response.token)?;
            println!("Logged in; token saved to {}", path.display());
        }
        Command::Memory(command) => run_memory(&client, command).await?,
    }

    Ok(())
}

async fn run_memory(client: &ApiClient, command: MemoryCommand) -> MainResult<()> {
    if let Some(query) = command.query() {
        let page = client.list_memories(&query).await?;
        for item in &page.items {
            println!(
                "{}\t{}\t{}",
                item.id,
                item.created_at.format("%Y-%m-%d %H:%M"),
                item.content
            );
        }
        println!("{} of {} memories", page.items.len(), page.total_count);
        return Ok(());
    }

    match command {
        MemoryCommand::Add { content } => {
            let id = client.add_memory(&content).await?;
            println!("{id}");
        }
        MemoryCommand::Update { id, content } => client.update_memory(&id, &content).await?,
        MemoryCommand::Delete { id } => client.delete_memory(&id).await?,
        MemoryCommand::List { .. } => {}
    }
    Ok(())
}

fn print_transcript(messages: &[branch_chat::Message]) {
    for message in messages {
        let speaker = match message.role {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        };
        let position = SiblingPosition::from(&message.branch);
        if position.has_siblings() {
            println!("[{speaker} {} {}/{}]", message.id, position.index, position.total);
        } else {
            println!("[{speaker} {}]", message.id);
        }

        for step in &message.steps {
            match step {
                Step::Thinking { text } => println!("  thinking: {text}"),
                Step::ToolCall { name, code } => println!("  tool {name}: {code}"),
                Step::ToolResult { result } => println!("  result: {:?}", result.view()),
            }
        }
        println!("{}\n", message.text());
    }
}
