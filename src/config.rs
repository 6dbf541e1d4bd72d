use crate::client::{ClientConfig, MemoryQuery};
use crate::error::ChatResult;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "http://localhost:4000";

#[derive(Debug, Parser)]
#[command(name = "branch-chat", version, about = "Terminal client for a branching chat service")]
pub struct Cli {
    /// Base URL of the chat service.
    #[arg(long, env = "BRANCH_CHAT_API_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub base_url: String,

    /// Streaming chat endpoint (defaults to <base-url>/api/chat).
    #[arg(long, env = "BRANCH_CHAT_CHAT_URL", global = true)]
    pub chat_url: Option<String>,

    /// Bearer token; falls back to the token saved by `login`.
    #[arg(long, env = "BRANCH_CHAT_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Interactive chat (default).
    Chat {
        /// Resume an existing conversation.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List conversations.
    Conversations,
    /// Print the active branch of a conversation.
    Messages { conversation_id: String },
    /// Log in and save the returned token.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "BRANCH_CHAT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Manage long-term memories.
    #[command(subcommand)]
    Memory(MemoryCommand),
}

#[derive(Debug, Clone, Subcommand, PartialEq, Eq)]
pub enum MemoryCommand {
    List {
        #[arg(long)]
        q: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        page_size: Option<u32>,
    },
    Add { content: String },
    Update { id: String, content: String },
    Delete { id: String },
}

impl MemoryCommand {
    pub fn query(&self) -> Option<MemoryQuery> {
        match self {
            Self::List { q, page, page_size } => Some(MemoryQuery {
                q: q.clone(),
                page: *page,
                page_size: *page_size,
            }),
            _ => None,
        }
    }
}

impl Cli {
    pub fn resolved_command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Chat { conversation: None })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            chat_url: self.chat_url.clone(),
            token: resolve_token(self.token.clone(), &token_path()),
        }
    }
}

/// An explicit token wins; otherwise the saved token, if any. No token is
/// fine: the service decides whether it needs one.
pub fn resolve_token(explicit: Option<String>, path: &Path) -> Option<String> {
    if let Some(token) = explicit.filter(|token| !token.trim().is_empty()) {
        return Some(token);
    }

    match std::fs::read_to_string(path) {
        Ok(token) => Some(token.trim().to_string()).filter(|token| !token.is_empty()),
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "no saved token");
            None
        }
    }
}

pub fn write_token_file(path: &Path, token: &str) -> ChatResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    use std::io::Write;
    file.write_all(token.as_bytes())?;
    Ok(())
}

pub fn data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".branch-chat");
    }

    PathBuf::from(".branch-chat")
}

pub fn token_path() -> PathBuf {
    data_dir().join("token")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_definition_is_valid() {
        <Cli as CommandFactory>::command().debug_assert();
    }

    #[test]
    fn defaults_to_interactive_chat() {
        let cli = Cli::try_parse_from(["branch-chat", "--base-url", "http://h:1"]).unwrap();
        assert_eq!(cli.base_url, "http://h:1");
        assert_eq!(cli.resolved_command(), Command::Chat { conversation: None });
    }

    #[test]
    fn parses_memory_list_filters() {
        let cli = Cli::try_parse_from([
            "branch-chat",
            "memory",
            "list",
            "--q",
            "tea",
            "--page-size",
            "20",
        ])
        .unwrap();
        let Some(Command::Memory(memory)) = cli.command else {
            panic!("expected memory command");
        };
        let query = memory.query().unwrap();
        assert_eq!(query.q.as_deref(), Some("tea"));
        assert_eq!(query.page, None);
        assert_eq!(query.page_size, Some(20));
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["branch-chat", "messages", "c1", "--token", "t"]).unwrap();
        assert_eq!(cli.token.as_deref(), Some("t"));
        assert_eq!(
            cli.resolved_command(),
            Command::Messages {
                conversation_id: "c1".to_string()
            }
        );
    }

    #[test]
    fn token_file_round_trip_and_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token");

        assert_eq!(resolve_token(None, &path), None);

        write_token_file(&path, "saved\n").unwrap();
        assert_eq!(resolve_token(None, &path).as_deref(), Some("saved"));
        assert_eq!(
            resolve_token(Some("explicit".to_string()), &path).as_deref(),
            Some("explicit")
        );
        assert_eq!(resolve_token(Some("  ".to_string()), &path).as_deref(), Some("saved"));
    }
}
