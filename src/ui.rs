use crate::branch::{Attach, Direction, SiblingPosition};
use crate::chat::{ChatState, FollowUp, TurnAccumulator};
use crate::client::ApiClient;
use crate::error::ChatResult;
use crate::protocol::ConversationMessage;
use crate::reconcile::{Message, Speaker, Step};
use crate::session::SessionEvent;
use crate::tool_result::ToolResultView;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::io;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;

const INPUT_HEIGHT: u16 = 6;
const CODE_PREVIEW: usize = 400;
const RESULT_PREVIEW: usize = 600;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    fn block(prefix: &str, body: &str, style: Style) -> Vec<Self> {
        body.lines()
            .map(|line| Self::new(format!("{prefix}{line}"), style))
            .collect()
    }
}

fn truncate(value: &str, max: usize, suffix: &str) -> String {
    match value.char_indices().nth(max) {
        Some((end, _)) => format!("{}{}", &value[..end], suffix),
        None => value.to_string(),
    }
}

fn step_lines(step: &Step) -> Vec<LineSpec> {
    let muted = Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC);
    match step {
        Step::Thinking { text } => LineSpec::block("  … ", text, muted),
        Step::ToolCall { name, code } => {
            let header = Style::default().fg(Color::Green).add_modifier(Modifier::BOLD);
            let mut lines = vec![LineSpec::new(format!("  tool: {name}"), header)];
            let code = truncate(code, CODE_PREVIEW, "\n[truncated]");
            lines.extend(LineSpec::block("    ", &code, Style::default().fg(Color::Green)));
            lines
        }
        Step::ToolResult { result } => {
            let cyan = Style::default().fg(Color::Cyan);
            let mut lines = vec![LineSpec::new("  → result:", cyan.add_modifier(Modifier::BOLD))];
            match result.view() {
                ToolResultView::Execution { error, ok, output } => {
                    if let Some(error) = error {
                        let error = truncate(&error, RESULT_PREVIEW, "\n[truncated]");
                        lines.extend(LineSpec::block("    error: ", &error, Style::default().fg(Color::Red)));
                    }
                    if let Some(ok) = ok {
                        let ok = truncate(&ok, RESULT_PREVIEW, "\n[truncated]");
                        lines.extend(LineSpec::block("    ", &ok, cyan));
                    }
                    if let Some(output) = output {
                        let output = truncate(&output, RESULT_PREVIEW, "\n[output truncated]");
                        lines.push(LineSpec::new("    output:", cyan));
                        lines.extend(LineSpec::block("    │ ", &output, Style::default()));
                    }
                }
                ToolResultView::Json(text) | ToolResultView::Text(text) => {
                    let text = truncate(&text, RESULT_PREVIEW, "\n[output truncated]");
                    lines.extend(LineSpec::block("    ", &text, cyan));
                }
            }
            lines
        }
    }
}

fn message_lines(message: &Message, selected: bool) -> Vec<LineSpec> {
    let (name, color) = match message.role {
        Speaker::User => ("You", Color::Blue),
        Speaker::Assistant => ("Assistant", Color::Yellow),
    };
    let mut header = format!("{}{name}:", if selected { "▶ " } else { "" });
    let position = SiblingPosition::from(&message.branch);
    if position.has_siblings() {
        let left = if position.can_left { "‹" } else { " " };
        let right = if position.can_right { "›" } else { " " };
        header.push_str(&format!("  {left} {}/{} {right}", position.index, position.total));
    }

    let mut header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    if selected {
        header_style = header_style.add_modifier(Modifier::REVERSED);
    }
    let mut lines = vec![LineSpec::new(header, header_style)];
    for step in &message.steps {
        lines.extend(step_lines(step));
    }
    lines.extend(LineSpec::block("  ", &message.text(), Style::default().fg(color)));
    lines
}

fn turn_lines(turn: &TurnAccumulator) -> Vec<LineSpec> {
    let style = Style::default().fg(Color::Yellow);
    let mut lines = vec![LineSpec::new("Assistant:", style.add_modifier(Modifier::BOLD))];
    for step in &turn.steps {
        lines.extend(step_lines(step));
    }
    if turn.content.is_empty() {
        let status = match &turn.thinking {
            Some(_) => "  (thinking…)",
            None => "  …",
        };
        lines.push(LineSpec::new(status, Style::default().fg(Color::DarkGray)));
    } else {
        lines.extend(LineSpec::block("  ", &turn.content, style));
    }
    lines
}

fn rendered_height(lines: &[LineSpec], width: u16) -> usize {
    let width = width.max(1) as usize;
    lines
        .iter()
        .map(|line| line.text.chars().count().max(1).div_ceil(width))
        .sum()
}

#[derive(Debug)]
pub enum UiEvent {
    Session { generation: u64, event: SessionEvent },
    Messages {
        generation: u64,
        result: ChatResult<Vec<ConversationMessage>>,
    },
}

/// Multi-line input with a character-based cursor.
struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    /// Replaces the contents and puts the cursor at the end.
    fn set_text(&mut self, text: &str) {
        self.lines = text.split('\n').map(str::to_string).collect();
        self.cursor_y = self.lines.len() - 1;
        self.cursor_x = self.line_len(self.cursor_y);
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn byte_index(&self, y: usize, x: usize) -> usize {
        self.lines[y]
            .char_indices()
            .nth(x)
            .map(|(idx, _)| idx)
            .unwrap_or(self.lines[y].len())
    }

    fn insert_char(&mut self, c: char) {
        let idx = self.byte_index(self.cursor_y, self.cursor_x);
        self.lines[self.cursor_y].insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let idx = self.byte_index(self.cursor_y, self.cursor_x - 1);
            self.lines[self.cursor_y].remove(idx);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let line = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&line);
        }
    }

    fn new_line(&mut self) {
        let idx = self.byte_index(self.cursor_y, self.cursor_x);
        let remaining = self.lines[self.cursor_y].split_off(idx);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Type your message here...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    state: ChatState,
    input: InputBuffer,
    selected: Option<usize>,
    should_quit: bool,
    sender: mpsc::Sender<UiEvent>,
    receiver: mpsc::Receiver<UiEvent>,
    client: ApiClient,
    stream_task: Option<AbortHandle>,
    // Bumped on "new conversation" so late events from the old one are dropped.
    generation: u64,
}

impl App {
    pub fn new(client: ApiClient, conversation_id: Option<String>) -> Self {
        let (sender, receiver) = mpsc::channel(100);
        let state = match &conversation_id {
            Some(id) => ChatState::with_conversation(id.clone()),
            None => ChatState::new(),
        };

        let app = Self {
            state,
            input: InputBuffer::new(),
            selected: None,
            should_quit: false,
            sender,
            receiver,
            client,
            stream_task: None,
            generation: 0,
        };
        if let Some(id) = conversation_id {
            app.fetch_messages(id);
        }
        app
    }

    fn draw(&mut self, f: &mut Frame) {
        let [history_area, status_area, input_area] = Layout::vertical([
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(INPUT_HEIGHT),
        ])
        .areas(f.area());

        let mut lines = Vec::new();
        let mut selected_start = None;
        for (index, message) in self.state.messages().iter().enumerate() {
            let selected = self.selected == Some(index);
            if selected {
                selected_start = Some(rendered_height(&lines, history_area.width));
            }
            lines.extend(message_lines(message, selected));
            lines.push(LineSpec::new("", Style::default()));
        }
        if let Some(turn) = self.state.turn() {
            lines.extend(turn_lines(turn));
        }
        if lines.is_empty() {
            lines.push(LineSpec::new(
                "Send a message to start.",
                Style::default().fg(Color::DarkGray),
            ));
        }

        let total = rendered_height(&lines, history_area.width);
        let max_scroll = total.saturating_sub(history_area.height as usize);
        let scroll = selected_start.unwrap_or(max_scroll).min(max_scroll);
        let text = Text::from(
            lines
                .into_iter()
                .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
                .collect::<Vec<_>>(),
        );
        f.render_widget(
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .scroll((u16::try_from(scroll).unwrap_or(u16::MAX), 0)),
            history_area,
        );

        let status = match self.state.error() {
            Some(error) => Line::from(vec![
                Span::styled(format!("Error: {error}"), Style::default().fg(Color::Red)),
                Span::styled("  (Ctrl+D to dismiss)", Style::default().fg(Color::DarkGray)),
            ]),
            None => Line::from(Span::styled(
                "Alt+↑/↓ select · Ctrl+E edit · Ctrl+←/→ switch branch · Ctrl+N new",
                Style::default().fg(Color::DarkGray),
            )),
        };
        f.render_widget(Paragraph::new(status), status_area);

        let title = match (self.state.is_streaming(), self.state.attach()) {
            (true, _) => " Input (Enter to send, Esc to quit) [Streaming...] ".to_string(),
            (false, Attach::Tip) => " Input (Enter to send, Esc to quit) ".to_string(),
            (false, Attach::After(_)) => " Editing (Enter to resend, Esc to cancel) ".to_string(),
            (false, Attach::Root) => " Editing first message (Enter to resend, Esc to cancel) ".to_string(),
        };
        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(input_paragraph, input_area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width.saturating_sub(2));
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height.saturating_sub(2));
        f.set_cursor_position((x, y));
    }

    fn submit(&mut self) {
        let text = self.input.text();
        let Some(request) = self.state.begin_send(&text) else {
            return;
        };
        self.input.clear();
        self.selected = None;

        let session = self.client.chat_session();
        let sender = self.sender.clone();
        let generation = self.generation;
        let task = tokio::spawn(async move {
            let mut handle = session.spawn(request);
            while let Some(event) = handle.next().await {
                if sender.send(UiEvent::Session { generation, event }).await.is_err() {
                    break;
                }
            }
        });
        self.stream_task = Some(task.abort_handle());
    }

    fn fetch_messages(&self, conversation_id: String) {
        let client = self.client.clone();
        let sender = self.sender.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = client.conversation_messages(&conversation_id).await;
            let _ = sender.send(UiEvent::Messages { generation, result }).await;
        });
    }

    fn switch_branch(&mut self, direction: Direction) {
        let Some(index) = self.selected else {
            return;
        };
        let Some((conversation_id, message_id)) = self.state.branch_target(index, direction) else {
            return;
        };

        let client = self.client.clone();
        let sender = self.sender.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = client
                .switch_branch(direction, &conversation_id, &message_id)
                .await;
            let _ = sender.send(UiEvent::Messages { generation, result }).await;
        });
    }

    fn edit_selected(&mut self) {
        if self.state.is_streaming() {
            return;
        }
        let Some(index) = self.selected else {
            return;
        };
        if let Some(text) = self.state.begin_edit(index) {
            self.input.set_text(&text);
        }
    }

    fn new_conversation(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        self.generation += 1;
        self.state.new_conversation();
        self.input.clear();
        self.selected = None;
    }

    fn move_selection(&mut self, up: bool) {
        let count = self.state.messages().len();
        if count == 0 {
            self.selected = None;
            return;
        }
        self.selected = match (self.selected, up) {
            (None, true) => Some(count - 1),
            (None, false) => None,
            (Some(index), true) => Some(index.saturating_sub(1)),
            (Some(index), false) if index + 1 >= count => None,
            (Some(index), false) => Some(index + 1),
        };
    }

    fn handle_ui_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Session { generation, event } if generation == self.generation => {
                if let Some(FollowUp::Refetch { conversation_id }) = self.state.apply(event) {
                    self.fetch_messages(conversation_id);
                }
                if !self.state.is_streaming() {
                    self.stream_task = None;
                }
            }
            UiEvent::Messages { generation, result } if generation == self.generation => {
                self.state.apply_messages(result);
                let count = self.state.messages().len();
                if self.selected.is_some_and(|index| index >= count) {
                    self.selected = None;
                }
            }
            _ => tracing::debug!("dropping event from a previous conversation"),
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);

        match key.code {
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Esc => {
                if *self.state.attach() != Attach::Tip {
                    self.state.cancel_edit();
                    self.input.clear();
                } else {
                    self.should_quit = true;
                }
            }
            KeyCode::Char('d') if ctrl => self.state.dismiss_error(),
            KeyCode::Char('n') if ctrl => self.new_conversation(),
            KeyCode::Char('e') if ctrl => self.edit_selected(),
            KeyCode::Left if ctrl => self.switch_branch(Direction::Left),
            KeyCode::Right if ctrl => self.switch_branch(Direction::Right),
            KeyCode::Up if alt => self.move_selection(true),
            KeyCode::Down if alt => self.move_selection(false),
            KeyCode::Enter => {
                if key.modifiers.contains(KeyModifiers::SHIFT) || alt {
                    self.input.new_line();
                } else if !self.input.is_empty() {
                    self.submit();
                }
            }
            KeyCode::Char(c) => self.input.insert_char(c),
            KeyCode::Backspace => self.input.delete_char(),
            KeyCode::Left => self.input.move_left(),
            KeyCode::Right => self.input.move_right(),
            KeyCode::Up => self.input.move_up(),
            KeyCode::Down => self.input.move_down(),
            KeyCode::Home => self.input.cursor_x = 0,
            KeyCode::End => self.input.cursor_x = self.input.line_len(self.input.cursor_y),
            _ => {}
        }
    }

    fn handle_events(&mut self) -> io::Result<()> {
        while let Ok(event) = self.receiver.try_recv() {
            self.handle_ui_event(event);
        }

        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            self.handle_key(key);
        }

        Ok(())
    }
}

pub fn run_tui(client: ApiClient, conversation_id: Option<String>) -> ChatResult<()> {
    enable_raw_mode()?;
    let _guard = TerminalGuard::new();
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal: TuiTerminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = App::new(client, conversation_id);
    tracing::info!(base_url = app.client.base_url(), "chat started");

    while !app.should_quit {
        terminal.draw(|f| app.draw(f))?;
        app.handle_events()?;
    }

    if let Some(task) = app.stream_task.take() {
        task.abort();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BranchMeta;
    use crate::tool_result::ToolOutput;
    use serde_json::json;

    #[test]
    fn input_buffer_shift_enter_inserts_new_line() {
        let mut buffer = InputBuffer::new();
        for ch in "hello".chars() {
            buffer.insert_char(ch);
        }
        buffer.new_line();
        for ch in "world".chars() {
            buffer.insert_char(ch);
        }

        assert_eq!(buffer.text(), "hello\nworld");
        assert_eq!(buffer.lines.len(), 2);
        assert_eq!(buffer.cursor_y, 1);
    }

    #[test]
    fn input_buffer_edits_multibyte_text() {
        let mut buffer = InputBuffer::new();
        buffer.set_text("héllo\nwörld");
        assert_eq!((buffer.cursor_y, buffer.cursor_x), (1, 5));

        buffer.move_up();
        buffer.move_left();
        buffer.move_left();
        buffer.move_left();
        buffer.delete_char();
        buffer.insert_char('e');
        assert_eq!(buffer.text(), "hello\nwörld");

        buffer.cursor_x = 0;
        buffer.move_down();
        buffer.delete_char();
        assert_eq!(buffer.text(), "hellowörld");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("äöü", 2, "…"), "äö…");
        assert_eq!(truncate("abc", 5, "…"), "abc");
    }

    #[test]
    fn header_shows_sibling_position() {
        let mut message = Message::user("u1", "hi");
        message.branch = BranchMeta {
            can_left: Some(true),
            can_right: Some(false),
            sibling_index: Some(2),
            sibling_total: Some(2),
        };
        let lines = message_lines(&message, false);
        assert_eq!(lines[0].text, "You:  ‹ 2/2  ");
        assert_eq!(lines[1].text, "  hi");
    }

    #[test]
    fn execution_result_lines() {
        let step = Step::ToolResult {
            result: ToolOutput::Structured(json!({"error": "boom", "out": "a\\nb"})),
        };
        let texts: Vec<String> = step_lines(&step).into_iter().map(|line| line.text).collect();
        assert_eq!(
            texts,
            vec!["  → result:", "    error: boom", "    output:", "    │ a", "    │ b"]
        );
    }

    #[test]
    fn wrapped_height_counts_chars() {
        let lines = vec![
            LineSpec::new("abcd", Style::default()),
            LineSpec::new("", Style::default()),
            LineSpec::new("ééééé", Style::default()),
        ];
        assert_eq!(rendered_height(&lines, 4), 1 + 1 + 2);
    }
}
