use crate::branch::{Attach, Direction, SiblingPosition};
use crate::error::ChatResult;
use crate::protocol::{ChatRequest, ConversationMessage, StreamEvent, ToolCallPayload};
use crate::reconcile::{Message, Step, to_render_messages};
use crate::session::SessionEvent;
use crate::tool_result::normalize;
use serde_json::Value;

/// The in-progress assistant turn of one streaming session.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TurnAccumulator {
    pub content: String,
    pub steps: Vec<Step>,
    /// Latest thinking fragment, cleared by a `null` thinking event.
    pub thinking: Option<String>,
}

impl TurnAccumulator {
    fn is_empty(&self) -> bool {
        self.content.is_empty() && self.steps.is_empty()
    }

    fn thinking(&mut self, text: Option<String>) {
        if let Some(text) = &text {
            self.steps.push(Step::Thinking { text: text.clone() });
        }
        self.thinking = text;
    }

    fn tool_call(&mut self, call: ToolCallPayload) {
        self.steps.push(Step::ToolCall {
            name: call.name,
            code: call.code,
        });
    }

    fn tool_result(&mut self, result: Value) {
        self.steps.push(Step::ToolResult {
            result: normalize(result),
        });
    }

    fn into_message(self) -> Message {
        Message::assistant(local_id(), self.content, self.steps)
    }
}

/// What the caller should do after the controller handled something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Fetch the conversation's active branch and pass it to
    /// [`ChatState::apply_messages`].
    Refetch { conversation_id: String },
}

/// State of one chat view: the rendered active branch plus whatever the
/// current stream is building.
#[derive(Debug, Default)]
pub struct ChatState {
    messages: Vec<Message>,
    conversation_id: Option<String>,
    attach: Attach,
    error: Option<String>,
    turn: Option<TurnAccumulator>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn attach(&self) -> &Attach {
        &self.attach
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn turn(&self) -> Option<&TurnAccumulator> {
        self.turn.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.turn.is_some()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn new_conversation(&mut self) {
        *self = Self::default();
    }

    /// Prepares a send of `text`.
    ///
    /// Consumes the pending attach point, reshapes the visible list to
    /// match it, and appends the user's message optimistically. Returns
    /// `None` for blank input or while a stream is still running.
    pub fn begin_send(&mut self, text: &str) -> Option<ChatRequest> {
        let text = text.trim();
        if text.is_empty() || self.is_streaming() {
            return None;
        }

        let attach = std::mem::take(&mut self.attach);
        attach.truncate(&mut self.messages);
        let (prev_message_id, branch_from_root) = attach.request_fields();

        self.messages.push(Message::user(local_id(), text));
        self.turn = Some(TurnAccumulator::default());
        self.error = None;

        Some(ChatRequest {
            text: text.to_string(),
            conversation_id: self.conversation_id.clone(),
            prev_message_id,
            branch_from_root,
        })
    }

    /// Marks `messages[index]` for editing and returns its text for the
    /// input box. The next send forks at that point.
    pub fn begin_edit(&mut self, index: usize) -> Option<String> {
        let attach = Attach::for_edit(&self.messages, index)?;
        let text = self.messages[index].text();
        self.attach = attach;
        Some(text)
    }

    pub fn cancel_edit(&mut self) {
        self.attach = Attach::Tip;
    }

    /// `(conversation_id, message_id)` to switch at `index`, if a sibling
    /// exists in `direction`. Never while a turn is streaming: the turn
    /// belongs to the branch it was sent on.
    pub fn branch_target(&self, index: usize, direction: Direction) -> Option<(String, String)> {
        if self.is_streaming() {
            return None;
        }
        let conversation_id = self.conversation_id.clone()?;
        let message = self.messages.get(index)?;
        SiblingPosition::from(&message.branch)
            .can_move(direction)
            .then(|| (conversation_id, message.id.clone()))
    }

    /// Applies one event from the running session.
    pub fn apply(&mut self, event: SessionEvent) -> Option<FollowUp> {
        match event {
            SessionEvent::Stream(StreamEvent::Done { conversation_id }) => {
                self.finish(conversation_id)
            }
            SessionEvent::Stream(event) => {
                self.update_turn(event);
                None
            }
            SessionEvent::Failed(err) => {
                self.error = Some(err.to_string());
                self.keep_partial_turn();
                None
            }
        }
    }

    /// Replaces the visible branch with an authoritative one.
    ///
    /// A pending edit survives as long as its fork point is still shown.
    /// On failure the current list stays and the error is recorded.
    pub fn apply_messages(&mut self, result: ChatResult<Vec<ConversationMessage>>) {
        match result {
            Ok(server) => {
                self.messages = to_render_messages(&server);
                if let Attach::After(id) = &self.attach
                    && !self.messages.iter().any(|message| &message.id == id)
                {
                    tracing::debug!(%id, "fork point gone after refresh; dropping edit");
                    self.attach = Attach::Tip;
                }
            }
            Err(err) => {
                tracing::warn!(%err, "keeping current messages after failed refresh");
                self.error = Some(err.to_string());
            }
        }
    }

    fn update_turn(&mut self, event: StreamEvent) {
        let Some(turn) = self.turn.as_mut() else {
            tracing::debug!(?event, "stream event with no turn in progress");
            return;
        };
        match event {
            StreamEvent::Thinking { text } => turn.thinking(text),
            StreamEvent::Content { delta } => turn.content.push_str(&delta),
            StreamEvent::ToolCall(call) => turn.tool_call(call),
            StreamEvent::ToolResult { result } => turn.tool_result(result),
            StreamEvent::Done { .. } => {}
        }
    }

    fn finish(&mut self, conversation_id: Option<String>) -> Option<FollowUp> {
        if let Some(id) = conversation_id {
            self.conversation_id = Some(id);
        }
        self.keep_partial_turn();
        self.conversation_id
            .clone()
            .map(|conversation_id| FollowUp::Refetch { conversation_id })
    }

    /// Ends the turn, keeping whatever it produced as an assistant message.
    fn keep_partial_turn(&mut self) {
        if let Some(turn) = self.turn.take()
            && !turn.is_empty()
        {
            self.messages.push(turn.into_message());
        }
    }
}

fn local_id() -> String {
    format!("local-{}", uuid::Uuid::new_v4())
}
