use crate::error::ChatError;
use crate::protocol::{StreamEvent, ToolCallPayload, WireRecord};
use serde_json::Value;

/// Callbacks for one chat stream. Every method defaults to a no-op so a
/// handler only implements what it cares about.
///
/// Calls are made one at a time, in record order, and never overlap.
pub trait StreamHandler {
    fn on_thinking(&mut self, _text: Option<String>) {}

    fn on_content(&mut self, _delta: String) {}

    fn on_tool_call(&mut self, _call: ToolCallPayload) {}

    fn on_tool_result(&mut self, _result: Value) {}

    /// Fired at most once per session.
    fn on_done(&mut self, _conversation_id: Option<String>) {}

    /// Fired instead of `on_done` when the session fails.
    fn on_error(&mut self, _error: ChatError) {}
}

/// Decodes one record into a semantic event.
///
/// Returns `None` for anything the stream is allowed to carry but the client
/// ignores: non-JSON noise, unknown types, and events missing the field that
/// makes them meaningful.
pub fn interpret(record: &str) -> Option<StreamEvent> {
    let wire = match serde_json::from_str::<WireRecord>(record) {
        Ok(wire) => wire,
        Err(err) => {
            tracing::trace!(%err, "ignoring undecodable stream record");
            return None;
        }
    };

    match wire {
        WireRecord::Thinking { text } => Some(StreamEvent::Thinking { text }),
        WireRecord::Content { text } => text
            .filter(|text| !text.is_empty())
            .map(|delta| StreamEvent::Content { delta }),
        WireRecord::ToolCall { name, code } => name.map(|name| {
            StreamEvent::ToolCall(ToolCallPayload {
                name,
                code: code.unwrap_or_default(),
            })
        }),
        WireRecord::ToolResult { result } => result.map(|result| StreamEvent::ToolResult { result }),
        WireRecord::Done { conversation_id } => Some(StreamEvent::Done {
            conversation_id: conversation_id.filter(|id| !id.is_empty()),
        }),
        WireRecord::Unknown => {
            tracing::trace!("ignoring stream record of unknown type");
            None
        }
    }
}

/// Hands `event` to the matching callback.
pub fn dispatch<H: StreamHandler + ?Sized>(event: StreamEvent, handler: &mut H) {
    match event {
        StreamEvent::Thinking { text } => handler.on_thinking(text),
        StreamEvent::Content { delta } => handler.on_content(delta),
        StreamEvent::ToolCall(call) => handler.on_tool_call(call),
        StreamEvent::ToolResult { result } => handler.on_tool_result(result),
        StreamEvent::Done { conversation_id } => handler.on_done(conversation_id),
    }
}
