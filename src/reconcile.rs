use crate::protocol::{BranchMeta, ConversationMessage, Role, ToolCall};
use crate::tool_result::{ToolOutput, normalize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// One unit of assistant-side work shown with its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Thinking { text: String },
    ToolCall { name: String, code: String },
    ToolResult { result: ToolOutput },
}

/// A message ready to render.
///
/// Rebuilt from server history on every refresh and never patched in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Speaker,
    /// Text parts; empty when the message has no text.
    pub parts: Vec<String>,
    pub steps: Vec<Step>,
    pub branch: BranchMeta,
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id.into(), Speaker::User, text.into(), Vec::new())
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(id.into(), Speaker::Assistant, text.into(), steps)
    }

    fn new(id: String, role: Speaker, text: String, steps: Vec<Step>) -> Self {
        let parts = if text.is_empty() {
            Vec::new()
        } else {
            vec![text]
        };
        Self {
            id,
            role,
            parts,
            steps,
            branch: BranchMeta::default(),
        }
    }

    fn with_branch(mut self, branch: &BranchMeta) -> Self {
        self.branch = branch.clone();
        self
    }

    pub fn text(&self) -> String {
        self.parts.concat()
    }
}

/// Turns the server's flat history into render messages.
///
/// Tool messages are paired with their assistant's tool calls by position:
/// the i-th call is answered by the i-th message after the assistant, as
/// long as that message has the `tool` role.
pub fn to_render_messages(server: &[ConversationMessage]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(server.len());
    let mut cursor = 0;

    while let Some(message) = server.get(cursor) {
        match message.role {
            Role::User => {
                messages.push(Message::user(&message.id, message.text()).with_branch(&message.branch));
                cursor += 1;
            }
            Role::Assistant => {
                let mut steps = Vec::new();
                let mut next = cursor + 1;
                for call in message.tool_calls() {
                    steps.push(tool_call_step(call));
                    if let Some(reply) = server.get(next).filter(|reply| reply.role == Role::Tool) {
                        steps.push(Step::ToolResult {
                            result: normalize(Value::String(reply.text().to_string())),
                        });
                        next += 1;
                    }
                }
                messages.push(
                    Message::assistant(&message.id, message.text(), steps).with_branch(&message.branch),
                );
                cursor = next;
            }
            Role::Tool | Role::Other => {
                tracing::debug!(id = %message.id, role = ?message.role, "skipping unpaired message");
                cursor += 1;
            }
        }
    }

    messages
}

/// The call's `code` argument, or the raw argument text when it has none.
fn tool_call_step(call: &ToolCall) -> Step {
    let arguments = &call.function.arguments;
    let code = serde_json::from_str::<Value>(arguments)
        .ok()
        .and_then(|args| args.get("code").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| arguments.clone());
    Step::ToolCall {
        name: call.function.name.clone(),
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolFunction;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn message(id: &str, role: Role, content: &str) -> ConversationMessage {
        ConversationMessage {
            id: id.to_string(),
            role,
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
            branch: BranchMeta::default(),
        }
    }

    fn with_calls(mut message: ConversationMessage, calls: &[(&str, &str, &str)]) -> ConversationMessage {
        message.tool_calls = Some(
            calls
                .iter()
                .map(|(id, name, arguments)| ToolCall {
                    id: id.to_string(),
                    kind: "function".to_string(),
                    function: ToolFunction {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                })
                .collect(),
        );
        message
    }

    #[test]
    fn pairs_tool_call_with_following_tool_message() {
        let server = vec![
            message("u1", Role::User, "compute"),
            with_calls(
                message("a1", Role::Assistant, "The answer is 2."),
                &[("tc1", "python", r#"{"code":"1+1"}"#)],
            ),
            message("t1", Role::Tool, "{'ok': 2}"),
        ];

        let rendered = to_render_messages(&server);
        assert_eq!(
            rendered,
            vec![
                Message::user("u1", "compute"),
                Message::assistant(
                    "a1",
                    "The answer is 2.",
                    vec![
                        Step::ToolCall {
                            name: "python".to_string(),
                            code: "1+1".to_string(),
                        },
                        Step::ToolResult {
                            result: ToolOutput::Structured(json!({"ok": 2})),
                        },
                    ],
                ),
            ]
        );
    }

    #[test]
    fn missing_second_result_leaves_call_unpaired() {
        let server = vec![
            with_calls(
                message("a1", Role::Assistant, ""),
                &[("tc1", "python", r#"{"code":"a"}"#), ("tc2", "python", r#"{"code":"b"}"#)],
            ),
            message("t1", Role::Tool, "first"),
            message("u2", Role::User, "next"),
        ];

        let rendered = to_render_messages(&server);
        assert_eq!(rendered.len(), 2);
        assert_eq!(
            rendered[0].steps,
            vec![
                Step::ToolCall {
                    name: "python".to_string(),
                    code: "a".to_string(),
                },
                Step::ToolResult {
                    result: ToolOutput::Raw("first".to_string()),
                },
                Step::ToolCall {
                    name: "python".to_string(),
                    code: "b".to_string(),
                },
            ]
        );
        assert_eq!(rendered[1], Message::user("u2", "next"));
    }

    #[test]
    fn undecodable_arguments_become_the_code() {
        let server = vec![with_calls(
            message("a1", Role::Assistant, "x"),
            &[("tc1", "shell", "ls -la")],
        )];
        assert_eq!(
            to_render_messages(&server)[0].steps,
            vec![Step::ToolCall {
                name: "shell".to_string(),
                code: "ls -la".to_string(),
            }]
        );
    }

    #[test]
    fn orphaned_tool_messages_are_skipped() {
        let server = vec![
            message("t0", Role::Tool, "stray"),
            message("u1", Role::User, "hi"),
            message("a1", Role::Assistant, "hello"),
            message("t1", Role::Tool, "also stray"),
        ];
        assert_eq!(
            to_render_messages(&server),
            vec![
                Message::user("u1", "hi"),
                Message::assistant("a1", "hello", Vec::new()),
            ]
        );
    }

    #[test]
    fn copies_branch_metadata() {
        let mut user = message("u1", Role::User, "edited");
        user.branch = BranchMeta {
            can_left: Some(true),
            can_right: Some(false),
            sibling_index: Some(2),
            sibling_total: Some(2),
        };
        let rendered = to_render_messages(&[user.clone()]);
        assert_eq!(rendered[0].branch, user.branch);
    }

    #[test]
    fn is_deterministic() {
        let server = vec![
            message("u1", Role::User, "a"),
            with_calls(message("a1", Role::Assistant, "b"), &[("tc", "f", "{}")]),
            message("t1", Role::Tool, "[1, 2]"),
        ];
        assert_eq!(to_render_messages(&server), to_render_messages(&server));
    }

    #[test]
    fn empty_text_has_no_parts() {
        let message = Message::assistant("a", "", Vec::new());
        assert!(message.parts.is_empty());
        assert_eq!(message.text(), "");
    }
}
