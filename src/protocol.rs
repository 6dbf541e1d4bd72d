use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One newline-delimited record from the chat endpoint, before interpretation.
///
/// Every field is optional here; the interpreter decides which absences
/// drop the record.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WireRecord {
    Thinking {
        #[serde(default)]
        text: Option<String>,
    },
    Content {
        #[serde(default)]
        text: Option<String>,
    },
    ToolCall {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        code: Option<String>,
    },
    ToolResult {
        // `null` is a real result; only an absent key is "no result".
        #[serde(default, deserialize_with = "present")]
        result: Option<Value>,
    },
    Done {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallPayload {
    pub name: String,
    pub code: String,
}

/// A semantic event decoded from the chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `None` clears the current thinking indicator.
    Thinking { text: Option<String> },
    Content { delta: String },
    ToolCall(ToolCallPayload),
    ToolResult { result: Value },
    Done { conversation_id: Option<String> },
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub branch_from_root: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    #[serde(other)]
    Other,
}

/// Sibling information for a message that sits at a fork in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_left: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_right: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sibling_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sibling_total: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub function: ToolFunction,
}

/// A message on the active branch, as the server returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(flatten)]
    pub branch: BranchMeta,
}

impl ConversationMessage {
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemoryRecord {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemoryPageResponse {
    #[serde(default)]
    pub(crate) items: Vec<MemoryRecord>,
    #[serde(default)]
    pub(crate) total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<MemoryRecord> for MemoryItem {
    fn from(raw: MemoryRecord) -> Self {
        let created_at = raw
            .created_at
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Self {
            id: raw.id,
            content: raw.content,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPage {
    pub items: Vec<MemoryItem>,
    pub total_count: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct MemoryContent<'a> {
    pub(crate) content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedMemory {
    pub(crate) id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub(crate) username: &'a str,
    pub(crate) password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn chat_request_omits_unset_fields() {
        let request = ChatRequest {
            text: "hi".to_string(),
            ..ChatRequest::default()
        };
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"text": "hi"}));

        let request = ChatRequest {
            text: "again".to_string(),
            conversation_id: Some("c1".to_string()),
            branch_from_root: true,
            ..ChatRequest::default()
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"text": "again", "conversation_id": "c1", "branch_from_root": true})
        );
    }

    #[test]
    fn conversation_message_reads_server_shape() {
        let raw = json!({
            "id": "a1",
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "tc1",
                "type": "function",
                "function": {"name": "python", "arguments": "{\"code\":\"1+1\"}"}
            }],
            "can_left": true,
            "sibling_index": 2,
            "sibling_total": 2
        });
        let message: ConversationMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "");
        assert_eq!(message.tool_calls()[0].function.name, "python");
        assert_eq!(
            message.branch,
            BranchMeta {
                can_left: Some(true),
                can_right: None,
                sibling_index: Some(2),
                sibling_total: Some(2),
            }
        );
    }

    #[test]
    fn unknown_roles_do_not_fail_decoding() {
        let message: ConversationMessage =
            serde_json::from_value(json!({"id": "s", "role": "system", "content": "x"})).unwrap();
        assert_eq!(message.role, Role::Other);
    }

    #[test]
    fn tool_result_distinguishes_null_from_absent() {
        let record: WireRecord =
            serde_json::from_str(r#"{"type":"tool_result","result":null}"#).unwrap();
        assert!(matches!(record, WireRecord::ToolResult { result: Some(Value::Null) }));

        let record: WireRecord = serde_json::from_str(r#"{"type":"tool_result"}"#).unwrap();
        assert!(matches!(record, WireRecord::ToolResult { result: None }));
    }

    #[test]
    fn memory_item_falls_back_to_now_without_timestamp() {
        let before = Utc::now();
        let item = MemoryItem::from(MemoryRecord {
            id: "m1".to_string(),
            content: "likes tea".to_string(),
            created_at: None,
        });
        assert!(item.created_at >= before);

        let item = MemoryItem::from(MemoryRecord {
            id: "m2".to_string(),
            content: String::new(),
            created_at: Some("2025-01-02T03:04:05Z".to_string()),
        });
        assert_eq!(item.created_at.to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }
}
