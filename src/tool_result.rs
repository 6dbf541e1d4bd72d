use crate::literal;
use serde_json::Value;

/// A tool result after normalization.
///
/// Live streams deliver results as JSON values; history replays them as
/// strings holding either JSON or a Python-style literal. Both paths go
/// through [`normalize`] so they render identically.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Structured(Value),
    /// A string that decoded as neither JSON nor a literal.
    Raw(String),
}

/// Never fails: anything undecodable is kept as the original string.
pub fn normalize(value: Value) -> ToolOutput {
    let Value::String(text) = value else {
        return ToolOutput::Structured(value);
    };

    if let Ok(decoded) = serde_json::from_str::<Value>(&text) {
        return ToolOutput::Structured(decoded);
    }
    match literal::parse(&text) {
        Ok(decoded) => ToolOutput::Structured(decoded),
        Err(err) => {
            tracing::trace!(offset = err.offset, reason = err.message, "keeping tool result as text");
            ToolOutput::Raw(text)
        }
    }
}

impl ToolOutput {
    /// Picks how the result should be displayed.
    pub fn view(&self) -> ToolResultView {
        match self {
            Self::Raw(text) => ToolResultView::Text(text.clone()),
            Self::Structured(Value::String(text)) => ToolResultView::Text(text.clone()),
            Self::Structured(Value::Object(map))
                if ["ok", "out", "error"].iter().any(|key| map.contains_key(*key)) =>
            {
                let error = map
                    .get("error")
                    .and_then(Value::as_str)
                    .filter(|error| !error.is_empty())
                    .map(str::to_string);
                let ok = match (&error, map.get("ok")) {
                    (None, Some(ok)) => Some(display_value(ok)),
                    _ => None,
                };
                let output = map
                    .get("out")
                    .map(|out| unescape_newlines(&display_value(out)));
                ToolResultView::Execution { error, ok, output }
            }
            Self::Structured(value) => ToolResultView::Json(pretty(value)),
        }
    }
}

/// Display shape of a tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResultView {
    /// A code-execution result with optional error, value and captured output.
    Execution {
        error: Option<String>,
        ok: Option<String>,
        output: Option<String>,
    },
    Json(String),
    Text(String),
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => pretty(other),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn unescape_newlines(text: &str) -> String {
    text.replace("\\r\\n", "\n").replace("\\n", "\n")
}
