use reqwest::StatusCode;

/// Everything that can go wrong talking to the chat service.
///
/// Malformed stream records are deliberately absent: the stream consumer
/// drops them without surfacing anything.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The request never got a response (connection refused, DNS, TLS).
    #[error("Could not reach the chat service at {url}. Is the server running?")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("{message}")]
    Status { status: u16, message: String },
    /// The chat endpoint answered without a body to stream.
    #[error("No response body")]
    MissingBody,
    /// Reading the body failed after the headers arrived.
    #[error("Stream interrupted: {0}")]
    Read(String),
    /// A REST response did not have the expected shape.
    #[error("Unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    pub(crate) fn unreachable(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Unreachable {
            url: url.into(),
            source,
        }
    }

    /// Builds a status error whose message is the HTTP status line.
    pub(crate) fn status(status: StatusCode) -> Self {
        Self::Status {
            status: status.as_u16(),
            message: status_line(status),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub(crate) fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => format!("{} Request failed", status.as_u16()),
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_uses_status_line() {
        let err = ChatError::status(StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "502 Bad Gateway");
        assert_eq!(err.status_code(), Some(502));
    }

    #[test]
    fn unknown_status_falls_back_to_generic_reason() {
        let status = StatusCode::from_u16(599).unwrap();
        assert_eq!(status_line(status), "599 Request failed");
    }
}
