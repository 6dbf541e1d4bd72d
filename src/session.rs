use crate::error::{ChatError, ChatResult};
use crate::events::{StreamHandler, dispatch, interpret};
use crate::frame::FrameDecoder;
use crate::protocol::{ChatRequest, StreamEvent, ToolCallPayload};
use futures::{Stream, StreamExt};
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One request/response exchange with the streaming chat endpoint.
#[derive(Clone)]
pub struct ChatSession {
    http: HttpClient,
    url: String,
    token: Option<String>,
}

impl ChatSession {
    pub fn new(http: HttpClient, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            token,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends `request` and feeds the streamed reply to `handler`.
    ///
    /// Exactly one of `on_done` / `on_error` fires per call. A stream that
    /// closes without a `done` record still gets one `on_done(None)`.
    pub async fn run<H: StreamHandler + ?Sized>(&self, request: &ChatRequest, handler: &mut H) {
        let response = match self.open(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(url = %self.url, %err, "chat request failed");
                handler.on_error(err);
                return;
            }
        };

        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::default();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::warn!(%err, "chat stream read failed");
                    handler.on_error(ChatError::Read(err.to_string()));
                    return;
                }
            };

            for record in decoder.push_chunk(&chunk) {
                if deliver(&record, handler) {
                    return;
                }
            }
        }

        if let Some(record) = decoder.finish()
            && deliver(&record, handler)
        {
            return;
        }

        tracing::debug!("chat stream closed without done");
        handler.on_done(None);
    }

    /// Runs the session on its own task and returns its events as a stream.
    ///
    /// Dropping the handle aborts the read loop.
    pub fn spawn(&self, request: ChatRequest) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.clone();
        let task = tokio::spawn(async move {
            let mut forward = Forward { tx };
            session.run(&request, &mut forward).await;
        });

        SessionHandle {
            events: UnboundedReceiverStream::new(rx),
            task: task.abort_handle(),
        }
    }

    async fn open(&self, request: &ChatRequest) -> ChatResult<Response> {
        let mut builder = self.http.post(&self.url).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(
            url = %self.url,
            conversation_id = ?request.conversation_id,
            prev_message_id = ?request.prev_message_id,
            branch_from_root = request.branch_from_root,
            "opening chat stream"
        );

        let response = builder
            .send()
            .await
            .map_err(|source| ChatError::unreachable(&self.url, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::status(status));
        }
        if status == StatusCode::NO_CONTENT {
            return Err(ChatError::MissingBody);
        }

        Ok(response)
    }
}

/// Dispatches one record. Returns `true` when it was the terminal event.
fn deliver<H: StreamHandler + ?Sized>(record: &str, handler: &mut H) -> bool {
    let Some(event) = interpret(record) else {
        return false;
    };
    let terminal = matches!(event, StreamEvent::Done { .. });
    if terminal {
        tracing::debug!("chat stream done");
    }
    dispatch(event, handler);
    terminal
}

/// What a spawned session reports back.
#[derive(Debug)]
pub enum SessionEvent {
    Stream(StreamEvent),
    Failed(ChatError),
}

struct Forward {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Forward {
    fn send(&self, event: SessionEvent) {
        // Receiver gone means nobody is listening; the task gets aborted on drop.
        let _ = self.tx.send(event);
    }
}

impl StreamHandler for Forward {
    fn on_thinking(&mut self, text: Option<String>) {
        self.send(SessionEvent::Stream(StreamEvent::Thinking { text }));
    }

    fn on_content(&mut self, delta: String) {
        self.send(SessionEvent::Stream(StreamEvent::Content { delta }));
    }

    fn on_tool_call(&mut self, call: ToolCallPayload) {
        self.send(SessionEvent::Stream(StreamEvent::ToolCall(call)));
    }

    fn on_tool_result(&mut self, result: Value) {
        self.send(SessionEvent::Stream(StreamEvent::ToolResult { result }));
    }

    fn on_done(&mut self, conversation_id: Option<String>) {
        self.send(SessionEvent::Stream(StreamEvent::Done { conversation_id }));
    }

    fn on_error(&mut self, error: ChatError) {
        self.send(SessionEvent::Failed(error));
    }
}

/// A running session. Yields events until the session ends.
pub struct SessionHandle {
    events: UnboundedReceiverStream<SessionEvent>,
    task: AbortHandle,
}

impl SessionHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Stream for SessionHandle {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
