use crate::branch::{Direction, switch_path};
use crate::error::{ChatError, ChatResult, status_line};
use crate::protocol::{
    ConversationMessage, ConversationSummary, CreatedMemory, LoginRequest, LoginResponse,
    MemoryContent, MemoryPage, MemoryPageResponse,
};
use crate::session::ChatSession;
use reqwest::{Client as HttpClient, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;

pub struct ClientConfig {
    pub base_url: String,
    /// Full URL of the streaming chat endpoint; defaults to `<base>/api/chat`.
    pub chat_url: Option<String>,
    pub token: Option<String>,
}

/// Filters for the memory list.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub q: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// REST client for the chat service.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    chat_url: String,
    token: Option<String>,
    http: HttpClient,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> ChatResult<Self> {
        let base_url = normalize_base_url(&config.base_url);
        Url::parse(&base_url)
            .map_err(|err| ChatError::Config(format!("base URL {base_url:?}: {err}")))?;
        let chat_url = config
            .chat_url
            .unwrap_or_else(|| format!("{base_url}/api/chat"));

        Ok(Self {
            base_url,
            chat_url,
            token: config.token.filter(|token| !token.is_empty()),
            http: HttpClient::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chat_session(&self) -> ChatSession {
        ChatSession::new(self.http.clone(), self.chat_url.clone(), self.token.clone())
    }

    pub async fn list_conversations(&self) -> ChatResult<Vec<ConversationSummary>> {
        let path = "/api/conversations";
        self.read_json(self.request(Method::GET, self.url(path)), path)
            .await
    }

    /// Messages on the conversation's active branch.
    pub async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> ChatResult<Vec<ConversationMessage>> {
        let path = format!("/api/conversations/{conversation_id}/messages");
        self.read_json(self.request(Method::GET, self.url(&path)), &path)
            .await
    }

    /// Moves the active branch to a sibling of `message_id` and returns the
    /// new active branch.
    pub async fn switch_branch(
        &self,
        direction: Direction,
        conversation_id: &str,
        message_id: &str,
    ) -> ChatResult<Vec<ConversationMessage>> {
        let path = switch_path(direction, conversation_id, message_id);
        tracing::debug!(%path, "switching branch");
        self.read_json(self.request(Method::POST, self.url(&path)), &path)
            .await
    }

    pub async fn list_memories(&self, query: &MemoryQuery) -> ChatResult<MemoryPage> {
        let path = "/api/memory";
        let mut url = Url::parse(&self.url(path))
            .map_err(|err| ChatError::Config(format!("memory URL: {err}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
                pairs.append_pair("q", q);
            }
            if let Some(page) = query.page {
                pairs.append_pair("page", &page.to_string());
            }
            if let Some(page_size) = query.page_size {
                pairs.append_pair("page-size", &page_size.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let response: MemoryPageResponse = self
            .read_json(self.request(Method::GET, url.as_str().to_string()), path)
            .await?;
        Ok(MemoryPage {
            items: response.items.into_iter().map(Into::into).collect(),
            total_count: response.total_count,
        })
    }

    /// Returns the new memory's id.
    pub async fn add_memory(&self, content: &str) -> ChatResult<String> {
        let path = "/api/memory";
        let builder = self
            .request(Method::POST, self.url(path))
            .json(&MemoryContent {
                content: content.trim(),
            });
        let created: CreatedMemory = self.read_json(builder, path).await?;
        Ok(created.id)
    }

    pub async fn update_memory(&self, id: &str, content: &str) -> ChatResult<()> {
        let path = format!("/api/memory/{id}");
        let builder = self
            .request(Method::PUT, self.url(&path))
            .json(&MemoryContent {
                content: content.trim(),
            });
        self.read_empty(builder, &path).await
    }

    pub async fn delete_memory(&self, id: &str) -> ChatResult<()> {
        let path = format!("/api/memory/{id}");
        self.read_empty(self.request(Method::DELETE, self.url(&path)), &path)
            .await
    }

    pub async fn login(&self, username: &str, password: &str) -> ChatResult<LoginResponse> {
        let path = "/api/login";
        let builder = self
            .request(Method::POST, self.url(path))
            .json(&LoginRequest { username, password });
        self.read_json(builder, path).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> ChatResult<T> {
        let body = self.execute(builder, path).await?;
        serde_json::from_slice(&body).map_err(|err| ChatError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    async fn read_empty(&self, builder: RequestBuilder, path: &str) -> ChatResult<()> {
        self.execute(builder, path).await.map(|_| ())
    }

    async fn execute(&self, builder: RequestBuilder, path: &str) -> ChatResult<Vec<u8>> {
        let response = builder
            .send()
            .await
            .map_err(|source| ChatError::unreachable(self.url(path), source))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ChatError::Read(err.to_string()))?;

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| status_line(status));
            tracing::warn!(%path, status = status.as_u16(), %message, "request failed");
            return Err(ChatError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(body.to_vec())
    }
}

/// The `error` string of a JSON error body, if there is one.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}

fn normalize_base_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}
