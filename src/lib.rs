//! Client for a streaming, branching chat service.
//!
//! The chat endpoint answers with newline-delimited JSON events
//! ([`frame`], [`events`], [`session`]); history comes back as a flat list
//! that [`reconcile`] turns into render messages; [`branch`] and [`chat`]
//! keep the visible branch consistent across edits, forks and refetches.

pub mod branch;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod literal;
pub mod logging;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod tool_result;
pub mod ui;

pub use chat::ChatState;
pub use client::{ApiClient, ClientConfig};
pub use error::{ChatError, ChatResult};
pub use protocol::{ChatRequest, ConversationMessage, StreamEvent};
pub use reconcile::{Message, Step, to_render_messages};
pub use session::{ChatSession, SessionEvent, SessionHandle};
