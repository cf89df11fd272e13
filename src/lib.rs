//! Streaming chat relay
//!
//! A small web chat server: it persists each user message, forwards it to a
//! hosted chat-completion model together with the session's conversation
//! history, streams the reply back as plain text while it is generated, and
//! stores the finished reply rendered as HTML.
//!
//! # Architecture
//!
//! - **Server**: Axum router with the chat page, the streaming chat endpoint
//!   and the history endpoint
//! - **Orchestration**: persist, complete, relay, persist
//! - **Storage**: append-only SQLite turn log
//! - **History**: in-memory model context per session
//!
//! # Modules
//!
//! - [`llm`]: completion client trait, `OpenAI`-compatible driver, orchestrator
//! - [`store`]: message store trait and SQLite implementation
//! - [`history`]: per-session conversation history registry
//! - [`markdown`]: markdown to HTML rendering
//! - [`error`]: endpoint error type and HTTP translation

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod markdown;
pub mod server;
pub mod store;
pub mod ui;

use llm::Orchestrator;
use std::sync::Arc;
use store::MessageStore;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Chat flow for `POST /chat`.
    pub orchestrator: Arc<Orchestrator>,
    /// Turn log read by `GET /history`.
    pub store: Arc<dyn MessageStore>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }
}
