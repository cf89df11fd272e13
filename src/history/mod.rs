//! Per-session conversation history.
//!
//! This module keeps the model context for each session in memory. A
//! [`HistoryRegistry`] maps a session identifier to exactly one
//! [`SessionHistory`], created lazily on first access and kept for the
//! lifetime of the registry.
//!
//! Histories are never evicted or persisted: memory grows with the total
//! number of turns across all sessions, and a restart resets model context
//! even though persisted turns remain visible through the message store.
//!
//! # Example
//!
//! ```rust
//! use chat_relay::history::HistoryRegistry;
//! use chat_relay::llm::MessageRole;
//!
//! let registry = HistoryRegistry::new();
//! let history = registry.get("default");
//! history.append(MessageRole::User, "Hello!");
//!
//! assert!(registry.get("default").same_as(&history));
//! assert_eq!(history.messages().len(), 1);
//! ```

mod registry;

pub use registry::{HistoryRegistry, SessionHistory};
