//! Endpoint error type and its HTTP translation.
//!
//! Handlers return [`ChatError`]; whatever the variant, callers only ever see
//! an opaque 500 with a fixed `detail` body. The full error is logged server-side.

use std::any::Any;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::llm::CompletionError;
use crate::store::StorageError;

/// Body text returned for every server-side failure.
pub const GENERIC_ERROR_DETAIL: &str = "An error occurred while processing your request";

/// Errors surfaced by the chat and history endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Message store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Completion provider failure.
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),
}

impl ChatError {
    /// Short, stable label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Completion(err) => err.kind(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        tracing::error!(
            name: "chat.request.failed",
            kind = self.kind(),
            error = %self,
            "Error in chat endpoint"
        );
        internal_error_response()
    }
}

/// The opaque `500 {"detail": ...}` response.
#[must_use]
pub fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "detail": GENERIC_ERROR_DETAIL })),
    )
        .into_response()
}

/// Last-resort translator for handler panics.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(name: "chat.request.panicked", panic = %detail, "Handler panicked");
    internal_error_response()
}
