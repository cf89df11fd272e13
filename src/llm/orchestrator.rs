//! Chat orchestration: persist, complete, relay, persist.
//!
//! The orchestrator manages the complete lifecycle of one chat exchange:
//! 1. Persist the user's message as a turn
//! 2. Fetch (or create) the session's history
//! 3. Open a completion stream with the system prompt, history and input
//! 4. Relay each fragment to the caller as it arrives, keeping a full copy
//! 5. When the model finishes, render the copy to HTML, persist it, and
//!    extend the session history with the exchange
//!
//! Steps 4 and 5 run on a spawned relay task, so by default the assistant
//! turn is persisted whether or not the caller is still reading. With
//! [`ChatOptions::finish_on_disconnect`] off, the upstream stream is dropped
//! as soon as the caller goes away and nothing more is stored.
//!
//! # Example
//!
//! ```rust,ignore
//! use chat_relay::llm::{ChatOptions, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(store, histories, client, ChatOptions::default());
//! let mut reply = orchestrator.handle_chat("Hello".to_string(), "default").await?;
//! while let Some(fragment) = reply.next().await {
//!     print!("{}", fragment?);
//! }
//! ```

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::ChatError;
use crate::history::{HistoryRegistry, SessionHistory};
use crate::markdown::render_markdown;
use crate::store::MessageStore;

use super::{CompletionClient, FragmentStream, MessageRole};

/// Fixed instruction sent ahead of every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Format your response using markdown for better presentation. Use # for main headings, ## for subheadings, * for bullet points, and other markdown syntax as needed.";

/// Session used when a request does not name one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Fragments buffered between the relay task and the response body.
const FRAGMENT_CHANNEL_BUFFER: usize = 64;

/// Stream of reply fragments handed to the HTTP layer.
///
/// An `Err` item means generation failed after the response started; the
/// transport should abort the body.
pub type ReplyStream = ReceiverStream<Result<String, ChatError>>;

/// Tunables for the chat flow.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// System prompt sent ahead of the history.
    pub system_prompt: String,
    /// Session id used when the caller does not supply one.
    pub default_session_id: String,
    /// Keep draining the model and persist the reply after the caller disconnects.
    pub finish_on_disconnect: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_session_id: DEFAULT_SESSION_ID.to_string(),
            finish_on_disconnect: true,
        }
    }
}

/// Ties the message store, the history registry and a completion client together.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn MessageStore>,
    histories: HistoryRegistry,
    client: Arc<dyn CompletionClient>,
    options: ChatOptions,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("sessions", &self.histories.len())
            .field("client", &self.client)
            .field("options", &self.options)
            .finish()
    }
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        store: Arc<dyn MessageStore>,
        histories: HistoryRegistry,
        client: Arc<dyn CompletionClient>,
        options: ChatOptions,
    ) -> Self {
        Self {
            store,
            histories,
            client,
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    #[must_use]
    pub fn histories(&self) -> &HistoryRegistry {
        &self.histories
    }

    /// Resolve the session id for a request, falling back to the default.
    #[must_use]
    pub fn resolve_session_id(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.options.default_session_id)
            .to_string()
    }

    /// Handle one chat message.
    ///
    /// Returns once the user turn is stored and the model has accepted the
    /// request; fragments then arrive on the returned stream as they are
    /// generated.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Storage`] if the user turn cannot be stored (the
    /// model is not contacted) and [`ChatError::Completion`] if the provider
    /// refuses the request. The user turn is kept in both completion cases.
    pub async fn handle_chat(
        &self,
        message: String,
        session_id: &str,
    ) -> Result<ReplyStream, ChatError> {
        let request_id = Uuid::new_v4().to_string();

        let user_turn = self.store.save(&message, true).await?;
        tracing::info!(
            request_id = %request_id,
            session_id = %session_id,
            turn_id = user_turn.id,
            message_length = message.len(),
            "Stored user turn"
        );
        tracing::trace!(request_id = %request_id, content = %message, "User message");

        let history = self.histories.get(session_id);
        let context = history.messages();

        tracing::info!(
            request_id = %request_id,
            session_id = %session_id,
            history_len = context.len(),
            "Starting completion"
        );

        let fragments = self
            .client
            .stream_completion(&self.options.system_prompt, &context, &message, session_id)
            .await?;

        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_BUFFER);
        let relay = Relay {
            store: Arc::clone(&self.store),
            history,
            input: message,
            request_id,
            finish_on_disconnect: self.options.finish_on_disconnect,
        };
        tokio::spawn(relay.run(fragments, tx));

        Ok(ReceiverStream::new(rx))
    }
}

/// State owned by the spawned relay task of one exchange.
struct Relay {
    store: Arc<dyn MessageStore>,
    history: SessionHistory,
    input: String,
    request_id: String,
    finish_on_disconnect: bool,
}

impl Relay {
    async fn run(self, mut fragments: FragmentStream, tx: mpsc::Sender<Result<String, ChatError>>) {
        let mut full_response = String::new();
        let mut client_alive = true;
        let mut fragment_count: usize = 0;

        loop {
            // Watch for the caller going away while the provider is between fragments.
            let next = if client_alive {
                tokio::select! {
                    item = fragments.next() => item,
                    () = tx.closed() => {
                        client_alive = false;
                        if self.abandon_on_disconnect(fragment_count) {
                            return;
                        }
                        continue;
                    }
                }
            } else {
                fragments.next().await
            };
            let Some(item) = next else {
                break;
            };

            match item {
                Ok(fragment) => {
                    fragment_count += 1;
                    full_response.push_str(&fragment);
                    tracing::trace!(
                        request_id = %self.request_id,
                        delta_length = fragment.len(),
                        "Message delta"
                    );

                    if client_alive && tx.send(Ok(fragment)).await.is_err() {
                        client_alive = false;
                        if self.abandon_on_disconnect(fragment_count) {
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(
                        request_id = %self.request_id,
                        kind = err.kind(),
                        error = %err,
                        fragments = fragment_count,
                        "Completion stream failed"
                    );
                    if client_alive {
                        let _ = tx.send(Err(ChatError::Completion(err))).await;
                    }
                    return;
                }
            }
        }
        drop(fragments);

        let html = render_markdown(&full_response);
        match self.store.save(&html, false).await {
            Ok(turn) => tracing::info!(
                request_id = %self.request_id,
                turn_id = turn.id,
                fragments = fragment_count,
                content_length = full_response.len(),
                "Stored assistant turn"
            ),
            Err(err) => tracing::error!(
                request_id = %self.request_id,
                error = %err,
                "Failed to store assistant turn"
            ),
        }

        self.history.append(MessageRole::User, self.input);
        self.history.append(MessageRole::Assistant, full_response);

        // Dropping the sender here ends the response body.
        drop(tx);
    }

    /// Log a disconnect and report whether the upstream should be dropped.
    fn abandon_on_disconnect(&self, fragments: usize) -> bool {
        if self.finish_on_disconnect {
            tracing::info!(
                request_id = %self.request_id,
                fragments,
                "Client disconnected, finishing completion server-side"
            );
            false
        } else {
            tracing::info!(
                request_id = %self.request_id,
                fragments,
                "Client disconnected, abandoning completion"
            );
            true
        }
    }
}
