//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use chat_relay::AppState;
use chat_relay::history::HistoryRegistry;
use chat_relay::llm::{
    ChatOptions, CompletionClient, CompletionError, FragmentStream, Message, Orchestrator,
};
use chat_relay::server::router;
use chat_relay::store::{MessageStore, SqliteMessageStore, StorageError, Turn};

/// One scripted outcome for a completion call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these fragments, then finish.
    Reply(Vec<&'static str>),
    /// Reject the credential.
    Unauthorized,
    /// Throttle the request.
    RateLimited,
}

/// Arguments of one recorded completion call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub input: String,
    pub session_id: String,
}

/// Completion client that plays back scripted outcomes in order.
///
/// Once the script runs out it answers `"ok"`.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn stream_completion(
        &self,
        system_prompt: &str,
        history: &[Message],
        input: &str,
        session_id: &str,
    ) -> Result<FragmentStream, CompletionError> {
        self.calls.lock().unwrap().push(RecordedCall {
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
            input: input.to_string(),
            session_id: session_id.to_string(),
        });

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Reply(vec!["ok"]));

        match next {
            Script::Reply(fragments) => {
                let items: Vec<Result<String, CompletionError>> =
                    fragments.into_iter().map(|f| Ok(f.to_string())).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Script::Unauthorized => Err(CompletionError::Auth {
                status: 401,
                message: "Incorrect API key provided".to_string(),
            }),
            Script::RateLimited => Err(CompletionError::RateLimited {
                retry_after: Some(1),
                message: "Rate limit reached".to_string(),
            }),
        }
    }
}

/// Store whose every operation fails.
#[derive(Debug)]
pub struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn save(&self, _content: &str, _is_user: bool) -> Result<Turn, StorageError> {
        Err(StorageError::Database(sqlx::Error::PoolClosed))
    }

    async fn list_all(&self) -> Result<Vec<Turn>, StorageError> {
        Err(StorageError::Database(sqlx::Error::PoolClosed))
    }
}

/// A running test app over a temporary SQLite database.
pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<SqliteMessageStore>,
    pub client: Arc<ScriptedClient>,
    pub histories: HistoryRegistry,
    _dir: tempfile::TempDir,
}

pub async fn spawn_app(script: impl IntoIterator<Item = Script>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("chat_history.db").display());
    let store = Arc::new(SqliteMessageStore::new(&url, 5).await.unwrap());
    let client = Arc::new(ScriptedClient::new(script));
    let histories = HistoryRegistry::new();

    let message_store: Arc<dyn MessageStore> = Arc::clone(&store) as Arc<dyn MessageStore>;
    let completion: Arc<dyn CompletionClient> = Arc::clone(&client) as Arc<dyn CompletionClient>;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&message_store),
        histories.clone(),
        completion,
        ChatOptions::default(),
    ));

    let server = TestServer::new(router(AppState::new(orchestrator, message_store))).unwrap();

    TestApp {
        server,
        store,
        client,
        histories,
        _dir: dir,
    }
}

/// Test server whose message store always fails.
pub fn spawn_failing_app() -> (TestServer, Arc<ScriptedClient>) {
    let client = Arc::new(ScriptedClient::default());
    let store: Arc<dyn MessageStore> = Arc::new(FailingStore);
    let completion: Arc<dyn CompletionClient> = Arc::clone(&client) as Arc<dyn CompletionClient>;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        HistoryRegistry::new(),
        completion,
        ChatOptions::default(),
    ));
    let server = TestServer::new(router(AppState::new(orchestrator, store))).unwrap();
    (server, client)
}
