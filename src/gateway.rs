//! Chat gateway
//!
//! The inbound operation: assemble history, dispatch through the router and
//! persist the turn once the caller has drained the stream.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::conversation::{
    ConversationStore, HybridConversationService, MemoryConversationStore, SqliteConversationStore,
    spawn_sweeper, validate_ids,
};
use crate::error::GatewayError;
use crate::registry::ProviderRouter;
use crate::streaming::ChatStreamHandle;
use crate::types::{ChatMessage, ChatOptions, StoredMessage};

/// Fresh opaque session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub session_id: String,
    pub owner_id: String,
    pub model: String,
    pub message: String,
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(
        session_id: impl Into<String>,
        owner_id: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            owner_id: owner_id.into(),
            model: model.into(),
            message: message.into(),
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

/// Router plus conversation service behind one `chat` call.
#[derive(Debug, Clone)]
pub struct ChatGateway {
    router: Arc<ProviderRouter>,
    conversations: Arc<HybridConversationService>,
    history_limit: usize,
    sweep_interval: Duration,
}

impl ChatGateway {
    pub fn new(router: Arc<ProviderRouter>, conversations: Arc<HybridConversationService>) -> Self {
        Self {
            router,
            conversations,
            history_limit: 20,
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Build the router, the durable tier (SQLite when `database.url` is set,
    /// in-memory otherwise) and the cache from configuration.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let router = ProviderRouter::from_config(config)?;
        let store: Arc<dyn ConversationStore> = match &config.database.url {
            Some(url) => Arc::new(
                SqliteConversationStore::connect(url, config.database.max_connections).await?,
            ),
            None => {
                tracing::warn!("no database configured, conversations are kept in memory only");
                Arc::new(MemoryConversationStore::new())
            }
        };
        let conversations = HybridConversationService::from_config(&config.conversation, store);

        Ok(Self::new(Arc::new(router), Arc::new(conversations))
            .with_history_limit(config.conversation.history_limit)
            .with_sweep_interval(config.conversation.sweep_interval()))
    }

    /// Default number of history messages sent with a request.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval = every;
        self
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    pub fn conversations(&self) -> &Arc<HybridConversationService> {
        &self.conversations
    }

    /// Start the periodic cache sweep; it stops when `shutdown` is cancelled.
    pub fn start_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        spawn_sweeper(
            self.conversations.cache().clone(),
            self.sweep_interval,
            shutdown,
        )
    }

    /// Run one chat turn.
    ///
    /// The returned stream yields the assistant's deltas. When the provider
    /// finishes, the user and assistant messages are appended before the
    /// stream ends; a persistence failure is yielded as the final item.
    /// Failed or cancelled turns are only persisted with
    /// `ChatOptions::persist_partial` and a non-empty reply. Persistence runs
    /// while the stream is polled, so callers must drain it.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatStreamHandle, GatewayError> {
        let ChatRequest {
            session_id,
            owner_id,
            model,
            message,
            options,
        } = request;
        validate_ids(&session_id, &owner_id)?;
        if message.trim().is_empty() {
            return Err(GatewayError::InvalidInput("message must not be empty".into()));
        }
        if let Some(session) = self.conversations.session(&session_id).await? {
            if session.owner_id != owner_id {
                return Err(GatewayError::InvalidInput(format!(
                    "session '{session_id}' belongs to another owner"
                )));
            }
            if !session.active {
                return Err(GatewayError::SessionInactive(session_id));
            }
        }

        let limit = options.history_limit.unwrap_or(self.history_limit);
        let mut history: Vec<ChatMessage> = self
            .conversations
            .read(&session_id, limit)
            .await?
            .iter()
            .map(StoredMessage::to_chat_message)
            .collect();
        let user_message = ChatMessage::user(message);
        history.push(user_message.clone());

        let (mut deltas, cancel) = self
            .router
            .chat(&history, &model, &options)
            .await?
            .into_parts();

        let conversations = self.conversations.clone();
        let cancelled = cancel.clone();
        let persist_partial = options.persist_partial;
        let stream = async_stream::stream! {
            let mut reply = String::new();
            let mut failure = None;
            while let Some(item) = deltas.next().await {
                match item {
                    Ok(delta) => {
                        reply.push_str(&delta);
                        yield Ok(delta);
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            drop(deltas);

            let complete = failure.is_none() && !cancelled.is_cancelled();
            if complete || (persist_partial && !reply.is_empty()) {
                let mut turn = vec![user_message];
                if !reply.is_empty() {
                    turn.push(ChatMessage::assistant(reply));
                }
                match conversations.append_all(&session_id, &owner_id, &turn).await {
                    Ok(stored) => {
                        tracing::debug!(%session_id, messages = stored.len(), complete, "chat turn persisted");
                    }
                    Err(err) => {
                        tracing::error!(%session_id, %owner_id, error = %err, "failed to persist chat turn");
                        if failure.is_none() {
                            yield Err(err);
                        }
                    }
                }
            } else {
                tracing::debug!(%session_id, cancelled = cancelled.is_cancelled(), "chat turn not persisted");
            }

            if let Some(err) = failure {
                yield Err(err);
            }
        };

        Ok(ChatStreamHandle::new(Box::pin(stream), cancel))
    }
}
