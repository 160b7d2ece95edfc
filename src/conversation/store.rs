//! Durable conversation tier

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{now, validate_ids};
use crate::error::GatewayError;
use crate::types::{ChatMessage, Session, StoredMessage};

/// Append-only message log plus session metadata.
///
/// The store owns sequence numbering: `append` assigns the next
/// `sequence_no` atomically with the write.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist `message`, creating the session on its first message.
    ///
    /// Fails with `InvalidInput` when the session belongs to another owner
    /// and with `SessionInactive` when it was deleted.
    async fn append(
        &self,
        session_id: &str,
        owner_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, GatewayError>;

    /// The last `limit` messages by `sequence_no`, oldest first. Unknown
    /// sessions yield an empty list.
    async fn recent(&self, session_id: &str, limit: usize)
    -> Result<Vec<StoredMessage>, GatewayError>;

    async fn session(&self, session_id: &str) -> Result<Option<Session>, GatewayError>;

    /// Sessions of `owner_id`, most recently active first.
    async fn sessions_for_owner(
        &self,
        owner_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<Session>, GatewayError>;

    /// Soft-delete. Returns `false` for unknown sessions.
    async fn deactivate(&self, session_id: &str) -> Result<bool, GatewayError>;
}

struct SessionLog {
    session: Session,
    next_seq: u64,
    messages: Vec<StoredMessage>,
}

/// In-process durable tier, for tests and single-node deployments without a
/// database.
#[derive(Default)]
pub struct MemoryConversationStore {
    sessions: Mutex<HashMap<String, SessionLog>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionLog>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append(
        &self,
        session_id: &str,
        owner_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, GatewayError> {
        validate_ids(session_id, owner_id)?;
        let timestamp = now();
        let mut sessions = self.lock();
        let log = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog {
                session: Session {
                    id: session_id.to_string(),
                    owner_id: owner_id.to_string(),
                    created_at: timestamp,
                    last_activity_at: timestamp,
                    active: true,
                },
                next_seq: 0,
                messages: Vec::new(),
            });

        if log.session.owner_id != owner_id {
            return Err(GatewayError::InvalidInput(format!(
                "session '{session_id}' belongs to another owner"
            )));
        }
        if !log.session.active {
            return Err(GatewayError::SessionInactive(session_id.to_string()));
        }

        log.next_seq += 1;
        log.session.last_activity_at = timestamp;
        let stored = StoredMessage {
            session_id: session_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            sequence_no: log.next_seq,
            created_at: timestamp,
        };
        log.messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, GatewayError> {
        let sessions = self.lock();
        Ok(sessions
            .get(session_id)
            .map(|log| {
                let start = log.messages.len().saturating_sub(limit);
                log.messages[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>, GatewayError> {
        Ok(self.lock().get(session_id).map(|log| log.session.clone()))
    }

    async fn sessions_for_owner(
        &self,
        owner_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<Session>, GatewayError> {
        let mut sessions: Vec<Session> = self
            .lock()
            .values()
            .filter(|log| log.session.owner_id == owner_id)
            .filter(|log| include_inactive || log.session.active)
            .map(|log| log.session.clone())
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn deactivate(&self, session_id: &str) -> Result<bool, GatewayError> {
        Ok(match self.lock().get_mut(session_id) {
            Some(log) => {
                log.session.active = false;
                true
            }
            None => false,
        })
    }
}
