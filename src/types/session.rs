//! Persisted conversation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chat::{ChatMessage, Role};

/// A message once it has been written to the durable log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    /// Monotonic per session, starting at 1.
    pub sequence_no: u64,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

/// Session metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// `false` once soft-deleted.
    pub active: bool,
}
