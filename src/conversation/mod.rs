//! Conversation storage
//!
//! Two tiers behind one service:
//! - `store`: the durable, append-only log and session metadata (source of
//!   truth), with in-memory and SQLite implementations
//! - `cache`: a volatile, TTL-bound copy of the most recent messages per
//!   session plus a per-owner session index
//! - `service`: write-through / read-through coordination and listing
//!
//! The cached list for a session is always a suffix of its durable log.

pub mod cache;
pub mod listing;
pub mod service;
pub mod sqlite;
pub mod store;

pub use cache::{
    CacheAppend, CachedSession, ConversationCache, MemoryConversationCache, spawn_sweeper,
};
pub use listing::{SessionGroup, SessionSource, SessionSummary, group_by_day};
pub use service::HybridConversationService;
pub use sqlite::SqliteConversationStore;
pub use store::{ConversationStore, MemoryConversationStore};

use chrono::{DateTime, SubsecRound, Utc};

/// Cache key of a session's message list.
pub fn conv_key(owner_id: &str, session_id: &str) -> String {
    format!("conv:{owner_id}:{session_id}")
}

/// Cache key of an owner's session index.
pub fn sessions_key(owner_id: &str) -> String {
    format!("sessions:{owner_id}")
}

/// Current time at the precision both tiers persist (microseconds).
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn validate_ids(session_id: &str, owner_id: &str) -> Result<(), crate::error::GatewayError> {
    if session_id.trim().is_empty() {
        return Err(crate::error::GatewayError::InvalidInput(
            "session_id must not be empty".into(),
        ));
    }
    if owner_id.trim().is_empty() {
        return Err(crate::error::GatewayError::InvalidInput(
            "owner_id must not be empty".into(),
        ));
    }
    Ok(())
}
