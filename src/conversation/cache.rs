//! Volatile conversation tier
//!
//! Keys follow the cache schema: `conv:{owner}:{session}` holds the most
//! recent messages of a session, `sessions:{owner}` the owner's session ids.
//! Entries expire after a TTL that appends and warms refresh; reads do not.
//! Expiry is enforced lazily on access and by a periodic sweep.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{conv_key, sessions_key};
use crate::error::GatewayError;
use crate::types::StoredMessage;

/// What `ConversationCache::append` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAppend {
    /// Pushed onto the cached list.
    Appended,
    /// No cached list to extend; the next read warms it.
    Skipped,
    /// The message did not follow the cached list, so the entry was dropped.
    Invalidated,
}

/// Entry of an owner's cached session index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSession {
    pub session_id: String,
    pub last_activity_at: DateTime<Utc>,
}

/// Volatile, best-effort copy of recent conversation state.
#[async_trait]
pub trait ConversationCache: Send + Sync {
    /// Push a durably written message, keeping the list contiguous.
    async fn append(
        &self,
        owner_id: &str,
        message: &StoredMessage,
    ) -> Result<CacheAppend, GatewayError>;

    /// Up to `limit` most recent cached messages, oldest first, or `None`
    /// when the session is not cached.
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Option<Vec<StoredMessage>>, GatewayError>;

    /// Replace the session's entry with `messages` (a durable suffix).
    async fn warm(
        &self,
        owner_id: &str,
        session_id: &str,
        messages: &[StoredMessage],
    ) -> Result<(), GatewayError>;

    async fn evict(&self, session_id: &str) -> Result<(), GatewayError>;

    /// Unexpired cached sessions of `owner_id`.
    async fn session_ids(&self, owner_id: &str) -> Result<Vec<CachedSession>, GatewayError>;

    /// Drop expired entries; returns how many were removed.
    async fn sweep_expired(&self) -> usize;
}

struct CacheEntry {
    owner_id: String,
    session_id: String,
    messages: VecDeque<StoredMessage>,
    expires_at: Instant,
    last_activity_at: DateTime<Utc>,
}

struct CacheState {
    lists: LruCache<String, CacheEntry>,
    index: HashMap<String, HashSet<String>>,
    owners: HashMap<String, String>,
}

impl CacheState {
    fn key_of(&self, session_id: &str) -> Option<String> {
        self.owners
            .get(session_id)
            .map(|owner| conv_key(owner, session_id))
    }

    fn remove(&mut self, session_id: &str) -> bool {
        let Some(owner) = self.owners.remove(session_id) else {
            return false;
        };
        self.lists.pop(&conv_key(&owner, session_id));
        self.unindex(&owner, session_id);
        true
    }

    fn unindex(&mut self, owner_id: &str, session_id: &str) {
        let index_key = sessions_key(owner_id);
        if let Some(ids) = self.index.get_mut(&index_key) {
            ids.remove(session_id);
            if ids.is_empty() {
                self.index.remove(&index_key);
            }
        }
    }

    fn insert(&mut self, entry: CacheEntry) {
        let key = conv_key(&entry.owner_id, &entry.session_id);
        self.owners
            .insert(entry.session_id.clone(), entry.owner_id.clone());
        self.index
            .entry(sessions_key(&entry.owner_id))
            .or_default()
            .insert(entry.session_id.clone());
        if let Some((evicted_key, evicted)) = self.lists.push(key.clone(), entry) {
            if evicted_key != key {
                tracing::debug!(session_id = %evicted.session_id, "conversation cache full, evicting");
                self.owners.remove(&evicted.session_id);
                self.unindex(&evicted.owner_id, &evicted.session_id);
            }
        }
    }

    /// Live entry for `session_id`, dropping it first when expired.
    fn live_mut(&mut self, session_id: &str, now: Instant) -> Option<&mut CacheEntry> {
        let key = self.key_of(session_id)?;
        let expired = self.lists.peek(&key).is_none_or(|e| e.expires_at <= now);
        if expired {
            self.remove(session_id);
            return None;
        }
        self.lists.get_mut(&key)
    }
}

/// In-process conversation cache with LRU capacity and per-entry TTL.
pub struct MemoryConversationCache {
    ttl: Duration,
    max_messages: usize,
    state: Mutex<CacheState>,
}

impl MemoryConversationCache {
    pub fn new(ttl: Duration, max_messages: usize, max_sessions: usize) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            max_messages: max_messages.max(1),
            state: Mutex::new(CacheState {
                lists: LruCache::new(capacity),
                index: HashMap::new(),
                owners: HashMap::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Number of cached sessions, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.lock().lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn trim(&self, messages: &mut VecDeque<StoredMessage>) {
        while messages.len() > self.max_messages {
            messages.pop_front();
        }
    }
}

#[async_trait]
impl ConversationCache for MemoryConversationCache {
    async fn append(
        &self,
        owner_id: &str,
        message: &StoredMessage,
    ) -> Result<CacheAppend, GatewayError> {
        let now = Instant::now();
        let mut state = self.lock();

        if let Some(entry) = state.live_mut(&message.session_id, now) {
            let contiguous = entry
                .messages
                .back()
                .is_some_and(|last| last.sequence_no + 1 == message.sequence_no);
            if !contiguous {
                state.remove(&message.session_id);
                return Ok(CacheAppend::Invalidated);
            }
            entry.messages.push_back(message.clone());
            let mut messages = std::mem::take(&mut entry.messages);
            self.trim(&mut messages);
            entry.messages = messages;
            entry.expires_at = now + self.ttl;
            entry.last_activity_at = message.created_at;
            return Ok(CacheAppend::Appended);
        }

        if message.sequence_no != 1 {
            return Ok(CacheAppend::Skipped);
        }
        state.insert(CacheEntry {
            owner_id: owner_id.to_string(),
            session_id: message.session_id.clone(),
            messages: VecDeque::from([message.clone()]),
            expires_at: now + self.ttl,
            last_activity_at: message.created_at,
        });
        Ok(CacheAppend::Appended)
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Option<Vec<StoredMessage>>, GatewayError> {
        let now = Instant::now();
        let mut state = self.lock();
        Ok(state.live_mut(session_id, now).map(|entry| {
            let start = entry.messages.len().saturating_sub(limit);
            entry.messages.range(start..).cloned().collect()
        }))
    }

    async fn warm(
        &self,
        owner_id: &str,
        session_id: &str,
        messages: &[StoredMessage],
    ) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.remove(session_id);
        let Some(last) = messages.last() else {
            return Ok(());
        };
        let mut list: VecDeque<StoredMessage> = messages.iter().cloned().collect();
        self.trim(&mut list);
        let last_activity_at = last.created_at;
        state.insert(CacheEntry {
            owner_id: owner_id.to_string(),
            session_id: session_id.to_string(),
            messages: list,
            expires_at: Instant::now() + self.ttl,
            last_activity_at,
        });
        Ok(())
    }

    async fn evict(&self, session_id: &str) -> Result<(), GatewayError> {
        self.lock().remove(session_id);
        Ok(())
    }

    async fn session_ids(&self, owner_id: &str) -> Result<Vec<CachedSession>, GatewayError> {
        let now = Instant::now();
        let mut state = self.lock();
        let ids: Vec<String> = state
            .index
            .get(&sessions_key(owner_id))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let mut sessions = Vec::with_capacity(ids.len());
        for session_id in ids {
            let key = conv_key(owner_id, &session_id);
            match state.lists.peek(&key) {
                Some(entry) if entry.expires_at > now => sessions.push(CachedSession {
                    session_id,
                    last_activity_at: entry.last_activity_at,
                }),
                _ => {
                    state.remove(&session_id);
                }
            }
        }
        Ok(sessions)
    }

    async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .lists
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(_, entry)| entry.session_id.clone())
            .collect();
        for session_id in &expired {
            state.remove(session_id);
        }
        expired.len()
    }
}

/// Shortest sweep period; a zero period would make the ticker panic.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Periodically sweep expired entries until `shutdown` is cancelled.
pub fn spawn_sweeper(
    cache: Arc<dyn ConversationCache>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.sweep_expired().await;
                    if removed > 0 {
                        tracing::debug!(removed, "swept expired conversation cache entries");
                    }
                }
            }
        }
    })
}
