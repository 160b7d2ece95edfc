//! Hybrid conversation service
//!
//! Write-through: the durable tier is written first and its result is what
//! the caller sees; the cache push is best effort. Read-through: the cache is
//! consulted first and the durable tier fills misses, optionally warming the
//! cache. Cache failures degrade to durable-only operation and are logged.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;

use super::cache::{CacheAppend, ConversationCache, MemoryConversationCache};
use super::listing::{SessionGroup, SessionSource, SessionSummary, group_by_day};
use super::store::ConversationStore;
use crate::config::ConversationConfig;
use crate::error::GatewayError;
use crate::types::{ChatMessage, Session, StoredMessage};

pub struct HybridConversationService {
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn ConversationCache>,
    warm_on_miss: bool,
    max_cached_messages: usize,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Sessions whose cached copy may be stale because a cache write and
    /// the eviction after it both failed. They bypass the cache until an
    /// eviction or warm succeeds.
    suspect: DashSet<String>,
}

impl HybridConversationService {
    pub fn new(store: Arc<dyn ConversationStore>, cache: Arc<dyn ConversationCache>) -> Self {
        let defaults = ConversationConfig::default();
        Self {
            store,
            cache,
            warm_on_miss: defaults.warm_on_miss,
            max_cached_messages: defaults.max_cached_messages,
            session_locks: DashMap::new(),
            suspect: DashSet::new(),
        }
    }

    /// Service over `store` with an in-process cache sized from `config`.
    pub fn from_config(config: &ConversationConfig, store: Arc<dyn ConversationStore>) -> Self {
        let cache = MemoryConversationCache::new(
            config.cache_ttl(),
            config.max_cached_messages,
            config.max_cached_sessions,
        );
        Self::new(store, Arc::new(cache))
            .with_warm_on_miss(config.warm_on_miss)
            .with_max_cached_messages(config.max_cached_messages)
    }

    pub fn with_warm_on_miss(mut self, warm: bool) -> Self {
        self.warm_on_miss = warm;
        self
    }

    /// Upper bound on how many messages a warm loads into the cache.
    pub fn with_max_cached_messages(mut self, max: usize) -> Self {
        self.max_cached_messages = max.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn ConversationCache> {
        &self.cache
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn release_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.session_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Durably append one message, then mirror it into the cache.
    pub async fn append(
        &self,
        session_id: &str,
        owner_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, GatewayError> {
        let mut stored = self
            .append_all(session_id, owner_id, std::slice::from_ref(message))
            .await?;
        stored
            .pop()
            .ok_or_else(|| GatewayError::StoreUnavailable("append returned no message".into()))
    }

    /// Append `messages` in order with no other in-process append to the
    /// session interleaved. Stops at the first durable failure; messages
    /// written before it stay written.
    pub async fn append_all(
        &self,
        session_id: &str,
        owner_id: &str,
        messages: &[ChatMessage],
    ) -> Result<Vec<StoredMessage>, GatewayError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            let mut stored = Vec::with_capacity(messages.len());
            let mut failure = None;
            for message in messages {
                match self.append_locked(session_id, owner_id, message).await {
                    Ok(message) => stored.push(message),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            match failure {
                Some(err) => Err(err),
                None => Ok(stored),
            }
        };
        self.release_lock(session_id, lock);
        result
    }

    async fn append_locked(
        &self,
        session_id: &str,
        owner_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, GatewayError> {
        let stored = self
            .store
            .append(session_id, owner_id, message)
            .await
            .inspect_err(|err| {
                tracing::warn!(%session_id, %owner_id, error = %err, "durable append failed");
            })?;

        if !self.clear_suspect(session_id).await {
            return Ok(stored);
        }
        match self.cache.append(owner_id, &stored).await {
            Ok(CacheAppend::Invalidated) => {
                tracing::debug!(%session_id, sequence_no = stored.sequence_no, "cached history out of step, invalidated");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(%session_id, error = %err, "conversation cache degraded, evicting session");
                self.evict_or_suspect(session_id).await;
            }
        }
        Ok(stored)
    }

    /// Evict the cached copy; if that fails too, stop trusting it.
    async fn evict_or_suspect(&self, session_id: &str) {
        if let Err(err) = self.cache.evict(session_id).await {
            tracing::warn!(%session_id, error = %err, "cache eviction failed, bypassing cached copy");
            self.suspect.insert(session_id.to_string());
        }
    }

    /// Whether the cached copy can be used, retrying a pending eviction.
    async fn clear_suspect(&self, session_id: &str) -> bool {
        if !self.suspect.contains(session_id) {
            return true;
        }
        match self.cache.evict(session_id).await {
            Ok(()) => {
                self.suspect.remove(session_id);
                tracing::debug!(%session_id, "stale cache entry evicted");
                true
            }
            Err(_) => false,
        }
    }

    /// The last `limit` messages of a session, oldest first.
    pub async fn read(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, GatewayError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let cached = if self.suspect.contains(session_id) {
            Ok(None)
        } else {
            self.cache.recent(session_id, limit).await
        };
        match cached {
            Ok(Some(cached)) if covers(&cached, limit) => {
                tracing::debug!(%session_id, messages = cached.len(), "conversation cache hit");
                return Ok(cached);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(%session_id, error = %err, "conversation cache degraded, reading durable tier");
            }
        }

        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.read_through(session_id, limit).await
        };
        self.release_lock(session_id, lock);
        result
    }

    async fn read_through(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, GatewayError> {
        let fetch = if self.warm_on_miss {
            limit.max(self.max_cached_messages)
        } else {
            limit
        };
        let mut messages = self.store.recent(session_id, fetch).await?;
        tracing::debug!(%session_id, messages = messages.len(), "read through to durable tier");

        if self.clear_suspect(session_id).await && self.warm_on_miss && !messages.is_empty() {
            self.warm(session_id, &messages).await;
        }

        let start = messages.len().saturating_sub(limit);
        Ok(messages.split_off(start))
    }

    async fn warm(&self, session_id: &str, messages: &[StoredMessage]) {
        let session = match self.store.session(session_id).await {
            Ok(Some(session)) if session.active => session,
            Ok(_) => return,
            Err(err) => {
                tracing::warn!(%session_id, error = %err, "skipping cache warm");
                return;
            }
        };
        let start = messages.len().saturating_sub(self.max_cached_messages);
        if let Err(err) = self
            .cache
            .warm(&session.owner_id, session_id, &messages[start..])
            .await
        {
            tracing::warn!(%session_id, error = %err, "cache warm failed");
        }
    }

    pub async fn session(&self, session_id: &str) -> Result<Option<Session>, GatewayError> {
        self.store.session(session_id).await
    }

    /// Active sessions of `owner_id` from both tiers, newest first, grouped
    /// by day of last activity.
    pub async fn list_sessions(&self, owner_id: &str) -> Result<Vec<SessionGroup>, GatewayError> {
        let cached = match self.cache.session_ids(owner_id).await {
            Ok(cached) => cached,
            Err(err) => {
                tracing::warn!(%owner_id, error = %err, "conversation cache degraded, listing durable sessions only");
                Vec::new()
            }
        };
        let durable = self.store.sessions_for_owner(owner_id, true).await?;

        let mut inactive = HashSet::new();
        let mut merged: HashMap<String, SessionSummary> = HashMap::new();
        for session in durable {
            if !session.active {
                inactive.insert(session.id);
                continue;
            }
            merged.insert(
                session.id.clone(),
                SessionSummary {
                    session_id: session.id,
                    owner_id: session.owner_id,
                    last_activity_at: session.last_activity_at,
                    created_at: Some(session.created_at),
                    source: SessionSource::Durable,
                },
            );
        }
        for entry in cached {
            if inactive.contains(&entry.session_id) {
                continue;
            }
            merged
                .entry(entry.session_id.clone())
                .and_modify(|summary| {
                    summary.source = summary.source.merge(SessionSource::Cache);
                    summary.last_activity_at = summary.last_activity_at.max(entry.last_activity_at);
                })
                .or_insert_with(|| SessionSummary {
                    session_id: entry.session_id.clone(),
                    owner_id: owner_id.to_string(),
                    last_activity_at: entry.last_activity_at,
                    created_at: None,
                    source: SessionSource::Cache,
                });
        }

        Ok(group_by_day(merged.into_values().collect()))
    }

    /// Sessions of `owner_id` currently held by the cache, newest first.
    pub async fn list_cached_sessions(
        &self,
        owner_id: &str,
    ) -> Result<Vec<SessionSummary>, GatewayError> {
        let mut sessions: Vec<SessionSummary> = self
            .cache
            .session_ids(owner_id)
            .await?
            .into_iter()
            .map(|entry| SessionSummary {
                session_id: entry.session_id,
                owner_id: owner_id.to_string(),
                last_activity_at: entry.last_activity_at,
                created_at: None,
                source: SessionSource::Cache,
            })
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    /// Evict the cached copy and soft-delete the session. Returns `false`
    /// when the durable tier does not know the session.
    pub async fn delete(&self, session_id: &str) -> Result<bool, GatewayError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.evict_or_suspect(session_id).await;
            self.store.deactivate(session_id).await
        };
        self.release_lock(session_id, lock);
        if matches!(result, Ok(true)) {
            tracing::info!(%session_id, "session deleted");
        }
        result
    }
}

/// A cached list answers `read(limit)` only if it is not a truncated view.
fn covers(cached: &[StoredMessage], limit: usize) -> bool {
    cached.len() >= limit || cached.first().is_some_and(|m| m.sequence_no == 1)
}

impl std::fmt::Debug for HybridConversationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridConversationService")
            .field("warm_on_miss", &self.warm_on_miss)
            .field("max_cached_messages", &self.max_cached_messages)
            .finish_non_exhaustive()
    }
}
