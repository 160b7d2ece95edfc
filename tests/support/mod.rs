//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use siumai_gateway::conversation::{
    CacheAppend, CachedSession, ConversationCache, ConversationStore, MemoryConversationCache,
    MemoryConversationStore,
};
use siumai_gateway::provider::{ChatProvider, ModelMatcher, ProviderRequest};
use siumai_gateway::streaming::DeltaStream;
use siumai_gateway::types::{ChatMessage, Session, StoredMessage};
use siumai_gateway::GatewayError;

/// Sets its flag when dropped, standing in for a closed transport.
struct CloseFlag(Arc<AtomicBool>);

impl Drop for CloseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A provider that replays a fixed script of deltas.
pub struct ScriptedProvider {
    id: String,
    matcher: ModelMatcher,
    deltas: Vec<String>,
    fail_after: Option<usize>,
    delay: Duration,
    requires_token: bool,
    handshake_errors: Mutex<VecDeque<GatewayError>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
    yielded: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(id: &str, matcher: ModelMatcher) -> Self {
        Self {
            id: id.to_string(),
            matcher,
            deltas: vec!["ok".to_string()],
            fail_after: None,
            delay: Duration::ZERO,
            requires_token: false,
            handshake_errors: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            yielded: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_deltas<I, S>(mut self, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deltas = deltas.into_iter().map(Into::into).collect();
        self
    }

    /// End the stream with a transport error after `n` deltas.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requiring_token(mut self) -> Self {
        self.requires_token = true;
        self
    }

    /// Fail the next handshakes with `errors`, in order.
    pub fn with_handshake_errors(self, errors: impl IntoIterator<Item = GatewayError>) -> Self {
        self.handshake_errors
            .lock()
            .unwrap()
            .extend(errors);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn yielded(&self) -> usize {
        self.yielded.load(Ordering::SeqCst)
    }

    pub fn transport_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_bearer(&self) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .and_then(|r| r.bearer.as_ref().map(|b| b.expose_secret().to_string()))
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn matcher(&self) -> &ModelMatcher {
        &self.matcher
    }

    fn requires_token(&self) -> bool {
        self.requires_token
    }

    async fn chat(&self, request: ProviderRequest) -> Result<DeltaStream, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(err) = self.handshake_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        let deltas = self.deltas.clone();
        let fail_after = self.fail_after;
        let delay = self.delay;
        let yielded = self.yielded.clone();
        let guard = CloseFlag(self.closed.clone());
        Ok(Box::pin(async_stream::stream! {
            let _guard = guard;
            let total = deltas.len();
            for (index, delta) in deltas.into_iter().enumerate() {
                if fail_after == Some(index) {
                    break;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yielded.fetch_add(1, Ordering::SeqCst);
                yield Ok(delta);
            }
            if fail_after.is_some_and(|n| n <= total) {
                yield Err(GatewayError::TransportError("connection reset".into()));
            }
        }))
    }
}

/// Durable tier whose availability can be switched off.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryConversationStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.down.load(Ordering::SeqCst) {
            Err(GatewayError::StoreUnavailable("database is down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn append(
        &self,
        session_id: &str,
        owner_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, GatewayError> {
        self.check()?;
        self.inner.append(session_id, owner_id, message).await
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, GatewayError> {
        self.check()?;
        self.inner.recent(session_id, limit).await
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>, GatewayError> {
        self.check()?;
        self.inner.session(session_id).await
    }

    async fn sessions_for_owner(
        &self,
        owner_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<Session>, GatewayError> {
        self.check()?;
        self.inner.sessions_for_owner(owner_id, include_inactive).await
    }

    async fn deactivate(&self, session_id: &str) -> Result<bool, GatewayError> {
        self.check()?;
        self.inner.deactivate(session_id).await
    }
}

/// Cache tier whose availability can be switched off.
pub struct FlakyCache {
    inner: MemoryConversationCache,
    down: AtomicBool,
}

impl FlakyCache {
    pub fn new(inner: MemoryConversationCache) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.down.load(Ordering::SeqCst) {
            Err(GatewayError::CacheUnavailable("cache is down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationCache for FlakyCache {
    async fn append(
        &self,
        owner_id: &str,
        message: &StoredMessage,
    ) -> Result<CacheAppend, GatewayError> {
        self.check()?;
        self.inner.append(owner_id, message).await
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Option<Vec<StoredMessage>>, GatewayError> {
        self.check()?;
        self.inner.recent(session_id, limit).await
    }

    async fn warm(
        &self,
        owner_id: &str,
        session_id: &str,
        messages: &[StoredMessage],
    ) -> Result<(), GatewayError> {
        self.check()?;
        self.inner.warm(owner_id, session_id, messages).await
    }

    async fn evict(&self, session_id: &str) -> Result<(), GatewayError> {
        self.check()?;
        self.inner.evict(session_id).await
    }

    async fn session_ids(&self, owner_id: &str) -> Result<Vec<CachedSession>, GatewayError> {
        self.check()?;
        self.inner.session_ids(owner_id).await
    }

    async fn sweep_expired(&self) -> usize {
        if self.down.load(Ordering::SeqCst) {
            return 0;
        }
        self.inner.sweep_expired().await
    }
}

pub fn memory_cache(ttl: Duration) -> MemoryConversationCache {
    MemoryConversationCache::new(ttl, 50, 1000)
}

pub fn contents(messages: &[StoredMessage]) -> Vec<String> {
    messages.iter().map(|m| m.content.clone()).collect()
}
