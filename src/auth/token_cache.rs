//! Per-provider token cache with single-flight refresh.
//!
//! Each provider owns a slot: `NoToken -> Requesting -> Valid -> Requesting`.
//! While a refresh is running every caller for that provider awaits the same
//! shared future, so the endpoint sees exactly one request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use futures::future::{BoxFuture, Shared};

use super::{DEFAULT_TOKEN_LIFETIME, ProviderToken, TokenFetcher};
use crate::error::GatewayError;
use crate::observability::mask_secret;

/// Default quiet period after a failed refresh.
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(10);

type RefreshFuture = Shared<BoxFuture<'static, Result<ProviderToken, GatewayError>>>;

#[derive(Default)]
struct SlotState {
    token: Option<ProviderToken>,
    inflight: Option<RefreshFuture>,
    /// No refresh is attempted before this instant after a failure.
    retry_at: Option<Instant>,
}

struct TokenSlot {
    provider_id: String,
    fetcher: Arc<dyn TokenFetcher>,
    state: Mutex<SlotState>,
}

impl TokenSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Token cache shared by all providers that need a bearer token.
pub struct TokenCache {
    refresh_margin: Duration,
    failure_backoff: Duration,
    slots: HashMap<String, Arc<TokenSlot>>,
}

impl TokenCache {
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            refresh_margin,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            slots: HashMap::new(),
        }
    }

    /// How long an unexpired token is served as-is after a failed refresh.
    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    /// Register the fetcher for `provider_id`, replacing any previous one.
    pub fn register(&mut self, provider_id: impl Into<String>, fetcher: Arc<dyn TokenFetcher>) {
        let provider_id = provider_id.into();
        self.slots.insert(
            provider_id.clone(),
            Arc::new(TokenSlot {
                provider_id,
                fetcher,
                state: Mutex::new(SlotState::default()),
            }),
        );
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.slots.contains_key(provider_id)
    }

    pub fn refresh_margin(&self) -> Duration {
        self.refresh_margin
    }

    /// Return a valid token for `provider_id`, refreshing it when missing or
    /// inside the refresh margin.
    ///
    /// A failing refresh still serves the previous token as long as it has not
    /// actually expired, and for `failure_backoff` afterwards that token is
    /// returned without contacting the endpoint again.
    pub async fn get_token(&self, provider_id: &str) -> Result<ProviderToken, GatewayError> {
        let slot = self.slots.get(provider_id).cloned().ok_or_else(|| {
            GatewayError::ConfigurationError(format!(
                "no token source configured for provider '{provider_id}'"
            ))
        })?;

        let (refresh, stale) = {
            let mut state = slot.lock();
            if let Some(token) = &state.token
                && !token.needs_refresh(self.refresh_margin)
            {
                return Ok(token.clone());
            }
            let stale = state.token.clone().filter(|token| !token.is_expired());
            if let Some(token) = &stale
                && state.retry_at.is_some_and(|at| Instant::now() < at)
            {
                return Ok(token.clone());
            }
            let refresh = match &state.inflight {
                Some(inflight) => inflight.clone(),
                None => {
                    tracing::debug!(provider = %provider_id, "requesting new provider token");
                    let refresh = Self::refresh(slot.clone(), self.failure_backoff)
                        .boxed()
                        .shared();
                    state.inflight = Some(refresh.clone());
                    refresh
                }
            };
            (refresh, stale)
        };

        match refresh.await {
            Ok(token) => Ok(token),
            Err(err) => match stale {
                Some(token) => {
                    tracing::warn!(
                        provider = %provider_id,
                        error = %err,
                        expires_at = %token.expires_at,
                        "token refresh failed, serving unexpired token"
                    );
                    Ok(token)
                }
                None => Err(err),
            },
        }
    }

    /// Drop the cached token, e.g. after the provider rejected it.
    pub fn invalidate(&self, provider_id: &str) {
        if let Some(slot) = self.slots.get(provider_id) {
            let mut state = slot.lock();
            state.token = None;
            state.retry_at = None;
            tracing::debug!(provider = %provider_id, "provider token invalidated");
        }
    }

    async fn refresh(
        slot: Arc<TokenSlot>,
        failure_backoff: Duration,
    ) -> Result<ProviderToken, GatewayError> {
        let fetched = slot.fetcher.fetch().await;
        let mut state = slot.lock();
        state.inflight = None;
        match fetched {
            Ok(fetched) => {
                let token = ProviderToken::new(
                    slot.provider_id.clone(),
                    fetched.access_token,
                    fetched.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME),
                );
                tracing::debug!(
                    provider = %slot.provider_id,
                    token = %mask_secret(token.secret()),
                    "provider token refreshed"
                );
                state.token = Some(token.clone());
                state.retry_at = None;
                Ok(token)
            }
            Err(err) => {
                tracing::warn!(provider = %slot.provider_id, error = %err, "token refresh failed");
                state.retry_at = Some(Instant::now() + failure_backoff);
                Err(match err {
                    GatewayError::AuthFailed(_) => err,
                    other => GatewayError::AuthFailed(other.to_string()),
                })
            }
        }
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("refresh_margin", &self.refresh_margin)
            .field("failure_backoff", &self.failure_backoff)
            .field("providers", &self.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}
