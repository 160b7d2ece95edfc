//! Authentication helpers and token providers.
//!
//! - `TokenFetcher`: the seam that talks to a token endpoint
//! - `OAuthTokenFetcher`: client-credentials and password grants over reqwest
//! - `TokenCache`: per-provider token lifecycle with single-flight refresh

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::error::GatewayError;

pub mod oauth;
pub mod token_cache;

pub use oauth::{OAuthGrant, OAuthTokenFetcher};
pub use token_cache::TokenCache;

/// Lifetime assumed when a token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// A bearer token issued for one provider.
#[derive(Clone)]
pub struct ProviderToken {
    pub provider_id: String,
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl ProviderToken {
    pub fn new(provider_id: impl Into<String>, token: SecretString, lifetime: Duration) -> Self {
        Self {
            provider_id: provider_id.into(),
            token,
            expires_at: saturating_after(Utc::now(), lifetime),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the token is inside the trailing refresh margin (or expired).
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        saturating_after(Utc::now(), margin) >= self.expires_at
    }

    pub fn secret(&self) -> &str {
        self.token.expose_secret()
    }
}

/// `from + delta`, clamped to the latest representable instant.
fn saturating_after(from: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delta)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl std::fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderToken")
            .field("provider_id", &self.provider_id)
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token as returned by an endpoint, before it is bound to a provider.
#[derive(Clone)]
pub struct FetchedToken {
    pub access_token: SecretString,
    pub expires_in: Option<Duration>,
}

/// Obtains fresh bearer tokens for one provider.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self) -> Result<FetchedToken, GatewayError>;
}

/// A fetcher that always hands out the same token, for tests and setups
/// where the token is managed externally.
pub struct StaticTokenFetcher {
    token: SecretString,
    expires_in: Option<Duration>,
}

impl StaticTokenFetcher {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_in: None,
        }
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }
}

#[async_trait]
impl TokenFetcher for StaticTokenFetcher {
    async fn fetch(&self) -> Result<FetchedToken, GatewayError> {
        Ok(FetchedToken {
            access_token: self.token.clone(),
            expires_in: self.expires_in,
        })
    }
}
