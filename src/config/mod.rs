//! Gateway configuration
//!
//! Loaded from TOML. Every section has defaults, so a file only needs the
//! provider list.
//!
//! ```toml
//! [[providers]]
//! id = "local"
//! kind = "ollama"
//! base_url = "http://localhost:11434"
//! namespaced = true
//!
//! [[providers]]
//! id = "cloud"
//! kind = "openai"
//! base_url = "https://api.openai.com/v1"
//! models = ["gpt-4o", "gpt-4o-mini"]
//! fallback = true
//! auth = { type = "api_key", key = "sk-..." }
//!
//! [conversation]
//! cache_ttl_secs = 3600
//! max_cached_messages = 50
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::auth::OAuthGrant;
use crate::error::GatewayError;
use crate::observability::TracingConfig;
use crate::provider::ModelMatcher;

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

const fn default_true() -> bool {
    true
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

impl GatewayConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, GatewayError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigurationError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.id.as_str()) {
                return Err(GatewayError::ConfigurationError(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }
        let fallbacks = self.providers.iter().filter(|p| p.fallback).count();
        if fallbacks > 1 {
            return Err(GatewayError::ConfigurationError(format!(
                "{fallbacks} providers are marked as fallback, at most one is allowed"
            )));
        }
        self.conversation.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(GatewayError::ConfigurationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wire dialect spoken by an HTTP provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ProviderKind {
    /// `POST /chat/completions`, server-sent events.
    #[serde(rename = "openai")]
    OpenAi,
    /// `POST /api/chat`, line-delimited JSON.
    #[serde(rename = "ollama")]
    Ollama,
}

/// One backend provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Allowlist; entries ending in `*` match by prefix.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub namespaced: bool,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "ProviderConfig::default_stream_timeout")]
    pub stream_timeout_secs: u64,
    #[serde(default = "ProviderConfig::default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl ProviderConfig {
    const fn default_stream_timeout() -> u64 {
        120
    }

    const fn default_connect_timeout() -> u64 {
        10
    }

    pub fn new(id: impl Into<String>, kind: ProviderKind, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: base_url.into(),
            models: Vec::new(),
            namespaced: false,
            fallback: false,
            auth: AuthConfig::default(),
            verify_tls: true,
            stream_timeout_secs: Self::default_stream_timeout(),
            connect_timeout_secs: Self::default_connect_timeout(),
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub const fn with_namespaced(mut self, namespaced: bool) -> Self {
        self.namespaced = namespaced;
        self
    }

    pub const fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub const fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout_secs = timeout.as_secs();
        self
    }

    pub fn matcher(&self) -> ModelMatcher {
        ModelMatcher::new()
            .with_models(self.models.iter().cloned())
            .namespaced(self.namespaced)
            .fallback(self.fallback)
    }

    pub const fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    /// HTTP client honoring the TLS and connect-timeout settings.
    pub fn build_http_client(&self) -> Result<reqwest::Client, GatewayError> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
            .map_err(|e| {
                GatewayError::ConfigurationError(format!(
                    "provider '{}': cannot build HTTP client: {e}",
                    self.id
                ))
            })
    }

    fn validate(&self) -> Result<(), GatewayError> {
        let fail = |reason: &str| {
            Err(GatewayError::ConfigurationError(format!(
                "provider '{}': {reason}",
                self.id
            )))
        };
        if self.id.trim().is_empty() {
            return Err(GatewayError::ConfigurationError(
                "provider id must not be empty".to_string(),
            ));
        }
        if self.id.contains('/') {
            return fail("id must not contain '/'");
        }
        if self.base_url.trim().is_empty() {
            return fail("base_url is required");
        }
        if self.stream_timeout_secs == 0 {
            return fail("stream_timeout_secs must be positive");
        }
        if let AuthConfig::OAuth {
            token_url,
            client_id,
            ..
        } = &self.auth
        {
            if token_url.trim().is_empty() {
                return fail("oauth auth requires token_url");
            }
            if client_id.trim().is_empty() {
                return fail("oauth auth requires client_id");
            }
        }
        Ok(())
    }
}

/// How a provider authenticates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type")]
pub enum AuthConfig {
    #[default]
    #[serde(rename = "none")]
    Anonymous,
    /// Static key sent as `Authorization: Bearer`.
    #[serde(rename = "api_key")]
    ApiKey {
        #[serde(deserialize_with = "deserialize_secret")]
        key: SecretString,
    },
    /// Bearer token obtained through the token cache.
    #[serde(rename = "oauth")]
    OAuth {
        token_url: String,
        client_id: String,
        #[serde(deserialize_with = "deserialize_secret")]
        client_secret: SecretString,
        #[serde(default)]
        grant: GrantConfig,
        #[serde(default)]
        scope: Option<String>,
    },
}

/// OAuth grant as written in configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum GrantConfig {
    #[default]
    ClientCredentials,
    Password {
        username: String,
        #[serde(deserialize_with = "deserialize_secret")]
        password: SecretString,
    },
}

impl From<&GrantConfig> for OAuthGrant {
    fn from(grant: &GrantConfig) -> Self {
        match grant {
            GrantConfig::ClientCredentials => Self::ClientCredentials,
            GrantConfig::Password { username, password } => Self::Password {
                username: username.clone(),
                password: password.clone(),
            },
        }
    }
}

/// Hybrid conversation service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub cache_ttl_secs: u64,
    pub max_cached_messages: usize,
    pub max_cached_sessions: usize,
    pub warm_on_miss: bool,
    pub sweep_interval_secs: u64,
    /// Messages of history sent with each chat request.
    pub history_limit: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            max_cached_messages: 50,
            max_cached_sessions: 10_000,
            warm_on_miss: true,
            sweep_interval_secs: 60,
            history_limit: 20,
        }
    }
}

impl ConversationConfig {
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), GatewayError> {
        let checks = [
            (self.cache_ttl_secs == 0, "conversation.cache_ttl_secs"),
            (self.max_cached_messages == 0, "conversation.max_cached_messages"),
            (self.max_cached_sessions == 0, "conversation.max_cached_sessions"),
            (self.history_limit == 0, "conversation.history_limit"),
            (self.sweep_interval_secs == 0, "conversation.sweep_interval_secs"),
        ];
        match checks.iter().find(|(zero, _)| *zero) {
            Some((_, field)) => Err(GatewayError::ConfigurationError(format!(
                "{field} must be positive"
            ))),
            None => Ok(()),
        }
    }
}

/// Backoff for rate-limited provider handshakes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Refresh tokens this long before they expire.
    pub refresh_margin_secs: u64,
    /// After a failed refresh, keep serving the unexpired token this long
    /// before trying the endpoint again.
    pub failure_backoff_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: 60,
            failure_backoff_secs: 10,
        }
    }
}

impl TokenConfig {
    pub const fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub const fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }
}

/// Durable tier. Without a URL the in-memory store is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://gateway.db`.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}
