//! Provider registry and router
//!
//! An explicit, immutable-after-startup list of providers. Resolution is a
//! pure function of that list and the model string:
//!
//! 1. `@<provider_id>/<model>` forces a provider and strips the marker;
//! 2. namespace-qualified ids (`alpha:7b`, `org/model`) go to providers that
//!    opted into `namespaced`;
//! 3. static allowlists;
//! 4. the fallback provider.
//!
//! Within a tier the first provider in registration order wins.

use std::sync::Arc;

use crate::auth::{OAuthTokenFetcher, TokenCache};
use crate::config::{AuthConfig, GatewayConfig};
use crate::error::GatewayError;
use crate::provider::{ChatProvider, HttpChatProvider, MatchTier, ProviderRequest};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::streaming::ChatStreamHandle;
use crate::tools::ToolRegistry;
use crate::types::{ChatMessage, ChatOptions};
use crate::utils::make_cancellable_stream;

/// Prefix of the force-provider marker.
pub const FORCE_MARKER: char = '@';

/// Outcome of `ProviderRouter::resolve`.
#[derive(Clone)]
pub struct Resolved {
    pub provider: Arc<dyn ChatProvider>,
    /// Model id to send to the provider, force marker removed.
    pub model: String,
    pub forced: bool,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("provider", &self.provider.id())
            .field("model", &self.model)
            .field("forced", &self.forced)
            .finish()
    }
}

fn is_rate_limited(error: &GatewayError) -> bool {
    matches!(error, GatewayError::RateLimited { .. })
}

/// Routes chat calls to exactly one provider.
pub struct ProviderRouter {
    providers: Vec<Arc<dyn ChatProvider>>,
    tokens: Arc<TokenCache>,
    tools: Arc<ToolRegistry>,
    retry: RetryExecutor,
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            tokens: Arc::new(TokenCache::new(std::time::Duration::from_secs(60))),
            tools: Arc::new(ToolRegistry::new()),
            retry: RetryExecutor::new(RetryPolicy::rate_limit_only()),
        }
    }

    pub fn with_token_cache(mut self, tokens: TokenCache) -> Self {
        self.tokens = Arc::new(tokens);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// Backoff applied to rate-limited handshakes. Other errors are never
    /// retried by the router.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy.with_retry_condition(is_rate_limited));
        self
    }

    /// Build a router with one `HttpChatProvider` per configured provider.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let mut tokens = TokenCache::new(config.tokens.refresh_margin())
            .with_failure_backoff(config.tokens.failure_backoff());
        let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::with_capacity(config.providers.len());

        for provider in &config.providers {
            let http = provider.build_http_client()?;
            if let AuthConfig::OAuth {
                token_url,
                client_id,
                client_secret,
                grant,
                scope,
            } = &provider.auth
            {
                let mut fetcher = OAuthTokenFetcher::new(
                    http.clone(),
                    token_url.clone(),
                    client_id.clone(),
                    client_secret.clone(),
                    grant.into(),
                );
                if let Some(scope) = scope {
                    fetcher = fetcher.with_scope(scope.clone());
                }
                tokens.register(provider.id.clone(), Arc::new(fetcher));
            }
            providers.push(Arc::new(HttpChatProvider::from_config(provider, http)));
        }

        let mut router = Self::new()
            .with_token_cache(tokens)
            .with_retry_policy(RetryPolicy::from(&config.retry));
        for provider in providers {
            router.register(provider)?;
        }
        tracing::info!(providers = ?router.provider_ids(), "provider router ready");
        Ok(router)
    }

    /// Append a provider. Registration order is priority within a tier.
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) -> Result<(), GatewayError> {
        if self.providers.iter().any(|p| p.id() == provider.id()) {
            return Err(GatewayError::ConfigurationError(format!(
                "provider '{}' is already registered",
                provider.id()
            )));
        }
        if provider.requires_token() && !self.tokens.contains(provider.id()) {
            return Err(GatewayError::ConfigurationError(format!(
                "provider '{}' requires a token but no token source is configured",
                provider.id()
            )));
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    pub fn resolve(&self, model: &str) -> Result<Resolved, GatewayError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(GatewayError::InvalidInput("model must not be empty".into()));
        }

        if let Some(rest) = model.strip_prefix(FORCE_MARKER) {
            let (provider_id, target) = rest
                .split_once('/')
                .filter(|(id, target)| !id.is_empty() && !target.is_empty())
                .ok_or_else(|| {
                    GatewayError::InvalidInput(format!(
                        "malformed force marker in '{model}', expected '@<provider>/<model>'"
                    ))
                })?;
            let provider = self
                .providers
                .iter()
                .find(|p| p.id() == provider_id)
                .ok_or_else(|| GatewayError::ModelNotFound(model.to_string()))?;
            return Ok(Resolved {
                provider: provider.clone(),
                model: target.to_string(),
                forced: true,
            });
        }

        MatchTier::ORDERED
            .iter()
            .find_map(|tier| {
                self.providers
                    .iter()
                    .find(|p| p.matcher().matches(*tier, model))
            })
            .map(|provider| Resolved {
                provider: provider.clone(),
                model: model.to_string(),
                forced: false,
            })
            .ok_or_else(|| GatewayError::ModelNotFound(model.to_string()))
    }

    /// Resolve, authenticate and start a provider call.
    ///
    /// `history` is copied into the request and never modified. Throttled
    /// handshakes are retried with backoff; once deltas flow nothing is
    /// retried and a transport failure ends the stream after the deltas
    /// already delivered.
    pub async fn chat(
        &self,
        history: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<ChatStreamHandle, GatewayError> {
        let resolved = self.resolve(model)?;
        let provider = resolved.provider;
        let tools = self.tools.resolve_for(provider.id(), &options.tools)?;

        tracing::info!(
            provider = %provider.id(),
            model = %resolved.model,
            forced = resolved.forced,
            history = history.len(),
            "dispatching chat"
        );

        let request = ProviderRequest {
            model: resolved.model,
            messages: history.to_vec(),
            options: options.clone(),
            tools,
            bearer: None,
        };

        let stream = self
            .retry
            .execute(|| {
                let provider = provider.clone();
                let tokens = self.tokens.clone();
                let mut request = request.clone();
                async move {
                    if provider.requires_token() {
                        let token = tokens.get_token(provider.id()).await?;
                        request.bearer = Some(token.token);
                    }
                    let authenticated = request.bearer.is_some();
                    match provider.chat(request).await {
                        Err(GatewayError::AuthFailed(message)) if authenticated => {
                            tokens.invalidate(provider.id());
                            Err(GatewayError::AuthFailed(message))
                        }
                        other => other,
                    }
                }
            })
            .await
            .inspect_err(|err| {
                tracing::warn!(provider = %provider.id(), error = %err, "chat dispatch failed");
            })?;

        Ok(make_cancellable_stream(stream))
    }
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.provider_ids())
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
