//! OAuth token endpoint client.
//!
//! Supports the client-credentials and resource-owner password grants with
//! the client id and secret sent as HTTP basic auth. Transport failures are
//! retried once; any 4xx answer is final.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{FetchedToken, TokenFetcher};
use crate::error::GatewayError;

/// Grant used against the token endpoint.
#[derive(Clone)]
pub enum OAuthGrant {
    ClientCredentials,
    Password {
        username: String,
        password: SecretString,
    },
}

impl std::fmt::Debug for OAuthGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientCredentials => f.write_str("ClientCredentials"),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// Fetches tokens from an OAuth 2.0 token endpoint.
pub struct OAuthTokenFetcher {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    grant: OAuthGrant,
    scope: Option<String>,
    max_transient_retries: u32,
}

impl OAuthTokenFetcher {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        grant: OAuthGrant,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
            grant,
            scope: None,
            max_transient_retries: 1,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = Vec::with_capacity(4);
        match &self.grant {
            OAuthGrant::ClientCredentials => {
                form.push(("grant_type", "client_credentials".to_string()));
            }
            OAuthGrant::Password { username, password } => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", username.clone()));
                form.push(("password", password.expose_secret().to_string()));
            }
        }
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.clone()));
        }
        form
    }

    async fn request_once(&self) -> Result<FetchedToken, GatewayError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&self.form())
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::AuthFailed(format!(
                "token endpoint rejected credentials ({}): {}",
                status.as_u16(),
                body.trim()
            )));
        }
        if !status.is_success() {
            return Err(GatewayError::TransportError(format!(
                "token endpoint returned {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            GatewayError::AuthFailed(format!("malformed token endpoint response: {e}"))
        })?;
        Ok(FetchedToken {
            access_token: SecretString::from(body.access_token),
            expires_in: body.expires_in.map(Duration::from_secs),
        })
    }
}

#[async_trait]
impl TokenFetcher for OAuthTokenFetcher {
    async fn fetch(&self) -> Result<FetchedToken, GatewayError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_interval(Duration::from_secs(2))
            .with_max_elapsed_time(Some(Duration::from_secs(10)))
            .build();

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let max_retries = self.max_transient_retries;
        let this = self;

        let result = backoff::future::retry_notify(
            policy,
            move || async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                match this.request_once().await {
                    Ok(token) => Ok(token),
                    Err(err @ GatewayError::TransportError(_)) if attempt < max_retries => {
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            },
            |err: GatewayError, wait: Duration| {
                tracing::warn!(
                    token_url = %self.token_url,
                    error = %err,
                    wait_ms = wait.as_millis() as u64,
                    "token request failed, retrying"
                );
            },
        )
        .await;

        result.map_err(|err| match err {
            GatewayError::AuthFailed(_) => err,
            other => GatewayError::AuthFailed(format!("token endpoint unreachable: {other}")),
        })
    }
}
