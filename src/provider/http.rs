//! HTTP chat provider
//!
//! One implementation for both dialects: the request body and endpoint
//! differ per `ProviderKind`, everything after the response headers goes
//! through the wire normalizer.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};

use super::errors::classify_http_error;
use super::matcher::ModelMatcher;
use super::{ChatProvider, ProviderRequest};
use crate::config::{AuthConfig, ProviderConfig, ProviderKind};
use crate::error::GatewayError;
use crate::streaming::{DeltaStream, NormalizerConfig, WireFormat, normalize};

#[derive(Clone)]
enum Credential {
    None,
    ApiKey(SecretString),
    TokenCache,
}

/// A provider reached over HTTP.
pub struct HttpChatProvider {
    id: String,
    kind: ProviderKind,
    base_url: String,
    matcher: ModelMatcher,
    credential: Credential,
    http: reqwest::Client,
    stream_timeout: Duration,
}

impl HttpChatProvider {
    pub fn from_config(config: &ProviderConfig, http: reqwest::Client) -> Self {
        let credential = match &config.auth {
            AuthConfig::Anonymous => Credential::None,
            AuthConfig::ApiKey { key } => Credential::ApiKey(key.clone()),
            AuthConfig::OAuth { .. } => Credential::TokenCache,
        };
        Self {
            id: config.id.clone(),
            kind: config.kind,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            matcher: config.matcher(),
            credential,
            http,
            stream_timeout: config.stream_timeout(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn endpoint(&self) -> String {
        match self.kind {
            ProviderKind::OpenAi => format!("{}/chat/completions", self.base_url),
            ProviderKind::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    /// Framing expected when the response does not say otherwise.
    fn default_format(&self, stream: bool) -> WireFormat {
        match (self.kind, stream) {
            (_, false) => WireFormat::Json,
            (ProviderKind::OpenAi, true) => WireFormat::Sse,
            (ProviderKind::Ollama, true) => WireFormat::JsonLines,
        }
    }

    fn build_body(&self, request: &ProviderRequest) -> Value {
        let stream = request.options.wants_stream();
        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("messages".into(), json!(request.messages));
        body.insert("stream".into(), json!(stream));

        match self.kind {
            ProviderKind::OpenAi => {
                if let Some(temperature) = request.options.temperature {
                    body.insert("temperature".into(), json!(temperature));
                }
                if let Some(max_tokens) = request.options.max_tokens {
                    body.insert("max_tokens".into(), json!(max_tokens));
                }
            }
            ProviderKind::Ollama => {
                let mut options = Map::new();
                if let Some(temperature) = request.options.temperature {
                    options.insert("temperature".into(), json!(temperature));
                }
                if let Some(max_tokens) = request.options.max_tokens {
                    options.insert("num_predict".into(), json!(max_tokens));
                }
                if !options.is_empty() {
                    body.insert("options".into(), Value::Object(options));
                }
            }
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_openai_json()).collect();
            body.insert("tools".into(), Value::Array(tools));
        }
        Value::Object(body)
    }

    fn bearer<'a>(&'a self, request: &'a ProviderRequest) -> Result<Option<&'a str>, GatewayError> {
        match &self.credential {
            Credential::None => Ok(None),
            Credential::ApiKey(key) => Ok(Some(key.expose_secret())),
            Credential::TokenCache => request
                .bearer
                .as_ref()
                .map(|token| Some(token.expose_secret()))
                .ok_or_else(|| {
                    GatewayError::AuthFailed(format!("provider '{}' requires a bearer token", self.id))
                }),
        }
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn matcher(&self) -> &ModelMatcher {
        &self.matcher
    }

    fn requires_token(&self) -> bool {
        matches!(self.credential, Credential::TokenCache)
    }

    async fn chat(&self, request: ProviderRequest) -> Result<DeltaStream, GatewayError> {
        let body = self.build_body(&request);
        let mut builder = self.http.post(self.endpoint()).json(&body);
        if let Some(token) = self.bearer(&request)? {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(
            provider = %self.id,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat request"
        );
        // One budget covers the handshake and the stream that follows.
        let normalizer = NormalizerConfig::new(self.id.clone(), self.stream_timeout);
        let response = tokio::time::timeout_at(normalizer.deadline, builder.send())
            .await
            .map_err(|_| normalizer.timed_out())??;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_error(&self.id, status.as_u16(), &text, &headers));
        }

        let wants_stream = request.options.wants_stream();
        let format = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(WireFormat::from_content_type)
            .unwrap_or_else(|| self.default_format(wants_stream));

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GatewayError::from));
        Ok(normalize(bytes, format, normalizer))
    }
}
