//! Provider Module
//!
//! The `ChatProvider` trait is the seam between the router and a backend.
//! `HttpChatProvider` is the reqwest implementation for OpenAI-style and
//! Ollama-style endpoints.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::GatewayError;
use crate::streaming::DeltaStream;
use crate::types::{ChatMessage, ChatOptions, ToolDefinition};

pub mod errors;
pub mod http;
pub mod matcher;

pub use errors::classify_http_error;
pub use http::HttpChatProvider;
pub use matcher::{MatchTier, ModelMatcher, is_namespaced};

/// Everything a provider needs for one call.
#[derive(Clone)]
pub struct ProviderRequest {
    /// Model id with any force marker already stripped.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: ChatOptions,
    pub tools: Vec<ToolDefinition>,
    /// Bearer token from the token cache, for providers that require one.
    pub bearer: Option<SecretString>,
}

impl std::fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRequest")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("options", &self.options)
            .field("tools", &self.tools.len())
            .field("bearer", &self.bearer.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A backend language-model provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Unique provider id, also used as the force-marker target.
    fn id(&self) -> &str;

    fn matcher(&self) -> &ModelMatcher;

    fn supports(&self, model: &str) -> bool {
        self.matcher().supports(model)
    }

    /// Whether calls need a bearer token from the token cache.
    fn requires_token(&self) -> bool {
        false
    }

    /// Start a call. The returned stream yields text deltas lazily.
    async fn chat(&self, request: ProviderRequest) -> Result<DeltaStream, GatewayError>;
}
