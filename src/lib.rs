//! siumai-gateway
//!
//! Routes chat requests across heterogeneous LLM providers, normalizes their
//! streaming wire formats into one delta stream, keeps provider tokens fresh,
//! and persists conversations across a TTL-bound cache and a durable log.
#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod streaming;
pub mod tools;
pub mod types;
pub mod utils;

pub use config::GatewayConfig;
pub use conversation::{ConversationCache, ConversationStore, HybridConversationService};
pub use error::{ErrorCategory, GatewayError};
pub use gateway::{ChatGateway, ChatRequest, new_session_id};
pub use provider::{ChatProvider, ProviderRequest};
pub use registry::ProviderRouter;
pub use streaming::{ChatStreamHandle, DeltaStream};
pub use types::{ChatMessage, ChatOptions, Role, StoredMessage, ToolRef};
pub use utils::CancelHandle;

/// Commonly used items.
pub mod prelude {
    pub use crate::auth::{TokenCache, TokenFetcher};
    pub use crate::config::{GatewayConfig, ProviderConfig, ProviderKind};
    pub use crate::conversation::{
        HybridConversationService, MemoryConversationCache, MemoryConversationStore,
        SqliteConversationStore,
    };
    pub use crate::error::GatewayError;
    pub use crate::gateway::{ChatGateway, ChatRequest};
    pub use crate::registry::ProviderRouter;
    pub use crate::streaming::ChatStreamHandle;
    pub use crate::types::{ChatMessage, ChatOptions, Role, ToolRef};
}
