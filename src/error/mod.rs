//! Error Handling Module
//!
//! This module provides the gateway error taxonomy:
//! - Core error types (`GatewayError`, `ErrorCategory`)
//! - Type conversions from transport, JSON and storage errors
//!
//! # Example
//!
//! ```rust,ignore
//! use siumai_gateway::error::{ErrorCategory, GatewayError};
//!
//! let error = GatewayError::ModelNotFound("gpt-9".into());
//! assert_eq!(error.category(), ErrorCategory::Routing);
//! assert!(!error.is_retryable());
//! ```

// Module declarations
mod conversions;
pub mod types;

// Re-exports for public API
pub use types::*;
