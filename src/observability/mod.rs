//! Observability
//!
//! Tracing subscriber setup and log-safe helpers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use siumai_gateway::observability::{init_tracing, OutputFormat, TracingConfig};
//!
//! init_tracing(&TracingConfig::default().with_format(OutputFormat::Json))?;
//! ```

pub mod tracing;

pub use self::tracing::{OutputFormat, TracingConfig, init_tracing, mask_secret};
