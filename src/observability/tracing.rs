//! Tracing subscriber initialization

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::error::GatewayError;

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, human-readable
    Pretty,
    /// Single-line text
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: OutputFormat,
    pub with_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "siumai_gateway=info".to_string(),
            format: OutputFormat::default(),
            with_target: true,
        }
    }
}

impl TracingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub const fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> Result<EnvFilter, GatewayError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level).map_err(|e| {
                GatewayError::ConfigurationError(format!(
                    "invalid tracing level '{}': {e}",
                    self.level
                ))
            }),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_tracing(config: &TracingConfig) -> Result<(), GatewayError> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let init_result = match config.format {
        OutputFormat::Pretty => builder.pretty().try_init(),
        OutputFormat::Compact => builder.compact().try_init(),
        OutputFormat::Json => builder.json().flatten_event(true).try_init(),
    };

    if let Err(e) = init_result {
        // Tracing is already initialized, which is fine
        ::tracing::debug!(error = %e, "tracing subscriber already installed");
    }
    Ok(())
}

/// Shorten a secret for debug output: first and last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
