//! Conversions from third-party error types into `GatewayError`.

use super::types::GatewayError;

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TransportError(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::TransportError(format!("connection failed: {err}"))
        } else {
            Self::TransportError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::TransportError(format!("malformed payload: {err}"))
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_become_transport_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(
            GatewayError::from(err),
            GatewayError::TransportError(_)
        ));
    }

    #[test]
    fn sqlx_errors_become_store_unavailable() {
        let err = sqlx::Error::PoolTimedOut;
        assert!(matches!(
            GatewayError::from(err),
            GatewayError::StoreUnavailable(_)
        ));
    }
}
