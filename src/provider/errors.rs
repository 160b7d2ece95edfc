//! HTTP error classification
//!
//! Maps a failed provider response onto the gateway taxonomy, keeping a
//! short body sample and any request ids for debugging.

use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::error::GatewayError;

const REQUEST_ID_HEADERS: &[&str] = &[
    "x-request-id",
    "x-openai-request-id",
    "x-trace-id",
    "traceparent",
    "x-correlation-id",
];

/// Classify an HTTP failure into a typed error with retry hints.
pub fn classify_http_error(
    provider_id: &str,
    status: u16,
    body_text: &str,
    headers: &HeaderMap,
) -> GatewayError {
    let ids: Vec<String> = REQUEST_ID_HEADERS
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(|v| format!("{name}={v}"))
        })
        .collect();
    let ids_suffix = if ids.is_empty() {
        String::new()
    } else {
        format!(" ids=[{}]", ids.join(","))
    };
    // Limit body sample size to avoid noisy logs
    let body_sample: String = body_text.chars().take(200).collect();

    match status {
        429 => GatewayError::rate_limited(
            format!("provider={provider_id} http=429{ids_suffix} body_sample={body_sample}"),
            parse_retry_after(headers),
        ),
        401 | 403 => GatewayError::AuthFailed(format!(
            "provider={provider_id} http={status}{ids_suffix} body_sample={body_sample}"
        )),
        // Unlike a routing miss, the provider was selected and answered 404:
        // an unknown model on its side or a wrong base_url.
        404 => GatewayError::ModelNotFound(format!(
            "provider={provider_id} answered http=404 (unknown upstream model or wrong base_url){ids_suffix} body_sample={body_sample}"
        )),
        408 => GatewayError::TransportError(format!(
            "provider={provider_id} request timeout{ids_suffix}"
        )),
        400..=499 => GatewayError::InvalidInput(format!(
            "provider={provider_id} http={status}{ids_suffix} body_sample={body_sample}"
        )),
        _ => GatewayError::TransportError(format!(
            "provider={provider_id} http={status}{ids_suffix} body_sample={body_sample}"
        )),
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
