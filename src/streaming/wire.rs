//! Wire formats spoken by providers

use serde::{Deserialize, Serialize};

/// Framing of a provider response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Server-sent events, one `data:` payload per event.
    Sse,
    /// One JSON object per line.
    #[serde(rename = "ndjson")]
    JsonLines,
    /// A single, non-streamed JSON document.
    Json,
}

impl WireFormat {
    /// Guess the framing from a `Content-Type` header.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "text/event-stream" => Some(Self::Sse),
            "application/x-ndjson" | "application/jsonl" | "application/json-lines" => {
                Some(Self::JsonLines)
            }
            "application/json" => Some(Self::Json),
            _ => None,
        }
    }
}
