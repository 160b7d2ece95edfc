//! Delta extraction
//!
//! Providers nest the incremental text in different places. `extract` probes
//! the known locations in a fixed order and reports completion markers next to
//! the text, so the normalizer only has to drive framing.

use serde_json::Value;

/// What a single JSON event carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Non-empty delta text, if any.
    pub text: Option<String>,
    /// A finish reason was reported; the stream may still send a close marker.
    pub finished: bool,
    /// The event closes the stream.
    pub closed: bool,
    /// The provider reported an error inside the stream.
    pub error: Option<String>,
}

const TEXT_POINTERS: &[&str] = &[
    "/choices/0/delta/content",
    "/choices/0/message/content",
    "/choices/0/text",
    "/message/content",
    "/delta/text",
    "/response",
    "/content",
];

/// Inspect one decoded event.
pub fn extract(value: &Value) -> Extracted {
    let mut out = Extracted::default();

    let event_type = value.get("type").and_then(Value::as_str);
    if event_type == Some("ping") {
        return out;
    }
    if event_type == Some("message_stop") || value.get("done").and_then(Value::as_bool) == Some(true)
    {
        out.closed = true;
    }
    if let Some(error) = stream_error(value) {
        out.error = Some(error);
        return out;
    }

    out.finished = value
        .pointer("/choices/0/finish_reason")
        .is_some_and(|reason| !reason.is_null());

    out.text = TEXT_POINTERS
        .iter()
        .filter_map(|pointer| value.pointer(pointer))
        .find_map(text_of);
    out
}

/// Text held by a content node: a plain string, or an array of
/// `{"type":"text","text":..}` blocks.
fn text_of(node: &Value) -> Option<String> {
    match node {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(blocks) => {
            let joined: String = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(_) => block.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect();
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn stream_error(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    match error {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        other => Some(
            other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}
