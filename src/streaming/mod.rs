//! Streaming Module
//!
//! Turns provider byte streams into one canonical stream of text deltas.
//!
//! - `wire`: the supported wire shapes (SSE, line-delimited JSON, single JSON)
//! - `extract`: locating delta text and completion markers in a JSON event
//! - `normalizer`: the byte-to-delta state machines
//! - `types`: `DeltaStream` and the cancellable `ChatStreamHandle`

pub mod extract;
pub mod normalizer;
pub mod types;
pub mod wire;

pub use extract::{Extracted, extract};
pub use normalizer::{ByteStream, NormalizerConfig, normalize};
pub use types::{ChatStreamHandle, DeltaStream};
pub use wire::WireFormat;
