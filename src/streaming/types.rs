//! Stream types returned to callers

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::error::GatewayError;
use crate::utils::cancel::CancelHandle;

/// Canonical stream of text deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// A delta stream paired with the handle that cancels it.
///
/// After `cancel` is called the stream yields no further items and drops the
/// underlying transport on its next poll.
pub struct ChatStreamHandle {
    pub stream: DeltaStream,
    pub cancel: CancelHandle,
}

impl ChatStreamHandle {
    pub fn new(stream: DeltaStream, cancel: CancelHandle) -> Self {
        Self { stream, cancel }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn into_parts(self) -> (DeltaStream, CancelHandle) {
        (self.stream, self.cancel)
    }
}

impl std::fmt::Debug for ChatStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStreamHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Stream for ChatStreamHandle {
    type Item = Result<String, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}
