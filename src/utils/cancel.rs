//! Cancellation utilities
//!
//! Provides first-class cancellation handles for delta streams.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::streaming::{ChatStreamHandle, DeltaStream};

/// A handle that can be used to request cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Request cancellation. The wrapped stream stops at its next poll and
    /// drops the provider connection so no more tokens are generated.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation was requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Make a delta stream cancellable and return it with its handle.
pub fn make_cancellable_stream(stream: DeltaStream) -> ChatStreamHandle {
    attach_cancel_handle(stream, new_cancel_handle())
}

/// Wrap `stream` so it observes an existing handle.
pub fn attach_cancel_handle(stream: DeltaStream, handle: CancelHandle) -> ChatStreamHandle {
    let token = handle.token.clone();
    let mut inner = stream;
    let s = async_stream::stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = inner.next() => item,
            };
            match next {
                Some(item) => yield item,
                None => break,
            }
        }
        // Close the transport now rather than when the handle is dropped.
        drop(inner);
        tracing::trace!(cancelled = token.is_cancelled(), "delta stream finished");
    };
    ChatStreamHandle::new(Box::pin(s), handle)
}

/// Create a standalone cancel handle that can be shared across tasks.
pub fn new_cancel_handle() -> CancelHandle {
    CancelHandle::new(CancellationToken::new())
}
