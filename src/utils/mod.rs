//! Utility helpers

pub mod cancel;

pub use cancel::{CancelHandle, attach_cancel_handle, make_cancellable_stream, new_cancel_handle};
