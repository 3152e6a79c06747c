//! Channel to the coprocessor.
//!
//! The physical mailbox lives outside this workspace; the adapter only sees
//! the [`Transport`] trait.  Incoming frames are handed to a
//! [`FrameReceiver`] from the transport's notification context.

use std::sync::Arc;
use std::time::Duration;

use crta_types::{CrtaError, Priority};

/// Consumer of frames arriving from the coprocessor.
///
/// `on_frame` runs in the notification context.  Implementations decode,
/// look up tables, signal waiters or enqueue work; they never perform
/// hardware I/O and never wait.
pub trait FrameReceiver: Send + Sync {
    fn on_frame(&self, words: &[u32]);
}

/// A word-oriented, prioritised message channel to the coprocessor.
pub trait Transport: Send + Sync {
    /// Open the channel and register the receiver for incoming frames.
    ///
    /// # Errors
    ///
    /// Returns [`CrtaError::TransportFailure`] when the channel cannot be
    /// opened.
    fn open(&self, receiver: Arc<dyn FrameReceiver>) -> Result<(), CrtaError>;

    /// Block until the coprocessor reports that it has booted.
    ///
    /// # Errors
    ///
    /// Returns [`CrtaError::BootFailure`] when `timeout` elapses first.
    fn wait_boot(&self, timeout: Duration) -> Result<(), CrtaError>;

    /// Queue `words` for transmission.  Never waits for the coprocessor.
    ///
    /// # Errors
    ///
    /// Returns [`CrtaError::TransportFailure`] when the frame cannot be
    /// enqueued.
    fn send(&self, words: &[u32], priority: Priority) -> Result<(), CrtaError>;

    /// Close the channel.  No frames are delivered afterwards.
    fn close(&self);
}
