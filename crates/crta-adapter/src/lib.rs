//! `crta-adapter` – command/response protocol with the real-time algorithm
//! coprocessor.
//!
//! # Overview
//!
//! - [`MessageAdapter`] – open/close lifecycle, host commands, response
//!   callbacks.  Built with [`MessageAdapter::builder`].
//! - [`AdapterConfig`] – timeouts and queue depth.
//! - Incoming frames are decoded in the transport's notification context;
//!   sensor-control batches are handed to a per-instance worker thread from
//!   `crta-sensor-ctrl`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use crta_adapter::{CallContext, MessageAdapter};
//! use crta_hal::sim::SimTransport;
//! use crta_types::OpenParams;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), crta_types::CrtaError> {
//! let adapter = MessageAdapter::builder()
//!     .transport(Arc::new(SimTransport::new().auto_ack()))
//!     .build()?;
//!
//! adapter.open(0)?;
//! adapter.send_open(0, OpenParams::default(), CallContext::Task).await?;
//! adapter.close(0)?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
mod dispatch;
mod slots;

pub use adapter::{CallContext, MessageAdapter, MessageAdapterBuilder, ResponseCallback};
pub use config::AdapterConfig;
