//! `crta-runtime` – process-level plumbing around the coprocessor link.
//!
//! # Modules
//!
//! - [`config`] – [`RuntimeConfig`][config::RuntimeConfig]: the TOML
//!   configuration file (`~/.crta/config.toml`, or `CRTA_CONFIG`) with
//!   `CRTA_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, with an optional OTLP span exporter when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! - [`session`] – [`run_sim_session`][session::run_sim_session]: a full
//!   streaming session against the simulation drivers, used by the
//!   `crta-sim` binary and as an end-to-end smoke test.

pub mod config;
pub mod session;
pub mod telemetry;

pub use config::{LogFormat, RuntimeConfig};
pub use session::{SessionReport, SessionSpec, run_sim_session};
pub use telemetry::{TracerProviderGuard, init_tracing};
