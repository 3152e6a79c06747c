//! `crta-sensor-ctrl` – sensor-control batches sent by the coprocessor.
//!
//! # Modules
//!
//! - [`opcode`] – the 24 opcodes, operand layouts and batch framing.
//! - [`dispatcher`] – stateless batch interpreter.
//! - [`worker`] – bounded per-instance queue and its consumer thread.

pub mod dispatcher;
pub mod opcode;
pub mod worker;

pub use dispatcher::{BatchOutcome, dispatch, execute_batch};
pub use opcode::{END, END_OF_TABLE, MAGIC, SensorControlOp, encode_batch};
pub use worker::{BatchContext, QueueRunner, SensorControlQueue, WorkerState};
