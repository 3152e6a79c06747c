//! `crta-types` – shared vocabulary of the coprocessor link.
//!
//! # Modules
//!
//! - [`wire`] – bit-packed command, buffer-reference and address words.
//! - [`command`] – host (HIC) and coprocessor (IHC) command tables.
//! - [`message`] – typed payloads and their word-array encoding.
//! - [`control`] – decoded sensor-control requests.
//!
//! [`CrtaError`] is the error type used across the whole workspace.

pub mod command;
pub mod control;
pub mod message;
pub mod wire;

use thiserror::Error;

pub use command::{CommandDescriptor, Delivery, HicCommand, IhcCommand, Priority};
pub use control::{HdrTriple, LongShort, Peripheral, SensorControl, WbGain};
pub use message::{
    CdafEndBuffers, ControlSensorRequest, FrameEndStats, HicMessage, OpenParams, ResponseMessage,
};
pub use wire::{BufferKind, BufferRef, CommandWord, MessageType, ResponseCode, MAX_INSTANCES};

const EPERM: i32 = 1;
const EIO: i32 = 5;
const EFAULT: i32 = 14;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ENOMEM: i32 = 12;
const ETIMEDOUT: i32 = 110;

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrtaError {
    #[error("adapter is not open")]
    NotOpen,

    #[error("{what} {value} is out of range")]
    OutOfRange { what: &'static str, value: u32 },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("coprocessor did not boot: {0}")]
    BootFailure(String),

    #[error("no response to {command} for instance {instance}")]
    Timeout { command: &'static str, instance: u32 },

    #[error("coprocessor reported failure {0}")]
    Remote(i32),

    #[error("sensor-control batch has invalid magic {0:#010x}")]
    InvalidMagic(u32),

    #[error("unknown sensor-control opcode {0}")]
    UnknownOpcode(u32),

    #[error("opcode {opcode} is not terminated (found {found:#010x})")]
    MalformedTerminator { opcode: u32, found: u32 },

    #[error("sensor-control batch truncated: needed {expected} words, have {found}")]
    TruncatedBatch { expected: usize, found: usize },

    #[error("buffer address mismatch: expected {expected:#x}, coprocessor sent {found:#x}")]
    AddressMismatch { expected: u64, found: u64 },

    #[error("instance {0} is not started")]
    NotStarted(u32),

    #[error("sensor-control queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("buffer error: {0}")]
    Buffer(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CrtaError {
    /// Negative Linux-style code, as propagated to the imaging pipeline.
    pub fn errno(&self) -> i32 {
        match self {
            CrtaError::NotOpen => -ENODEV,
            CrtaError::OutOfRange { .. }
            | CrtaError::InvalidMagic(_)
            | CrtaError::UnknownOpcode(_)
            | CrtaError::MalformedTerminator { .. }
            | CrtaError::TruncatedBatch { .. }
            | CrtaError::Config(_) => -EINVAL,
            CrtaError::TransportFailure(_)
            | CrtaError::BootFailure(_)
            | CrtaError::HardwareFault { .. } => -EIO,
            CrtaError::Timeout { .. } => -ETIMEDOUT,
            CrtaError::Remote(code) => *code,
            CrtaError::AddressMismatch { .. } => -EFAULT,
            CrtaError::NotStarted(_) => -EPERM,
            CrtaError::QueueFull { .. } => -EBUSY,
            CrtaError::Buffer(_) => -ENOMEM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_error_maps_to_a_negative_code() {
        let errors = [
            CrtaError::NotOpen,
            CrtaError::OutOfRange {
                what: "instance",
                value: 12,
            },
            CrtaError::TransportFailure("mailbox full".into()),
            CrtaError::Timeout {
                command: "OPEN",
                instance: 0,
            },
            CrtaError::Remote(-1),
            CrtaError::QueueFull { capacity: 20 },
            CrtaError::AddressMismatch {
                expected: 1,
                found: 2,
            },
        ];
        for err in errors {
            assert!(err.errno() < 0, "{err}");
        }
    }

    #[test]
    fn timeout_display_names_command() {
        let err = CrtaError::Timeout {
            command: "START",
            instance: 3,
        };
        let text = err.to_string();
        assert!(text.contains("START"));
        assert!(text.contains('3'));
    }

    #[test]
    fn remote_code_passes_through() {
        assert_eq!(CrtaError::Remote(-4).errno(), -4);
    }
}
