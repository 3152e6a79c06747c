//! Bit-packed words exchanged with the coprocessor.
//!
//! Every message is an array of 32-bit words.  The first word of every
//! message is a [`CommandWord`]; buffers are referenced by a
//! [`BufferRef`] word and 64-bit device-virtual addresses travel as a
//! `(high, low)` pair produced by [`split_dva`].
//!
//! | Word | Bits | Field |
//! |---|---|---|
//! | command | 31:28 | instance |
//! | command | 15:12 | message type |
//! | command | 11:4 | command id |
//! | command | 3:0 | response code |
//! | buffer ref | 31:16 | buffer index |
//! | buffer ref | 15:0 | buffer type |

use serde::{Deserialize, Serialize};

use crate::CrtaError;

/// Number of logical camera instances the protocol can address.
pub const MAX_INSTANCES: u32 = 10;

const INSTANCE_SHIFT: u32 = 28;
const INSTANCE_MASK: u32 = 0xF;
const TYPE_SHIFT: u32 = 12;
const TYPE_MASK: u32 = 0xF;
const COMMAND_SHIFT: u32 = 4;
const COMMAND_MASK: u32 = 0xFF;
const RESPONSE_SHIFT: u32 = 0;
const RESPONSE_MASK: u32 = 0xF;

const BUF_INDEX_SHIFT: u32 = 16;
const BUF_INDEX_MASK: u32 = 0xFFFF;
const BUF_TYPE_SHIFT: u32 = 0;
const BUF_TYPE_MASK: u32 = 0xFFFF;

const DVA_HIGH_SHIFT: u32 = 32;
const DVA_WORD_MASK: u64 = 0xFFFF_FFFF;

/// Shift applied to stat-buffer addresses that travel in a single word
/// (36-bit bus addresses, 16-byte aligned).
pub const STAT_DVA_SHIFT: u32 = 4;

/// Direction/kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Command,
    Response,
}

impl MessageType {
    pub fn to_raw(self) -> u32 {
        match self {
            MessageType::Command => 0,
            MessageType::Response => 1,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(MessageType::Command),
            1 => Some(MessageType::Response),
            _ => None,
        }
    }
}

/// Outcome carried in the low nibble of a response word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    Success,
    Fail,
}

impl ResponseCode {
    pub fn to_raw(self) -> u32 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::Fail => 1,
        }
    }
}

/// Shared-buffer families the coprocessor knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferKind {
    Rta,
    SensorControl,
    Static,
}

impl BufferKind {
    pub fn to_raw(self) -> u32 {
        match self {
            BufferKind::Rta => 0,
            BufferKind::SensorControl => 1,
            BufferKind::Static => 2,
        }
    }

    pub fn from_raw(raw: u32) -> Result<Self, CrtaError> {
        match raw {
            0 => Ok(BufferKind::Rta),
            1 => Ok(BufferKind::SensorControl),
            2 => Ok(BufferKind::Static),
            other => Err(CrtaError::OutOfRange {
                what: "buffer type",
                value: other,
            }),
        }
    }
}

/// The header word of every message.
///
/// Fields are stored raw so that a word received from the coprocessor can be
/// decoded before it is validated; use [`CommandWord::new`] to build a word
/// from checked values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandWord {
    pub instance: u32,
    pub message_type: u32,
    pub command: u32,
    pub response: u32,
}

impl CommandWord {
    /// Build a header word.  `instance` must be below [`MAX_INSTANCES`].
    pub fn new(
        instance: u32,
        message_type: MessageType,
        command: u32,
        response: ResponseCode,
    ) -> Result<Self, CrtaError> {
        check_instance(instance)?;
        if command > COMMAND_MASK {
            return Err(CrtaError::OutOfRange {
                what: "command id",
                value: command,
            });
        }
        Ok(Self {
            instance,
            message_type: message_type.to_raw(),
            command,
            response: response.to_raw(),
        })
    }

    pub fn encode(&self) -> u32 {
        ((self.instance & INSTANCE_MASK) << INSTANCE_SHIFT)
            | ((self.message_type & TYPE_MASK) << TYPE_SHIFT)
            | ((self.command & COMMAND_MASK) << COMMAND_SHIFT)
            | ((self.response & RESPONSE_MASK) << RESPONSE_SHIFT)
    }

    pub fn decode(raw: u32) -> Self {
        Self {
            instance: (raw >> INSTANCE_SHIFT) & INSTANCE_MASK,
            message_type: (raw >> TYPE_SHIFT) & TYPE_MASK,
            command: (raw >> COMMAND_SHIFT) & COMMAND_MASK,
            response: (raw >> RESPONSE_SHIFT) & RESPONSE_MASK,
        }
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_raw(self.message_type)
    }

    /// Response code translated to the local sign convention: success is
    /// `Ok`, anything else is the negated coprocessor code.
    pub fn result(&self) -> Result<(), i32> {
        match self.response {
            0 => Ok(()),
            code => Err(-(code as i32)),
        }
    }
}

/// `(index, type)` reference to a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRef {
    pub index: u16,
    pub kind: BufferKind,
}

impl BufferRef {
    pub fn new(kind: BufferKind, index: u16) -> Self {
        Self { index, kind }
    }

    pub fn encode(&self) -> u32 {
        ((u32::from(self.index) & BUF_INDEX_MASK) << BUF_INDEX_SHIFT)
            | ((self.kind.to_raw() & BUF_TYPE_MASK) << BUF_TYPE_SHIFT)
    }

    pub fn decode(raw: u32) -> Result<Self, CrtaError> {
        let kind = BufferKind::from_raw((raw >> BUF_TYPE_SHIFT) & BUF_TYPE_MASK)?;
        let index = ((raw >> BUF_INDEX_SHIFT) & BUF_INDEX_MASK) as u16;
        Ok(Self { index, kind })
    }
}

/// Split a device-virtual address into its `(high, low)` words.
pub fn split_dva(dva: u64) -> (u32, u32) {
    let high = ((dva >> DVA_HIGH_SHIFT) & DVA_WORD_MASK) as u32;
    let low = (dva & DVA_WORD_MASK) as u32;
    (high, low)
}

/// Rebuild a device-virtual address from its `(high, low)` words.
pub fn join_dva(high: u32, low: u32) -> u64 {
    ((u64::from(high) & DVA_WORD_MASK) << DVA_HIGH_SHIFT) | (u64::from(low) & DVA_WORD_MASK)
}

/// Single-word form used for stat buffers in the frame-end message.
pub fn stat_dva_word(dva: u64) -> u32 {
    (dva >> STAT_DVA_SHIFT) as u32
}

pub fn check_instance(instance: u32) -> Result<(), CrtaError> {
    if instance >= MAX_INSTANCES {
        return Err(CrtaError::OutOfRange {
            what: "instance",
            value: instance,
        });
    }
    Ok(())
}
