//! Command tables for both protocol directions.
//!
//! * [`HicCommand`] – host-initiated commands (driver → coprocessor).  The
//!   coprocessor answers each of them with a response word.
//! * [`IhcCommand`] – coprocessor-initiated commands (coprocessor → driver).
//!
//! Each command id owns a static [`CommandDescriptor`].  The payload length
//! is part of the descriptor and is never changed at send time.

use serde::{Deserialize, Serialize};

use crate::CrtaError;

/// Transport priority of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Normal,
    High,
}

/// How a host command waits for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Always fire-and-forget; the response only reaches the callback.
    NonBlocking,
    /// Waits for the response, unless the caller runs in a context that
    /// must not suspend.
    BlockingUnlessAtomic,
}

/// Static metadata for one command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub priority: Priority,
    /// Number of words following the command word.
    pub payload_words: usize,
}

/// Host-initiated commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HicCommand {
    Open,
    PutBuf,
    SetSharedBufIdx,
    Start,
    Shot,
    CstatFrameStart,
    CstatCdafEnd,
    PdpStat0End,
    PdpStat1End,
    CstatFrameEnd,
    Stop,
    Close,
}

impl HicCommand {
    /// Number of host command ids.
    pub const COUNT: usize = 12;

    pub const ALL: [HicCommand; Self::COUNT] = [
        HicCommand::Open,
        HicCommand::PutBuf,
        HicCommand::SetSharedBufIdx,
        HicCommand::Start,
        HicCommand::Shot,
        HicCommand::CstatFrameStart,
        HicCommand::CstatCdafEnd,
        HicCommand::PdpStat0End,
        HicCommand::PdpStat1End,
        HicCommand::CstatFrameEnd,
        HicCommand::Stop,
        HicCommand::Close,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Result<Self, CrtaError> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(CrtaError::OutOfRange {
                what: "host command id",
                value: id,
            })
    }

    pub fn descriptor(self) -> CommandDescriptor {
        let (name, priority, payload_words) = match self {
            HicCommand::Open => ("OPEN", Priority::Normal, 4),
            HicCommand::PutBuf => ("PUT_BUF", Priority::Normal, 4),
            HicCommand::SetSharedBufIdx => ("SET_SHARED_BUF_IDX", Priority::Normal, 2),
            HicCommand::Start => ("START", Priority::Normal, 2),
            HicCommand::Shot => ("SHOT", Priority::High, 5),
            HicCommand::CstatFrameStart => ("CSTAT_FRAME_START", Priority::High, 3),
            HicCommand::CstatCdafEnd => ("CSTAT_CDAF_END", Priority::High, 7),
            HicCommand::PdpStat0End => ("PDP_STAT0_END", Priority::High, 3),
            HicCommand::PdpStat1End => ("PDP_STAT1_END", Priority::High, 3),
            HicCommand::CstatFrameEnd => ("CSTAT_FRAME_END", Priority::High, 9),
            HicCommand::Stop => ("STOP", Priority::Normal, 1),
            HicCommand::Close => ("CLOSE", Priority::Normal, 0),
        };
        CommandDescriptor {
            name,
            priority,
            payload_words,
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn delivery(self) -> Delivery {
        match self {
            HicCommand::Open
            | HicCommand::PutBuf
            | HicCommand::Start
            | HicCommand::Stop
            | HicCommand::Close => Delivery::BlockingUnlessAtomic,
            HicCommand::SetSharedBufIdx
            | HicCommand::Shot
            | HicCommand::CstatFrameStart
            | HicCommand::CstatCdafEnd
            | HicCommand::PdpStat0End
            | HicCommand::PdpStat1End
            | HicCommand::CstatFrameEnd => Delivery::NonBlocking,
        }
    }

    /// Per-frame commands whose response carries a frame counter word.
    pub fn carries_fcount(self) -> bool {
        matches!(
            self,
            HicCommand::Shot
                | HicCommand::CstatFrameStart
                | HicCommand::CstatCdafEnd
                | HicCommand::CstatFrameEnd
                | HicCommand::PdpStat0End
                | HicCommand::PdpStat1End
        )
    }
}

/// Coprocessor-initiated commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IhcCommand {
    ControlSensor,
}

impl IhcCommand {
    pub const COUNT: usize = 1;

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Result<Self, CrtaError> {
        match id {
            0 => Ok(IhcCommand::ControlSensor),
            other => Err(CrtaError::OutOfRange {
                what: "coprocessor command id",
                value: other,
            }),
        }
    }

    pub fn descriptor(self) -> CommandDescriptor {
        match self {
            IhcCommand::ControlSensor => CommandDescriptor {
                name: "CONTROL_SENSOR",
                priority: Priority::High,
                payload_words: 3,
            },
        }
    }
}
