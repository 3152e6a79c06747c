//! Typed message payloads and their word-array encoding.

use crate::command::{HicCommand, IhcCommand};
use crate::wire::{
    join_dva, split_dva, stat_dva_word, BufferKind, BufferRef, CommandWord, MessageType,
    ResponseCode,
};
use crate::CrtaError;

/// Parameters of the OPEN command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenParams {
    pub hw_id: u32,
    pub rep_flag: u32,
    pub position: u32,
    pub frame_type: u32,
}

/// Stat buffers announced at CSTAT frame end, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameEndStats {
    pub pre_thumb: u64,
    pub ae_thumb: u64,
    pub awb_thumb: u64,
    pub rgby_hist: u64,
    pub cdaf_mw: u64,
}

/// Autofocus buffers announced at CDAF end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CdafEndBuffers {
    pub cdaf_raw: u64,
    pub pdaf_tail: u64,
    pub laser_af: u64,
}

/// A host-initiated message, ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HicMessage {
    Open(OpenParams),
    PutBuf {
        buffer: BufferRef,
        dva: u64,
        size: u32,
    },
    SetSharedBufIdx {
        kind: BufferKind,
        fcount: u32,
    },
    Start {
        pcsi_dva: u64,
    },
    Shot {
        fcount: u32,
        meta_dva: u64,
        pcfi_dva: u64,
    },
    CstatFrameStart {
        fcount: u32,
        pcsi_dva: u64,
    },
    CstatCdafEnd {
        fcount: u32,
        buffers: CdafEndBuffers,
    },
    PdpStat0End {
        fcount: u32,
        dva: u64,
    },
    PdpStat1End {
        fcount: u32,
        dva: u64,
    },
    CstatFrameEnd {
        fcount: u32,
        shot_dva: u64,
        edge_score: u32,
        stats: FrameEndStats,
    },
    Stop {
        suspend: bool,
    },
    Close,
}

impl HicMessage {
    pub fn command(&self) -> HicCommand {
        match self {
            HicMessage::Open(_) => HicCommand::Open,
            HicMessage::PutBuf { .. } => HicCommand::PutBuf,
            HicMessage::SetSharedBufIdx { .. } => HicCommand::SetSharedBufIdx,
            HicMessage::Start { .. } => HicCommand::Start,
            HicMessage::Shot { .. } => HicCommand::Shot,
            HicMessage::CstatFrameStart { .. } => HicCommand::CstatFrameStart,
            HicMessage::CstatCdafEnd { .. } => HicCommand::CstatCdafEnd,
            HicMessage::PdpStat0End { .. } => HicCommand::PdpStat0End,
            HicMessage::PdpStat1End { .. } => HicCommand::PdpStat1End,
            HicMessage::CstatFrameEnd { .. } => HicCommand::CstatFrameEnd,
            HicMessage::Stop { .. } => HicCommand::Stop,
            HicMessage::Close => HicCommand::Close,
        }
    }

    /// Encode as `[command word, payload...]` for `instance`.
    pub fn encode(&self, instance: u32) -> Result<Vec<u32>, CrtaError> {
        let command = self.command();
        let header = CommandWord::new(
            instance,
            MessageType::Command,
            command.id(),
            ResponseCode::Success,
        )?;

        let mut words = Vec::with_capacity(1 + command.descriptor().payload_words);
        words.push(header.encode());
        match self {
            HicMessage::Open(p) => {
                words.extend([p.hw_id, p.rep_flag, p.position, p.frame_type]);
            }
            HicMessage::PutBuf { buffer, dva, size } => {
                words.push(buffer.encode());
                push_dva(&mut words, *dva);
                words.push(*size);
            }
            HicMessage::SetSharedBufIdx { kind, fcount } => {
                words.extend([kind.to_raw(), *fcount]);
            }
            HicMessage::Start { pcsi_dva } => push_dva(&mut words, *pcsi_dva),
            HicMessage::Shot {
                fcount,
                meta_dva,
                pcfi_dva,
            } => {
                words.push(*fcount);
                push_dva(&mut words, *meta_dva);
                push_dva(&mut words, *pcfi_dva);
            }
            HicMessage::CstatFrameStart { fcount, pcsi_dva } => {
                words.push(*fcount);
                push_dva(&mut words, *pcsi_dva);
            }
            HicMessage::CstatCdafEnd { fcount, buffers } => {
                words.push(*fcount);
                push_dva(&mut words, buffers.cdaf_raw);
                push_dva(&mut words, buffers.pdaf_tail);
                push_dva(&mut words, buffers.laser_af);
            }
            HicMessage::PdpStat0End { fcount, dva } | HicMessage::PdpStat1End { fcount, dva } => {
                words.push(*fcount);
                push_dva(&mut words, *dva);
            }
            HicMessage::CstatFrameEnd {
                fcount,
                shot_dva,
                edge_score,
                stats,
            } => {
                words.push(*fcount);
                push_dva(&mut words, *shot_dva);
                words.push(*edge_score);
                words.extend(
                    [
                        stats.pre_thumb,
                        stats.ae_thumb,
                        stats.awb_thumb,
                        stats.rgby_hist,
                        stats.cdaf_mw,
                    ]
                    .map(stat_dva_word),
                );
            }
            HicMessage::Stop { suspend } => words.push(u32::from(*suspend)),
            HicMessage::Close => {}
        }

        debug_assert_eq!(words.len(), 1 + command.descriptor().payload_words);
        Ok(words)
    }
}

fn push_dva(words: &mut Vec<u32>, dva: u64) {
    let (high, low) = split_dva(dva);
    words.push(high);
    words.push(low);
}

/// What a registered response callback observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub instance: u32,
    pub command: HicCommand,
    /// `Err` holds the coprocessor code in the local (negative) convention.
    pub result: Result<(), i32>,
    /// Present for the per-frame command family only.
    pub fcount: Option<u32>,
}

/// A CONTROL_SENSOR request received from the coprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSensorRequest {
    pub instance: u32,
    pub buffer: BufferRef,
    pub dva: u64,
}

impl ControlSensorRequest {
    /// Decode `[command word, buffer ref, dva high, dva low]`.
    pub fn decode(words: &[u32]) -> Result<Self, CrtaError> {
        let payload = IhcCommand::ControlSensor.descriptor().payload_words;
        if words.len() < 1 + payload {
            return Err(CrtaError::TruncatedBatch {
                expected: 1 + payload,
                found: words.len(),
            });
        }
        let header = CommandWord::decode(words[0]);
        Ok(Self {
            instance: header.instance,
            buffer: BufferRef::decode(words[1])?,
            dva: join_dva(words[2], words[3]),
        })
    }

    /// Encode the answer the coprocessor expects once the batch is done.
    pub fn encode_response(&self, result: ResponseCode) -> Result<Vec<u32>, CrtaError> {
        let header = CommandWord::new(
            self.instance,
            MessageType::Response,
            IhcCommand::ControlSensor.id(),
            result,
        )?;
        let mut words = vec![header.encode(), self.buffer.encode()];
        push_dva(&mut words, self.dva);
        Ok(words)
    }
}
