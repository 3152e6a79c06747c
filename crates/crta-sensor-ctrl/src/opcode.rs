//! Sensor-control opcodes and their fixed operand layouts.
//!
//! A batch written by the coprocessor looks like
//!
//! ```text
//! [MAGIC][N] { [opcode][operand 0] … [operand k-1][END] } × N
//! ```
//!
//! where `k` is fixed per opcode ([`SensorControlOp::arity`]).

use crta_types::{CrtaError, HdrTriple, LongShort, SensorControl, WbGain};

/// First word of every batch (`"SCTL"`).
pub const MAGIC: u32 = 0x5343_544C;
/// Terminator after every record (`"END!"`).
pub const END: u32 = 0x454E_4421;
/// Number of defined opcodes; any opcode at or above this is unknown.
pub const END_OF_TABLE: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorControlOp {
    SetNumOfFramePerOne3aa,
    RequestExposure,
    RequestAnalogGain,
    RequestDigitalGain,
    RequestResetExpoGain,
    SetAlgResetFlag,
    RequestFrameLengthLine,
    RequestSensitivity,
    RequestWbGain,
    SetSensor12bitState,
    SetLowNoiseMode,
    SetAdjustSync,
    SetSensorInfoModeChange,
    RequestFlash,
    RequestFlashExpoGain,
    RequestFlashOff,
    SetActuatorPosition,
    SetActuatorSoftLanding,
    RequestActuatorMove,
    SetApertureValue,
    RequestApertureInit,
    SetLongTermExposure,
    SetSyncMode,
    SetCaptureIntent,
}

impl SensorControlOp {
    /// Opcodes in wire order.
    pub const ALL: [SensorControlOp; END_OF_TABLE as usize] = [
        SensorControlOp::SetNumOfFramePerOne3aa,
        SensorControlOp::RequestExposure,
        SensorControlOp::RequestAnalogGain,
        SensorControlOp::RequestDigitalGain,
        SensorControlOp::RequestResetExpoGain,
        SensorControlOp::SetAlgResetFlag,
        SensorControlOp::RequestFrameLengthLine,
        SensorControlOp::RequestSensitivity,
        SensorControlOp::RequestWbGain,
        SensorControlOp::SetSensor12bitState,
        SensorControlOp::SetLowNoiseMode,
        SensorControlOp::SetAdjustSync,
        SensorControlOp::SetSensorInfoModeChange,
        SensorControlOp::RequestFlash,
        SensorControlOp::RequestFlashExpoGain,
        SensorControlOp::RequestFlashOff,
        SensorControlOp::SetActuatorPosition,
        SensorControlOp::SetActuatorSoftLanding,
        SensorControlOp::RequestActuatorMove,
        SensorControlOp::SetApertureValue,
        SensorControlOp::RequestApertureInit,
        SensorControlOp::SetLongTermExposure,
        SensorControlOp::SetSyncMode,
        SensorControlOp::SetCaptureIntent,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Number of operand words between the opcode and [`END`].
    pub fn arity(self) -> usize {
        use SensorControlOp::*;
        match self {
            RequestFlashOff | SetActuatorSoftLanding | RequestApertureInit => 0,
            SetNumOfFramePerOne3aa
            | SetAlgResetFlag
            | RequestFrameLengthLine
            | RequestSensitivity
            | SetSensor12bitState
            | SetLowNoiseMode
            | SetAdjustSync
            | SetActuatorPosition
            | SetApertureValue => 1,
            RequestActuatorMove | SetSyncMode | SetCaptureIntent => 2,
            RequestExposure
            | RequestAnalogGain
            | RequestDigitalGain
            | SetSensorInfoModeChange
            | RequestFlash
            | SetLongTermExposure => 3,
            RequestWbGain | RequestFlashExpoGain => 4,
            RequestResetExpoGain => 6,
        }
    }

    /// Build the request from exactly [`arity`][Self::arity] operands.
    ///
    /// # Errors
    ///
    /// [`CrtaError::TruncatedBatch`] when `args` has the wrong length.
    pub fn decode(self, args: &[u32]) -> Result<SensorControl, CrtaError> {
        if args.len() != self.arity() {
            return Err(CrtaError::TruncatedBatch {
                expected: self.arity(),
                found: args.len(),
            });
        }
        let a = |i: usize| args[i];
        let triple = || HdrTriple {
            long: a(0),
            middle: a(1),
            short: a(2),
        };
        let pair = |i: usize| LongShort {
            long: a(i),
            short: a(i + 1),
        };

        use SensorControlOp as Op;
        Ok(match self {
            Op::SetNumOfFramePerOne3aa => SensorControl::SetNumOfFramePerOne3aa { frames: a(0) },
            Op::RequestExposure => SensorControl::RequestExposure(triple()),
            Op::RequestAnalogGain => SensorControl::RequestAnalogGain(triple()),
            Op::RequestDigitalGain => SensorControl::RequestDigitalGain(triple()),
            Op::RequestResetExpoGain => SensorControl::RequestResetExpoGain {
                exposure: pair(0),
                analog_gain: pair(2),
                digital_gain: pair(4),
            },
            Op::SetAlgResetFlag => SensorControl::SetAlgResetFlag { flag: a(0) },
            Op::RequestFrameLengthLine => SensorControl::RequestFrameLengthLine { lines: a(0) },
            Op::RequestSensitivity => SensorControl::RequestSensitivity { iso: a(0) },
            Op::RequestWbGain => SensorControl::RequestWbGain(WbGain {
                gr: a(0),
                r: a(1),
                b: a(2),
                gb: a(3),
            }),
            Op::SetSensor12bitState => SensorControl::SetSensor12bitState { state: a(0) },
            Op::SetLowNoiseMode => SensorControl::SetLowNoiseMode { mode: a(0) },
            Op::SetAdjustSync => SensorControl::SetAdjustSync { value: a(0) },
            Op::SetSensorInfoModeChange => SensorControl::SetSensorInfoModeChange {
                exposure: a(0),
                analog_gain: a(1),
                digital_gain: a(2),
            },
            Op::RequestFlash => SensorControl::RequestFlash {
                mode: a(0),
                intensity: a(1),
                time_us: a(2),
            },
            Op::RequestFlashExpoGain => SensorControl::RequestFlashExpoGain {
                exposure: pair(0),
                gain: pair(2),
            },
            Op::RequestFlashOff => SensorControl::RequestFlashOff,
            Op::SetActuatorPosition => SensorControl::SetActuatorPosition { position: a(0) },
            Op::SetActuatorSoftLanding => SensorControl::SetActuatorSoftLanding,
            Op::RequestActuatorMove => SensorControl::RequestActuatorMove {
                position: a(0),
                delay_us: a(1),
            },
            Op::SetApertureValue => SensorControl::SetApertureValue {
                f_number_x100: a(0),
            },
            Op::RequestApertureInit => SensorControl::RequestApertureInit,
            Op::SetLongTermExposure => SensorControl::SetLongTermExposure {
                mode: a(0),
                exposure: a(1),
                frames: a(2),
            },
            Op::SetSyncMode => SensorControl::SetSyncMode {
                role: a(0),
                mode: a(1),
            },
            Op::SetCaptureIntent => SensorControl::SetCaptureIntent {
                intent: a(0),
                frames: a(1),
            },
        })
    }
}

impl TryFrom<u32> for SensorControlOp {
    type Error = CrtaError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or(CrtaError::UnknownOpcode(code))
    }
}

/// Opcode and operands of a request, the inverse of
/// [`SensorControlOp::decode`].
pub fn encode(control: &SensorControl) -> (SensorControlOp, Vec<u32>) {
    use SensorControlOp as Op;
    let triple = |t: &HdrTriple| vec![t.long, t.middle, t.short];
    match control {
        SensorControl::SetNumOfFramePerOne3aa { frames } => {
            (Op::SetNumOfFramePerOne3aa, vec![*frames])
        }
        SensorControl::RequestExposure(t) => (Op::RequestExposure, triple(t)),
        SensorControl::RequestAnalogGain(t) => (Op::RequestAnalogGain, triple(t)),
        SensorControl::RequestDigitalGain(t) => (Op::RequestDigitalGain, triple(t)),
        SensorControl::RequestResetExpoGain {
            exposure,
            analog_gain,
            digital_gain,
        } => (
            Op::RequestResetExpoGain,
            vec![
                exposure.long,
                exposure.short,
                analog_gain.long,
                analog_gain.short,
                digital_gain.long,
                digital_gain.short,
            ],
        ),
        SensorControl::SetAlgResetFlag { flag } => (Op::SetAlgResetFlag, vec![*flag]),
        SensorControl::RequestFrameLengthLine { lines } => {
            (Op::RequestFrameLengthLine, vec![*lines])
        }
        SensorControl::RequestSensitivity { iso } => (Op::RequestSensitivity, vec![*iso]),
        SensorControl::RequestWbGain(g) => (Op::RequestWbGain, vec![g.gr, g.r, g.b, g.gb]),
        SensorControl::SetSensor12bitState { state } => (Op::SetSensor12bitState, vec![*state]),
        SensorControl::SetLowNoiseMode { mode } => (Op::SetLowNoiseMode, vec![*mode]),
        SensorControl::SetAdjustSync { value } => (Op::SetAdjustSync, vec![*value]),
        SensorControl::SetSensorInfoModeChange {
            exposure,
            analog_gain,
            digital_gain,
        } => (
            Op::SetSensorInfoModeChange,
            vec![*exposure, *analog_gain, *digital_gain],
        ),
        SensorControl::SetLongTermExposure {
            mode,
            exposure,
            frames,
        } => (Op::SetLongTermExposure, vec![*mode, *exposure, *frames]),
        SensorControl::SetSyncMode { role, mode } => (Op::SetSyncMode, vec![*role, *mode]),
        SensorControl::SetCaptureIntent { intent, frames } => {
            (Op::SetCaptureIntent, vec![*intent, *frames])
        }
        SensorControl::RequestFlash {
            mode,
            intensity,
            time_us,
        } => (Op::RequestFlash, vec![*mode, *intensity, *time_us]),
        SensorControl::RequestFlashExpoGain { exposure, gain } => (
            Op::RequestFlashExpoGain,
            vec![exposure.long, exposure.short, gain.long, gain.short],
        ),
        SensorControl::RequestFlashOff => (Op::RequestFlashOff, Vec::new()),
        SensorControl::SetActuatorPosition { position } => {
            (Op::SetActuatorPosition, vec![*position])
        }
        SensorControl::SetActuatorSoftLanding => (Op::SetActuatorSoftLanding, Vec::new()),
        SensorControl::RequestActuatorMove { position, delay_us } => {
            (Op::RequestActuatorMove, vec![*position, *delay_us])
        }
        SensorControl::SetApertureValue { f_number_x100 } => {
            (Op::SetApertureValue, vec![*f_number_x100])
        }
        SensorControl::RequestApertureInit => (Op::RequestApertureInit, Vec::new()),
    }
}

/// Encode `controls` as a complete batch, magic and count included.
pub fn encode_batch(controls: &[SensorControl]) -> Vec<u32> {
    let mut words = vec![MAGIC, controls.len() as u32];
    for control in controls {
        let (op, args) = encode(control);
        words.push(op.code());
        words.extend(args);
        words.push(END);
    }
    words
}
