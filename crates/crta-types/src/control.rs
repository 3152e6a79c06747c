//! Decoded sensor-control requests.
//!
//! The coprocessor asks for exposure, gain, sync, flash, actuator and
//! aperture changes through encoded opcode batches.  Once decoded, each
//! record becomes one [`SensorControl`] value that `crta-hal` routes to the
//! right peripheral driver.

use serde::{Deserialize, Serialize};

/// Values for the long, middle and short exposures of an HDR sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HdrTriple {
    pub long: u32,
    pub middle: u32,
    pub short: u32,
}

/// Long/short pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LongShort {
    pub long: u32,
    pub short: u32,
}

/// White-balance gains per Bayer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WbGain {
    pub gr: u32,
    pub r: u32,
    pub b: u32,
    pub gb: u32,
}

/// A single decoded sensor-control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args")]
pub enum SensorControl {
    // Image sensor (CIS)
    SetNumOfFramePerOne3aa { frames: u32 },
    RequestExposure(HdrTriple),
    RequestAnalogGain(HdrTriple),
    RequestDigitalGain(HdrTriple),
    RequestResetExpoGain {
        exposure: LongShort,
        analog_gain: LongShort,
        digital_gain: LongShort,
    },
    SetAlgResetFlag { flag: u32 },
    RequestFrameLengthLine { lines: u32 },
    RequestSensitivity { iso: u32 },
    RequestWbGain(WbGain),
    SetSensor12bitState { state: u32 },
    SetLowNoiseMode { mode: u32 },
    SetAdjustSync { value: u32 },
    SetSensorInfoModeChange {
        exposure: u32,
        analog_gain: u32,
        digital_gain: u32,
    },
    SetLongTermExposure { mode: u32, exposure: u32, frames: u32 },
    SetSyncMode { role: u32, mode: u32 },
    SetCaptureIntent { intent: u32, frames: u32 },
    // Flash
    RequestFlash { mode: u32, intensity: u32, time_us: u32 },
    RequestFlashExpoGain { exposure: LongShort, gain: LongShort },
    RequestFlashOff,
    // Focus actuator
    SetActuatorPosition { position: u32 },
    SetActuatorSoftLanding,
    RequestActuatorMove { position: u32, delay_us: u32 },
    // Aperture
    SetApertureValue { f_number_x100: u32 },
    RequestApertureInit,
}

/// Peripheral a [`SensorControl`] is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peripheral {
    Cis,
    Flash,
    Actuator,
    Aperture,
}

impl SensorControl {
    pub fn peripheral(&self) -> Peripheral {
        use SensorControl::*;
        match self {
            SetNumOfFramePerOne3aa { .. }
            | RequestExposure(_)
            | RequestAnalogGain(_)
            | RequestDigitalGain(_)
            | RequestResetExpoGain { .. }
            | SetAlgResetFlag { .. }
            | RequestFrameLengthLine { .. }
            | RequestSensitivity { .. }
            | RequestWbGain(_)
            | SetSensor12bitState { .. }
            | SetLowNoiseMode { .. }
            | SetAdjustSync { .. }
            | SetSensorInfoModeChange { .. }
            | SetLongTermExposure { .. }
            | SetSyncMode { .. }
            | SetCaptureIntent { .. } => Peripheral::Cis,
            RequestFlash { .. } | RequestFlashExpoGain { .. } | RequestFlashOff => {
                Peripheral::Flash
            }
            SetActuatorPosition { .. } | SetActuatorSoftLanding | RequestActuatorMove { .. } => {
                Peripheral::Actuator
            }
            SetApertureValue { .. } | RequestApertureInit => Peripheral::Aperture,
        }
    }
}
