//! Image-sensor (CIS) driver trait.
//!
//! Drivers implement this trait and are composed into a
//! [`SensorPeri`][crate::peri::SensorPeri] together with the optional
//! flash, actuator and aperture drivers of the same camera module.

use crta_types::{CrtaError, HdrTriple, WbGain};

/// Single-value CIS settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CisParam {
    FramesPerOne3aa,
    AlgResetFlag,
    FrameLengthLines,
    Sensitivity,
    Sensor12bitState,
    LowNoiseMode,
    AdjustSync,
}

/// Number of words [`Cis::sensor_info`] writes.
pub const SENSOR_INFO_WORDS: usize = 8;

/// An image sensor reachable over the control bus.
pub trait Cis: Send + Sync {
    /// Stable identifier for this sensor, e.g. `"imx754"`.
    fn id(&self) -> &str;

    fn request_exposure(&mut self, exposure: HdrTriple) -> Result<(), CrtaError>;

    fn request_analog_gain(&mut self, gain: HdrTriple) -> Result<(), CrtaError>;

    fn request_digital_gain(&mut self, gain: HdrTriple) -> Result<(), CrtaError>;

    fn request_wb_gain(&mut self, gain: WbGain) -> Result<(), CrtaError>;

    fn set_param(&mut self, param: CisParam, value: u32) -> Result<(), CrtaError>;

    /// Switch exposure/gain limits for a sensor mode change.
    fn set_mode_change(
        &mut self,
        exposure: u32,
        analog_gain: u32,
        digital_gain: u32,
    ) -> Result<(), CrtaError>;

    fn set_long_term_exposure(
        &mut self,
        mode: u32,
        exposure: u32,
        frames: u32,
    ) -> Result<(), CrtaError>;

    fn set_sync_mode(&mut self, role: u32, mode: u32) -> Result<(), CrtaError>;

    fn set_capture_intent(&mut self, intent: u32, frames: u32) -> Result<(), CrtaError>;

    /// Write the cached sensor state (exposure, gains, frame timing …) into
    /// `out`, at most [`SENSOR_INFO_WORDS`] words.
    ///
    /// # Errors
    ///
    /// Returns [`CrtaError::Buffer`] if `out` is too small.
    fn sensor_info(&self, out: &mut [u32]) -> Result<(), CrtaError>;
}
