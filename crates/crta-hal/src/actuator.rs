//! Generic `Actuator` trait for focus lens actuators (VCM, piezo, …).
//!
//! Drivers implement this trait and are composed into a
//! [`SensorPeri`][crate::peri::SensorPeri].  The sensor-control path only
//! ever talks to the trait, so drivers can be swapped without touching the
//! protocol code.

use std::time::Duration;

use crta_types::CrtaError;

/// Longest delay a delayed move may ask for: one frame at 10 fps.
pub const MAX_MOVE_DELAY_US: u32 = 100_000;

/// A position-controlled lens actuator.
pub trait Actuator: Send + Sync {
    /// Stable identifier for this actuator, e.g. `"ak737x"`.
    fn id(&self) -> &str;

    /// Move the lens to `position` (driver DAC units).
    ///
    /// # Errors
    ///
    /// Returns [`CrtaError::HardwareFault`] if the command cannot be applied
    /// (e.g. the actuator is in a fault state or the target is out of range).
    fn set_position(&mut self, position: u32) -> Result<(), CrtaError>;

    /// Park the lens gently before power-down.
    fn soft_landing(&mut self) -> Result<(), CrtaError>;

    /// Return the most recently commanded position.
    fn position(&self) -> u32;

    /// Move to `position` after waiting `delay_us`.  Runs in the
    /// sensor-control worker, which is allowed to block.
    ///
    /// # Errors
    ///
    /// [`CrtaError::HardwareFault`] without moving if `delay_us` exceeds
    /// [`MAX_MOVE_DELAY_US`].
    fn move_after(&mut self, position: u32, delay_us: u32) -> Result<(), CrtaError> {
        if delay_us > MAX_MOVE_DELAY_US {
            return Err(CrtaError::HardwareFault {
                component: self.id().to_string(),
                details: format!("move delay {delay_us}us exceeds {MAX_MOVE_DELAY_US}us"),
            });
        }
        if delay_us > 0 {
            std::thread::sleep(Duration::from_micros(u64::from(delay_us)));
        }
        self.set_position(position)
    }
}
