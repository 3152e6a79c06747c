//! Generic `Flash` trait for LED flash / torch controllers.

use crta_types::{CrtaError, LongShort};

/// Firing parameters for one flash request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRequest {
    pub mode: u32,
    pub intensity: u32,
    pub time_us: u32,
}

/// A flash controller.
pub trait Flash: Send + Sync {
    fn id(&self) -> &str;

    fn fire(&mut self, request: FlashRequest) -> Result<(), CrtaError>;

    /// Exposure and gain to use for the frame that carries the main flash.
    fn set_expo_gain(&mut self, exposure: LongShort, gain: LongShort) -> Result<(), CrtaError>;

    fn off(&mut self) -> Result<(), CrtaError>;

    /// `true` while the flash is firing.
    fn is_on(&self) -> bool;
}
