//! Generic `Aperture` trait for variable-aperture lens modules.

use crta_types::CrtaError;

pub trait Aperture: Send + Sync {
    fn id(&self) -> &str;

    /// Set the f-number, scaled by 100 (`240` = f/2.4).
    fn set_value(&mut self, f_number_x100: u32) -> Result<(), CrtaError>;

    /// Return the blades to their power-on position.
    fn init(&mut self) -> Result<(), CrtaError>;

    fn value(&self) -> u32;
}
