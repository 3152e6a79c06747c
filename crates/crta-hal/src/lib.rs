//! `crta-hal` – the collaborators the coprocessor link talks to.
//!
//! | Module | Role |
//! |---|---|
//! | [`transport`] | word-oriented mailbox to the coprocessor |
//! | [`buffer`] | shared-buffer lookup and cache coherency |
//! | [`cis`], [`flash`], [`actuator`], [`aperture`] | peripheral driver traits |
//! | [`peri`] | [`SensorPeri`], the [`SensorInterface`] of one camera module |
//! | [`sim`] | in-process stand-ins for all of the above |

pub mod actuator;
pub mod aperture;
pub mod buffer;
pub mod cis;
pub mod flash;
pub mod peri;
pub mod sim;
pub mod transport;

pub use buffer::{BufferInfo, BufferManager, SharedMem};
pub use peri::{SensorInterface, SensorPeri};
pub use transport::{FrameReceiver, Transport};
