//! [`SensorPeri`] – one camera module's peripherals behind a single
//! [`SensorInterface`].
//!
//! A camera module always has an image sensor ([`Cis`]) and optionally a
//! [`Flash`], a focus [`Actuator`] and an [`Aperture`].  When the
//! sensor-control worker applies a [`SensorControl`], the peri routes it to
//! the driver that owns it.  Requests for a peripheral the module does not
//! have fail with [`CrtaError::HardwareFault`].
//!
//! Each driver sits behind its own lock.  The sensor information the host
//! publishes at frame start is a snapshot taken after every image-sensor
//! request, so [`SensorInterface::update_sensor_info`] never waits for bus
//! I/O or an actuator delay in progress on the worker.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use crta_types::{CrtaError, HdrTriple, Peripheral, SensorControl};
use tracing::{trace, warn};

use crate::actuator::{Actuator, MAX_MOVE_DELAY_US};
use crate::aperture::Aperture;
use crate::cis::{Cis, CisParam, SENSOR_INFO_WORDS};
use crate::flash::{Flash, FlashRequest};

/// Hardware actions the sensor-control path needs from a camera module.
///
/// [`apply`](Self::apply) may block on the control bus and is only called
/// from the sensor-control worker or from task context.
/// [`update_sensor_info`](Self::update_sensor_info) must not block: it runs
/// on the per-frame send path.
pub trait SensorInterface: Send + Sync {
    /// Apply one decoded sensor-control request.
    fn apply(&self, control: &SensorControl) -> Result<(), CrtaError>;

    /// Copy the cached sensor information into `out`.
    fn update_sensor_info(&self, out: &mut [u32]) -> Result<(), CrtaError>;
}

type SensorInfo = [u32; SENSOR_INFO_WORDS];

/// Peripherals of one camera module.
///
/// Construct with [`SensorPeri::new`] and attach optional drivers with the
/// `with_*` methods.
pub struct SensorPeri {
    cis_id: String,
    cis: Mutex<Box<dyn Cis>>,
    flash: Option<Mutex<Box<dyn Flash>>>,
    actuator: Option<Mutex<Box<dyn Actuator>>>,
    aperture: Option<Mutex<Box<dyn Aperture>>>,
    info: RwLock<SensorInfo>,
}

impl SensorPeri {
    pub fn new(cis: Box<dyn Cis>) -> Self {
        let mut info = [0; SENSOR_INFO_WORDS];
        if let Err(err) = cis.sensor_info(&mut info) {
            warn!(cis = cis.id(), %err, "initial sensor info unavailable");
        }
        Self {
            cis_id: cis.id().to_string(),
            cis: Mutex::new(cis),
            flash: None,
            actuator: None,
            aperture: None,
            info: RwLock::new(info),
        }
    }

    pub fn with_flash(mut self, flash: Box<dyn Flash>) -> Self {
        self.flash = Some(Mutex::new(flash));
        self
    }

    pub fn with_actuator(mut self, actuator: Box<dyn Actuator>) -> Self {
        self.actuator = Some(Mutex::new(actuator));
        self
    }

    pub fn with_aperture(mut self, aperture: Box<dyn Aperture>) -> Self {
        self.aperture = Some(Mutex::new(aperture));
        self
    }

    /// Identifier of the module's image sensor.
    pub fn cis_id(&self) -> &str {
        &self.cis_id
    }

    /// Run `op` on the image sensor, then refresh the sensor-info snapshot.
    ///
    /// The snapshot is refreshed even when `op` fails part way, so it always
    /// mirrors what the sensor has cached.
    fn with_cis(
        &self,
        op: impl FnOnce(&mut dyn Cis) -> Result<(), CrtaError>,
    ) -> Result<(), CrtaError> {
        let mut cis = lock(&self.cis);
        let result = op(cis.as_mut());
        let mut info = [0; SENSOR_INFO_WORDS];
        match cis.sensor_info(&mut info) {
            Ok(()) => *self.info.write().unwrap_or_else(PoisonError::into_inner) = info,
            Err(err) => warn!(cis = %self.cis_id, %err, "sensor info refresh failed"),
        }
        result
    }

    fn with_flash_driver(
        &self,
        op: impl FnOnce(&mut dyn Flash) -> Result<(), CrtaError>,
    ) -> Result<(), CrtaError> {
        let flash = self.flash.as_ref().ok_or_else(|| missing(Peripheral::Flash))?;
        op(lock(flash).as_mut())
    }

    fn with_actuator_driver(
        &self,
        op: impl FnOnce(&mut dyn Actuator) -> Result<(), CrtaError>,
    ) -> Result<(), CrtaError> {
        let actuator = self
            .actuator
            .as_ref()
            .ok_or_else(|| missing(Peripheral::Actuator))?;
        op(lock(actuator).as_mut())
    }

    fn with_aperture_driver(
        &self,
        op: impl FnOnce(&mut dyn Aperture) -> Result<(), CrtaError>,
    ) -> Result<(), CrtaError> {
        let aperture = self
            .aperture
            .as_ref()
            .ok_or_else(|| missing(Peripheral::Aperture))?;
        op(lock(aperture).as_mut())
    }
}

fn lock<T: ?Sized>(driver: &Mutex<Box<T>>) -> MutexGuard<'_, Box<T>> {
    driver.lock().unwrap_or_else(PoisonError::into_inner)
}

fn missing(peripheral: Peripheral) -> CrtaError {
    warn!(?peripheral, "sensor control for a peripheral this module does not have");
    CrtaError::HardwareFault {
        component: format!("{peripheral:?}").to_lowercase(),
        details: "peripheral is not present on this module".to_string(),
    }
}

impl SensorInterface for SensorPeri {
    fn apply(&self, control: &SensorControl) -> Result<(), CrtaError> {
        trace!(cis = %self.cis_id, ?control, "applying sensor control");
        match *control {
            // ----------------------------------------------------------------
            // Image sensor
            // ----------------------------------------------------------------
            SensorControl::SetNumOfFramePerOne3aa { frames } => {
                self.with_cis(|cis| cis.set_param(CisParam::FramesPerOne3aa, frames))
            }
            SensorControl::RequestExposure(exposure) => {
                self.with_cis(|cis| cis.request_exposure(exposure))
            }
            SensorControl::RequestAnalogGain(gain) => {
                self.with_cis(|cis| cis.request_analog_gain(gain))
            }
            SensorControl::RequestDigitalGain(gain) => {
                self.with_cis(|cis| cis.request_digital_gain(gain))
            }
            SensorControl::RequestResetExpoGain {
                exposure,
                analog_gain,
                digital_gain,
            } => {
                // Two-exposure sensors use the long value for the middle frame.
                let triple = |v: crta_types::LongShort| HdrTriple {
                    long: v.long,
                    middle: v.long,
                    short: v.short,
                };
                self.with_cis(|cis| {
                    cis.request_exposure(triple(exposure))?;
                    cis.request_analog_gain(triple(analog_gain))?;
                    cis.request_digital_gain(triple(digital_gain))
                })
            }
            SensorControl::SetAlgResetFlag { flag } => {
                self.with_cis(|cis| cis.set_param(CisParam::AlgResetFlag, flag))
            }
            SensorControl::RequestFrameLengthLine { lines } => {
                self.with_cis(|cis| cis.set_param(CisParam::FrameLengthLines, lines))
            }
            SensorControl::RequestSensitivity { iso } => {
                self.with_cis(|cis| cis.set_param(CisParam::Sensitivity, iso))
            }
            SensorControl::RequestWbGain(gain) => self.with_cis(|cis| cis.request_wb_gain(gain)),
            SensorControl::SetSensor12bitState { state } => {
                self.with_cis(|cis| cis.set_param(CisParam::Sensor12bitState, state))
            }
            SensorControl::SetLowNoiseMode { mode } => {
                self.with_cis(|cis| cis.set_param(CisParam::LowNoiseMode, mode))
            }
            SensorControl::SetAdjustSync { value } => {
                self.with_cis(|cis| cis.set_param(CisParam::AdjustSync, value))
            }
            SensorControl::SetSensorInfoModeChange {
                exposure,
                analog_gain,
                digital_gain,
            } => self.with_cis(|cis| cis.set_mode_change(exposure, analog_gain, digital_gain)),
            SensorControl::SetLongTermExposure {
                mode,
                exposure,
                frames,
            } => self.with_cis(|cis| cis.set_long_term_exposure(mode, exposure, frames)),
            SensorControl::SetSyncMode { role, mode } => {
                self.with_cis(|cis| cis.set_sync_mode(role, mode))
            }
            SensorControl::SetCaptureIntent { intent, frames } => {
                self.with_cis(|cis| cis.set_capture_intent(intent, frames))
            }

            // ----------------------------------------------------------------
            // Flash
            // ----------------------------------------------------------------
            SensorControl::RequestFlash {
                mode,
                intensity,
                time_us,
            } => self.with_flash_driver(|flash| {
                flash.fire(FlashRequest {
                    mode,
                    intensity,
                    time_us,
                })
            }),
            SensorControl::RequestFlashExpoGain { exposure, gain } => {
                self.with_flash_driver(|flash| flash.set_expo_gain(exposure, gain))
            }
            SensorControl::RequestFlashOff => self.with_flash_driver(|flash| flash.off()),

            // ----------------------------------------------------------------
            // Focus actuator
            // ----------------------------------------------------------------
            SensorControl::SetActuatorPosition { position } => {
                self.with_actuator_driver(|act| act.set_position(position))
            }
            SensorControl::SetActuatorSoftLanding => {
                self.with_actuator_driver(|act| act.soft_landing())
            }
            SensorControl::RequestActuatorMove { position, delay_us } => {
                self.with_actuator_driver(|act| {
                    if delay_us > MAX_MOVE_DELAY_US {
                        warn!(actuator = act.id(), delay_us, "actuator move delay too long");
                        return Err(CrtaError::HardwareFault {
                            component: act.id().to_string(),
                            details: format!(
                                "move delay {delay_us}us exceeds {MAX_MOVE_DELAY_US}us"
                            ),
                        });
                    }
                    act.move_after(position, delay_us)
                })
            }

            // ----------------------------------------------------------------
            // Aperture
            // ----------------------------------------------------------------
            SensorControl::SetApertureValue { f_number_x100 } => {
                self.with_aperture_driver(|ap| ap.set_value(f_number_x100))
            }
            SensorControl::RequestApertureInit => self.with_aperture_driver(|ap| ap.init()),
        }
    }

    fn update_sensor_info(&self, out: &mut [u32]) -> Result<(), CrtaError> {
        let available = out.len();
        let Some(dst) = out.get_mut(..SENSOR_INFO_WORDS) else {
            return Err(CrtaError::Buffer(format!(
                "sensor info needs {SENSOR_INFO_WORDS} words, buffer has {available}"
            )));
        };
        dst.copy_from_slice(&*self.info.read().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }
}
