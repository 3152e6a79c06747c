//! Adapter tuning knobs.
//!
//! Every field has a default, so a partial TOML/JSON table is valid:
//!
//! ```toml
//! [adapter]
//! response_timeout_ms = 500
//! ```

use std::time::Duration;

use crta_types::CrtaError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_BOOT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_STALE_RESPONSE_WINDOW_MS: u64 = DEFAULT_RESPONSE_TIMEOUT_MS;
pub const DEFAULT_SENSOR_CTRL_QUEUE_DEPTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Deadline of a blocking send.
    pub response_timeout_ms: u64,
    /// How long the first `open` waits for the coprocessor to boot.
    pub boot_timeout_ms: u64,
    /// How long a late response to a timed-out request is still recognised
    /// as stale.
    pub stale_response_window_ms: u64,
    /// Pending sensor-control batches per instance.
    pub sensor_ctrl_queue_depth: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            boot_timeout_ms: DEFAULT_BOOT_TIMEOUT_MS,
            stale_response_window_ms: DEFAULT_STALE_RESPONSE_WINDOW_MS,
            sensor_ctrl_queue_depth: DEFAULT_SENSOR_CTRL_QUEUE_DEPTH,
        }
    }
}

impl AdapterConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }

    pub fn stale_response_window(&self) -> Duration {
        Duration::from_millis(self.stale_response_window_ms)
    }

    /// # Errors
    ///
    /// [`CrtaError::Config`] for a zero timeout or queue depth.
    pub fn validate(&self) -> Result<(), CrtaError> {
        if self.response_timeout_ms == 0 {
            return Err(CrtaError::Config(
                "response_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.boot_timeout_ms == 0 {
            return Err(CrtaError::Config(
                "boot_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.sensor_ctrl_queue_depth == 0 {
            return Err(CrtaError::Config(
                "sensor_ctrl_queue_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = AdapterConfig::default();
        assert_eq!(cfg.response_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.boot_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.sensor_ctrl_queue_depth, 20);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let cfg: AdapterConfig = serde_json::from_str(r#"{"response_timeout_ms": 40}"#).unwrap();
        assert_eq!(cfg.response_timeout_ms, 40);
        assert_eq!(cfg.stale_response_window_ms, DEFAULT_STALE_RESPONSE_WINDOW_MS);
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        let cfg = AdapterConfig {
            sensor_ctrl_queue_depth: 0,
            ..AdapterConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CrtaError::Config(_))));
    }
}
