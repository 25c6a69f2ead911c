//! Soil-moisture sensing: raw ADC channel reads and their calibration into
//! moisture percentages.
//!
//! The `i2c` feature gates the real PCF8591 driver; the `sim` feature
//! provides a simulated ADC for development without hardware.

mod calibration;
mod pcf8591;
mod reader;
#[cfg(feature = "sim")]
mod sim;

pub use calibration::{Calibration, DISCONNECT_MARGIN};
pub use pcf8591::{control_byte, DEFAULT_ADDRESS, DEFAULT_BUS};
#[cfg(feature = "i2c")]
pub use pcf8591::Pcf8591;
pub use reader::{Channel, ChannelReader, HardwareIoError, MAX_CHANNEL};
#[cfg(feature = "sim")]
pub use sim::SimulatedAdc;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a soil-moisture sensor as used in zone configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub u32);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One calibrated reading. `moisture_percent` is always within `0.0..=100.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "moisture")]
    pub moisture_percent: f64,
    pub disconnected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_reading_serializes_with_ui_keys() {
        let r = SensorReading {
            moisture_percent: 42.5,
            disconnected: false,
        };
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json["moisture"], 42.5);
        assert_eq!(json["disconnected"], false);
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn sensor_id_is_transparent() {
        let id: SensorId = serde_json::from_str("3").unwrap();
        assert_eq!(id, SensorId(3));
        assert_eq!(serde_json::to_string(&id).unwrap(), "3");
        assert_eq!(id.to_string(), "3");
    }
}
