//! Controller settings: TOML file loading and validation of the hardware
//! map, calibration, and loop timing.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use irrigation_sensors::{Calibration, Channel, SensorId, DEFAULT_ADDRESS, DEFAULT_BUS, MAX_CHANNEL};
use tracing::info;

use crate::actuator::ActuatorSettings;
use crate::zone::ValveId;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub zones_file: PathBuf,
    pub history_db: String,
    /// Relay boards that switch on a LOW input.
    pub relay_active_low: bool,
    pub calibration: CalibrationSection,
    pub adc: AdcSection,
    pub timing: TimingSection,
    pub sensors: Vec<SensorEntry>,
    pub valves: Vec<ValveEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    pub analog_min: i32,
    pub analog_max: i32,
    pub wet_ceiling: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdcSection {
    pub i2c_bus: u8,
    pub i2c_address: u16,
    pub temperature_channel: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub sample_interval_sec: u64,
    pub evaluate_interval_sec: u64,
    pub valve_poll_sec: u64,
    pub max_open_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorEntry {
    pub id: u32,
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValveEntry {
    pub id: u8,
    pub gpio_pin: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            zones_file: PathBuf::from("zones.json"),
            history_db: "sqlite:irrigation.db?mode=rwc".to_string(),
            relay_active_low: false,
            calibration: CalibrationSection::default(),
            adc: AdcSection::default(),
            timing: TimingSection::default(),
            sensors: [(1, 0), (2, 2), (3, 3)]
                .into_iter()
                .map(|(id, channel)| SensorEntry { id, channel })
                .collect(),
            valves: [(1, 26), (2, 20), (3, 21)]
                .into_iter()
                .map(|(id, gpio_pin)| ValveEntry { id, gpio_pin })
                .collect(),
        }
    }
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            analog_min: 36,
            analog_max: 53,
            wet_ceiling: 80.0,
        }
    }
}

impl Default for AdcSection {
    fn default() -> Self {
        Self {
            i2c_bus: DEFAULT_BUS,
            i2c_address: DEFAULT_ADDRESS,
            temperature_channel: Some(1),
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            sample_interval_sec: 2,
            evaluate_interval_sec: 5,
            valve_poll_sec: 2,
            max_open_sec: 120,
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Settings {
    /// Returns `Ok(())` or an error describing every violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_calibration(&mut errors);
        self.validate_channels(&mut errors);
        self.validate_valves(&mut errors);
        self.validate_timing(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_calibration(&self, errors: &mut Vec<String>) {
        let c = &self.calibration;
        if c.analog_min >= c.analog_max {
            errors.push(format!(
                "calibration: analog_min ({}) must be less than analog_max ({})",
                c.analog_min, c.analog_max
            ));
        }
        if !(c.wet_ceiling > 0.0 && c.wet_ceiling <= 100.0) {
            errors.push(format!(
                "calibration: wet_ceiling {} out of range (0, 100]",
                c.wet_ceiling
            ));
        }
    }

    fn validate_channels(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<u32> = HashSet::new();
        let mut seen_channels: HashSet<u8> = HashSet::new();

        if let Some(t) = self.adc.temperature_channel {
            if t > MAX_CHANNEL {
                errors.push(format!(
                    "adc: temperature_channel {t} out of range (0-{MAX_CHANNEL})"
                ));
            } else {
                seen_channels.insert(t);
            }
        }

        for s in &self.sensors {
            let ctx = format!("sensor {}", s.id);
            if s.id == 0 {
                errors.push(format!("{ctx}: id must be positive"));
            } else if !seen_ids.insert(s.id) {
                errors.push(format!("{ctx}: duplicate sensor id"));
            }

            if s.channel > MAX_CHANNEL {
                errors.push(format!(
                    "{ctx}: channel {} out of range (0-{MAX_CHANNEL})",
                    s.channel
                ));
            } else if !seen_channels.insert(s.channel) {
                errors.push(format!(
                    "{ctx}: channel {} is already in use",
                    s.channel
                ));
            }
        }
    }

    fn validate_valves(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<u8> = HashSet::new();
        let mut seen_pins: HashSet<u8> = HashSet::new();

        for v in &self.valves {
            let ctx = format!("valve {}", v.id);
            if v.id == 0 {
                errors.push(format!("{ctx}: id must be positive"));
            } else if !seen_ids.insert(v.id) {
                errors.push(format!("{ctx}: duplicate valve id"));
            }

            if !VALID_GPIO_PINS.contains(&v.gpio_pin) {
                errors.push(format!(
                    "{ctx}: gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    v.gpio_pin
                ));
            } else if !seen_pins.insert(v.gpio_pin) {
                errors.push(format!(
                    "{ctx}: gpio_pin {} is already used by another valve",
                    v.gpio_pin
                ));
            }
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;
        for (name, value) in [
            ("sample_interval_sec", t.sample_interval_sec),
            ("evaluate_interval_sec", t.evaluate_interval_sec),
            ("valve_poll_sec", t.valve_poll_sec),
            ("max_open_sec", t.max_open_sec),
        ] {
            if value == 0 {
                errors.push(format!("timing: {name} must be positive"));
            }
        }
    }

    // -- Typed views, valid after `validate` ------------------------------

    pub fn calibration(&self) -> Calibration {
        Calibration::new(self.calibration.analog_min, self.calibration.analog_max)
    }

    pub fn sensor_channels(&self) -> Result<Vec<(SensorId, Channel)>> {
        self.sensors
            .iter()
            .map(|s| Ok((SensorId(s.id), Channel::new(s.channel)?)))
            .collect()
    }

    pub fn temperature_channel(&self) -> Result<Option<Channel>> {
        Ok(self.adc.temperature_channel.map(Channel::new).transpose()?)
    }

    pub fn valve_pins(&self) -> Vec<(ValveId, u8)> {
        self.valves
            .iter()
            .map(|v| (ValveId(v.id), v.gpio_pin))
            .collect()
    }

    pub fn actuator(&self) -> ActuatorSettings {
        ActuatorSettings {
            poll_interval: Duration::from_secs(self.timing.valve_poll_sec),
            max_open: Duration::from_secs(self.timing.max_open_sec),
            wet_ceiling: self.calibration.wet_ceiling,
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.timing.sample_interval_sec)
    }

    pub fn evaluate_interval(&self) -> Duration {
        Duration::from_secs(self.timing.evaluate_interval_sec)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML settings file. A missing file yields
/// the built-in defaults.
pub fn load(path: &Path) -> Result<Settings> {
    let settings = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))?
    } else {
        info!(path = %path.display(), "no config file, using defaults");
        Settings::default()
    };
    settings
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(settings)
}

// ===========================================================================
// Tests
// ===========================================================================
