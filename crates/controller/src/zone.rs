//! Zone records as stored in the zone file, plus their validation.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use irrigation_sensors::SensorId;
use serde::{Deserialize, Serialize};
use time::{PrimitiveDateTime, Time};

use crate::error::ConfigError;

/// Identifier of a valve relay, as referenced by zones and manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValveId(pub u8);

impl fmt::Display for ValveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Zone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub valve: ValveId,
    pub sensors: Vec<SensorId>,
    pub active: bool,
    pub watering_modes: WateringModes,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp"
    )]
    pub last_watered: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WateringModes {
    #[serde(default)]
    pub sensor_based: SensorPolicy,
    #[serde(default)]
    pub timer_based: TimerPolicy,
    #[serde(default)]
    pub scheduled: SchedulePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub threshold_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interval_hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulePolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub times: Vec<ScheduleTime>,
}

// ---------------------------------------------------------------------------
// Time of day ("HH:MM")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduleTime(Time);

impl ScheduleTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, String> {
        Time::from_hms(hour, minute, 0)
            .map(Self)
            .map_err(|_| format!("invalid time of day {hour}:{minute:02}"))
    }

    pub fn time(self) -> Time {
        self.0
    }
}

impl FromStr for ScheduleTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid schedule time {s:?} (expected HH:MM)"))?;
        let hour: u8 = h
            .parse()
            .map_err(|_| format!("invalid hour in schedule time {s:?}"))?;
        let minute: u8 = m
            .parse()
            .map_err(|_| format!("invalid minute in schedule time {s:?}"))?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for ScheduleTime {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ScheduleTime> for String {
    fn from(t: ScheduleTime) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

// ---------------------------------------------------------------------------
// last_watered (naive local ISO-8601)
// ---------------------------------------------------------------------------

pub(crate) mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Iso8601;
    use time::macros::format_description;
    use time::PrimitiveDateTime;

    const FORMAT: &[time::format_description::FormatItem<'static>] =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

    pub fn format(ts: &PrimitiveDateTime) -> String {
        ts.format(FORMAT).unwrap_or_else(|_| ts.to_string())
    }

    /// Accepts whole seconds or fractional seconds. Fractions are dropped
    /// so a stamp reads back exactly as it is written.
    pub fn parse(s: &str) -> Option<PrimitiveDateTime> {
        let ts = PrimitiveDateTime::parse(s, FORMAT)
            .or_else(|_| PrimitiveDateTime::parse(s, &Iso8601::PARSING))
            .ok()?;
        ts.replace_nanosecond(0).ok()
    }

    pub fn serialize<S: Serializer>(
        value: &Option<PrimitiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&format(ts)),
            None => serializer.serialize_none(),
        }
    }

    /// Unparseable stamps read as "never watered" rather than failing the
    /// whole zone file.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<PrimitiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(|s| {
            let parsed = parse(s);
            if parsed.is_none() {
                tracing::warn!(value = %s, "ignoring unparseable last_watered");
            }
            parsed
        }))
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Longest accepted timer interval: ten years.
pub const MAX_INTERVAL_HOURS: f64 = 24.0 * 366.0 * 10.0;

/// Validate `zones`, reporting every violation rather than the first one.
/// When `known_valves` is given, every zone's valve must be one of them.
pub fn validate(zones: &[Zone], known_valves: Option<&BTreeSet<ValveId>>) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    for (i, z) in zones.iter().enumerate() {
        let ctx = if z.name.trim().is_empty() {
            format!("zones[{i}]")
        } else {
            format!("zone '{}'", z.name)
        };

        if z.name.trim().is_empty() {
            errors.push(format!("{ctx}: name is empty"));
        }

        if let Some(valves) = known_valves {
            if !valves.contains(&z.valve) {
                errors.push(format!("{ctx}: valve {} is not configured", z.valve));
            }
        }

        for id in z.sensors.iter().filter(|id| id.0 == 0) {
            errors.push(format!("{ctx}: sensor id {id} must be positive"));
        }

        let modes = &z.watering_modes;
        if modes.sensor_based.enabled && !modes.sensor_based.threshold_percentage.is_finite() {
            errors.push(format!("{ctx}: threshold_percentage must be a number"));
        }
        if modes.timer_based.enabled {
            let h = modes.timer_based.interval_hours;
            if !h.is_finite() || h <= 0.0 {
                errors.push(format!("{ctx}: interval_hours must be positive, got {h}"));
            } else if h > MAX_INTERVAL_HOURS {
                errors.push(format!(
                    "{ctx}: interval_hours must be at most {MAX_INTERVAL_HOURS}, got {h}"
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(errors))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
