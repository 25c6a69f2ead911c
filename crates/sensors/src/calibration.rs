use serde::{Deserialize, Serialize};

use crate::SensorReading;

/// Raw counts outside the calibrated band by more than this are treated as a
/// disconnected probe rather than very dry or very wet soil.
pub const DISCONNECT_MARGIN: i32 = 5;

/// Raw-count endpoints of a capacitive probe. Higher counts mean drier soil:
/// `analog_min` maps to 100 % and `analog_max` to 0 %.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    pub analog_min: i32,
    pub analog_max: i32,
}

impl Calibration {
    pub fn new(analog_min: i32, analog_max: i32) -> Self {
        Self {
            analog_min,
            analog_max,
        }
    }

    /// Linear map of `raw` from `[analog_min, analog_max]` onto `[100, 0]`,
    /// clamped to `0.0..=100.0`.
    pub fn moisture_percent(&self, raw: i32) -> f64 {
        let span = (self.analog_max - self.analog_min) as f64;
        if span == 0.0 {
            return 0.0; // degenerate calibration
        }
        let m = (raw - self.analog_min) as f64 * (0.0 - 100.0) / span + 100.0;
        m.clamp(0.0, 100.0)
    }

    pub fn is_disconnected(&self, raw: i32) -> bool {
        raw < self.analog_min - DISCONNECT_MARGIN || raw > self.analog_max + DISCONNECT_MARGIN
    }

    pub fn convert(&self, raw: i32) -> SensorReading {
        SensorReading {
            moisture_percent: self.moisture_percent(raw),
            disconnected: self.is_disconnected(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cal() -> Calibration {
        Calibration::new(36, 53)
    }

    #[test]
    fn endpoints_map_to_full_and_empty() {
        assert_eq!(cal().moisture_percent(36), 100.0);
        assert_eq!(cal().moisture_percent(53), 0.0);
    }

    #[test]
    fn midpoint_is_half() {
        let c = Calibration::new(0, 200);
        assert!((c.moisture_percent(100) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn moisture_is_clamped_and_non_increasing_over_full_range() {
        let c = cal();
        let mut prev = f64::INFINITY;
        for raw in -50..=300 {
            let m = c.moisture_percent(raw);
            assert!((0.0..=100.0).contains(&m), "raw {raw} gave {m}");
            assert!(m <= prev, "moisture increased at raw {raw}: {prev} -> {m}");
            prev = m;
        }
    }

    #[test]
    fn degenerate_calibration_reads_zero() {
        assert_eq!(Calibration::new(40, 40).moisture_percent(40), 0.0);
    }

    #[test]
    fn disconnect_boundaries() {
        let c = cal();
        // lower bound: 36 - 5 = 31
        assert!(c.is_disconnected(30));
        assert!(!c.is_disconnected(31));
        assert!(!c.is_disconnected(32));
        // upper bound: 53 + 5 = 58
        assert!(!c.is_disconnected(57));
        assert!(!c.is_disconnected(58));
        assert!(c.is_disconnected(59));
    }

    #[test]
    fn convert_combines_both() {
        let r = cal().convert(0);
        assert_eq!(r.moisture_percent, 100.0);
        assert!(r.disconnected);

        let r = cal().convert(53);
        assert_eq!(r.moisture_percent, 0.0);
        assert!(!r.disconnected);
    }
}
