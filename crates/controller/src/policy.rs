//! Watering trigger policies.
//!
//! Evaluated in fixed precedence: sensor threshold, then timer, then
//! schedule. The first policy that fires wins and the rest are not looked
//! at.

use std::fmt;

use serde::Serialize;
use time::PrimitiveDateTime;

use crate::readings::Readings;
use crate::zone::Zone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    SensorBased,
    TimerBased,
    Scheduled,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SensorBased => write!(f, "sensor_based"),
            Self::TimerBased => write!(f, "timer_based"),
            Self::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Why a zone should be watered now.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub policy: Policy,
    pub reason: String,
}

/// Decide whether `zone` should be watered at `now`. Does not look at
/// `zone.active`; callers skip inactive zones.
pub fn evaluate(zone: &Zone, readings: &Readings, now: PrimitiveDateTime) -> Option<Trigger> {
    sensor_trigger(zone, readings)
        .or_else(|| timer_trigger(zone, now))
        .or_else(|| schedule_trigger(zone, now))
}

fn sensor_trigger(zone: &Zone, readings: &Readings) -> Option<Trigger> {
    let policy = &zone.watering_modes.sensor_based;
    if !policy.enabled {
        return None;
    }
    let threshold = policy.threshold_percentage;

    readings
        .connected(&zone.sensors)
        .find(|(_, r)| r.moisture_percent < threshold)
        .map(|(id, _)| Trigger {
            policy: Policy::SensorBased,
            reason: format!("Sensor {id} below threshold {threshold}%"),
        })
}

fn timer_trigger(zone: &Zone, now: PrimitiveDateTime) -> Option<Trigger> {
    let policy = &zone.watering_modes.timer_based;
    if !policy.enabled {
        return None;
    }
    let hours = policy.interval_hours;

    let due = match zone.last_watered {
        None => true,
        Some(last) => (now - last).as_seconds_f64() >= hours * 3600.0,
    };

    due.then(|| Trigger {
        policy: Policy::TimerBased,
        reason: format!("Timer elapsed ({hours}h)"),
    })
}

/// Only today's occurrences are considered: a time missed before midnight
/// is not carried over to the next day.
fn schedule_trigger(zone: &Zone, now: PrimitiveDateTime) -> Option<Trigger> {
    let policy = &zone.watering_modes.scheduled;
    if !policy.enabled {
        return None;
    }

    policy
        .times
        .iter()
        .find(|t| {
            let slot = now.replace_time(t.time());
            slot <= now && zone.last_watered.map_or(true, |last| last < slot)
        })
        .map(|t| Trigger {
            policy: Policy::Scheduled,
            reason: format!("Scheduled watering at {t}"),
        })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readings::snapshot;
    use crate::zone::tests::zone;
    use crate::zone::ScheduleTime;
    use time::macros::datetime;
    use time::Duration;

    const NOW: PrimitiveDateTime = datetime!(2024-05-01 06:01:00);

    fn sensor_zone(threshold: f64, sensors: &[u32]) -> Zone {
        let mut z = zone("beds", 1, sensors);
        z.watering_modes.sensor_based.enabled = true;
        z.watering_modes.sensor_based.threshold_percentage = threshold;
        z
    }

    fn timer_zone(hours: f64) -> Zone {
        let mut z = zone("lawn", 2, &[]);
        z.watering_modes.timer_based.enabled = true;
        z.watering_modes.timer_based.interval_hours = hours;
        z
    }

    fn schedule_zone(times: &[&str]) -> Zone {
        let mut z = zone("pots", 3, &[]);
        z.watering_modes.scheduled.enabled = true;
        z.watering_modes.scheduled.times = times
            .iter()
            .map(|t| t.parse::<ScheduleTime>().unwrap())
            .collect();
        z
    }

    // -- sensor based ------------------------------------------------------

    #[test]
    fn sensor_below_threshold_fires_citing_sensor() {
        let t = evaluate(&sensor_zone(30.0, &[4]), &snapshot(&[(4, 25.0, false)]), NOW).unwrap();
        assert_eq!(t.policy, Policy::SensorBased);
        assert_eq!(t.reason, "Sensor 4 below threshold 30%");
    }

    #[test]
    fn sensor_above_threshold_does_not_fire() {
        assert!(evaluate(&sensor_zone(30.0, &[4]), &snapshot(&[(4, 35.0, false)]), NOW).is_none());
    }

    #[test]
    fn sensor_exactly_at_threshold_does_not_fire() {
        assert!(evaluate(&sensor_zone(30.0, &[4]), &snapshot(&[(4, 30.0, false)]), NOW).is_none());
    }

    #[test]
    fn disconnected_sensor_is_ignored() {
        assert!(evaluate(&sensor_zone(30.0, &[4]), &snapshot(&[(4, 0.0, true)]), NOW).is_none());
    }

    #[test]
    fn missing_reading_is_ignored() {
        assert!(evaluate(&sensor_zone(30.0, &[4]), &snapshot(&[]), NOW).is_none());
    }

    #[test]
    fn first_qualifying_sensor_in_configured_order_wins() {
        let r = snapshot(&[(1, 10.0, false), (2, 50.0, false), (3, 5.0, false)]);
        let t = evaluate(&sensor_zone(30.0, &[2, 3, 1]), &r, NOW).unwrap();
        assert_eq!(t.reason, "Sensor 3 below threshold 30%");
    }

    #[test]
    fn empty_sensor_set_never_fires_sensor_policy() {
        assert!(evaluate(&sensor_zone(30.0, &[]), &snapshot(&[(1, 0.0, false)]), NOW).is_none());
    }

    #[test]
    fn disabled_sensor_policy_does_not_fire() {
        let mut z = sensor_zone(30.0, &[4]);
        z.watering_modes.sensor_based.enabled = false;
        assert!(evaluate(&z, &snapshot(&[(4, 1.0, false)]), NOW).is_none());
    }

    // -- timer based -------------------------------------------------------

    #[test]
    fn timer_fires_when_never_watered() {
        let t = evaluate(&timer_zone(1.0), &snapshot(&[]), NOW).unwrap();
        assert_eq!(t.policy, Policy::TimerBased);
        assert_eq!(t.reason, "Timer elapsed (1h)");
    }

    #[test]
    fn timer_waits_for_interval() {
        let mut z = timer_zone(1.0);
        z.last_watered = Some(NOW - Duration::minutes(30));
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_none());

        z.last_watered = Some(NOW - Duration::minutes(61));
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_some());
    }

    #[test]
    fn timer_fires_exactly_at_interval() {
        let mut z = timer_zone(1.0);
        z.last_watered = Some(NOW - Duration::hours(1));
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_some());
    }

    #[test]
    fn timer_supports_fractional_hours() {
        let mut z = timer_zone(0.5);
        z.last_watered = Some(NOW - Duration::minutes(29));
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_none());
        z.last_watered = Some(NOW - Duration::minutes(30));
        assert_eq!(evaluate(&z, &snapshot(&[]), NOW).unwrap().reason, "Timer elapsed (0.5h)");
    }

    #[test]
    fn huge_interval_is_never_due() {
        let mut z = timer_zone(1e300);
        z.last_watered = Some(NOW - Duration::days(3650));
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_none());
    }

    #[test]
    fn timer_does_not_fire_for_future_stamp() {
        let mut z = timer_zone(1.0);
        z.last_watered = Some(NOW + Duration::hours(3));
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_none());
    }

    // -- scheduled ---------------------------------------------------------

    #[test]
    fn schedule_fires_after_time_when_never_watered() {
        let t = evaluate(&schedule_zone(&["06:00"]), &snapshot(&[]), NOW).unwrap();
        assert_eq!(t.policy, Policy::Scheduled);
        assert_eq!(t.reason, "Scheduled watering at 06:00");
    }

    #[test]
    fn schedule_does_not_fire_again_after_watering() {
        let mut z = schedule_zone(&["06:00"]);
        z.last_watered = Some(NOW);
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_none());
        assert!(evaluate(&z, &snapshot(&[]), datetime!(2024-05-01 23:59:00)).is_none());
    }

    #[test]
    fn schedule_fires_again_next_day() {
        let mut z = schedule_zone(&["06:00"]);
        z.last_watered = Some(NOW);
        assert!(evaluate(&z, &snapshot(&[]), datetime!(2024-05-02 06:00:00)).is_some());
    }

    #[test]
    fn schedule_does_not_fire_before_time() {
        assert!(evaluate(&schedule_zone(&["06:02"]), &snapshot(&[]), NOW).is_none());
    }

    #[test]
    fn schedule_fires_when_last_watered_before_slot() {
        let mut z = schedule_zone(&["06:00"]);
        z.last_watered = Some(datetime!(2024-05-01 05:59:59));
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_some());
    }

    #[test]
    fn watering_exactly_at_slot_counts_as_done() {
        let mut z = schedule_zone(&["06:00"]);
        z.last_watered = Some(datetime!(2024-05-01 06:00:00));
        assert!(evaluate(&z, &snapshot(&[]), NOW).is_none());
    }

    #[test]
    fn first_due_schedule_entry_wins() {
        let z = schedule_zone(&["23:00", "05:00", "06:00"]);
        let t = evaluate(&z, &snapshot(&[]), NOW).unwrap();
        assert_eq!(t.reason, "Scheduled watering at 05:00");
    }

    #[test]
    fn missed_slot_is_not_carried_past_midnight() {
        // Watered yesterday morning, the 22:00 slot was missed, now it is
        // just after midnight: today's 22:00 is still in the future.
        let mut z = schedule_zone(&["22:00"]);
        z.last_watered = Some(datetime!(2024-05-01 06:00:00));
        assert!(evaluate(&z, &snapshot(&[]), datetime!(2024-05-02 00:05:00)).is_none());
    }

    // -- precedence --------------------------------------------------------

    #[test]
    fn timer_reason_recorded_when_sensor_condition_false() {
        let mut z = sensor_zone(30.0, &[1]);
        z.watering_modes.timer_based.enabled = true;
        z.watering_modes.timer_based.interval_hours = 1.0;

        let t = evaluate(&z, &snapshot(&[(1, 70.0, false)]), NOW).unwrap();
        assert_eq!(t.policy, Policy::TimerBased);
        assert!(!t.reason.contains("Sensor"));
    }

    #[test]
    fn sensor_wins_over_timer_and_schedule() {
        let mut z = sensor_zone(30.0, &[1]);
        z.watering_modes.timer_based.enabled = true;
        z.watering_modes.timer_based.interval_hours = 1.0;
        z.watering_modes.scheduled.enabled = true;
        z.watering_modes.scheduled.times = vec![ScheduleTime::new(6, 0).unwrap()];

        let t = evaluate(&z, &snapshot(&[(1, 10.0, false)]), NOW).unwrap();
        assert_eq!(t.policy, Policy::SensorBased);
    }

    #[test]
    fn timer_wins_over_schedule() {
        let mut z = timer_zone(1.0);
        z.watering_modes.scheduled.enabled = true;
        z.watering_modes.scheduled.times = vec![ScheduleTime::new(6, 0).unwrap()];

        let t = evaluate(&z, &snapshot(&[]), NOW).unwrap();
        assert_eq!(t.policy, Policy::TimerBased);
    }

    #[test]
    fn nothing_enabled_never_fires() {
        assert!(evaluate(&zone("idle", 1, &[1]), &snapshot(&[(1, 0.0, false)]), NOW).is_none());
    }
}
