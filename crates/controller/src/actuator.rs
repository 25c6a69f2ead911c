//! Supervised watering sessions.
//!
//! ```text
//! CLOSED ──water()──▶ OPEN ──[all connected sensors ≥ wet ceiling]──▶ CLOSED (satisfied)
//!                       │
//!                       └────[max open time elapsed]──────────────────▶ CLOSED (timeout)
//! ```
//!
//! The valve is held open by an [`OpenValve`] guard, so it closes on every
//! exit path including cancellation of the session future.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use irrigation_sensors::SensorId;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::error::ActuationError;
use crate::readings::{self, Readings, ReadingsRx};
use crate::valve::{OpenValve, ValveBoard};
use crate::zone::ValveId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorSettings {
    /// How often sensor feedback is checked while open.
    pub poll_interval: Duration,
    /// Hard ceiling on open time, regardless of sensor state.
    pub max_open: Duration,
    /// Moisture percentage at which a sensor counts as fully wet.
    pub wet_ceiling: f64,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_open: Duration::from_secs(120),
            wet_ceiling: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionExit {
    Satisfied,
    Timeout,
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied => write!(f, "satisfied"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOutcome {
    pub exit: SessionExit,
    pub open_for: Duration,
}

/// True when every connected sensor in `sensors` is at or above `ceiling`.
/// A zone without any connected sensor is never satisfied.
pub fn all_wet(readings: &Readings, sensors: &[SensorId], ceiling: f64) -> bool {
    let mut any = false;
    for (_, r) in readings.connected(sensors) {
        if r.moisture_percent < ceiling {
            return false;
        }
        any = true;
    }
    any
}

pub struct Actuator {
    valves: Arc<ValveBoard>,
    readings: ReadingsRx,
    settings: ActuatorSettings,
    sessions: BTreeMap<ValveId, Mutex<()>>,
}

impl Actuator {
    pub fn new(valves: Arc<ValveBoard>, readings: ReadingsRx, settings: ActuatorSettings) -> Self {
        let sessions = valves
            .valve_ids()
            .into_iter()
            .map(|v| (v, Mutex::new(())))
            .collect();
        Self {
            valves,
            readings,
            settings,
            sessions,
        }
    }

    /// Open `valve` and keep it open until `sensors` report wet or the open
    /// time ceiling is hit. A second session for the same valve waits for
    /// the first one to finish.
    pub async fn water(
        &self,
        valve: ValveId,
        sensors: &[SensorId],
    ) -> Result<SessionOutcome, ActuationError> {
        let session = self
            .sessions
            .get(&valve)
            .ok_or(ActuationError::InvalidTarget(valve))?;
        let _session = session.lock().await;

        let open = OpenValve::energize(&self.valves, valve)?;
        let opened_at = Instant::now();

        let exit = match tokio::time::timeout(self.settings.max_open, self.until_wet(sensors)).await
        {
            Ok(()) => SessionExit::Satisfied,
            Err(_) => SessionExit::Timeout,
        };
        drop(open);

        let open_for = opened_at.elapsed();
        info!(
            %valve,
            %exit,
            open_sec = open_for.as_secs_f32(),
            "watering session finished"
        );
        Ok(SessionOutcome { exit, open_for })
    }

    async fn until_wet(&self, sensors: &[SensorId]) {
        loop {
            let snapshot = readings::current(&self.readings);
            if all_wet(&snapshot, sensors, self.settings.wet_ceiling) {
                return;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
