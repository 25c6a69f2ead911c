//! Zone policy evaluation loop.
//!
//! Each cycle walks a snapshot of the registry, asks the policies whether an
//! active zone is due and, if so, runs a full watering session for it before
//! moving on to the next zone. Sessions are therefore sequential within a
//! cycle. The registry lock is not held while a valve is open.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::activity::{EventKind, SharedActivity};
use crate::actuator::{Actuator, SessionExit};
use crate::clock::Clock;
use crate::error::CycleError;
use crate::history::{History, WateringSession};
use crate::policy::{self, Policy};
use crate::readings::{self, ReadingsRx};
use crate::registry::ZoneRegistry;
use crate::zone::{timestamp, ValveId};

#[derive(Debug, Clone, Serialize)]
pub struct WateredZone {
    pub zone: String,
    pub valve: ValveId,
    pub policy: Policy,
    pub reason: String,
    pub exit: SessionExit,
    pub open_sec: f32,
}

#[derive(Debug)]
pub struct ZoneFailure {
    pub zone: String,
    pub error: CycleError,
}

/// What one evaluation cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub watered: Vec<WateredZone>,
    pub errors: Vec<ZoneFailure>,
}

pub struct Evaluator {
    registry: Arc<ZoneRegistry>,
    actuator: Arc<Actuator>,
    readings: ReadingsRx,
    clock: Arc<dyn Clock>,
    activity: SharedActivity,
    history: Option<History>,
    interval: Duration,
}

impl Evaluator {
    pub fn new(
        registry: Arc<ZoneRegistry>,
        actuator: Arc<Actuator>,
        readings: ReadingsRx,
        clock: Arc<dyn Clock>,
        activity: SharedActivity,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            actuator,
            readings,
            clock,
            activity,
            history: None,
            interval,
        }
    }

    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let snapshot = self.registry.snapshot().await;

        for (index, zone) in snapshot.zones.iter().enumerate() {
            if !zone.active {
                continue;
            }

            // Fresh readings and time per zone: an earlier session in this
            // cycle may have taken minutes.
            let current = readings::current(&self.readings);
            let started = self.clock.now();
            let Some(trigger) = policy::evaluate(zone, &current, started) else {
                continue;
            };

            info!(
                zone = %zone.name,
                valve = %zone.valve,
                policy = %trigger.policy,
                reason = %trigger.reason,
                "watering triggered"
            );
            self.activity.write().await.record(
                EventKind::Watering,
                format!("{}: {}", zone.name, trigger.reason),
            );

            let outcome = match self.actuator.water(zone.valve, &zone.sensors).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(zone = %zone.name, "watering failed: {e}");
                    self.activity
                        .write()
                        .await
                        .record(EventKind::Error, format!("{}: {e}", zone.name));
                    report.errors.push(ZoneFailure {
                        zone: zone.name.clone(),
                        error: e.into(),
                    });
                    continue;
                }
            };

            let finished = self.clock.now();
            if let Err(e) = self
                .registry
                .mark_watered(snapshot.generation, index, zone, finished)
                .await
            {
                report.errors.push(ZoneFailure {
                    zone: zone.name.clone(),
                    error: e.into(),
                });
            }

            self.activity.write().await.record(
                EventKind::Valve,
                format!(
                    "{}: valve {} closed ({}, {:.0}s)",
                    zone.name,
                    zone.valve,
                    outcome.exit,
                    outcome.open_for.as_secs_f32()
                ),
            );

            if let Some(history) = &self.history {
                let session = WateringSession {
                    started_at: timestamp::format(&started),
                    ended_at: timestamp::format(&finished),
                    zone: zone.name.clone(),
                    valve: i64::from(zone.valve.0),
                    policy: trigger.policy.to_string(),
                    reason: trigger.reason.clone(),
                    result: outcome.exit.to_string(),
                };
                if let Err(e) = history.record(&session).await {
                    warn!(zone = %zone.name, "history: {e:#}");
                }
            }

            report.watered.push(WateredZone {
                zone: zone.name.clone(),
                valve: zone.valve,
                policy: trigger.policy,
                reason: trigger.reason,
                exit: outcome.exit,
                open_sec: outcome.open_for.as_secs_f32(),
            });
        }

        report
    }

    /// Evaluate on a fixed interval until `shutdown` flips. A shutdown
    /// during a session cancels it, which closes the valve.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_sec = self.interval.as_secs_f32(),
            "zone evaluator started"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                report = self.run_cycle() => {
                    for w in &report.watered {
                        debug!(
                            zone = %w.zone,
                            valve = %w.valve,
                            policy = %w.policy,
                            exit = %w.exit,
                            open_sec = w.open_sec,
                            "zone watered"
                        );
                    }
                    for failure in &report.errors {
                        error!(zone = %failure.zone, "cycle error: {}", failure.error);
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("zone evaluator stopped");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
