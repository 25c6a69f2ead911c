//! Sensor sampling loop.
//!
//! Every sweep reads all moisture channels and the optional temperature
//! channel. A sweep either completes and replaces the whole snapshot, or
//! fails on the first read error and leaves the previous snapshot in place.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use irrigation_sensors::{Calibration, Channel, ChannelReader, HardwareIoError, SensorId};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::activity::{EventKind, SharedActivity};
use crate::push::{Publisher, SENSOR_UPDATE};
use crate::readings::{Readings, ReadingsTx};

pub struct Sampler<R: ChannelReader> {
    reader: R,
    calibration: Calibration,
    sensors: Vec<(SensorId, Channel)>,
    temperature: Option<Channel>,
    readings: ReadingsTx,
    publisher: Arc<dyn Publisher>,
    activity: SharedActivity,
    interval: Duration,
}

impl<R: ChannelReader> Sampler<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: R,
        calibration: Calibration,
        sensors: Vec<(SensorId, Channel)>,
        temperature: Option<Channel>,
        readings: ReadingsTx,
        publisher: Arc<dyn Publisher>,
        activity: SharedActivity,
        interval: Duration,
    ) -> Self {
        Self {
            reader,
            calibration,
            sensors,
            temperature,
            readings,
            publisher,
            activity,
            interval,
        }
    }

    /// Read every channel once and publish the new snapshot.
    pub fn sweep(&mut self) -> Result<Arc<Readings>, HardwareIoError> {
        let mut sensors = BTreeMap::new();
        for &(id, channel) in &self.sensors {
            let raw = self.reader.read(channel)?;
            let reading = self.calibration.convert(raw);
            debug!(
                sensor = %id,
                %channel,
                raw,
                moisture = reading.moisture_percent,
                disconnected = reading.disconnected,
                "sample"
            );
            sensors.insert(id, reading);
        }

        let temp_raw = match self.temperature {
            Some(channel) => Some(self.reader.read(channel)?),
            None => None,
        };

        let snapshot = Arc::new(Readings { sensors, temp_raw });
        self.readings.send_replace(Arc::clone(&snapshot));

        match serde_json::to_value(&*snapshot) {
            Ok(payload) => self.publisher.publish(SENSOR_UPDATE, &payload),
            Err(e) => warn!("failed to encode sensor update: {e}"),
        }
        Ok(snapshot)
    }

    /// Sweep on a fixed interval until `shutdown` flips. Read failures are
    /// logged and retried on the next tick.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            sensors = self.sensors.len(),
            interval_sec = self.interval.as_secs_f32(),
            "sensor sampler started"
        );
        loop {
            if let Err(e) = self.sweep() {
                error!("sensor sweep failed: {e}");
                self.activity
                    .write()
                    .await
                    .record(EventKind::Error, format!("sensor sweep failed: {e}"));
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("sensor sampler stopped");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
