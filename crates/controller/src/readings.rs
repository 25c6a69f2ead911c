//! The shared readings snapshot.
//!
//! The sampler is the only writer and swaps in a whole new snapshot each
//! sweep; everyone else holds a receiver and clones the current `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use irrigation_sensors::{SensorId, SensorReading};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Readings {
    pub sensors: BTreeMap<SensorId, SensorReading>,
    pub temp_raw: Option<i32>,
}

impl Readings {
    /// Connected readings for `ids`, in the given order. Unknown and
    /// disconnected sensors are skipped.
    pub fn connected<'a>(
        &'a self,
        ids: &'a [SensorId],
    ) -> impl Iterator<Item = (SensorId, &'a SensorReading)> + 'a {
        ids.iter().filter_map(move |id| {
            self.sensors
                .get(id)
                .filter(|r| !r.disconnected)
                .map(|r| (*id, r))
        })
    }
}

pub type ReadingsTx = watch::Sender<Arc<Readings>>;
pub type ReadingsRx = watch::Receiver<Arc<Readings>>;

/// Create the snapshot channel, starting from an empty snapshot.
pub fn channel() -> (ReadingsTx, ReadingsRx) {
    watch::channel(Arc::new(Readings::default()))
}

/// Current snapshot without holding the channel's read lock.
pub fn current(rx: &ReadingsRx) -> Arc<Readings> {
    Arc::clone(&rx.borrow())
}

#[cfg(test)]
pub(crate) fn snapshot(entries: &[(u32, f64, bool)]) -> Readings {
    Readings {
        sensors: entries
            .iter()
            .map(|&(id, moisture_percent, disconnected)| {
                (
                    SensorId(id),
                    SensorReading {
                        moisture_percent,
                        disconnected,
                    },
                )
            })
            .collect(),
        temp_raw: None,
    }
}
