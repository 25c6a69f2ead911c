//! In-memory zone list, the single mutable copy the evaluator consults.
//!
//! Every mutation persists the whole list through the zone store while the
//! registry lock is held; the file write itself runs on the blocking pool.
//! A persistence failure never rolls back memory.

use std::collections::BTreeSet;

use time::PrimitiveDateTime;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{PersistenceError, ReplaceError};
use crate::store::ZoneStore;
use crate::zone::{self, ValveId, Zone};

struct Inner {
    zones: Vec<Zone>,
    /// Bumped on every bulk replace so stale indices can be detected.
    generation: u64,
}

/// Zones as seen at one point in time.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub generation: u64,
    pub zones: Vec<Zone>,
}

pub struct ZoneRegistry {
    inner: Mutex<Inner>,
    store: ZoneStore,
    known_valves: BTreeSet<ValveId>,
}

impl ZoneRegistry {
    /// Load zones from `store`. Bulk replaces are checked against
    /// `known_valves`.
    pub fn load(store: ZoneStore, known_valves: BTreeSet<ValveId>) -> Self {
        let zones = store.load();
        for z in &zones {
            if !known_valves.contains(&z.valve) {
                warn!(zone = %z.name, valve = %z.valve, "zone references an unconfigured valve");
            }
        }
        Self {
            inner: Mutex::new(Inner {
                zones,
                generation: 0,
            }),
            store,
            known_valves,
        }
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.lock().await;
        RegistrySnapshot {
            generation: inner.generation,
            zones: inner.zones.clone(),
        }
    }

    /// Replace every zone. The payload is validated as a whole first; on any
    /// violation nothing changes.
    pub async fn replace(&self, zones: Vec<Zone>) -> Result<(), ReplaceError> {
        zone::validate(&zones, Some(&self.known_valves))?;

        let mut inner = self.inner.lock().await;
        inner.zones = zones;
        inner.generation += 1;
        info!(zones = inner.zones.len(), "zones replaced");

        self.store.persist(inner.zones.clone()).await.map_err(|e| {
            error!("{e}");
            ReplaceError::NotPersisted(e)
        })
    }

    /// Stamp `last_watered` on the zone a watering session was started for
    /// and persist all zones.
    ///
    /// `index` is trusted only if no bulk replace happened since the
    /// snapshot at `generation`; otherwise the zone is matched by name and
    /// valve. Returns `Ok(false)` when the zone no longer exists.
    pub async fn mark_watered(
        &self,
        generation: u64,
        index: usize,
        watered: &Zone,
        at: PrimitiveDateTime,
    ) -> Result<bool, PersistenceError> {
        let mut inner = self.inner.lock().await;

        let slot = if inner.generation == generation {
            inner.zones.get_mut(index)
        } else {
            inner
                .zones
                .iter_mut()
                .find(|z| z.name == watered.name && z.valve == watered.valve)
        };
        let Some(zone) = slot else {
            warn!(zone = %watered.name, "watered zone was removed meanwhile, not stamping");
            return Ok(false);
        };
        zone.last_watered = Some(at);

        if let Err(e) = self.store.persist(inner.zones.clone()).await {
            error!("{e}");
            return Err(e);
        }
        Ok(true)
    }
}
