//! JSON zone file: the durable side of the zone registry.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{ConfigError, PersistenceError};
use crate::zone::{self, Zone};

#[derive(Debug, Clone)]
pub struct ZoneStore {
    path: PathBuf,
}

impl ZoneStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all zones. Never fails: a missing, malformed, or invalid file
    /// yields an empty zone list and a log line.
    pub fn load(&self) -> Vec<Zone> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "zone file not found, starting with no zones");
            return Vec::new();
        }

        match self.try_load() {
            Ok(zones) => {
                info!(path = %self.path.display(), zones = zones.len(), "zones loaded");
                zones
            }
            Err(e) => {
                warn!("{e}; starting with no zones");
                Vec::new()
            }
        }
    }

    fn try_load(&self) -> Result<Vec<Zone>, ConfigError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let zones: Vec<Zone> =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        zone::validate(&zones, None)?;
        Ok(zones)
    }

    /// Replace the whole zone file. Writes a sibling temporary file and
    /// renames it over the old one so readers never see a partial file.
    pub fn overwrite(&self, zones: &[Zone]) -> Result<(), PersistenceError> {
        let err = |source: io::Error| PersistenceError {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(zones).map_err(|e| err(e.into()))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        if let Err(e) = write_then_rename(&tmp, &self.path, &json) {
            let _ = fs::remove_file(&tmp);
            return Err(err(e));
        }

        info!(path = %self.path.display(), zones = zones.len(), "zones persisted");
        Ok(())
    }

    /// [`overwrite`](Self::overwrite) on the blocking pool, for callers on
    /// the async executor.
    pub async fn persist(&self, zones: Vec<Zone>) -> Result<(), PersistenceError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.overwrite(&zones))
            .await
            .unwrap_or_else(|e| {
                Err(PersistenceError {
                    path: self.path.clone(),
                    source: io::Error::other(e),
                })
            })
    }
}

fn write_then_rename(tmp: &Path, target: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, target)
}
