//! Error taxonomy of the control engine.
//!
//! Hardware read failures live in `irrigation_sensors::HardwareIoError`.
//! None of these are fatal to a running loop: callers log them and carry on
//! with the next tick.

use std::path::PathBuf;

use crate::zone::ValveId;

/// Zone configuration that could not be read or failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read zone config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse zone config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("zone validation failed {}", summarize(.0))]
    Invalid(Vec<String>),
}

fn summarize(errors: &[String]) -> String {
    format!(
        "({} error{}):\n  - {}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" },
        errors.join("\n  - ")
    )
}

/// The zone file could not be durably replaced.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist zones to {path}: {source}")]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
    #[error("invalid valve {0}")]
    InvalidTarget(ValveId),
}

/// Failure of a bulk zone replace.
#[derive(Debug, thiserror::Error)]
pub enum ReplaceError {
    /// Nothing was changed.
    #[error(transparent)]
    Rejected(#[from] ConfigError),

    /// The new zones are live in memory but not on disk.
    #[error(transparent)]
    NotPersisted(#[from] PersistenceError),
}

/// Why a triggered zone was not watered or not stamped.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Actuation(#[from] ActuationError),

    /// The session ran; only the `last_watered` write failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_lists_every_violation() {
        let err = ConfigError::Invalid(vec!["a".into(), "b".into()]);
        assert_eq!(
            err.to_string(),
            "zone validation failed (2 errors):\n  - a\n  - b"
        );
    }

    #[test]
    fn invalid_singular() {
        let err = ConfigError::Invalid(vec!["only".into()]);
        assert!(err.to_string().starts_with("zone validation failed (1 error):"));
    }

    #[test]
    fn invalid_target_names_valve() {
        assert_eq!(
            ActuationError::InvalidTarget(ValveId(9)).to_string(),
            "invalid valve 9"
        );
    }
}
