//! Model Snapshots
//!
//! Serializes a fitted `ModelState` so an evaluator can resume without
//! refitting. Two encodings:
//! - bincode: compact, for storage
//! - JSON: inspectable, for the CLI and external tooling
//!
//! Decoding rejects snapshots written by a newer format version.

use crate::engine::ModelState;
use crate::error::{OddError, Result};
use serde::{Deserialize, Serialize};

/// Version for snapshot format migrations
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Format version
    pub version: u32,
    /// Series count of the training collection (stream width)
    pub num_series: usize,
    /// Training row count (default window length)
    pub training_len: usize,
    pub state: ModelState,
}

impl ModelSnapshot {
    pub fn new(num_series: usize, training_len: usize, state: ModelState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            num_series,
            training_len,
            state,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| OddError::Snapshot(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self =
            bincode::deserialize(bytes).map_err(|e| OddError::Snapshot(e.to_string()))?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| OddError::Snapshot(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(text).map_err(|e| OddError::Snapshot(e.to_string()))?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    fn check_version(&self) -> Result<()> {
        if self.version > SNAPSHOT_VERSION {
            return Err(OddError::SnapshotVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::engine::StreamingEvaluator;
    use crate::simulation::GaussianScenario;

    fn snapshot() -> ModelSnapshot {
        let training = GaussianScenario::new(100, 50, 10.0, 3.0).generate(8).unwrap();
        let config = DetectorConfig {
            trials: 40,
            ..DetectorConfig::default()
        };
        StreamingEvaluator::new(&training, config).unwrap().snapshot()
    }

    #[test]
    fn test_binary_round_trip() {
        let snap = snapshot();
        let bytes = snap.to_bytes().unwrap();
        let back = ModelSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.num_series, 50);
    }

    #[test]
    fn test_json_round_trip_keeps_threshold() {
        let snap = snapshot();
        let back = ModelSnapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(back.state.threshold.threshold, snap.state.threshold.threshold);
        assert_eq!(back.state.projection.rotation, snap.state.projection.rotation);
        assert_eq!(back, snap);
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut snap = snapshot();
        snap.version = SNAPSHOT_VERSION + 1;
        let bytes = snap.to_bytes().unwrap();
        assert!(matches!(
            ModelSnapshot::from_bytes(&bytes),
            Err(OddError::SnapshotVersion { found: 2, supported: 1 })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            ModelSnapshot::from_bytes(&[1, 2, 3]),
            Err(OddError::Snapshot(_))
        ));
    }
}
