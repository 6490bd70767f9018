//! Error taxonomy for the detection pipeline
//!
//! Three classes of failure matter to callers:
//! - Input errors: fatal, surfaced before any window is evaluated
//! - Numeric instability: fatal during initialization, recovered per window while streaming
//! - Drift test failures: recovered by skipping adaptation for the window

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OddError>;

/// Coarse classification used by the evaluator's recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Numeric,
    DriftTest,
    Snapshot,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OddError {
    #[error("column count mismatch: training has {training} series, stream has {stream}")]
    ColumnMismatch { training: usize, stream: usize },

    #[error("training set too small: {usable} usable series for {features} features")]
    TrainingTooSmall { usable: usize, features: usize },

    #[error("all {0} training series are excluded")]
    AllSeriesExcluded(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("numeric instability: {0}")]
    NumericInstability(String),

    #[error("drift test failed: {0}")]
    DriftTestFailure(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("unsupported snapshot version {found} (max supported: {supported})")]
    SnapshotVersion { found: u32, supported: u32 },

    #[error("worker error: {0}")]
    Worker(String),
}

impl OddError {
    pub fn numeric(msg: impl Into<String>) -> Self {
        Self::NumericInstability(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ColumnMismatch { .. }
            | Self::TrainingTooSmall { .. }
            | Self::AllSeriesExcluded(_)
            | Self::InvalidConfig(_)
            | Self::InvalidInput(_) => ErrorKind::Input,
            Self::NumericInstability(_) => ErrorKind::Numeric,
            Self::DriftTestFailure(_) => ErrorKind::DriftTest,
            Self::Snapshot(_) | Self::SnapshotVersion { .. } => ErrorKind::Snapshot,
            Self::Worker(_) => ErrorKind::Worker,
        }
    }

    /// Whether a streaming window may recover from this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Numeric | ErrorKind::DriftTest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = OddError::ColumnMismatch {
            training: 10,
            stream: 12,
        };
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(!err.is_recoverable());

        assert!(OddError::numeric("singular").is_recoverable());
        assert!(OddError::DriftTestFailure("too few points".into()).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = OddError::TrainingTooSmall {
            usable: 5,
            features: 14,
        };
        assert_eq!(
            err.to_string(),
            "training set too small: 5 usable series for 14 features"
        );
    }
}
