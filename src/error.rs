use thiserror::Error;

use crate::pose::KeypointIndex;

/// パイプラインのエラー分類
///
/// `InsufficientConfidence` / `DegenerateGeometry` はセッション内で吸収され
/// Indeterminate として表面化する。`OutOfOrderFrame` はセッション致命的。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("keypoint {joint:?} below confidence threshold ({confidence:.2} < {threshold:.2})")]
    InsufficientConfidence {
        joint: KeypointIndex,
        confidence: f32,
        threshold: f32,
    },

    #[error("angle undefined: {0}")]
    DegenerateGeometry(&'static str),

    #[error(
        "frame {index} (t={timestamp_ms}ms) arrived after frame {last_index} (t={last_timestamp_ms}ms)"
    )]
    OutOfOrderFrame {
        index: u64,
        timestamp_ms: u64,
        last_index: u64,
        last_timestamp_ms: u64,
    },

    #[error("no valid tracking for {elapsed_ms}ms (timeout {timeout_ms}ms)")]
    TrackingTimeout { elapsed_ms: u64, timeout_ms: u64 },

    #[error("pose estimator did not answer frame {index} within {timeout_ms}ms")]
    EstimatorTimeout { index: u64, timeout_ms: u64 },

    #[error("invalid frame {index}: {reason}")]
    InvalidFrame { index: u64, reason: String },

    #[error("invalid exercise profile '{profile}': {reason}")]
    InvalidProfile { profile: String, reason: String },

    #[error("invalid session settings: {0}")]
    InvalidSettings(String),

    #[error("session '{0}' is terminated")]
    SessionTerminated(String),

    #[error("session '{0}' already exists")]
    DuplicateSession(String),
}

impl PipelineError {
    /// セッションを再起動しなければならないエラーか
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutOfOrderFrame { .. } | Self::SessionTerminated(_)
        )
    }

    pub(crate) fn invalid_profile(profile: &str, reason: impl Into<String>) -> Self {
        Self::InvalidProfile {
            profile: profile.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
