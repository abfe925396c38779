//! Feedback events emitted by a session, in processing order.
//!
//! Variant and field names are part of the recorded format (JSON lines and
//! bincode records), so renaming them breaks existing recordings.

use serde::{Deserialize, Serialize};

use crate::form::Verdict;
use crate::tracker::Phase;

/// Why tracking was reported lost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingLossReason {
    /// These joints had missing samples for `missing_limit` frames in a row
    JointLost { joints: Vec<String> },
    /// The primary joint had no valid sample for `elapsed_ms`
    TrackingTimeout { elapsed_ms: u64 },
    /// The pose estimator did not answer in time
    EstimatorTimeout,
    /// The pose estimator returned an error
    EstimatorError { message: String },
    /// The ingest queue was full and the newest frame was dropped
    Backpressure { dropped: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackEvent {
    PhaseTransition {
        session: String,
        from: Phase,
        to: Phase,
        frame_index: u64,
        timestamp_ms: u64,
    },
    RepetitionCompleted {
        session: String,
        count: u32,
        verdict: Verdict,
        violated_rule: Option<String>,
        score: Option<f32>,
        frame_index: u64,
        timestamp_ms: u64,
    },
    FormVerdict {
        session: String,
        frame_index: u64,
        timestamp_ms: u64,
        joint: String,
        verdict: Verdict,
        violated_rule: Option<String>,
        cue: Option<String>,
    },
    TrackingLost {
        session: String,
        frame_index: u64,
        timestamp_ms: u64,
        reason: TrackingLossReason,
    },
}

impl FeedbackEvent {
    pub fn session(&self) -> &str {
        match self {
            FeedbackEvent::PhaseTransition { session, .. }
            | FeedbackEvent::RepetitionCompleted { session, .. }
            | FeedbackEvent::FormVerdict { session, .. }
            | FeedbackEvent::TrackingLost { session, .. } => session,
        }
    }

    /// 元フレームのシーケンス番号
    pub fn frame_index(&self) -> u64 {
        match self {
            FeedbackEvent::PhaseTransition { frame_index, .. }
            | FeedbackEvent::RepetitionCompleted { frame_index, .. }
            | FeedbackEvent::FormVerdict { frame_index, .. }
            | FeedbackEvent::TrackingLost { frame_index, .. } => *frame_index,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeedbackEvent::PhaseTransition { .. } => "phase_transition",
            FeedbackEvent::RepetitionCompleted { .. } => "repetition_completed",
            FeedbackEvent::FormVerdict { .. } => "form_verdict",
            FeedbackEvent::TrackingLost { .. } => "tracking_lost",
        }
    }
}
