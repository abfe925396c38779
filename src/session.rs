//! Per-session pipeline: normalize → angles → smoothing → {repetition counter, form classifier}.
//!
//! A [`Session`] owns every piece of mutable state for one subject. Frames are
//! processed strictly in arrival order; nothing is shared between sessions.

use tracing::{debug, info, warn};

use crate::analysis::{AngleEngine, JointAngleSample};
use crate::config::SessionSettings;
use crate::error::{PipelineError, Result};
use crate::events::{FeedbackEvent, TrackingLossReason};
use crate::form::{FormClassifier, RepetitionAggregate};
use crate::pose::{BodyFrame, Frame, KeypointNormalizer, Pose, ScaleFallback};
use crate::profile::ExerciseProfile;
use crate::tracker::{CounterEvent, Phase, RepetitionCounter, RepetitionState, SignalInput, TemporalSmoother};

/// 最後に受理したフレーム
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Accepted {
    index: u64,
    timestamp_ms: u64,
}

pub struct Session {
    id: String,
    profile: ExerciseProfile,
    normalizer: KeypointNormalizer,
    fallback: ScaleFallback,
    last_body_frame: Option<BodyFrame>,
    angles: AngleEngine,
    smoother: TemporalSmoother,
    classifier: FormClassifier,
    aggregate: RepetitionAggregate,
    counter: RepetitionCounter,
    last_accepted: Option<Accepted>,
    terminated: bool,
    frames_processed: u64,
}

impl Session {
    /// プロファイルを検証してセッションを作る
    pub fn new(id: &str, profile: ExerciseProfile, settings: &SessionSettings) -> Result<Self> {
        profile.validate()?;
        settings.validate()?;

        let joints: Vec<&str> = profile.measurements.iter().map(|m| m.id.as_str()).collect();
        let smoother = TemporalSmoother::new(joints, &profile.smoothing);
        let classifier = FormClassifier::new(profile.rules.clone());
        let aggregate = RepetitionAggregate::new(classifier.joints().iter().map(String::as_str));

        info!(
            session = id,
            exercise = %profile.id,
            joints = profile.measurements.len(),
            rules = profile.rules.len(),
            debounce = profile.repetition.debounce_frames,
            "session started"
        );

        Ok(Self {
            id: id.to_string(),
            normalizer: KeypointNormalizer::new(settings.scale_reference, settings.confidence_threshold)
                .with_space(profile.space),
            fallback: settings.scale_fallback,
            last_body_frame: None,
            angles: AngleEngine::new(profile.measurements.clone(), settings.confidence_threshold, profile.space),
            smoother,
            classifier,
            aggregate,
            counter: RepetitionCounter::new(profile.repetition.clone()),
            profile,
            last_accepted: None,
            terminated: false,
            frames_processed: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &ExerciseProfile {
        &self.profile
    }

    pub fn repetition_state(&self) -> &RepetitionState {
        self.counter.state()
    }

    pub fn repetitions(&self) -> u32 {
        self.counter.count()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// 到着順の検証。順序違反はセッション致命的
    fn accept(&mut self, index: u64, timestamp_ms: u64) -> Result<()> {
        if self.terminated {
            return Err(PipelineError::SessionTerminated(self.id.clone()));
        }
        if let Some(last) = self.last_accepted {
            if timestamp_ms < last.timestamp_ms || index <= last.index {
                self.terminated = true;
                warn!(
                    session = %self.id,
                    index,
                    timestamp_ms,
                    last_index = last.index,
                    last_timestamp_ms = last.timestamp_ms,
                    "out-of-order frame, session terminated"
                );
                return Err(PipelineError::OutOfOrderFrame {
                    index,
                    timestamp_ms,
                    last_index: last.index,
                    last_timestamp_ms: last.timestamp_ms,
                });
            }
        }
        self.last_accepted = Some(Accepted { index, timestamp_ms });
        self.frames_processed += 1;
        Ok(())
    }

    /// 基準点が欠けたときはフォールバック方針に従う
    fn normalized_pose(&mut self, frame: &Frame) -> Option<Pose> {
        match self.normalizer.normalize(&frame.pose) {
            Ok(normalized) => {
                self.last_body_frame = Some(normalized.body_frame);
                Some(normalized.pose)
            }
            Err(e) => {
                debug!(session = %self.id, frame = frame.index, error = %e, "normalization failed");
                match (self.fallback, self.last_body_frame) {
                    (ScaleFallback::LastKnownGood, Some(body_frame)) => {
                        Some(KeypointNormalizer::apply(&frame.pose, body_frame).pose)
                    }
                    _ => None,
                }
            }
        }
    }

    /// 1フレームを処理してイベントを返す。
    ///
    /// イベント順: TrackingLost → FormVerdict → PhaseTransition → RepetitionCompleted
    pub fn process(&mut self, frame: &Frame) -> Result<Vec<FeedbackEvent>> {
        if self.terminated {
            return Err(PipelineError::SessionTerminated(self.id.clone()));
        }
        // 不正なフレームは状態に触れずに弾く
        if let Some(joint) = frame.pose.first_malformed() {
            return Err(PipelineError::InvalidFrame {
                index: frame.index,
                reason: format!("keypoint {} has a non-finite position or confidence outside [0, 1]", joint),
            });
        }
        self.accept(frame.index, frame.timestamp_ms)?;

        let samples = match self.normalized_pose(frame) {
            Some(pose) => self.angles.compute(frame.index, frame.timestamp_ms, &pose),
            None => self.angles.missing(frame.index, frame.timestamp_ms),
        };
        Ok(self.advance(frame.index, frame.timestamp_ms, samples, Vec::new()))
    }

    /// 推定結果が得られなかったフレーム（タイムアウト・推定失敗）。
    /// 全関節を欠損として状態を進める
    pub fn process_indeterminate(
        &mut self,
        index: u64,
        timestamp_ms: u64,
        reason: TrackingLossReason,
    ) -> Result<Vec<FeedbackEvent>> {
        self.accept(index, timestamp_ms)?;
        let events = vec![FeedbackEvent::TrackingLost {
            session: self.id.clone(),
            frame_index: index,
            timestamp_ms,
            reason,
        }];
        let samples = self.angles.missing(index, timestamp_ms);
        Ok(self.advance(index, timestamp_ms, samples, events))
    }

    fn advance(
        &mut self,
        index: u64,
        timestamp_ms: u64,
        samples: Vec<JointAngleSample>,
        mut events: Vec<FeedbackEvent>,
    ) -> Vec<FeedbackEvent> {
        let (smoothed, newly_lost) = self.smoother.update(&samples);
        if !newly_lost.is_empty() {
            warn!(session = %self.id, frame = index, joints = ?newly_lost, "joint tracking lost");
            events.push(FeedbackEvent::TrackingLost {
                session: self.id.clone(),
                frame_index: index,
                timestamp_ms,
                reason: TrackingLossReason::JointLost { joints: newly_lost },
            });
        }

        let primary = &self.profile.repetition.primary;
        let value = smoothed.iter().find(|s| &s.joint == primary).and_then(|s| s.value);
        let last_seen = self.counter.state().last_seen_ms;
        let counter_events = self.counter.update(SignalInput {
            frame_index: index,
            timestamp_ms,
            value,
        });

        let timed_out = counter_events
            .iter()
            .any(|e| matches!(e, CounterEvent::Transition { to: Phase::Aborted, .. }));
        if timed_out {
            let elapsed_ms = timestamp_ms.saturating_sub(last_seen.unwrap_or(timestamp_ms));
            let err = PipelineError::TrackingTimeout {
                elapsed_ms,
                timeout_ms: self.profile.repetition.tracking_timeout_ms,
            };
            warn!(session = %self.id, frame = index, error = %err, "repetition aborted");
            events.push(FeedbackEvent::TrackingLost {
                session: self.id.clone(),
                frame_index: index,
                timestamp_ms,
                reason: TrackingLossReason::TrackingTimeout { elapsed_ms },
            });
        }

        let phase = self.counter.state().observed_phase();
        let assessment = self.classifier.evaluate(index, phase, &smoothed);
        if !matches!(phase, Phase::Idle | Phase::Aborted) {
            self.aggregate.record(&assessment);
        }
        events.extend(assessment.verdicts.into_iter().map(|v| FeedbackEvent::FormVerdict {
            session: self.id.clone(),
            frame_index: v.frame_index,
            timestamp_ms,
            joint: v.joint,
            verdict: v.verdict,
            violated_rule: v.violated_rule,
            cue: v.cue,
        }));

        for event in counter_events {
            match event {
                CounterEvent::Transition {
                    from,
                    to,
                    frame_index,
                    timestamp_ms,
                } => {
                    debug!(session = %self.id, frame = frame_index, ?from, ?to, "phase transition");
                    // レップが完了せずに Idle/Aborted へ戻ったら集約を捨てる
                    let abandoned = to == Phase::Aborted
                        || (to == Phase::Idle && matches!(from, Phase::Ascending | Phase::Aborted));
                    if abandoned {
                        self.aggregate.reset();
                    }
                    events.push(FeedbackEvent::PhaseTransition {
                        session: self.id.clone(),
                        from,
                        to,
                        frame_index,
                        timestamp_ms,
                    });
                }
                CounterEvent::Completed {
                    count,
                    frame_index,
                    timestamp_ms,
                } => {
                    let summary = self.aggregate.close();
                    info!(
                        session = %self.id,
                        count,
                        verdict = ?summary.verdict,
                        violated_rule = summary.violated_rule.as_deref().unwrap_or("-"),
                        score = summary.score.unwrap_or(f32::NAN),
                        "repetition completed"
                    );
                    events.push(FeedbackEvent::RepetitionCompleted {
                        session: self.id.clone(),
                        count,
                        verdict: summary.verdict,
                        violated_rule: summary.violated_rule,
                        score: summary.score,
                        frame_index,
                        timestamp_ms,
                    });
                }
            }
        }

        events
    }

    /// キューが満杯で捨てたフレームの通知。セッション状態は変えない
    pub fn backpressure_event(&self, index: u64, timestamp_ms: u64, dropped: u64) -> FeedbackEvent {
        FeedbackEvent::TrackingLost {
            session: self.id.clone(),
            frame_index: index,
            timestamp_ms,
            reason: TrackingLossReason::Backpressure { dropped },
        }
    }

    /// セッション終了。進行中のレップは Aborted として閉じる。
    /// 以降の呼び出しは `SessionTerminated`
    pub fn finish(&mut self) -> Vec<FeedbackEvent> {
        if self.terminated && self.counter.phase() == Phase::Aborted {
            return Vec::new();
        }
        self.terminated = true;
        let last = self.last_accepted.unwrap_or(Accepted { index: 0, timestamp_ms: 0 });
        self.aggregate.reset();
        info!(
            session = %self.id,
            repetitions = self.counter.count(),
            frames = self.frames_processed,
            "session finished"
        );
        self.counter
            .abort(last.index, last.timestamp_ms)
            .into_iter()
            .filter_map(|event| match event {
                CounterEvent::Transition {
                    from,
                    to,
                    frame_index,
                    timestamp_ms,
                } => Some(FeedbackEvent::PhaseTransition {
                    session: self.id.clone(),
                    from,
                    to,
                    frame_index,
                    timestamp_ms,
                }),
                CounterEvent::Completed { .. } => None,
            })
            .collect()
    }
}
