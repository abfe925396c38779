//! Async session workers.
//!
//! Each session runs on its own tokio task fed by a bounded queue. Capture never
//! blocks: when the queue is full the newest frame is dropped and counted, and
//! the worker reports the drop as a `TrackingLost` event. The pose estimator is
//! called with a timeout and is cancelled on teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionSettings;
use crate::error::{PipelineError, Result};
use crate::events::{FeedbackEvent, TrackingLossReason};
use crate::pose::{CapturedImage, Frame, PoseEstimator};
use crate::profile::ExerciseProfile;
use crate::session::Session;

/// 終了したセッションの集計
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session: String,
    pub repetitions: u32,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub estimator_timeouts: u64,
}

/// 稼働中セッションへのハンドル
pub struct SessionHandle {
    id: String,
    frames: mpsc::Sender<CapturedImage>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<Result<SessionReport>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// フレームを投入する。キューが満杯なら最新フレームを捨てて Ok を返す
    pub fn submit(&self, image: CapturedImage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::SessionTerminated(self.id.clone()));
        }
        match self.frames.try_send(image) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(image)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(session = %self.id, frame = image.index, dropped, "queue full, frame dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::SessionTerminated(self.id.clone())),
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 入力を閉じ、キューに残ったフレームを処理し終えるまで待つ
    pub async fn finish(self) -> Result<SessionReport> {
        let SessionHandle { id, frames, task, .. } = self;
        drop(frames);
        join(&id, task).await
    }

    /// 即座に停止する。処理中の推定呼び出しはキャンセルされ、残りのフレームは捨てる
    pub async fn shutdown(self) -> Result<SessionReport> {
        self.cancel.cancel();
        let SessionHandle { id, frames, task, .. } = self;
        drop(frames);
        join(&id, task).await
    }
}

async fn join(id: &str, task: JoinHandle<Result<SessionReport>>) -> Result<SessionReport> {
    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(session = id, error = %e, "session worker panicked or was aborted");
            Err(PipelineError::SessionTerminated(id.to_string()))
        }
    }
}

/// セッションのワーカーを起動する
pub fn spawn_session(
    session: Session,
    estimator: Arc<dyn PoseEstimator>,
    settings: &SessionSettings,
    events: mpsc::UnboundedSender<FeedbackEvent>,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let cancel = CancellationToken::new();
    let id = session.id().to_string();

    let worker = Worker {
        session,
        estimator,
        timeout: settings.estimator_timeout(),
        events,
        dropped: Arc::clone(&dropped),
        reported_drops: 0,
        estimator_timeouts: 0,
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(worker.run(rx));

    SessionHandle {
        id,
        frames: tx,
        dropped,
        cancel,
        task,
    }
}

struct Worker {
    session: Session,
    estimator: Arc<dyn PoseEstimator>,
    timeout: Duration,
    events: mpsc::UnboundedSender<FeedbackEvent>,
    dropped: Arc<AtomicU64>,
    reported_drops: u64,
    estimator_timeouts: u64,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<CapturedImage>) -> Result<SessionReport> {
        loop {
            let image = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                image = rx.recv() => match image {
                    Some(image) => image,
                    None => break,
                },
            };

            let estimate = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(session = %self.session.id(), frame = image.index, "estimator call cancelled");
                    break;
                }
                r = tokio::time::timeout(self.timeout, self.estimator.estimate(&image)) => r,
            };

            self.report_drops(&image);

            let result = match estimate {
                Ok(Ok(pose)) => self.session.process(&Frame::new(image.index, image.timestamp_ms, pose)),
                Ok(Err(e)) => {
                    warn!(session = %self.session.id(), frame = image.index, error = %e, "pose estimation failed");
                    self.session.process_indeterminate(
                        image.index,
                        image.timestamp_ms,
                        TrackingLossReason::EstimatorError { message: e.to_string() },
                    )
                }
                Err(_) => {
                    self.estimator_timeouts += 1;
                    let err = PipelineError::EstimatorTimeout {
                        index: image.index,
                        timeout_ms: self.timeout.as_millis() as u64,
                    };
                    warn!(session = %self.session.id(), error = %err, "frame marked indeterminate");
                    self.session.process_indeterminate(
                        image.index,
                        image.timestamp_ms,
                        TrackingLossReason::EstimatorTimeout,
                    )
                }
            };

            match result {
                Ok(events) => self.emit(events),
                Err(e) if e.is_session_fatal() => {
                    error!(session = %self.session.id(), error = %e, "session aborted");
                    let events = self.session.finish();
                    self.emit(events);
                    return Err(e);
                }
                Err(e) => warn!(session = %self.session.id(), error = %e, "frame rejected"),
            }
        }

        let events = self.session.finish();
        self.emit(events);
        let report = SessionReport {
            session: self.session.id().to_string(),
            repetitions: self.session.repetitions(),
            frames_processed: self.session.frames_processed(),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            estimator_timeouts: self.estimator_timeouts,
        };
        info!(
            session = %report.session,
            repetitions = report.repetitions,
            frames = report.frames_processed,
            dropped = report.frames_dropped,
            timeouts = report.estimator_timeouts,
            "session worker stopped"
        );
        Ok(report)
    }

    /// 前回の報告以降に捨てたフレームがあれば通知する
    fn report_drops(&mut self, current: &CapturedImage) {
        let total = self.dropped.load(Ordering::Relaxed);
        if total > self.reported_drops {
            let dropped = total - self.reported_drops;
            self.reported_drops = total;
            warn!(session = %self.session.id(), dropped, total, "frames dropped under backpressure");
            let event = self.session.backpressure_event(current.index, current.timestamp_ms, dropped);
            self.emit(vec![event]);
        }
    }

    fn emit(&self, events: Vec<FeedbackEvent>) {
        for event in events {
            // 受信側が閉じていても処理は続ける
            let _ = self.events.send(event);
        }
    }
}

/// 複数セッションの管理。セッション間で状態は共有しない
pub struct SessionRegistry {
    settings: SessionSettings,
    events: mpsc::UnboundedSender<FeedbackEvent>,
    sessions: HashMap<String, SessionHandle>,
}

impl SessionRegistry {
    /// 全セッションのイベントは戻り値の受信側にまとめて流れる
    pub fn new(settings: SessionSettings) -> (Self, mpsc::UnboundedReceiver<FeedbackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            settings,
            events: tx,
            sessions: HashMap::new(),
        };
        (registry, rx)
    }

    pub fn start(
        &mut self,
        id: &str,
        profile: ExerciseProfile,
        estimator: Arc<dyn PoseEstimator>,
    ) -> Result<()> {
        if self.sessions.contains_key(id) {
            return Err(PipelineError::DuplicateSession(id.to_string()));
        }
        let session = Session::new(id, profile, &self.settings)?;
        let handle = spawn_session(session, estimator, &self.settings, self.events.clone());
        self.sessions.insert(id.to_string(), handle);
        Ok(())
    }

    pub fn submit(&self, id: &str, image: CapturedImage) -> Result<()> {
        self.sessions
            .get(id)
            .ok_or_else(|| PipelineError::SessionTerminated(id.to_string()))?
            .submit(image)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 入力を閉じて残りを処理させてから終了
    pub async fn finish(&mut self, id: &str) -> Result<SessionReport> {
        let handle = self
            .sessions
            .remove(id)
            .ok_or_else(|| PipelineError::SessionTerminated(id.to_string()))?;
        handle.finish().await
    }

    pub async fn shutdown(&mut self, id: &str) -> Result<SessionReport> {
        let handle = self
            .sessions
            .remove(id)
            .ok_or_else(|| PipelineError::SessionTerminated(id.to_string()))?;
        handle.shutdown().await
    }

    /// 全セッションを停止する（id 順）
    pub async fn shutdown_all(&mut self) -> Vec<Result<SessionReport>> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            reports.push(self.shutdown(&id).await);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, KeypointIndex::*, Pose, ReplayEstimator};
    use crate::profile::catalog;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use bytes::Bytes;

    fn image(index: u64) -> CapturedImage {
        CapturedImage::new(index, index * 33, 4, 4, Bytes::new())
    }

    fn standing() -> Pose {
        let mut pose = Pose::default();
        for (joint, x, y) in [
            (LeftShoulder, 0.45, 0.2),
            (RightShoulder, 0.55, 0.2),
            (LeftHip, 0.45, 0.5),
            (RightHip, 0.55, 0.5),
            (LeftKnee, 0.45, 0.7),
            (RightKnee, 0.55, 0.7),
            (LeftAnkle, 0.45, 0.9),
            (RightAnkle, 0.55, 0.9),
        ] {
            pose.set(joint, Keypoint::new(x, y, 0.9));
        }
        pose
    }

    fn standing_frames(n: u64) -> Vec<Frame> {
        (0..n).map(|i| Frame::new(i, i * 33, standing())).collect()
    }

    struct NeverAnswers;

    #[async_trait]
    impl PoseEstimator for NeverAnswers {
        async fn estimate(&self, _image: &CapturedImage) -> anyhow::Result<Pose> {
            std::future::pending::<()>().await;
            Err(anyhow!("unreachable"))
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<FeedbackEvent>) -> Vec<FeedbackEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_worker_processes_all_queued_frames() {
        let settings = SessionSettings::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new("s1", catalog::builtin("squat").unwrap(), &settings).unwrap();
        let estimator = Arc::new(ReplayEstimator::new(standing_frames(5)));
        let handle = spawn_session(session, estimator, &settings, tx);
        for i in 0..5 {
            handle.submit(image(i)).unwrap();
        }
        let report = handle.finish().await.unwrap();
        assert_eq!(report.frames_processed, 5);
        assert_eq!(report.frames_dropped, 0);
        assert_eq!(report.repetitions, 0);

        // 終了時に Idle → Aborted
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(FeedbackEvent::PhaseTransition { from: crate::tracker::Phase::Idle, to: crate::tracker::Phase::Aborted, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimator_timeout_marks_frame_indeterminate() {
        let settings = SessionSettings {
            estimator_timeout_ms: 50,
            ..SessionSettings::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new("slow", catalog::builtin("squat").unwrap(), &settings).unwrap();
        let handle = spawn_session(session, Arc::new(NeverAnswers), &settings, tx);
        handle.submit(image(0)).unwrap();
        handle.submit(image(1)).unwrap();
        let report = handle.finish().await.unwrap();
        assert_eq!(report.estimator_timeouts, 2);
        assert_eq!(report.frames_processed, 2);

        let timeouts = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, FeedbackEvent::TrackingLost { reason: TrackingLossReason::EstimatorTimeout, .. }))
            .count();
        assert_eq!(timeouts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_newest_and_reports() {
        let settings = SessionSettings {
            queue_capacity: 2,
            ..SessionSettings::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new("burst", catalog::builtin("squat").unwrap(), &settings).unwrap();
        let estimator = Arc::new(
            ReplayEstimator::new(standing_frames(10)).with_latency(Duration::from_millis(10)),
        );
        let handle = spawn_session(session, estimator, &settings, tx);

        // ワーカーが動く前に一気に投入する
        for i in 0..10 {
            handle.submit(image(i)).unwrap();
        }
        assert!(handle.dropped_frames() >= 7);
        let report = handle.finish().await.unwrap();
        assert_eq!(report.frames_processed + report.frames_dropped, 10);

        let reported: u64 = drain(&mut rx)
            .iter()
            .filter_map(|e| match e {
                FeedbackEvent::TrackingLost { reason: TrackingLossReason::Backpressure { dropped }, .. } => Some(*dropped),
                _ => None,
            })
            .sum();
        assert_eq!(reported, report.frames_dropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_estimate() {
        let settings = SessionSettings {
            estimator_timeout_ms: 60_000,
            ..SessionSettings::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new("cancel", catalog::builtin("squat").unwrap(), &settings).unwrap();
        let handle = spawn_session(session, Arc::new(NeverAnswers), &settings, tx);
        handle.submit(image(0)).unwrap();
        tokio::task::yield_now().await;

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.frames_processed, 0);
    }

    #[tokio::test]
    async fn test_registry_isolates_sessions() {
        let (mut registry, _rx) = SessionRegistry::new(SessionSettings::default());
        let estimator: Arc<dyn PoseEstimator> = Arc::new(ReplayEstimator::new(standing_frames(3)));
        registry.start("a", catalog::builtin("squat").unwrap(), Arc::clone(&estimator)).unwrap();
        registry.start("b", catalog::builtin("squat").unwrap(), Arc::clone(&estimator)).unwrap();
        assert!(matches!(
            registry.start("a", catalog::builtin("squat").unwrap(), Arc::clone(&estimator)),
            Err(PipelineError::DuplicateSession(_))
        ));

        for i in 0..3 {
            registry.submit("a", image(i)).unwrap();
        }
        registry.submit("b", image(0)).unwrap();
        assert!(registry.submit("missing", image(0)).is_err());

        let a = registry.finish("a").await.unwrap();
        let b = registry.finish("b").await.unwrap();
        assert_eq!(a.frames_processed, 3);
        assert_eq!(b.frames_processed, 1);
        assert!(registry.is_empty());
    }
}
