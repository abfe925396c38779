use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::frame::{CapturedImage, Frame};
use super::keypoint::Pose;

/// 画像からキーポイントを推定する外部コンポーネント
///
/// パイプラインは特定のモデルランタイムに依存しない。実装は遅くてもよく、
/// 呼び出し側がタイムアウトとキャンセルを担当する。
#[async_trait]
pub trait PoseEstimator: Send + Sync {
    async fn estimate(&self, image: &CapturedImage) -> Result<Pose>;
}

/// 記録済みのキーポイント列を返す推定器（リプレイ・テスト用）
///
/// フレーム番号で記録を引く。記録のないフレームはエラー。
pub struct ReplayEstimator {
    poses: HashMap<u64, Pose>,
    latency: Option<Duration>,
}

impl ReplayEstimator {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            poses: frames.into_iter().map(|f| (f.index, f.pose)).collect(),
            latency: None,
        }
    }

    /// 推定ごとに遅延を入れる
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl PoseEstimator for ReplayEstimator {
    async fn estimate(&self, image: &CapturedImage) -> Result<Pose> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.poses
            .get(&image.index)
            .cloned()
            .ok_or_else(|| anyhow!("no recorded pose for frame {}", image.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, KeypointIndex};
    use bytes::Bytes;

    fn image(index: u64) -> CapturedImage {
        CapturedImage::new(index, index * 33, 4, 4, Bytes::new())
    }

    #[tokio::test]
    async fn test_replay_returns_recorded_pose() {
        let mut pose = Pose::default();
        pose.set(KeypointIndex::LeftKnee, Keypoint::new(0.3, 0.6, 0.9));
        let estimator = ReplayEstimator::new(vec![Frame::new(5, 165, pose.clone())]);

        assert_eq!(estimator.estimate(&image(5)).await.unwrap(), pose);
        assert!(estimator.estimate(&image(6)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_latency_is_applied() {
        let estimator = ReplayEstimator::new(vec![Frame::indeterminate(0, 0)])
            .with_latency(Duration::from_millis(500));
        let started = tokio::time::Instant::now();
        estimator.estimate(&image(0)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
