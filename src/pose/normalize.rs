use serde::{Deserialize, Serialize};

use super::keypoint::{Keypoint, KeypointIndex, Pose};
use crate::analysis::angle::{distance, midpoint};
use crate::analysis::AngleSpace;
use crate::error::{PipelineError, Result};

/// これ未満の基準長は縮退とみなす
const MIN_REFERENCE_LENGTH: f32 = 1e-6;

/// 正規化の基準長
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleReference {
    /// 肩幅、原点は両肩の中点
    #[default]
    ShoulderWidth,
    /// 肩中点〜腰中点の距離、原点は腰の中点
    TorsoLength,
}

/// 基準点が取れなかったフレームの扱い（オーケストレータが適用する）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFallback {
    /// 直近の成功フレームの原点・スケールを使い回す
    #[default]
    LastKnownGood,
    /// フレームをスキップ（全関節を欠損扱い）
    SkipFrame,
}

/// 身体中心の座標系
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyFrame {
    pub origin: [f32; 3],
    pub scale: f32,
}

/// 正規化済み姿勢。信頼度は元のまま保持する
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPose {
    pub body_frame: BodyFrame,
    pub pose: Pose,
}

/// キーポイント正規化
pub struct KeypointNormalizer {
    reference: ScaleReference,
    confidence_threshold: f32,
    space: AngleSpace,
}

impl KeypointNormalizer {
    pub fn new(reference: ScaleReference, confidence_threshold: f32) -> Self {
        Self {
            reference,
            confidence_threshold,
            space: AngleSpace::default(),
        }
    }

    /// 基準長を測る空間。Planar では z を無視する
    pub fn with_space(mut self, space: AngleSpace) -> Self {
        self.space = space;
        self
    }

    pub fn reference(&self) -> ScaleReference {
        self.reference
    }

    fn anchor(&self, pose: &Pose, joint: KeypointIndex) -> Result<[f32; 3]> {
        let kp = pose.get(joint);
        if kp.is_valid(self.confidence_threshold) {
            Ok(kp.position())
        } else {
            Err(PipelineError::InsufficientConfidence {
                joint,
                confidence: kp.confidence,
                threshold: self.confidence_threshold,
            })
        }
    }

    /// 同一フレームの基準点から身体座標系を求める。
    /// 基準点が欠けている場合はスケールを捏造せずエラーを返す。
    pub fn body_frame(&self, pose: &Pose) -> Result<BodyFrame> {
        let ls = self.anchor(pose, KeypointIndex::LeftShoulder)?;
        let rs = self.anchor(pose, KeypointIndex::RightShoulder)?;
        let shoulder_mid = midpoint(&ls, &rs);

        let (origin, scale) = match self.reference {
            ScaleReference::ShoulderWidth => (shoulder_mid, distance(&ls, &rs, self.space)),
            ScaleReference::TorsoLength => {
                let lh = self.anchor(pose, KeypointIndex::LeftHip)?;
                let rh = self.anchor(pose, KeypointIndex::RightHip)?;
                let hip_mid = midpoint(&lh, &rh);
                (hip_mid, distance(&shoulder_mid, &hip_mid, self.space))
            }
        };

        if !(scale >= MIN_REFERENCE_LENGTH) {
            return Err(PipelineError::DegenerateGeometry("reference length is zero"));
        }

        Ok(BodyFrame { origin, scale })
    }

    /// 身体中心・単位基準長に正規化
    pub fn normalize(&self, pose: &Pose) -> Result<NormalizedPose> {
        let body_frame = self.body_frame(pose)?;
        Ok(Self::apply(pose, body_frame))
    }

    /// 既知の座標系で正規化（last-known-good フォールバック用）
    pub fn apply(pose: &Pose, body_frame: BodyFrame) -> NormalizedPose {
        let BodyFrame { origin, scale } = body_frame;
        let keypoints = pose.keypoints.map(|kp| Keypoint {
            x: (kp.x - origin[0]) / scale,
            y: (kp.y - origin[1]) / scale,
            z: (kp.z - origin[2]) / scale,
            confidence: kp.confidence,
        });
        NormalizedPose {
            body_frame,
            pose: Pose::new(keypoints),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upright_pose() -> Pose {
        let mut pose = Pose::default();
        pose.set(KeypointIndex::LeftShoulder, Keypoint::new(0.4, 0.3, 0.9));
        pose.set(KeypointIndex::RightShoulder, Keypoint::new(0.6, 0.3, 0.9));
        pose.set(KeypointIndex::LeftHip, Keypoint::new(0.42, 0.7, 0.9));
        pose.set(KeypointIndex::RightHip, Keypoint::new(0.58, 0.7, 0.9));
        pose.set(KeypointIndex::LeftKnee, Keypoint::new(0.42, 0.9, 0.2));
        pose
    }

    #[test]
    fn test_shoulder_width_normalization() {
        let n = KeypointNormalizer::new(ScaleReference::ShoulderWidth, 0.5);
        let result = n.normalize(&upright_pose()).unwrap();

        assert!((result.body_frame.scale - 0.2).abs() < 1e-6);
        let ls = result.pose.get(KeypointIndex::LeftShoulder);
        let rs = result.pose.get(KeypointIndex::RightShoulder);
        assert!((ls.x + 0.5).abs() < 1e-5);
        assert!((rs.x - 0.5).abs() < 1e-5);
        assert!(ls.y.abs() < 1e-5);
        // 信頼度は保持される
        assert_eq!(result.pose.get(KeypointIndex::LeftKnee).confidence, 0.2);
    }

    #[test]
    fn test_torso_length_normalization() {
        let n = KeypointNormalizer::new(ScaleReference::TorsoLength, 0.5);
        let result = n.normalize(&upright_pose()).unwrap();

        assert!((result.body_frame.scale - 0.4).abs() < 1e-5);
        let lh = result.pose.get(KeypointIndex::LeftHip);
        assert!(lh.y.abs() < 1e-5);
        let ls = result.pose.get(KeypointIndex::LeftShoulder);
        assert!((ls.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_scale_space_follows_profile() {
        let mut pose = upright_pose();
        let mut rs = *pose.get(KeypointIndex::RightShoulder);
        rs.z = 0.15;
        pose.set(KeypointIndex::RightShoulder, rs);

        let planar = KeypointNormalizer::new(ScaleReference::ShoulderWidth, 0.5);
        let scale = planar.body_frame(&pose).unwrap().scale;
        assert!((scale - 0.2).abs() < 1e-6, "planar scale={}", scale);

        let spatial = KeypointNormalizer::new(ScaleReference::ShoulderWidth, 0.5).with_space(AngleSpace::Spatial);
        let scale = spatial.body_frame(&pose).unwrap().scale;
        assert!((scale - 0.25).abs() < 1e-5, "spatial scale={}", scale);
    }

    #[test]
    fn test_missing_anchor_is_reported() {
        let mut pose = upright_pose();
        pose.set(KeypointIndex::RightShoulder, Keypoint::new(0.6, 0.3, 0.1));
        let n = KeypointNormalizer::new(ScaleReference::ShoulderWidth, 0.5);

        match n.normalize(&pose) {
            Err(PipelineError::InsufficientConfidence { joint, .. }) => {
                assert_eq!(joint, KeypointIndex::RightShoulder)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_coincident_anchors_are_degenerate() {
        let mut pose = upright_pose();
        pose.set(KeypointIndex::RightShoulder, Keypoint::new(0.4, 0.3, 0.9));
        let n = KeypointNormalizer::new(ScaleReference::ShoulderWidth, 0.5);
        assert!(matches!(
            n.normalize(&pose),
            Err(PipelineError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_apply_with_previous_frame() {
        let frame = BodyFrame {
            origin: [0.5, 0.5, 0.0],
            scale: 0.5,
        };
        let mut pose = Pose::default();
        pose.set(KeypointIndex::Nose, Keypoint::new(1.0, 0.0, 0.8));
        let result = KeypointNormalizer::apply(&pose, frame);
        let nose = result.pose.get(KeypointIndex::Nose);
        assert!((nose.x - 1.0).abs() < 1e-6);
        assert!((nose.y + 1.0).abs() < 1e-6);
    }
}
