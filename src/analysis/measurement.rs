use serde::{Deserialize, Serialize};

use super::angle::{self, AngleSpace, Axis};
use crate::error::{PipelineError, Result};
use crate::pose::{KeypointIndex, Pose};

/// 角度計算の端点。単一関節か二関節の中点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Anchor {
    Joint(KeypointIndex),
    Midpoint([KeypointIndex; 2]),
}

impl Anchor {
    fn joints(&self) -> Vec<KeypointIndex> {
        match *self {
            Anchor::Joint(j) => vec![j],
            Anchor::Midpoint([a, b]) => vec![a, b],
        }
    }
}

/// 角度の定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AngleDefinition {
    /// `vertex` における a-vertex-c の角度
    Vertex {
        a: KeypointIndex,
        vertex: KeypointIndex,
        c: KeypointIndex,
    },
    /// from→to の線分と基準軸のなす角
    Inclination { from: Anchor, to: Anchor, axis: Axis },
}

/// 名前付きの角度計測（プロファイルの監視対象関節）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: String,
    pub angle: AngleDefinition,
}

impl Measurement {
    pub fn vertex(id: &str, a: KeypointIndex, vertex: KeypointIndex, c: KeypointIndex) -> Self {
        Self {
            id: id.to_string(),
            angle: AngleDefinition::Vertex { a, vertex, c },
        }
    }

    pub fn inclination(id: &str, from: Anchor, to: Anchor, axis: Axis) -> Self {
        Self {
            id: id.to_string(),
            angle: AngleDefinition::Inclination { from, to, axis },
        }
    }

    /// 計算に必要な関節
    pub fn required_joints(&self) -> Vec<KeypointIndex> {
        match &self.angle {
            AngleDefinition::Vertex { a, vertex, c } => vec![*a, *vertex, *c],
            AngleDefinition::Inclination { from, to, .. } => {
                let mut joints = from.joints();
                joints.extend(to.joints());
                joints
            }
        }
    }

    /// 正規化済み姿勢から角度を計算する。
    /// 閾値未満の関節があれば `InsufficientConfidence`。
    pub fn measure(&self, pose: &Pose, confidence_threshold: f32, space: AngleSpace) -> Result<f32> {
        for joint in self.required_joints() {
            let kp = pose.get(joint);
            if !kp.is_valid(confidence_threshold) {
                return Err(PipelineError::InsufficientConfidence {
                    joint,
                    confidence: kp.confidence,
                    threshold: confidence_threshold,
                });
            }
        }

        match &self.angle {
            AngleDefinition::Vertex { a, vertex, c } => angle::vertex_angle(
                &pose.get(*a).position(),
                &pose.get(*vertex).position(),
                &pose.get(*c).position(),
                space,
            ),
            AngleDefinition::Inclination { from, to, axis } => angle::inclination(
                &resolve(pose, from),
                &resolve(pose, to),
                *axis,
                space,
            ),
        }
    }
}

fn resolve(pose: &Pose, anchor: &Anchor) -> [f32; 3] {
    match *anchor {
        Anchor::Joint(j) => pose.get(j).position(),
        Anchor::Midpoint([a, b]) => angle::midpoint(&pose.get(a).position(), &pose.get(b).position()),
    }
}

/// 1フレーム・1関節の角度。`angle` が None なら無効（欠損扱い）
#[derive(Debug, Clone, PartialEq)]
pub struct JointAngleSample {
    pub joint: String,
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub angle: Option<f32>,
}

impl JointAngleSample {
    pub fn is_valid(&self) -> bool {
        self.angle.is_some()
    }
}

/// プロファイルの監視関節すべての角度を計算する
pub struct AngleEngine {
    measurements: Vec<Measurement>,
    confidence_threshold: f32,
    space: AngleSpace,
}

impl AngleEngine {
    pub fn new(measurements: Vec<Measurement>, confidence_threshold: f32, space: AngleSpace) -> Self {
        Self {
            measurements,
            confidence_threshold,
            space,
        }
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// 各計測のサンプルを定義順に返す。失敗は欠損サンプルになる
    pub fn compute(&self, frame_index: u64, timestamp_ms: u64, pose: &Pose) -> Vec<JointAngleSample> {
        self.measurements
            .iter()
            .map(|m| JointAngleSample {
                joint: m.id.clone(),
                frame_index,
                timestamp_ms,
                angle: m.measure(pose, self.confidence_threshold, self.space).ok(),
            })
            .collect()
    }

    /// 全関節を欠損としたサンプル（スキップしたフレーム用）
    pub fn missing(&self, frame_index: u64, timestamp_ms: u64) -> Vec<JointAngleSample> {
        self.measurements
            .iter()
            .map(|m| JointAngleSample {
                joint: m.id.clone(),
                frame_index,
                timestamp_ms,
                angle: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Keypoint;
    use KeypointIndex::*;

    fn leg(knee_x: f32, confidence: f32) -> Pose {
        let mut pose = Pose::default();
        pose.set(LeftShoulder, Keypoint::new(0.5, 0.1, 0.9));
        pose.set(RightShoulder, Keypoint::new(0.6, 0.1, 0.9));
        pose.set(LeftHip, Keypoint::new(0.5, 0.5, 0.9));
        pose.set(RightHip, Keypoint::new(0.6, 0.5, 0.9));
        pose.set(LeftKnee, Keypoint::new(knee_x, 0.7, confidence));
        pose.set(LeftAnkle, Keypoint::new(0.5, 0.9, 0.9));
        pose
    }

    #[test]
    fn test_vertex_measurement() {
        let knee = Measurement::vertex("left_knee", LeftHip, LeftKnee, LeftAnkle);
        let straight = knee.measure(&leg(0.5, 0.9), 0.5, AngleSpace::Planar).unwrap();
        assert_eq!(straight, 180.0);
        let bent = knee.measure(&leg(0.7, 0.9), 0.5, AngleSpace::Planar).unwrap();
        assert!((bent - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_low_confidence_joint() {
        let knee = Measurement::vertex("left_knee", LeftHip, LeftKnee, LeftAnkle);
        match knee.measure(&leg(0.5, 0.2), 0.5, AngleSpace::Planar) {
            Err(PipelineError::InsufficientConfidence { joint, .. }) => assert_eq!(joint, LeftKnee),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_midpoint_inclination() {
        let torso = Measurement::inclination(
            "torso",
            Anchor::Midpoint([LeftHip, RightHip]),
            Anchor::Midpoint([LeftShoulder, RightShoulder]),
            Axis::Vertical,
        );
        assert_eq!(torso.required_joints().len(), 4);
        let angle = torso.measure(&leg(0.5, 0.9), 0.5, AngleSpace::Planar).unwrap();
        assert_eq!(angle, 0.0);
    }

    #[test]
    fn test_engine_marks_missing_samples() {
        let engine = AngleEngine::new(
            vec![
                Measurement::vertex("left_knee", LeftHip, LeftKnee, LeftAnkle),
                Measurement::vertex("right_knee", RightHip, RightKnee, RightAnkle),
            ],
            0.5,
            AngleSpace::Planar,
        );
        let samples = engine.compute(4, 132, &leg(0.7, 0.9));
        assert_eq!(samples.len(), 2);
        assert!(samples[0].is_valid());
        assert!(!samples[1].is_valid());
        assert!(samples.iter().all(|s| s.frame_index == 4 && s.timestamp_ms == 132));

        let skipped = engine.missing(5, 165);
        assert!(skipped.iter().all(|s| !s.is_valid()));
    }

    #[test]
    fn test_definition_from_toml() {
        let src = r#"
            id = "torso"
            angle = { kind = "inclination", from = ["left_hip", "right_hip"], to = "nose", axis = "vertical" }
        "#;
        let m: Measurement = toml::from_str(src).unwrap();
        assert_eq!(
            m.angle,
            AngleDefinition::Inclination {
                from: Anchor::Midpoint([LeftHip, RightHip]),
                to: Anchor::Joint(Nose),
                axis: Axis::Vertical,
            }
        );
    }
}
