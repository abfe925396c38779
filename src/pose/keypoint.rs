use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// COCO 17 キーポイントインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointIndex; Self::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 設定ファイル・イベントで使う名前 (snake_case)
    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

impl fmt::Display for KeypointIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeypointIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown joint '{}'", s))
    }
}

/// 単一キーポイント
///
/// 推定器が出力した座標をそのまま保持する。2D推定器の場合 z は 0。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, z: 0.0, confidence }
    }

    /// 信頼度が閾値以上か。信頼度 0 は未検出なので閾値に関係なく無効
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence > 0.0 && self.confidence >= threshold
    }

    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// 推定器の契約 (confidence ∈ [0,1], 有限座標) を満たすか
    pub fn is_well_formed(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
            && self.x.is_finite()
            && self.y.is_finite()
            && self.z.is_finite()
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            confidence: 0.0,
        }
    }
}

/// 17キーポイントからなる姿勢
///
/// 遮蔽されたキーポイントは confidence 0 で表す。シリアライズ時は
/// joint名 → キーポイントのマップになり、confidence 0 の点は省略される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<KeypointIndex, Keypoint>", into = "BTreeMap<KeypointIndex, Keypoint>")]
pub struct Pose {
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
}

impl Pose {
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT]) -> Self {
        Self { keypoints }
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    pub fn set(&mut self, index: KeypointIndex, keypoint: Keypoint) {
        self.keypoints[index as usize] = keypoint;
    }

    /// 契約違反のキーポイントを探す
    pub fn first_malformed(&self) -> Option<KeypointIndex> {
        KeypointIndex::ALL
            .iter()
            .copied()
            .find(|&idx| !self.get(idx).is_well_formed())
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            keypoints: [Keypoint::default(); KeypointIndex::COUNT],
        }
    }
}

impl From<BTreeMap<KeypointIndex, Keypoint>> for Pose {
    fn from(map: BTreeMap<KeypointIndex, Keypoint>) -> Self {
        let mut pose = Pose::default();
        for (idx, kp) in map {
            pose.set(idx, kp);
        }
        pose
    }
}

impl From<Pose> for BTreeMap<KeypointIndex, Keypoint> {
    fn from(pose: Pose) -> Self {
        KeypointIndex::ALL
            .iter()
            .map(|&idx| (idx, *pose.get(idx)))
            .filter(|(_, kp)| kp.confidence > 0.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_index_count() {
        assert_eq!(KeypointIndex::COUNT, 17);
        assert_eq!(KeypointIndex::ALL.len(), KeypointIndex::COUNT);
    }

    #[test]
    fn test_keypoint_index_from_index() {
        assert_eq!(KeypointIndex::from_index(0), Some(KeypointIndex::Nose));
        assert_eq!(KeypointIndex::from_index(16), Some(KeypointIndex::RightAnkle));
        assert_eq!(KeypointIndex::from_index(17), None);
        for (i, idx) in KeypointIndex::ALL.iter().enumerate() {
            assert_eq!(*idx as usize, i);
        }
    }

    #[test]
    fn test_name_roundtrip_with_serde_names() {
        for idx in KeypointIndex::ALL {
            assert_eq!(idx.name().parse::<KeypointIndex>(), Ok(idx));
            let json = serde_json::to_string(&idx).unwrap();
            assert_eq!(json, format!("\"{}\"", idx.name()));
        }
        assert!("left_toe".parse::<KeypointIndex>().is_err());
    }

    #[test]
    fn test_keypoint_is_valid() {
        let kp = Keypoint::new(0.5, 0.5, 0.7);
        assert!(kp.is_valid(0.5));
        assert!(!kp.is_valid(0.8));
    }

    #[test]
    fn test_undetected_keypoint_never_valid() {
        let absent = Keypoint::default();
        assert!(!absent.is_valid(0.0));
        assert!(!absent.is_valid(0.5));
        assert!(Keypoint::new(0.5, 0.5, 0.01).is_valid(0.0));
    }

    #[test]
    fn test_keypoint_well_formed() {
        assert!(Keypoint::new(0.5, 0.5, 1.0).is_well_formed());
        assert!(!Keypoint::new(0.5, 0.5, 1.2).is_well_formed());
        assert!(!Keypoint::new(0.5, 0.5, -0.1).is_well_formed());
        assert!(!Keypoint::new(f32::NAN, 0.5, 0.9).is_well_formed());
    }

    #[test]
    fn test_pose_set_and_valid() {
        let mut pose = Pose::default();
        pose.set(KeypointIndex::LeftWrist, Keypoint::new(0.62, 0.41, 0.9));
        pose.set(KeypointIndex::RightWrist, Keypoint::new(0.38, 0.41, 0.2));

        assert_eq!(pose.get(KeypointIndex::LeftWrist).position(), [0.62, 0.41, 0.0]);
        assert!(pose.get(KeypointIndex::LeftWrist).is_valid(0.5));
        assert!(!pose.get(KeypointIndex::RightWrist).is_valid(0.5));
        assert!(!pose.get(KeypointIndex::Nose).is_valid(0.0));
    }

    #[test]
    fn test_pose_serializes_as_joint_map() {
        let mut pose = Pose::default();
        pose.set(KeypointIndex::LeftKnee, Keypoint::new(0.4, 0.7, 0.95));

        let json = serde_json::to_string(&pose).unwrap();
        assert!(json.contains("left_knee"));
        assert!(!json.contains("nose"));

        let parsed: Pose = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, pose);
    }

    #[test]
    fn test_pose_deserialize_without_z() {
        let json = r#"{"left_hip": {"x": 0.1, "y": 0.2, "confidence": 0.8}}"#;
        let pose: Pose = serde_json::from_str(json).unwrap();
        let hip = pose.get(KeypointIndex::LeftHip);
        assert_eq!(hip.z, 0.0);
        assert_eq!(hip.confidence, 0.8);
        assert_eq!(pose.first_malformed(), None);
    }
}
