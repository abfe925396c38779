//! 組み込みエクササイズ
//!
//! 閾値はどれも控えめな初期値で、実際の処方値は TOML プロファイルで上書きする。

use super::ExerciseProfile;
use crate::analysis::{Anchor, AngleSpace, Axis, Measurement};
use crate::config::{SmoothingConfig, SmoothingMethod};
use crate::form::FormRule;
use crate::pose::KeypointIndex::*;
use crate::tracker::{Direction, Phase, RepetitionThresholds};

pub const IDS: [&str; 6] = [
    "cat_cow",
    "chest_opener",
    "elbow_curl",
    "neck_side_to_side",
    "squat",
    "wall_angels",
];

/// 反復中（Idle 以外）のフェーズ
const MOVING: [Phase; 3] = [Phase::Ascending, Phase::Peak, Phase::Descending];

pub fn builtin(id: &str) -> Option<ExerciseProfile> {
    match id {
        "squat" => Some(squat()),
        "wall_angels" => Some(wall_angels()),
        "elbow_curl" => Some(elbow_curl()),
        "chest_opener" => Some(chest_opener()),
        "cat_cow" => Some(cat_cow()),
        "neck_side_to_side" => Some(neck_side_to_side()),
        _ => None,
    }
}

/// (id, 表示名) の一覧
pub fn available() -> Vec<(&'static str, String)> {
    IDS.iter()
        .filter_map(|id| builtin(id).map(|p| (*id, p.name)))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// 腰中点 → 肩中点 の鉛直からの傾き
fn torso() -> Measurement {
    Measurement::inclination(
        "torso",
        Anchor::Midpoint([LeftHip, RightHip]),
        Anchor::Midpoint([LeftShoulder, RightShoulder]),
        Axis::Vertical,
    )
}

fn squat() -> ExerciseProfile {
    ExerciseProfile {
        id: "squat".to_string(),
        name: "Bodyweight Squat".to_string(),
        description: "Lower the hips until the thighs are parallel to the floor and stand back up, \
                      keeping the chest up and both knees bending evenly."
            .to_string(),
        instructions: strings(&[
            "Stand side-on to the camera, feet shoulder-width apart",
            "Bend the knees and push the hips back until the thighs are parallel",
            "Pause briefly at the bottom",
            "Drive through the heels to stand up straight",
        ]),
        common_mistakes: strings(&[
            "Stopping well above parallel",
            "Leaning the chest far forward",
            "Shifting weight onto one leg",
        ]),
        space: AngleSpace::Planar,
        measurements: vec![
            Measurement::vertex("left_knee", LeftHip, LeftKnee, LeftAnkle),
            Measurement::vertex("right_knee", RightHip, RightKnee, RightAnkle),
            torso(),
        ],
        rules: vec![
            FormRule::range("knee_depth", "left_knee", 80.0, 100.0)
                .during(&[Phase::Peak])
                .with_cue("Squat down until your thighs are parallel to the floor"),
            FormRule::symmetry("knee_symmetry", "left_knee", "right_knee", 15.0)
                .during(&MOVING)
                .with_cue("Bend both knees evenly")
                .with_penalty(15.0),
            FormRule::range("torso_lean", "torso", 0.0, 45.0)
                .during(&MOVING)
                .with_cue("Keep your chest up"),
        ],
        repetition: RepetitionThresholds::new("left_knee", Direction::Decreasing, 150.0, 90.0)
            .with_peak_epsilon(10.0),
        smoothing: SmoothingConfig {
            method: SmoothingMethod::Exponential,
            alpha: 0.6,
            ..SmoothingConfig::default()
        },
    }
}

fn wall_angels() -> ExerciseProfile {
    ExerciseProfile {
        id: "wall_angels".to_string(),
        name: "Wall Angels".to_string(),
        description: "Shoulder mobility exercise performed with the back against a wall. \
                      Slide the arms up and down the wall while keeping the back flat \
                      and both arms moving together."
            .to_string(),
        instructions: strings(&[
            "Stand with your back, head and hips against a wall, facing the camera",
            "Raise both arms to shoulder level with elbows bent",
            "Slide the arms up the wall until they are overhead",
            "Slide back down to shoulder level with control",
        ]),
        common_mistakes: strings(&[
            "Arching the lower back away from the wall",
            "One arm rising faster than the other",
            "Stopping before the arms are overhead",
        ]),
        space: AngleSpace::Planar,
        measurements: vec![
            Measurement::vertex("left_arm", LeftHip, LeftShoulder, LeftElbow),
            Measurement::vertex("right_arm", RightHip, RightShoulder, RightElbow),
            torso(),
        ],
        rules: vec![
            FormRule::range("left_arm_overhead", "left_arm", 155.0, 180.0)
                .during(&[Phase::Peak])
                .with_cue("Reach all the way overhead")
                .with_penalty(15.0),
            FormRule::range("right_arm_overhead", "right_arm", 155.0, 180.0)
                .during(&[Phase::Peak])
                .with_cue("Reach all the way overhead")
                .with_penalty(15.0),
            FormRule::symmetry("arm_symmetry", "left_arm", "right_arm", 20.0)
                .during(&MOVING)
                .with_cue("Keep your arms symmetrical")
                .with_penalty(15.0),
            FormRule::range("back_flat", "torso", 0.0, 15.0).with_cue("Keep your back flat against the wall"),
        ],
        repetition: RepetitionThresholds::new("left_arm", Direction::Increasing, 110.0, 170.0)
            .with_peak_epsilon(10.0),
        smoothing: SmoothingConfig::default(),
    }
}

fn elbow_curl() -> ExerciseProfile {
    ExerciseProfile {
        id: "elbow_curl".to_string(),
        name: "Elbow Curl".to_string(),
        description: "Bend the elbow to bring the hand toward the shoulder and lower it again, \
                      keeping the upper arm still at the side."
            .to_string(),
        instructions: strings(&[
            "Stand side-on to the camera with the left arm relaxed at your side",
            "Bend the elbow to bring the hand up to the shoulder",
            "Lower the hand slowly until the arm is straight",
        ]),
        common_mistakes: strings(&[
            "Swinging the upper arm forward",
            "Stopping halfway up",
        ]),
        space: AngleSpace::Planar,
        measurements: vec![
            Measurement::vertex("elbow", LeftShoulder, LeftElbow, LeftWrist),
            Measurement::vertex("upper_arm", LeftHip, LeftShoulder, LeftElbow),
        ],
        rules: vec![
            FormRule::range("curl_top", "elbow", 30.0, 60.0)
                .during(&[Phase::Peak])
                .with_cue("Curl all the way up to the shoulder"),
            FormRule::range("elbow_pinned", "upper_arm", 0.0, 30.0)
                .during(&MOVING)
                .with_cue("Keep your elbow at your side"),
        ],
        repetition: RepetitionThresholds::new("elbow", Direction::Decreasing, 150.0, 45.0)
            .with_peak_epsilon(10.0),
        smoothing: SmoothingConfig {
            method: SmoothingMethod::OneEuro,
            ..SmoothingConfig::default()
        },
    }
}

/// 正面向き。肩 → 肘 の鉛直からの角度（肘が肩の高さで 90°、下がるほど大きい）
fn chest_opener() -> ExerciseProfile {
    ExerciseProfile {
        id: "chest_opener".to_string(),
        name: "Chest Opener (Scapular Retraction)".to_string(),
        description: "Start with the elbows at shoulder height, lower them below the shoulders \
                      while squeezing the shoulder blades together, hold, then return. \
                      Strengthens the rhomboids and middle trapezius."
            .to_string(),
        instructions: strings(&[
            "Face the camera with both elbows raised to shoulder height",
            "Pull the elbows down and back below shoulder level",
            "Hold the bottom position for 2 seconds",
            "Raise the elbows back to shoulder height",
        ]),
        common_mistakes: strings(&[
            "Releasing the hold too early",
            "Lowering one arm more than the other",
            "Leaning back instead of squeezing the shoulder blades",
        ]),
        space: AngleSpace::Planar,
        measurements: vec![
            Measurement::inclination(
                "left_upper_arm",
                Anchor::Joint(LeftShoulder),
                Anchor::Joint(LeftElbow),
                Axis::Vertical,
            ),
            Measurement::inclination(
                "right_upper_arm",
                Anchor::Joint(RightShoulder),
                Anchor::Joint(RightElbow),
                Axis::Vertical,
            ),
            torso(),
        ],
        rules: vec![
            FormRule::range("elbows_lowered", "left_upper_arm", 120.0, 170.0)
                .during(&[Phase::Peak])
                .with_cue("Lower your elbows below shoulder level, keep them off your sides"),
            FormRule::symmetry("arm_symmetry", "left_upper_arm", "right_upper_arm", 15.0)
                .during(&MOVING)
                .with_cue("Move both elbows together")
                .with_penalty(15.0),
            FormRule::range("torso_upright", "torso", 0.0, 15.0)
                .during(&MOVING)
                .with_cue("Stay upright, squeeze your shoulder blades"),
        ],
        repetition: RepetitionThresholds::new("left_upper_arm", Direction::Increasing, 100.0, 135.0)
            .with_peak_epsilon(15.0)
            .with_min_peak_hold(2000),
        smoothing: SmoothingConfig {
            method: SmoothingMethod::Exponential,
            alpha: 0.5,
            ..SmoothingConfig::default()
        },
    }
}

/// 横向きの四つ這い。腰中点 → 肩中点 の傾き（テーブルトップで 90°、背中を丸めると増える）
fn cat_cow() -> ExerciseProfile {
    ExerciseProfile {
        id: "cat_cow".to_string(),
        name: "Cat-Cow".to_string(),
        description: "On hands and knees, round the spine up toward the ceiling (cat) and \
                      return through neutral with slow, controlled breathing. \
                      Improves spinal flexibility and symmetry."
            .to_string(),
        instructions: strings(&[
            "Kneel side-on to the camera with hands under shoulders and knees under hips",
            "Exhale and round your back up toward the ceiling",
            "Inhale and let the back return through neutral",
            "Move slowly, about 3 seconds per transition",
        ]),
        common_mistakes: strings(&[
            "Hands drifting away from under the shoulders",
            "Hips shifting forward or back over the knees",
            "Forcing the spine past a comfortable range",
        ]),
        space: AngleSpace::Planar,
        measurements: vec![
            Measurement::inclination(
                "spine",
                Anchor::Midpoint([LeftHip, RightHip]),
                Anchor::Midpoint([LeftShoulder, RightShoulder]),
                Axis::Vertical,
            ),
            Measurement::inclination(
                "thigh",
                Anchor::Midpoint([LeftHip, RightHip]),
                Anchor::Midpoint([LeftKnee, RightKnee]),
                Axis::Vertical,
            ),
            Measurement::inclination(
                "arm",
                Anchor::Midpoint([LeftShoulder, RightShoulder]),
                Anchor::Midpoint([LeftWrist, RightWrist]),
                Axis::Vertical,
            ),
        ],
        rules: vec![
            FormRule::range("spine_range", "spine", 100.0, 125.0)
                .during(&[Phase::Peak])
                .with_cue("Round your back gently, don't force it"),
            FormRule::range("hips_over_knees", "thigh", 165.0, 180.0)
                .during(&MOVING)
                .with_cue("Keep your hips above your knees")
                .with_penalty(15.0),
            FormRule::range("shoulders_over_wrists", "arm", 165.0, 180.0)
                .during(&MOVING)
                .with_cue("Keep your hands under your shoulders")
                .with_penalty(15.0),
        ],
        repetition: RepetitionThresholds::new("spine", Direction::Increasing, 100.0, 120.0).with_peak_epsilon(5.0),
        smoothing: SmoothingConfig {
            method: SmoothingMethod::MovingAverage,
            window: 7,
            ..SmoothingConfig::default()
        },
    }
}

/// 正面向き。肩中点 → 鼻 の鉛直からの傾き。左右どちらに倒しても 1 回と数える
fn neck_side_to_side() -> ExerciseProfile {
    ExerciseProfile {
        id: "neck_side_to_side".to_string(),
        name: "Neck Side to Side".to_string(),
        description: "Lateral neck flexion. Tilt the head toward one shoulder, return to centre, \
                      then tilt toward the other side while the shoulders stay level."
            .to_string(),
        instructions: strings(&[
            "Sit or stand facing the camera with the shoulders relaxed",
            "Tilt your ear toward one shoulder",
            "Return to centre, then tilt toward the other side",
        ]),
        common_mistakes: strings(&[
            "Lifting the shoulder up to meet the ear",
            "Leaning the whole upper body instead of the head",
        ]),
        space: AngleSpace::Planar,
        measurements: vec![
            Measurement::inclination(
                "head_tilt",
                Anchor::Midpoint([LeftShoulder, RightShoulder]),
                Anchor::Joint(Nose),
                Axis::Vertical,
            ),
            torso(),
        ],
        rules: vec![
            FormRule::range("tilt_range", "head_tilt", 20.0, 45.0)
                .during(&[Phase::Peak])
                .with_cue("Tilt your ear toward your shoulder"),
            FormRule::range("torso_still", "torso", 0.0, 10.0)
                .during(&MOVING)
                .with_cue("Keep your shoulders still and move only your head")
                .with_penalty(15.0),
        ],
        repetition: RepetitionThresholds::new("head_tilt", Direction::Increasing, 10.0, 25.0).with_peak_epsilon(5.0),
        smoothing: SmoothingConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, KeypointIndex, Pose};
    use crate::tracker::Zone;

    fn pose(points: &[(KeypointIndex, f32, f32)]) -> Pose {
        let mut pose = Pose::default();
        for &(joint, x, y) in points {
            pose.set(joint, Keypoint::new(x, y, 0.9));
        }
        pose
    }

    fn angle(profile: &ExerciseProfile, id: &str, pose: &Pose) -> f32 {
        profile.measurement(id).unwrap().measure(pose, 0.5, profile.space).unwrap()
    }

    #[test]
    fn test_all_builtins_validate() {
        for id in IDS {
            let profile = builtin(id).unwrap();
            assert_eq!(profile.id, id);
            profile.validate().unwrap();
            assert!(!profile.instructions.is_empty());
        }
    }

    #[test]
    fn test_available_lists_names() {
        let available = available();
        assert_eq!(available.len(), IDS.len());
        assert!(available.contains(&("wall_angels", "Wall Angels".to_string())));
    }

    #[test]
    fn test_chest_opener_requires_hold() {
        let profile = builtin("chest_opener").unwrap();
        assert_eq!(profile.repetition.min_peak_hold_ms, 2000);

        // 肘が肩の高さ: 開始位置
        let start = pose(&[(LeftShoulder, 0.4, 0.3), (LeftElbow, 0.25, 0.3)]);
        let a = angle(&profile, "left_upper_arm", &start);
        assert!((a - 90.0).abs() < 1e-3, "{}", a);
        assert_eq!(profile.repetition.zone(a), Zone::Rest);

        // 肘を肩より下げて斜め 45°
        let lowered = pose(&[(LeftShoulder, 0.4, 0.3), (LeftElbow, 0.3, 0.4)]);
        let a = angle(&profile, "left_upper_arm", &lowered);
        assert!((a - 135.0).abs() < 1e-3, "{}", a);
        assert_eq!(profile.repetition.zone(a), Zone::Peak);
    }

    #[test]
    fn test_cat_cow_spine_from_midpoints() {
        let profile = builtin("cat_cow").unwrap();
        let tabletop = [
            (LeftShoulder, 0.3, 0.5),
            (RightShoulder, 0.32, 0.5),
            (LeftHip, 0.7, 0.5),
            (RightHip, 0.72, 0.5),
            (LeftKnee, 0.7, 0.8),
            (RightKnee, 0.72, 0.8),
        ];
        let a = angle(&profile, "spine", &pose(&tabletop));
        assert!((a - 90.0).abs() < 1e-3, "{}", a);
        assert_eq!(profile.repetition.zone(a), Zone::Rest);
        assert!((angle(&profile, "thigh", &pose(&tabletop)) - 180.0).abs() < 1e-3);

        let mut rounded = tabletop;
        rounded[0].2 = 0.7;
        rounded[1].2 = 0.7;
        let a = angle(&profile, "spine", &pose(&rounded));
        assert!(a > 115.0 && a < 125.0, "{}", a);
        assert_eq!(profile.repetition.zone(a), Zone::Peak);
    }

    #[test]
    fn test_neck_tilt_counts_either_side() {
        let profile = builtin("neck_side_to_side").unwrap();
        let shoulders = [(LeftShoulder, 0.4, 0.4), (RightShoulder, 0.6, 0.4)];

        let mut centre = shoulders.to_vec();
        centre.push((Nose, 0.5, 0.25));
        let a = angle(&profile, "head_tilt", &pose(&centre));
        assert!(a.abs() < 1e-3, "{}", a);

        for nose_x in [0.57, 0.43] {
            let mut tilted = shoulders.to_vec();
            tilted.push((Nose, nose_x, 0.28));
            let a = angle(&profile, "head_tilt", &pose(&tilted));
            assert!((a - 30.26).abs() < 0.1, "{}", a);
            assert_eq!(profile.repetition.zone(a), Zone::Peak);
        }
    }

    #[test]
    fn test_unknown_id() {
        assert!(builtin("jumping_jacks").is_none());
    }
}
