//! 合成キーポイント列の生成（リプレイ・デモ用）
//!
//! 関節角度の軌跡から姿勢を組み立て、JSON lines の `Frame` として書き出す。
//! 乱数は固定シードなので同じ引数なら同じ出力になる。

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use rehab_tracker::pose::{Frame, Keypoint, KeypointIndex, KeypointIndex::*, Pose};

/// 大腿・下腿の長さ（画像座標）
const SEGMENT: f32 = 0.2;
const TORSO: f32 = 0.3;
const UPPER_ARM: f32 = 0.17;
const FOREARM: f32 = 0.15;
/// 左右の関節の横ずれ
const SIDE_OFFSET: f32 = 0.1;
const CONFIDENCE: f32 = 0.9;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Exercise {
    Squat,
    ElbowCurl,
}

#[derive(Parser)]
#[command(about = "Generate a synthetic keypoint stream (JSON lines of frames)")]
struct Args {
    #[arg(long, value_enum, default_value = "squat")]
    exercise: Exercise,
    #[arg(long, default_value_t = 3)]
    reps: u32,
    #[arg(long, default_value_t = 30)]
    frames_per_rep: u32,
    #[arg(long, default_value_t = 30.0)]
    fps: f32,
    /// 角度ノイズの振幅（度）
    #[arg(long, default_value_t = 0.0)]
    noise: f32,
    /// 最も曲げたときの角度（度）。省略時はエクササイズごとの正しい値
    #[arg(long)]
    depth: Option<f32>,
    /// N フレームごとに主要関節を遮蔽する（0 で無効）
    #[arg(long, default_value_t = 0)]
    occlude_every: u64,
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// 出力先（省略時は stdout）
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn set_pair(pose: &mut Pose, left: KeypointIndex, right: KeypointIndex, x: f32, y: f32) {
    pose.set(left, Keypoint::new(x, y, CONFIDENCE));
    pose.set(right, Keypoint::new(x + SIDE_OFFSET, y, CONFIDENCE));
}

/// 横向きスクワット。足首固定、膝角度 `knee` (度)
fn squat_pose(knee: f32) -> Pose {
    let mut pose = Pose::default();
    let phi = (180.0 - knee).to_radians() / 2.0;
    let ankle = (0.45, 0.9);
    let knee_pos = (ankle.0 + SEGMENT * phi.sin(), ankle.1 - SEGMENT * phi.cos());
    let hip = (knee_pos.0 - SEGMENT * phi.sin(), knee_pos.1 - SEGMENT * phi.cos());
    // 深くしゃがむほど上体が前傾する
    let lean = (180.0 - knee).to_radians() * 0.3;
    let shoulder = (hip.0 + TORSO * lean.sin(), hip.1 - TORSO * lean.cos());

    set_pair(&mut pose, LeftAnkle, RightAnkle, ankle.0, ankle.1);
    set_pair(&mut pose, LeftKnee, RightKnee, knee_pos.0, knee_pos.1);
    set_pair(&mut pose, LeftHip, RightHip, hip.0, hip.1);
    set_pair(&mut pose, LeftShoulder, RightShoulder, shoulder.0, shoulder.1);
    pose.set(Nose, Keypoint::new(shoulder.0 + 0.05, shoulder.1 - 0.08, CONFIDENCE));
    pose
}

/// 横向きの肘屈曲。上腕は体側に固定、肘角度 `elbow` (度)
fn elbow_curl_pose(elbow: f32) -> Pose {
    let mut pose = Pose::default();
    let shoulder = (0.5, 0.35);
    let hip = (shoulder.0, shoulder.1 + TORSO);
    let elbow_pos = (shoulder.0, shoulder.1 + UPPER_ARM);
    let theta = elbow.to_radians();
    let wrist = (elbow_pos.0 + FOREARM * theta.sin(), elbow_pos.1 - FOREARM * theta.cos());

    set_pair(&mut pose, LeftShoulder, RightShoulder, shoulder.0, shoulder.1);
    set_pair(&mut pose, LeftHip, RightHip, hip.0, hip.1);
    set_pair(&mut pose, LeftElbow, RightElbow, elbow_pos.0, elbow_pos.1);
    set_pair(&mut pose, LeftWrist, RightWrist, wrist.0, wrist.1);
    pose.set(Nose, Keypoint::new(shoulder.0 + 0.05, shoulder.1 - 0.1, CONFIDENCE));
    pose
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.frames_per_rep < 2 || args.fps <= 0.0 {
        bail!("frames-per-rep must be >= 2 and fps > 0");
    }

    let (rest, bottom, build, primary): (f32, f32, fn(f32) -> Pose, KeypointIndex) = match args.exercise {
        Exercise::Squat => (170.0, args.depth.unwrap_or(90.0), squat_pose, LeftKnee),
        Exercise::ElbowCurl => (170.0, args.depth.unwrap_or(45.0), elbow_curl_pose, LeftElbow),
    };

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let frame_ms = 1000.0 / args.fps;
    let total = (args.reps * args.frames_per_rep) as u64;
    for index in 0..total {
        let t = (index % args.frames_per_rep as u64) as f32 / (args.frames_per_rep - 1) as f32;
        let angle = rest - (rest - bottom) * (1.0 - (2.0 * PI * t).cos()) / 2.0;
        let angle = angle + args.noise * rng.gen_range(-1.0f32..1.0);

        let mut pose = build(angle);
        if args.occlude_every > 0 && index > 0 && index % args.occlude_every == 0 {
            pose.set(primary, Keypoint::default());
        }

        let frame = Frame::new(index, (index as f32 * frame_ms).round() as u64, pose);
        writeln!(out, "{}", serde_json::to_string(&frame)?)?;
    }
    out.flush()?;

    eprintln!("{} frames ({} reps)", total, args.reps);
    Ok(())
}
