use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use rehab_tracker::config::Config;
use rehab_tracker::pose::{CapturedImage, Frame, PoseEstimator, ReplayEstimator};
use rehab_tracker::profile::catalog;
use rehab_tracker::protocol::{read_recording, RecordWriter, SessionRecord};
use rehab_tracker::runtime::SessionRegistry;
use rehab_tracker::{logging, ExerciseProfile, FeedbackEvent, Session};

const CONFIG_PATH: &str = "config.toml";

#[derive(Parser)]
#[command(name = "rehab-tracker", version = env!("BUILD_VERSION"), about = "Exercise form analysis and repetition counting")]
struct Cli {
    /// Configuration file (defaults are used when it does not exist)
    #[arg(long, short, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List built-in exercises
    Profiles,
    /// Show an exercise profile: instructions, common mistakes and rules
    Show {
        /// Built-in id or path to a profile TOML
        profile: String,
    },
    /// Run a recorded keypoint stream (JSON lines of frames) through a session
    Replay {
        /// Built-in id or path to a profile TOML
        #[arg(long, short)]
        profile: String,
        /// Frames as JSON lines, `-` for stdin
        #[arg(long, short)]
        input: PathBuf,
        #[arg(long, default_value = "replay")]
        session: String,
        /// Also write a bincode recording of frames and events
        #[arg(long)]
        record: Option<PathBuf>,
        /// Feed frames through the async worker (bounded queue, estimator timeout)
        #[arg(long)]
        queued: bool,
    },
    /// Print the events stored in a recording as JSON lines
    Inspect { recording: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    if let Some(path) = logging::init(&config.logging)? {
        eprintln!("Log: {}", path.display());
    }
    info!(version = env!("BUILD_VERSION"), "rehab-tracker starting");

    match cli.command {
        Command::Profiles => {
            for (id, name) in catalog::available() {
                println!("{:<12} {}", id, name);
            }
            Ok(())
        }
        Command::Show { profile } => show(&ExerciseProfile::resolve(&profile)?),
        Command::Replay {
            profile,
            input,
            session,
            record,
            queued,
        } => {
            let profile = ExerciseProfile::resolve(&profile)?;
            let frames = read_frames(&input)?;
            info!(frames = frames.len(), exercise = %profile.id, "replaying");
            let events = if queued {
                replay_queued(&config, &session, profile.clone(), &frames).await?
            } else {
                replay_direct(&config, &session, profile.clone(), &frames)?
            };

            let mut stdout = io::stdout().lock();
            for event in &events {
                writeln!(stdout, "{}", serde_json::to_string(event)?)?;
            }
            drop(stdout);

            let repetitions = events
                .iter()
                .filter(|e| matches!(e, FeedbackEvent::RepetitionCompleted { .. }))
                .count() as u32;
            eprintln!("{} frames, {} repetitions", frames.len(), repetitions);

            if let Some(path) = record {
                write_recording(&path, &session, &profile, &frames, &events, repetitions).await?;
                eprintln!("Recording: {}", path.display());
            }
            Ok(())
        }
        Command::Inspect { recording } => {
            let records = read_recording(&recording).await?;
            let mut stdout = io::stdout().lock();
            for record in &records {
                match record {
                    SessionRecord::Start { session, exercise, started_at } => {
                        eprintln!("session {} ({}) started {}", session, exercise, started_at)
                    }
                    SessionRecord::Frame(_) => {}
                    SessionRecord::Event(event) => writeln!(stdout, "{}", serde_json::to_string(event)?)?,
                    SessionRecord::End { repetitions, frames, .. } => {
                        eprintln!("{} frames, {} repetitions", frames, repetitions)
                    }
                }
            }
            Ok(())
        }
    }
}

fn show(profile: &ExerciseProfile) -> Result<()> {
    println!("{} ({})", profile.name, profile.id);
    if !profile.description.is_empty() {
        println!();
        println!("{}", profile.description);
    }
    if !profile.instructions.is_empty() {
        println!();
        println!("Instructions:");
        for (i, step) in profile.instructions.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }
    if !profile.common_mistakes.is_empty() {
        println!();
        println!("Common mistakes:");
        for mistake in &profile.common_mistakes {
            println!("  - {}", mistake);
        }
    }
    println!();
    println!("Rules:");
    for rule in &profile.rules {
        let phases = if rule.phases.is_empty() {
            "all phases".to_string()
        } else {
            format!("{:?}", rule.phases)
        };
        println!("  {:<20} {:?} during {} (penalty {})", rule.id, rule.check, phases, rule.penalty);
    }
    let r = &profile.repetition;
    println!();
    println!(
        "Repetition: {} {:?} start={} peak={}±{} K={} hold={}ms timeout={}ms",
        r.primary, r.direction, r.start, r.peak, r.peak_epsilon, r.debounce_frames, r.min_peak_hold_ms, r.tracking_timeout_ms
    );
    Ok(())
}

fn read_frames(path: &Path) -> Result<Vec<Frame>> {
    let reader: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(io::BufReader::new(io::stdin()))
    } else {
        let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Box::new(io::BufReader::new(file))
    };

    let mut frames = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: Frame = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid frame", path.display(), line_no + 1))?;
        frames.push(frame);
    }
    Ok(frames)
}

/// フレームを順に同期処理する
fn replay_direct(config: &Config, id: &str, profile: ExerciseProfile, frames: &[Frame]) -> Result<Vec<FeedbackEvent>> {
    let mut session = Session::new(id, profile, &config.session)?;
    let mut events = Vec::new();
    for frame in frames {
        match session.process(frame) {
            Ok(out) => events.extend(out),
            Err(e) if e.is_session_fatal() => {
                events.extend(session.finish());
                return Err(e).context("replay aborted");
            }
            Err(e) => warn!(frame = frame.index, error = %e, "frame skipped"),
        }
    }
    events.extend(session.finish());
    Ok(events)
}

/// 非同期ワーカー経由で処理する。Ctrl-C で中断
async fn replay_queued(
    config: &Config,
    id: &str,
    profile: ExerciseProfile,
    frames: &[Frame],
) -> Result<Vec<FeedbackEvent>> {
    let (mut registry, mut rx) = SessionRegistry::new(config.session.clone());
    let estimator: Arc<dyn PoseEstimator> = Arc::new(ReplayEstimator::new(frames.iter().cloned()));
    registry.start(id, profile, estimator)?;

    let outcome = tokio::select! {
        r = async {
            // 記録のタイムスタンプどおりの間隔で投入する
            let started = tokio::time::Instant::now();
            let origin = frames.first().map(|f| f.timestamp_ms).unwrap_or(0);
            for frame in frames {
                let offset = Duration::from_millis(frame.timestamp_ms.saturating_sub(origin));
                tokio::time::sleep_until(started + offset).await;
                let image = CapturedImage::new(frame.index, frame.timestamp_ms, 0, 0, Bytes::new());
                registry.submit(id, image)?;
            }
            Ok::<_, anyhow::Error>(registry.finish(id).await?)
        } => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    let report = match outcome {
        Some(r) => r?,
        None => {
            warn!("interrupted, stopping sessions");
            registry.shutdown_all().await;
            bail!("interrupted");
        }
    };
    info!(
        frames = report.frames_processed,
        dropped = report.frames_dropped,
        timeouts = report.estimator_timeouts,
        "queued replay finished"
    );

    drop(registry);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    Ok(events)
}

async fn write_recording(
    path: &Path,
    session: &str,
    profile: &ExerciseProfile,
    frames: &[Frame],
    events: &[FeedbackEvent],
    repetitions: u32,
) -> Result<()> {
    let mut writer = RecordWriter::create(path).await?;
    writer
        .write(&SessionRecord::Start {
            session: session.to_string(),
            exercise: profile.id.clone(),
            started_at: chrono::Local::now().to_rfc3339(),
        })
        .await?;

    // イベントを元フレームの直後に並べる
    let mut pending = events.iter().peekable();
    for frame in frames {
        writer.write(&SessionRecord::Frame(frame.clone())).await?;
        while let Some(event) = pending.next_if(|e| e.frame_index() <= frame.index) {
            writer.write(&SessionRecord::Event(event.clone())).await?;
        }
    }
    for event in pending {
        writer.write(&SessionRecord::Event(event.clone())).await?;
    }

    writer
        .write(&SessionRecord::End {
            session: session.to_string(),
            repetitions,
            frames: frames.len() as u64,
        })
        .await?;
    writer.close().await?;
    Ok(())
}
