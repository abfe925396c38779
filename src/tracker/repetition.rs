//! Repetition counter.
//!
//! The counter is a pure state machine: [`step`] maps the current
//! [`RepetitionState`] and one smoothed primary-joint sample to the next state
//! plus the events it produced. [`RepetitionCounter`] owns one state per session.
//!
//! Cycle: Idle → Ascending → Peak → Descending → Idle. A candidate transition is
//! committed only after it has been observed on `debounce_frames` consecutive
//! valid samples. Prolonged missing signal moves any phase to Aborted.
//!
//! Hold exercises set `min_peak_hold_ms`: Peak is confirmed only once the
//! signal has stayed in the peak zone that long, so leaving early abandons the
//! attempt instead of counting it.

use serde::{Deserialize, Serialize};

/// Repetition phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Ascending,
    Peak,
    Descending,
    Aborted,
}

/// Which way the primary angle moves when leaving the rest position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// e.g. shoulder abduction: angle grows toward the peak
    Increasing,
    /// e.g. knee flexion in a squat: angle shrinks toward the peak
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepetitionThresholds {
    /// Measurement id driving the counter
    pub primary: String,
    pub direction: Direction,
    /// Crossing this bound leaves the rest position (degrees)
    pub start: f32,
    /// Target extremum of the movement (degrees)
    pub peak: f32,
    /// Within this distance of `peak` (or beyond it) counts as at peak
    #[serde(default = "default_peak_epsilon")]
    pub peak_epsilon: f32,
    /// Consecutive frames a candidate transition must persist (K)
    #[serde(default = "default_debounce_frames")]
    pub debounce_frames: u32,
    /// Missing primary signal for this long aborts the repetition
    #[serde(default = "default_tracking_timeout_ms")]
    pub tracking_timeout_ms: u64,
    /// Time the peak zone must be held before Peak is committed (0 = no hold)
    #[serde(default)]
    pub min_peak_hold_ms: u64,
}

fn default_peak_epsilon() -> f32 { 5.0 }
fn default_debounce_frames() -> u32 { 3 }
fn default_tracking_timeout_ms() -> u64 { 2000 }

/// Where a sample lies relative to the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Rest,
    Moving,
    Peak,
}

impl RepetitionThresholds {
    pub fn new(primary: &str, direction: Direction, start: f32, peak: f32) -> Self {
        Self {
            primary: primary.to_string(),
            direction,
            start,
            peak,
            peak_epsilon: default_peak_epsilon(),
            debounce_frames: default_debounce_frames(),
            tracking_timeout_ms: default_tracking_timeout_ms(),
            min_peak_hold_ms: 0,
        }
    }

    pub fn with_peak_epsilon(mut self, epsilon: f32) -> Self {
        self.peak_epsilon = epsilon;
        self
    }

    pub fn with_debounce(mut self, frames: u32) -> Self {
        self.debounce_frames = frames;
        self
    }

    pub fn with_tracking_timeout(mut self, timeout_ms: u64) -> Self {
        self.tracking_timeout_ms = timeout_ms;
        self
    }

    pub fn with_min_peak_hold(mut self, hold_ms: u64) -> Self {
        self.min_peak_hold_ms = hold_ms;
        self
    }

    /// Movement progress: grows as the body moves away from rest.
    fn progress(&self, angle: f32) -> f32 {
        match self.direction {
            Direction::Increasing => angle,
            Direction::Decreasing => -angle,
        }
    }

    pub fn zone(&self, angle: f32) -> Zone {
        let p = self.progress(angle);
        if p >= self.progress(self.peak) - self.peak_epsilon {
            Zone::Peak
        } else if p > self.progress(self.start) {
            Zone::Moving
        } else {
            Zone::Rest
        }
    }
}

/// A transition waiting out the debounce window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransition {
    pub target: Phase,
    pub frames: u32,
    /// Timestamp of the first frame that proposed `target`
    pub since_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionState {
    pub phase: Phase,
    pub count: u32,
    pub last_transition_ms: Option<u64>,
    pub pending: Option<PendingTransition>,
    /// Timestamp of the last valid sample (or of the first missing one if none yet)
    pub last_seen_ms: Option<u64>,
}

impl Default for RepetitionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            count: 0,
            last_transition_ms: None,
            pending: None,
            last_seen_ms: None,
        }
    }
}

impl RepetitionState {
    /// Phase the signal is currently in: the pending candidate if any, else the
    /// committed phase. A pending return to Idle from the bottom of the movement
    /// reads as Descending.
    pub fn observed_phase(&self) -> Phase {
        match self.pending {
            Some(PendingTransition { target: Phase::Idle, .. })
                if matches!(self.phase, Phase::Peak | Phase::Descending) =>
            {
                Phase::Descending
            }
            Some(p) => p.target,
            None => self.phase,
        }
    }
}

/// One primary-joint sample fed to the counter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalInput {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub value: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CounterEvent {
    Transition {
        from: Phase,
        to: Phase,
        frame_index: u64,
        timestamp_ms: u64,
    },
    Completed {
        count: u32,
        frame_index: u64,
        timestamp_ms: u64,
    },
}

fn candidate(phase: Phase, zone: Zone) -> Option<Phase> {
    match (phase, zone) {
        (Phase::Idle, Zone::Rest) => None,
        (Phase::Idle, _) => Some(Phase::Ascending),
        (Phase::Ascending, Zone::Rest) => Some(Phase::Idle),
        (Phase::Ascending, Zone::Moving) => None,
        (Phase::Ascending, Zone::Peak) => Some(Phase::Peak),
        (Phase::Peak, Zone::Peak) => None,
        (Phase::Peak, Zone::Moving) => Some(Phase::Descending),
        (Phase::Peak, Zone::Rest) => Some(Phase::Idle),
        (Phase::Descending, Zone::Rest) => Some(Phase::Idle),
        (Phase::Descending, Zone::Moving) => None,
        (Phase::Descending, Zone::Peak) => Some(Phase::Peak),
        (Phase::Aborted, _) => Some(Phase::Idle),
    }
}

/// Pure transition function.
pub fn step(
    state: &RepetitionState,
    thresholds: &RepetitionThresholds,
    input: SignalInput,
) -> (RepetitionState, Vec<CounterEvent>) {
    let mut next = state.clone();
    let mut events = Vec::new();
    let transition = |next: &mut RepetitionState, events: &mut Vec<CounterEvent>, to: Phase| {
        events.push(CounterEvent::Transition {
            from: next.phase,
            to,
            frame_index: input.frame_index,
            timestamp_ms: input.timestamp_ms,
        });
        next.phase = to;
        next.last_transition_ms = Some(input.timestamp_ms);
        next.pending = None;
    };

    let Some(value) = input.value else {
        // 欠損はデバウンスの連続を断つ
        next.pending = None;
        let since = *next.last_seen_ms.get_or_insert(input.timestamp_ms);
        let elapsed = input.timestamp_ms.saturating_sub(since);
        if next.phase != Phase::Aborted && elapsed >= thresholds.tracking_timeout_ms {
            transition(&mut next, &mut events, Phase::Aborted);
        }
        return (next, events);
    };
    next.last_seen_ms = Some(input.timestamp_ms);

    // Aborted は次の有効サンプルで即座に Idle へ戻る
    if next.phase == Phase::Aborted {
        transition(&mut next, &mut events, Phase::Idle);
        return (next, events);
    }

    let Some(target) = candidate(next.phase, thresholds.zone(value)) else {
        next.pending = None;
        return (next, events);
    };

    let (frames, since_ms) = match next.pending {
        Some(p) if p.target == target => (p.frames.saturating_add(1), p.since_ms),
        _ => (1, input.timestamp_ms),
    };
    let held = target != Phase::Peak
        || input.timestamp_ms.saturating_sub(since_ms) >= thresholds.min_peak_hold_ms;
    if frames < thresholds.debounce_frames.max(1) || !held {
        next.pending = Some(PendingTransition { target, frames, since_ms });
        return (next, events);
    }

    let from = next.phase;
    if target == Phase::Idle && from == Phase::Peak {
        transition(&mut next, &mut events, Phase::Descending);
    }
    transition(&mut next, &mut events, target);
    if target == Phase::Idle && matches!(from, Phase::Peak | Phase::Descending) {
        next.count += 1;
        events.push(CounterEvent::Completed {
            count: next.count,
            frame_index: input.frame_index,
            timestamp_ms: input.timestamp_ms,
        });
    }

    (next, events)
}

/// Per-session counter
#[derive(Debug, Clone)]
pub struct RepetitionCounter {
    thresholds: RepetitionThresholds,
    state: RepetitionState,
}

impl RepetitionCounter {
    pub fn new(thresholds: RepetitionThresholds) -> Self {
        Self {
            thresholds,
            state: RepetitionState::default(),
        }
    }

    pub fn thresholds(&self) -> &RepetitionThresholds {
        &self.thresholds
    }

    pub fn state(&self) -> &RepetitionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn count(&self) -> u32 {
        self.state.count
    }

    pub fn update(&mut self, input: SignalInput) -> Vec<CounterEvent> {
        let (next, events) = step(&self.state, &self.thresholds, input);
        self.state = next;
        events
    }

    /// Session end: any phase other than Aborted moves to Aborted.
    pub fn abort(&mut self, frame_index: u64, timestamp_ms: u64) -> Option<CounterEvent> {
        if self.state.phase == Phase::Aborted {
            return None;
        }
        let event = CounterEvent::Transition {
            from: self.state.phase,
            to: Phase::Aborted,
            frame_index,
            timestamp_ms,
        };
        self.state.phase = Phase::Aborted;
        self.state.pending = None;
        self.state.last_transition_ms = Some(timestamp_ms);
        Some(event)
    }
}
