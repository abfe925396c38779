use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::one_euro::OneEuroFilter;
use crate::analysis::JointAngleSample;
use crate::config::{SmoothingConfig, SmoothingMethod};

/// 関節信号の追跡状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    /// 有効なサンプルで更新された
    Tracking,
    /// このフレームは欠損（窓は維持）
    Missing,
    /// 連続欠損が上限に達した（遮蔽・ロストの可能性）
    Lost,
}

/// 平滑化済みの1サンプル。フレーム番号で元フレームに紐付く
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedSample {
    pub joint: String,
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub value: Option<f32>,
    pub status: SignalStatus,
}

/// 角度フィルタ。更新はどれも O(1)
#[derive(Debug, Clone)]
enum AngleFilter {
    /// 窓内の有効サンプルの単純移動平均（リングバッファ + 累積和）
    MovingAverage {
        samples: VecDeque<Option<f32>>,
        capacity: usize,
        sum: f64,
        valid: usize,
    },
    /// EMA: alpha が大きいほど新しい値を重視
    Exponential { alpha: f32, prev: Option<f32> },
    /// 速度適応のローパス。欠損中は時刻も進めない
    OneEuro(OneEuroFilter),
}

impl AngleFilter {
    fn from_config(config: &SmoothingConfig) -> Self {
        match config.method {
            SmoothingMethod::MovingAverage => AngleFilter::MovingAverage {
                samples: VecDeque::with_capacity(config.window),
                capacity: config.window.max(1),
                sum: 0.0,
                valid: 0,
            },
            SmoothingMethod::Exponential => AngleFilter::Exponential {
                alpha: config.alpha,
                prev: None,
            },
            SmoothingMethod::OneEuro => {
                AngleFilter::OneEuro(OneEuroFilter::new(config.min_cutoff, config.beta, config.d_cutoff))
            }
        }
    }

    /// 欠損は平均から除外するが窓はスライドさせる
    fn update(&mut self, value: Option<f32>, timestamp_ms: u64) -> Option<f32> {
        match self {
            AngleFilter::MovingAverage {
                samples,
                capacity,
                sum,
                valid,
            } => {
                if samples.len() == *capacity {
                    if let Some(Some(old)) = samples.pop_front() {
                        *sum -= f64::from(old);
                        *valid -= 1;
                    }
                }
                samples.push_back(value);
                let v = value?;
                *sum += f64::from(v);
                *valid += 1;
                Some((*sum / *valid as f64) as f32)
            }
            AngleFilter::Exponential { alpha, prev } => {
                let v = value?;
                let result = match *prev {
                    Some(p) => *alpha * v + (1.0 - *alpha) * p,
                    None => v,
                };
                *prev = Some(result);
                Some(result)
            }
            AngleFilter::OneEuro(filter) => value.map(|v| filter.filter(v, timestamp_ms)),
        }
    }
}

/// 1関節の平滑化信号
///
/// 直近 `window` フレーム分の履歴を保持する（長さは常に window 以下）。
#[derive(Debug, Clone)]
pub struct SmoothedSignal {
    joint: String,
    filter: AngleFilter,
    history: VecDeque<SmoothedSample>,
    window: usize,
    missing_streak: u32,
    missing_limit: u32,
}

impl SmoothedSignal {
    pub fn new(joint: &str, config: &SmoothingConfig) -> Self {
        let window = config.window.max(1);
        Self {
            joint: joint.to_string(),
            filter: AngleFilter::from_config(config),
            history: VecDeque::with_capacity(window),
            window,
            missing_streak: 0,
            missing_limit: config.missing_limit.max(1),
        }
    }

    pub fn push(&mut self, sample: &JointAngleSample) -> SmoothedSample {
        let value = self.filter.update(sample.angle, sample.timestamp_ms);

        let status = if value.is_some() {
            self.missing_streak = 0;
            SignalStatus::Tracking
        } else {
            self.missing_streak = self.missing_streak.saturating_add(1);
            if self.missing_streak >= self.missing_limit {
                SignalStatus::Lost
            } else {
                SignalStatus::Missing
            }
        };

        let smoothed = SmoothedSample {
            joint: self.joint.clone(),
            frame_index: sample.frame_index,
            timestamp_ms: sample.timestamp_ms,
            value,
            status,
        };

        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(smoothed.clone());
        smoothed
    }

    /// このサンプルで Lost に昇格したか（ロスト1回につき1度だけ true）
    pub fn just_lost(&self) -> bool {
        self.missing_streak == self.missing_limit
    }
}

/// セッション内の全監視関節の平滑化
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    signals: Vec<SmoothedSignal>,
}

impl TemporalSmoother {
    pub fn new<'a>(joints: impl IntoIterator<Item = &'a str>, config: &SmoothingConfig) -> Self {
        Self {
            signals: joints
                .into_iter()
                .map(|j| SmoothedSignal::new(j, config))
                .collect(),
        }
    }

    /// サンプルを対応する関節信号に流し込む。
    /// 戻り値は平滑化サンプルと、このフレームで Lost になった関節名
    pub fn update(&mut self, samples: &[JointAngleSample]) -> (Vec<SmoothedSample>, Vec<String>) {
        let mut smoothed = Vec::with_capacity(samples.len());
        let mut newly_lost = Vec::new();
        for sample in samples {
            let Some(signal) = self.signals.iter_mut().find(|s| s.joint == sample.joint) else {
                continue;
            };
            smoothed.push(signal.push(sample));
            if signal.just_lost() {
                newly_lost.push(signal.joint.clone());
            }
        }
        (smoothed, newly_lost)
    }
}
