use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::PipelineError;
use crate::pose::{ScaleFallback, ScaleReference};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// セッション共通の設定（プロファイルに依存しないもの）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// キーポイント信頼度の閾値
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// 正規化の基準長
    #[serde(default)]
    pub scale_reference: ScaleReference,
    /// 基準点が欠けたフレームの扱い
    #[serde(default)]
    pub scale_fallback: ScaleFallback,
    /// キャプチャ → 処理キューの容量（満杯時は最新フレームを捨てる）
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 推定器呼び出しのタイムアウト（ミリ秒）
    #[serde(default = "default_estimator_timeout_ms")]
    pub estimator_timeout_ms: u64,
}

fn default_confidence_threshold() -> f32 { 0.5 }
fn default_queue_capacity() -> usize { 8 }
fn default_estimator_timeout_ms() -> u64 { 250 }

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            scale_reference: ScaleReference::default(),
            scale_fallback: ScaleFallback::default(),
            queue_capacity: default_queue_capacity(),
            estimator_timeout_ms: default_estimator_timeout_ms(),
        }
    }
}

impl SessionSettings {
    pub fn estimator_timeout(&self) -> Duration {
        Duration::from_millis(self.estimator_timeout_ms)
    }

    /// 閾値 0 では未検出 (confidence 0) の関節も通ってしまうので (0, 1] に限る
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        let t = self.confidence_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(PipelineError::InvalidSettings(format!(
                "confidence_threshold must be in (0, 1], got {}",
                t
            )));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidSettings("queue_capacity must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter 形式 (e.g. "info", "rehab_tracker=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// 指定するとタイムスタンプ付きのログファイルも書く
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMethod {
    MovingAverage,
    #[default]
    Exponential,
    OneEuro,
}

/// 角度信号の平滑化パラメータ（エクササイズごと）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    #[serde(default)]
    pub method: SmoothingMethod,
    /// 履歴・移動平均の窓サイズ（フレーム）
    #[serde(default = "default_window")]
    pub window: usize,
    /// EMA の新しい値の重み。ジッタの少ない推定器ほど大きくしてよい
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    /// One Euro: 最小カットオフ周波数 (Hz)
    #[serde(default = "default_min_cutoff")]
    pub min_cutoff: f32,
    /// One Euro: 速度係数
    #[serde(default = "default_beta")]
    pub beta: f32,
    /// One Euro: 微分のカットオフ (Hz)
    #[serde(default = "default_d_cutoff")]
    pub d_cutoff: f32,
    /// この回数連続で欠損したら Lost とする
    #[serde(default = "default_missing_limit")]
    pub missing_limit: u32,
}

fn default_window() -> usize { 5 }
fn default_alpha() -> f32 { 0.5 }
fn default_min_cutoff() -> f32 { 1.0 }
fn default_beta() -> f32 { 0.05 }
fn default_d_cutoff() -> f32 { 1.0 }
fn default_missing_limit() -> u32 { 3 }

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            method: SmoothingMethod::default(),
            window: default_window(),
            alpha: default_alpha(),
            min_cutoff: default_min_cutoff(),
            beta: default_beta(),
            d_cutoff: default_d_cutoff(),
            missing_limit: default_missing_limit(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config
            .session
            .validate()
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        Ok(config)
    }

    /// ファイルがなければデフォルト設定
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
