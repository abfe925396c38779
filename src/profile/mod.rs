//! Exercise profiles: monitored joints, form rules and repetition thresholds.
//!
//! A profile is loaded once per session and never changes while the session
//! runs. Validation is limited to range sanity checks.

pub mod catalog;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::analysis::{AngleDefinition, AngleSpace, Anchor, Measurement};
use crate::config::SmoothingConfig;
use crate::error::{PipelineError, Result};
use crate::form::{FormRule, RuleCheck};
use crate::tracker::{Direction, RepetitionThresholds};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub common_mistakes: Vec<String>,
    #[serde(default)]
    pub space: AngleSpace,
    /// 監視する関節角度
    pub measurements: Vec<Measurement>,
    pub rules: Vec<FormRule>,
    pub repetition: RepetitionThresholds,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
}

fn finite_angle(value: f32) -> bool {
    value.is_finite() && (0.0..=180.0).contains(&value)
}

impl ExerciseProfile {
    /// TOML ファイルから読み込んで検証する
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read profile {}", path.display()))?;
        let profile: ExerciseProfile = toml::from_str(&content)
            .with_context(|| format!("failed to parse profile {}", path.display()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// 組み込みの id、なければファイルパスとして解決する
    pub fn resolve(id_or_path: &str) -> anyhow::Result<Self> {
        match catalog::builtin(id_or_path) {
            Some(profile) => Ok(profile),
            None => Self::load(id_or_path),
        }
    }

    pub fn measurement(&self, id: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.id == id)
    }

    fn invalid(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::invalid_profile(&self.id, reason)
    }

    /// 範囲の整合性だけを確認する（臨床的な妥当性は扱わない）
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(self.invalid("id is empty"));
        }
        if self.measurements.is_empty() {
            return Err(self.invalid("no measurements"));
        }
        if self.rules.is_empty() {
            return Err(self.invalid("no form rules"));
        }

        let mut ids = HashSet::new();
        for m in &self.measurements {
            if m.id.trim().is_empty() {
                return Err(self.invalid("measurement with empty id"));
            }
            if !ids.insert(m.id.as_str()) {
                return Err(self.invalid(format!("duplicate measurement '{}'", m.id)));
            }
            match &m.angle {
                AngleDefinition::Vertex { a, vertex, c } => {
                    if a == vertex || c == vertex {
                        return Err(self.invalid(format!("measurement '{}' uses its vertex as an endpoint", m.id)));
                    }
                }
                AngleDefinition::Inclination { from, to, .. } => {
                    if from == to {
                        return Err(self.invalid(format!("measurement '{}' has identical anchors", m.id)));
                    }
                    for anchor in [from, to] {
                        if let Anchor::Midpoint([a, b]) = anchor {
                            if a == b {
                                return Err(self.invalid(format!("measurement '{}' has a degenerate midpoint", m.id)));
                            }
                        }
                    }
                }
            }
        }

        let known = |joint: &str| ids.contains(joint);
        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(self.invalid(format!("duplicate rule '{}'", rule.id)));
            }
            if let Some(joint) = rule.joints().into_iter().find(|j| !known(*j)) {
                return Err(self.invalid(format!("rule '{}' refers to unknown joint '{}'", rule.id, joint)));
            }
            if !(rule.penalty.is_finite() && (0.0..=100.0).contains(&rule.penalty)) {
                return Err(self.invalid(format!("rule '{}' penalty must be within [0, 100]", rule.id)));
            }
            match &rule.check {
                RuleCheck::Range { min, max, .. } => {
                    if !finite_angle(*min) || !finite_angle(*max) || min > max {
                        return Err(self.invalid(format!(
                            "rule '{}' range [{}, {}] is not within [0, 180]",
                            rule.id, min, max
                        )));
                    }
                }
                RuleCheck::Symmetry { joint, paired, max_difference } => {
                    if joint == paired {
                        return Err(self.invalid(format!("rule '{}' compares a joint with itself", rule.id)));
                    }
                    if !finite_angle(*max_difference) {
                        return Err(self.invalid(format!("rule '{}' max_difference out of range", rule.id)));
                    }
                }
            }
        }

        self.validate_repetition(&known)?;
        self.validate_smoothing()
    }

    fn validate_repetition(&self, known: &impl Fn(&str) -> bool) -> Result<()> {
        let r = &self.repetition;
        if !known(r.primary.as_str()) {
            return Err(self.invalid(format!("primary joint '{}' is not measured", r.primary)));
        }
        if !finite_angle(r.start) || !finite_angle(r.peak) {
            return Err(self.invalid("repetition thresholds must be within [0, 180]"));
        }
        let travel = match r.direction {
            Direction::Increasing => r.peak - r.start,
            Direction::Decreasing => r.start - r.peak,
        };
        if travel <= 0.0 {
            return Err(self.invalid(format!(
                "peak {} is not beyond start {} for {:?} movement",
                r.peak, r.start, r.direction
            )));
        }
        if !(r.peak_epsilon.is_finite() && r.peak_epsilon >= 0.0 && r.peak_epsilon < travel) {
            return Err(self.invalid("peak_epsilon must be smaller than the start-to-peak travel"));
        }
        if r.debounce_frames == 0 {
            return Err(self.invalid("debounce_frames must be at least 1"));
        }
        if r.tracking_timeout_ms == 0 {
            return Err(self.invalid("tracking_timeout_ms must be positive"));
        }
        Ok(())
    }

    fn validate_smoothing(&self) -> Result<()> {
        let s = &self.smoothing;
        if s.window == 0 {
            return Err(self.invalid("smoothing window must be at least 1"));
        }
        if !(s.alpha > 0.0 && s.alpha <= 1.0) {
            return Err(self.invalid("smoothing alpha must be within (0, 1]"));
        }
        if !(s.min_cutoff > 0.0 && s.d_cutoff > 0.0 && s.beta >= 0.0) {
            return Err(self.invalid("one euro parameters must be positive"));
        }
        if s.missing_limit == 0 {
            return Err(self.invalid("missing_limit must be at least 1"));
        }
        Ok(())
    }
}
