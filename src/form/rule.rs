use serde::{Deserialize, Serialize};

use crate::tracker::Phase;

/// 正誤判定のラベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    /// データ不足。フォームの失敗ではない
    Indeterminate,
}

impl Verdict {
    /// 同一フレーム内の結合: Incorrect > Indeterminate > Correct
    pub fn worst(self, other: Verdict) -> Verdict {
        use Verdict::*;
        match (self, other) {
            (Incorrect, _) | (_, Incorrect) => Incorrect,
            (Indeterminate, _) | (_, Indeterminate) => Indeterminate,
            _ => Correct,
        }
    }
}

/// 判定の中身
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// min <= angle <= max
    Range { joint: String, min: f32, max: f32 },
    /// |joint - paired| <= max_difference
    Symmetry {
        joint: String,
        paired: String,
        max_difference: f32,
    },
}

/// 1フレーム分のルール評価
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    Fail,
    /// 必要な信号が欠損
    Unknown,
}

impl RuleOutcome {
    pub fn verdict(self) -> Verdict {
        match self {
            RuleOutcome::Pass => Verdict::Correct,
            RuleOutcome::Fail => Verdict::Incorrect,
            RuleOutcome::Unknown => Verdict::Indeterminate,
        }
    }
}

/// プロファイルの正誤ルール
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRule {
    pub id: String,
    /// 適用するフェーズ。空なら全フェーズ（Aborted を除く）
    #[serde(default)]
    pub phases: Vec<Phase>,
    pub check: RuleCheck,
    /// Incorrect のときに返す修正メッセージ
    #[serde(default)]
    pub cue: Option<String>,
    /// フレームスコアからの減点
    #[serde(default = "default_penalty")]
    pub penalty: f32,
}

fn default_penalty() -> f32 { 10.0 }

impl FormRule {
    pub fn range(id: &str, joint: &str, min: f32, max: f32) -> Self {
        Self {
            id: id.to_string(),
            phases: Vec::new(),
            check: RuleCheck::Range {
                joint: joint.to_string(),
                min,
                max,
            },
            cue: None,
            penalty: default_penalty(),
        }
    }

    pub fn symmetry(id: &str, joint: &str, paired: &str, max_difference: f32) -> Self {
        Self {
            id: id.to_string(),
            phases: Vec::new(),
            check: RuleCheck::Symmetry {
                joint: joint.to_string(),
                paired: paired.to_string(),
                max_difference,
            },
            cue: None,
            penalty: default_penalty(),
        }
    }

    pub fn during(mut self, phases: &[Phase]) -> Self {
        self.phases = phases.to_vec();
        self
    }

    pub fn with_cue(mut self, cue: &str) -> Self {
        self.cue = Some(cue.to_string());
        self
    }

    pub fn with_penalty(mut self, penalty: f32) -> Self {
        self.penalty = penalty;
        self
    }

    /// 判定結果を帰属させる関節
    pub fn joint(&self) -> &str {
        match &self.check {
            RuleCheck::Range { joint, .. } | RuleCheck::Symmetry { joint, .. } => joint,
        }
    }

    /// 評価に使う関節すべて
    pub fn joints(&self) -> Vec<&str> {
        match &self.check {
            RuleCheck::Range { joint, .. } => vec![joint.as_str()],
            RuleCheck::Symmetry { joint, paired, .. } => vec![joint.as_str(), paired.as_str()],
        }
    }

    pub fn applies_to(&self, phase: Phase) -> bool {
        if phase == Phase::Aborted {
            return false;
        }
        self.phases.is_empty() || self.phases.contains(&phase)
    }

    /// `value` は関節名から平滑化済みの角度を引く
    pub fn evaluate(&self, value: impl Fn(&str) -> Option<f32>) -> RuleOutcome {
        match &self.check {
            RuleCheck::Range { joint, min, max } => match value(joint) {
                Some(angle) if angle >= *min && angle <= *max => RuleOutcome::Pass,
                Some(_) => RuleOutcome::Fail,
                None => RuleOutcome::Unknown,
            },
            RuleCheck::Symmetry {
                joint,
                paired,
                max_difference,
            } => match (value(joint), value(paired)) {
                (Some(a), Some(b)) if (a - b).abs() <= *max_difference => RuleOutcome::Pass,
                (Some(_), Some(_)) => RuleOutcome::Fail,
                _ => RuleOutcome::Unknown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(knee: Option<f32>, other: Option<f32>) -> impl Fn(&str) -> Option<f32> {
        move |joint| match joint {
            "knee" => knee,
            "other" => other,
            _ => None,
        }
    }

    #[test]
    fn test_range_is_closed() {
        let rule = FormRule::range("depth", "knee", 80.0, 100.0);
        assert_eq!(rule.evaluate(lookup(Some(80.0), None)), RuleOutcome::Pass);
        assert_eq!(rule.evaluate(lookup(Some(100.0), None)), RuleOutcome::Pass);
        assert_eq!(rule.evaluate(lookup(Some(100.5), None)), RuleOutcome::Fail);
        assert_eq!(rule.evaluate(lookup(Some(79.9), None)), RuleOutcome::Fail);
        assert_eq!(rule.evaluate(lookup(None, None)), RuleOutcome::Unknown);
    }

    #[test]
    fn test_symmetry() {
        let rule = FormRule::symmetry("sym", "knee", "other", 20.0);
        assert_eq!(rule.evaluate(lookup(Some(100.0), Some(115.0))), RuleOutcome::Pass);
        assert_eq!(rule.evaluate(lookup(Some(100.0), Some(125.0))), RuleOutcome::Fail);
        assert_eq!(rule.evaluate(lookup(Some(100.0), None)), RuleOutcome::Unknown);
        assert_eq!(rule.joints(), vec!["knee", "other"]);
        assert_eq!(rule.joint(), "knee");
    }

    #[test]
    fn test_phase_filter() {
        let all = FormRule::range("a", "knee", 0.0, 180.0);
        assert!(all.applies_to(Phase::Idle));
        assert!(!all.applies_to(Phase::Aborted));

        let peak = all.clone().during(&[Phase::Peak]);
        assert!(peak.applies_to(Phase::Peak));
        assert!(!peak.applies_to(Phase::Descending));
    }

    #[test]
    fn test_worst_order() {
        use Verdict::*;
        assert_eq!(Correct.worst(Indeterminate), Indeterminate);
        assert_eq!(Indeterminate.worst(Incorrect), Incorrect);
        assert_eq!(Correct.worst(Correct), Correct);
    }

    #[test]
    fn test_parse_from_toml() {
        let src = r#"
            id = "knee_depth"
            phases = ["peak"]
            cue = "Squat down until thighs are parallel"
            check = { kind = "range", joint = "knee", min = 80.0, max = 100.0 }
        "#;
        let rule: FormRule = toml::from_str(src).unwrap();
        assert_eq!(rule.phases, vec![Phase::Peak]);
        assert_eq!(rule.penalty, 10.0);
        assert_eq!(rule.joint(), "knee");
    }
}
