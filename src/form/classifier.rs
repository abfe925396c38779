use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::rule::{FormRule, RuleOutcome, Verdict};
use crate::tracker::{Phase, SmoothedSample};

/// 1フレーム・1関節の判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormVerdict {
    pub frame_index: u64,
    pub joint: String,
    pub verdict: Verdict,
    /// Incorrect のときのみ
    pub violated_rule: Option<String>,
    pub cue: Option<String>,
}

/// 1フレームの評価結果
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAssessment {
    pub frame_index: u64,
    pub phase: Phase,
    pub verdicts: Vec<FormVerdict>,
    /// 100 - 減点。判定できたルールが無ければ None
    pub score: Option<f32>,
}

/// フェーズごとのルールで平滑化済み角度を判定する
#[derive(Debug, Clone)]
pub struct FormClassifier {
    rules: Vec<FormRule>,
    /// 判定対象の関節（ルール定義順、重複なし）
    joints: Vec<String>,
}

impl FormClassifier {
    pub fn new(rules: Vec<FormRule>) -> Self {
        let mut joints: Vec<String> = Vec::new();
        for rule in &rules {
            if !joints.iter().any(|j| j == rule.joint()) {
                joints.push(rule.joint().to_string());
            }
        }
        Self { rules, joints }
    }

    pub fn rules(&self) -> &[FormRule] {
        &self.rules
    }

    pub fn joints(&self) -> &[String] {
        &self.joints
    }

    /// `phase` で有効なルールを評価し、関節ごとに最も悪い判定を返す。
    /// 欠損した関節は Indeterminate になる（黙って Correct にはしない）
    pub fn evaluate(&self, frame_index: u64, phase: Phase, samples: &[SmoothedSample]) -> FrameAssessment {
        let value = |joint: &str| {
            samples
                .iter()
                .find(|s| s.joint == joint)
                .and_then(|s| s.value)
        };

        let mut per_joint: Vec<FormVerdict> = Vec::new();
        let mut penalty = 0.0f32;
        let mut determinate = false;

        for rule in self.rules.iter().filter(|r| r.applies_to(phase)) {
            let outcome = rule.evaluate(&value);
            match outcome {
                RuleOutcome::Pass => determinate = true,
                RuleOutcome::Fail => {
                    determinate = true;
                    penalty += rule.penalty;
                }
                RuleOutcome::Unknown => {}
            }

            let verdict = outcome.verdict();
            let idx = match per_joint.iter().position(|v| v.joint == rule.joint()) {
                Some(i) => i,
                None => {
                    per_joint.push(FormVerdict {
                        frame_index,
                        joint: rule.joint().to_string(),
                        verdict: Verdict::Correct,
                        violated_rule: None,
                        cue: None,
                    });
                    per_joint.len() - 1
                }
            };
            let entry = &mut per_joint[idx];
            // 最初に違反したルールを残す
            if verdict == Verdict::Incorrect && entry.verdict != Verdict::Incorrect {
                entry.violated_rule = Some(rule.id.clone());
                entry.cue = rule.cue.clone();
            }
            entry.verdict = entry.verdict.worst(verdict);
        }

        FrameAssessment {
            frame_index,
            phase,
            verdicts: per_joint,
            score: determinate.then(|| (100.0 - penalty).max(0.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct JointTally {
    evaluated: bool,
    /// 直近の Indeterminate がまだ Correct で解消されていない
    unresolved: bool,
}

/// 1レップ分の集約結果
#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionSummary {
    pub verdict: Verdict,
    pub violated_rule: Option<String>,
    /// フレームスコアの平均
    pub score: Option<f32>,
}

/// 進行中のレップの集約。
///
/// - Incorrect が1フレームでもあれば Incorrect（最初の違反ルールを保持）
/// - それ以外で、Indeterminate の後に同じ関節の Correct が来ていない、
///   または一度も評価されていない関節があれば Indeterminate
/// - それ以外は Correct
#[derive(Debug, Clone)]
pub struct RepetitionAggregate {
    joints: BTreeMap<String, JointTally>,
    incorrect: bool,
    first_violation: Option<String>,
    score_sum: f64,
    score_frames: u32,
}

impl RepetitionAggregate {
    pub fn new<'a>(joints: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            joints: joints
                .into_iter()
                .map(|j| (j.to_string(), JointTally::default()))
                .collect(),
            incorrect: false,
            first_violation: None,
            score_sum: 0.0,
            score_frames: 0,
        }
    }

    pub fn record(&mut self, assessment: &FrameAssessment) {
        for v in &assessment.verdicts {
            let tally = self.joints.entry(v.joint.clone()).or_default();
            tally.evaluated = true;
            match v.verdict {
                Verdict::Correct => tally.unresolved = false,
                Verdict::Indeterminate => tally.unresolved = true,
                Verdict::Incorrect => {
                    self.incorrect = true;
                    if self.first_violation.is_none() {
                        self.first_violation = v.violated_rule.clone();
                    }
                }
            }
        }
        if let Some(score) = assessment.score {
            self.score_sum += f64::from(score);
            self.score_frames += 1;
        }
    }

    pub fn summary(&self) -> RepetitionSummary {
        let verdict = if self.incorrect {
            Verdict::Incorrect
        } else if self.joints.values().any(|t| !t.evaluated || t.unresolved) {
            Verdict::Indeterminate
        } else {
            Verdict::Correct
        };
        RepetitionSummary {
            verdict,
            violated_rule: self.first_violation.clone(),
            score: (self.score_frames > 0).then(|| (self.score_sum / f64::from(self.score_frames)) as f32),
        }
    }

    /// 集約を返して次のレップ用にリセットする
    pub fn close(&mut self) -> RepetitionSummary {
        let summary = self.summary();
        self.reset();
        summary
    }

    pub fn reset(&mut self) {
        for tally in self.joints.values_mut() {
            *tally = JointTally::default();
        }
        self.incorrect = false;
        self.first_violation = None;
        self.score_sum = 0.0;
        self.score_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::SignalStatus;

    fn sample(joint: &str, frame_index: u64, value: Option<f32>) -> SmoothedSample {
        SmoothedSample {
            joint: joint.to_string(),
            frame_index,
            timestamp_ms: frame_index * 33,
            value,
            status: if value.is_some() {
                SignalStatus::Tracking
            } else {
                SignalStatus::Missing
            },
        }
    }

    fn squat_rules() -> Vec<FormRule> {
        vec![
            FormRule::range("knee_depth", "knee", 80.0, 100.0)
                .during(&[Phase::Peak])
                .with_cue("Bend to thigh-parallel"),
            FormRule::range("torso_upright", "torso", 0.0, 45.0).with_penalty(15.0),
        ]
    }

    #[test]
    fn test_only_rules_for_phase_are_evaluated() {
        let classifier = FormClassifier::new(squat_rules());
        let a = classifier.evaluate(0, Phase::Ascending, &[sample("knee", 0, Some(130.0)), sample("torso", 0, Some(10.0))]);
        assert_eq!(a.verdicts.len(), 1);
        assert_eq!(a.verdicts[0].joint, "torso");
        assert_eq!(a.score, Some(100.0));

        let p = classifier.evaluate(1, Phase::Peak, &[sample("knee", 1, Some(90.0)), sample("torso", 1, Some(10.0))]);
        assert_eq!(p.verdicts.len(), 2);
        assert!(p.verdicts.iter().all(|v| v.verdict == Verdict::Correct && v.frame_index == 1));
    }

    #[test]
    fn test_out_of_range_names_rule_and_cue() {
        let classifier = FormClassifier::new(squat_rules());
        let a = classifier.evaluate(7, Phase::Peak, &[sample("knee", 7, Some(120.0)), sample("torso", 7, Some(50.0))]);
        let knee = a.verdicts.iter().find(|v| v.joint == "knee").unwrap();
        assert_eq!(knee.verdict, Verdict::Incorrect);
        assert_eq!(knee.violated_rule.as_deref(), Some("knee_depth"));
        assert_eq!(knee.cue.as_deref(), Some("Bend to thigh-parallel"));
        assert_eq!(a.score, Some(75.0));
    }

    #[test]
    fn test_missing_joint_is_indeterminate_not_correct() {
        let classifier = FormClassifier::new(squat_rules());
        let a = classifier.evaluate(3, Phase::Peak, &[sample("knee", 3, None), sample("torso", 3, Some(10.0))]);
        let knee = a.verdicts.iter().find(|v| v.joint == "knee").unwrap();
        assert_eq!(knee.verdict, Verdict::Indeterminate);
        assert!(knee.violated_rule.is_none());

        // サンプルが丸ごと無いフレーム
        let empty = classifier.evaluate(4, Phase::Peak, &[]);
        assert!(empty.verdicts.iter().all(|v| v.verdict == Verdict::Indeterminate));
        assert_eq!(empty.score, None);
    }

    #[test]
    fn test_worst_rule_wins_per_joint() {
        let rules = vec![
            FormRule::range("wide", "knee", 0.0, 180.0),
            FormRule::range("narrow", "knee", 80.0, 100.0),
            FormRule::range("narrower", "knee", 85.0, 95.0),
        ];
        let classifier = FormClassifier::new(rules);
        let a = classifier.evaluate(0, Phase::Peak, &[sample("knee", 0, Some(110.0))]);
        assert_eq!(a.verdicts.len(), 1);
        assert_eq!(a.verdicts[0].violated_rule.as_deref(), Some("narrow"));
        assert_eq!(a.score, Some(80.0));
    }

    fn run(classifier: &FormClassifier, aggregate: &mut RepetitionAggregate, knee: &[Option<f32>]) {
        for (i, v) in knee.iter().enumerate() {
            let a = classifier.evaluate(i as u64, Phase::Peak, &[sample("knee", i as u64, *v)]);
            aggregate.record(&a);
        }
    }

    #[test]
    fn test_aggregate_all_correct() {
        let classifier = FormClassifier::new(vec![FormRule::range("knee_depth", "knee", 80.0, 100.0)]);
        let mut aggregate = RepetitionAggregate::new(classifier.joints().iter().map(String::as_str));
        run(&classifier, &mut aggregate, &[Some(95.0), Some(90.0), Some(85.0), Some(92.0)]);
        let summary = aggregate.close();
        assert_eq!(summary.verdict, Verdict::Correct);
        assert_eq!(summary.violated_rule, None);
        assert_eq!(summary.score, Some(100.0));
    }

    #[test]
    fn test_aggregate_single_incorrect_frame() {
        let classifier = FormClassifier::new(vec![FormRule::range("knee_depth", "knee", 80.0, 100.0)]);
        let mut aggregate = RepetitionAggregate::new(classifier.joints().iter().map(String::as_str));
        run(&classifier, &mut aggregate, &[Some(95.0), Some(105.0), Some(90.0), Some(90.0)]);
        let summary = aggregate.close();
        assert_eq!(summary.verdict, Verdict::Incorrect);
        assert_eq!(summary.violated_rule.as_deref(), Some("knee_depth"));
        assert_eq!(summary.score, Some(97.5));
    }

    #[test]
    fn test_aggregate_indeterminate_resolution() {
        let classifier = FormClassifier::new(vec![FormRule::range("knee_depth", "knee", 80.0, 100.0)]);

        // 後の Correct で解消される
        let mut aggregate = RepetitionAggregate::new(classifier.joints().iter().map(String::as_str));
        run(&classifier, &mut aggregate, &[Some(90.0), None, Some(90.0)]);
        assert_eq!(aggregate.close().verdict, Verdict::Correct);

        // 最後が欠損のまま
        run(&classifier, &mut aggregate, &[Some(90.0), Some(90.0), None]);
        assert_eq!(aggregate.close().verdict, Verdict::Indeterminate);
    }

    #[test]
    fn test_aggregate_never_evaluated_joint_is_indeterminate() {
        let mut aggregate = RepetitionAggregate::new(["knee"]);
        assert_eq!(aggregate.summary().verdict, Verdict::Indeterminate);
        assert_eq!(aggregate.summary().score, None);
        aggregate.reset();
        assert_eq!(aggregate.close().verdict, Verdict::Indeterminate);
    }

    #[test]
    fn test_aggregate_resets_after_close() {
        let classifier = FormClassifier::new(vec![FormRule::range("knee_depth", "knee", 80.0, 100.0)]);
        let mut aggregate = RepetitionAggregate::new(classifier.joints().iter().map(String::as_str));
        run(&classifier, &mut aggregate, &[Some(120.0)]);
        assert_eq!(aggregate.close().verdict, Verdict::Incorrect);
        run(&classifier, &mut aggregate, &[Some(90.0)]);
        assert_eq!(aggregate.close().verdict, Verdict::Correct);
    }
}
