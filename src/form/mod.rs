pub mod classifier;
pub mod rule;

pub use classifier::{FormClassifier, FormVerdict, FrameAssessment, RepetitionAggregate, RepetitionSummary};
pub use rule::{FormRule, RuleCheck, RuleOutcome, Verdict};
