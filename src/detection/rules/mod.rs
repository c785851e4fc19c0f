//! Declarative pattern rules.
//!
//! Rules combine literal, hex, regex and wide-string patterns with a small
//! condition language, loosely modelled on YARA.

pub mod engine;
pub mod rule;

pub use engine::{RuleEngine, RuleEvaluation, RuleFile, RuleLoadReport};
pub use rule::{
    Comparison, Condition, PatternKind, Rule, RuleEvaluationError, RuleMatch, RuleMeta,
    StringPattern,
};

use super::{DetectionContext, Detector};
use crate::core::types::{DetectionSignal, SignalSource};
use std::sync::Arc;

/// Runs the rule engine for each file.
pub struct PatternDetector {
    engine: Arc<RuleEngine>,
}

impl PatternDetector {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine }
    }
}

impl Detector for PatternDetector {
    fn source(&self) -> SignalSource {
        SignalSource::Pattern
    }

    fn name(&self) -> &str {
        "pattern"
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Vec<DetectionSignal> {
        self.engine
            .evaluate(ctx.record, ctx.content.unwrap_or_default())
            .signals
    }
}
