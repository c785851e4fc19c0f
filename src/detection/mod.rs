//! Malware detection engines and algorithms.
//!
//! This module provides the detection methods run against every file:
//! - Signature lookup (exact digest matching)
//! - Heuristic scoring (entropy, type mismatch, strings, packers)
//! - Pattern rules (declarative byte and string rules)
//! - Statistical scoring (experimental, off by default)
//!
//! Each method implements [`Detector`]; the [`DetectionPipeline`] runs them
//! and hands the signals to the [`VerdictPolicy`].

pub mod heuristic;
pub mod pipeline;
pub mod rules;
pub mod signature;
pub mod statistical;
pub mod verdict;

pub use heuristic::{HeuristicDetector, HeuristicReport, HeuristicScorer};
pub use pipeline::DetectionPipeline;
pub use rules::{PatternDetector, Rule, RuleEngine, RuleEvaluation, RuleEvaluationError};
pub use signature::{Signature, SignatureDetector, SignatureFile, SignatureIndex};
pub use statistical::{StatisticalAssessment, StatisticalDetector, StatisticalScorer};
pub use verdict::{Aggregate, VerdictPolicy};

use crate::core::types::{DetectionSignal, FileRecord, SignalSource};

/// Everything a detector may look at for one file.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub record: &'a FileRecord,
    /// Leading bytes of the file, when retained
    pub content: Option<&'a [u8]>,
    /// Heuristic report, computed once per file by the pipeline
    pub heuristic: Option<&'a HeuristicReport>,
    pub statistical: Option<&'a StatisticalAssessment>,
}

impl<'a> DetectionContext<'a> {
    pub fn new(record: &'a FileRecord) -> Self {
        Self {
            record,
            content: None,
            heuristic: None,
            statistical: None,
        }
    }

    pub fn with_content(mut self, content: &'a [u8]) -> Self {
        self.content = Some(content);
        self
    }
}

/// A detection method.
///
/// Implementations must not fail: a detector that cannot say anything about
/// a file returns no signals.
pub trait Detector: Send + Sync {
    /// Which family of signals this detector emits.
    fn source(&self) -> SignalSource;

    /// Short name used in logs.
    fn name(&self) -> &str;

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Vec<DetectionSignal>;
}
