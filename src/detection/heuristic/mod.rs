//! Heuristic detection engine.
//!
//! This module provides heuristic-based threat detection through:
//! - Entropy calculation for packing/encryption detection
//! - Sniffed type versus declared extension comparison
//! - Suspicious string search
//! - Packer fingerprinting in the executable header

pub mod entropy;
pub mod packer;
pub mod scoring;
pub mod strings;

pub use entropy::EntropyAnalyzer;
pub use packer::{PackerDetector, PackerInfo};
pub use scoring::{HeuristicReport, HeuristicScorer};
pub use strings::StringMatcher;

use super::{DetectionContext, Detector};
use crate::core::types::{DetectionSignal, SignalSource};
use std::sync::Arc;

/// Adapts the shared [`HeuristicScorer`] to the detector interface.
///
/// The pipeline computes the report once per file; this detector only turns
/// it into a signal.
pub struct HeuristicDetector {
    scorer: Arc<HeuristicScorer>,
}

impl HeuristicDetector {
    pub fn new(scorer: Arc<HeuristicScorer>) -> Self {
        Self { scorer }
    }
}

impl Detector for HeuristicDetector {
    fn source(&self) -> SignalSource {
        SignalSource::Heuristic
    }

    fn name(&self) -> &str {
        "heuristic"
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Vec<DetectionSignal> {
        let signal = match ctx.heuristic {
            Some(report) => self.scorer.signal(report),
            None => self.scorer.score(ctx.record, ctx.content),
        };
        signal.into_iter().collect()
    }
}
