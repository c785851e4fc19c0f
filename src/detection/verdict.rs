//! Combines per-detector signals into one score and verdict.

use std::collections::HashSet;

use super::statistical::{MALICIOUS_BAND, SUSPICIOUS_BAND};
use crate::core::config::VerdictConfig;
use crate::core::types::{DetectionSignal, SignalSource, Verdict};

/// Aggregated score and verdict for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub score: u8,
    pub verdict: Verdict,
}

/// Thresholds and bonuses used by [`VerdictPolicy::aggregate`].
#[derive(Debug, Clone)]
pub struct VerdictPolicy {
    malicious_threshold: u8,
    suspicious_threshold: u8,
    points_per_rule: u8,
    bonus_cap: u8,
    statistical_weight: f64,
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self::from_config(&VerdictConfig::default())
    }
}

impl VerdictPolicy {
    pub fn from_config(config: &VerdictConfig) -> Self {
        Self {
            malicious_threshold: config.malicious_threshold,
            suspicious_threshold: config.suspicious_threshold,
            points_per_rule: config.pattern_points_per_rule,
            bonus_cap: config.pattern_bonus_cap,
            statistical_weight: config.statistical_weight,
        }
    }

    /// Classify a bare score.
    pub fn classify(&self, score: u8) -> Verdict {
        if score >= self.malicious_threshold {
            Verdict::Malicious
        } else if score >= self.suspicious_threshold {
            Verdict::Suspicious
        } else {
            Verdict::Clean
        }
    }

    /// Aggregate the signals for one file.
    ///
    /// `heuristic_total` is the raw heuristic total whenever the heuristic
    /// ran, including totals below its signal threshold. `statistical` is the
    /// statistical score when that scorer is enabled.
    pub fn aggregate(
        &self,
        signals: &[DetectionSignal],
        heuristic_total: Option<u8>,
        statistical: Option<f64>,
    ) -> Aggregate {
        if signals.iter().any(|s| s.source == SignalSource::Signature) {
            return Aggregate {
                score: 100,
                verdict: Verdict::Malicious,
            };
        }

        let fired_rules: HashSet<&str> = signals
            .iter()
            .filter(|s| s.source == SignalSource::Pattern)
            .map(|s| s.name.as_str())
            .collect();
        let rule_bonus = (self.points_per_rule as usize * fired_rules.len())
            .min(self.bonus_cap as usize) as f64;

        let base = (heuristic_total.unwrap_or(0) as f64 + rule_bonus).min(100.0);

        let statistical = statistical.filter(|s| s.is_finite());
        let bonus = match statistical {
            Some(s) if s >= SUSPICIOUS_BAND => s * self.statistical_weight,
            _ => 0.0,
        };

        let score = (base + bonus).round().clamp(0.0, 100.0) as u8;
        let mut verdict = self.classify(score);

        if verdict == Verdict::Malicious
            && self.classify(base.round() as u8) != Verdict::Malicious
            && !signals
                .iter()
                .any(|s| matches!(s.source, SignalSource::Heuristic | SignalSource::Pattern))
        {
            verdict = Verdict::Suspicious;
        }

        if verdict == Verdict::Clean && statistical.map_or(false, |s| s >= MALICIOUS_BAND) {
            verdict = Verdict::Suspicious;
        }

        Aggregate { score, verdict }
    }
}
