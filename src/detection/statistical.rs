//! Experimental statistical scorer.
//!
//! A weighted linear model over features already computed by the heuristic
//! scorer. It never parses the file itself, and on its own it can raise a
//! file to suspicious at most (see `verdict`).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::heuristic::entropy::ENTROPY_MAX_POINTS;
use super::heuristic::packer::PACKER_POINTS;
use super::heuristic::scoring::MISMATCH_POINTS;
use super::heuristic::strings::STRING_MAX_POINTS;
use super::heuristic::HeuristicReport;
use super::{DetectionContext, Detector};
use crate::core::error::{Error, Result};
use crate::core::types::{DetectionSignal, FileRecord, Severity, SignalSource};

/// Scores at or above this are outside the benign band.
pub const SUSPICIOUS_BAND: f64 = 0.3;
/// Scores at or above this lean malicious.
pub const MALICIOUS_BAND: f64 = 0.8;

const SMALL_FILE_BYTES: u64 = 1024;
const LARGE_FILE_BYTES: u64 = 100 * 1024 * 1024;

const RARE_EXTENSIONS: &[&str] = &[
    "vbs", "js", "wsf", "ps1", "bat", "cmd", "scr", "pif", "com", "cpl", "msc", "jar", "hta",
];

/// Per-feature weights. Missing entries in a model file weigh zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
    #[serde(default)]
    pub entropy: f64,
    #[serde(default)]
    pub suspicious_strings: f64,
    #[serde(default)]
    pub extension_mismatch: f64,
    #[serde(default)]
    pub packer: f64,
    #[serde(default)]
    pub file_size_anomaly: f64,
    #[serde(default)]
    pub rare_extension: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            entropy: 0.25,
            suspicious_strings: 0.20,
            extension_mismatch: 0.20,
            packer: 0.15,
            file_size_anomaly: 0.10,
            rare_extension: 0.10,
        }
    }
}

impl FeatureWeights {
    fn as_array(&self) -> [f64; 6] {
        [
            self.entropy,
            self.suspicious_strings,
            self.extension_mismatch,
            self.packer,
            self.file_size_anomaly,
            self.rare_extension,
        ]
    }

    /// Reject negative or non-finite weights and scale the rest to sum to 1.
    pub fn normalized(&self) -> std::result::Result<Self, String> {
        let values = self.as_array();
        if values.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("weights must be finite and non-negative".to_string());
        }

        let sum: f64 = values.iter().sum();
        if sum <= 0.0 {
            return Err("weights sum to zero".to_string());
        }

        Ok(Self {
            entropy: self.entropy / sum,
            suspicious_strings: self.suspicious_strings / sum,
            extension_mismatch: self.extension_mismatch / sum,
            packer: self.packer / sum,
            file_size_anomaly: self.file_size_anomaly / sum,
            rare_extension: self.rare_extension / sum,
        })
    }
}

/// On-disk model description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalModel {
    pub version: String,
    #[serde(alias = "feature_weights")]
    pub weights: FeatureWeights,
}

impl Default for StatisticalModel {
    fn default() -> Self {
        Self {
            version: "builtin".to_string(),
            weights: FeatureWeights::default(),
        }
    }
}

impl StatisticalModel {
    /// Load a model from JSON. Any failure leaves the scorer unavailable.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::index_unavailable("statistical", e.to_string()))?;
        let model: Self = serde_json::from_str(&content)
            .map_err(|e| Error::index_unavailable("statistical", e.to_string()))?;
        model
            .weights
            .normalized()
            .map_err(|reason| Error::index_unavailable("statistical", reason))?;
        Ok(model)
    }
}

/// Feature vector, every value in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Features {
    pub entropy: f64,
    pub suspicious_strings: f64,
    pub extension_mismatch: f64,
    pub packer: f64,
    pub file_size_anomaly: f64,
    pub rare_extension: f64,
}

impl Features {
    fn as_array(&self) -> [f64; 6] {
        [
            self.entropy,
            self.suspicious_strings,
            self.extension_mismatch,
            self.packer,
            self.file_size_anomaly,
            self.rare_extension,
        ]
    }
}

/// Score band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticalBand {
    Benign,
    Suspicious,
    MaliciousLeaning,
}

impl StatisticalBand {
    pub fn from_score(score: f64) -> Self {
        if score >= MALICIOUS_BAND {
            StatisticalBand::MaliciousLeaning
        } else if score >= SUSPICIOUS_BAND {
            StatisticalBand::Suspicious
        } else {
            StatisticalBand::Benign
        }
    }
}

/// Statistical result for one file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatisticalAssessment {
    pub score: f64,
    pub band: StatisticalBand,
    pub features: Features,
}

/// Weighted linear scorer.
pub struct StatisticalScorer {
    version: String,
    weights: FeatureWeights,
}

impl StatisticalScorer {
    /// Build a scorer from a model, normalizing its weights.
    pub fn new(model: StatisticalModel) -> Result<Self> {
        let weights = model
            .weights
            .normalized()
            .map_err(|reason| Error::index_unavailable("statistical", reason))?;
        Ok(Self {
            version: model.version,
            weights,
        })
    }

    /// Scorer with the built-in weights.
    pub fn builtin() -> Self {
        Self {
            version: StatisticalModel::default().version,
            weights: FeatureWeights::default(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Derive features from a file record and its heuristic report.
    pub fn features(record: &FileRecord, report: &HeuristicReport) -> Features {
        let ratio = |points: u8, max: u8| (points as f64 / max as f64).clamp(0.0, 1.0);

        let file_size_anomaly = if record.size < SMALL_FILE_BYTES {
            0.8
        } else if record.size > LARGE_FILE_BYTES {
            0.6
        } else {
            0.0
        };

        let rare_extension = match record.extension.as_deref() {
            Some(ext) if RARE_EXTENSIONS.contains(&ext) => 1.0,
            _ => 0.0,
        };

        Features {
            entropy: ratio(report.entropy_score, ENTROPY_MAX_POINTS),
            suspicious_strings: ratio(report.string_score, STRING_MAX_POINTS),
            extension_mismatch: ratio(report.mismatch_score, MISMATCH_POINTS),
            packer: ratio(report.packer_score, PACKER_POINTS),
            file_size_anomaly,
            rare_extension,
        }
    }

    /// Weighted sum of the features, in [0, 1].
    pub fn score(&self, features: &Features) -> f64 {
        self.weights
            .as_array()
            .iter()
            .zip(features.as_array())
            .map(|(w, f)| w * f)
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }

    pub fn assess(&self, record: &FileRecord, report: &HeuristicReport) -> StatisticalAssessment {
        let features = Self::features(record, report);
        let score = self.score(&features);
        StatisticalAssessment {
            score,
            band: StatisticalBand::from_score(score),
            features,
        }
    }

    /// Signal for assessments outside the benign band.
    pub fn signal(assessment: &StatisticalAssessment) -> Option<DetectionSignal> {
        let (name, severity) = match assessment.band {
            StatisticalBand::Benign => return None,
            StatisticalBand::Suspicious => ("Statistical.Suspicious", Severity::Low),
            StatisticalBand::MaliciousLeaning => ("Statistical.MaliciousLeaning", Severity::Medium),
        };

        let contribution = (assessment.score * 100.0).round() as u8;
        Some(
            DetectionSignal::new(SignalSource::Statistical, name, severity, contribution)
                .with_description(format!("experimental model score {:.2}", assessment.score)),
        )
    }
}

/// Turns the per-file assessment into a signal.
pub struct StatisticalDetector;

impl Detector for StatisticalDetector {
    fn source(&self) -> SignalSource {
        SignalSource::Statistical
    }

    fn name(&self) -> &str {
        "statistical"
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Vec<DetectionSignal> {
        ctx.statistical
            .and_then(StatisticalScorer::signal)
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::filetype::FileType;
    use crate::utils::hash::DigestSet;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn record(size: u64, ext: Option<&str>) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/scan/f"),
            size,
            digests: DigestSet::new(),
            entropy: 0.0,
            extension: ext.map(str::to_string),
            content_type: FileType::Binary,
        }
    }

    fn report(entropy: u8, mismatch: u8, strings: u8, packer: u8) -> HeuristicReport {
        HeuristicReport {
            entropy_score: entropy,
            mismatch_score: mismatch,
            string_score: strings,
            packer_score: packer,
            ..Default::default()
        }
    }

    #[test]
    fn test_all_features_saturated() {
        let scorer = StatisticalScorer::builtin();
        let assessment = scorer.assess(&record(10, Some("vbs")), &report(30, 25, 25, 20));
        // size anomaly contributes 0.8 of its weight
        assert!((assessment.score - 0.98).abs() < 1e-9);
        assert_eq!(assessment.band, StatisticalBand::MaliciousLeaning);

        let signal = StatisticalScorer::signal(&assessment).unwrap();
        assert_eq!(signal.severity, Severity::Medium);
        assert_eq!(signal.score, 98);
    }

    #[test]
    fn test_benign_emits_no_signal() {
        let scorer = StatisticalScorer::builtin();
        let assessment = scorer.assess(&record(4096, Some("txt")), &report(0, 0, 8, 0));
        assert!(assessment.score < SUSPICIOUS_BAND);
        assert!(StatisticalScorer::signal(&assessment).is_none());
    }

    #[test]
    fn test_suspicious_band() {
        let scorer = StatisticalScorer::builtin();
        // entropy .25 + mismatch .20 = .45
        let assessment = scorer.assess(&record(4096, Some("pdf")), &report(30, 25, 0, 0));
        assert_eq!(assessment.band, StatisticalBand::Suspicious);
        let signal = StatisticalScorer::signal(&assessment).unwrap();
        assert_eq!(signal.severity, Severity::Low);
        assert_eq!(signal.score, 45);
    }

    #[test]
    fn test_large_file_anomaly() {
        let features =
            StatisticalScorer::features(&record(200 * 1024 * 1024, None), &report(0, 0, 0, 0));
        assert_eq!(features.file_size_anomaly, 0.6);
        assert_eq!(features.rare_extension, 0.0);
    }

    #[test]
    fn test_model_weights_normalized() {
        let model = StatisticalModel {
            version: "t".to_string(),
            weights: FeatureWeights {
                entropy: 2.0,
                suspicious_strings: 2.0,
                extension_mismatch: 0.0,
                packer: 0.0,
                file_size_anomaly: 0.0,
                rare_extension: 0.0,
            },
        };
        let scorer = StatisticalScorer::new(model).unwrap();
        let score = scorer.score(&Features {
            entropy: 1.0,
            ..Default::default()
        });
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"version": "x", "weights": {"entropy": -1.0, "packer": 1.0}}"#)
            .unwrap();
        assert!(matches!(
            StatisticalModel::load(file.path()),
            Err(Error::IndexUnavailable { .. })
        ));
    }

    #[test]
    fn test_load_model_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"version": "1.0.0-experimental", "feature_weights": {"entropy": 1.0}}"#)
            .unwrap();
        let model = StatisticalModel::load(file.path()).unwrap();
        let scorer = StatisticalScorer::new(model).unwrap();
        assert_eq!(scorer.version(), "1.0.0-experimental");
    }
}
