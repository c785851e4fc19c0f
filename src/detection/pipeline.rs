//! Per-file detection pipeline.
//!
//! digest -> record -> heuristic report -> detectors -> aggregate

use std::path::Path;
use std::sync::Arc;

use super::heuristic::{HeuristicDetector, HeuristicScorer};
use super::rules::{PatternDetector, RuleEngine};
use super::signature::{SignatureDetector, SignatureIndex};
use super::statistical::{StatisticalDetector, StatisticalModel, StatisticalScorer};
use super::verdict::VerdictPolicy;
use super::{DetectionContext, Detector};
use crate::core::config::{Config, ScanOptions};
use crate::core::error::{Error, Result};
use crate::core::types::{FileRecord, RemediationAction, ScanResult};
use crate::scanner::filetype::FileTypeDetector;
use crate::utils::hash::DigestEngine;

/// Runs every enabled detector against a file and aggregates the result.
pub struct DetectionPipeline {
    digest: DigestEngine,
    heuristic: Option<Arc<HeuristicScorer>>,
    heuristic_enabled: bool,
    statistical: Option<Arc<StatisticalScorer>>,
    detectors: Vec<Box<dyn Detector>>,
    policy: VerdictPolicy,
    warnings: Vec<String>,
}

impl DetectionPipeline {
    /// Build the pipeline for one job.
    ///
    /// A signature, rule or model source that fails to load drops its
    /// detector for the job and records one warning.
    pub fn build(config: &Config, options: &ScanOptions) -> Self {
        let detection = &config.detection;
        let mut pipeline = Self {
            digest: DigestEngine::new(detection.content_sample_bytes()),
            heuristic: None,
            heuristic_enabled: options.enable_heuristic,
            statistical: None,
            detectors: Vec::new(),
            policy: VerdictPolicy::from_config(&config.verdict),
            warnings: Vec::new(),
        };

        if detection.enable_signatures {
            match Self::load_signatures(config) {
                Ok(index) => {
                    log::debug!("Signature index ready: {} entries", index.len());
                    pipeline
                        .detectors
                        .push(Box::new(SignatureDetector::new(Arc::new(index))));
                }
                Err(e) => pipeline.unavailable(e),
            }
        }

        if options.enable_heuristic || options.enable_statistical {
            let scorer = Arc::new(HeuristicScorer::from_config(detection));
            if options.enable_heuristic {
                pipeline
                    .detectors
                    .push(Box::new(HeuristicDetector::new(Arc::clone(&scorer))));
            }
            pipeline.heuristic = Some(scorer);
        }

        if options.enable_pattern_rules {
            match Self::load_rules(config) {
                Ok(engine) => {
                    log::debug!("Rule engine ready: {} rules", engine.rule_count());
                    pipeline
                        .detectors
                        .push(Box::new(PatternDetector::new(Arc::new(engine))));
                }
                Err(e) => pipeline.unavailable(e),
            }
        }

        if options.enable_statistical {
            let scorer = match &detection.statistical_model_path {
                Some(path) => StatisticalModel::load(path).and_then(StatisticalScorer::new),
                None => Ok(StatisticalScorer::builtin()),
            };
            match scorer {
                Ok(scorer) => {
                    log::debug!("Statistical scorer ready: model {}", scorer.version());
                    pipeline.statistical = Some(Arc::new(scorer));
                    pipeline.detectors.push(Box::new(StatisticalDetector));
                }
                Err(e) => pipeline.unavailable(e),
            }
        }

        pipeline
    }

    fn load_signatures(config: &Config) -> Result<SignatureIndex> {
        let mut index = if config.detection.builtin_signatures {
            SignatureIndex::builtin()
        } else {
            SignatureIndex::new()
        };

        if let Some(path) = &config.detection.signature_path {
            index
                .import_file(path)
                .map_err(|e| Error::index_unavailable("signature", e.to_string()))?;
        }

        Ok(index)
    }

    fn load_rules(config: &Config) -> Result<RuleEngine> {
        let mut engine = if config.detection.builtin_rules {
            RuleEngine::with_default_rules()
                .map_err(|e| Error::index_unavailable("pattern", e.to_string()))?
        } else {
            RuleEngine::new()
        };

        if let Some(path) = &config.detection.rules_path {
            engine
                .load_rules_file(path)
                .map_err(|e| Error::index_unavailable("pattern", e.to_string()))?;
        }

        Ok(engine)
    }

    fn unavailable(&mut self, error: Error) {
        log::warn!("{}", error);
        self.warnings.push(error.to_string());
    }

    /// Register an additional detector.
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Job-level warnings collected while building.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Scan one file. Only a read failure is an error.
    pub fn scan_file(&self, path: &Path) -> Result<ScanResult> {
        let digest = self.digest.digest_file(path)?;

        let record = FileRecord {
            path: path.to_path_buf(),
            size: digest.size,
            content_type: FileTypeDetector::detect_from_bytes(&digest.sample),
            extension: FileRecord::extension_of(path),
            digests: digest.digests,
            entropy: digest.entropy,
        };
        let sample = digest.sample.as_slice();

        let report = self
            .heuristic
            .as_ref()
            .map(|scorer| scorer.analyze(&record, Some(sample)));
        let assessment = match (&self.statistical, &report) {
            (Some(scorer), Some(report)) => Some(scorer.assess(&record, report)),
            _ => None,
        };

        let ctx = DetectionContext {
            record: &record,
            content: Some(sample),
            heuristic: report.as_ref(),
            statistical: assessment.as_ref(),
        };

        let mut signals: Vec<_> = self
            .detectors
            .iter()
            .flat_map(|detector| detector.evaluate(&ctx))
            .collect();
        signals.sort_by_key(|s| s.source);

        let heuristic_total = report
            .as_ref()
            .filter(|_| self.heuristic_enabled)
            .map(|r| r.total);
        let aggregate = self.policy.aggregate(
            &signals,
            heuristic_total,
            assessment.map(|a| a.score),
        );

        if aggregate.verdict.is_flagged() {
            log::info!(
                "{}: {} (score {})",
                record.path.display(),
                aggregate.verdict,
                aggregate.score
            );
        }

        Ok(ScanResult {
            record,
            signals,
            score: aggregate.score,
            verdict: aggregate.verdict,
            recommended_action: RemediationAction::for_verdict(aggregate.verdict),
            quarantine: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DetectionSignal, Severity, SignalSource, Verdict};
    use crate::detection::signature::EICAR_STRING;
    use rand::RngCore;
    use std::fs;
    use tempfile::tempdir;

    fn pipeline() -> DetectionPipeline {
        let config = Config::default();
        DetectionPipeline::build(&config, &ScanOptions::from_config(&config))
    }

    #[test]
    fn test_eicar_is_malicious() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eicar.com");
        fs::write(&path, EICAR_STRING).unwrap();

        let result = pipeline().scan_file(&path).unwrap();
        assert_eq!(result.verdict, Verdict::Malicious);
        assert_eq!(result.score, 100);
        assert_eq!(result.recommended_action, RemediationAction::Quarantine);
        assert_eq!(result.signals[0].source, SignalSource::Signature);
    }

    #[test]
    fn test_zero_byte_file_is_clean() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        fs::write(&path, b"").unwrap();

        let result = pipeline().scan_file(&path).unwrap();
        assert_eq!(result.verdict, Verdict::Clean);
        assert_eq!(result.score, 0);
        assert!(result.signals.is_empty());
        assert_eq!(result.recommended_action, RemediationAction::None);
    }

    #[test]
    fn test_heuristic_path_malicious() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");

        let mut data = vec![0u8; 64 * 1024];
        rand::thread_rng().fill_bytes(&mut data);
        data[..2].copy_from_slice(b"MZ");
        let strings = b"VirtualAlloc CreateRemoteThread";
        data[4096..4096 + strings.len()].copy_from_slice(strings);
        fs::write(&path, &data).unwrap();

        let result = pipeline().scan_file(&path).unwrap();
        assert!(result.record.entropy > 7.8);
        assert!(result.has_source(SignalSource::Heuristic));
        assert!(!result.has_source(SignalSource::Signature));
        assert!(result.score >= 70);
        assert_eq!(result.verdict, Verdict::Malicious);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = pipeline()
            .scan_file(Path::new("/nonexistent/hexscan/x"))
            .unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_unavailable_signature_source_drops_detector() {
        let mut config = Config::default();
        config.detection.signature_path = Some("/nonexistent/hexscan/sigs.json".into());

        let pipeline = DetectionPipeline::build(&config, &ScanOptions::from_config(&config));
        assert_eq!(pipeline.warnings().len(), 1);
        assert!(!pipeline.detector_names().contains(&"signature"));
        assert!(pipeline.detector_names().contains(&"heuristic"));
    }

    #[test]
    fn test_signals_ordered_by_source() {
        struct Fixed;
        impl Detector for Fixed {
            fn source(&self) -> SignalSource {
                SignalSource::Heuristic
            }
            fn name(&self) -> &str {
                "fixed"
            }
            fn evaluate(&self, _ctx: &DetectionContext<'_>) -> Vec<DetectionSignal> {
                vec![DetectionSignal::new(
                    SignalSource::Heuristic,
                    "Custom",
                    Severity::Low,
                    1,
                )]
            }
        }

        let dir = tempdir().unwrap();
        let path = dir.path().join("eicar.txt");
        fs::write(&path, EICAR_STRING).unwrap();

        let result = pipeline()
            .with_detector(Box::new(Fixed))
            .scan_file(&path)
            .unwrap();
        let sources: Vec<_> = result.signals.iter().map(|s| s.source).collect();
        let mut sorted = sources.clone();
        sorted.sort();
        assert_eq!(sources, sorted);
        assert_eq!(sources[0], SignalSource::Signature);
        assert!(result.signals.iter().any(|s| s.name == "Custom"));
    }

    #[test]
    fn test_statistical_alone_stays_suspicious() {
        let mut config = Config::default();
        config.detection.enable_statistical = true;
        config.detection.heuristic_threshold = 100;
        config.detection.enable_pattern_rules = false;
        let options = ScanOptions::from_config(&config);
        let pipeline = DetectionPipeline::build(&config, &options);

        let dir = tempdir().unwrap();
        let path = dir.path().join("dropper.vbs");
        let mut data = vec![0u8; 512];
        rand::thread_rng().fill_bytes(&mut data);
        data[..2].copy_from_slice(b"MZ");
        data[100..112].copy_from_slice(b"VirtualAlloc");
        fs::write(&path, &data).unwrap();

        let result = pipeline.scan_file(&path).unwrap();
        assert!(!result.has_source(SignalSource::Heuristic));
        assert!(result.has_source(SignalSource::Statistical));
        assert_ne!(result.verdict, Verdict::Malicious);
    }
}
