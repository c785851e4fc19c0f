//! Heuristic scoring: four sub-scores summed into a 0-100 total.
//!
//! | Indicator            | Points                       |
//! |----------------------|------------------------------|
//! | entropy              | 0-30 (ramp from 6.0 to 7.5)  |
//! | type/extension clash | 25                           |
//! | suspicious strings   | 0-25 (saturates at 3 hits)   |
//! | packer fingerprint   | 20                           |
//!
//! A double extension such as `invoice.pdf.exe` is reported as an
//! indicator but adds no points.

use super::entropy::EntropyAnalyzer;
use super::packer::{PackerDetector, PackerInfo, PACKER_POINTS};
use super::strings::StringMatcher;
use std::path::Path;
use crate::core::config::DetectionConfig;
use crate::core::types::{DetectionSignal, FileRecord, Severity, SignalSource};

/// Points for a sniffed type that contradicts the declared extension.
pub const MISMATCH_POINTS: u8 = 25;

/// Final extensions that make a preceding decoy extension suspicious.
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "scr", "com", "pif", "bat", "cmd", "cpl", "msi", "dll", "hta", "js", "jse", "vbs",
    "vbe", "wsf", "ps1", "jar", "lnk",
];

/// The decoy and executable extensions of a name like `invoice.pdf.exe`.
pub fn double_extension(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    let mut parts = name.rsplit('.');
    let last = parts.next()?;
    let decoy = parts.next()?;
    let stem = parts.next()?;

    if stem.is_empty() || decoy.is_empty() || !EXECUTABLE_EXTENSIONS.contains(&last) {
        return None;
    }
    Some((decoy.to_string(), last.to_string()))
}

/// Per-file heuristic breakdown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeuristicReport {
    pub entropy: f64,
    pub entropy_score: u8,
    pub mismatch_score: u8,
    pub string_score: u8,
    pub packer_score: u8,
    /// Sum of sub-scores, capped at 100
    pub total: u8,
    /// Distinct suspicious strings found
    pub strings_found: Vec<String>,
    pub packer: Option<PackerInfo>,
    /// Decoy and executable extension when the name carries both
    pub double_extension: Option<(String, String)>,
    /// Human readable indicators with their points
    pub indicators: Vec<(String, u8)>,
}

impl HeuristicReport {
    fn add_indicator(&mut self, description: String, score: u8) {
        if score > 0 {
            self.indicators.push((description, score));
        }
    }

    /// Short summary of the contributing indicators.
    pub fn summary(&self) -> String {
        if self.indicators.is_empty() {
            return "no heuristic indicators".to_string();
        }
        self.indicators
            .iter()
            .map(|(desc, score)| match *score {
                0 => desc.clone(),
                _ => format!("{} (+{})", desc, score),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Heuristic scoring engine.
pub struct HeuristicScorer {
    entropy: EntropyAnalyzer,
    strings: StringMatcher,
    packers: PackerDetector,
    threshold: u8,
}

impl HeuristicScorer {
    /// Create a scorer with an explicit string list and signal threshold.
    pub fn new(suspicious_strings: &[String], threshold: u8) -> Self {
        Self {
            entropy: EntropyAnalyzer::new(),
            strings: StringMatcher::new(suspicious_strings),
            packers: PackerDetector::new(),
            threshold,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(&config.suspicious_strings, config.heuristic_threshold)
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Compute all sub-scores for a file. Never fails.
    ///
    /// Without a content sample the string and packer sub-scores are zero.
    pub fn analyze(&self, record: &FileRecord, sample: Option<&[u8]>) -> HeuristicReport {
        let mut report = HeuristicReport {
            entropy: record.entropy,
            ..Default::default()
        };

        report.entropy_score = self.entropy.score(record.entropy);
        report.add_indicator(
            format!(
                "{} entropy: {:.2}",
                self.entropy.classify(record.entropy),
                record.entropy
            ),
            report.entropy_score,
        );

        if record.content_type.mismatches(record.extension.as_deref()) {
            report.mismatch_score = MISMATCH_POINTS;
            report.add_indicator(
                format!(
                    "{} content with .{} extension",
                    record.content_type,
                    record.extension.as_deref().unwrap_or_default()
                ),
                MISMATCH_POINTS,
            );
        }

        if let Some((decoy, last)) = double_extension(&record.path) {
            report
                .indicators
                .push((format!("Double extension: .{}.{}", decoy, last), 0));
            report.double_extension = Some((decoy, last));
        }

        if let Some(sample) = sample {
            report.strings_found = self.strings.find_distinct(sample);
            report.string_score = StringMatcher::score(report.strings_found.len());
            report.add_indicator(
                format!("Suspicious strings: {}", report.strings_found.join(", ")),
                report.string_score,
            );

            if PackerDetector::applies_to(record.content_type) {
                if let Some(packer) = self.packers.detect(sample) {
                    report.packer_score = PACKER_POINTS;
                    report.add_indicator(
                        format!("Packed with: {} (offset {:#x})", packer.name, packer.offset),
                        PACKER_POINTS,
                    );
                    report.packer = Some(packer);
                }
            }
        }

        let sum = report.entropy_score as u16
            + report.mismatch_score as u16
            + report.string_score as u16
            + report.packer_score as u16;
        report.total = sum.min(100) as u8;

        report
    }

    /// Turn a report into a signal when its total reaches the threshold.
    pub fn signal(&self, report: &HeuristicReport) -> Option<DetectionSignal> {
        if report.total < self.threshold || report.total == 0 {
            return None;
        }

        let severity = Severity::from_score(report.total);
        let name = match &report.packer {
            Some(packer) => format!("Heuristic.Packed.{}", packer.name),
            None => format!("Heuristic.{}", severity.as_str()),
        };

        Some(
            DetectionSignal::new(SignalSource::Heuristic, name, severity, report.total)
                .with_description(report.summary()),
        )
    }

    /// Analyze and convert in one step.
    pub fn score(&self, record: &FileRecord, sample: Option<&[u8]>) -> Option<DetectionSignal> {
        self.signal(&self.analyze(record, sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::default_suspicious_strings;
    use crate::scanner::filetype::FileType;
    use crate::utils::hash::DigestSet;
    use std::path::PathBuf;

    fn record(entropy: f64, ext: Option<&str>, content_type: FileType) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/scan/sample"),
            size: 4096,
            digests: DigestSet::new(),
            entropy,
            extension: ext.map(str::to_string),
            content_type,
        }
    }

    fn scorer() -> HeuristicScorer {
        HeuristicScorer::new(&default_suspicious_strings(), 50)
    }

    #[test]
    fn test_packed_mismatched_executable_scores_high() {
        // entropy 7.8 (30) + mismatch (25) + two strings (17) = 72
        let record = record(7.8, Some("pdf"), FileType::Executable);
        let sample = b"MZ....VirtualAlloc....CreateRemoteThread....";

        let report = scorer().analyze(&record, Some(sample));
        assert_eq!(report.entropy_score, 30);
        assert_eq!(report.mismatch_score, 25);
        assert_eq!(report.string_score, 17);
        assert_eq!(report.packer_score, 0);
        assert_eq!(report.total, 72);

        let signal = scorer().signal(&report).unwrap();
        assert_eq!(signal.source, SignalSource::Heuristic);
        assert_eq!(signal.severity, Severity::High);
        assert_eq!(signal.score, 72);
    }

    #[test]
    fn test_below_threshold_emits_nothing() {
        let record = record(6.75, Some("bin"), FileType::Binary);
        let report = scorer().analyze(&record, Some(b"xor"));
        assert_eq!(report.total, 15 + 8);
        assert!(scorer().signal(&report).is_none());
    }

    #[test]
    fn test_missing_sample_zeroes_content_scores() {
        let record = record(7.9, Some("txt"), FileType::Executable);
        let report = scorer().analyze(&record, None);
        assert_eq!(report.string_score, 0);
        assert_eq!(report.packer_score, 0);
        assert_eq!(report.entropy_score, 30);
        assert_eq!(report.mismatch_score, 25);
        assert_eq!(report.total, 55);
    }

    #[test]
    fn test_packer_and_cap() {
        let mut sample = vec![0u8; 2048];
        sample[..2].copy_from_slice(b"MZ");
        sample[0x1f8..0x1fc].copy_from_slice(b"UPX0");
        let strings = b"VirtualAlloc WriteProcessMemory CreateRemoteThread";
        sample[1200..1200 + strings.len()].copy_from_slice(strings);

        let record = record(7.9, Some("jpg"), FileType::Executable);
        let report = scorer().analyze(&record, Some(&sample));
        assert_eq!(report.packer_score, 20);
        assert_eq!(report.total, 100);

        let signal = scorer().signal(&report).unwrap();
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.name, "Heuristic.Packed.UPX");
    }

    #[test]
    fn test_empty_file_scores_zero() {
        let record = record(0.0, Some("txt"), FileType::Unknown);
        let report = scorer().analyze(&record, Some(&[]));
        assert_eq!(report.total, 0);
        assert!(report.indicators.is_empty());
        assert!(scorer().signal(&report).is_none());
    }

    #[test]
    fn test_double_extension_detection() {
        let found = |name: &str| double_extension(Path::new(name));
        assert_eq!(
            found("/home/user/Invoice.PDF.exe"),
            Some(("pdf".to_string(), "exe".to_string()))
        );
        assert_eq!(
            found("photo.jpg.scr"),
            Some(("jpg".to_string(), "scr".to_string()))
        );
        assert_eq!(found("report.pdf"), None);
        assert_eq!(found("archive.tar.gz"), None);
        assert_eq!(found("setup.exe"), None);
        assert_eq!(found(".hidden.exe"), None);
        assert_eq!(found("name..exe"), None);
    }

    #[test]
    fn test_double_extension_adds_no_points() {
        let mut rec = record(7.8, Some("exe"), FileType::Executable);
        rec.path = PathBuf::from("/scan/invoice.pdf.exe");
        let sample = b"MZ....VirtualAlloc....CreateRemoteThread....";

        let report = scorer().analyze(&rec, Some(sample));
        assert_eq!(
            report.double_extension,
            Some(("pdf".to_string(), "exe".to_string()))
        );
        assert_eq!(report.mismatch_score, 0);
        assert_eq!(report.total, 30 + 17);
        assert!(report
            .indicators
            .contains(&("Double extension: .pdf.exe".to_string(), 0)));
        assert!(report.summary().contains("Double extension: .pdf.exe;"));

        rec.path = PathBuf::from("/scan/invoice.exe");
        assert!(scorer().analyze(&rec, Some(sample)).double_extension.is_none());
    }

    #[test]
    fn test_lowered_threshold_low_severity() {
        let scorer = HeuristicScorer::new(&default_suspicious_strings(), 10);
        let record = record(5.0, None, FileType::Text);
        let signal = scorer.score(&record, Some(b"base64 and xor")).unwrap();
        assert_eq!(signal.score, 17);
        assert_eq!(signal.severity, Severity::Low);
    }
}
