//! Core type definitions used throughout hexscan.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::scanner::filetype::FileType;
use crate::utils::hash::{DigestAlgorithm, DigestSet};

/// Severity level of a detection signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only
    Info,
    /// Low risk - potentially unwanted but not necessarily malicious
    Low,
    /// Medium risk - suspicious behavior detected
    Medium,
    /// High risk - likely malicious
    High,
    /// Critical risk - confirmed malware
    Critical,
}

impl Severity {
    /// Get a numeric score for the severity (0-100).
    pub fn score(&self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 25,
            Severity::Medium => 50,
            Severity::High => 75,
            Severity::Critical => 100,
        }
    }

    /// Create severity from a heuristic total.
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => Severity::Critical,
            70..=89 => Severity::High,
            50..=69 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Get string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse from string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which detector produced a signal.
///
/// The declaration order is the order signals appear in a [`ScanResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    /// Exact digest match against the signature index
    Signature,
    /// Heuristic scorer
    Heuristic,
    /// Declarative pattern rule
    Pattern,
    /// Experimental statistical scorer
    Statistical,
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalSource::Signature => write!(f, "Signature"),
            SignalSource::Heuristic => write!(f, "Heuristic"),
            SignalSource::Pattern => write!(f, "Pattern"),
            SignalSource::Statistical => write!(f, "Statistical"),
        }
    }
}

/// One finding produced by one detector for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSignal {
    /// Detector that produced the signal
    pub source: SignalSource,
    /// Signature, rule, or detector name
    pub name: String,
    /// Severity level
    pub severity: Severity,
    /// Score contribution (0-100)
    pub score: u8,
    /// Human readable description
    pub description: String,
}

impl DetectionSignal {
    /// Create a new signal.
    pub fn new(source: SignalSource, name: impl Into<String>, severity: Severity, score: u8) -> Self {
        Self {
            source,
            name: name.into(),
            severity,
            score: score.min(100),
            description: String::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Identity and basic facts about a scanned file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Content digests
    pub digests: DigestSet,
    /// Shannon entropy over the whole file (0.0 - 8.0)
    pub entropy: f64,
    /// Declared extension, lowercased
    pub extension: Option<String>,
    /// Type sniffed from the content header
    pub content_type: FileType,
}

impl FileRecord {
    /// Hex SHA-256 of the file, if computed.
    pub fn sha256(&self) -> Option<String> {
        self.digests.hex(DigestAlgorithm::Sha256)
    }

    /// Lowercased extension of a path.
    pub fn extension_of(path: &std::path::Path) -> Option<String> {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .filter(|e| !e.is_empty())
    }
}

/// Final classification of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Clean,
    Suspicious,
    Malicious,
}

impl Verdict {
    /// Check if this verdict should be reported.
    pub fn is_flagged(&self) -> bool {
        !matches!(self, Verdict::Clean)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Clean => "clean",
            Verdict::Suspicious => "suspicious",
            Verdict::Malicious => "malicious",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "clean" => Some(Verdict::Clean),
            "suspicious" => Some(Verdict::Suspicious),
            "malicious" => Some(Verdict::Malicious),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Clean => write!(f, "CLEAN"),
            Verdict::Suspicious => write!(f, "SUSPICIOUS"),
            Verdict::Malicious => write!(f, "MALICIOUS"),
        }
    }
}

/// Recommended remediation action for a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemediationAction {
    /// Nothing to do
    None,
    /// Manual review required
    Review,
    /// Move to quarantine store
    Quarantine,
}

impl RemediationAction {
    /// Default action offered for a verdict.
    pub fn for_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Malicious => RemediationAction::Quarantine,
            Verdict::Suspicious => RemediationAction::Review,
            Verdict::Clean => RemediationAction::None,
        }
    }
}

impl std::fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemediationAction::None => write!(f, "None"),
            RemediationAction::Review => write!(f, "Review"),
            RemediationAction::Quarantine => write!(f, "Quarantine"),
        }
    }
}

/// What happened when a result was handed to the quarantine store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum QuarantineDisposition {
    /// A new entry was created and the original removed
    Quarantined { entry_id: u64 },
    /// The path already had an active entry
    AlreadyQuarantined { entry_id: u64 },
    /// Isolation failed; the original is untouched
    Failed { reason: String },
}

/// Result of scanning one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub record: FileRecord,
    /// Signals ordered by source
    pub signals: Vec<DetectionSignal>,
    /// Aggregate score (0-100)
    pub score: u8,
    pub verdict: Verdict,
    pub recommended_action: RemediationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine: Option<QuarantineDisposition>,
}

impl ScanResult {
    /// Check if any signal came from the given source.
    pub fn has_source(&self, source: SignalSource) -> bool {
        self.signals.iter().any(|s| s.source == source)
    }

    /// The most severe signal, used as the threat name.
    pub fn primary_signal(&self) -> Option<&DetectionSignal> {
        self.signals
            .iter()
            .max_by(|a, b| a.severity.cmp(&b.severity).then(b.source.cmp(&a.source)))
    }

    /// Name to record for this result in quarantine and reports.
    pub fn threat_name(&self) -> String {
        self.primary_signal()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| self.verdict.to_string())
    }
}
