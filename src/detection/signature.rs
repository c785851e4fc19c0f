//! Signature index: exact digest lookup against known-bad files.

use super::{DetectionContext, Detector};
use crate::core::error::{Error, Result};
use crate::core::types::{DetectionSignal, Severity, SignalSource};
use crate::utils::hash::{DigestAlgorithm, DigestSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// EICAR test file standard string.
/// This is the industry-standard test file for antivirus software.
pub const EICAR_STRING: &str =
    "X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// EICAR test file SHA256 hash.
pub const EICAR_SHA256: &str = "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f";

/// EICAR test file MD5 hash.
pub const EICAR_MD5: &str = "44d88612fea8a8f36de82e1278abb02f";

/// A known-bad file identified by one or more digests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Unique identifier (e.g., "MAL-00001")
    pub id: String,
    /// Human-readable name (e.g., "Trojan.GenericKD")
    pub name: String,
    #[serde(default, alias = "hash_sha256", skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, alias = "hash_md5", skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    pub severity: Severity,
    /// Free-form threat family (trojan, ransomware, testfile ...)
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_category() -> String {
    "generic".to_string()
}

impl Signature {
    /// Create a new SHA-256 signature.
    pub fn new_sha256(
        id: impl Into<String>,
        name: impl Into<String>,
        sha256: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sha256: Some(sha256.into().to_lowercase()),
            md5: None,
            severity,
            category: default_category(),
            description: String::new(),
            enabled: true,
        }
    }

    /// Create a new MD5 signature.
    pub fn new_md5(
        id: impl Into<String>,
        name: impl Into<String>,
        md5: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sha256: None,
            md5: Some(md5.into().to_lowercase()),
            severity,
            category: default_category(),
            description: String::new(),
            enabled: true,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Hex digest for an algorithm, if this signature carries one.
    pub fn digest_hex(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        match algorithm {
            DigestAlgorithm::Sha256 => self.sha256.as_deref(),
            DigestAlgorithm::Md5 => self.md5.as_deref(),
        }
    }

    /// The EICAR test signature.
    pub fn eicar() -> Self {
        Self {
            id: "EICAR-TEST".to_string(),
            name: "EICAR-Test-File".to_string(),
            sha256: Some(EICAR_SHA256.to_string()),
            md5: Some(EICAR_MD5.to_string()),
            severity: Severity::Low,
            category: "testfile".to_string(),
            description: "EICAR Anti-Virus Test File - harmless file used to verify scanner functionality".to_string(),
            enabled: true,
        }
    }
}

/// Signature interchange file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureFile {
    /// Database version (e.g., "2025.01.15")
    pub version: String,
    /// Timestamp of last update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    pub signatures: Vec<Signature>,
}

impl SignatureFile {
    /// Create a new empty signature file.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            updated_at: Some(chrono::Utc::now().to_rfc3339()),
            signatures: Vec::new(),
        }
    }

    /// Load signatures from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::SignatureLoad(format!("Failed to parse signature file: {}", e))
        })
    }

    /// Save signatures to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::file_write(path, e))?;
        }
        std::fs::write(path, contents).map_err(|e| Error::file_write(path, e))
    }
}

/// A signature hit for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureMatch {
    pub signature: Signature,
    /// Algorithm whose digest matched
    pub algorithm: DigestAlgorithm,
}

impl SignatureMatch {
    pub fn to_signal(&self) -> DetectionSignal {
        let description = if self.signature.description.is_empty() {
            format!("{} digest match ({})", self.algorithm, self.signature.id)
        } else {
            format!(
                "{} ({} digest match, {})",
                self.signature.description, self.algorithm, self.signature.id
            )
        };
        DetectionSignal::new(
            SignalSource::Signature,
            self.signature.name.clone(),
            self.signature.severity,
            100,
        )
        .with_description(description)
    }
}

/// Outcome of merging a signature file into the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportResult {
    pub added: usize,
    pub skipped: usize,
}

/// Summary of index contents.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub version: String,
    pub signature_count: usize,
    pub sha256_count: usize,
    pub md5_count: usize,
}

/// In-memory digest index. Built once, then shared read-only.
#[derive(Debug, Default)]
pub struct SignatureIndex {
    version: String,
    signatures: Vec<Signature>,
    by_digest: HashMap<DigestAlgorithm, HashMap<Vec<u8>, usize>>,
}

impl SignatureIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            version: "builtin".to_string(),
            ..Default::default()
        }
    }

    /// Create an index holding only the built-in signatures.
    pub fn builtin() -> Self {
        let mut index = Self::new();
        index.insert(Signature::eicar());
        index
    }

    /// Load an index from a signature file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut index = Self::new();
        index.import_file(path)?;
        Ok(index)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Add a signature to the index.
    ///
    /// Digests that fail to parse are skipped with a warning. Returns false
    /// when the signature is disabled or carries no usable digest.
    pub fn insert(&mut self, signature: Signature) -> bool {
        if !signature.enabled {
            return false;
        }

        let mut parsed = Vec::new();
        for algorithm in DigestAlgorithm::ALL {
            let Some(hex_digest) = signature.digest_hex(algorithm) else {
                continue;
            };
            let mut digest = DigestSet::new();
            if digest.insert_hex(algorithm, hex_digest) {
                if let Some(bytes) = digest.get(algorithm) {
                    parsed.push((algorithm, bytes.to_vec()));
                }
            } else {
                log::warn!(
                    "Signature {} has an invalid {} digest, skipping it",
                    signature.id,
                    algorithm
                );
            }
        }

        if parsed.is_empty() {
            return false;
        }

        let slot = self.signatures.len();
        let severity = signature.severity;
        self.signatures.push(signature);

        for (algorithm, bytes) in parsed {
            let table = self.by_digest.entry(algorithm).or_default();
            match table.get(&bytes) {
                Some(&existing) if self.signatures[existing].severity >= severity => {}
                _ => {
                    table.insert(bytes, slot);
                }
            }
        }
        true
    }

    /// Merge signatures from a JSON file.
    pub fn import_file(&mut self, path: &Path) -> Result<ImportResult> {
        let file = SignatureFile::load(path)?;
        let mut result = ImportResult::default();

        for signature in file.signatures {
            if self.insert(signature) {
                result.added += 1;
            } else {
                result.skipped += 1;
            }
        }

        self.version = file.version;
        log::info!(
            "Imported {} signatures from {:?} ({} skipped)",
            result.added,
            path,
            result.skipped
        );
        Ok(result)
    }

    /// Snapshot the index as an interchange file.
    pub fn to_file(&self) -> SignatureFile {
        let mut file = SignatureFile::new(self.version.clone());
        file.signatures = self.signatures.clone();
        file
    }

    /// Write the index to a JSON file.
    pub fn export_file(&self, path: &Path) -> Result<usize> {
        let file = self.to_file();
        file.save(path)?;
        Ok(file.signatures.len())
    }

    /// Look up a file's digests.
    ///
    /// Every algorithm present is consulted, strongest first. When several
    /// match, the highest severity wins; ties go to the stronger algorithm.
    pub fn lookup(&self, digests: &DigestSet) -> Option<SignatureMatch> {
        let mut best: Option<(usize, DigestAlgorithm)> = None;

        for (algorithm, bytes) in digests.iter() {
            let Some(&slot) = self.by_digest.get(&algorithm).and_then(|t| t.get(bytes)) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((current, _)) => {
                    self.signatures[slot].severity > self.signatures[current].severity
                }
            };
            if better {
                best = Some((slot, algorithm));
            }
        }

        best.map(|(slot, algorithm)| SignatureMatch {
            signature: self.signatures[slot].clone(),
            algorithm,
        })
    }

    pub fn info(&self) -> IndexInfo {
        let count = |algorithm| self.by_digest.get(&algorithm).map_or(0, HashMap::len);
        IndexInfo {
            version: self.version.clone(),
            signature_count: self.signatures.len(),
            sha256_count: count(DigestAlgorithm::Sha256),
            md5_count: count(DigestAlgorithm::Md5),
        }
    }
}

/// Exact digest detector.
pub struct SignatureDetector {
    index: Arc<SignatureIndex>,
}

impl SignatureDetector {
    pub fn new(index: Arc<SignatureIndex>) -> Self {
        Self { index }
    }
}

impl Detector for SignatureDetector {
    fn source(&self) -> SignalSource {
        SignalSource::Signature
    }

    fn name(&self) -> &str {
        "signature"
    }

    fn evaluate(&self, ctx: &DetectionContext<'_>) -> Vec<DetectionSignal> {
        self.index
            .lookup(&ctx.record.digests)
            .map(|m| m.to_signal())
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hash::{md5_bytes, sha256_bytes};
    use tempfile::tempdir;

    fn digests_of(data: &[u8]) -> DigestSet {
        let mut set = DigestSet::new();
        set.insert_hex(DigestAlgorithm::Sha256, &sha256_bytes(data));
        set.insert_hex(DigestAlgorithm::Md5, &md5_bytes(data));
        set
    }

    #[test]
    fn test_eicar_builtin() {
        let index = SignatureIndex::builtin();
        let hit = index.lookup(&digests_of(EICAR_STRING.as_bytes())).unwrap();
        assert_eq!(hit.signature.id, "EICAR-TEST");
        assert_eq!(hit.algorithm, DigestAlgorithm::Sha256);

        let signal = hit.to_signal();
        assert_eq!(signal.source, SignalSource::Signature);
        assert_eq!(signal.score, 100);
    }

    #[test]
    fn test_no_match() {
        let index = SignatureIndex::builtin();
        assert!(index.lookup(&digests_of(b"benign")).is_none());
        assert!(index.lookup(&DigestSet::new()).is_none());
    }

    #[test]
    fn test_higher_severity_wins_across_algorithms() {
        let data = b"payload";
        let mut index = SignatureIndex::new();
        index.insert(Signature::new_sha256("S1", "Strong.Low", sha256_bytes(data), Severity::Low));
        index.insert(Signature::new_md5("M1", "Weak.Critical", md5_bytes(data), Severity::Critical));

        let hit = index.lookup(&digests_of(data)).unwrap();
        assert_eq!(hit.signature.id, "M1");
        assert_eq!(hit.algorithm, DigestAlgorithm::Md5);
    }

    #[test]
    fn test_equal_severity_prefers_stronger_algorithm() {
        let data = b"payload";
        let mut index = SignatureIndex::new();
        index.insert(Signature::new_md5("M1", "Weak", md5_bytes(data), Severity::High));
        index.insert(Signature::new_sha256("S1", "Strong", sha256_bytes(data), Severity::High));

        let hit = index.lookup(&digests_of(data)).unwrap();
        assert_eq!(hit.signature.id, "S1");
        assert_eq!(hit.algorithm, DigestAlgorithm::Sha256);
    }

    #[test]
    fn test_md5_only_digest_set_still_matches() {
        let data = b"legacy";
        let mut index = SignatureIndex::new();
        index.insert(Signature::new_md5("M1", "Legacy", md5_bytes(data), Severity::Medium));

        let mut digests = DigestSet::new();
        digests.insert_hex(DigestAlgorithm::Md5, &md5_bytes(data));
        assert_eq!(index.lookup(&digests).unwrap().signature.id, "M1");
    }

    #[test]
    fn test_invalid_and_disabled_signatures_skipped() {
        let mut index = SignatureIndex::new();
        assert!(!index.insert(Signature::new_sha256("BAD", "Bad", "zz", Severity::High)));

        let mut disabled = Signature::eicar();
        disabled.enabled = false;
        assert!(!index.insert(disabled));
        assert!(index.is_empty());
    }

    #[test]
    fn test_export_import_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sigs.json");

        let mut index = SignatureIndex::builtin();
        index.insert(
            Signature::new_sha256("MAL-00001", "Trojan.Generic", sha256_bytes(b"evil"), Severity::High)
                .with_category("trojan"),
        );
        assert_eq!(index.export_file(&path).unwrap(), 2);

        let loaded = SignatureIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.info().sha256_count, 2);
        assert_eq!(loaded.info().md5_count, 1);
        assert!(loaded.lookup(&digests_of(b"evil")).is_some());
    }

    #[test]
    fn test_import_skips_bad_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sigs.json");
        std::fs::write(
            &path,
            format!(
                r#"{{"version":"2025.01.15","signatures":[
                    {{"id":"A","name":"Good","sha256":"{}","severity":"high"}},
                    {{"id":"B","name":"Broken","sha256":"nothex","severity":"high"}}
                ]}}"#,
                sha256_bytes(b"x")
            ),
        )
        .unwrap();

        let mut index = SignatureIndex::new();
        let result = index.import_file(&path).unwrap();
        assert_eq!(result, ImportResult { added: 1, skipped: 1 });
        assert_eq!(index.version(), "2025.01.15");
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(SignatureIndex::load(Path::new("/nonexistent/sigs.json")).is_err());
    }
}
