//! Digest engine: content digests, entropy and a content sample from a single
//! streaming pass over a file.

use crate::core::error::{Error, Result};
use crate::detection::heuristic::entropy::entropy_from_histogram;
use md5::{Digest, Md5};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Buffer size for reading files (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
///
/// Declared strongest first, so ordered iteration visits the strongest
/// algorithm before weaker ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Md5,
}

impl DigestAlgorithm {
    /// All algorithms, strongest first.
    pub const ALL: [DigestAlgorithm; 2] = [DigestAlgorithm::Sha256, DigestAlgorithm::Md5];

    /// Relative strength; higher is stronger.
    pub fn strength(&self) -> u8 {
        match self {
            DigestAlgorithm::Sha256 => 2,
            DigestAlgorithm::Md5 => 1,
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Md5 => 16,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Md5 => "md5",
        }
    }

    /// Parse from string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sha256" => Some(DigestAlgorithm::Sha256),
            "md5" => Some(DigestAlgorithm::Md5),
            _ => None,
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "SHA-256"),
            DigestAlgorithm::Md5 => write!(f, "MD5"),
        }
    }
}

/// Map of algorithm to raw digest bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestSet {
    digests: BTreeMap<DigestAlgorithm, Vec<u8>>,
}

impl DigestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a digest, rejecting values of the wrong length.
    pub fn insert(&mut self, algorithm: DigestAlgorithm, bytes: Vec<u8>) -> bool {
        if bytes.len() != algorithm.digest_len() {
            return false;
        }
        self.digests.insert(algorithm, bytes);
        true
    }

    /// Insert a hex-encoded digest.
    pub fn insert_hex(&mut self, algorithm: DigestAlgorithm, hex_digest: &str) -> bool {
        match hex::decode(hex_digest.trim()) {
            Ok(bytes) => self.insert(algorithm, bytes),
            Err(_) => false,
        }
    }

    pub fn get(&self, algorithm: DigestAlgorithm) -> Option<&[u8]> {
        self.digests.get(&algorithm).map(Vec::as_slice)
    }

    /// Lowercase hex rendering of one digest.
    pub fn hex(&self, algorithm: DigestAlgorithm) -> Option<String> {
        self.get(algorithm).map(hex::encode)
    }

    /// Iterate digests, strongest algorithm first.
    pub fn iter(&self) -> impl Iterator<Item = (DigestAlgorithm, &[u8])> {
        self.digests.iter().map(|(a, d)| (*a, d.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl Serialize for DigestSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.digests.len()))?;
        for (algorithm, bytes) in &self.digests {
            map.serialize_entry(algorithm.as_str(), &hex::encode(bytes))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DigestSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut set = DigestSet::new();
        for (name, value) in raw {
            let algorithm = DigestAlgorithm::from_str(&name)
                .ok_or_else(|| D::Error::custom(format!("unknown digest algorithm: {}", name)))?;
            if !set.insert_hex(algorithm, &value) {
                return Err(D::Error::custom(format!("invalid {} digest", name)));
            }
        }
        Ok(set)
    }
}

/// Everything the digest engine learns about a file in one pass.
#[derive(Debug, Clone)]
pub struct FileDigest {
    pub digests: DigestSet,
    /// Bytes read
    pub size: u64,
    /// Shannon entropy over all bytes (0.0 - 8.0)
    pub entropy: f64,
    /// Leading bytes of the file, bounded by the engine's sample limit
    pub sample: Vec<u8>,
}

impl FileDigest {
    /// Whether the sample covers the whole file.
    pub fn sample_complete(&self) -> bool {
        self.sample.len() as u64 == self.size
    }
}

/// Streams a file once, feeding every hasher, the byte histogram and the
/// content sample from the same buffer.
#[derive(Debug, Clone)]
pub struct DigestEngine {
    sample_limit: usize,
}

impl Default for DigestEngine {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

impl DigestEngine {
    /// Create an engine retaining at most `sample_limit` leading bytes.
    pub fn new(sample_limit: usize) -> Self {
        Self { sample_limit }
    }

    pub fn sample_limit(&self) -> usize {
        self.sample_limit
    }

    /// Digest a file on disk.
    ///
    /// Any open or read failure is returned as [`Error::FileRead`]; a partial
    /// digest is never produced.
    pub fn digest_file(&self, path: &Path) -> Result<FileDigest> {
        let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        self.digest_reader(file)
            .map_err(|e| Error::file_read(path, e))
    }

    /// Digest any reader.
    pub fn digest_reader<R: Read>(&self, mut reader: R) -> std::io::Result<FileDigest> {
        let mut sha256 = Sha256::new();
        let mut md5 = Md5::new();
        let mut histogram = [0u64; 256];
        let mut sample = Vec::with_capacity(self.sample_limit.min(BUFFER_SIZE));
        let mut size = 0u64;
        let mut buffer = vec![0u8; BUFFER_SIZE];

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let chunk = &buffer[..bytes_read];

            sha256.update(chunk);
            md5.update(chunk);
            for &byte in chunk {
                histogram[byte as usize] += 1;
            }
            if sample.len() < self.sample_limit {
                let take = (self.sample_limit - sample.len()).min(chunk.len());
                sample.extend_from_slice(&chunk[..take]);
            }
            size += bytes_read as u64;
        }

        let mut digests = DigestSet::new();
        digests.insert(DigestAlgorithm::Sha256, sha256.finalize().to_vec());
        digests.insert(DigestAlgorithm::Md5, md5.finalize().to_vec());

        Ok(FileDigest {
            digests,
            size,
            entropy: entropy_from_histogram(&histogram, size),
            sample,
        })
    }
}

/// Calculate SHA256 hash of bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Calculate MD5 hash of bytes.
pub fn md5_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_bytes() {
        // Test vector: SHA256("hello")
        let hash = sha256_bytes(b"hello");
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_md5_bytes() {
        // Test vector: MD5("hello")
        let hash = md5_bytes(b"hello");
        assert_eq!(hash, "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_digest_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let digest = DigestEngine::default().digest_file(file.path()).unwrap();
        assert_eq!(digest.size, 5);
        assert_eq!(
            digest.digests.hex(DigestAlgorithm::Sha256).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            digest.digests.hex(DigestAlgorithm::Md5).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(digest.sample, b"hello");
        assert!(digest.sample_complete());
    }

    #[test]
    fn test_digest_is_idempotent() {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 251) as u8).collect();
        file.write_all(&data).unwrap();

        let engine = DigestEngine::new(1024);
        let first = engine.digest_file(file.path()).unwrap();
        let second = engine.digest_file(file.path()).unwrap();

        assert_eq!(first.digests, second.digests);
        assert_eq!(first.entropy, second.entropy);
        assert_eq!(first.size, 200_000);
        assert_eq!(first.sample.len(), 1024);
        assert!(!first.sample_complete());
        assert_eq!(
            first.digests.hex(DigestAlgorithm::Sha256).unwrap(),
            sha256_bytes(&data)
        );
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let digest = DigestEngine::default().digest_file(file.path()).unwrap();
        assert_eq!(digest.size, 0);
        assert_eq!(digest.entropy, 0.0);
        assert!(digest.sample.is_empty());
        assert_eq!(digest.digests.len(), 2);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = DigestEngine::default().digest_file(Path::new("/nonexistent/hexscan/file"));
        assert!(matches!(result, Err(Error::FileRead { .. })));
    }

    #[test]
    fn test_digest_set_rejects_bad_length() {
        let mut set = DigestSet::new();
        assert!(!set.insert(DigestAlgorithm::Sha256, vec![0u8; 16]));
        assert!(!set.insert_hex(DigestAlgorithm::Md5, "not hex"));
        assert!(set.insert_hex(DigestAlgorithm::Md5, "5d41402abc4b2a76b9719d911017c592"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_digest_set_serde() {
        let mut set = DigestSet::new();
        set.insert_hex(DigestAlgorithm::Md5, "5d41402abc4b2a76b9719d911017c592");
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"md5":"5d41402abc4b2a76b9719d911017c592"}"#);
        let back: DigestSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_iteration_is_strongest_first() {
        let mut set = DigestSet::new();
        set.insert(DigestAlgorithm::Md5, vec![1u8; 16]);
        set.insert(DigestAlgorithm::Sha256, vec![2u8; 32]);
        let order: Vec<_> = set.iter().map(|(a, _)| a).collect();
        assert_eq!(order, vec![DigestAlgorithm::Sha256, DigestAlgorithm::Md5]);
    }
}
