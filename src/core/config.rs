//! Configuration management for hexscan.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan and traversal settings
    pub scan: ScanConfig,
    /// Detector selection and tuning
    pub detection: DetectionConfig,
    /// Verdict thresholds and aggregation weights
    pub verdict: VerdictConfig,
    /// Quarantine settings
    pub quarantine: QuarantineConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("Failed to read config file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigSave(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| Error::ConfigSave(format!("Failed to write config file: {}", e)))
    }

    /// Load configuration from default location, or create default if not exists.
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            match Self::load(&config_path).and_then(|c| c.validate().map(|_| c)) {
                Ok(config) => return config,
                Err(e) => {
                    log::warn!("Failed to load config, using defaults: {}", e);
                    return Self::default();
                }
            }
        }

        let config = Self::default();

        if let Err(e) = config.save(&config_path) {
            log::warn!("Failed to save default config: {}", e);
        }

        config
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        Self::data_dir().join("config.json")
    }

    /// Get the application data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("hexscan")
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &str, message: &str) -> Error {
            Error::ConfigInvalid {
                field: field.to_string(),
                message: message.to_string(),
            }
        }

        if self.scan.skip_large_files_mb == 0 {
            return Err(invalid("scan.skip_large_files_mb", "Must be greater than 0"));
        }

        if self.scan.queue_capacity == 0 {
            return Err(invalid("scan.queue_capacity", "Must be greater than 0"));
        }

        if self.scan.threads == 0 || self.scan.threads > MAX_THREADS {
            return Err(invalid("scan.threads", "Must be between 1 and 32"));
        }

        if self.detection.content_sample_kb == 0 {
            return Err(invalid("detection.content_sample_kb", "Must be greater than 0"));
        }

        if self.detection.heuristic_threshold > 100 {
            return Err(invalid("detection.heuristic_threshold", "Must be at most 100"));
        }

        let v = &self.verdict;
        if v.malicious_threshold > 100 || v.suspicious_threshold >= v.malicious_threshold {
            return Err(invalid(
                "verdict.suspicious_threshold",
                "Must be below verdict.malicious_threshold, which must be at most 100",
            ));
        }

        if v.statistical_weight < 0.0 || !v.statistical_weight.is_finite() {
            return Err(invalid("verdict.statistical_weight", "Must be a non-negative number"));
        }

        Ok(())
    }
}

/// Upper bound on worker threads.
pub const MAX_THREADS: usize = 32;

/// Scan-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of scan workers
    pub threads: usize,
    /// Capacity of the bounded path queue between discovery and workers
    pub queue_capacity: usize,
    /// Per-file time limit in seconds (None = unlimited)
    pub per_file_timeout_secs: Option<u64>,
    /// Whole-job time limit in seconds (None = unlimited)
    pub job_deadline_secs: Option<u64>,
    /// Skip files larger than this size (MB)
    pub skip_large_files_mb: u64,
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Skip dot-files and dot-directories
    pub skip_hidden: bool,
    /// Paths to exclude from scanning
    pub exclude_paths: Vec<PathBuf>,
    /// File extensions to exclude
    pub exclude_extensions: Vec<String>,
    /// Quarantine malicious files as they are found
    pub quarantine_on_malicious: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus(),
            queue_capacity: 256,
            per_file_timeout_secs: Some(30),
            job_deadline_secs: None,
            skip_large_files_mb: 100,
            follow_symlinks: false,
            skip_hidden: true,
            exclude_paths: vec![PathBuf::from("/proc"), PathBuf::from("/sys")],
            exclude_extensions: vec!["iso".to_string(), "vmdk".to_string(), "vhd".to_string()],
            quarantine_on_malicious: false,
        }
    }
}

/// Detector selection and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Enable digest signature matching
    pub enable_signatures: bool,
    /// Enable heuristic scoring
    pub enable_heuristic: bool,
    /// Enable declarative pattern rules
    pub enable_pattern_rules: bool,
    /// Enable the experimental statistical scorer
    pub enable_statistical: bool,
    /// Seed the signature index with built-in test signatures
    pub builtin_signatures: bool,
    /// Load the built-in pattern rule set
    pub builtin_rules: bool,
    /// JSON signature file to load
    pub signature_path: Option<PathBuf>,
    /// JSON rule file to load
    pub rules_path: Option<PathBuf>,
    /// JSON weight file for the statistical scorer
    pub statistical_model_path: Option<PathBuf>,
    /// Minimum heuristic total that emits a signal
    pub heuristic_threshold: u8,
    /// Strings counted by the heuristic scorer (case-insensitive)
    pub suspicious_strings: Vec<String>,
    /// Bytes of file content retained for content detectors (KB)
    pub content_sample_kb: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enable_signatures: true,
            enable_heuristic: true,
            enable_pattern_rules: true,
            enable_statistical: false,
            builtin_signatures: true,
            builtin_rules: true,
            signature_path: None,
            rules_path: None,
            statistical_model_path: None,
            heuristic_threshold: 50,
            suspicious_strings: default_suspicious_strings(),
            content_sample_kb: 4096,
        }
    }
}

impl DetectionConfig {
    /// Content sample size in bytes.
    pub fn content_sample_bytes(&self) -> usize {
        self.content_sample_kb.saturating_mul(1024)
    }
}

/// Default suspicious string list.
pub fn default_suspicious_strings() -> Vec<String> {
    [
        // Process injection
        "VirtualAlloc",
        "WriteProcessMemory",
        "CreateRemoteThread",
        "SetWindowsHookEx",
        // Registry tampering
        "RegOpenKey",
        "RegSetValue",
        "RegDeleteValue",
        // Obfuscation
        "base64",
        "xor",
        "rot13",
        "eval(",
        // Anti-debugging
        "IsDebuggerPresent",
        "CheckRemoteDebuggerPresent",
        "NtQueryInformationProcess",
        // Crypto
        "AES.encrypt",
        "Rijndael",
        "RC4",
        // Networking
        "socket(",
        "bind(",
        "listen(",
        "connect(",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Verdict aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictConfig {
    /// Aggregate score at or above which a file is malicious
    pub malicious_threshold: u8,
    /// Aggregate score at or above which a file is suspicious
    pub suspicious_threshold: u8,
    /// Points added per distinct fired pattern rule
    pub pattern_points_per_rule: u8,
    /// Cap on the pattern rule bonus
    pub pattern_bonus_cap: u8,
    /// Multiplier applied to the statistical score when it corroborates
    pub statistical_weight: f64,
}

impl Default for VerdictConfig {
    fn default() -> Self {
        Self {
            malicious_threshold: 70,
            suspicious_threshold: 30,
            pattern_points_per_rule: 10,
            pattern_bonus_cap: 40,
            statistical_weight: 20.0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Path for log files
    pub log_path: Option<PathBuf>,
    /// Also write logs to a file under the log directory
    pub log_to_file: bool,
    /// Enable verbose console output
    pub verbose_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_path: None,
            log_to_file: false,
            verbose_console: false,
        }
    }
}

impl LoggingConfig {
    /// Get the effective log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("logs"))
    }
}

/// Quarantine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    /// Path for the quarantine store
    pub vault_path: Option<PathBuf>,
    /// Days to keep active entries before `purge` deletes them
    pub retention_days: u32,
    /// Overwrite passes when securely deleting payloads
    pub secure_delete_passes: u8,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            vault_path: None,
            retention_days: 30,
            secure_delete_passes: 1,
        }
    }
}

impl QuarantineConfig {
    /// Get the effective quarantine directory.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.vault_path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("quarantine"))
    }
}

/// Per-job options, resolved from [`Config`] and command-line overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub threads: usize,
    pub enable_heuristic: bool,
    pub enable_pattern_rules: bool,
    pub enable_statistical: bool,
    pub quarantine_on_malicious: bool,
    pub per_file_timeout: Option<Duration>,
    pub job_deadline: Option<Duration>,
}

impl ScanOptions {
    /// Resolve options from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            threads: config.scan.threads.clamp(1, MAX_THREADS),
            enable_heuristic: config.detection.enable_heuristic,
            enable_pattern_rules: config.detection.enable_pattern_rules,
            enable_statistical: config.detection.enable_statistical,
            quarantine_on_malicious: config.scan.quarantine_on_malicious,
            per_file_timeout: config.scan.per_file_timeout_secs.map(Duration::from_secs),
            job_deadline: config.scan.job_deadline_secs.map(Duration::from_secs),
        }
    }

    /// Set the worker count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.clamp(1, MAX_THREADS);
        self
    }

    /// Set the per-file timeout.
    pub fn with_per_file_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.per_file_timeout = timeout;
        self
    }

    /// Set the job deadline.
    pub fn with_job_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.job_deadline = deadline;
        self
    }

    /// Enable or disable quarantine of malicious files.
    pub fn with_quarantine(mut self, enabled: bool) -> Self {
        self.quarantine_on_malicious = enabled;
        self
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Get the number of CPUs, with a reasonable default.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, MAX_THREADS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.detection.enable_statistical);
        assert_eq!(config.verdict.malicious_threshold, 70);
        assert_eq!(config.verdict.suspicious_threshold, 30);
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_config.json");

        let mut config = Config::default();
        config.scan.queue_capacity = 17;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.scan.queue_capacity, 17);
        assert_eq!(
            loaded.detection.suspicious_strings,
            config.detection.suspicious_strings
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"verdict": {"malicious_threshold": 80}}"#).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.verdict.malicious_threshold, 80);
        assert_eq!(loaded.verdict.suspicious_threshold, 30);
        assert_eq!(loaded.scan.queue_capacity, 256);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Config::default();
        config.scan.skip_large_files_mb = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.verdict.suspicious_threshold = 70;
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigInvalid { .. })
        ));

        let mut config = Config::default();
        config.scan.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_options_from_config() {
        let mut config = Config::default();
        config.scan.threads = 64;
        config.scan.per_file_timeout_secs = None;
        config.scan.job_deadline_secs = Some(5);

        let options = ScanOptions::from_config(&config);
        assert_eq!(options.threads, MAX_THREADS);
        assert_eq!(options.per_file_timeout, None);
        assert_eq!(options.job_deadline, Some(Duration::from_secs(5)));
        assert_eq!(options.with_threads(0).threads, 1);
    }
}
