//! Rule engine for scanning file content.
//!
//! Manages loading, compiling, and executing pattern rules.

use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::rule::{Condition, Rule, RuleEvaluationError, RuleMatch, StringPattern};
use crate::core::error::{Error, Result};
use crate::core::types::{DetectionSignal, FileRecord, Severity, SignalSource};

/// On-disk rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub rules: Vec<serde_json::Value>,
}

/// Outcome of loading a rule file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleLoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Result of running every rule against one file.
#[derive(Debug, Default)]
pub struct RuleEvaluation {
    /// One signal per satisfied rule, in rule order
    pub signals: Vec<DetectionSignal>,
    pub matches: Vec<RuleMatch>,
    /// Rules that could not be evaluated for this file
    pub errors: Vec<RuleEvaluationError>,
}

/// Pattern rule engine.
pub struct RuleEngine {
    /// Loaded rules, in declaration order
    rules: Vec<Rule>,
    /// Rules indexed by name
    rules_by_name: HashMap<String, usize>,
}

impl RuleEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            rules_by_name: HashMap::new(),
        }
    }

    /// Create an engine with the built-in rules.
    pub fn with_default_rules() -> Result<Self> {
        let mut engine = Self::new();
        engine.load_default_rules()?;
        Ok(engine)
    }

    fn load_default_rules(&mut self) -> Result<()> {
        self.add_rule(
            Rule::new("Ransomware_Generic")
                .with_description("Ransom note text in an executable")
                .with_severity(Severity::Critical)
                .with_category("ransomware")
                .with_string(StringPattern::text_nocase(
                    "$ransom1",
                    "your files have been encrypted",
                ))
                .with_string(StringPattern::text_nocase(
                    "$ransom2",
                    "your personal files are encrypted",
                ))
                .with_string(StringPattern::text_nocase("$ransom3", "decrypt your files"))
                .with_string(StringPattern::text_nocase("$ransom4", "bitcoin"))
                .with_string(StringPattern::text_nocase("$ransom5", "pay the ransom"))
                .with_string(StringPattern::text_nocase("$ransom6", "restore your files"))
                .with_condition(Condition::And(vec![Condition::IsPe, Condition::AtLeast(2)])),
        )?;

        self.add_rule(
            Rule::new("Keylogger_Generic")
                .with_description("Keyboard capture APIs")
                .with_severity(Severity::High)
                .with_category("spyware")
                .with_string(StringPattern::text("$api1", "GetAsyncKeyState"))
                .with_string(StringPattern::text("$api2", "GetKeyboardState"))
                .with_string(StringPattern::text("$api3", "SetWindowsHookEx"))
                .with_string(StringPattern::text("$api4", "GetForegroundWindow"))
                .with_condition(Condition::And(vec![Condition::IsPe, Condition::AtLeast(3)])),
        )?;

        self.add_rule(
            Rule::new("ProcessInjection_Generic")
                .with_description("Remote thread injection APIs")
                .with_severity(Severity::High)
                .with_category("injection")
                .with_string(StringPattern::text("$api1", "VirtualAllocEx"))
                .with_string(StringPattern::text("$api2", "WriteProcessMemory"))
                .with_string(StringPattern::text("$api3", "CreateRemoteThread"))
                .with_string(StringPattern::text("$api4", "NtCreateThreadEx"))
                .with_string(StringPattern::text("$api5", "RtlCreateUserThread"))
                .with_condition(Condition::And(vec![Condition::IsPe, Condition::AtLeast(2)])),
        )?;

        self.add_rule(
            Rule::new("Shellcode_Meterpreter")
                .with_description("Meterpreter stager prologue")
                .with_severity(Severity::Critical)
                .with_category("shellcode")
                .with_string(StringPattern::hex("$stub1", "FC 48 83 E4 F0 E8"))
                .with_string(StringPattern::hex("$stub2", "FC E8 ?? 00 00 00 60 89 E5"))
                .with_condition(Condition::Any),
        )?;

        self.add_rule(
            Rule::new("CryptoMiner_Generic")
                .with_description("Mining pool and miner strings")
                .with_severity(Severity::Medium)
                .with_category("miner")
                .with_string(StringPattern::text_nocase("$pool1", "stratum+tcp://"))
                .with_string(StringPattern::text_nocase("$pool2", "stratum+ssl://"))
                .with_string(StringPattern::text_nocase("$xmr1", "xmrig"))
                .with_string(StringPattern::text_nocase("$xmr2", "randomx"))
                .with_string(StringPattern::text_nocase("$xmr3", "cryptonight"))
                .with_condition(Condition::AtLeast(2)),
        )?;

        self.add_rule(
            Rule::new("EICAR_TestFile")
                .with_description("EICAR test file")
                .with_severity(Severity::Info)
                .with_category("testfile")
                .with_string(StringPattern::text(
                    "$eicar",
                    "EICAR-STANDARD-ANTIVIRUS-TEST-FILE!",
                ))
                .with_condition(Condition::And(vec![
                    Condition::Pattern("$eicar".to_string()),
                    Condition::FileSize {
                        min: None,
                        max: Some(128),
                    },
                ])),
        )?;

        Ok(())
    }

    /// Compile and add a rule. Duplicate names are rejected.
    pub fn add_rule(&mut self, mut rule: Rule) -> Result<()> {
        if self.rules_by_name.contains_key(&rule.name) {
            return Err(Error::RuleCompilation {
                rule: rule.name,
                reason: "duplicate rule name".to_string(),
            });
        }

        rule.compile()?;

        let index = self.rules.len();
        self.rules_by_name.insert(rule.name.clone(), index);
        self.rules.push(rule);

        Ok(())
    }

    /// Load rules from a JSON rule file.
    ///
    /// Rules that fail to parse or compile are skipped with a warning.
    pub fn load_rules_file(&mut self, path: &Path) -> Result<RuleLoadReport> {
        let content = fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        let file: RuleFile = serde_json::from_str(&content)
            .map_err(|e| Error::index_unavailable("pattern", e.to_string()))?;

        let mut report = RuleLoadReport::default();
        for value in file.rules {
            let added = serde_json::from_value::<Rule>(value)
                .map_err(Error::from)
                .and_then(|rule| self.add_rule(rule));

            match added {
                Ok(()) => report.loaded += 1,
                Err(e) => {
                    log::warn!("Skipping rule from {}: {}", path.display(), e);
                    report.skipped += 1;
                }
            }
        }

        log::info!(
            "Loaded {} rules from {} (version {}, {} skipped)",
            report.loaded,
            path.display(),
            if file.version.is_empty() { "-" } else { &file.version },
            report.skipped
        );

        Ok(report)
    }

    /// Get the number of loaded rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Get a rule by name.
    pub fn get_rule(&self, name: &str) -> Option<&Rule> {
        self.rules_by_name
            .get(name)
            .and_then(|&idx| self.rules.get(idx))
    }

    /// Enable or disable a rule.
    pub fn set_rule_enabled(&mut self, name: &str, enabled: bool) -> bool {
        if let Some(&idx) = self.rules_by_name.get(name) {
            if let Some(rule) = self.rules.get_mut(idx) {
                rule.enabled = enabled;
                return true;
            }
        }
        false
    }

    /// Run every rule against a file's content sample.
    ///
    /// A failing rule is recorded and skipped; the remaining rules still run.
    pub fn evaluate(&self, record: &FileRecord, content: &[u8]) -> RuleEvaluation {
        let mut evaluation = RuleEvaluation::default();

        for rule in &self.rules {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                rule.evaluate(content, record.size)
            }))
            .unwrap_or_else(|_| {
                Err(RuleEvaluationError::new(
                    &rule.name,
                    "panicked during evaluation",
                ))
            });

            match outcome {
                Ok(Some(m)) => {
                    evaluation.signals.push(rule_signal(&m));
                    evaluation.matches.push(m);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("{}: {}", record.path.display(), e);
                    evaluation.errors.push(e);
                }
            }
        }

        evaluation
    }

    /// List all rule names in declaration order.
    pub fn list_rules(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn rule_signal(m: &RuleMatch) -> DetectionSignal {
    let mut ids: Vec<&str> = m.matches.keys().map(String::as_str).collect();
    ids.sort_unstable();

    let mut description = m.meta.description.clone().unwrap_or_default();
    if !ids.is_empty() {
        if !description.is_empty() {
            description.push_str("; ");
        }
        description.push_str(&format!("matched {}", ids.join(", ")));
    }

    DetectionSignal::new(
        SignalSource::Pattern,
        m.rule_name.clone(),
        m.meta.severity,
        m.meta.severity.score(),
    )
    .with_description(description)
}
