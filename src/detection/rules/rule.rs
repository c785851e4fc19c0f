//! Pattern rule definitions.
//!
//! A rule is a set of string patterns plus a condition tree over them and a
//! few structural checks. Rules are serialized as JSON.

use crate::core::error::{Error, Result};
use crate::core::types::Severity;
use regex::bytes::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Offsets kept per pattern.
const MAX_OFFSETS: usize = 32;

/// Pattern type for string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Plain text (case-sensitive)
    Text,
    /// Plain text (ASCII case-insensitive)
    TextNocase,
    /// Hex bytes, `??` is a wildcard byte
    Hex,
    /// Regular expression over raw bytes
    Regex,
    /// UTF-16LE encoded text
    Wide,
}

#[derive(Debug, Clone)]
enum CompiledPattern {
    Literal(Vec<u8>),
    Masked(Vec<Option<u8>>),
    Regex(Regex),
}

/// A string pattern in a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringPattern {
    /// Pattern identifier (e.g., "$a")
    pub id: String,
    /// The pattern content
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: PatternKind,
    #[serde(skip)]
    compiled: Option<CompiledPattern>,
}

impl StringPattern {
    fn new(id: &str, pattern: &str, kind: PatternKind) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            kind,
            compiled: None,
        }
    }

    pub fn text(id: &str, pattern: &str) -> Self {
        Self::new(id, pattern, PatternKind::Text)
    }

    pub fn text_nocase(id: &str, pattern: &str) -> Self {
        Self::new(id, pattern, PatternKind::TextNocase)
    }

    pub fn hex(id: &str, hex: &str) -> Self {
        Self::new(id, hex, PatternKind::Hex)
    }

    pub fn regex(id: &str, pattern: &str) -> Self {
        Self::new(id, pattern, PatternKind::Regex)
    }

    pub fn wide(id: &str, pattern: &str) -> Self {
        Self::new(id, pattern, PatternKind::Wide)
    }

    /// Compile the pattern for matching.
    pub fn compile(&mut self) -> std::result::Result<(), String> {
        if self.pattern.is_empty() {
            return Err(format!("pattern {} is empty", self.id));
        }

        let compiled = match self.kind {
            PatternKind::Text => CompiledPattern::Literal(self.pattern.as_bytes().to_vec()),
            PatternKind::TextNocase => CompiledPattern::Regex(
                RegexBuilder::new(&regex::escape(&self.pattern))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| format!("Failed to compile pattern {}: {}", self.id, e))?,
            ),
            PatternKind::Regex => CompiledPattern::Regex(
                Regex::new(&self.pattern)
                    .map_err(|e| format!("Failed to compile regex {}: {}", self.id, e))?,
            ),
            PatternKind::Hex => {
                let masked = parse_hex(&self.pattern)
                    .map_err(|e| format!("Invalid hex in {}: {}", self.id, e))?;
                if masked.iter().all(Option::is_some) {
                    CompiledPattern::Literal(masked.into_iter().flatten().collect())
                } else {
                    CompiledPattern::Masked(masked)
                }
            }
            PatternKind::Wide => CompiledPattern::Literal(
                self.pattern
                    .encode_utf16()
                    .flat_map(|c| c.to_le_bytes())
                    .collect(),
            ),
        };

        self.compiled = Some(compiled);
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Offsets where the pattern matches in data (bounded).
    pub fn matches(&self, data: &[u8]) -> Vec<usize> {
        match &self.compiled {
            Some(CompiledPattern::Literal(bytes)) => find_all(data, bytes, |w, p| w == p),
            Some(CompiledPattern::Masked(mask)) => find_all(data, mask, |w, m| {
                w.iter()
                    .zip(m.iter())
                    .all(|(b, expected)| expected.map_or(true, |e| *b == e))
            }),
            Some(CompiledPattern::Regex(regex)) => regex
                .find_iter(data)
                .take(MAX_OFFSETS)
                .map(|m| m.start())
                .collect(),
            None => Vec::new(),
        }
    }
}

fn find_all<T>(data: &[u8], needle: &[T], eq: impl Fn(&[u8], &[T]) -> bool) -> Vec<usize> {
    if needle.is_empty() || data.len() < needle.len() {
        return Vec::new();
    }
    data.windows(needle.len())
        .enumerate()
        .filter(|(_, w)| eq(w, needle))
        .map(|(i, _)| i)
        .take(MAX_OFFSETS)
        .collect()
}

/// Parse a hex string with optional `??` wildcards.
fn parse_hex(hex: &str) -> std::result::Result<Vec<Option<u8>>, String> {
    let cleaned: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }

    cleaned
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            if pair == b"??" {
                return Ok(None);
            }
            let text = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            u8::from_str_radix(text, 16)
                .map(Some)
                .map_err(|_| format!("bad byte '{}'", text))
        })
        .collect()
}

/// Rule metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMeta {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Category (e.g., "trojan", "ransomware")
    #[serde(default)]
    pub category: Option<String>,
}

fn default_severity() -> Severity {
    Severity::Medium
}

impl Default for RuleMeta {
    fn default() -> Self {
        Self {
            description: None,
            author: None,
            reference: None,
            severity: default_severity(),
            category: None,
        }
    }
}

/// Comparison operator for `byte_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn apply(&self, left: u8, right: u8) -> bool {
        match self {
            Comparison::Eq => left == right,
            Comparison::Ne => left != right,
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
        }
    }
}

/// Condition tree for rule matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// All patterns must match
    All,
    /// Any pattern must match
    Any,
    /// At least N patterns must match
    AtLeast(usize),
    /// Specific pattern must match
    Pattern(String),
    /// Content starts with an MZ header
    IsPe,
    /// Content starts with an ELF header
    IsElf,
    /// File size bounds, inclusive
    FileSize { min: Option<u64>, max: Option<u64> },
    /// Compare the byte at an absolute offset
    ByteAt { offset: u64, op: Comparison, value: u8 },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

/// Inputs a condition is evaluated against.
pub struct EvalContext<'a> {
    pub matches: &'a HashMap<String, Vec<usize>>,
    /// Retained content sample
    pub data: &'a [u8],
    /// Size of the whole file
    pub file_size: u64,
}

impl Condition {
    /// Evaluate the condition.
    ///
    /// Fails on references to unknown patterns and on byte reads that fall
    /// inside the file but outside the retained sample.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> std::result::Result<bool, String> {
        Ok(match self {
            Condition::All => {
                !ctx.matches.is_empty() && ctx.matches.values().all(|m| !m.is_empty())
            }
            Condition::Any => ctx.matches.values().any(|m| !m.is_empty()),
            Condition::AtLeast(n) => {
                ctx.matches.values().filter(|m| !m.is_empty()).count() >= *n
            }
            Condition::Pattern(id) => match ctx.matches.get(id) {
                Some(m) => !m.is_empty(),
                None => return Err(format!("unknown pattern id '{}'", id)),
            },
            Condition::IsPe => ctx.data.starts_with(b"MZ"),
            Condition::IsElf => ctx.data.starts_with(b"\x7fELF"),
            Condition::FileSize { min, max } => {
                min.map_or(true, |m| ctx.file_size >= m) && max.map_or(true, |m| ctx.file_size <= m)
            }
            Condition::ByteAt { offset, op, value } => {
                if *offset >= ctx.file_size {
                    false
                } else {
                    match usize::try_from(*offset).ok().and_then(|o| ctx.data.get(o)) {
                        Some(byte) => op.apply(*byte, *value),
                        None => {
                            return Err(format!(
                                "offset {} is beyond the {} byte content sample",
                                offset,
                                ctx.data.len()
                            ))
                        }
                    }
                }
            }
            Condition::And(children) => {
                for child in children {
                    if !child.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Or(children) => {
                for child in children {
                    if child.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Not(child) => !child.evaluate(ctx)?,
        })
    }
}

/// A declarative detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub meta: RuleMeta,
    #[serde(default)]
    pub strings: Vec<StringPattern>,
    pub condition: Condition,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Create a new rule.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            meta: RuleMeta::default(),
            strings: Vec::new(),
            condition: Condition::Any,
            enabled: true,
        }
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.meta.description = Some(desc.to_string());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.meta.severity = severity;
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.meta.category = Some(category.to_string());
        self
    }

    pub fn with_string(mut self, pattern: StringPattern) -> Self {
        self.strings.push(pattern);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Compile all patterns, rejecting duplicate ids.
    pub fn compile(&mut self) -> Result<()> {
        let fail = |reason: String| Error::RuleCompilation {
            rule: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(fail("rule name is empty".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for pattern in &self.strings {
            if !seen.insert(pattern.id.as_str()) {
                return Err(fail(format!("duplicate pattern id '{}'", pattern.id)));
            }
        }

        let mut compiled = self.strings.clone();
        for pattern in &mut compiled {
            pattern.compile().map_err(fail)?;
        }
        self.strings = compiled;
        Ok(())
    }

    /// Match the rule against a content sample of a file of `file_size` bytes.
    pub fn evaluate(
        &self,
        data: &[u8],
        file_size: u64,
    ) -> std::result::Result<Option<RuleMatch>, RuleEvaluationError> {
        if !self.enabled {
            return Ok(None);
        }

        let mut matches: HashMap<String, Vec<usize>> = HashMap::new();
        for pattern in &self.strings {
            if !pattern.is_compiled() {
                return Err(RuleEvaluationError::new(
                    &self.name,
                    format!("pattern {} was never compiled", pattern.id),
                ));
            }
            matches.insert(pattern.id.clone(), pattern.matches(data));
        }

        let ctx = EvalContext {
            matches: &matches,
            data,
            file_size,
        };

        match self.condition.evaluate(&ctx) {
            Ok(true) => Ok(Some(RuleMatch {
                rule_name: self.name.clone(),
                meta: self.meta.clone(),
                matches: matches.into_iter().filter(|(_, m)| !m.is_empty()).collect(),
            })),
            Ok(false) => Ok(None),
            Err(reason) => Err(RuleEvaluationError::new(&self.name, reason)),
        }
    }
}

/// Result of a rule match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_name: String,
    pub meta: RuleMeta,
    /// Matched pattern ids with offsets
    pub matches: HashMap<String, Vec<usize>>,
}

/// A single rule that could not be evaluated for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEvaluationError {
    pub rule: String,
    pub reason: String,
}

impl RuleEvaluationError {
    pub fn new(rule: &str, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for RuleEvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule '{}': {}", self.rule, self.reason)
    }
}

impl From<RuleEvaluationError> for Error {
    fn from(err: RuleEvaluationError) -> Self {
        Error::RuleEvaluation {
            rule: err.rule,
            reason: err.reason,
        }
    }
}
