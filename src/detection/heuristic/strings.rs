//! Suspicious string search over a content sample.

use aho_corasick::AhoCorasick;
use std::collections::{BTreeSet, HashSet};

/// Maximum string sub-score.
pub const STRING_MAX_POINTS: u8 = 25;

/// Distinct hits needed for the maximum string sub-score.
pub const STRING_SATURATION: usize = 3;

/// Case-insensitive multi-pattern matcher over a fixed string list.
pub struct StringMatcher {
    patterns: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl StringMatcher {
    /// Build a matcher. Empty strings are dropped, and strings differing
    /// only in ASCII case keep their first spelling.
    pub fn new(patterns: &[String]) -> Self {
        let mut seen = HashSet::new();
        let patterns: Vec<String> = patterns
            .iter()
            .filter(|p| !p.is_empty() && seen.insert(p.to_ascii_lowercase()))
            .cloned()
            .collect();

        let automaton = if patterns.is_empty() {
            None
        } else {
            match AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&patterns)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    log::warn!("Failed to build suspicious string matcher: {}", e);
                    None
                }
            }
        };

        Self {
            patterns,
            automaton,
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Distinct patterns present in `data`, in pattern order.
    pub fn find_distinct(&self, data: &[u8]) -> Vec<String> {
        let Some(ac) = &self.automaton else {
            return Vec::new();
        };

        let hits: BTreeSet<usize> = ac
            .find_overlapping_iter(data)
            .map(|m| m.pattern().as_usize())
            .collect();

        hits.into_iter()
            .map(|i| self.patterns[i].clone())
            .collect()
    }

    /// Points for a number of distinct hits.
    pub fn score(distinct_hits: usize) -> u8 {
        if distinct_hits >= STRING_SATURATION {
            return STRING_MAX_POINTS;
        }
        let points = STRING_MAX_POINTS as f64 * distinct_hits as f64 / STRING_SATURATION as f64;
        points.round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(list: &[&str]) -> StringMatcher {
        let owned: Vec<String> = list.iter().map(|s| s.to_string()).collect();
        StringMatcher::new(&owned)
    }

    #[test]
    fn test_case_insensitive_distinct() {
        let m = matcher(&["VirtualAlloc", "CreateRemoteThread", "xor"]);
        let hits = m.find_distinct(b"call virtualalloc; call VIRTUALALLOC; CreateRemoteThread");
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&"VirtualAlloc".to_string()));
    }

    #[test]
    fn test_overlapping_patterns_counted() {
        let m = matcher(&["RegSetValue", "SetValue"]);
        assert_eq!(m.find_distinct(b"RegSetValueExW").len(), 2);
    }

    #[test]
    fn test_score_steps() {
        assert_eq!(StringMatcher::score(0), 0);
        assert_eq!(StringMatcher::score(1), 8);
        assert_eq!(StringMatcher::score(2), 17);
        assert_eq!(StringMatcher::score(3), 25);
        assert_eq!(StringMatcher::score(12), 25);
    }

    #[test]
    fn test_case_variants_count_once() {
        let m = matcher(&["VirtualAlloc", "virtualalloc", "VIRTUALALLOC", "xor"]);
        assert_eq!(m.len(), 2);

        let hits = m.find_distinct(b"VirtualAlloc");
        assert_eq!(hits, vec!["VirtualAlloc".to_string()]);
        assert_eq!(StringMatcher::score(hits.len()), 8);
    }

    #[test]
    fn test_empty_list() {
        let m = matcher(&["", ""]);
        assert!(m.is_empty());
        assert!(m.find_distinct(b"anything").is_empty());
    }
}
