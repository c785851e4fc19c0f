//! Entropy calculation for detecting packed/encrypted content.
//!
//! High entropy (close to 8.0 for byte data) typically indicates:
//! - Encrypted content
//! - Compressed/packed executables
//! - Random or obfuscated data
//!
//! Normal executable code typically has entropy between 5.0-6.5.

/// Entropy thresholds for classification.
pub const ENTROPY_LOW: f64 = 5.0;
pub const ENTROPY_SCORING_FLOOR: f64 = 6.0;
pub const ENTROPY_NORMAL: f64 = 6.5;
pub const ENTROPY_HIGH: f64 = 7.0;
pub const ENTROPY_VERY_HIGH: f64 = 7.5;
pub const ENTROPY_MAX: f64 = 8.0;

/// Maximum entropy sub-score.
pub const ENTROPY_MAX_POINTS: u8 = 30;

/// Shannon entropy (base 2) of a byte histogram over `total` bytes.
///
/// Returns 0.0 for empty input; the result is clamped to [0.0, 8.0].
pub fn entropy_from_histogram(histogram: &[u64; 256], total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }

    let len = total as f64;
    let mut entropy = 0.0;

    for &count in histogram {
        if count > 0 {
            let probability = count as f64 / len;
            entropy -= probability * probability.log2();
        }
    }

    entropy.clamp(0.0, ENTROPY_MAX)
}

/// Entropy analyzer for detecting packed/encrypted content.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropyAnalyzer;

impl EntropyAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Calculate Shannon entropy of byte data.
    ///
    /// Returns a value between 0.0 (no randomness) and 8.0 (maximum randomness for bytes).
    pub fn calculate(&self, data: &[u8]) -> f64 {
        let mut histogram = [0u64; 256];
        for &byte in data {
            histogram[byte as usize] += 1;
        }
        entropy_from_histogram(&histogram, data.len() as u64)
    }

    /// Heuristic points for an entropy value.
    ///
    /// Nothing below 6.0, a linear ramp up to 30 points at 7.5, flat above.
    pub fn score(&self, entropy: f64) -> u8 {
        if !entropy.is_finite() || entropy < ENTROPY_SCORING_FLOOR {
            return 0;
        }
        if entropy >= ENTROPY_VERY_HIGH {
            return ENTROPY_MAX_POINTS;
        }
        let fraction =
            (entropy - ENTROPY_SCORING_FLOOR) / (ENTROPY_VERY_HIGH - ENTROPY_SCORING_FLOOR);
        (fraction * ENTROPY_MAX_POINTS as f64).round() as u8
    }

    /// Classify entropy level.
    pub fn classify(&self, entropy: f64) -> EntropyLevel {
        if entropy < ENTROPY_LOW {
            EntropyLevel::Low
        } else if entropy < ENTROPY_NORMAL {
            EntropyLevel::Normal
        } else if entropy < ENTROPY_HIGH {
            EntropyLevel::Elevated
        } else if entropy < ENTROPY_VERY_HIGH {
            EntropyLevel::High
        } else {
            EntropyLevel::VeryHigh
        }
    }
}

/// Classification of entropy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyLevel {
    /// Low entropy (< 5.0) - structured data, text
    Low,
    /// Normal entropy (5.0-6.5) - typical executable code
    Normal,
    /// Elevated entropy (6.5-7.0) - some compression or encoding
    Elevated,
    /// High entropy (7.0-7.5) - likely packed or partially encrypted
    High,
    /// Very high entropy (> 7.5) - likely encrypted or compressed
    VeryHigh,
}

impl std::fmt::Display for EntropyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntropyLevel::Low => write!(f, "Low"),
            EntropyLevel::Normal => write!(f, "Normal"),
            EntropyLevel::Elevated => write!(f, "Elevated"),
            EntropyLevel::High => write!(f, "High"),
            EntropyLevel::VeryHigh => write!(f, "Very High"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_entropy() {
        let analyzer = EntropyAnalyzer::new();
        // All same bytes = zero entropy
        let data = vec![0x41u8; 1000];
        assert_eq!(analyzer.calculate(&data), 0.0);
        assert_eq!(analyzer.calculate(&[]), 0.0);
    }

    #[test]
    fn test_max_entropy() {
        let analyzer = EntropyAnalyzer::new();
        let data: Vec<u8> = (0..=255).collect::<Vec<u8>>().repeat(4);
        let entropy = analyzer.calculate(&data);
        assert!(entropy > 7.99 && entropy <= ENTROPY_MAX);
    }

    #[test]
    fn test_pseudo_random_entropy() {
        let analyzer = EntropyAnalyzer::new();
        let mut state = 0x1234_5678u32;
        let data: Vec<u8> = (0..65536)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect();
        let entropy = analyzer.calculate(&data);
        assert!(entropy > 7.9, "entropy was {}", entropy);
    }

    #[test]
    fn test_text_entropy() {
        let analyzer = EntropyAnalyzer::new();
        // English text typically has entropy around 4.0-5.0
        let text = b"The quick brown fox jumps over the lazy dog. This is sample text for testing entropy calculation.";
        let entropy = analyzer.calculate(text);
        assert!(entropy > 3.5 && entropy < 5.5);
    }

    #[test]
    fn test_entropy_score_ramp() {
        let analyzer = EntropyAnalyzer::new();
        assert_eq!(analyzer.score(0.0), 0);
        assert_eq!(analyzer.score(5.99), 0);
        assert_eq!(analyzer.score(6.0), 0);
        assert_eq!(analyzer.score(6.75), 15);
        assert_eq!(analyzer.score(7.5), 30);
        assert_eq!(analyzer.score(7.8), 30);
        assert_eq!(analyzer.score(8.0), 30);
        assert_eq!(analyzer.score(f64::NAN), 0);
    }

    #[test]
    fn test_entropy_classification() {
        let analyzer = EntropyAnalyzer::new();
        assert_eq!(analyzer.classify(3.0), EntropyLevel::Low);
        assert_eq!(analyzer.classify(5.5), EntropyLevel::Normal);
        assert_eq!(analyzer.classify(6.8), EntropyLevel::Elevated);
        assert_eq!(analyzer.classify(7.2), EntropyLevel::High);
        assert_eq!(analyzer.classify(7.8), EntropyLevel::VeryHigh);
    }
}
