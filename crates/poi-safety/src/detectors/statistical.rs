//! Character-frequency analysis against an English reference distribution.
//!
//! Encoded or machine-generated content pushed through text channels skews
//! letter frequencies; the chi-squared statistic and KL divergence both
//! measure that skew. Fragile: a high score alone proves nothing about
//! intent.

use serde_json::json;

use super::collect_text;
use crate::{
    monitor_result, short_circuit_result, Monitor, MonitorCategory, MonitorContext,
    MonitorResult, TrustLevel,
};

/// Minimum content length before frequency statistics mean anything
const MIN_CONTENT_LENGTH: usize = 10;

/// Relative letter frequencies of English text (a..z)
const ENGLISH_LETTER_FREQ: [f64; 26] = [
    0.08167, 0.01492, 0.02782, 0.04253, 0.12702, 0.02228, 0.02015, 0.06094, 0.06966, 0.00153,
    0.00772, 0.04025, 0.02406, 0.06749, 0.07507, 0.01929, 0.00095, 0.05987, 0.06327, 0.09056,
    0.02758, 0.00978, 0.02360, 0.00150, 0.01974, 0.00074,
];

/// Per-letter chi-squared contribution past which content is clearly not
/// natural language; uniform-random letters land around 5
const CHI_SQUARED_NORM_PER_CHAR: f64 = 2.0;

/// KL divergence (nats) treated as maximal skew
const KL_NORM_CEILING: f64 = 2.0;

const CHI_WEIGHT: f64 = 0.6;
const KL_WEIGHT: f64 = 0.4;

/// Frequency-skew detector
pub struct StatisticalMonitor {
    threshold: f64,
}

impl StatisticalMonitor {
    pub fn new() -> Self {
        Self { threshold: 0.55 }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for StatisticalMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor for StatisticalMonitor {
    fn id(&self) -> &str {
        "statistical-analysis"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn category(&self) -> MonitorCategory {
        MonitorCategory::Statistical
    }
    fn trust_level(&self) -> TrustLevel {
        TrustLevel::Fragile
    }
    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn analyze(&mut self, context: &MonitorContext<'_>) -> MonitorResult {
        let text = collect_text(context.events);
        if text.chars().count() < MIN_CONTENT_LENGTH {
            return short_circuit_result(self, "content-too-short");
        }

        let mut counts = [0u64; 26];
        let mut letter_count = 0u64;
        for c in text.chars() {
            if c.is_ascii_alphabetic() {
                counts[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1;
                letter_count += 1;
            }
        }
        if letter_count == 0 {
            return short_circuit_result(self, "no-alphabetic-content");
        }

        let n = letter_count as f64;
        let mut chi_squared = 0.0;
        let mut kl_divergence = 0.0;
        for (i, &expected_freq) in ENGLISH_LETTER_FREQ.iter().enumerate() {
            let expected = expected_freq * n;
            let observed = counts[i] as f64;
            chi_squared += (observed - expected).powi(2) / expected;
            if observed > 0.0 {
                let p = observed / n;
                kl_divergence += p * (p / expected_freq).ln();
            }
        }

        let chi_norm = (chi_squared / (n * CHI_SQUARED_NORM_PER_CHAR)).min(1.0);
        let kl_norm = (kl_divergence / KL_NORM_CEILING).min(1.0);
        let score = CHI_WEIGHT * chi_norm + KL_WEIGHT * kl_norm;

        monitor_result(
            self,
            score,
            json!({
                "chiSquared": chi_squared,
                "chiSquaredNorm": chi_norm,
                "klDivergence": kl_divergence,
                "klNorm": kl_norm,
                "letterCount": letter_count,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector_context;
    use crate::detectors::testutil::run_with_events;
    use poi_trace::EventKind;
    use serde_json::Value;

    fn analyze_text(text: &str) -> MonitorResult {
        let run = run_with_events(vec![(EventKind::Output, json!({ "content": text }))]);
        let meta = Value::Null;
        let context = detector_context!(run, meta);
        StatisticalMonitor::new().analyze(&context)
    }

    #[test]
    fn test_short_content_returns_zero_with_reason() {
        let result = analyze_text("hi");
        assert_eq!(result.score, 0.0);
        assert!(!result.exceeded);
        assert_eq!(result.details["reason"], "content-too-short");
    }

    #[test]
    fn test_english_text_scores_low() {
        let result = analyze_text(
            "it was the best of times it was the worst of times it was the age of wisdom \
             it was the age of foolishness it was the epoch of belief",
        );
        assert!(result.score < 0.5, "score {}", result.score);
        assert!(!result.exceeded);
    }

    #[test]
    fn test_skewed_text_scores_high() {
        let english = analyze_text("the sailor went down to the harbour before sunrise again");
        let skewed = analyze_text("qzxqzxqzxqzxqzxqzxqzxqzxqzxqzxqzxqzxqzxqzx");
        assert!(skewed.score > english.score);
        assert!(skewed.exceeded, "score {}", skewed.score);
    }

    #[test]
    fn test_numeric_content_short_circuits() {
        let result = analyze_text("0123456789 0123456789 0123456789");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.details["reason"], "no-alphabetic-content");
    }
}
