//! Entropy profile of textual content.
//!
//! Natural language sits in a narrow entropy band (3.5-5.0 bits/char);
//! encrypted or encoded payloads sit above it, repeated filler below it.
//! Four views are combined: character entropy, byte entropy, bigram entropy
//! and the unique-character ratio.

use std::collections::HashMap;
use std::hash::Hash;

use serde_json::json;

use super::collect_text;
use crate::{
    monitor_result, short_circuit_result, Monitor, MonitorCategory, MonitorContext,
    MonitorResult, TrustLevel,
};

const MIN_CONTENT_LENGTH: usize = 10;

/// Expected entropy band of natural language, bits per character
const ENTROPY_BAND_LOW: f64 = 3.5;
const ENTROPY_BAND_HIGH: f64 = 5.0;

/// Unique-character ratio band for natural text
const UNIQUE_RATIO_LOW: f64 = 0.1;
const UNIQUE_RATIO_HIGH: f64 = 0.9;

const CHAR_WEIGHT: f64 = 0.35;
const BYTE_WEIGHT: f64 = 0.25;
const BIGRAM_WEIGHT: f64 = 0.20;
const UNIQUE_WEIGHT: f64 = 0.20;

/// Shannon entropy in bits per item
fn shannon_entropy<T: Hash + Eq, I: Iterator<Item = T>>(items: I) -> f64 {
    let mut counts: HashMap<T, u64> = HashMap::new();
    let mut total = 0u64;
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// 0 inside the band, rising linearly toward 1 at the extremes
fn band_deviation(entropy: f64) -> f64 {
    if entropy < ENTROPY_BAND_LOW {
        (ENTROPY_BAND_LOW - entropy) / ENTROPY_BAND_LOW
    } else if entropy > ENTROPY_BAND_HIGH {
        ((entropy - ENTROPY_BAND_HIGH) / 3.0).min(1.0)
    } else {
        0.0
    }
}

fn ratio_deviation(ratio: f64) -> f64 {
    if ratio < UNIQUE_RATIO_LOW {
        (UNIQUE_RATIO_LOW - ratio) / UNIQUE_RATIO_LOW
    } else if ratio > UNIQUE_RATIO_HIGH {
        ((ratio - UNIQUE_RATIO_HIGH) / (1.0 - UNIQUE_RATIO_HIGH)).min(1.0)
    } else {
        0.0
    }
}

/// Entropy-band detector
pub struct CompressibilityMonitor {
    threshold: f64,
}

impl CompressibilityMonitor {
    pub fn new() -> Self {
        Self { threshold: 0.5 }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for CompressibilityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor for CompressibilityMonitor {
    fn id(&self) -> &str {
        "compressibility-analysis"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn category(&self) -> MonitorCategory {
        MonitorCategory::Compressibility
    }
    fn trust_level(&self) -> TrustLevel {
        TrustLevel::Fragile
    }
    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn analyze(&mut self, context: &MonitorContext<'_>) -> MonitorResult {
        let text = collect_text(context.events);
        let char_count = text.chars().count();
        if char_count < MIN_CONTENT_LENGTH {
            return short_circuit_result(self, "content-too-short");
        }

        let char_entropy = shannon_entropy(text.chars());
        let byte_entropy = shannon_entropy(text.bytes());
        let chars: Vec<char> = text.chars().collect();
        // per-character bigram entropy
        let bigram_entropy = shannon_entropy(chars.windows(2).map(|w| (w[0], w[1]))) / 2.0;
        let unique_chars = {
            let mut seen: Vec<char> = chars.clone();
            seen.sort_unstable();
            seen.dedup();
            seen.len()
        };
        let unique_ratio = unique_chars as f64 / char_count as f64;

        let char_score = band_deviation(char_entropy);
        let byte_score = band_deviation(byte_entropy);
        let bigram_score = band_deviation_bigram(bigram_entropy);
        let unique_score = ratio_deviation(unique_ratio);

        let score = CHAR_WEIGHT * char_score
            + BYTE_WEIGHT * byte_score
            + BIGRAM_WEIGHT * bigram_score
            + UNIQUE_WEIGHT * unique_score;

        monitor_result(
            self,
            score,
            json!({
                "charEntropy": char_entropy,
                "byteEntropy": byte_entropy,
                "bigramEntropy": bigram_entropy,
                "uniqueCharRatio": unique_ratio,
                "charCount": char_count,
            }),
        )
    }
}

/// Bigram entropy per char runs lower than unigram entropy for short
/// samples; use a band shifted down by one bit.
fn band_deviation_bigram(entropy_per_char: f64) -> f64 {
    const LOW: f64 = 2.5;
    const HIGH: f64 = 4.0;
    if entropy_per_char < LOW {
        (LOW - entropy_per_char) / LOW
    } else if entropy_per_char > HIGH {
        ((entropy_per_char - HIGH) / 3.0).min(1.0)
    } else {
        0.0
    }
}
