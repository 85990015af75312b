//! Timing-channel analysis over event inter-arrival delays.
//!
//! Stateful: the monitor owns a bounded ring of the most recent timestamps
//! (oldest evicted) and is not safe for concurrent mutation; construct one
//! instance per session. Timestamps are only as trustworthy as the clock
//! that produced them, so every result carries an `attested` flag that is
//! false unless the monitor was constructed for a trusted environment.

use std::collections::VecDeque;

use serde_json::json;

use crate::{
    monitor_result, short_circuit_result, Monitor, MonitorCategory, MonitorContext,
    MonitorResult, TrustLevel,
};

/// Bounded history size; oldest samples are dropped first
const MAX_SAMPLES: usize = 1000;

/// Minimum samples before delay statistics exist
const MIN_SAMPLES: usize = 3;

const BIMODAL_WEIGHT: f64 = 0.40;
const PERIODIC_WEIGHT: f64 = 0.35;
const VARIANCE_WEIGHT: f64 = 0.25;

/// Inter-arrival timing detector
pub struct TimingMonitor {
    samples: VecDeque<i64>,
    attested: bool,
    threshold: f64,
}

impl TimingMonitor {
    /// `attested` declares whether timestamps come from a trusted
    /// environment; it is propagated into every result verbatim.
    pub fn new(attested: bool) -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_SAMPLES),
            attested,
            threshold: 0.5,
        }
    }

    pub fn with_threshold(attested: bool, threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::new(attested)
        }
    }

    /// Current number of retained samples
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn ingest(&mut self, timestamps_ms: impl IntoIterator<Item = i64>) {
        for t in timestamps_ms {
            if self.samples.len() == MAX_SAMPLES {
                self.samples.pop_front();
            }
            self.samples.push_back(t);
        }
    }

    fn deltas(&self) -> Vec<f64> {
        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(a, b)| (b - a) as f64)
            .collect()
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

/// Group delays around the median and combine separation with the F-ratio
fn bimodality(deltas: &[f64]) -> f64 {
    let mut sorted = deltas.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if sorted.len() % 2 == 0 {
        (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2.0
    } else {
        sorted[sorted.len() / 2]
    };

    let low: Vec<f64> = deltas.iter().copied().filter(|&d| d <= median).collect();
    let high: Vec<f64> = deltas.iter().copied().filter(|&d| d > median).collect();
    if low.is_empty() || high.is_empty() {
        return 0.0;
    }

    let overall_mean = mean(deltas);
    let overall_std = std_dev(deltas);
    let (mean_low, mean_high) = (mean(&low), mean(&high));

    let separation = (mean_high - mean_low).abs() / (overall_std + f64::EPSILON);
    let separation_norm = (separation / 3.0).min(1.0);

    let between = low.len() as f64 * (mean_low - overall_mean).powi(2)
        + high.len() as f64 * (mean_high - overall_mean).powi(2);
    let within: f64 = low.iter().map(|x| (x - mean_low).powi(2)).sum::<f64>()
        + high.iter().map(|x| (x - mean_high).powi(2)).sum::<f64>();
    let dof_within = (deltas.len().saturating_sub(2)).max(1) as f64;
    let f_ratio = between / (within / dof_within + f64::EPSILON);
    // the F statistic of a median split grows with n even for unimodal data;
    // normalize per sample so only tight, well-separated groups saturate
    let f_norm = (f_ratio / (10.0 * deltas.len() as f64)).min(1.0);

    0.3 * separation_norm + 0.7 * f_norm
}

/// Maximum autocorrelation over lags `1..=min(20, n/2)`.
///
/// A zero-variance delay sequence is treated as perfectly periodic.
fn periodicity(deltas: &[f64]) -> f64 {
    let n = deltas.len();
    let m = mean(deltas);
    let denom: f64 = deltas.iter().map(|x| (x - m).powi(2)).sum();
    if denom < f64::EPSILON {
        return 1.0;
    }
    let max_lag = (n / 2).min(20);
    let mut max_r: f64 = 0.0;
    for lag in 1..=max_lag {
        let num: f64 = (0..n - lag)
            .map(|i| (deltas[i] - m) * (deltas[i + lag] - m))
            .sum();
        max_r = max_r.max(num / denom);
    }
    max_r.clamp(0.0, 1.0)
}

/// Coefficient-of-variation bands: machine-regular delays have tiny CV
fn variance_anomaly(cv: f64) -> f64 {
    if cv < 0.05 {
        1.0
    } else if cv < 0.1 {
        0.7
    } else if cv < 0.2 {
        0.3
    } else {
        0.0
    }
}

impl Monitor for TimingMonitor {
    fn id(&self) -> &str {
        "timing-analysis"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn category(&self) -> MonitorCategory {
        MonitorCategory::Timing
    }
    fn trust_level(&self) -> TrustLevel {
        TrustLevel::Fragile
    }
    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn analyze(&mut self, context: &MonitorContext<'_>) -> MonitorResult {
        let mut ordered: Vec<&poi_trace::TraceEvent> = context.events.iter().collect();
        ordered.sort_by_key(|e| e.seq);
        self.ingest(ordered.iter().map(|e| e.timestamp.timestamp_millis()));

        if self.samples.len() < MIN_SAMPLES {
            let mut result = short_circuit_result(self, "insufficient-samples");
            result.details["attested"] = json!(self.attested);
            return result;
        }

        let deltas = self.deltas();
        let delta_mean = mean(&deltas);
        let cv = if delta_mean.abs() < f64::EPSILON {
            0.0
        } else {
            std_dev(&deltas) / delta_mean
        };

        let bimodal = bimodality(&deltas);
        let periodic = periodicity(&deltas);
        let variance = variance_anomaly(cv);
        let score = BIMODAL_WEIGHT * bimodal + PERIODIC_WEIGHT * periodic + VARIANCE_WEIGHT * variance;

        monitor_result(
            self,
            score,
            json!({
                "attested": self.attested,
                "sampleCount": self.samples.len(),
                "cv": cv,
                "bimodality": bimodal,
                "periodicity": periodic,
                "varianceAnomaly": variance,
                "meanDelayMs": delta_mean,
            }),
        )
    }
}
