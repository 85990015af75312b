//! Post-hoc safety monitors over finalized trace bundles.
//!
//! A pipeline replays a bundle through a registry of detectors and records
//! every result in its own trace, so the safety report is itself a
//! verifiable bundle chained to the base trace's commitments. Detectors are
//! either `authoritative` (a positive detection is actionable on its own) or
//! `fragile` (a statistical signal, sound only in aggregate).

use chrono::{DateTime, Utc};
use poi_trace::{TraceEvent, TraceRun, TraceSpan};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod detectors;
pub mod pipeline;
pub mod provenance;
pub mod registry;

pub use pipeline::{AlertLevel, PipelineConfig, SafetyPipeline, SafetyReport};
pub use provenance::{monitor_config_hash, CodeIdentity, MonitorProvenance};
pub use registry::MonitorRegistry;

/// Safety-pipeline errors; policy errors are fatal at construction
#[derive(Error, Debug)]
pub enum SafetyError {
    /// A monitor id must be non-empty
    #[error("Empty monitor id")]
    EmptyMonitorId,

    /// Each monitor id may be registered once
    #[error("Monitor already registered: {0}")]
    DuplicateMonitor(String),

    /// Pipeline configuration references an unregistered monitor
    #[error("Unknown monitor: {0}")]
    UnknownMonitor(String),

    /// Pipeline configuration names no monitors
    #[error("Monitor list is empty")]
    EmptyMonitorList,

    /// Report trace construction failed
    #[error("Trace error: {0}")]
    Trace(#[from] poi_trace::TraceError),

    /// Canonical encoding failed
    #[error("Encoding error: {0}")]
    Encoding(#[from] poi_enc::EncodingError),
}

/// Result type for safety operations
pub type SafetyResult<T> = Result<T, SafetyError>;

/// How much a positive detection can be trusted on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Actionable on its own
    Authoritative,
    /// Sound only in correlated use
    Fragile,
}

/// Safety category a monitor reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorCategory {
    Statistical,
    Compressibility,
    Steganographic,
    Timing,
    ChainOfThought,
    Action,
    EvalAwareness,
}

/// One detector's verdict over a base trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResult {
    pub monitor_id: String,
    pub version: String,
    /// Normalized severity in `[0, 1]`
    pub score: f64,
    pub threshold: f64,
    pub exceeded: bool,
    pub trust_level: TrustLevel,
    pub category: MonitorCategory,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view handed to every detector
#[derive(Debug, Clone, Copy)]
pub struct MonitorContext<'a> {
    pub base_trace: &'a TraceRun,
    pub events: &'a [TraceEvent],
    pub spans: &'a [TraceSpan],
    pub metadata: &'a Value,
}

/// A post-hoc detector.
///
/// Detectors never fail on content-shape anomalies; they return a zero score
/// with a `reason` in the details instead. Stateful detectors (timing) take
/// `&mut self`; one instance per session.
pub trait Monitor: Send {
    fn id(&self) -> &str;
    fn version(&self) -> &str;
    fn category(&self) -> MonitorCategory;
    fn trust_level(&self) -> TrustLevel;
    fn threshold(&self) -> f64;
    fn analyze(&mut self, context: &MonitorContext<'_>) -> MonitorResult;
}

/// Assemble a result from a monitor's identity, clamping the score to `[0, 1]`
pub fn monitor_result<M: Monitor + ?Sized>(monitor: &M, score: f64, details: Value) -> MonitorResult {
    let score = score.clamp(0.0, 1.0);
    MonitorResult {
        monitor_id: monitor.id().to_string(),
        version: monitor.version().to_string(),
        score,
        threshold: monitor.threshold(),
        exceeded: score > monitor.threshold(),
        trust_level: monitor.trust_level(),
        category: monitor.category(),
        details,
        timestamp: Utc::now(),
    }
}

/// Zero-score result with a machine-readable reason
pub fn short_circuit_result<M: Monitor + ?Sized>(monitor: &M, reason: &str) -> MonitorResult {
    monitor_result(monitor, 0.0, serde_json::json!({ "reason": reason }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_wire_names() {
        assert_eq!(
            serde_json::to_string(&MonitorCategory::ChainOfThought).unwrap(),
            "\"chain-of-thought\""
        );
        assert_eq!(
            serde_json::to_string(&MonitorCategory::EvalAwareness).unwrap(),
            "\"eval-awareness\""
        );
        assert_eq!(
            serde_json::to_string(&TrustLevel::Authoritative).unwrap(),
            "\"authoritative\""
        );
    }
}
