//! Detector implementations.
//!
//! Pure detectors analyze the textual content or command stream of the base
//! trace; the timing detector is stateful and owns a bounded sample ring.

pub mod action;
pub mod compressibility;
pub mod cot;
pub mod eval_awareness;
pub mod statistical;
pub mod stego;
pub mod timing;

pub use action::ActionComplianceMonitor;
pub use compressibility::CompressibilityMonitor;
pub use cot::CotAnalysisMonitor;
pub use eval_awareness::EvalAwarenessMonitor;
pub use statistical::StatisticalMonitor;
pub use stego::StegoMonitor;
pub use timing::TimingMonitor;

use poi_trace::{EventKind, TraceEvent};
use serde_json::Value;

/// Concatenate every string leaf in the payloads of the given events
pub(crate) fn collect_text(events: &[TraceEvent]) -> String {
    collect_text_for_kinds(events, None)
}

/// Like `collect_text`, restricted to the given kinds when `Some`
pub(crate) fn collect_text_for_kinds(
    events: &[TraceEvent],
    kinds: Option<&[EventKind]>,
) -> String {
    let mut ordered: Vec<&TraceEvent> = events
        .iter()
        .filter(|e| kinds.map_or(true, |ks| ks.contains(&e.kind)))
        .collect();
    ordered.sort_by_key(|e| e.seq);

    let mut out = String::new();
    for event in ordered {
        collect_strings(&event.payload, &mut out);
    }
    out
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(s);
        }
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{TimeZone, Utc};
    use poi_trace::{EventKind, RunStatus, TraceEvent, TraceRun, Visibility};
    use serde_json::Value;
    use uuid::Uuid;

    /// Build a bare run holding the given `(kind, payload)` events, one
    /// second apart, for driving detectors directly.
    pub fn run_with_events(events: Vec<(EventKind, Value)>) -> TraceRun {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let events: Vec<TraceEvent> = events
            .into_iter()
            .enumerate()
            .map(|(i, (kind, payload))| TraceEvent {
                id: Uuid::new_v4(),
                seq: i as u64,
                timestamp: base + chrono::Duration::seconds(i as i64),
                visibility: Visibility::Public,
                kind,
                payload,
                hash: None,
            })
            .collect();
        TraceRun {
            id: Uuid::new_v4(),
            agent_id: "detector-test".into(),
            schema_version: poi_trace::SCHEMA_VERSION.into(),
            started_at: base,
            ended_at: None,
            duration_ms: None,
            status: RunStatus::Running,
            events,
            spans: Vec::new(),
            metadata: None,
            rolling_hash: None,
            root_hash: None,
        }
    }

    /// Context over a run; the run must outlive the context
    #[macro_export]
    macro_rules! detector_context {
        ($run:expr, $meta:expr) => {
            $crate::MonitorContext {
                base_trace: &$run,
                events: &$run.events,
                spans: &$run.spans,
                metadata: &$meta,
            }
        };
    }
}
