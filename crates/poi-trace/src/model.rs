//! Core data model: events, spans, runs.
//!
//! All hashed types serialize with camelCase field names; the canonical JSON
//! of these exact names is what the commitments are computed over.

use chrono::{DateTime, Utc};
use poi_enc::HexHash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Trace schema version stamped on every run
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Disclosure class of an event or span.
///
/// Only `public` entities appear in the derived public view; `private` and
/// `secret` appear there solely as opaque hash references. `secret`
/// additionally means the full data must never leave the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Secret,
}

/// Kind of a recorded step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Command,
    Output,
    Decision,
    Observation,
    Error,
    Custom,
}

impl EventKind {
    /// Default disclosure class when the producer does not set one.
    ///
    /// Commands and observations are public by default; everything that can
    /// carry model output or internal state defaults to private.
    pub fn default_visibility(self) -> Visibility {
        match self {
            EventKind::Command | EventKind::Observation => Visibility::Public,
            EventKind::Output | EventKind::Decision | EventKind::Error | EventKind::Custom => {
                Visibility::Private
            }
        }
    }
}

/// One recorded step of the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub id: Uuid,
    /// 0-based, strictly monotonic and gap-free within a run
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub visibility: Visibility,
    pub kind: EventKind,
    /// Kind-specific payload
    pub payload: Value,
    /// Filled at finalization; excluded from its own preimage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<HexHash>,
}

/// Lifecycle status of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A named grouping of events, possibly nested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpan {
    pub id: Uuid,
    /// 0-based, strictly monotonic across the run, assigned at open time
    pub span_seq: u64,
    pub name: String,
    pub status: SpanStatus,
    pub visibility: Visibility,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub event_ids: Vec<Uuid>,
    pub child_span_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Filled at finalization; excluded from its own preimage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<HexHash>,
}

impl TraceSpan {
    /// True once the span has left the `running` state
    pub fn is_closed(&self) -> bool {
        self.status != SpanStatus::Running
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Root container for a recorded session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRun {
    pub id: Uuid,
    pub agent_id: String,
    pub schema_version: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub status: RunStatus,
    /// Ordered by insertion; `seq` is dense from 0
    pub events: Vec<TraceEvent>,
    /// Ordered by open time; `spanSeq` is dense from 0
    pub spans: Vec<TraceSpan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Chained commitment over the ordered event hashes, set at finalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_hash: Option<HexHash>,
    /// Commitment over `(rollingHash, spans)`, set at finalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_hash: Option<HexHash>,
}

impl TraceRun {
    /// A run is frozen once its root commitment exists
    pub fn is_finalized(&self) -> bool {
        self.root_hash.is_some()
    }

    pub fn span(&self, span_id: Uuid) -> Option<&TraceSpan> {
        self.spans.iter().find(|s| s.id == span_id)
    }

    pub fn event(&self, event_id: Uuid) -> Option<&TraceEvent> {
        self.events.iter().find(|e| e.id == event_id)
    }
}
