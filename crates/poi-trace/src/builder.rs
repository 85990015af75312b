//! Single-writer trace builder.
//!
//! The builder owns a mutable run, assigns sequence numbers under its
//! single-writer discipline, enforces the run invariants on every mutation,
//! and finalizes the run into a frozen bundle. Finalization stages all
//! computed hashes on scratch copies and swaps them in only on success, so a
//! failed finalize leaves the run exactly as it was.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bundle::{extract_public_view, TraceBundle, BUNDLE_FORMAT_VERSION};
use crate::error::{TraceError, TraceResult};
use crate::hash::{compute_event_hash, compute_span_hash};
use crate::model::{
    EventKind, RunStatus, SpanStatus, TraceEvent, TraceRun, TraceSpan, Visibility, SCHEMA_VERSION,
};
use crate::rolling::{compute_rolling_hash, compute_root_hash};
use poi_merkle::MerkleTree;

/// Options for opening a span
#[derive(Debug, Clone)]
pub struct SpanInput {
    pub name: String,
    pub visibility: Visibility,
    pub parent_span_id: Option<Uuid>,
    pub metadata: Option<Value>,
}

impl SpanInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility: Visibility::Public,
            parent_span_id: None,
            metadata: None,
        }
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn parent(mut self, parent_span_id: Uuid) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Options for appending an event
#[derive(Debug, Clone)]
pub struct EventInput {
    pub kind: EventKind,
    /// Defaults by kind when unset: command/observation are public, the rest private
    pub visibility: Option<Visibility>,
    pub payload: Value,
    /// Explicit sequence number, for replaying or importing an existing
    /// record. Must equal the next free `seq`; a mismatch fails the append
    /// with `SequenceGap`. Unset means "assign the next seq".
    pub seq: Option<u64>,
}

impl EventInput {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            visibility: None,
            payload,
            seq: None,
        }
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// In-memory builder for a single run; one producer mutates it at a time
#[derive(Debug)]
pub struct TraceBuilder {
    run: TraceRun,
    span_index: HashMap<Uuid, usize>,
    event_index: HashMap<Uuid, usize>,
    max_events: Option<usize>,
    finalized: bool,
}

impl TraceBuilder {
    /// Initialize an empty, running trace for an agent
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        let run = TraceRun {
            id: Uuid::new_v4(),
            agent_id: agent_id.clone(),
            schema_version: SCHEMA_VERSION.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            status: RunStatus::Running,
            events: Vec::new(),
            spans: Vec::new(),
            metadata: None,
            rolling_hash: None,
            root_hash: None,
        };
        info!(run_id = %run.id, agent_id = %agent_id, "trace run created");
        Self {
            run,
            span_index: HashMap::new(),
            event_index: HashMap::new(),
            max_events: None,
            finalized: false,
        }
    }

    /// Attach run-level metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.run.metadata = Some(metadata);
        self
    }

    /// Cap retained events; reaching the cap fails `add_event` with
    /// `Backpressure` rather than silently dropping.
    pub fn with_event_cap(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);
        self
    }

    /// Read access to the run under construction
    pub fn run(&self) -> &TraceRun {
        &self.run
    }

    /// Open a new span with the next `spanSeq`.
    ///
    /// A parent, when given, must exist and still be open; the new span id is
    /// appended to the parent's children. A new span can never be an ancestor
    /// of an existing one, so child links always form a DAG.
    pub fn add_span(&mut self, input: SpanInput) -> TraceResult<&TraceSpan> {
        self.ensure_mutable()?;

        if let Some(parent_id) = input.parent_span_id {
            let parent_idx = *self
                .span_index
                .get(&parent_id)
                .ok_or(TraceError::SpanNotFound(parent_id))?;
            if self.run.spans[parent_idx].is_closed() {
                return Err(TraceError::SpanClosed(parent_id));
            }
        }

        let span = TraceSpan {
            id: Uuid::new_v4(),
            span_seq: self.run.spans.len() as u64,
            name: input.name,
            status: SpanStatus::Running,
            visibility: input.visibility,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            event_ids: Vec::new(),
            child_span_ids: Vec::new(),
            metadata: input.metadata,
            hash: None,
        };
        let span_id = span.id;

        if let Some(parent_id) = input.parent_span_id {
            let parent_idx = self.span_index[&parent_id];
            self.run.spans[parent_idx].child_span_ids.push(span_id);
        }

        debug!(span_id = %span_id, span_seq = span.span_seq, name = %span.name, "span opened");
        self.span_index.insert(span_id, self.run.spans.len());
        self.run.spans.push(span);
        Ok(&self.run.spans[self.span_index[&span_id]])
    }

    /// Append an event with the next `seq` and attach it to an open span.
    ///
    /// An explicit `seq` on the input (replay/import) is validated against
    /// the run's current length; a gap or duplicate fails before any state
    /// changes.
    pub fn add_event(&mut self, span_id: Uuid, input: EventInput) -> TraceResult<&TraceEvent> {
        self.ensure_mutable()?;

        let span_idx = *self
            .span_index
            .get(&span_id)
            .ok_or(TraceError::SpanNotFound(span_id))?;
        if self.run.spans[span_idx].is_closed() {
            return Err(TraceError::SpanClosed(span_id));
        }
        let next_seq = self.run.events.len() as u64;
        if let Some(seq) = input.seq {
            if seq != next_seq {
                return Err(TraceError::SequenceGap {
                    expected: next_seq,
                    found: seq,
                });
            }
        }
        if let Some(limit) = self.max_events {
            if self.run.events.len() >= limit {
                return Err(TraceError::Backpressure { limit });
            }
        }

        let event = TraceEvent {
            id: Uuid::new_v4(),
            seq: next_seq,
            timestamp: Utc::now(),
            visibility: input
                .visibility
                .unwrap_or_else(|| input.kind.default_visibility()),
            kind: input.kind,
            payload: input.payload,
            hash: None,
        };
        let event_id = event.id;

        debug!(event_id = %event_id, seq = event.seq, span_id = %span_id, "event appended");
        self.run.spans[span_idx].event_ids.push(event_id);
        self.event_index.insert(event_id, self.run.events.len());
        self.run.events.push(event);
        Ok(&self.run.events[self.event_index[&event_id]])
    }

    /// Close a span, setting `endedAt`, `durationMs` and status.
    ///
    /// Re-closing with the same status is a no-op; re-closing with a
    /// different status fails.
    pub fn close_span(&mut self, span_id: Uuid, status: Option<SpanStatus>) -> TraceResult<()> {
        self.ensure_mutable()?;

        let span_idx = *self
            .span_index
            .get(&span_id)
            .ok_or(TraceError::SpanNotFound(span_id))?;
        let status = status.unwrap_or(SpanStatus::Completed);
        let span = &mut self.run.spans[span_idx];

        if span.is_closed() {
            if span.status == status {
                return Ok(());
            }
            return Err(TraceError::SpanClosed(span_id));
        }

        let ended_at = Utc::now();
        span.ended_at = Some(ended_at);
        span.duration_ms = Some(
            ended_at
                .signed_duration_since(span.started_at)
                .num_milliseconds(),
        );
        span.status = status;
        debug!(span_id = %span_id, status = ?status, "span closed");
        Ok(())
    }

    /// Finalize the run into a frozen, self-describing bundle.
    ///
    /// Still-open spans are closed as `cancelled`. Event hashes, span hashes,
    /// the rolling hash, the root hash, the span Merkle root and the public
    /// view are all computed on scratch copies and swapped in atomically; on
    /// any failure the run stays mutable and unchanged.
    pub fn finalize(&mut self) -> TraceResult<TraceBundle> {
        self.ensure_mutable()?;

        let ended_at = Utc::now();
        let mut events = self.run.events.clone();
        let mut spans = self.run.spans.clone();

        for span in spans.iter_mut() {
            if !span.is_closed() {
                span.ended_at = Some(ended_at);
                span.duration_ms = Some(
                    ended_at
                        .signed_duration_since(span.started_at)
                        .num_milliseconds(),
                );
                span.status = SpanStatus::Cancelled;
                debug!(span_id = %span.id, "open span cancelled at finalization");
            }
        }

        // per-event hashes; the fold below is strictly sequential
        let mut event_hash_by_id: HashMap<Uuid, (u64, String)> = HashMap::new();
        for event in events.iter_mut() {
            let hash = compute_event_hash(event)?;
            event_hash_by_id.insert(event.id, (event.seq, hash.clone()));
            event.hash = Some(hash);
        }

        for span in spans.iter_mut() {
            let mut ordered: Vec<(u64, String)> = Vec::with_capacity(span.event_ids.len());
            for event_id in &span.event_ids {
                let (seq, hash) = event_hash_by_id
                    .get(event_id)
                    .ok_or(TraceError::EventNotFound(*event_id))?;
                ordered.push((*seq, hash.clone()));
            }
            ordered.sort_by_key(|(seq, _)| *seq);
            let hashes: Vec<String> = ordered.into_iter().map(|(_, h)| h).collect();
            span.hash = Some(compute_span_hash(span, &hashes)?);
        }

        let rolling_hash = compute_rolling_hash(&events)?;
        let root_hash = compute_root_hash(&rolling_hash, &spans)?;

        let mut ordered_spans: Vec<&TraceSpan> = spans.iter().collect();
        ordered_spans.sort_by_key(|s| s.span_seq);
        let mut span_hashes: Vec<String> = Vec::with_capacity(ordered_spans.len());
        for span in &ordered_spans {
            span_hashes.push(
                span.hash
                    .clone()
                    .ok_or_else(|| TraceError::MissingHash(format!("span {}", span.id)))?,
            );
        }
        let merkle_root = MerkleTree::from_span_hashes(&span_hashes).root_hash;

        let status = if spans.iter().any(|s| s.status == SpanStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        // everything computed; swap the scratch state in
        self.run.events = events;
        self.run.spans = spans;
        self.run.ended_at = Some(ended_at);
        self.run.duration_ms = Some(
            ended_at
                .signed_duration_since(self.run.started_at)
                .num_milliseconds(),
        );
        self.run.status = status;
        self.run.rolling_hash = Some(rolling_hash);
        self.run.root_hash = Some(root_hash.clone());
        self.finalized = true;

        let public_view = extract_public_view(&self.run, &merkle_root)?;
        info!(
            run_id = %self.run.id,
            root_hash = %root_hash,
            merkle_root = %merkle_root,
            events = self.run.events.len(),
            spans = self.run.spans.len(),
            "trace run finalized"
        );

        Ok(TraceBundle {
            format_version: BUNDLE_FORMAT_VERSION.to_string(),
            public_view,
            private_run: self.run.clone(),
            root_hash,
            merkle_root,
            manifest_hash: None,
            signer_id: None,
            signature: None,
        })
    }

    fn ensure_mutable(&self) -> TraceResult<()> {
        if self.finalized {
            return Err(TraceError::RunFinalized);
        }
        Ok(())
    }
}
