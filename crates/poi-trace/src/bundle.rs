//! Finalized bundles: public view extraction, verification, signing.
//!
//! The public view is a pure function of the run at the moment of
//! finalization; non-public spans appear only as `{spanId, hash}` references
//! so the Merkle root over all spans still verifies against disclosed data.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use poi_enc::{constant_time_eq_hex, to_canonical_json, HexHash};
use poi_merkle::MerkleTree;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{TraceError, TraceResult};
use crate::hash::{compute_event_hash, compute_span_hash};
use crate::model::{RunStatus, TraceEvent, TraceRun, TraceSpan, Visibility};
use crate::rolling::{compute_root_hash, RollingHashState};
use crate::sign::SignatureProvider;

/// Format version stamped on every bundle
pub const BUNDLE_FORMAT_VERSION: &str = "poi-bundle/1";

/// A public span together with its disclosed (public-only) events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedSpan {
    pub span: TraceSpan,
    /// Public events of this span, ordered by `seq`
    pub events: Vec<TraceEvent>,
}

/// Opaque reference to a redacted (non-public) span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedSpanRef {
    pub span_id: Uuid,
    pub hash: HexHash,
}

/// The disclosed projection of a finalized run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicView {
    pub run_id: Uuid,
    pub agent_id: String,
    pub schema_version: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub status: RunStatus,
    pub total_events: usize,
    pub total_spans: usize,
    pub root_hash: HexHash,
    pub merkle_root: HexHash,
    /// Public spans sorted by `spanSeq`
    pub public_spans: Vec<AnnotatedSpan>,
    /// Redacted references sorted by `spanId`
    pub redacted_span_hashes: Vec<RedactedSpanRef>,
}

/// The finalized, self-describing artifact for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceBundle {
    pub format_version: String,
    pub public_view: PublicView,
    pub private_run: TraceRun,
    pub root_hash: HexHash,
    pub merkle_root: HexHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<HexHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,
    /// Hex-encoded detached signature over the commitment payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Outcome of each independent bundle check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationChecks {
    pub rolling_hash_valid: bool,
    pub root_hash_valid: bool,
    pub merkle_root_valid: bool,
    pub span_hashes_valid: bool,
    pub event_hashes_valid: bool,
    pub sequence_valid: bool,
}

impl Default for VerificationChecks {
    fn default() -> Self {
        Self {
            rolling_hash_valid: true,
            root_hash_valid: true,
            merkle_root_valid: true,
            span_hashes_valid: true,
            event_hashes_valid: true,
            sequence_valid: true,
        }
    }
}

/// Structured verification report; failures are carried here, never thrown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checks: VerificationChecks,
}

/// Extract the public view of a finalized run.
///
/// Keeps `public` spans with only their `public` events; every other span
/// becomes a `{spanId, hash}` reference.
pub fn extract_public_view(run: &TraceRun, merkle_root: &str) -> TraceResult<PublicView> {
    let root_hash = run
        .root_hash
        .clone()
        .ok_or_else(|| TraceError::MissingHash("run root hash".into()))?;

    let event_by_id: HashMap<Uuid, &TraceEvent> = run.events.iter().map(|e| (e.id, e)).collect();

    let mut public_spans = Vec::new();
    let mut redacted = Vec::new();
    for span in &run.spans {
        if span.visibility == Visibility::Public {
            let mut events: Vec<TraceEvent> = span
                .event_ids
                .iter()
                .filter_map(|id| event_by_id.get(id).copied())
                .filter(|e| e.visibility == Visibility::Public)
                .cloned()
                .collect();
            events.sort_by_key(|e| e.seq);
            public_spans.push(AnnotatedSpan {
                span: span.clone(),
                events,
            });
        } else {
            redacted.push(RedactedSpanRef {
                span_id: span.id,
                hash: span
                    .hash
                    .clone()
                    .ok_or_else(|| TraceError::MissingHash(format!("span {}", span.id)))?,
            });
        }
    }
    public_spans.sort_by_key(|s| s.span.span_seq);
    redacted.sort_by_key(|r| r.span_id);

    Ok(PublicView {
        run_id: run.id,
        agent_id: run.agent_id.clone(),
        schema_version: run.schema_version.clone(),
        started_at: run.started_at,
        ended_at: run.ended_at,
        duration_ms: run.duration_ms,
        status: run.status,
        total_events: run.events.len(),
        total_spans: run.spans.len(),
        root_hash,
        merkle_root: merkle_root.to_string(),
        public_spans,
        redacted_span_hashes: redacted,
    })
}

/// Verify every commitment in a bundle.
///
/// The six checks run independently from freshly recomputed hashes; a
/// failure in one populates `errors` without short-circuiting the rest, so
/// the report always names every violated invariant.
pub fn verify_bundle(bundle: &TraceBundle) -> VerificationResult {
    let run = &bundle.private_run;
    let mut checks = VerificationChecks::default();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // sequence density and referential integrity
    let mut ordered_events: Vec<&TraceEvent> = run.events.iter().collect();
    ordered_events.sort_by_key(|e| e.seq);
    for (i, event) in ordered_events.iter().enumerate() {
        if event.seq != i as u64 {
            checks.sequence_valid = false;
            errors.push(format!(
                "event sequence gap: expected {}, found {}",
                i, event.seq
            ));
            break;
        }
    }
    let mut ordered_spans: Vec<&TraceSpan> = run.spans.iter().collect();
    ordered_spans.sort_by_key(|s| s.span_seq);
    for (i, span) in ordered_spans.iter().enumerate() {
        if span.span_seq != i as u64 {
            checks.sequence_valid = false;
            errors.push(format!(
                "span sequence gap: expected {}, found {}",
                i, span.span_seq
            ));
            break;
        }
    }
    let event_ids: HashSet<Uuid> = run.events.iter().map(|e| e.id).collect();
    for span in &run.spans {
        for event_id in &span.event_ids {
            if !event_ids.contains(event_id) {
                checks.sequence_valid = false;
                errors.push(format!(
                    "span {} references unknown event {}",
                    span.id, event_id
                ));
            }
        }
    }

    // event hashes, recomputed from the event contents
    let mut fresh_event_hashes: HashMap<Uuid, HexHash> = HashMap::new();
    for event in &run.events {
        match compute_event_hash(event) {
            Ok(fresh) => {
                match event.hash.as_deref() {
                    Some(stored) if constant_time_eq_hex(stored, &fresh) => {}
                    Some(_) => {
                        checks.event_hashes_valid = false;
                        errors.push(format!("event {} hash mismatch", event.id));
                    }
                    None => {
                        checks.event_hashes_valid = false;
                        errors.push(format!("event {} missing hash", event.id));
                    }
                }
                fresh_event_hashes.insert(event.id, fresh);
            }
            Err(e) => {
                checks.event_hashes_valid = false;
                errors.push(format!("event {} hash recompute failed: {}", event.id, e));
            }
        }
    }

    // span hashes, recomputed from fresh event hashes
    let seq_by_id: HashMap<Uuid, u64> = run.events.iter().map(|e| (e.id, e.seq)).collect();
    let mut fresh_spans: Vec<TraceSpan> = Vec::with_capacity(run.spans.len());
    for span in &run.spans {
        let mut ordered: Vec<(u64, HexHash)> = span
            .event_ids
            .iter()
            .filter_map(|id| {
                let seq = seq_by_id.get(id)?;
                let hash = fresh_event_hashes.get(id)?;
                Some((*seq, hash.clone()))
            })
            .collect();
        ordered.sort_by_key(|(seq, _)| *seq);
        let hashes: Vec<HexHash> = ordered.into_iter().map(|(_, h)| h).collect();
        match compute_span_hash(span, &hashes) {
            Ok(fresh) => {
                match span.hash.as_deref() {
                    Some(stored) if constant_time_eq_hex(stored, &fresh) => {}
                    Some(_) => {
                        checks.span_hashes_valid = false;
                        errors.push(format!("span {} hash mismatch", span.id));
                    }
                    None => {
                        checks.span_hashes_valid = false;
                        errors.push(format!("span {} missing hash", span.id));
                    }
                }
                let mut clone = span.clone();
                clone.hash = Some(fresh);
                fresh_spans.push(clone);
            }
            Err(e) => {
                checks.span_hashes_valid = false;
                errors.push(format!("span {} hash recompute failed: {}", span.id, e));
                fresh_spans.push(span.clone());
            }
        }
    }

    // rolling hash chain over fresh event hashes in seq order
    let mut chain_events: Vec<(u64, Option<&HexHash>)> = run
        .events
        .iter()
        .map(|e| (e.seq, fresh_event_hashes.get(&e.id)))
        .collect();
    chain_events.sort_by_key(|(seq, _)| *seq);
    let mut state = RollingHashState::new();
    let mut chain_complete = true;
    for (_, hash) in &chain_events {
        match hash {
            Some(h) => state.update(h),
            None => chain_complete = false,
        }
    }
    let fresh_rolling = state.current_hash;
    match run.rolling_hash.as_deref() {
        Some(stored) if chain_complete && constant_time_eq_hex(stored, &fresh_rolling) => {}
        Some(_) => {
            checks.rolling_hash_valid = false;
            errors.push("rolling hash mismatch".to_string());
        }
        None => {
            checks.rolling_hash_valid = false;
            errors.push("run missing rolling hash".to_string());
        }
    }

    // root commitment over the fresh rolling hash and fresh span hashes
    match compute_root_hash(&fresh_rolling, &fresh_spans) {
        Ok(fresh_root) => {
            let stored_ok = run
                .root_hash
                .as_deref()
                .map(|stored| constant_time_eq_hex(stored, &fresh_root))
                .unwrap_or(false);
            if !stored_ok || !constant_time_eq_hex(&bundle.root_hash, &fresh_root) {
                checks.root_hash_valid = false;
                errors.push("root hash mismatch".to_string());
            }
        }
        Err(e) => {
            checks.root_hash_valid = false;
            errors.push(format!("root hash recompute failed: {}", e));
        }
    }

    // Merkle root over fresh span hashes in spanSeq order
    let mut merkle_input: Vec<&TraceSpan> = fresh_spans.iter().collect();
    merkle_input.sort_by_key(|s| s.span_seq);
    let span_hashes: Vec<HexHash> = merkle_input
        .iter()
        .filter_map(|s| s.hash.clone())
        .collect();
    if span_hashes.len() == fresh_spans.len() {
        let fresh_merkle = MerkleTree::from_span_hashes(&span_hashes).root_hash;
        if !constant_time_eq_hex(&bundle.merkle_root, &fresh_merkle)
            || !constant_time_eq_hex(&bundle.public_view.merkle_root, &fresh_merkle)
        {
            checks.merkle_root_valid = false;
            errors.push("merkle root mismatch".to_string());
        }
    } else {
        checks.merkle_root_valid = false;
        errors.push("merkle root could not be recomputed".to_string());
    }

    if bundle.public_view.public_spans.is_empty() {
        warnings.push("no public spans in bundle".to_string());
    }
    if bundle.public_view.status != run.status {
        warnings.push(format!(
            "public view status {:?} differs from private run status {:?}",
            bundle.public_view.status, run.status
        ));
    }

    let valid = errors.is_empty()
        && checks.rolling_hash_valid
        && checks.root_hash_valid
        && checks.merkle_root_valid
        && checks.span_hashes_valid
        && checks.event_hashes_valid
        && checks.sequence_valid;
    if valid {
        debug!(run_id = %run.id, "bundle verified");
    } else {
        warn!(run_id = %run.id, errors = errors.len(), "bundle verification failed");
    }

    VerificationResult {
        valid,
        errors,
        warnings,
        checks,
    }
}

/// Payload signed by `sign_bundle`: the bundle's commitments, canonicalized.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningPayload<'a> {
    root_hash: &'a str,
    merkle_root: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest_hash: Option<&'a str>,
}

fn signing_payload_bytes(bundle: &TraceBundle) -> TraceResult<Vec<u8>> {
    let payload = SigningPayload {
        root_hash: &bundle.root_hash,
        merkle_root: &bundle.merkle_root,
        manifest_hash: bundle.manifest_hash.as_deref(),
    };
    Ok(to_canonical_json(&payload)?)
}

/// Sign a bundle's commitments with the given provider.
///
/// Returns a signed copy; the input bundle is not mutated.
pub fn sign_bundle(
    bundle: &TraceBundle,
    provider: &dyn SignatureProvider,
) -> TraceResult<TraceBundle> {
    let message = signing_payload_bytes(bundle)?;
    let signature = provider.sign(&message)?;
    let mut signed = bundle.clone();
    signed.signer_id = Some(provider.signer_id().to_string());
    signed.signature = Some(hex::encode(signature));
    info!(
        root_hash = %bundle.root_hash,
        signer_id = %provider.signer_id(),
        "bundle signed"
    );
    Ok(signed)
}

/// Recompute the signing payload and verify the stored signature.
///
/// An unsigned bundle verifies as false.
pub fn verify_bundle_signature(
    bundle: &TraceBundle,
    provider: &dyn SignatureProvider,
) -> TraceResult<bool> {
    let (signer_id, signature_hex) = match (&bundle.signer_id, &bundle.signature) {
        (Some(signer_id), Some(signature)) => (signer_id, signature),
        _ => {
            warn!(root_hash = %bundle.root_hash, "bundle carries no signature");
            return Ok(false);
        }
    };
    let signature = hex::decode(signature_hex)
        .map_err(|e| TraceError::Encoding(poi_enc::EncodingError::InvalidHex(e.to_string())))?;
    let message = signing_payload_bytes(bundle)?;
    Ok(provider.verify(&message, &signature, signer_id)?)
}
