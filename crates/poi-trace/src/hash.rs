//! Event and span hash computation.
//!
//! Both hashes strip their own `hash` field from the preimage, canonicalize
//! the remainder, and wrap it with the matching domain prefix.

use poi_enc::{domains, sha256_hex, to_canonical_string, HexHash};

use crate::error::TraceResult;
use crate::model::{TraceEvent, TraceSpan};

/// `SHA256Hex("poi-trace:event:v1|" + canonical(event \ {hash}))`
pub fn compute_event_hash(event: &TraceEvent) -> TraceResult<HexHash> {
    let mut unhashed = event.clone();
    unhashed.hash = None;
    let canonical = to_canonical_string(&unhashed)?;
    Ok(sha256_hex(&format!("{}{}", domains::EVENT, canonical)))
}

/// `SHA256Hex("poi-trace:span:v1|" + canonical(span \ {hash}) + "|" + join("|", eventHashes))`
///
/// `event_hashes` must already be ordered by event `seq`. A span with no
/// events hashes the canonical span alone.
pub fn compute_span_hash(span: &TraceSpan, event_hashes: &[HexHash]) -> TraceResult<HexHash> {
    let mut unhashed = span.clone();
    unhashed.hash = None;
    let canonical = to_canonical_string(&unhashed)?;
    let preimage = if event_hashes.is_empty() {
        format!("{}{}", domains::SPAN, canonical)
    } else {
        format!("{}{}|{}", domains::SPAN, canonical, event_hashes.join("|"))
    };
    Ok(sha256_hex(&preimage))
}
