//! Rolling hash chain over the ordered event list.
//!
//! Each link folds the previous chain value and the next event hash under
//! the roll domain; the chain starts from a fixed genesis seed. The final
//! root commitment binds the chain value to the ordered span hashes.

use poi_enc::{constant_time_eq_hex, domains, sha256_hex, HexHash};
use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::model::{TraceEvent, TraceSpan};

/// State of the rolling hash fold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingHashState {
    pub current_hash: HexHash,
    pub item_count: u64,
}

impl RollingHashState {
    /// Genesis state: `SHA256Hex("poi-trace:roll:v1|genesis")`
    pub fn new() -> Self {
        Self {
            current_hash: sha256_hex(&format!("{}{}", domains::ROLL, domains::GENESIS_SEED)),
            item_count: 0,
        }
    }

    /// Chain one event hash into the state
    pub fn update(&mut self, event_hash: &str) {
        self.current_hash = sha256_hex(&format!(
            "{}{}|{}",
            domains::ROLL,
            self.current_hash,
            event_hash
        ));
        self.item_count += 1;
    }
}

impl Default for RollingHashState {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold all event hashes, ordered by `seq`, from the genesis state.
///
/// The events' storage order does not matter; two permutations of the same
/// events produce the same chain value.
pub fn compute_rolling_hash(events: &[TraceEvent]) -> TraceResult<HexHash> {
    let mut ordered: Vec<&TraceEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.seq);

    let mut state = RollingHashState::new();
    for event in ordered {
        let hash = event
            .hash
            .as_deref()
            .ok_or_else(|| TraceError::MissingHash(format!("event {} seq {}", event.id, event.seq)))?;
        state.update(hash);
    }
    Ok(state.current_hash)
}

/// `SHA256Hex("poi-trace:root:v1|" + rollingHash ["|" + spanHash…])`
///
/// Spans are ordered by `spanSeq`; a span missing its hash is fatal.
pub fn compute_root_hash(rolling_hash: &str, spans: &[TraceSpan]) -> TraceResult<HexHash> {
    let mut ordered: Vec<&TraceSpan> = spans.iter().collect();
    ordered.sort_by_key(|s| s.span_seq);

    let mut preimage = format!("{}{}", domains::ROOT, rolling_hash);
    for span in ordered {
        let hash = span
            .hash
            .as_deref()
            .ok_or_else(|| TraceError::MissingHash(format!("span {} seq {}", span.id, span.span_seq)))?;
        preimage.push('|');
        preimage.push_str(hash);
    }
    Ok(sha256_hex(&preimage))
}

/// Recompute the chain and compare with the expected value in constant time
pub fn verify_rolling_hash(events: &[TraceEvent], expected: &str) -> TraceResult<bool> {
    let recomputed = compute_rolling_hash(events)?;
    Ok(constant_time_eq_hex(&recomputed, expected))
}
