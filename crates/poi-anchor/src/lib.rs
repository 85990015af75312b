//! Anchor entries: deterministic metadata binding a bundle's commitments to
//! an external ledger transaction.
//!
//! The core produces the metadata payload and verifies already-submitted
//! anchors through an abstract oracle; it never submits transactions. Ledger
//! string-size limits are handled by segmenting long strings at 64-byte
//! boundaries in the CBOR-shaped form; the reconstructed logical value is
//! always identical to the original.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poi_enc::{constant_time_eq_hex, HexHash};
use poi_trace::TraceBundle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Well-known integer metadata label for trace anchors
pub const METADATA_LABEL: u64 = 7077;

/// Entry type stamped on every anchor record
pub const ANCHOR_ENTRY_TYPE: &str = "trace-anchor-v1";

/// Ledger string-size limit used for segmentation (Cardano metadata)
pub const MAX_METADATA_STRING_BYTES: usize = 64;

/// Anchor errors
#[derive(Error, Debug)]
pub enum AnchorError {
    /// Bundle is not finalized or lacks the commitment being anchored
    #[error("Bundle missing commitment: {0}")]
    MissingCommitment(String),

    /// Value cannot be represented as ledger metadata
    #[error("Unsupported metadata value: {0}")]
    UnsupportedValue(String),

    /// Canonical encoding failed
    #[error("Encoding error: {0}")]
    Encoding(#[from] poi_enc::EncodingError),
}

/// Result type for anchor operations
pub type AnchorResult<T> = Result<T, AnchorError>;

/// Deterministic record binding a bundle's commitments to an agent identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub agent_id: String,
    pub root_hash: HexHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<HexHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<HexHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Options for deriving an anchor entry from a bundle
#[derive(Debug, Clone, Default)]
pub struct AnchorOptions {
    pub agent_id: String,
    pub include_merkle_root: bool,
    pub storage_uri: Option<String>,
}

/// Derive the anchor entry for a finalized bundle
pub fn create_anchor_entry_from_bundle(
    bundle: &TraceBundle,
    options: &AnchorOptions,
) -> AnchorResult<AnchorEntry> {
    if bundle.root_hash.is_empty() {
        return Err(AnchorError::MissingCommitment("root hash".into()));
    }
    let entry = AnchorEntry {
        entry_type: ANCHOR_ENTRY_TYPE.to_string(),
        agent_id: options.agent_id.clone(),
        root_hash: bundle.root_hash.clone(),
        manifest_hash: bundle.manifest_hash.clone(),
        merkle_root: options
            .include_merkle_root
            .then(|| bundle.merkle_root.clone()),
        storage_uri: options.storage_uri.clone(),
        timestamp: Utc::now(),
    };
    debug!(root_hash = %entry.root_hash, agent_id = %entry.agent_id, "anchor entry created");
    Ok(entry)
}

/// Metadata blob submitted under the well-known label: `{7077: entry}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMetadata {
    pub label: u64,
    pub entry: AnchorEntry,
}

/// Wrap an anchor entry under the well-known label
pub fn build_anchor_metadata(entry: AnchorEntry) -> AnchorMetadata {
    AnchorMetadata {
        label: METADATA_LABEL,
        entry,
    }
}

/// CBOR-shaped metadata value for external ledger libraries.
///
/// Strings beyond the ledger limit become a `List` of text segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Int(i64),
    Text(String),
    List(Vec<MetadataValue>),
    Map(Vec<(MetadataValue, MetadataValue)>),
}

impl MetadataValue {
    /// Reassemble the logical value: segmented strings concatenate back
    pub fn reconstruct_text(&self) -> Option<String> {
        match self {
            MetadataValue::Text(s) => Some(s.clone()),
            MetadataValue::List(items) => {
                let mut out = String::new();
                for item in items {
                    match item {
                        MetadataValue::Text(s) => out.push_str(s),
                        _ => return None,
                    }
                }
                Some(out)
            }
            _ => None,
        }
    }
}

/// Split a string into segments of at most `MAX_METADATA_STRING_BYTES`
/// bytes, never cutting a UTF-8 character in half.
fn segment_text(text: &str) -> MetadataValue {
    if text.len() <= MAX_METADATA_STRING_BYTES {
        return MetadataValue::Text(text.to_string());
    }
    let mut segments = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if current.len() + c.len_utf8() > MAX_METADATA_STRING_BYTES {
            segments.push(MetadataValue::Text(std::mem::take(&mut current)));
        }
        current.push(c);
    }
    if !current.is_empty() {
        segments.push(MetadataValue::Text(current));
    }
    MetadataValue::List(segments)
}

fn value_to_metadata(value: &Value) -> AnchorResult<MetadataValue> {
    match value {
        Value::String(s) => Ok(segment_text(s)),
        Value::Number(n) => n
            .as_i64()
            .map(MetadataValue::Int)
            .ok_or_else(|| AnchorError::UnsupportedValue(format!("non-integer number {}", n))),
        Value::Bool(b) => Ok(MetadataValue::Int(i64::from(*b))),
        Value::Array(items) => Ok(MetadataValue::List(
            items
                .iter()
                .map(value_to_metadata)
                .collect::<AnchorResult<_>>()?,
        )),
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for key in keys {
                entries.push((
                    MetadataValue::Text(key.clone()),
                    value_to_metadata(&map[key.as_str()])?,
                ));
            }
            Ok(MetadataValue::Map(entries))
        }
        Value::Null => Ok(MetadataValue::List(Vec::new())),
    }
}

/// Convert anchor metadata into a form suitable for external CBOR libraries
pub fn serialize_for_cbor(metadata: &AnchorMetadata) -> AnchorResult<MetadataValue> {
    let entry_value = poi_enc::to_canonical_value(&metadata.entry)?;
    Ok(MetadataValue::Map(vec![(
        MetadataValue::Int(metadata.label as i64),
        value_to_metadata(&entry_value)?,
    )]))
}

/// What an oracle returns for an anchoring transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleAnchor {
    pub label: u64,
    pub payload: Value,
}

/// Opaque oracle failure; the verifier folds it into `reason`
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle unreachable: {0}")]
    Unreachable(String),

    #[error("Oracle returned malformed data: {0}")]
    Malformed(String),
}

/// Abstract read-only oracle over an external ledger
#[async_trait]
pub trait AnchorOracle: Send + Sync {
    /// Fetch the anchor metadata attached to a transaction, if any
    async fn fetch_anchor(&self, tx_id: &str) -> Result<Option<OracleAnchor>, OracleError>;
}

/// Outcome of anchor verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AnchorEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AnchorVerification {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            anchor: None,
            reason: Some(reason.into()),
        }
    }
}

/// Verify that a transaction anchors the expected root hash.
///
/// Oracle errors are wrapped into `reason`; this function never fails.
pub async fn verify_anchor(
    oracle: &dyn AnchorOracle,
    tx_id: &str,
    expected_root_hash: &str,
) -> AnchorVerification {
    let fetched = match oracle.fetch_anchor(tx_id).await {
        Ok(fetched) => fetched,
        Err(e) => {
            warn!(tx_id = %tx_id, error = %e, "anchor oracle failed");
            return AnchorVerification::invalid(format!("oracle error: {}", e));
        }
    };
    let anchor = match fetched {
        Some(anchor) => anchor,
        None => return AnchorVerification::invalid("no anchor metadata on transaction"),
    };
    if anchor.label != METADATA_LABEL {
        return AnchorVerification::invalid(format!(
            "unexpected metadata label {} (wanted {})",
            anchor.label, METADATA_LABEL
        ));
    }
    let entry: AnchorEntry = match serde_json::from_value(anchor.payload) {
        Ok(entry) => entry,
        Err(e) => return AnchorVerification::invalid(format!("malformed anchor payload: {}", e)),
    };
    if !constant_time_eq_hex(&entry.root_hash, expected_root_hash) {
        return AnchorVerification::invalid("anchored root hash does not match");
    }
    info!(tx_id = %tx_id, root_hash = %entry.root_hash, "anchor verified");
    AnchorVerification {
        valid: true,
        anchor: Some(entry),
        reason: None,
    }
}
