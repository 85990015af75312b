//! Storage manifests: split a finalized bundle's public view into
//! size-bounded chunks under a single hash-stamped manifest.
//!
//! Each chunk is a canonical `{spans, events}` object; the manifest records
//! every chunk's hash, byte range and span ids, and its own hash is computed
//! over the manifest with the hash field stripped. The manifest hash is
//! copied back into the bundle so downstream anchors bind to it.

use poi_enc::{
    canonical_json, constant_time_eq_hex, domains, sha256_hex, sha256_hex_bytes,
    to_canonical_value, HexHash,
};
use poi_trace::{TraceBundle, TraceEvent, TraceSpan};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub mod store;

pub use store::{read_run_dir, write_run_dir};

/// Default chunk size bound, in bytes of canonical JSON
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

/// Manifest and chunk errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Manifest has no hash to verify against
    #[error("Manifest hash missing")]
    MissingManifestHash,

    /// A chunk's bytes do not hash to the recorded value
    #[error("Chunk {index} hash mismatch")]
    ChunkHashMismatch { index: u32 },

    /// The manifest does not hash to its recorded value
    #[error("Manifest hash mismatch")]
    ManifestHashMismatch,

    /// Number of chunks differs from the manifest
    #[error("Chunk count mismatch: manifest says {expected}, found {found}")]
    ChunkCountMismatch { expected: u32, found: usize },

    /// A chunk's byte range disagrees with its actual size
    #[error("Chunk {index} byte range mismatch")]
    ByteRangeMismatch { index: u32 },

    /// Filesystem error while reading or writing a run directory
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Canonical encoding failed
    #[error("Encoding error: {0}")]
    Encoding(#[from] poi_enc::EncodingError),
}

/// Result type for manifest operations
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Chunking configuration
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Upper bound on a chunk's canonical byte size. A single span larger
    /// than the bound still gets its own chunk.
    pub chunk_size: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Manifest entry for one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub index: u32,
    pub hash: HexHash,
    /// Start and end offsets in the concatenated chunk stream
    pub byte_range: (u64, u64),
    pub span_ids: Vec<Uuid>,
}

/// The content of one chunk: public spans and their disclosed events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub spans: Vec<TraceSpan>,
    pub events: Vec<TraceEvent>,
}

/// Top-level storage manifest for a chunked bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub run_id: Uuid,
    /// Computed over the manifest with this field stripped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<HexHash>,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkRecord>,
    pub bundle_root_hash: HexHash,
    pub merkle_root: HexHash,
}

/// A chunk's canonical bytes, paired with its index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub index: u32,
    pub bytes: Vec<u8>,
}

/// A manifest together with the chunk bytes it describes
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestBuild {
    pub manifest: Manifest,
    pub chunks: Vec<EncodedChunk>,
}

/// `SHA256Hex("poi-trace:manifest:v1|" + canonical(manifest \ {manifestHash}))`
pub fn compute_manifest_hash(manifest: &Manifest) -> ManifestResult<HexHash> {
    let mut unhashed = manifest.clone();
    unhashed.manifest_hash = None;
    let tree = to_canonical_value(&unhashed)?;
    let canonical = String::from_utf8(canonical_json(&tree))
        .map_err(|e| poi_enc::EncodingError::SerializationFailed(e.to_string()))?;
    Ok(sha256_hex(&format!("{}{}", domains::MANIFEST, canonical)))
}

/// Split a bundle's public view into size-bounded chunks and build the
/// manifest. The manifest hash is copied back into the bundle.
pub fn create_manifest(
    bundle: &mut TraceBundle,
    config: &ChunkingConfig,
) -> ManifestResult<ManifestBuild> {
    let mut groups: Vec<(Vec<TraceSpan>, Vec<TraceEvent>)> = Vec::new();
    let mut current_spans: Vec<TraceSpan> = Vec::new();
    let mut current_events: Vec<TraceEvent> = Vec::new();

    // public spans are already span-seq ordered; pack greedily
    for annotated in &bundle.public_view.public_spans {
        let mut candidate_spans = current_spans.clone();
        let mut candidate_events = current_events.clone();
        candidate_spans.push(annotated.span.clone());
        candidate_events.extend(annotated.events.iter().cloned());

        let candidate_bytes = encode_payload(&candidate_spans, &candidate_events)?;
        if candidate_bytes.len() as u64 > config.chunk_size && !current_spans.is_empty() {
            groups.push((current_spans, current_events));
            current_spans = vec![annotated.span.clone()];
            current_events = annotated.events.clone();
        } else {
            current_spans = candidate_spans;
            current_events = candidate_events;
        }
    }
    if !current_spans.is_empty() {
        groups.push((current_spans, current_events));
    }

    let mut records = Vec::with_capacity(groups.len());
    let mut chunks = Vec::with_capacity(groups.len());
    let mut offset = 0u64;
    for (i, (spans, events)) in groups.into_iter().enumerate() {
        let index = i as u32;
        let span_ids: Vec<Uuid> = spans.iter().map(|s| s.id).collect();
        let bytes = encode_payload(&spans, &events)?;
        let end = offset + bytes.len() as u64;
        records.push(ChunkRecord {
            index,
            hash: sha256_hex_bytes(&bytes),
            byte_range: (offset, end),
            span_ids,
        });
        debug!(index, size = bytes.len(), "chunk sealed");
        chunks.push(EncodedChunk { index, bytes });
        offset = end;
    }

    let mut manifest = Manifest {
        run_id: bundle.private_run.id,
        manifest_hash: None,
        total_chunks: records.len() as u32,
        chunk_size: config.chunk_size,
        chunks: records,
        bundle_root_hash: bundle.root_hash.clone(),
        merkle_root: bundle.merkle_root.clone(),
    };
    let manifest_hash = compute_manifest_hash(&manifest)?;
    manifest.manifest_hash = Some(manifest_hash.clone());
    bundle.manifest_hash = Some(manifest_hash.clone());

    info!(
        run_id = %manifest.run_id,
        manifest_hash = %manifest_hash,
        total_chunks = manifest.total_chunks,
        "manifest created"
    );
    Ok(ManifestBuild { manifest, chunks })
}

/// Re-verify a manifest against the chunk bytes it describes
pub fn verify_manifest(manifest: &Manifest, chunks: &[EncodedChunk]) -> ManifestResult<()> {
    let stored = manifest
        .manifest_hash
        .as_deref()
        .ok_or(ManifestError::MissingManifestHash)?;
    let fresh = compute_manifest_hash(manifest)?;
    if !constant_time_eq_hex(stored, &fresh) {
        return Err(ManifestError::ManifestHashMismatch);
    }
    if manifest.total_chunks as usize != chunks.len() {
        return Err(ManifestError::ChunkCountMismatch {
            expected: manifest.total_chunks,
            found: chunks.len(),
        });
    }
    for (record, chunk) in manifest.chunks.iter().zip(chunks) {
        if !constant_time_eq_hex(&record.hash, &sha256_hex_bytes(&chunk.bytes)) {
            return Err(ManifestError::ChunkHashMismatch {
                index: record.index,
            });
        }
        let (start, end) = record.byte_range;
        if end - start != chunk.bytes.len() as u64 {
            return Err(ManifestError::ByteRangeMismatch {
                index: record.index,
            });
        }
    }
    Ok(())
}

fn encode_payload(spans: &[TraceSpan], events: &[TraceEvent]) -> ManifestResult<Vec<u8>> {
    let payload = ChunkPayload {
        spans: spans.to_vec(),
        events: events.to_vec(),
    };
    let tree = to_canonical_value(&payload)?;
    Ok(canonical_json(&tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use poi_trace::{EventInput, EventKind, SpanInput, TraceBuilder};
    use serde_json::json;

    fn bundle_with_public_spans(n: usize) -> TraceBundle {
        let mut builder = TraceBuilder::new("agent-manifest");
        for i in 0..n {
            let span = builder
                .add_span(SpanInput::new(format!("span-{}", i)))
                .unwrap()
                .id;
            builder
                .add_event(
                    span,
                    EventInput::new(EventKind::Command, json!({"cmd": format!("cmd {}", i)})),
                )
                .unwrap();
            builder.close_span(span, None).unwrap();
        }
        builder.finalize().unwrap()
    }

    #[test]
    fn test_manifest_hash_copied_into_bundle() {
        let mut bundle = bundle_with_public_spans(3);
        let build = create_manifest(&mut bundle, &ChunkingConfig::default()).unwrap();
        assert_eq!(bundle.manifest_hash, build.manifest.manifest_hash);
        assert!(bundle.manifest_hash.is_some());
    }

    #[test]
    fn test_manifest_verifies() {
        let mut bundle = bundle_with_public_spans(4);
        let build = create_manifest(&mut bundle, &ChunkingConfig::default()).unwrap();
        verify_manifest(&build.manifest, &build.chunks).unwrap();
    }

    #[test]
    fn test_small_chunk_size_splits_spans() {
        let mut bundle = bundle_with_public_spans(4);
        // force one span per chunk
        let config = ChunkingConfig { chunk_size: 64 };
        let build = create_manifest(&mut bundle, &config).unwrap();
        assert_eq!(build.manifest.total_chunks, 4);
        for record in &build.manifest.chunks {
            assert_eq!(record.span_ids.len(), 1);
        }
        verify_manifest(&build.manifest, &build.chunks).unwrap();
    }

    #[test]
    fn test_byte_ranges_are_contiguous() {
        let mut bundle = bundle_with_public_spans(5);
        let config = ChunkingConfig { chunk_size: 64 };
        let build = create_manifest(&mut bundle, &config).unwrap();
        let mut offset = 0u64;
        for (record, chunk) in build.manifest.chunks.iter().zip(&build.chunks) {
            assert_eq!(record.byte_range.0, offset);
            assert_eq!(record.byte_range.1, offset + chunk.bytes.len() as u64);
            offset = record.byte_range.1;
        }
    }

    #[test]
    fn test_tampered_chunk_detected() {
        let mut bundle = bundle_with_public_spans(2);
        let mut build = create_manifest(&mut bundle, &ChunkingConfig::default()).unwrap();
        build.chunks[0].bytes[0] ^= 1;
        assert!(matches!(
            verify_manifest(&build.manifest, &build.chunks),
            Err(ManifestError::ChunkHashMismatch { index: 0 })
        ));
    }

    #[test]
    fn test_tampered_manifest_detected() {
        let mut bundle = bundle_with_public_spans(2);
        let mut build = create_manifest(&mut bundle, &ChunkingConfig::default()).unwrap();
        build.manifest.bundle_root_hash = sha256_hex("forged");
        assert!(matches!(
            verify_manifest(&build.manifest, &build.chunks),
            Err(ManifestError::ManifestHashMismatch)
        ));
    }

    #[test]
    fn test_empty_public_view_yields_empty_manifest() {
        let mut builder = TraceBuilder::new("agent-empty");
        let mut bundle = builder.finalize().unwrap();
        let build = create_manifest(&mut bundle, &ChunkingConfig::default()).unwrap();
        assert_eq!(build.manifest.total_chunks, 0);
        assert!(build.chunks.is_empty());
        verify_manifest(&build.manifest, &build.chunks).unwrap();
    }

    #[test]
    fn test_chunk_payloads_decode() {
        let mut bundle = bundle_with_public_spans(3);
        let build = create_manifest(&mut bundle, &ChunkingConfig::default()).unwrap();
        for chunk in &build.chunks {
            let payload: ChunkPayload = serde_json::from_slice(&chunk.bytes).unwrap();
            assert!(!payload.spans.is_empty());
        }
    }
}
