//! On-disk run directory: `manifest.json` plus zero-padded chunk files.
//!
//! ```text
//! <run_dir>/
//!   manifest.json
//!   chunks/
//!     0000.json
//!     0001.json
//! ```
//!
//! Reading a run directory re-verifies every chunk hash and the manifest
//! hash before returning.

use std::fs;
use std::path::Path;

use poi_enc::{canonical_json, to_canonical_value};
use tracing::{debug, info};

use crate::{verify_manifest, EncodedChunk, Manifest, ManifestBuild, ManifestResult};

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_DIR: &str = "chunks";

fn chunk_file_name(index: u32) -> String {
    format!("{:04}.json", index)
}

/// Write a manifest build to a run directory, creating it as needed
pub fn write_run_dir(run_dir: &Path, build: &ManifestBuild) -> ManifestResult<()> {
    let chunks_dir = run_dir.join(CHUNKS_DIR);
    fs::create_dir_all(&chunks_dir)?;

    let tree = to_canonical_value(&build.manifest)?;
    fs::write(run_dir.join(MANIFEST_FILE), canonical_json(&tree))?;

    for chunk in &build.chunks {
        let path = chunks_dir.join(chunk_file_name(chunk.index));
        fs::write(&path, &chunk.bytes)?;
        debug!(path = %path.display(), size = chunk.bytes.len(), "chunk written");
    }

    info!(
        run_dir = %run_dir.display(),
        chunks = build.chunks.len(),
        "run directory written"
    );
    Ok(())
}

/// Read a run directory back and verify every hash in it
pub fn read_run_dir(run_dir: &Path) -> ManifestResult<ManifestBuild> {
    let manifest_bytes = fs::read(run_dir.join(MANIFEST_FILE))?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| poi_enc::EncodingError::DeserializationFailed(e.to_string()))?;

    let chunks_dir = run_dir.join(CHUNKS_DIR);
    let mut chunks = Vec::with_capacity(manifest.total_chunks as usize);
    for index in 0..manifest.total_chunks {
        let bytes = fs::read(chunks_dir.join(chunk_file_name(index)))?;
        chunks.push(EncodedChunk { index, bytes });
    }

    verify_manifest(&manifest, &chunks)?;
    debug!(run_dir = %run_dir.display(), "run directory verified");
    Ok(ManifestBuild { manifest, chunks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_manifest, ChunkingConfig, ManifestError};
    use poi_trace::{EventInput, EventKind, SpanInput, TraceBuilder};
    use serde_json::json;

    fn sample_build() -> ManifestBuild {
        let mut builder = TraceBuilder::new("agent-store");
        for i in 0..3 {
            let span = builder
                .add_span(SpanInput::new(format!("span-{}", i)))
                .unwrap()
                .id;
            builder
                .add_event(
                    span,
                    EventInput::new(EventKind::Command, json!({"cmd": format!("c{}", i)})),
                )
                .unwrap();
            builder.close_span(span, None).unwrap();
        }
        let mut bundle = builder.finalize().unwrap();
        create_manifest(&mut bundle, &ChunkingConfig { chunk_size: 64 }).unwrap()
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let build = sample_build();
        write_run_dir(dir.path(), &build).unwrap();

        let restored = read_run_dir(dir.path()).unwrap();
        assert_eq!(restored.manifest, build.manifest);
        assert_eq!(restored.chunks, build.chunks);
    }

    #[test]
    fn test_chunk_files_are_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let build = sample_build();
        write_run_dir(dir.path(), &build).unwrap();
        assert!(dir.path().join("chunks/0000.json").exists());
        assert!(dir.path().join("chunks/0001.json").exists());
    }

    #[test]
    fn test_corrupted_chunk_file_detected() {
        let dir = tempfile::tempdir().unwrap();
        let build = sample_build();
        write_run_dir(dir.path(), &build).unwrap();

        let victim = dir.path().join("chunks/0001.json");
        let mut bytes = fs::read(&victim).unwrap();
        bytes[0] ^= 1;
        fs::write(&victim, bytes).unwrap();

        assert!(matches!(
            read_run_dir(dir.path()),
            Err(ManifestError::ChunkHashMismatch { index: 1 })
        ));
    }

    #[test]
    fn test_missing_chunk_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let build = sample_build();
        write_run_dir(dir.path(), &build).unwrap();
        fs::remove_file(dir.path().join("chunks/0002.json")).unwrap();
        assert!(matches!(read_run_dir(dir.path()), Err(ManifestError::Io(_))));
    }
}
