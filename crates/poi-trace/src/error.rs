//! Error types for trace construction and verification

use poi_enc::EncodingError;
use thiserror::Error;
use uuid::Uuid;

use crate::sign::SignatureError;

/// Errors that can occur while building or finalizing a trace.
///
/// Invariant errors indicate a producer bug; the failed operation leaves the
/// run unchanged.
#[derive(Error, Debug)]
pub enum TraceError {
    /// Referenced span does not exist in this run
    #[error("Span not found: {0}")]
    SpanNotFound(Uuid),

    /// Referenced event does not exist in this run
    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    /// Span is already closed and cannot accept events or children
    #[error("Span already closed: {0}")]
    SpanClosed(Uuid),

    /// The run is finalized and frozen; no further mutations
    #[error("Run is finalized and cannot be modified")]
    RunFinalized,

    /// Event sequence numbers are not dense
    #[error("Sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    /// A hash required for a commitment was never computed
    #[error("Missing hash: {0}")]
    MissingHash(String),

    /// The configured event cap was reached
    #[error("Event cap reached: {limit} events retained")]
    Backpressure { limit: usize },

    /// Signing or signature verification failed
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    /// Canonical encoding failed
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// Result type for trace operations
pub type TraceResult<T> = Result<T, TraceError>;
