//! Tamper-evident process traces for agentic software.
//!
//! A producer records a run as an append-only, sequence-numbered event log
//! grouped into spans. Finalization chains every event hash into a single
//! rolling commitment, binds it to the ordered span hashes in a root hash,
//! builds a span-level Merkle tree for selective disclosure, and freezes the
//! run into a self-describing [`TraceBundle`] that any holder can re-verify
//! without trusting the producer.

pub mod builder;
pub mod bundle;
pub mod error;
pub mod hash;
pub mod model;
pub mod rolling;
pub mod sign;

pub use builder::{EventInput, SpanInput, TraceBuilder};
pub use bundle::{
    extract_public_view, sign_bundle, verify_bundle, verify_bundle_signature, AnnotatedSpan,
    PublicView, RedactedSpanRef, TraceBundle, VerificationChecks, VerificationResult,
    BUNDLE_FORMAT_VERSION,
};
pub use error::{TraceError, TraceResult};
pub use hash::{compute_event_hash, compute_span_hash};
pub use model::{
    EventKind, RunStatus, SpanStatus, TraceEvent, TraceRun, TraceSpan, Visibility, SCHEMA_VERSION,
};
pub use rolling::{
    compute_rolling_hash, compute_root_hash, verify_rolling_hash, RollingHashState,
};
pub use sign::{Ed25519SignatureProvider, SignatureError, SignatureProvider};
