//! Deterministic fingerprint of the entire monitor pipeline configuration.
//!
//! The hash covers monitor identities and versions, the code identity of the
//! pipeline build, prompt/threshold/weight digests and the runtime identity.
//! Any change to any field changes the hash, so a safety report can be tied
//! to exactly one pipeline configuration.

use std::collections::BTreeMap;

use poi_enc::{sha256_hex, to_canonical_string, HexHash};
use serde::{Deserialize, Serialize};

use crate::SafetyResult;

/// Identity of the code that ran the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeIdentity {
    pub git_commit_hash: String,
    pub build_artifact_digest: String,
}

/// Full provenance record for a monitor pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorProvenance {
    pub monitor_ids: Vec<String>,
    pub monitor_versions: BTreeMap<String, String>,
    pub code_identity: CodeIdentity,
    pub prompt_templates_hash: String,
    pub thresholds_hash: String,
    pub scoring_weights_hash: String,
    pub threshold_policy_id: String,
    pub runtime_identity: String,
}

/// `SHA256Hex(canonical(provenance))`
pub fn monitor_config_hash(provenance: &MonitorProvenance) -> SafetyResult<HexHash> {
    Ok(sha256_hex(&to_canonical_string(provenance)?))
}
