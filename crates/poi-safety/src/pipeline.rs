//! Post-hoc pipeline execution.
//!
//! Each configured monitor gets its own span in the report trace: the
//! detector result is recorded as an observation event, followed by an
//! `alarm` custom event graded by how far the score sits past the
//! threshold. The report run's metadata names the base bundle's commitments
//! and the pipeline's configuration hash, chaining the report to the data it
//! judged.

use poi_enc::HexHash;
use poi_trace::{EventInput, EventKind, SpanInput, TraceBuilder, TraceBundle, Visibility};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::provenance::{monitor_config_hash, MonitorProvenance};
use crate::registry::MonitorRegistry;
use crate::{MonitorContext, MonitorResult, SafetyError, SafetyResult};

/// Severity grade attached to every alarm event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Grade a result: `critical` past 1.5x the threshold, `warning` past it
pub fn alert_level(result: &MonitorResult) -> AlertLevel {
    if result.score > 1.5 * result.threshold {
        AlertLevel::Critical
    } else if result.exceeded {
        AlertLevel::Warning
    } else {
        AlertLevel::Info
    }
}

/// Pipeline configuration: which monitors run, and under what provenance
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Monitors to run, in order
    pub monitor_ids: Vec<String>,
    pub provenance: MonitorProvenance,
}

/// The full output of one pipeline run
#[derive(Debug, Clone)]
pub struct SafetyReport {
    /// The report trace, finalized into its own verifiable bundle
    pub bundle: TraceBundle,
    pub results: Vec<MonitorResult>,
    pub config_hash: HexHash,
}

impl SafetyReport {
    /// True when any authoritative monitor exceeded its threshold
    pub fn has_actionable_detection(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.exceeded && r.trust_level == crate::TrustLevel::Authoritative)
    }
}

/// Post-hoc safety pipeline over finalized bundles
pub struct SafetyPipeline {
    registry: MonitorRegistry,
    config: PipelineConfig,
    config_hash: HexHash,
}

impl std::fmt::Debug for SafetyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyPipeline")
            .field("config", &self.config)
            .field("config_hash", &self.config_hash)
            .finish_non_exhaustive()
    }
}

impl SafetyPipeline {
    /// Validate the configuration against the registry and fingerprint it.
    ///
    /// An empty monitor list, an empty id, or an unregistered id is fatal
    /// here; `run` can then assume every configured monitor resolves.
    pub fn new(registry: MonitorRegistry, config: PipelineConfig) -> SafetyResult<Self> {
        if config.monitor_ids.is_empty() {
            return Err(SafetyError::EmptyMonitorList);
        }
        for id in &config.monitor_ids {
            if id.is_empty() {
                return Err(SafetyError::EmptyMonitorId);
            }
            if !registry.contains(id) {
                return Err(SafetyError::UnknownMonitor(id.clone()));
            }
        }
        let config_hash = monitor_config_hash(&config.provenance)?;
        info!(config_hash = %config_hash, monitors = config.monitor_ids.len(), "safety pipeline constructed");
        Ok(Self {
            registry,
            config,
            config_hash,
        })
    }

    /// Fingerprint of this pipeline's configuration
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Replay a finalized bundle through every configured monitor and emit
    /// the hash-linked report bundle.
    pub fn run(&mut self, base: &TraceBundle) -> SafetyResult<SafetyReport> {
        let run = &base.private_run;
        let metadata = Value::Null;
        let context = MonitorContext {
            base_trace: run,
            events: &run.events,
            spans: &run.spans,
            metadata: &metadata,
        };

        let mut builder = TraceBuilder::new(format!("safety-monitor:{}", run.agent_id))
            .with_metadata(json!({
                "baseRootHash": base.root_hash,
                "baseManifestHash": base.manifest_hash,
                "monitorConfigHash": self.config_hash,
            }));

        let monitor_ids = self.config.monitor_ids.clone();
        let mut results = Vec::with_capacity(monitor_ids.len());
        for id in &monitor_ids {
            let monitor = self
                .registry
                .get_mut(id)
                .ok_or_else(|| SafetyError::UnknownMonitor(id.clone()))?;

            let span_id = builder.add_span(SpanInput::new(id.clone()))?.id;
            let result = monitor.analyze(&context);

            builder.add_event(
                span_id,
                EventInput::new(
                    EventKind::Observation,
                    serde_json::to_value(&result)
                        .map_err(|e| poi_enc::EncodingError::SerializationFailed(e.to_string()))?,
                ),
            )?;

            let level = alert_level(&result);
            if level != AlertLevel::Info {
                warn!(monitor_id = %id, score = result.score, level = ?level, "monitor threshold exceeded");
            }
            builder.add_event(
                span_id,
                EventInput::new(
                    EventKind::Custom,
                    json!({
                        "alarm": {
                            "monitorId": id,
                            "alertLevel": level,
                            "score": result.score,
                            "threshold": result.threshold,
                            "exceeded": result.exceeded,
                        }
                    }),
                )
                .visibility(Visibility::Public),
            )?;

            builder.close_span(span_id, None)?;
            results.push(result);
        }

        let bundle = builder.finalize()?;
        info!(
            base_root_hash = %base.root_hash,
            report_root_hash = %bundle.root_hash,
            monitors = results.len(),
            exceeded = results.iter().filter(|r| r.exceeded).count(),
            "safety report emitted"
        );
        Ok(SafetyReport {
            bundle,
            results,
            config_hash: self.config_hash.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{monitor_result, Monitor, MonitorCategory, TrustLevel};
    use std::collections::BTreeMap;

    struct FixedScoreMonitor {
        id: String,
        score: f64,
        threshold: f64,
    }

    impl Monitor for FixedScoreMonitor {
        fn id(&self) -> &str {
            &self.id
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn category(&self) -> MonitorCategory {
            MonitorCategory::Action
        }
        fn trust_level(&self) -> TrustLevel {
            TrustLevel::Authoritative
        }
        fn threshold(&self) -> f64 {
            self.threshold
        }
        fn analyze(&mut self, _context: &MonitorContext<'_>) -> MonitorResult {
            monitor_result(self, self.score, json!({}))
        }
    }

    fn provenance(ids: &[&str]) -> MonitorProvenance {
        MonitorProvenance {
            monitor_ids: ids.iter().map(|s| s.to_string()).collect(),
            monitor_versions: ids
                .iter()
                .map(|s| (s.to_string(), "1.0.0".to_string()))
                .collect::<BTreeMap<_, _>>(),
            code_identity: crate::CodeIdentity {
                git_commit_hash: "abc1234".into(),
                build_artifact_digest: "digest".into(),
            },
            prompt_templates_hash: "p".into(),
            thresholds_hash: "t".into(),
            scoring_weights_hash: "w".into(),
            threshold_policy_id: "policy-a".into(),
            runtime_identity: "test".into(),
        }
    }

    fn base_bundle() -> TraceBundle {
        let mut builder = TraceBuilder::new("agent-under-test");
        let span = builder.add_span(SpanInput::new("work")).unwrap().id;
        builder
            .add_event(span, EventInput::new(EventKind::Command, json!({"cmd": "ls"})))
            .unwrap();
        builder.close_span(span, None).unwrap();
        builder.finalize().unwrap()
    }

    #[test]
    fn test_empty_monitor_list_is_fatal() {
        let registry = MonitorRegistry::new();
        let err = SafetyPipeline::new(
            registry,
            PipelineConfig {
                monitor_ids: vec![],
                provenance: provenance(&[]),
            },
        )
        .unwrap_err();
        assert!(matches!(err, SafetyError::EmptyMonitorList));
    }

    #[test]
    fn test_unknown_monitor_is_fatal() {
        let registry = MonitorRegistry::new();
        let err = SafetyPipeline::new(
            registry,
            PipelineConfig {
                monitor_ids: vec!["ghost".into()],
                provenance: provenance(&["ghost"]),
            },
        )
        .unwrap_err();
        assert!(matches!(err, SafetyError::UnknownMonitor(id) if id == "ghost"));
    }

    #[test]
    fn test_alert_levels() {
        let mut monitor = FixedScoreMonitor {
            id: "m".into(),
            score: 0.0,
            threshold: 0.4,
        };
        let bundle = base_bundle();
        let metadata = Value::Null;
        let context = MonitorContext {
            base_trace: &bundle.private_run,
            events: &bundle.private_run.events,
            spans: &bundle.private_run.spans,
            metadata: &metadata,
        };

        monitor.score = 0.2;
        assert_eq!(alert_level(&monitor.analyze(&context)), AlertLevel::Info);
        monitor.score = 0.5;
        assert_eq!(alert_level(&monitor.analyze(&context)), AlertLevel::Warning);
        monitor.score = 0.7;
        assert_eq!(alert_level(&monitor.analyze(&context)), AlertLevel::Critical);
    }

    #[test]
    fn test_report_spans_and_chaining() {
        let mut registry = MonitorRegistry::new();
        registry
            .register(Box::new(FixedScoreMonitor {
                id: "quiet".into(),
                score: 0.1,
                threshold: 0.5,
            }))
            .unwrap();
        registry
            .register(Box::new(FixedScoreMonitor {
                id: "loud".into(),
                score: 0.9,
                threshold: 0.5,
            }))
            .unwrap();

        let mut pipeline = SafetyPipeline::new(
            registry,
            PipelineConfig {
                monitor_ids: vec!["quiet".into(), "loud".into()],
                provenance: provenance(&["quiet", "loud"]),
            },
        )
        .unwrap();

        let base = base_bundle();
        let report = pipeline.run(&base).unwrap();

        // one span per monitor, each with a result and an alarm event
        assert_eq!(report.bundle.private_run.spans.len(), 2);
        assert_eq!(report.bundle.private_run.events.len(), 4);
        assert_eq!(report.results.len(), 2);
        assert!(report.has_actionable_detection());

        // the report chains to the base commitments
        let metadata = report.bundle.private_run.metadata.as_ref().unwrap();
        assert_eq!(
            metadata["baseRootHash"].as_str().unwrap(),
            base.root_hash.as_str()
        );
        assert_eq!(
            metadata["monitorConfigHash"].as_str().unwrap(),
            report.config_hash.as_str()
        );

        // and is itself a verifiable bundle
        assert!(poi_trace::verify_bundle(&report.bundle).valid);
    }
}
