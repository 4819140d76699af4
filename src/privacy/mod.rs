pub mod audit;
pub mod detector;
pub mod redactor;

pub use audit::{AuditEntry, AuditError, AuditFilter, AuditLog, Direction};
pub use detector::{PiiDetection, PiiDetector, PiiKind};
pub use redactor::{RedactionMode, Redactor};

use tracing::{info, warn};

use crate::context::estimate_messages;
use crate::types::Message;

/// Gate configuration. `enabled` governs redaction only: a disabled gate
/// still detects and audits outbound PII so the trail shows what left the
/// device unredacted.
#[derive(Debug, Clone)]
pub struct PrivacyConfig {
    pub enabled: bool,
    pub mode: RedactionMode,
    pub min_confidence: f32,
    pub hash_salt: String,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: RedactionMode::Redact,
            min_confidence: 0.5,
            hash_salt: "haven".into(),
        }
    }
}

/// Call metadata the gate needs for bypass decisions and audit records.
#[derive(Debug, Clone)]
pub struct GateContext<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub endpoint: &'a str,
    pub provider_is_local: bool,
    pub session_id: &'a str,
    pub channel: &'a str,
    pub latency_ms: Option<u64>,
}

/// Outbound gate result.
#[derive(Debug)]
pub struct GatedRequest {
    pub messages: Vec<Message>,
    pub detections: Vec<PiiDetection>,
    pub was_redacted: bool,
    pub audit_id: Option<String>,
}

/// Inbound gate result over a single content string.
#[derive(Debug)]
pub struct GatedContent {
    pub content: String,
    pub detections: Vec<PiiDetection>,
    pub was_redacted: bool,
    pub audit_id: Option<String>,
}

/// Synchronous PII pipeline applied to every payload exchanged with a
/// non-local provider: detect, redact, audit. Local providers bypass the
/// gate entirely — no detection, no audit entry.
pub struct PrivacyGate {
    config: PrivacyConfig,
    detector: PiiDetector,
    redactor: Redactor,
    audit: Option<AuditLog>,
}

impl PrivacyGate {
    pub fn new(config: PrivacyConfig) -> Self {
        let detector = PiiDetector::new().with_min_confidence(config.min_confidence);
        let redactor = Redactor::new(config.mode, config.hash_salt.clone());
        Self {
            config,
            detector,
            redactor,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Swap in a detector with host-defined custom patterns.
    pub fn with_detector(mut self, detector: PiiDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Gate an outbound request. Every message content and tool-result
    /// block is scanned; detection offsets are relative to the scanned
    /// field.
    pub async fn outbound(&self, messages: Vec<Message>, ctx: &GateContext<'_>) -> GatedRequest {
        if ctx.provider_is_local {
            return GatedRequest {
                messages,
                detections: Vec::new(),
                was_redacted: false,
                audit_id: None,
            };
        }

        let estimated_tokens = estimate_messages(&messages);
        let mut all_detections: Vec<PiiDetection> = Vec::new();
        let mut processed = messages;

        for message in &mut processed {
            let detections = self.detector.detect(&message.content);
            if !detections.is_empty() && self.config.enabled {
                message.content = self.redactor.apply(&message.content, &detections);
            }
            all_detections.extend(detections);

            for block in &mut message.tool_result {
                let detections = self.detector.detect(&block.content);
                if !detections.is_empty() && self.config.enabled {
                    block.content = self.redactor.apply(&block.content, &detections);
                }
                all_detections.extend(detections);
            }
        }

        let was_redacted = self.config.enabled && !all_detections.is_empty();
        if was_redacted {
            info!(
                provider = ctx.provider,
                detections = all_detections.len(),
                "redacted outbound payload"
            );
        }

        let audit_id = self
            .write_audit(Direction::Outbound, &all_detections, was_redacted, estimated_tokens, ctx)
            .await;

        GatedRequest {
            messages: processed,
            detections: all_detections,
            was_redacted,
            audit_id,
        }
    }

    /// Gate a single inbound content string, symmetric with `outbound`.
    pub async fn inbound(&self, content: &str, ctx: &GateContext<'_>) -> GatedContent {
        if ctx.provider_is_local {
            return GatedContent {
                content: content.to_string(),
                detections: Vec::new(),
                was_redacted: false,
                audit_id: None,
            };
        }

        let detections = self.detector.detect(content);
        let was_redacted = self.config.enabled && !detections.is_empty();
        let processed = if was_redacted {
            self.redactor.apply(content, &detections)
        } else {
            content.to_string()
        };

        let estimated_tokens = crate::context::estimate_str(content);
        let audit_id = self
            .write_audit(Direction::Inbound, &detections, was_redacted, estimated_tokens, ctx)
            .await;

        GatedContent {
            content: processed,
            detections,
            was_redacted,
            audit_id,
        }
    }

    /// Audit-write failure never blocks the request.
    async fn write_audit(
        &self,
        direction: Direction,
        detections: &[PiiDetection],
        was_redacted: bool,
        estimated_tokens: u32,
        ctx: &GateContext<'_>,
    ) -> Option<String> {
        let audit = self.audit.as_ref()?;

        let mut types: Vec<String> = detections.iter().map(|d| d.kind.to_string()).collect();
        types.sort();
        types.dedup();

        let entry = AuditEntry {
            provider: ctx.provider.into(),
            model: ctx.model.into(),
            endpoint: ctx.endpoint.into(),
            pii_detected: detections.len(),
            pii_redacted: was_redacted,
            redacted_types: types,
            estimated_tokens,
            latency_ms: ctx.latency_ms,
            session_id: ctx.session_id.into(),
            channel: ctx.channel.into(),
            ..AuditEntry::new(direction)
        };

        match audit.append(&entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "audit append failed, continuing without audit id");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(local: bool) -> GateContext<'a> {
        GateContext {
            provider: "remote-gw",
            model: "m1",
            endpoint: "chat",
            provider_is_local: local,
            session_id: "s1",
            channel: "cli",
            latency_ms: None,
        }
    }

    fn gate_with_audit(dir: &tempfile::TempDir, config: PrivacyConfig) -> PrivacyGate {
        PrivacyGate::new(config).with_audit(AuditLog::new(dir.path().join("audit.jsonl")))
    }

    #[tokio::test]
    async fn outbound_redacts_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_audit(&dir, PrivacyConfig::default());

        let messages = vec![Message::user("my ssn is 123-45-6789", "s1")];
        let gated = gate.outbound(messages, &ctx(false)).await;

        assert!(gated.messages[0].content.contains("[SSN_REDACTED]"));
        assert!(!gated.messages[0].content.contains("123-45-6789"));
        assert_eq!(gated.detections.len(), 1);
        assert!(gated.was_redacted);
        let audit_id = gated.audit_id.expect("audit entry written");

        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        let entries = log.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, audit_id);
        assert_eq!(entries[0].direction, Direction::Outbound);
        assert_eq!(entries[0].pii_detected, 1);
        assert!(entries[0].pii_redacted);
        assert_eq!(entries[0].redacted_types, vec!["ssn".to_string()]);
        assert_eq!(entries[0].provider, "remote-gw");
    }

    #[tokio::test]
    async fn local_provider_bypasses_everything() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_audit(&dir, PrivacyConfig::default());

        let messages = vec![Message::user("my ssn is 123-45-6789", "s1")];
        let gated = gate.outbound(messages, &ctx(true)).await;

        assert!(gated.messages[0].content.contains("123-45-6789"));
        assert!(gated.detections.is_empty());
        assert!(!gated.was_redacted);
        assert!(gated.audit_id.is_none());

        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_gate_detects_but_does_not_redact() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_audit(
            &dir,
            PrivacyConfig {
                enabled: false,
                ..PrivacyConfig::default()
            },
        );

        let messages = vec![Message::user("my ssn is 123-45-6789", "s1")];
        let gated = gate.outbound(messages, &ctx(false)).await;

        assert!(gated.messages[0].content.contains("123-45-6789"));
        assert_eq!(gated.detections.len(), 1);
        assert!(!gated.was_redacted);

        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        let entries = log.read_all().await.unwrap();
        assert_eq!(entries[0].pii_detected, 1);
        assert!(!entries[0].pii_redacted);
    }

    #[tokio::test]
    async fn tool_result_blocks_are_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_audit(&dir, PrivacyConfig::default());

        let message = Message::tool("lookup result", "s1").with_tool_result(
            crate::types::ToolResultBlock {
                tool_use_id: "t1".into(),
                content: "customer email is buyer@example.com".into(),
                is_error: false,
            },
        );
        let gated = gate.outbound(vec![message], &ctx(false)).await;

        assert!(gated.messages[0].tool_result[0]
            .content
            .contains("[EMAIL_REDACTED]"));
        assert_eq!(gated.detections.len(), 1);
    }

    #[tokio::test]
    async fn inbound_is_symmetric() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_audit(&dir, PrivacyConfig::default());

        let gated = gate
            .inbound("the card on file is 4111 1111 1111 1111", &ctx(false))
            .await;
        assert!(gated.content.contains("[CREDIT_CARD_REDACTED]"));
        assert!(gated.was_redacted);

        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        let entries = log.read_all().await.unwrap();
        assert_eq!(entries[0].direction, Direction::Inbound);
    }

    #[tokio::test]
    async fn audit_failure_does_not_block() {
        // Point the log at a path whose parent is a file, so appends fail.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"x").await.unwrap();
        let gate = PrivacyGate::new(PrivacyConfig::default())
            .with_audit(AuditLog::new(blocker.join("audit.jsonl")));

        let messages = vec![Message::user("my ssn is 123-45-6789", "s1")];
        let gated = gate.outbound(messages, &ctx(false)).await;

        assert!(gated.was_redacted, "redaction still applied");
        assert!(gated.audit_id.is_none(), "audit id absent on failure");
    }

    #[tokio::test]
    async fn clean_payload_passes_through() {
        let gate = PrivacyGate::new(PrivacyConfig::default());
        let messages = vec![Message::user("what's the weather like?", "s1")];
        let gated = gate.outbound(messages, &ctx(false)).await;
        assert_eq!(gated.messages[0].content, "what's the weather like?");
        assert!(!gated.was_redacted);
        assert!(gated.detections.is_empty());
    }

    #[tokio::test]
    async fn hash_mode_outbound() {
        let gate = PrivacyGate::new(PrivacyConfig {
            mode: RedactionMode::Hash,
            ..PrivacyConfig::default()
        });
        let messages = vec![Message::user("ssn 123-45-6789", "s1")];
        let gated = gate.outbound(messages, &ctx(false)).await;
        assert!(gated.messages[0].content.contains("[HASH:"));
        assert!(!gated.messages[0].content.contains("123-45-6789"));
    }
}
