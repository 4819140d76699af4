use sha2::{Digest, Sha256};

use super::detector::PiiDetection;

/// How detected values are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionMode {
    /// Replace with `[TYPE_REDACTED]`.
    Redact,
    /// Replace with a salted hash reference, stable for a fixed salt.
    Hash,
    /// Delete the value outright.
    Remove,
}

/// Applies a redaction mode to detections. Detections are processed in
/// descending start position so earlier offsets stay valid while the
/// string shrinks or grows.
pub struct Redactor {
    mode: RedactionMode,
    salt: String,
}

impl Redactor {
    pub fn new(mode: RedactionMode, salt: impl Into<String>) -> Self {
        Self {
            mode,
            salt: salt.into(),
        }
    }

    pub fn mode(&self) -> RedactionMode {
        self.mode
    }

    pub fn apply(&self, text: &str, detections: &[PiiDetection]) -> String {
        if detections.is_empty() {
            return text.to_string();
        }

        let mut sorted: Vec<&PiiDetection> = detections.iter().collect();
        sorted.sort_by(|a, b| b.start.cmp(&a.start));

        let mut output = text.to_string();
        for detection in sorted {
            if detection.end > output.len() {
                continue;
            }
            let replacement = match self.mode {
                RedactionMode::Redact => detection.kind.placeholder(),
                RedactionMode::Hash => format!("[HASH:{}]", self.hash(&detection.value)),
                RedactionMode::Remove => String::new(),
            };
            output.replace_range(detection.start..detection.end, &replacement);
        }
        output
    }

    fn hash(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::detector::{PiiDetector, PiiKind};

    fn detect(text: &str) -> Vec<PiiDetection> {
        PiiDetector::new().detect(text)
    }

    #[test]
    fn empty_detections_leave_text_unchanged() {
        let redactor = Redactor::new(RedactionMode::Redact, "salt");
        let text = "nothing sensitive here";
        assert_eq!(redactor.apply(text, &[]), text);
    }

    #[test]
    fn redact_mode_inserts_typed_placeholder() {
        let text = "my ssn is 123-45-6789";
        let detections = detect(text);
        let redactor = Redactor::new(RedactionMode::Redact, "salt");
        assert_eq!(redactor.apply(text, &detections), "my ssn is [SSN_REDACTED]");
    }

    #[test]
    fn remove_mode_deletes_value() {
        let text = "my ssn is 123-45-6789!";
        let detections = detect(text);
        let redactor = Redactor::new(RedactionMode::Remove, "salt");
        assert_eq!(redactor.apply(text, &detections), "my ssn is !");
    }

    #[test]
    fn hash_mode_is_deterministic_for_fixed_salt() {
        let text = "ssn 123-45-6789 and again 123-45-6789";
        let detections = detect(text);
        assert_eq!(detections.len(), 2);
        let redactor = Redactor::new(RedactionMode::Hash, "pepper");
        let out = redactor.apply(text, &detections);
        let first = out.find("[HASH:").unwrap();
        let token = &out[first..first + 15];
        assert_eq!(out.matches(token).count(), 2, "same value, same hash");

        let out_again = redactor.apply(text, &detections);
        assert_eq!(out, out_again);
    }

    #[test]
    fn different_salt_changes_hash() {
        let text = "ssn 123-45-6789";
        let detections = detect(text);
        let a = Redactor::new(RedactionMode::Hash, "a").apply(text, &detections);
        let b = Redactor::new(RedactionMode::Hash, "b").apply(text, &detections);
        assert_ne!(a, b);
    }

    #[test]
    fn multiple_detections_keep_offsets_valid() {
        let text = "email a@b.com then ssn 123-45-6789 end";
        let detections = detect(text);
        assert_eq!(detections.len(), 2);
        let redactor = Redactor::new(RedactionMode::Redact, "salt");
        let out = redactor.apply(text, &detections);
        assert_eq!(out, "email [EMAIL_REDACTED] then ssn [SSN_REDACTED] end");
    }

    #[test]
    fn placeholders_carry_kind_names() {
        assert_eq!(PiiKind::CreditCard.placeholder(), "[CREDIT_CARD_REDACTED]");
        assert_eq!(PiiKind::ApiKey.placeholder(), "[API_KEY_REDACTED]");
    }
}
