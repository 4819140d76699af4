use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// One gated call, metadata only. Values never appear here; the record is
/// safe to ship to any log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub direction: Direction,
    pub pii_detected: usize,
    pub pii_redacted: bool,
    pub redacted_types: Vec<String>,
    pub estimated_tokens: u32,
    pub latency_ms: Option<u64>,
    pub session_id: String,
    pub channel: String,
    pub success: bool,
}

impl AuditEntry {
    /// Fresh entry with a generated id and the current time.
    pub fn new(direction: Direction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            provider: String::new(),
            model: String::new(),
            endpoint: String::new(),
            direction,
            pii_detected: 0,
            pii_redacted: false,
            redacted_types: Vec::new(),
            estimated_tokens: 0,
            latency_ms: None,
            session_id: String::new(),
            channel: String::new(),
            success: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Filter for reading the log back. All fields are conjunctive.
#[derive(Debug, Default)]
pub struct AuditFilter {
    pub direction: Option<Direction>,
    pub provider: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Sort newest entries first.
    pub newest_first: bool,
}

/// Append-only JSONL audit trail on the host filesystem. The core never
/// mutates or deletes existing lines; each append is a single complete
/// line written in one call.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Returns the entry id.
    pub async fn append(&self, entry: &AuditEntry) -> Result<String, AuditError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(entry.id.clone())
    }

    /// Read every entry. A missing file is an empty log. Lines that fail
    /// to parse are skipped rather than poisoning the whole read.
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = self.read_all().await?;
        entries.retain(|e| {
            filter.direction.is_none_or(|d| e.direction == d)
                && filter.provider.as_deref().is_none_or(|p| e.provider == p)
                && filter
                    .session_id
                    .as_deref()
                    .is_none_or(|s| e.session_id == s)
                && filter.since.is_none_or(|t| e.timestamp >= t)
        });
        if filter.newest_first {
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        } else {
            entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        }
        Ok(entries)
    }

    /// `redacted_calls / calls_with_pii` scaled to 0–100, or 100 when no
    /// call ever carried PII.
    pub async fn privacy_score(&self) -> Result<f64, AuditError> {
        let entries = self.read_all().await?;
        let with_pii = entries.iter().filter(|e| e.pii_detected > 0).count();
        if with_pii == 0 {
            return Ok(100.0);
        }
        let redacted = entries
            .iter()
            .filter(|e| e.pii_detected > 0 && e.pii_redacted)
            .count();
        Ok(redacted as f64 / with_pii as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(direction: Direction, provider: &str, pii: usize, redacted: bool) -> AuditEntry {
        AuditEntry {
            provider: provider.into(),
            model: "m1".into(),
            endpoint: "chat".into(),
            pii_detected: pii,
            pii_redacted: redacted,
            session_id: "s1".into(),
            channel: "cli".into(),
            ..AuditEntry::new(direction)
        }
    }

    #[tokio::test]
    async fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));

        let written = entry(Direction::Outbound, "remote", 2, true);
        let id = log.append(&written).await.unwrap();
        assert_eq!(id, written.id);

        let entries = log.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, written.id);
        assert_eq!(entries[0].pii_detected, 2);
        assert!(entries[0].pii_redacted);
    }

    #[tokio::test]
    async fn each_entry_is_one_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&path);

        for i in 0..3 {
            log.append(&entry(Direction::Outbound, &format!("p{i}"), 0, false))
                .await
                .unwrap();
        }
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            serde_json::from_str::<AuditEntry>(line).unwrap();
        }
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("never-written.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
        assert_eq!(log.privacy_score().await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn query_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));

        log.append(&entry(Direction::Outbound, "a", 0, false))
            .await
            .unwrap();
        log.append(&entry(Direction::Inbound, "a", 0, false))
            .await
            .unwrap();
        log.append(&entry(Direction::Outbound, "b", 1, true))
            .await
            .unwrap();

        let outbound = log
            .query(&AuditFilter {
                direction: Some(Direction::Outbound),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(outbound.len(), 2);

        let only_b = log
            .query(&AuditFilter {
                provider: Some("b".into()),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].provider, "b");

        let newest = log
            .query(&AuditFilter {
                newest_first: true,
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert!(newest[0].timestamp >= newest[2].timestamp);
    }

    #[tokio::test]
    async fn privacy_score_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));

        log.append(&entry(Direction::Outbound, "a", 1, true))
            .await
            .unwrap();
        log.append(&entry(Direction::Outbound, "a", 3, false))
            .await
            .unwrap();
        log.append(&entry(Direction::Outbound, "a", 0, false))
            .await
            .unwrap();

        let score = log.privacy_score().await.unwrap();
        assert!((score - 50.0).abs() < f64::EPSILON);
    }
}
