use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AgentError;

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct SubagentConfig {
    pub max_concurrent: usize,
    pub watchdog: Duration,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            watchdog: DEFAULT_WATCHDOG,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubagentStatus {
    Active,
    Archived {
        reason: String,
        result: Option<Value>,
        error: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct SubagentRecord {
    pub id: String,
    pub task: String,
    pub parent_session: String,
    pub status: SubagentStatus,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl SubagentRecord {
    pub fn is_active(&self) -> bool {
        self.status == SubagentStatus::Active
    }
}

struct Inner {
    records: HashMap<String, SubagentRecord>,
    cancels: HashMap<String, CancellationToken>,
}

/// Bounded spawning of short-lived child runs. Every child gets a
/// watchdog; on expiry it is cancelled and force-archived with reason
/// "timed out".
pub struct SubagentManager {
    config: SubagentConfig,
    inner: Arc<Mutex<Inner>>,
}

impl SubagentManager {
    pub fn new(config: SubagentConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                records: HashMap::new(),
                cancels: HashMap::new(),
            })),
        }
    }

    /// Spawn a child task. `run` receives a cancellation token it must
    /// honor; its output is archived as the child's result. Fails when
    /// the concurrency cap is reached.
    pub fn spawn<F, Fut>(
        &self,
        task: impl Into<String>,
        parent_session: impl Into<String>,
        run: F,
    ) -> Result<String, AgentError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let task = task.into();
        let cancel = CancellationToken::new();

        {
            let mut inner = self.inner.lock().expect("subagent lock");
            let active = inner.records.values().filter(|r| r.is_active()).count();
            if active >= self.config.max_concurrent {
                return Err(AgentError::Subagent(format!(
                    "concurrency cap reached ({})",
                    self.config.max_concurrent
                )));
            }
            inner.records.insert(
                id.clone(),
                SubagentRecord {
                    id: id.clone(),
                    task: task.clone(),
                    parent_session: parent_session.into(),
                    status: SubagentStatus::Active,
                    created_at: Utc::now(),
                    archived_at: None,
                },
            );
            inner.cancels.insert(id.clone(), cancel.clone());
        }

        info!(id = %id, task = %task, "subagent spawned");

        let watchdog = self.config.watchdog;
        let inner = Arc::clone(&self.inner);
        let child_id = id.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = run(cancel.clone()) => Some(result),
                _ = tokio::time::sleep(watchdog) => None,
            };

            let mut inner = inner.lock().expect("subagent lock");
            let Some(record) = inner.records.get_mut(&child_id) else {
                return;
            };
            // Explicit archival may have beaten the child to it.
            if !record.is_active() {
                return;
            }
            match outcome {
                Some(Ok(result)) => {
                    record.status = SubagentStatus::Archived {
                        reason: "completed".into(),
                        result: Some(result),
                        error: None,
                    };
                }
                Some(Err(message)) => {
                    record.status = SubagentStatus::Archived {
                        reason: "errored".into(),
                        result: None,
                        error: Some(message),
                    };
                }
                None => {
                    warn!(id = %child_id, "subagent watchdog expired");
                    cancel.cancel();
                    record.status = SubagentStatus::Archived {
                        reason: "timed out".into(),
                        result: None,
                        error: None,
                    };
                }
            }
            record.archived_at = Some(Utc::now());
            inner.cancels.remove(&child_id);
        });

        Ok(id)
    }

    /// Explicitly archive a child with a result payload. Cancels the task
    /// if it is still running.
    pub fn archive(&self, id: &str, result: Option<Value>) -> Result<(), AgentError> {
        self.finish(id, "archived", result, None)
    }

    /// Mark a child as failed.
    pub fn mark_error(&self, id: &str, message: impl Into<String>) -> Result<(), AgentError> {
        self.finish(id, "errored", None, Some(message.into()))
    }

    fn finish(
        &self,
        id: &str,
        reason: &str,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), AgentError> {
        let mut inner = self.inner.lock().expect("subagent lock");
        if let Some(cancel) = inner.cancels.remove(id) {
            cancel.cancel();
        }
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| AgentError::Subagent(format!("unknown subagent: {id}")))?;
        if record.is_active() {
            record.status = SubagentStatus::Archived {
                reason: reason.into(),
                result,
                error,
            };
            record.archived_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Archive every active child.
    pub fn shutdown(&self) {
        let ids: Vec<String> = {
            let inner = self.inner.lock().expect("subagent lock");
            inner
                .records
                .values()
                .filter(|r| r.is_active())
                .map(|r| r.id.clone())
                .collect()
        };
        for id in ids {
            let _ = self.finish(&id, "shutdown", None, None);
        }
        info!("subagent manager shut down");
    }

    /// Drop archived records older than `max_age`. Returns how many were
    /// removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let mut inner = self.inner.lock().expect("subagent lock");
        let before = inner.records.len();
        inner
            .records
            .retain(|_, r| r.is_active() || r.archived_at.is_none_or(|t| t >= cutoff));
        before - inner.records.len()
    }

    pub fn get(&self, id: &str) -> Option<SubagentRecord> {
        self.inner
            .lock()
            .expect("subagent lock")
            .records
            .get(id)
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .expect("subagent lock")
            .records
            .values()
            .filter(|r| r.is_active())
            .count()
    }
}

impl Default for SubagentManager {
    fn default() -> Self {
        Self::new(SubagentConfig::default())
    }
}
