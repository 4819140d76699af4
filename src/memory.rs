use async_trait::async_trait;

use crate::error::MemoryError;

/// The long-term memory seam the core consumes. Recall is called at most
/// once per run, before the first iteration; a failure is reported as a
/// recoverable error event and the run continues without memories.
#[async_trait]
pub trait MemoryRecall: Send + Sync {
    /// Up to `limit` snippets relevant to `query`.
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<String>, MemoryError>;

    /// Persist a fact for later recall. Called at the host's discretion.
    async fn store(&self, content: &str, tags: &[String]) -> Result<(), MemoryError>;
}

/// No memory. Recall yields nothing, store is a no-op.
pub struct NoMemory;

#[async_trait]
impl MemoryRecall for NoMemory {
    async fn recall(&self, _query: &str, _limit: usize) -> Result<Vec<String>, MemoryError> {
        Ok(Vec::new())
    }

    async fn store(&self, _content: &str, _tags: &[String]) -> Result<(), MemoryError> {
        Ok(())
    }
}
