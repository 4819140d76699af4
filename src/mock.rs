//! Scripted provider for tests and host harnesses. Each `chat` call pops
//! the next scripted turn; a turn is either a chunk sequence (streamed
//! back with an optional inter-chunk delay) or an error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};

use crate::error::ProviderError;
use crate::provider::{ChatProvider, ChatRequest};
use crate::stream::ChunkStream;
use crate::types::StreamChunk;

/// One scripted model turn.
pub enum MockTurn {
    /// Stream these chunks, in order.
    Chunks(Vec<StreamChunk>),
    /// Fail the `chat` call itself with this error.
    Error(ProviderError),
    /// Stream these chunks, then fail mid-stream.
    ChunksThenError(Vec<StreamChunk>, ProviderError),
    /// Never respond. For exercising attempt timeouts.
    Hang,
}

impl MockTurn {
    /// A plain text reply followed by a stop marker.
    pub fn text(text: &str) -> Self {
        MockTurn::Chunks(vec![
            StreamChunk::TextDelta { text: text.into() },
            StreamChunk::MessageStop,
        ])
    }

    /// A single complete tool call (arguments as a JSON string) and stop.
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        MockTurn::Chunks(vec![
            StreamChunk::ToolUseStart {
                id: id.into(),
                name: name.into(),
            },
            StreamChunk::ToolUseDelta {
                id: id.into(),
                partial: arguments.into(),
            },
            StreamChunk::ToolUseEnd { id: id.into() },
            StreamChunk::MessageStop,
        ])
    }
}

pub struct MockProvider {
    name: String,
    model: String,
    turns: Mutex<VecDeque<MockTurn>>,
    available: bool,
    local: bool,
    chunk_delay: Option<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, turns: Vec<MockTurn>) -> Self {
        Self {
            name: name.into(),
            model: "mock-model".into(),
            turns: Mutex::new(turns.into()),
            available: true,
            local: false,
            chunk_delay: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sleep between chunks so tests can interleave cancellation.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Number of times `chat` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request, as the provider saw it (post-gating).
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().expect("mock request lock").clone()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_local(&self) -> bool {
        self.local
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().expect("mock request lock") = Some(request);
        let turn = self
            .turns
            .lock()
            .expect("mock turns lock")
            .pop_front()
            .unwrap_or(MockTurn::Error(ProviderError::Transport(
                "no more scripted turns".into(),
            )));
        let delay = self.chunk_delay;
        let items: Vec<Result<StreamChunk, ProviderError>> = match turn {
            MockTurn::Error(e) => return Err(e),
            MockTurn::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(ProviderError::Transport("hung".into()));
            }
            MockTurn::Chunks(chunks) => chunks.into_iter().map(Ok).collect(),
            MockTurn::ChunksThenError(chunks, error) => {
                let mut items: Vec<Result<StreamChunk, ProviderError>> =
                    chunks.into_iter().map(Ok).collect();
                items.push(Err(error));
                items
            }
        };
        let stream = stream::iter(items).then(move |item| async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            item
        });
        Ok(Box::pin(stream) as ChunkStream)
    }
}
