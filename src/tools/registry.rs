use std::time::Instant;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::handler::{ToolDef, ToolDefinition, ToolHandler};
use crate::types::ToolResult;

/// Lifecycle events published on the registry's bus for observability.
#[derive(Debug, Clone)]
pub enum ToolLifecycle {
    Complete {
        name: String,
        duration_ms: u64,
    },
    Error {
        name: String,
        message: String,
        duration_ms: u64,
    },
    NotFound {
        name: String,
    },
}

/// Catalog of available tools: named dispatch with a uniform result
/// envelope. `invoke` never returns an error — exceptional conditions are
/// encoded in [`ToolResult::error`].
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
    events: broadcast::Sender<ToolLifecycle>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            tools: Vec::new(),
            events,
        }
    }

    /// Register a tool.
    pub fn add(mut self, definition: ToolDefinition, handler: impl ToolHandler + 'static) -> Self {
        self.tools.push(ToolDef {
            definition,
            handler: Box::new(handler),
        });
        self
    }

    /// All tool definitions for the model request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ToolLifecycle> {
        self.events.subscribe()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition.name.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Execute a tool by name, measuring wall time and catching every
    /// failure into the envelope. The cancellation token is forwarded;
    /// tools unable to observe it simply run to completion.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let Some(tool) = self.tools.iter().find(|t| t.definition.name == name) else {
            warn!(tool = name, "unknown tool requested");
            let _ = self
                .events
                .send(ToolLifecycle::NotFound { name: name.into() });
            return ToolResult::err(name, format!("unknown tool: {name}"), 0);
        };

        let started = Instant::now();
        let outcome = tool.handler.call(arguments, cancel).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                debug!(tool = name, duration_ms, "tool completed");
                let _ = self.events.send(ToolLifecycle::Complete {
                    name: name.into(),
                    duration_ms,
                });
                ToolResult::ok(name, value, duration_ms)
            }
            Err(message) => {
                warn!(tool = name, duration_ms, error = %message, "tool failed");
                let _ = self.events.send(ToolLifecycle::Error {
                    name: name.into(),
                    message: message.clone(),
                    duration_ms,
                });
                ToolResult::err(name, message, duration_ms)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
