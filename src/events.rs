use serde_json::Value;

use crate::types::TokenUsage;

/// Events emitted during a run, in strict issue order, for UI streaming.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Thinking {
        message: String,
    },
    Text {
        content: String,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        tool_use_id: String,
        name: String,
        output: String,
        is_error: bool,
        duration_ms: u64,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    Done(RunOutcome),
}

/// Terminal payload of a run. Exactly one `Done` is emitted per run.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub final_text: String,
    pub iterations: usize,
    pub aborted: bool,
    pub errored: bool,
    pub max_iterations_reached: bool,
    pub usage: TokenUsage,
}

impl RunOutcome {
    pub fn completed(final_text: String, iterations: usize, usage: TokenUsage) -> Self {
        Self {
            final_text,
            iterations,
            usage,
            ..Self::default()
        }
    }

    pub fn aborted(iterations: usize, usage: TokenUsage) -> Self {
        Self {
            iterations,
            usage,
            aborted: true,
            ..Self::default()
        }
    }

    pub fn errored(iterations: usize, usage: TokenUsage) -> Self {
        Self {
            iterations,
            usage,
            errored: true,
            ..Self::default()
        }
    }

    pub fn max_iterations(iterations: usize, usage: TokenUsage) -> Self {
        Self {
            iterations,
            usage,
            max_iterations_reached: true,
            ..Self::default()
        }
    }
}
