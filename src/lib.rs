pub mod compact;
pub mod context;
pub mod error;
pub mod events;
pub mod fallback;
pub mod health;
pub mod memory;
pub mod mock;
pub mod privacy;
pub mod provider;
pub mod session;
pub mod stream;
pub mod subagent;
pub mod tools;
pub mod types;

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use context::{assemble, estimate_message, estimate_messages, estimate_str, Assembly, AssemblyInput};
pub use error::{AgentError, MemoryError, ProviderError};
pub use events::{AgentEvent, RunOutcome};
pub use fallback::{Attempt, AttemptOutcome, ChainError, ChainFailure, ChainSuccess, FallbackChain};
pub use health::{HealthMonitor, HealthStatus, ProviderHealth};
pub use memory::{MemoryRecall, NoMemory};
pub use privacy::{PrivacyConfig, PrivacyGate, RedactionMode};
pub use provider::{ChatProvider, ChatRequest, HttpChatProvider};
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
pub use stream::{ChunkStream, StreamOutput, StreamProcessor};
pub use subagent::{SubagentConfig, SubagentManager, SubagentRecord, SubagentStatus};
pub use tools::{ToolDefinition, ToolHandler, ToolLifecycle, ToolRegistry};
pub use types::{
    Message, Role, Session, StreamChunk, TokenUsage, ToolResult, ToolResultBlock, ToolUse,
};

use crate::privacy::GateContext;
use crate::stream::StreamOutput as Output;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub max_iterations: usize,
    /// Token budget for the assembled model input.
    pub max_context_tokens: u32,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Cap applied to tool-role message contents in the cap_tools overflow
    /// mode. Measured in characters, not tokens.
    pub tool_result_char_cap: usize,
    pub memory_recall_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".into(),
            max_iterations: 25,
            max_context_tokens: 100_000,
            max_output_tokens: 4096,
            temperature: 0.7,
            tool_result_char_cap: 4_000,
            memory_recall_limit: 10,
        }
    }
}

/// One user turn to process.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub message: String,
    pub session_id: String,
    pub channel: String,
}

/// Escalation state for recovering from context-length errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverflowMode {
    None,
    CapTools,
    Compact,
}

/// The agent. Wire up a provider chain, tools, and go. Every run yields
/// an ordered stream of [`AgentEvent`]s; failures surface on that stream,
/// never as a raised error.
pub struct Agent {
    chain: FallbackChain,
    tools: ToolRegistry,
    gate: Option<Arc<PrivacyGate>>,
    sessions: Option<Arc<dyn SessionStore>>,
    memory: Option<Arc<dyn MemoryRecall>>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(chain: FallbackChain, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            chain,
            tools,
            gate: None,
            sessions: None,
            memory: None,
            config,
        }
    }

    /// Gate applied to inbound replies from remote providers. Attach the
    /// same gate to the chain for outbound coverage.
    pub fn with_gate(mut self, gate: Arc<PrivacyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryRecall>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Spawn a run as its own task and pull events from the returned
    /// channel. The channel is bounded; a slow consumer backpressures the
    /// loop rather than dropping events.
    pub fn run(
        self: Arc<Self>,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            self.run_streaming(request, cancel, tx).await;
        });
        rx
    }

    /// Drive one run, emitting events on `tx` in strict issue order.
    pub async fn run_streaming(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
        tx: mpsc::Sender<AgentEvent>,
    ) {
        let session_id = request.session_id.clone();
        let channel = request.channel.clone();

        emit(
            &tx,
            AgentEvent::Thinking {
                message: "processing request".into(),
            },
        )
        .await;

        // Load prior history and persist the incoming user turn.
        let mut messages = match self.sessions {
            Some(ref store) => match store.get(&session_id).await {
                Ok(Some(session)) => session.messages,
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!(error = %e, "session load failed, starting fresh");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let user_message = Message::user(&request.message, &session_id);
        if let Some(ref store) = self.sessions {
            if let Err(e) = store.append(&session_id, std::slice::from_ref(&user_message)).await {
                warn!(error = %e, "session append failed");
            }
        }
        messages.push(user_message);

        // Memory recall, at most once per run. Failure is recoverable.
        let memories = match self.memory {
            Some(ref memory) => match memory
                .recall(&request.message, self.config.memory_recall_limit)
                .await
            {
                Ok(memories) => memories,
                Err(e) => {
                    warn!(error = %e, "memory recall failed, continuing without");
                    emit(
                        &tx,
                        AgentEvent::Error {
                            message: e.to_string(),
                            recoverable: true,
                        },
                    )
                    .await;
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let tool_definitions = self.tools.definitions();
        let mut pending_tool_results: Vec<Message> = Vec::new();
        let mut overflow = OverflowMode::None;
        let mut usage = TokenUsage::default();
        let mut iteration = 0usize;

        loop {
            if iteration >= self.config.max_iterations {
                warn!(
                    max_iterations = self.config.max_iterations,
                    "run hit iteration bound"
                );
                emit(
                    &tx,
                    AgentEvent::Error {
                        message: format!(
                            "maximum iterations reached ({})",
                            self.config.max_iterations
                        ),
                        recoverable: false,
                    },
                )
                .await;
                emit(
                    &tx,
                    AgentEvent::Done(RunOutcome::max_iterations(iteration, usage)),
                )
                .await;
                return;
            }
            if cancel.is_cancelled() {
                abort(&tx, iteration, usage).await;
                return;
            }

            // Assemble this iteration's input, applying any overflow
            // recovery preprocessing to a working copy.
            let mut working: Vec<Message> = messages
                .iter()
                .chain(pending_tool_results.iter())
                .cloned()
                .collect();
            match overflow {
                OverflowMode::None => {}
                OverflowMode::CapTools => {
                    cap_tool_results(&mut working, self.config.tool_result_char_cap);
                }
                OverflowMode::Compact => {
                    let floor = (self.config.max_context_tokens as f64 * 0.6) as u32;
                    let compaction = compact::compact(&working, &session_id, floor);
                    if compaction.compacted {
                        info!(
                            lineage = compaction.parent_chain.len(),
                            "history compacted for overflow recovery"
                        );
                        working = compaction.messages;
                        if let Some(ref store) = self.sessions {
                            if let Err(e) = store.replace_messages(&session_id, &working).await {
                                warn!(error = %e, "session replace after compaction failed");
                            }
                        }
                    }
                }
            }

            let assembly = assemble(&AssemblyInput {
                system_prompt: &self.config.system_prompt,
                messages: &working,
                memories: &memories,
                tools: &tool_definitions,
                max_tokens: self.config.max_context_tokens,
                session_id: &session_id,
            });
            usage.prompt_tokens += assembly.token_estimate;

            emit(
                &tx,
                AgentEvent::Thinking {
                    message: "waiting for the model".into(),
                },
            )
            .await;

            let chat_request = ChatRequest {
                messages: assembly.messages,
                tools: tool_definitions.clone(),
                max_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
                session_id: session_id.clone(),
                channel: channel.clone(),
            };

            let chain_result = tokio::select! {
                _ = cancel.cancelled() => {
                    abort(&tx, iteration, usage).await;
                    return;
                }
                result = self.chain.execute(chat_request) => result,
            };

            let success = match chain_result {
                Ok(success) => success,
                Err(chain_error) => {
                    let is_overflow = chain_error
                        .last_error
                        .as_ref()
                        .is_some_and(ProviderError::is_context_overflow);
                    if is_overflow {
                        match overflow {
                            OverflowMode::None => {
                                info!("context overflow, retrying with capped tool results");
                                overflow = OverflowMode::CapTools;
                                iteration += 1;
                                continue;
                            }
                            OverflowMode::CapTools => {
                                info!("context overflow persists, retrying with compaction");
                                overflow = OverflowMode::Compact;
                                iteration += 1;
                                continue;
                            }
                            OverflowMode::Compact => {
                                emit(
                                    &tx,
                                    AgentEvent::Error {
                                        message: AgentError::OverflowExhausted.to_string(),
                                        recoverable: false,
                                    },
                                )
                                .await;
                                emit(
                                    &tx,
                                    AgentEvent::Done(RunOutcome::errored(iteration, usage)),
                                )
                                .await;
                                return;
                            }
                        }
                    }
                    emit(
                        &tx,
                        AgentEvent::Error {
                            message: chain_error.to_string(),
                            recoverable: false,
                        },
                    )
                    .await;
                    emit(&tx, AgentEvent::Done(RunOutcome::errored(iteration, usage))).await;
                    return;
                }
            };

            // Consume the stream: text deltas out as events, tool calls
            // collected for sequential execution. Cancellation is checked
            // at every chunk boundary.
            let mut processor = StreamProcessor::new();
            let mut assistant_text = String::new();
            let mut tool_uses: Vec<ToolUse> = Vec::new();
            let mut stream = success.stream;
            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => {
                        abort(&tx, iteration, usage).await;
                        return;
                    }
                    item = stream.next() => item,
                };
                let Some(item) = item else { break };
                match item {
                    Ok(chunk) => match processor.process(chunk) {
                        Some(Output::Text(delta)) => {
                            assistant_text.push_str(&delta);
                            emit(&tx, AgentEvent::Text { content: delta }).await;
                        }
                        Some(Output::ToolComplete(tool_use)) => tool_uses.push(tool_use),
                        Some(Output::Stop) => break,
                        None => {}
                    },
                    Err(e) => {
                        emit(
                            &tx,
                            AgentEvent::Error {
                                message: e.to_string(),
                                recoverable: false,
                            },
                        )
                        .await;
                        emit(&tx, AgentEvent::Done(RunOutcome::errored(iteration, usage))).await;
                        return;
                    }
                }
            }
            usage.completion_tokens += estimate_str(&assistant_text);

            // Inbound gate over the reply from a remote provider.
            let final_text = match self.gate {
                Some(ref gate) if !assistant_text.is_empty() => {
                    let ctx = GateContext {
                        provider: &success.provider,
                        model: &success.model,
                        endpoint: "chat",
                        provider_is_local: success.provider_is_local,
                        session_id: &session_id,
                        channel: &channel,
                        latency_ms: None,
                    };
                    gate.inbound(&assistant_text, &ctx).await.content
                }
                _ => assistant_text.clone(),
            };

            // Commit the assistant turn.
            let assistant_message = Message::assistant(final_text.clone(), &session_id)
                .with_tool_use(tool_uses.clone());
            if let Some(ref store) = self.sessions {
                if let Err(e) = store
                    .append(&session_id, std::slice::from_ref(&assistant_message))
                    .await
                {
                    warn!(error = %e, "session append failed");
                }
            }
            messages.push(assistant_message);

            if tool_uses.is_empty() {
                info!(iterations = iteration + 1, "run finished");
                emit(
                    &tx,
                    AgentEvent::Done(RunOutcome::completed(final_text, iteration + 1, usage)),
                )
                .await;
                return;
            }

            // Execute tools sequentially, in the order the model emitted
            // them, so results are deterministically ordered.
            let mut result_messages: Vec<Message> = Vec::new();
            for tool_use in &tool_uses {
                emit(
                    &tx,
                    AgentEvent::ToolUse {
                        id: tool_use.id.clone(),
                        name: tool_use.name.clone(),
                        arguments: tool_use.arguments.clone(),
                    },
                )
                .await;

                let result = self
                    .tools
                    .invoke(&tool_use.name, &tool_use.arguments, &cancel)
                    .await;
                let output = render_tool_output(&result);

                emit(
                    &tx,
                    AgentEvent::ToolResult {
                        tool_use_id: tool_use.id.clone(),
                        name: tool_use.name.clone(),
                        output: output.clone(),
                        is_error: result.is_error(),
                        duration_ms: result.duration_ms,
                    },
                )
                .await;

                result_messages.push(
                    Message::tool(output.clone(), &session_id).with_tool_result(ToolResultBlock {
                        tool_use_id: tool_use.id.clone(),
                        content: output,
                        is_error: result.is_error(),
                    }),
                );
            }

            if let Some(ref store) = self.sessions {
                if let Err(e) = store.append(&session_id, &result_messages).await {
                    warn!(error = %e, "session append failed");
                }
            }
            messages.extend(result_messages);
            pending_tool_results.clear();

            // This iteration produced an assistant turn, so the overflow
            // escalation starts over.
            overflow = OverflowMode::None;
            iteration += 1;
        }
    }
}

async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    let _ = tx.send(event).await;
}

async fn abort(tx: &mpsc::Sender<AgentEvent>, iteration: usize, usage: TokenUsage) {
    info!(iteration, "run cancelled");
    emit(
        tx,
        AgentEvent::Error {
            message: AgentError::Cancelled.to_string(),
            recoverable: false,
        },
    )
    .await;
    emit(tx, AgentEvent::Done(RunOutcome::aborted(iteration, usage))).await;
}

/// Serialize a tool result for the model: strings pass through, other
/// values render as JSON, errors are wrapped.
fn render_tool_output(result: &ToolResult) -> String {
    if let Some(ref error) = result.error {
        return format!("Error: {error}");
    }
    match result.result {
        Some(serde_json::Value::String(ref s)) => s.clone(),
        Some(ref value) => value.to_string(),
        None => String::new(),
    }
}

/// Replace oversized tool-role contents with a prefix and a truncation
/// marker. The cap is in characters.
fn cap_tool_results(messages: &mut [Message], cap: usize) {
    for message in messages.iter_mut().filter(|m| m.role == Role::Tool) {
        if message.content.chars().count() > cap {
            message.content = truncate_marked(&message.content, cap);
        }
        for block in &mut message.tool_result {
            if block.content.chars().count() > cap {
                block.content = truncate_marked(&block.content, cap);
            }
        }
    }
}

fn truncate_marked(content: &str, cap: usize) -> String {
    let prefix: String = content.chars().take(cap).collect();
    format!("{prefix}\n[truncated: tool result capped]")
}
