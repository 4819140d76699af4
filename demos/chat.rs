//! Interactive chat REPL for the haven-agent core.
//!
//! Usage:
//!   cargo run --example chat -- --base-url http://localhost:8080 --model llama3.2 --local
//!   HAVEN_API_KEY=... cargo run --example chat -- --base-url https://gw.example.com --model m1 \
//!       --fallback-url http://localhost:8080 --audit-path ./audit.jsonl
//!
//! Ctrl-C or type "exit" / "quit" to leave.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use haven_agent::{
    privacy::AuditLog, Agent, AgentConfig, AgentEvent, ChatProvider, FallbackChain,
    HttpChatProvider, PrivacyConfig, PrivacyGate, ToolDefinition, ToolHandler, ToolRegistry,
};

#[derive(Parser)]
#[command(name = "chat", about = "Chat with a haven-agent")]
struct Cli {
    /// Primary provider endpoint
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,

    /// Model to request
    #[arg(long, default_value = "llama3.2")]
    model: String,

    /// Treat the primary provider as on-device (bypasses the privacy gate)
    #[arg(long)]
    local: bool,

    /// Optional fallback provider endpoint (tried when the primary fails)
    #[arg(long)]
    fallback_url: Option<String>,

    /// System prompt
    #[arg(long, short = 's')]
    system: Option<String>,

    /// Privacy audit trail path (JSONL)
    #[arg(long)]
    audit_path: Option<String>,

    /// Max loop iterations per message
    #[arg(long, default_value_t = 25)]
    max_iterations: usize,
}

struct ClockTool;

#[async_trait]
impl ToolHandler for ClockTool {
    async fn call(&self, _args: &Value, _cancel: &CancellationToken) -> Result<Value, String> {
        Ok(json!(chrono::Utc::now().to_rfc3339()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut primary = HttpChatProvider::new("primary", &cli.model, &cli.base_url)
        .with_local(cli.local);
    if let Ok(key) = std::env::var("HAVEN_API_KEY") {
        primary = primary.with_api_key(key);
    }

    let gate = Arc::new(match cli.audit_path {
        Some(ref path) => {
            PrivacyGate::new(PrivacyConfig::default()).with_audit(AuditLog::new(path))
        }
        None => PrivacyGate::new(PrivacyConfig::default()),
    });

    let mut chain = FallbackChain::new()
        .add(Arc::new(primary) as Arc<dyn ChatProvider>, 0)
        .with_gate(Arc::clone(&gate))
        .with_on_failover(|from, to| {
            eprintln!("\x1b[35m  [failover: {from} -> {to}]\x1b[0m");
        });
    if let Some(ref url) = cli.fallback_url {
        chain = chain.add(
            Arc::new(HttpChatProvider::new("fallback", &cli.model, url)) as Arc<dyn ChatProvider>,
            10,
        );
    }

    let tools = ToolRegistry::new().add(
        ToolDefinition::new(
            "clock/now",
            "Returns the current time in UTC",
            json!({"type": "object", "properties": {}}),
        ),
        ClockTool,
    );

    let mut config = AgentConfig {
        max_iterations: cli.max_iterations,
        ..AgentConfig::default()
    };
    if let Some(ref system) = cli.system {
        config.system_prompt = system.clone();
    }

    let agent = Arc::new(Agent::new(chain, tools, config).with_gate(gate));

    eprintln!("haven-agent chat");
    eprintln!("endpoint: {} ({})", cli.base_url, if cli.local { "local" } else { "remote" });
    eprintln!("model: {}", cli.model);
    eprintln!("---");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let session_id = format!("repl-{}", std::process::id());

    loop {
        eprint!("\x1b[1;36myou>\x1b[0m ");
        io::stderr().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "exit" | "quit" | "/q") {
            break;
        }

        let request = haven_agent::AgentRequest {
            message: trimmed.to_string(),
            session_id: session_id.clone(),
            channel: "repl".into(),
        };
        let mut rx = Arc::clone(&agent).run(request, CancellationToken::new());

        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Thinking { .. } => {}
                AgentEvent::Text { content } => {
                    print!("{content}");
                    io::stdout().flush().ok();
                }
                AgentEvent::ToolUse { name, arguments, .. } => {
                    eprintln!("\x1b[33m  [tool: {name}]\x1b[0m {arguments}");
                }
                AgentEvent::ToolResult {
                    name,
                    output,
                    is_error,
                    ..
                } => {
                    let tag = if is_error { "error" } else { "result" };
                    let shown: String = output.chars().take(200).collect();
                    eprintln!("\x1b[33m  [{tag}: {name}]\x1b[0m {shown}");
                }
                AgentEvent::Error { message, recoverable } => {
                    let tag = if recoverable { "warning" } else { "error" };
                    eprintln!("\x1b[31m  [{tag}] {message}\x1b[0m");
                }
                AgentEvent::Done(outcome) => {
                    println!();
                    if outcome.iterations > 1 {
                        eprintln!("\x1b[2m  ({} iterations)\x1b[0m", outcome.iterations);
                    }
                    eprintln!(
                        "\x1b[2m  [~{} prompt / ~{} completion tokens]\x1b[0m",
                        outcome.usage.prompt_tokens, outcome.usage.completion_tokens
                    );
                }
            }
        }
    }

    eprintln!("bye");
}
