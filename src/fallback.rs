use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::health::HealthMonitor;
use crate::privacy::{GateContext, PrivacyGate};
use crate::provider::{ChatProvider, ChatRequest};
use crate::stream::ChunkStream;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// A provider with its chain priority. Lower runs first.
pub struct ProviderEntry {
    pub provider: Arc<dyn ChatProvider>,
    pub priority: i32,
}

/// What happened on one provider attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Unavailable,
    Failed { status: Option<u16>, message: String },
    Succeeded,
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub provider: String,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
}

/// Why the chain stopped without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFailure {
    /// Every provider was tried and failed.
    Exhausted,
    /// 401/403: retrying elsewhere cannot help and may leak credentials.
    HardStop { status: u16 },
    /// A status outside the failover-eligible set.
    NotEligible { status: u16 },
}

impl std::fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainFailure::Exhausted => write!(f, "all providers exhausted"),
            ChainFailure::HardStop { status } => write!(f, "auth hard stop ({status})"),
            ChainFailure::NotEligible { status } => {
                write!(f, "non-failover status ({status})")
            }
        }
    }
}

/// Terminal chain error carrying the full attempt log and the last
/// provider error for classification by the caller.
#[derive(Debug, thiserror::Error)]
#[error("{failure} after {} attempt(s)", attempts.len())]
pub struct ChainError {
    pub failure: ChainFailure,
    pub attempts: Vec<Attempt>,
    pub last_error: Option<ProviderError>,
}

/// Successful chain execution: the stream plus which provider produced it.
pub struct ChainSuccess {
    pub stream: ChunkStream,
    pub provider: String,
    pub model: String,
    pub provider_is_local: bool,
    pub attempts: Vec<Attempt>,
}

impl std::fmt::Debug for ChainSuccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSuccess")
            .field("stream", &"<ChunkStream>")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("provider_is_local", &self.provider_is_local)
            .field("attempts", &self.attempts)
            .finish()
    }
}

type FailoverCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Priority-ordered provider execution with availability probes, a
/// per-attempt timeout race, and HTTP-status failover classification. The
/// privacy gate, when attached, runs per attempt so locality is judged
/// against the provider actually being tried.
pub struct FallbackChain {
    entries: Vec<ProviderEntry>,
    attempt_timeout: Duration,
    on_failover: Option<FailoverCallback>,
    gate: Option<Arc<PrivacyGate>>,
    health: Option<Arc<HealthMonitor>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            on_failover: None,
            gate: None,
            health: None,
        }
    }

    pub fn add(mut self, provider: Arc<dyn ChatProvider>, priority: i32) -> Self {
        self.entries.push(ProviderEntry { provider, priority });
        self.entries.sort_by_key(|e| e.priority);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Fired with (failed provider, next provider) before each failover.
    pub fn with_on_failover(mut self, callback: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_failover = Some(Box::new(callback));
        self
    }

    pub fn with_gate(mut self, gate: Arc<PrivacyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Successful calls reset this monitor's failure counters.
    pub fn with_health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn providers(&self) -> Vec<Arc<dyn ChatProvider>> {
        self.entries.iter().map(|e| Arc::clone(&e.provider)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Probe every provider in parallel without executing anything.
    pub async fn check_availability(&self) -> Vec<(String, bool)> {
        let probes = self.entries.iter().map(|e| {
            let provider = Arc::clone(&e.provider);
            async move { (provider.name().to_string(), provider.is_available().await) }
        });
        future::join_all(probes).await
    }

    pub async fn execute(&self, request: ChatRequest) -> Result<ChainSuccess, ChainError> {
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        for (idx, entry) in self.entries.iter().enumerate() {
            let provider = &entry.provider;
            let name = provider.name().to_string();
            let started = Instant::now();

            if !provider.is_available().await {
                warn!(provider = %name, "provider unavailable, skipping");
                attempts.push(Attempt {
                    provider: name,
                    duration_ms: started.elapsed().as_millis() as u64,
                    outcome: AttemptOutcome::Unavailable,
                });
                continue;
            }

            let prepared = self.prepare(&request, provider.as_ref()).await;
            let result = tokio::time::timeout(self.attempt_timeout, provider.chat(prepared)).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let error = match result {
                Ok(Ok(stream)) => {
                    attempts.push(Attempt {
                        provider: name.clone(),
                        duration_ms,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    if let Some(ref health) = self.health {
                        health.record_success(&name);
                    }
                    return Ok(ChainSuccess {
                        stream,
                        provider: name,
                        model: provider.model().to_string(),
                        provider_is_local: provider.is_local(),
                        attempts,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(self.attempt_timeout),
            };

            let status = error.status();
            attempts.push(Attempt {
                provider: name.clone(),
                duration_ms,
                outcome: AttemptOutcome::Failed {
                    status,
                    message: error.to_string(),
                },
            });
            warn!(provider = %name, ?status, error = %error, "provider attempt failed");

            match status {
                Some(status @ (401 | 403)) => {
                    return Err(ChainError {
                        failure: ChainFailure::HardStop { status },
                        attempts,
                        last_error: Some(error),
                    });
                }
                Some(status) if !failover_eligible(status) => {
                    return Err(ChainError {
                        failure: ChainFailure::NotEligible { status },
                        attempts,
                        last_error: Some(error),
                    });
                }
                // Eligible status, timeout, or an error with no status at
                // all: try the next provider.
                _ => {}
            }

            last_error = Some(error);
            if let Some(next) = self.entries.get(idx + 1) {
                info!(
                    from = %name,
                    to = %next.provider.name(),
                    "failing over to next provider"
                );
                if let Some(ref callback) = self.on_failover {
                    callback(&name, next.provider.name());
                }
            }
        }

        Err(ChainError {
            failure: ChainFailure::Exhausted,
            attempts,
            last_error,
        })
    }

    /// Run the privacy gate for this attempt's provider. Local providers
    /// pass through untouched inside the gate itself.
    async fn prepare(&self, request: &ChatRequest, provider: &dyn ChatProvider) -> ChatRequest {
        let Some(ref gate) = self.gate else {
            return request.clone();
        };
        let ctx = GateContext {
            provider: provider.name(),
            model: provider.model(),
            endpoint: "chat",
            provider_is_local: provider.is_local(),
            session_id: &request.session_id,
            channel: &request.channel,
            latency_ms: None,
        };
        let gated = gate.outbound(request.messages.clone(), &ctx).await;
        ChatRequest {
            messages: gated.messages,
            ..request.clone()
        }
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new()
    }
}

fn failover_eligible(status: u16) -> bool {
    matches!(status, 0 | 400 | 408 | 429) || (500..=599).contains(&status)
}
