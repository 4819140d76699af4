use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::ChatProvider;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_DEGRADED_THRESHOLD: u32 = 3;

/// Per-provider availability state, updated by the polling loop and by
/// success reports from the fallback chain.
#[derive(Debug, Clone, Default)]
pub struct ProviderHealth {
    pub available: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub degraded: bool,
}

/// Rolled-up status for one capability or for the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

type DegradedCallback = Box<dyn Fn(&str) + Send + Sync>;

struct Registered {
    capability: String,
    provider: Arc<dyn ChatProvider>,
}

/// Periodic availability probing over registered providers. The monitor
/// owns its health map; the fallback chain only reports successes into it.
pub struct HealthMonitor {
    providers: Mutex<Vec<Registered>>,
    state: Mutex<HashMap<String, ProviderHealth>>,
    interval: Duration,
    degraded_threshold: u32,
    on_degraded: Option<DegradedCallback>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(Vec::new()),
            state: Mutex::new(HashMap::new()),
            interval: DEFAULT_POLL_INTERVAL,
            degraded_threshold: DEFAULT_DEGRADED_THRESHOLD,
            on_degraded: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_degraded_threshold(mut self, threshold: u32) -> Self {
        self.degraded_threshold = threshold;
        self
    }

    /// One-shot notification fired when a provider crosses into degraded.
    pub fn with_on_degraded(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_degraded = Some(Box::new(callback));
        self
    }

    pub fn register(&self, capability: impl Into<String>, provider: Arc<dyn ChatProvider>) {
        let capability = capability.into();
        self.state
            .lock()
            .expect("health state lock")
            .entry(provider.name().to_string())
            .or_default();
        self.providers
            .lock()
            .expect("health providers lock")
            .push(Registered {
                capability,
                provider,
            });
    }

    /// Run one probe pass over every registered provider.
    pub async fn probe_all(&self) {
        let targets: Vec<(String, Arc<dyn ChatProvider>)> = self
            .providers
            .lock()
            .expect("health providers lock")
            .iter()
            .map(|r| (r.provider.name().to_string(), Arc::clone(&r.provider)))
            .collect();

        for (name, provider) in targets {
            let started = Instant::now();
            let available = provider.is_available().await;
            let latency_ms = started.elapsed().as_millis() as u64;
            self.apply_probe(&name, available, latency_ms);
        }
    }

    fn apply_probe(&self, name: &str, available: bool, latency_ms: u64) {
        let mut crossed_degraded = false;
        {
            let mut state = self.state.lock().expect("health state lock");
            let health = state.entry(name.to_string()).or_default();
            health.available = available;
            health.last_check = Some(Utc::now());
            health.last_latency_ms = Some(latency_ms);
            if available {
                health.consecutive_failures = 0;
                health.degraded = false;
            } else {
                health.consecutive_failures += 1;
                if health.consecutive_failures >= self.degraded_threshold && !health.degraded {
                    health.degraded = true;
                    crossed_degraded = true;
                }
            }
        }
        debug!(provider = name, available, latency_ms, "health probe");
        if crossed_degraded {
            warn!(provider = name, "provider degraded");
            if let Some(ref callback) = self.on_degraded {
                callback(name);
            }
        }
    }

    /// A successful call is the strongest availability signal there is:
    /// reset the failure counter so one good request undoes a degraded
    /// streak.
    pub fn record_success(&self, name: &str) {
        let mut state = self.state.lock().expect("health state lock");
        let health = state.entry(name.to_string()).or_default();
        health.available = true;
        health.consecutive_failures = 0;
        health.degraded = false;
    }

    pub fn provider_health(&self, name: &str) -> Option<ProviderHealth> {
        self.state
            .lock()
            .expect("health state lock")
            .get(name)
            .cloned()
    }

    /// `Down` when no provider of the capability is available, `Degraded`
    /// when any is degraded, otherwise `Healthy`.
    pub fn capability_status(&self, capability: &str) -> HealthStatus {
        let names: Vec<String> = self
            .providers
            .lock()
            .expect("health providers lock")
            .iter()
            .filter(|r| r.capability == capability)
            .map(|r| r.provider.name().to_string())
            .collect();
        if names.is_empty() {
            return HealthStatus::Down;
        }
        let state = self.state.lock().expect("health state lock");
        let healths: Vec<&ProviderHealth> =
            names.iter().filter_map(|n| state.get(n.as_str())).collect();
        if !healths.iter().any(|h| h.available) {
            HealthStatus::Down
        } else if healths.iter().any(|h| h.degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// `Down` if any capability is down, `Degraded` if any is degraded,
    /// otherwise `Healthy`.
    pub fn overall_status(&self) -> HealthStatus {
        let capabilities: Vec<String> = {
            let providers = self.providers.lock().expect("health providers lock");
            let mut caps: Vec<String> = providers.iter().map(|r| r.capability.clone()).collect();
            caps.sort();
            caps.dedup();
            caps
        };
        let mut overall = HealthStatus::Healthy;
        for capability in &capabilities {
            match self.capability_status(capability) {
                HealthStatus::Down => return HealthStatus::Down,
                HealthStatus::Degraded => overall = HealthStatus::Degraded,
                HealthStatus::Healthy => {}
            }
        }
        overall
    }

    /// Spawn the polling loop. Stops when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "health monitor started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("health monitor stopped");
                        return;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        self.probe_all().await;
                    }
                }
            }
        })
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn provider(name: &str, available: bool) -> Arc<dyn ChatProvider> {
        Arc::new(MockProvider::new(name, vec![]).with_available(available))
    }

    #[tokio::test]
    async fn probe_updates_state() {
        let monitor = HealthMonitor::new();
        monitor.register("chat", provider("a", true));
        monitor.probe_all().await;
        let health = monitor.provider_health("a").unwrap();
        assert!(health.available);
        assert!(health.last_check.is_some());
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn degraded_after_threshold_fires_callback_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let monitor = HealthMonitor::new()
            .with_degraded_threshold(3)
            .with_on_degraded(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });
        monitor.register("chat", provider("a", false));

        for _ in 0..5 {
            monitor.probe_all().await;
        }
        let health = monitor.provider_health("a").unwrap();
        assert!(health.degraded);
        assert_eq!(health.consecutive_failures, 5);
        assert_eq!(fired.load(Ordering::SeqCst), 1, "one-shot on transition");
    }

    #[tokio::test]
    async fn capability_rollup() {
        let monitor = HealthMonitor::new().with_degraded_threshold(1);
        monitor.register("chat", provider("up", true));
        monitor.register("chat", provider("down", false));
        monitor.register("embed", provider("embed-down", false));
        monitor.probe_all().await;

        assert_eq!(monitor.capability_status("chat"), HealthStatus::Degraded);
        assert_eq!(monitor.capability_status("embed"), HealthStatus::Down);
        assert_eq!(monitor.overall_status(), HealthStatus::Down);
    }

    #[tokio::test]
    async fn healthy_when_all_up() {
        let monitor = HealthMonitor::new();
        monitor.register("chat", provider("a", true));
        monitor.register("chat", provider("b", true));
        monitor.probe_all().await;
        assert_eq!(monitor.capability_status("chat"), HealthStatus::Healthy);
        assert_eq!(monitor.overall_status(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn success_report_clears_failure_streak() {
        let monitor = HealthMonitor::new().with_degraded_threshold(2);
        monitor.register("chat", provider("a", false));
        monitor.probe_all().await;
        monitor.probe_all().await;
        assert!(monitor.provider_health("a").unwrap().degraded);

        monitor.record_success("a");
        let health = monitor.provider_health("a").unwrap();
        assert!(!health.degraded);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.available);
    }

    #[tokio::test]
    async fn unknown_capability_is_down() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.capability_status("chat"), HealthStatus::Down);
    }
}
