//! Alert dispatch.
//!
//! `dispatch()` is synchronous and never waits on the sink: it applies the
//! level gate, de-duplication and the per-minute cap, records the alert, and
//! queues it for the background worker. The worker delivers each alert in
//! its own task with exponential backoff; an alert that exhausts its retries
//! is logged and moved to the failure log, never surfaced to the caller.

mod backoff;
mod sink;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

pub use backoff::RetryPolicy;
pub use sink::{AlertSink, LogSink, WebhookSink};

use crate::config::AlertPolicy;
use crate::error::AlertError;
use crate::rate_limit::RateLimiter;
use crate::types::{Alert, AlertLevel};

/// Alerts, and failed deliveries, kept for inspection.
const HISTORY_CAPACITY: usize = 1_024;

/// What `dispatch()` did with an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    Disabled,
    BelowThreshold,
    Duplicate,
    RateLimited,
}

/// An alert dropped after exhausting its retries.
#[derive(Debug, Clone)]
pub struct FailedAlert {
    pub alert: Alert,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

enum Command {
    Deliver(Alert),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct Delivery {
    sink: Arc<dyn AlertSink>,
    retry: RwLock<RetryPolicy>,
    failures: Mutex<VecDeque<FailedAlert>>,
}

impl Delivery {
    async fn deliver_with_retry(&self, alert: Alert) {
        let retry = *self.retry.read().unwrap_or_else(PoisonError::into_inner);
        let mut last_error = String::new();

        for attempt in 0..retry.max_attempts() {
            if attempt > 0 {
                tokio::time::sleep(retry.delay_for(attempt - 1)).await;
            }
            match self.sink.deliver(&alert).await {
                Ok(()) => {
                    debug!(sink = self.sink.name(), level = %alert.level, attempt = attempt + 1, "alert delivered");
                    return;
                }
                Err(e) => {
                    warn!(sink = self.sink.name(), attempt = attempt + 1, error = %e, "alert delivery failed");
                    last_error = e.to_string();
                }
            }
        }

        error!(
            sink = self.sink.name(),
            level = %alert.level,
            attempts = retry.max_attempts(),
            error = %last_error,
            "dropping alert after retries: {}",
            alert.message
        );
        self.record_failure(FailedAlert {
            alert,
            attempts: retry.max_attempts(),
            last_error,
            failed_at: Utc::now(),
        });
    }

    /// Keep a dropped alert, evicting the oldest past capacity.
    fn record_failure(&self, failed: FailedAlert) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if failures.len() >= HISTORY_CAPACITY {
            failures.pop_front();
        }
        failures.push_back(failed);
    }
}

async fn run_worker(delivery: Arc<Delivery>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut inflight = JoinSet::new();
    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver(alert) => {
                let delivery = Arc::clone(&delivery);
                inflight.spawn(async move { delivery.deliver_with_retry(alert).await });
            }
            Command::Flush(done) => {
                while inflight.join_next().await.is_some() {}
                let _ = done.send(());
            }
            Command::Shutdown(done) => {
                while inflight.join_next().await.is_some() {}
                let _ = done.send(());
                info!("alert worker stopped");
                return;
            }
        }
        while inflight.try_join_next().is_some() {}
    }
    while inflight.join_next().await.is_some() {}
}

/// Level-gated, de-duplicated, rate-capped alert dispatcher.
pub struct AlertSystem {
    policy: RwLock<AlertPolicy>,
    recent: Mutex<HashMap<(AlertLevel, String), DateTime<Utc>>>,
    limiter: RateLimiter,
    history: Mutex<VecDeque<Alert>>,
    delivery: Arc<Delivery>,
    tx: mpsc::UnboundedSender<Command>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AlertSystem {
    /// Create a dispatcher; alerts queue until [`AlertSystem::start`] is called.
    pub fn new(policy: AlertPolicy, sink: Arc<dyn AlertSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            limiter: RateLimiter::per_minute(policy.max_per_minute),
            delivery: Arc::new(Delivery {
                sink,
                retry: RwLock::new(RetryPolicy::from_policy(&policy)),
                failures: Mutex::new(VecDeque::new()),
            }),
            policy: RwLock::new(policy),
            recent: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    /// The sink configured by `policy`: its webhook if set, else the log.
    pub fn sink_for(policy: &AlertPolicy) -> Result<Arc<dyn AlertSink>, AlertError> {
        match &policy.webhook_url {
            Some(url) => Ok(Arc::new(WebhookSink::new(
                url.clone(),
                std::time::Duration::from_secs(policy.timeout_secs),
            )?)),
            None => Ok(Arc::new(LogSink)),
        }
    }

    /// Spawn the delivery worker. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let handle = tokio::spawn(run_worker(Arc::clone(&self.delivery), rx));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!(sink = self.delivery.sink.name(), "alert worker started");
    }

    fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn apply_policy(&self, policy: AlertPolicy) {
        self.limiter.set_cap(policy.max_per_minute);
        *self
            .delivery
            .retry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = RetryPolicy::from_policy(&policy);
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Gate, de-duplicate, rate-cap and queue `alert`. Never blocks on delivery.
    pub fn dispatch(&self, alert: Alert) -> DispatchOutcome {
        let (enabled, min_level, window) = {
            let policy = self.policy.read().unwrap_or_else(PoisonError::into_inner);
            (
                policy.enabled,
                policy.min_level,
                Duration::seconds(policy.dedup_window_secs as i64),
            )
        };
        if !enabled {
            return DispatchOutcome::Disabled;
        }
        if alert.level < min_level {
            debug!(level = %alert.level, "alert below threshold");
            return DispatchOutcome::BelowThreshold;
        }

        let key = (alert.level, message_hash(&alert.message));
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            recent.retain(|_, seen| alert.created_at - *seen < window);
            if recent.contains_key(&key) {
                debug!(level = %alert.level, "duplicate alert suppressed");
                return DispatchOutcome::Duplicate;
            }
            if !self.limiter.try_acquire_at(alert.created_at) {
                warn!(level = %alert.level, "alert rate cap reached; dropping: {}", alert.message);
                return DispatchOutcome::RateLimited;
            }
            recent.insert(key, alert.created_at);
        }

        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }

        if self.tx.send(Command::Deliver(alert)).is_err() {
            warn!("alert worker gone; alert recorded but not delivered");
        }
        DispatchOutcome::Queued
    }

    /// Every alert accepted for delivery, oldest first.
    pub fn history(&self) -> Vec<Alert> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Alerts dropped after exhausting retries, oldest first.
    pub fn failures(&self) -> Vec<FailedAlert> {
        self.delivery
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Wait until every queued alert has been delivered or dropped.
    pub async fn flush(&self) {
        if !self.is_running() {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Drain queued alerts and stop the worker.
    pub async fn shutdown(&self) {
        if !self.is_running() {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done)).is_ok() {
            let _ = wait.await;
        }
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for AlertSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSystem")
            .field("sink", &self.delivery.sink.name())
            .field("running", &self.is_running())
            .finish()
    }
}

fn message_hash(message: &str) -> String {
    hex::encode(Sha256::digest(message.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` deliveries, then succeeds.
    struct CountingSink {
        calls: AtomicU32,
        failures: u32,
    }

    impl CountingSink {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures,
            })
        }
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn deliver(&self, _alert: &Alert) -> Result<(), AlertError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(AlertError::Delivery("connection refused".into()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn fast_policy() -> AlertPolicy {
        AlertPolicy {
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_level_gate() {
        let system = AlertSystem::new(
            AlertPolicy {
                min_level: AlertLevel::Warning,
                ..Default::default()
            },
            Arc::new(LogSink),
        );
        assert_eq!(
            system.dispatch(Alert::new(AlertLevel::Info, "medium risk")),
            DispatchOutcome::BelowThreshold
        );
        assert_eq!(
            system.dispatch(Alert::new(AlertLevel::Critical, "locked")),
            DispatchOutcome::Queued
        );
        assert_eq!(system.history().len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_within_window() {
        let system = AlertSystem::new(AlertPolicy::default(), Arc::new(LogSink));
        let first = Alert::new(AlertLevel::Warning, "audit log degraded");
        let mut again = first.clone();
        again.created_at = first.created_at + Duration::seconds(30);
        let mut later = first.clone();
        later.created_at = first.created_at + Duration::seconds(61);

        assert_eq!(system.dispatch(first.clone()), DispatchOutcome::Queued);
        assert_eq!(system.dispatch(again), DispatchOutcome::Duplicate);
        assert_eq!(
            system.dispatch(Alert::new(AlertLevel::Critical, "audit log degraded")),
            DispatchOutcome::Queued
        );
        assert_eq!(system.dispatch(later), DispatchOutcome::Queued);
    }

    #[tokio::test]
    async fn test_rate_cap() {
        let system = AlertSystem::new(
            AlertPolicy {
                max_per_minute: 2,
                ..Default::default()
            },
            Arc::new(LogSink),
        );
        assert_eq!(system.dispatch(Alert::new(AlertLevel::Info, "a")), DispatchOutcome::Queued);
        assert_eq!(system.dispatch(Alert::new(AlertLevel::Info, "b")), DispatchOutcome::Queued);
        assert_eq!(
            system.dispatch(Alert::new(AlertLevel::Info, "c")),
            DispatchOutcome::RateLimited
        );
    }

    #[tokio::test]
    async fn test_disabled() {
        let system = AlertSystem::new(
            AlertPolicy {
                enabled: false,
                ..Default::default()
            },
            Arc::new(LogSink),
        );
        assert_eq!(
            system.dispatch(Alert::new(AlertLevel::Critical, "x")),
            DispatchOutcome::Disabled
        );
        assert!(system.history().is_empty());
    }

    #[tokio::test]
    async fn test_retries_then_drops() {
        let sink = CountingSink::new(u32::MAX);
        let system = AlertSystem::new(fast_policy(), sink.clone());
        system.start();

        system.dispatch(Alert::new(AlertLevel::Critical, "engine locked"));
        system.flush().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
        let failures = system.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 4);
        assert!(failures[0].last_error.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_failure_log_is_bounded() {
        let system = AlertSystem::new(fast_policy(), Arc::new(LogSink));
        for i in 0..HISTORY_CAPACITY + 5 {
            system.delivery.record_failure(FailedAlert {
                alert: Alert::new(AlertLevel::Warning, format!("undeliverable {}", i)),
                attempts: 4,
                last_error: "connection refused".into(),
                failed_at: Utc::now(),
            });
        }

        let failures = system.failures();
        assert_eq!(failures.len(), HISTORY_CAPACITY);
        assert_eq!(failures[0].alert.message, "undeliverable 5");
        assert_eq!(
            failures[HISTORY_CAPACITY - 1].alert.message,
            format!("undeliverable {}", HISTORY_CAPACITY + 4)
        );
    }

    #[tokio::test]
    async fn test_recovers_within_retries() {
        let sink = CountingSink::new(2);
        let system = AlertSystem::new(fast_policy(), sink.clone());
        system.start();

        system.dispatch(Alert::new(AlertLevel::Warning, "flaky"));
        system.flush().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert!(system.failures().is_empty());
    }

    #[tokio::test]
    async fn test_queued_before_start_delivered_after() {
        let sink = CountingSink::new(0);
        let system = AlertSystem::new(fast_policy(), sink.clone());
        system.dispatch(Alert::new(AlertLevel::Warning, "policy fell back to defaults"));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);

        system.start();
        system.shutdown().await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sink_for_policy() {
        assert_eq!(AlertSystem::sink_for(&AlertPolicy::default()).unwrap().name(), "log");
        let policy = AlertPolicy {
            webhook_url: Some("https://hooks.example.com/warden".into()),
            ..Default::default()
        };
        assert_eq!(AlertSystem::sink_for(&policy).unwrap().name(), "webhook");
    }
}
