//! Background audit writer.
//!
//! Entries are queued without blocking and appended in order by a single
//! task. When the log rejects a write, the entry stays in a bounded fallback
//! buffer and the whole backlog is retried ahead of the next entry. After
//! `max_write_failures` consecutive failures a `warning` alert reports that
//! audit integrity is degraded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AuditEntry, AuditLog};
use crate::alerts::AlertSystem;
use crate::config::AuditPolicy;
use crate::error::AuditLogError;
use crate::types::{Alert, AlertLevel};

/// Last-resort handler invoked when a lock-down cannot be recorded.
pub type FailSafe = Arc<dyn Fn(&str) + Send + Sync>;

/// Exit status used by [`halt_process`].
const HALT_EXIT_CODE: i32 = 70;

/// The default fail-safe: log and terminate the process.
pub fn halt_process() -> FailSafe {
    Arc::new(|reason: &str| {
        error!(reason, "lock-down could not be recorded; halting process");
        std::process::exit(HALT_EXIT_CODE);
    })
}

enum WriterCommand {
    Append(AuditEntry),
    AppendAcked(AuditEntry, oneshot::Sender<Result<(), AuditLogError>>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct WriterState {
    log: Arc<dyn AuditLog>,
    alerts: Arc<AlertSystem>,
    pending: VecDeque<AuditEntry>,
    capacity: usize,
    max_failures: u32,
    consecutive_failures: u32,
    degraded: bool,
}

impl WriterState {
    fn push(&mut self, entry: AuditEntry) {
        if self.pending.len() >= self.capacity {
            self.pending.pop_front();
            warn!(capacity = self.capacity, "audit fallback buffer full; dropping oldest entry");
        }
        self.pending.push_back(entry);
    }

    /// Write the backlog in order, stopping at the first failure.
    async fn drain(&mut self) -> Result<(), AuditLogError> {
        while let Some(entry) = self.pending.front() {
            if let Err(e) = self.log.append(entry).await {
                self.on_failure(&e);
                return Err(e);
            }
            self.pending.pop_front();
        }
        if self.consecutive_failures > 0 {
            info!(failures = self.consecutive_failures, "audit log writable again; backlog flushed");
        }
        self.consecutive_failures = 0;
        self.degraded = false;
        Ok(())
    }

    fn on_failure(&mut self, e: &AuditLogError) {
        self.consecutive_failures += 1;
        warn!(
            error = %e,
            failures = self.consecutive_failures,
            pending = self.pending.len(),
            "audit log write failed; keeping entry in fallback buffer"
        );
        if self.consecutive_failures >= self.max_failures.max(1) && !self.degraded {
            self.degraded = true;
            self.alerts.dispatch(Alert::new(
                AlertLevel::Warning,
                format!(
                    "audit integrity degraded: {} consecutive audit-log write failures ({})",
                    self.consecutive_failures, e
                ),
            ));
        }
    }
}

async fn run_writer(mut state: WriterState, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Append(entry) => {
                state.push(entry);
                let _ = state.drain().await;
            }
            WriterCommand::AppendAcked(entry, done) => {
                state.push(entry);
                let _ = done.send(state.drain().await);
            }
            WriterCommand::Flush(done) => {
                let _ = state.drain().await;
                let _ = done.send(());
            }
            WriterCommand::Shutdown(done) => {
                if state.drain().await.is_err() {
                    error!(pending = state.pending.len(), "audit writer stopping with unwritten entries");
                }
                let _ = done.send(());
                return;
            }
        }
    }
}

/// Non-blocking front end to the audit log.
pub struct AuditWriter {
    log: Arc<dyn AuditLog>,
    alerts: Arc<AlertSystem>,
    capacity: usize,
    max_failures: u32,
    tx: mpsc::UnboundedSender<WriterCommand>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<WriterCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditWriter {
    /// Entries queue until [`AuditWriter::start`] is called.
    pub fn new(log: Arc<dyn AuditLog>, policy: &AuditPolicy, alerts: Arc<AlertSystem>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            log,
            alerts,
            capacity: policy.fallback_capacity.max(1),
            max_failures: policy.max_write_failures,
            tx,
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    pub fn log(&self) -> Arc<dyn AuditLog> {
        Arc::clone(&self.log)
    }

    /// Spawn the writer task. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let state = WriterState {
            log: Arc::clone(&self.log),
            alerts: Arc::clone(&self.alerts),
            pending: VecDeque::new(),
            capacity: self.capacity,
            max_failures: self.max_failures,
            consecutive_failures: 0,
            degraded: false,
        };
        let handle = tokio::spawn(run_writer(state, rx));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!("audit writer started");
    }

    fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Queue an entry without waiting for it to be written.
    pub fn enqueue(&self, entry: AuditEntry) {
        if self.tx.send(WriterCommand::Append(entry)).is_err() {
            error!("audit writer closed; entry lost");
        }
    }

    /// Write an entry and wait until it is durable (or has failed).
    pub async fn persist(&self, entry: AuditEntry) -> Result<(), AuditLogError> {
        if !self.is_running() {
            return self.log.append(&entry).await;
        }
        let (done, wait) = oneshot::channel();
        self.tx
            .send(WriterCommand::AppendAcked(entry, done))
            .map_err(|_| AuditLogError::Closed)?;
        wait.await.map_err(|_| AuditLogError::Closed)?
    }

    /// Wait until every queued entry has been attempted.
    pub async fn flush(&self) {
        if !self.is_running() {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub async fn shutdown(&self) {
        if !self.is_running() {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.tx.send(WriterCommand::Shutdown(done)).is_ok() {
            let _ = wait.await;
        }
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
