use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{AuditEntry, AuditLog};
use crate::error::AuditLogError;

/// In-process audit log.
///
/// Used when no log path is configured, and by tests, which can mark it
/// unavailable to exercise the fallback path.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    unavailable: AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every append fails with an I/O error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditLogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuditLogError::Io(std::io::Error::other(
                "audit log unavailable",
            )));
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditLogError> {
        Ok(self.entries())
    }
}
