//! Kernel events and the append-only audit logger.
//!
//! Every committed lifecycle action produces [`KernelEvent`]s. They are
//! returned to the caller, traced, and, when an [`AuditLogger`] is
//! attached, written as one JSON object per line. The audit trail is
//! observational only; nothing reads it back for control flow.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::kernel::action::ActionKind;
use crate::types::{Address, Keycode, OperationId};

/// Audit signal emitted by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum KernelEvent {
    /// A permission matrix entry changed.
    PermissionsUpdated {
        /// Policy whose entry changed.
        policy: Address,
        /// Module the operation lives on.
        keycode: Keycode,
        /// The restricted operation.
        operation: OperationId,
        /// New value of the entry.
        granted: bool,
    },
    /// A lifecycle action committed.
    ActionExecuted {
        /// Which action ran.
        action: ActionKind,
        /// Its target identity.
        target: Address,
    },
}

/// One line of the audit trail.
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    entry_id: Uuid,
    timestamp: String,
    #[serde(flatten)]
    event: &'a KernelEvent,
}

/// Append-only JSON-lines sink for committed kernel events.
pub struct AuditLogger {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AuditLogger {
    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open audit file {}", path.display()))?;
        Ok(Self::from_writer(Box::new(file)))
    }

    /// Wrap any writer, e.g. an in-memory buffer.
    pub fn from_writer(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Serialize `event` as one line and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn log(&self, event: &KernelEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(&AuditEntry {
            entry_id: Uuid::new_v4(),
            timestamp: Utc::now().to_rfc3339(),
            event,
        })?;
        let mut sink = self
            .sink
            .lock()
            .map_err(|e| anyhow::anyhow!("audit sink poisoned: {e}"))?;
        sink.write_all(line.as_bytes())?;
        sink.write_all(b"\n")?;
        sink.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}
