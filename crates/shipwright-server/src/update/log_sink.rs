use std::sync::{Mutex, PoisonError};

use shipwright_core::audit::{AuditPatch, LogEntry, LogKind};
use shipwright_exec::{LineSink, OutputStream};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::writer::AuditWriter;

/// Where a sink copies its entries.
struct Mirror {
    writer: AuditWriter,
    batch: usize,
    unsynced: usize,
}

/// Append-only log of one update attempt.
///
/// Step-level entries (`info`, `success`, `warning`, `error`) are mirrored to
/// the audit record immediately. Streamed command output is mirrored every
/// `batch` lines; `flush` forces the remainder out. Mirror writes go through
/// an [`AuditWriter`] and never block the caller.
pub struct LogSink {
    entries: Mutex<Vec<LogEntry>>,
    mirror: Mutex<Option<Mirror>>,
}

impl LogSink {
    /// A sink that only buffers in memory.
    pub fn detached() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            mirror: Mutex::new(None),
        }
    }

    /// A sink that mirrors into the record behind `writer`.
    pub fn mirrored(writer: AuditWriter, batch: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            mirror: Mutex::new(Some(Mirror {
                writer,
                batch: batch.max(1),
                unsynced: 0,
            })),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogKind::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(LogKind::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(LogKind::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogKind::Error, message.into());
    }

    fn push(&self, kind: LogKind, message: String) {
        match kind {
            LogKind::Error => error!(audit_id = ?self.audit_id(), "{message}"),
            LogKind::Warning => warn!(audit_id = ?self.audit_id(), "{message}"),
            LogKind::Info | LogKind::Success => info!(audit_id = ?self.audit_id(), "{message}"),
        }
        self.append(LogEntry::new(kind, message), true);
    }

    fn append(&self, entry: LogEntry, immediate: bool) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry);
        let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(m) = mirror.as_mut() {
            m.unsynced += 1;
            if immediate || m.unsynced >= m.batch {
                m.unsynced = 0;
                // Submitted under the lock so snapshots queue in order.
                m.writer.submit(AuditPatch::logs(entries.clone()));
            }
        }
    }

    /// Push any unsynced output lines to the audit record.
    pub fn flush(&self) {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(m) = mirror.as_mut() {
            if m.unsynced > 0 {
                m.unsynced = 0;
                m.writer.submit(AuditPatch::logs(entries.clone()));
            }
        }
    }

    /// Wait until every mirrored snapshot so far has been written.
    pub async fn settled(&self) {
        let writer = self
            .mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|m| m.writer.clone());
        if let Some(writer) = writer {
            writer.settled().await;
        }
    }

    /// Stop mirroring. Called once the audit record has been finalized.
    pub fn detach(&self) {
        self.mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn audit_id(&self) -> Option<Uuid> {
        self.mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|m| m.writer.audit_id())
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LineSink for LogSink {
    fn line(&self, _stream: OutputStream, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        self.append(LogEntry::new(LogKind::Info, line), false);
    }
}
