//! Audit trail for update attempts.
//!
//! Provides the `AuditRecord` data model, the `AuditRecorder` trait the
//! update controller writes through, and `AuditDb`, the redb-backed store.

pub mod db;
pub mod record;

pub use db::AuditDb;
pub use record::{AuditPatch, AuditRecord, AuditStatus, LogEntry, LogKind};

use uuid::Uuid;

use crate::error::Result;

/// Persistence seam for audit records.
///
/// One writer (the update controller) and any number of concurrent readers
/// (status endpoints, CLI) share an implementation, so every method takes
/// `&self` and implementations must be `Send + Sync`.
pub trait AuditRecorder: Send + Sync {
    /// Create a new `InProgress` record and return it.
    fn create(&self, initiated_by: &str) -> Result<AuditRecord>;

    /// Overlay `patch` onto the record with `id` and return the result.
    fn update(&self, id: Uuid, patch: AuditPatch) -> Result<AuditRecord>;

    fn get(&self, id: Uuid) -> Result<Option<AuditRecord>>;

    /// The most recently started record.
    fn latest(&self) -> Result<Option<AuditRecord>>;

    /// Records with `status`, newest first.
    fn list_by_status(&self, status: AuditStatus) -> Result<Vec<AuditRecord>>;

    /// Up to `limit` records, newest first.
    fn list(&self, limit: usize) -> Result<Vec<AuditRecord>>;
}
