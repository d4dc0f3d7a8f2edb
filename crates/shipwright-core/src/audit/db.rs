//! Persistent storage for audit records using redb.
//!
//! # Table design
//!
//! `AUDITS` uses a 32-byte composite key:
//! ```text
//! [ started_at_ms: u64 BE (8 bytes) | seq: u64 BE (8 bytes) | uuid: 16 bytes ]
//! ```
//! Byte order equals start-time order, so `latest()` is the last key and
//! `list()` is a reverse scan with no sorting. `seq` is a per-database
//! insertion counter kept in `META`; it orders records that start in the
//! same millisecond.
//!
//! `AUDIT_INDEX` maps the 16 uuid bytes to the composite key so lookups by id
//! do not scan.
//!
//! Log-only patches are committed with `Durability::Eventual`. They arrive
//! once per batch of output lines and the next status change commits them
//! durably anyway.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, Durability, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{CoreError, Result};

use super::record::{AuditPatch, AuditRecord, AuditStatus};
use super::AuditRecorder;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: 32-byte composite (started_at_ms ++ seq ++ uuid bytes)
/// Value: JSON-encoded AuditRecord
const AUDITS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("audits");

/// Key: uuid bytes. Value: composite key into `AUDITS`.
const AUDIT_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("audit_index");

/// Counters. `next_seq` is the insertion sequence for the next record.
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_SEQ: &str = "next_seq";

const INTERRUPTED_MESSAGE: &str =
    "interrupted by controller restart; deployment state is unknown";

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn audit_key(ts: DateTime<Utc>, seq: u64, id: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..16].copy_from_slice(&seq.to_be_bytes());
    key[16..].copy_from_slice(id.as_bytes());
    key
}

fn db_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::AuditDb(e.to_string())
}

// ---------------------------------------------------------------------------
// AuditDb
// ---------------------------------------------------------------------------

/// Persistent store for `AuditRecord`s.
pub struct AuditDb {
    db: Database,
}

impl AuditDb {
    /// Open or create the redb database at `path`, creating parent
    /// directories and both tables if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(AUDITS).map_err(db_err)?;
        wt.open_table(AUDIT_INDEX).map_err(db_err)?;
        wt.open_table(META).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Insert a complete record as-is.
    pub fn insert(&self, record: &AuditRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let seq = meta
                .get(NEXT_SEQ)
                .map_err(db_err)?
                .map(|guard| guard.value())
                .unwrap_or(0);
            meta.insert(NEXT_SEQ, seq + 1).map_err(db_err)?;
            let key = audit_key(record.started_at, seq, record.id);

            let mut audits = wt.open_table(AUDITS).map_err(db_err)?;
            audits
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
            let mut index = wt.open_table(AUDIT_INDEX).map_err(db_err)?;
            index
                .insert(record.id.as_bytes().as_slice(), key.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// On controller startup, finalize any record still `Pending` or
    /// `InProgress` as `Failed` with the manual-intervention flag.
    ///
    /// Only one controller exists, so at startup no attempt can be running:
    /// such records belong to a process that died mid-attempt.
    ///
    /// Returns the number of records recovered.
    pub fn recover_interrupted(&self) -> Result<u32> {
        let stuck: Vec<Uuid> = self
            .scan(usize::MAX, |r| {
                matches!(r.status, AuditStatus::Pending | AuditStatus::InProgress)
            })?
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut count = 0u32;
        for id in stuck {
            self.update(
                id,
                AuditPatch::finalize(AuditStatus::Failed)
                    .with_error(INTERRUPTED_MESSAGE)
                    .with_manual_intervention(),
            )?;
            count += 1;
        }
        Ok(count)
    }

    /// Reverse (newest-first) scan keeping up to `limit` records that match.
    fn scan(
        &self,
        limit: usize,
        keep: impl Fn(&AuditRecord) -> bool,
    ) -> Result<Vec<AuditRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(AUDITS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)?.rev() {
            if result.len() >= limit {
                break;
            }
            let (_, v) = entry.map_err(db_err)?;
            let record: AuditRecord = serde_json::from_slice(v.value())?;
            if keep(&record) {
                result.push(record);
            }
        }
        Ok(result)
    }
}

impl AuditRecorder for AuditDb {
    fn create(&self, initiated_by: &str) -> Result<AuditRecord> {
        let record = AuditRecord::start(initiated_by);
        self.insert(&record)?;
        Ok(record)
    }

    fn update(&self, id: Uuid, patch: AuditPatch) -> Result<AuditRecord> {
        let log_only = patch.is_log_only();
        let mut wt = self.db.begin_write().map_err(db_err)?;
        if log_only {
            wt.set_durability(Durability::Eventual);
        }
        let record = {
            let index = wt.open_table(AUDIT_INDEX).map_err(db_err)?;
            let key: Vec<u8> = match index.get(id.as_bytes().as_slice()).map_err(db_err)? {
                Some(guard) => guard.value().to_vec(),
                None => return Err(CoreError::AuditNotFound(id)),
            };

            let mut audits = wt.open_table(AUDITS).map_err(db_err)?;
            let mut record: AuditRecord = match audits.get(key.as_slice()).map_err(db_err)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => return Err(CoreError::AuditNotFound(id)),
            };
            record.apply(patch)?;

            let value = serde_json::to_vec(&record)?;
            audits
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
            record
        };
        wt.commit().map_err(db_err)?;
        Ok(record)
    }

    fn get(&self, id: Uuid) -> Result<Option<AuditRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(AUDIT_INDEX).map_err(db_err)?;
        let key: Vec<u8> = match index.get(id.as_bytes().as_slice()).map_err(db_err)? {
            Some(guard) => guard.value().to_vec(),
            None => return Ok(None),
        };
        let audits = rt.open_table(AUDITS).map_err(db_err)?;
        let record = match audits.get(key.as_slice()).map_err(db_err)? {
            Some(guard) => Some(serde_json::from_slice(guard.value())?),
            None => None,
        };
        Ok(record)
    }

    fn latest(&self) -> Result<Option<AuditRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(AUDITS).map_err(db_err)?;
        let record = match table.last().map_err(db_err)? {
            Some((_, v)) => Some(serde_json::from_slice(v.value())?),
            None => None,
        };
        Ok(record)
    }

    fn list_by_status(&self, status: AuditStatus) -> Result<Vec<AuditRecord>> {
        self.scan(usize::MAX, |r| r.status == status)
    }

    fn list(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        self.scan(limit, |_| true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
