//! Audit data model for update attempts.
//!
//! An `AuditRecord` is the durable trace of one update attempt. It is created
//! `InProgress` when the attempt is accepted, patched as steps complete, and
//! finalized exactly once by setting `completed_at`. After that it is frozen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// LogKind / LogEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Warning,
    Success,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Info => "info",
            LogKind::Warning => "warning",
            LogKind::Success => "success",
            LogKind::Error => "error",
        }
    }
}

/// One operator-facing line of an attempt's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an audit record.
///
/// Transitions: `Pending → InProgress → Completed | Failed`, plus the terminal
/// `Failed → RolledBack` edge. Re-asserting the current status is allowed so
/// callers can resend a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::InProgress => "in_progress",
            AuditStatus::Completed => "completed",
            AuditStatus::Failed => "failed",
            AuditStatus::RolledBack => "rolled_back",
        }
    }

    pub fn all() -> &'static [AuditStatus] {
        &[
            AuditStatus::Pending,
            AuditStatus::InProgress,
            AuditStatus::Completed,
            AuditStatus::Failed,
            AuditStatus::RolledBack,
        ]
    }

    pub fn can_transition_to(self, next: AuditStatus) -> bool {
        use AuditStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, RolledBack)
        )
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        AuditStatus::all()
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CoreError::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// AuditRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub initiated_by: String,
    pub status: AuditStatus,
    pub previous_commit: Option<String>,
    pub new_commit: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    /// Set when the attempt found nothing new to deploy.
    #[serde(default)]
    pub up_to_date: bool,
    /// Set when the deployment may be inconsistent and an operator must act.
    #[serde(default)]
    pub manual_intervention: bool,
    pub updated_at: DateTime<Utc>,
}

impl AuditRecord {
    /// A fresh record for an attempt that has just been accepted.
    pub fn start(initiated_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            initiated_by: initiated_by.into(),
            status: AuditStatus::InProgress,
            previous_commit: None,
            new_commit: None,
            logs: Vec::new(),
            error_message: None,
            started_at: now,
            completed_at: None,
            duration_seconds: None,
            up_to_date: false,
            manual_intervention: false,
            updated_at: now,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Overlay the fields present in `patch`.
    ///
    /// Fails without modifying the record if it is already finalized or the
    /// patch carries a status the current one cannot move to.
    pub fn apply(&mut self, patch: AuditPatch) -> Result<()> {
        if self.is_finalized() {
            return Err(CoreError::AuditFinalized(self.id));
        }
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(CoreError::InvalidStatusTransition {
                    from: self.status.to_string(),
                    to: next.to_string(),
                });
            }
        }

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(c) = patch.previous_commit {
            self.previous_commit = Some(c);
        }
        if let Some(c) = patch.new_commit {
            self.new_commit = Some(c);
        }
        if let Some(logs) = patch.logs {
            self.logs = logs;
        }
        if let Some(msg) = patch.error_message {
            self.error_message = Some(msg);
        }
        if let Some(flag) = patch.up_to_date {
            self.up_to_date = flag;
        }
        if let Some(flag) = patch.manual_intervention {
            self.manual_intervention = flag;
        }
        if let Some(at) = patch.completed_at {
            self.completed_at = Some(at);
            self.duration_seconds = Some(
                patch
                    .duration_seconds
                    .unwrap_or_else(|| (at - self.started_at).num_seconds().max(0)),
            );
        } else if let Some(d) = patch.duration_seconds {
            self.duration_seconds = Some(d);
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AuditPatch
// ---------------------------------------------------------------------------

/// A partial update to an `AuditRecord`. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditPatch {
    pub status: Option<AuditStatus>,
    pub previous_commit: Option<String>,
    pub new_commit: Option<String>,
    pub logs: Option<Vec<LogEntry>>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub up_to_date: Option<bool>,
    pub manual_intervention: Option<bool>,
}

impl AuditPatch {
    pub fn logs(logs: Vec<LogEntry>) -> Self {
        Self {
            logs: Some(logs),
            ..Default::default()
        }
    }

    pub fn status(status: AuditStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Close the record: sets the terminal status and `completed_at = now`.
    /// The duration is derived from the record's `started_at`.
    pub fn finalize(status: AuditStatus) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_logs(mut self, logs: Vec<LogEntry>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_previous_commit(mut self, commit: impl Into<String>) -> Self {
        self.previous_commit = Some(commit.into());
        self
    }

    pub fn with_new_commit(mut self, commit: impl Into<String>) -> Self {
        self.new_commit = Some(commit.into());
        self
    }

    pub fn with_manual_intervention(mut self) -> Self {
        self.manual_intervention = Some(true);
        self
    }

    pub fn with_up_to_date(mut self) -> Self {
        self.up_to_date = Some(true);
        self
    }

    /// True when the patch only re-syncs logs. Such writes are frequent and
    /// can be committed with relaxed durability.
    pub fn is_log_only(&self) -> bool {
        self.logs.is_some()
            && self.status.is_none()
            && self.previous_commit.is_none()
            && self.new_commit.is_none()
            && self.error_message.is_none()
            && self.completed_at.is_none()
            && self.duration_seconds.is_none()
            && self.up_to_date.is_none()
            && self.manual_intervention.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        use AuditStatus::*;
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(RolledBack));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!RolledBack.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(RolledBack));
        assert!(!InProgress.can_transition_to(RolledBack));
        assert!(InProgress.can_transition_to(InProgress));
    }

    #[test]
    fn status_parses_from_wire_names() {
        assert_eq!(
            "rolled_back".parse::<AuditStatus>().unwrap(),
            AuditStatus::RolledBack
        );
        assert_eq!(
            "in_progress".parse::<AuditStatus>().unwrap(),
            AuditStatus::InProgress
        );
        assert!("done".parse::<AuditStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&AuditStatus::RolledBack).unwrap();
        assert_eq!(json, "\"rolled_back\"");
    }

    #[test]
    fn patch_overlays_only_given_fields() {
        let mut rec = AuditRecord::start("alice");
        rec.apply(AuditPatch::default().with_previous_commit("abc123"))
            .unwrap();
        rec.apply(AuditPatch::logs(vec![LogEntry::new(LogKind::Info, "hi")]))
            .unwrap();

        assert_eq!(rec.previous_commit.as_deref(), Some("abc123"));
        assert_eq!(rec.logs.len(), 1);
        assert_eq!(rec.status, AuditStatus::InProgress);
        assert_eq!(rec.initiated_by, "alice");
    }

    #[test]
    fn finalize_sets_duration_and_freezes() {
        let mut rec = AuditRecord::start("bob");
        rec.apply(AuditPatch::finalize(AuditStatus::Completed))
            .unwrap();
        assert!(rec.is_finalized());
        assert!(rec.duration_seconds.is_some());

        let err = rec
            .apply(AuditPatch::logs(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, CoreError::AuditFinalized(id) if id == rec.id));
    }

    #[test]
    fn backward_transition_is_rejected_without_mutation() {
        let mut rec = AuditRecord::start("carol");
        rec.apply(AuditPatch::status(AuditStatus::Failed)).unwrap();
        let err = rec
            .apply(AuditPatch::status(AuditStatus::Completed).with_error("nope"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidStatusTransition { .. }));
        assert_eq!(rec.status, AuditStatus::Failed);
        assert!(rec.error_message.is_none());
    }

    #[test]
    fn log_only_detection() {
        assert!(AuditPatch::logs(Vec::new()).is_log_only());
        assert!(!AuditPatch::status(AuditStatus::Failed).is_log_only());
        assert!(!AuditPatch::logs(Vec::new())
            .with_error("x")
            .is_log_only());
        assert!(!AuditPatch::default().is_log_only());
    }
}
