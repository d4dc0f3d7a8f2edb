use std::sync::Arc;

use shipwright_core::audit::{AuditPatch, AuditRecord, AuditRecorder};
use shipwright_core::CoreError;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

enum Job {
    /// Fire-and-forget patch; failures are logged.
    Patch(AuditPatch),
    /// Patch whose result the caller awaits.
    Commit(AuditPatch, oneshot::Sender<shipwright_core::Result<AuditRecord>>),
    /// Resolves once every earlier job has been applied.
    Barrier(oneshot::Sender<()>),
}

/// Serialized writes to one audit record.
///
/// Patches are applied in submission order on the blocking pool, so redb
/// commits never run on an async worker. Clones share the same queue. The
/// queue stops once every handle is dropped.
#[derive(Clone)]
pub struct AuditWriter {
    audit_id: Uuid,
    tx: mpsc::UnboundedSender<Job>,
}

impl AuditWriter {
    pub fn spawn(audit: Arc<dyn AuditRecorder>, audit_id: Uuid) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Patch(patch) => {
                        if let Err(e) = apply(&audit, audit_id, patch).await {
                            warn!(audit_id = %audit_id, error = %e, "failed to update audit record");
                        }
                    }
                    Job::Commit(patch, reply) => {
                        let _ = reply.send(apply(&audit, audit_id, patch).await);
                    }
                    Job::Barrier(reply) => {
                        let _ = reply.send(());
                    }
                }
            }
        });
        Self { audit_id, tx }
    }

    pub fn audit_id(&self) -> Uuid {
        self.audit_id
    }

    /// Queue `patch` without waiting for it.
    pub fn submit(&self, patch: AuditPatch) {
        if self.tx.send(Job::Patch(patch)).is_err() {
            warn!(audit_id = %self.audit_id, "audit writer stopped; patch dropped");
        }
    }

    /// Queue `patch` behind everything already submitted and wait for the
    /// stored record.
    pub async fn commit(&self, patch: AuditPatch) -> shipwright_core::Result<AuditRecord> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Commit(patch, reply))
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Wait until every patch submitted so far has been applied.
    pub async fn settled(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Job::Barrier(reply)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn apply(
    audit: &Arc<dyn AuditRecorder>,
    id: Uuid,
    patch: AuditPatch,
) -> shipwright_core::Result<AuditRecord> {
    let audit = Arc::clone(audit);
    tokio::task::spawn_blocking(move || audit.update(id, patch))
        .await
        .map_err(|e| CoreError::AuditDb(format!("audit write task failed: {e}")))?
}

fn stopped() -> CoreError {
    CoreError::AuditDb("audit writer stopped".to_string())
}
