use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use shipwright_core::audit::{AuditDb, AuditRecorder};
use shipwright_core::config::{Config, WarnLevel};
use tracing::{error, info, warn};

use crate::update::Orchestrator;

/// Shared, cheaply cloneable server state.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub orchestrator: Orchestrator,
    pub audit: Arc<dyn AuditRecorder>,
}

impl AppState {
    pub fn new(root: PathBuf, orchestrator: Orchestrator, audit: Arc<dyn AuditRecorder>) -> Self {
        Self {
            root,
            orchestrator,
            audit,
        }
    }

    /// Load config, open the audit store, and finalize attempts a previous
    /// process left unfinished.
    pub fn open(root: PathBuf) -> anyhow::Result<Self> {
        let config = Config::load(&root).context("failed to load .shipwright/config.yaml")?;
        for w in config.validate() {
            match w.level {
                WarnLevel::Error => error!("config: {}", w.message),
                WarnLevel::Warning => warn!("config: {}", w.message),
            }
        }

        let db_path = config.audit_db_path(&root);
        let db = AuditDb::open(&db_path)
            .with_context(|| format!("failed to open audit database {}", db_path.display()))?;
        let recovered = db.recover_interrupted()?;
        if recovered > 0 {
            warn!(recovered, "marked interrupted update attempts as failed");
        }
        info!(path = %db_path.display(), "audit database ready");

        let audit: Arc<dyn AuditRecorder> = Arc::new(db);
        let orchestrator = Orchestrator::from_config(&root, config, Arc::clone(&audit));
        Ok(Self::new(root, orchestrator, audit))
    }
}
