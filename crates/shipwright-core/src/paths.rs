use std::path::{Path, PathBuf};

pub const SHIPWRIGHT_DIR: &str = ".shipwright";
pub const CONFIG_FILE: &str = ".shipwright/config.yaml";
pub const AUDIT_DB_FILE: &str = ".shipwright/audit.db";

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn default_audit_db_path(root: &Path) -> PathBuf {
    root.join(AUDIT_DB_FILE)
}

/// Resolve a configured path: absolute paths are kept, relative ones are
/// joined onto the project root.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}
