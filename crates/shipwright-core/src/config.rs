use crate::error::{CoreError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

/// The sandbox runner container that executes git and compose commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Container name used for `docker exec` and `docker inspect`.
    #[serde(default = "default_runner_container")]
    pub container: String,
    /// Compose service that starts the runner when it is absent.
    #[serde(default = "default_runner_service")]
    pub service: String,
    /// Host directory holding the compose file that defines the runner.
    #[serde(default = "default_runner_compose_dir")]
    pub compose_dir: PathBuf,
    #[serde(default = "default_runner_settle")]
    pub settle_secs: u64,
}

fn default_runner_container() -> String {
    "shipwright-runner".to_string()
}

fn default_runner_service() -> String {
    "runner".to_string()
}

fn default_runner_compose_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_runner_settle() -> u64 {
    5
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            container: default_runner_container(),
            service: default_runner_service(),
            compose_dir: default_runner_compose_dir(),
            settle_secs: default_runner_settle(),
        }
    }
}

impl RunnerConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

// ---------------------------------------------------------------------------
// DeployConfig
// ---------------------------------------------------------------------------

/// The deployment unit being updated, as seen from inside the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Directory inside the runner containing the service's compose file.
    #[serde(default = "default_project_dir")]
    pub project_dir: String,
    /// Compose service name of the deployment unit.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Migration command, run with `compose exec -T <unit>`.
    #[serde(default = "default_migrate_command")]
    pub migrate_command: Vec<String>,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_migrate_settle")]
    pub migrate_settle_secs: u64,
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_migrate_timeout")]
    pub migrate_timeout_secs: u64,
}

fn default_project_dir() -> String {
    "/workspace".to_string()
}

fn default_unit() -> String {
    "app".to_string()
}

fn default_migrate_command() -> Vec<String> {
    vec!["npm".into(), "run".into(), "migrate".into()]
}

fn default_health_interval() -> u64 {
    5
}

fn default_health_timeout() -> u64 {
    120
}

fn default_migrate_settle() -> u64 {
    10
}

fn default_build_timeout() -> u64 {
    1800
}

fn default_migrate_timeout() -> u64 {
    600
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            unit: default_unit(),
            migrate_command: default_migrate_command(),
            health_interval_secs: default_health_interval(),
            health_timeout_secs: default_health_timeout(),
            migrate_settle_secs: default_migrate_settle(),
            build_timeout_secs: default_build_timeout(),
            migrate_timeout_secs: default_migrate_timeout(),
        }
    }
}

impl DeployConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn migrate_settle(&self) -> Duration {
        Duration::from_secs(self.migrate_settle_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn migrate_timeout(&self) -> Duration {
        Duration::from_secs(self.migrate_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// GitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Checkout directory inside the runner.
    #[serde(default = "default_repo_dir")]
    pub repo_dir: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Branch to pull. `None` pulls the checkout's upstream.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_pull_attempts")]
    pub pull_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
}

fn default_repo_dir() -> String {
    "/workspace".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_pull_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2
}

fn default_pull_timeout() -> u64 {
    300
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            repo_dir: default_repo_dir(),
            remote: default_remote(),
            branch: None,
            pull_attempts: default_pull_attempts(),
            backoff_base_secs: default_backoff_base(),
            pull_timeout_secs: default_pull_timeout(),
        }
    }
}

impl GitConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ExecConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_command_timeout")]
    pub default_timeout_secs: u64,
    /// Ceiling on captured stdout + stderr per command.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

fn default_command_timeout() -> u64 {
    120
}

fn default_max_output() -> usize {
    10 * 1024 * 1024
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_command_timeout(),
            max_output_bytes: default_max_output(),
        }
    }
}

impl ExecConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// AuditConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Relative paths resolve against the project root.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Streamed output lines are mirrored to the audit record in batches of
    /// this many entries. Step-level entries always mirror immediately.
    #[serde(default = "default_log_sync_batch")]
    pub log_sync_batch: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(paths::AUDIT_DB_FILE)
}

fn default_log_sync_batch() -> usize {
    20
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_sync_batch: default_log_sync_batch(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Environment variable that must be truthy for updates to run.
    #[serde(default = "default_feature_flag")]
    pub feature_flag: String,
}

fn default_version() -> u32 {
    1
}

fn default_feature_flag() -> String {
    "SHIPWRIGHT_UPDATES_ENABLED".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            runner: RunnerConfig::default(),
            deploy: DeployConfig::default(),
            git: GitConfig::default(),
            exec: ExecConfig::default(),
            audit: AuditConfig::default(),
            feature_flag: default_feature_flag(),
        }
    }
}

impl Config {
    /// Load `.shipwright/config.yaml`, falling back to defaults when the file
    /// does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        if cfg.version != 1 {
            return Err(CoreError::InvalidConfig(format!(
                "unsupported config version {}",
                cfg.version
            )));
        }
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn audit_db_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.audit.db_path)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.git.pull_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "git.pull_attempts is 0: the pull step can never run".into(),
            });
        }

        if self.deploy.migrate_command.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "deploy.migrate_command is empty: migrations will be skipped".into(),
            });
        }

        if self.deploy.unit.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "deploy.unit is empty".into(),
            });
        }

        if self.runner.container.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "runner.container is empty".into(),
            });
        }

        if self.deploy.health_interval_secs > self.deploy.health_timeout_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "deploy.health_interval_secs ({}) exceeds deploy.health_timeout_secs ({}): \
                     health will be checked once",
                    self.deploy.health_interval_secs, self.deploy.health_timeout_secs
                ),
            });
        }

        if self.exec.max_output_bytes < 4096 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "exec.max_output_bytes is {}: build output will likely be rejected",
                    self.exec.max_output_bytes
                ),
            });
        }

        if self.audit.log_sync_batch == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "audit.log_sync_batch is 0: every output line is mirrored".into(),
            });
        }

        if self.feature_flag.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "feature_flag is empty: updates can never be enabled".into(),
            });
        }

        warnings
    }
}
