use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use regex::Regex;
use serde::Serialize;
use shipwright_core::audit::{AuditPatch, AuditRecord, AuditRecorder, AuditStatus, LogEntry};
use shipwright_core::config::Config;
use shipwright_core::{paths, CoreError};
use shipwright_exec::{
    poll_until, retry_with_backoff, Backoff, CommandOutput, CommandRunner, CommandSpec, DockerExec,
    ExecError, Executor, LineSink, Local, NullSink, PollError,
};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use super::container::{ContainerHelper, UnitHealth, UpOptions};
use super::guard::{FlightGuard, SingleFlight, UpdateGate};
use super::log_sink::LogSink;
use super::writer::AuditWriter;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where the current (or most recent) attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Validating,
    Pulling,
    Rebuilding,
    Migrating,
    VerifyingHealth,
    Completed,
    UpToDate,
    Failed,
    RollingBack,
    RolledBack,
}

/// Reasons an update request is refused before any pipeline work starts.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("an update is already in progress")]
    AlreadyInProgress,

    #[error("updates are disabled: set {0} to enable them")]
    UpdatesDisabled(String),

    #[error("failed to create audit record: {0}")]
    Audit(#[from] CoreError),

    #[error("update task aborted: {0}")]
    Aborted(String),
}

/// Outcome of one attempt, returned to the caller once the pipeline ends.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub success: bool,
    pub audit_id: Uuid,
    pub phase: Phase,
    pub previous_commit: Option<String>,
    pub new_commit: Option<String>,
    pub up_to_date: bool,
    pub manual_intervention: bool,
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
}

/// Live view for status polling.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub in_progress: bool,
    pub can_update: bool,
    pub phase: Phase,
    pub audit_id: Option<Uuid>,
    pub logs: Vec<LogEntry>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs update attempts: pull, rebuild, migrate, verify, and roll back on
/// failure. Cheap to clone; clones share the single-flight slot.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    gate: UpdateGate,
    audit: Arc<dyn AuditRecorder>,
    sandbox: Arc<dyn CommandRunner>,
    /// Host-side helper; only used to start the runner container.
    host: ContainerHelper,
    /// Runner-side helper for the deployment unit.
    deploy: ContainerHelper,
    flight: Arc<SingleFlight>,
    live: Mutex<Live>,
}

struct Live {
    phase: Phase,
    audit_id: Option<Uuid>,
    logs: Arc<LogSink>,
    /// Label of the stash holding local changes, until restored.
    stash: Option<String>,
}

impl Orchestrator {
    pub fn new(
        root: &Path,
        config: Config,
        gate: UpdateGate,
        audit: Arc<dyn AuditRecorder>,
        host: Arc<dyn CommandRunner>,
        sandbox: Arc<dyn CommandRunner>,
    ) -> Self {
        let timeout = config.exec.default_timeout();
        let compose_dir = paths::resolve(root, &config.runner.compose_dir);
        let host = ContainerHelper::new(host, timeout).in_project(compose_dir.to_string_lossy());
        let deploy = ContainerHelper::new(Arc::clone(&sandbox), timeout)
            .in_project(config.deploy.project_dir.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                gate,
                audit,
                sandbox,
                host,
                deploy,
                flight: SingleFlight::new(),
                live: Mutex::new(Live {
                    phase: Phase::Idle,
                    audit_id: None,
                    logs: Arc::new(LogSink::detached()),
                    stash: None,
                }),
            }),
        }
    }

    /// Production wiring: host commands run locally, pipeline commands run
    /// inside the runner container via `docker exec`, and the gate reads
    /// `config.feature_flag` from the environment.
    pub fn from_config(root: &Path, config: Config, audit: Arc<dyn AuditRecorder>) -> Self {
        let limit = config.exec.max_output_bytes;
        let host: Arc<dyn CommandRunner> = Arc::new(Executor::new(Local, limit));
        let sandbox: Arc<dyn CommandRunner> = Arc::new(Executor::new(
            DockerExec::new(config.runner.container.clone()),
            limit,
        ));
        let gate = UpdateGate::Env(config.feature_flag.clone());
        Self::new(root, config, gate, audit, host, sandbox)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Run one update attempt to completion.
    ///
    /// Refused attempts (`AlreadyInProgress`, `UpdatesDisabled`) leave no
    /// audit record and no log entries. Every accepted attempt ends with a
    /// finalized audit record, even if the caller stops waiting: the pipeline
    /// runs on its own task and owns the single-flight guard.
    pub async fn perform_update(&self, initiated_by: &str) -> Result<UpdateReport, UpdateError> {
        let guard = self
            .inner
            .flight
            .try_acquire()
            .ok_or(UpdateError::AlreadyInProgress)?;
        if !self.inner.gate.is_open() {
            return Err(UpdateError::UpdatesDisabled(self.inner.gate.describe()));
        }

        let audit = Arc::clone(&self.inner.audit);
        let actor = initiated_by.to_string();
        let record = tokio::task::spawn_blocking(move || audit.create(&actor))
            .await
            .map_err(|e| UpdateError::Aborted(e.to_string()))??;
        let writer = AuditWriter::spawn(Arc::clone(&self.inner.audit), record.id);
        let sink = Arc::new(LogSink::mirrored(
            writer.clone(),
            self.inner.config.audit.log_sync_batch,
        ));
        {
            let mut live = self.inner.live();
            live.phase = Phase::Validating;
            live.audit_id = Some(record.id);
            live.logs = Arc::clone(&sink);
            live.stash = None;
        }
        info!(audit_id = %record.id, initiated_by, "update accepted");

        let supervisor = tokio::spawn(supervise(
            Arc::clone(&self.inner),
            guard,
            record,
            writer,
            sink,
        ));
        supervisor
            .await
            .map_err(|e| UpdateError::Aborted(e.to_string()))
    }

    pub fn status(&self) -> UpdateStatus {
        let busy = self.inner.flight.is_busy();
        let live = self.inner.live();
        UpdateStatus {
            in_progress: busy,
            can_update: !busy && self.inner.gate.is_open(),
            phase: live.phase,
            audit_id: live.audit_id,
            logs: live.logs.entries(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.gate.is_open()
    }
}

/// Owns the guard for the whole attempt and converts a pipeline panic into a
/// failed, finalized record before releasing it.
async fn supervise(
    inner: Arc<Inner>,
    _guard: FlightGuard,
    record: AuditRecord,
    writer: AuditWriter,
    sink: Arc<LogSink>,
) -> UpdateReport {
    let pipeline = {
        let inner = Arc::clone(&inner);
        let writer = writer.clone();
        let sink = Arc::clone(&sink);
        tokio::spawn(async move { inner.run(record, writer, &sink).await })
    };
    match pipeline.await {
        Ok(report) => report,
        Err(e) => inner.fault(&writer, &sink, panic_message(e)).await,
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "pipeline panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Per-attempt bookkeeping.
struct Attempt {
    id: Uuid,
    writer: AuditWriter,
    previous: Option<String>,
    new: Option<String>,
    /// Label of the stash created before pulling, if any.
    stash: Option<String>,
}

enum Outcome {
    Updated,
    UpToDate,
}

/// A failure after the current commit was captured; always rolled back.
struct Failure {
    message: String,
    manual_intervention: bool,
}

impl Failure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            manual_intervention: false,
        }
    }

    /// The deployment may be left inconsistent even after a rollback.
    fn manual(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            manual_intervention: true,
        }
    }
}

static COMMIT_RE: OnceLock<Regex> = OnceLock::new();

fn is_commit_hash(s: &str) -> bool {
    COMMIT_RE
        .get_or_init(|| Regex::new(r"^[0-9a-f]{4,64}$").expect("commit pattern is valid"))
        .is_match(s)
}

fn short(commit: &str) -> &str {
    &commit[..commit.len().min(7)]
}

impl Inner {
    fn live(&self) -> std::sync::MutexGuard<'_, Live> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        self.live().phase = phase;
    }

    async fn run(&self, record: AuditRecord, writer: AuditWriter, sink: &LogSink) -> UpdateReport {
        let mut attempt = Attempt {
            id: record.id,
            writer,
            previous: None,
            new: None,
            stash: None,
        };
        sink.info(format!("Update requested by {}", record.initiated_by));

        let previous = match self.prepare(&attempt, sink).await {
            Ok(commit) => commit,
            Err(message) => return self.fail_without_rollback(&attempt, sink, message).await,
        };
        attempt.previous = Some(previous.clone());

        match self.deploy(&mut attempt, &previous, sink).await {
            Ok(Outcome::Updated) => self.complete(&attempt, sink).await,
            Ok(Outcome::UpToDate) => self.up_to_date(&attempt, &previous, sink).await,
            Err(failure) => self.roll_back(&attempt, &previous, failure, sink).await,
        }
    }

    /// Runner availability, tool checks, and capture of the current commit.
    /// Nothing has changed yet, so failures here are not rolled back.
    async fn prepare(&self, attempt: &Attempt, sink: &LogSink) -> Result<String, String> {
        self.set_phase(Phase::Validating);

        let runner = &self.config.runner;
        sink.info(format!("Checking sandbox runner `{}`", runner.container));
        self.host
            .ensure_running(&runner.container, &runner.service, runner.settle(), sink)
            .await
            .map_err(|e| format!("Sandbox runner `{}` is not available: {e}", runner.container))?;
        sink.success(format!("Sandbox runner `{}` is running", runner.container));

        self.git(&["--version"], &NullSink)
            .await
            .map_err(|e| format!("git is not available in the runner: {e}"))?;
        let flavor = self
            .deploy
            .flavor()
            .await
            .map_err(|e| format!("docker compose is not available in the runner: {e}"))?;
        sink.info(format!("Using `{flavor}`"));

        let repo = &self.config.git.repo_dir;
        match self
            .git(&["rev-parse", "--is-inside-work-tree"], &NullSink)
            .await
        {
            Ok(out) if out.trimmed() == "true" => {}
            Ok(_) => return Err(format!("{repo} is not a git checkout")),
            Err(e) => return Err(format!("{repo} is not a git checkout: {e}")),
        }
        sink.success("Prerequisites validated");

        let commit = self
            .head_commit()
            .await
            .map_err(|e| format!("Could not read the current commit: {e}"))?;
        attempt
            .writer
            .commit(AuditPatch::default().with_previous_commit(&commit))
            .await
            .map_err(|e| format!("Could not record the current commit: {e}"))?;
        sink.info(format!("Current commit: {}", short(&commit)));
        Ok(commit)
    }

    async fn deploy(
        &self,
        attempt: &mut Attempt,
        previous: &str,
        sink: &LogSink,
    ) -> Result<Outcome, Failure> {
        // --- Pull ---------------------------------------------------------
        self.set_phase(Phase::Pulling);
        let status = self
            .git(&["status", "--porcelain"], &NullSink)
            .await
            .map_err(|e| Failure::new(format!("git status failed: {e}")))?;
        if !status.trimmed().is_empty() {
            sink.warning("Working tree has local changes; stashing them before pulling");
            let label = format!("shipwright-{}", attempt.id);
            self.git(&["stash", "push", "--include-untracked", "-m", label.as_str()], sink)
                .await
                .map_err(|e| Failure::new(format!("Could not stash local changes: {e}")))?;
            self.live().stash = Some(label.clone());
            attempt.stash = Some(label);
        }

        self.pull(sink).await?;

        sink.info("Verifying repository integrity");
        self.git_with_timeout(&["fsck", "--no-progress"], self.config.git.pull_timeout(), sink)
            .await
            .map_err(|e| Failure::new(format!("Repository integrity check failed: {e}")))?;

        let new = self
            .head_commit()
            .await
            .map_err(|e| Failure::new(format!("Could not read the pulled commit: {e}")))?;
        attempt.new = Some(new.clone());
        attempt
            .writer
            .submit(AuditPatch::default().with_new_commit(&new));
        if new == previous {
            return Ok(Outcome::UpToDate);
        }
        sink.success(format!("Pulled {} -> {}", short(previous), short(&new)));

        // --- Rebuild ------------------------------------------------------
        self.set_phase(Phase::Rebuilding);
        let deploy = &self.config.deploy;
        let unit = deploy.unit.as_str();
        sink.info(format!("Building `{unit}`; the running instance keeps serving"));
        self.deploy
            .build(unit, deploy.build_timeout(), sink)
            .await
            .map_err(|e| Failure::new(format!("Build of `{unit}` failed: {e}")))?;
        sink.success(format!("Built `{unit}`"));

        sink.info(format!("Replacing the `{unit}` container"));
        self.deploy
            .up(unit, UpOptions::default(), deploy.build_timeout(), sink)
            .await
            .map_err(|e| Failure::new(format!("Starting the new `{unit}` container failed: {e}")))?;
        sink.flush();
        self.wait_healthy(unit, sink).await?;

        // --- Migrate ------------------------------------------------------
        self.set_phase(Phase::Migrating);
        let settle = deploy.migrate_settle();
        if !settle.is_zero() {
            sink.info(format!(
                "Waiting {}s for dependencies to settle",
                settle.as_secs()
            ));
            tokio::time::sleep(settle).await;
        }
        if deploy.migrate_command.is_empty() {
            sink.warning("No migration command configured; skipping migrations");
        } else {
            sink.info(format!(
                "Running migrations: {}",
                deploy.migrate_command.join(" ")
            ));
            self.deploy
                .exec(unit, &deploy.migrate_command, deploy.migrate_timeout(), sink)
                .await
                .map_err(|e| {
                    Failure::manual(format!(
                        "Migration failed: {e}. The database may be partially migrated; \
                         manual intervention required"
                    ))
                })?;
            sink.success("Migrations applied");
        }
        sink.flush();

        // --- Verify -------------------------------------------------------
        self.set_phase(Phase::VerifyingHealth);
        match self.deploy.health(unit).await {
            Ok(UnitHealth::Healthy) => {
                sink.success(format!("`{unit}` is healthy after migrations"));
                Ok(Outcome::Updated)
            }
            Ok(state) => Err(Failure::new(format!(
                "`{unit}` is {state} after migrations"
            ))),
            Err(e) => Err(Failure::new(format!("Final health check failed: {e}"))),
        }
    }

    async fn pull(&self, sink: &LogSink) -> Result<(), Failure> {
        let git = &self.config.git;
        let mut args = vec!["pull", "--rebase", git.remote.as_str()];
        if let Some(branch) = &git.branch {
            args.push(branch.as_str());
        }
        sink.info(format!("Pulling latest changes from {}", args[2..].join(" ")));

        let policy = Backoff::new(git.pull_attempts, git.backoff_base());
        let args = &args;
        let result = retry_with_backoff(
            policy,
            |n, e: &ExecError, delay| {
                sink.warning(format!(
                    "Pull attempt {n}/{} failed: {e}; retrying in {}s",
                    policy.max_attempts,
                    delay.as_secs()
                ))
            },
            move |_| self.pull_once(args, sink),
        )
        .await;

        match result {
            Ok(()) => {
                sink.success("Pulled latest changes");
                Ok(())
            }
            Err(exhausted) => Err(Failure::new(format!(
                "Pull failed after {} attempts: {}",
                exhausted.attempts, exhausted.last
            ))),
        }
    }

    async fn pull_once(&self, args: &[&str], sink: &LogSink) -> Result<(), ExecError> {
        match self
            .git_with_timeout(args, self.config.git.pull_timeout(), sink)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                // A conflicted rebase leaves the checkout mid-rebase.
                let _ = self.git(&["rebase", "--abort"], &NullSink).await;
                Err(e)
            }
        }
    }

    async fn wait_healthy(&self, unit: &str, sink: &LogSink) -> Result<(), Failure> {
        let deploy = &self.config.deploy;
        let helper = &self.deploy;
        let last = Mutex::new(UnitHealth::Down);
        let last_ref = &last;

        sink.info(format!(
            "Waiting up to {}s for `{unit}` to become healthy",
            deploy.health_timeout_secs
        ));
        let result = poll_until(deploy.health_interval(), deploy.health_timeout(), move || async move {
            let health = helper.health(unit).await?;
            *last_ref.lock().unwrap_or_else(PoisonError::into_inner) = health;
            Ok::<_, ExecError>((health == UnitHealth::Healthy).then_some(()))
        })
        .await;

        match result {
            Ok(()) => {
                sink.success(format!("`{unit}` is healthy"));
                Ok(())
            }
            Err(PollError::TimedOut { waited }) => {
                let state = *last.lock().unwrap_or_else(PoisonError::into_inner);
                Err(Failure::new(format!(
                    "`{unit}` did not become healthy within {}s (last state: {state})",
                    waited.as_secs()
                )))
            }
            Err(PollError::Aborted(e)) => {
                Err(Failure::new(format!("Health check for `{unit}` failed: {e}")))
            }
        }
    }

    // --- Endings ---------------------------------------------------------

    async fn complete(&self, attempt: &Attempt, sink: &LogSink) -> UpdateReport {
        self.set_phase(Phase::Completed);
        if let Some(label) = &attempt.stash {
            self.warn_stash_left(label, sink);
        }
        let (prev, new) = (
            attempt.previous.as_deref().unwrap_or_default(),
            attempt.new.as_deref().unwrap_or_default(),
        );
        sink.success(format!("Update complete: {} -> {}", short(prev), short(new)));
        self.finalize(&attempt.writer, sink, AuditPatch::finalize(AuditStatus::Completed))
            .await;
        self.report(attempt, sink, Phase::Completed, None, false)
    }

    async fn up_to_date(&self, attempt: &Attempt, commit: &str, sink: &LogSink) -> UpdateReport {
        self.set_phase(Phase::UpToDate);
        if attempt.stash.is_some() {
            self.pop_stash(sink).await;
        }
        sink.success(format!("Already up to date at {}", short(commit)));
        self.finalize(
            &attempt.writer,
            sink,
            AuditPatch::finalize(AuditStatus::Completed).with_up_to_date(),
        )
        .await;
        self.report(attempt, sink, Phase::UpToDate, None, false)
    }

    async fn fail_without_rollback(
        &self,
        attempt: &Attempt,
        sink: &LogSink,
        message: String,
    ) -> UpdateReport {
        self.set_phase(Phase::Failed);
        sink.error(message.clone());
        self.finalize(
            &attempt.writer,
            sink,
            AuditPatch::finalize(AuditStatus::Failed).with_error(&message),
        )
        .await;
        self.report(attempt, sink, Phase::Failed, Some(message), false)
    }

    async fn roll_back(
        &self,
        attempt: &Attempt,
        previous: &str,
        failure: Failure,
        sink: &LogSink,
    ) -> UpdateReport {
        self.set_phase(Phase::Failed);
        sink.error(failure.message.clone());
        let mut patch = AuditPatch::status(AuditStatus::Failed).with_error(&failure.message);
        if failure.manual_intervention {
            patch = patch.with_manual_intervention();
        }
        attempt.writer.submit(patch);

        self.set_phase(Phase::RollingBack);
        sink.warning(format!("Rolling back to {}", short(previous)));
        match self.restore(previous, sink).await {
            Ok(()) => {
                if attempt.stash.is_some() {
                    self.pop_stash(sink).await;
                }
                self.set_phase(Phase::RolledBack);
                sink.success(format!("Rolled back to {}", short(previous)));
                self.finalize(
                    &attempt.writer,
                    sink,
                    AuditPatch::finalize(AuditStatus::RolledBack),
                )
                .await;
                self.report(
                    attempt,
                    sink,
                    Phase::RolledBack,
                    Some(failure.message),
                    failure.manual_intervention,
                )
            }
            Err(e) => {
                let message = format!(
                    "{}; rollback to {} failed: {e}",
                    failure.message,
                    short(previous)
                );
                self.set_phase(Phase::Failed);
                sink.error(format!("Rollback failed: {e}. Manual intervention required"));
                if let Some(label) = &attempt.stash {
                    self.warn_stash_left(label, sink);
                }
                self.finalize(
                    &attempt.writer,
                    sink,
                    AuditPatch::finalize(AuditStatus::Failed)
                        .with_error(&message)
                        .with_manual_intervention(),
                )
                .await;
                self.report(attempt, sink, Phase::Failed, Some(message), true)
            }
        }
    }

    /// Reset the checkout and force-recreate the unit from it.
    async fn restore(&self, commit: &str, sink: &LogSink) -> Result<(), ExecError> {
        self.git(&["reset", "--hard", commit], sink).await?;
        let unit = self.config.deploy.unit.as_str();
        let opts = UpOptions {
            build: true,
            force_recreate: true,
        };
        self.deploy
            .up(unit, opts, self.config.deploy.build_timeout(), sink)
            .await?;
        Ok(())
    }

    async fn fault(&self, writer: &AuditWriter, sink: &LogSink, cause: String) -> UpdateReport {
        let message = format!("Update aborted unexpectedly: {cause}");
        self.set_phase(Phase::Failed);
        sink.error(message.clone());
        let stash = self.live().stash.clone();
        if let Some(label) = &stash {
            self.warn_stash_left(label, sink);
        }
        let record = self
            .finalize(
                writer,
                sink,
                AuditPatch::finalize(AuditStatus::Failed)
                    .with_error(&message)
                    .with_manual_intervention(),
            )
            .await;
        let attempt = Attempt {
            id: writer.audit_id(),
            writer: writer.clone(),
            previous: record.as_ref().and_then(|r| r.previous_commit.clone()),
            new: record.as_ref().and_then(|r| r.new_commit.clone()),
            stash,
        };
        self.report(&attempt, sink, Phase::Failed, Some(message), true)
    }

    // --- Helpers ---------------------------------------------------------

    fn report(
        &self,
        attempt: &Attempt,
        sink: &LogSink,
        phase: Phase,
        error: Option<String>,
        manual_intervention: bool,
    ) -> UpdateReport {
        UpdateReport {
            success: error.is_none(),
            audit_id: attempt.id,
            phase,
            previous_commit: attempt.previous.clone(),
            new_commit: attempt.new.clone(),
            up_to_date: phase == Phase::UpToDate,
            manual_intervention,
            error,
            logs: sink.entries(),
        }
    }

    /// Stop mirroring, then write the final patch together with the complete
    /// log behind every queued update.
    async fn finalize(
        &self,
        writer: &AuditWriter,
        sink: &LogSink,
        patch: AuditPatch,
    ) -> Option<AuditRecord> {
        sink.detach();
        let id = writer.audit_id();
        let result = writer.commit(patch.with_logs(sink.entries())).await;
        match result {
            Ok(record) => {
                info!(
                    audit_id = %id,
                    status = %record.status,
                    duration_seconds = ?record.duration_seconds,
                    "update finished"
                );
                Some(record)
            }
            Err(e) => {
                error!(audit_id = %id, error = %e, "failed to finalize audit record");
                None
            }
        }
    }

    fn warn_stash_left(&self, label: &str, sink: &LogSink) {
        sink.warning(format!(
            "Local changes were left in stash `{label}` in {}",
            self.config.git.repo_dir
        ));
    }

    async fn pop_stash(&self, sink: &LogSink) {
        match self.git(&["stash", "pop"], sink).await {
            Ok(_) => {
                self.live().stash = None;
                sink.info("Restored stashed local changes");
            }
            Err(e) => sink.warning(format!("Could not restore stashed local changes: {e}")),
        }
    }

    async fn head_commit(&self) -> Result<String, ExecError> {
        let out = self.git(&["rev-parse", "HEAD"], &NullSink).await?;
        let commit = out.trimmed().to_string();
        if is_commit_hash(&commit) {
            Ok(commit)
        } else {
            Err(ExecError::Process(format!(
                "unexpected output from git rev-parse: {commit:?}"
            )))
        }
    }

    async fn git(&self, args: &[&str], sink: &dyn LineSink) -> Result<CommandOutput, ExecError> {
        self.git_with_timeout(args, self.config.exec.default_timeout(), sink)
            .await
    }

    async fn git_with_timeout(
        &self,
        args: &[&str],
        timeout: std::time::Duration,
        sink: &dyn LineSink,
    ) -> Result<CommandOutput, ExecError> {
        let argv = std::iter::once("git").chain(args.iter().copied());
        let spec = CommandSpec::new(argv)
            .in_dir(self.config.git.repo_dir.clone())
            .timeout(timeout);
        self.sandbox.run(&spec, sink).await
    }
}
