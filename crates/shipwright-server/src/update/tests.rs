//! Pipeline tests against a scripted command runner.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shipwright_core::audit::{AuditDb, AuditRecord, AuditRecorder, AuditStatus, LogKind};
use shipwright_core::config::Config;
use shipwright_exec::{CommandOutput, CommandRunner, CommandSpec, ExecError, LineSink, OutputStream};
use tempfile::TempDir;

use super::*;

const HEALTHY_PS: &str = "NAME    IMAGE   STATUS\napp-1   app     Up 12 seconds (healthy)";
const STARTING_PS: &str = "NAME    IMAGE   STATUS\napp-1   app     Up 2 seconds (health: starting)";
const UNHEALTHY_PS: &str = "NAME    IMAGE   STATUS\napp-1   app     Up 40 seconds (unhealthy)";

// ---------------------------------------------------------------------------
// Scripted runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Reply {
    Ok(&'static str),
    Fail(&'static str),
    Hang(Duration),
    Panic,
}

struct Rule {
    prefix: Vec<String>,
    replies: VecDeque<Reply>,
}

/// Answers commands by longest matching argv prefix. Each rule replays its
/// replies in order and then repeats the last one. Unmatched commands succeed
/// with empty output.
#[derive(Default)]
struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn on(&self, prefix: &str, replies: Vec<Reply>) -> &Self {
        let prefix: Vec<String> = prefix.split_whitespace().map(String::from).collect();
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|r| r.prefix != prefix);
        rules.push(Rule {
            prefix,
            replies: replies.into(),
        });
        self
    }

    fn reply_for(&self, spec: &CommandSpec) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .filter(|r| {
                let prefix: Vec<&str> = r.prefix.iter().map(String::as_str).collect();
                spec.starts_with(&prefix)
            })
            .max_by_key(|r| r.prefix.len());
        match rule {
            Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front().unwrap(),
            Some(rule) => rule.replies.front().cloned().unwrap_or(Reply::Ok("")),
            None => Reply::Ok(""),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn called(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    fn position(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c.starts_with(prefix))
            .unwrap_or_else(|| panic!("`{prefix}` was never run"))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        sink: &dyn LineSink,
    ) -> shipwright_exec::Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.to_string());
        match self.reply_for(spec) {
            Reply::Ok(text) => {
                for line in text.lines() {
                    sink.line(OutputStream::Stdout, line);
                }
                Ok(CommandOutput {
                    stdout: text.to_string(),
                    ..Default::default()
                })
            }
            Reply::Fail(message) => Err(ExecError::NonZeroExit {
                command: spec.to_string(),
                code: 1,
                message: message.to_string(),
            }),
            Reply::Hang(d) => {
                tokio::time::sleep(d).await;
                Ok(CommandOutput::default())
            }
            Reply::Panic => panic!("scripted runner exploded on `{spec}`"),
        }
    }
}

/// A runner where every step succeeds and HEAD moves from `prev` to `new`.
fn happy(prev: &'static str, new: &'static str) -> Arc<ScriptedRunner> {
    let runner = ScriptedRunner::default();
    runner
        .on("docker inspect", vec![Reply::Ok("true")])
        .on("git rev-parse --is-inside-work-tree", vec![Reply::Ok("true")])
        .on("git rev-parse HEAD", vec![Reply::Ok(prev), Reply::Ok(new)])
        .on("docker compose ps", vec![Reply::Ok(HEALTHY_PS)]);
    Arc::new(runner)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: TempDir,
    db: Arc<AuditDb>,
    runner: Arc<ScriptedRunner>,
    orch: Orchestrator,
}

impl Harness {
    fn record(&self, report: &UpdateReport) -> AuditRecord {
        self.db.get(report.audit_id).unwrap().expect("audit record")
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.runner.settle_secs = 0;
    config.deploy.health_interval_secs = 0;
    config.deploy.health_timeout_secs = 0;
    config.deploy.migrate_settle_secs = 0;
    config.git.backoff_base_secs = 0;
    config
}

fn harness(runner: Arc<ScriptedRunner>) -> Harness {
    harness_with(runner, UpdateGate::Fixed(true))
}

fn harness_with(runner: Arc<ScriptedRunner>, gate: UpdateGate) -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(AuditDb::open(&dir.path().join("audit.db")).unwrap());
    let orch = Orchestrator::new(
        dir.path(),
        fast_config(),
        gate,
        db.clone(),
        runner.clone(),
        runner.clone(),
    );
    Harness {
        _dir: dir,
        db,
        runner,
        orch,
    }
}

fn count_logs(report: &UpdateReport, kind: LogKind, needle: &str) -> usize {
    report
        .logs
        .iter()
        .filter(|e| e.kind == kind && e.message.contains(needle))
        .count()
}

// ---------------------------------------------------------------------------
// Success paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_update_is_recorded_as_completed() {
    let h = harness(happy("abc123", "def456"));

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.phase, Phase::Completed);
    assert_eq!(report.previous_commit.as_deref(), Some("abc123"));
    assert_eq!(report.new_commit.as_deref(), Some("def456"));
    assert!(!report.up_to_date);
    assert!(!report.logs.is_empty());

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::Completed);
    assert_eq!(rec.initiated_by, "alice");
    assert_eq!(rec.previous_commit.as_deref(), Some("abc123"));
    assert_eq!(rec.new_commit.as_deref(), Some("def456"));
    assert!(rec.completed_at.is_some());
    assert!(rec.duration_seconds.is_some());
    assert!(rec.error_message.is_none());
    assert_eq!(rec.logs.len(), report.logs.len());
    assert_eq!(rec.logs.last().unwrap().kind, LogKind::Success);
}

#[tokio::test]
async fn steps_run_in_order_without_rollback() {
    let h = harness(happy("abc123", "def456"));
    h.orch.perform_update("alice").await.unwrap();

    let r = &h.runner;
    let pull = r.position("git pull --rebase origin");
    let fsck = r.position("git fsck --no-progress");
    let build = r.position("docker compose build app");
    let up = r.position("docker compose up -d --no-deps app");
    let migrate = r.position("docker compose exec -T app npm run migrate");
    assert!(pull < fsck && fsck < build && build < up && up < migrate);
    assert!(!r.called("git reset"));
    assert!(!r.called("git stash"));
}

#[tokio::test]
async fn status_is_idle_after_completion() {
    let h = harness(happy("abc123", "def456"));
    let before = h.orch.status();
    assert_eq!(before.phase, Phase::Idle);
    assert!(before.can_update);

    let report = h.orch.perform_update("alice").await.unwrap();
    let after = h.orch.status();
    assert!(!after.in_progress);
    assert!(after.can_update);
    assert_eq!(after.phase, Phase::Completed);
    assert_eq!(after.audit_id, Some(report.audit_id));
    assert_eq!(after.logs.len(), report.logs.len());
}

#[tokio::test]
async fn unchanged_head_is_up_to_date_and_skips_rebuild() {
    let runner = happy("abc123", "abc123");
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(report.success);
    assert!(report.up_to_date);
    assert_eq!(report.phase, Phase::UpToDate);

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::Completed);
    assert!(rec.up_to_date);
    assert!(!h.runner.called("docker compose build"));
    assert!(!h.runner.called("docker compose up"));
    assert!(!h.runner.called("docker compose exec"));
}

#[tokio::test]
async fn local_changes_are_stashed_and_restored_when_up_to_date() {
    let runner = happy("abc123", "abc123");
    runner.on("git status --porcelain", vec![Reply::Ok(" M src/server.ts")]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(report.up_to_date);
    assert!(h.runner.called("git stash push --include-untracked -m shipwright-"));
    assert!(h.runner.called("git stash pop"));
    assert!(h.runner.position("git stash push") < h.runner.position("git pull"));
    assert_eq!(count_logs(&report, LogKind::Warning, "stashing"), 1);
}

#[tokio::test]
async fn transient_pull_failures_are_retried_with_two_delays() {
    let runner = happy("abc123", "def456");
    runner.on(
        "git pull",
        vec![
            Reply::Fail("could not resolve host"),
            Reply::Fail("could not resolve host"),
            Reply::Ok("Fast-forward"),
        ],
    );
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(report.success, "{:?}", report.error);
    assert_eq!(h.runner.count("git pull"), 3);
    assert_eq!(h.runner.count("git rebase --abort"), 2);
    assert_eq!(count_logs(&report, LogKind::Warning, "retrying in"), 2);
    // Command output is streamed into the attempt log.
    assert_eq!(count_logs(&report, LogKind::Info, "Fast-forward"), 1);
}

#[tokio::test]
async fn legacy_compose_binary_is_used_when_plugin_missing() {
    let runner = happy("abc123", "def456");
    runner
        .on("docker compose version", vec![Reply::Fail("unknown command")])
        .on("docker-compose ps", vec![Reply::Ok(HEALTHY_PS)]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(report.success, "{:?}", report.error);
    assert!(h.runner.called("docker-compose build app"));
    assert!(!h.runner.called("docker compose build"));
    // Probed once, not per command.
    assert_eq!(h.runner.count("docker-compose version"), 1);
}

// ---------------------------------------------------------------------------
// Failures after capture roll back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pull_exhaustion_rolls_back_to_previous_commit() {
    let runner = happy("abc123", "def456");
    runner.on("git pull", vec![Reply::Fail("CONFLICT (content)")]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(!report.success);
    assert_eq!(report.phase, Phase::RolledBack);
    assert_eq!(h.runner.count("git pull"), 3);
    assert_eq!(count_logs(&report, LogKind::Warning, "retrying in"), 2);
    assert!(h.runner.called("git reset --hard abc123"));
    assert!(h.runner.called("docker compose up -d --no-deps --build --force-recreate app"));
    assert!(!h.runner.called("docker compose build"));

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::RolledBack);
    assert!(rec
        .error_message
        .as_deref()
        .unwrap()
        .contains("Pull failed after 3 attempts"));
    assert!(!rec.manual_intervention);
    assert!(rec.completed_at.is_some());
}

#[tokio::test]
async fn stash_is_restored_after_rollback() {
    let runner = happy("abc123", "def456");
    runner
        .on("git status --porcelain", vec![Reply::Ok("?? notes.txt")])
        .on("git pull", vec![Reply::Fail("CONFLICT (content)")]);
    let h = harness(runner);

    h.orch.perform_update("alice").await.unwrap();
    assert!(h.runner.position("git reset --hard") < h.runner.position("git stash pop"));
}

#[tokio::test]
async fn health_timeout_rolls_back() {
    let runner = happy("abc123", "def456");
    runner.on("docker compose ps", vec![Reply::Ok(STARTING_PS)]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert_eq!(report.phase, Phase::RolledBack);
    assert!(report.error.as_deref().unwrap().contains("did not become healthy"));
    assert!(!h.runner.called("docker compose exec"));
    assert!(h.runner.called("git reset --hard abc123"));

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::RolledBack);
    assert_eq!(rec.previous_commit.as_deref(), Some("abc123"));
    assert_eq!(rec.new_commit.as_deref(), Some("def456"));
    assert!(rec.logs.iter().any(|e| e.kind == LogKind::Error));
    assert!(rec
        .logs
        .iter()
        .any(|e| e.kind == LogKind::Success && e.message.contains("Rolled back")));
}

#[tokio::test]
async fn failed_rollback_requires_manual_intervention() {
    let runner = happy("abc123", "def456");
    runner
        .on("docker compose ps", vec![Reply::Ok(STARTING_PS)])
        .on("git reset --hard", vec![Reply::Fail("index.lock exists")]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(!report.success);
    assert_eq!(report.phase, Phase::Failed);
    assert!(report.manual_intervention);

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::Failed);
    assert!(rec.manual_intervention);
    let message = rec.error_message.unwrap();
    assert!(message.contains("did not become healthy"), "{message}");
    assert!(message.contains("rollback"), "{message}");
}

#[tokio::test]
async fn failed_rollback_reports_the_stash_it_left() {
    let runner = happy("abc123", "def456");
    runner
        .on("git status --porcelain", vec![Reply::Ok(" M config/local.yml")])
        .on("docker compose ps", vec![Reply::Ok(STARTING_PS)])
        .on("git reset --hard", vec![Reply::Fail("index.lock exists")]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert_eq!(report.phase, Phase::Failed);
    assert!(!h.runner.called("git stash pop"));
    let label = format!("shipwright-{}", report.audit_id);
    assert_eq!(count_logs(&report, LogKind::Warning, &label), 1);
    assert!(h
        .record(&report)
        .logs
        .iter()
        .any(|e| e.kind == LogKind::Warning && e.message.contains(&label)));
}

#[tokio::test]
async fn migration_failure_rolls_back_and_flags_manual_intervention() {
    let runner = happy("abc123", "def456");
    runner.on(
        "docker compose exec -T app",
        vec![Reply::Fail("relation \"users\" already exists")],
    );
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert_eq!(report.phase, Phase::RolledBack);
    assert!(report.manual_intervention);

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::RolledBack);
    assert!(rec.manual_intervention);
    assert!(rec
        .error_message
        .unwrap()
        .contains("manual intervention required"));
}

#[tokio::test]
async fn health_regression_after_migration_rolls_back() {
    let runner = happy("abc123", "def456");
    runner.on(
        "docker compose ps",
        vec![Reply::Ok(HEALTHY_PS), Reply::Ok(UNHEALTHY_PS)],
    );
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert_eq!(report.phase, Phase::RolledBack);
    assert!(h.runner.called("docker compose exec -T app npm run migrate"));
    assert!(report.error.unwrap().contains("unhealthy"));
}

#[tokio::test]
async fn build_failure_rolls_back_before_touching_the_running_unit() {
    let runner = happy("abc123", "def456");
    runner.on("docker compose build", vec![Reply::Fail("npm ERR! code 1")]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert_eq!(report.phase, Phase::RolledBack);
    assert!(!h.runner.called("docker compose up -d --no-deps app"));
    assert!(h.runner.called("git reset --hard abc123"));
}

// ---------------------------------------------------------------------------
// Failures before capture do not roll back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unavailable_runner_fails_without_rollback() {
    let runner = happy("abc123", "def456");
    runner.on("docker inspect", vec![Reply::Ok("false")]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert_eq!(report.phase, Phase::Failed);
    assert!(h.runner.called("docker compose up -d runner"));
    assert!(!h.runner.called("git pull"));
    assert!(!h.runner.called("git reset"));

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::Failed);
    assert!(rec.previous_commit.is_none());
    assert!(rec.error_message.unwrap().contains("not available"));
}

#[tokio::test]
async fn stopped_runner_is_started_on_demand() {
    let runner = happy("abc123", "def456");
    runner.on(
        "docker inspect",
        vec![Reply::Ok("false"), Reply::Ok("true")],
    );
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(report.success, "{:?}", report.error);
    assert_eq!(h.runner.count("docker compose up -d runner"), 1);
}

#[tokio::test]
async fn non_checkout_fails_without_rollback() {
    let runner = happy("abc123", "def456");
    runner.on(
        "git rev-parse --is-inside-work-tree",
        vec![Reply::Fail("fatal: not a git repository")],
    );
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert_eq!(report.phase, Phase::Failed);
    assert!(!h.runner.called("git reset"));
    assert!(!h.runner.called("git pull"));

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::Failed);
    assert!(rec.previous_commit.is_none());
    assert!(rec.error_message.unwrap().contains("not a git checkout"));
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_gate_refuses_without_record_or_logs() {
    let h = harness_with(happy("abc123", "def456"), UpdateGate::Fixed(false));

    let err = h.orch.perform_update("alice").await.unwrap_err();
    assert!(matches!(err, UpdateError::UpdatesDisabled(_)), "{err:?}");
    assert!(h.db.list(10).unwrap().is_empty());
    assert!(h.runner.calls().is_empty());

    let status = h.orch.status();
    assert!(status.logs.is_empty());
    assert!(!status.in_progress);
    assert!(!status.can_update);
}

#[tokio::test]
async fn concurrent_request_is_rejected() {
    let runner = happy("abc123", "def456");
    runner.on(
        "docker compose build",
        vec![Reply::Hang(Duration::from_millis(100))],
    );
    let h = harness(runner);

    let (first, second) = tokio::join!(
        h.orch.perform_update("alice"),
        h.orch.perform_update("bob")
    );
    assert!(first.unwrap().success);
    assert!(matches!(second, Err(UpdateError::AlreadyInProgress)));
    assert_eq!(h.db.list(10).unwrap().len(), 1);
}

#[tokio::test]
async fn status_shows_live_phase_and_logs_while_running() {
    let runner = happy("abc123", "def456");
    runner.on(
        "docker compose build",
        vec![Reply::Hang(Duration::from_millis(300))],
    );
    let h = harness(runner);

    let orch = h.orch.clone();
    let task = tokio::spawn(async move { orch.perform_update("alice").await });

    let mut seen = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = h.orch.status();
        if status.phase == Phase::Rebuilding {
            seen = Some(status);
            break;
        }
    }
    let status = seen.expect("never observed the rebuilding phase");
    assert!(status.in_progress);
    assert!(!status.can_update);
    assert!(!status.logs.is_empty());

    // Step entries reach the in-progress record while the build still runs.
    let id = status.audit_id.unwrap();
    let mut rec = h.db.get(id).unwrap().unwrap();
    for _ in 0..20 {
        if !rec.logs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        rec = h.db.get(id).unwrap().unwrap();
    }
    assert_eq!(rec.status, AuditStatus::InProgress);
    assert!(!rec.logs.is_empty());

    let report = task.await.unwrap().unwrap();
    assert!(report.success);
    assert!(!h.orch.status().in_progress);
}

#[tokio::test]
async fn guard_is_released_after_a_failed_attempt() {
    let runner = happy("abc123", "def456");
    runner.on("git pull", vec![Reply::Fail("network unreachable")]);
    let h = harness(runner);

    let first = h.orch.perform_update("alice").await.unwrap();
    assert!(!first.success);
    let second = h.orch.perform_update("alice").await;
    assert!(second.is_ok());
    assert_eq!(h.db.list(10).unwrap().len(), 2);
}

#[tokio::test]
async fn pipeline_panic_is_recorded_and_releases_guard() {
    let runner = happy("abc123", "def456");
    runner.on("docker compose build", vec![Reply::Panic]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(!report.success);
    assert!(report.manual_intervention);
    assert!(report.error.as_deref().unwrap().contains("aborted unexpectedly"));

    let rec = h.record(&report);
    assert_eq!(rec.status, AuditStatus::Failed);
    assert!(rec.manual_intervention);
    assert!(rec.completed_at.is_some());
    assert!(!h.orch.status().in_progress);

    h.runner
        .on("docker compose build", vec![Reply::Ok("built")])
        .on("git rev-parse HEAD", vec![Reply::Ok("def456"), Reply::Ok("fed789")]);
    let again = h.orch.perform_update("alice").await.unwrap();
    assert!(again.success, "{:?}", again.error);
}

#[tokio::test]
async fn pipeline_panic_reports_the_stash_it_left() {
    let runner = happy("abc123", "def456");
    runner
        .on("git status --porcelain", vec![Reply::Ok("?? notes.txt")])
        .on("docker compose build", vec![Reply::Panic]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(report.error.as_deref().unwrap().contains("aborted unexpectedly"));
    assert!(!h.runner.called("git stash pop"));
    let label = format!("shipwright-{}", report.audit_id);
    assert_eq!(count_logs(&report, LogKind::Warning, &label), 1);
}

#[tokio::test]
async fn restored_stash_is_not_reported_as_left() {
    let runner = happy("abc123", "abc123");
    runner.on("git status --porcelain", vec![Reply::Ok("?? notes.txt")]);
    let h = harness(runner);

    let report = h.orch.perform_update("alice").await.unwrap();
    assert!(report.up_to_date);
    assert_eq!(count_logs(&report, LogKind::Warning, "left in stash"), 0);
}

// ---------------------------------------------------------------------------
// Container helper
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unit_status_returns_raw_ps_output() {
    let runner = ScriptedRunner::default();
    runner.on("docker compose ps app", vec![Reply::Ok(HEALTHY_PS)]);
    let runner = Arc::new(runner);
    let helper = ContainerHelper::new(runner.clone(), Duration::from_secs(5));

    assert_eq!(helper.status("app").await.unwrap(), HEALTHY_PS);
    assert_eq!(helper.health("app").await.unwrap(), UnitHealth::Healthy);
    assert_eq!(runner.count("docker compose ps app"), 2);
}
