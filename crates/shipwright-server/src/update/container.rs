//! Container operations expressed as `docker` / `docker compose` argv.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shipwright_exec::{CommandOutput, CommandRunner, CommandSpec, ExecError, LineSink, NullSink};
use tokio::sync::OnceCell;
use tracing::debug;

/// Which compose front-end is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose` (v2 plugin).
    Plugin,
    /// `docker-compose` (standalone v1 binary).
    Legacy,
}

impl ComposeFlavor {
    fn argv(self) -> &'static [&'static str] {
        match self {
            ComposeFlavor::Plugin => &["docker", "compose"],
            ComposeFlavor::Legacy => &["docker-compose"],
        }
    }
}

impl fmt::Display for ComposeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Health of a compose service as reported by `compose ps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitHealth {
    Healthy,
    Starting,
    Unhealthy,
    Down,
}

impl UnitHealth {
    /// Classify `compose ps <service>` output.
    ///
    /// Works on both the plugin and the legacy table layout: a healthcheck
    /// verdict in parentheses wins, otherwise a bare `Up` counts as healthy.
    pub fn parse(ps_output: &str) -> Self {
        let text = ps_output.to_ascii_lowercase();
        if text.contains("unhealthy") {
            UnitHealth::Unhealthy
        } else if text.contains("health: starting") || text.contains("(starting)") {
            UnitHealth::Starting
        } else if text.contains("(healthy)") {
            UnitHealth::Healthy
        } else if text.contains("restarting") {
            UnitHealth::Down
        } else if text.split_whitespace().any(|w| w == "up") {
            UnitHealth::Healthy
        } else {
            UnitHealth::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitHealth::Healthy => "healthy",
            UnitHealth::Starting => "starting",
            UnitHealth::Unhealthy => "unhealthy",
            UnitHealth::Down => "down",
        }
    }
}

impl fmt::Display for UnitHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags for `compose up`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpOptions {
    pub build: bool,
    pub force_recreate: bool,
}

/// Container and compose operations against one execution target.
///
/// The controller owns two of these: one on the host (to start the runner
/// itself) and one inside the runner (to deploy the application unit).
pub struct ContainerHelper {
    runner: Arc<dyn CommandRunner>,
    project_dir: Option<String>,
    timeout: Duration,
    flavor: OnceCell<ComposeFlavor>,
}

impl ContainerHelper {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            project_dir: None,
            timeout,
            flavor: OnceCell::new(),
        }
    }

    /// Run compose commands from `dir`.
    pub fn in_project(mut self, dir: impl Into<String>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// The compose front-end, detected once and then memoized.
    pub async fn flavor(&self) -> Result<ComposeFlavor, ExecError> {
        self.flavor
            .get_or_try_init(|| async {
                let plugin = self
                    .run(CommandSpec::new(["docker", "compose", "version"]), &NullSink)
                    .await;
                if plugin.is_ok() {
                    return Ok(ComposeFlavor::Plugin);
                }
                self.run(CommandSpec::new(["docker-compose", "version"]), &NullSink)
                    .await
                    .map(|_| ComposeFlavor::Legacy)
            })
            .await
            .copied()
    }

    /// True when the named container exists and is running.
    pub async fn is_running(&self, name: &str) -> Result<bool, ExecError> {
        let spec = CommandSpec::new(["docker", "inspect", "-f", "{{.State.Running}}", name]);
        match self.runner.run(&spec.timeout(self.timeout), &NullSink).await {
            Ok(out) => Ok(out.trimmed() == "true"),
            // `docker inspect` exits non-zero for an unknown container.
            Err(ExecError::NonZeroExit { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Make sure `name` is running, starting compose `service` if it is not.
    pub async fn ensure_running(
        &self,
        name: &str,
        service: &str,
        settle: Duration,
        sink: &dyn LineSink,
    ) -> Result<(), ExecError> {
        if self.is_running(name).await? {
            return Ok(());
        }
        debug!(container = name, service, "starting container");
        self.compose(&["up", "-d", service], self.timeout, sink)
            .await?;
        tokio::time::sleep(settle).await;
        if self.is_running(name).await? {
            Ok(())
        } else {
            Err(ExecError::Process(format!(
                "container `{name}` is still not running after starting service `{service}`"
            )))
        }
    }

    pub async fn build(
        &self,
        unit: &str,
        timeout: Duration,
        sink: &dyn LineSink,
    ) -> Result<CommandOutput, ExecError> {
        self.compose(&["build", unit], timeout, sink).await
    }

    /// `compose up -d --no-deps`, replacing only `unit`.
    pub async fn up(
        &self,
        unit: &str,
        opts: UpOptions,
        timeout: Duration,
        sink: &dyn LineSink,
    ) -> Result<CommandOutput, ExecError> {
        let mut args = vec!["up", "-d", "--no-deps"];
        if opts.build {
            args.push("--build");
        }
        if opts.force_recreate {
            args.push("--force-recreate");
        }
        args.push(unit);
        self.compose(&args, timeout, sink).await
    }

    /// Raw `compose ps <unit>` output.
    pub async fn status(&self, unit: &str) -> Result<String, ExecError> {
        let out = self.compose(&["ps", unit], self.timeout, &NullSink).await?;
        Ok(out.stdout)
    }

    pub async fn health(&self, unit: &str) -> Result<UnitHealth, ExecError> {
        Ok(UnitHealth::parse(&self.status(unit).await?))
    }

    /// `compose exec -T <unit> <argv…>`.
    pub async fn exec(
        &self,
        unit: &str,
        argv: &[String],
        timeout: Duration,
        sink: &dyn LineSink,
    ) -> Result<CommandOutput, ExecError> {
        let mut args: Vec<&str> = vec!["exec", "-T", unit];
        args.extend(argv.iter().map(String::as_str));
        self.compose(&args, timeout, sink).await
    }

    async fn compose(
        &self,
        args: &[&str],
        timeout: Duration,
        sink: &dyn LineSink,
    ) -> Result<CommandOutput, ExecError> {
        let flavor = self.flavor().await?;
        let mut argv: Vec<&str> = flavor.argv().to_vec();
        argv.extend_from_slice(args);
        self.run(CommandSpec::new(argv).timeout(timeout), sink).await
    }

    async fn run(&self, spec: CommandSpec, sink: &dyn LineSink) -> Result<CommandOutput, ExecError> {
        let spec = match &self.project_dir {
            Some(dir) => spec.in_dir(dir.clone()),
            None => spec,
        };
        self.runner.run(&spec, sink).await
    }
}
