use tokio::process::Command;

use crate::executor::CommandSpec;
use crate::{ExecError, Result};

/// An execution target that can turn a [`CommandSpec`] into a process.
///
/// Arguments are passed as a vector all the way to the process, never joined
/// into a shell string.
pub trait Sandbox: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    fn command(&self, spec: &CommandSpec) -> Result<Command>;
}

// ─── DockerExec ──────────────────────────────────────────────────────────

/// Runs commands inside a long-lived runner container via `docker exec`.
#[derive(Debug, Clone)]
pub struct DockerExec {
    container: String,
}

impl DockerExec {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
        }
    }
}

impl Sandbox for DockerExec {
    fn name(&self) -> &str {
        &self.container
    }

    fn command(&self, spec: &CommandSpec) -> Result<Command> {
        if spec.argv.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let mut cmd = Command::new("docker");
        cmd.arg("exec");
        if let Some(dir) = &spec.workdir {
            cmd.arg("-w").arg(dir);
        }
        cmd.arg(&self.container).args(&spec.argv);
        Ok(cmd)
    }
}

// ─── Local ───────────────────────────────────────────────────────────────

/// Runs commands directly on the controller host.
///
/// Used for the few operations that must happen outside the runner (starting
/// the runner itself) and by tests.
#[derive(Debug, Clone, Default)]
pub struct Local;

impl Sandbox for Local {
    fn name(&self) -> &str {
        "local"
    }

    fn command(&self, spec: &CommandSpec) -> Result<Command> {
        let (program, args) = spec.argv.split_first().ok_or(ExecError::EmptyCommand)?;

        // Bare names are resolved up front so a missing tool reads as such
        // instead of a generic spawn failure.
        let resolved = if program.contains(std::path::MAIN_SEPARATOR) {
            std::path::PathBuf::from(program)
        } else {
            which::which(program).map_err(|_| ExecError::ProgramNotFound(program.clone()))?
        };

        let mut cmd = Command::new(resolved);
        cmd.args(args);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv_of(cmd: &Command) -> Vec<String> {
        let std_cmd = cmd.as_std();
        std::iter::once(std_cmd.get_program())
            .chain(std_cmd.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn docker_exec_passes_argv_verbatim() {
        let sandbox = DockerExec::new("runner");
        let spec = CommandSpec::new(["git", "commit", "-m", "a; rm -rf /"]);
        let cmd = sandbox.command(&spec).unwrap();
        assert_eq!(
            argv_of(&cmd),
            vec!["docker", "exec", "runner", "git", "commit", "-m", "a; rm -rf /"]
        );
    }

    #[test]
    fn docker_exec_sets_workdir_flag() {
        let sandbox = DockerExec::new("runner");
        let spec = CommandSpec::new(["git", "status"]).in_dir("/workspace");
        let cmd = sandbox.command(&spec).unwrap();
        assert_eq!(
            argv_of(&cmd),
            vec!["docker", "exec", "-w", "/workspace", "runner", "git", "status"]
        );
    }

    #[test]
    fn empty_argv_is_rejected() {
        let spec = CommandSpec::new(Vec::<String>::new());
        assert!(matches!(
            DockerExec::new("r").command(&spec),
            Err(ExecError::EmptyCommand)
        ));
        assert!(matches!(Local.command(&spec), Err(ExecError::EmptyCommand)));
    }

    #[test]
    fn local_reports_missing_program() {
        let spec = CommandSpec::new(["__nonexistent_command_xyz__"]);
        match Local.command(&spec) {
            Err(ExecError::ProgramNotFound(p)) => assert_eq!(p, "__nonexistent_command_xyz__"),
            other => panic!("expected ProgramNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
