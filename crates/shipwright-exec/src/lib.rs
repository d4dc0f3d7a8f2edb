//! `shipwright-exec`: command execution against a sandbox target.
//!
//! # Architecture
//!
//! ```text
//! CommandSpec          ← argv + timeout + optional working directory
//!     │
//!     ▼
//! Sandbox              ← turns a spec into a process: `docker exec <runner> …`
//!     │                   or a local process on the controller host
//!     ▼
//! Executor             ← spawns, streams stdout/stderr lines into a LineSink,
//!     │                   enforces the timeout and the output ceiling
//!     ▼
//! CommandOutput | ExecError
//! ```
//!
//! Callers depend on the [`CommandRunner`] trait so tests can substitute a
//! scripted runner. [`retry`] holds the backoff and poll-until-deadline
//! combinators the update pipeline composes with.

pub mod error;
pub mod executor;
pub mod retry;
pub mod sandbox;

pub use error::ExecError;
pub use executor::{
    CommandOutput, CommandRunner, CommandSpec, Executor, LineSink, NullSink, OutputStream,
};
pub use retry::{poll_until, retry_with_backoff, Backoff, PollError, RetryExhausted};
pub use sandbox::{DockerExec, Local, Sandbox};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ExecError>;
