//! Self-update controller.
//!
//! ```text
//! perform_update ──► SingleFlight guard ──► feature gate ──► audit record
//!                                                              │
//!          ┌───────────────────────────────────────────────────┘
//!          ▼
//!   ensure runner ─► validate ─► capture HEAD ─► stash ─► pull (retry)
//!          ─► fsck ─► build ─► up --no-deps ─► wait healthy ─► migrate
//!          ─► final health ─► completed
//!                      │ any step after capture fails
//!                      ▼
//!          reset --hard <previous> ─► up --build --force-recreate
//! ```
//!
//! Every command runs inside the runner container through a
//! [`CommandRunner`](shipwright_exec::CommandRunner); only starting the runner
//! itself happens on the host.

pub mod container;
pub mod guard;
pub mod log_sink;
pub mod orchestrator;
pub mod writer;

pub use container::{ComposeFlavor, ContainerHelper, UnitHealth, UpOptions};
pub use guard::{is_truthy, FlightGuard, SingleFlight, UpdateGate};
pub use log_sink::LogSink;
pub use orchestrator::{Orchestrator, Phase, UpdateError, UpdateReport, UpdateStatus};
pub use writer::AuditWriter;

#[cfg(test)]
mod tests;
