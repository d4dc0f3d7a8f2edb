pub mod audits;
pub mod update;
