use std::path::Path;

use anyhow::Context;
use shipwright_server::update::Phase;
use shipwright_server::AppState;

use crate::output::{print_json, print_logs, short_commit};

pub fn run(root: &Path, actor: Option<String>, json: bool) -> anyhow::Result<()> {
    let actor = actor
        .or_else(|| std::env::var("USER").ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "cli".to_string());

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let state = AppState::open(root.to_path_buf())?;
        let report = state
            .orchestrator
            .perform_update(&actor)
            .await
            .context("update was not started")?;
        Ok::<_, anyhow::Error>(report)
    })?;

    if json {
        print_json(&report)?;
    } else {
        print_logs(&report.logs);
        println!();
        let prev = short_commit(report.previous_commit.as_deref());
        let new = short_commit(report.new_commit.as_deref());
        match report.phase {
            Phase::Completed => println!("Updated {prev} -> {new} (audit {})", report.audit_id),
            Phase::UpToDate => println!("Already up to date at {prev} (audit {})", report.audit_id),
            Phase::RolledBack => println!("Rolled back to {prev} (audit {})", report.audit_id),
            _ => println!("Update failed (audit {})", report.audit_id),
        }
        if report.manual_intervention {
            println!("Manual intervention required: the deployment may be inconsistent.");
        }
    }

    if !report.success {
        anyhow::bail!(
            "update failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
