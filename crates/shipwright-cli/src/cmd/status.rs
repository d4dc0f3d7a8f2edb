use std::time::Duration;

use anyhow::Context;
use shipwright_core::audit::LogEntry;

use crate::output::{print_json, print_logs};

/// Log entries shown in text mode.
const TAIL: usize = 20;

pub fn run(url: &str, json: bool) -> anyhow::Result<()> {
    let endpoint = format!("{}/api/update/status", url.trim_end_matches('/'));
    let body: serde_json::Value = ureq::get(&endpoint)
        .timeout(Duration::from_secs(10))
        .call()
        .with_context(|| format!("failed to reach controller at {url}"))?
        .into_json()
        .context("controller returned an invalid status response")?;

    if json {
        return print_json(&body);
    }

    let phase = body["phase"].as_str().unwrap_or("unknown");
    let in_progress = body["in_progress"].as_bool().unwrap_or(false);
    let can_update = body["can_update"].as_bool().unwrap_or(false);
    println!(
        "phase:      {phase}{}",
        if in_progress { " (in progress)" } else { "" }
    );
    println!("audit:      {}", body["audit_id"].as_str().unwrap_or("-"));
    println!("can update: {}", if can_update { "yes" } else { "no" });

    let logs: Vec<LogEntry> = serde_json::from_value(body["logs"].clone()).unwrap_or_default();
    if !logs.is_empty() {
        println!();
        let skip = logs.len().saturating_sub(TAIL);
        print_logs(&logs[skip..]);
    }
    Ok(())
}
