use std::path::Path;

use anyhow::Context;
use clap::Subcommand;
use shipwright_core::audit::{AuditDb, AuditRecord, AuditRecorder, AuditStatus};
use shipwright_core::config::Config;
use shipwright_core::CoreError;
use uuid::Uuid;

use crate::output::{print_json, print_logs, print_table, short_commit};

#[derive(Subcommand)]
pub enum AuditSubcommand {
    /// List recent update attempts, newest first
    List {
        /// Maximum number of records
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Only records with this status (pending, in_progress, completed, failed, rolled_back)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one attempt with its full log
    Show {
        /// Audit record id
        id: String,
    },

    /// Show the most recent attempt
    Latest,
}

pub fn run(root: &Path, subcmd: AuditSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        AuditSubcommand::List { limit, status } => list(root, limit, status.as_deref(), json),
        AuditSubcommand::Show { id } => show(root, &id, json),
        AuditSubcommand::Latest => latest(root, json),
    }
}

/// Open the audit database, or `None` if no attempt was ever recorded.
fn open_db(root: &Path) -> anyhow::Result<Option<AuditDb>> {
    let config = Config::load(root).context("failed to load config")?;
    let path = config.audit_db_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let db = AuditDb::open(&path).with_context(|| {
        format!(
            "failed to open audit database {} (a running `shipwright serve` holds it; use its HTTP API)",
            path.display()
        )
    })?;
    Ok(Some(db))
}

fn list(root: &Path, limit: usize, status: Option<&str>, json: bool) -> anyhow::Result<()> {
    let status = status.map(str::parse::<AuditStatus>).transpose()?;
    let records = match open_db(root)? {
        None => Vec::new(),
        Some(db) => match status {
            Some(s) => {
                let mut records = db.list_by_status(s)?;
                records.truncate(limit);
                records
            }
            None => db.list(limit)?,
        },
    };

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No update attempts recorded.");
        return Ok(());
    }

    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.status.to_string(),
                r.initiated_by.clone(),
                short_commit(r.previous_commit.as_deref()),
                short_commit(r.new_commit.as_deref()),
                r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                r.duration_seconds
                    .map(|d| format!("{d}s"))
                    .unwrap_or_else(|| "-".into()),
                flags(r),
            ]
        })
        .collect();
    print_table(
        &["ID", "STATUS", "BY", "FROM", "TO", "STARTED", "TOOK", "NOTES"],
        rows,
    );
    Ok(())
}

fn flags(r: &AuditRecord) -> String {
    let mut notes = Vec::new();
    if r.up_to_date {
        notes.push("up-to-date");
    }
    if r.manual_intervention {
        notes.push("manual-intervention");
    }
    notes.join(",")
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let id = Uuid::parse_str(id).map_err(|_| anyhow::anyhow!("invalid audit id '{id}'"))?;
    let record = open_db(root)?
        .map(|db| db.get(id))
        .transpose()?
        .flatten()
        .ok_or(CoreError::AuditNotFound(id))?;
    print_record(&record, json)
}

fn latest(root: &Path, json: bool) -> anyhow::Result<()> {
    let record = open_db(root)?.map(|db| db.latest()).transpose()?.flatten();
    match record {
        Some(record) => print_record(&record, json),
        None if json => print_json(&serde_json::Value::Null),
        None => {
            println!("No update attempts recorded.");
            Ok(())
        }
    }
}

fn print_record(r: &AuditRecord, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(r);
    }
    println!("id:           {}", r.id);
    println!("status:       {}", r.status);
    println!("initiated by: {}", r.initiated_by);
    println!(
        "commits:      {} -> {}",
        r.previous_commit.as_deref().unwrap_or("-"),
        r.new_commit.as_deref().unwrap_or("-")
    );
    println!("started:      {}", r.started_at.to_rfc3339());
    if let Some(done) = r.completed_at {
        println!(
            "completed:    {} ({}s)",
            done.to_rfc3339(),
            r.duration_seconds.unwrap_or(0)
        );
    }
    let notes = flags(r);
    if !notes.is_empty() {
        println!("notes:        {notes}");
    }
    if let Some(err) = &r.error_message {
        println!("error:        {err}");
    }
    if !r.logs.is_empty() {
        println!();
        print_logs(&r.logs);
    }
    Ok(())
}
