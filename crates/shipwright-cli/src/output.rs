use serde::Serialize;
use shipwright_core::audit::{LogEntry, LogKind};

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

/// One log entry as `HH:MM:SS [kind] message`.
pub fn format_log(entry: &LogEntry) -> String {
    let tag = match entry.kind {
        LogKind::Info => "info",
        LogKind::Warning => "warn",
        LogKind::Success => " ok ",
        LogKind::Error => "FAIL",
    };
    format!(
        "{} [{tag}] {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.message
    )
}

pub fn print_logs(entries: &[LogEntry]) {
    for entry in entries {
        println!("{}", format_log(entry));
    }
}

/// First 7 characters of a commit hash, or `-`.
pub fn short_commit(commit: Option<&str>) -> String {
    match commit {
        Some(c) => c.chars().take(7).collect(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_line_has_tag_and_message() {
        let entry = LogEntry::new(LogKind::Warning, "retrying in 4s");
        let line = format_log(&entry);
        assert!(line.contains("[warn] retrying in 4s"), "{line}");
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(
            short_commit(Some("3f786850e387550fdab836ed7e6dc881de23001b")),
            "3f78685"
        );
        assert_eq!(short_commit(None), "-");
    }
}
