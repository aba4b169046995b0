//! Output formatting for CLI commands.

use colored::{ColoredString, Colorize};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::pipeline::StageStatus;
use crate::services::CriticalityLevel;

/// Output mode for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
    Markdown,
}

impl OutputMode {
    pub fn from_flags(json: bool, md: bool) -> Self {
        if json {
            OutputMode::Json
        } else if md {
            OutputMode::Markdown
        } else {
            OutputMode::Human
        }
    }
}

/// Detail level for CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Brief,
    Standard,
    Full,
}

impl DetailLevel {
    pub fn from_flags(brief: bool, full: bool) -> Self {
        if brief {
            DetailLevel::Brief
        } else if full {
            DetailLevel::Full
        } else {
            DetailLevel::Standard
        }
    }
}

/// Print a single item as pretty-printed JSON.
pub fn output_json<T: Serialize>(item: &T) {
    match serde_json::to_string_pretty(item) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to serialize to JSON: {}", e)),
    }
}

/// Print a formatted table with headers and rows.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    if rows.is_empty() {
        println!("{}", "None.".dimmed());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(headers);

    for row in rows {
        table.add_row(row);
    }

    println!("{table}");
}

/// Print a Markdown table.
pub fn print_md_table(headers: &[&str], rows: &[Vec<String>]) {
    println!("| {} |", headers.join(" | "));
    println!("|{}", "---|".repeat(headers.len()));
    for row in rows {
        println!("| {} |", row.join(" | ").replace('\n', " "));
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "OK".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "Error:".red().bold(), msg);
}

pub fn print_header(title: &str) {
    println!("\n{}\n", title.bold());
}

pub fn print_kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

pub fn print_hint(msg: &str) {
    println!("{}", msg.dimmed());
}

/// Health score colored by its criticality tier.
pub fn colored_score(score: u32, level: CriticalityLevel) -> ColoredString {
    let text = format!("{score}/100 ({})", level.as_str());
    match level {
        CriticalityLevel::Healthy => text.green().bold(),
        CriticalityLevel::MinorIssues => text.green(),
        CriticalityLevel::ModerateIssues => text.yellow(),
        CriticalityLevel::MajorIssues => text.red(),
        CriticalityLevel::Critical => text.red().bold(),
    }
}

pub fn colored_status(status: StageStatus) -> ColoredString {
    match status {
        StageStatus::Success => "Success".green(),
        StageStatus::Failed => "Failed".red().bold(),
        StageStatus::Pending => "Pending".dimmed(),
        StageStatus::Executing => "Executing".yellow(),
    }
}
