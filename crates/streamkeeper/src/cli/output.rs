//! Output formatting for CLI commands.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use streamkeeper_protocol::{Job, JobStatus};

/// Format a file size in human-readable form
///
/// Examples:
/// - 500 -> "500 B"
/// - 1536000 -> "1.5 MB"
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Success => Color::Green,
        JobStatus::Failure => Color::Red,
        JobStatus::Revoked => Color::DarkGrey,
        JobStatus::Retry => Color::Yellow,
        JobStatus::Started => Color::Cyan,
        JobStatus::Pending => Color::Reset,
    }
}

/// Print a table with headers and rows
pub fn print_table(headers: &[&str], rows: Vec<Vec<Cell>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)));
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn job_row(job: &Job) -> Vec<Cell> {
    vec![
        Cell::new(job.job_id.as_str()),
        Cell::new(job.status).fg(status_color(job.status)),
        Cell::new(job.request.target.as_str()),
        Cell::new(job.attempts),
        Cell::new(format_timestamp(Some(job.submitted_at))),
        Cell::new(
            job.result
                .error_code
                .map(|c| c.to_string())
                .unwrap_or_default(),
        ),
    ]
}

pub const JOB_HEADERS: [&str; 6] = ["JOB", "STATUS", "TARGET", "ATTEMPTS", "SUBMITTED", "ERROR"];

pub fn print_job_detail(job: &Job) {
    println!("Job:        {}", job.job_id);
    println!("Status:     {}", job.status);
    println!("Target:     {}", job.request.target.as_str());
    if let Some(key) = &job.watcher_key {
        println!("Watcher:    {}", key);
    }
    println!("Attempts:   {}", job.attempts);
    println!("Submitted:  {}", format_timestamp(Some(job.submitted_at)));
    println!("Started:    {}", format_timestamp(job.result.started_at));
    println!("Ended:      {}", format_timestamp(job.result.ended_at));
    if let Some(rc) = job.result.returncode {
        println!("Exit code:  {}", rc);
    }
    if let Some(next) = job.next_attempt_at {
        println!("Next try:   {}", format_timestamp(Some(next)));
    }
    if let Some(code) = job.result.error_code {
        println!("Error:      {}", code);
    }
    if let Some(message) = &job.result.error_message {
        println!("Message:    {}", message);
    }
    if !job.result.files.is_empty() {
        println!("Files:");
        for file in &job.result.files {
            println!("  {}", file);
        }
    }
    if !job.result.uploads.is_empty() {
        println!("Uploads:");
        for upload in &job.result.uploads {
            match (&upload.location, &upload.error) {
                (Some(location), _) if upload.ok => println!("  {} -> {}", upload.file, location),
                (_, Some(error)) => println!("  {} FAILED: {}", upload.file, error),
                _ => println!("  {}", upload.file),
            }
        }
    }
}
