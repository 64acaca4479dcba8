//! Colored CLI display utilities for chat output.
//!
//! This module provides functions for printing colored, formatted output
//! to the terminal while a turn streams.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::conversation::{ToolActivity, ToolStatus, TurnUpdate, UsageStats};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 80;

/// Truncate a string to a maximum number of characters, adding ellipsis if
/// truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let head: String = s.chars().take(max_len - 3).collect();
    format!("{head}...")
}

/// Format tool input for display, truncating long values.
#[must_use]
pub fn format_tool_input(input: &serde_json::Value, raw_mode: bool) -> String {
    match input {
        serde_json::Value::Object(map) => {
            let pairs: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    let value_str = match v {
                        serde_json::Value::String(s) => truncate(s, 50, raw_mode),
                        other => truncate(&other.to_string(), 50, raw_mode),
                    };
                    format!("{k}={value_str}")
                })
                .collect();
            pairs.join(", ")
        }
        other => truncate(&other.to_string(), DEFAULT_MAX_LEN, raw_mode),
    }
}

/// Print session start information.
pub fn print_session_start(session_id: &str, raw_mode: bool) {
    println!(
        "{} {} session={}",
        timestamp().dimmed(),
        "[SESSION]".blue().bold(),
        truncate(session_id, 20, raw_mode).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print the end of a turn with cumulative usage.
pub fn print_turn_end(
    success: bool,
    usage: UsageStats,
    cost_usd: f64,
    session_id: Option<&str>,
    raw_mode: bool,
) {
    let session = session_id.map_or(String::new(), |id| {
        format!("session_id={}", truncate(id, 20, raw_mode))
    });
    let tokens = format!(
        "tokens={} (in={}, out={}) cost=${cost_usd:.4}",
        usage.total_tokens(),
        usage.input_tokens(),
        usage.output_tokens()
    );
    let label = if success {
        "[SESSION]".blue().bold().to_string()
    } else {
        "[SESSION]".red().bold().to_string()
    };
    let outcome = if success {
        "Turn completed"
    } else {
        "Turn ended with error"
    };
    println!(
        "\n{} {label} {outcome} {} {}",
        timestamp().dimmed(),
        tokens.dimmed(),
        session.dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print a tool invocation.
pub fn print_tool_started(activity: &ToolActivity, raw_mode: bool) {
    println!(
        "\n{} {} ({})",
        "[TOOL]".cyan().bold(),
        activity.base_name().bold(),
        format_tool_input(&activity.input, raw_mode).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print a tool reaching its final state.
pub fn print_tool_finished(activity: &ToolActivity, raw_mode: bool) {
    let id_short = truncate(&activity.id, 12, raw_mode);
    let output = truncate(activity.output.as_deref().unwrap_or_default(), 150, raw_mode);
    if activity.status == ToolStatus::Error {
        println!("{} {} {}", "[RESULT]".red().bold(), id_short.dimmed(), output);
    } else {
        println!("{} {} {}", "[RESULT]".green().bold(), id_short.dimmed(), output);
    }
    let _ = io::stdout().flush();
}

/// Print text content.
pub fn print_text(text: &str) {
    print!("{text}");
    let _ = io::stdout().flush();
}

/// Print one incremental turn update.
///
/// `Finished` is left to the caller, which holds the usage totals.
pub fn print_update(update: &TurnUpdate, raw_mode: bool) {
    match update {
        TurnUpdate::SessionStarted(session_id) => print_session_start(session_id, raw_mode),
        TurnUpdate::Text(text) => print_text(text),
        TurnUpdate::ToolStarted(activity) => print_tool_started(activity, raw_mode),
        TurnUpdate::ToolFinished(activity) => print_tool_finished(activity, raw_mode),
        TurnUpdate::Finished { .. } => {}
    }
}

/// Print agent diagnostic output.
pub fn print_stderr(data: &str) {
    eprintln!("{} {}", "[STDERR]".yellow().bold(), data.trim_end().dimmed());
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}
