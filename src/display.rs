//! Colored CLI display utilities for relay output.
//!
//! This module provides functions for printing colored, formatted status
//! lines to the terminal while a relay is being supervised.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::supervisor::{MetricsSnapshot, StreamSnapshot, StreamState};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_len` characters, adding an ellipsis if
/// truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

fn or_dash<T: std::fmt::Display>(value: Option<T>, unit: &str) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v}{unit}"))
}

/// Render metrics as `key=value` pairs; unknown values print as `-`.
#[must_use]
pub fn format_metrics(metrics: &MetricsSnapshot) -> String {
    format!(
        "bitrate={} fps={} cpu={} mem={} dropped={}",
        or_dash(metrics.bitrate_kbps.map(|v| format!("{v:.1}")), "kbps"),
        or_dash(metrics.fps.map(|v| format!("{v:.1}")), ""),
        or_dash(metrics.cpu_percent.map(|v| format!("{v:.1}")), "%"),
        or_dash(metrics.memory_mb.map(|v| format!("{v:.1}")), "MB"),
        metrics.dropped_frames
    )
}

fn state_label(state: StreamState) -> String {
    let label = format!("[{}]", state.as_str().to_uppercase());
    match state {
        StreamState::Running => label.green().bold().to_string(),
        StreamState::Starting | StreamState::Stopping => label.yellow().bold().to_string(),
        StreamState::Failed | StreamState::FailedToStart => label.red().bold().to_string(),
        StreamState::Idle | StreamState::Stopped => label.blue().bold().to_string(),
    }
}

/// Print the relay being started.
pub fn print_stream_start(id: &str, source: &str, destination: &str) {
    println!(
        "{} {} {} -> {} {}",
        timestamp().dimmed(),
        "[RELAY]".cyan().bold(),
        source.cyan(),
        destination.cyan(),
        format!("id={}", truncate(id, 36)).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print a one-line status of a stream.
pub fn print_stream_status(snapshot: &StreamSnapshot) {
    let pid = snapshot
        .pid
        .map_or_else(String::new, |pid| format!("pid={pid}"));
    println!(
        "{} {} {} {}",
        timestamp().dimmed(),
        state_label(snapshot.state),
        format_metrics(&snapshot.metrics),
        pid.dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print the final state of a stream, including its error if any.
pub fn print_stream_end(snapshot: &StreamSnapshot) {
    let ts = timestamp();
    println!(
        "{} {} Relay ended {}",
        ts.dimmed(),
        state_label(snapshot.state),
        format!("episode={}", snapshot.episode).dimmed()
    );
    if let Some(error) = &snapshot.last_error {
        println!(
            "{} {} {}",
            ts.dimmed(),
            "[ERROR]".red().bold(),
            truncate(error, 200).red()
        );
    }
    let _ = io::stdout().flush();
}

/// Print the address the control API is listening on.
pub fn print_listening(address: &str) {
    println!(
        "{} {} Control API on http://{}",
        timestamp().dimmed(),
        "[SERVE]".magenta().bold(),
        address
    );
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}
