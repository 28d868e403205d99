//! MK-010: Plain-text rendering of session trees and durations.

use crate::core::session::{SessionSnapshot, SessionStatus};
use std::time::Duration;

/// Indentation per tree level.
pub const INDENT: usize = 2;

/// Log lines shown for sessions that did not fail.
pub const PARTIAL_LOG_LINES: usize = 10;

fn marker(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Setup => "[ ]",
        SessionStatus::Running => "[~]",
        SessionStatus::Success => "[✓]",
        SessionStatus::Failure => "[✗]",
    }
}

/// One-line summary of a session.
pub fn render_brief(snapshot: &SessionSnapshot) -> String {
    match &snapshot.message {
        Some(msg) => format!("{} {} - {}", marker(snapshot.status), snapshot.name, msg),
        None => format!("{} {}", marker(snapshot.status), snapshot.name),
    }
}

/// Render a session tree.
///
/// Failed sessions show their whole log; the others only the last
/// `log_lines` lines.
pub fn render_tree(snapshot: &SessionSnapshot, log_lines: usize) -> String {
    let mut out = Vec::new();
    render_into(snapshot, log_lines, 0, &mut out);
    out.join("\n")
}

fn render_into(snapshot: &SessionSnapshot, log_lines: usize, level: usize, out: &mut Vec<String>) {
    let pad = " ".repeat(level * INDENT);
    out.push(format!("{}{}", pad, render_brief(snapshot)));

    let skip = if snapshot.status == SessionStatus::Failure {
        0
    } else {
        snapshot.log.len().saturating_sub(log_lines)
    };
    let log_pad = " ".repeat((level + 1) * INDENT);
    for line in &snapshot.log[skip..] {
        out.push(format!("{}{}", log_pad, line));
    }

    for child in &snapshot.children {
        render_into(child, log_lines, level + 1, out);
    }
}

/// Human-readable duration: `250ms`, `4.20s`, `2m 05s`, `1h 02m 03s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    if total == 0 {
        return format!("{}ms", d.as_millis());
    }
    if total < 60 {
        return format!("{:.2}s", d.as_secs_f64());
    }
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else {
        format!("{}m {:02}s", minutes, seconds)
    }
}
