//! Human-readable rendering of a finished run.

use std::fmt::Write as _;
use std::sync::OnceLock;

use askama::Template;
use chrono::{DateTime, Local, Utc};
use regex::Regex;

use super::RunReport;
use crate::capture::Capture;

/// Chat messages longer than this are rejected by the Bot API.
pub const CHAT_MESSAGE_LIMIT: usize = 4096;
const CHAT_MESSAGE_KEEP: usize = 4000;
/// Room left for the "not shown" lines when streams are cut for chat.
const CHAT_CUT_SLACK: usize = 96;

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// "1 hour, 2 minutes, and 5 seconds"
pub fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let unit = |n: i64, name: &str| format!("{n} {name}{}", if n == 1 { "" } else { "s" });

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(unit(days, "day"));
    }
    if hours > 0 {
        parts.push(unit(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(unit(minutes, "minute"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(unit(seconds, "second"));
    }

    match parts.len() {
        1 => parts.remove(0),
        2 => format!("{} and {}", parts[0], parts[1]),
        _ => {
            let last = parts.pop().unwrap_or_default();
            format!("{}, and {}", parts.join(", "), last)
        }
    }
}

fn ansi_pattern() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ANSI pattern is valid")
    })
}

/// Remove terminal escape sequences (colours, cursor movement).
pub fn strip_ansi(text: &str) -> String {
    ansi_pattern().replace_all(text, "").into_owned()
}

/// Foreground colours for SGR 30-37, then the bright variants 90-97.
const ANSI_COLORS: [&str; 16] = [
    "#000000", "#cd3131", "#0dbc79", "#e5e510", "#2472c8", "#bc3fbc", "#11a8cd", "#e5e5e5",
    "#666666", "#f14c4c", "#23d18b", "#f5f543", "#3b8eea", "#d670d6", "#29b8db", "#ffffff",
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SgrStyle {
    bold: bool,
    underline: bool,
    fg: Option<&'static str>,
    bg: Option<&'static str>,
}

impl SgrStyle {
    /// Apply the parameters of one `ESC [ ... m` sequence.
    fn apply(&mut self, params: &str) {
        let codes: Vec<u32> = if params.is_empty() {
            vec![0]
        } else {
            params.split(';').map(|p| p.parse().unwrap_or(0)).collect()
        };
        let mut i = 0;
        while i < codes.len() {
            match codes[i] {
                0 => *self = Self::default(),
                1 => self.bold = true,
                4 => self.underline = true,
                22 => self.bold = false,
                24 => self.underline = false,
                c @ 30..=37 => self.fg = Some(ANSI_COLORS[(c - 30) as usize]),
                39 => self.fg = None,
                c @ 40..=47 => self.bg = Some(ANSI_COLORS[(c - 40) as usize]),
                49 => self.bg = None,
                c @ 90..=97 => self.fg = Some(ANSI_COLORS[(c - 90 + 8) as usize]),
                c @ 100..=107 => self.bg = Some(ANSI_COLORS[(c - 100 + 8) as usize]),
                // 256-colour and truecolour forms are skipped with their arguments.
                38 | 48 => match codes.get(i + 1).copied() {
                    Some(5) => i += 2,
                    Some(2) => i += 4,
                    _ => {}
                },
                _ => {}
            }
            i += 1;
        }
    }

    fn css(&self) -> String {
        let mut parts = Vec::new();
        if let Some(fg) = self.fg {
            parts.push(format!("color:{fg}"));
        }
        if let Some(bg) = self.bg {
            parts.push(format!("background-color:{bg}"));
        }
        if self.bold {
            parts.push("font-weight:bold".to_string());
        }
        if self.underline {
            parts.push("text-decoration:underline".to_string());
        }
        parts.join(";")
    }
}

fn escape_html_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
}

/// Escape `text` for HTML, turning SGR colour codes into styled spans.
///
/// Other escape sequences are dropped.
pub fn ansi_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut style = SgrStyle::default();
    let mut open = false;
    let mut last = 0;

    for m in ansi_pattern().find_iter(text) {
        escape_html_into(&mut out, &text[last..m.start()]);
        last = m.end();

        let Some(params) = m.as_str().strip_prefix("\x1b[").and_then(|r| r.strip_suffix('m')) else {
            continue;
        };
        style.apply(params);
        if open {
            out.push_str("</span>");
            open = false;
        }
        if style != SgrStyle::default() {
            let _ = write!(out, "<span style=\"{}\">", style.css());
            open = true;
        }
    }
    escape_html_into(&mut out, &text[last..]);
    if open {
        out.push_str("</span>");
    }
    out
}

pub fn status_line(report: &RunReport<'_>) -> String {
    if report.succeeded() {
        "completed successfully".to_string()
    } else {
        format!("failed with exit code {}", report.exit_code)
    }
}

fn truncation_note(capture: &Capture) -> Option<String> {
    capture.is_truncated().then(|| {
        format!(
            "(output truncated: first {} of {} bytes shown)",
            capture.text.len(),
            capture.total_bytes
        )
    })
}

/// Append one stream section. `max_chars` cuts the stream text further,
/// for transports with a hard message size.
fn push_stream(lines: &mut Vec<String>, title: &str, capture: &Capture, max_chars: Option<usize>) {
    lines.push(String::new());
    lines.push(format!("{title}:"));
    lines.push("-".repeat(70));
    let text = strip_ansi(&capture.text);
    if text.is_empty() {
        lines.push("(empty)".to_string());
    } else {
        let count = text.chars().count();
        match max_chars {
            Some(max) if count > max => {
                lines.push(text.chars().take(max).collect());
                lines.push(format!("... ({} more characters not shown)", count - max));
            }
            _ => lines.push(text),
        }
    }
    if let Some(note) = truncation_note(capture) {
        lines.push(note);
    }
}

fn render_text(report: &RunReport<'_>, stdout_max: Option<usize>, stderr_max: Option<usize>) -> String {
    let mut lines = vec![
        "Command Execution Report".to_string(),
        "=".repeat(70),
        String::new(),
        format!("Command: {}", report.command),
        format!("Status: {}", status_line(report)),
        format!("Exit Code: {}", report.exit_code),
        format!("Start Time: {}", format_datetime(&report.started_at)),
        format!("End Time: {}", format_datetime(&report.finished_at)),
        format!("Duration: {}", format_duration(report.duration())),
    ];
    if let Some(id) = report.run_id {
        lines.push(format!("Run: #{id}"));
    }
    push_stream(&mut lines, "STDOUT", report.stdout, stdout_max);
    push_stream(&mut lines, "STDERR", report.stderr, stderr_max);
    lines.join("\n")
}

/// Plain-text report, shared by the chat message and the email text part.
pub fn plain_text(report: &RunReport<'_>) -> String {
    render_text(report, None, None)
}

/// Plain-text report cut to fit a single chat message.
///
/// The header, both stream headings and the truncation notes are always
/// kept; the space left over is split between the two streams, and a
/// stream shorter than its half passes the rest to the other.
pub fn chat_text(report: &RunReport<'_>) -> String {
    let text = plain_text(report);
    if text.chars().count() <= CHAT_MESSAGE_LIMIT {
        return text;
    }

    let frame = render_text(report, Some(0), Some(0)).chars().count();
    let budget = CHAT_MESSAGE_LIMIT.saturating_sub(frame + CHAT_CUT_SLACK);
    let stdout_len = strip_ansi(&report.stdout.text).chars().count();
    let stderr_len = strip_ansi(&report.stderr.text).chars().count();

    let stderr_share = stderr_len.min(budget / 2);
    let stdout_share = stdout_len.min(budget - stderr_share);
    let stderr_share = stderr_len.min(budget - stdout_share);

    let text = render_text(report, Some(stdout_share), Some(stderr_share));
    if text.chars().count() <= CHAT_MESSAGE_LIMIT {
        return text;
    }
    // Only an oversized header gets here, e.g. a very long command line.
    let kept: String = text.chars().take(CHAT_MESSAGE_KEEP).collect();
    format!("{kept}\n\n... (message truncated)")
}

struct StreamView {
    /// Escaped HTML with terminal colours as styled spans.
    html: String,
    /// Empty unless the capture was truncated.
    note: String,
}

impl StreamView {
    fn new(capture: &Capture) -> Self {
        Self {
            html: ansi_to_html(&capture.text),
            note: truncation_note(capture).unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportHtml<'a> {
    command: &'a str,
    success: bool,
    status: String,
    exit_code: i32,
    started: String,
    finished: String,
    duration: String,
    stdout: StreamView,
    stderr: StreamView,
}

/// HTML report for the email body. All interpolated text is escaped;
/// stream output is escaped by [`ansi_to_html`].
pub fn html(report: &RunReport<'_>) -> Result<String, askama::Error> {
    ReportHtml {
        command: report.command,
        success: report.succeeded(),
        status: status_line(report),
        exit_code: report.exit_code,
        started: format_datetime(&report.started_at),
        finished: format_datetime(&report.finished_at),
        duration: format_duration(report.duration()),
        stdout: StreamView::new(report.stdout),
        stderr: StreamView::new(report.stderr),
    }
    .render()
}
