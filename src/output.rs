//! User-facing output utilities for clean, colored terminal messages
//!
//! These print straight to stderr without the timestamps and module paths
//! that `env_logger` adds, for messages meant for the person at the terminal.

use owo_colors::OwoColorize;

use crate::progress::RemoteStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Plain,
    Caution,
    Failure,
}

fn notice(tone: Tone, message: &str) -> String {
    match tone {
        Tone::Plain => message.to_string(),
        Tone::Caution => message.yellow().to_string(),
        Tone::Failure => message.red().to_string(),
    }
}

/// Blank-line padded, so notices stand apart from the match listing
fn emit(tone: Tone, message: &str) {
    eprintln!("\n{}\n", notice(tone, message));
}

pub fn warn(message: &str) {
    emit(Tone::Caution, message);
}

pub fn error(message: &str) {
    emit(Tone::Failure, message);
}

pub fn info(message: &str) {
    emit(Tone::Plain, message);
}

fn status_tone(status: &RemoteStatus) -> Tone {
    match status {
        RemoteStatus::NoResults | RemoteStatus::NothingPlaced => Tone::Plain,
        RemoteStatus::RateLimited { .. } | RemoteStatus::TooLarge | RemoteStatus::NoCredits => {
            Tone::Caution
        }
        RemoteStatus::SignInRequired | RemoteStatus::Generic { .. } => Tone::Failure,
    }
}

/// Inline status of a remote search, colored by how actionable it is
pub fn remote_status(status: &RemoteStatus) {
    emit(status_tone(status), &status.message());
}

/// Render `text` with `[start, end)` emphasized, trimmed to a window around it
pub fn excerpt(text: &str, start: usize, end: usize, current: bool) -> String {
    const CONTEXT: usize = 30;

    if start > end || end > text.len() || !text.is_char_boundary(start) || !text.is_char_boundary(end)
    {
        return text.to_string();
    }

    let before: String = {
        let chars: Vec<char> = text[..start].chars().collect();
        let skip = chars.len().saturating_sub(CONTEXT);
        let prefix = if skip > 0 { "…" } else { "" };
        format!("{}{}", prefix, chars[skip..].iter().collect::<String>())
    };
    let after: String = {
        let rest = &text[end..];
        let kept: String = rest.chars().take(CONTEXT).collect();
        if kept.len() < rest.len() {
            format!("{}…", kept)
        } else {
            kept
        }
    };

    let matched = &text[start..end];
    let matched = if current {
        matched.black().on_bright_yellow().to_string()
    } else {
        matched.black().on_yellow().to_string()
    };
    format!("{}{}{}", before, matched, after)
}
