//! Helpers for logging live game text without breaking one-record-per-line logs.

use std::fmt::Write;

use crate::map::port::RoomSignals;

/// Longest preview kept from a single game string.
const MAX_PREVIEW: usize = 160;

/// Escape control characters and cap length so server text stays on one log line.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// One-line summary of the live room signals for debug output.
pub fn describe_signals(signals: &RoomSignals) -> String {
    let mut out = format!(
        "#{} {} / {}",
        signals.transition_count,
        escape_log(&signals.title),
        escape_log(&signals.exits)
    );
    if let Some(uid) = signals.uid {
        let _ = write!(&mut out, " u{}", uid);
    }
    if signals.room_window_disabled {
        out.push_str(" (room window off)");
    }
    out
}
