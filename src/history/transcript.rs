//! Plain-text transcript export

use crate::context::Message;
use chrono::Local;

const RULE_WIDTH: usize = 30;

/// Render a session as a human-readable transcript
///
/// One line per message: `[YYYY-mm-dd HH:MM:SS AM] Role: content`, with the
/// timestamp in local time.
pub fn render(session_id: &str, messages: &[Message]) -> String {
    let mut text = format!("Chat Session: {}\n", session_id);
    text.push_str(&"=".repeat(RULE_WIDTH));
    text.push_str("\n\n");

    for message in messages {
        text.push_str(&render_line(message));
        text.push('\n');
    }
    text
}

/// Render a single transcript line
pub fn render_line(message: &Message) -> String {
    let ts = message
        .timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %I:%M:%S %p");
    format!("[{}] {}: {}", ts, message.role.label(), message.content)
}
