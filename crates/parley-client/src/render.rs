use std::collections::HashMap;

use parley_types::{Message, MessageKey, MessageStatus};

/// One line per message: time, key, author, body and decorations.
pub fn format_message(message: &Message) -> String {
    let mut line = format!(
        "{} [{}] {}: {}",
        message.created_at.format("%H:%M:%S"),
        message.key,
        message.author_id,
        message.body
    );
    if let Some(to) = &message.reply_to {
        line.push_str(&format!(" (re {})", to));
    }
    if let Some(url) = &message.attachment {
        line.push_str(&format!(" <{}>", url));
    }
    if message.edited_at.is_some() {
        line.push_str(" (edited)");
    }
    let counts = message.reactions.counts();
    if !counts.is_empty() {
        let shown: Vec<String> = counts
            .iter()
            .map(|(emoji, n)| format!("{} {}", emoji, n))
            .collect();
        line.push_str(&format!(" [{}]", shown.join(", ")));
    }
    match message.status {
        MessageStatus::Confirmed => {}
        MessageStatus::Pending => line.push_str(" …sending"),
        MessageStatus::Failed => line.push_str(" !failed (/retry or /discard)"),
    }
    line
}

/// Remembers what was last printed so each view change only prints the
/// messages that appeared, changed or went away.
#[derive(Default)]
pub struct Transcript {
    shown: HashMap<MessageKey, String>,
}

impl Transcript {
    pub fn update(&mut self, messages: &[Message]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut next = HashMap::with_capacity(messages.len());

        for message in messages {
            let line = format_message(message);
            if self.shown.get(&message.key) != Some(&line) {
                lines.push(line.clone());
            }
            next.insert(message.key.clone(), line);
        }

        // Pending entries vanish when confirmed; only confirmed ones are removals.
        for key in self.shown.keys() {
            if matches!(key, MessageKey::Confirmed(_)) && !next.contains_key(key) {
                lines.push(format!("- [{}] removed", key));
            }
        }

        self.shown = next;
        lines
    }
}
