//! Command prefixes recognised in chat text.

use crate::relay::upstream::ImageStrategy;

pub const CHAT_PREFIX: &str = "AI@";
pub const IMAGE_PREFIX: &str = "AI#";
/// Directly after [`IMAGE_PREFIX`], selects the hosted-image provider.
pub const ALT_IMAGE_MARKER: char = '#';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    Image { strategy: ImageStrategy, prompt: String },
}

/// Parse a chat message into a command.
///
/// Prefixes match case-insensitively after trimming. Returns `None` for
/// unprefixed text and for a prefix with nothing after it.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();

    if let Some(rest) = strip_prefix_ignore_case(text, CHAT_PREFIX) {
        return non_empty(rest).map(|msg| Command::Chat(msg.to_string()));
    }

    if let Some(rest) = strip_prefix_ignore_case(text, IMAGE_PREFIX) {
        let rest = rest.trim();
        let (strategy, prompt) = match rest.strip_prefix(ALT_IMAGE_MARKER) {
            Some(prompt) => (ImageStrategy::Hosted, prompt),
            None => (ImageStrategy::Inline, rest),
        };
        return non_empty(prompt).map(|prompt| Command::Image {
            strategy,
            prompt: prompt.to_string(),
        });
    }

    None
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}
