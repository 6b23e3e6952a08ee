//! Chat-line recognition across the log dialects seen from dedicated servers.

use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_PLAYER_LEN: usize = 64;
pub const MAX_MESSAGE_LEN: usize = 500;

/// Identity used for messages the supervisor itself sends.
pub const SERVER_IDENTITY: &str = "Server";

/// Status chatter that must never be read as chat.
static STATUS_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(loading|loaded|saving|saved|starting|started|stopping|stopped|error|exception|warning)\b",
    )
    .expect("Invalid regex pattern for status fragments")
});

/// Tried in order; first match wins.
static CHAT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // [12:34:56] Name: msg   /   [time] [INFO] Name: msg
        r"^\[[^\]]*\]\s*(?:\[[A-Za-z]+\]\s*)?(?P<name>[^\s:()<>\[\]]+):\s+(?P<msg>.+)$",
        // [09:31] (name): msg
        r"^(?:\[[^\]]*\]\s*)*\((?P<name>[^()]+)\):\s*(?P<msg>.+)$",
        // <name> msg
        r"^(?:\[[^\]]*\]\s*)*<(?P<name>[^<>]+)>\s+(?P<msg>.+)$",
        // name says: msg
        r"^(?:\[[^\]]*\]\s*)*(?P<name>\S+)\s+says:\s*(?P<msg>.+)$",
        // name: msg   /   Chat: name: msg
        r"^(?:Chat:\s*)?(?P<name>[^\s:]+):\s+(?P<msg>.+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex pattern for chat lines"))
    .collect()
});

static DATE_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{2,4}[-/:.]\d{1,2}|^\d+$").expect("Invalid regex pattern for date tokens")
});

/// A recognized chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub player: String,
    pub message: String,
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn plausible_name(name: &str) -> bool {
    name.chars().count() >= 2
        && !name.contains(['[', ']', '<', '>', '(', ')'])
        && !DATE_LIKE.is_match(name)
}

/// Parse a console line as chat. Returns `None` for anything that is not
/// confidently a player message.
pub fn parse_chat(line: &str) -> Option<ChatLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('>') || STATUS_FRAGMENT.is_match(line) {
        return None;
    }
    for pattern in CHAT_PATTERNS.iter() {
        let Some(caps) = pattern.captures(line) else {
            continue;
        };
        let name = caps["name"].trim();
        let message = caps["msg"].trim();
        if !plausible_name(name) || message.is_empty() {
            return None;
        }
        return Some(ChatLine {
            player: truncate_chars(name, MAX_PLAYER_LEN),
            message: truncate_chars(message, MAX_MESSAGE_LEN),
        });
    }
    None
}

/// Whether `message` from `player` addresses the bot.
///
/// The bot's own messages and those from [`SERVER_IDENTITY`] never count.
pub fn is_mention(player: &str, message: &str, keyword: &str, bot_name: &str) -> bool {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return false;
    }
    if player.eq_ignore_ascii_case(bot_name) || player.eq_ignore_ascii_case(SERVER_IDENTITY) {
        return false;
    }
    message.to_lowercase().contains(&keyword.to_lowercase())
}
