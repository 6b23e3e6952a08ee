//! Heuristic parsing of `help` output into command candidates.
//!
//! Help formats differ between servers and versions. Parsing is
//! conservative: a missed command is preferable to an invented one, and the
//! raw line is always kept for auditing.

use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b\][^\x07]*\x07|\x1b[()][AB012]")
        .expect("Invalid regex pattern for ANSI escapes")
});

/// Color codes that lost their escape byte somewhere upstream, e.g. `[39m`.
static ANSI_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+m").expect("Invalid regex pattern for bare ANSI codes"));

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\[\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\]\s*")
        .expect("Invalid regex pattern for timestamps")
});

static CHAT_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[/!]([a-zA-Z][a-zA-Z0-9_-]*)").expect("Invalid regex pattern for chat commands")
});

static SIMPLE_CMD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z][a-zA-Z0-9_-]*)\s*(?:[-:\s]|$)")
        .expect("Invalid regex pattern for simple commands")
});

static WITH_ARGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z][a-zA-Z0-9_-]*)\s*[<\[]")
        .expect("Invalid regex pattern for commands with arguments")
});

static CMD_DESC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z][a-zA-Z0-9_-]*)\s*[-:]\s*\S")
        .expect("Invalid regex pattern for command descriptions")
});

static DESC_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+[-:]\s+(.+)$").expect("Invalid regex pattern for description separator")
});

static NOISE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^-+$",
        r"^=+$",
        r"(?i)^page\s+\d+",
        r"(?i)^\d+\s*(/|of)\s*\d+",
        r"(?i)^type\s+.*(help|more)",
        r"(?i)^available\s+commands",
        r"(?i)^commands?\s*(page)?\s*\d*",
        r"(?i)^server\s+commands",
        r"^>\s",
        // status chatter such as "Suggesting garbage collection..."
        r"^[A-Z][a-z]+ing\s+.*\.\.\.$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex pattern for noise lines"))
    .collect()
});

const MIN_NAME_LEN: usize = 2;
const MAX_NAME_LEN: usize = 32;

/// A command candidate extracted from one help line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Name as printed, including any `/` or `!` prefix.
    pub name: String,
    pub syntax: String,
    pub description: String,
    pub raw_line: String,
}

impl ParsedCommand {
    /// Deduplication key: prefix stripped, lowercased.
    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }
}

pub fn normalize_key(name: &str) -> String {
    name.trim_start_matches(['/', '!']).to_lowercase()
}

pub fn strip_ansi(text: &str) -> String {
    let text = ANSI_ESCAPE.replace_all(text, "");
    ANSI_BARE.replace_all(&text, "").into_owned()
}

pub fn strip_timestamp(text: &str) -> String {
    TIMESTAMP.replace(text, "").into_owned()
}

/// Strip ANSI, unify line endings and trim trailing whitespace on each line.
pub fn normalize_output(text: &str) -> String {
    let text = strip_ansi(text).replace("\r\n", "\n").replace('\r', "\n");
    text.split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn normalize_line_for_parsing(line: &str) -> String {
    strip_timestamp(&strip_ansi(line)).trim().to_string()
}

pub fn is_noise_line(line: &str) -> bool {
    let stripped = line.trim();
    stripped.is_empty() || NOISE.iter().any(|re| re.is_match(stripped))
}

fn candidate_name(line: &str) -> Option<String> {
    if let Some(caps) = CHAT_STYLE.captures(line) {
        let prefix = &line[..1];
        return Some(format!("{prefix}{}", &caps[1]));
    }
    [&*SIMPLE_CMD, &*WITH_ARGS, &*CMD_DESC]
        .iter()
        .find_map(|re| re.captures(line).map(|caps| caps[1].to_string()))
}

/// Split what follows the name into `(syntax fragment, description)`.
fn split_remainder(remainder: &str) -> (String, String) {
    let remainder = remainder.trim();
    // "help - Lists commands": separator right after the name
    if remainder.starts_with(['-', ':']) {
        let description = remainder.trim_start_matches(['-', ':', ' ']).trim();
        return (String::new(), description.to_string());
    }
    match DESC_SEPARATOR.captures(remainder) {
        Some(caps) => {
            let start = caps.get(0).map_or(remainder.len(), |m| m.start());
            (remainder[..start].trim().to_string(), caps[1].trim().to_string())
        }
        None => (remainder.to_string(), String::new()),
    }
}

/// Parse one help line. Returns `None` for noise and anything that does not
/// look like a command entry.
pub fn parse_command_line(line: &str) -> Option<ParsedCommand> {
    let stripped = normalize_line_for_parsing(line);
    if is_noise_line(&stripped) {
        return None;
    }

    let name = candidate_name(&stripped)?;
    let bare_len = name.trim_start_matches(['/', '!']).chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&bare_len) {
        return None;
    }

    let (syntax_part, description) = split_remainder(&stripped[name.len()..]);
    let syntax = if syntax_part.is_empty() {
        name.clone()
    } else {
        format!("{name} {syntax_part}")
    };

    Some(ParsedCommand {
        name,
        syntax,
        description,
        raw_line: line.to_string(),
    })
}

/// Parse every line of a page, tagging each command with `page`.
pub fn extract_commands_from_page(page_text: &str, page: u32) -> Vec<(ParsedCommand, u32)> {
    normalize_output(page_text)
        .split('\n')
        .filter_map(parse_command_line)
        .map(|cmd| (cmd, page))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_variants() {
        assert_eq!(strip_ansi("\x1b[32mhelp\x1b[0m"), "help");
        assert_eq!(strip_ansi("[39mstatus"), "status");
        assert_eq!(strip_ansi("\x1b]0;title\x07list"), "list");
    }

    #[test]
    fn test_normalize_output_line_endings() {
        assert_eq!(normalize_output("a  \r\nb\rc\t"), "a\nb\nc");
    }

    #[test]
    fn test_simple_and_prefixed_names() {
        let cmd = parse_command_line("help").unwrap();
        assert_eq!((cmd.name.as_str(), cmd.key()), ("help", "help".to_string()));

        let cmd = parse_command_line("/kick player").unwrap();
        assert_eq!(cmd.name, "/kick");
        assert_eq!(cmd.key(), "kick");

        let cmd = parse_command_line("!Help").unwrap();
        assert_eq!(cmd.key(), "help");
    }

    #[test]
    fn test_description_split() {
        let cmd = parse_command_line("help - Lists available commands").unwrap();
        assert_eq!(cmd.syntax, "help");
        assert_eq!(cmd.description, "Lists available commands");

        let cmd = parse_command_line("status: Shows server status").unwrap();
        assert_eq!(cmd.name, "status");
        assert_eq!(cmd.description, "Shows server status");

        let cmd = parse_command_line("  kick <player> - Kicks a player  ").unwrap();
        assert_eq!(cmd.syntax, "kick <player>");
        assert_eq!(cmd.description, "Kicks a player");
        assert_eq!(cmd.raw_line, "  kick <player> - Kicks a player  ");
    }

    #[test]
    fn test_timestamped_help_format() {
        let cmd = parse_command_line("[39m[2025-12-18 08:26:51] allowcheats").unwrap();
        assert_eq!(cmd.name, "allowcheats");
        assert_eq!(cmd.syntax, "allowcheats");

        let cmd = parse_command_line("[39m[2025-12-18 08:26:51] buff [<player>] <buff> [<seconds>]")
            .unwrap();
        assert_eq!(cmd.name, "buff");
        assert_eq!(cmd.syntax, "buff [<player>] <buff> [<seconds>]");

        let cmd = parse_command_line("[2025-12-18 08:26:51] ban <authentication/name>").unwrap();
        assert!(cmd.syntax.contains("<authentication/name>"));
    }

    #[test]
    fn test_noise_rejected() {
        for line in [
            "",
            "   ",
            "----------",
            "=====",
            "Page 1",
            "2 of 5",
            "Type help <page> for more",
            "Available commands:",
            "[39m[2025-12-18 08:26:51] Commands page 1 of 16 (Server):",
            "Server commands",
            "> help",
            "Suggesting garbage collection...",
        ] {
            assert!(parse_command_line(line).is_none(), "{line:?}");
        }
    }

    #[test]
    fn test_name_length_bounds() {
        assert!(parse_command_line("a - too short").is_none());
        let long = format!("{} - way too long", "a".repeat(40));
        assert!(parse_command_line(&long).is_none());
        assert!(parse_command_line(&"b".repeat(32)).is_some());
    }

    #[test]
    fn test_extract_page() {
        let page = "\x1b[1mAvailable commands:\x1b[0m\n\
                    help - Show help\r\n\
                    status - Server status\n\
                    ---------\n\
                    players - List online players\n\
                    kick <player> - Kick a player\n";
        let found = extract_commands_from_page(page, 5);
        let keys: Vec<String> = found.iter().map(|(c, _)| c.key()).collect();
        assert_eq!(keys, vec!["help", "status", "players", "kick"]);
        assert!(found.iter().all(|(_, page)| *page == 5));
        assert!(extract_commands_from_page("", 1).is_empty());
        assert!(extract_commands_from_page("-----\nPage 2\n", 2).is_empty());
    }
}
