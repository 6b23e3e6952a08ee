//! Input sanitization for anything written to the server console.

use thiserror::Error;

/// Shell chaining, expansion and redirection characters never sent to the console.
pub const DISALLOWED_CHARS: &[char] = &[
    ';', '|', '&', '>', '<', '$', '(', ')', '{', '}', '[', ']', '`', '\\',
];

pub const DEFAULT_MAX_COMMAND_LENGTH: usize = 200;
pub const DEFAULT_MAX_ANNOUNCE_LENGTH: usize = 300;
pub const DEFAULT_MAX_STARTUP_REPLY_LENGTH: usize = 8;

/// Rejection raised by the sanitizers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsafeInputError {
    #[error("{what} is empty")]
    Empty { what: &'static str },

    #[error("{what} exceeds max length ({max})")]
    TooLong { what: &'static str, max: usize },

    #[error("Newlines are not permitted")]
    Newline,

    #[error("Disallowed character detected: {0:?}")]
    DisallowedChar(char),

    #[error("Startup reply must be a number or y/n")]
    InvalidStartupReply,
}

fn check(what: &'static str, input: &str, max_length: usize) -> Result<String, UnsafeInputError> {
    let value = input.trim();
    if value.is_empty() {
        return Err(UnsafeInputError::Empty { what });
    }
    if value.chars().count() > max_length {
        return Err(UnsafeInputError::TooLong {
            what,
            max: max_length,
        });
    }
    if value.contains(['\n', '\r']) {
        return Err(UnsafeInputError::Newline);
    }
    if let Some(ch) = value.chars().find(|c| DISALLOWED_CHARS.contains(c)) {
        return Err(UnsafeInputError::DisallowedChar(ch));
    }
    Ok(value.to_string())
}

/// Trim and validate a console command.
pub fn sanitize_command(command: &str, max_length: usize) -> Result<String, UnsafeInputError> {
    check("Command", command, max_length)
}

/// Trim and validate a chat or announcement message.
pub fn sanitize_announce(message: &str, max_length: usize) -> Result<String, UnsafeInputError> {
    check("Message", message, max_length)
}

/// Validate an answer to an interactive startup prompt.
///
/// Accepts a bare digit string or yes/no/y/n (any case); yes and no are
/// normalized to `y` and `n`.
pub fn sanitize_startup_reply(reply: &str, max_length: usize) -> Result<String, UnsafeInputError> {
    let value = check("Reply", reply, max_length)?;
    if value.chars().all(|c| c.is_ascii_digit()) {
        return Ok(value);
    }
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok("y".to_string()),
        "n" | "no" => Ok("n".to_string()),
        _ => Err(UnsafeInputError::InvalidStartupReply),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_trimmed_and_passed_through() {
        assert_eq!(sanitize_command("\thelp\n", 200).unwrap(), "help");
        assert_eq!(
            sanitize_command("say Hello, World!", 200).unwrap(),
            "say Hello, World!"
        );
    }

    #[test]
    fn test_empty_rejected() {
        let err = sanitize_command("   ", 200).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_length_limit() {
        assert!(sanitize_command(&"a".repeat(200), 200).is_ok());
        let err = sanitize_command(&"a".repeat(201), 200).unwrap_err();
        assert!(err.to_string().contains("max length"));
        assert!(sanitize_announce(&"m".repeat(301), 300).is_err());
    }

    #[test]
    fn test_interior_newline_rejected() {
        let err = sanitize_command("say hi\nstop", 200).unwrap_err();
        assert_eq!(err, UnsafeInputError::Newline);
        assert!(err.to_string().contains("Newlines"));
        assert!(sanitize_announce("hi\rthere", 300).is_err());
    }

    #[test]
    fn test_every_blocklisted_char_rejected_anywhere() {
        for &ch in DISALLOWED_CHARS {
            for candidate in [format!("{ch}help"), format!("he{ch}lp"), format!("help{ch}")] {
                let err = sanitize_command(&candidate, 200).unwrap_err();
                assert_eq!(err, UnsafeInputError::DisallowedChar(ch), "{candidate}");
            }
        }
        let err = sanitize_command("help; rm -rf /", 200).unwrap_err();
        assert!(err.to_string().contains("Disallowed"));
    }

    #[test]
    fn test_startup_reply_normalizes_yes_no() {
        assert_eq!(sanitize_startup_reply("yes", 8).unwrap(), "y");
        assert_eq!(sanitize_startup_reply("NO", 8).unwrap(), "n");
        assert_eq!(sanitize_startup_reply(" Y ", 8).unwrap(), "y");
        assert_eq!(sanitize_startup_reply("42", 8).unwrap(), "42");
    }

    #[test]
    fn test_startup_reply_rejections() {
        let err = sanitize_startup_reply("123456789", 8).unwrap_err();
        assert!(err.to_string().contains("max length"));
        let err = sanitize_startup_reply("1a", 8).unwrap_err();
        assert!(err.to_string().contains("number or y/n"));
        let err = sanitize_startup_reply("1;", 8).unwrap_err();
        assert!(err.to_string().contains("Disallowed"));
        assert!(sanitize_startup_reply("", 8).is_err());
    }
}
