//! SMTP response parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// Every line of a multi-line reply must carry the same code.
///
/// # Errors
///
/// Returns an error if the reply is malformed.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let first = lines
        .first()
        .ok_or_else(|| Error::Protocol("Empty reply".into()))?;
    let code = parse_code(first)?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!(
                "Status code mismatch in multi-line reply: {line}"
            )));
        }
        message.push(line.get(4..).unwrap_or_default().to_string());
    }

    Ok(Reply::new(ReplyCode::new(code), message))
}

/// Extracts the three-digit code from a reply line.
///
/// # Errors
///
/// Returns an error if the line is too short, the code is not numeric, or
/// the separator is neither `-` nor a space.
pub fn parse_code(line: &str) -> Result<u16> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || (bytes.len() > 3 && bytes[3] != b' ' && bytes[3] != b'-') {
        return Err(Error::Protocol(format!("Short response: {line}")));
    }
    if !bytes[..3].iter().all(u8::is_ascii_digit) || bytes[0] == b'0' {
        return Err(Error::Protocol(format!("Invalid response code: {line}")));
    }

    Ok(u16::from(bytes[0] - b'0') * 100
        + u16::from(bytes[1] - b'0') * 10
        + u16::from(bytes[2] - b'0'))
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the last
/// line. A bare code also ends the reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || (line.len() >= 4 && line.as_bytes()[3] == b' ')
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_single_line_reply() {
        let reply = parse_reply(&lines(&["250 OK"])).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec!["OK"]);
        assert!(reply.is_success());
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let reply = parse_reply(&lines(&[
            "250-mx.example.com",
            "250-AUTH LOGIN PLAIN",
            "250 8BITMIME",
        ]))
        .unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(
            reply.message,
            vec!["mx.example.com", "AUTH LOGIN PLAIN", "8BITMIME"]
        );
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = parse_reply(&lines(&["250"])).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message_text(), "");
    }

    #[test]
    fn test_parse_code_mismatch() {
        let result = parse_reply(&lines(&["250-first", "251 second"]));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(!is_last_reply_line("250-Continuing"));
        assert!(is_last_reply_line("250"));
        assert!(!is_last_reply_line("25"));
    }

    #[test]
    fn test_parse_error_empty() {
        assert!(parse_reply(&[]).is_err());
    }

    #[test]
    fn test_parse_error_too_short() {
        assert!(parse_reply(&lines(&["25"])).is_err());
    }

    #[test]
    fn test_parse_error_invalid_code() {
        assert!(parse_reply(&lines(&["ABC OK"])).is_err());
        assert!(parse_code("+25 OK").is_err());
        assert!(parse_code("250/OK").is_err());
        assert!(parse_code("050 OK").is_err());
    }
}
