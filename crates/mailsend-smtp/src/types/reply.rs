//! SMTP reply types.

/// SMTP reply from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Reply message lines, without the code prefix.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns the full message, lines joined with `\n`.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Checks the code against an expectation.
    ///
    /// `0` accepts anything. A one-digit expectation matches the first digit
    /// of the code, a two-digit expectation its first two digits, and a
    /// three-digit expectation must match exactly.
    #[must_use]
    pub const fn matches(self, expect: u16) -> bool {
        match expect {
            0 => true,
            1..=9 => self.0 / 100 == expect,
            10..=99 => self.0 / 10 == expect,
            _ => self.0 == expect,
        }
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Codes the session waits for
impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCESS: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 501 Syntax error in parameters or arguments
    pub const PARAMETER_ERROR: Self = Self(501);
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

    mod reply_code_tests {
        use super::*;

        #[test]
        fn matches_any() {
            assert!(ReplyCode::new(999).matches(0));
            assert!(ReplyCode::new(421).matches(0));
        }

        #[test]
        fn matches_class() {
            assert!(ReplyCode::new(251).matches(2));
            assert!(!ReplyCode::new(354).matches(2));
        }

        #[test]
        fn matches_prefix() {
            assert!(ReplyCode::new(250).matches(25));
            assert!(ReplyCode::new(251).matches(25));
            assert!(!ReplyCode::new(550).matches(25));
        }

        #[test]
        fn matches_exact() {
            assert!(ReplyCode::OK.matches(250));
            assert!(!ReplyCode::new(251).matches(250));
            assert!(ReplyCode::START_DATA.matches(354));
        }

        #[test]
        fn classes() {
            assert!(ReplyCode::SERVICE_READY.is_success());
            assert!(ReplyCode::AUTH_SUCCESS.is_success());
            assert!(ReplyCode::AUTH_CONTINUE.is_intermediate());
            assert!(!ReplyCode::PARAMETER_ERROR.is_success());
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", ReplyCode::OK), "250");
            assert_eq!(ReplyCode::CLOSING.to_string(), "221");
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn message_text_multiple_lines() {
            let reply = Reply::new(
                ReplyCode::OK,
                vec!["mx.example.com greets you".to_string(), "8BITMIME".to_string()],
            );
            assert!(reply.is_success());
            assert_eq!(reply.message_text(), "mx.example.com greets you\n8BITMIME");
        }

        #[test]
        fn message_text_empty() {
            let reply = Reply::new(ReplyCode::OK, vec![]);
            assert_eq!(reply.message_text(), "");
        }
    }
}
