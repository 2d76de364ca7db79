//! Email message model.

use crate::address::Mailbox;
use crate::error::{Error, Result};
use crate::header::Headers;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Content type used for attachments of unknown type.
const OCTET_STREAM: &str = "application/octet-stream";

/// File attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name presented to the recipient.
    pub filename: String,
    /// Part headers (Content-Type, Content-Disposition, Content-ID,
    /// Content-Transfer-Encoding).
    pub headers: Headers,
    /// Raw file content.
    pub content: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment with the standard part headers.
    ///
    /// An empty `content_type` falls back to `application/octet-stream`.
    #[must_use]
    pub fn new(filename: impl Into<String>, content_type: &str, content: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = if content_type.is_empty() {
            OCTET_STREAM
        } else {
            content_type
        };

        let mut headers = Headers::new();
        headers.set("Content-Type", content_type);
        headers.set(
            "Content-Disposition",
            format!("attachment;\r\n filename=\"{filename}\""),
        );
        headers.set("Content-ID", format!("<{filename}>"));
        headers.set("Content-Transfer-Encoding", "base64");

        Self {
            filename,
            headers,
            content,
        }
    }
}

/// An email message.
///
/// Address fields hold unparsed text such as `Name <user@example.com>`;
/// they are parsed when the message is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Reply-To addresses.
    pub reply_to: Vec<String>,
    /// Author address.
    pub from: String,
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon-copy recipients.
    pub cc: Vec<String>,
    /// Blind carbon-copy recipients, never written to the headers.
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plaintext body.
    pub text: Option<Vec<u8>>,
    /// HTML body.
    pub html: Option<Vec<u8>>,
    /// Envelope sender overriding `from` for `MAIL FROM`.
    pub sender: String,
    /// Custom headers; these win over headers derived from the fields above.
    pub headers: Headers,
    /// Attachments, in order.
    pub attachments: Vec<Attachment>,
    /// Addresses that should receive a read receipt.
    pub read_receipt: Vec<String>,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the author address.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Adds a primary recipient.
    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    /// Adds a carbon-copy recipient.
    #[must_use]
    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }

    /// Adds a blind carbon-copy recipient.
    #[must_use]
    pub fn with_bcc(mut self, bcc: impl Into<String>) -> Self {
        self.bcc.push(bcc.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plaintext body.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<Vec<u8>>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn with_html(mut self, html: impl Into<Vec<u8>>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Adds a custom header value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Reads `reader` to the end and attaches its content.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn attach<R: Read>(
        &mut self,
        mut reader: R,
        filename: impl Into<String>,
        content_type: &str,
    ) -> Result<&Attachment> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        self.attachments
            .push(Attachment::new(filename, content_type, content));
        Ok(&self.attachments[self.attachments.len() - 1])
    }

    /// Attaches a file from disk.
    ///
    /// The content type is guessed from the file extension and the file's
    /// base name is used as the attachment name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn attach_file(&mut self, path: impl AsRef<Path>) -> Result<&Attachment> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let content_type = mime_guess::from_path(path).first_raw().unwrap_or("");
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.attach(file, filename, content_type)
    }

    /// Selects and parses the envelope sender: `sender` if set, else `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the selected address does not parse.
    pub fn parse_sender(&self) -> Result<Mailbox> {
        if self.sender.is_empty() {
            Mailbox::parse(&self.from)
        } else {
            Mailbox::parse(&self.sender)
        }
    }

    /// Parses every recipient, To then Cc then Bcc.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingAddress`] if `from` is empty or there are no
    /// recipients, or the first address parse error.
    pub fn parse_to_from_addrs(&self) -> Result<Vec<Mailbox>> {
        if self.from.is_empty() {
            return Err(Error::MissingAddress);
        }

        let recipients = self
            .to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|addr| Mailbox::parse(addr))
            .collect::<Result<Vec<_>>>()?;

        if recipients.is_empty() {
            return Err(Error::MissingAddress);
        }

        Ok(recipients)
    }
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
    use std::io::Cursor;

    #[test]
    fn test_attach_sets_part_headers() {
        let mut message = Message::new();
        let attachment = message
            .attach(Cursor::new(b"Let's just pretend this is raw JPEG data."), "cat.jpeg", "image/jpeg")
            .unwrap();

        assert_eq!(attachment.filename, "cat.jpeg");
        assert_eq!(attachment.headers.get("Content-Type"), Some("image/jpeg"));
        assert_eq!(
            attachment.headers.get("content-disposition"),
            Some("attachment;\r\n filename=\"cat.jpeg\"")
        );
        assert_eq!(attachment.headers.get("Content-ID"), Some("<cat.jpeg>"));
        assert_eq!(
            attachment.headers.get("Content-Transfer-Encoding"),
            Some("base64")
        );
        assert_eq!(message.attachments.len(), 1);
    }

    #[test]
    fn test_attach_defaults_content_type() {
        let mut message = Message::new();
        let attachment = message.attach(Cursor::new(b"\x00\x01"), "blob", "").unwrap();
        assert_eq!(
            attachment.headers.get("Content-Type"),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn test_attach_file_guesses_type() {
        let path = std::env::temp_dir().join(format!("mailsend-attach-{}.txt", std::process::id()));
        std::fs::write(&path, b"file body").unwrap();

        let mut message = Message::new();
        let attachment = message.attach_file(&path).unwrap().clone();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(attachment.content, b"file body");
        assert_eq!(attachment.headers.get("Content-Type"), Some("text/plain"));
        assert!(attachment.filename.starts_with("mailsend-attach-"));
    }

    #[test]
    fn test_attach_file_missing() {
        let mut message = Message::new();
        assert!(matches!(
            message.attach_file("/nonexistent/mailsend/file.bin"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_parse_sender() {
        let cases = [
            (Message::new().with_from("from@test.com"), Some("from@test.com")),
            (
                Message {
                    sender: "sender@test.com".into(),
                    from: "from@test.com".into(),
                    ..Message::default()
                },
                Some("sender@test.com"),
            ),
            (
                Message {
                    sender: "bad_address_sender".into(),
                    ..Message::default()
                },
                None,
            ),
            (
                Message {
                    sender: "good@sender.com".into(),
                    from: "bad_address_from".into(),
                    ..Message::default()
                },
                Some("good@sender.com"),
            ),
        ];

        for (message, want) in cases {
            let got = message.parse_sender();
            match want {
                Some(addr) => assert_eq!(got.unwrap().address.as_str(), addr),
                None => assert!(got.is_err()),
            }
        }
    }

    #[test]
    fn test_parse_to_from_addrs_requires_from() {
        let message = Message::new().with_to("to@test.com").with_cc("cc@test.com");
        assert!(matches!(
            message.parse_to_from_addrs(),
            Err(Error::MissingAddress)
        ));
    }

    #[test]
    fn test_parse_to_from_addrs_requires_recipient() {
        let message = Message::new().with_from("from@test.com");
        assert!(matches!(
            message.parse_to_from_addrs(),
            Err(Error::MissingAddress)
        ));
    }

    #[test]
    fn test_parse_to_from_addrs_order_and_errors() {
        let message = Message::new()
            .with_from("from@test.com")
            .with_bcc("bcc@test.com")
            .with_to("Test <to@test.com>")
            .with_cc("cc@test.com");
        let addrs: Vec<_> = message
            .parse_to_from_addrs()
            .unwrap()
            .into_iter()
            .map(|m| m.address.as_str().to_string())
            .collect();
        assert_eq!(addrs, vec!["to@test.com", "cc@test.com", "bcc@test.com"]);

        let bad = message.with_cc("not-an-address");
        assert!(matches!(
            bad.parse_to_from_addrs(),
            Err(Error::InvalidAddress(_))
        ));
    }
}
