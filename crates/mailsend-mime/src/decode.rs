//! Message parsing from RFC 5322 wire form.

use crate::content_type::{ContentType, DEFAULT_CONTENT_TYPE};
use crate::encoding::decode_rfc2047;
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::message::Message;
use crate::multipart::split_parts;
use crate::part::Part;
use std::io::Read;

impl Message {
    /// Parses a message from raw RFC 5322 bytes.
    ///
    /// Leading whitespace is skipped. The address and subject headers move to
    /// their fields, decoded from RFC 2047 where possible. Multipart bodies are
    /// walked recursively and flattened; the last `text/plain` leaf becomes
    /// `text` and the last `text/html` leaf becomes `html`. Other leaves,
    /// attachments included, are not kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the header block is malformed, a multipart entity
    /// has no boundary or no closing delimiter, a content type is
    /// unparseable, or a transfer encoding cannot be decoded.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let start = raw
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(raw.len());
        let (mut headers, body) = Headers::parse_entity(&raw[start..])?;

        let mut message = Self::new();
        if let Some(subject) = headers.remove("Subject").into_iter().next() {
            message.subject = decode_or_raw(subject);
        }
        message.to = headers.remove("To").into_iter().map(decode_or_raw).collect();
        message.cc = headers.remove("Cc").into_iter().map(decode_or_raw).collect();
        message.bcc = headers.remove("Bcc").into_iter().map(decode_or_raw).collect();
        if let Some(from) = headers.remove("From").into_iter().next() {
            message.from = decode_or_raw(from);
        }

        let mut parts = Vec::new();
        parse_parts(headers.clone(), body, &mut parts)?;
        message.headers = headers;

        for part in parts {
            match part.content_type()?.mime_type().as_str() {
                "text/plain" => message.text = Some(part.body),
                "text/html" => message.html = Some(part.body),
                _ => {}
            }
        }

        tracing::trace!(
            subject = %message.subject,
            has_text = message.text.is_some(),
            has_html = message.html.is_some(),
            "Parsed message"
        );

        Ok(message)
    }

    /// Reads a message to the end of `reader` and parses it.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the message does not parse.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        Self::parse(&raw)
    }
}

/// Decodes a header value, keeping the raw text when decoding fails or
/// yields nothing.
fn decode_or_raw(value: String) -> String {
    match decode_rfc2047(&value) {
        Ok(decoded) if !decoded.is_empty() => decoded,
        _ => value,
    }
}

/// Walks a MIME entity, appending every non-multipart leaf to `parts`.
///
/// Nesting depth is unbounded.
pub(crate) fn parse_parts(mut headers: Headers, body: &[u8], parts: &mut Vec<Part>) -> Result<()> {
    if !headers.contains("Content-Type") {
        headers.set("Content-Type", DEFAULT_CONTENT_TYPE);
    }
    let content_type = ContentType::parse(headers.get("Content-Type").unwrap_or(DEFAULT_CONTENT_TYPE))?;

    if !content_type.is_multipart() {
        parts.push(Part::decode(headers, body)?);
        return Ok(());
    }

    let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
    for raw_part in split_parts(body, boundary)? {
        let (part_headers, part_body) = Headers::parse_entity(raw_part)?;
        parse_parts(part_headers, part_body, parts)?;
    }
    Ok(())
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

    #[test]
    fn test_from_reader() {
        let raw = concat!(
            "\r\n\r\n",
            "Subject: Test Subject\r\n",
            "To: Jordan Wright <jmwright798@gmail.com>, also@example.com\r\n",
            "From: Jordan Wright <jmwright798@gmail.com>\r\n",
            "Content-Type: multipart/alternative; boundary=001a114fb3fc42fd6b051f834280\r\n",
            "\r\n",
            "--001a114fb3fc42fd6b051f834280\r\n",
            "Content-Type: text/plain; charset=UTF-8\r\n",
            "\r\n",
            "This is a test email with HTML Formatting. It also has very long lines so\r\n",
            "that the content must be wrapped if using quoted-printable decoding.\r\n",
            "\r\n",
            "--001a114fb3fc42fd6b051f834280\r\n",
            "Content-Type: text/html; charset=UTF-8\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "<div dir=3D\"ltr\">This is a test email with <b>HTML Formatting.</b>\u{a0}It =\r\n",
            "also has very long lines so that the content must be wrapped if using quo=\r\n",
            "ted-printable decoding.</div>\r\n",
            "\r\n",
            "--001a114fb3fc42fd6b051f834280--"
        );

        let message = Message::from_reader(raw.as_bytes()).unwrap();
        assert_eq!(message.subject, "Test Subject");
        assert_eq!(
            message.to,
            vec!["Jordan Wright <jmwright798@gmail.com>, also@example.com"]
        );
        assert_eq!(message.from, "Jordan Wright <jmwright798@gmail.com>");
        assert_eq!(
            message.text.as_deref().unwrap(),
            "This is a test email with HTML Formatting. It also has very long lines so\r\n\
             that the content must be wrapped if using quoted-printable decoding.\r\n"
                .as_bytes()
        );
        assert_eq!(
            message.html.as_deref().unwrap(),
            "<div dir=\"ltr\">This is a test email with <b>HTML Formatting.</b>\u{a0}It also has very long lines so that the content must be wrapped if using quoted-printable decoding.</div>\r\n"
                .as_bytes()
        );
        assert!(!message.headers.contains("Subject"));
        assert!(message.headers.contains("Content-Type"));
    }

    #[test]
    fn test_non_ascii_headers() {
        let raw = concat!(
            "From: =?UTF-8?Q?Mrs_Val=C3=A9rie_Dupont?= <valerie.dupont@example.com>\r\n",
            "To: =?utf-8?q?Ana=C3=AFs?= <anais@example.org>\r\n",
            "Cc: =?ISO-8859-1?Q?Patrik_F=E4ltstr=F6m?= <paf@example.com>\r\n",
            "Subject: =?UTF-8?Q?Test_Subject_with_=C3=A9?=\r\n",
            "Content-Type: text/plain; charset=UTF-8\r\n",
            "\r\n",
            "body\r\n"
        );

        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.subject, "Test Subject with é");
        assert_eq!(message.from, "Mrs Valérie Dupont <valerie.dupont@example.com>");
        assert_eq!(message.to, vec!["Anaïs <anais@example.org>"]);
        assert_eq!(message.cc, vec!["Patrik Fältström <paf@example.com>"]);
        assert_eq!(message.text.as_deref(), Some(&b"body\r\n"[..]));
    }

    #[test]
    fn test_undecodable_header_falls_back_to_raw() {
        let raw = b"Subject: =?koi8-r?q?abc?=\r\n\r\nbody";
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.subject, "=?koi8-r?q?abc?=");
    }

    #[test]
    fn test_non_multipart_message() {
        let raw = concat!(
            "To: \"Joe Blow\" <joeblow@test.com>\r\n",
            "From: Jordan Wright <jmwright798@gmail.com>\r\n",
            "Subject: Test Subject\r\n",
            "Content-Type: text/plain; charset=UTF-8\r\n",
            "\r\n",
            "This is a test message!"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.text.as_deref(), Some(&b"This is a test message!"[..]));
        assert!(message.html.is_none());
    }

    #[test]
    fn test_base64_message() {
        let raw = concat!(
            "Subject: Test Subject\r\n",
            "From: Jordan Wright <jmwright798@gmail.com>\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain; charset=UTF-8\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "VGhpcyBpcyBhIHRlc3QgZW1haWwgd2l0aCBIVE1MIEZvcm1hdHRpbmcu\r\n",
            "--b\r\n",
            "Content-Type: text/html; charset=UTF-8\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "PGI+SFRNTDwvYj4=\r\n",
            "--b--\r\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(
            message.text.as_deref(),
            Some(&b"This is a test email with HTML Formatting."[..])
        );
        assert_eq!(message.html.as_deref(), Some(&b"<b>HTML</b>"[..]));
    }

    #[test]
    fn test_nested_multipart_without_content_type() {
        let raw = concat!(
            "From: Mikhail Gusarov <dottedmag@dottedmag.net>\n",
            "To: notmuch@notmuchmail.org\n",
            "Subject: Re: [notmuch] Working with Maildir storage?\n",
            "Content-Type: multipart/mixed; boundary=\"===============1958295626==\"\n",
            "\n",
            "--===============1958295626==\n",
            "Content-Type: multipart/signed; boundary=\"=-=-=\";\n",
            "    micalg=pgp-sha1; protocol=\"application/pgp-signature\"\n",
            "\n",
            "--=-=-=\n",
            "Content-Transfer-Encoding: quoted-printable\n",
            "\n",
            "Twas brillig at 14:00:54 17.11.2009 UTC-05 when lars@seas.harvard.edu did g=\n",
            "yre and gimble:\n",
            "\n",
            "--=-=-=\n",
            "Content-Type: application/pgp-signature\n",
            "\n",
            "-----BEGIN PGP SIGNATURE-----\n",
            "iQIcBAEBAgAGBQJLAvNOAAoJEJ0g9lA+M4iIjLYQAKp0PXEgl3JMOEBisH52AsIK\n",
            "=/ksP\n",
            "-----END PGP SIGNATURE-----\n",
            "--=-=-=--\n",
            "\n",
            "--===============1958295626==\n",
            "Content-Type: text/plain; charset=\"us-ascii\"\n",
            "MIME-Version: 1.0\n",
            "Content-Transfer-Encoding: 7bit\n",
            "Content-Disposition: inline\n",
            "\n",
            "Testing!\n",
            "--===============1958295626==--\n"
        );

        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.text.as_deref(), Some(&b"Testing!"[..]));
    }

    #[test]
    fn test_multipart_missing_boundary() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\nwhatever\r\n";
        assert!(matches!(Message::parse(raw), Err(Error::MissingBoundary)));
    }

    #[test]
    fn test_invalid_content_type() {
        let raw = b"Content-Type: text\r\n\r\nbody";
        assert!(matches!(
            Message::parse(raw),
            Err(Error::InvalidContentType(_))
        ));
    }

    #[test]
    fn test_parse_parts_defaults_content_type() {
        let mut parts = Vec::new();
        parse_parts(Headers::new(), b"no headers here", &mut parts).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(
            parts[0].headers.get("Content-Type"),
            Some("text/plain; charset=us-ascii")
        );
        assert_eq!(parts[0].body, b"no headers here");
    }

    #[test]
    fn test_round_trip_text() {
        let original = Message::new()
            .with_from("Jordan Wright <test@example.com>")
            .with_to("to@example.com")
            .with_subject("Grüße")
            .with_text("Line one\nLine two with a long enough tail to need a soft line break somewhere.\n");

        let decoded = Message::parse(&original.to_bytes()).unwrap();
        assert_eq!(decoded.from, original.from);
        assert_eq!(decoded.to, original.to);
        assert_eq!(decoded.subject, original.subject);
        assert_eq!(
            decoded.text.unwrap(),
            b"Line one\r\nLine two with a long enough tail to need a soft line break somewhere.\r\n"
        );
    }

    #[test]
    fn test_round_trip_alternative_with_attachment() {
        let mut original = Message::new()
            .with_from("from@example.com")
            .with_to("to@example.com")
            .with_text("Text Body is, of course, supported!")
            .with_html("<h1>Fancy Html is supported, too!</h1>");
        original
            .attach(&b"Let's just pretend this is raw JPEG data."[..], "cat.jpeg", "image/jpeg")
            .unwrap();

        let raw = original.to_bytes();
        let decoded = Message::parse(&raw).unwrap();
        assert_eq!(decoded.text, original.text);
        assert_eq!(decoded.html, original.html);

        let mut parts = Vec::new();
        let (headers, body) = Headers::parse_entity(&raw).unwrap();
        parse_parts(headers, body, &mut parts).unwrap();
        let non_text: Vec<_> = parts
            .iter()
            .filter(|p| !p.content_type().unwrap().is_text())
            .collect();
        assert_eq!(non_text.len(), 1);
        assert_eq!(non_text[0].body, b"Let's just pretend this is raw JPEG data.");
    }
}
