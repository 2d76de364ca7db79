//! Message serialization to RFC 5322 wire form.

use crate::content_type::ContentType;
use crate::encoding::{base64_wrap, encode_quoted_printable};
use crate::header::Headers;
use crate::message::Message;
use crate::multipart::MultipartWriter;
use crate::part::TransferEncoding;
use chrono::Local;
use rand::RngCore;
use rand::rngs::OsRng;

/// Host used in generated Message-Ids when the hostname is unavailable.
const FALLBACK_HOST: &str = "localhost.localdomain";

/// RFC 2822 date layout with numeric zone.
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Derived top-level headers, in output order.
const DERIVED_HEADERS: [&str; 8] = [
    "Reply-To",
    "To",
    "Cc",
    "From",
    "Subject",
    "Date",
    "Message-Id",
    "MIME-Version",
];

/// Generates a globally unique Message-Id: `<nanos.pid.random@host>`.
#[must_use]
pub fn generate_message_id() -> String {
    let nanos = Local::now().timestamp_nanos_opt().unwrap_or_default();
    let pid = std::process::id();
    let random = OsRng.next_u64() >> 1;
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| FALLBACK_HOST.to_string());
    format!("<{nanos}.{pid}.{random}@{host}>")
}

impl Message {
    /// Merges the message fields with the custom headers.
    ///
    /// A custom header always wins over the value derived from a field.
    /// `self.headers` is left untouched.
    fn msg_headers(&self) -> Headers {
        let mut res = Headers::new();

        for name in DERIVED_HEADERS {
            if self.headers.contains(name) {
                let values = self.headers.get_all(name).into_iter().map(String::from).collect();
                res.set_all(name, values);
                continue;
            }

            let derived = match name {
                "Reply-To" => join_nonempty(&self.reply_to),
                "To" => join_nonempty(&self.to),
                "Cc" => join_nonempty(&self.cc),
                "From" => Some(self.from.clone()),
                "Subject" => Some(self.subject.clone()).filter(|s| !s.is_empty()),
                "Date" => Some(Local::now().format(DATE_FORMAT).to_string()),
                "Message-Id" => Some(generate_message_id()),
                _ => Some("1.0".to_string()),
            };
            if let Some(value) = derived {
                res.set(name, value);
            }
        }

        if !self.headers.contains("Disposition-Notification-To")
            && let Some(receipt) = join_nonempty(&self.read_receipt)
        {
            res.set("Disposition-Notification-To", receipt);
        }

        for (name, values) in self.headers.fields() {
            if !res.contains(name) {
                res.set_all(name, values.to_vec());
            }
        }

        res
    }

    /// Serializes the message, headers and body, ready for the DATA phase.
    ///
    /// The body shape depends on the content: attachments produce
    /// `multipart/mixed` (nesting a `multipart/alternative` part when both
    /// text and HTML are set), text plus HTML alone produce
    /// `multipart/alternative`, and anything else is a single quoted-printable
    /// `text/html` or `text/plain` part.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut headers = self.msg_headers();

        let text = self.text.as_deref().filter(|t| !t.is_empty());
        let html = self.html.as_deref().filter(|h| !h.is_empty());
        let is_mixed = !self.attachments.is_empty();
        let is_alternative = text.is_some() && html.is_some();

        let writer = (is_mixed || is_alternative).then(MultipartWriter::new);
        match &writer {
            Some(writer) => {
                let sub_type = if is_mixed { "mixed" } else { "alternative" };
                headers.set("Content-Type", multipart_header(sub_type, writer));
                headers.remove("Content-Transfer-Encoding");
            }
            None => {
                let content_type = if html.is_some() {
                    ContentType::text_html()
                } else {
                    ContentType::text_plain()
                };
                headers.set("Content-Type", content_type.to_string());
                headers.set(
                    "Content-Transfer-Encoding",
                    TransferEncoding::QuotedPrintable.to_string(),
                );
            }
        }

        let mut out = Vec::with_capacity(4096);
        headers.write_to(&mut out);
        out.extend_from_slice(b"\r\n");

        let Some(mut outer) = writer else {
            let body = text.or(html).unwrap_or_default();
            out.extend_from_slice(&encode_quoted_printable(body));
            return out;
        };

        if is_mixed && is_alternative {
            let mut inner = MultipartWriter::new();
            let part_headers: Headers = [("Content-Type", multipart_header("alternative", &inner))]
                .into_iter()
                .collect();
            outer.create_part(&mut out, &part_headers);
            write_text_parts(&mut out, &mut inner, text, html);
            inner.close(&mut out);
        } else {
            write_text_parts(&mut out, &mut outer, text, html);
        }

        for attachment in &self.attachments {
            outer.create_part(&mut out, &attachment.headers);
            base64_wrap(&mut out, &attachment.content);
        }

        outer.close(&mut out);
        out
    }
}

fn join_nonempty(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join(", "))
}

fn multipart_header(sub_type: &str, writer: &MultipartWriter) -> String {
    format!("multipart/{sub_type};\r\n boundary={}", writer.boundary())
}

fn write_text_parts(
    out: &mut Vec<u8>,
    writer: &mut MultipartWriter,
    text: Option<&[u8]>,
    html: Option<&[u8]>,
) {
    let bodies = [
        (text, ContentType::text_plain()),
        (html, ContentType::text_html()),
    ];
    for (body, content_type) in bodies {
        let Some(body) = body else { continue };
        let headers: Headers = [
            ("Content-Type", content_type.to_string()),
            (
                "Content-Transfer-Encoding",
                TransferEncoding::QuotedPrintable.to_string(),
            ),
        ]
        .into_iter()
        .collect();
        writer.create_part(out, &headers);
        out.extend_from_slice(&encode_quoted_printable(body));
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
    use crate::multipart::split_parts;

    fn sample() -> Message {
        Message::new()
            .with_from("Jordan Wright <test@example.com>")
            .with_to("test@example.com")
            .with_cc("test_cc@example.com")
            .with_bcc("test_bcc@example.com")
            .with_subject("Awesome Subject")
    }

    fn header_block(raw: &[u8]) -> Headers {
        Headers::parse_entity(raw).unwrap().0
    }

    #[test]
    fn test_message_id_format() {
        let id = generate_message_id();
        assert!(id.starts_with('<') && id.ends_with('>'));
        let (left, host) = id[1..id.len() - 1].split_once('@').unwrap();
        assert!(!host.is_empty());
        let fields: Vec<_> = left.split('.').collect();
        assert_eq!(fields.len(), 3);
        assert!(fields.iter().all(|f| f.parse::<u128>().is_ok()));
        assert_eq!(fields[1], std::process::id().to_string());
        assert_ne!(id, generate_message_id());
    }

    #[test]
    fn test_derived_headers() {
        let mut message = sample();
        message.reply_to = vec!["reply@example.com".into()];
        message.read_receipt = vec!["receipt@example.com".into()];
        let headers = header_block(&message.to_bytes());

        assert_eq!(headers.get("Reply-To"), Some("reply@example.com"));
        assert_eq!(headers.get("To"), Some("test@example.com"));
        assert_eq!(headers.get("Cc"), Some("test_cc@example.com"));
        assert_eq!(headers.get("From"), Some("Jordan Wright <test@example.com>"));
        assert_eq!(headers.get("Subject"), Some("Awesome Subject"));
        assert_eq!(headers.get("MIME-Version"), Some("1.0"));
        assert_eq!(
            headers.get("Disposition-Notification-To"),
            Some("receipt@example.com")
        );
        assert!(headers.get("Message-Id").is_some());
        assert!(chrono::DateTime::parse_from_rfc2822(headers.get("Date").unwrap()).is_ok());
        assert!(!headers.contains("Bcc"));
    }

    #[test]
    fn test_custom_headers_win_and_are_not_mutated() {
        let message = sample()
            .with_header("To", "other@example.com")
            .with_header("To", "other2@example.com")
            .with_header("Date", "Tue, 1 Jan 2019 00:00:00 +0000")
            .with_header("X-Mailer", "mailsend");
        let before = message.headers.clone();
        let headers = header_block(&message.to_bytes());

        assert_eq!(
            headers.get_all("To"),
            vec!["other@example.com", "other2@example.com"]
        );
        assert_eq!(headers.get("Date"), Some("Tue, 1 Jan 2019 00:00:00 +0000"));
        assert_eq!(headers.get("X-Mailer"), Some("mailsend"));
        assert_eq!(message.headers, before);
    }

    #[test]
    fn test_subject_is_word_encoded() {
        let raw = sample().with_subject("Café ☕").to_bytes();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.contains("Subject: =?UTF-8?q?Caf=C3=A9_=E2=98=95?=\r\n"));
    }

    #[test]
    fn test_text_only_is_single_part() {
        let raw = sample().with_text("Text Body is, of course, supported!\n").to_bytes();
        let (headers, body) = Headers::parse_entity(&raw).unwrap();
        assert_eq!(headers.get("Content-Type"), Some("text/plain; charset=UTF-8"));
        assert_eq!(
            headers.get("Content-Transfer-Encoding"),
            Some("quoted-printable")
        );
        assert_eq!(body, b"Text Body is, of course, supported!\r\n");
    }

    #[test]
    fn test_html_only_is_single_part() {
        let raw = sample().with_html("<h1>Fancy Html is supported, too!</h1>").to_bytes();
        let headers = header_block(&raw);
        assert_eq!(headers.get("Content-Type"), Some("text/html; charset=UTF-8"));
    }

    #[test]
    fn test_no_body_is_empty_text() {
        let raw = sample().to_bytes();
        let (headers, body) = Headers::parse_entity(&raw).unwrap();
        assert_eq!(headers.get("Content-Type"), Some("text/plain; charset=UTF-8"));
        assert!(body.is_empty());
    }

    #[test]
    fn test_text_and_html_is_alternative() {
        let raw = sample().with_text("plain").with_html("<b>html</b>").to_bytes();
        let (headers, body) = Headers::parse_entity(&raw).unwrap();
        let content_type = ContentType::parse(headers.get("Content-Type").unwrap()).unwrap();
        assert_eq!(content_type.mime_type(), "multipart/alternative");

        let parts = split_parts(body, content_type.boundary().unwrap()).unwrap();
        assert_eq!(parts.len(), 2);
        let (first, first_body) = Headers::parse_entity(parts[0]).unwrap();
        assert_eq!(first.get("Content-Type"), Some("text/plain; charset=UTF-8"));
        assert_eq!(first_body, b"plain");
        let (second, second_body) = Headers::parse_entity(parts[1]).unwrap();
        assert_eq!(second.get("Content-Type"), Some("text/html; charset=UTF-8"));
        assert_eq!(second_body, b"<b>html</b>");
    }

    #[test]
    fn test_attachment_with_both_bodies_nests_alternative() {
        let mut message = sample().with_text("plain").with_html("<b>html</b>");
        message
            .attach(&b"Rad attachment"[..], "rad.txt", "text/plain; charset=utf-8")
            .unwrap();
        let raw = message.to_bytes();

        let (headers, body) = Headers::parse_entity(&raw).unwrap();
        let outer = ContentType::parse(headers.get("Content-Type").unwrap()).unwrap();
        assert_eq!(outer.mime_type(), "multipart/mixed");

        let parts = split_parts(body, outer.boundary().unwrap()).unwrap();
        assert_eq!(parts.len(), 2);

        let (inner_headers, inner_body) = Headers::parse_entity(parts[0]).unwrap();
        let inner = ContentType::parse(inner_headers.get("Content-Type").unwrap()).unwrap();
        assert_eq!(inner.mime_type(), "multipart/alternative");
        assert_ne!(inner.boundary(), outer.boundary());
        assert_eq!(split_parts(inner_body, inner.boundary().unwrap()).unwrap().len(), 2);

        let (attachment_headers, attachment_body) = Headers::parse_entity(parts[1]).unwrap();
        assert_eq!(
            attachment_headers.get("Content-Disposition"),
            Some("attachment; filename=\"rad.txt\"")
        );
        assert_eq!(attachment_body, b"UmFkIGF0dGFjaG1lbnQ=\r\n");
    }

    #[test]
    fn test_attachment_with_one_body() {
        let mut message = sample().with_html("<p>hi</p>");
        message.attach(&b"data"[..], "a.bin", "").unwrap();
        let raw = message.to_bytes();

        let (headers, body) = Headers::parse_entity(&raw).unwrap();
        let outer = ContentType::parse(headers.get("Content-Type").unwrap()).unwrap();
        assert_eq!(outer.mime_type(), "multipart/mixed");
        let parts = split_parts(body, outer.boundary().unwrap()).unwrap();
        assert_eq!(parts.len(), 2);
        let (first, _) = Headers::parse_entity(parts[0]).unwrap();
        assert_eq!(first.get("Content-Type"), Some("text/html; charset=UTF-8"));
    }
}
