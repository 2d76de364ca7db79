//! # mailsend-mime
//!
//! Email message model and MIME codec.
//!
//! ## Features
//!
//! - **Message model**: addresses, subject, text/HTML bodies, custom headers, attachments
//! - **Encoding**: `multipart/mixed` and `multipart/alternative` bodies, quoted-printable text,
//!   base64 attachments wrapped at 76 columns, RFC 2047 header words
//! - **Decoding**: recursive multipart walking with flattened leaves
//! - **Addresses**: mailbox parsing and envelope sender/recipient selection
//!
//! ## Quick Start
//!
//! ### Building a Message
//!
//! ```ignore
//! use mailsend_mime::Message;
//!
//! let mut message = Message::new()
//!     .with_from("Sender <sender@example.com>")
//!     .with_to("recipient@example.com")
//!     .with_subject("Quarterly report")
//!     .with_text("Plain text version")
//!     .with_html("<p>HTML version</p>");
//! message.attach_file("report.pdf")?;
//!
//! let wire = message.to_bytes();
//! ```
//!
//! ### Parsing a Message
//!
//! ```ignore
//! use mailsend_mime::Message;
//!
//! let message = Message::parse(raw_bytes)?;
//! println!("Subject: {}", message.subject);
//! ```
//!
//! ### Encoding/Decoding
//!
//! ```ignore
//! use mailsend_mime::encoding::{encode_quoted_printable, encode_rfc2047};
//!
//! let encoded = encode_quoted_printable("Héllo, Wørld!".as_bytes());
//! let subject = encode_rfc2047("Héllo", "UTF-8");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod decode;
mod encode;
mod error;
mod header;
mod message;
mod multipart;
mod part;

pub mod encoding;

pub use address::{Address, Mailbox};
pub use content_type::{ContentType, DEFAULT_CONTENT_TYPE};
pub use encode::generate_message_id;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Attachment, Message};
pub use multipart::generate_boundary;
pub use part::TransferEncoding;
