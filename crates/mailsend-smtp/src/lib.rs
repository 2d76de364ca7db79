//! # mailsend-smtp
//!
//! SMTP client session for delivering [`mailsend_mime::Message`]s.
//!
//! ## Features
//!
//! - **Memoized greeting**: EHLO with HELO fallback, run once on first use
//! - **TLS**: implicit TLS and STARTTLS, with the transport rebuilt by the
//!   same factory after the upgrade
//! - **Authentication**: pluggable [`Auth`] strategies, LOGIN and PLAIN included
//! - **Swappable transport**: [`TextConn`] sits between the session and the
//!   stream; [`LoggedConn`] records the conversation
//! - **One-shot sending**: [`SmtpClientConfig::simple_send`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailsend_mime::Message;
//! use mailsend_smtp::{Client, LoginAuth, Proto, connect, tls_config};
//!
//! #[tokio::main]
//! async fn main() -> mailsend_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 587, Proto::Tcp).await?;
//!     let auth = LoginAuth::new("user@example.com", "password");
//!     let mut client =
//!         Client::new(stream, "smtp.example.com", Some(&auth), Some(tls_config())).await?;
//!
//!     let message = Message::new()
//!         .with_from("Sender <user@example.com>")
//!         .with_to("recipient@example.com")
//!         .with_subject("Hello")
//!         .with_text("Hello, World!");
//!     client.send(&message).await?;
//!
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! greeting (220) ──→ EHLO/HELO ──→ [STARTTLS + EHLO] ──→ [AUTH]
//!                                                          │
//!          ┌───────────────────────────────────────────────┘
//!          ↓
//!        MAIL ──→ RCPT+ ──→ DATA ──→ (MAIL ... | RSET | QUIT)
//! ```
//!
//! ## Modules
//!
//! - [`auth`]: Authentication strategies
//! - [`command`]: SMTP command lines
//! - [`config`]: Client configuration and one-shot sending
//! - [`connection`]: Streams, transports and the session
//! - [`parser`]: Reply parser
//! - [`types`]: Replies and extensions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod config;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use auth::{Auth, LoginAuth, PlainAuth, ServerInfo};
pub use config::{Mode, SmtpClientConfig};
pub use connection::{
    Client, DataWriter, LineConn, LoggedConn, Proto, SmtpStream, TextConn, TextConnFactory,
    TrafficLog, connect, connect_tls, logged, tls_config,
};
pub use error::{Error, Result};
pub use types::{Extensions, Reply, ReplyCode};
