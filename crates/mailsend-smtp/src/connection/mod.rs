//! Connection layer: raw streams, the line transport and the session.

mod client;
mod logged;
mod stream;
mod text;

pub use client::{Client, DataWriter, TextConnFactory};
pub use logged::{LoggedConn, TrafficLog, logged};
pub use stream::{Connection, Proto, SmtpStream, connect, connect_tls, tls_config};
pub use text::{LineConn, TextConn};
