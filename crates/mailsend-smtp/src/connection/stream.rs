//! Low-level SMTP stream handling.

use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore},
};
use tracing::debug;

/// Raw byte-stream connection a session can run over.
///
/// Implemented for every tokio stream, so tests can drive a session over an
/// in-memory duplex.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// SMTP stream (plain or TLS).
pub enum SmtpStream {
    /// Unencrypted connection.
    Plain(Box<dyn Connection>),
    /// TLS-encrypted connection.
    Tls(Box<TlsStream<Box<dyn Connection>>>),
}

impl fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl SmtpStream {
    /// Wraps an unencrypted connection.
    pub fn plain(conn: impl Connection + 'static) -> Self {
        Self::Plain(Box::new(conn))
    }

    /// Returns true if the stream is encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Upgrades a plain stream to TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted, the server name
    /// is invalid, or the TLS handshake fails.
    pub async fn upgrade_to_tls(self, config: Arc<ClientConfig>, hostname: &str) -> Result<Self> {
        let conn = match self {
            Self::Plain(conn) => conn,
            Self::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::Protocol(format!("Invalid hostname: {hostname}")))?;

        let tls_stream = TlsConnector::from(config)
            .connect(server_name, conn)
            .await?;
        debug!(hostname, "TLS handshake complete");
        Ok(Self::Tls(Box::new(tls_stream)))
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(conn) => Pin::new(conn).poll_read(cx, buf),
            Self::Tls(conn) => Pin::new(conn).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(conn) => Pin::new(conn).poll_write(cx, buf),
            Self::Tls(conn) => Pin::new(conn).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(conn) => Pin::new(conn).poll_flush(cx),
            Self::Tls(conn) => Pin::new(conn).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(conn) => Pin::new(conn).poll_shutdown(cx),
            Self::Tls(conn) => Pin::new(conn).poll_shutdown(cx),
        }
    }
}

/// Network address family used when dialing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Proto {
    /// Any address family.
    #[default]
    Tcp,
    /// IPv4 only.
    Tcp4,
    /// IPv6 only.
    Tcp6,
}

impl Proto {
    const fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Tcp => true,
            Self::Tcp4 => addr.is_ipv4(),
            Self::Tcp6 => addr.is_ipv6(),
        }
    }
}

impl FromStr for Proto {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            other => Err(Error::Config(format!("Unknown network protocol: {other}"))),
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Tcp4 => f.write_str("tcp4"),
            Self::Tcp6 => f.write_str("tcp6"),
        }
    }
}

/// Opens a TCP connection to the first reachable address of `proto`'s family.
async fn dial(hostname: &str, port: u16, proto: Proto) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in lookup_host((hostname, port)).await? {
        if !proto.accepts(&addr) {
            continue;
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(%addr, "Connected");
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(Error::Io(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("No {proto} address for {hostname}"),
        )
    })))
}

/// Connects to an SMTP server over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(hostname: &str, port: u16, proto: Proto) -> Result<SmtpStream> {
    let stream = dial(hostname, port, proto).await?;
    Ok(SmtpStream::plain(stream))
}

/// Connects to an SMTP server over TLS (implicit TLS on port 465).
///
/// # Errors
///
/// Returns an error if the connection or TLS handshake fails.
pub async fn connect_tls(
    hostname: &str,
    port: u16,
    proto: Proto,
    config: Arc<ClientConfig>,
) -> Result<SmtpStream> {
    connect(hostname, port, proto)
        .await?
        .upgrade_to_tls(config, hostname)
        .await
}

/// Creates a TLS client configuration trusting the webpki root certificates.
#[must_use]
pub fn tls_config() -> Arc<ClientConfig> {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_proto_parse() {
        assert_eq!("".parse::<Proto>().unwrap(), Proto::Tcp);
        assert_eq!("TCP4".parse::<Proto>().unwrap(), Proto::Tcp4);
        assert_eq!(" tcp6 ".parse::<Proto>().unwrap(), Proto::Tcp6);
        assert!("udp".parse::<Proto>().is_err());
    }

    #[test]
    fn test_proto_accepts() {
        let v4: SocketAddr = "127.0.0.1:25".parse().unwrap();
        let v6: SocketAddr = "[::1]:25".parse().unwrap();
        assert!(Proto::Tcp.accepts(&v4) && Proto::Tcp.accepts(&v6));
        assert!(Proto::Tcp4.accepts(&v4) && !Proto::Tcp4.accepts(&v6));
        assert!(Proto::Tcp6.accepts(&v6) && !Proto::Tcp6.accepts(&v4));
    }

    #[tokio::test]
    async fn test_plain_stream_passthrough() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = SmtpStream::plain(client);
        assert!(!stream.is_tls());

        stream.write_all(b"NOOP\r\n").await.unwrap();
        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"NOOP\r\n");

        server.write_all(b"250 OK\r\n").await.unwrap();
        let mut reply = [0u8; 8];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"250 OK\r\n");
    }

    #[test]
    fn test_tls_config_has_roots() {
        let config = tls_config();
        assert!(config.alpn_protocols.is_empty());
    }
}
