//! Client configuration and one-shot sending.
//!
//! # Example
//!
//! ```ignore
//! use mailsend_smtp::SmtpClientConfig;
//!
//! let config = SmtpClientConfig::from_json(r#"{
//!     "Server": "smtp.office365.com",
//!     "Port": 587,
//!     "Username": "user@example.com",
//!     "Password": "secret",
//!     "Mode": "starttls",
//!     "TimeoutMsec": 30000,
//!     "SMTPLog": "-"
//! }"#)?;
//! config.simple_send(&[message]).await?;
//! ```

use crate::auth::{Auth, LoginAuth};
use crate::connection::{
    Client, LineConn, Proto, SmtpStream, TextConn, TextConnFactory, TrafficLog, connect,
    connect_tls, logged, tls_config,
};
use crate::error::{Error, Result};
use mailsend_mime::Message;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls::ClientConfig;
use tracing::{debug, info};

/// How the connection is encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// No encryption.
    #[default]
    Unencrypted,
    /// Plain connect, then STARTTLS (required).
    StartTls,
    /// TLS from the first byte.
    ForceTls,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "UNENCRYPTED" => Ok(Self::Unencrypted),
            "STARTTLS" => Ok(Self::StartTls),
            "FORCETLS" => Ok(Self::ForceTls),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unencrypted => f.write_str("UNENCRYPTED"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::ForceTls => f.write_str("FORCETLS"),
        }
    }
}

/// Configuration as written in JSON.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawConfig {
    server: String,
    port: u16,
    username: String,
    password: String,
    mode: Option<String>,
    timeout_msec: u32,
    proto: String,
    #[serde(rename = "SMTPLog")]
    smtp_log: String,
}

/// SMTP client settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawConfig")]
pub struct SmtpClientConfig {
    /// Server host name, also used to verify its certificate.
    pub server: String,
    /// Server port.
    pub port: u16,
    /// LOGIN user name.
    pub username: String,
    /// LOGIN password.
    pub password: String,
    /// Encryption mode.
    pub mode: Mode,
    /// Limit for dialing and each session phase; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Address family to dial.
    pub proto: Proto,
    /// Traffic log target: a file path, or `-` for stdout.
    pub smtp_log: Option<String>,
}

impl fmt::Debug for SmtpClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpClientConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("proto", &self.proto)
            .field("smtp_log", &self.smtp_log)
            .finish()
    }
}

impl TryFrom<RawConfig> for SmtpClientConfig {
    type Error = Error;

    fn try_from(raw: RawConfig) -> Result<Self> {
        Ok(Self {
            mode: raw.mode.as_deref().map_or(Ok(Mode::Unencrypted), str::parse)?,
            proto: raw.proto.parse()?,
            timeout: (raw.timeout_msec > 0)
                .then(|| Duration::from_millis(u64::from(raw.timeout_msec))),
            smtp_log: (!raw.smtp_log.is_empty()).then_some(raw.smtp_log),
            server: raw.server,
            port: raw.port,
            username: raw.username,
            password: raw.password,
        })
    }
}

impl SmtpClientConfig {
    /// Creates a configuration with no timeout and no traffic log.
    pub fn new(server: impl Into<String>, port: u16, mode: Mode) -> Self {
        Self {
            server: server.into(),
            port,
            username: String::new(),
            password: String::new(),
            mode,
            timeout: None,
            proto: Proto::Tcp,
            smtp_log: None,
        }
    }

    /// Sets the LOGIN credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the per-phase timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] for an unknown `Mode`, or
    /// [`Error::Config`] for malformed JSON or an unknown `Proto`.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))?;
        raw.try_into()
    }

    /// Runs `fut` under the configured timeout.
    async fn within<R>(&self, fut: impl Future<Output = Result<R>>) -> Result<R> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("SMTP operation exceeded {limit:?}"),
                ))
            })?,
            None => fut.await,
        }
    }

    async fn dial(&self, tls: Arc<ClientConfig>) -> Result<SmtpStream> {
        debug!(server = %self.server, port = self.port, mode = %self.mode, "Dialing");
        match self.mode {
            Mode::ForceTls => connect_tls(&self.server, self.port, self.proto, tls).await,
            Mode::StartTls | Mode::Unencrypted => {
                connect(&self.server, self.port, self.proto).await
            }
        }
    }

    /// Opens a session, sends every message in order, then quits.
    ///
    /// Authenticates with LOGIN when the server offers AUTH. The timeout is
    /// applied separately to connecting, establishing the session, each
    /// message and the final QUIT.
    ///
    /// # Errors
    ///
    /// Returns the first error; later messages are not sent.
    pub async fn simple_send(&self, messages: &[Message]) -> Result<()> {
        let tls = tls_config();
        let stream = self.within(self.dial(Arc::clone(&tls))).await?;
        let starttls = (self.mode == Mode::StartTls).then_some(tls);

        match &self.smtp_log {
            Some(target) => {
                let factory = logged(TrafficLog::from_target(target, true)?);
                self.run(stream, starttls, factory, messages).await
            }
            None => {
                let factory: TextConnFactory<LineConn> = Arc::new(LineConn::new);
                self.run(stream, starttls, factory, messages).await
            }
        }
    }

    async fn run<T: TextConn>(
        &self,
        stream: SmtpStream,
        starttls: Option<Arc<ClientConfig>>,
        factory: TextConnFactory<T>,
        messages: &[Message],
    ) -> Result<()> {
        let login = LoginAuth::new(&self.username, &self.password);
        let auth: &dyn Auth = &login;
        let mut client = self
            .within(Client::with_factory(
                stream,
                &self.server,
                Some(auth),
                starttls,
                factory,
            ))
            .await?;

        for message in messages {
            self.within(client.send(message)).await?;
        }

        self.within(client.quit()).await?;
        info!(server = %self.server, count = messages.len(), "Messages delivered");
        Ok(())
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

    #[test]
    fn test_mode_parse() {
        assert_eq!("unencrypted".parse::<Mode>().unwrap(), Mode::Unencrypted);
        assert_eq!(" StartTLS ".parse::<Mode>().unwrap(), Mode::StartTls);
        assert_eq!("FORCETLS".parse::<Mode>().unwrap(), Mode::ForceTls);
        assert!(matches!("ssl".parse::<Mode>(), Err(Error::InvalidMode(_))));
    }

    #[test]
    fn test_from_json_full() {
        let config = SmtpClientConfig::from_json(
            r#"{
                "Server": "smtp.office365.com",
                "Port": 587,
                "Username": "user@example.com",
                "Password": "secret",
                "Mode": "starttls",
                "TimeoutMsec": 1500,
                "Proto": "tcp4",
                "SMTPLog": "/tmp/smtp.log"
            }"#,
        )
        .unwrap();

        assert_eq!(config.server, "smtp.office365.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.username, "user@example.com");
        assert_eq!(config.password, "secret");
        assert_eq!(config.mode, Mode::StartTls);
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.proto, Proto::Tcp4);
        assert_eq!(config.smtp_log.as_deref(), Some("/tmp/smtp.log"));
    }

    #[test]
    fn test_from_json_defaults() {
        let config =
            SmtpClientConfig::from_json(r#"{"Server": "localhost", "Port": 25, "Mode": "UNENCRYPTED"}"#)
                .unwrap();
        assert_eq!(config.timeout, None);
        assert_eq!(config.proto, Proto::Tcp);
        assert_eq!(config.smtp_log, None);
    }

    #[test]
    fn test_from_json_mode() {
        let result = SmtpClientConfig::from_json(r#"{"Server": "localhost", "Mode": "TLS"}"#);
        assert!(matches!(result, Err(Error::InvalidMode(ref m)) if m == "TLS"));

        let empty = SmtpClientConfig::from_json(r#"{"Server": "localhost", "Mode": ""}"#);
        assert!(matches!(empty, Err(Error::InvalidMode(_))));

        let missing = SmtpClientConfig::from_json(r#"{"Server": "localhost"}"#).unwrap();
        assert_eq!(missing.mode, Mode::Unencrypted);
    }

    #[test]
    fn test_from_json_malformed() {
        assert!(matches!(
            SmtpClientConfig::from_json("{not json"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SmtpClientConfig::from_json(r#"{"Mode": "STARTTLS", "Proto": "udp"}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_serde_deserialize() {
        let config: SmtpClientConfig =
            serde_json::from_str(r#"{"Server": "mx", "Port": 465, "Mode": "forcetls"}"#).unwrap();
        assert_eq!(config, SmtpClientConfig::new("mx", 465, Mode::ForceTls));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = SmtpClientConfig::new("mx", 25, Mode::Unencrypted)
            .with_credentials("user", "hunter2");
        let debug = format!("{config:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_within_times_out() {
        let config = SmtpClientConfig::new("mx", 25, Mode::Unencrypted)
            .with_timeout(Duration::from_millis(10));
        let result = config
            .within(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::TimedOut));
    }
}
