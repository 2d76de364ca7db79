//! SMTP session state machine.

use super::stream::SmtpStream;
use super::text::{LineConn, TextConn};
use crate::auth::{Auth, ServerInfo};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::types::{Extensions, Reply, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mailsend_mime::Message;
use std::fmt;
use std::sync::Arc;
use tokio_rustls::rustls::ClientConfig;
use tracing::{debug, warn};

/// Builds a transport over a raw stream.
///
/// The session keeps the factory and calls it again after STARTTLS, so a
/// wrapping transport such as [`LoggedConn`](super::LoggedConn) stays in place.
pub type TextConnFactory<T> = Arc<dyn Fn(SmtpStream) -> T + Send + Sync>;

/// Name sent in the greeting unless [`Client::hello`] overrides it.
const DEFAULT_LOCAL_NAME: &str = "localhost";

/// Rejects arguments that would inject extra command lines.
fn validate_line(line: &str) -> Result<()> {
    if line.contains(['\r', '\n']) {
        return Err(Error::LineHasCrLf);
    }
    Ok(())
}

/// An established SMTP session.
///
/// The EHLO/HELO greeting runs once, on the first operation that needs it;
/// its outcome is cached.
pub struct Client<T: TextConn = LineConn> {
    text: Option<T>,
    factory: TextConnFactory<T>,
    server_name: String,
    is_tls: bool,
    ext: Option<Extensions>,
    auth: Vec<String>,
    local_name: String,
    did_hello: bool,
    hello_error: Option<Arc<Error>>,
}

impl<T: TextConn> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("server_name", &self.server_name)
            .field("is_tls", &self.is_tls)
            .field("ext", &self.ext)
            .field("auth", &self.auth)
            .field("local_name", &self.local_name)
            .field("did_hello", &self.did_hello)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Client<LineConn> {
    /// Establishes a session over `stream` with the default transport.
    ///
    /// See [`Client::with_factory`].
    ///
    /// # Errors
    ///
    /// Returns the first error of the establishment sequence.
    pub async fn new(
        stream: SmtpStream,
        server_name: &str,
        auth: Option<&dyn Auth>,
        starttls: Option<Arc<ClientConfig>>,
    ) -> Result<Self> {
        Self::with_factory(stream, server_name, auth, starttls, Arc::new(LineConn::new)).await
    }
}

impl<T: TextConn> Client<T> {
    /// Establishes a session over `stream`.
    ///
    /// Reads the 220 greeting, sends `EHLO localhost` (or HELO), upgrades
    /// with STARTTLS when `starttls` is given on a plain stream, then
    /// authenticates when `auth` is given and the server offers AUTH. The
    /// connection is closed if any step fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StartTlsNotOffered`] if TLS was requested but not
    /// advertised, or the first error of the sequence.
    pub async fn with_factory(
        stream: SmtpStream,
        server_name: &str,
        auth: Option<&dyn Auth>,
        starttls: Option<Arc<ClientConfig>>,
        factory: TextConnFactory<T>,
    ) -> Result<Self> {
        let is_tls = stream.is_tls();
        let mut text = factory(stream);
        if let Err(err) = text.read_response(ReplyCode::SERVICE_READY.as_u16()).await {
            let _ = text.close().await;
            return Err(err);
        }
        debug!(server_name, is_tls, "Server greeting received");

        let mut client = Self {
            text: Some(text),
            factory,
            server_name: server_name.to_string(),
            is_tls,
            ext: None,
            auth: Vec::new(),
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            did_hello: false,
            hello_error: None,
        };

        match client.establish(auth, starttls).await {
            Ok(()) => Ok(client),
            Err(err) => {
                let _ = client.close().await;
                Err(err)
            }
        }
    }

    async fn establish(
        &mut self,
        auth: Option<&dyn Auth>,
        starttls: Option<Arc<ClientConfig>>,
    ) -> Result<()> {
        self.hello(DEFAULT_LOCAL_NAME).await?;

        if !self.is_tls
            && let Some(config) = starttls
        {
            if self.extension("STARTTLS").await.is_none() {
                return Err(Error::StartTlsNotOffered);
            }
            self.starttls(config).await?;
        }

        if let Some(auth) = auth
            && self.extension("AUTH").await.is_some()
        {
            self.auth(auth).await?;
        }

        Ok(())
    }

    /// Returns true if the session runs over TLS.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.is_tls
    }

    /// Returns the server name the session was created for.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Returns true once the connection has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.text.is_none()
    }

    /// Returns the mechanisms from the last `AUTH` extension seen.
    #[must_use]
    pub fn auth_mechanisms(&self) -> &[String] {
        &self.auth
    }

    /// Sends one command and reads its reply within a response scope.
    async fn cmd(&mut self, expect: u16, command: &Command) -> Result<Reply> {
        let text = self.text.as_mut().ok_or(Error::ConnectionClosed)?;
        let id = text.cmd(&command.to_string()).await?;
        text.start_response(id);
        let reply = text.read_response(expect).await;
        text.end_response(id);
        reply
    }

    /// Runs the greeting once and returns its cached outcome.
    async fn greet(&mut self) -> Result<()> {
        if !self.did_hello {
            self.did_hello = true;
            if let Err(err) = self.ehlo().await {
                debug!(error = %err, "EHLO rejected, falling back to HELO");
                if let Err(err) = self.helo().await {
                    warn!(error = %err, "HELO rejected");
                    self.hello_error = Some(Arc::new(err));
                }
            }
        }

        match &self.hello_error {
            Some(err) => Err(Error::Greeting(Arc::clone(err))),
            None => Ok(()),
        }
    }

    async fn helo(&mut self) -> Result<()> {
        self.ext = None;
        let command = Command::Helo {
            hostname: self.local_name.clone(),
        };
        self.cmd(ReplyCode::OK.as_u16(), &command).await?;
        Ok(())
    }

    async fn ehlo(&mut self) -> Result<()> {
        let command = Command::Ehlo {
            hostname: self.local_name.clone(),
        };
        let reply = self.cmd(ReplyCode::OK.as_u16(), &command).await?;

        let ext = Extensions::from_ehlo(&reply.message);
        if let Some(mechanisms) = ext.auth_mechanisms() {
            self.auth = mechanisms;
        }
        debug!(extensions = ext.len(), "EHLO accepted");
        self.ext = Some(ext);
        Ok(())
    }

    /// Sets the name sent in the greeting and greets the server.
    ///
    /// Only legal before any other operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LateHello`] if the greeting already ran,
    /// [`Error::LineHasCrLf`] for an invalid name, or the greeting error.
    pub async fn hello(&mut self, local_name: &str) -> Result<()> {
        validate_line(local_name)?;
        if self.did_hello {
            return Err(Error::LateHello);
        }
        self.local_name = local_name.to_string();
        self.greet().await
    }

    /// Upgrades the session to TLS and greets the server again.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses STARTTLS or the handshake fails.
    pub async fn starttls(&mut self, config: Arc<ClientConfig>) -> Result<()> {
        self.greet().await?;
        self.cmd(ReplyCode::SERVICE_READY.as_u16(), &Command::StartTls)
            .await?;

        let text = self.text.take().ok_or(Error::ConnectionClosed)?;
        let stream = text
            .into_stream()
            .upgrade_to_tls(config, &self.server_name)
            .await?;
        self.is_tls = true;
        self.text = Some((self.factory)(stream));
        debug!(server_name = %self.server_name, "STARTTLS upgrade complete");

        self.ehlo().await
    }

    /// Looks up an advertised extension, returning its parameters.
    ///
    /// The name is matched case-insensitively. Returns `None` if the
    /// greeting failed or the server uses HELO.
    pub async fn extension(&mut self, name: &str) -> Option<String> {
        self.greet().await.ok()?;
        self.ext.as_ref()?.get(name).map(String::from)
    }

    /// Authenticates with `auth`.
    ///
    /// Any failure, including a rejected challenge, cancels the exchange with
    /// `*` and ends the session.
    ///
    /// # Errors
    ///
    /// Returns the strategy's error or the server's rejection.
    pub async fn auth(&mut self, auth: &dyn Auth) -> Result<()> {
        self.greet().await?;

        let info = ServerInfo {
            name: self.server_name.clone(),
            tls: self.is_tls,
            auth: self.auth.clone(),
        };
        let (mechanism, initial) = match auth.start(&info) {
            Ok(start) => start,
            Err(err) => {
                self.terminate().await;
                return Err(err);
            }
        };

        let command = Command::Auth {
            initial_response: (!initial.is_empty()).then(|| STANDARD.encode(&initial)),
            mechanism,
        };
        let mut reply = self.cmd(0, &command).await?;

        loop {
            let code = reply.code;
            let challenge = match code {
                ReplyCode::AUTH_CONTINUE => STANDARD
                    .decode(reply.message_text())
                    .map_err(|err| Error::Protocol(format!("Invalid base64 challenge: {err}"))),
                ReplyCode::AUTH_SUCCESS => Ok(reply.message_text().into_bytes()),
                _ => Err(Error::smtp_error(code.as_u16(), reply.message_text())),
            };
            let step = challenge
                .and_then(|challenge| auth.next(&challenge, code == ReplyCode::AUTH_CONTINUE));

            match step {
                Ok(Some(response)) => {
                    let command = Command::AuthResponse(STANDARD.encode(response));
                    reply = self.cmd(0, &command).await?;
                }
                Ok(None) => {
                    debug!("Authenticated");
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "Authentication failed");
                    let _ = self
                        .cmd(ReplyCode::PARAMETER_ERROR.as_u16(), &Command::AuthAbort)
                        .await;
                    self.terminate().await;
                    return Err(err);
                }
            }
        }
    }

    /// Starts a mail transaction with `MAIL FROM`.
    ///
    /// Adds `BODY=8BITMIME` when the server supports it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LineHasCrLf`] before sending anything if `from`
    /// contains a line break, or the server's rejection.
    pub async fn mail(&mut self, from: &str) -> Result<()> {
        validate_line(from)?;
        self.greet().await?;

        let body = self
            .ext
            .as_ref()
            .filter(|ext| ext.contains("8BITMIME"))
            .map(|_| "8BITMIME".to_string());
        let command = Command::MailFrom {
            from: from.to_string(),
            body,
        };
        self.cmd(ReplyCode::OK.as_u16(), &command).await?;
        Ok(())
    }

    /// Adds a recipient with `RCPT TO`; 250 and 251 are both accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LineHasCrLf`] before sending anything if `to`
    /// contains a line break, or the server's rejection.
    pub async fn rcpt(&mut self, to: &str) -> Result<()> {
        validate_line(to)?;
        let command = Command::RcptTo { to: to.to_string() };
        self.cmd(25, &command).await?;
        Ok(())
    }

    /// Issues `DATA` and returns a writer for the message content.
    ///
    /// [`DataWriter::close`] must be called to finish the transaction.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection.
    pub async fn data(&mut self) -> Result<DataWriter<'_, T>> {
        self.cmd(ReplyCode::START_DATA.as_u16(), &Command::Data)
            .await?;
        Ok(DataWriter { client: self })
    }

    /// Sends a whole message: envelope, then serialized content.
    ///
    /// The envelope sender is the bare address of `sender` (or `from`);
    /// recipients are To, then Cc, then Bcc.
    ///
    /// # Errors
    ///
    /// Returns the first address, serialization or protocol error. Nothing
    /// is sent if the addresses do not parse.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let recipients = message.parse_to_from_addrs()?;
        let sender = message.parse_sender()?;
        let raw = message.to_bytes();

        self.mail(sender.address.as_str()).await?;
        for recipient in &recipients {
            self.rcpt(recipient.address.as_str()).await?;
        }

        let mut writer = self.data().await?;
        match writer.write(&raw).await {
            Ok(()) => writer.close().await?,
            Err(err) => {
                let _ = writer.close().await;
                return Err(err);
            }
        }

        debug!(recipients = recipients.len(), bytes = raw.len(), "Message sent");
        Ok(())
    }

    /// Aborts the current mail transaction with `RSET`.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection.
    pub async fn reset(&mut self) -> Result<()> {
        self.greet().await?;
        self.cmd(ReplyCode::OK.as_u16(), &Command::Rset).await?;
        Ok(())
    }

    /// Sends `NOOP`.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection.
    pub async fn noop(&mut self) -> Result<()> {
        self.greet().await?;
        self.cmd(ReplyCode::OK.as_u16(), &Command::Noop).await?;
        Ok(())
    }

    /// Sends `QUIT` and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection or a close error.
    pub async fn quit(&mut self) -> Result<()> {
        self.greet().await?;
        self.cmd(ReplyCode::CLOSING.as_u16(), &Command::Quit)
            .await?;
        self.close().await
    }

    /// Sends `QUIT` if the server still listens, then closes regardless.
    async fn terminate(&mut self) {
        let _ = self.quit().await;
        let _ = self.close().await;
    }

    /// Closes the connection without `QUIT`. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if shutting the stream down fails.
    pub async fn close(&mut self) -> Result<()> {
        match self.text.take() {
            Some(mut text) => text.close().await,
            None => Ok(()),
        }
    }
}

/// Writer for the DATA phase of a transaction.
#[derive(Debug)]
pub struct DataWriter<'a, T: TextConn> {
    client: &'a mut Client<T>,
}

impl<T: TextConn> DataWriter<'_, T> {
    /// Writes message content; line endings and leading dots are escaped.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let text = self.client.text.as_mut().ok_or(Error::ConnectionClosed)?;
        text.write_data(data).await
    }

    /// Ends the content and reads the server's final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the message.
    pub async fn close(self) -> Result<()> {
        let text = self.client.text.as_mut().ok_or(Error::ConnectionClosed)?;
        text.close_data().await?;
        text.read_response(ReplyCode::OK.as_u16()).await?;
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
    fn test_validate_line() {
        assert!(validate_line("user@example.com").is_ok());
        assert!(matches!(
            validate_line("user@example.com\r\nRCPT TO:<x@y>"),
            Err(Error::LineHasCrLf)
        ));
        assert!(validate_line("a\nb").is_err());
        assert!(validate_line("a\rb").is_err());
    }
}
