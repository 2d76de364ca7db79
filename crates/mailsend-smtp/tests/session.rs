//! Integration tests for the SMTP session.
//!
//! A mock stream replays canned server replies and captures everything the
//! client writes, so whole conversations can be checked without a server.

#![allow(clippy::unwrap_used, clippy::similar_names)]

use std::io::{self, Cursor, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpListener;

use mailsend_mime::Message;
use mailsend_smtp::{
    Auth, Client, Error, LoginAuth, Mode, SmtpClientConfig, SmtpStream, TrafficLog, logged,
    tls_config,
};

/// Mock stream that returns predefined replies.
struct MockStream {
    /// Replies to return (in order).
    responses: Cursor<Vec<u8>>,
    /// Captured bytes sent by the client.
    sent: Arc<Mutex<Vec<u8>>>,
}

impl MockStream {
    fn new(responses: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            responses: Cursor::new(responses.to_vec()),
            sent: Arc::clone(&sent),
        };
        (stream, sent)
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let data = self.responses.get_ref();
        let pos = usize::try_from(self.responses.position()).unwrap();

        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let remaining = &data[pos..];
        let to_read = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..to_read]);
        self.responses.set_position((pos + to_read) as u64);

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn mock(responses: &str) -> (SmtpStream, Arc<Mutex<Vec<u8>>>) {
    let (stream, sent) = MockStream::new(responses.as_bytes());
    (SmtpStream::plain(stream), sent)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn sent_text(sent: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(sent.lock().unwrap().clone()).unwrap()
}

/// Traffic log sink shared with the test.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

const GREETING: &str = "220 mx.example.com ESMTP ready\r\n";
const EHLO_REPLY: &str = "250-mx.example.com greets localhost\r\n250-8BITMIME\r\n250 AUTH LOGIN PLAIN\r\n";

mod establish_tests {
    use super::*;

    #[tokio::test]
    async fn ehlo_records_extensions() {
        let (stream, sent) = mock(&format!("{GREETING}{EHLO_REPLY}"));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        assert_eq!(sent_text(&sent), "EHLO localhost\r\n");
        assert_eq!(client.auth_mechanisms(), ["LOGIN", "PLAIN"]);
        assert_eq!(client.extension("8bitmime").await.as_deref(), Some(""));
        assert_eq!(client.extension("AUTH").await.as_deref(), Some("LOGIN PLAIN"));
        assert_eq!(client.extension("STARTTLS").await, None);
        assert!(!client.is_tls());
        assert_eq!(client.server_name(), "mx.example.com");

        // The greeting is not repeated.
        assert_eq!(sent_text(&sent), "EHLO localhost\r\n");
    }

    #[tokio::test]
    async fn greeting_rejected() {
        let (stream, sent) = mock("554 No SMTP service here\r\n");
        let err = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SmtpError { code: 554, .. }));
        assert!(err.is_permanent());
        assert_eq!(sent_text(&sent), "");
    }

    #[tokio::test]
    async fn connection_closed_before_greeting() {
        let (stream, _sent) = mock("");
        let err = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn helo_fallback_clears_extensions() {
        let (stream, sent) = mock(&format!(
            "{GREETING}502 5.5.2 Command not recognized\r\n250 mx.example.com\r\n"
        ));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        assert_eq!(sent_text(&sent), "EHLO localhost\r\nHELO localhost\r\n");
        assert_eq!(client.extension("8BITMIME").await, None);
        assert!(client.auth_mechanisms().is_empty());
    }

    #[tokio::test]
    async fn greeting_failure_is_cached() {
        let (stream, sent) = mock(&format!("{GREETING}502 No EHLO\r\n554 No HELO either\r\n"));
        let err = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap_err();

        match err {
            Error::Greeting(inner) => {
                assert!(matches!(*inner, Error::SmtpError { code: 554, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sent_text(&sent), "EHLO localhost\r\nHELO localhost\r\n");
    }

    #[tokio::test]
    async fn hello_after_greeting_is_late() {
        let (stream, _sent) = mock(&format!("{GREETING}{EHLO_REPLY}"));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        assert!(matches!(
            client.hello("client.example.org").await,
            Err(Error::LateHello)
        ));
        assert!(matches!(
            client.hello("bad\r\nname").await,
            Err(Error::LineHasCrLf)
        ));
    }

    #[tokio::test]
    async fn starttls_not_offered() {
        let (stream, sent) = mock(&format!("{GREETING}{EHLO_REPLY}"));
        let err = Client::new(stream, "mx.example.com", None, Some(tls_config()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StartTlsNotOffered));
        assert_eq!(sent_text(&sent), "EHLO localhost\r\n");
    }

    #[tokio::test]
    async fn auth_skipped_without_extension() {
        let (stream, sent) = mock(&format!("{GREETING}250-mx\r\n250 8BITMIME\r\n"));
        let auth = LoginAuth::new("user", "pass");
        Client::new(stream, "mx.example.com", Some(&auth), None)
            .await
            .unwrap();
        assert_eq!(sent_text(&sent), "EHLO localhost\r\n");
    }
}

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn login_exchange() {
        let (stream, sent) = mock(&format!(
            "{GREETING}{EHLO_REPLY}\
             334 VXNlcm5hbWU6\r\n\
             334 UGFzc3dvcmQ6\r\n\
             235 2.7.0 Authentication successful\r\n"
        ));
        let auth = LoginAuth::new("user", "pass");
        Client::new(stream, "mx.example.com", Some(&auth), None)
            .await
            .unwrap();

        assert_eq!(
            sent_text(&sent),
            "EHLO localhost\r\nAUTH LOGIN dXNlcg==\r\ndXNlcg==\r\ncGFzcw==\r\n"
        );
    }

    #[tokio::test]
    async fn rejected_credentials_abort_session() {
        let (stream, sent) = mock(&format!(
            "{GREETING}{EHLO_REPLY}\
             535 5.7.8 Authentication credentials invalid\r\n\
             501 Cancelled\r\n\
             221 Bye\r\n"
        ));
        let auth = LoginAuth::new("user", "pass");
        let err = Client::new(stream, "mx.example.com", Some(&auth), None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SmtpError { code: 535, .. }));
        assert_eq!(
            sent_text(&sent),
            "EHLO localhost\r\nAUTH LOGIN dXNlcg==\r\n*\r\nQUIT\r\n"
        );
    }

    #[tokio::test]
    async fn unexpected_challenge_aborts_session() {
        let (stream, sent) = mock(&format!(
            "{GREETING}{EHLO_REPLY}334 VG9rZW46\r\n501 Cancelled\r\n221 Bye\r\n"
        ));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        let auth: &dyn Auth = &LoginAuth::new("user", "pass");
        let err = client.auth(auth).await.unwrap_err();

        assert!(matches!(err, Error::UnexpectedChallenge(ref c) if c == "token"));
        assert!(sent_text(&sent).ends_with("AUTH LOGIN dXNlcg==\r\n*\r\nQUIT\r\n"));
        assert!(matches!(client.noop().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn failed_auth_closes_when_quit_gets_no_reply() {
        let (stream, sent) = mock(&format!(
            "{GREETING}{EHLO_REPLY}535 Bad credentials\r\n501 Aborted\r\n"
        ));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        let auth: &dyn Auth = &LoginAuth::new("user", "pass");
        let err = client.auth(auth).await.unwrap_err();

        assert!(matches!(err, Error::SmtpError { code: 535, .. }));
        assert!(sent_text(&sent).ends_with("*\r\nQUIT\r\n"));
        assert!(client.is_closed());
        assert!(format!("{client:?}").contains("closed: true"));
    }
}

mod transaction_tests {
    use super::*;

    fn message() -> Message {
        Message::new()
            .with_from("Sender <from@example.com>")
            .with_to("to@example.com")
            .with_bcc("hidden@example.com")
            .with_subject("Status")
            .with_text("All good\n.dotted line")
    }

    #[tokio::test]
    async fn send_full_message() {
        let (stream, sent) = mock(&format!(
            "{GREETING}{EHLO_REPLY}\
             250 2.1.0 Sender OK\r\n\
             250 2.1.5 Recipient OK\r\n\
             251 2.1.5 Will forward\r\n\
             354 Start mail input\r\n\
             250 2.0.0 Queued\r\n\
             221 2.0.0 Bye\r\n"
        ));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();
        client.send(&message()).await.unwrap();
        client.quit().await.unwrap();
        client.close().await.unwrap();

        let text = sent_text(&sent);
        let (envelope, data) = text.split_once("DATA\r\n").unwrap();
        assert_eq!(
            envelope,
            "EHLO localhost\r\n\
             MAIL FROM:<from@example.com> BODY=8BITMIME\r\n\
             RCPT TO:<to@example.com>\r\n\
             RCPT TO:<hidden@example.com>\r\n"
        );
        assert!(data.contains("Subject: Status\r\n"));
        assert!(data.contains("From: Sender <from@example.com>\r\n"));
        assert!(data.contains("\r\n..dotted line"));
        assert!(!data.contains("hidden@example.com"));
        assert!(data.ends_with("\r\n.\r\nQUIT\r\n"));
    }

    #[tokio::test]
    async fn send_without_from_fails_before_io() {
        let (stream, sent) = mock(&format!("{GREETING}{EHLO_REPLY}"));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        let err = client
            .send(&Message::new().with_to("to@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Mime(mailsend_mime::Error::MissingAddress)
        ));
        assert_eq!(sent_text(&sent), "EHLO localhost\r\n");
    }

    #[tokio::test]
    async fn rejected_recipient_stops_transaction() {
        let (stream, sent) = mock(&format!(
            "{GREETING}{EHLO_REPLY}250 OK\r\n550 5.1.1 No such user\r\n"
        ));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        let err = client.send(&message()).await.unwrap_err();
        assert!(matches!(err, Error::SmtpError { code: 550, .. }));
        assert!(!sent_text(&sent).contains("DATA"));
    }

    #[tokio::test]
    async fn crlf_in_address_is_rejected_before_io() {
        let (stream, sent) = mock(&format!("{GREETING}{EHLO_REPLY}"));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        assert!(matches!(
            client.mail("a@example.com>\r\nRCPT TO:<b@example.com").await,
            Err(Error::LineHasCrLf)
        ));
        assert!(matches!(
            client.rcpt("b@example.com\n").await,
            Err(Error::LineHasCrLf)
        ));
        assert_eq!(sent_text(&sent), "EHLO localhost\r\n");
    }

    #[tokio::test]
    async fn mail_without_8bitmime() {
        let (stream, sent) = mock(&format!("{GREETING}250 mx\r\n250 OK\r\n"));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();
        client.mail("from@example.com").await.unwrap();
        assert!(sent_text(&sent).ends_with("MAIL FROM:<from@example.com>\r\n"));
    }

    #[tokio::test]
    async fn data_writer_reads_final_reply() {
        let (stream, sent) = mock(&format!(
            "{GREETING}{EHLO_REPLY}354 Go ahead\r\n554 5.6.0 Rejected\r\n"
        ));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        let mut writer = client.data().await.unwrap();
        writer.write(b"Subject: x\r\n\r\nbody\r\n").await.unwrap();
        let err = writer.close().await.unwrap_err();
        assert!(matches!(err, Error::SmtpError { code: 554, .. }));
        assert!(sent_text(&sent).ends_with("DATA\r\nSubject: x\r\n\r\nbody\r\n.\r\n"));
    }

    #[tokio::test]
    async fn reset_noop_quit() {
        let (stream, sent) = mock(&format!(
            "{GREETING}{EHLO_REPLY}250 Reset\r\n250 OK\r\n221 Bye\r\n"
        ));
        let mut client = Client::new(stream, "mx.example.com", None, None)
            .await
            .unwrap();

        client.reset().await.unwrap();
        client.noop().await.unwrap();
        client.quit().await.unwrap();
        client.close().await.unwrap();
        assert!(matches!(client.noop().await, Err(Error::ConnectionClosed)));

        assert_eq!(
            sent_text(&sent),
            "EHLO localhost\r\nRSET\r\nNOOP\r\nQUIT\r\n"
        );
    }
}

mod logging_tests {
    use super::*;

    #[tokio::test]
    async fn logged_factory_records_session() {
        init_tracing();
        let log = SharedBuf::default();
        let (stream, _sent) = mock(&format!("{GREETING}{EHLO_REPLY}221 Bye\r\n"));
        let mut client = Client::with_factory(
            stream,
            "mx.example.com",
            None,
            None,
            logged(TrafficLog::new(log.clone(), false)),
        )
        .await
        .unwrap();
        client.quit().await.unwrap();

        let text = log.text();
        assert!(text.contains("C>\tEHLO localhost"));
        assert!(text.contains("<S\t250 - mx.example.com greets localhost\n<S\t8BITMIME"));
        assert!(text.contains("C>\tQUIT"));
        assert!(text.contains("<S\t221 - Bye"));
        // The 220 greeting is read through the logged transport too.
        assert!(text.contains("<S\t220 - mx.example.com ESMTP ready"));
    }
}

mod starttls_tests {
    use super::*;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::io::{AsyncBufRead, DuplexStream};
    use tokio_rustls::TlsAcceptor;

    /// Self-signed certificate for `mx.example.com` with matching configs.
    fn tls_pair() -> (TlsAcceptor, Arc<rustls::ClientConfig>) {
        let cert = rcgen::generate_simple_self_signed(vec!["mx.example.com".to_string()]).unwrap();
        let cert_der = CertificateDer::from(cert.serialize_der().unwrap());
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            cert.serialize_private_key_der(),
        ));

        let server = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], key_der)
            .unwrap();

        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert_der).unwrap();
        let client = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        (TlsAcceptor::from(Arc::new(server)), Arc::new(client))
    }

    async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    /// Plays the server side: STARTTLS on the plain stream, then a
    /// different EHLO reply once encrypted. Returns the commands received.
    async fn serve(io: DuplexStream, acceptor: TlsAcceptor) -> Vec<String> {
        let mut commands = Vec::new();

        let mut plain = BufReader::new(io);
        plain.get_mut().write_all(GREETING.as_bytes()).await.unwrap();
        commands.push(read_command(&mut plain).await);
        plain
            .get_mut()
            .write_all(b"250-mx.example.com\r\n250-STARTTLS\r\n250 8BITMIME\r\n")
            .await
            .unwrap();
        commands.push(read_command(&mut plain).await);
        plain
            .get_mut()
            .write_all(b"220 2.0.0 Ready to start TLS\r\n")
            .await
            .unwrap();

        let mut tls = BufReader::new(acceptor.accept(plain.into_inner()).await.unwrap());
        commands.push(read_command(&mut tls).await);
        tls.get_mut()
            .write_all(b"250-mx.example.com\r\n250-SIZE 1000\r\n250 AUTH PLAIN\r\n")
            .await
            .unwrap();
        tls.get_mut().flush().await.unwrap();
        commands.push(read_command(&mut tls).await);
        tls.get_mut().write_all(b"221 Bye\r\n").await.unwrap();
        tls.get_mut().flush().await.unwrap();

        // Hold the stream open until the client's close_notify arrives.
        assert_eq!(tls.read_line(&mut String::new()).await.unwrap(), 0);
        commands
    }

    #[tokio::test]
    async fn upgrade_rewraps_logged_transport() {
        init_tracing();
        let (acceptor, client_config) = tls_pair();
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let server = tokio::spawn(serve(server_io, acceptor));

        let log = SharedBuf::default();
        let mut client = Client::with_factory(
            SmtpStream::plain(client_io),
            "mx.example.com",
            None,
            Some(client_config),
            logged(TrafficLog::new(log.clone(), false)),
        )
        .await
        .unwrap();

        assert!(client.is_tls());
        // Extensions come from the EHLO sent after the handshake.
        assert_eq!(client.extension("SIZE").await.as_deref(), Some("1000"));
        assert_eq!(client.extension("STARTTLS").await, None);
        assert_eq!(client.extension("8BITMIME").await, None);
        assert_eq!(client.auth_mechanisms(), ["PLAIN"]);

        client.quit().await.unwrap();
        assert_eq!(
            server.await.unwrap(),
            ["EHLO localhost", "STARTTLS", "EHLO localhost", "QUIT"]
        );

        let text = log.text();
        let (before, after) = text.split_once("C>\tSTARTTLS").unwrap();
        assert!(before.contains("C>\tEHLO localhost"));
        assert!(after.contains("<S\t220 - 2.0.0 Ready to start TLS"));
        assert!(after.contains("C>\tEHLO localhost"));
        assert!(after.contains("<S\tSIZE 1000"));
        assert!(after.contains("C>\tQUIT"));
    }
}

mod simple_send_tests {
    use super::*;

    /// Minimal scripted server; returns the command lines it received.
    async fn serve(listener: TcpListener) -> Vec<String> {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();

        write.write_all(GREETING.as_bytes()).await.unwrap();
        while let Some(line) = lines.next_line().await.unwrap() {
            received.push(line.clone());
            let reply: &[u8] = if line.starts_with("EHLO") {
                b"250-mx.example.com\r\n250 AUTH LOGIN\r\n"
            } else if line.starts_with("AUTH LOGIN") {
                b"334 UGFzc3dvcmQ6\r\n"
            } else if line == "cGFzcw==" {
                b"235 Authenticated\r\n"
            } else if line == "DATA" {
                write.write_all(b"354 Go ahead\r\n").await.unwrap();
                while let Some(body) = lines.next_line().await.unwrap() {
                    if body == "." {
                        break;
                    }
                }
                b"250 Queued\r\n"
            } else if line == "QUIT" {
                write.write_all(b"221 Bye\r\n").await.unwrap();
                break;
            } else {
                b"250 OK\r\n"
            };
            write.write_all(reply).await.unwrap();
        }
        received
    }

    #[tokio::test]
    async fn delivers_every_message() {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve(listener));

        let config = SmtpClientConfig::new("127.0.0.1", port, Mode::Unencrypted)
            .with_credentials("user", "pass")
            .with_timeout(Duration::from_secs(5));
        let messages = [
            Message::new()
                .with_from("from@example.com")
                .with_to("one@example.com")
                .with_text("first"),
            Message::new()
                .with_from("from@example.com")
                .with_to("two@example.com")
                .with_text("second"),
        ];
        config.simple_send(&messages).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(
            received,
            vec![
                "EHLO localhost",
                "AUTH LOGIN dXNlcg==",
                "cGFzcw==",
                "MAIL FROM:<from@example.com>",
                "RCPT TO:<one@example.com>",
                "DATA",
                "MAIL FROM:<from@example.com>",
                "RCPT TO:<two@example.com>",
                "DATA",
                "QUIT",
            ]
        );
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let config = SmtpClientConfig::new("127.0.0.1", port, Mode::Unencrypted)
            .with_timeout(Duration::from_millis(100));
        let err = config.simple_send(&[]).await.unwrap_err();

        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
        server.abort();
    }
}
