//! Line-oriented command/response transport.

use super::stream::SmtpStream;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_code, parse_reply};
use crate::types::Reply;
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{trace, warn};

/// Command/response transport the session talks through.
///
/// Every command returns an id; callers bracket the matching
/// [`read_response`](Self::read_response) with
/// [`start_response`](Self::start_response) and
/// [`end_response`](Self::end_response).
pub trait TextConn: Send {
    /// Marks the start of the response to command `id`.
    fn start_response(&mut self, id: u64);

    /// Marks the end of the response to command `id`.
    fn end_response(&mut self, id: u64);

    /// Sends a command line and returns its id.
    fn cmd(&mut self, line: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Reads a reply and checks its code against `expect`
    /// (see [`ReplyCode::matches`](crate::types::ReplyCode::matches)).
    ///
    /// A code mismatch is returned as [`Error::SmtpError`].
    fn read_response(&mut self, expect: u16) -> impl Future<Output = Result<Reply>> + Send;

    /// Writes DATA payload, dot-stuffing and normalizing line endings.
    fn write_data(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Terminates the DATA payload with the `.` line and flushes.
    fn close_data(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Shuts the connection down.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Gives back the underlying stream, discarding anything buffered.
    fn into_stream(self) -> SmtpStream
    where
        Self: Sized;
}

/// Position of the dot-stuffing writer within the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DotState {
    Begin,
    BeginLine,
    Cr,
    Data,
}

/// Applies SMTP dot-stuffing to `data`, appending the result to `out`.
///
/// Lone LF becomes CRLF and a dot at the start of a line is doubled.
fn dot_stuff(state: &mut DotState, data: &[u8], out: &mut Vec<u8>) {
    for &c in data {
        match *state {
            DotState::Begin | DotState::BeginLine | DotState::Data => {
                if *state != DotState::Data {
                    *state = DotState::Data;
                    if c == b'.' {
                        out.push(b'.');
                    }
                }
                if c == b'\r' {
                    *state = DotState::Cr;
                }
                if c == b'\n' {
                    out.push(b'\r');
                    *state = DotState::BeginLine;
                }
            }
            DotState::Cr => {
                *state = if c == b'\n' {
                    DotState::BeginLine
                } else {
                    DotState::Data
                };
            }
        }
        out.push(c);
    }
}

/// Bytes that end a payload written up to `state`.
const fn dot_terminator(state: DotState) -> &'static [u8] {
    match state {
        DotState::Begin | DotState::Data => b"\r\n.\r\n",
        DotState::Cr => b"\n.\r\n",
        DotState::BeginLine => b".\r\n",
    }
}

/// Default [`TextConn`] reading CRLF lines from a buffered stream.
#[derive(Debug)]
pub struct LineConn {
    reader: BufReader<SmtpStream>,
    next_id: u64,
    in_flight: Option<u64>,
    dot: DotState,
}

impl LineConn {
    /// Wraps a stream.
    #[must_use]
    pub fn new(stream: SmtpStream) -> Self {
        Self {
            reader: BufReader::new(stream),
            next_id: 0,
            in_flight: None,
            dot: DotState::Begin,
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let read = self.reader.read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn write_flush(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl TextConn for LineConn {
    fn start_response(&mut self, id: u64) {
        if let Some(pending) = self.in_flight.replace(id) {
            warn!(pending, id, "Response started while another is in flight");
        }
    }

    fn end_response(&mut self, id: u64) {
        match self.in_flight {
            Some(pending) if pending == id => self.in_flight = None,
            pending => warn!(?pending, id, "Ended a response that was not in flight"),
        }
    }

    async fn cmd(&mut self, line: &str) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        trace!(id, line, "Sending command");

        let mut buf = Vec::with_capacity(line.len() + 2);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\r\n");
        self.write_flush(&buf).await?;
        Ok(id)
    }

    async fn read_response(&mut self, expect: u16) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            parse_code(&line)?;
            let last = is_last_reply_line(&line);
            lines.push(line);
            if last {
                break;
            }
        }

        let reply = parse_reply(&lines)?;
        trace!(code = reply.code.as_u16(), lines = lines.len(), "Received reply");
        if !reply.code.matches(expect) {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }
        Ok(reply)
    }

    async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(data.len() + data.len() / 64);
        dot_stuff(&mut self.dot, data, &mut buf);
        self.reader.get_mut().write_all(&buf).await?;
        Ok(())
    }

    async fn close_data(&mut self) -> Result<()> {
        let terminator = dot_terminator(self.dot);
        self.dot = DotState::Begin;
        self.write_flush(terminator).await
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.get_mut().shutdown().await?;
        Ok(())
    }

    fn into_stream(self) -> SmtpStream {
        self.reader.into_inner()
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
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn stuff(chunks: &[&[u8]]) -> Vec<u8> {
        let mut state = DotState::Begin;
        let mut out = Vec::new();
        for chunk in chunks {
            dot_stuff(&mut state, chunk, &mut out);
        }
        out.extend_from_slice(dot_terminator(state));
        out
    }

    fn pair() -> (LineConn, DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        (LineConn::new(SmtpStream::plain(client)), server)
    }

    #[test]
    fn test_dot_stuffing() {
        assert_eq!(stuff(&[b"hello\r\n"]), b"hello\r\n.\r\n");
        assert_eq!(stuff(&[b"hello"]), b"hello\r\n.\r\n");
        assert_eq!(stuff(&[b".leading\n..double\n"]), b"..leading\r\n...double\r\n.\r\n");
        assert_eq!(stuff(&[b"a\nb\r\nc"]), b"a\r\nb\r\nc\r\n.\r\n");
        assert_eq!(stuff(&[]), b"\r\n.\r\n");
    }

    #[test]
    fn test_dot_stuffing_across_writes() {
        assert_eq!(stuff(&[b"line\r", b"\n.dot\r\n"]), b"line\r\n..dot\r\n.\r\n");
        assert_eq!(stuff(&[b"ends with cr\r"]), b"ends with cr\r\n.\r\n");
        assert_eq!(stuff(&[b"mid.dot\n", b"."]), b"mid.dot\r\n..\r\n.\r\n");
    }

    #[tokio::test]
    async fn test_cmd_appends_crlf_and_counts() {
        let (mut conn, mut server) = pair();
        assert_eq!(conn.cmd("NOOP").await.unwrap(), 0);
        assert_eq!(conn.cmd("RSET").await.unwrap(), 1);
        drop(conn);

        let mut sent = String::new();
        server.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "NOOP\r\nRSET\r\n");
    }

    #[tokio::test]
    async fn test_lockstep_exchange() {
        use tokio_test::io::Builder;

        let mock = Builder::new()
            .write(b"NOOP\r\n")
            .read(b"250 2.0.0 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"354 Go ahead\r\n")
            .build();
        let mut conn = LineConn::new(SmtpStream::plain(mock));

        let id = conn.cmd("NOOP").await.unwrap();
        conn.start_response(id);
        let reply = conn.read_response(250).await.unwrap();
        conn.end_response(id);
        assert_eq!(reply.message_text(), "2.0.0 OK");

        conn.cmd("DATA").await.unwrap();
        let reply = conn.read_response(354).await.unwrap();
        assert!(reply.code.is_intermediate());
    }

    #[tokio::test]
    async fn test_read_multiline_response() {
        let (mut conn, mut server) = pair();
        server
            .write_all(b"250-mx.example.com\r\n250-AUTH LOGIN\r\n250 8BITMIME\r\n")
            .await
            .unwrap();

        let reply = conn.read_response(250).await.unwrap();
        assert_eq!(reply.message, vec!["mx.example.com", "AUTH LOGIN", "8BITMIME"]);
    }

    #[tokio::test]
    async fn test_read_response_code_mismatch() {
        let (mut conn, mut server) = pair();
        server.write_all(b"550 No such user\r\n").await.unwrap();

        let err = conn.read_response(25).await.unwrap_err();
        assert!(matches!(err, Error::SmtpError { code: 550, ref message } if message == "No such user"));
    }

    #[tokio::test]
    async fn test_read_response_eof() {
        let (mut conn, server) = pair();
        drop(server);
        assert!(matches!(
            conn.read_response(220).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_response_malformed() {
        let (mut conn, mut server) = pair();
        server.write_all(b"hello there\r\n").await.unwrap();
        assert!(matches!(
            conn.read_response(0).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_response_bad_separator_with_peer_open() {
        for line in [&b"250xOK\r\n"[..], b"2\r\n", b"25a OK\r\n"] {
            let (mut conn, mut server) = pair();
            server.write_all(line).await.unwrap();
            let result =
                tokio::time::timeout(std::time::Duration::from_secs(2), conn.read_response(0))
                    .await
                    .unwrap();
            assert!(matches!(result, Err(Error::Protocol(_))));
            drop(server);
        }
    }

    #[tokio::test]
    async fn test_read_response_malformed_continuation() {
        let (mut conn, mut server) = pair();
        server
            .write_all(b"250-mx.example.com\r\nnot a reply\r\n")
            .await
            .unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), conn.read_response(250))
            .await
            .unwrap();
        assert!(matches!(result, Err(Error::Protocol(_))));
        drop(server);
    }

    #[tokio::test]
    async fn test_data_round() {
        let (mut conn, mut server) = pair();
        conn.write_data(b"Subject: hi\n\n.\n").await.unwrap();
        conn.close_data().await.unwrap();
        conn.write_data(b"second").await.unwrap();
        conn.close_data().await.unwrap();
        drop(conn);

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert_eq!(sent, b"Subject: hi\r\n\r\n..\r\n.\r\nsecond\r\n.\r\n");
    }

    #[test]
    fn test_response_scope_tracking() {
        let (client, _server) = tokio::io::duplex(16);
        let mut conn = LineConn::new(SmtpStream::plain(client));
        conn.start_response(3);
        assert_eq!(conn.in_flight, Some(3));
        conn.end_response(3);
        assert_eq!(conn.in_flight, None);
    }
}
