//! Transport wrapper that records the SMTP conversation.
//!
//! Client lines are prefixed `C>`, server lines `<S`. Each entry is preceded
//! by a microsecond timestamp and lines wider than 76 columns are word-wrapped.

use super::client::TextConnFactory;
use super::stream::SmtpStream;
use super::text::{LineConn, TextConn};
use crate::error::Result;
use crate::types::Reply;
use mailsend_mime::encoding::MAX_LINE_LENGTH;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::trace;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_COMMAND: &str = "\x1b[38;5;11m";
const ANSI_BODY: &str = "\x1b[38;5;14m";
const ANSI_REPLY_OK: &str = "\x1b[38;5;10m";
const ANSI_REPLY_ERR: &str = "\x1b[38;5;9m";

const CLIENT: &str = "C>";
const SERVER: &str = "<S";

fn commit_words(parts: &mut Vec<String>, words: &mut Vec<&str>, width: &mut usize) {
    if *width == 0 {
        return;
    }
    let indent = if parts.is_empty() { "" } else { "  " };
    parts.push(format!("{indent}{}", words.join(" ")));
    words.clear();
    *width = 0;
}

/// Splits an over-long line at spaces, indenting continuation lines by two.
fn wrap_long(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut words = Vec::new();
    let mut width = 0;

    for word in line.split(' ') {
        let len = word.chars().count();
        if width + len + 1 > MAX_LINE_LENGTH {
            commit_words(&mut parts, &mut words, &mut width);
        }
        words.push(word);
        width += len + 1;
    }
    commit_words(&mut parts, &mut words, &mut width);

    parts
}

/// Prefixes every line of `text` with `indent`, wrapping long lines.
fn indent_wrap(text: &str, indent: &str) -> String {
    let text = text.replace('\r', "");
    let mut parts = Vec::new();
    for line in text.split('\n') {
        if line.chars().count() > MAX_LINE_LENGTH {
            parts.extend(wrap_long(line));
        } else {
            parts.push(line.to_string());
        }
    }
    format!("{indent}{}", parts.join(&format!("\n{indent}")))
}

/// Destination for the rendered conversation.
#[derive(Clone)]
pub struct TrafficLog {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    colors: bool,
}

impl fmt::Debug for TrafficLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrafficLog")
            .field("colors", &self.colors)
            .finish_non_exhaustive()
    }
}

impl TrafficLog {
    /// Logs to an arbitrary writer.
    pub fn new(sink: impl Write + Send + 'static, colors: bool) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            colors,
        }
    }

    /// Logs to standard output.
    #[must_use]
    pub fn stdout(colors: bool) -> Self {
        Self::new(io::stdout(), colors)
    }

    /// Appends to a file, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, colors: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o660);
        }
        let file = options.open(path)?;
        Ok(Self::new(file, colors))
    }

    /// Resolves a configured target: `-` is stdout, anything else a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn from_target(target: &str, colors: bool) -> Result<Self> {
        if target == "-" {
            Ok(Self::stdout(colors))
        } else {
            Self::open(target, colors)
        }
    }

    fn log(&self, text: &str, direction: &str, color: &str) {
        let mut entry = indent_wrap(text, &format!("{direction}\t"));
        trace!(target: "mailsend_smtp::traffic", "{entry}");
        if self.colors {
            entry = format!("{color}{entry}{ANSI_RESET}");
        }

        let stamp = chrono::Local::now().format("%H:%M:%S%.6f");
        if let Ok(mut sink) = self.sink.lock() {
            // Logging must never interrupt the session.
            let _ = writeln!(sink, "{stamp} \n{entry}");
            let _ = sink.flush();
        }
    }
}

/// [`TextConn`] that logs every command, reply and DATA write.
#[derive(Debug)]
pub struct LoggedConn<T = LineConn> {
    inner: T,
    log: TrafficLog,
}

impl<T: TextConn> LoggedConn<T> {
    /// Wraps a transport.
    pub const fn new(inner: T, log: TrafficLog) -> Self {
        Self { inner, log }
    }
}

impl<T: TextConn> TextConn for LoggedConn<T> {
    fn start_response(&mut self, id: u64) {
        self.inner.start_response(id);
    }

    fn end_response(&mut self, id: u64) {
        self.inner.end_response(id);
    }

    async fn cmd(&mut self, line: &str) -> Result<u64> {
        self.log.log(line, CLIENT, ANSI_COMMAND);
        self.inner.cmd(line).await
    }

    async fn read_response(&mut self, expect: u16) -> Result<Reply> {
        let result = self.inner.read_response(expect).await;
        match &result {
            Ok(reply) => self.log.log(
                &format!("{} - {}", reply.code, reply.message_text()),
                SERVER,
                ANSI_REPLY_OK,
            ),
            Err(err) => self.log.log(
                &format!("{} - {err}", err.code().unwrap_or(0)),
                SERVER,
                ANSI_REPLY_ERR,
            ),
        }
        result
    }

    async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.log
            .log(&String::from_utf8_lossy(data), CLIENT, ANSI_BODY);
        self.inner.write_data(data).await
    }

    async fn close_data(&mut self) -> Result<()> {
        self.inner.close_data().await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn into_stream(self) -> SmtpStream {
        self.inner.into_stream()
    }
}

/// Factory producing logging transports; survives a STARTTLS upgrade.
#[must_use]
pub fn logged(log: TrafficLog) -> TextConnFactory<LoggedConn> {
    Arc::new(move |stream| LoggedConn::new(LineConn::new(stream), log.clone()))
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
    use tokio::io::AsyncWriteExt;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_indent_wrap_short_lines() {
        assert_eq!(indent_wrap("EHLO localhost", "C>\t"), "C>\tEHLO localhost");
        assert_eq!(
            indent_wrap("line one\r\nline two", "<S\t"),
            "<S\tline one\n<S\tline two"
        );
    }

    #[test]
    fn test_wrap_long_line() {
        let word = "abcdefghi";
        let line = vec![word; 10].join(" ");
        let parts = wrap_long(&line);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], vec![word; 7].join(" "));
        assert_eq!(parts[1], format!("  {}", vec![word; 3].join(" ")));
        assert!(parts.iter().all(|p| p.chars().count() <= MAX_LINE_LENGTH + 2));
    }

    #[test]
    fn test_log_entry_format() {
        let buf = SharedBuf::default();
        let log = TrafficLog::new(buf.clone(), false);
        log.log("QUIT", CLIENT, ANSI_COMMAND);

        let text = buf.text();
        let (stamp, entry) = text.split_once(" \n").unwrap();
        assert_eq!(stamp.len(), "00:00:00.000000".len());
        assert_eq!(entry, "C>\tQUIT\n");
    }

    #[test]
    fn test_log_entry_colors() {
        let buf = SharedBuf::default();
        let log = TrafficLog::new(buf.clone(), true);
        log.log("221 - Bye", SERVER, ANSI_REPLY_OK);
        assert!(buf.text().ends_with("\x1b[38;5;10m<S\t221 - Bye\x1b[0m\n"));
    }

    #[tokio::test]
    async fn test_logged_conn_records_conversation() {
        let buf = SharedBuf::default();
        let (client, mut server) = tokio::io::duplex(1024);
        let factory = logged(TrafficLog::new(buf.clone(), false));
        let mut conn = factory(SmtpStream::plain(client));

        server.write_all(b"250 OK\r\n550 Nope\r\n").await.unwrap();
        let id = conn.cmd("NOOP").await.unwrap();
        conn.start_response(id);
        conn.read_response(250).await.unwrap();
        conn.end_response(id);
        assert!(conn.read_response(250).await.is_err());
        conn.write_data(b"body").await.unwrap();

        let text = buf.text();
        assert!(text.contains("C>\tNOOP"));
        assert!(text.contains("<S\t250 - OK"));
        assert!(text.contains("<S\t550 - SMTP error 550: Nope"));
        assert!(text.contains("C>\tbody"));
    }
}
