//! Receiver for samples a meter pushes over HTTP.
//!
//! Each connection carries one form-encoded POST. The body is decoded into a
//! [`PushRecord`], printed as a JSON [`Reading`] line and answered with `200`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::push::{PushRecord, Reading};

pub const DEFAULT_PORT: u16 = 8080;

const MAX_HEADER_BYTES: usize = 8 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("Invalid form body: {0}")]
    FormError(#[from] serde_urlencoded::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CollectorError>;

pub struct Collector {
    listener: TcpListener,
}

impl Collector {
    /// Listen on every interface at `port`.
    pub fn bind(port: u16) -> Result<Self> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    pub fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| CollectorError::Bind { addr, source })?;
        info!("Started collector on {}", listener.local_addr()?);
        Ok(Collector { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until the process ends.
    ///
    /// A failed `accept` is logged and retried after a short pause.
    pub fn serve<W: Write>(&self, out: &mut W) {
        serve_connections(|| self.accept(), out, None);
    }

    /// Accept one connection and answer its request.
    ///
    /// Only a failed `accept` is returned; problems with the request itself
    /// are logged and answered with an error status.
    pub fn serve_one<W: Write>(&self, out: &mut W) -> Result<Option<Reading>> {
        let (mut stream, peer) = self.accept()?;
        Ok(answer(&mut stream, peer, out))
    }

    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept()?;
        if let Err(e) = configure_stream(&stream) {
            warn!("Could not set timeouts for {}: {}", peer, e);
        }
        Ok((stream, peer))
    }
}

/// Answer connections from `accept`, stopping after `limit` attempts if set.
fn serve_connections<S, A, W>(mut accept: A, out: &mut W, limit: Option<usize>)
where
    S: Read + Write,
    A: FnMut() -> io::Result<(S, SocketAddr)>,
    W: Write,
{
    let mut attempts = 0;
    while limit.is_none_or(|max| attempts < max) {
        attempts += 1;
        match accept() {
            Ok((mut stream, peer)) => {
                answer(&mut stream, peer, out);
            }
            Err(e) => {
                warn!("Failed to accept a connection: {}", e);
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
        }
    }
}

fn answer<S, W>(stream: &mut S, peer: SocketAddr, out: &mut W) -> Option<Reading>
where
    S: Read + Write,
    W: Write,
{
    debug!("Connection from {}", peer);
    match handle_request(stream, out, chrono::Utc::now().timestamp_millis()) {
        Ok(reading) => Some(reading),
        Err(e) => {
            warn!("Rejected request from {}: {}", peer, e);
            None
        }
    }
}

fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_TIMEOUT))
}

/// Read one POST from `stream`, print its reading to `out` and answer it.
///
/// `now_ms` becomes the reading's `time`. Malformed requests get a 4xx answer
/// and are returned as errors.
pub fn handle_request<S, W>(stream: &mut S, out: &mut W, now_ms: i64) -> Result<Reading>
where
    S: Read + Write,
    W: Write,
{
    let result = read_reading(&mut *stream, now_ms);
    match &result {
        Ok(reading) => {
            serde_json::to_writer(&mut *out, reading)?;
            writeln!(out)?;
            out.flush()?;
            respond(stream, 200, "OK", "[0]")?;
        }
        Err(CollectorError::MethodNotAllowed(_)) => {
            respond(stream, 405, "Method Not Allowed", "")?;
        }
        Err(CollectorError::IoError(_)) => {}
        Err(_) => respond(stream, 400, "Bad Request", "")?,
    }
    result
}

fn read_reading<R: Read>(stream: R, now_ms: i64) -> Result<Reading> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    let mut header_bytes = read_header_line(&mut reader, &mut request_line, MAX_HEADER_BYTES)?;
    let method = request_line.split_whitespace().next().unwrap_or_default();
    if method.is_empty() {
        return Err(CollectorError::BadRequest("empty request".to_string()));
    }
    if method != "POST" {
        return Err(CollectorError::MethodNotAllowed(method.to_string()));
    }

    let mut content_length = None;
    loop {
        let mut header = String::new();
        let n = read_header_line(&mut reader, &mut header, MAX_HEADER_BYTES - header_bytes)?;
        if n == 0 {
            return Err(CollectorError::BadRequest("headers ended early".to_string()));
        }
        header_bytes += n;

        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    CollectorError::BadRequest(format!("bad Content-Length {:?}", value.trim()))
                })?;
                content_length = Some(length);
            }
        }
    }

    let length = content_length
        .ok_or_else(|| CollectorError::BadRequest("missing Content-Length".to_string()))?;
    if length > MAX_BODY_BYTES {
        return Err(CollectorError::BadRequest(format!("body of {} bytes", length)));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    let record: PushRecord = serde_urlencoded::from_bytes(&body)?;
    Ok(Reading::from_push(record, now_ms))
}

/// Read one line of at most `limit` bytes into `line`.
///
/// A line that reaches the limit without its newline is rejected, so the
/// header section never holds more than `MAX_HEADER_BYTES` in memory.
fn read_header_line<R: BufRead>(
    reader: &mut R,
    line: &mut String,
    limit: usize,
) -> Result<usize> {
    let n = reader.take(limit as u64).read_line(line)?;
    if n == limit && !line.ends_with('\n') {
        return Err(CollectorError::BadRequest("headers too large".to_string()));
    }
    Ok(n)
}

fn respond<S: Write>(stream: &mut S, status: u16, reason: &str, body: &str) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.0 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )?;
    stream.flush()
}
