//! Minimal HTTP/1.1 POST framing
//!
//! Just enough of the protocol for one request per connection: parse a plain
//! `http://` URL, write the request head and body, and read back the status
//! line. Response headers and body are ignored.

use core::fmt::Write as _;
use core::net::Ipv4Addr;

use embedded_io_async::{Error as _, ErrorKind, Read, Write};
use heapless::String;
use log::debug;

use crate::upload::{StatusCode, UploadError};

const HEAD_CAPACITY: usize = 512;
const STATUS_LINE_CAPACITY: usize = 128;

/// `http://host[:port][/path]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    host: &'a str,
    port: u16,
    path: &'a str,
}

impl<'a> Url<'a> {
    pub fn parse(url: &'a str) -> Result<Self, UploadError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or(UploadError::InvalidUrl)?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| UploadError::InvalidUrl)?),
            None => (authority, 80),
        };
        if host.is_empty() || port == 0 {
            return Err(UploadError::InvalidUrl);
        }
        Ok(Self { host, port, path })
    }

    pub fn host(&self) -> &'a str {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &'a str {
        self.path
    }

    /// The host as an address literal, when it is one. Other hosts need DNS.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.host.parse().ok()
    }
}

/// One POST.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub url: Url<'a>,
    pub content_type: &'static str,
    pub body: &'a [u8],
}

impl Request<'_> {
    pub fn head(&self) -> Result<String<HEAD_CAPACITY>, UploadError> {
        let mut head = String::new();
        let host_port = (self.url.port != 80).then_some(self.url.port);
        write!(head, "POST {} HTTP/1.1\r\nHost: {}", self.url.path, self.url.host)
            .map_err(|_| UploadError::RequestTooLarge)?;
        if let Some(port) = host_port {
            write!(head, ":{}", port).map_err(|_| UploadError::RequestTooLarge)?;
        }
        write!(
            head,
            "\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.content_type,
            self.body.len()
        )
        .map_err(|_| UploadError::RequestTooLarge)?;
        Ok(head)
    }
}

fn io_error(kind: ErrorKind) -> UploadError {
    match kind {
        ErrorKind::TimedOut => UploadError::Timeout,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
            UploadError::Connect
        }
        _ => UploadError::Io,
    }
}

/// Send `request` over an open connection and read the status code.
pub async fn exchange<S: Read + Write>(
    io: &mut S,
    request: &Request<'_>,
) -> Result<StatusCode, UploadError> {
    let head = request.head()?;
    debug!(
        "[HTTP] POST {}:{}{} ({} bytes)",
        request.url.host,
        request.url.port,
        request.url.path,
        request.body.len()
    );
    io.write_all(head.as_bytes())
        .await
        .map_err(|e| io_error(e.kind()))?;
    io.write_all(request.body)
        .await
        .map_err(|e| io_error(e.kind()))?;
    io.flush().await.map_err(|e| io_error(e.kind()))?;

    let mut line = [0u8; STATUS_LINE_CAPACITY];
    let mut filled = 0;
    loop {
        if let Some(end) = line[..filled].windows(2).position(|w| w == b"\r\n") {
            return parse_status_line(&line[..end]);
        }
        if filled == line.len() {
            return Err(UploadError::MalformedResponse);
        }
        let n = io
            .read(&mut line[filled..])
            .await
            .map_err(|e| io_error(e.kind()))?;
        if n == 0 {
            return Err(UploadError::MalformedResponse);
        }
        filled += n;
    }
}

/// `HTTP/1.x 200 OK`
fn parse_status_line(line: &[u8]) -> Result<StatusCode, UploadError> {
    let line = core::str::from_utf8(line).map_err(|_| UploadError::MalformedResponse)?;
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(UploadError::MalformedResponse);
    }
    let code = parts.next().unwrap_or_default();
    if code.len() != 3 {
        return Err(UploadError::MalformedResponse);
    }
    code.parse()
        .map(StatusCode)
        .map_err(|_| UploadError::MalformedResponse)
}
