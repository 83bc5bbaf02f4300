//! Uploader: one POST per payload, no retry.

use core::fmt;
use core::time::Duration;

use log::{info, warn};

use crate::config::UploadMode;
use crate::http::{Request, Url};

/// HTTP status of a completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The exchange did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    InvalidUrl,
    /// Request head does not fit the framing buffer.
    RequestTooLarge,
    Dns,
    Connect,
    Timeout,
    Io,
    MalformedResponse,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            UploadError::InvalidUrl => "invalid endpoint url",
            UploadError::RequestTooLarge => "request head too large",
            UploadError::Dns => "dns lookup failed",
            UploadError::Connect => "connect failed",
            UploadError::Timeout => "timed out",
            UploadError::Io => "socket error",
            UploadError::MalformedResponse => "malformed response",
        };
        f.write_str(msg)
    }
}

/// Transport for one request. Implementations resolve the host, open a
/// connection, run [`crate::http::exchange`] and give up after `timeout`.
#[allow(async_fn_in_trait)]
pub trait HttpClient {
    async fn post(
        &mut self,
        request: &Request<'_>,
        timeout: Duration,
    ) -> Result<StatusCode, UploadError>;
}

#[allow(async_fn_in_trait)]
impl<T: HttpClient + ?Sized> HttpClient for &mut T {
    async fn post(
        &mut self,
        request: &Request<'_>,
        timeout: Duration,
    ) -> Result<StatusCode, UploadError> {
        (**self).post(request, timeout).await
    }
}

pub struct Uploader<H> {
    client: H,
    endpoint: &'static str,
    timeout: Duration,
}

impl<H: HttpClient> Uploader<H> {
    pub fn new(client: H, endpoint: &'static str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }

    /// POST `body` with the content type of `mode`. Any completed exchange
    /// is `Ok`, whatever its status.
    pub async fn send(&mut self, body: &[u8], mode: UploadMode) -> Result<StatusCode, UploadError> {
        let request = Request {
            url: Url::parse(self.endpoint)?,
            content_type: mode.content_type(),
            body,
        };
        match self.client.post(&request, self.timeout).await {
            Ok(status) if status.is_success() => {
                info!("[HTTP] upload done, status {}, {} bytes", status, body.len());
                Ok(status)
            }
            Ok(status) => {
                warn!("[HTTP] server answered {}", status);
                Ok(status)
            }
            Err(e) => {
                warn!("[HTTP] upload failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn client(&self) -> &H {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<(&'static str, usize, Duration)>,
        answer: Option<Result<StatusCode, UploadError>>,
    }

    impl HttpClient for Recorder {
        async fn post(
            &mut self,
            request: &Request<'_>,
            timeout: Duration,
        ) -> Result<StatusCode, UploadError> {
            self.sent
                .push((request.content_type, request.body.len(), timeout));
            self.answer.unwrap_or(Ok(StatusCode(200)))
        }
    }

    #[test]
    fn content_type_follows_the_mode() {
        let mut uploader = Uploader::new(
            Recorder::default(),
            "http://10.0.0.2:3000/pic",
            Duration::from_secs(20),
        );
        block_on(uploader.send(&[1, 2, 3], UploadMode::RawJpeg)).unwrap();
        block_on(uploader.send(&[1, 2], UploadMode::Packaged)).unwrap();
        assert_eq!(
            uploader.client().sent,
            [
                ("image/jpeg", 3, Duration::from_secs(20)),
                ("application/octet-stream", 2, Duration::from_secs(20)),
            ]
        );
    }

    #[test]
    fn non_success_status_is_returned_not_retried() {
        let client = Recorder {
            answer: Some(Ok(StatusCode(503))),
            ..Default::default()
        };
        let mut uploader = Uploader::new(client, "http://sink/", Duration::from_secs(20));
        let status = block_on(uploader.send(b"x", UploadMode::RawJpeg));
        assert_eq!(status, Ok(StatusCode(503)));
        assert_eq!(uploader.client().sent.len(), 1);
    }

    #[test]
    fn bad_endpoint_never_reaches_the_client() {
        let mut uploader = Uploader::new(
            Recorder::default(),
            "ftp://sink/",
            Duration::from_secs(20),
        );
        assert_eq!(
            block_on(uploader.send(b"x", UploadMode::RawJpeg)),
            Err(UploadError::InvalidUrl)
        );
        assert!(uploader.client().sent.is_empty());
    }
}
