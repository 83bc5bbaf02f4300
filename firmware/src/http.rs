//! HTTP/1.1 POST over an embassy-net TCP socket.

use core::time::Duration;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Stack};
use embassy_time::with_timeout;
use log::warn;
use wakecam::http::{self, Request};
use wakecam::{HttpClient, StatusCode, UploadError};

const RX_BUFFER_SIZE: usize = 1024;
const TX_BUFFER_SIZE: usize = 4096;

pub struct EspHttp {
    stack: Stack<'static>,
    rx: [u8; RX_BUFFER_SIZE],
    tx: [u8; TX_BUFFER_SIZE],
}

impl EspHttp {
    pub fn new(stack: Stack<'static>) -> Self {
        Self {
            stack,
            rx: [0; RX_BUFFER_SIZE],
            tx: [0; TX_BUFFER_SIZE],
        }
    }

    async fn resolve(&self, request: &Request<'_>) -> Result<IpAddress, UploadError> {
        if let Some(ip) = request.url.ipv4() {
            return Ok(IpAddress::from(ip));
        }
        let host = request.url.host();
        let answers = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                warn!("[HTTP] dns lookup of {} failed: {:?}", host, e);
                UploadError::Dns
            })?;
        answers.first().copied().ok_or(UploadError::Dns)
    }

    async fn exchange(
        &mut self,
        request: &Request<'_>,
        timeout: embassy_time::Duration,
    ) -> Result<StatusCode, UploadError> {
        let address = self.resolve(request).await?;

        let mut socket = TcpSocket::new(self.stack, &mut self.rx, &mut self.tx);
        socket.set_timeout(Some(timeout));
        socket
            .connect((address, request.url.port()))
            .await
            .map_err(|e| {
                warn!("[HTTP] connect failed: {:?}", e);
                UploadError::Connect
            })?;

        let status = http::exchange(&mut socket, request).await;
        socket.close();
        // Let the FIN go out before the buffers are reused.
        let _ = socket.flush().await;
        status
    }
}

impl HttpClient for EspHttp {
    async fn post(
        &mut self,
        request: &Request<'_>,
        timeout: Duration,
    ) -> Result<StatusCode, UploadError> {
        let timeout = embassy_time::Duration::from_millis(timeout.as_millis() as u64);
        match with_timeout(timeout, self.exchange(request, timeout)).await {
            Ok(status) => status,
            Err(_) => Err(UploadError::Timeout),
        }
    }
}
