//! Minimal HTTP/1.1 endpoint serving `GET /metrics`.
//!
//! Each connection gets one response and is then closed. Scrapes only read
//! the registry, so they never wait on a measurement cycle.

use crate::metrics::MetricsRegistry;
use crate::output::OutputFormatter;
use log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;

pub const METRICS_PATH: &str = "/metrics";

/// Upper bound on request line and header lines read per request.
const MAX_HEADER_LINES: usize = 100;

/// Bytes read from a client before the request is rejected.
pub const MAX_REQUEST_BYTES: u64 = 8 * 1024;

/// Time a client gets to send its request and read the response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A response ready to be written to the client.
#[derive(Debug, PartialEq)]
struct Response {
    status: u16,
    reason: &'static str,
    content_type: &'static str,
    allow_get: bool,
    body: String,
}

impl Response {
    fn text(status: u16, reason: &'static str, body: &str) -> Self {
        Response {
            status,
            reason,
            content_type: "text/plain; charset=utf-8",
            allow_get: false,
            body: format!("{body}\n"),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.reason,
            self.content_type,
            self.body.len()
        );
        if self.allow_get {
            head.push_str("Allow: GET\r\n");
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(self.body.as_bytes());
        bytes
    }
}

/// Shared state for answering scrapes.
#[derive(Clone)]
pub struct MetricsService {
    metrics: Arc<MetricsRegistry>,
    formatter: Arc<dyn OutputFormatter>,
}

impl MetricsService {
    pub fn new(metrics: Arc<MetricsRegistry>, formatter: Arc<dyn OutputFormatter>) -> Self {
        Self { metrics, formatter }
    }

    fn route(&self, method: &str, target: &str) -> Response {
        let path = target.split('?').next().unwrap_or_default();
        if path != METRICS_PATH {
            return Response::text(404, "Not Found", "not found");
        }
        if method != "GET" {
            let mut response = Response::text(405, "Method Not Allowed", "method not allowed");
            response.allow_get = true;
            return response;
        }

        Response {
            status: 200,
            reason: "OK",
            content_type: self.formatter.content_type(),
            allow_get: false,
            body: self.formatter.format(&self.metrics.snapshot()),
        }
    }

    /// Read one request from `stream` and answer it.
    ///
    /// Gives up with [`io::ErrorKind::TimedOut`] when the exchange takes
    /// longer than [`REQUEST_TIMEOUT`].
    pub async fn handle<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        timeout(REQUEST_TIMEOUT, self.respond(stream))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request timed out"))?
    }

    async fn respond<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(stream.take(MAX_REQUEST_BYTES));

        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }

        // Skip headers; nothing in them changes the response
        let mut complete = false;
        for _ in 0..MAX_HEADER_LINES {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n > 0 && line.trim_end().is_empty() {
                complete = true;
                break;
            }
            if n == 0 {
                // Hitting the read limit is not the client closing its side
                complete = reader.get_ref().limit() > 0;
                break;
            }
        }
        let too_large = !complete && reader.get_ref().limit() == 0;

        let mut parts = request_line.split_whitespace();
        let response = match (parts.next(), parts.next(), complete) {
            _ if too_large => Response::text(
                431,
                "Request Header Fields Too Large",
                "request too large",
            ),
            (Some(method), Some(target), true) => self.route(method, target),
            _ => Response::text(400, "Bad Request", "bad request"),
        };
        debug!("{} -> {}", request_line.trim_end(), response.status);

        let mut stream = reader.into_inner().into_inner();
        stream.write_all(&response.to_bytes()).await?;
        stream.shutdown().await
    }
}

/// Exposition server bound to a TCP address.
pub struct MetricsServer {
    listener: TcpListener,
    service: MetricsService,
}

impl MetricsServer {
    pub async fn bind(addr: SocketAddr, service: MetricsService) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self) {
        if let Ok(addr) = self.local_addr() {
            info!("Serving metrics on http://{addr}{METRICS_PATH}");
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };

            let service = self.service.clone();
            tokio::spawn(async move {
                if let Err(e) = service.handle(stream).await {
                    debug!("connection from {peer} failed: {e}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use crate::output::prometheus::PrometheusFormatter;
    use tokio::io::{AsyncReadExt, duplex};
    use tokio::net::TcpStream;

    fn service() -> (Arc<MetricsRegistry>, MetricsService) {
        let metrics = Arc::new(MetricsRegistry::new());
        let service = MetricsService::new(
            Arc::clone(&metrics),
            Arc::new(PrometheusFormatter::default()),
        );
        (metrics, service)
    }

    async fn roundtrip(service: &MetricsService, request: &str) -> String {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(request.as_bytes()).await.unwrap();

        service.handle(server).await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_get_metrics() {
        let (metrics, service) = service();
        metrics.record_success(&Measurement {
            temperature: 2.5,
            humidity: 25.0,
            pressure: 1000.0,
        });

        let response = roundtrip(
            &service,
            "GET /metrics HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n"));
        assert!(response.contains("\r\n\r\n# HELP measurement_count"));
        assert!(response.contains("temperature 2.5\n"));
        assert!(response.contains("measurement_count 1\n"));
    }

    #[tokio::test]
    async fn test_content_length_matches_body() {
        let (_, service) = service();
        let response = roundtrip(&service, "GET /metrics?x=1 HTTP/1.0\r\n\r\n").await;

        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        let length: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(length, body.len());
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (_, service) = service();
        let response = roundtrip(&service, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let (_, service) = service();
        let response = roundtrip(&service, "POST /metrics HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(response.contains("Allow: GET\r\n"));
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let (_, service) = service();
        let response = roundtrip(&service, "garbage\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected() {
        let (_, service) = service();
        let (mut client, server) = duplex(1024 * 1024);

        // One endless line with no newline, connection held open
        client
            .write_all(&vec![b'A'; 8 * MAX_REQUEST_BYTES as usize])
            .await
            .unwrap();
        service.handle(server).await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    }

    #[tokio::test]
    async fn test_oversized_headers_are_rejected() {
        let (_, service) = service();
        let (mut client, server) = duplex(1024 * 1024);

        let mut request = b"GET /metrics HTTP/1.1\r\nX-Padding: ".to_vec();
        request.extend(vec![b'x'; 2 * MAX_REQUEST_BYTES as usize]);
        client.write_all(&request).await.unwrap();
        service.handle(server).await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 431 "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_client_times_out() {
        let (_, service) = service();
        let (mut client, server) = duplex(1024);
        client.write_all(b"GET /metrics HTTP/1.1\r\n").await.unwrap();

        let start = tokio::time::Instant::now();
        let err = service.handle(server).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= REQUEST_TIMEOUT);
        drop(client);
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let (metrics, service) = service();
        let server = MetricsServer::bind("127.0.0.1:0".parse().unwrap(), service)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.serve());

        metrics.record_failure();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: test\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("measurement_err_count 1\n"));
        assert!(!response.contains("# TYPE temperature"));

        handle.abort();
    }
}
