/// Managed connection to the Fabric metadata server
///
/// This module owns the single logical connection used for metadata
/// fetches: TCP connect with a per-attempt timeout, the authentication
/// handshake, a liveness probe, and an indefinite retry loop with
/// throttled error logging. Outages of the metadata server are expected
/// to be transient but possibly long, so `connect()` never gives up.

use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, error};

use crate::config::FabricSettings;
use crate::error::{ConnectionError, MetadataError};
use crate::protocol::{
    encode_auth, encode_call, encode_ping, DumpParser, DumpResponse, ProtocolError, StatusReply,
};

/// Retry behavior for the connect loop.
///
/// Kept as an explicit policy object so the throttle is testable
/// without a live network dependency.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Sleep between failed connect attempts
    pub retry_interval: Duration,
    /// Log an error on the first failure and every Nth after that
    pub report_every: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            report_every: 5,
        }
    }
}

impl RetryPolicy {
    /// Start a failure counter for one retry loop
    pub fn reporter(&self) -> FailureReporter {
        FailureReporter {
            report_every: self.report_every,
            attempts: 0,
        }
    }
}

/// Counts consecutive failures and decides which ones get logged.
///
/// The first failure is always reported, then every Nth. After each
/// report the counter is reset to a non-unit value so the
/// first-attempt message is never emitted twice.
#[derive(Debug)]
pub struct FailureReporter {
    report_every: u32,
    attempts: u32,
}

impl FailureReporter {
    /// Record one failed attempt; returns true when it should be logged
    pub fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        if self.attempts == 1 || self.attempts % self.report_every == 0 {
            self.attempts = self.report_every * 2;
            return true;
        }
        false
    }
}

/// Connection manager for the Fabric metadata server.
///
/// Observable states are only Disconnected and Connected; `connect()`
/// blocks through its retry loop until the transition succeeds.
pub struct ConnectionManager {
    host: String,
    port: u16,
    user: String,
    password: String,
    connect_timeout: Duration,
    retry: RetryPolicy,
    stream: Option<TcpStream>,
    connected: bool,
    read_buf: BytesMut,
}

impl ConnectionManager {
    pub fn new(settings: &FabricSettings) -> Self {
        Self {
            host: settings.normalized_host(),
            port: settings.port,
            user: settings.user.clone(),
            password: settings.password.clone(),
            connect_timeout: settings.connect_timeout(),
            retry: RetryPolicy::default(),
            stream: None,
            connected: false,
            read_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Override the retry policy (shorter intervals in tests)
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Establish the connection, blocking until it succeeds.
    ///
    /// Idempotent: when already connected and the liveness probe
    /// passes, returns immediately without a new connection attempt.
    /// Otherwise each iteration opens a fresh connection with the
    /// configured timeout and authenticates; on failure it sleeps for
    /// the retry interval and tries again, indefinitely.
    pub async fn connect(&mut self) {
        if self.connected && self.ping().await {
            return;
        }

        self.connected = false;
        self.stream = None;
        let mut reporter = self.retry.reporter();

        loop {
            match self.try_connect().await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.read_buf.clear();
                    self.connected = true;
                    debug!("Connected to Fabric at {}:{}", self.host, self.port);
                    return;
                }
                Err(err) => {
                    if reporter.record_failure() {
                        error!(
                            "Failed connecting to Fabric at {}:{}; will retry ({})",
                            self.host, self.port, err
                        );
                    }
                    sleep(self.retry.retry_interval).await;
                }
            }
        }
    }

    /// Mark the manager not-connected and release the underlying
    /// connection. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.stream = None;
        self.read_buf.clear();
    }

    /// Probe the live connection; marks the manager disconnected when
    /// the probe fails.
    pub async fn ping(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match probe(stream).await {
            Ok(StatusReply::Ok(_)) => true,
            _ => {
                self.connected = false;
                self.stream = None;
                false
            }
        }
    }

    /// Invoke a stored procedure and return its parsed response.
    ///
    /// Transport failures drop the connection so the next cycle starts
    /// from a clean reconnect.
    pub async fn call(&mut self, procedure: &str) -> Result<DumpResponse, MetadataError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(MetadataError::call_failed(
                procedure.to_string(),
                "not connected".to_string(),
            ));
        };

        match exchange(stream, &mut self.read_buf, procedure).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if matches!(err, MetadataError::Io(_)) {
                    self.connected = false;
                    self.stream = None;
                }
                Err(err)
            }
        }
    }

    async fn try_connect(&self) -> Result<TcpStream, ConnectionError> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(ConnectionError::Io(err)),
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                })
            }
        };
        stream.set_nodelay(true)?;
        self.authenticate(&mut stream).await?;
        Ok(stream)
    }

    async fn authenticate(&self, stream: &mut TcpStream) -> Result<(), ConnectionError> {
        stream
            .write_all(encode_auth(&self.user, &self.password).as_bytes())
            .await?;
        let mut buf = BytesMut::with_capacity(64);
        match read_status(stream, &mut buf).await? {
            StatusReply::Ok(_) => Ok(()),
            StatusReply::Err(message) => Err(ConnectionError::AuthFailed { message }),
        }
    }
}

async fn probe(stream: &mut TcpStream) -> Result<StatusReply, ConnectionError> {
    stream.write_all(encode_ping().as_bytes()).await?;
    let mut buf = BytesMut::with_capacity(16);
    read_status(stream, &mut buf).await
}

async fn read_status(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<StatusReply, ConnectionError> {
    loop {
        match DumpParser::parse_status(buf) {
            Ok(Some(reply)) => return Ok(reply),
            Ok(None) => {}
            Err(err) => {
                return Err(ConnectionError::BadHandshake {
                    reply: err.to_string(),
                })
            }
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )));
        }
    }
}

async fn exchange(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    procedure: &str,
) -> Result<DumpResponse, MetadataError> {
    stream.write_all(encode_call(procedure).as_bytes()).await?;
    loop {
        match DumpParser::parse_response(buf) {
            Ok(Some(response)) => return Ok(response),
            Ok(None) => {}
            Err(ProtocolError::ServerError(message)) => {
                return Err(MetadataError::call_failed(procedure.to_string(), message))
            }
            Err(err) => return Err(MetadataError::Protocol(err)),
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(MetadataError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-response",
            )));
        }
    }
}

/// Canned in-process metadata server used by unit tests across the
/// crate: answers `AUTH`/`PING` and replies to every `CALL` with the
/// configured payload.
#[cfg(test)]
pub(crate) mod test_server {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    use crate::config::FabricSettings;

    pub(crate) struct FakeFabric {
        pub addr: SocketAddr,
        pub accepted: Arc<AtomicUsize>,
    }

    impl FakeFabric {
        pub(crate) fn settings(&self) -> FabricSettings {
            FabricSettings {
                host: self.addr.ip().to_string(),
                port: self.addr.port(),
                user: "fabric".to_string(),
                password: "secret".to_string(),
                ..Default::default()
            }
        }
    }

    pub(crate) async fn spawn(response: &'static str) -> FakeFabric {
        spawn_with(response, "+OK\n").await
    }

    pub(crate) async fn spawn_with(
        response: &'static str,
        auth_reply: &'static str,
    ) -> FakeFabric {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle(stream, response, auth_reply));
            }
        });

        FakeFabric { addr, accepted }
    }

    async fn handle(stream: TcpStream, response: &'static str, auth_reply: &'static str) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = if line.starts_with("AUTH") {
                auth_reply
            } else if line == "PING" {
                "+PONG\n"
            } else if line.starts_with("CALL") {
                response
            } else {
                "-ERR unknown command\n"
            };
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_server;
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::net::TcpListener;

    const RESPONSE: &str = "*1\nuuid-1\t5\tok\n*0\n.\n";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            retry_interval: Duration::from_millis(10),
            report_every: 5,
        }
    }

    #[test]
    fn test_failure_reporter_throttle() {
        // first attempt always logged, then every 5th
        for failures in [1u32, 2, 4, 5, 6, 10, 11, 23, 25] {
            let mut reporter = RetryPolicy::default().reporter();
            let reports = (0..failures)
                .filter(|_| reporter.record_failure())
                .count() as u32;
            assert_eq!(reports, failures.div_ceil(5), "N={}", failures);
        }
    }

    #[test]
    fn test_failure_reporter_first_message_not_repeated() {
        let mut reporter = RetryPolicy::default().reporter();
        assert!(reporter.record_failure());
        // the counter must land on a non-unit value, so none of the
        // following four failures can look like a first attempt
        for _ in 0..4 {
            assert!(!reporter.record_failure());
        }
        assert!(reporter.record_failure());
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let server = test_server::spawn(RESPONSE).await;
        let mut manager = ConnectionManager::new(&server.settings());

        assert!(!manager.is_connected());
        manager.connect().await;
        assert!(manager.is_connected());

        manager.disconnect();
        assert!(!manager.is_connected());
        // safe when already disconnected
        manager.disconnect();
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_when_alive() {
        let server = test_server::spawn(RESPONSE).await;
        let mut manager = ConnectionManager::new(&server.settings());

        manager.connect().await;
        assert_eq!(server.accepted.load(Ordering::SeqCst), 1);

        // still connected and alive: no new connection attempt
        manager.connect().await;
        assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_reconnects_after_disconnect() {
        let server = test_server::spawn(RESPONSE).await;
        let mut manager = ConnectionManager::new(&server.settings());

        manager.connect().await;
        manager.disconnect();
        manager.connect().await;
        assert!(manager.is_connected());
        assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_is_a_connection_error() {
        let server = test_server::spawn_with(RESPONSE, "-ERR access denied\n").await;
        let manager = ConnectionManager::new(&server.settings()).with_retry(fast_retry());

        let err = manager.try_connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::AuthFailed { ref message } if message.contains("denied")));
    }

    #[tokio::test]
    async fn test_ping_detects_dead_peer() {
        // a server that accepts and immediately hangs up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // reply to AUTH so the handshake passes, then hang up
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"+OK\n").await;
            }
        });

        let settings = FabricSettings {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        };
        let mut manager = ConnectionManager::new(&settings);
        manager.connect().await;
        assert!(manager.is_connected());

        assert!(!manager.ping().await);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_call_returns_parsed_result_sets() {
        let server = test_server::spawn(RESPONSE).await;
        let mut manager = ConnectionManager::new(&server.settings());
        manager.connect().await;

        let response = manager.call("dump.servers").await.unwrap();
        assert_eq!(response.result_sets.len(), 2);
        assert_eq!(response.result_sets[0].rows[0][0], "uuid-1");
    }

    #[tokio::test]
    async fn test_call_without_connection_fails() {
        let server = test_server::spawn(RESPONSE).await;
        let mut manager = ConnectionManager::new(&server.settings());

        let err = manager.call("dump.servers").await.unwrap_err();
        assert!(matches!(err, MetadataError::CallFailed { .. }));
    }

    #[tokio::test]
    async fn test_call_server_error_reported_as_call_failure() {
        let server = test_server::spawn("-ERR dump failed\n").await;
        let mut manager = ConnectionManager::new(&server.settings());
        manager.connect().await;

        let err = manager.call("dump.servers").await.unwrap_err();
        assert!(matches!(err, MetadataError::CallFailed { ref message, .. } if message.contains("dump failed")));
        // a protocol-level failure does not tear down the connection
        assert!(manager.is_connected());
    }
}
