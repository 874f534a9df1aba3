//! Test support for downstream applications.
//!
//! In-process stand-ins for the two backends: a minimal HTTP endpoint
//! accepting InfluxDB write requests and a UDP socket capturing StatsD
//! datagrams. Both bind an unused local port, capture everything they
//! receive and expose it for assertions. Construction panics on bind
//! failures; this module is meant for test code only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portable_atomic::{AtomicU16, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

/// One write request captured by [`FakeInfluxServer`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// Request target, e.g. `/write?db=testdb`.
    pub target: String,
    /// Value of the `Authorization` header, if any.
    pub authorization: Option<String>,
    /// The line-protocol body.
    pub body: String,
}

/// Implements just enough of an InfluxDB write endpoint for tests.
///
/// Answers `204 No Content` by default; use
/// [`set_response_status`][FakeInfluxServer::set_response_status] to
/// simulate authentication or server failures.
pub struct FakeInfluxServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: Arc<AtomicU16>,
    accept_task: JoinHandle<()>,
}

impl FakeInfluxServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake influxdb server");
        let addr = listener.local_addr().expect("no local addr");
        let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let status = Arc::new(AtomicU16::new(204));

        let task_requests = Arc::clone(&requests);
        let task_status = Arc::clone(&status);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let requests = Arc::clone(&task_requests);
                let status = Arc::clone(&task_status);
                tokio::spawn(async move {
                    handle_connection(stream, requests, status).await;
                });
            }
        });

        FakeInfluxServer {
            addr,
            requests,
            status,
            accept_task,
        }
    }

    /// The URL to hand to the builder as the write endpoint.
    pub fn write_url(&self) -> String {
        format!("http://{}/write", self.addr)
    }

    /// Sets the HTTP status returned for subsequent requests.
    pub fn set_response_status(&self, status: u16) {
        self.status.store(status, Ordering::Relaxed);
    }

    /// Everything captured so far, in arrival order.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }

    /// All body lines across all captured requests, in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .flat_map(|r| r.body.lines().map(str::to_owned).collect::<Vec<_>>())
            .collect()
    }

    /// Waits until at least `count` requests have been captured.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.requests.lock().len() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

impl Drop for FakeInfluxServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: Arc<AtomicU16>,
) {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];

    // Read the head, then exactly content-length bytes of body.
    let header_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            Err(_) => return,
        }
        if let Some(pos) = find_subsequence(&raw, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            Err(_) => return,
        }
    }

    let target = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("")
        .to_string();
    let authorization = head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("authorization")
            .then(|| value.trim().to_string())
    });
    let body_end = (header_end + content_length).min(raw.len());
    let body = String::from_utf8_lossy(&raw[header_end..body_end]).to_string();

    requests.lock().push(CapturedRequest {
        target,
        authorization,
        body,
    });

    let status = status.load(Ordering::Relaxed);
    let reason = match status {
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        500 => "Internal Server Error",
        _ => "OK",
    };
    let response =
        format!("HTTP/1.1 {status} {reason}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Captures StatsD datagrams for assertions, the way a real server would
/// receive them.
pub struct FakeStatsdServer {
    addr: SocketAddr,
    datagrams: Arc<Mutex<Vec<String>>>,
    recv_task: JoinHandle<()>,
}

impl FakeStatsdServer {
    pub async fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake statsd server");
        let addr = socket.local_addr().expect("no local addr");
        let datagrams: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let task_datagrams = Arc::clone(&datagrams);
        let recv_task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                let Ok((len, _)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let datagram = String::from_utf8_lossy(&buf[..len]).to_string();
                task_datagrams.lock().push(datagram);
            }
        });

        FakeStatsdServer {
            addr,
            datagrams,
            recv_task,
        }
    }

    /// The address to hand to the statsd collector.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every datagram received so far, in arrival order.
    pub fn datagrams(&self) -> Vec<String> {
        self.datagrams.lock().clone()
    }

    /// Returns captured `(path, value, type)` triples whose path starts
    /// with `prefix` and whose type matches `metric_type`.
    pub fn find_metrics(&self, prefix: &str, metric_type: &str) -> Vec<(String, String, String)> {
        self.datagrams
            .lock()
            .iter()
            .filter_map(|datagram| {
                let (path, rest) = datagram.split_once(':')?;
                let (value, mtype) = rest.split_once('|')?;
                (path.starts_with(prefix) && mtype == metric_type)
                    .then(|| (path.to_string(), value.to_string(), mtype.to_string()))
            })
            .collect()
    }

    /// Waits until at least `count` datagrams have been captured.
    pub async fn wait_for_datagrams(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.datagrams.lock().len() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

impl Drop for FakeStatsdServer {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}
