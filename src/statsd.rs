//! Fire-and-forget StatsD support.
//!
//! Deliberately thin: one UDP datagram per counter or timer event on a
//! cached socket, no buffering and no batching. The batching machinery in
//! this crate belongs to the InfluxDB collector only.

use std::env;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::common::BuildError;
use crate::recorder::MetricsRecorder;

// <namespace>.[counters|timers.]<path>:<value>|<type>

/// Sends metrics to a StatsD server as individual UDP datagrams.
///
/// Cloning shares the underlying socket. Send failures are logged and
/// swallowed; a metrics backend outage must never surface into request
/// handling.
#[derive(Clone)]
pub struct StatsdCollector {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    namespace: String,
    prepend_metric_type: bool,
}

impl StatsdCollector {
    /// Creates a collector sending to `host:port` under `namespace`.
    ///
    /// With `prepend_metric_type` set, counter paths are prefixed with
    /// `counters` and timer paths with `timers`, keeping the two families
    /// apart in the bucket tree.
    pub fn new<T>(
        target: T,
        namespace: &str,
        prepend_metric_type: bool,
    ) -> Result<Self, BuildError>
    where
        T: ToSocketAddrs,
    {
        let target = target
            .to_socket_addrs()
            .map_err(|e| BuildError::InvalidStatsdEndpoint(e.to_string()))?
            .next()
            .ok_or_else(|| {
                BuildError::InvalidStatsdEndpoint(
                    "to_socket_addrs returned an empty iterator".to_string(),
                )
            })?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| BuildError::FailedToBindSocket(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| BuildError::FailedToBindSocket(e.to_string()))?;

        Ok(StatsdCollector {
            socket: Arc::new(socket),
            target,
            namespace: namespace.to_string(),
            prepend_metric_type,
        })
    }

    /// Creates a collector from the process environment: `STATSD_HOST`
    /// (default `127.0.0.1`), `STATSD_PORT` (default `8125`) and
    /// `STATSD_NAMESPACE` (default `metrics`).
    pub fn from_env() -> Result<Self, BuildError> {
        let host = env::var("STATSD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("STATSD_PORT").unwrap_or_else(|_| "8125".to_string());
        let port: u16 = port
            .parse()
            .map_err(|_| BuildError::InvalidStatsdEndpoint(format!("bad port: {port}")))?;
        let namespace = env::var("STATSD_NAMESPACE").unwrap_or_else(|_| "metrics".to_string());

        StatsdCollector::new((host.as_str(), port), &namespace, true)
    }

    /// Sends one metric datagram. Periods inside a path segment are
    /// replaced with dashes so segments stay intact in the bucket tree.
    fn send(&self, path: &[&str], value: &str, metric_type: &str) {
        let msg = format!(
            "{}:{}|{}",
            self.build_path(path, metric_type),
            value,
            metric_type
        );

        match self.socket.send_to(msg.as_bytes(), self.target) {
            Ok(_) => (),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("statsd socket not ready, datagram dropped");
            }
            Err(e) => warn!(error = %e, "error sending statsd metric"),
        }
    }

    fn build_path(&self, path: &[&str], metric_type: &str) -> String {
        let mut out = self.namespace.clone();
        if self.prepend_metric_type {
            out.push('.');
            out.push_str(match metric_type {
                "c" => "counters",
                "ms" => "timers",
                other => other,
            });
        }
        for segment in path {
            out.push('.');
            out.push_str(&segment.replace('.', "-"));
        }
        out
    }
}

impl MetricsRecorder for StatsdCollector {
    fn record_timing(&mut self, duration: Duration, path: &[&str]) {
        let millis = duration.as_secs_f64() * 1000.0;
        self.send(path, &millis.to_string(), "ms");
    }

    fn increase_counter(&mut self, path: &[&str], amount: i64) {
        self.send(path, &amount.to_string(), "c");
    }

    /// StatsD buckets have no tags; the call is accepted and ignored.
    fn set_metric_tag(&mut self, _tag: &str, _value: &str) {}
}

#[cfg(test)]
mod tests {
    use super::StatsdCollector;
    use crate::recorder::MetricsRecorder;
    use crate::testing::FakeStatsdServer;
    use std::time::Duration;

    #[tokio::test]
    async fn test_counter_datagram_format() {
        let server = FakeStatsdServer::start().await;
        let mut statsd = StatsdCollector::new(server.addr(), "testing", true).unwrap();

        statsd.increase_counter(&["foo", "bar"], 5);
        assert!(server.wait_for_datagrams(1, Duration::from_secs(2)).await);

        assert_eq!(server.datagrams(), vec!["testing.counters.foo.bar:5|c"]);
    }

    #[tokio::test]
    async fn test_timer_datagram_format() {
        let server = FakeStatsdServer::start().await;
        let mut statsd = StatsdCollector::new(server.addr(), "testing", true).unwrap();

        statsd.record_timing(Duration::from_millis(250), &["foo", "bar"]);
        assert!(server.wait_for_datagrams(1, Duration::from_secs(2)).await);

        let metrics = server.find_metrics("testing.timers.foo.bar", "ms");
        assert_eq!(metrics.len(), 1);
        let value: f64 = metrics[0].1.parse().unwrap();
        assert!((value - 250.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_no_type_prefix_when_disabled() {
        let server = FakeStatsdServer::start().await;
        let mut statsd = StatsdCollector::new(server.addr(), "testing", false).unwrap();

        statsd.increase_counter(&["path"], 1);
        assert!(server.wait_for_datagrams(1, Duration::from_secs(2)).await);

        assert_eq!(server.datagrams(), vec!["testing.path:1|c"]);
    }

    #[tokio::test]
    async fn test_path_segments_are_normalized() {
        let server = FakeStatsdServer::start().await;
        let mut statsd = StatsdCollector::new(server.addr(), "testing", true).unwrap();

        statsd.increase_counter(&["one.two", "three"], 1);
        assert!(server.wait_for_datagrams(1, Duration::from_secs(2)).await);

        assert_eq!(
            server.datagrams(),
            vec!["testing.counters.one-two.three:1|c"]
        );
    }

    #[tokio::test]
    async fn test_metric_tags_are_ignored() {
        let server = FakeStatsdServer::start().await;
        let mut statsd = StatsdCollector::new(server.addr(), "testing", true).unwrap();

        statsd.set_metric_tag("correlation_id", "does not matter");
        statsd.increase_counter(&["tagged"], 1);
        assert!(server.wait_for_datagrams(1, Duration::from_secs(2)).await);

        // Only the counter datagram arrives; the tag produced nothing.
        assert_eq!(server.datagrams().len(), 1);
    }

    #[test]
    fn test_bad_endpoint_fails_fast() {
        assert!(StatsdCollector::new("definitely not an address", "ns", true).is_err());
    }
}
