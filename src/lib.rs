//! Request-scoped metrics instrumentation for web request handlers, with
//! batched submission to InfluxDB and a fire-and-forget StatsD sibling.
//!
//! ## Basics
//!
//! `metrics-exporter-influxdb` lets request-handling code record counters
//! and timers without ever touching the network on the hot path. For
//! InfluxDB, measurements are buffered in memory and a background task
//! periodically flushes them as a single batched write; for StatsD, each
//! event goes out immediately as one UDP datagram on a cached socket.
//!
//! ## High-level features
//!
//! - non-blocking `record` from any number of concurrent tasks
//! - periodic batch submission with a size-based early-flush trigger
//! - configurable default tags (applied to all measurements, overridden by
//!   a measurement's own tags if present)
//! - per-request recording through the [`MetricsRecorder`] capability
//!   interface, including an RAII execution timer
//! - clean shutdown that flushes everything recorded before it
//!
//! ## Behavior
//!
//! This exporter makes some explicit trade-offs to accomplish its task:
//!
//! - A failed batch is logged and discarded; there is no retry queue, so
//!   metrics written during a backend outage are lost rather than allowed
//!   to pile up or block later flushes
//! - `record` only contends with the flush task for the instant of an
//!   atomic buffer swap; encoding and submission always run off a private,
//!   already-drained batch
//! - Within one batch the encoded output preserves recording order; across
//!   batches no ordering is guaranteed
//! - Configuration is validated up front and the collector refuses to
//!   start otherwise
//!
//! ## Usage
//!
//! ```ignore
//! use metrics_exporter_influxdb::{InfluxBuilder, MetricsRecorder, RequestMetrics};
//!
//! // Construct the collector once at startup. `install` spawns the flush
//! // task on the current Tokio runtime, or on a background thread if
//! // there is none.
//! let collector = InfluxBuilder::from_env()
//!     .set_database("requests")
//!     .add_default_tag("service", "api")
//!     .install()?;
//!
//! // Hand clones of the handle to your request handlers; record against
//! // a per-request recorder and submit it when the response is done.
//! let mut request = RequestMetrics::new(collector.clone(), "http_request");
//! request.set_metric_tag("handler", "ItemHandler");
//! {
//!     let _timer = request.execution_timer(&["db", "query"]);
//!     // ... talk to the database ...
//! }
//! request.increase_counter(&["cache", "miss"], 1);
//! request.set_metric_tag("status_code", "200");
//! request.finish();
//!
//! // On process exit, push whatever is still buffered.
//! collector.shutdown().await;
//! ```
mod common;
pub use self::common::{BuildError, SubmitError};

mod measurement;
pub use self::measurement::{FieldValue, Measurement};

mod buffer;

pub mod formatting;

mod client;

mod collector;
pub use self::collector::Collector;

mod builder;
pub use self::builder::{ExporterFuture, InfluxBuilder};

mod recorder;
pub use self::recorder::{ExecutionTimer, MetricsRecorder, RequestMetrics};

mod statsd;
pub use self::statsd::StatsdCollector;

pub mod testing;
