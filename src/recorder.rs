use std::time::Duration;

use indexmap::IndexMap;
use quanta::Instant;

use crate::collector::Collector;
use crate::measurement::{FieldValue, Measurement};

/// Capability interface request handlers use to record metrics.
///
/// A handler holds a recorder and delegates to it; which backend the
/// metrics end up in depends on the implementation it was handed:
/// [`RequestMetrics`] accumulates one tagged measurement per request for
/// the InfluxDB collector, [`StatsdCollector`][crate::StatsdCollector]
/// sends a datagram per call.
pub trait MetricsRecorder {
    /// Records a named duration under the given metric path.
    fn record_timing(&mut self, duration: Duration, path: &[&str]);

    /// Increases a counter under the given metric path.
    fn increase_counter(&mut self, path: &[&str], amount: i64);

    /// Attaches a tag to the metrics emitted for the current request.
    ///
    /// Backend-dependent: implementations without per-request tagging
    /// ignore it.
    fn set_metric_tag(&mut self, tag: &str, value: &str);

    /// Starts a scoped timer for the given metric path.
    ///
    /// The returned guard records the elapsed duration when it goes out of
    /// scope, on every exit path - normal fallthrough, early return, `?`
    /// propagation or unwind.
    fn execution_timer<'a>(&'a mut self, path: &[&str]) -> ExecutionTimer<'a, Self>
    where
        Self: Sized,
    {
        ExecutionTimer {
            recorder: self,
            path: path.iter().map(|s| (*s).to_owned()).collect(),
            start: Instant::now(),
        }
    }
}

/// Guard returned by [`MetricsRecorder::execution_timer`].
pub struct ExecutionTimer<'a, R: MetricsRecorder> {
    recorder: &'a mut R,
    path: Vec<String>,
    start: Instant,
}

impl<R: MetricsRecorder> Drop for ExecutionTimer<'_, R> {
    fn drop(&mut self) {
        let elapsed = Instant::now().duration_since(self.start);
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        self.recorder.record_timing(elapsed, &path);
    }
}

/// Per-request recorder for the InfluxDB collector.
///
/// Construct one when a request starts, record against it while handling
/// the request, and call [`finish`][RequestMetrics::finish] when the
/// response is done. Everything recorded in between becomes a single
/// tagged measurement: timings and counters are fields (path segments
/// joined with periods), tags apply to the whole measurement, and `finish`
/// adds a `duration` field with the total wall time since construction.
pub struct RequestMetrics {
    collector: Collector,
    measurement: String,
    tags: IndexMap<String, String>,
    fields: Vec<(String, FieldValue)>,
    started: Instant,
}

impl RequestMetrics {
    pub fn new<N>(collector: Collector, measurement: N) -> Self
    where
        N: Into<String>,
    {
        RequestMetrics {
            collector,
            measurement: measurement.into(),
            tags: IndexMap::new(),
            fields: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Records the total request duration and submits the accumulated
    /// measurement to the collector. Non-blocking.
    pub fn finish(mut self) {
        let elapsed = Instant::now().duration_since(self.started);
        self.fields
            .push(("duration".to_owned(), FieldValue::Float(elapsed.as_secs_f64())));

        let mut measurement = Measurement::new(self.measurement);
        for (key, value) in self.tags {
            measurement = measurement.with_tag(key, value);
        }
        for (key, value) in self.fields {
            measurement = measurement.with_field(key, value);
        }
        self.collector.record(measurement);
    }
}

impl MetricsRecorder for RequestMetrics {
    fn record_timing(&mut self, duration: Duration, path: &[&str]) {
        self.fields
            .push((path.join("."), FieldValue::Float(duration.as_secs_f64())));
    }

    fn increase_counter(&mut self, path: &[&str], amount: i64) {
        self.fields.push((path.join("."), FieldValue::Integer(amount)));
    }

    fn set_metric_tag(&mut self, tag: &str, value: &str) {
        self.tags.insert(tag.to_owned(), value.to_owned());
    }
}
