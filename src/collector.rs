use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::buffer::MeasurementBuffer;
use crate::client::InfluxClient;
use crate::formatting::encode_batch;
use crate::measurement::Measurement;

/// Pending count past which `record` starts complaining in the logs. The
/// buffer itself stays unbounded; a count this size means the flush side
/// has been failing or stalled for many intervals.
const WARN_THRESHOLD: usize = 25_000;

pub(crate) enum Control {
    Flush,
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct Inner {
    buffer: MeasurementBuffer,
    default_tags: IndexMap<String, String>,
    max_batch_size: usize,
    control: mpsc::Sender<Control>,
    stopped: AtomicBool,
    submitted: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to the measurement collector.
///
/// The handle is cheap to clone and is how request-handling code reaches
/// the collector: construct one at startup with
/// [`InfluxBuilder`][crate::InfluxBuilder] and hand clones to your
/// handlers. [`record`][Collector::record] only appends to an in-memory
/// buffer; all network traffic happens on the background flush task.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

impl Collector {
    pub(crate) fn new(
        default_tags: IndexMap<String, String>,
        max_batch_size: usize,
        control: mpsc::Sender<Control>,
    ) -> Self {
        Collector {
            inner: Arc::new(Inner {
                buffer: MeasurementBuffer::new(),
                default_tags,
                max_batch_size,
                control,
                stopped: AtomicBool::new(false),
                submitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Records a measurement.
    ///
    /// Default tags are folded in (tags already on the measurement win on
    /// key collision) and the measurement is appended to the buffer. When
    /// the pending count reaches the configured maximum batch size an
    /// out-of-cycle flush is triggered instead of waiting for the next
    /// scheduled tick. Never blocks on I/O and never suspends.
    ///
    /// Measurements without a name or without any field are discarded
    /// here, before they can ever turn into a malformed wire line.
    pub fn record(&self, mut measurement: Measurement) {
        if self.inner.stopped.load(Ordering::Acquire) {
            debug!(
                measurement = measurement.name(),
                "collector is shut down, discarding measurement"
            );
            return;
        }
        if !measurement.is_well_formed() {
            warn!(
                measurement = measurement.name(),
                "discarding measurement without name or fields"
            );
            return;
        }

        measurement.merge_default_tags(&self.inner.default_tags);
        let pending = self.inner.buffer.append(measurement);
        if pending > WARN_THRESHOLD {
            warn!(pending, "measurement buffer is backed up");
        }
        if pending >= self.inner.max_batch_size {
            self.trigger_flush();
        }
    }

    /// Asks the flush task for an out-of-cycle flush. Returns immediately;
    /// the drain and submission happen on the background task.
    pub fn flush_now(&self) {
        self.trigger_flush();
    }

    /// Stops the periodic timer, drains and submits whatever is still
    /// buffered, and resolves once that final write has completed. Callers
    /// shutting a process down should await this to avoid losing in-flight
    /// measurements. Calling it again after completion is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let (ack, done) = oneshot::channel();
        if self.inner.control.send(Control::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Number of measurements currently buffered.
    pub fn pending(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Total measurements acknowledged by the backend.
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    /// Total measurements discarded after a failed submission.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn inner(&self) -> Arc<Inner> {
        Arc::clone(&self.inner)
    }

    fn trigger_flush(&self) {
        // A full channel means a flush is already queued; nothing to do.
        let _ = self.inner.control.try_send(Control::Flush);
    }
}

/// Drives the periodic drain/encode/submit cycle until shutdown.
///
/// Scheduled ticks and manual triggers hand the drained batch to a spawned
/// task so a slow backend never delays the next tick. The final flush on
/// shutdown is awaited in place, after the timer can no longer fire, so
/// there is no race between it and a scheduled tick.
pub(crate) async fn run_exporter(
    inner: Arc<Inner>,
    client: InfluxClient,
    interval: Duration,
    mut control: mpsc::Receiver<Control>,
) {
    let client = Arc::new(client);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => flush_detached(&inner, &client),
            command = control.recv() => match command {
                Some(Control::Flush) => flush_detached(&inner, &client),
                Some(Control::Shutdown(ack)) => {
                    submit_all(&inner, &client, inner.buffer.drain()).await;
                    let _ = ack.send(());
                    return;
                }
                // Every collector handle is gone; flush what's left and stop.
                None => {
                    submit_all(&inner, &client, inner.buffer.drain()).await;
                    return;
                }
            },
        }
    }
}

fn flush_detached(inner: &Arc<Inner>, client: &Arc<InfluxClient>) {
    let batch = inner.buffer.drain();
    if batch.is_empty() {
        return;
    }
    let inner = Arc::clone(inner);
    let client = Arc::clone(client);
    tokio::spawn(async move {
        submit_all(&inner, &client, batch).await;
    });
}

async fn submit_all(inner: &Inner, client: &InfluxClient, batch: Vec<Measurement>) {
    for chunk in batch.chunks(inner.max_batch_size) {
        let body = encode_batch(chunk);
        match client.submit(body).await {
            Ok(()) => {
                inner
                    .submitted
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                debug!(measurements = chunk.len(), "submitted batch");
            }
            Err(err) => {
                inner
                    .dropped
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                error!(
                    measurements = chunk.len(),
                    error = %err,
                    "batch submission failed, dropping measurements"
                );
            }
        }
    }
}
