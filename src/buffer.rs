use parking_lot::Mutex;

use crate::measurement::Measurement;

/// Append-only accumulator shared between recorder threads and the flush
/// task.
///
/// `append` and `drain` contend only for the duration of a push or a
/// pointer swap; encoding and submission always run on a drained, private
/// `Vec`. The buffer itself never refuses or drops a measurement - size
/// policy lives in the collector, which watches the count `append` returns.
#[derive(Default)]
pub(crate) struct MeasurementBuffer {
    inner: Mutex<Vec<Measurement>>,
}

impl MeasurementBuffer {
    pub fn new() -> Self {
        MeasurementBuffer::default()
    }

    /// Appends a measurement and returns the new pending count.
    pub fn append(&self, measurement: Measurement) -> usize {
        let mut pending = self.inner.lock();
        pending.push(measurement);
        pending.len()
    }

    /// Swaps the active buffer for a fresh one and returns the previous
    /// contents in recording order. A measurement is returned by exactly
    /// one drain; appenders racing with the swap land in one buffer or the
    /// other, never in neither.
    pub fn drain(&self) -> Vec<Measurement> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::MeasurementBuffer;
    use crate::measurement::Measurement;
    use std::sync::Arc;

    fn sample(n: usize) -> Measurement {
        Measurement::new(format!("sample_{n}")).with_field("value", n as i64)
    }

    #[test]
    fn test_drain_returns_all_in_order_and_empties() {
        let buffer = MeasurementBuffer::new();
        for n in 0..5 {
            assert_eq!(buffer.append(sample(n)), n + 1);
        }

        let drained = buffer.drain();
        assert_eq!(drained.len(), 5);
        for (n, m) in drained.iter().enumerate() {
            assert_eq!(m.name(), format!("sample_{n}"));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_successive_drains_never_repeat() {
        let buffer = MeasurementBuffer::new();
        buffer.append(sample(1));
        let first = buffer.drain();
        buffer.append(sample(2));
        let second = buffer.drain();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].name(), second[0].name());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_concurrent_appends_are_all_observed() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 250;

        let buffer = Arc::new(MeasurementBuffer::new());
        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for n in 0..PER_THREAD {
                    buffer.append(sample(n));
                }
            }));
        }

        // Drain while appenders are still running; nothing may be lost or
        // duplicated across the drains plus the final remainder.
        let mut total = 0;
        while total < THREADS * PER_THREAD {
            total += buffer.drain().len();
            if handles.iter().all(|h| h.is_finished()) {
                total += buffer.drain().len();
                break;
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }
        total += buffer.drain().len();

        assert_eq!(total, THREADS * PER_THREAD);
    }
}
