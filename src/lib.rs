//! Person-detection device service
//!
//! This crate bridges a detection camera that pushes "person detected" alerts
//! over HTTP with a device-management framework that polls for readings.
//!
//! # Architecture
//!
//! Alerts flow through a single shared buffer:
//!
//! 1. **Ingestion**: the camera POSTs `camera` + `time` form fields; each request
//!    becomes one `AlertRecord` appended to the `AlertBuffer`.
//! 2. **Buffering**: the buffer is unbounded, FIFO, and guarded by one mutex.
//!    Nothing but in-memory list manipulation happens under the lock.
//! 3. **Polling**: each poll cycle drains the buffer atomically and converts every
//!    drained timestamp into epoch nanoseconds. One bad timestamp fails the cycle
//!    and the whole drained batch is dropped (at-most-once delivery).
//!
//! # Module Structure
//!
//! - `api`: HTTP ingestion endpoint (`IngestServer`)
//! - `poll`: Drain + timestamp conversion (`PollBridge`)
//! - `driver`: Device-service driver seam (`ProtocolDriver`, `PersonDetectionDriver`)
//! - `config`: Service configuration (file + environment)
//! - Core types: `AlertRecord`, `AlertBuffer`

use std::sync::{Mutex, MutexGuard};

pub mod api;
pub mod config;
pub mod driver;
pub mod poll;

pub use api::{IngestConfig, IngestHandle, IngestServer};
pub use driver::{
    CommandRequest, CommandValue, DriverError, PersonDetectionDriver, ProtocolDriver,
    ALERT_RESOURCE,
};
pub use poll::{observed_at_to_epoch_nanos, PollBridge, TimestampFault, TimestampParseError};

// -------------------- Alert Records --------------------

/// One detection alert as reported by a camera.
///
/// `observed_at` is kept exactly as received; it is only parsed when a poll
/// cycle converts it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertRecord {
    source: String,
    observed_at: String,
}

impl AlertRecord {
    pub fn new(source: impl Into<String>, observed_at: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            observed_at: observed_at.into(),
        }
    }

    /// Identifier of the originating camera. Not unique.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Observation time as sent by the camera (expected RFC 3339).
    pub fn observed_at(&self) -> &str {
        &self.observed_at
    }
}

// -------------------- Alert Buffer --------------------

/// Unbounded FIFO of pending alerts shared by the ingestion and poll paths.
///
/// Both `append` and `drain_all` take the same exclusive lock. `drain_all` swaps
/// the pending list for an empty one, so records are never split, lost, or
/// duplicated between two drains.
#[derive(Debug, Default)]
pub struct AlertBuffer {
    pending: Mutex<Vec<AlertRecord>>,
}

impl AlertBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record at the tail.
    pub fn append(&self, record: AlertRecord) {
        self.lock().push(record);
    }

    /// Take every pending record in arrival order, leaving the buffer empty.
    pub fn drain_all(&self) -> Vec<AlertRecord> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of records waiting for the next drain.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // push and take are the only mutations; a poisoned Vec is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<AlertRecord>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn record(source: &str, n: usize) -> AlertRecord {
        AlertRecord::new(source, format!("2023-01-01T00:00:{:02}Z", n % 60))
    }

    #[test]
    fn drain_preserves_append_order() {
        let buffer = AlertBuffer::new();
        let records: Vec<_> = (0..10).map(|n| record("cam1", n)).collect();
        for r in &records {
            buffer.append(r.clone());
        }

        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.drain_all(), records);
        assert!(buffer.is_empty());
    }

    #[test]
    fn empty_drain_returns_nothing() {
        let buffer = AlertBuffer::new();
        assert!(buffer.drain_all().is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn second_drain_without_append_is_empty() {
        let buffer = AlertBuffer::new();
        buffer.append(record("cam1", 0));
        buffer.append(record("cam2", 1));

        assert_eq!(buffer.drain_all().len(), 2);
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn duplicate_submissions_are_distinct_records() {
        let buffer = AlertBuffer::new();
        buffer.append(AlertRecord::new("cam1", "2023-01-01T00:00:00Z"));
        buffer.append(AlertRecord::new("cam1", "2023-01-01T00:00:00Z"));
        assert_eq!(buffer.drain_all().len(), 2);
    }

    #[test]
    fn concurrent_appends_are_drained_exactly_once() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 250;

        let buffer = Arc::new(AlertBuffer::new());
        let drained = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for n in 0..PER_PRODUCER {
                        buffer.append(AlertRecord::new(format!("cam{p}"), n.to_string()));
                    }
                })
            })
            .collect();

        let consumer = {
            let buffer = Arc::clone(&buffer);
            let drained = Arc::clone(&drained);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let batch = buffer.drain_all();
                    drained.lock().unwrap().extend(batch);
                    std::thread::yield_now();
                }
            })
        };

        for handle in producers {
            handle.join().unwrap();
        }
        consumer.join().unwrap();

        let mut all = drained.lock().unwrap().clone();
        all.extend(buffer.drain_all());
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);

        let unique: HashSet<_> = all
            .iter()
            .map(|r| (r.source().to_string(), r.observed_at().to_string()))
            .collect();
        assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);

        // Each producer's own records keep their relative order.
        for p in 0..PRODUCERS {
            let source = format!("cam{p}");
            let seq: Vec<usize> = all
                .iter()
                .filter(|r| r.source() == source)
                .map(|r| r.observed_at().parse().unwrap())
                .collect();
            assert_eq!(seq, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
    }
}
