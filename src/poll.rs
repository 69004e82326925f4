//! Poll path: drain pending alerts and convert them to epoch-nanosecond readings.
//!
//! A poll cycle is all-or-nothing. The buffer is drained first, then every
//! drained timestamp is parsed; the first malformed one fails the cycle and the
//! drained batch is dropped rather than requeued.

use std::sync::Arc;

use chrono::DateTime;

use crate::{AlertBuffer, AlertRecord};

/// Why an `observed_at` value could not be turned into epoch nanoseconds.
#[derive(Debug, thiserror::Error)]
pub enum TimestampFault {
    #[error("not an RFC 3339 timestamp ({0})")]
    Malformed(#[from] chrono::ParseError),

    #[error("outside the representable epoch-nanosecond range")]
    OutOfRange,
}

/// A drained alert carried a timestamp that does not parse as RFC 3339.
#[derive(Debug, thiserror::Error)]
#[error("invalid alert time {observed_at:?} from camera {camera:?}: {fault}")]
pub struct TimestampParseError {
    pub camera: String,
    pub observed_at: String,
    pub fault: TimestampFault,
}

/// Parse a record's `observed_at` (RFC 3339) into nanoseconds since the Unix epoch.
pub fn observed_at_to_epoch_nanos(record: &AlertRecord) -> Result<i64, TimestampParseError> {
    let fail = |fault| TimestampParseError {
        camera: record.source().to_string(),
        observed_at: record.observed_at().to_string(),
        fault,
    };
    let parsed = DateTime::parse_from_rfc3339(record.observed_at())
        .map_err(|e| fail(TimestampFault::Malformed(e)))?;
    parsed
        .timestamp_nanos_opt()
        .ok_or_else(|| fail(TimestampFault::OutOfRange))
}

/// Synchronous read path invoked once per poll cycle.
#[derive(Clone, Debug)]
pub struct PollBridge {
    buffer: Arc<AlertBuffer>,
}

impl PollBridge {
    pub fn new(buffer: Arc<AlertBuffer>) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &Arc<AlertBuffer> {
        &self.buffer
    }

    /// Drain the buffer and return one epoch-ns value per alert, in arrival order.
    ///
    /// An empty buffer yields an empty vector. On the first bad timestamp the
    /// whole drained batch is discarded and the error is returned.
    pub fn poll(&self) -> Result<Vec<i64>, TimestampParseError> {
        // Lock is released before any parsing happens.
        let drained = self.buffer.drain_all();
        let drained_len = drained.len();

        drained
            .iter()
            .map(observed_at_to_epoch_nanos)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                log::error!(
                    "poll cycle failed, discarding {} drained alert(s): {}",
                    drained_len,
                    err
                );
                err
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge_with(times: &[&str]) -> PollBridge {
        let buffer = Arc::new(AlertBuffer::new());
        for t in times {
            buffer.append(AlertRecord::new("cam1", *t));
        }
        PollBridge::new(buffer)
    }

    #[test]
    fn converts_utc_timestamp() {
        let record = AlertRecord::new("cam1", "2023-01-01T00:00:00Z");
        assert_eq!(
            observed_at_to_epoch_nanos(&record).unwrap(),
            1_672_531_200_000_000_000
        );
    }

    #[test]
    fn converts_offset_and_fractional_seconds() {
        let record = AlertRecord::new("cam1", "2023-01-01T09:00:00.5+09:00");
        assert_eq!(
            observed_at_to_epoch_nanos(&record).unwrap(),
            1_672_531_200_500_000_000
        );
    }

    #[test]
    fn empty_time_is_malformed() {
        let err = observed_at_to_epoch_nanos(&AlertRecord::new("cam1", "")).unwrap_err();
        assert!(matches!(err.fault, TimestampFault::Malformed(_)));
    }

    #[test]
    fn time_beyond_i64_nanos_is_out_of_range() {
        let err =
            observed_at_to_epoch_nanos(&AlertRecord::new("cam1", "3000-01-01T00:00:00Z"))
                .unwrap_err();
        assert!(matches!(err.fault, TimestampFault::OutOfRange));
        assert_eq!(err.observed_at, "3000-01-01T00:00:00Z");
    }

    #[test]
    fn poll_on_empty_buffer_is_ok() {
        let bridge = bridge_with(&[]);
        assert_eq!(bridge.poll().unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn bad_record_discards_whole_batch() {
        for bad_index in 0..3 {
            let mut times = vec![
                "2023-01-01T00:00:00Z",
                "2023-01-01T00:00:01Z",
                "2023-01-01T00:00:02Z",
            ];
            times[bad_index] = "not-a-time";
            let bridge = bridge_with(&times);

            let err = bridge.poll().unwrap_err();
            assert_eq!(err.observed_at, "not-a-time");
            assert!(bridge.buffer().is_empty());
            assert!(bridge.poll().unwrap().is_empty());
        }
    }

    #[test]
    fn error_message_names_camera_and_time() {
        let bridge = bridge_with(&["yesterday"]);
        let msg = bridge.poll().unwrap_err().to_string();
        assert!(msg.contains("cam1"));
        assert!(msg.contains("yesterday"));
    }
}
