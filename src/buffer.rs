//! Buffer module for accumulating readings and triggering flushes.
//!
//! Every append is followed, inside the same call, by the threshold check.
//! When the buffer holds more readings than the threshold, the contents are
//! drained, joined into a single payload string and handed to the flush
//! handler. The buffer is empty again before `append` returns.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::SamplingConfig;
use crate::reading::Reading;

/// Callback receiving every batch the trigger produces.
pub type FlushHandler = Box<dyn Fn(FlushBatch) + Send + Sync>;

/// JSON body sent to the endpoint: `{"data": "<r1>+<r2>+..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushPayload {
    pub data: String,
}

/// A drained and joined set of readings, ready to be sent.
#[derive(Debug, Clone)]
pub struct FlushBatch {
    /// Identifier used to correlate log lines for this batch
    pub batch_id: Uuid,

    /// When the trigger fired
    pub created_at: DateTime<Utc>,

    /// Number of readings joined into `data`
    pub reading_count: usize,

    /// Readings in insertion order, joined with the delimiter
    pub data: String,
}

impl FlushBatch {
    fn new(readings: Vec<Reading>, delimiter: char) -> Self {
        let reading_count = readings.len();
        let separator = delimiter.to_string();
        let data = readings
            .iter()
            .map(Reading::as_str)
            .collect::<Vec<_>>()
            .join(separator.as_str());

        Self {
            batch_id: Uuid::new_v4(),
            created_at: Utc::now(),
            reading_count,
            data,
        }
    }

    /// Milliseconds elapsed since the trigger fired.
    ///
    /// Clamped at zero if the wall clock stepped backwards in between.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds().max(0)
    }

    /// Wire body for this batch.
    pub fn payload(&self) -> FlushPayload {
        FlushPayload {
            data: self.data.clone(),
        }
    }
}

/// Size check run after every append.
///
/// The trigger owns the threshold and the delimiter used to join a drained
/// buffer. It fires when the buffer holds strictly more readings than the
/// threshold, so with the default threshold of 3 every batch has exactly
/// four readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTrigger {
    threshold: usize,
    delimiter: char,
}

impl FlushTrigger {
    /// Create a trigger.
    ///
    /// # Arguments
    ///
    /// * `threshold` - Largest buffer length that does not flush
    /// * `delimiter` - Character placed between readings in the payload
    pub fn new(threshold: usize, delimiter: char) -> Self {
        Self {
            threshold,
            delimiter,
        }
    }

    /// Trigger using the threshold and delimiter from the sampling config.
    pub fn from_config(config: &SamplingConfig) -> Self {
        Self::new(config.flush_threshold, config.delimiter)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Strictly greater: a buffer sitting exactly at the threshold waits.
    pub fn should_flush(&self, len: usize) -> bool {
        len > self.threshold
    }

    /// Drain `readings` if they crossed the threshold.
    fn check(&self, readings: &mut Vec<Reading>) -> Option<FlushBatch> {
        if !self.should_flush(readings.len()) {
            return None;
        }

        let drained = std::mem::take(readings);
        Some(FlushBatch::new(drained, self.delimiter))
    }
}

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Total number of readings appended
    pub readings_received: u64,

    /// Total number of readings handed to the flush handler
    pub readings_flushed: u64,

    /// Number of times the trigger fired
    pub flushes: u64,
}

/// Ordered, append-only sequence of readings.
///
/// Readings are kept in insertion order regardless of which sampler produced
/// them. Each [`append`](SampleBuffer::append) runs the flush check before
/// returning, so the buffer never holds more than `threshold` readings
/// between calls.
///
/// # Example
///
/// ```no_run
/// use device_collector::buffer::{FlushTrigger, SampleBuffer};
/// use device_collector::reading::Reading;
///
/// let mut buffer = SampleBuffer::new(FlushTrigger::new(3, '+'), |batch| {
///     println!("flushing {}", batch.data);
/// });
///
/// for value in ["52.2,21.0", "17%", "52.3,21.0"] {
///     buffer.append(Reading::from(value));
/// }
///
/// // The fourth reading crosses the threshold: "52.2,21.0+17%+52.3,21.0+88%"
/// assert!(buffer.append(Reading::from("88%")));
/// assert!(buffer.is_empty());
/// ```
pub struct SampleBuffer {
    readings: Vec<Reading>,
    trigger: FlushTrigger,
    on_flush: FlushHandler,
    stats: BufferStats,
}

impl SampleBuffer {
    /// Create an empty buffer.
    ///
    /// # Arguments
    ///
    /// * `trigger` - Threshold check and delimiter applied after each append
    /// * `on_flush` - Called synchronously with every drained batch; it must
    ///   not block, so long-running work (like the POST) should be spawned
    pub fn new<F>(trigger: FlushTrigger, on_flush: F) -> Self
    where
        F: Fn(FlushBatch) + Send + Sync + 'static,
    {
        Self {
            readings: Vec::new(),
            trigger,
            on_flush: Box::new(on_flush),
            stats: BufferStats::default(),
        }
    }

    /// Append one reading, then run the threshold check.
    ///
    /// When the buffer now exceeds the threshold, its contents are drained,
    /// joined with the delimiter and handed to the flush handler before this
    /// call returns.
    ///
    /// # Returns
    ///
    /// `true` when this append caused a flush.
    pub fn append(&mut self, reading: Reading) -> bool {
        self.stats.readings_received += 1;
        self.readings.push(reading);

        match self.trigger.check(&mut self.readings) {
            Some(batch) => {
                self.stats.flushes += 1;
                self.stats.readings_flushed += batch.reading_count as u64;
                debug!(
                    batch_id = %batch.batch_id,
                    batch_size = batch.reading_count,
                    "Flushing buffer: threshold exceeded"
                );
                (self.on_flush)(batch);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Current contents in insertion order.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    pub fn trigger(&self) -> &FlushTrigger {
        &self.trigger
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("readings", &self.readings)
            .field("trigger", &self.trigger)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Handle to the buffer shared by both samplers.
///
/// Clones point at the same buffer. Every operation takes the lock for its
/// whole duration, so an append and its flush check are never interleaved
/// with another append.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    inner: Arc<Mutex<SampleBuffer>>,
}

impl SharedBuffer {
    pub fn new(buffer: SampleBuffer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffer)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SampleBuffer> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append under the lock; see [`SampleBuffer::append`].
    pub fn append(&self, reading: Reading) -> bool {
        self.lock().append(reading)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<Reading> {
        self.lock().readings().to_vec()
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Buffer whose flush handler records every batch.
    fn recording_buffer(threshold: usize) -> (SampleBuffer, Arc<Mutex<Vec<FlushBatch>>>) {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = flushed.clone();
        let buffer = SampleBuffer::new(FlushTrigger::new(threshold, '+'), move |batch| {
            sink.lock().unwrap().push(batch);
        });
        (buffer, flushed)
    }

    #[test]
    fn test_trigger_is_strictly_greater() {
        let trigger = FlushTrigger::new(3, '+');
        assert!(!trigger.should_flush(0));
        assert!(!trigger.should_flush(3));
        assert!(trigger.should_flush(4));
    }

    #[test]
    fn test_trigger_from_default_config() {
        let trigger = FlushTrigger::from_config(&SamplingConfig::default());
        assert_eq!(trigger, FlushTrigger::new(3, '+'));
        assert_eq!(trigger.threshold(), 3);
    }

    #[test]
    fn test_four_appends_flush_once_with_joined_payload() {
        let (mut buffer, flushed) = recording_buffer(3);

        assert!(!buffer.append(Reading::from("A")));
        assert!(!buffer.append(Reading::from("B")));
        assert!(!buffer.append(Reading::from("C")));
        assert_eq!(buffer.len(), 3);
        assert!(flushed.lock().unwrap().is_empty());

        assert!(buffer.append(Reading::from("D")));
        assert!(buffer.is_empty());

        let flushed = flushed.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].data, "A+B+C+D");
        assert_eq!(flushed[0].reading_count, 4);
    }

    #[test]
    fn test_next_append_starts_fresh_batch() {
        let (mut buffer, flushed) = recording_buffer(3);

        for value in ["1", "2", "3", "4", "5", "6", "7", "8"] {
            buffer.append(Reading::from(value));
        }

        let flushed = flushed.lock().unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].data, "1+2+3+4");
        assert_eq!(flushed[1].data, "5+6+7+8");
        assert_ne!(flushed[0].batch_id, flushed[1].batch_id);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flush_fires_once_per_crossing() {
        let (mut buffer, flushed) = recording_buffer(3);

        for i in 0..40 {
            buffer.append(Reading::new(i.to_string()));
            assert!(buffer.len() <= 3);
        }

        assert_eq!(flushed.lock().unwrap().len(), 10);
        assert_eq!(buffer.stats().flushes, 10);
        assert_eq!(buffer.stats().readings_received, 40);
        assert_eq!(buffer.stats().readings_flushed, 40);
    }

    #[test]
    fn test_mixed_readings_keep_insertion_order() {
        let (mut buffer, flushed) = recording_buffer(3);

        buffer.append(Reading::from("52.1,21.0"));
        buffer.append(Reading::from("17%"));
        buffer.append(Reading::location(None));
        buffer.append(Reading::from("52.2,21.1"));

        assert_eq!(flushed.lock().unwrap()[0].data, "52.1,21.0+17%++52.2,21.1");
    }

    #[test]
    fn test_payload_serialization() {
        let batch = FlushBatch::new(vec![Reading::from("A"), Reading::from("9%")], '+');
        let json = serde_json::to_string(&batch.payload()).unwrap();
        assert_eq!(json, r#"{"data":"A+9%"}"#);
    }

    #[test]
    fn test_batch_records_trigger_time() {
        let before = Utc::now();
        let (mut buffer, flushed) = recording_buffer(0);
        buffer.append(Reading::from("A"));
        let after = Utc::now();

        let flushed = flushed.lock().unwrap();
        let batch = &flushed[0];
        assert!(batch.created_at >= before && batch.created_at <= after);
        assert!(batch.age_ms() >= 0);
    }

    #[test]
    fn test_custom_delimiter() {
        let batch = FlushBatch::new(vec![Reading::from("x"), Reading::from("y")], '|');
        assert_eq!(batch.data, "x|y");
    }

    #[test]
    fn test_shared_buffer_snapshot_and_stats() {
        let (buffer, flushed) = recording_buffer(3);
        let shared = SharedBuffer::new(buffer);
        let other = shared.clone();

        shared.append(Reading::from("A"));
        other.append(Reading::from("B"));

        assert_eq!(shared.len(), 2);
        assert_eq!(
            shared.snapshot(),
            vec![Reading::from("A"), Reading::from("B")]
        );

        other.append(Reading::from("C"));
        assert!(other.append(Reading::from("D")));
        assert!(shared.is_empty());
        assert_eq!(shared.stats().flushes, 1);
        assert_eq!(flushed.lock().unwrap()[0].data, "A+B+C+D");
    }
}
