//! Periodic samplers feeding the shared buffer.
//!
//! Each sampler runs on its own tokio interval. A tick produces exactly one
//! reading and appends it synchronously, so the flush check happens inside
//! the tick that crossed the threshold.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::battery::BatterySimulator;
use crate::buffer::SharedBuffer;
use crate::location::{refresh_location, LocationProvider, LocationState};
use crate::reading::Reading;

/// One cadence of the pipeline.
pub trait Sampler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Produce and append one reading.
    fn tick(&self);
}

/// Run `sampler` every `period` until the returned task is aborted.
///
/// The first tick happens one full period after the call.
pub fn spawn_periodic<S: Sampler>(sampler: S, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        let mut ticks: u64 = 0;
        loop {
            ticker.tick().await;
            ticks += 1;
            debug!(sampler = sampler.name(), tick = ticks, "Sampler iteration");
            sampler.tick();
        }
    })
}

/// Appends the cached location, then asks for a fresh one.
///
/// The reading appended at tick N is the location known before tick N's own
/// fetch was issued.
pub struct LocationSampler {
    provider: Arc<dyn LocationProvider>,
    location: LocationState,
    buffer: SharedBuffer,
}

impl LocationSampler {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        location: LocationState,
        buffer: SharedBuffer,
    ) -> Self {
        Self {
            provider,
            location,
            buffer,
        }
    }

    /// One tick. Returns the handle of the fetch it started.
    pub fn sample(&self) -> JoinHandle<()> {
        let cached = self.location.get();

        let provider = Arc::clone(&self.provider);
        let state = self.location.clone();
        let fetch = tokio::spawn(async move {
            refresh_location(provider.as_ref(), &state).await;
        });

        self.buffer.append(Reading::location(cached.as_ref()));
        fetch
    }
}

impl Sampler for LocationSampler {
    fn name(&self) -> &'static str {
        "location"
    }

    fn tick(&self) {
        // Fetches outlive the tick and are never joined
        drop(self.sample());
    }
}

/// Appends a simulated battery level.
pub struct BatterySampler {
    battery: BatterySimulator,
    buffer: SharedBuffer,
}

impl BatterySampler {
    pub fn new(battery: BatterySimulator, buffer: SharedBuffer) -> Self {
        Self { battery, buffer }
    }

    /// One tick. Returns the reading that was appended.
    pub fn sample(&self) -> Reading {
        let reading = self.battery.sample();
        self.buffer.append(reading.clone());
        reading
    }
}

impl Sampler for BatterySampler {
    fn name(&self) -> &'static str {
        "battery"
    }

    fn tick(&self) {
        self.sample();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{FlushBatch, FlushTrigger, SampleBuffer};
    use crate::location::test_support::ScriptedProvider;
    use crate::location::{Location, LocationError, PermissionStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Buffer that never flushes on its own within a test.
    fn quiet_buffer() -> SharedBuffer {
        SharedBuffer::new(SampleBuffer::new(FlushTrigger::new(usize::MAX, '+'), |_| {}))
    }

    fn recording_buffer(threshold: usize) -> (SharedBuffer, Arc<Mutex<Vec<FlushBatch>>>) {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = flushed.clone();
        let buffer = SampleBuffer::new(FlushTrigger::new(threshold, '+'), move |batch| {
            sink.lock().unwrap().push(batch);
        });
        (SharedBuffer::new(buffer), flushed)
    }

    struct CountingSampler {
        ticks: Arc<AtomicUsize>,
    }

    impl Sampler for CountingSampler {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_location_ticks_lag_by_one_fetch() {
        let provider = Arc::new(ScriptedProvider::counting(PermissionStatus::Granted, 5));
        let location = LocationState::new();
        location.set(Location::new(0.0, 0.0));
        let buffer = quiet_buffer();
        let sampler = LocationSampler::new(provider.clone(), location.clone(), buffer.clone());

        for _ in 0..5 {
            sampler.sample().await.unwrap();
        }

        let readings: Vec<String> = buffer
            .snapshot()
            .into_iter()
            .map(Reading::into_inner)
            .collect();
        assert_eq!(readings, vec!["0,0", "1,1", "2,2", "3,3", "4,4"]);
        assert_eq!(location.get(), Some(Location::new(5.0, 5.0)));
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_location_tick_appends_before_fetch_resolves() {
        let provider = Arc::new(
            ScriptedProvider::counting(PermissionStatus::Granted, 1)
                .with_delay(Duration::from_millis(20)),
        );
        let location = LocationState::new();
        let buffer = quiet_buffer();
        let sampler = LocationSampler::new(provider, location.clone(), buffer.clone());

        let fetch = sampler.sample();
        assert_eq!(buffer.snapshot(), vec![Reading::location(None)]);
        assert!(location.get().is_none());

        fetch.await.unwrap();
        assert_eq!(location.get(), Some(Location::new(1.0, 1.0)));
    }

    #[tokio::test]
    async fn test_location_fetch_failure_keeps_stale_value() {
        let provider = Arc::new(ScriptedProvider::new(
            PermissionStatus::Granted,
            vec![
                Ok(Location::new(1.0, 2.0)),
                Err(LocationError::Unavailable("lost fix".into())),
                Ok(Location::new(3.0, 4.0)),
            ],
        ));
        let location = LocationState::new();
        let buffer = quiet_buffer();
        let sampler = LocationSampler::new(provider, location, buffer.clone());

        for _ in 0..4 {
            sampler.sample().await.unwrap();
        }

        let readings: Vec<String> = buffer
            .snapshot()
            .into_iter()
            .map(Reading::into_inner)
            .collect();
        assert_eq!(readings, vec!["", "1,2", "1,2", "3,4"]);
    }

    #[tokio::test]
    async fn test_location_sampler_triggers_flush() {
        let provider = Arc::new(ScriptedProvider::counting(PermissionStatus::Granted, 4));
        let (buffer, flushed) = recording_buffer(3);
        let sampler = LocationSampler::new(provider, LocationState::new(), buffer.clone());

        for _ in 0..4 {
            sampler.sample().await.unwrap();
        }

        assert!(buffer.is_empty());
        let flushed = flushed.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].data, "+1,1+2,2+3,3");
    }

    #[tokio::test]
    async fn test_battery_sampler_appends_percent() {
        let buffer = quiet_buffer();
        let sampler = BatterySampler::new(BatterySimulator::new(), buffer.clone());

        let reading = sampler.sample();
        assert!(reading.as_str().ends_with('%'));
        assert_eq!(buffer.snapshot(), vec![reading]);
    }

    #[tokio::test]
    async fn test_samplers_share_one_buffer() {
        let provider = Arc::new(ScriptedProvider::counting(PermissionStatus::Granted, 2));
        let (buffer, flushed) = recording_buffer(3);
        let location = LocationSampler::new(provider, LocationState::new(), buffer.clone());
        let battery = BatterySampler::new(BatterySimulator::new(), buffer.clone());

        location.sample().await.unwrap();
        let first = battery.sample();
        location.sample().await.unwrap();
        assert!(flushed.lock().unwrap().is_empty());
        let last = battery.sample();

        let flushed = flushed.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].data, format!("+{}+1,1+{}", first, last));
    }

    #[tokio::test]
    async fn test_spawn_periodic_skips_immediate_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(
            CountingSampler {
                ticks: ticks.clone(),
            },
            Duration::from_millis(50),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let observed = ticks.load(Ordering::SeqCst);
        assert!((1..=3).contains(&observed), "observed {} ticks", observed);

        handle.abort();
    }

    #[tokio::test]
    async fn test_aborted_periodic_stops_ticking() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(
            CountingSampler {
                ticks: ticks.clone(),
            },
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.abort();
        let _ = handle.await;
        let at_abort = ticks.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_abort);
    }
}
