//! Controller owning permission acquisition and the sampling lifecycle.
//!
//! All pipeline state (buffer, last-known location, sampler tasks) is created
//! here and only changes through the controller's methods and the tasks it
//! spawns.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::battery::BatterySimulator;
use crate::buffer::{FlushTrigger, SampleBuffer, SharedBuffer};
use crate::client::{FlushStats, Flusher};
use crate::config::SamplingConfig;
use crate::location::{refresh_location, Location, LocationProvider, LocationState, PermissionStatus};
use crate::sampler::{spawn_periodic, BatterySampler, LocationSampler};

/// Text surfaced to the user once location access was refused.
pub const PERMISSION_DENIED_MESSAGE: &str = "Permissions were denied";

/// Location permission lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    NotRequested,
    Requesting,
    Granted,
    Denied,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::NotRequested => write!(f, "not requested"),
            PermissionState::Requesting => write!(f, "requesting"),
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
        }
    }
}

/// Whether the sampler tasks are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Stopped => write!(f, "stopped"),
            RunState::Running => write!(f, "running"),
        }
    }
}

struct SamplerTasks {
    location: JoinHandle<()>,
    battery: JoinHandle<()>,
}

impl SamplerTasks {
    fn abort(&self) {
        self.location.abort();
        self.battery.abort();
    }

    fn active(&self) -> usize {
        [&self.location, &self.battery]
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

/// Drives the location and battery samplers.
///
/// The controller owns the shared buffer, the last-known location and the
/// two periodic sampler tasks. Permission is requested once; sampling is
/// started and stopped on demand, and both transitions are idempotent.
///
/// Methods that spawn work (`acquire_permission`, `start`, and the flushes
/// triggered by appends) must run inside a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use device_collector::client::{Flusher, HttpTransport};
/// use device_collector::config::{Config, SamplingConfig};
/// use device_collector::controller::Controller;
/// use device_collector::location::SimulatedLocationProvider;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let config = Config::default();
///     let transport = Arc::new(HttpTransport::new().expect("Failed to create client"));
///     let flusher = Arc::new(Flusher::from_config(transport, &config));
///     let provider = Arc::new(SimulatedLocationProvider::new(&config));
///
///     let mut controller = Controller::launch(SamplingConfig::default(), provider, flusher).await;
///     if let Some(message) = controller.status_message() {
///         println!("{}", message);
///     }
///
///     controller.start();
///     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
///     controller.stop();
/// }
/// ```
pub struct Controller {
    sampling: SamplingConfig,
    provider: Arc<dyn LocationProvider>,
    location: LocationState,
    buffer: SharedBuffer,
    flusher: Arc<Flusher>,
    permission: PermissionState,
    seed_fetch: Option<JoinHandle<()>>,
    samplers: Option<SamplerTasks>,
}

impl Controller {
    /// Create the controller with all state empty and permission not yet requested.
    ///
    /// # Arguments
    ///
    /// * `sampling` - Cadences, flush threshold and delimiter
    /// * `provider` - Source of permission answers and location fixes
    /// * `flusher` - Receives every batch the buffer drains
    pub fn new(
        sampling: SamplingConfig,
        provider: Arc<dyn LocationProvider>,
        flusher: Arc<Flusher>,
    ) -> Self {
        let flush_target = Arc::clone(&flusher);
        let buffer = SampleBuffer::new(FlushTrigger::from_config(&sampling), move |batch| {
            flush_target.dispatch(batch);
        });

        Self {
            sampling,
            provider,
            location: LocationState::new(),
            buffer: SharedBuffer::new(buffer),
            flusher,
            permission: PermissionState::NotRequested,
            seed_fetch: None,
            samplers: None,
        }
    }

    /// Create the controller and immediately acquire location permission.
    ///
    /// Returns once the permission prompt is answered. The seeding location
    /// fetch that follows a grant runs in the background, so a device that
    /// is slow to produce a fix does not hold up the caller.
    pub async fn launch(
        sampling: SamplingConfig,
        provider: Arc<dyn LocationProvider>,
        flusher: Arc<Flusher>,
    ) -> Self {
        let mut controller = Self::new(sampling, provider, flusher);
        controller.acquire_permission().await;
        controller
    }

    /// Ask for location permission once.
    ///
    /// A grant spawns one fetch that seeds the last-known location; this
    /// method does not wait for it. Later calls return the settled state
    /// without asking again.
    ///
    /// # Returns
    ///
    /// `Granted` or `Denied` once the provider has answered.
    pub async fn acquire_permission(&mut self) -> PermissionState {
        if self.permission != PermissionState::NotRequested {
            info!(permission = %self.permission, "Permission already requested");
            return self.permission;
        }

        info!("Requesting location permission");
        self.permission = PermissionState::Requesting;

        let status = self.provider.request_permission().await;
        info!(status = %status, "Location permission answered");

        match status {
            PermissionStatus::Granted => {
                self.permission = PermissionState::Granted;
                let provider = Arc::clone(&self.provider);
                let location = self.location.clone();
                self.seed_fetch = Some(tokio::spawn(async move {
                    refresh_location(provider.as_ref(), &location).await;
                }));
            }
            PermissionStatus::Denied => {
                self.permission = PermissionState::Denied;
                warn!("Location permission denied, location readings will stay empty");
            }
        }

        self.permission
    }

    /// Spawn both samplers.
    ///
    /// The location sampler ticks every `location_cadence` and the battery
    /// sampler every `battery_cadence`, each starting one period from now.
    /// Starting is not gated on permission: without a grant, location ticks
    /// append empty readings.
    ///
    /// # Returns
    ///
    /// `true` if the samplers were spawned, `false` if they were already
    /// running (no second pair of timers is created).
    pub fn start(&mut self) -> bool {
        if self.samplers.is_some() {
            info!("Already running");
            return false;
        }

        info!(
            location_cadence_ms = self.sampling.location_cadence.as_millis() as u64,
            battery_cadence_ms = self.sampling.battery_cadence.as_millis() as u64,
            flush_threshold = self.sampling.flush_threshold,
            "Starting samplers"
        );

        let location = LocationSampler::new(
            Arc::clone(&self.provider),
            self.location.clone(),
            self.buffer.clone(),
        );
        let battery = BatterySampler::new(BatterySimulator::new(), self.buffer.clone());

        self.samplers = Some(SamplerTasks {
            location: spawn_periodic(location, self.sampling.location_cadence),
            battery: spawn_periodic(battery, self.sampling.battery_cadence),
        });
        true
    }

    /// Cancel future sampler ticks. Returns `false` if nothing was running.
    ///
    /// Fetches and POSTs already dispatched still complete, and readings
    /// left in the buffer stay there until the next start.
    pub fn stop(&mut self) -> bool {
        match self.samplers.take() {
            Some(tasks) => {
                tasks.abort();
                info!(buffered = self.buffer.len(), "Stopped samplers");
                true
            }
            None => {
                info!("Nothing to stop");
                false
            }
        }
    }

    /// Handle of the seeding fetch spawned by a grant, if not taken yet.
    ///
    /// Awaiting it waits until the first location fix has landed (or failed).
    pub fn take_seed_fetch(&mut self) -> Option<JoinHandle<()>> {
        self.seed_fetch.take()
    }

    pub fn run_state(&self) -> RunState {
        if self.samplers.is_some() {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// Number of sampler tasks still alive.
    pub fn active_samplers(&self) -> usize {
        self.samplers.as_ref().map_or(0, SamplerTasks::active)
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    /// User-facing notice, present only after a denial.
    pub fn status_message(&self) -> Option<&'static str> {
        match self.permission {
            PermissionState::Denied => Some(PERMISSION_DENIED_MESSAGE),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<Location> {
        self.location.get()
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn flush_stats(&self) -> FlushStats {
        self.flusher.stats()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(tasks) = self.samplers.take() {
            tasks.abort();
        }
    }
}
