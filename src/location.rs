//! Location provider seam and the shared last-known location.
//!
//! The device geolocation service sits behind [`LocationProvider`]. The
//! binary uses [`SimulatedLocationProvider`], which random-walks around a
//! configured origin.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

/// Maximum per-fix drift of the simulated position, in degrees.
const SIMULATED_JITTER_DEG: f64 = 0.0005;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// Answer to a location permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
        }
    }
}

/// Errors a location fetch can report.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationError {
    /// The user never granted location access
    PermissionDenied,

    /// The device could not produce a fix
    Unavailable(String),
}

impl std::fmt::Display for LocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationError::PermissionDenied => write!(f, "Location permission denied"),
            LocationError::Unavailable(reason) => write!(f, "Location unavailable: {}", reason),
        }
    }
}

impl std::error::Error for LocationError {}

/// Boxed future returned by provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Device location service.
///
/// Both calls may suspend while the underlying service works.
pub trait LocationProvider: Send + Sync {
    fn request_permission(&self) -> ProviderFuture<'_, PermissionStatus>;

    fn current_location(&self) -> ProviderFuture<'_, Result<Location, LocationError>>;
}

/// Last-known location shared between the controller, the location sampler
/// and in-flight fetches.
#[derive(Debug, Clone, Default)]
pub struct LocationState {
    inner: Arc<Mutex<Option<Location>>>,
}

impl LocationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Location> {
        match self.inner.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, location: Location) {
        match self.inner.lock() {
            Ok(mut guard) => *guard = Some(location),
            Err(poisoned) => *poisoned.into_inner() = Some(location),
        }
    }
}

/// Fetch one fix and store it.
///
/// Failures are swallowed: the previous value stays in place.
pub async fn refresh_location(provider: &dyn LocationProvider, state: &LocationState) {
    match provider.current_location().await {
        Ok(location) => {
            debug!(%location, "Location updated");
            state.set(location);
        }
        Err(e) => {
            debug!(error = %e, "Location fetch failed, keeping previous value");
        }
    }
}

/// Stand-in for a device geolocation service.
pub struct SimulatedLocationProvider {
    permission: PermissionStatus,
    position: Mutex<Location>,
    latency: Duration,
    failure_rate: f64,
}

impl SimulatedLocationProvider {
    /// Build a provider from the simulated-device section of the config.
    pub fn new(config: &Config) -> Self {
        Self::with_settings(
            config.location_permission,
            config.origin,
            config.location_latency,
            config.location_failure_rate,
        )
    }

    /// Build a provider from explicit settings.
    ///
    /// `failure_rate` is clamped to `[0, 1]`; NaN means fixes never fail.
    pub fn with_settings(
        permission: PermissionStatus,
        origin: Location,
        latency: Duration,
        failure_rate: f64,
    ) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };

        Self {
            permission,
            position: Mutex::new(origin),
            latency,
            failure_rate,
        }
    }

    fn next_fix(&self) -> Result<Location, LocationError> {
        let mut rng = rand::thread_rng();

        if rng.gen_bool(self.failure_rate) {
            return Err(LocationError::Unavailable("no satellite fix".to_string()));
        }

        let mut position = match self.position.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        position.latitude = (position.latitude
            + rng.gen_range(-SIMULATED_JITTER_DEG..=SIMULATED_JITTER_DEG))
        .clamp(-90.0, 90.0);
        position.longitude = (position.longitude
            + rng.gen_range(-SIMULATED_JITTER_DEG..=SIMULATED_JITTER_DEG))
        .clamp(-180.0, 180.0);

        Ok(*position)
    }
}

impl LocationProvider for SimulatedLocationProvider {
    fn request_permission(&self) -> ProviderFuture<'_, PermissionStatus> {
        let permission = self.permission;
        Box::pin(async move { permission })
    }

    fn current_location(&self) -> ProviderFuture<'_, Result<Location, LocationError>> {
        Box::pin(async move {
            tokio::time::sleep(self.latency).await;

            if self.permission == PermissionStatus::Denied {
                return Err(LocationError::PermissionDenied);
            }

            self.next_fix()
        })
    }
}
