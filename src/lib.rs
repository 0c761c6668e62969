//! Device Collector Library
//!
//! Samples device location and a simulated battery level on fixed cadences,
//! buffers the formatted readings and flushes them to a remote endpoint:
//!
//! - **config**: Environment-based deployment settings and the fixed sampling constants
//! - **reading**: The opaque string sample shared by both cadences
//! - **location**: Location provider seam, last-known location, simulated device
//! - **battery**: Simulated battery gauge
//! - **buffer**: Append-only buffer whose appends run the flush threshold check
//! - **client**: JSON POST transport and the flusher that drives it
//! - **sampler**: Periodic location and battery samplers
//! - **controller**: Permission acquisition and start/stop lifecycle
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use device_collector::client::{Flusher, HttpTransport};
//! use device_collector::config::Config;
//! use device_collector::controller::Controller;
//! use device_collector::location::SimulatedLocationProvider;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let transport = Arc::new(HttpTransport::new().expect("Failed to create client"));
//!     let flusher = Arc::new(Flusher::from_config(transport, &config));
//!     let provider = Arc::new(SimulatedLocationProvider::new(&config));
//!
//!     let mut controller = Controller::launch(config.sampling.clone(), provider, flusher).await;
//!     controller.start();
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     controller.stop();
//! }
//! ```

pub mod battery;
pub mod buffer;
pub mod client;
pub mod config;
pub mod controller;
pub mod location;
pub mod reading;
pub mod sampler;

// Re-export commonly used types at crate root for convenience
pub use battery::BatterySimulator;
pub use buffer::{BufferStats, FlushBatch, FlushPayload, FlushTrigger, SampleBuffer, SharedBuffer};
pub use client::{ClientError, FlushStats, Flusher, HttpTransport, Transport};
pub use config::{Config, ConfigError, SamplingConfig};
pub use controller::{Controller, PermissionState, RunState, PERMISSION_DENIED_MESSAGE};
pub use location::{
    Location, LocationError, LocationProvider, LocationState, PermissionStatus,
    SimulatedLocationProvider,
};
pub use reading::Reading;
pub use sampler::{spawn_periodic, BatterySampler, LocationSampler, Sampler};
