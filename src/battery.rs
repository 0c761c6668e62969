//! Simulated battery gauge.
//!
//! There is no real fuel gauge behind the battery cadence: each sample is a
//! uniformly random level, which is enough to exercise the pipeline.

use rand::Rng;

use crate::reading::Reading;

/// Exclusive upper bound of a simulated battery level.
pub const BATTERY_LEVEL_BOUND: u8 = 100;

/// Produces simulated battery levels.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatterySimulator;

impl BatterySimulator {
    pub fn new() -> Self {
        Self
    }

    /// Draw a level uniformly from `[0, 100)`.
    pub fn sample_percent(&self) -> u8 {
        rand::thread_rng().gen_range(0..BATTERY_LEVEL_BOUND)
    }

    /// Draw a level and format it as a reading.
    pub fn sample(&self) -> Reading {
        Reading::battery(self.sample_percent())
    }
}
