//! Configuration module for the Device Collector service.
//!
//! Deployment settings (flush endpoint, simulated device behaviour) come from
//! environment variables. The sampling pipeline itself runs on fixed
//! constants exposed through [`SamplingConfig`].

use std::env;
use std::time::Duration;

use crate::location::{Location, PermissionStatus};

/// Default destination for flushed batches
const DEFAULT_ENDPOINT_URL: &str = "https://kovalsky.pl";

/// Number of buffered readings that must be exceeded before a flush
pub const FLUSH_THRESHOLD: usize = 3;

/// Separator placed between readings in a flushed payload
pub const READING_DELIMITER: char = '+';

/// Period of the location sampler
pub const LOCATION_CADENCE: Duration = Duration::from_secs(1);

/// Period of the battery sampler
pub const BATTERY_CADENCE: Duration = Duration::from_secs(2);

/// Default origin of the simulated device (Warsaw)
const DEFAULT_ORIGIN_LAT: f64 = 52.2297;
const DEFAULT_ORIGIN_LON: f64 = 21.0122;

/// Default latency of a simulated location fix
const DEFAULT_LOCATION_LATENCY_MS: u64 = 200;

/// Upper bound on simulated latency so a fix always lands within a few ticks
const MAX_LOCATION_LATENCY_MS: u64 = 10_000;

/// Fixed parameters of the sampling, buffering and flush pipeline.
///
/// There is no environment override for these; `Default` carries the
/// production constants.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Flush fires once the buffer holds strictly more than this many readings
    pub flush_threshold: usize,

    /// Separator used when joining a batch into its payload
    pub delimiter: char,

    /// Period between location samples
    pub location_cadence: Duration,

    /// Period between battery samples
    pub battery_cadence: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            flush_threshold: FLUSH_THRESHOLD,
            delimiter: READING_DELIMITER,
            location_cadence: LOCATION_CADENCE,
            battery_cadence: BATTERY_CADENCE,
        }
    }
}

/// Configuration for the Device Collector service.
///
/// Settings read from the environment:
/// - `DEVICE_COLLECTOR_ENDPOINT_URL`: flush destination (default: https://kovalsky.pl)
/// - `DEVICE_COLLECTOR_AUTOSTART`: start sampling at boot (default: false)
/// - `DEVICE_COLLECTOR_LOCATION_PERMISSION`: simulated answer, `granted` or `denied`
/// - `DEVICE_COLLECTOR_ORIGIN_LAT` / `DEVICE_COLLECTOR_ORIGIN_LON`: simulated origin
/// - `DEVICE_COLLECTOR_LOCATION_LATENCY_MS`: simulated fix latency (default: 200)
/// - `DEVICE_COLLECTOR_LOCATION_FAILURE_RATE`: probability a fix fails (default: 0.0)
#[derive(Debug, Clone)]
pub struct Config {
    /// URL every batch is POSTed to
    pub endpoint_url: String,

    /// Whether the binary starts sampling without waiting for a command
    pub autostart: bool,

    /// Permission answer given by the simulated device
    pub location_permission: PermissionStatus,

    /// Starting point of the simulated device
    pub origin: Location,

    /// Time the simulated device takes to produce a fix
    pub location_latency: Duration,

    /// Probability in `[0, 1]` that a simulated fix fails
    pub location_failure_rate: f64,

    /// Fixed pipeline constants
    pub sampling: SamplingConfig,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn invalid(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but malformed or out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use device_collector::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Endpoint: {}", config.endpoint_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint_url = Self::parse_endpoint(&lookup)?;

        let autostart = match lookup("DEVICE_COLLECTOR_AUTOSTART") {
            Some(value) => parse_bool("DEVICE_COLLECTOR_AUTOSTART", &value)?,
            None => false,
        };

        let location_permission = Self::parse_permission(&lookup)?;

        let latitude = parse_ranged(
            &lookup,
            "DEVICE_COLLECTOR_ORIGIN_LAT",
            DEFAULT_ORIGIN_LAT,
            -90.0,
            90.0,
        )?;
        let longitude = parse_ranged(
            &lookup,
            "DEVICE_COLLECTOR_ORIGIN_LON",
            DEFAULT_ORIGIN_LON,
            -180.0,
            180.0,
        )?;

        let location_latency = Self::parse_latency(&lookup)?;

        let location_failure_rate = parse_ranged(
            &lookup,
            "DEVICE_COLLECTOR_LOCATION_FAILURE_RATE",
            0.0,
            0.0,
            1.0,
        )?;

        Ok(Self {
            endpoint_url,
            autostart,
            location_permission,
            origin: Location::new(latitude, longitude),
            location_latency,
            location_failure_rate,
            sampling: SamplingConfig::default(),
        })
    }

    fn parse_endpoint<F>(lookup: &F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = "DEVICE_COLLECTOR_ENDPOINT_URL";

        let Some(value) = lookup(env_var) else {
            return Ok(DEFAULT_ENDPOINT_URL.to_string());
        };

        let value = value.trim().to_string();
        if !(value.starts_with("http://") || value.starts_with("https://")) {
            return Err(ConfigError::invalid(
                env_var,
                format!("'{}' must start with http:// or https://", value),
            ));
        }

        Ok(value)
    }

    fn parse_permission<F>(lookup: &F) -> Result<PermissionStatus, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = "DEVICE_COLLECTOR_LOCATION_PERMISSION";

        match lookup(env_var).as_deref().map(str::trim) {
            None => Ok(PermissionStatus::Granted),
            Some(v) if v.eq_ignore_ascii_case("granted") => Ok(PermissionStatus::Granted),
            Some(v) if v.eq_ignore_ascii_case("denied") => Ok(PermissionStatus::Denied),
            Some(v) => Err(ConfigError::invalid(
                env_var,
                format!("'{}' is not one of: granted, denied", v),
            )),
        }
    }

    fn parse_latency<F>(lookup: &F) -> Result<Duration, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = "DEVICE_COLLECTOR_LOCATION_LATENCY_MS";

        let millis = match lookup(env_var) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::invalid(env_var, format!("'{}' is not a valid number", value)))?,
            None => DEFAULT_LOCATION_LATENCY_MS,
        };

        if millis > MAX_LOCATION_LATENCY_MS {
            return Err(ConfigError::invalid(
                env_var,
                format!(
                    "latency {}ms exceeds maximum ({}ms)",
                    millis, MAX_LOCATION_LATENCY_MS
                ),
            ));
        }

        Ok(Duration::from_millis(millis))
    }
}

fn parse_bool(env_var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(
            env_var,
            format!("'{}' is not a valid boolean", other),
        )),
    }
}

fn parse_ranged<F>(
    lookup: &F,
    env_var: &str,
    default: f64,
    min: f64,
    max: f64,
) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(env_var) else {
        return Ok(default);
    };

    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(env_var, format!("'{}' is not a valid number", value)))?;

    if !(min..=max).contains(&parsed) {
        return Err(ConfigError::invalid(
            env_var,
            format!("{} is outside the allowed range [{}, {}]", parsed, min, max),
        ));
    }

    Ok(parsed)
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            autostart: false,
            location_permission: PermissionStatus::Granted,
            origin: Location::new(DEFAULT_ORIGIN_LAT, DEFAULT_ORIGIN_LON),
            location_latency: Duration::from_millis(DEFAULT_LOCATION_LATENCY_MS),
            location_failure_rate: 0.0,
            sampling: SamplingConfig::default(),
        }
    }
}
