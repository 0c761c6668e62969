//! Reading type shared by both samplers.
//!
//! Once produced, a reading is an opaque string: the buffer does not know
//! whether it came from the location or the battery cadence.

use serde::{Deserialize, Serialize};

use crate::location::Location;

/// A single formatted sample, either `"lat,lon"` or `"NN%"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading(String);

impl Reading {
    /// Wrap an already formatted value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Format the last-known location.
    ///
    /// An unknown location yields an empty reading so that every tick still
    /// contributes exactly one entry to the buffer.
    pub fn location(location: Option<&Location>) -> Self {
        match location {
            Some(location) => Self(location.to_string()),
            None => Self(String::new()),
        }
    }

    /// Format a battery level as `"<n>%"`.
    pub fn battery(percent: u8) -> Self {
        Self(format!("{}%", percent))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Reading {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Reading {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_reading_format() {
        let location = Location::new(52.5, 21.25);
        let reading = Reading::location(Some(&location));
        assert_eq!(reading.as_str(), "52.5,21.25");
    }

    #[test]
    fn test_unknown_location_is_empty() {
        let reading = Reading::location(None);
        assert!(reading.is_empty());
        assert_eq!(reading.to_string(), "");
    }

    #[test]
    fn test_battery_reading_format() {
        assert_eq!(Reading::battery(0).as_str(), "0%");
        assert_eq!(Reading::battery(7).as_str(), "7%");
        assert_eq!(Reading::battery(99).as_str(), "99%");
    }

    #[test]
    fn test_reading_serializes_as_plain_string() {
        let json = serde_json::to_string(&Reading::from("42%")).unwrap();
        assert_eq!(json, r#""42%""#);
    }
}
