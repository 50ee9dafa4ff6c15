//! Cartridge identity and player position.

use chrono::{DateTime, Utc};

/// Identity of the loaded cartridge, recorded at session init.
///
/// The creation timestamp identifies a cartridge build; save files carry it so
/// a restore can reject saves made for another cartridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartridgeInfo {
    /// Display name.
    pub name: String,
    /// Build creation time.
    pub created: DateTime<Utc>,
}

impl CartridgeInfo {
    /// Create cartridge info.
    #[must_use]
    pub fn new(name: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created,
        }
    }
}

/// A 3D position fix.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
}

impl Position {
    /// Create a position fix.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, altitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            accuracy,
        }
    }
}
