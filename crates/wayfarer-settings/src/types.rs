//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may contain any subset of fields; missing ones keep their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "device": { "name": "Trail Phone" },
///   "scheduler": { "yieldDelayMs": 20 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerSettings {
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Script executor tuning.
    pub scheduler: SchedulerSettings,
    /// Identity written into save files.
    pub device: DeviceSettings,
    /// Session behaviour.
    pub session: SessionSettings,
}

impl PlayerSettings {
    /// Check cross-field ranges after loading.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.yield_delay_ms > SchedulerSettings::MAX_YIELD_DELAY_MS {
            return Err(SettingsError::InvalidValue(format!(
                "scheduler.yieldDelayMs must be at most {}, got {}",
                SchedulerSettings::MAX_YIELD_DELAY_MS,
                self.scheduler.yield_delay_ms
            )));
        }
        if self.session.max_script_failures == 0 {
            return Err(SettingsError::InvalidValue(
                "session.maxScriptFailures must be at least 1".to_string(),
            ));
        }
        if self.session.location_tag.is_empty() {
            return Err(SettingsError::InvalidValue(
                "session.locationTag must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Script executor tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Pause between consecutive jobs of a backlog.
    pub yield_delay_ms: u64,
    /// Keep draining after a job completes instead of sleeping until the next wake.
    pub continue_on_completion: bool,
    /// Name given to the worker thread.
    pub worker_thread_name: String,
}

impl SchedulerSettings {
    /// Upper bound accepted for `yield_delay_ms`.
    pub const MAX_YIELD_DELAY_MS: u64 = 10_000;

    /// Yield delay as a [`Duration`].
    #[must_use]
    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_delay_ms)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            yield_delay_ms: 50,
            continue_on_completion: true,
            worker_thread_name: "wayfarer-script".to_string(),
        }
    }
}

/// Device identity recorded in save headers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    /// Human-readable device name.
    pub name: String,
    /// Stable device identifier.
    pub id: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: "Wayfarer".to_string(),
            id: "wayfarer-device".to_string(),
        }
    }
}

/// Session behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Registry index of the cartridge object that receives lifecycle hooks.
    pub cartridge_object_index: usize,
    /// Player name used in save headers when the player object has no `Name`.
    pub player_name: String,
    /// Script faults tolerated before the session is marked crashed.
    pub max_script_failures: u32,
    /// Tag used to de-duplicate location updates.
    pub location_tag: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cartridge_object_index: 0,
            player_name: "Player".to_string(),
            max_script_failures: 1,
            location_tag: "location".to_string(),
        }
    }
}
