//! # wayfarer-settings
//!
//! Configuration for the Wayfarer player runtime.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PlayerSettings::default()`]
//! 2. **User file**: `~/.wayfarer/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WAYFARER_*` overrides (highest priority)
//!
//! Unlike a process-wide singleton, settings are plain values handed to the
//! components that need them.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
