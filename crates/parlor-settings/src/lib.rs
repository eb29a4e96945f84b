//! # parlor-settings
//!
//! Configuration for the Parlor scheduling engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParlorSettings::default()`]
//! 2. **User file**: `~/.parlor/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PARLOR_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<ParlorSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loads on first call; falls back to compiled defaults if the file is unreadable.
pub fn get_settings() -> &'static ParlorSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            ParlorSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Hands the value back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ParlorSettings) -> std::result::Result<(), ParlorSettings> {
    SETTINGS.set(settings)
}
