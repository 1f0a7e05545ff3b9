//! # conclave-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ConclaveSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `CONCLAVE_*` overrides (highest priority)
//!
//! No global instance is kept; the composition root loads settings once and
//! passes them down.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings_from_path, load_with};
pub use types::{ConclaveSettings, LoggingSettings, ProviderSettings, RuntimeSettings};
