//! # ponder-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. Compiled defaults ([`PonderSettings::default()`])
//! 2. The user file `~/.ponder/settings.json`, deep-merged over defaults
//! 3. `PONDER_*` environment variables (highest priority)
//!
//! The loaded value is validated before it is handed out; see
//! [`PonderSettings::validate`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, history_dir, load_settings_from_path, ponder_home, settings_path};
pub use types::*;
