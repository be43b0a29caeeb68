//! Host for 8bf filter plugins.
//!
//! Loads a plugin module, assembles the `FilterRecord` with its callback
//! suites and drives the plugin through its phases over a pixel surface.

/// Error types used by the host.
pub mod error;

/// Filter record assembler and the filter run itself.
pub mod filter;

/// Native memory handed to plugins.
pub mod memory;

/// Saved filter settings for repeat-effect runs.
pub mod parameters;

/// Plugin discovery metadata.
pub mod plugin_data;

/// Dynamic loading of plugin modules and their entry points.
pub mod plugin_loader;

/// Callback suites exposed to plugins.
pub mod suites;

/// Owned pixel buffers.
pub mod surface;

pub use error::HostError;
pub use filter::{AbortSignal, FilterOutcome, FilterRequest, HostCallbacks, HostConfig, run_filter, show_about};
pub use parameters::FilterSettings;
pub use plugin_data::PluginData;
pub use plugin_loader::PluginModule;
pub use surface::{ImageMode, Surface};
