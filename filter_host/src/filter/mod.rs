//! Filter record assembler: runs one plugin filter over one image.
//!
//! A run happens on its own worker thread. The calling thread blocks until
//! the filter finishes; the only things that cross threads while it runs are
//! the host callbacks (progress, preview, colour picker) and the abort flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use pi_sdk::four_cc;
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::parameters::FilterSettings;
use crate::plugin_data::PluginData;
use crate::plugin_loader::PluginModule;
use crate::suites::color_services::ColorPicker;
use crate::suites::property::DocumentProperties;
use crate::surface::{ImageMode, Surface};

mod buffers;
mod callbacks;
mod filter_case;
mod post;
mod session;

pub use filter_case::{CaseLayout, select_filter_case};

/// Progress callback, `(done, total)`.
pub type ProgressCallback = Arc<dyn Fn(i32, i32) + Send + Sync>;

/// Preview callback: the rendered pixels and the destination row/column.
pub type DisplayCallback = Arc<dyn Fn(&Surface, i32, i32) + Send + Sync>;

/// Host tunables, usually read from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Bytes the plugin is told it may use.
    pub max_space: i64,
    /// Four character host signature.
    pub host_signature: String,
    /// Tile edge the plugin is told the host prefers.
    pub tile_size: u16,
    pub serial_number: i32,
    pub host_name: String,
    /// Overrides the source image resolution when set.
    pub resolution: Option<f64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_space: 1 << 30,
            host_signature: "8BIM".to_string(),
            tile_size: 256,
            serial_number: 0,
            host_name: "filter_host".to_string(),
            resolution: None,
        }
    }
}

impl HostConfig {
    pub fn from_toml(text: &str) -> Result<Self, HostError> {
        Ok(toml::from_str(text)?)
    }

    /// Signature as a FourCC, space padded.
    pub fn host_sig(&self) -> u32 {
        let mut code = [b' '; 4];
        for (dst, src) in code.iter_mut().zip(self.host_signature.bytes()) {
            *dst = src;
        }
        four_cc(&code)
    }
}

/// Everything the host supplies for one run.
#[derive(Debug, Clone)]
pub struct FilterRequest {
    pub source: Surface,
    pub mode: ImageMode,
    /// Selection mask, 255 fully selected. `None` selects everything.
    pub selection: Option<Surface>,
    pub foreground: [u8; 3],
    pub background: [u8; 3],
    pub show_ui: bool,
    /// Settings captured by an earlier run, replayed when `show_ui` is off.
    pub settings: Option<FilterSettings>,
    pub icc_profile: Option<Vec<u8>>,
    pub document: DocumentProperties,
}

impl FilterRequest {
    pub fn new(source: Surface, mode: ImageMode) -> Self {
        Self {
            source,
            mode,
            selection: None,
            foreground: [0, 0, 0],
            background: [255, 255, 255],
            show_ui: false,
            settings: None,
            icc_profile: None,
            document: DocumentProperties::default(),
        }
    }

    pub fn with_selection(mut self, selection: Surface) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_colors(mut self, foreground: [u8; 3], background: [u8; 3]) -> Self {
        self.foreground = foreground;
        self.background = background;
        self
    }

    pub fn with_ui(mut self, show_ui: bool) -> Self {
        self.show_ui = show_ui;
        self
    }

    pub fn with_settings(mut self, settings: FilterSettings) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// Callbacks into the host UI.
#[derive(Clone, Default)]
pub struct HostCallbacks {
    pub progress: Option<ProgressCallback>,
    pub display: Option<DisplayCallback>,
    pub color_picker: Option<ColorPicker>,
}

/// Cooperative cancellation flag polled by the plugin through `abortProc`.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub destination: Surface,
    /// Captured after a run with UI, for later replay.
    pub settings: Option<FilterSettings>,
    /// Selectors issued, in order.
    pub phases: Vec<i16>,
}

/// Runs `plugin` over `request.source` on a dedicated worker thread.
pub fn run_filter(
    module: &PluginModule,
    plugin: &PluginData,
    request: FilterRequest,
    config: &HostConfig,
    callbacks: &HostCallbacks,
    abort: &AbortSignal,
) -> Result<FilterOutcome, HostError> {
    tracing::info!(
        filter = %plugin.title,
        entry = module.entry_name(),
        width = request.source.width(),
        height = request.source.height(),
        mode = ?request.mode,
        show_ui = request.show_ui,
        "running filter"
    );
    let outcome = thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("filter".to_string())
            .spawn_scoped(scope, move || {
                let session = session::FilterSession::new(module, plugin, request, config, callbacks, abort)?;
                session.run()
            })?;
        worker.join().map_err(|_| HostError::WorkerPanicked)?
    });
    match &outcome {
        Ok(result) => tracing::info!(phases = result.phases.len(), "filter finished"),
        Err(err) if err.is_silent() => tracing::info!(%err, "filter stopped"),
        Err(err) => tracing::error!(%err, "filter failed"),
    }
    outcome
}

/// Shows the plugin's About box.
pub fn show_about(module: &PluginModule, callbacks: &HostCallbacks) -> Result<(), HostError> {
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("filter-about".to_string())
            .spawn_scoped(scope, move || session::show_about(module, callbacks))?;
        worker.join().map_err(|_| HostError::WorkerPanicked)?
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_keys() {
        let config = HostConfig::from_toml("tile_size = 64\nhost_signature = \"PDN\"").unwrap();
        assert_eq!(config.tile_size, 64);
        assert_eq!(config.max_space, 1 << 30);
        assert_eq!(config.host_sig(), four_cc(b"PDN "));
        assert_eq!(HostConfig::default().host_sig(), pi_sdk::HOST_SIGNATURE);
    }

    #[test]
    fn abort_signal_is_shared() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        clone.abort();
        assert!(signal.is_aborted());
    }
}
