use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filter_host::filter::{HostCallbacks, HostConfig, run_filter, show_about};
use filter_host::{AbortSignal, FilterRequest, FilterSettings, HostError, ImageMode, PluginData, PluginModule, Surface};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "filter_host")]
struct Args {
    /// path to input PNG
    #[arg(long, required_unless_present = "about")]
    input: Option<String>,

    /// path to output PNG
    #[arg(long, required_unless_present = "about")]
    output: Option<String>,

    /// plugin module path, or library name without extension (e.g. invert_plugin)
    #[arg(long)]
    plugin: String,

    /// entry point symbol (default: the plugin info's, else PluginMain)
    #[arg(long)]
    entry: Option<String>,

    /// directory with plugins (default target/debug)
    #[arg(long, default_value = "target/debug")]
    plugin_path: String,

    /// plugin metadata (filter case table, scripting terms) as TOML
    #[arg(long)]
    plugin_info: Option<String>,

    /// host settings as TOML
    #[arg(long)]
    config: Option<String>,

    /// settings saved by an earlier run, replayed without UI
    #[arg(long)]
    settings: Option<String>,

    /// where to save the settings of this run
    #[arg(long)]
    save_settings: Option<String>,

    /// let the filter show its dialog
    #[arg(long)]
    show_ui: bool,

    /// rectangular selection as x,y,width,height
    #[arg(long, value_parser = parse_selection)]
    selection: Option<[usize; 4]>,

    /// foreground colour as r,g,b
    #[arg(long, value_parser = parse_rgb, default_value = "0,0,0")]
    foreground: [u8; 3],

    /// background colour as r,g,b
    #[arg(long, value_parser = parse_rgb, default_value = "255,255,255")]
    background: [u8; 3],

    /// show the plugin's About box and exit
    #[arg(long)]
    about: bool,
}

fn parse_selection(text: &str) -> Result<[usize; 4], String> {
    let parts: Vec<usize> = text
        .split(',')
        .map(|part| part.trim().parse::<usize>().map_err(|e| format!("{part:?}: {e}")))
        .collect::<Result<_, _>>()?;
    <[usize; 4]>::try_from(parts).map_err(|_| "expected x,y,width,height".to_string())
}

fn parse_rgb(text: &str) -> Result<[u8; 3], String> {
    let parts: Vec<u8> = text
        .split(',')
        .map(|part| part.trim().parse::<u8>().map_err(|e| format!("{part:?}: {e}")))
        .collect::<Result<_, _>>()?;
    <[u8; 3]>::try_from(parts).map_err(|_| "expected r,g,b".to_string())
}

fn lib_filename(plugin_name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{plugin_name}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{plugin_name}.dylib")
    } else {
        format!("lib{plugin_name}.so")
    }
}

fn plugin_file(args: &Args) -> PathBuf {
    let direct = PathBuf::from(&args.plugin);
    if direct.is_file() {
        return direct;
    }
    let mut path = PathBuf::from(&args.plugin_path);
    path.push(lib_filename(&args.plugin));
    path
}

fn read_text(path: &str) -> Result<String, HostError> {
    if !Path::new(path).exists() {
        return Err(HostError::FileNotFound(path.to_string()));
    }
    Ok(std::fs::read_to_string(path)?)
}

fn selection_mask(width: usize, height: usize, [x, y, w, h]: [usize; 4]) -> Surface {
    let mut mask = Surface::new_mask(width, height);
    for row in y.min(height)..(y + h).min(height) {
        for col in x.min(width)..(x + w).min(width) {
            mask.set_sample(col, row, 0, 255);
        }
    }
    mask
}

fn main() -> Result<(), HostError> {
    init_tracing();

    let args = Args::parse();

    let plugin_path = plugin_file(&args);
    let plugin = match &args.plugin_info {
        Some(path) => toml::from_str::<PluginData>(&read_text(path)?)?,
        None => PluginData::new(&plugin_path, args.entry.clone().unwrap_or_else(|| "PluginMain".to_string())),
    };
    let entry = args.entry.clone().unwrap_or_else(|| plugin.entry_point.clone());

    // SAFETY:
    // - `PluginModule::load` is unsafe because Rust can't verify at compile time that the loaded
    //   dynamic library exports `entry` with the 8bf entry point ABI/signature.
    // - If the library is not an 8bf filter (wrong symbol, wrong signature, wrong ABI),
    //   calling through the obtained function pointer would be Undefined Behavior.
    // - The module outlives every call made through it: it is dropped at the end of `main`,
    //   after the filter worker thread has been joined.
    let module = unsafe { PluginModule::load(&plugin_path, &entry)? };

    let callbacks = HostCallbacks {
        progress: Some(Arc::new(|done: i32, total: i32| tracing::debug!(done, total, "progress"))),
        ..HostCallbacks::default()
    };

    if args.about {
        show_about(&module, &callbacks)?;
        return Ok(());
    }

    let (Some(input), Some(output)) = (&args.input, &args.output) else {
        return Err(HostError::InvalidRequest("--input and --output are required".to_string()));
    };
    if !Path::new(input).exists() {
        return Err(HostError::FileNotFound(input.clone()));
    }

    let config = match &args.config {
        Some(path) => HostConfig::from_toml(&read_text(path)?)?,
        None => HostConfig::default(),
    };

    let decoded = image::open(input)?;
    let (source, mode) = if decoded.color().bytes_per_pixel() > decoded.color().channel_count() {
        (Surface::from_rgba16_image(&decoded.to_rgba16()), ImageMode::Rgb48)
    } else {
        (Surface::from_rgba_image(&decoded.to_rgba8()), ImageMode::Rgb)
    };
    let (width, height) = (source.width(), source.height());

    tracing::info!(
        width,
        height,
        input_file = %input,
        plugin = %plugin_path.display(),
        entry = %entry,
        ?mode,
        "image filtering.."
    );

    let mut request = FilterRequest::new(source, mode)
        .with_ui(args.show_ui)
        .with_colors(args.foreground, args.background);
    if let Some(rect) = args.selection {
        request = request.with_selection(selection_mask(width, height, rect));
    }
    if let Some(path) = &args.settings {
        request = request.with_settings(FilterSettings::from_toml(&read_text(path)?)?);
    }

    let outcome = run_filter(&module, &plugin, request, &config, &callbacks, &AbortSignal::new())?;

    let unexpected = || HostError::InvalidRequest("filter produced an unexpected surface".to_string());
    match mode {
        ImageMode::Rgb48 => outcome.destination.to_rgba16_image().ok_or_else(unexpected)?.save(output)?,
        _ => outcome.destination.to_rgba_image().ok_or_else(unexpected)?.save(output)?,
    }
    tracing::info!(output_file = %output, "output file saved");

    if let (Some(path), Some(settings)) = (&args.save_settings, &outcome.settings) {
        std::fs::write(path, settings.to_toml()?)?;
        tracing::info!(settings_file = %path, "filter settings saved");
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}
