use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::PathBuf;

use filter_host::filter::{HostCallbacks, HostConfig, run_filter};
use filter_host::{AbortSignal, FilterRequest, HostError, ImageMode, PluginData, PluginModule, Surface};
use pi_sdk::filter_record::FILTER_SELECTOR_CONTINUE;

/// The `invert_plugin` dynamic library cargo built next to this test, either
/// in the profile directory or in its `deps`.
fn invert_library() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let file_name = format!("{DLL_PREFIX}invert_plugin{DLL_SUFFIX}");
    let hashed = format!("{DLL_PREFIX}invert_plugin-");
    for dir in exe.ancestors().skip(1) {
        let direct = dir.join(&file_name);
        if direct.is_file() {
            return direct;
        }
        let Ok(entries) = fs::read_dir(dir.join("deps")) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == file_name || (name.starts_with(&hashed) && name.ends_with(DLL_SUFFIX)) {
                return entry.path();
            }
        }
    }
    panic!("{file_name} was not built under {}", exe.display());
}

fn checker(width: usize, height: usize) -> Surface {
    let mut surface = Surface::for_mode(ImageMode::Rgb, width, height);
    for y in 0..height {
        for x in 0..width {
            let v = if (x + y) % 2 == 0 { 200 } else { 20 };
            surface.pixel_mut(x, y).copy_from_slice(&[v, 255 - v, v / 2, 255]);
        }
    }
    surface
}

fn run(module: &PluginModule, source: Surface) -> filter_host::FilterOutcome {
    let plugin = PluginData::new("invert_plugin", module.entry_name());
    let request = FilterRequest::new(source, ImageMode::Rgb);
    run_filter(module, &plugin, request, &HostConfig::default(), &HostCallbacks::default(), &AbortSignal::new()).unwrap()
}

#[test]
fn built_library_runs_both_entry_points() {
    let path = invert_library();
    // SAFETY: the workspace's own plugin, exporting 8bf entry points.
    let module = unsafe { PluginModule::load(&path, "InvertMain") }.unwrap();
    // SAFETY: same library, same entry point signature.
    let rows = unsafe { module.entry_point("InvertRowsMain") }.unwrap();
    assert_eq!(rows.entry_name(), "InvertRowsMain");

    let source = checker(3, 4);
    let whole = run(&module, source.clone());
    let by_row = run(&rows, source.clone());

    for y in 0..4 {
        for x in 0..3 {
            let src = source.pixel(x, y);
            assert_eq!(&whole.destination.pixel(x, y)[..3], &[255 - src[0], 255 - src[1], 255 - src[2]]);
        }
    }
    assert_eq!(whole.destination, by_row.destination);
    let continues = by_row.phases.iter().filter(|&&s| s == FILTER_SELECTOR_CONTINUE).count();
    assert_eq!(continues, 4);
}

#[test]
fn missing_symbol_is_reported() {
    let path = invert_library();
    // SAFETY: the workspace's own plugin, exporting 8bf entry points.
    let module = unsafe { PluginModule::load(&path, "InvertMain") }.unwrap();
    // SAFETY: the lookup fails before anything is called.
    let err = unsafe { module.entry_point("Nope") };
    assert!(matches!(err, Err(HostError::EntryPointNotFound(name)) if name == "Nope"));

    // SAFETY: as above.
    let err = unsafe { PluginModule::load(&path, "Nope") };
    assert!(matches!(err, Err(HostError::EntryPointNotFound(_))));
}
