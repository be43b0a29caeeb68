use libloading::Library;
use pi_sdk::PluginEntryPoint;
use std::path::Path;
use std::sync::Arc;

use crate::error::HostError;

/// A loaded 8bf module and the entry point resolved from it.
///
/// The library stays mapped while any module resolved from it is alive;
/// entry points copied out of it must not outlive them.
pub struct PluginModule {
    lib: Option<Arc<Library>>,
    entry_name: String,
    entry: PluginEntryPoint,
}

impl PluginModule {
    /// Loads the module at `path` and resolves `entry_name`.
    ///
    /// # SAFETY
    /// The caller must ensure that the library at `path`:
    /// - exports `entry_name` with the exact [`PluginEntryPoint`] ABI and signature,
    /// - runs no initialisation code that conflicts with the host process,
    /// - follows the 8bf contract for every record it is handed.
    pub unsafe fn load(path: &Path, entry_name: &str) -> Result<Self, HostError> {
        if !path.exists() {
            return Err(HostError::FileNotFound(path.display().to_string()));
        }
        // SAFETY: forwarded to the caller's contract.
        let lib = unsafe { Library::new(path)? };
        // SAFETY: the symbol's type is guaranteed by the caller.
        let entry = unsafe { resolve(&lib, entry_name)? };
        tracing::debug!(module = %path.display(), entry = entry_name, "plugin module loaded");
        Ok(Self {
            lib: Some(Arc::new(lib)),
            entry_name: entry_name.to_string(),
            entry,
        })
    }

    /// Wraps an entry point that is already part of this process.
    pub fn from_entry_point(entry_name: impl Into<String>, entry: PluginEntryPoint) -> Self {
        Self {
            lib: None,
            entry_name: entry_name.into(),
            entry,
        }
    }

    /// Resolves another entry point of the same module, for files that hold
    /// several filters.
    ///
    /// # SAFETY
    /// Same contract as [`load`](Self::load) for `entry_name`.
    pub unsafe fn entry_point(&self, entry_name: &str) -> Result<Self, HostError> {
        let Some(lib) = &self.lib else {
            return Err(HostError::EntryPointNotFound(entry_name.to_string()));
        };
        // SAFETY: forwarded to the caller's contract.
        let entry = unsafe { resolve(lib, entry_name)? };
        Ok(Self {
            lib: Some(lib.clone()),
            entry_name: entry_name.to_string(),
            entry,
        })
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Raw entry point.
    pub fn entry(&self) -> PluginEntryPoint {
        self.entry
    }
}

/// # SAFETY
/// The symbol must have the [`PluginEntryPoint`] signature.
unsafe fn resolve(lib: &Library, entry_name: &str) -> Result<PluginEntryPoint, HostError> {
    // SAFETY: the symbol's type is guaranteed by the caller.
    let symbol = unsafe { lib.get::<PluginEntryPoint>(entry_name.as_bytes()) }
        .map_err(|_| HostError::EntryPointNotFound(entry_name.to_string()))?;
    Ok(*symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn noop(_selector: i16, _block: *mut std::ffi::c_void, _data: *mut isize, result: *mut i16) {
        // SAFETY: the host always passes a valid result pointer.
        unsafe { *result = 0 };
    }

    #[test]
    fn missing_file_is_reported() {
        // SAFETY: the path does not exist, nothing is loaded.
        let err = unsafe { PluginModule::load(Path::new("/nonexistent/filter.8bf"), "PluginMain") };
        assert!(matches!(err, Err(HostError::FileNotFound(_))));
    }

    #[test]
    fn in_process_modules_have_no_extra_entry_points() {
        let module = PluginModule::from_entry_point("Noop", noop);
        assert_eq!(module.entry_name(), "Noop");
        // SAFETY: no library is involved.
        let err = unsafe { module.entry_point("Other") };
        assert!(matches!(err, Err(HostError::EntryPointNotFound(_))));
    }
}
