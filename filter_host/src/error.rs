use pi_sdk::errors::*;
use pi_sdk::types::OSErr;
use thiserror::Error;

/// Host-level errors produced while loading or running a filter.
#[derive(Error, Debug)]
pub enum HostError {
    /// Plugin module file does not exist.
    #[error("Plugin module does not exist: {0}")]
    FileNotFound(String),

    /// The module was found but could not be mapped into the process.
    #[error("Plugin load error: {0}")]
    ModuleLoad(#[from] libloading::Error),

    /// The module does not export the requested entry point.
    #[error("Entry point not found: {0}")]
    EntryPointNotFound(String),

    /// The plugin returned a negative status from an entry point call.
    #[error("{message}")]
    Plugin {
        /// Selector that failed.
        selector: i16,
        /// Raw status code.
        code: OSErr,
        /// Human readable message, plugin-supplied when it reported one.
        message: String,
    },

    /// The plugin returned a positive status: it already informed the user.
    #[error("The filter reported error {0}")]
    PluginHandled(OSErr),

    /// The user cancelled the filter.
    #[error("The filter was cancelled")]
    UserCanceled,

    /// Memory could not be allocated for the plugin or its buffers.
    #[error("There is not enough memory to run this filter")]
    OutOfMemory,

    /// The image is fully transparent and the filter declared it can't handle that.
    #[error("The filter cannot process fully transparent images")]
    BlankImageUnsupported,

    /// No filter case of the plugin accepts this image.
    #[error("The filter does not support this image: {0}")]
    UnsupportedImage(String),

    /// The request itself is inconsistent (sizes, modes).
    #[error("Invalid filter request: {0}")]
    InvalidRequest(String),

    /// The worker thread running the filter panicked.
    #[error("The filter thread terminated unexpectedly")]
    WorkerPanicked,

    /// I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error occurred while decoding or encoding an image.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Settings or plugin info file could not be parsed.
    #[error("Settings parse error: {0}")]
    SettingsDecode(#[from] toml::de::Error),

    /// Settings could not be serialised.
    #[error("Settings write error: {0}")]
    SettingsEncode(#[from] toml::ser::Error),
}

impl HostError {
    /// Maps an entry point status to an error. `report` is the plugin's own
    /// message, used for `errReportString`.
    pub fn from_status(selector: i16, code: OSErr, report: Option<String>) -> Self {
        match code {
            USER_CANCELED_ERR => HostError::UserCanceled,
            MEM_FULL_ERR | NIL_HANDLE_ERR => HostError::OutOfMemory,
            c if c > 0 => HostError::PluginHandled(c),
            ERR_REPORT_STRING => HostError::Plugin {
                selector,
                code,
                message: report.unwrap_or_else(|| "The filter reported an unspecified error".to_string()),
            },
            _ => HostError::Plugin {
                selector,
                code,
                message: status_message(code).to_string(),
            },
        }
    }

    /// Whether the failure should be presented to the user at all.
    pub fn is_silent(&self) -> bool {
        matches!(self, HostError::UserCanceled | HostError::PluginHandled(_))
    }
}

/// Fixed message table for host-defined status codes.
pub fn status_message(code: OSErr) -> &'static str {
    match code {
        READ_ERR | WRIT_ERR | OPEN_ERR | EOF_ERR | IO_ERR => "A file I/O error occurred",
        DSK_FUL_ERR => "The disk is full",
        F_LCKD_ERR | V_LCKD_ERR => "The file is locked",
        FNF_ERR => "The file was not found",
        MEM_FULL_ERR | NIL_HANDLE_ERR => "There is not enough memory to run this filter",
        FILTER_BAD_MODE => "The filter does not support this image mode",
        FILTER_BAD_PARAMETERS | PARAM_ERR => "The filter received bad parameters",
        ERR_PLUG_IN_HOST_INSUFFICIENT => "The filter requires services this host does not provide",
        ERR_PLUG_IN_PROPERTY_UNDEFINED => "The filter requested an undefined property",
        ERR_HOST_DOES_NOT_SUPPORT_COL_STEP => "The host does not support column steps",
        ERR_INVALID_SAMPLE_POINT => "The sample point is outside the image",
        ERR_UNKNOWN_PORT => "The filter referenced an unknown channel port",
        ERR_UNSUPPORTED_ROW_BITS | ERR_UNSUPPORTED_COL_BITS | ERR_UNSUPPORTED_BIT_OFFSET => {
            "The filter requested an unsupported pixel layout"
        }
        ERR_UNSUPPORTED_DEPTH | ERR_UNSUPPORTED_DEPTH_CONVERSION => "The filter requested an unsupported bit depth",
        _ => "The filter returned an unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_and_positive_codes_are_silent() {
        assert!(HostError::from_status(4, USER_CANCELED_ERR, None).is_silent());
        assert!(HostError::from_status(4, 7, None).is_silent());
        assert!(!HostError::from_status(4, FILTER_BAD_MODE, None).is_silent());
    }

    #[test]
    fn memory_codes_become_out_of_memory() {
        assert!(matches!(HostError::from_status(3, MEM_FULL_ERR, None), HostError::OutOfMemory));
        assert!(matches!(HostError::from_status(3, NIL_HANDLE_ERR, None), HostError::OutOfMemory));
    }

    #[test]
    fn report_string_uses_plugin_text() {
        let err = HostError::from_status(1, ERR_REPORT_STRING, Some("Needs RGB".into()));
        assert_eq!(err.to_string(), "Needs RGB");

        let err = HostError::from_status(2, DSK_FUL_ERR, None);
        assert_eq!(err.to_string(), "The disk is full");
    }
}
