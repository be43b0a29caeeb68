//! Discovery metadata of a filter plugin.

use std::path::PathBuf;

use pi_sdk::FilterCaseInfo;
use pi_sdk::filter_record::*;
use serde::{Deserialize, Serialize};

/// Handling policy of one filter case, as declared in the plugin's PiPL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCase {
    pub input_handling: u8,
    pub output_handling: u8,
    pub flags1: u8,
    pub flags2: u8,
}

impl FilterCase {
    /// Straight data in and out, no flags.
    pub const fn straight() -> Self {
        Self {
            input_handling: FILTER_DATA_HANDLING_NONE,
            output_handling: FILTER_DATA_HANDLING_NONE,
            flags1: 0,
            flags2: 0,
        }
    }

    pub const fn cant_filter() -> Self {
        Self {
            input_handling: FILTER_DATA_HANDLING_CANT_FILTER,
            output_handling: FILTER_DATA_HANDLING_CANT_FILTER,
            flags1: 0,
            flags2: 0,
        }
    }

    pub fn can_filter(&self) -> bool {
        self.input_handling != FILTER_DATA_HANDLING_CANT_FILTER
    }

    pub fn dont_copy_to_destination(&self) -> bool {
        self.flags1 & PI_FILTER_DONT_COPY_TO_DESTINATION_BIT != 0
    }

    pub fn works_with_blank_data(&self) -> bool {
        self.flags1 & PI_FILTER_WORKS_WITH_BLANK_DATA_BIT != 0
    }

    pub fn writes_outside_selection(&self) -> bool {
        self.flags1 & PI_FILTER_WRITES_OUTSIDE_SELECTION_BIT != 0
    }
}

impl From<FilterCaseInfo> for FilterCase {
    fn from(info: FilterCaseInfo) -> Self {
        Self {
            input_handling: info.input_handling,
            output_handling: info.output_handling,
            flags1: info.flags1,
            flags2: info.flags2,
        }
    }
}

/// One parameter of a scripting event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeteParameter {
    pub name: String,
    pub key: u32,
    pub type_id: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub flags: u16,
}

/// One scripting event (a filter usually declares exactly one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeteEvent {
    pub vendor: String,
    pub event_class: u32,
    pub event_type: u32,
    #[serde(default)]
    pub parameters: Vec<AeteParameter>,
}

/// Scripting terminology of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aete {
    pub version: u16,
    pub language: u16,
    pub script: u16,
    #[serde(default)]
    pub events: Vec<AeteEvent>,
}

impl Aete {
    /// Every parameter key the plugin publishes to scripting.
    pub fn parameter_keys(&self) -> Vec<u32> {
        self.events
            .iter()
            .flat_map(|event| event.parameters.iter().map(|param| param.key))
            .collect()
    }
}

/// A discovered plugin filter. Read-only for the host core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginData {
    pub file_name: PathBuf,
    pub entry_point: String,
    pub category: String,
    pub title: String,
    /// Indexed by filter case minus one; `None` means every case is straight data.
    #[serde(default)]
    pub filter_info: Option<[FilterCase; 7]>,
    #[serde(default)]
    pub aete: Option<Aete>,
    /// Whether the plugin answers the About selector with a dialog.
    #[serde(default = "default_true")]
    pub has_about_box: bool,
}

fn default_true() -> bool {
    true
}

impl PluginData {
    pub fn new(file_name: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            entry_point: entry_point.into(),
            category: String::new(),
            title: String::new(),
            filter_info: None,
            aete: None,
            has_about_box: true,
        }
    }

    pub fn with_filter_info(mut self, info: [FilterCase; 7]) -> Self {
        self.filter_info = Some(info);
        self
    }

    pub fn with_aete(mut self, aete: Aete) -> Self {
        self.aete = Some(aete);
        self
    }

    /// Policy for `filter_case` (1-based). Unknown cases behave as straight data.
    pub fn case_info(&self, filter_case: i16) -> FilterCase {
        match (&self.filter_info, usize::try_from(filter_case - 1)) {
            (Some(table), Ok(index)) if index < table.len() => table[index],
            _ => FilterCase::straight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_means_straight_data() {
        let data = PluginData::new("x.8bf", "PluginMain");
        let case = data.case_info(FILTER_CASE_FLAT_IMAGE_NO_SELECTION);
        assert!(case.can_filter());
        assert!(!case.writes_outside_selection());
    }

    #[test]
    fn table_is_indexed_from_one() {
        let mut table = [FilterCase::straight(); 7];
        table[4] = FilterCase::cant_filter();
        let data = PluginData::new("x.8bf", "PluginMain").with_filter_info(table);
        assert!(!data.case_info(FILTER_CASE_EDITABLE_TRANSPARENCY_WITH_SELECTION).can_filter());
        assert!(data.case_info(FILTER_CASE_EDITABLE_TRANSPARENCY_NO_SELECTION).can_filter());
    }

    #[test]
    fn plugin_info_reads_from_toml() {
        let text = r#"
            file_name = "blur.8bf"
            entry_point = "BlurMain"
            category = "Test"
            title = "Blur"

            [aete]
            version = 1
            language = 0
            script = 0

            [[aete.events]]
            vendor = "Test"
            event_class = 1
            event_type = 2

            [[aete.events.parameters]]
            name = "radius"
            key = 1382312992
            type_id = 1819242087
        "#;
        let data: PluginData = toml::from_str(text).unwrap();
        assert_eq!(data.aete.unwrap().parameter_keys(), vec![1382312992]);
        assert!(data.has_about_box);
    }
}
