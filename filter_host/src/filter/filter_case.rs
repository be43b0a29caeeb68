use pi_sdk::filter_record::*;

use crate::error::HostError;
use crate::plugin_data::{FilterCase, PluginData};
use crate::surface::ImageMode;

/// Filter case picked for a run and the plane layout it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseLayout {
    pub filter_case: i16,
    pub info: FilterCase,
    /// Planes the plugin sees.
    pub planes: i16,
    /// Whether the last plane is the transparency the plugin may edit.
    pub editable_alpha: bool,
    /// Whether the planes describe a layer rather than a flat image.
    pub layer: bool,
}

impl CaseLayout {
    pub fn is_editable_transparency(&self) -> bool {
        matches!(
            self.filter_case,
            FILTER_CASE_EDITABLE_TRANSPARENCY_NO_SELECTION | FILTER_CASE_EDITABLE_TRANSPARENCY_WITH_SELECTION
        )
    }

    /// `(layer, transparency, non-layer)` plane counts for the record.
    pub fn plane_counts(&self) -> (i16, i16, i16) {
        let color = self.planes - self.editable_alpha as i16;
        match (self.layer, self.editable_alpha) {
            (true, true) => (color, 1, 0),
            (true, false) => (color, 0, 0),
            (false, _) => (0, 0, color),
        }
    }
}

/// Picks the case from transparency, selection and what the plugin accepts.
///
/// Editable transparency is preferred for images with alpha, then protected
/// transparency, then the flat cases with alpha left alone.
pub fn select_filter_case(
    plugin: &PluginData,
    mode: ImageMode,
    has_transparency: bool,
    has_selection: bool,
) -> Result<CaseLayout, HostError> {
    let color = mode.color_planes() as i16;
    let pick = |with_sel: i16, no_sel: i16| if has_selection { with_sel } else { no_sel };

    if mode.supports_transparency() && has_transparency {
        let editable = pick(FILTER_CASE_EDITABLE_TRANSPARENCY_WITH_SELECTION, FILTER_CASE_EDITABLE_TRANSPARENCY_NO_SELECTION);
        let info = plugin.case_info(editable);
        if info.can_filter() {
            return Ok(CaseLayout {
                filter_case: editable,
                info,
                planes: color + 1,
                editable_alpha: true,
                layer: true,
            });
        }
        let protected = pick(FILTER_CASE_PROTECTED_TRANSPARENCY_WITH_SELECTION, FILTER_CASE_PROTECTED_TRANSPARENCY_NO_SELECTION);
        let info = plugin.case_info(protected);
        if info.can_filter() {
            return Ok(CaseLayout {
                filter_case: protected,
                info,
                planes: color,
                editable_alpha: false,
                layer: true,
            });
        }
        tracing::debug!(filter = %plugin.title, "no transparency case accepted, filtering flat");
    }

    let flat = pick(FILTER_CASE_FLAT_IMAGE_WITH_SELECTION, FILTER_CASE_FLAT_IMAGE_NO_SELECTION);
    let info = plugin.case_info(flat);
    if !info.can_filter() {
        return Err(HostError::UnsupportedImage(format!(
            "{} does not accept this image (filter case {flat})",
            plugin.title
        )));
    }
    Ok(CaseLayout {
        filter_case: flat,
        info,
        planes: color,
        editable_alpha: false,
        layer: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin() -> PluginData {
        PluginData::new("x.8bf", "PluginMain")
    }

    #[test]
    fn opaque_rgb_is_flat() {
        let layout = select_filter_case(&plugin(), ImageMode::Rgb, false, false).unwrap();
        assert_eq!(layout.filter_case, FILTER_CASE_FLAT_IMAGE_NO_SELECTION);
        assert_eq!(layout.planes, 3);
        assert_eq!(layout.plane_counts(), (0, 0, 3));
    }

    #[test]
    fn transparent_rgb_gets_an_editable_alpha_plane() {
        let layout = select_filter_case(&plugin(), ImageMode::Rgb, true, true).unwrap();
        assert_eq!(layout.filter_case, FILTER_CASE_EDITABLE_TRANSPARENCY_WITH_SELECTION);
        assert_eq!(layout.planes, 4);
        assert_eq!(layout.plane_counts(), (3, 1, 0));
    }

    #[test]
    fn falls_back_when_transparency_is_refused() {
        let mut table = [FilterCase::straight(); 7];
        table[3] = FilterCase::cant_filter();
        table[5] = FilterCase::cant_filter();
        let data = plugin().with_filter_info(table);
        let layout = select_filter_case(&data, ImageMode::Rgb, true, false).unwrap();
        assert_eq!(layout.filter_case, FILTER_CASE_FLAT_IMAGE_NO_SELECTION);

        table[0] = FilterCase::cant_filter();
        let data = plugin().with_filter_info(table);
        assert!(matches!(
            select_filter_case(&data, ImageMode::Rgb, true, false),
            Err(HostError::UnsupportedImage(_))
        ));
    }

    #[test]
    fn gray_ignores_transparency() {
        let layout = select_filter_case(&plugin(), ImageMode::Gray16, true, false).unwrap();
        assert_eq!(layout.filter_case, FILTER_CASE_FLAT_IMAGE_NO_SELECTION);
        assert_eq!(layout.planes, 1);
    }
}
