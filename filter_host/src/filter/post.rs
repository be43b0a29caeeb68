//! Fix-ups applied to the image before and after the plugin runs.

use pi_sdk::VRect;
use pi_sdk::filter_record::*;

use crate::suites::color_services::{ColorSpace, from_rgb};
use crate::surface::{ImageMode, MAX_SAMPLE_16, Surface};

/// Fill colour of a zap policy, as plugin planes in `mode`.
fn zap_color(mode: ImageMode, handling: u8, foreground: [u8; 3], background: [u8; 3]) -> Option<[u16; 4]> {
    let rgb = match handling {
        FILTER_DATA_HANDLING_BLACK_ZAP => [0, 0, 0],
        FILTER_DATA_HANDLING_GRAY_ZAP => [128, 128, 128],
        FILTER_DATA_HANDLING_WHITE_ZAP => [255, 255, 255],
        FILTER_DATA_HANDLING_FOREGROUND_ZAP => foreground,
        FILTER_DATA_HANDLING_BACKGROUND_ZAP => background,
        _ => return None,
    };
    let planes = match mode {
        ImageMode::Rgb | ImageMode::Rgb48 => [rgb[0] as i16, rgb[1] as i16, rgb[2] as i16, 0],
        ImageMode::Gray | ImageMode::Gray16 => from_rgb(ColorSpace::Gray, rgb),
        ImageMode::Cmyk => from_rgb(ColorSpace::Cmyk, rgb),
    };
    let widen = |v: i16| match mode.bytes_per_channel() {
        2 => (v.clamp(0, 255) as u32 * MAX_SAMPLE_16 as u32 / 255) as u16,
        _ => v.clamp(0, 255) as u16,
    };
    Some(planes.map(widen))
}

/// Overwrites the colour of fully transparent pixels with the zap colour.
/// Returns whether the policy asked for it.
pub(crate) fn zap_transparent(
    surface: &mut Surface,
    mode: ImageMode,
    handling: u8,
    foreground: [u8; 3],
    background: [u8; 3],
) -> bool {
    let Some(color) = zap_color(mode, handling, foreground, background) else {
        return false;
    };
    if surface.channels() != 4 || !mode.supports_transparency() {
        return false;
    }
    for y in 0..surface.height() {
        for x in 0..surface.width() {
            if surface.sample(x, y, 3) != 0 {
                continue;
            }
            for plane in 0..mode.color_planes() {
                surface.set_sample(x, y, mode.plane_channel(plane), color[plane]);
            }
        }
    }
    true
}

/// Forces alpha back to opaque inside `bounds`, or everywhere.
pub(crate) fn fill_mask(destination: &mut Surface, bounds: Option<VRect>) {
    match bounds {
        Some(rect) => destination.set_alpha_to_opaque(Some(&[rect])),
        None => destination.set_alpha_to_opaque(None),
    }
}

/// Puts original pixels back wherever the selection mask is not fully set.
/// Partially selected pixels blend between the filtered and original value.
pub(crate) fn clip_to_selection(destination: &mut Surface, original: &Surface, mask: &Surface) {
    let width = destination.width().min(mask.width());
    let height = destination.height().min(mask.height());
    let channels = destination.channels();
    for y in 0..height {
        for x in 0..width {
            let coverage = mask.sample(x, y, 0) as u32;
            if coverage >= 255 {
                continue;
            }
            for channel in 0..channels {
                let before = original.sample(x, y, channel) as u32;
                let value = if coverage == 0 {
                    before
                } else {
                    let after = destination.sample(x, y, channel) as u32;
                    (after * coverage + before * (255 - coverage) + 127) / 255
                };
                destination.set_sample(x, y, channel, value as u16);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zap_only_touches_transparent_pixels() {
        let mut surface = Surface::new(2, 1, 4, 1);
        surface.pixel_mut(1, 0).copy_from_slice(&[9, 9, 9, 255]);
        assert!(zap_transparent(&mut surface, ImageMode::Rgb, FILTER_DATA_HANDLING_FOREGROUND_ZAP, [10, 20, 30], [0; 3]));
        assert_eq!(surface.pixel(0, 0), &[30, 20, 10, 0]);
        assert_eq!(surface.pixel(1, 0), &[9, 9, 9, 255]);
        assert!(!zap_transparent(&mut surface, ImageMode::Rgb, FILTER_DATA_HANDLING_NONE, [0; 3], [0; 3]));
    }

    #[test]
    fn clip_restores_unselected_pixels() {
        let original = Surface::new(3, 1, 4, 1);
        let mut destination = Surface::new(3, 1, 4, 1);
        destination.data_mut().fill(200);
        let mut mask = Surface::new_mask(3, 1);
        mask.set_sample(1, 0, 0, 255);
        mask.set_sample(2, 0, 0, 51);
        clip_to_selection(&mut destination, &original, &mask);
        assert_eq!(destination.pixel(0, 0), &[0, 0, 0, 0]);
        assert_eq!(destination.pixel(1, 0), &[200, 200, 200, 200]);
        assert_eq!(destination.pixel(2, 0), &[40, 40, 40, 40]);
    }

    #[test]
    fn sixteen_bit_zap_uses_plugin_range() {
        assert_eq!(
            zap_color(ImageMode::Rgb48, FILTER_DATA_HANDLING_WHITE_ZAP, [0; 3], [0; 3]),
            Some([MAX_SAMPLE_16, MAX_SAMPLE_16, MAX_SAMPLE_16, 0])
        );
    }
}
