//! Colour services: picker, conversions, sample point and special colours.
//!
//! Components are 0..=255 except hue, which is in degrees. CMYK components
//! follow CMYK pixel data, so 255 means no ink. Conversions go through RGB.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use pi_sdk::errors::{ERR_INVALID_SAMPLE_POINT, ERR_PLUG_IN_HOST_INSUFFICIENT, NO_ERR, PARAM_ERR, USER_CANCELED_ERR};
use pi_sdk::procs::*;
use pi_sdk::types::{OSErr, from_pascal_string};

use super::{SlotBinding, with_bound};
use crate::surface::{ImageMode, MAX_SAMPLE_16, Surface};

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<ColorServices>>> = RefCell::new(Weak::new());
}

/// Host colour picker: given a prompt and the initial RGB colour, returns
/// the chosen colour or `None` when the user cancels.
pub type ColorPicker = Arc<dyn Fn(&str, [u8; 3]) -> Option<[u8; 3]> + Send + Sync>;

/// A colour space the host can convert between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Rgb,
    Hsb,
    Cmyk,
    Gray,
    Hsl,
}

impl ColorSpace {
    /// Maps a raw space id; Lab and XYZ are not supported.
    pub fn from_raw(space: i16) -> Result<Self, OSErr> {
        match space {
            PLUG_IN_COLOR_SERVICES_RGB_SPACE => Ok(ColorSpace::Rgb),
            PLUG_IN_COLOR_SERVICES_HSB_SPACE => Ok(ColorSpace::Hsb),
            PLUG_IN_COLOR_SERVICES_CMYK_SPACE => Ok(ColorSpace::Cmyk),
            PLUG_IN_COLOR_SERVICES_GRAY_SPACE => Ok(ColorSpace::Gray),
            PLUG_IN_COLOR_SERVICES_HSL_SPACE => Ok(ColorSpace::Hsl),
            PLUG_IN_COLOR_SERVICES_LAB_SPACE | PLUG_IN_COLOR_SERVICES_XYZ_SPACE => Err(ERR_PLUG_IN_HOST_INSUFFICIENT),
            _ => Err(PARAM_ERR),
        }
    }

    pub(crate) fn raw(self) -> i16 {
        match self {
            ColorSpace::Rgb => PLUG_IN_COLOR_SERVICES_RGB_SPACE,
            ColorSpace::Hsb => PLUG_IN_COLOR_SERVICES_HSB_SPACE,
            ColorSpace::Cmyk => PLUG_IN_COLOR_SERVICES_CMYK_SPACE,
            ColorSpace::Gray => PLUG_IN_COLOR_SERVICES_GRAY_SPACE,
            ColorSpace::Hsl => PLUG_IN_COLOR_SERVICES_HSL_SPACE,
        }
    }
}

fn hue_of(r: f64, g: f64, b: f64, max: f64, delta: f64) -> f64 {
    if delta == 0.0 {
        return 0.0;
    }
    let hue = if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    if hue < 0.0 { hue + 360.0 } else { hue }
}

fn from_hue(hue: f64, chroma: f64, m: f64) -> [u8; 3] {
    let h = (hue.rem_euclid(360.0)) / 60.0;
    let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    [to_byte(r + m), to_byte(g + m), to_byte(b + m)]
}

fn to_byte(unit: f64) -> u8 {
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}

fn unit(component: i16) -> f64 {
    component.clamp(0, 255) as f64 / 255.0
}

/// Converts components in `space` to RGB.
pub fn to_rgb(space: ColorSpace, c: [i16; 4]) -> [u8; 3] {
    match space {
        ColorSpace::Rgb => [c[0].clamp(0, 255) as u8, c[1].clamp(0, 255) as u8, c[2].clamp(0, 255) as u8],
        ColorSpace::Gray => {
            let v = c[0].clamp(0, 255) as u8;
            [v, v, v]
        }
        ColorSpace::Cmyk => {
            let k = unit(c[3]);
            [to_byte(unit(c[0]) * k), to_byte(unit(c[1]) * k), to_byte(unit(c[2]) * k)]
        }
        ColorSpace::Hsb => {
            let (s, v) = (unit(c[1]), unit(c[2]));
            let chroma = v * s;
            from_hue(c[0] as f64, chroma, v - chroma)
        }
        ColorSpace::Hsl => {
            let (s, l) = (unit(c[1]), unit(c[2]));
            let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
            from_hue(c[0] as f64, chroma, l - chroma / 2.0)
        }
    }
}

/// Converts an RGB colour to components in `space`.
pub fn from_rgb(space: ColorSpace, rgb: [u8; 3]) -> [i16; 4] {
    let [r, g, b] = rgb.map(|v| v as f64 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let byte = |v: f64| to_byte(v) as i16;
    match space {
        ColorSpace::Rgb => [rgb[0] as i16, rgb[1] as i16, rgb[2] as i16, 0],
        ColorSpace::Gray => [byte(0.299 * r + 0.587 * g + 0.114 * b), 0, 0, 0],
        ColorSpace::Cmyk => {
            let k = 1.0 - max;
            if k >= 1.0 {
                return [255, 255, 255, 0];
            }
            let ink = |v: f64| (1.0 - v - k) / (1.0 - k);
            [byte(1.0 - ink(r)), byte(1.0 - ink(g)), byte(1.0 - ink(b)), byte(1.0 - k)]
        }
        ColorSpace::Hsb => {
            let s = if max == 0.0 { 0.0 } else { delta / max };
            [hue_of(r, g, b, max, delta).round() as i16 % 360, byte(s), byte(max), 0]
        }
        ColorSpace::Hsl => {
            let l = (max + min) / 2.0;
            let s = if delta == 0.0 { 0.0 } else { delta / (1.0 - (2.0 * l - 1.0).abs()) };
            [hue_of(r, g, b, max, delta).round() as i16 % 360, byte(s), byte(l), 0]
        }
    }
}

pub struct ColorServices {
    source: Rc<Surface>,
    mode: ImageMode,
    foreground: [u8; 3],
    background: [u8; 3],
    picker: Option<ColorPicker>,
}

impl ColorServices {
    pub fn new(
        source: Rc<Surface>,
        mode: ImageMode,
        foreground: [u8; 3],
        background: [u8; 3],
        picker: Option<ColorPicker>,
    ) -> Self {
        Self {
            source,
            mode,
            foreground,
            background,
            picker,
        }
    }

    pub(crate) fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        super::bind(&ACTIVE, state)
    }

    /// RGB colour of the source pixel at (h, v).
    pub fn sample(&self, h: i32, v: i32) -> Option<[u8; 3]> {
        if h < 0 || v < 0 || h as usize >= self.source.width() || v as usize >= self.source.height() {
            return None;
        }
        let (x, y) = (h as usize, v as usize);
        let read = |plane: usize| {
            let value = self.source.sample(x, y, self.mode.plane_channel(plane));
            match self.mode.bytes_per_channel() {
                2 => (value.min(MAX_SAMPLE_16) as u32 * 255 / MAX_SAMPLE_16 as u32) as i16,
                _ => value as i16,
            }
        };
        let rgb = match self.mode {
            ImageMode::Gray | ImageMode::Gray16 => to_rgb(ColorSpace::Gray, [read(0), 0, 0, 0]),
            ImageMode::Cmyk => to_rgb(ColorSpace::Cmyk, [read(0), read(1), read(2), read(3)]),
            ImageMode::Rgb | ImageMode::Rgb48 => [read(0) as u8, read(1) as u8, read(2) as u8],
        };
        Some(rgb)
    }

    /// Services one request, updating `info` in place.
    pub fn handle(&mut self, info: &mut ColorServicesInfo) -> OSErr {
        match self.run(info) {
            Ok(()) => NO_ERR,
            Err(err) => err,
        }
    }

    fn run(&mut self, info: &mut ColorServicesInfo) -> Result<(), OSErr> {
        let rgb = match info.selector {
            PLUG_IN_COLOR_SERVICES_CHOOSE_COLOR => {
                let initial = to_rgb(ColorSpace::from_raw(info.source_space)?, info.color_components);
                // SAFETY: the prompt is null or a Pascal string owned by the plugin.
                let prompt = unsafe { info.selector_parameter.picker_prompt.as_ref() }
                    .map(|p| String::from_utf8_lossy(from_pascal_string(p)).into_owned())
                    .unwrap_or_default();
                let picker = self.picker.as_ref().ok_or(USER_CANCELED_ERR)?;
                let chosen = picker(&prompt, initial).ok_or(USER_CANCELED_ERR)?;
                if info.result_space == PLUG_IN_COLOR_SERVICES_CHOSEN_SPACE {
                    info.result_space = ColorSpace::Rgb.raw();
                }
                chosen
            }
            PLUG_IN_COLOR_SERVICES_CONVERT_COLOR => {
                if info.result_space == PLUG_IN_COLOR_SERVICES_CHOSEN_SPACE {
                    info.result_space = info.source_space;
                }
                to_rgb(ColorSpace::from_raw(info.source_space)?, info.color_components)
            }
            PLUG_IN_COLOR_SERVICES_SAMPLE_POINT => {
                // SAFETY: the sample point is null or a readable `Point`.
                let point = unsafe { info.selector_parameter.global_sample_point.as_ref() }.ok_or(PARAM_ERR)?;
                self.sample(point.h as i32, point.v as i32).ok_or(ERR_INVALID_SAMPLE_POINT)?
            }
            PLUG_IN_COLOR_SERVICES_GET_SPECIAL_COLOR => {
                // SAFETY: the selector says the union holds a colour id.
                match unsafe { info.selector_parameter.special_color_id } {
                    PLUG_IN_COLOR_SERVICES_BACKGROUND_COLOR => self.background,
                    PLUG_IN_COLOR_SERVICES_FOREGROUND_COLOR => self.foreground,
                    _ => return Err(PARAM_ERR),
                }
            }
            _ => return Err(PARAM_ERR),
        };
        let space = if info.result_space == PLUG_IN_COLOR_SERVICES_CHOSEN_SPACE {
            ColorSpace::Rgb
        } else {
            ColorSpace::from_raw(info.result_space)?
        };
        info.result_space = space.raw();
        info.color_components = from_rgb(space, rgb);
        info.result_gamut_info_valid = 1;
        info.result_in_gamut = 1;
        Ok(())
    }
}

unsafe extern "C" fn color_services_proc(info: *mut ColorServicesInfo) -> OSErr {
    if info.is_null() {
        return PARAM_ERR;
    }
    // SAFETY: non-null; the plugin owns the record for the duration of the call.
    let info = unsafe { &mut *info };
    if (info.info_size as usize) < std::mem::size_of::<ColorServicesInfo>() {
        tracing::debug!(size = info.info_size, "short ColorServicesInfo");
    }
    with_bound(&ACTIVE, PARAM_ERR, |services| services.handle(info))
}

pub fn color_services_callback() -> ColorServicesProc {
    Some(color_services_proc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_sdk::types::Point;
    use std::ptr;

    fn info(selector: i16, source: i16, result: i16, components: [i16; 4]) -> ColorServicesInfo {
        ColorServicesInfo {
            info_size: std::mem::size_of::<ColorServicesInfo>() as i32,
            selector,
            source_space: source,
            result_space: result,
            result_gamut_info_valid: 0,
            result_in_gamut: 0,
            reserved_source_space_info: ptr::null_mut(),
            reserved_result_space_info: ptr::null_mut(),
            color_components: components,
            reserved: ptr::null_mut(),
            selector_parameter: SelectorParameter { special_color_id: 0 },
        }
    }

    fn services(picker: Option<ColorPicker>) -> ColorServices {
        // One BGRA pixel: red 200, green 100, blue 50.
        let surface = Surface::from_bgra8(1, 1, vec![50, 100, 200, 255]).unwrap();
        ColorServices::new(Rc::new(surface), ImageMode::Rgb, [0, 0, 0], [255, 255, 255], picker)
    }

    #[test]
    fn rgb_round_trips_through_every_space() {
        let rgb = [200, 100, 50];
        for space in [ColorSpace::Hsb, ColorSpace::Hsl, ColorSpace::Cmyk] {
            let back = to_rgb(space, from_rgb(space, rgb));
            for (a, b) in back.iter().zip(rgb) {
                assert!((*a as i16 - b as i16).abs() <= 2, "{space:?}: {back:?}");
            }
        }
        assert_eq!(from_rgb(ColorSpace::Hsb, [255, 0, 0]), [0, 255, 255, 0]);
    }

    #[test]
    fn lab_is_not_supported() {
        let mut services = services(None);
        let mut request = info(PLUG_IN_COLOR_SERVICES_CONVERT_COLOR, PLUG_IN_COLOR_SERVICES_RGB_SPACE, PLUG_IN_COLOR_SERVICES_LAB_SPACE, [0; 4]);
        assert_eq!(services.handle(&mut request), ERR_PLUG_IN_HOST_INSUFFICIENT);
    }

    #[test]
    fn sample_point_reads_source_in_plane_order() {
        let mut services = services(None);
        let mut point = Point { v: 0, h: 0 };
        let mut request = info(PLUG_IN_COLOR_SERVICES_SAMPLE_POINT, 0, PLUG_IN_COLOR_SERVICES_RGB_SPACE, [0; 4]);
        request.selector_parameter = SelectorParameter { global_sample_point: &mut point };
        assert_eq!(services.handle(&mut request), NO_ERR);
        assert_eq!(request.color_components, [200, 100, 50, 0]);

        point.h = 5;
        assert_eq!(services.handle(&mut request), ERR_INVALID_SAMPLE_POINT);
    }

    #[test]
    fn picker_result_or_cancel() {
        let mut cancelled = services(None);
        let mut request = info(PLUG_IN_COLOR_SERVICES_CHOOSE_COLOR, PLUG_IN_COLOR_SERVICES_RGB_SPACE, PLUG_IN_COLOR_SERVICES_CHOSEN_SPACE, [0; 4]);
        request.selector_parameter = SelectorParameter { picker_prompt: ptr::null_mut() };
        assert_eq!(cancelled.handle(&mut request), USER_CANCELED_ERR);

        let picker: ColorPicker = Arc::new(|_: &str, _: [u8; 3]| Some([1, 2, 3]));
        let mut chooser = services(Some(picker));
        assert_eq!(chooser.handle(&mut request), NO_ERR);
        assert_eq!(request.result_space, PLUG_IN_COLOR_SERVICES_RGB_SPACE);
        assert_eq!(request.color_components, [1, 2, 3, 0]);
    }

    #[test]
    fn special_colors_through_the_callback() {
        let state = Rc::new(RefCell::new(services(None)));
        let _binding = ColorServices::bind(&state);
        let mut request = info(PLUG_IN_COLOR_SERVICES_GET_SPECIAL_COLOR, 0, PLUG_IN_COLOR_SERVICES_GRAY_SPACE, [0; 4]);
        request.selector_parameter = SelectorParameter {
            special_color_id: PLUG_IN_COLOR_SERVICES_BACKGROUND_COLOR,
        };
        // SAFETY: bound services, valid request.
        let err = unsafe { color_services_callback().unwrap()(&mut request) };
        assert_eq!(err, NO_ERR);
        assert_eq!(request.color_components[0], 255);
    }
}
