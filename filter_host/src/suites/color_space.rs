//! ColorSpace suite: colour tokens and batch conversions for PICA plugins.
//!
//! Components are bytes here, so hue is scaled from degrees to 0..=255.
//! 16-bit components use the plugin range 0..=32768. Conversions go through
//! RGB with the colour services routines.

use std::collections::HashMap;
use std::ptr;

use pi_sdk::errors::*;
use pi_sdk::pica::{CSColor8, CSColor16, ColorID, ColorSpaceCode, PSColorSpaceSuite1};
use pi_sdk::types::Boolean;

use super::color_services::{ColorSpace, from_rgb, to_rgb};
use super::pica::with_colors;
use super::write_out;
use crate::surface::MAX_SAMPLE_16;

pub const K_PS_COLOR_SPACE_SUITE_VERSION1: i32 = 1;

#[derive(Debug, Clone, Copy)]
struct StoredColor {
    native: ColorSpace,
    rgb: [u8; 3],
}

/// Colours made through the suite, keyed by the token handed to the plugin.
#[derive(Debug, Default)]
pub struct ColorTable {
    colors: HashMap<usize, StoredColor>,
    next: usize,
}

impl ColorTable {
    pub fn make(&mut self) -> ColorID {
        self.next += 1;
        self.colors.insert(
            self.next,
            StoredColor {
                native: ColorSpace::Rgb,
                rgb: [0, 0, 0],
            },
        );
        self.next as ColorID
    }

    pub fn delete(&mut self, color: ColorID) -> SPErr {
        match self.colors.remove(&(color as usize)) {
            Some(_) => K_SP_NO_ERROR,
            None => K_SP_BAD_PARAMETER_ERROR,
        }
    }

    pub fn stuff(&mut self, color: ColorID, space: ColorSpaceCode, components: [u8; 4]) -> SPErr {
        let space = match space_of(space) {
            Ok(space) => space,
            Err(err) => return err,
        };
        let Some(stored) = self.colors.get_mut(&(color as usize)) else {
            return K_SP_BAD_PARAMETER_ERROR;
        };
        *stored = StoredColor {
            native: space,
            rgb: to_rgb(space, widen(space, components)),
        };
        K_SP_NO_ERROR
    }

    pub fn extract(&self, color: ColorID, space: ColorSpaceCode) -> Result<[u8; 4], SPErr> {
        let space = space_of(space)?;
        let stored = self.colors.get(&(color as usize)).ok_or(K_SP_BAD_PARAMETER_ERROR)?;
        Ok(narrow(space, from_rgb(space, stored.rgb)))
    }

    pub fn native_space(&self, color: ColorID) -> Result<ColorSpaceCode, SPErr> {
        self.colors
            .get(&(color as usize))
            .map(|stored| stored.native.raw() as ColorSpaceCode)
            .ok_or(K_SP_BAD_PARAMETER_ERROR)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn create_pica_suite1() -> Box<PSColorSpaceSuite1> {
        Box::new(PSColorSpaceSuite1 {
            make: Some(make),
            delete: Some(delete),
            stuff_components: Some(stuff_components),
            extract_components: Some(extract_components),
            stuff_xyz: Some(stuff_xyz),
            extract_xyz: Some(extract_xyz),
            convert8: Some(convert8),
            convert16: Some(convert16),
            get_native_space: Some(get_native_space),
            is_book_color: Some(is_book_color),
            extract_color_name: Some(extract_color_name),
            pick_color: Some(pick_color),
            convert8_to16: Some(convert8_to16),
            convert16_to8: Some(convert16_to8),
            convert_to_monitor_rgb: Some(convert_to_monitor_rgb),
        })
    }
}

/// Lab and XYZ are unimplemented; other unknown ids are bad parameters.
fn space_of(space: ColorSpaceCode) -> Result<ColorSpace, SPErr> {
    let raw = i16::try_from(space).map_err(|_| K_SP_BAD_PARAMETER_ERROR)?;
    ColorSpace::from_raw(raw).map_err(|err| {
        if err == ERR_PLUG_IN_HOST_INSUFFICIENT { K_SP_UNIMPLEMENTED_ERROR } else { K_SP_BAD_PARAMETER_ERROR }
    })
}

fn has_hue(space: ColorSpace) -> bool {
    matches!(space, ColorSpace::Hsb | ColorSpace::Hsl)
}

/// Byte components to colour services components.
fn widen(space: ColorSpace, c: [u8; 4]) -> [i16; 4] {
    let mut out = c.map(i16::from);
    if has_hue(space) {
        out[0] = ((c[0] as u32 * 360 + 127) / 255 % 360) as i16;
    }
    out
}

fn narrow(space: ColorSpace, c: [i16; 4]) -> [u8; 4] {
    let mut out = c.map(|v| v.clamp(0, 255) as u8);
    if has_hue(space) {
        out[0] = ((c[0].rem_euclid(360) as u32 * 255 + 180) / 360) as u8;
    }
    out
}

fn convert_bytes(input: ColorSpace, output: ColorSpace, c: [u8; 4]) -> [u8; 4] {
    if input == output {
        return c;
    }
    narrow(output, from_rgb(output, to_rgb(input, widen(input, c))))
}

fn to_byte(sample: u16) -> u8 {
    ((sample.min(MAX_SAMPLE_16) as u32 * 255 + MAX_SAMPLE_16 as u32 / 2) / MAX_SAMPLE_16 as u32) as u8
}

fn to_sample(byte: u8) -> u16 {
    ((byte as u32 * MAX_SAMPLE_16 as u32 + 127) / 255) as u16
}

fn bytes(c: CSColor8) -> [u8; 4] {
    [c.c0, c.c1, c.c2, c.c3]
}

fn color8([c0, c1, c2, c3]: [u8; 4]) -> CSColor8 {
    CSColor8 { c0, c1, c2, c3 }
}

fn narrow16(c: CSColor16) -> CSColor8 {
    CSColor8 {
        c0: to_byte(c.c0),
        c1: to_byte(c.c1),
        c2: to_byte(c.c2),
        c3: to_byte(c.c3),
    }
}

fn widen8(c: CSColor8) -> CSColor16 {
    CSColor16 {
        c0: to_sample(c.c0),
        c1: to_sample(c.c1),
        c2: to_sample(c.c2),
        c3: to_sample(c.c3),
    }
}

/// Plugin-owned colour array as a slice.
///
/// # Safety
/// `colors` must be null or valid for `count` elements.
unsafe fn colors_mut<'a, T>(colors: *mut T, count: i16) -> Option<&'a mut [T]> {
    if colors.is_null() || count < 0 {
        return None;
    }
    // SAFETY: per the caller's contract.
    Some(unsafe { std::slice::from_raw_parts_mut(colors, count as usize) })
}

unsafe extern "C" fn make(color: *mut ColorID) -> SPErr {
    if color.is_null() {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    let made = with_colors(ptr::null_mut(), |table| table.make());
    // SAFETY: checked non-null above.
    unsafe { color.write_unaligned(made) };
    if made.is_null() { K_SP_OUT_OF_MEMORY_ERROR } else { K_SP_NO_ERROR }
}

unsafe extern "C" fn delete(color: *mut ColorID) -> SPErr {
    if color.is_null() {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    // SAFETY: checked non-null above.
    let token = unsafe { color.read_unaligned() };
    let err = with_colors(K_SP_BAD_PARAMETER_ERROR, |table| table.delete(token));
    if err == K_SP_NO_ERROR {
        // SAFETY: checked non-null above.
        unsafe { color.write_unaligned(ptr::null_mut()) };
    }
    err
}

unsafe extern "C" fn stuff_components(color: ColorID, space: ColorSpaceCode, c0: u8, c1: u8, c2: u8, c3: u8) -> SPErr {
    with_colors(K_SP_BAD_PARAMETER_ERROR, |table| table.stuff(color, space, [c0, c1, c2, c3]))
}

unsafe extern "C" fn extract_components(
    color: ColorID,
    space: ColorSpaceCode,
    c0: *mut u8,
    c1: *mut u8,
    c2: *mut u8,
    c3: *mut u8,
    gamut: *mut Boolean,
) -> SPErr {
    match with_colors(Err(K_SP_BAD_PARAMETER_ERROR), |table| table.extract(color, space)) {
        Ok([v0, v1, v2, v3]) => {
            // SAFETY: each pointer is null or writable.
            unsafe {
                write_out(c0, v0);
                write_out(c1, v1);
                write_out(c2, v2);
                write_out(c3, v3);
                write_out(gamut, 0);
            }
            K_SP_NO_ERROR
        }
        Err(err) => err,
    }
}

unsafe extern "C" fn stuff_xyz(_color: ColorID, _xyz: *const std::ffi::c_void) -> SPErr {
    K_SP_UNIMPLEMENTED_ERROR
}

unsafe extern "C" fn extract_xyz(_color: ColorID, _xyz: *mut std::ffi::c_void) -> SPErr {
    K_SP_UNIMPLEMENTED_ERROR
}

unsafe extern "C" fn convert8(input: ColorSpaceCode, output: ColorSpaceCode, colors: *mut CSColor8, count: i16) -> SPErr {
    let (input, output) = match (space_of(input), space_of(output)) {
        (Ok(input), Ok(output)) => (input, output),
        (Err(err), _) | (_, Err(err)) => return err,
    };
    // SAFETY: the plugin passes `count` colours.
    let Some(colors) = (unsafe { colors_mut(colors, count) }) else {
        return K_SP_BAD_PARAMETER_ERROR;
    };
    for color in colors {
        *color = color8(convert_bytes(input, output, bytes(*color)));
    }
    K_SP_NO_ERROR
}

unsafe extern "C" fn convert16(input: ColorSpaceCode, output: ColorSpaceCode, colors: *mut CSColor16, count: i16) -> SPErr {
    let (input, output) = match (space_of(input), space_of(output)) {
        (Ok(input), Ok(output)) => (input, output),
        (Err(err), _) | (_, Err(err)) => return err,
    };
    // SAFETY: the plugin passes `count` colours.
    let Some(colors) = (unsafe { colors_mut(colors, count) }) else {
        return K_SP_BAD_PARAMETER_ERROR;
    };
    if input == output {
        return K_SP_NO_ERROR;
    }
    for color in colors {
        *color = widen8(color8(convert_bytes(input, output, bytes(narrow16(*color)))));
    }
    K_SP_NO_ERROR
}

unsafe extern "C" fn get_native_space(color: ColorID, space: *mut ColorSpaceCode) -> SPErr {
    match with_colors(Err(K_SP_BAD_PARAMETER_ERROR), |table| table.native_space(color)) {
        Ok(native) => {
            // SAFETY: null or writable.
            unsafe { write_out(space, native) };
            K_SP_NO_ERROR
        }
        Err(err) => err,
    }
}

unsafe extern "C" fn is_book_color(_color: ColorID, is_book_color: *mut Boolean) -> SPErr {
    // SAFETY: null or writable.
    unsafe { write_out(is_book_color, 0) };
    K_SP_NO_ERROR
}

unsafe extern "C" fn extract_color_name(_color: ColorID, name: *mut *mut std::ffi::c_void) -> SPErr {
    // SAFETY: null or writable.
    unsafe { write_out(name, ptr::null_mut()) };
    K_SP_UNIMPLEMENTED_ERROR
}

unsafe extern "C" fn pick_color(_color: *mut ColorID, _prompt: *const std::ffi::c_void) -> SPErr {
    K_SP_UNIMPLEMENTED_ERROR
}

unsafe extern "C" fn convert8_to16(input: *const CSColor8, output: *mut CSColor16, count: i16) -> SPErr {
    if input.is_null() || output.is_null() || count < 0 {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    for i in 0..count as usize {
        // SAFETY: both arrays hold `count` colours.
        unsafe { output.add(i).write_unaligned(widen8(input.add(i).read_unaligned())) };
    }
    K_SP_NO_ERROR
}

unsafe extern "C" fn convert16_to8(input: *const CSColor16, output: *mut CSColor8, count: i16) -> SPErr {
    if input.is_null() || output.is_null() || count < 0 {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    for i in 0..count as usize {
        // SAFETY: both arrays hold `count` colours.
        unsafe { output.add(i).write_unaligned(narrow16(input.add(i).read_unaligned())) };
    }
    K_SP_NO_ERROR
}

unsafe extern "C" fn convert_to_monitor_rgb(
    _input_space: ColorSpaceCode,
    _input: *const std::ffi::c_void,
    _output: *mut std::ffi::c_void,
    _count: u32,
) -> SPErr {
    K_SP_UNIMPLEMENTED_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_sdk::procs::*;

    #[test]
    fn stuffed_colors_extract_in_other_spaces() {
        let mut table = ColorTable::default();
        let red = table.make();
        let rgb = PLUG_IN_COLOR_SERVICES_RGB_SPACE as ColorSpaceCode;
        assert_eq!(table.stuff(red, rgb, [255, 0, 0, 0]), K_SP_NO_ERROR);

        let hsb = table.extract(red, PLUG_IN_COLOR_SERVICES_HSB_SPACE as ColorSpaceCode).unwrap();
        assert_eq!(hsb, [0, 255, 255, 0]);
        assert_eq!(table.native_space(red), Ok(rgb));

        let gray = PLUG_IN_COLOR_SERVICES_GRAY_SPACE as ColorSpaceCode;
        assert_eq!(table.stuff(red, gray, [128, 0, 0, 0]), K_SP_NO_ERROR);
        assert_eq!(table.extract(red, rgb), Ok([128, 128, 128, 0]));
        assert_eq!(table.native_space(red), Ok(gray));

        assert_eq!(table.delete(red), K_SP_NO_ERROR);
        assert_eq!(table.delete(red), K_SP_BAD_PARAMETER_ERROR);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn lab_and_unknown_spaces_are_refused() {
        let mut table = ColorTable::default();
        let color = table.make();
        let lab = PLUG_IN_COLOR_SERVICES_LAB_SPACE as ColorSpaceCode;
        assert_eq!(table.stuff(color, lab, [0; 4]), K_SP_UNIMPLEMENTED_ERROR);
        assert_eq!(table.extract(color, 42), Err(K_SP_BAD_PARAMETER_ERROR));
        assert_eq!(table.stuff(ptr::null_mut(), 0, [0; 4]), K_SP_BAD_PARAMETER_ERROR);
    }

    #[test]
    fn batch_conversions_work_in_place() {
        let suite = ColorTable::create_pica_suite1();
        let rgb = PLUG_IN_COLOR_SERVICES_RGB_SPACE as ColorSpaceCode;
        let cmyk = PLUG_IN_COLOR_SERVICES_CMYK_SPACE as ColorSpaceCode;
        let mut colors = [color8([255, 255, 255, 0]), color8([0, 0, 0, 0])];
        // SAFETY: two colours in a live array.
        unsafe {
            assert_eq!(suite.convert8.unwrap()(rgb, cmyk, colors.as_mut_ptr(), 2), K_SP_NO_ERROR);
        }
        assert_eq!(bytes(colors[0]), [255, 255, 255, 255]);
        assert_eq!(bytes(colors[1]), [255, 255, 255, 0]);

        let mut wide = [CSColor16 { c0: 32768, c1: 0, c2: 0, c3: 0 }];
        let gray = PLUG_IN_COLOR_SERVICES_GRAY_SPACE as ColorSpaceCode;
        // SAFETY: one colour in a live array.
        unsafe {
            assert_eq!(suite.convert16.unwrap()(rgb, gray, wide.as_mut_ptr(), 1), K_SP_NO_ERROR);
            assert_eq!(suite.convert16.unwrap()(rgb, 6, wide.as_mut_ptr(), 1), K_SP_UNIMPLEMENTED_ERROR);
        }
        assert_eq!(wide[0].c0, to_sample(76));

        let mut narrowed = [CSColor8::default()];
        // SAFETY: one colour in each array.
        unsafe {
            assert_eq!(suite.convert16_to8.unwrap()(wide.as_ptr(), narrowed.as_mut_ptr(), 1), K_SP_NO_ERROR);
        }
        assert_eq!(narrowed[0].c0, 76);
    }

    #[test]
    fn hue_bytes_cover_the_full_circle() {
        assert_eq!(widen(ColorSpace::Hsb, [255, 0, 0, 0])[0], 0);
        assert_eq!(widen(ColorSpace::Hsb, [128, 0, 0, 0])[0], 181);
        assert_eq!(narrow(ColorSpace::Hsl, [180, 0, 0, 0])[0], 128);
        assert_eq!(narrow(ColorSpace::Rgb, [300, -4, 9, 0]), [255, 0, 9, 0]);
    }
}
