//! Scalar and small aggregate types shared by every 8bf structure.

use std::os::raw::{c_char, c_void};

/// Mac-style error code returned by entry points and most callbacks.
pub type OSErr = i16;
/// 16.16 fixed-point number.
pub type Fixed = i32;
/// Single-byte boolean (`0` false, anything else true).
pub type Boolean = u8;
/// Four character code.
pub type OSType = u32;
/// Four character resource type.
pub type ResType = u32;
/// Four character descriptor type.
pub type DescType = u32;
/// Raw memory block.
pub type Ptr = *mut c_char;
/// Pointer to a master pointer; `*handle` is the data block.
pub type Handle = *mut Ptr;
/// Opaque buffer-suite identifier.
pub type BufferID = *mut c_void;

/// Builds a FourCC from its four ASCII characters, most significant first.
pub const fn four_cc(code: &[u8; 4]) -> u32 {
    ((code[0] as u32) << 24) | ((code[1] as u32) << 16) | ((code[2] as u32) << 8) | code[3] as u32
}

/// Printable form of a FourCC; bytes outside ASCII show as `?`.
pub fn four_cc_to_string(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Converts an integer to 16.16 fixed point.
pub const fn int_to_fixed(value: i32) -> Fixed {
    value << 16
}

/// Integer part of a 16.16 fixed-point value.
pub const fn fixed_to_int(value: Fixed) -> i32 {
    value >> 16
}

/// Converts a floating point value to 16.16 fixed point, rounding to nearest.
pub fn double_to_fixed(value: f64) -> Fixed {
    (value * 65536.0).round() as Fixed
}

/// Converts 16.16 fixed point to a floating point value.
pub fn fixed_to_double(value: Fixed) -> f64 {
    value as f64 / 65536.0
}

/// Quickdraw point, vertical coordinate first.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub v: i16,
    pub h: i16,
}

/// Quickdraw rectangle with 16-bit coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

impl Rect {
    pub const fn new(top: i16, left: i16, bottom: i16, right: i16) -> Self {
        Self { top, left, bottom, right }
    }

    /// An empty rectangle has no area; plugins signal "nothing requested" with it.
    pub const fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub fn to_vrect(self) -> VRect {
        VRect {
            top: self.top as i32,
            left: self.left as i32,
            bottom: self.bottom as i32,
            right: self.right as i32,
        }
    }
}

/// 32-bit point used by the big-document fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VPoint {
    pub v: i32,
    pub h: i32,
}

/// 32-bit rectangle used by the big-document fields and channel ports.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VRect {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl VRect {
    pub const fn new(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Self { top, left, bottom, right }
    }

    pub const fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Saturating conversion to 16-bit coordinates.
    pub fn to_rect(self) -> Rect {
        let clamp = |v: i32| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        Rect {
            top: clamp(self.top),
            left: clamp(self.left),
            bottom: clamp(self.bottom),
            right: clamp(self.right),
        }
    }
}

/// 16-bit per component colour, `0..=65535`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RGBColor {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl RGBColor {
    /// Expands 8-bit components by replicating the byte.
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            red: r as u16 * 257,
            green: g as u16 * 257,
            blue: b as u16 * 257,
        }
    }
}

/// Colour in the image's native colour space, one byte per plane.
pub type FilterColor = [u8; 4];

/// Monitor description, all values 16.16 fixed point.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlugInMonitor {
    pub gamma: Fixed,
    pub red_x: Fixed,
    pub red_y: Fixed,
    pub green_x: Fixed,
    pub green_y: Fixed,
    pub blue_x: Fixed,
    pub blue_y: Fixed,
    pub white_x: Fixed,
    pub white_y: Fixed,
    pub ambient: Fixed,
}

impl PlugInMonitor {
    /// sRGB primaries with a 2.2 gamma, the values a plugin expects on an
    /// uncalibrated display.
    pub fn srgb() -> Self {
        Self {
            gamma: double_to_fixed(2.2),
            red_x: double_to_fixed(0.64),
            red_y: double_to_fixed(0.33),
            green_x: double_to_fixed(0.30),
            green_y: double_to_fixed(0.60),
            blue_x: double_to_fixed(0.15),
            blue_y: double_to_fixed(0.06),
            white_x: double_to_fixed(0.3127),
            white_y: double_to_fixed(0.3290),
            ambient: int_to_fixed(1),
        }
    }
}

/// Windows platform data; `hwnd` is the parent window for plugin dialogs.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PlatformData {
    pub hwnd: isize,
}

/// One entry of a plugin's `FilterCaseInfo` PiPL property.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterCaseInfo {
    pub input_handling: u8,
    pub output_handling: u8,
    pub flags1: u8,
    pub flags2: u8,
}

/// Pascal string: length byte followed by up to 255 characters.
pub type Str255 = [u8; 256];

/// Copies `text` into a Pascal string, truncating to 255 bytes.
pub fn to_pascal_string(text: &[u8], dest: &mut Str255) {
    let len = text.len().min(255);
    dest[0] = len as u8;
    dest[1..=len].copy_from_slice(&text[..len]);
}

/// Reads the bytes of a Pascal string.
pub fn from_pascal_string(src: &Str255) -> &[u8] {
    let len = src[0] as usize;
    &src[1..=len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_cc_is_big_endian() {
        assert_eq!(four_cc(b"8BIM"), 0x3842_494d);
        assert_eq!(four_cc(b"OTOF"), 0x4f54_4f46);
    }

    #[test]
    fn fixed_conversions() {
        assert_eq!(int_to_fixed(3), 196_608);
        assert_eq!(fixed_to_int(int_to_fixed(-2)), -2);
        assert_eq!(fixed_to_double(double_to_fixed(72.5)), 72.5);
    }

    #[test]
    fn empty_rects() {
        assert!(Rect::default().is_empty());
        assert!(Rect::new(0, 5, 4, 5).is_empty());
        assert!(!Rect::new(0, 0, 1, 1).is_empty());
        assert_eq!(VRect::new(1, 2, 11, 32).width(), 30);
    }

    #[test]
    fn pascal_strings_truncate() {
        let mut buf: Str255 = [0; 256];
        let long = vec![b'x'; 300];
        to_pascal_string(&long, &mut buf);
        assert_eq!(buf[0], 255);
        assert_eq!(from_pascal_string(&buf).len(), 255);

        to_pascal_string(b"Bad", &mut buf);
        assert_eq!(from_pascal_string(&buf), b"Bad");
    }
}
