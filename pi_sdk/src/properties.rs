//! Property keys answered by the property procs.

use crate::types::four_cc;

/// Signature every host property is registered under.
pub const K_PHOTOSHOP_SIGNATURE: u32 = four_cc(b"8BIM");

pub const PROP_BIG_NUDGE_H: u32 = four_cc(b"bndH");
pub const PROP_BIG_NUDGE_V: u32 = four_cc(b"bndV");
pub const PROP_CAPTION: u32 = four_cc(b"capt");
pub const PROP_CHANNEL_NAME: u32 = four_cc(b"nmch");
pub const PROP_COPYRIGHT: u32 = four_cc(b"cpyr");
pub const PROP_COPYRIGHT2: u32 = four_cc(b"cpyR");
pub const PROP_DOCUMENT_HEIGHT: u32 = four_cc(b"docH");
pub const PROP_DOCUMENT_WIDTH: u32 = four_cc(b"docW");
pub const PROP_EXIF_DATA: u32 = four_cc(b"EXIF");
pub const PROP_GRID_MAJOR: u32 = four_cc(b"grmj");
pub const PROP_GRID_MINOR: u32 = four_cc(b"grmn");
pub const PROP_IMAGE_MODE: u32 = four_cc(b"mode");
pub const PROP_INTERPOLATION_METHOD: u32 = four_cc(b"intp");
pub const PROP_NUMBER_OF_CHANNELS: u32 = four_cc(b"nuch");
pub const PROP_NUMBER_OF_PATHS: u32 = four_cc(b"nupa");
pub const PROP_RULER_UNITS: u32 = four_cc(b"rulr");
pub const PROP_SERIAL_STRING: u32 = four_cc(b"sstr");
pub const PROP_SERIAL_STRING2: u32 = four_cc(b"sstR");
pub const PROP_TITLE: u32 = four_cc(b"titl");
pub const PROP_TOOL_TIPS: u32 = four_cc(b"tltp");
pub const PROP_URL: u32 = four_cc(b"URL ");
pub const PROP_UNICODE_CHANNEL_NAME: u32 = four_cc(b"unch");
pub const PROP_WATCH_SUSPENSION: u32 = four_cc(b"wtch");
pub const PROP_WATERMARK: u32 = four_cc(b"watr");
pub const PROP_XMP_DATA: u32 = four_cc(b"xmpd");
pub const PROP_HOST_NAME: u32 = four_cc(b"hstN");
pub const PROP_DOCUMENT_ID: u32 = four_cc(b"dcid");

pub const K_RULER_PIXELS: i32 = 0;
pub const K_RULER_INCHES: i32 = 1;
pub const K_RULER_CM: i32 = 2;

pub const K_NEAREST_NEIGHBOR: i32 = 1;
pub const K_BILINEAR: i32 = 2;
pub const K_BICUBIC: i32 = 3;
