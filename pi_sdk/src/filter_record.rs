//! The `FilterRecord` parameter block and its companion records.
//!
//! Field order follows the 8bf SDK through version 13. Padding between
//! fields is the natural C alignment of the target, which is what
//! `#[repr(C)]` produces.

use std::os::raw::c_void;

use crate::descriptor::PIDescriptorParameters;
use crate::pica::SPBasicSuite;
use crate::procs::{
    AdvanceStateProc, BufferProcs, ChannelPortProcs, ColorServicesProc, DisplayPixelsProc, GetPropertyProc,
    HandleProcs, HostProc, ImageServicesProcs, ProcessEventProc, ProgressProc, PropertyProcs,
    ReadImageDocumentDesc, ResourceProcs, TestAbortProc,
};
use crate::types::{
    Boolean, Fixed, FilterColor, Handle, OSType, PlugInMonitor, Point, RGBColor, Rect, Str255, VPoint, VRect,
};

pub const FILTER_SELECTOR_ABOUT: i16 = 0;
pub const FILTER_SELECTOR_PARAMETERS: i16 = 1;
pub const FILTER_SELECTOR_PREPARE: i16 = 2;
pub const FILTER_SELECTOR_START: i16 = 3;
pub const FILTER_SELECTOR_CONTINUE: i16 = 4;
pub const FILTER_SELECTOR_FINISH: i16 = 5;

pub const PLUG_IN_MODE_BITMAP: i16 = 0;
pub const PLUG_IN_MODE_GRAY_SCALE: i16 = 1;
pub const PLUG_IN_MODE_INDEXED_COLOR: i16 = 2;
pub const PLUG_IN_MODE_RGB_COLOR: i16 = 3;
pub const PLUG_IN_MODE_CMYK_COLOR: i16 = 4;
pub const PLUG_IN_MODE_HSL_COLOR: i16 = 5;
pub const PLUG_IN_MODE_HSB_COLOR: i16 = 6;
pub const PLUG_IN_MODE_MULTICHANNEL: i16 = 7;
pub const PLUG_IN_MODE_DUOTONE: i16 = 8;
pub const PLUG_IN_MODE_LAB_COLOR: i16 = 9;
pub const PLUG_IN_MODE_GRAY16: i16 = 10;
pub const PLUG_IN_MODE_RGB48: i16 = 11;

pub const FILTER_CASE_UNSUPPORTED: i16 = -1;
pub const FILTER_CASE_FLAT_IMAGE_NO_SELECTION: i16 = 1;
pub const FILTER_CASE_FLAT_IMAGE_WITH_SELECTION: i16 = 2;
pub const FILTER_CASE_FLOATING_SELECTION: i16 = 3;
pub const FILTER_CASE_EDITABLE_TRANSPARENCY_NO_SELECTION: i16 = 4;
pub const FILTER_CASE_EDITABLE_TRANSPARENCY_WITH_SELECTION: i16 = 5;
pub const FILTER_CASE_PROTECTED_TRANSPARENCY_NO_SELECTION: i16 = 6;
pub const FILTER_CASE_PROTECTED_TRANSPARENCY_WITH_SELECTION: i16 = 7;

pub const FILTER_DATA_HANDLING_CANT_FILTER: u8 = 0;
pub const FILTER_DATA_HANDLING_NONE: u8 = 1;
pub const FILTER_DATA_HANDLING_BLACK_MAT: u8 = 2;
pub const FILTER_DATA_HANDLING_GRAY_MAT: u8 = 3;
pub const FILTER_DATA_HANDLING_WHITE_MAT: u8 = 4;
pub const FILTER_DATA_HANDLING_DEFRINGE: u8 = 5;
pub const FILTER_DATA_HANDLING_BLACK_ZAP: u8 = 6;
pub const FILTER_DATA_HANDLING_GRAY_ZAP: u8 = 7;
pub const FILTER_DATA_HANDLING_WHITE_ZAP: u8 = 8;
pub const FILTER_DATA_HANDLING_FILL_MASK: u8 = 9;
pub const FILTER_DATA_HANDLING_BACKGROUND_ZAP: u8 = 10;
pub const FILTER_DATA_HANDLING_FOREGROUND_ZAP: u8 = 11;

pub const PI_FILTER_DONT_COPY_TO_DESTINATION_BIT: u8 = 1 << 0;
pub const PI_FILTER_WORKS_WITH_BLANK_DATA_BIT: u8 = 1 << 1;
pub const PI_FILTER_FILTERS_LAYER_MASK_BIT: u8 = 1 << 2;
pub const PI_FILTER_WRITES_OUTSIDE_SELECTION_BIT: u8 = 1 << 3;

pub const PLUG_IN_WANTS_EDGE_REPLICATION: i16 = -1;
pub const PLUG_IN_DOES_NOT_WANT_PADDING: i16 = -2;
pub const PLUG_IN_WANTS_ERROR_ON_BOUNDS_EXCEPTION: i16 = -3;

pub const HOST_DOES_NOT_SUPPORT_SAMPLING: i8 = 0;
pub const HOST_SUPPORTS_INTEGRAL_SAMPLING: i8 = 1;
pub const HOST_SUPPORTS_FRACTIONAL_SAMPLING: i8 = 2;

/// 32-bit coordinate mirror of the geometry fields, for documents larger
/// than 32767 pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BigDocumentStruct {
    pub plugin_using_32_bit_coordinates: i32,
    pub image_size_32: VPoint,
    pub filter_rect_32: VRect,
    pub in_rect_32: VRect,
    pub out_rect_32: VRect,
    pub mask_rect_32: VRect,
    pub float_coord_32: VPoint,
    pub whole_size_32: VPoint,
}

/// Parameter block of the About selector.
#[repr(C)]
pub struct AboutRecord {
    pub platform_data: *mut c_void,
    pub s_sp_basic: *mut SPBasicSuite,
    pub plug_in_ref: *mut c_void,
    pub reserved: [u8; 244],
}

#[repr(C)]
pub struct FilterRecord {
    pub serial_number: i32,
    pub abort_proc: TestAbortProc,
    pub progress_proc: ProgressProc,
    pub parameters: Handle,
    pub image_size: Point,
    pub planes: i16,
    pub filter_rect: Rect,
    pub background: RGBColor,
    pub foreground: RGBColor,
    pub max_space: i32,
    pub buffer_space: i32,
    pub in_rect: Rect,
    pub in_lo_plane: i16,
    pub in_hi_plane: i16,
    pub out_rect: Rect,
    pub out_lo_plane: i16,
    pub out_hi_plane: i16,
    pub in_data: *mut c_void,
    pub in_row_bytes: i32,
    pub out_data: *mut c_void,
    pub out_row_bytes: i32,
    pub is_floating: Boolean,
    pub have_mask: Boolean,
    pub auto_mask: Boolean,
    pub mask_rect: Rect,
    pub mask_data: *mut c_void,
    pub mask_row_bytes: i32,
    pub back_color: FilterColor,
    pub fore_color: FilterColor,
    pub host_sig: OSType,
    pub host_proc: HostProc,
    pub image_mode: i16,
    pub image_h_res: Fixed,
    pub image_v_res: Fixed,
    pub float_coord: Point,
    pub whole_size: Point,
    pub monitor: PlugInMonitor,
    pub platform_data: *mut c_void,
    pub buffer_procs: *mut BufferProcs,
    pub resource_procs: *mut ResourceProcs,
    pub process_event: ProcessEventProc,
    pub display_pixels: DisplayPixelsProc,
    pub handle_procs: *mut HandleProcs,

    pub supports_dummy_channels: Boolean,
    pub supports_alternate_layouts: Boolean,
    pub want_layout: i16,
    pub filter_case: i16,
    pub dummy_plane_value: i16,
    pub premiere_hook: *mut c_void,
    pub advance_state: AdvanceStateProc,
    pub supports_absolute: Boolean,
    pub wants_absolute: Boolean,
    pub get_property_obsolete: GetPropertyProc,
    pub cannot_undo: Boolean,
    pub supports_padding: Boolean,
    pub input_padding: i16,
    pub output_padding: i16,
    pub mask_padding: i16,
    pub sampling_support: i8,
    pub reserved_byte: i8,
    pub input_rate: Fixed,
    pub mask_rate: Fixed,
    pub color_services: ColorServicesProc,
    pub in_layer_planes: i16,
    pub in_transparency_mask: i16,
    pub in_layer_masks: i16,
    pub in_inverted_layer_masks: i16,
    pub in_non_layer_planes: i16,
    pub out_layer_planes: i16,
    pub out_transparency_mask: i16,
    pub out_layer_masks: i16,
    pub out_inverted_layer_masks: i16,
    pub out_non_layer_planes: i16,
    pub abs_layer_planes: i16,
    pub abs_transparency_mask: i16,
    pub abs_layer_masks: i16,
    pub abs_inverted_layer_masks: i16,
    pub abs_non_layer_planes: i16,
    pub in_pre_dummy_planes: i16,
    pub in_post_dummy_planes: i16,
    pub out_pre_dummy_planes: i16,
    pub out_post_dummy_planes: i16,
    pub in_column_bytes: i32,
    pub in_plane_bytes: i32,
    pub out_column_bytes: i32,
    pub out_plane_bytes: i32,

    pub image_services_procs: *mut ImageServicesProcs,
    pub property_procs: *mut PropertyProcs,
    pub in_tile_height: i16,
    pub in_tile_width: i16,
    pub in_tile_origin: Point,
    pub abs_tile_height: i16,
    pub abs_tile_width: i16,
    pub abs_tile_origin: Point,
    pub out_tile_height: i16,
    pub out_tile_width: i16,
    pub out_tile_origin: Point,
    pub mask_tile_height: i16,
    pub mask_tile_width: i16,
    pub mask_tile_origin: Point,

    pub descriptor_parameters: *mut PIDescriptorParameters,
    pub error_string: *mut Str255,
    pub channel_port_procs: *mut ChannelPortProcs,
    pub document_info: *mut ReadImageDocumentDesc,

    pub s_sp_basic: *mut SPBasicSuite,
    pub plug_in_ref: *mut c_void,
    pub depth: i32,

    pub icc_profile_data: Handle,
    pub icc_profile_size: i32,
    pub can_use_icc_profiles: i32,

    pub has_image_scrap: i32,
    pub big_document_data: *mut BigDocumentStruct,

    pub input_3d_scene: *mut c_void,
    pub output_3d_scene: *mut c_void,
    pub create_new_layer: Boolean,

    pub icc_working_profile_data: Handle,
    pub icc_working_profile_size: i32,
    pub buffer_space_64: i64,
    pub max_space_64: i64,
    pub reserved: [u8; 128],
}

impl FilterRecord {
    /// An all-zero record: every pointer null, every proc absent.
    pub fn zeroed() -> Self {
        // SAFETY: every field is an integer, a raw pointer, an `Option` of a
        // function pointer or an array of those; all-zero is a valid value
        // (null / `None` / 0) for each of them.
        unsafe { std::mem::zeroed() }
    }
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use crate::pica::{CSColor16, PSColorSpaceSuite1};
    use std::mem::{offset_of, size_of};

    #[test]
    fn leading_fields_match_the_sdk_offsets() {
        assert_eq!(offset_of!(FilterRecord, serial_number), 0);
        assert_eq!(offset_of!(FilterRecord, abort_proc), 8);
        assert_eq!(offset_of!(FilterRecord, progress_proc), 16);
        assert_eq!(offset_of!(FilterRecord, parameters), 24);
        assert_eq!(offset_of!(FilterRecord, image_size), 32);
        assert_eq!(offset_of!(FilterRecord, planes), 36);
        assert_eq!(offset_of!(FilterRecord, filter_rect), 38);
        assert_eq!(offset_of!(FilterRecord, background), 46);
        assert_eq!(offset_of!(FilterRecord, foreground), 52);
        assert_eq!(offset_of!(FilterRecord, max_space), 60);
        assert_eq!(offset_of!(FilterRecord, buffer_space), 64);
        assert_eq!(offset_of!(FilterRecord, in_rect), 68);
        assert_eq!(offset_of!(FilterRecord, out_rect), 80);
        assert_eq!(offset_of!(FilterRecord, in_data), 96);
        assert_eq!(offset_of!(FilterRecord, in_row_bytes), 104);
        assert_eq!(offset_of!(FilterRecord, out_data), 112);
        assert_eq!(offset_of!(FilterRecord, out_row_bytes), 120);
        assert_eq!(offset_of!(FilterRecord, is_floating), 124);
        assert_eq!(offset_of!(FilterRecord, mask_rect), 128);
        assert_eq!(offset_of!(FilterRecord, mask_data), 136);
        assert_eq!(offset_of!(FilterRecord, mask_row_bytes), 144);
        assert_eq!(offset_of!(FilterRecord, back_color), 148);
        assert_eq!(offset_of!(FilterRecord, host_sig), 156);
        assert_eq!(offset_of!(FilterRecord, host_proc), 160);
    }

    #[test]
    fn small_records_have_packed_sizes() {
        assert_eq!(size_of::<Rect>(), 8);
        assert_eq!(size_of::<Point>(), 4);
        assert_eq!(size_of::<RGBColor>(), 6);
        assert_eq!(size_of::<VRect>(), 16);
        assert_eq!(size_of::<PlugInMonitor>(), 40);
        assert_eq!(size_of::<BigDocumentStruct>(), 4 + 8 + 16 * 4 + 8 + 8);
        assert_eq!(size_of::<AboutRecord>(), 24 + 244 + 4);
    }

    #[test]
    fn procsets_start_with_version_and_count() {
        assert_eq!(offset_of!(HandleProcs, new_proc), 8);
        assert_eq!(size_of::<HandleProcs>(), 8 + 8 * 8);
        assert_eq!(size_of::<BufferProcs>(), 8 + 5 * 8);
        assert_eq!(size_of::<SPBasicSuite>(), 7 * 8);
        assert_eq!(size_of::<PSColorSpaceSuite1>(), 15 * 8);
        assert_eq!(size_of::<CSColor16>(), 8);
    }
}
