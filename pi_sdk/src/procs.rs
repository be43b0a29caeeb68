//! Callback procsets published through the `FilterRecord`.
//!
//! Every procset starts with a version and a function count followed by
//! nullable function pointers, in the order the plugin indexes them.

use std::os::raw::{c_char, c_void};

use crate::types::{Boolean, BufferID, Fixed, Handle, OSErr, Point, Ptr, Rect, ResType, Str255, VPoint, VRect};

pub type TestAbortProc = Option<unsafe extern "C" fn() -> Boolean>;
pub type ProgressProc = Option<unsafe extern "C" fn(done: i32, total: i32)>;
pub type HostProc = Option<unsafe extern "C" fn(selector: i16, data: *mut isize)>;
pub type ProcessEventProc = Option<unsafe extern "C" fn(event: *mut c_void)>;
pub type DisplayPixelsProc = Option<
    unsafe extern "C" fn(
        source: *const PSPixelMap,
        src_rect: *const VRect,
        dst_row: i32,
        dst_col: i32,
        platform_context: *mut c_void,
    ) -> OSErr,
>;
pub type AdvanceStateProc = Option<unsafe extern "C" fn() -> OSErr>;
pub type ColorServicesProc = Option<unsafe extern "C" fn(info: *mut ColorServicesInfo) -> OSErr>;
pub type GetPropertyProc = Option<
    unsafe extern "C" fn(signature: u32, key: u32, index: i32, simple: *mut isize, complex: *mut Handle) -> OSErr,
>;
pub type SetPropertyProc =
    Option<unsafe extern "C" fn(signature: u32, key: u32, index: i32, simple: isize, complex: Handle) -> OSErr>;

pub const K_CURRENT_BUFFER_PROCS_VERSION: i16 = 2;
pub const K_CURRENT_BUFFER_PROCS_COUNT: i16 = 5;

#[repr(C)]
pub struct BufferProcs {
    pub buffer_procs_version: i16,
    pub num_buffer_procs: i16,
    pub allocate_proc: Option<unsafe extern "C" fn(size: i32, buffer_id: *mut BufferID) -> OSErr>,
    pub lock_proc: Option<unsafe extern "C" fn(buffer_id: BufferID, move_high: Boolean) -> Ptr>,
    pub unlock_proc: Option<unsafe extern "C" fn(buffer_id: BufferID)>,
    pub free_proc: Option<unsafe extern "C" fn(buffer_id: BufferID)>,
    pub space_proc: Option<unsafe extern "C" fn() -> i32>,
}

pub const K_CURRENT_HANDLE_PROCS_VERSION: i16 = 1;
pub const K_CURRENT_HANDLE_PROCS_COUNT: i16 = 8;

#[repr(C)]
pub struct HandleProcs {
    pub handle_procs_version: i16,
    pub num_handle_procs: i16,
    pub new_proc: Option<unsafe extern "C" fn(size: i32) -> Handle>,
    pub dispose_proc: Option<unsafe extern "C" fn(h: Handle)>,
    pub get_size_proc: Option<unsafe extern "C" fn(h: Handle) -> i32>,
    pub set_size_proc: Option<unsafe extern "C" fn(h: Handle, size: i32) -> OSErr>,
    pub lock_proc: Option<unsafe extern "C" fn(h: Handle, move_high: Boolean) -> Ptr>,
    pub unlock_proc: Option<unsafe extern "C" fn(h: Handle)>,
    pub recover_space_proc: Option<unsafe extern "C" fn(size: i32)>,
    pub dispose_regular_handle_proc: Option<unsafe extern "C" fn(h: Handle)>,
}

/// One plane of image data handed to the image services interpolators.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PSImagePlane {
    pub data: *mut c_void,
    pub bounds: Rect,
    pub row_bytes: i32,
    pub col_bytes: i32,
}

pub const K_CURRENT_IMAGE_SERVICES_PROCS_VERSION: i16 = 1;
pub const K_CURRENT_IMAGE_SERVICES_PROCS_COUNT: i16 = 2;

pub const POINT_SAMPLING: i16 = 0;
pub const LINEAR_SAMPLING: i16 = 1;
pub const BICUBIC_SAMPLING: i16 = 2;

pub type InterpolateProc = Option<
    unsafe extern "C" fn(
        source: *mut PSImagePlane,
        destination: *mut PSImagePlane,
        area: *mut Rect,
        coords: *mut Fixed,
        method: i16,
    ) -> OSErr,
>;

#[repr(C)]
pub struct ImageServicesProcs {
    pub image_services_procs_version: i16,
    pub num_image_services_procs: i16,
    pub interpolate_1d_proc: InterpolateProc,
    pub interpolate_2d_proc: InterpolateProc,
}

pub const K_CURRENT_PROPERTY_PROCS_VERSION: i16 = 1;
pub const K_CURRENT_PROPERTY_PROCS_COUNT: i16 = 2;

#[repr(C)]
pub struct PropertyProcs {
    pub property_procs_version: i16,
    pub num_property_procs: i16,
    pub get_property_proc: GetPropertyProc,
    pub set_property_proc: SetPropertyProc,
}

pub const K_CURRENT_RESOURCE_PROCS_VERSION: i16 = 3;
pub const K_CURRENT_RESOURCE_PROCS_COUNT: i16 = 4;

#[repr(C)]
pub struct ResourceProcs {
    pub resource_procs_version: i16,
    pub num_resource_procs: i16,
    pub count_proc: Option<unsafe extern "C" fn(of_type: ResType) -> i16>,
    pub get_proc: Option<unsafe extern "C" fn(of_type: ResType, index: i16) -> Handle>,
    pub delete_proc: Option<unsafe extern "C" fn(of_type: ResType, index: i16)>,
    pub add_proc: Option<unsafe extern "C" fn(of_type: ResType, data: Handle) -> OSErr>,
}

/// Opaque channel port token.
pub type PIChannelPort = *mut c_void;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PSScaling {
    pub source_rect: VRect,
    pub destination_rect: VRect,
}

/// Destination or source memory for channel-port transfers, strides in bits.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PixelMemoryDesc {
    pub data: *mut c_void,
    pub row_bits: i32,
    pub col_bits: i32,
    pub bit_offset: i32,
    pub depth: i32,
}

pub const K_CURRENT_CHANNEL_PORT_PROCS_VERSION: i16 = 1;
pub const K_CURRENT_CHANNEL_PORT_PROCS_COUNT: i16 = 3;

#[repr(C)]
pub struct ChannelPortProcs {
    pub channel_port_procs_version: i16,
    pub num_channel_port_procs: i16,
    pub read_pixels_proc: Option<
        unsafe extern "C" fn(
            port: PIChannelPort,
            scaling: *const PSScaling,
            write_rect: *const VRect,
            destination: *const PixelMemoryDesc,
            wrote_rect: *mut VRect,
        ) -> OSErr,
    >,
    pub write_base_pixels_proc: Option<
        unsafe extern "C" fn(port: PIChannelPort, write_rect: *const VRect, source: *const PixelMemoryDesc) -> OSErr,
    >,
    pub read_port_for_write_port_proc:
        Option<unsafe extern "C" fn(read_port: *mut PIChannelPort, write_port: PIChannelPort) -> OSErr>,
}

pub const CT_UNSPECIFIED: i16 = 0;
pub const CT_RED: i16 = 1;
pub const CT_GREEN: i16 = 2;
pub const CT_BLUE: i16 = 3;
pub const CT_CYAN: i16 = 4;
pub const CT_MAGENTA: i16 = 5;
pub const CT_YELLOW: i16 = 6;
pub const CT_BLACK: i16 = 7;
pub const CT_TRANSPARENCY: i16 = 16;
pub const CT_LAYER_MASK: i16 = 17;
pub const CT_SELECTION_MASK: i16 = 19;
pub const CT_BLACK_AND_WHITE: i16 = 20;

#[repr(C)]
pub struct ReadChannelDesc {
    pub min_version: i32,
    pub max_version: i32,
    pub next: *mut ReadChannelDesc,
    pub port: PIChannelPort,
    pub bounds: VRect,
    pub depth: i32,
    pub tile_size: VPoint,
    pub tile_origin: VPoint,
    pub target: Boolean,
    pub shown: Boolean,
    pub channel_type: i16,
    pub context_info: *mut c_void,
    pub name: *const c_char,
    pub write_port: PIChannelPort,
}

pub type LookUpTable = [u8; 256];

#[repr(C)]
pub struct ReadImageDocumentDesc {
    pub min_version: i32,
    pub max_version: i32,
    pub image_mode: i32,
    pub depth: i32,
    pub bounds: VRect,
    pub h_resolution: Fixed,
    pub v_resolution: Fixed,
    pub red_lut: LookUpTable,
    pub green_lut: LookUpTable,
    pub blue_lut: LookUpTable,
    pub target_composite_channels: *mut ReadChannelDesc,
    pub target_transparency: *mut ReadChannelDesc,
    pub target_layer_mask: *mut ReadChannelDesc,
    pub merged_composite_channels: *mut ReadChannelDesc,
    pub merged_transparency: *mut ReadChannelDesc,
    pub merged_layer_mask: *mut ReadChannelDesc,
    pub alpha_channels: *mut ReadChannelDesc,
    pub selection: *mut ReadChannelDesc,
}

pub const PLUG_IN_COLOR_SERVICES_CHOOSE_COLOR: i16 = 0;
pub const PLUG_IN_COLOR_SERVICES_CONVERT_COLOR: i16 = 1;
pub const PLUG_IN_COLOR_SERVICES_SAMPLE_POINT: i16 = 2;
pub const PLUG_IN_COLOR_SERVICES_GET_SPECIAL_COLOR: i16 = 3;

pub const PLUG_IN_COLOR_SERVICES_CHOSEN_SPACE: i16 = -1;
pub const PLUG_IN_COLOR_SERVICES_RGB_SPACE: i16 = 0;
pub const PLUG_IN_COLOR_SERVICES_HSB_SPACE: i16 = 1;
pub const PLUG_IN_COLOR_SERVICES_CMYK_SPACE: i16 = 2;
pub const PLUG_IN_COLOR_SERVICES_LAB_SPACE: i16 = 3;
pub const PLUG_IN_COLOR_SERVICES_GRAY_SPACE: i16 = 4;
pub const PLUG_IN_COLOR_SERVICES_HSL_SPACE: i16 = 5;
pub const PLUG_IN_COLOR_SERVICES_XYZ_SPACE: i16 = 6;

pub const PLUG_IN_COLOR_SERVICES_BACKGROUND_COLOR: i32 = 0;
pub const PLUG_IN_COLOR_SERVICES_FOREGROUND_COLOR: i32 = 1;

#[repr(C)]
#[derive(Clone, Copy)]
pub union SelectorParameter {
    pub picker_prompt: *mut Str255,
    pub global_sample_point: *mut Point,
    pub special_color_id: i32,
}

#[repr(C)]
pub struct ColorServicesInfo {
    pub info_size: i32,
    pub selector: i16,
    pub source_space: i16,
    pub result_space: i16,
    pub result_gamut_info_valid: Boolean,
    pub result_in_gamut: Boolean,
    pub reserved_source_space_info: *mut c_void,
    pub reserved_result_space_info: *mut c_void,
    pub color_components: [i16; 4],
    pub reserved: *mut c_void,
    pub selector_parameter: SelectorParameter,
}

#[repr(C)]
pub struct PSPixelMask {
    pub next: *mut PSPixelMask,
    pub mask_data: *mut c_void,
    pub row_bytes: i32,
    pub col_bytes: i32,
    pub mask_description: i32,
}

pub const K_SIMPLE_MASK: i32 = 0;
pub const K_BLACK_MAT_MASK: i32 = 1;
pub const K_GRAY_MAT_MASK: i32 = 2;
pub const K_WHITE_MAT_MASK: i32 = 3;

#[repr(C)]
pub struct PSPixelMap {
    pub version: i32,
    pub bounds: VRect,
    pub image_mode: i32,
    pub row_bytes: i32,
    pub col_bytes: i32,
    pub plane_bytes: i32,
    pub base_addr: *mut c_void,
    pub mat: *mut PSPixelMask,
    pub masks: *mut PSPixelMask,
    pub mask_phase_row: i32,
    pub mask_phase_col: i32,
    pub pixel_overlays: *mut c_void,
    pub color_management_options: u32,
}
