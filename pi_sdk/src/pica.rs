//! SPBasic (PICA) suite acquisition and the suites a host can hand out by name.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

use crate::errors::SPErr;
use crate::procs::{DisplayPixelsProc, GetPropertyProc, ProcessEventProc, ProgressProc, SetPropertyProc, TestAbortProc};
use crate::types::{Boolean, Handle, OSErr, Ptr};

pub const K_PS_BUFFER_SUITE: &CStr = c"Photoshop Buffer Suite for Plug-ins";
pub const K_PS_HANDLE_SUITE: &CStr = c"Photoshop Handle Suite for Plug-ins";
pub const K_PS_PROPERTY_SUITE: &CStr = c"Photoshop Property Suite for Plug-ins";
pub const K_PS_UI_HOOKS_SUITE: &CStr = c"Photoshop UIHooks Suite for Plug-ins";
pub const K_PS_ERROR_SUITE: &CStr = c"Photoshop Error Suite for Plug-ins";
pub const K_PS_COLOR_SPACE_SUITE: &CStr = c"Photoshop ColorSpace Suite for Plug-ins";

/// The basic suite every PICA-aware plugin starts from. `IsEqual` answers
/// with a full `int` so readers of either a byte or an int get the same value.
#[repr(C)]
pub struct SPBasicSuite {
    pub acquire_suite:
        Option<unsafe extern "C" fn(name: *const c_char, version: i32, suite: *mut *const c_void) -> SPErr>,
    pub release_suite: Option<unsafe extern "C" fn(name: *const c_char, version: i32) -> SPErr>,
    pub is_equal: Option<unsafe extern "C" fn(token1: *const c_char, token2: *const c_char) -> i32>,
    pub allocate_block: Option<unsafe extern "C" fn(size: usize, block: *mut *mut c_void) -> SPErr>,
    pub free_block: Option<unsafe extern "C" fn(block: *mut c_void) -> SPErr>,
    pub reallocate_block:
        Option<unsafe extern "C" fn(block: *mut c_void, new_size: usize, new_block: *mut *mut c_void) -> SPErr>,
    pub undefined: Option<unsafe extern "C" fn() -> SPErr>,
}

#[repr(C)]
pub struct PSBufferSuite1 {
    pub new: Option<unsafe extern "C" fn(requested_size: *mut u32, minimum_size: u32) -> Ptr>,
    pub dispose: Option<unsafe extern "C" fn(buffer: *mut Ptr)>,
    pub get_size: Option<unsafe extern "C" fn(buffer: Ptr) -> u32>,
    pub get_space: Option<unsafe extern "C" fn() -> u32>,
}

pub type SetLockProc =
    Option<unsafe extern "C" fn(h: Handle, lock: Boolean, address: *mut Ptr, old_lock: *mut Boolean)>;

#[repr(C)]
pub struct PSHandleSuite1 {
    pub new: Option<unsafe extern "C" fn(size: i32) -> Handle>,
    pub dispose: Option<unsafe extern "C" fn(h: Handle)>,
    pub set_lock: SetLockProc,
    pub get_size: Option<unsafe extern "C" fn(h: Handle) -> i32>,
    pub set_size: Option<unsafe extern "C" fn(h: Handle, size: i32) -> OSErr>,
    pub recover_space: Option<unsafe extern "C" fn(size: i32)>,
}

#[repr(C)]
pub struct PSHandleSuite2 {
    pub new: Option<unsafe extern "C" fn(size: i32) -> Handle>,
    pub dispose: Option<unsafe extern "C" fn(h: Handle)>,
    pub dispose_regular_handle: Option<unsafe extern "C" fn(h: Handle)>,
    pub set_lock: SetLockProc,
    pub get_size: Option<unsafe extern "C" fn(h: Handle) -> i32>,
    pub set_size: Option<unsafe extern "C" fn(h: Handle, size: i32) -> OSErr>,
    pub recover_space: Option<unsafe extern "C" fn(size: i32)>,
}

#[repr(C)]
pub struct PSPropertySuite1 {
    pub get_property_proc: GetPropertyProc,
    pub set_property_proc: SetPropertyProc,
}

#[repr(C)]
pub struct PSUIHooksSuite1 {
    pub process_event: ProcessEventProc,
    pub display_pixels: DisplayPixelsProc,
    pub progress_bar: ProgressProc,
    pub test_abort: TestAbortProc,
    pub main_app_window: Option<unsafe extern "C" fn() -> isize>,
    pub host_set_cursor: Option<unsafe extern "C" fn(cursor: *const c_void) -> SPErr>,
    pub host_tick_count: Option<unsafe extern "C" fn() -> u32>,
    pub plugin_name: Option<unsafe extern "C" fn(plugin_ref: *mut c_void, name: *mut *mut c_void) -> SPErr>,
}

#[repr(C)]
pub struct PSErrorSuite1 {
    pub set_error_from_p_string: Option<unsafe extern "C" fn(error_string: *const u8) -> SPErr>,
    pub set_error_from_c_string: Option<unsafe extern "C" fn(error_string: *const c_char) -> SPErr>,
    pub set_error_from_z_string: Option<unsafe extern "C" fn(error_string: *mut c_void) -> SPErr>,
}

/// Opaque colour token handed out by the ColorSpace suite.
pub type ColorID = *mut c_void;

/// Colour space selector of the ColorSpace suite. A C enum, so `int` sized;
/// the values match the colour services space constants.
pub type ColorSpaceCode = i32;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CSColor8 {
    pub c0: u8,
    pub c1: u8,
    pub c2: u8,
    pub c3: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CSColor16 {
    pub c0: u16,
    pub c1: u16,
    pub c2: u16,
    pub c3: u16,
}

#[repr(C)]
pub struct PSColorSpaceSuite1 {
    pub make: Option<unsafe extern "C" fn(color: *mut ColorID) -> SPErr>,
    pub delete: Option<unsafe extern "C" fn(color: *mut ColorID) -> SPErr>,
    pub stuff_components: Option<
        unsafe extern "C" fn(color: ColorID, space: ColorSpaceCode, c0: u8, c1: u8, c2: u8, c3: u8) -> SPErr,
    >,
    pub extract_components: Option<
        unsafe extern "C" fn(
            color: ColorID,
            space: ColorSpaceCode,
            c0: *mut u8,
            c1: *mut u8,
            c2: *mut u8,
            c3: *mut u8,
            gamut: *mut Boolean,
        ) -> SPErr,
    >,
    pub stuff_xyz: Option<unsafe extern "C" fn(color: ColorID, xyz: *const c_void) -> SPErr>,
    pub extract_xyz: Option<unsafe extern "C" fn(color: ColorID, xyz: *mut c_void) -> SPErr>,
    pub convert8: Option<
        unsafe extern "C" fn(input: ColorSpaceCode, output: ColorSpaceCode, colors: *mut CSColor8, count: i16) -> SPErr,
    >,
    pub convert16: Option<
        unsafe extern "C" fn(input: ColorSpaceCode, output: ColorSpaceCode, colors: *mut CSColor16, count: i16) -> SPErr,
    >,
    pub get_native_space: Option<unsafe extern "C" fn(color: ColorID, space: *mut ColorSpaceCode) -> SPErr>,
    pub is_book_color: Option<unsafe extern "C" fn(color: ColorID, is_book_color: *mut Boolean) -> SPErr>,
    pub extract_color_name: Option<unsafe extern "C" fn(color: ColorID, name: *mut *mut c_void) -> SPErr>,
    pub pick_color: Option<unsafe extern "C" fn(color: *mut ColorID, prompt: *const c_void) -> SPErr>,
    pub convert8_to16: Option<unsafe extern "C" fn(input: *const CSColor8, output: *mut CSColor16, count: i16) -> SPErr>,
    pub convert16_to8: Option<unsafe extern "C" fn(input: *const CSColor16, output: *mut CSColor8, count: i16) -> SPErr>,
    pub convert_to_monitor_rgb: Option<
        unsafe extern "C" fn(input_space: ColorSpaceCode, input: *const c_void, output: *mut c_void, count: u32) -> SPErr,
    >,
}
