//! Binary interface of 8bf image-filter plugins.
//!
//! Everything here is `#[repr(C)]` and laid out field-for-field as the
//! plugin reads it. Hosts and plugins both build on these definitions so the
//! layout has a single source of truth.

pub mod descriptor;
pub mod errors;
pub mod filter_record;
pub mod pica;
pub mod procs;
pub mod properties;
pub mod types;

use std::os::raw::c_void;

pub use filter_record::{AboutRecord, BigDocumentStruct, FilterRecord};
pub use types::{FilterCaseInfo, Handle, OSErr, Point, Rect, VPoint, VRect, four_cc};

/// Signature of every 8bf entry point:
/// `void EntryPoint(short selector, void* paramBlock, intptr_t* data, short* result)`.
pub type PluginEntryPoint =
    unsafe extern "C" fn(selector: i16, param_block: *mut c_void, data: *mut isize, result: *mut i16);

/// Signature hosts report in `FilterRecord::host_sig`.
pub const HOST_SIGNATURE: u32 = four_cc(b"8BIM");

/// Signature of the legacy double-indirect parameter block.
pub const OTOF_SIGNATURE: u32 = four_cc(b"OTOF");
