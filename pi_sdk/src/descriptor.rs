//! Scripting descriptor parameters and the read/write descriptor procsets.

use std::os::raw::c_void;

use crate::types::{Boolean, DescType, Handle, OSErr, Str255, four_cc};

pub type DescriptorKeyID = u32;
pub type DescriptorTypeID = u32;
pub type DescriptorUnitID = u32;
pub type DescriptorEnumID = u32;
pub type DescriptorEnumTypeID = u32;
pub type DescriptorClassID = u32;
/// Zero-terminated list of keys a plugin expects while reading.
pub type DescriptorKeyIDArray = *mut DescriptorKeyID;

/// Opaque descriptor blob, allocated through the handle procs.
pub type PIDescriptorHandle = Handle;
pub type PIReadDescriptor = *mut c_void;
pub type PIWriteDescriptor = *mut c_void;

pub const TYPE_INTEGER: DescType = four_cc(b"long");
pub const TYPE_FLOAT: DescType = four_cc(b"doub");
pub const TYPE_UINT_FLOAT: DescType = four_cc(b"UntF");
pub const TYPE_BOOLEAN: DescType = four_cc(b"bool");
pub const TYPE_CHAR: DescType = four_cc(b"TEXT");
pub const TYPE_ALIAS: DescType = four_cc(b"alis");
pub const TYPE_ENUMERATED: DescType = four_cc(b"enum");
pub const TYPE_TYPE: DescType = four_cc(b"type");
pub const TYPE_GLOBAL_CLASS: DescType = four_cc(b"GlbC");
pub const TYPE_OBJECT: DescType = four_cc(b"Objc");
pub const TYPE_GLOBAL_OBJECT: DescType = four_cc(b"GlbO");
pub const TYPE_OBJECT_REFERENCE: DescType = four_cc(b"obj ");
pub const TYPE_PATH: DescType = four_cc(b"Pth ");
pub const TYPE_VALUE_LIST: DescType = four_cc(b"VlLs");
pub const TYPE_CLASS: DescType = four_cc(b"Clss");

/// Returned by the pinned getters when the stored value had to be clamped.
pub const COERCED_PARAM_ERR: OSErr = 2;

pub const PLUG_IN_DIALOG_DONT_DISPLAY: i16 = 0;
pub const PLUG_IN_DIALOG_DISPLAY: i16 = 1;
pub const PLUG_IN_DIALOG_SILENT: i16 = 2;

pub const PLUG_IN_DIALOG_OPTIONAL: i16 = 0;
pub const PLUG_IN_DIALOG_REQUIRED: i16 = 1;
pub const PLUG_IN_DIALOG_NONE: i16 = 2;

pub const K_CURRENT_DESCRIPTOR_PARAMETERS_VERSION: i16 = 0;
pub const K_CURRENT_READ_DESCRIPTOR_PROCS_VERSION: i16 = 0;
pub const K_CURRENT_READ_DESCRIPTOR_PROCS_COUNT: i16 = 18;
pub const K_CURRENT_WRITE_DESCRIPTOR_PROCS_VERSION: i16 = 0;
pub const K_CURRENT_WRITE_DESCRIPTOR_PROCS_COUNT: i16 = 16;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PIDescriptorKeyData {
    pub name: Str255,
    pub index: i32,
    pub type_: DescType,
    pub value: DescType,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PIDescriptorSimpleReference {
    pub desired_class: DescType,
    pub key_form: DescType,
    pub key_data: PIDescriptorKeyData,
}

#[repr(C)]
pub struct ReadDescriptorProcs {
    pub read_descriptor_procs_version: i16,
    pub num_read_descriptor_procs: i16,
    pub open_read_descriptor_proc:
        Option<unsafe extern "C" fn(descriptor: PIDescriptorHandle, keys: DescriptorKeyIDArray) -> PIReadDescriptor>,
    pub close_read_descriptor_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor) -> OSErr>,
    pub get_key_proc: Option<
        unsafe extern "C" fn(
            descriptor: PIReadDescriptor,
            key: *mut DescriptorKeyID,
            type_: *mut DescType,
            flags: *mut i32,
        ) -> Boolean,
    >,
    pub get_integer_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut i32) -> OSErr>,
    pub get_float_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut f64) -> OSErr>,
    pub get_unit_float_proc: Option<
        unsafe extern "C" fn(descriptor: PIReadDescriptor, unit: *mut DescriptorUnitID, data: *mut f64) -> OSErr,
    >,
    pub get_boolean_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut Boolean) -> OSErr>,
    pub get_text_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut Handle) -> OSErr>,
    pub get_alias_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut Handle) -> OSErr>,
    pub get_enumerated_proc:
        Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut DescriptorEnumID) -> OSErr>,
    pub get_class_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut DescType) -> OSErr>,
    pub get_simple_reference_proc: Option<
        unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut PIDescriptorSimpleReference) -> OSErr,
    >,
    pub get_object_proc: Option<
        unsafe extern "C" fn(
            descriptor: PIReadDescriptor,
            class: *mut DescType,
            data: *mut PIDescriptorHandle,
        ) -> OSErr,
    >,
    pub get_count_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut u32) -> OSErr>,
    pub get_string_proc: Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, data: *mut Str255) -> OSErr>,
    pub get_pinned_integer_proc:
        Option<unsafe extern "C" fn(descriptor: PIReadDescriptor, min: i32, max: i32, data: *mut i32) -> OSErr>,
    pub get_pinned_float_proc: Option<
        unsafe extern "C" fn(descriptor: PIReadDescriptor, min: *const f64, max: *const f64, data: *mut f64) -> OSErr,
    >,
    pub get_pinned_unit_float_proc: Option<
        unsafe extern "C" fn(
            descriptor: PIReadDescriptor,
            min: *const f64,
            max: *const f64,
            unit: *mut DescriptorUnitID,
            data: *mut f64,
        ) -> OSErr,
    >,
}

#[repr(C)]
pub struct WriteDescriptorProcs {
    pub write_descriptor_procs_version: i16,
    pub num_write_descriptor_procs: i16,
    pub open_write_descriptor_proc: Option<unsafe extern "C" fn() -> PIWriteDescriptor>,
    pub close_write_descriptor_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, handle: *mut PIDescriptorHandle) -> OSErr>,
    pub put_integer_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: i32) -> OSErr>,
    pub put_float_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: *const f64) -> OSErr>,
    pub put_unit_float_proc: Option<
        unsafe extern "C" fn(
            descriptor: PIWriteDescriptor,
            key: DescriptorKeyID,
            unit: DescriptorUnitID,
            data: *const f64,
        ) -> OSErr,
    >,
    pub put_boolean_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: Boolean) -> OSErr>,
    pub put_text_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: Handle) -> OSErr>,
    pub put_alias_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: Handle) -> OSErr>,
    pub put_enumerated_proc: Option<
        unsafe extern "C" fn(
            descriptor: PIWriteDescriptor,
            key: DescriptorKeyID,
            type_: DescType,
            value: DescriptorEnumID,
        ) -> OSErr,
    >,
    pub put_class_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: DescType) -> OSErr>,
    pub put_simple_reference_proc: Option<
        unsafe extern "C" fn(
            descriptor: PIWriteDescriptor,
            key: DescriptorKeyID,
            data: *const PIDescriptorSimpleReference,
        ) -> OSErr,
    >,
    pub put_object_proc: Option<
        unsafe extern "C" fn(
            descriptor: PIWriteDescriptor,
            key: DescriptorKeyID,
            class: DescType,
            data: PIDescriptorHandle,
        ) -> OSErr,
    >,
    pub put_count_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, count: u32) -> OSErr>,
    pub put_string_proc: Option<
        unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: *const u8) -> OSErr,
    >,
    pub put_scoped_class_proc:
        Option<unsafe extern "C" fn(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: DescType) -> OSErr>,
    pub put_scoped_object_proc: Option<
        unsafe extern "C" fn(
            descriptor: PIWriteDescriptor,
            key: DescriptorKeyID,
            class: DescType,
            data: PIDescriptorHandle,
        ) -> OSErr,
    >,
}

#[repr(C)]
pub struct PIDescriptorParameters {
    pub descriptor_parameters_version: i16,
    pub play_info: i16,
    pub record_info: i16,
    pub descriptor: PIDescriptorHandle,
    pub write_descriptor_procs: *mut WriteDescriptorProcs,
    pub read_descriptor_procs: *mut ReadDescriptorProcs,
}
