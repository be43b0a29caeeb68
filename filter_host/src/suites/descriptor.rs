//! Scripting descriptors.
//!
//! A descriptor is an ordered list of keyed values. The host keeps the lists
//! itself and hands the plugin a handle standing in for each one; readers
//! and writers are small integer tokens. Nested objects become descriptor
//! handles of their own.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::raw::c_void;
use std::ptr;
use std::rc::{Rc, Weak};

use pi_sdk::descriptor::*;
use pi_sdk::errors::{NIL_HANDLE_ERR, NO_ERR, PARAM_ERR};
use pi_sdk::types::{Boolean, DescType, Handle, OSErr, Str255, from_pascal_string, to_pascal_string};
use serde::{Deserialize, Serialize};

use super::handle::HandleSuite;
use super::{SlotBinding, with_bound, write_out};

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<DescriptorSuite>>> = RefCell::new(Weak::new());
}

/// A `PIDescriptorSimpleReference` in owned form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleReference {
    pub desired_class: u32,
    pub key_form: u32,
    pub name: Vec<u8>,
    pub index: i32,
    pub type_id: u32,
    pub value: u32,
}

/// One value stored under a descriptor key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DescriptorValue {
    Integer(i32),
    Float(f64),
    UnitFloat { unit: u32, value: f64 },
    Boolean(bool),
    Text(Vec<u8>),
    Alias(Vec<u8>),
    Enumerated { type_id: u32, value: u32 },
    Class(u32),
    SimpleReference(SimpleReference),
    Object { class: u32, entries: Vec<DescriptorEntry> },
    Count(u32),
    String(Vec<u8>),
}

impl DescriptorValue {
    /// Type code reported by `getKey`.
    pub fn type_code(&self) -> DescType {
        match self {
            DescriptorValue::Integer(_) | DescriptorValue::Count(_) => TYPE_INTEGER,
            DescriptorValue::Float(_) => TYPE_FLOAT,
            DescriptorValue::UnitFloat { .. } => TYPE_UINT_FLOAT,
            DescriptorValue::Boolean(_) => TYPE_BOOLEAN,
            DescriptorValue::Text(_) | DescriptorValue::String(_) => TYPE_CHAR,
            DescriptorValue::Alias(_) => TYPE_ALIAS,
            DescriptorValue::Enumerated { type_id, .. } => *type_id,
            DescriptorValue::Class(_) => TYPE_TYPE,
            DescriptorValue::SimpleReference(_) => TYPE_OBJECT_REFERENCE,
            DescriptorValue::Object { .. } => TYPE_OBJECT,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            DescriptorValue::Float(v) | DescriptorValue::UnitFloat { value: v, .. } => Some(*v),
            DescriptorValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    pub key: u32,
    pub value: DescriptorValue,
}

#[derive(Debug, Default)]
struct Reader {
    entries: Vec<DescriptorEntry>,
    next: usize,
    current: Option<usize>,
}

pub struct DescriptorSuite {
    handles: Rc<RefCell<HandleSuite>>,
    descriptors: HashMap<usize, Vec<DescriptorEntry>>,
    readers: HashMap<usize, Reader>,
    writers: HashMap<usize, Vec<DescriptorEntry>>,
    next_token: usize,
}

impl DescriptorSuite {
    pub fn new(handles: Rc<RefCell<HandleSuite>>) -> Self {
        Self {
            handles,
            descriptors: HashMap::new(),
            readers: HashMap::new(),
            writers: HashMap::new(),
            next_token: 1,
        }
    }

    pub(crate) fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        super::bind(&ACTIVE, state)
    }

    /// Allocates a descriptor handle holding `entries`.
    pub fn register(&mut self, entries: Vec<DescriptorEntry>) -> Handle {
        let count = (entries.len() as u32).to_be_bytes();
        let handle = self.handles.borrow_mut().new_handle_from(&count);
        if !handle.is_null() {
            self.descriptors.insert(handle as usize, entries);
        }
        handle
    }

    /// The entries a descriptor handle stands for.
    pub fn entries(&self, handle: Handle) -> Option<&[DescriptorEntry]> {
        self.descriptors.get(&(handle as usize)).map(Vec::as_slice)
    }

    fn token(&mut self) -> usize {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    pub fn open_reader(&mut self, descriptor: Handle) -> Option<usize> {
        let entries = self.descriptors.get(&(descriptor as usize))?.clone();
        let token = self.token();
        self.readers.insert(token, Reader { entries, ..Reader::default() });
        Some(token)
    }

    pub fn close_reader(&mut self, token: usize) -> OSErr {
        if self.readers.remove(&token).is_some() { NO_ERR } else { PARAM_ERR }
    }

    /// Advances to the next key, returning it with its type code.
    pub fn next_key(&mut self, token: usize) -> Option<(u32, DescType)> {
        let reader = self.readers.get_mut(&token)?;
        let entry = reader.entries.get(reader.next)?;
        reader.current = Some(reader.next);
        reader.next += 1;
        Some((entry.key, entry.value.type_code()))
    }

    /// Value under the key last returned by `next_key`.
    pub fn current(&self, token: usize) -> Option<&DescriptorValue> {
        let reader = self.readers.get(&token)?;
        reader.entries.get(reader.current?).map(|entry| &entry.value)
    }

    pub fn open_writer(&mut self) -> usize {
        let token = self.token();
        self.writers.insert(token, Vec::new());
        token
    }

    pub fn put(&mut self, token: usize, key: u32, value: DescriptorValue) -> OSErr {
        match self.writers.get_mut(&token) {
            Some(entries) => {
                entries.push(DescriptorEntry { key, value });
                NO_ERR
            }
            None => PARAM_ERR,
        }
    }

    /// Finishes a writer, turning it into a descriptor handle.
    pub fn close_writer(&mut self, token: usize) -> Option<Handle> {
        let entries = self.writers.remove(&token)?;
        let handle = self.register(entries);
        (!handle.is_null()).then_some(handle)
    }

    fn handle_bytes(&self, handle: Handle) -> Option<Vec<u8>> {
        self.handles.borrow().bytes(handle)
    }

    fn new_handle(&self, bytes: &[u8]) -> Handle {
        self.handles.borrow_mut().new_handle_from(bytes)
    }

    pub fn create_read_descriptor_procs() -> Box<ReadDescriptorProcs> {
        Box::new(ReadDescriptorProcs {
            read_descriptor_procs_version: K_CURRENT_READ_DESCRIPTOR_PROCS_VERSION,
            num_read_descriptor_procs: K_CURRENT_READ_DESCRIPTOR_PROCS_COUNT,
            open_read_descriptor_proc: Some(open_read),
            close_read_descriptor_proc: Some(close_read),
            get_key_proc: Some(get_key),
            get_integer_proc: Some(get_integer),
            get_float_proc: Some(get_float),
            get_unit_float_proc: Some(get_unit_float),
            get_boolean_proc: Some(get_boolean),
            get_text_proc: Some(get_text),
            get_alias_proc: Some(get_alias),
            get_enumerated_proc: Some(get_enumerated),
            get_class_proc: Some(get_class),
            get_simple_reference_proc: Some(get_simple_reference),
            get_object_proc: Some(get_object),
            get_count_proc: Some(get_count),
            get_string_proc: Some(get_string),
            get_pinned_integer_proc: Some(get_pinned_integer),
            get_pinned_float_proc: Some(get_pinned_float),
            get_pinned_unit_float_proc: Some(get_pinned_unit_float),
        })
    }

    pub fn create_write_descriptor_procs() -> Box<WriteDescriptorProcs> {
        Box::new(WriteDescriptorProcs {
            write_descriptor_procs_version: K_CURRENT_WRITE_DESCRIPTOR_PROCS_VERSION,
            num_write_descriptor_procs: K_CURRENT_WRITE_DESCRIPTOR_PROCS_COUNT,
            open_write_descriptor_proc: Some(open_write),
            close_write_descriptor_proc: Some(close_write),
            put_integer_proc: Some(put_integer),
            put_float_proc: Some(put_float),
            put_unit_float_proc: Some(put_unit_float),
            put_boolean_proc: Some(put_boolean),
            put_text_proc: Some(put_text),
            put_alias_proc: Some(put_alias),
            put_enumerated_proc: Some(put_enumerated),
            put_class_proc: Some(put_class),
            put_simple_reference_proc: Some(put_simple_reference),
            put_object_proc: Some(put_object),
            put_count_proc: Some(put_count),
            put_string_proc: Some(put_string),
            put_scoped_class_proc: Some(put_class),
            put_scoped_object_proc: Some(put_object),
        })
    }
}

fn token_of(descriptor: *mut c_void) -> usize {
    descriptor as usize
}

fn token_ptr(token: usize) -> *mut c_void {
    token as *mut c_void
}

/// Runs `f` on the current value of reader `descriptor`.
fn read_current(descriptor: PIReadDescriptor, f: impl FnOnce(&DescriptorSuite, &DescriptorValue) -> OSErr) -> OSErr {
    with_bound(&ACTIVE, PARAM_ERR, |suite| match suite.current(token_of(descriptor)) {
        Some(value) => {
            let value = value.clone();
            f(suite, &value)
        }
        None => PARAM_ERR,
    })
}

unsafe extern "C" fn open_read(descriptor: PIDescriptorHandle, _keys: DescriptorKeyIDArray) -> PIReadDescriptor {
    with_bound(&ACTIVE, ptr::null_mut(), |suite| {
        suite.open_reader(descriptor).map_or(ptr::null_mut(), token_ptr)
    })
}

unsafe extern "C" fn close_read(descriptor: PIReadDescriptor) -> OSErr {
    with_bound(&ACTIVE, PARAM_ERR, |suite| suite.close_reader(token_of(descriptor)))
}

unsafe extern "C" fn get_key(
    descriptor: PIReadDescriptor,
    key: *mut DescriptorKeyID,
    type_: *mut DescType,
    flags: *mut i32,
) -> Boolean {
    match with_bound(&ACTIVE, None, |suite| suite.next_key(token_of(descriptor))) {
        Some((k, t)) => {
            // SAFETY: out pointers are null or writable.
            unsafe {
                write_out(key, k);
                write_out(type_, t);
                write_out(flags, 0);
            }
            1
        }
        None => 0,
    }
}

unsafe extern "C" fn get_integer(descriptor: PIReadDescriptor, data: *mut i32) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::Integer(v) => {
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, *v) };
            NO_ERR
        }
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_float(descriptor: PIReadDescriptor, data: *mut f64) -> OSErr {
    read_current(descriptor, |_, value| match value.as_f64() {
        Some(v) => {
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, v) };
            NO_ERR
        }
        None => PARAM_ERR,
    })
}

unsafe extern "C" fn get_unit_float(descriptor: PIReadDescriptor, unit: *mut DescriptorUnitID, data: *mut f64) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::UnitFloat { unit: u, value: v } => {
            // SAFETY: out pointers are null or writable.
            unsafe {
                write_out(unit, *u);
                write_out(data, *v);
            }
            NO_ERR
        }
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_boolean(descriptor: PIReadDescriptor, data: *mut Boolean) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::Boolean(v) => {
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, *v as Boolean) };
            NO_ERR
        }
        _ => PARAM_ERR,
    })
}

fn read_bytes_into_handle(suite: &DescriptorSuite, bytes: &[u8], data: *mut Handle) -> OSErr {
    let handle = suite.new_handle(bytes);
    if handle.is_null() {
        return NIL_HANDLE_ERR;
    }
    // SAFETY: out pointer is null or writable.
    unsafe { write_out(data, handle) };
    NO_ERR
}

unsafe extern "C" fn get_text(descriptor: PIReadDescriptor, data: *mut Handle) -> OSErr {
    read_current(descriptor, |suite, value| match value {
        DescriptorValue::Text(bytes) | DescriptorValue::String(bytes) => read_bytes_into_handle(suite, bytes, data),
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_alias(descriptor: PIReadDescriptor, data: *mut Handle) -> OSErr {
    read_current(descriptor, |suite, value| match value {
        DescriptorValue::Alias(bytes) => read_bytes_into_handle(suite, bytes, data),
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_enumerated(descriptor: PIReadDescriptor, data: *mut DescriptorEnumID) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::Enumerated { value: v, .. } => {
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, *v) };
            NO_ERR
        }
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_class(descriptor: PIReadDescriptor, data: *mut DescType) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::Class(v) => {
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, *v) };
            NO_ERR
        }
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_simple_reference(descriptor: PIReadDescriptor, data: *mut PIDescriptorSimpleReference) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::SimpleReference(reference) => {
            let mut name: Str255 = [0; 256];
            to_pascal_string(&reference.name, &mut name);
            let raw = PIDescriptorSimpleReference {
                desired_class: reference.desired_class,
                key_form: reference.key_form,
                key_data: PIDescriptorKeyData {
                    name,
                    index: reference.index,
                    type_: reference.type_id,
                    value: reference.value,
                },
            };
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, raw) };
            NO_ERR
        }
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_object(descriptor: PIReadDescriptor, class: *mut DescType, data: *mut PIDescriptorHandle) -> OSErr {
    let object = with_bound(&ACTIVE, None, |suite| match suite.current(token_of(descriptor)) {
        Some(DescriptorValue::Object { class, entries }) => {
            let (class, entries) = (*class, entries.clone());
            Some((class, suite.register(entries)))
        }
        _ => None,
    });
    match object {
        Some((_, handle)) if handle.is_null() => NIL_HANDLE_ERR,
        Some((c, handle)) => {
            // SAFETY: out pointers are null or writable.
            unsafe {
                write_out(class, c);
                write_out(data, handle);
            }
            NO_ERR
        }
        None => PARAM_ERR,
    }
}

unsafe extern "C" fn get_count(descriptor: PIReadDescriptor, data: *mut u32) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::Count(v) => {
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, *v) };
            NO_ERR
        }
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_string(descriptor: PIReadDescriptor, data: *mut Str255) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::String(bytes) | DescriptorValue::Text(bytes) => {
            let mut text: Str255 = [0; 256];
            to_pascal_string(bytes, &mut text);
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, text) };
            NO_ERR
        }
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn get_pinned_integer(descriptor: PIReadDescriptor, min: i32, max: i32, data: *mut i32) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::Integer(v) => {
            let pinned = (*v).max(min).min(max);
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(data, pinned) };
            if pinned == *v { NO_ERR } else { COERCED_PARAM_ERR }
        }
        _ => PARAM_ERR,
    })
}

/// Clamps to the optional bounds, reporting whether it had to.
///
/// # Safety
/// `min` and `max` must be null or readable.
unsafe fn pin(value: f64, min: *const f64, max: *const f64) -> (f64, bool) {
    // SAFETY: null or readable per the caller.
    let (lo, hi) = unsafe { (min.as_ref().copied(), max.as_ref().copied()) };
    let mut pinned = value;
    if let Some(lo) = lo {
        pinned = pinned.max(lo);
    }
    if let Some(hi) = hi {
        pinned = pinned.min(hi);
    }
    (pinned, pinned != value)
}

unsafe extern "C" fn get_pinned_float(descriptor: PIReadDescriptor, min: *const f64, max: *const f64, data: *mut f64) -> OSErr {
    read_current(descriptor, |_, value| match value.as_f64() {
        Some(v) => {
            // SAFETY: plugin pointers, null or valid.
            let (pinned, coerced) = unsafe { pin(v, min, max) };
            unsafe { write_out(data, pinned) };
            if coerced { COERCED_PARAM_ERR } else { NO_ERR }
        }
        None => PARAM_ERR,
    })
}

unsafe extern "C" fn get_pinned_unit_float(
    descriptor: PIReadDescriptor,
    min: *const f64,
    max: *const f64,
    unit: *mut DescriptorUnitID,
    data: *mut f64,
) -> OSErr {
    read_current(descriptor, |_, value| match value {
        DescriptorValue::UnitFloat { unit: u, value: v } => {
            // SAFETY: plugin pointers, null or valid.
            let (pinned, coerced) = unsafe { pin(*v, min, max) };
            unsafe {
                write_out(unit, *u);
                write_out(data, pinned);
            }
            if coerced { COERCED_PARAM_ERR } else { NO_ERR }
        }
        _ => PARAM_ERR,
    })
}

unsafe extern "C" fn open_write() -> PIWriteDescriptor {
    with_bound(&ACTIVE, ptr::null_mut(), |suite| token_ptr(suite.open_writer()))
}

unsafe extern "C" fn close_write(descriptor: PIWriteDescriptor, handle: *mut PIDescriptorHandle) -> OSErr {
    match with_bound(&ACTIVE, None, |suite| suite.close_writer(token_of(descriptor))) {
        Some(h) => {
            // SAFETY: out pointer is null or writable.
            unsafe { write_out(handle, h) };
            NO_ERR
        }
        None => PARAM_ERR,
    }
}

fn put(descriptor: PIWriteDescriptor, key: DescriptorKeyID, value: DescriptorValue) -> OSErr {
    with_bound(&ACTIVE, PARAM_ERR, |suite| suite.put(token_of(descriptor), key, value))
}

unsafe extern "C" fn put_integer(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: i32) -> OSErr {
    put(descriptor, key, DescriptorValue::Integer(data))
}

unsafe extern "C" fn put_float(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: *const f64) -> OSErr {
    // SAFETY: null or readable.
    match unsafe { data.as_ref() } {
        Some(v) => put(descriptor, key, DescriptorValue::Float(*v)),
        None => PARAM_ERR,
    }
}

unsafe extern "C" fn put_unit_float(
    descriptor: PIWriteDescriptor,
    key: DescriptorKeyID,
    unit: DescriptorUnitID,
    data: *const f64,
) -> OSErr {
    // SAFETY: null or readable.
    match unsafe { data.as_ref() } {
        Some(v) => put(descriptor, key, DescriptorValue::UnitFloat { unit, value: *v }),
        None => PARAM_ERR,
    }
}

unsafe extern "C" fn put_boolean(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: Boolean) -> OSErr {
    put(descriptor, key, DescriptorValue::Boolean(data != 0))
}

fn put_handle_bytes(
    descriptor: PIWriteDescriptor,
    key: DescriptorKeyID,
    data: Handle,
    wrap: fn(Vec<u8>) -> DescriptorValue,
) -> OSErr {
    with_bound(&ACTIVE, PARAM_ERR, |suite| match suite.handle_bytes(data) {
        Some(bytes) => suite.put(token_of(descriptor), key, wrap(bytes)),
        None => NIL_HANDLE_ERR,
    })
}

unsafe extern "C" fn put_text(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: Handle) -> OSErr {
    put_handle_bytes(descriptor, key, data, DescriptorValue::Text)
}

unsafe extern "C" fn put_alias(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: Handle) -> OSErr {
    put_handle_bytes(descriptor, key, data, DescriptorValue::Alias)
}

unsafe extern "C" fn put_enumerated(
    descriptor: PIWriteDescriptor,
    key: DescriptorKeyID,
    type_: DescType,
    value: DescriptorEnumID,
) -> OSErr {
    put(descriptor, key, DescriptorValue::Enumerated { type_id: type_, value })
}

unsafe extern "C" fn put_class(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: DescType) -> OSErr {
    put(descriptor, key, DescriptorValue::Class(data))
}

unsafe extern "C" fn put_simple_reference(
    descriptor: PIWriteDescriptor,
    key: DescriptorKeyID,
    data: *const PIDescriptorSimpleReference,
) -> OSErr {
    // SAFETY: null or readable.
    let Some(raw) = (unsafe { data.as_ref() }) else {
        return PARAM_ERR;
    };
    let reference = SimpleReference {
        desired_class: raw.desired_class,
        key_form: raw.key_form,
        name: from_pascal_string(&raw.key_data.name).to_vec(),
        index: raw.key_data.index,
        type_id: raw.key_data.type_,
        value: raw.key_data.value,
    };
    put(descriptor, key, DescriptorValue::SimpleReference(reference))
}

unsafe extern "C" fn put_object(
    descriptor: PIWriteDescriptor,
    key: DescriptorKeyID,
    class: DescType,
    data: PIDescriptorHandle,
) -> OSErr {
    with_bound(&ACTIVE, PARAM_ERR, |suite| match suite.entries(data) {
        Some(entries) => {
            let entries = entries.to_vec();
            suite.put(token_of(descriptor), key, DescriptorValue::Object { class, entries })
        }
        None => NIL_HANDLE_ERR,
    })
}

unsafe extern "C" fn put_count(descriptor: PIWriteDescriptor, key: DescriptorKeyID, count: u32) -> OSErr {
    put(descriptor, key, DescriptorValue::Count(count))
}

unsafe extern "C" fn put_string(descriptor: PIWriteDescriptor, key: DescriptorKeyID, data: *const u8) -> OSErr {
    if data.is_null() {
        return PARAM_ERR;
    }
    // SAFETY: a Pascal string: length byte followed by that many bytes.
    let bytes = unsafe {
        let len = *data as usize;
        std::slice::from_raw_parts(data.add(1), len).to_vec()
    };
    put(descriptor, key, DescriptorValue::String(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NativeArena;
    use pi_sdk::four_cc;

    fn bound() -> (Rc<RefCell<DescriptorSuite>>, Rc<RefCell<HandleSuite>>) {
        let handles = Rc::new(RefCell::new(HandleSuite::new(Rc::new(NativeArena::new()))));
        let suite = Rc::new(RefCell::new(DescriptorSuite::new(handles.clone())));
        (suite, handles)
    }

    #[test]
    fn written_descriptor_reads_back_in_order() {
        let (state, handles) = bound();
        let _binding = DescriptorSuite::bind(&state);
        let _handles = HandleSuite::bind(&handles);
        let write = DescriptorSuite::create_write_descriptor_procs();
        let read = DescriptorSuite::create_read_descriptor_procs();
        let radius = four_cc(b"Rds ");
        let amount = four_cc(b"Amnt");
        let mut descriptor: PIDescriptorHandle = ptr::null_mut();
        // SAFETY: procs are bound to live suites on this thread.
        unsafe {
            let writer = write.open_write_descriptor_proc.unwrap()();
            assert_eq!(write.put_integer_proc.unwrap()(writer, radius, 7), NO_ERR);
            let half = 0.5f64;
            assert_eq!(write.put_unit_float_proc.unwrap()(writer, amount, four_cc(b"#Prc"), &half), NO_ERR);
            assert_eq!(write.close_write_descriptor_proc.unwrap()(writer, &mut descriptor), NO_ERR);

            let reader = read.open_read_descriptor_proc.unwrap()(descriptor, ptr::null_mut());
            let (mut key, mut kind, mut flags) = (0u32, 0u32, 0i32);
            assert_eq!(read.get_key_proc.unwrap()(reader, &mut key, &mut kind, &mut flags), 1);
            assert_eq!((key, kind), (radius, TYPE_INTEGER));
            let mut value = 0i32;
            assert_eq!(read.get_pinned_integer_proc.unwrap()(reader, 0, 5, &mut value), COERCED_PARAM_ERR);
            assert_eq!(value, 5);
            assert_eq!(read.get_key_proc.unwrap()(reader, &mut key, &mut kind, &mut flags), 1);
            let (mut unit, mut float) = (0u32, 0f64);
            assert_eq!(read.get_unit_float_proc.unwrap()(reader, &mut unit, &mut float), NO_ERR);
            assert_eq!(float, 0.5);
            assert_eq!(read.get_key_proc.unwrap()(reader, &mut key, &mut kind, &mut flags), 0);
            assert_eq!(read.close_read_descriptor_proc.unwrap()(reader), NO_ERR);
        }
        let suite = state.borrow();
        assert_eq!(suite.entries(descriptor).unwrap().len(), 2);
    }

    #[test]
    fn registered_entries_can_be_replayed() {
        let (state, _handles) = bound();
        let entries = vec![DescriptorEntry { key: 1, value: DescriptorValue::Boolean(true) }];
        let handle = state.borrow_mut().register(entries.clone());
        let mut suite = state.borrow_mut();
        let reader = suite.open_reader(handle).unwrap();
        assert_eq!(suite.next_key(reader), Some((1, TYPE_BOOLEAN)));
        assert_eq!(suite.current(reader), Some(&DescriptorValue::Boolean(true)));
        assert_eq!(suite.entries(handle).unwrap(), entries.as_slice());
    }

    #[test]
    fn descriptor_values_survive_toml() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            entries: Vec<DescriptorEntry>,
        }
        let wrapper = Wrapper {
            entries: vec![
                DescriptorEntry { key: 1, value: DescriptorValue::Integer(3) },
                DescriptorEntry { key: 2, value: DescriptorValue::Enumerated { type_id: 5, value: 6 } },
            ],
        };
        let text = toml::to_string(&wrapper).unwrap();
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.entries, wrapper.entries);
    }
}
