//! Saved filter state for "repeat last effect" runs.
//!
//! After a successful run with UI the plugin's parameter handle and private
//! data pointer are copied out together with a tag recording how each block
//! was stored, so the next run without UI can rebuild the same shape before
//! the plugin looks at it.

use std::mem::size_of;
use std::ptr;

use pi_sdk::OTOF_SIGNATURE;
use serde::{Deserialize, Serialize};

use crate::memory::{ArenaError, NativeArena};
use crate::suites::descriptor::DescriptorEntry;
use crate::suites::handle::HandleSuite;
use crate::suites::resource::PseudoResource;

const PTR_SIZE: usize = size_of::<usize>();

/// How a plugin kept one of its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMethod {
    /// Allocated through the Handle suite.
    HandleSuite,
    /// A plain block; the plugin holds its address directly.
    RawBytes,
    /// Legacy `OTOF` block: a data pointer followed by the signature.
    OtofHandle,
}

/// One captured block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub storage: StorageMethod,
    /// The data lived in executable memory.
    #[serde(default)]
    pub executable: bool,
    /// A raw block whose first word pointed just past itself.
    #[serde(default)]
    pub fake_indirect: bool,
    pub bytes: Vec<u8>,
}

impl StoredBlock {
    fn new(storage: StorageMethod, bytes: Vec<u8>) -> Self {
        Self {
            storage,
            executable: false,
            fake_indirect: false,
            bytes,
        }
    }
}

/// Parameter handle and plugin data of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalParameters {
    #[serde(default)]
    pub parameters: Option<StoredBlock>,
    #[serde(default)]
    pub plugin_data: Option<StoredBlock>,
}

/// Everything needed to replay a filter without showing its UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default)]
    pub scripting: Vec<DescriptorEntry>,
    #[serde(default)]
    pub resources: Vec<PseudoResource>,
    #[serde(default)]
    pub globals: GlobalParameters,
}

impl FilterSettings {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}

/// Reads `len` bytes at `data`.
///
/// # Safety
/// `data` must be valid for `len` bytes.
unsafe fn copy_block(data: *const u8, len: usize) -> Vec<u8> {
    // SAFETY: per the caller's contract.
    unsafe { std::slice::from_raw_parts(data, len) }.to_vec()
}

/// Whether `block` is an `OTOF` cell: exactly one pointer plus the signature.
fn is_otof(arena: &NativeArena, block: *const u8) -> bool {
    if arena.size(block) != Some(PTR_SIZE + 4) {
        return false;
    }
    // SAFETY: the arena block holds `PTR_SIZE + 4` bytes.
    let signature = unsafe { block.add(PTR_SIZE).cast::<u32>().read_unaligned() };
    signature == OTOF_SIGNATURE
}

/// Copies out a block the plugin left in `FilterRecord::parameters` or its
/// data pointer. Memory the host can't size is skipped.
pub fn capture_block(handles: &HandleSuite, arena: &NativeArena, address: *mut u8) -> Option<StoredBlock> {
    if address.is_null() {
        return None;
    }
    let handle = address.cast::<pi_sdk::types::Ptr>();
    if handles.is_valid(handle) {
        return handles.bytes(handle).map(|bytes| StoredBlock::new(StorageMethod::HandleSuite, bytes));
    }
    if is_otof(arena, address) {
        // SAFETY: an `OTOF` cell starts with the data pointer.
        let data = unsafe { address.cast::<*mut u8>().read_unaligned() };
        let Some(len) = arena.size(data) else {
            tracing::warn!("OTOF block points at memory of unknown size");
            return None;
        };
        // SAFETY: `data` is a live arena block of `len` bytes.
        let mut block = StoredBlock::new(StorageMethod::OtofHandle, unsafe { copy_block(data, len) });
        block.executable = arena.is_executable(data);
        return Some(block);
    }
    let Some(len) = arena.size(address) else {
        tracing::warn!(address = address as usize, "plugin block not owned by the host, not saved");
        return None;
    };
    // Some plugins hand back a block whose first word points right after it.
    // This is a heuristic: a block that merely contains that value matches too.
    if len >= PTR_SIZE {
        // SAFETY: the block holds at least one pointer.
        let first = unsafe { address.cast::<usize>().read_unaligned() };
        if first == address as usize + PTR_SIZE {
            // SAFETY: the payload follows the pointer inside the same block.
            let bytes = unsafe { copy_block(address.add(PTR_SIZE), len - PTR_SIZE) };
            let mut block = StoredBlock::new(StorageMethod::RawBytes, bytes);
            block.fake_indirect = true;
            block.executable = arena.is_executable(address);
            return Some(block);
        }
    }
    // SAFETY: `address` is a live arena block of `len` bytes.
    let mut block = StoredBlock::new(StorageMethod::RawBytes, unsafe { copy_block(address, len) });
    block.executable = arena.is_executable(address);
    Some(block)
}

fn allocate_payload(arena: &NativeArena, len: usize, executable: bool) -> Result<*mut u8, ArenaError> {
    let block = if executable {
        // Legacy plugins jump into code saved in their parameters.
        arena.allocate_executable(len)?
    } else {
        arena.allocate(len, true)?
    };
    Ok(block.as_ptr())
}

/// Rebuilds a captured block in the shape the plugin originally used.
pub fn restore_block(handles: &mut HandleSuite, arena: &NativeArena, block: &StoredBlock) -> Result<*mut u8, ArenaError> {
    let len = block.bytes.len();
    match block.storage {
        StorageMethod::HandleSuite => {
            let handle = handles.new_handle_from(&block.bytes);
            if handle.is_null() {
                return Err(ArenaError::OutOfMemory(len));
            }
            Ok(handle.cast())
        }
        StorageMethod::OtofHandle => {
            let data = allocate_payload(arena, len, block.executable)?;
            let cell = match arena.allocate(PTR_SIZE + 4, true) {
                Ok(cell) => cell.as_ptr(),
                Err(err) => {
                    let _ = arena.free(data);
                    return Err(err);
                }
            };
            // SAFETY: `data` holds `len` bytes and `cell` holds a pointer plus
            // a signature.
            unsafe {
                ptr::copy_nonoverlapping(block.bytes.as_ptr(), data, len);
                cell.cast::<*mut u8>().write_unaligned(data);
                cell.add(PTR_SIZE).cast::<u32>().write_unaligned(OTOF_SIGNATURE);
            }
            handles.adopt_legacy(cell.cast());
            Ok(cell)
        }
        StorageMethod::RawBytes => {
            let offset = if block.fake_indirect { PTR_SIZE } else { 0 };
            let data = allocate_payload(arena, len + offset, block.executable)?;
            // SAFETY: `data` holds `offset + len` bytes.
            unsafe {
                if block.fake_indirect {
                    data.cast::<usize>().write_unaligned(data as usize + PTR_SIZE);
                }
                ptr::copy_nonoverlapping(block.bytes.as_ptr(), data.add(offset), len);
            }
            Ok(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn suite() -> (Rc<NativeArena>, HandleSuite) {
        let arena = Rc::new(NativeArena::new());
        (arena.clone(), HandleSuite::new(arena))
    }

    #[test]
    fn handle_suite_blocks_round_trip() {
        let (arena, mut handles) = suite();
        let h = handles.new_handle_from(b"radius = 2");
        let saved = capture_block(&handles, &arena, h.cast()).unwrap();
        assert_eq!(saved.storage, StorageMethod::HandleSuite);

        let restored = restore_block(&mut handles, &arena, &saved).unwrap();
        assert_eq!(handles.bytes(restored.cast()).unwrap(), b"radius = 2");
    }

    #[test]
    fn otof_blocks_keep_their_layout() {
        let (arena, mut handles) = suite();
        let mut saved = StoredBlock::new(StorageMethod::OtofHandle, vec![1, 2, 3]);
        saved.executable = true;

        let cell = restore_block(&mut handles, &arena, &saved).unwrap();
        assert!(is_otof(&arena, cell));
        let data = handles.lock(cell.cast());
        assert!(arena.is_executable(data.cast()));

        let again = capture_block(&handles, &arena, cell).unwrap();
        assert_eq!(again, saved);
        handles.dispose(cell.cast());
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn fake_indirect_pointer_is_detected() {
        let (arena, mut handles) = suite();
        let mut saved = StoredBlock::new(StorageMethod::RawBytes, vec![9, 8, 7, 6]);
        saved.fake_indirect = true;

        let block = restore_block(&mut handles, &arena, &saved).unwrap();
        // SAFETY: the block starts with a pointer-sized word.
        let first = unsafe { block.cast::<usize>().read_unaligned() };
        assert_eq!(first, block as usize + PTR_SIZE);
        assert_eq!(capture_block(&handles, &arena, block).unwrap(), saved);
    }

    #[test]
    fn foreign_memory_is_not_captured() {
        let (arena, handles) = suite();
        let mut local = [0u8; 16];
        assert!(capture_block(&handles, &arena, local.as_mut_ptr()).is_none());
        assert!(capture_block(&handles, &arena, ptr::null_mut()).is_none());
    }

    #[test]
    fn settings_survive_toml() {
        let settings = FilterSettings {
            globals: GlobalParameters {
                parameters: Some(StoredBlock::new(StorageMethod::HandleSuite, b"radius = 3".to_vec())),
                plugin_data: None,
            },
            scripting: Vec::new(),
            resources: vec![PseudoResource {
                res_type: pi_sdk::four_cc(b"Test"),
                data: vec![1, 2],
            }],
        };
        let text = settings.to_toml().unwrap();
        assert_eq!(FilterSettings::from_toml(&text).unwrap(), settings);
    }
}
