//! Handle suite: relocatable blocks addressed through a master pointer.
//!
//! A handle is the address of a master pointer cell whose value is the data
//! block, so `*handle` yields the data just like a classic Mac handle. Both
//! the cell and the data come from the session arena. Handles created by the
//! legacy parameter-restore path are tracked separately because they must be
//! released with the routine that matches how they were built.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ptr;
use std::rc::{Rc, Weak};

use pi_sdk::errors::{MEM_FULL_ERR, NIL_HANDLE_ERR, NO_ERR};
use pi_sdk::pica::{PSHandleSuite1, PSHandleSuite2};
use pi_sdk::procs::{HandleProcs, K_CURRENT_HANDLE_PROCS_COUNT, K_CURRENT_HANDLE_PROCS_VERSION};
use pi_sdk::types::{Boolean, Handle, OSErr, Ptr};

use super::{SlotBinding, with_bound, write_out};
use crate::memory::NativeArena;

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<HandleSuite>>> = RefCell::new(Weak::new());
}

const CELL_SIZE: usize = std::mem::size_of::<Ptr>();

#[derive(Debug, Clone, Copy)]
struct HandleEntry {
    data: *mut u8,
    size: usize,
    locked: bool,
}

/// Per-session handle allocator.
pub struct HandleSuite {
    arena: Rc<NativeArena>,
    handles: HashMap<usize, HandleEntry>,
    legacy: HashSet<usize>,
}

impl HandleSuite {
    pub fn new(arena: Rc<NativeArena>) -> Self {
        Self {
            arena,
            handles: HashMap::new(),
            legacy: HashSet::new(),
        }
    }

    pub(crate) fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        super::bind(&ACTIVE, state)
    }

    /// Allocates a zero-filled handle of `size` bytes; null when out of memory.
    pub fn new_handle(&mut self, size: usize) -> Handle {
        let Ok(cell) = self.arena.allocate(CELL_SIZE, true) else {
            return ptr::null_mut();
        };
        let data = match self.arena.allocate(size, true) {
            Ok(data) => data.as_ptr(),
            Err(err) => {
                tracing::warn!(%err, size, "handle allocation failed");
                let _ = self.arena.free(cell.as_ptr());
                return ptr::null_mut();
            }
        };
        let handle = cell.as_ptr().cast::<Ptr>();
        // SAFETY: `cell` is a fresh, suitably aligned block of pointer size.
        unsafe { handle.write(data.cast()) };
        self.handles.insert(handle as usize, HandleEntry { data, size, locked: false });
        handle
    }

    /// Allocates a handle holding a copy of `bytes`.
    pub fn new_handle_from(&mut self, bytes: &[u8]) -> Handle {
        let handle = self.new_handle(bytes.len());
        if let Some(entry) = self.handles.get(&(handle as usize)) {
            // SAFETY: the entry's block holds `bytes.len()` bytes.
            unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), entry.data, bytes.len()) };
        }
        handle
    }

    /// Whether `h` was allocated by this suite and is still live.
    pub fn is_valid(&self, h: Handle) -> bool {
        self.handles.contains_key(&(h as usize))
    }

    /// Registers a handle built outside the suite (legacy parameter blocks).
    pub fn adopt_legacy(&mut self, h: Handle) {
        self.legacy.insert(h as usize);
    }

    pub fn size(&self, h: Handle) -> Option<usize> {
        self.handles.get(&(h as usize)).map(|entry| entry.size)
    }

    /// Copy of the handle's contents.
    pub fn bytes(&self, h: Handle) -> Option<Vec<u8>> {
        let entry = self.handles.get(&(h as usize))?;
        // SAFETY: the entry's block is live and `size` bytes long.
        Some(unsafe { std::slice::from_raw_parts(entry.data, entry.size) }.to_vec())
    }

    /// Resizes the handle, keeping its contents and updating the master pointer.
    pub fn set_size(&mut self, h: Handle, size: usize) -> OSErr {
        let Some(entry) = self.handles.get_mut(&(h as usize)) else {
            return NIL_HANDLE_ERR;
        };
        match self.arena.realloc(entry.data, size) {
            Ok(data) => {
                if size > entry.size {
                    // SAFETY: the block now holds `size` bytes; zero the new tail.
                    unsafe { ptr::write_bytes(data.as_ptr().add(entry.size), 0, size - entry.size) };
                }
                entry.data = data.as_ptr();
                entry.size = size;
                // SAFETY: `h` is the live master pointer cell of this entry.
                unsafe { h.write(data.as_ptr().cast()) };
                NO_ERR
            }
            Err(err) => {
                tracing::warn!(%err, size, "handle resize failed");
                MEM_FULL_ERR
            }
        }
    }

    pub fn lock(&mut self, h: Handle) -> Ptr {
        if let Some(entry) = self.handles.get_mut(&(h as usize)) {
            entry.locked = true;
            return entry.data.cast();
        }
        if self.legacy.contains(&(h as usize)) {
            // SAFETY: legacy handles are arena blocks whose first word is the data pointer.
            return unsafe { h.read() };
        }
        tracing::warn!(handle = h as usize, "lock of unknown handle");
        ptr::null_mut()
    }

    /// Locks or unlocks, reporting the data address and the previous lock state.
    pub fn set_lock(&mut self, h: Handle, lock: bool) -> Option<(Ptr, bool)> {
        let entry = self.handles.get_mut(&(h as usize))?;
        let old = entry.locked;
        entry.locked = lock;
        Some((entry.data.cast(), old))
    }

    pub fn unlock(&mut self, h: Handle) {
        if let Some(entry) = self.handles.get_mut(&(h as usize)) {
            entry.locked = false;
        }
    }

    /// Releases a handle. Legacy handles go through the matching routine.
    pub fn dispose(&mut self, h: Handle) {
        if h.is_null() {
            return;
        }
        if let Some(entry) = self.handles.remove(&(h as usize)) {
            let _ = self.arena.free(entry.data);
            let _ = self.arena.free(h.cast());
        } else {
            self.dispose_regular(h);
        }
    }

    /// Releases a handle that was not allocated by this suite.
    pub fn dispose_regular(&mut self, h: Handle) {
        if self.legacy.remove(&(h as usize)) {
            // SAFETY: legacy handles are arena blocks whose first word is the data pointer.
            let data = unsafe { h.read() }.cast::<u8>();
            let _ = self.arena.free(data);
            let _ = self.arena.free(h.cast());
        } else if self.is_valid(h) {
            self.dispose(h);
        } else {
            tracing::warn!(handle = h as usize, "dispose of unknown handle ignored");
        }
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn create_handle_procs() -> Box<HandleProcs> {
        Box::new(HandleProcs {
            handle_procs_version: K_CURRENT_HANDLE_PROCS_VERSION,
            num_handle_procs: K_CURRENT_HANDLE_PROCS_COUNT,
            new_proc: Some(new_proc),
            dispose_proc: Some(dispose_proc),
            get_size_proc: Some(get_size_proc),
            set_size_proc: Some(set_size_proc),
            lock_proc: Some(lock_proc),
            unlock_proc: Some(unlock_proc),
            recover_space_proc: Some(recover_space_proc),
            dispose_regular_handle_proc: Some(dispose_regular_handle_proc),
        })
    }

    pub fn create_pica_suite1() -> Box<PSHandleSuite1> {
        Box::new(PSHandleSuite1 {
            new: Some(new_proc),
            dispose: Some(dispose_proc),
            set_lock: Some(set_lock_proc),
            get_size: Some(get_size_proc),
            set_size: Some(set_size_proc),
            recover_space: Some(recover_space_proc),
        })
    }

    pub fn create_pica_suite2() -> Box<PSHandleSuite2> {
        Box::new(PSHandleSuite2 {
            new: Some(new_proc),
            dispose: Some(dispose_proc),
            dispose_regular_handle: Some(dispose_regular_handle_proc),
            set_lock: Some(set_lock_proc),
            get_size: Some(get_size_proc),
            set_size: Some(set_size_proc),
            recover_space: Some(recover_space_proc),
        })
    }
}

impl Drop for HandleSuite {
    fn drop(&mut self) {
        let live: Vec<usize> = self.handles.keys().copied().collect();
        for h in live {
            self.dispose(h as Handle);
        }
        let legacy: Vec<usize> = self.legacy.iter().copied().collect();
        for h in legacy {
            self.dispose_regular(h as Handle);
        }
    }
}

unsafe extern "C" fn new_proc(size: i32) -> Handle {
    let Ok(size) = usize::try_from(size) else {
        return ptr::null_mut();
    };
    with_bound(&ACTIVE, ptr::null_mut(), |suite| suite.new_handle(size))
}

unsafe extern "C" fn dispose_proc(h: Handle) {
    with_bound(&ACTIVE, (), |suite| suite.dispose(h));
}

unsafe extern "C" fn dispose_regular_handle_proc(h: Handle) {
    with_bound(&ACTIVE, (), |suite| suite.dispose_regular(h));
}

unsafe extern "C" fn get_size_proc(h: Handle) -> i32 {
    with_bound(&ACTIVE, 0, |suite| suite.size(h).map_or(0, |size| size as i32))
}

unsafe extern "C" fn set_size_proc(h: Handle, size: i32) -> OSErr {
    let Ok(size) = usize::try_from(size) else {
        return pi_sdk::errors::PARAM_ERR;
    };
    with_bound(&ACTIVE, NIL_HANDLE_ERR, |suite| suite.set_size(h, size))
}

unsafe extern "C" fn lock_proc(h: Handle, _move_high: Boolean) -> Ptr {
    with_bound(&ACTIVE, ptr::null_mut(), |suite| suite.lock(h))
}

unsafe extern "C" fn unlock_proc(h: Handle) {
    with_bound(&ACTIVE, (), |suite| suite.unlock(h));
}

unsafe extern "C" fn recover_space_proc(_size: i32) {}

unsafe extern "C" fn set_lock_proc(h: Handle, lock: Boolean, address: *mut Ptr, old_lock: *mut Boolean) {
    let state = with_bound(&ACTIVE, None, |suite| suite.set_lock(h, lock != 0));
    let (data, old) = state.unwrap_or((ptr::null_mut(), false));
    // SAFETY: out pointers come from the plugin and are either null or writable.
    unsafe {
        write_out(address, data);
        write_out(old_lock, old as Boolean);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite() -> HandleSuite {
        HandleSuite::new(Rc::new(NativeArena::new()))
    }

    #[test]
    fn handle_dereferences_to_its_data() {
        let mut suite = suite();
        let h = suite.new_handle_from(b"abc");
        assert!(suite.is_valid(h));
        // SAFETY: `h` is a live handle.
        let data = unsafe { *h };
        assert_eq!(data.cast::<u8>(), suite.lock(h).cast::<u8>());
        assert_eq!(suite.bytes(h).unwrap(), b"abc");
    }

    #[test]
    fn resize_updates_master_pointer_and_zero_fills() {
        let mut suite = suite();
        let h = suite.new_handle_from(&[9, 9]);
        assert_eq!(suite.set_size(h, 5), NO_ERR);
        assert_eq!(suite.size(h), Some(5));
        // SAFETY: `h` is a live handle of 5 bytes.
        let bytes = unsafe { std::slice::from_raw_parts((*h).cast::<u8>(), 5) };
        assert_eq!(bytes, &[9, 9, 0, 0, 0]);
    }

    #[test]
    fn dispose_releases_arena_blocks() {
        let arena = Rc::new(NativeArena::new());
        let mut suite = HandleSuite::new(arena.clone());
        let h = suite.new_handle(100);
        assert_eq!(arena.live_blocks(), 2);
        suite.dispose(h);
        assert_eq!(arena.live_blocks(), 0);
        assert!(!suite.is_valid(h));
        assert_eq!(suite.set_size(h, 3), NIL_HANDLE_ERR);
    }

    #[test]
    fn callbacks_reach_the_bound_suite() {
        let state = Rc::new(RefCell::new(suite()));
        let _binding = HandleSuite::bind(&state);
        let procs = HandleSuite::create_handle_procs();
        // SAFETY: the procs are bound to a live suite on this thread.
        unsafe {
            let h = procs.new_proc.unwrap()(16);
            assert!(!h.is_null());
            assert_eq!(procs.get_size_proc.unwrap()(h), 16);
            assert_eq!(procs.set_size_proc.unwrap()(h, 32), NO_ERR);
            assert_eq!(procs.get_size_proc.unwrap()(h), 32);
            procs.dispose_proc.unwrap()(h);
        }
        assert!(state.borrow().is_empty());
    }
}
