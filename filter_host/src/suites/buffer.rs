//! Buffer suite: plain scratch blocks, addressed by their data pointer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr;
use std::rc::{Rc, Weak};

use pi_sdk::errors::{MEM_FULL_ERR, NO_ERR, PARAM_ERR};
use pi_sdk::pica::PSBufferSuite1;
use pi_sdk::procs::{BufferProcs, K_CURRENT_BUFFER_PROCS_COUNT, K_CURRENT_BUFFER_PROCS_VERSION};
use pi_sdk::types::{Boolean, BufferID, OSErr, Ptr};

use super::{SlotBinding, with_bound, write_out};
use crate::memory::NativeArena;

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<BufferSuite>>> = RefCell::new(Weak::new());
}

pub struct BufferSuite {
    arena: Rc<NativeArena>,
    buffers: HashMap<usize, usize>,
    space: i64,
}

impl BufferSuite {
    /// `space` is the number of bytes reported as available to the plugin.
    pub fn new(arena: Rc<NativeArena>, space: i64) -> Self {
        Self {
            arena,
            buffers: HashMap::new(),
            space,
        }
    }

    pub(crate) fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        super::bind(&ACTIVE, state)
    }

    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        let block = self.arena.allocate_or_null(size, false);
        if block.is_null() {
            return None;
        }
        self.buffers.insert(block as usize, size);
        tracing::trace!(size, "buffer allocated");
        Some(block)
    }

    pub fn free(&mut self, buffer: *mut u8) {
        if self.buffers.remove(&(buffer as usize)).is_some() {
            let _ = self.arena.free(buffer);
        } else if !buffer.is_null() {
            tracing::warn!(buffer = buffer as usize, "free of unknown buffer ignored");
        }
    }

    pub fn size(&self, buffer: *const u8) -> Option<usize> {
        self.buffers.get(&(buffer as usize)).copied()
    }

    pub fn is_valid(&self, buffer: *const u8) -> bool {
        self.buffers.contains_key(&(buffer as usize))
    }

    pub fn space(&self) -> i64 {
        self.space
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn create_buffer_procs() -> Box<BufferProcs> {
        Box::new(BufferProcs {
            buffer_procs_version: K_CURRENT_BUFFER_PROCS_VERSION,
            num_buffer_procs: K_CURRENT_BUFFER_PROCS_COUNT,
            allocate_proc: Some(allocate_proc),
            lock_proc: Some(lock_proc),
            unlock_proc: Some(unlock_proc),
            free_proc: Some(free_proc),
            space_proc: Some(space_proc),
        })
    }

    pub fn create_pica_suite1() -> Box<PSBufferSuite1> {
        Box::new(PSBufferSuite1 {
            new: Some(pica_new),
            dispose: Some(pica_dispose),
            get_size: Some(pica_get_size),
            get_space: Some(pica_get_space),
        })
    }
}

impl Drop for BufferSuite {
    fn drop(&mut self) {
        for (buffer, _) in self.buffers.drain() {
            let _ = self.arena.free(buffer as *mut u8);
        }
    }
}

unsafe extern "C" fn allocate_proc(size: i32, buffer_id: *mut BufferID) -> OSErr {
    if buffer_id.is_null() {
        return PARAM_ERR;
    }
    let Ok(size) = usize::try_from(size) else {
        return PARAM_ERR;
    };
    let block = with_bound(&ACTIVE, None, |suite| suite.allocate(size));
    // SAFETY: `buffer_id` is non-null and points at the plugin's out slot.
    unsafe {
        match block {
            Some(block) => {
                buffer_id.write_unaligned(block.cast());
                NO_ERR
            }
            None => {
                buffer_id.write_unaligned(ptr::null_mut());
                MEM_FULL_ERR
            }
        }
    }
}

unsafe extern "C" fn lock_proc(buffer_id: BufferID, _move_high: Boolean) -> Ptr {
    with_bound(&ACTIVE, ptr::null_mut(), |suite| {
        if suite.is_valid(buffer_id.cast::<u8>()) { buffer_id.cast() } else { ptr::null_mut() }
    })
}

unsafe extern "C" fn unlock_proc(_buffer_id: BufferID) {}

unsafe extern "C" fn free_proc(buffer_id: BufferID) {
    with_bound(&ACTIVE, (), |suite| suite.free(buffer_id.cast()));
}

unsafe extern "C" fn space_proc() -> i32 {
    with_bound(&ACTIVE, 0, |suite| suite.space().clamp(0, i32::MAX as i64) as i32)
}

unsafe extern "C" fn pica_new(requested_size: *mut u32, minimum_size: u32) -> Ptr {
    if requested_size.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: `requested_size` is non-null and readable.
    let requested = unsafe { requested_size.read_unaligned() };
    let allocated = with_bound(&ACTIVE, None, |suite| {
        suite
            .allocate(requested as usize)
            .map(|block| (block, requested))
            .or_else(|| suite.allocate(minimum_size as usize).map(|block| (block, minimum_size)))
    });
    match allocated {
        Some((block, size)) => {
            // SAFETY: checked non-null above.
            unsafe { requested_size.write_unaligned(size) };
            block.cast()
        }
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn pica_dispose(buffer: *mut Ptr) {
    if buffer.is_null() {
        return;
    }
    // SAFETY: `buffer` is non-null and holds the plugin's buffer pointer.
    let block = unsafe { buffer.read_unaligned() };
    with_bound(&ACTIVE, (), |suite| suite.free(block.cast()));
    // SAFETY: as above.
    unsafe { write_out(buffer, ptr::null_mut()) };
}

unsafe extern "C" fn pica_get_size(buffer: Ptr) -> u32 {
    with_bound(&ACTIVE, 0, |suite| suite.size(buffer.cast::<u8>()).map_or(0, |size| size as u32))
}

unsafe extern "C" fn pica_get_space() -> u32 {
    with_bound(&ACTIVE, 0, |suite| suite.space().clamp(0, u32::MAX as i64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_tracked_until_freed() {
        let arena = Rc::new(NativeArena::new());
        let mut suite = BufferSuite::new(arena.clone(), 1 << 20);
        let block = suite.allocate(64).unwrap();
        assert_eq!(suite.size(block), Some(64));
        suite.free(block);
        assert!(suite.is_empty());
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn procs_allocate_and_report_space() {
        let state = Rc::new(RefCell::new(BufferSuite::new(Rc::new(NativeArena::new()), 4096)));
        let _binding = BufferSuite::bind(&state);
        let procs = BufferSuite::create_buffer_procs();
        let mut id: BufferID = ptr::null_mut();
        // SAFETY: the procs are bound to a live suite on this thread.
        unsafe {
            assert_eq!(procs.allocate_proc.unwrap()(10, &mut id), NO_ERR);
            let data = procs.lock_proc.unwrap()(id, 0);
            assert_eq!(data.cast::<std::ffi::c_void>(), id);
            assert_eq!(procs.space_proc.unwrap()(), 4096);
            assert_eq!(procs.allocate_proc.unwrap()(-1, &mut id), PARAM_ERR);
            procs.free_proc.unwrap()(data.cast());
        }
        assert!(state.borrow().is_empty());
    }

    #[test]
    fn pica_new_reports_granted_size() {
        let state = Rc::new(RefCell::new(BufferSuite::new(Rc::new(NativeArena::new()), 4096)));
        let _binding = BufferSuite::bind(&state);
        let suite = BufferSuite::create_pica_suite1();
        let mut requested = 256u32;
        // SAFETY: bound suite, valid out pointers.
        unsafe {
            let mut block = suite.new.unwrap()(&mut requested, 16);
            assert!(!block.is_null());
            assert_eq!(requested, 256);
            assert_eq!(suite.get_size.unwrap()(block), 256);
            suite.dispose.unwrap()(&mut block);
            assert!(block.is_null());
        }
    }
}
