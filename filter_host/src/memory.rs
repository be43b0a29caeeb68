//! Native memory arena shared with plugins.
//!
//! Every block a plugin can see (buffers, handles, in/out/mask data) comes
//! from here. The arena remembers the size of each live block so callers can
//! decide whether an existing buffer is large enough, and it keeps a running
//! total of outstanding bytes. It is owned by one filter session and touched
//! only from that session's worker thread, so it has no locking.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::NonNull;

use thiserror::Error;

const BLOCK_ALIGN: usize = 16;

/// Allocation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),
    #[error("pointer {0:#x} is not a live arena block")]
    UnknownBlock(usize),
    #[error("executable memory is unavailable: {0}")]
    Executable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Heap(Layout),
    Executable(usize),
}

#[derive(Debug, Clone, Copy)]
struct Block {
    size: usize,
    kind: BlockKind,
}

/// Heap of plugin-visible blocks with size tracking.
#[derive(Debug, Default)]
pub struct NativeArena {
    blocks: RefCell<HashMap<usize, Block>>,
    bytes_in_use: Cell<usize>,
    peak_bytes: Cell<usize>,
}

impl NativeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `size` bytes, optionally zero filled.
    pub fn allocate(&self, size: usize, zero_fill: bool) -> Result<NonNull<u8>, ArenaError> {
        let layout = Layout::from_size_align(size.max(1), BLOCK_ALIGN).map_err(|_| ArenaError::OutOfMemory(size))?;
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe {
            if zero_fill {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        let ptr = NonNull::new(raw).ok_or(ArenaError::OutOfMemory(size))?;
        self.track(ptr, Block { size, kind: BlockKind::Heap(layout) });
        Ok(ptr)
    }

    /// Variant of [`allocate`](Self::allocate) returning null instead of an error.
    pub fn allocate_or_null(&self, size: usize, zero_fill: bool) -> *mut u8 {
        match self.allocate(size, zero_fill) {
            Ok(ptr) => ptr.as_ptr(),
            Err(err) => {
                tracing::warn!(%err, "arena allocation failed");
                std::ptr::null_mut()
            }
        }
    }

    /// Allocates a zero-filled block the CPU may execute.
    ///
    /// This exists only for legacy plugins whose saved parameter block
    /// contains code they jump into; nothing else should request it.
    pub fn allocate_executable(&self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        let len = size.max(1);
        let ptr = executable::map(len).map_err(ArenaError::Executable)?;
        self.track(ptr, Block { size, kind: BlockKind::Executable(len) });
        Ok(ptr)
    }

    /// Releases a block. Null is ignored.
    pub fn free(&self, ptr: *mut u8) -> Result<(), ArenaError> {
        if ptr.is_null() {
            return Ok(());
        }
        let block = self.untrack(ptr)?;
        release(ptr, block)
    }

    /// Releases a block from [`allocate_executable`](Self::allocate_executable).
    /// Heap blocks are accepted too; the matching release routine is chosen
    /// from the block's record.
    pub fn free_executable(&self, ptr: *mut u8) -> Result<(), ArenaError> {
        self.free(ptr)
    }

    /// Requested size of a live block, `None` for memory the arena does not own.
    pub fn size(&self, ptr: *const u8) -> Option<usize> {
        self.blocks.borrow().get(&(ptr as usize)).map(|block| block.size)
    }

    /// Whether `ptr` is the start of a live arena block.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.blocks.borrow().contains_key(&(ptr as usize))
    }

    /// Whether `ptr` is a live executable block.
    pub fn is_executable(&self, ptr: *const u8) -> bool {
        matches!(
            self.blocks.borrow().get(&(ptr as usize)),
            Some(Block { kind: BlockKind::Executable(_), .. })
        )
    }

    /// Resizes a heap block, moving it when the allocator can't grow it in place.
    /// New bytes are not initialised.
    pub fn realloc(&self, ptr: *mut u8, new_size: usize) -> Result<NonNull<u8>, ArenaError> {
        if ptr.is_null() {
            return self.allocate(new_size, false);
        }
        let block = self
            .blocks
            .borrow()
            .get(&(ptr as usize))
            .copied()
            .ok_or(ArenaError::UnknownBlock(ptr as usize))?;

        match block.kind {
            BlockKind::Heap(layout) => {
                let new_layout = Layout::from_size_align(new_size.max(1), BLOCK_ALIGN)
                    .map_err(|_| ArenaError::OutOfMemory(new_size))?;
                // SAFETY: `ptr` was allocated with `layout` and the new size is
                // non-zero and valid for the alignment (checked above).
                let raw = unsafe { alloc::realloc(ptr, layout, new_layout.size()) };
                let moved = NonNull::new(raw).ok_or(ArenaError::OutOfMemory(new_size))?;
                self.untrack(ptr)?;
                self.track(moved, Block { size: new_size, kind: BlockKind::Heap(new_layout) });
                Ok(moved)
            }
            BlockKind::Executable(_) => {
                let moved = self.allocate_executable(new_size)?;
                // SAFETY: both blocks are live and at least `min(old, new)` bytes long.
                unsafe { std::ptr::copy_nonoverlapping(ptr, moved.as_ptr(), block.size.min(new_size)) };
                self.free_executable(ptr)?;
                Ok(moved)
            }
        }
    }

    /// Bytes currently handed out.
    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use.get()
    }

    /// Largest value [`bytes_in_use`](Self::bytes_in_use) has reached.
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.get()
    }

    /// Number of live blocks.
    pub fn live_blocks(&self) -> usize {
        self.blocks.borrow().len()
    }

    fn track(&self, ptr: NonNull<u8>, block: Block) {
        self.blocks.borrow_mut().insert(ptr.as_ptr() as usize, block);
        let used = self.bytes_in_use.get() + block.size;
        self.bytes_in_use.set(used);
        self.peak_bytes.set(self.peak_bytes.get().max(used));
    }

    fn untrack(&self, ptr: *mut u8) -> Result<Block, ArenaError> {
        let block = self
            .blocks
            .borrow_mut()
            .remove(&(ptr as usize))
            .ok_or(ArenaError::UnknownBlock(ptr as usize))?;
        self.bytes_in_use.set(self.bytes_in_use.get().saturating_sub(block.size));
        Ok(block)
    }
}

impl Drop for NativeArena {
    fn drop(&mut self) {
        let blocks = std::mem::take(self.blocks.get_mut());
        if !blocks.is_empty() {
            tracing::debug!(count = blocks.len(), bytes = self.bytes_in_use.get(), "releasing leaked plugin blocks");
        }
        for (addr, block) in blocks {
            if let Err(err) = release(addr as *mut u8, block) {
                tracing::warn!(%err, "failed to release plugin block");
            }
        }
    }
}

fn release(ptr: *mut u8, block: Block) -> Result<(), ArenaError> {
    match block.kind {
        BlockKind::Heap(layout) => {
            // SAFETY: the block was produced by `alloc`/`alloc_zeroed`/`realloc`
            // with this layout and has just been removed from the live set.
            unsafe { alloc::dealloc(ptr, layout) };
            Ok(())
        }
        BlockKind::Executable(len) => executable::unmap(ptr, len).map_err(ArenaError::Executable),
    }
}

#[cfg(unix)]
mod executable {
    use std::ptr::NonNull;

    use rustix::mm::{MapFlags, ProtFlags, mmap_anonymous, munmap};

    pub(super) fn map(len: usize) -> Result<NonNull<u8>, String> {
        // SAFETY: a fresh anonymous private mapping aliases nothing.
        let raw = unsafe {
            mmap_anonymous(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE | ProtFlags::EXEC,
                MapFlags::PRIVATE,
            )
        }
        .map_err(|err| err.to_string())?;
        NonNull::new(raw.cast::<u8>()).ok_or_else(|| "mmap returned null".to_string())
    }

    pub(super) fn unmap(ptr: *mut u8, len: usize) -> Result<(), String> {
        // SAFETY: `ptr`/`len` describe a mapping created by `map`.
        unsafe { munmap(ptr.cast(), len) }.map_err(|err| err.to_string())
    }
}

#[cfg(windows)]
mod executable {
    use std::ptr::NonNull;

    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE, VirtualAlloc, VirtualFree,
    };

    pub(super) fn map(len: usize) -> Result<NonNull<u8>, String> {
        // SAFETY: reserving and committing fresh pages aliases nothing.
        let raw = unsafe { VirtualAlloc(std::ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_EXECUTE_READWRITE) };
        NonNull::new(raw.cast::<u8>()).ok_or_else(|| std::io::Error::last_os_error().to_string())
    }

    pub(super) fn unmap(ptr: *mut u8, _len: usize) -> Result<(), String> {
        // SAFETY: `ptr` is the base of a region returned by `VirtualAlloc`.
        let ok = unsafe { VirtualFree(ptr.cast(), 0, MEM_RELEASE) };
        if ok == 0 {
            Err(std::io::Error::last_os_error().to_string())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_tracked_per_block() {
        let arena = NativeArena::new();
        let a = arena.allocate(24, true).unwrap();
        let b = arena.allocate(0, false).unwrap();

        assert_eq!(arena.size(a.as_ptr()), Some(24));
        assert_eq!(arena.size(b.as_ptr()), Some(0));
        assert_eq!(arena.bytes_in_use(), 24);
        // SAFETY: 24 zeroed bytes were just allocated.
        let bytes = unsafe { std::slice::from_raw_parts(a.as_ptr(), 24) };
        assert!(bytes.iter().all(|&v| v == 0));

        arena.free(a.as_ptr()).unwrap();
        assert_eq!(arena.size(a.as_ptr()), None);
        assert_eq!(arena.bytes_in_use(), 0);
        assert_eq!(arena.peak_bytes(), 24);
    }

    #[test]
    fn realloc_keeps_contents() {
        let arena = NativeArena::new();
        let a = arena.allocate(4, false).unwrap();
        // SAFETY: 4 bytes are allocated.
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), a.as_ptr(), 4) };

        let b = arena.realloc(a.as_ptr(), 64).unwrap();
        assert_eq!(arena.size(b.as_ptr()), Some(64));
        // SAFETY: the first 4 bytes were preserved by realloc.
        let head = unsafe { std::slice::from_raw_parts(b.as_ptr(), 4) };
        assert_eq!(head, &[1, 2, 3, 4]);
        assert_eq!(arena.live_blocks(), 1);
    }

    #[test]
    fn foreign_pointers_are_rejected() {
        let arena = NativeArena::new();
        let mut local = 0u8;
        assert_eq!(arena.size(&local), None);
        assert!(matches!(arena.free(&mut local), Err(ArenaError::UnknownBlock(_))));
        assert!(arena.free(std::ptr::null_mut()).is_ok());
    }

    #[test]
    fn executable_blocks_are_flagged() {
        let arena = NativeArena::new();
        let exec = arena.allocate_executable(32).unwrap();
        let plain = arena.allocate(32, false).unwrap();
        assert!(arena.is_executable(exec.as_ptr()));
        assert!(!arena.is_executable(plain.as_ptr()));
        arena.free_executable(exec.as_ptr()).unwrap();
        assert!(!arena.contains(exec.as_ptr()));
    }
}
