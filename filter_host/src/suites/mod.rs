//! Callback procsets handed to plugins.
//!
//! Most 8bf callbacks carry no context argument, so each suite keeps its
//! per-session state in a thread-local slot that the active session binds for
//! the duration of the run. All plugin calls happen on the session's worker
//! thread, which makes the thread-local the session's context pointer. The
//! `extern "C"` thunks look the state up, run the operation inside
//! `catch_unwind` and turn failures into status codes; nothing unwinds into
//! plugin code.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::thread::LocalKey;

pub mod buffer;
pub mod channel_ports;
pub mod color_services;
pub mod color_space;
pub mod descriptor;
pub mod handle;
pub mod image_services;
pub mod pica;
pub mod property;
pub mod resource;

/// Thread-local slot holding the suite state bound for the current run.
pub(crate) type Slot<T> = LocalKey<RefCell<Weak<RefCell<T>>>>;

/// Restores the previous binding of a slot when dropped.
pub(crate) struct SlotBinding<T: 'static> {
    slot: &'static Slot<T>,
    previous: Weak<RefCell<T>>,
}

impl<T: 'static> Drop for SlotBinding<T> {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        self.slot.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// Makes `state` reachable from the suite's callbacks on this thread.
pub(crate) fn bind<T: 'static>(slot: &'static Slot<T>, state: &Rc<RefCell<T>>) -> SlotBinding<T> {
    let previous = slot.with(|cell| cell.replace(Rc::downgrade(state)));
    SlotBinding { slot, previous }
}

/// Runs `f` against the bound state, or returns `fallback` when nothing is
/// bound, the state is already borrowed or `f` panics.
pub(crate) fn with_bound<T: 'static, R>(slot: &'static Slot<T>, fallback: R, f: impl FnOnce(&mut T) -> R) -> R {
    let state = slot.with(|cell| cell.borrow().upgrade());
    let Some(state) = state else {
        tracing::warn!(suite = std::any::type_name::<T>(), "callback with no bound session");
        return fallback;
    };
    let Ok(mut guard) = state.try_borrow_mut() else {
        tracing::warn!(suite = std::any::type_name::<T>(), "re-entrant callback rejected");
        return fallback;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| f(&mut guard))) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!(suite = std::any::type_name::<T>(), "callback panicked");
            fallback
        }
    }
}

/// Writes `value` through a plugin-supplied out pointer when it is non-null.
///
/// # Safety
/// `ptr` must be null or valid for a write of `T`.
pub(crate) unsafe fn write_out<T>(ptr: *mut T, value: T) {
    if !ptr.is_null() {
        // SAFETY: non-null and valid per the caller's contract.
        unsafe { ptr.write_unaligned(value) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    thread_local! {
        static COUNTER: RefCell<Weak<RefCell<u32>>> = RefCell::new(Weak::new());
    }

    #[test]
    fn binding_is_scoped() {
        let state = Rc::new(RefCell::new(1u32));
        assert_eq!(with_bound(&COUNTER, 0, |v| *v), 0);
        {
            let _binding = bind(&COUNTER, &state);
            assert_eq!(with_bound(&COUNTER, 0, |v| { *v += 1; *v }), 2);
        }
        assert_eq!(with_bound(&COUNTER, 0, |v| *v), 0);
        assert_eq!(*state.borrow(), 2);
    }

    #[test]
    fn reentrant_and_panicking_callbacks_fall_back() {
        let state = Rc::new(RefCell::new(5u32));
        let _binding = bind(&COUNTER, &state);
        let nested = with_bound(&COUNTER, 0, |_| with_bound(&COUNTER, 99, |v| *v));
        assert_eq!(nested, 99);
        let panicked = with_bound(&COUNTER, 7, |_| -> u32 { panic!("boom") });
        assert_eq!(panicked, 7);
    }
}
