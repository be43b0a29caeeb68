//! Resource suite: host-side resources a plugin keeps with the document.
//!
//! Resources are grouped by type and addressed with 1-based indices within
//! their type. They survive the run as part of the captured settings.

use std::cell::RefCell;
use std::ptr;
use std::rc::{Rc, Weak};

use pi_sdk::errors::{MEM_FULL_ERR, NIL_HANDLE_ERR, NO_ERR};
use pi_sdk::procs::{K_CURRENT_RESOURCE_PROCS_COUNT, K_CURRENT_RESOURCE_PROCS_VERSION, ResourceProcs};
use pi_sdk::types::{Handle, OSErr, ResType};
use serde::{Deserialize, Serialize};

use super::handle::HandleSuite;
use super::{SlotBinding, with_bound};

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<ResourceSuite>>> = RefCell::new(Weak::new());
}

/// One resource added by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudoResource {
    pub res_type: u32,
    pub data: Vec<u8>,
}

pub struct ResourceSuite {
    resources: Vec<PseudoResource>,
    handles: Rc<RefCell<HandleSuite>>,
}

impl ResourceSuite {
    pub fn new(resources: Vec<PseudoResource>, handles: Rc<RefCell<HandleSuite>>) -> Self {
        Self { resources, handles }
    }

    pub(crate) fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        super::bind(&ACTIVE, state)
    }

    pub fn resources(&self) -> &[PseudoResource] {
        &self.resources
    }

    pub fn count(&self, res_type: ResType) -> usize {
        self.resources.iter().filter(|r| r.res_type == res_type).count()
    }

    fn position(&self, res_type: ResType, index: i16) -> Option<usize> {
        let nth = usize::try_from(index).ok()?.checked_sub(1)?;
        self.resources
            .iter()
            .enumerate()
            .filter(|(_, r)| r.res_type == res_type)
            .nth(nth)
            .map(|(pos, _)| pos)
    }

    /// A fresh handle holding a copy of the resource; null when absent.
    pub fn get(&mut self, res_type: ResType, index: i16) -> Handle {
        match self.position(res_type, index) {
            Some(pos) => self.handles.borrow_mut().new_handle_from(&self.resources[pos].data),
            None => ptr::null_mut(),
        }
    }

    pub fn delete(&mut self, res_type: ResType, index: i16) {
        if let Some(pos) = self.position(res_type, index) {
            self.resources.remove(pos);
        }
    }

    pub fn add(&mut self, res_type: ResType, data: Handle) -> OSErr {
        let Some(bytes) = self.handles.borrow().bytes(data) else {
            return NIL_HANDLE_ERR;
        };
        if self.resources.try_reserve(1).is_err() {
            return MEM_FULL_ERR;
        }
        self.resources.push(PseudoResource { res_type, data: bytes });
        NO_ERR
    }

    pub fn create_resource_procs() -> Box<ResourceProcs> {
        Box::new(ResourceProcs {
            resource_procs_version: K_CURRENT_RESOURCE_PROCS_VERSION,
            num_resource_procs: K_CURRENT_RESOURCE_PROCS_COUNT,
            count_proc: Some(count_proc),
            get_proc: Some(get_proc),
            delete_proc: Some(delete_proc),
            add_proc: Some(add_proc),
        })
    }
}

unsafe extern "C" fn count_proc(of_type: ResType) -> i16 {
    with_bound(&ACTIVE, 0, |suite| suite.count(of_type).min(i16::MAX as usize) as i16)
}

unsafe extern "C" fn get_proc(of_type: ResType, index: i16) -> Handle {
    with_bound(&ACTIVE, ptr::null_mut(), |suite| suite.get(of_type, index))
}

unsafe extern "C" fn delete_proc(of_type: ResType, index: i16) {
    with_bound(&ACTIVE, (), |suite| suite.delete(of_type, index));
}

unsafe extern "C" fn add_proc(of_type: ResType, data: Handle) -> OSErr {
    with_bound(&ACTIVE, NIL_HANDLE_ERR, |suite| suite.add(of_type, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NativeArena;
    use pi_sdk::four_cc;

    #[test]
    fn resources_are_indexed_per_type() {
        let handles = Rc::new(RefCell::new(HandleSuite::new(Rc::new(NativeArena::new()))));
        let state = Rc::new(RefCell::new(ResourceSuite::new(Vec::new(), handles.clone())));
        let _binding = ResourceSuite::bind(&state);
        let procs = ResourceSuite::create_resource_procs();
        let kind = four_cc(b"Test");
        let a = handles.borrow_mut().new_handle_from(b"first");
        let b = handles.borrow_mut().new_handle_from(b"second");
        // SAFETY: procs are bound to a live suite on this thread.
        unsafe {
            assert_eq!(procs.add_proc.unwrap()(kind, a), NO_ERR);
            assert_eq!(procs.add_proc.unwrap()(four_cc(b"Othr"), a), NO_ERR);
            assert_eq!(procs.add_proc.unwrap()(kind, b), NO_ERR);
            assert_eq!(procs.count_proc.unwrap()(kind), 2);
            let second = procs.get_proc.unwrap()(kind, 2);
            assert_eq!(handles.borrow().bytes(second).unwrap(), b"second");
            assert!(procs.get_proc.unwrap()(kind, 3).is_null());
            procs.delete_proc.unwrap()(kind, 1);
            assert_eq!(procs.count_proc.unwrap()(kind), 1);
        }
        assert_eq!(state.borrow().resources().len(), 2);
    }
}
