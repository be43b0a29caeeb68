//! SPBasic provider: suites acquired by name and version.
//!
//! Acquired suites live in a registry keyed by `(name, version)` with a
//! reference count. The first acquisition builds the suite, later ones hand
//! back the same pointer, and the last release frees it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};
use std::ptr;
use std::rc::{Rc, Weak};
use std::time::Instant;

use pi_sdk::errors::*;
use pi_sdk::pica::*;
use pi_sdk::procs::{DisplayPixelsProc, ProcessEventProc, ProgressProc, TestAbortProc};

use super::buffer::BufferSuite;
use super::color_space::{ColorTable, K_PS_COLOR_SPACE_SUITE_VERSION1};
use super::handle::HandleSuite;
use super::property::PropertySuite;
use super::{SlotBinding, with_bound, write_out};
use crate::memory::NativeArena;

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<PicaSuites>>> = RefCell::new(Weak::new());
}

pub const K_PS_BUFFER_SUITE_VERSION1: i32 = 1;
pub const K_PS_HANDLE_SUITE_VERSION1: i32 = 1;
pub const K_PS_HANDLE_SUITE_VERSION2: i32 = 2;
pub const K_PS_PROPERTY_SUITE_VERSION1: i32 = 1;
pub const K_PS_UI_HOOKS_SUITE_VERSION1: i32 = 1;
pub const K_PS_ERROR_SUITE_VERSION1: i32 = 1;

/// Host callbacks the UI hooks suite forwards to.
#[derive(Clone, Copy)]
pub struct UiHooks {
    pub process_event: ProcessEventProc,
    pub display_pixels: DisplayPixelsProc,
    pub progress: ProgressProc,
    pub test_abort: TestAbortProc,
}

/// Marshalled suite, kept alive while its reference count is positive.
enum SuiteBlock {
    Buffer(Box<PSBufferSuite1>),
    Handle1(Box<PSHandleSuite1>),
    Handle2(Box<PSHandleSuite2>),
    Property(Box<PSPropertySuite1>),
    UiHooks(Box<PSUIHooksSuite1>),
    Error(Box<PSErrorSuite1>),
    ColorSpace(Box<PSColorSpaceSuite1>),
}

impl SuiteBlock {
    fn as_ptr(&self) -> *const c_void {
        match self {
            SuiteBlock::Buffer(b) => &**b as *const PSBufferSuite1 as *const c_void,
            SuiteBlock::Handle1(b) => &**b as *const PSHandleSuite1 as *const c_void,
            SuiteBlock::Handle2(b) => &**b as *const PSHandleSuite2 as *const c_void,
            SuiteBlock::Property(b) => &**b as *const PSPropertySuite1 as *const c_void,
            SuiteBlock::UiHooks(b) => &**b as *const PSUIHooksSuite1 as *const c_void,
            SuiteBlock::Error(b) => &**b as *const PSErrorSuite1 as *const c_void,
            SuiteBlock::ColorSpace(b) => &**b as *const PSColorSpaceSuite1 as *const c_void,
        }
    }
}

struct ActiveSuite {
    ref_count: u32,
    block: SuiteBlock,
}

pub struct PicaSuites {
    arena: Rc<NativeArena>,
    ui: UiHooks,
    about_mode: bool,
    registry: HashMap<(Vec<u8>, i32), ActiveSuite>,
    blocks: HashMap<usize, usize>,
    colors: ColorTable,
    error_message: Option<String>,
    started: Instant,
}

impl PicaSuites {
    /// `about_mode` refuses the suites that need an open document.
    pub fn new(arena: Rc<NativeArena>, ui: UiHooks, about_mode: bool) -> Self {
        Self {
            arena,
            ui,
            about_mode,
            registry: HashMap::new(),
            blocks: HashMap::new(),
            colors: ColorTable::default(),
            error_message: None,
            started: Instant::now(),
        }
    }

    pub(crate) fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        super::bind(&ACTIVE, state)
    }

    fn build(&self, name: &CStr, version: i32) -> Option<SuiteBlock> {
        let block = if name == K_PS_BUFFER_SUITE && version == K_PS_BUFFER_SUITE_VERSION1 {
            SuiteBlock::Buffer(BufferSuite::create_pica_suite1())
        } else if name == K_PS_HANDLE_SUITE && version == K_PS_HANDLE_SUITE_VERSION1 {
            SuiteBlock::Handle1(HandleSuite::create_pica_suite1())
        } else if name == K_PS_HANDLE_SUITE && version == K_PS_HANDLE_SUITE_VERSION2 {
            SuiteBlock::Handle2(HandleSuite::create_pica_suite2())
        } else if name == K_PS_PROPERTY_SUITE && version == K_PS_PROPERTY_SUITE_VERSION1 && !self.about_mode {
            SuiteBlock::Property(PropertySuite::create_pica_suite1())
        } else if name == K_PS_UI_HOOKS_SUITE && version == K_PS_UI_HOOKS_SUITE_VERSION1 {
            SuiteBlock::UiHooks(Box::new(PSUIHooksSuite1 {
                process_event: self.ui.process_event,
                display_pixels: self.ui.display_pixels,
                progress_bar: self.ui.progress,
                test_abort: self.ui.test_abort,
                main_app_window: Some(main_app_window),
                host_set_cursor: Some(host_set_cursor),
                host_tick_count: Some(host_tick_count),
                plugin_name: Some(plugin_name),
            }))
        } else if name == K_PS_ERROR_SUITE && version == K_PS_ERROR_SUITE_VERSION1 {
            SuiteBlock::Error(Box::new(PSErrorSuite1 {
                set_error_from_p_string: Some(set_error_from_p_string),
                set_error_from_c_string: Some(set_error_from_c_string),
                set_error_from_z_string: Some(set_error_from_z_string),
            }))
        } else if name == K_PS_COLOR_SPACE_SUITE && version == K_PS_COLOR_SPACE_SUITE_VERSION1 && !self.about_mode {
            SuiteBlock::ColorSpace(ColorTable::create_pica_suite1())
        } else {
            return None;
        };
        Some(block)
    }

    /// Returns the suite pointer, building the suite on first use.
    pub fn acquire(&mut self, name: &CStr, version: i32) -> Result<*const c_void, SPErr> {
        let key = (name.to_bytes().to_vec(), version);
        if let Some(active) = self.registry.get_mut(&key) {
            active.ref_count += 1;
            return Ok(active.block.as_ptr());
        }
        let Some(block) = self.build(name, version) else {
            tracing::debug!(suite = %name.to_string_lossy(), version, "suite not available");
            return Err(K_SP_SUITE_NOT_FOUND_ERROR);
        };
        tracing::debug!(suite = %name.to_string_lossy(), version, "suite acquired");
        let suite = block.as_ptr();
        self.registry.insert(key, ActiveSuite { ref_count: 1, block });
        Ok(suite)
    }

    pub fn release(&mut self, name: &CStr, version: i32) -> SPErr {
        let key = (name.to_bytes().to_vec(), version);
        match self.registry.get_mut(&key) {
            Some(active) => {
                active.ref_count -= 1;
                if active.ref_count == 0 {
                    self.registry.remove(&key);
                }
                K_SP_NO_ERROR
            }
            None => K_SP_SUITE_NOT_FOUND_ERROR,
        }
    }

    /// Current reference count of a suite, zero when not acquired.
    pub fn ref_count(&self, name: &CStr, version: i32) -> u32 {
        self.registry
            .get(&(name.to_bytes().to_vec(), version))
            .map_or(0, |active| active.ref_count)
    }

    pub fn allocate_block(&mut self, size: usize) -> Option<*mut c_void> {
        let block = self.arena.allocate(size, false).ok()?;
        self.blocks.insert(block.as_ptr() as usize, size);
        Some(block.as_ptr().cast())
    }

    pub fn free_block(&mut self, block: *mut c_void) -> SPErr {
        if self.blocks.remove(&(block as usize)).is_none() {
            return K_SP_BAD_PARAMETER_ERROR;
        }
        let _ = self.arena.free(block.cast());
        K_SP_NO_ERROR
    }

    pub fn reallocate_block(&mut self, block: *mut c_void, new_size: usize) -> Option<*mut c_void> {
        if block.is_null() {
            return self.allocate_block(new_size);
        }
        if !self.blocks.contains_key(&(block as usize)) {
            return None;
        }
        let moved = self.arena.realloc(block.cast(), new_size).ok()?;
        self.blocks.remove(&(block as usize));
        self.blocks.insert(moved.as_ptr() as usize, new_size);
        Some(moved.as_ptr().cast())
    }

    pub fn set_error_message(&mut self, message: String) {
        self.error_message = Some(message);
    }

    /// Message set through the error suite, if any.
    pub fn take_error_message(&mut self) -> Option<String> {
        self.error_message.take()
    }

    fn tick_count(&self) -> u32 {
        (self.started.elapsed().as_millis() * 60 / 1000) as u32
    }

    pub fn create_sp_basic_suite() -> Box<SPBasicSuite> {
        Box::new(SPBasicSuite {
            acquire_suite: Some(acquire_suite),
            release_suite: Some(release_suite),
            is_equal: Some(is_equal),
            allocate_block: Some(allocate_block),
            free_block: Some(free_block),
            reallocate_block: Some(reallocate_block),
            undefined: Some(undefined),
        })
    }
}

/// Runs `f` against the colour table of the bound provider.
pub(crate) fn with_colors<R>(fallback: R, f: impl FnOnce(&mut ColorTable) -> R) -> R {
    with_bound(&ACTIVE, fallback, |pica| f(&mut pica.colors))
}

impl Drop for PicaSuites {
    fn drop(&mut self) {
        for (block, _) in self.blocks.drain() {
            let _ = self.arena.free(block as *mut u8);
        }
    }
}

unsafe extern "C" fn acquire_suite(name: *const c_char, version: i32, suite: *mut *const c_void) -> SPErr {
    if name.is_null() || suite.is_null() {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    // SAFETY: non-null, NUL-terminated suite name from the plugin.
    let name = unsafe { CStr::from_ptr(name) };
    let result = with_bound(&ACTIVE, Err(K_SP_SUITE_NOT_FOUND_ERROR), |pica| pica.acquire(name, version));
    let (pointer, err) = match result {
        Ok(pointer) => (pointer, K_SP_NO_ERROR),
        Err(err) => (ptr::null(), err),
    };
    // SAFETY: checked non-null above.
    unsafe { suite.write_unaligned(pointer) };
    err
}

unsafe extern "C" fn release_suite(name: *const c_char, version: i32) -> SPErr {
    if name.is_null() {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    // SAFETY: non-null, NUL-terminated suite name from the plugin.
    let name = unsafe { CStr::from_ptr(name) };
    with_bound(&ACTIVE, K_SP_BAD_PARAMETER_ERROR, |pica| pica.release(name, version))
}

unsafe extern "C" fn is_equal(token1: *const c_char, token2: *const c_char) -> i32 {
    if token1.is_null() || token2.is_null() {
        return (token1 == token2) as i32;
    }
    // SAFETY: non-null, NUL-terminated strings from the plugin.
    unsafe { (CStr::from_ptr(token1) == CStr::from_ptr(token2)) as i32 }
}

unsafe extern "C" fn allocate_block(size: usize, block: *mut *mut c_void) -> SPErr {
    if block.is_null() {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    let allocated = with_bound(&ACTIVE, None, |pica| pica.allocate_block(size));
    // SAFETY: checked non-null above.
    unsafe { block.write_unaligned(allocated.unwrap_or(ptr::null_mut())) };
    if allocated.is_some() { K_SP_NO_ERROR } else { K_SP_OUT_OF_MEMORY_ERROR }
}

unsafe extern "C" fn free_block(block: *mut c_void) -> SPErr {
    with_bound(&ACTIVE, K_SP_BAD_PARAMETER_ERROR, |pica| pica.free_block(block))
}

unsafe extern "C" fn reallocate_block(block: *mut c_void, new_size: usize, new_block: *mut *mut c_void) -> SPErr {
    if new_block.is_null() {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    match with_bound(&ACTIVE, None, |pica| pica.reallocate_block(block, new_size)) {
        Some(moved) => {
            // SAFETY: checked non-null above.
            unsafe { new_block.write_unaligned(moved) };
            K_SP_NO_ERROR
        }
        None => K_SP_OUT_OF_MEMORY_ERROR,
    }
}

unsafe extern "C" fn undefined() -> SPErr {
    K_SP_UNIMPLEMENTED_ERROR
}

unsafe extern "C" fn main_app_window() -> isize {
    0
}

unsafe extern "C" fn host_set_cursor(_cursor: *const c_void) -> SPErr {
    K_SP_NO_ERROR
}

unsafe extern "C" fn host_tick_count() -> u32 {
    with_bound(&ACTIVE, 0, |pica| pica.tick_count())
}

unsafe extern "C" fn plugin_name(_plugin_ref: *mut c_void, name: *mut *mut c_void) -> SPErr {
    // SAFETY: null or writable.
    unsafe { write_out(name, ptr::null_mut()) };
    K_SP_UNIMPLEMENTED_ERROR
}

unsafe extern "C" fn set_error_from_p_string(error_string: *const u8) -> SPErr {
    if error_string.is_null() {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    // SAFETY: a Pascal string: length byte then that many bytes.
    let message = unsafe {
        let len = *error_string as usize;
        String::from_utf8_lossy(std::slice::from_raw_parts(error_string.add(1), len)).into_owned()
    };
    with_bound(&ACTIVE, K_SP_BAD_PARAMETER_ERROR, |pica| {
        pica.set_error_message(message);
        K_SP_NO_ERROR
    })
}

unsafe extern "C" fn set_error_from_c_string(error_string: *const c_char) -> SPErr {
    if error_string.is_null() {
        return K_SP_BAD_PARAMETER_ERROR;
    }
    // SAFETY: non-null, NUL-terminated.
    let message = unsafe { CStr::from_ptr(error_string) }.to_string_lossy().into_owned();
    with_bound(&ACTIVE, K_SP_BAD_PARAMETER_ERROR, |pica| {
        pica.set_error_message(message);
        K_SP_NO_ERROR
    })
}

unsafe extern "C" fn set_error_from_z_string(_error_string: *mut c_void) -> SPErr {
    K_SP_UNIMPLEMENTED_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooks() -> UiHooks {
        UiHooks {
            process_event: None,
            display_pixels: None,
            progress: None,
            test_abort: None,
        }
    }

    #[test]
    fn acquisitions_are_reference_counted() {
        let mut pica = PicaSuites::new(Rc::new(NativeArena::new()), hooks(), false);
        let first = pica.acquire(K_PS_HANDLE_SUITE, 2).unwrap();
        let second = pica.acquire(K_PS_HANDLE_SUITE, 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(pica.ref_count(K_PS_HANDLE_SUITE, 2), 2);
        assert_eq!(pica.release(K_PS_HANDLE_SUITE, 2), K_SP_NO_ERROR);
        assert_eq!(pica.release(K_PS_HANDLE_SUITE, 2), K_SP_NO_ERROR);
        assert_eq!(pica.ref_count(K_PS_HANDLE_SUITE, 2), 0);
        assert_eq!(pica.release(K_PS_HANDLE_SUITE, 2), K_SP_SUITE_NOT_FOUND_ERROR);
    }

    #[test]
    fn unknown_and_about_mode_suites_are_not_found() {
        let mut about = PicaSuites::new(Rc::new(NativeArena::new()), hooks(), true);
        assert_eq!(about.acquire(K_PS_PROPERTY_SUITE, 1), Err(K_SP_SUITE_NOT_FOUND_ERROR));
        assert_eq!(about.acquire(K_PS_COLOR_SPACE_SUITE, 1), Err(K_SP_SUITE_NOT_FOUND_ERROR));
        assert_eq!(about.acquire(K_PS_HANDLE_SUITE, 3), Err(K_SP_SUITE_NOT_FOUND_ERROR));

        let mut filter = PicaSuites::new(Rc::new(NativeArena::new()), hooks(), false);
        assert!(filter.acquire(K_PS_PROPERTY_SUITE, 1).is_ok());
        assert!(filter.acquire(K_PS_COLOR_SPACE_SUITE, 1).is_ok());
        assert_eq!(filter.acquire(K_PS_COLOR_SPACE_SUITE, 2), Err(K_SP_SUITE_NOT_FOUND_ERROR));
    }

    #[test]
    fn color_space_suite_keeps_colors_per_provider() {
        let state = Rc::new(RefCell::new(PicaSuites::new(Rc::new(NativeArena::new()), hooks(), false)));
        let _binding = PicaSuites::bind(&state);
        let suite = state.borrow_mut().acquire(K_PS_COLOR_SPACE_SUITE, 1).unwrap();
        let mut color: ColorID = ptr::null_mut();
        let (mut c, mut m, mut y, mut k, mut gamut) = (0u8, 0u8, 0u8, 0u8, 1u8);
        let mut native: ColorSpaceCode = -1;
        // SAFETY: bound provider, valid out pointers.
        unsafe {
            let colors = &*(suite as *const PSColorSpaceSuite1);
            assert_eq!(colors.make.unwrap()(&mut color), K_SP_NO_ERROR);
            assert!(!color.is_null());
            assert_eq!(colors.stuff_components.unwrap()(color, 0, 255, 255, 255, 0), K_SP_NO_ERROR);
            assert_eq!(
                colors.extract_components.unwrap()(color, 2, &mut c, &mut m, &mut y, &mut k, &mut gamut),
                K_SP_NO_ERROR
            );
            assert_eq!(colors.get_native_space.unwrap()(color, &mut native), K_SP_NO_ERROR);
            assert_eq!(colors.delete.unwrap()(&mut color), K_SP_NO_ERROR);
        }
        assert_eq!([c, m, y, k, gamut], [255, 255, 255, 255, 0]);
        assert_eq!(native, 0);
        assert!(color.is_null());
        assert_eq!(state.borrow().colors.len(), 0);
    }

    #[test]
    fn failed_reallocation_keeps_the_block() {
        let mut pica = PicaSuites::new(Rc::new(NativeArena::new()), hooks(), false);
        let block = pica.allocate_block(16).unwrap();
        assert_eq!(pica.reallocate_block(block, usize::MAX), None);
        assert_eq!(pica.free_block(block), K_SP_NO_ERROR);
        assert_eq!(pica.reallocate_block(0x10 as *mut c_void, 8), None);
    }

    #[test]
    fn basic_suite_through_callbacks() {
        let state = Rc::new(RefCell::new(PicaSuites::new(Rc::new(NativeArena::new()), hooks(), false)));
        let _binding = PicaSuites::bind(&state);
        let basic = PicaSuites::create_sp_basic_suite();
        let mut suite: *const c_void = ptr::null();
        let mut block: *mut c_void = ptr::null_mut();
        // SAFETY: bound provider, valid out pointers.
        unsafe {
            assert_eq!(basic.acquire_suite.unwrap()(K_PS_ERROR_SUITE.as_ptr(), 1, &mut suite), K_SP_NO_ERROR);
            let errors = &*(suite as *const PSErrorSuite1);
            assert_eq!(errors.set_error_from_c_string.unwrap()(c"Needs more RAM".as_ptr()), K_SP_NO_ERROR);
            assert_eq!(basic.is_equal.unwrap()(c"a".as_ptr(), c"a".as_ptr()), 1);
            assert_eq!(basic.is_equal.unwrap()(c"a".as_ptr(), c"b".as_ptr()), 0);
            assert_eq!(basic.allocate_block.unwrap()(32, &mut block), K_SP_NO_ERROR);
            let mut grown: *mut c_void = ptr::null_mut();
            assert_eq!(basic.reallocate_block.unwrap()(block, 64, &mut grown), K_SP_NO_ERROR);
            assert_eq!(basic.free_block.unwrap()(grown), K_SP_NO_ERROR);
            assert_eq!(basic.undefined.unwrap()(), K_SP_UNIMPLEMENTED_ERROR);
        }
        assert_eq!(state.borrow_mut().take_error_message().as_deref(), Some("Needs more RAM"));
    }
}
