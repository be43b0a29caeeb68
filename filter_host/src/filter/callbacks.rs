//! Host callbacks published directly in the `FilterRecord`.

use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::{Rc, Weak};

use pi_sdk::errors::{NO_ERR, PARAM_ERR};
use pi_sdk::filter_record::{PLUG_IN_MODE_CMYK_COLOR, PLUG_IN_MODE_GRAY_SCALE, PLUG_IN_MODE_RGB_COLOR};
use pi_sdk::procs::PSPixelMap;
use pi_sdk::types::{Boolean, OSErr};
use pi_sdk::VRect;

use super::{AbortSignal, DisplayCallback, ProgressCallback};
use crate::suites::color_services::{ColorSpace, to_rgb};
use crate::suites::pica::UiHooks;
use crate::suites::{SlotBinding, bind, with_bound};
use crate::surface::Surface;

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<HostHooks>>> = RefCell::new(Weak::new());
}

/// Progress, abort and preview plumbing of one run.
pub(crate) struct HostHooks {
    abort: AbortSignal,
    progress: Option<ProgressCallback>,
    display: Option<DisplayCallback>,
    display_surface: Option<Surface>,
    abort_seen: bool,
}

impl HostHooks {
    pub fn new(abort: AbortSignal, progress: Option<ProgressCallback>, display: Option<DisplayCallback>) -> Self {
        Self {
            abort,
            progress,
            display,
            display_surface: None,
            abort_seen: false,
        }
    }

    pub fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        bind(&ACTIVE, state)
    }

    pub fn aborted(&self) -> bool {
        self.abort_seen || self.abort.is_aborted()
    }

    fn test_abort(&mut self) -> bool {
        if self.abort.is_aborted() {
            self.abort_seen = true;
        }
        self.abort_seen
    }

    fn progress(&self, done: i32, total: i32) {
        if let Some(progress) = &self.progress {
            progress(done, total);
        }
    }

    /// Renders `map` into the display surface and hands it to the host.
    ///
    /// # Safety
    /// `map.base_addr` must cover `src_rect` with the map's strides.
    unsafe fn display(&mut self, map: &PSPixelMap, src_rect: VRect, dst_row: i32, dst_col: i32) -> OSErr {
        let Some(display) = self.display.clone() else {
            return NO_ERR;
        };
        let rect = VRect::new(
            src_rect.top.max(map.bounds.top),
            src_rect.left.max(map.bounds.left),
            src_rect.bottom.min(map.bounds.bottom),
            src_rect.right.min(map.bounds.right),
        );
        if rect.is_empty() || map.base_addr.is_null() {
            return NO_ERR;
        }
        let (width, height) = (rect.width() as usize, rect.height() as usize);
        let planes = match map.image_mode as i16 {
            PLUG_IN_MODE_GRAY_SCALE => 1,
            PLUG_IN_MODE_RGB_COLOR => 3,
            PLUG_IN_MODE_CMYK_COLOR => 4,
            mode => {
                tracing::warn!(mode, "display of unsupported pixel map mode");
                return PARAM_ERR;
            }
        };
        if self
            .display_surface
            .as_ref()
            .is_none_or(|surface| surface.width() != width || surface.height() != height)
        {
            self.display_surface = Some(Surface::new(width, height, 4, 1));
        }
        let Some(surface) = self.display_surface.as_mut() else {
            return NO_ERR;
        };
        let base = map.base_addr.cast::<u8>();
        for y in 0..height {
            for x in 0..width {
                let offset = (rect.top - map.bounds.top + y as i32) as isize * map.row_bytes as isize
                    + (rect.left - map.bounds.left + x as i32) as isize * map.col_bytes as isize;
                let mut components = [0i16; 4];
                for (plane, component) in components.iter_mut().take(planes).enumerate() {
                    // SAFETY: per the caller's contract the map covers the rectangle.
                    *component = unsafe { *base.offset(offset + plane as isize * map.plane_bytes as isize) } as i16;
                }
                let [r, g, b] = match planes {
                    1 => to_rgb(ColorSpace::Gray, components),
                    4 => to_rgb(ColorSpace::Cmyk, components),
                    _ => to_rgb(ColorSpace::Rgb, components),
                };
                surface.pixel_mut(x, y).copy_from_slice(&[b, g, r, 255]);
            }
        }
        display(surface, dst_row, dst_col);
        NO_ERR
    }

    /// The UI hooks suite forwards to the same callbacks.
    pub fn ui_hooks() -> UiHooks {
        UiHooks {
            process_event: Some(process_event),
            display_pixels: Some(display_pixels),
            progress: Some(progress),
            test_abort: Some(test_abort),
        }
    }
}

pub(crate) unsafe extern "C" fn test_abort() -> Boolean {
    with_bound(&ACTIVE, 0, |hooks| hooks.test_abort() as Boolean)
}

pub(crate) unsafe extern "C" fn progress(done: i32, total: i32) {
    tracing::trace!(done, total, "progress");
    with_bound(&ACTIVE, (), |hooks| hooks.progress(done, total));
}

pub(crate) unsafe extern "C" fn host_proc(selector: i16, _data: *mut isize) {
    tracing::debug!(selector, "host proc called");
}

pub(crate) unsafe extern "C" fn process_event(_event: *mut c_void) {}

pub(crate) unsafe extern "C" fn display_pixels(
    source: *const PSPixelMap,
    src_rect: *const VRect,
    dst_row: i32,
    dst_col: i32,
    _platform_context: *mut c_void,
) -> OSErr {
    if source.is_null() || src_rect.is_null() {
        return PARAM_ERR;
    }
    // SAFETY: non-null pointers from the plugin, valid for this call.
    let (map, rect) = unsafe { (&*source, src_rect.read_unaligned()) };
    // SAFETY: the plugin vouches that the map covers its bounds.
    with_bound(&ACTIVE, PARAM_ERR, |hooks| unsafe { hooks.display(map, rect, dst_row, dst_col) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use std::sync::{Arc, Mutex};

    #[test]
    fn abort_is_latched() {
        let signal = AbortSignal::new();
        let hooks = Rc::new(RefCell::new(HostHooks::new(signal.clone(), None, None)));
        let _binding = HostHooks::bind(&hooks);
        // SAFETY: plain callbacks with a bound state.
        unsafe {
            assert_eq!(test_abort(), 0);
            signal.abort();
            assert_eq!(test_abort(), 1);
        }
        assert!(hooks.borrow().aborted());
    }

    #[test]
    fn pixel_maps_are_shown_as_bgra() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let display: DisplayCallback = Arc::new(move |surface: &Surface, row: i32, col: i32| {
            sink.lock().unwrap().push((surface.pixel(1, 0).to_vec(), row, col));
        });
        let hooks = Rc::new(RefCell::new(HostHooks::new(AbortSignal::new(), None, Some(display))));
        let _binding = HostHooks::bind(&hooks);

        // two RGB pixels, planar
        let mut pixels = [1u8, 2, 10, 20, 100, 200];
        let map = PSPixelMap {
            version: 1,
            bounds: VRect::new(0, 0, 1, 2),
            image_mode: PLUG_IN_MODE_RGB_COLOR as i32,
            row_bytes: 2,
            col_bytes: 1,
            plane_bytes: 2,
            base_addr: pixels.as_mut_ptr().cast(),
            mat: ptr::null_mut(),
            masks: ptr::null_mut(),
            mask_phase_row: 0,
            mask_phase_col: 0,
            pixel_overlays: ptr::null_mut(),
            color_management_options: 0,
        };
        let rect = VRect::new(0, 0, 1, 2);
        // SAFETY: the map describes `pixels`.
        let err = unsafe { display_pixels(&map, &rect, 5, 6, ptr::null_mut()) };
        assert_eq!(err, NO_ERR);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(vec![200, 20, 2, 255], 5, 6)]);
    }
}
