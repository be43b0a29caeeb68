//! Image services: resampling of 8-bit image planes.
//!
//! The destination area is walked row by row; each destination pixel takes
//! its source coordinate from `coords`, one `Fixed` horizontal position per
//! pixel for 1-D interpolation and a `(v, h)` pair for 2-D. Coordinates are
//! in the source plane's coordinate space and are clamped to its bounds.

use std::panic::{self, AssertUnwindSafe};

use pi_sdk::errors::{NO_ERR, PARAM_ERR};
use pi_sdk::procs::{
    BICUBIC_SAMPLING, ImageServicesProcs, K_CURRENT_IMAGE_SERVICES_PROCS_COUNT,
    K_CURRENT_IMAGE_SERVICES_PROCS_VERSION, LINEAR_SAMPLING, POINT_SAMPLING, PSImagePlane,
};
use pi_sdk::types::{Fixed, OSErr, Rect, fixed_to_double};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Point,
    Linear,
}

impl Method {
    fn from_raw(method: i16) -> Option<Self> {
        match method {
            POINT_SAMPLING => Some(Method::Point),
            LINEAR_SAMPLING | BICUBIC_SAMPLING => Some(Method::Linear),
            _ => None,
        }
    }
}

/// Read-only view of a plugin plane.
struct PlaneView<'a> {
    plane: &'a PSImagePlane,
}

impl PlaneView<'_> {
    fn height(&self) -> i32 {
        self.plane.bounds.bottom as i32 - self.plane.bounds.top as i32
    }

    fn width(&self) -> i32 {
        self.plane.bounds.right as i32 - self.plane.bounds.left as i32
    }

    /// Sample at plane-local (row, col), clamped to the plane.
    fn at(&self, row: i32, col: i32) -> f64 {
        let row = row.clamp(0, self.height() - 1) as isize;
        let col = col.clamp(0, self.width() - 1) as isize;
        let offset = row * self.plane.row_bytes as isize + col * self.plane.col_bytes as isize;
        // SAFETY: the offset stays inside the plane described by bounds and strides.
        unsafe { *self.plane.data.cast::<u8>().offset(offset) as f64 }
    }

    /// Sample at source coordinates `(v, h)`.
    fn sample(&self, v: f64, h: f64, method: Method) -> u8 {
        let v = v - self.plane.bounds.top as f64;
        let h = h - self.plane.bounds.left as f64;
        let value = match method {
            Method::Point => self.at(v.round() as i32, h.round() as i32),
            Method::Linear => {
                let (v0, h0) = (v.floor(), h.floor());
                let (fv, fh) = (v - v0, h - h0);
                let (r, c) = (v0 as i32, h0 as i32);
                let top = self.at(r, c) * (1.0 - fh) + self.at(r, c + 1) * fh;
                let bottom = self.at(r + 1, c) * (1.0 - fh) + self.at(r + 1, c + 1) * fh;
                top * (1.0 - fv) + bottom * fv
            }
        };
        value.round().clamp(0.0, 255.0) as u8
    }
}

fn valid_plane(plane: &PSImagePlane) -> bool {
    !plane.data.is_null() && !plane.bounds.is_empty() && plane.col_bytes > 0
}

/// Fills `area` of `destination` from `source`.
///
/// # Safety
/// Both planes must describe readable/writable 8-bit memory for their
/// bounds, and `coords` must hold `per_pixel` values per pixel of `area`.
unsafe fn interpolate(
    source: &PSImagePlane,
    destination: &mut PSImagePlane,
    area: Rect,
    coords: *const Fixed,
    per_pixel: usize,
    method: Method,
) -> OSErr {
    if !valid_plane(source) || !valid_plane(destination) || coords.is_null() {
        return PARAM_ERR;
    }
    let dst = destination.bounds;
    if area.top < dst.top || area.left < dst.left || area.bottom > dst.bottom || area.right > dst.right {
        return PARAM_ERR;
    }
    let view = PlaneView { plane: source };
    let mut index = 0usize;
    for row in area.top..area.bottom {
        for col in area.left..area.right {
            // SAFETY: `coords` holds `per_pixel` entries per area pixel.
            let (v, h) = unsafe {
                if per_pixel == 2 {
                    (fixed_to_double(*coords.add(index)), fixed_to_double(*coords.add(index + 1)))
                } else {
                    (row as f64 - area.top as f64 + source.bounds.top as f64, fixed_to_double(*coords.add(index)))
                }
            };
            index += per_pixel;
            let value = view.sample(v, h, method);
            let offset = (row - dst.top) as isize * destination.row_bytes as isize
                + (col - dst.left) as isize * destination.col_bytes as isize;
            // SAFETY: (row, col) lies inside the destination bounds checked above.
            unsafe { *destination.data.cast::<u8>().offset(offset) = value };
        }
    }
    NO_ERR
}

unsafe fn interpolate_ffi(
    source: *mut PSImagePlane,
    destination: *mut PSImagePlane,
    area: *mut Rect,
    coords: *mut Fixed,
    method: i16,
    per_pixel: usize,
) -> OSErr {
    let Some(method) = Method::from_raw(method) else {
        return PARAM_ERR;
    };
    if source.is_null() || destination.is_null() || area.is_null() {
        return PARAM_ERR;
    }
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: pointers checked non-null; contents are the plugin's contract.
        unsafe { interpolate(&*source, &mut *destination, *area, coords, per_pixel, method) }
    }));
    result.unwrap_or_else(|_| {
        tracing::error!("interpolation panicked");
        PARAM_ERR
    })
}

unsafe extern "C" fn interpolate_1d_proc(
    source: *mut PSImagePlane,
    destination: *mut PSImagePlane,
    area: *mut Rect,
    coords: *mut Fixed,
    method: i16,
) -> OSErr {
    // SAFETY: forwarded plugin pointers.
    unsafe { interpolate_ffi(source, destination, area, coords, method, 1) }
}

unsafe extern "C" fn interpolate_2d_proc(
    source: *mut PSImagePlane,
    destination: *mut PSImagePlane,
    area: *mut Rect,
    coords: *mut Fixed,
    method: i16,
) -> OSErr {
    // SAFETY: forwarded plugin pointers.
    unsafe { interpolate_ffi(source, destination, area, coords, method, 2) }
}

pub fn create_image_services_procs() -> Box<ImageServicesProcs> {
    Box::new(ImageServicesProcs {
        image_services_procs_version: K_CURRENT_IMAGE_SERVICES_PROCS_VERSION,
        num_image_services_procs: K_CURRENT_IMAGE_SERVICES_PROCS_COUNT,
        interpolate_1d_proc: Some(interpolate_1d_proc),
        interpolate_2d_proc: Some(interpolate_2d_proc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_sdk::types::int_to_fixed;

    fn plane(data: &mut [u8], width: i16, height: i16) -> PSImagePlane {
        PSImagePlane {
            data: data.as_mut_ptr().cast(),
            bounds: Rect::new(0, 0, height, width),
            row_bytes: width as i32,
            col_bytes: 1,
        }
    }

    #[test]
    fn point_sampling_2d_picks_nearest() {
        let mut src = [0u8, 100, 200, 250];
        let mut dst = [0u8; 2];
        let mut source = plane(&mut src, 2, 2);
        let mut destination = plane(&mut dst, 2, 1);
        let mut area = Rect::new(0, 0, 1, 2);
        let mut coords = [int_to_fixed(1), int_to_fixed(1), int_to_fixed(0), int_to_fixed(1)];
        let procs = create_image_services_procs();
        // SAFETY: planes and coords are sized for the area.
        let err = unsafe {
            procs.interpolate_2d_proc.unwrap()(&mut source, &mut destination, &mut area, coords.as_mut_ptr(), POINT_SAMPLING)
        };
        assert_eq!(err, NO_ERR);
        assert_eq!(dst, [250, 100]);
    }

    #[test]
    fn linear_sampling_1d_blends_neighbours() {
        let mut src = [0u8, 200];
        let mut dst = [0u8; 1];
        let mut source = plane(&mut src, 2, 1);
        let mut destination = plane(&mut dst, 1, 1);
        let mut area = Rect::new(0, 0, 1, 1);
        let mut coords = [int_to_fixed(1) / 2];
        let procs = create_image_services_procs();
        // SAFETY: planes and coords are sized for the area.
        let err = unsafe {
            procs.interpolate_1d_proc.unwrap()(&mut source, &mut destination, &mut area, coords.as_mut_ptr(), LINEAR_SAMPLING)
        };
        assert_eq!(err, NO_ERR);
        assert_eq!(dst, [100]);
    }

    #[test]
    fn area_outside_destination_is_rejected() {
        let mut src = [0u8; 4];
        let mut dst = [0u8; 1];
        let mut source = plane(&mut src, 2, 2);
        let mut destination = plane(&mut dst, 1, 1);
        let mut area = Rect::new(0, 0, 2, 2);
        let mut coords = [0; 8];
        // SAFETY: rejected before any access.
        let err = unsafe { interpolate_2d_proc(&mut source, &mut destination, &mut area, coords.as_mut_ptr(), POINT_SAMPLING) };
        assert_eq!(err, PARAM_ERR);
    }
}
