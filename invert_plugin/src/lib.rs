//! Deterministic 8bf filter: inverts every colour plane.
//!
//! The image is requested in horizontal strips, top to bottom. `InvertMain`
//! uses two-row strips and `InvertRowsMain` single rows, so one module
//! carries two filters. Transparency is left alone.

use std::ffi::c_void;

use pi_sdk::FilterRecord;
use pi_sdk::Rect;
use pi_sdk::errors::{FILTER_BAD_PARAMETERS, NO_ERR, USER_CANCELED_ERR};
use pi_sdk::filter_record::*;
use pi_sdk::types::OSErr;

/// Rows per strip of `InvertMain`.
pub const STRIP_ROWS: i16 = 2;

/// Largest sample at 16 bits per channel.
const MAX_16: u32 = 32768;

/// # Safety
/// Must be called by an 8bf host: `record` is a `FilterRecord` for every
/// selector but About, and `result` is writable.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn InvertMain(selector: i16, record: *mut c_void, _data: *mut isize, result: *mut i16) {
    // SAFETY: forwarded to the caller's contract.
    unsafe { entry(selector, record, result, STRIP_ROWS) }
}

/// # Safety
/// Same contract as [`InvertMain`].
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn InvertRowsMain(selector: i16, record: *mut c_void, _data: *mut isize, result: *mut i16) {
    // SAFETY: forwarded to the caller's contract.
    unsafe { entry(selector, record, result, 1) }
}

unsafe fn entry(selector: i16, record: *mut c_void, result: *mut i16, strip: i16) {
    let status = if selector == FILTER_SELECTOR_ABOUT || record.is_null() {
        NO_ERR
    } else {
        // SAFETY: the host passes its `FilterRecord` for these selectors.
        let record = unsafe { &mut *record.cast::<FilterRecord>() };
        match selector {
            FILTER_SELECTOR_START => start(record, strip),
            FILTER_SELECTOR_CONTINUE => continue_strip(record, strip),
            FILTER_SELECTOR_FINISH => finish(record),
            _ => NO_ERR,
        }
    };
    if !result.is_null() {
        // SAFETY: non-null out pointer from the host.
        unsafe { *result = status };
    }
}

fn color_planes(record: &FilterRecord) -> i16 {
    (record.planes - record.in_transparency_mask).max(1)
}

fn request_strip(record: &mut FilterRecord, top: i16, strip: i16) {
    let area = record.filter_rect;
    if top >= area.bottom {
        record.in_rect = Rect::default();
        record.out_rect = Rect::default();
        return;
    }
    let rect = Rect::new(top, area.left, (top + strip).min(area.bottom), area.right);
    let hi = color_planes(record) - 1;
    record.in_rect = rect;
    record.out_rect = rect;
    record.in_lo_plane = 0;
    record.in_hi_plane = hi;
    record.out_lo_plane = 0;
    record.out_hi_plane = hi;
}

fn start(record: &mut FilterRecord, strip: i16) -> OSErr {
    if record.filter_rect.is_empty() || record.planes < 1 {
        return FILTER_BAD_PARAMETERS;
    }
    let top = record.filter_rect.top;
    request_strip(record, top, strip);
    NO_ERR
}

fn continue_strip(record: &mut FilterRecord, strip: i16) -> OSErr {
    // SAFETY: the host's procs, called with plain integers.
    if let Some(abort) = record.abort_proc {
        if unsafe { abort() } != 0 {
            return USER_CANCELED_ERR;
        }
    }
    if record.in_data.is_null() || record.out_data.is_null() {
        return FILTER_BAD_PARAMETERS;
    }
    let rect = record.out_rect;
    let (rows, cols) = ((rect.bottom - rect.top) as usize, (rect.right - rect.left) as usize);
    let planes = (record.out_hi_plane - record.out_lo_plane + 1) as usize;
    let wide = record.depth == 16;
    let sample = if wide { 2 } else { 1 };
    let in_col = (record.in_column_bytes as usize).max(planes * sample);
    let out_col = (record.out_column_bytes as usize).max(planes * sample);

    for row in 0..rows {
        // SAFETY: the host sized both tiles for `rect` with these strides.
        let (src, dst) = unsafe {
            (
                std::slice::from_raw_parts(
                    record.in_data.cast::<u8>().add(row * record.in_row_bytes as usize),
                    cols * in_col,
                ),
                std::slice::from_raw_parts_mut(
                    record.out_data.cast::<u8>().add(row * record.out_row_bytes as usize),
                    cols * out_col,
                ),
            )
        };
        for col in 0..cols {
            for plane in 0..planes {
                let at_in = col * in_col + plane * sample;
                let at_out = col * out_col + plane * sample;
                if wide {
                    let value = u16::from_ne_bytes([src[at_in], src[at_in + 1]]) as u32;
                    let inverted = (MAX_16 - value.min(MAX_16)) as u16;
                    dst[at_out..at_out + 2].copy_from_slice(&inverted.to_ne_bytes());
                } else {
                    dst[at_out] = 255 - src[at_in];
                }
            }
        }
    }

    let area = record.filter_rect;
    if let Some(progress) = record.progress_proc {
        // SAFETY: as above.
        unsafe { progress((rect.bottom - area.top) as i32, (area.bottom - area.top) as i32) };
    }
    request_strip(record, rect.bottom, strip);
    NO_ERR
}

fn finish(record: &mut FilterRecord) -> OSErr {
    record.in_rect = Rect::default();
    record.out_rect = Rect::default();
    NO_ERR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_walk_down_the_filter_rect() {
        let mut record = FilterRecord::zeroed();
        record.filter_rect = Rect::new(0, 0, 5, 4);
        record.planes = 3;
        assert_eq!(start(&mut record, STRIP_ROWS), NO_ERR);
        assert_eq!(record.in_rect, Rect::new(0, 0, 2, 4));
        assert_eq!(record.out_hi_plane, 2);

        request_strip(&mut record, 4, STRIP_ROWS);
        assert_eq!(record.out_rect, Rect::new(4, 0, 5, 4));
        request_strip(&mut record, 5, STRIP_ROWS);
        assert!(record.in_rect.is_empty() && record.out_rect.is_empty());
    }

    #[test]
    fn transparency_plane_is_not_requested() {
        let mut record = FilterRecord::zeroed();
        record.filter_rect = Rect::new(0, 0, 1, 1);
        record.planes = 4;
        record.in_transparency_mask = 1;
        start(&mut record, 1);
        assert_eq!(record.in_hi_plane, 2);
    }

    #[test]
    fn continue_inverts_the_tile() {
        let mut input = [10u8, 20, 30, 40, 50, 60];
        let mut output = [0u8; 6];
        let mut record = FilterRecord::zeroed();
        record.filter_rect = Rect::new(0, 0, 1, 2);
        record.planes = 3;
        record.depth = 8;
        start(&mut record, 1);
        record.in_data = input.as_mut_ptr().cast();
        record.out_data = output.as_mut_ptr().cast();
        record.in_row_bytes = 6;
        record.out_row_bytes = 6;
        record.in_column_bytes = 3;
        record.out_column_bytes = 3;
        assert_eq!(continue_strip(&mut record, 1), NO_ERR);
        assert_eq!(output, [245, 235, 225, 215, 205, 195]);
        assert!(record.out_rect.is_empty());
    }
}
