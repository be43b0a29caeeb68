//! 8bf blur filter that keeps its settings in the parameters handle.
//!
//! The settings are TOML text (`radius = N`) stored through the host's
//! handle procs, and are also recorded into a scripting descriptor under
//! [`KEY_RADIUS`]. The whole filter rectangle is processed in one tile with
//! edge-replicated padding of `radius` pixels around it.

use std::ffi::c_void;
use std::ptr;

use pi_sdk::descriptor::PIDescriptorParameters;
use pi_sdk::errors::{FILTER_BAD_PARAMETERS, NIL_HANDLE_ERR, NO_ERR, USER_CANCELED_ERR};
use pi_sdk::filter_record::*;
use pi_sdk::types::{Handle, OSErr};
use pi_sdk::{FilterRecord, Rect, four_cc};
use serde::{Deserialize, Serialize};

/// Scripting key of the radius.
pub const KEY_RADIUS: u32 = four_cc(b"Rds ");

pub const DEFAULT_RADIUS: u32 = 1;

const MAX_RADIUS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub radius: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self { radius: DEFAULT_RADIUS }
    }
}

/// # Safety
/// Must be called by an 8bf host: `record` is a `FilterRecord` for every
/// selector but About, and `result` is writable.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn BlurMain(selector: i16, record: *mut c_void, _data: *mut isize, result: *mut i16) {
    let status = if selector == FILTER_SELECTOR_ABOUT || record.is_null() {
        NO_ERR
    } else {
        // SAFETY: the host passes its `FilterRecord` for these selectors.
        let record = unsafe { &mut *record.cast::<FilterRecord>() };
        // SAFETY: the record's procs and blocks come from the host.
        unsafe {
            match selector {
                FILTER_SELECTOR_PARAMETERS => parameters(record),
                FILTER_SELECTOR_START => start(record),
                FILTER_SELECTOR_CONTINUE => continue_blur(record),
                _ => NO_ERR,
            }
        }
    };
    if !result.is_null() {
        // SAFETY: non-null out pointer from the host.
        unsafe { *result = status };
    }
}

/// Settings for this run: scripting first, then the parameters handle.
unsafe fn current_params(record: &FilterRecord) -> Params {
    // SAFETY: forwarded.
    unsafe { read_descriptor(record).or_else(|| read_parameters(record)) }.unwrap_or_default()
}

/// The dialog of a real filter would run here; this one accepts the
/// current settings as shown and saves them.
unsafe fn parameters(record: &mut FilterRecord) -> OSErr {
    // SAFETY: the host's procs and blocks.
    unsafe {
        let params = current_params(record);
        let err = write_parameters(record, &params);
        if err != NO_ERR {
            return err;
        }
        write_descriptor(record, &params)
    }
}

unsafe fn start(record: &mut FilterRecord) -> OSErr {
    let area = record.filter_rect;
    if area.is_empty() || record.planes < 1 {
        return FILTER_BAD_PARAMETERS;
    }
    // SAFETY: the host's procs and blocks.
    let params = unsafe { current_params(record) };
    let r = params.radius.min(MAX_RADIUS) as i16;
    let hi = (record.planes - record.in_transparency_mask).max(1) - 1;

    record.input_padding = PLUG_IN_WANTS_EDGE_REPLICATION;
    record.in_rect = Rect::new(area.top - r, area.left - r, area.bottom + r, area.right + r);
    record.out_rect = area;
    record.in_lo_plane = 0;
    record.in_hi_plane = hi;
    record.out_lo_plane = 0;
    record.out_hi_plane = hi;
    NO_ERR
}

unsafe fn continue_blur(record: &mut FilterRecord) -> OSErr {
    if let Some(abort) = record.abort_proc {
        // SAFETY: host callback without arguments.
        if unsafe { abort() } != 0 {
            return USER_CANCELED_ERR;
        }
    }
    if record.in_data.is_null() || record.out_data.is_null() {
        return FILTER_BAD_PARAMETERS;
    }
    let out = record.out_rect;
    let radius = (out.left - record.in_rect.left) as usize;
    let (width, height) = ((out.right - out.left) as usize, (out.bottom - out.top) as usize);
    let in_width = width + 2 * radius;
    let in_height = height + 2 * radius;
    let planes = (record.out_hi_plane - record.out_lo_plane + 1) as usize;
    let sample = if record.depth == 16 { 2 } else { 1 };

    let in_row = record.in_row_bytes as usize;
    let out_row = record.out_row_bytes as usize;
    let in_col = (record.in_column_bytes as usize).max(planes * sample);
    let out_col = (record.out_column_bytes as usize).max(planes * sample);

    // SAFETY: the host sized both tiles for their rectangles with these strides.
    let (src, dst) = unsafe {
        (
            std::slice::from_raw_parts(record.in_data.cast::<u8>(), in_row * (in_height - 1) + in_width * in_col),
            std::slice::from_raw_parts_mut(record.out_data.cast::<u8>(), out_row * (height - 1) + width * out_col),
        )
    };
    let read = |x: usize, y: usize, plane: usize| -> f32 {
        let at = y * in_row + x * in_col + plane * sample;
        match sample {
            2 => u16::from_ne_bytes([src[at], src[at + 1]]) as f32,
            _ => src[at] as f32,
        }
    };

    let r = radius as i32;
    for y in 0..height {
        for x in 0..width {
            for plane in 0..planes {
                let mut acc = 0.0f32;
                let mut wsum = 0.0f32;
                for dy in -r..=r {
                    for dx in -r..=r {
                        let dist = ((dx * dx + dy * dy) as f32).sqrt();
                        let w = 1.0f32 / (1.0f32 + dist);
                        let sx = (x as i32 + r + dx) as usize;
                        let sy = (y as i32 + r + dy) as usize;
                        acc += read(sx, sy, plane) * w;
                        wsum += w;
                    }
                }
                let value = (acc / wsum).round();
                let at = y * out_row + x * out_col + plane * sample;
                match sample {
                    2 => dst[at..at + 2].copy_from_slice(&(value.clamp(0.0, 32768.0) as u16).to_ne_bytes()),
                    _ => dst[at] = value.clamp(0.0, 255.0) as u8,
                }
            }
        }
    }

    if let Some(progress) = record.progress_proc {
        // SAFETY: host callback with plain integers.
        unsafe { progress(1, 1) };
    }
    record.in_rect = Rect::default();
    record.out_rect = Rect::default();
    NO_ERR
}

unsafe fn descriptor_parameters<'a>(record: &FilterRecord) -> Option<&'a mut PIDescriptorParameters> {
    // SAFETY: null or the host's descriptor block for this run.
    unsafe { record.descriptor_parameters.as_mut() }
}

/// Radius recorded by an earlier scripted run, if any.
unsafe fn read_descriptor(record: &FilterRecord) -> Option<Params> {
    // SAFETY: forwarded.
    let parameters = unsafe { descriptor_parameters(record)? };
    if parameters.descriptor.is_null() {
        return None;
    }
    // SAFETY: the host's procset.
    let procs = unsafe { parameters.read_descriptor_procs.as_ref()? };
    let (open, close) = (procs.open_read_descriptor_proc?, procs.close_read_descriptor_proc?);
    let (get_key, get_integer) = (procs.get_key_proc?, procs.get_integer_proc?);

    // SAFETY: host procs used as documented: open, iterate keys, close.
    unsafe {
        let reader = open(parameters.descriptor, ptr::null_mut());
        if reader.is_null() {
            return None;
        }
        let mut found = None;
        let (mut key, mut type_, mut flags) = (0u32, 0u32, 0i32);
        while get_key(reader, &mut key, &mut type_, &mut flags) != 0 {
            let mut value = 0i32;
            if key == KEY_RADIUS && get_integer(reader, &mut value) == NO_ERR {
                found = Some(Params { radius: value.max(0) as u32 });
            }
        }
        close(reader);
        found
    }
}

unsafe fn write_descriptor(record: &mut FilterRecord, params: &Params) -> OSErr {
    // SAFETY: forwarded.
    let Some(parameters) = (unsafe { descriptor_parameters(record) }) else {
        return NO_ERR;
    };
    // SAFETY: the host's procset.
    let Some(procs) = (unsafe { parameters.write_descriptor_procs.as_ref() }) else {
        return NO_ERR;
    };
    let (Some(open), Some(put_integer), Some(close)) =
        (procs.open_write_descriptor_proc, procs.put_integer_proc, procs.close_write_descriptor_proc)
    else {
        return NO_ERR;
    };
    // SAFETY: host procs used as documented: open, put, close.
    unsafe {
        let writer = open();
        if writer.is_null() {
            return NIL_HANDLE_ERR;
        }
        let err = put_integer(writer, KEY_RADIUS, params.radius as i32);
        let mut handle: Handle = ptr::null_mut();
        let closed = close(writer, &mut handle);
        if err != NO_ERR {
            return err;
        }
        if closed != NO_ERR {
            return closed;
        }
        parameters.descriptor = handle;
    }
    NO_ERR
}

/// Settings saved in `record.parameters` by an earlier run.
unsafe fn read_parameters(record: &FilterRecord) -> Option<Params> {
    if record.parameters.is_null() {
        return None;
    }
    // SAFETY: the host's procset.
    let procs = unsafe { record.handle_procs.as_ref()? };
    let (get_size, lock, unlock) = (procs.get_size_proc?, procs.lock_proc?, procs.unlock_proc?);
    // SAFETY: `parameters` is a handle the host allocated and sized.
    let text = unsafe {
        let size = usize::try_from(get_size(record.parameters)).ok()?;
        let data = lock(record.parameters, 0);
        if data.is_null() {
            return None;
        }
        let bytes = std::slice::from_raw_parts(data.cast::<u8>(), size).to_vec();
        unlock(record.parameters);
        bytes
    };
    let text = std::str::from_utf8(&text).ok()?;
    toml::from_str(text.trim_end_matches('\0')).ok()
}

unsafe fn write_parameters(record: &mut FilterRecord, params: &Params) -> OSErr {
    let Ok(text) = toml::to_string(params) else {
        return FILTER_BAD_PARAMETERS;
    };
    // SAFETY: the host's procset.
    let Some(procs) = (unsafe { record.handle_procs.as_ref() }) else {
        return NIL_HANDLE_ERR;
    };
    let (Some(new), Some(set_size), Some(lock), Some(unlock)) =
        (procs.new_proc, procs.set_size_proc, procs.lock_proc, procs.unlock_proc)
    else {
        return NIL_HANDLE_ERR;
    };
    let len = text.len() as i32;
    // SAFETY: handles come from and go back to the host's handle procs.
    unsafe {
        if record.parameters.is_null() {
            record.parameters = new(len);
            if record.parameters.is_null() {
                return NIL_HANDLE_ERR;
            }
        } else {
            let err = set_size(record.parameters, len);
            if err != NO_ERR {
                return err;
            }
        }
        let data = lock(record.parameters, 0);
        if data.is_null() {
            return NIL_HANDLE_ERR;
        }
        ptr::copy_nonoverlapping(text.as_ptr(), data.cast::<u8>(), text.len());
        unlock(record.parameters);
    }
    NO_ERR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_and_parse() {
        assert_eq!(Params::default().radius, DEFAULT_RADIUS);
        let params: Params = toml::from_str("radius = 4").unwrap();
        assert_eq!(params.radius, 4);
        assert_eq!(toml::to_string(&params).unwrap().trim(), "radius = 4");
    }

    #[test]
    fn start_pads_the_input_by_the_radius() {
        let mut record = FilterRecord::zeroed();
        record.filter_rect = Rect::new(0, 0, 4, 4);
        record.planes = 3;
        // SAFETY: the record has no procs or blocks to follow.
        assert_eq!(unsafe { start(&mut record) }, NO_ERR);
        assert_eq!(record.in_rect, Rect::new(-1, -1, 5, 5));
        assert_eq!(record.input_padding, PLUG_IN_WANTS_EDGE_REPLICATION);
    }

    #[test]
    fn flat_input_stays_flat() {
        let mut input = [50u8; 9];
        let mut output = [0u8; 1];
        let mut record = FilterRecord::zeroed();
        record.filter_rect = Rect::new(0, 0, 1, 1);
        record.planes = 1;
        record.depth = 8;
        // SAFETY: as above.
        unsafe { start(&mut record) };
        record.in_data = input.as_mut_ptr().cast();
        record.out_data = output.as_mut_ptr().cast();
        record.in_row_bytes = 3;
        record.in_column_bytes = 1;
        record.out_row_bytes = 1;
        record.out_column_bytes = 1;
        // SAFETY: the tiles above match the requested rectangles.
        assert_eq!(unsafe { continue_blur(&mut record) }, NO_ERR);
        assert_eq!(output, [50]);
    }
}
