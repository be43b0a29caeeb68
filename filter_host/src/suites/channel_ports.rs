//! Channel ports: read access to whole document channels.
//!
//! The host publishes a `ReadImageDocumentDesc` whose channel lists point at
//! read ports for the composite planes, the transparency and the selection.
//! `readPixels` copies a (possibly scaled) region of one channel into plugin
//! memory. Write ports are not offered.

use std::cell::RefCell;
use std::ffi::CString;
use std::ptr;
use std::rc::{Rc, Weak};

use pi_sdk::errors::*;
use pi_sdk::procs::*;
use pi_sdk::types::{OSErr, VPoint, VRect, double_to_fixed};

use super::{SlotBinding, with_bound, write_out};
use crate::surface::{ImageMode, MAX_SAMPLE_16, Surface};

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<ChannelPorts>>> = RefCell::new(Weak::new());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortSource {
    /// Surface channel index of a source plane.
    Image(usize),
    Selection,
}

pub struct ChannelPorts {
    source: Rc<Surface>,
    mask: Option<Rc<Surface>>,
    ports: Vec<PortSource>,
    document: Box<ReadImageDocumentDesc>,
    channels: Vec<Box<ReadChannelDesc>>,
    _names: Vec<CString>,
}

fn channel_names(mode: ImageMode) -> &'static [(&'static str, i16)] {
    match mode {
        ImageMode::Gray | ImageMode::Gray16 => &[("Gray", CT_BLACK)],
        ImageMode::Rgb | ImageMode::Rgb48 => &[("Red", CT_RED), ("Green", CT_GREEN), ("Blue", CT_BLUE)],
        ImageMode::Cmyk => &[("Cyan", CT_CYAN), ("Magenta", CT_MAGENTA), ("Yellow", CT_YELLOW), ("Black", CT_BLACK)],
    }
}

fn identity_lut() -> LookUpTable {
    std::array::from_fn(|i| i as u8)
}

impl ChannelPorts {
    /// Builds the document description. `with_transparency` publishes the
    /// alpha plane as the target transparency channel.
    pub fn new(source: Rc<Surface>, mode: ImageMode, mask: Option<Rc<Surface>>, with_transparency: bool) -> Self {
        let bounds = source.bounds();
        let (dpi_x, dpi_y) = source.dpi();
        let mut ports = Vec::new();
        let mut names = Vec::new();
        let mut channels: Vec<Box<ReadChannelDesc>> = Vec::new();

        let mut make = |source_kind: PortSource, name: &str, channel_type: i16, depth: i32| {
            ports.push(source_kind);
            let name = CString::new(name).unwrap_or_default();
            let desc = Box::new(ReadChannelDesc {
                min_version: 0,
                max_version: 0,
                next: ptr::null_mut(),
                port: ports.len() as *mut std::ffi::c_void,
                bounds,
                depth,
                tile_size: VPoint { v: bounds.bottom, h: bounds.right },
                tile_origin: VPoint::default(),
                target: 1,
                shown: 1,
                channel_type,
                context_info: ptr::null_mut(),
                name: name.as_ptr(),
                write_port: ptr::null_mut(),
            });
            names.push(name);
            channels.push(desc);
            channels.len() - 1
        };

        let composite: Vec<usize> = channel_names(mode)
            .iter()
            .enumerate()
            .map(|(plane, (name, kind))| make(PortSource::Image(mode.plane_channel(plane)), name, *kind, mode.depth()))
            .collect();
        let transparency = (with_transparency && mode.supports_transparency())
            .then(|| make(PortSource::Image(3), "Transparency", CT_TRANSPARENCY, mode.depth()));
        let selection = mask.as_ref().map(|_| make(PortSource::Selection, "Selection", CT_SELECTION_MASK, 8));

        for pair in composite.windows(2) {
            let next: *mut ReadChannelDesc = &mut *channels[pair[1]];
            channels[pair[0]].next = next;
        }
        let mut head = |index: Option<usize>| -> *mut ReadChannelDesc {
            match index {
                Some(i) => &mut *channels[i] as *mut ReadChannelDesc,
                None => ptr::null_mut(),
            }
        };
        let target_composite_channels = head(composite.first().copied());
        let target_transparency = head(transparency);
        let selection = head(selection);

        let document = Box::new(ReadImageDocumentDesc {
            min_version: 0,
            max_version: 1,
            image_mode: mode.plugin_mode() as i32,
            depth: mode.depth(),
            bounds,
            h_resolution: double_to_fixed(dpi_x),
            v_resolution: double_to_fixed(dpi_y),
            red_lut: identity_lut(),
            green_lut: identity_lut(),
            blue_lut: identity_lut(),
            target_composite_channels,
            target_transparency,
            target_layer_mask: ptr::null_mut(),
            merged_composite_channels: target_composite_channels,
            merged_transparency: target_transparency,
            merged_layer_mask: ptr::null_mut(),
            alpha_channels: ptr::null_mut(),
            selection,
        });

        Self {
            source,
            mask,
            ports,
            document,
            channels,
            _names: names,
        }
    }

    pub(crate) fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        super::bind(&ACTIVE, state)
    }

    /// Pointer for `FilterRecord::document_info`; valid while `self` lives.
    pub fn document_info(&mut self) -> *mut ReadImageDocumentDesc {
        &mut *self.document
    }

    pub fn port_count(&self) -> usize {
        self.channels.len()
    }

    fn read_sample(&self, port: PortSource, x: usize, y: usize) -> (u16, u16) {
        match port {
            PortSource::Image(channel) => (self.source.sample(x, y, channel), self.source.max_sample()),
            PortSource::Selection => match &self.mask {
                Some(mask) => (mask.sample(x, y, 0), 255),
                None => (255, 255),
            },
        }
    }

    /// Copies the requested region of `port` into `destination`.
    pub fn read_pixels(
        &self,
        port: usize,
        scaling: Option<PSScaling>,
        write_rect: VRect,
        destination: &PixelMemoryDesc,
    ) -> Result<VRect, OSErr> {
        let source = *port.checked_sub(1).and_then(|i| self.ports.get(i)).ok_or(ERR_UNKNOWN_PORT)?;
        if destination.data.is_null() {
            return Err(PARAM_ERR);
        }
        if destination.depth != 8 && destination.depth != 16 {
            return Err(ERR_UNSUPPORTED_DEPTH);
        }
        if destination.row_bits % 8 != 0 {
            return Err(ERR_UNSUPPORTED_ROW_BITS);
        }
        if destination.col_bits % 8 != 0 || destination.col_bits < destination.depth {
            return Err(ERR_UNSUPPORTED_COL_BITS);
        }
        if destination.bit_offset % 8 != 0 {
            return Err(ERR_UNSUPPORTED_BIT_OFFSET);
        }

        let bounds = self.source.bounds();
        let (from, to) = match scaling {
            Some(s) if !s.source_rect.is_empty() && !s.destination_rect.is_empty() => (s.source_rect, s.destination_rect),
            _ => (bounds, bounds),
        };
        let area = VRect::new(
            write_rect.top.max(to.top),
            write_rect.left.max(to.left),
            write_rect.bottom.min(to.bottom),
            write_rect.right.min(to.right),
        );
        if area.is_empty() {
            return Ok(VRect::default());
        }

        let row_bytes = (destination.row_bits / 8) as isize;
        let col_bytes = (destination.col_bits / 8) as isize;
        let base = destination.data.cast::<u8>().wrapping_offset((destination.bit_offset / 8) as isize);
        let map = |d: i32, d0: i32, d_len: i32, s0: i32, s_len: i32, limit: usize| -> usize {
            let s = s0 as i64 + (d - d0) as i64 * s_len as i64 / d_len.max(1) as i64;
            s.clamp(0, limit as i64 - 1) as usize
        };

        for y in area.top..area.bottom {
            let sy = map(y, to.top, to.height(), from.top, from.height(), self.source.height());
            for x in area.left..area.right {
                let sx = map(x, to.left, to.width(), from.left, from.width(), self.source.width());
                let (value, max) = self.read_sample(source, sx, sy);
                let offset = (y - area.top) as isize * row_bytes + (x - area.left) as isize * col_bytes;
                // SAFETY: the plugin sized `destination` for `write_rect` with these strides.
                unsafe {
                    let dst = base.offset(offset);
                    if destination.depth == 8 {
                        let byte = if max == 255 { value as u8 } else { (value as u32 * 255 / max as u32) as u8 };
                        dst.write(byte);
                    } else {
                        let wide = if max == 255 { (value as u32 * MAX_SAMPLE_16 as u32 / 255) as u16 } else { value };
                        dst.cast::<u16>().write_unaligned(wide);
                    }
                }
            }
        }
        Ok(area)
    }

    pub fn create_channel_port_procs() -> Box<ChannelPortProcs> {
        Box::new(ChannelPortProcs {
            channel_port_procs_version: K_CURRENT_CHANNEL_PORT_PROCS_VERSION,
            num_channel_port_procs: K_CURRENT_CHANNEL_PORT_PROCS_COUNT,
            read_pixels_proc: Some(read_pixels_proc),
            write_base_pixels_proc: Some(write_base_pixels_proc),
            read_port_for_write_port_proc: Some(read_port_for_write_port_proc),
        })
    }
}

unsafe extern "C" fn read_pixels_proc(
    port: PIChannelPort,
    scaling: *const PSScaling,
    write_rect: *const VRect,
    destination: *const PixelMemoryDesc,
    wrote_rect: *mut VRect,
) -> OSErr {
    if write_rect.is_null() || destination.is_null() {
        return PARAM_ERR;
    }
    // SAFETY: non-null plugin records, read for the duration of the call.
    let (scaling, write_rect, destination) = unsafe { (scaling.as_ref().copied(), *write_rect, &*destination) };
    let result = with_bound(&ACTIVE, Err(PARAM_ERR), |ports| {
        ports.read_pixels(port as usize, scaling, write_rect, destination)
    });
    match result {
        Ok(area) => {
            // SAFETY: null or writable.
            unsafe { write_out(wrote_rect, area) };
            NO_ERR
        }
        Err(err) => err,
    }
}

unsafe extern "C" fn write_base_pixels_proc(
    _port: PIChannelPort,
    _write_rect: *const VRect,
    _source: *const PixelMemoryDesc,
) -> OSErr {
    tracing::debug!("write port requested");
    ERR_UNKNOWN_PORT
}

unsafe extern "C" fn read_port_for_write_port_proc(_read_port: *mut PIChannelPort, _write_port: PIChannelPort) -> OSErr {
    ERR_UNKNOWN_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_source() -> Rc<Surface> {
        // 2x2 BGRA, red channel is 10, 20, 30, 40.
        let data = vec![0, 0, 10, 255, 0, 0, 20, 255, 0, 0, 30, 255, 0, 0, 40, 255];
        Rc::new(Surface::from_bgra8(2, 2, data).unwrap())
    }

    fn desc(buffer: &mut [u8], width: i32, depth: i32) -> PixelMemoryDesc {
        PixelMemoryDesc {
            data: buffer.as_mut_ptr().cast(),
            row_bits: width * depth,
            col_bits: depth,
            bit_offset: 0,
            depth,
        }
    }

    #[test]
    fn document_lists_composite_then_selection() {
        let mask = Rc::new(Surface::new_mask(2, 2));
        let mut ports = ChannelPorts::new(rgb_source(), ImageMode::Rgb, Some(mask), true);
        assert_eq!(ports.port_count(), 5);
        // SAFETY: the descriptor lives as long as `ports`.
        unsafe {
            let doc = &*ports.document_info();
            let red = &*doc.target_composite_channels;
            assert_eq!(red.channel_type, CT_RED);
            assert_eq!((*red.next).channel_type, CT_GREEN);
            assert!((*(*red.next).next).next.is_null());
            assert_eq!((*doc.selection).channel_type, CT_SELECTION_MASK);
            assert_eq!((*doc.target_transparency).channel_type, CT_TRANSPARENCY);
        }
    }

    #[test]
    fn reads_red_plane_unscaled() {
        let ports = ChannelPorts::new(rgb_source(), ImageMode::Rgb, None, false);
        let mut out = [0u8; 4];
        let area = ports.read_pixels(1, None, VRect::new(0, 0, 2, 2), &desc(&mut out, 2, 8)).unwrap();
        assert_eq!(area, VRect::new(0, 0, 2, 2));
        assert_eq!(out, [10, 20, 30, 40]);
    }

    #[test]
    fn reads_scaled_down_with_nearest_neighbour() {
        let ports = ChannelPorts::new(rgb_source(), ImageMode::Rgb, None, false);
        let mut out = [0u8; 1];
        let scaling = PSScaling {
            source_rect: VRect::new(0, 0, 2, 2),
            destination_rect: VRect::new(0, 0, 1, 1),
        };
        ports.read_pixels(1, Some(scaling), VRect::new(0, 0, 1, 1), &desc(&mut out, 1, 8)).unwrap();
        assert_eq!(out, [10]);
    }

    #[test]
    fn rejects_unknown_ports_and_layouts() {
        let ports = ChannelPorts::new(rgb_source(), ImageMode::Rgb, None, false);
        let mut out = [0u8; 4];
        let rect = VRect::new(0, 0, 2, 2);
        assert_eq!(ports.read_pixels(9, None, rect, &desc(&mut out, 2, 8)), Err(ERR_UNKNOWN_PORT));
        let mut odd = desc(&mut out, 2, 8);
        odd.bit_offset = 3;
        assert_eq!(ports.read_pixels(1, None, rect, &odd), Err(ERR_UNSUPPORTED_BIT_OFFSET));
        odd.bit_offset = 0;
        odd.depth = 32;
        assert_eq!(ports.read_pixels(1, None, rect, &odd), Err(ERR_UNSUPPORTED_DEPTH));
    }
}
