//! In, out and mask tiles exchanged with the plugin.
//!
//! Tiles are interleaved: `column_bytes` is planes times sample size and
//! `row_bytes` is the tile width times that. Blocks come from the session
//! arena and are kept while later requests still fit in them.

use std::ffi::c_void;
use std::ptr;
use std::rc::Rc;

use pi_sdk::errors::{MEM_FULL_ERR, NO_ERR, PARAM_ERR};
use pi_sdk::filter_record::{PLUG_IN_WANTS_EDGE_REPLICATION, PLUG_IN_WANTS_ERROR_ON_BOUNDS_EXCEPTION};
use pi_sdk::types::{Fixed, OSErr, fixed_to_double};
use pi_sdk::{FilterRecord, VRect};

use crate::memory::NativeArena;
use crate::surface::{ImageMode, MAX_SAMPLE_16, Surface};

const UNIT_RATE: Fixed = 0x10000;

/// Rectangle, plane range, padding and sampling rate of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TileRequest {
    pub rect: VRect,
    pub lo_plane: i16,
    pub hi_plane: i16,
    pub padding: i16,
    pub rate: Fixed,
}

impl TileRequest {
    fn plane_count(&self) -> usize {
        (self.hi_plane - self.lo_plane + 1) as usize
    }
}

/// Layout of a filled tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FilledTile {
    pub request: TileRequest,
    pub row_bytes: usize,
    pub column_bytes: usize,
    pub plane_bytes: usize,
}

impl FilledTile {
    fn new(request: TileRequest, bytes_per_sample: usize) -> Self {
        let column_bytes = request.plane_count() * bytes_per_sample;
        Self {
            request,
            row_bytes: request.rect.width() as usize * column_bytes,
            column_bytes,
            plane_bytes: bytes_per_sample,
        }
    }

    fn len(&self) -> usize {
        self.row_bytes * self.request.rect.height() as usize
    }
}

/// In/out/mask rectangles the plugin currently asks for.
pub(crate) fn requested_rects(record: &FilterRecord) -> (VRect, VRect, VRect) {
    // SAFETY: null or the host-owned big document block of this session.
    if let Some(big) = unsafe { record.big_document_data.as_ref() } {
        if big.plugin_using_32_bit_coordinates != 0 {
            return (big.in_rect_32, big.out_rect_32, big.mask_rect_32);
        }
    }
    (record.in_rect.to_vrect(), record.out_rect.to_vrect(), record.mask_rect.to_vrect())
}

pub(crate) struct TileBuffers {
    arena: Rc<NativeArena>,
    mode: ImageMode,
    planes: i16,
    input: Rc<Surface>,
    destination: Surface,
    mask: Option<Rc<Surface>>,
    scaled_input: Option<(Fixed, Surface)>,
    scaled_mask: Option<(Fixed, Surface)>,
    in_block: *mut u8,
    out_block: *mut u8,
    mask_block: *mut u8,
    last_input: Option<FilledTile>,
    last_mask: Option<FilledTile>,
    pending_output: Option<FilledTile>,
}

impl TileBuffers {
    pub fn new(
        arena: Rc<NativeArena>,
        mode: ImageMode,
        planes: i16,
        input: Rc<Surface>,
        destination: Surface,
        mask: Option<Rc<Surface>>,
    ) -> Self {
        Self {
            arena,
            mode,
            planes,
            input,
            destination,
            mask,
            scaled_input: None,
            scaled_mask: None,
            in_block: ptr::null_mut(),
            out_block: ptr::null_mut(),
            mask_block: ptr::null_mut(),
            last_input: None,
            last_mask: None,
            pending_output: None,
        }
    }

    pub fn destination(&self) -> &Surface {
        &self.destination
    }

    /// Hands the destination out, leaving an empty surface behind.
    pub fn take_destination(&mut self) -> Surface {
        std::mem::replace(&mut self.destination, Surface::new(0, 0, 1, 1))
    }

    fn check_planes(&self, request: &TileRequest) -> Result<(), OSErr> {
        if request.lo_plane < 0 || request.lo_plane > request.hi_plane || request.hi_plane >= self.planes {
            tracing::warn!(lo = request.lo_plane, hi = request.hi_plane, planes = self.planes, "bad plane range");
            return Err(PARAM_ERR);
        }
        Ok(())
    }

    fn channels(&self, request: &TileRequest) -> Vec<usize> {
        (request.lo_plane..=request.hi_plane)
            .map(|plane| self.mode.plane_channel(plane as usize))
            .collect()
    }

    pub fn fill_input(&mut self, request: TileRequest) -> Result<FilledTile, OSErr> {
        self.check_planes(&request)?;
        let channels = self.channels(&request);
        let bpc = self.mode.bytes_per_channel();
        let tile = FilledTile::new(request, bpc);
        let source = scaled(&mut self.scaled_input, &self.input, request.rate)?;
        check_bounds(source, &request)?;
        let block = reserve(&self.arena, &mut self.in_block, tile.len())?;
        // SAFETY: `block` holds at least `tile.len()` bytes and the plugin is
        // not running while the host fills it.
        let dst = unsafe { std::slice::from_raw_parts_mut(block, tile.len()) };
        copy_in(source, &tile, &channels, bpc, dst);
        tracing::trace!(rect = ?request.rect, lo = request.lo_plane, hi = request.hi_plane, "input tile");
        Ok(tile)
    }

    pub fn fill_output(&mut self, request: TileRequest) -> Result<FilledTile, OSErr> {
        self.check_planes(&request)?;
        let channels = self.channels(&request);
        let bpc = self.mode.bytes_per_channel();
        let tile = FilledTile::new(request, bpc);
        check_bounds(&self.destination, &request)?;
        let block = reserve(&self.arena, &mut self.out_block, tile.len())?;
        // SAFETY: as in `fill_input`.
        let dst = unsafe { std::slice::from_raw_parts_mut(block, tile.len()) };
        copy_in(&self.destination, &tile, &channels, bpc, dst);
        Ok(tile)
    }

    pub fn fill_mask(&mut self, request: TileRequest) -> Result<FilledTile, OSErr> {
        let Some(mask) = &self.mask else {
            return Err(PARAM_ERR);
        };
        let tile = FilledTile::new(request, 1);
        let source = scaled(&mut self.scaled_mask, mask, request.rate)?;
        check_bounds(source, &request)?;
        let block = reserve(&self.arena, &mut self.mask_block, tile.len())?;
        // SAFETY: as in `fill_input`.
        let dst = unsafe { std::slice::from_raw_parts_mut(block, tile.len()) };
        copy_in(source, &tile, &[0], 1, dst);
        Ok(tile)
    }

    /// Writes the output tile back into the destination surface.
    pub fn store_output(&mut self, tile: &FilledTile) {
        if self.out_block.is_null() {
            return;
        }
        let channels = self.channels(&tile.request);
        let bpc = self.mode.bytes_per_channel();
        // SAFETY: the output block was sized for this tile when it was filled.
        let src = unsafe { std::slice::from_raw_parts(self.out_block, tile.len()) };
        let rect = tile.request.rect;
        let (width, height) = (self.destination.width() as i32, self.destination.height() as i32);
        for (row, y) in (rect.top..rect.bottom).enumerate() {
            if y < 0 || y >= height {
                continue;
            }
            let line = &src[row * tile.row_bytes..(row + 1) * tile.row_bytes];
            for (col, x) in (rect.left..rect.right).enumerate() {
                if x < 0 || x >= width {
                    continue;
                }
                let px = &line[col * tile.column_bytes..(col + 1) * tile.column_bytes];
                scatter(px, self.destination.pixel_mut(x as usize, y as usize), &channels, bpc);
            }
        }
        tracing::trace!(rect = ?rect, "output tile stored");
    }

    /// Flushes the previous output tile and serves the plugin's current
    /// requests. Unchanged input and mask requests keep their buffers.
    pub fn advance(&mut self, record: &mut FilterRecord) -> OSErr {
        if let Some(tile) = self.pending_output.take() {
            self.store_output(&tile);
        }
        let (in_rect, out_rect, mask_rect) = requested_rects(record);

        if in_rect.is_empty() {
            record.in_data = ptr::null_mut();
            self.last_input = None;
        } else {
            let request = TileRequest {
                rect: in_rect,
                lo_plane: record.in_lo_plane,
                hi_plane: record.in_hi_plane,
                padding: record.input_padding,
                rate: record.input_rate,
            };
            if self.last_input.map(|tile| tile.request) != Some(request) || record.in_data.is_null() {
                match self.fill_input(request) {
                    Ok(tile) => {
                        record.in_data = self.in_block.cast::<c_void>();
                        record.in_row_bytes = tile.row_bytes as i32;
                        record.in_column_bytes = tile.column_bytes as i32;
                        record.in_plane_bytes = tile.plane_bytes as i32;
                        self.last_input = Some(tile);
                    }
                    Err(err) => return err,
                }
            }
        }

        if out_rect.is_empty() {
            record.out_data = ptr::null_mut();
        } else {
            let request = TileRequest {
                rect: out_rect,
                lo_plane: record.out_lo_plane,
                hi_plane: record.out_hi_plane,
                padding: record.output_padding,
                rate: UNIT_RATE,
            };
            match self.fill_output(request) {
                Ok(tile) => {
                    record.out_data = self.out_block.cast::<c_void>();
                    record.out_row_bytes = tile.row_bytes as i32;
                    record.out_column_bytes = tile.column_bytes as i32;
                    record.out_plane_bytes = tile.plane_bytes as i32;
                    self.pending_output = Some(tile);
                }
                Err(err) => return err,
            }
        }

        if self.mask.is_none() || mask_rect.is_empty() {
            record.mask_data = ptr::null_mut();
            self.last_mask = None;
        } else {
            let request = TileRequest {
                rect: mask_rect,
                lo_plane: 0,
                hi_plane: 0,
                padding: record.mask_padding,
                rate: record.mask_rate,
            };
            if self.last_mask.map(|tile| tile.request) != Some(request) || record.mask_data.is_null() {
                match self.fill_mask(request) {
                    Ok(tile) => {
                        record.mask_data = self.mask_block.cast::<c_void>();
                        record.mask_row_bytes = tile.row_bytes as i32;
                        self.last_mask = Some(tile);
                    }
                    Err(err) => return err,
                }
            }
        }
        NO_ERR
    }
}

impl Drop for TileBuffers {
    fn drop(&mut self) {
        for block in [self.in_block, self.out_block, self.mask_block] {
            let _ = self.arena.free(block);
        }
    }
}

/// Surface to read from at `rate`, resampling and caching when below 1:1.
fn scaled<'a>(cache: &'a mut Option<(Fixed, Surface)>, base: &'a Surface, rate: Fixed) -> Result<&'a Surface, OSErr> {
    if rate <= UNIT_RATE {
        return Ok(base);
    }
    if !matches!(cache, Some((cached, _)) if *cached == rate) {
        let factor = fixed_to_double(rate);
        let width = ((base.width() as f64 / factor).ceil() as usize).max(1);
        let height = ((base.height() as f64 / factor).ceil() as usize).max(1);
        let mut surface = Surface::new(width, height, base.channels(), base.bytes_per_channel());
        if let Err(err) = surface.fit_surface(base) {
            tracing::warn!(%err, "scaling for the requested rate failed");
            return Err(PARAM_ERR);
        }
        *cache = Some((rate, surface));
    }
    match cache {
        Some((_, surface)) => Ok(surface),
        None => Err(PARAM_ERR),
    }
}

fn check_bounds(source: &Surface, request: &TileRequest) -> Result<(), OSErr> {
    let rect = request.rect;
    let outside = rect.left < 0
        || rect.top < 0
        || rect.right > source.width() as i32
        || rect.bottom > source.height() as i32;
    if outside && request.padding == PLUG_IN_WANTS_ERROR_ON_BOUNDS_EXCEPTION {
        tracing::debug!(rect = ?rect, "request outside the image");
        return Err(PARAM_ERR);
    }
    Ok(())
}

/// Returns a block of at least `len` bytes, reusing `current` when it fits.
fn reserve(arena: &NativeArena, current: &mut *mut u8, len: usize) -> Result<*mut u8, OSErr> {
    if !current.is_null() && arena.size(*current).is_some_and(|size| size >= len) {
        return Ok(*current);
    }
    let _ = arena.free(*current);
    *current = ptr::null_mut();
    match arena.allocate(len, true) {
        Ok(block) => {
            *current = block.as_ptr();
            Ok(*current)
        }
        Err(err) => {
            tracing::warn!(%err, "tile allocation failed");
            Err(MEM_FULL_ERR)
        }
    }
}

/// Copies the requested rectangle of `source` into `dst`, padding pixels
/// outside the surface as the request asks.
fn copy_in(source: &Surface, tile: &FilledTile, channels: &[usize], bpc: usize, dst: &mut [u8]) {
    let request = tile.request;
    let rect = request.rect;
    let (width, height) = (source.width() as i32, source.height() as i32);
    for (row, y) in (rect.top..rect.bottom).enumerate() {
        let line = &mut dst[row * tile.row_bytes..(row + 1) * tile.row_bytes];
        for (col, x) in (rect.left..rect.right).enumerate() {
            let out = &mut line[col * tile.column_bytes..(col + 1) * tile.column_bytes];
            if x >= 0 && y >= 0 && x < width && y < height {
                gather(source.pixel(x as usize, y as usize), out, channels, bpc);
                continue;
            }
            match request.padding {
                PLUG_IN_WANTS_EDGE_REPLICATION if width > 0 && height > 0 => {
                    let (ex, ey) = (x.clamp(0, width - 1) as usize, y.clamp(0, height - 1) as usize);
                    gather(source.pixel(ex, ey), out, channels, bpc);
                }
                value if value >= 0 => pad(out, value, bpc),
                _ => {}
            }
        }
    }
}

/// Constant padding; 16-bit tiles get the byte value widened to the plugin range.
fn pad(out: &mut [u8], value: i16, bpc: usize) {
    if bpc == 2 {
        let sample = (value.clamp(0, 255) as u32 * MAX_SAMPLE_16 as u32 / 255) as u16;
        for slot in out.chunks_exact_mut(2) {
            slot.copy_from_slice(&sample.to_ne_bytes());
        }
    } else {
        out.fill(value as u8);
    }
}

/// Surface pixel to interleaved planes.
#[inline]
fn gather(px: &[u8], out: &mut [u8], channels: &[usize], bpc: usize) {
    if bpc == 2 {
        match *channels {
            [a] => out[..2].copy_from_slice(&px[a * 2..a * 2 + 2]),
            [a, b] => {
                out[..2].copy_from_slice(&px[a * 2..a * 2 + 2]);
                out[2..4].copy_from_slice(&px[b * 2..b * 2 + 2]);
            }
            [a, b, c] => {
                out[..2].copy_from_slice(&px[a * 2..a * 2 + 2]);
                out[2..4].copy_from_slice(&px[b * 2..b * 2 + 2]);
                out[4..6].copy_from_slice(&px[c * 2..c * 2 + 2]);
            }
            [a, b, c, d] => {
                out[..2].copy_from_slice(&px[a * 2..a * 2 + 2]);
                out[2..4].copy_from_slice(&px[b * 2..b * 2 + 2]);
                out[4..6].copy_from_slice(&px[c * 2..c * 2 + 2]);
                out[6..8].copy_from_slice(&px[d * 2..d * 2 + 2]);
            }
            _ => {
                for (i, &c) in channels.iter().enumerate() {
                    out[i * 2..i * 2 + 2].copy_from_slice(&px[c * 2..c * 2 + 2]);
                }
            }
        }
        return;
    }
    match *channels {
        [a] => out[0] = px[a],
        [a, b] => {
            out[0] = px[a];
            out[1] = px[b];
        }
        [a, b, c] => {
            out[0] = px[a];
            out[1] = px[b];
            out[2] = px[c];
        }
        [a, b, c, d] => {
            out[0] = px[a];
            out[1] = px[b];
            out[2] = px[c];
            out[3] = px[d];
        }
        _ => {
            for (i, &c) in channels.iter().enumerate() {
                out[i] = px[c];
            }
        }
    }
}

/// Interleaved planes back to a surface pixel.
#[inline]
fn scatter(planes: &[u8], px: &mut [u8], channels: &[usize], bpc: usize) {
    if bpc == 2 {
        match *channels {
            [a] => px[a * 2..a * 2 + 2].copy_from_slice(&planes[..2]),
            [a, b] => {
                px[a * 2..a * 2 + 2].copy_from_slice(&planes[..2]);
                px[b * 2..b * 2 + 2].copy_from_slice(&planes[2..4]);
            }
            [a, b, c] => {
                px[a * 2..a * 2 + 2].copy_from_slice(&planes[..2]);
                px[b * 2..b * 2 + 2].copy_from_slice(&planes[2..4]);
                px[c * 2..c * 2 + 2].copy_from_slice(&planes[4..6]);
            }
            [a, b, c, d] => {
                px[a * 2..a * 2 + 2].copy_from_slice(&planes[..2]);
                px[b * 2..b * 2 + 2].copy_from_slice(&planes[2..4]);
                px[c * 2..c * 2 + 2].copy_from_slice(&planes[4..6]);
                px[d * 2..d * 2 + 2].copy_from_slice(&planes[6..8]);
            }
            _ => {
                for (i, &c) in channels.iter().enumerate() {
                    px[c * 2..c * 2 + 2].copy_from_slice(&planes[i * 2..i * 2 + 2]);
                }
            }
        }
        return;
    }
    match *channels {
        [a] => px[a] = planes[0],
        [a, b] => {
            px[a] = planes[0];
            px[b] = planes[1];
        }
        [a, b, c] => {
            px[a] = planes[0];
            px[b] = planes[1];
            px[c] = planes[2];
        }
        [a, b, c, d] => {
            px[a] = planes[0];
            px[b] = planes[1];
            px[c] = planes[2];
            px[d] = planes[3];
        }
        _ => {
            for (i, &c) in channels.iter().enumerate() {
                px[c] = planes[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_sdk::Rect;
    use pi_sdk::filter_record::PLUG_IN_DOES_NOT_WANT_PADDING;

    fn gradient(width: usize, height: usize) -> Surface {
        let mut surface = Surface::new(width, height, 4, 1);
        for y in 0..height {
            for x in 0..width {
                let base = (y * width + x) as u8 * 4;
                surface.pixel_mut(x, y).copy_from_slice(&[base, base + 1, base + 2, 255]);
            }
        }
        surface
    }

    fn buffers(source: Surface, planes: i16) -> TileBuffers {
        let destination = source.clone();
        TileBuffers::new(
            Rc::new(NativeArena::new()),
            ImageMode::Rgb,
            planes,
            Rc::new(source),
            destination,
            None,
        )
    }

    fn request(rect: VRect, lo: i16, hi: i16, padding: i16) -> TileRequest {
        TileRequest {
            rect,
            lo_plane: lo,
            hi_plane: hi,
            padding,
            rate: UNIT_RATE,
        }
    }

    fn tile_bytes(buffers: &TileBuffers, block: *mut u8, tile: &FilledTile) -> Vec<u8> {
        let _ = buffers;
        // SAFETY: the block holds the filled tile.
        unsafe { std::slice::from_raw_parts(block, tile.len()) }.to_vec()
    }

    #[test]
    fn rgb_planes_come_out_red_first() {
        let mut tiles = buffers(gradient(2, 1), 4);
        let tile = tiles.fill_input(request(VRect::new(0, 0, 1, 1), 0, 3, 0)).unwrap();
        let bytes = tile_bytes(&tiles, tiles.in_block, &tile);
        // surface pixel is B=0 G=1 R=2 A=255
        assert_eq!(bytes, vec![2, 1, 0, 255]);
        assert_eq!(tile.column_bytes, 4);
        assert_eq!(tile.row_bytes, 4);
    }

    #[test]
    fn output_round_trip_is_identity_for_every_plane_subset() {
        for (lo, hi) in [(0, 0), (1, 2), (0, 2), (0, 3), (2, 3)] {
            let source = gradient(4, 3);
            let mut tiles = buffers(source.clone(), 4);
            let tile = tiles.fill_output(request(VRect::new(1, 1, 3, 4), lo, hi, 0)).unwrap();
            tiles.store_output(&tile);
            assert_eq!(tiles.destination(), &source, "planes {lo}..={hi}");
        }
    }

    #[test]
    fn stored_planes_land_in_surface_order() {
        let mut tiles = buffers(Surface::new(1, 1, 4, 1), 3);
        let tile = tiles.fill_output(request(VRect::new(0, 0, 1, 1), 0, 2, 0)).unwrap();
        // SAFETY: three bytes were reserved for the tile.
        unsafe { ptr::copy_nonoverlapping([10u8, 20, 30].as_ptr(), tiles.out_block, 3) };
        tiles.store_output(&tile);
        assert_eq!(tiles.destination().pixel(0, 0), &[30, 20, 10, 0]);
    }

    #[test]
    fn edge_replication_copies_the_nearest_pixel() {
        let source = gradient(2, 2);
        let mut tiles = buffers(source.clone(), 3);
        let tile = tiles
            .fill_input(request(VRect::new(-1, -1, 3, 3), 0, 0, PLUG_IN_WANTS_EDGE_REPLICATION))
            .unwrap();
        let bytes = tile_bytes(&tiles, tiles.in_block, &tile);
        let red = |x: usize, y: usize| source.pixel(x, y)[2];
        assert_eq!(&bytes[0..4], &[red(0, 0), red(0, 0), red(1, 0), red(1, 0)]);
        assert_eq!(&bytes[12..16], &[red(0, 1), red(0, 1), red(1, 1), red(1, 1)]);
    }

    #[test]
    fn constant_and_absent_padding() {
        let mut tiles = buffers(gradient(1, 1), 3);
        let tile = tiles.fill_input(request(VRect::new(0, 0, 1, 2), 0, 0, 7)).unwrap();
        assert_eq!(tile_bytes(&tiles, tiles.in_block, &tile), vec![2, 7]);

        let tile = tiles
            .fill_input(request(VRect::new(0, 0, 1, 3), 0, 0, PLUG_IN_DOES_NOT_WANT_PADDING))
            .unwrap();
        // the block was regrown and zero filled; padding bytes stay untouched
        assert_eq!(tile_bytes(&tiles, tiles.in_block, &tile), vec![2, 0, 0]);
    }

    fn wide_gradient(width: usize, height: usize) -> Surface {
        let mut surface = Surface::new(width, height, 4, 2);
        for y in 0..height {
            for x in 0..width {
                for channel in 0..4 {
                    surface.set_sample(x, y, channel, (1000 * (y * width + x) + 100 * channel + 1) as u16);
                }
            }
        }
        surface
    }

    fn wide_buffers(source: Surface) -> TileBuffers {
        let destination = source.clone();
        TileBuffers::new(Rc::new(NativeArena::new()), ImageMode::Rgb48, 4, Rc::new(source), destination, None)
    }

    fn samples(bytes: &[u8]) -> Vec<u16> {
        bytes.chunks_exact(2).map(|b| u16::from_ne_bytes([b[0], b[1]])).collect()
    }

    #[test]
    fn sixteen_bit_constant_padding_uses_the_plugin_range() {
        let mut tiles = wide_buffers(wide_gradient(1, 1));
        let tile = tiles.fill_input(request(VRect::new(0, 0, 1, 3), 0, 1, 255)).unwrap();
        let bytes = tile_bytes(&tiles, tiles.in_block, &tile);
        assert_eq!(samples(&bytes), vec![201, 101, MAX_SAMPLE_16, MAX_SAMPLE_16, MAX_SAMPLE_16, MAX_SAMPLE_16]);

        let tile = tiles.fill_input(request(VRect::new(0, 0, 1, 2), 0, 0, 51)).unwrap();
        let bytes = tile_bytes(&tiles, tiles.in_block, &tile);
        assert_eq!(samples(&bytes), vec![201, 6553]);
    }

    #[test]
    fn sixteen_bit_planes_come_out_red_first() {
        let mut tiles = wide_buffers(wide_gradient(1, 1));
        let tile = tiles.fill_input(request(VRect::new(0, 0, 1, 1), 0, 3, 0)).unwrap();
        let bytes = tile_bytes(&tiles, tiles.in_block, &tile);
        assert_eq!(samples(&bytes), vec![201, 101, 1, 301]);
        assert_eq!(tile.column_bytes, 8);
    }

    #[test]
    fn sixteen_bit_round_trip_is_identity_for_every_plane_subset() {
        for (lo, hi) in [(0, 0), (1, 2), (0, 2), (0, 3), (2, 3), (1, 3)] {
            let source = wide_gradient(3, 2);
            let mut tiles = wide_buffers(source.clone());
            let tile = tiles.fill_output(request(VRect::new(0, 0, 3, 2), lo, hi, 0)).unwrap();
            tiles.store_output(&tile);
            assert_eq!(tiles.destination(), &source, "planes {lo}..={hi}");
        }
    }

    #[test]
    fn sixteen_bit_stores_all_four_planes() {
        let mut tiles = wide_buffers(Surface::new(1, 1, 4, 2));
        let tile = tiles.fill_output(request(VRect::new(0, 0, 1, 1), 0, 3, 0)).unwrap();
        let planes: Vec<u8> = [10u16, 20, 30, 40].iter().flat_map(|v| v.to_ne_bytes()).collect();
        // SAFETY: eight bytes were reserved for the tile.
        unsafe { ptr::copy_nonoverlapping(planes.as_ptr(), tiles.out_block, planes.len()) };
        tiles.store_output(&tile);
        let px: Vec<u16> = (0..4).map(|c| tiles.destination().sample(0, 0, c)).collect();
        assert_eq!(px, vec![30, 20, 10, 40]);
    }

    #[test]
    fn bounds_exception_fails_without_allocating() {
        let mut tiles = buffers(gradient(2, 2), 3);
        let err = tiles.fill_input(request(VRect::new(0, 0, 3, 2), 0, 0, PLUG_IN_WANTS_ERROR_ON_BOUNDS_EXCEPTION));
        assert_eq!(err, Err(PARAM_ERR));
        assert!(tiles.in_block.is_null());
    }

    #[test]
    fn bad_plane_ranges_are_rejected() {
        let mut tiles = buffers(gradient(2, 2), 3);
        assert_eq!(tiles.fill_input(request(VRect::new(0, 0, 1, 1), 0, 3, 0)), Err(PARAM_ERR));
        assert_eq!(tiles.fill_input(request(VRect::new(0, 0, 1, 1), 2, 1, 0)), Err(PARAM_ERR));
    }

    #[test]
    fn half_rate_reads_a_downscaled_image() {
        let mut flat = Surface::new(8, 8, 4, 1);
        for px in flat.data_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&[40, 80, 120, 255]);
        }
        let mut tiles = buffers(flat, 3);
        let mut req = request(VRect::new(0, 0, 4, 4), 0, 2, 0);
        req.rate = 2 * UNIT_RATE;
        let tile = tiles.fill_input(req).unwrap();
        let bytes = tile_bytes(&tiles, tiles.in_block, &tile);
        assert_eq!(bytes.len(), 4 * 4 * 3);
        assert_eq!(&bytes[..3], &[120, 80, 40]);
        assert_eq!(tiles.scaled_input.as_ref().map(|(_, s)| s.width()), Some(4));
    }

    #[test]
    fn advance_stores_the_previous_tile_and_reuses_input() {
        let mut tiles = buffers(gradient(2, 2), 3);
        let mut record = FilterRecord::zeroed();
        record.input_rate = UNIT_RATE;
        record.in_rect = Rect::new(0, 0, 1, 2);
        record.out_rect = Rect::new(0, 0, 1, 2);
        record.in_hi_plane = 2;
        record.out_hi_plane = 2;
        assert_eq!(tiles.advance(&mut record), NO_ERR);
        let first_input = record.in_data;
        assert!(!first_input.is_null());
        assert_eq!(record.out_row_bytes, 6);

        // SAFETY: the output tile is 6 bytes.
        unsafe { ptr::write_bytes(record.out_data.cast::<u8>(), 0, 6) };
        record.out_rect = Rect::default();
        assert_eq!(tiles.advance(&mut record), NO_ERR);
        assert_eq!(record.in_data, first_input);
        assert!(record.out_data.is_null());
        assert_eq!(tiles.destination().pixel(1, 0), &[0, 0, 0, 255]);
        assert_eq!(tiles.destination().pixel(1, 1), gradient(2, 2).pixel(1, 1));
    }
}
