//! Pixel surfaces: source, destination, mask and preview images.
//!
//! A surface owns one contiguous buffer of `height` rows, each `stride`
//! bytes. Colour surfaces keep their channels in BGRA order; gray and mask
//! surfaces have one channel and CMYK surfaces keep C, M, Y, K in order.
//! 16-bit surfaces hold native-endian samples in the `0..=32768` range
//! plugins expect. A surface is never resized; a new one replaces it.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba};
use pi_sdk::VRect;
use pi_sdk::filter_record::{
    PLUG_IN_MODE_CMYK_COLOR, PLUG_IN_MODE_GRAY_SCALE, PLUG_IN_MODE_GRAY16, PLUG_IN_MODE_RGB_COLOR,
    PLUG_IN_MODE_RGB48,
};
use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Largest 16-bit sample value plugins work with.
pub const MAX_SAMPLE_16: u16 = 32768;

/// Colour mode of the document being filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageMode {
    Gray,
    Gray16,
    Rgb,
    Rgb48,
    Cmyk,
}

impl ImageMode {
    /// Value reported in `FilterRecord::image_mode`.
    pub fn plugin_mode(self) -> i16 {
        match self {
            ImageMode::Gray => PLUG_IN_MODE_GRAY_SCALE,
            ImageMode::Gray16 => PLUG_IN_MODE_GRAY16,
            ImageMode::Rgb => PLUG_IN_MODE_RGB_COLOR,
            ImageMode::Rgb48 => PLUG_IN_MODE_RGB48,
            ImageMode::Cmyk => PLUG_IN_MODE_CMYK_COLOR,
        }
    }

    pub fn bytes_per_channel(self) -> usize {
        match self {
            ImageMode::Gray16 | ImageMode::Rgb48 => 2,
            _ => 1,
        }
    }

    pub fn depth(self) -> i32 {
        self.bytes_per_channel() as i32 * 8
    }

    /// Channels a surface of this mode stores.
    pub fn surface_channels(self) -> usize {
        match self {
            ImageMode::Gray | ImageMode::Gray16 => 1,
            ImageMode::Rgb | ImageMode::Rgb48 | ImageMode::Cmyk => 4,
        }
    }

    /// Colour planes, not counting transparency.
    pub fn color_planes(self) -> usize {
        match self {
            ImageMode::Gray | ImageMode::Gray16 => 1,
            ImageMode::Rgb | ImageMode::Rgb48 => 3,
            ImageMode::Cmyk => 4,
        }
    }

    /// Whether the surface carries an alpha channel a filter may edit.
    pub fn supports_transparency(self) -> bool {
        matches!(self, ImageMode::Rgb | ImageMode::Rgb48)
    }

    /// Byte offset inside a surface pixel, in channels, of plugin plane `plane`.
    ///
    /// RGB planes arrive red first while surfaces are BGRA, so planes 0 and 2
    /// trade places.
    pub fn plane_channel(self, plane: usize) -> usize {
        match self {
            ImageMode::Rgb | ImageMode::Rgb48 => [2, 1, 0, 3][plane & 3],
            _ => plane,
        }
    }
}

/// Owned pixel buffer with row and pixel addressing.
#[derive(Clone, PartialEq)]
pub struct Surface {
    width: usize,
    height: usize,
    channels: usize,
    bytes_per_channel: usize,
    stride: usize,
    dpi_x: f64,
    dpi_y: f64,
    data: Vec<u8>,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes_per_channel", &self.bytes_per_channel)
            .finish()
    }
}

impl Surface {
    /// Zero-filled surface at 96 DPI.
    pub fn new(width: usize, height: usize, channels: usize, bytes_per_channel: usize) -> Self {
        let stride = width * channels * bytes_per_channel;
        Self {
            width,
            height,
            channels,
            bytes_per_channel,
            stride,
            dpi_x: 96.0,
            dpi_y: 96.0,
            data: vec![0; stride * height],
        }
    }

    /// Surface laid out for `mode`.
    pub fn for_mode(mode: ImageMode, width: usize, height: usize) -> Self {
        Self::new(width, height, mode.surface_channels(), mode.bytes_per_channel())
    }

    /// Single channel 8-bit selection mask; 255 is fully selected.
    pub fn new_mask(width: usize, height: usize) -> Self {
        Self::new(width, height, 1, 1)
    }

    /// Wraps existing BGRA8 bytes.
    pub fn from_bgra8(width: usize, height: usize, data: Vec<u8>) -> Result<Self, HostError> {
        Self::from_raw(width, height, 4, 1, data)
    }

    /// Wraps existing bytes with the given layout.
    pub fn from_raw(
        width: usize,
        height: usize,
        channels: usize,
        bytes_per_channel: usize,
        data: Vec<u8>,
    ) -> Result<Self, HostError> {
        let mut surface = Self::new(0, 0, channels, bytes_per_channel);
        let stride = width * channels * bytes_per_channel;
        if data.len() != stride * height {
            return Err(HostError::InvalidRequest(format!(
                "buffer of {} bytes does not match a {width}x{height} surface",
                data.len()
            )));
        }
        surface.width = width;
        surface.height = height;
        surface.stride = stride;
        surface.data = data;
        Ok(surface)
    }

    /// Converts an RGBA8 image into a BGRA surface.
    pub fn from_rgba_image(image: &image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let mut surface = Self::new(width as usize, height as usize, 4, 1);
        for (dst, src) in surface.data.chunks_exact_mut(4).zip(image.as_raw().chunks_exact(4)) {
            dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
        }
        surface
    }

    /// Converts a BGRA8 surface back into an RGBA8 image.
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        if self.channels != 4 || self.bytes_per_channel != 1 {
            return None;
        }
        let mut raw = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(4) {
            raw.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
        ImageBuffer::from_raw(self.width as u32, self.height as u32, raw)
    }

    /// Converts a full-range RGBA16 image into a BGRA surface in the plugin range.
    pub fn from_rgba16_image(image: &image::ImageBuffer<Rgba<u16>, Vec<u16>>) -> Self {
        let (width, height) = image.dimensions();
        let mut surface = Self::new(width as usize, height as usize, 4, 2);
        for (dst, src) in surface.data.chunks_exact_mut(8).zip(image.as_raw().chunks_exact(4)) {
            for (slot, value) in dst.chunks_exact_mut(2).zip([src[2], src[1], src[0], src[3]]) {
                slot.copy_from_slice(&to_plugin_range(value).to_ne_bytes());
            }
        }
        surface
    }

    /// Converts a 16-bit BGRA surface back into a full-range RGBA16 image.
    pub fn to_rgba16_image(&self) -> Option<image::ImageBuffer<Rgba<u16>, Vec<u16>>> {
        if self.channels != 4 || self.bytes_per_channel != 2 {
            return None;
        }
        let mut raw = Vec::with_capacity(self.width * self.height * 4);
        for px in self.data.chunks_exact(8) {
            let sample = |c: usize| from_plugin_range(u16::from_ne_bytes([px[c * 2], px[c * 2 + 1]]));
            raw.extend_from_slice(&[sample(2), sample(1), sample(0), sample(3)]);
        }
        ImageBuffer::from_raw(self.width as u32, self.height as u32, raw)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn bytes_per_channel(&self) -> usize {
        self.bytes_per_channel
    }

    pub fn pixel_bytes(&self) -> usize {
        self.channels * self.bytes_per_channel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn dpi(&self) -> (f64, f64) {
        (self.dpi_x, self.dpi_y)
    }

    pub fn bounds(&self) -> VRect {
        VRect::new(0, 0, self.height as i32, self.width as i32)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.stride]
    }

    pub fn pixel(&self, x: usize, y: usize) -> &[u8] {
        let start = y * self.stride + x * self.pixel_bytes();
        &self.data[start..start + self.pixel_bytes()]
    }

    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [u8] {
        let size = self.pixel_bytes();
        let start = y * self.stride + x * size;
        &mut self.data[start..start + size]
    }

    /// Sample `channel` of pixel (x, y) widened to `u16`.
    pub fn sample(&self, x: usize, y: usize, channel: usize) -> u16 {
        let px = self.pixel(x, y);
        match self.bytes_per_channel {
            2 => u16::from_ne_bytes([px[channel * 2], px[channel * 2 + 1]]),
            _ => px[channel] as u16,
        }
    }

    pub fn set_sample(&mut self, x: usize, y: usize, channel: usize, value: u16) {
        let bpc = self.bytes_per_channel;
        let px = self.pixel_mut(x, y);
        match bpc {
            2 => px[channel * 2..channel * 2 + 2].copy_from_slice(&value.to_ne_bytes()),
            _ => px[channel] = value as u8,
        }
    }

    /// Value of a fully opaque alpha / fully selected mask sample.
    pub fn max_sample(&self) -> u16 {
        if self.bytes_per_channel == 2 { MAX_SAMPLE_16 } else { 255 }
    }

    fn same_layout(&self, other: &Surface) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
            && self.bytes_per_channel == other.bytes_per_channel
    }

    /// Copies every pixel of a same-sized surface.
    pub fn copy_surface(&mut self, source: &Surface) -> Result<(), HostError> {
        if !self.same_layout(source) {
            return Err(HostError::InvalidRequest(format!(
                "cannot copy {source:?} into {self:?}"
            )));
        }
        self.data.copy_from_slice(&source.data);
        Ok(())
    }

    /// Resamples `source` to fill this surface using a Catmull-Rom filter.
    pub fn fit_surface(&mut self, source: &Surface) -> Result<(), HostError> {
        if source.channels != self.channels || source.bytes_per_channel != self.bytes_per_channel {
            return Err(HostError::InvalidRequest(format!(
                "cannot resample {source:?} into {self:?}"
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }
        let (w, h) = (self.width as u32, self.height as u32);
        let resized = match (self.bytes_per_channel, self.channels) {
            (1, 1) => resize_u8::<Luma<u8>>(source, w, h),
            (1, 2) => resize_u8::<LumaA<u8>>(source, w, h),
            (1, 3) => resize_u8::<Rgb<u8>>(source, w, h),
            (1, 4) => resize_u8::<Rgba<u8>>(source, w, h),
            (2, 1) => resize_u16::<Luma<u16>>(source, w, h),
            (2, 2) => resize_u16::<LumaA<u16>>(source, w, h),
            (2, 3) => resize_u16::<Rgb<u16>>(source, w, h),
            (2, 4) => resize_u16::<Rgba<u16>>(source, w, h),
            _ => None,
        };
        let resized = resized.ok_or_else(|| HostError::InvalidRequest(format!("cannot resample {source:?}")))?;
        self.data.copy_from_slice(&resized);
        Ok(())
    }

    /// Forces alpha to opaque, everywhere or only inside `clip`.
    pub fn set_alpha_to_opaque(&mut self, clip: Option<&[VRect]>) {
        if self.channels != 4 {
            return;
        }
        let full = [self.bounds()];
        let rects = clip.unwrap_or(&full);
        let opaque = self.max_sample();
        for rect in rects {
            let top = rect.top.clamp(0, self.height as i32) as usize;
            let bottom = rect.bottom.clamp(0, self.height as i32) as usize;
            let left = rect.left.clamp(0, self.width as i32) as usize;
            let right = rect.right.clamp(0, self.width as i32) as usize;
            for y in top..bottom {
                for x in left..right {
                    self.set_sample(x, y, 3, opaque);
                }
            }
        }
    }

    /// Whether any pixel is less than fully opaque.
    pub fn has_transparency(&self) -> bool {
        if self.channels != 4 {
            return false;
        }
        let opaque = self.max_sample();
        (0..self.height).any(|y| (0..self.width).any(|x| self.sample(x, y, 3) < opaque))
    }

    /// Whether every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.channels == 4 && (0..self.height).all(|y| (0..self.width).all(|x| self.sample(x, y, 3) == 0))
    }

    /// Bounding box of the non-zero samples of a mask, `None` when empty.
    pub fn mask_bounds(&self) -> Option<VRect> {
        let mut bounds: Option<VRect> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.sample(x, y, 0) == 0 {
                    continue;
                }
                let (x, y) = (x as i32, y as i32);
                bounds = Some(match bounds {
                    None => VRect::new(y, x, y + 1, x + 1),
                    Some(b) => VRect::new(b.top.min(y), b.left.min(x), b.bottom.max(y + 1), b.right.max(x + 1)),
                });
            }
        }
        bounds
    }
}

fn resize_u8<P>(source: &Surface, width: u32, height: u32) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let buffer: ImageBuffer<P, Vec<u8>> =
        ImageBuffer::from_raw(source.width as u32, source.height as u32, source.data.clone())?;
    Some(imageops::resize(&buffer, width, height, FilterType::CatmullRom).into_raw())
}

fn resize_u16<P>(source: &Surface, width: u32, height: u32) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u16> + 'static,
{
    let samples: Vec<u16> = source
        .data
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect();
    let buffer: ImageBuffer<P, Vec<u16>> = ImageBuffer::from_raw(source.width as u32, source.height as u32, samples)?;
    let resized = imageops::resize(&buffer, width, height, FilterType::CatmullRom).into_raw();
    Some(resized.into_iter().flat_map(|v| v.min(MAX_SAMPLE_16).to_ne_bytes()).collect())
}

/// Converts a full-range 16-bit sample to the plugin range.
pub fn to_plugin_range(value: u16) -> u16 {
    ((value as u32 * MAX_SAMPLE_16 as u32 + 32767) / 65535) as u16
}

/// Converts a plugin-range 16-bit sample back to full range.
pub fn from_plugin_range(value: u16) -> u16 {
    ((value.min(MAX_SAMPLE_16) as u32 * 65535 + 16384) / MAX_SAMPLE_16 as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_images_are_stored_as_bgra() {
        let img = image::RgbaImage::from_raw(1, 1, vec![10, 20, 30, 40]).unwrap();
        let surface = Surface::from_rgba_image(&img);
        assert_eq!(surface.pixel(0, 0), &[30, 20, 10, 40]);
        assert_eq!(surface.to_rgba_image().unwrap().as_raw(), &vec![10, 20, 30, 40]);
    }

    #[test]
    fn rgb_planes_swap_red_and_blue() {
        assert_eq!(ImageMode::Rgb.plane_channel(0), 2);
        assert_eq!(ImageMode::Rgb48.plane_channel(2), 0);
        assert_eq!(ImageMode::Rgb.plane_channel(3), 3);
        assert_eq!(ImageMode::Cmyk.plane_channel(0), 0);
    }

    #[test]
    fn copy_requires_matching_layout() {
        let mut a = Surface::new(2, 2, 4, 1);
        let mut b = Surface::new(2, 2, 4, 1);
        b.data_mut().fill(7);
        a.copy_surface(&b).unwrap();
        assert_eq!(a.data(), b.data());
        assert!(a.copy_surface(&Surface::new(3, 2, 4, 1)).is_err());
    }

    #[test]
    fn fit_surface_downscales_flat_colour() {
        let mut big = Surface::new(8, 8, 4, 1);
        for px in big.data_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&[50, 100, 150, 255]);
        }
        let mut small = Surface::new(4, 4, 4, 1);
        small.fit_surface(&big).unwrap();
        assert_eq!(small.pixel(1, 2), &[50, 100, 150, 255]);
    }

    #[test]
    fn alpha_fix_respects_clip() {
        let mut s = Surface::new(4, 1, 4, 1);
        s.set_alpha_to_opaque(Some(&[VRect::new(0, 1, 1, 3)]));
        let alphas: Vec<u8> = (0..4).map(|x| s.pixel(x, 0)[3]).collect();
        assert_eq!(alphas, vec![0, 255, 255, 0]);
        assert!(s.has_transparency());
        s.set_alpha_to_opaque(None);
        assert!(!s.has_transparency());
    }

    #[test]
    fn mask_bounds_cover_selected_pixels() {
        let mut mask = Surface::new_mask(5, 5);
        assert_eq!(mask.mask_bounds(), None);
        mask.set_sample(1, 2, 0, 255);
        mask.set_sample(3, 3, 0, 10);
        assert_eq!(mask.mask_bounds(), Some(VRect::new(2, 1, 4, 4)));
    }

    #[test]
    fn sixteen_bit_range_conversion_hits_the_ends() {
        assert_eq!(to_plugin_range(0), 0);
        assert_eq!(to_plugin_range(65535), 32768);
        assert_eq!(from_plugin_range(32768), 65535);
        assert_eq!(from_plugin_range(to_plugin_range(65535)), 65535);
    }

    #[test]
    fn rgba16_images_use_the_plugin_range() {
        let img = ImageBuffer::<Rgba<u16>, Vec<u16>>::from_raw(1, 1, vec![65535, 0, 0, 65535]).unwrap();
        let surface = Surface::from_rgba16_image(&img);
        assert_eq!(surface.sample(0, 0, 2), 32768);
        assert_eq!(surface.sample(0, 0, 0), 0);
        assert_eq!(surface.sample(0, 0, 3), 32768);
        assert_eq!(surface.to_rgba16_image().unwrap().as_raw(), &vec![65535, 0, 0, 65535]);
    }
}
