// ============================================================================
// PIXEL BUFFER & COLOR MODEL
// ============================================================================

use std::path::Path;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Pixels whose r, g and b are all below this value are boundary ink.
pub const BOUNDARY_INK_THRESHOLD: u8 = 50;

// ============================================================================
// COLOR
// ============================================================================

/// Straight (non-premultiplied) RGBA color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array(p: [u8; 4]) -> Self {
        Self::rgba(p[0], p[1], p[2], p[3])
    }

    /// Parse `#RGB`, `#RRGGBB` or `#RRGGBBAA` (the `#` is optional).
    pub fn parse_hex(s: &str) -> Result<Self> {
        let hex = s.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if !hex.is_ascii() {
            return Err(EngineError::InvalidColor(s.to_string()));
        }
        let channel = |i: usize| -> Result<u8> {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| EngineError::InvalidColor(s.to_string()))
        };
        match hex.len() {
            3 => {
                let mut out = [0u8; 3];
                for (i, c) in hex.chars().enumerate() {
                    let v = c
                        .to_digit(16)
                        .ok_or_else(|| EngineError::InvalidColor(s.to_string()))?
                        as u8;
                    out[i] = v * 17;
                }
                Ok(Self::rgb(out[0], out[1], out[2]))
            }
            6 => Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Ok(Self::rgba(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => Err(EngineError::InvalidColor(s.to_string())),
        }
    }

    /// Upper-case `#RRGGBB`, or `#RRGGBBAA` when not fully opaque.
    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }

    /// Per-channel absolute difference (alpha included) is at most `threshold`.
    #[inline]
    pub fn within_tolerance(self, other: Color, threshold: u8) -> bool {
        self.r.abs_diff(other.r) <= threshold
            && self.g.abs_diff(other.g) <= threshold
            && self.b.abs_diff(other.b) <= threshold
            && self.a.abs_diff(other.a) <= threshold
    }

    /// Near-black line art that freehand tools and fills must not paint over.
    #[inline]
    pub fn is_boundary_ink(self) -> bool {
        self.is_boundary_ink_below(BOUNDARY_INK_THRESHOLD)
    }

    #[inline]
    pub fn is_boundary_ink_below(self, threshold: u8) -> bool {
        self.r < threshold && self.g < threshold && self.b < threshold
    }
}

impl std::str::FromStr for Color {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Color::parse_hex(s)
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ============================================================================
// BOUNDING BOX
// ============================================================================

/// Inclusive pixel bounds `(min_x, min_y)..=(max_x, max_y)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub fn point(x: u32, y: u32) -> Self {
        Self { min_x: x, min_y: y, max_x: x, max_y: y }
    }

    pub fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn union(self, other: BoundingBox) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// RGBA8 raster, row-major. `data.len() == width * height * 4` always holds.
///
/// A buffer has exactly one owner. Handing pixels to the fill worker moves a
/// copy of the bytes; the sender keeps its own buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let px = color.to_array();
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&px);
        }
        Self { width, height, data }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(EngineError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// `None` outside the buffer.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let o = self.offset(x, y);
        Some(Color::rgba(
            self.data[o],
            self.data[o + 1],
            self.data[o + 2],
            self.data[o + 3],
        ))
    }

    /// Returns `false` (and writes nothing) outside the buffer.
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, color: Color) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let o = self.offset(x, y);
        self.data[o..o + 4].copy_from_slice(&color.to_array());
        true
    }

    /// Sample at a signed canvas coordinate; `None` when out of bounds.
    pub fn sample(&self, x: i64, y: i64) -> Option<Color> {
        if !self.in_bounds(x, y) {
            return None;
        }
        self.get(x as u32, y as u32)
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        // Dimensions are guaranteed by the length invariant.
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    pub fn from_rgba_image(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }

    /// Decode any image the `image` crate understands into RGBA8.
    pub fn load_png(path: &Path) -> Result<Self> {
        let img = image::open(path)?.into_rgba8();
        Ok(Self::from_rgba_image(img))
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.to_rgba_image()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

// ============================================================================
// RASTER ANALYSIS
// ============================================================================

/// Pixel census of a raster drawing, used to sanity-check line art.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RasterReport {
    pub total_pixels: usize,
    pub boundary_pixels: usize,
    pub transparent_pixels: usize,
}

impl RasterReport {
    pub fn has_boundary_ink(&self) -> bool {
        self.boundary_pixels > 0
    }

    /// Pixels that are neither ink nor transparent.
    pub fn colorable_pixels(&self) -> usize {
        self.total_pixels - self.boundary_pixels - self.transparent_pixels
    }

    fn merge(self, other: RasterReport) -> RasterReport {
        RasterReport {
            total_pixels: self.total_pixels + other.total_pixels,
            boundary_pixels: self.boundary_pixels + other.boundary_pixels,
            transparent_pixels: self.transparent_pixels + other.transparent_pixels,
        }
    }
}

/// Count boundary ink and transparent pixels, one rayon task per row.
/// Transparent pixels are never counted as ink.
pub fn analyze_raster(buffer: &PixelBuffer, ink_threshold: u8) -> RasterReport {
    let row_bytes = buffer.width as usize * 4;
    if row_bytes == 0 || buffer.height == 0 {
        return RasterReport::default();
    }
    buffer
        .data
        .par_chunks_exact(row_bytes)
        .map(|row| {
            let mut report = RasterReport {
                total_pixels: row.len() / 4,
                ..Default::default()
            };
            for px in row.chunks_exact(4) {
                let c = Color::rgba(px[0], px[1], px[2], px[3]);
                if c.a == 0 {
                    report.transparent_pixels += 1;
                } else if c.is_boundary_ink_below(ink_threshold) {
                    report.boundary_pixels += 1;
                }
            }
            report
        })
        .reduce(RasterReport::default, RasterReport::merge)
}

// ============================================================================
// REGION MANIFEST
// ============================================================================

/// Maps canvas pixels to externally assigned region ids.
///
/// Raster drawings ship a label plane alongside the art (`0` = no region);
/// SVG drawings carry only the id list and the host names the region on tap.
#[derive(Clone, Debug, Default)]
pub struct RegionManifest {
    width: u32,
    height: u32,
    labels: Vec<u32>,
    ids: Vec<String>,
}

impl RegionManifest {
    /// Manifest for artwork whose regions are addressed by id only.
    pub fn from_ids(ids: Vec<String>) -> Self {
        Self {
            ids,
            ..Default::default()
        }
    }

    /// `labels[y * width + x]` is `0` for no region, or `n` for `ids[n - 1]`.
    pub fn with_labels(width: u32, height: u32, labels: Vec<u32>, ids: Vec<String>) -> Result<Self> {
        if labels.len() != width as usize * height as usize
            || labels.iter().any(|&l| l as usize > ids.len())
        {
            return Err(EngineError::ManifestSize { width, height });
        }
        Ok(Self { width, height, labels, ids })
    }

    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn matches(&self, buffer: &PixelBuffer) -> bool {
        !self.has_labels() || (self.width == buffer.width() && self.height == buffer.height())
    }

    pub fn region_ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, region_id: &str) -> bool {
        self.ids.iter().any(|id| id == region_id)
    }

    /// Every pixel labelled with `region_id`, in row order.
    pub fn region_pixels(&self, region_id: &str) -> Vec<(u32, u32)> {
        let Some(pos) = self.ids.iter().position(|id| id == region_id) else {
            return Vec::new();
        };
        let label = pos as u32 + 1;
        let width = self.width.max(1) as usize;
        self.labels
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l == label)
            .map(|(i, _)| ((i % width) as u32, (i / width) as u32))
            .collect()
    }

    pub fn region_at(&self, x: u32, y: u32) -> Option<&str> {
        if !self.has_labels() || x >= self.width || y >= self.height {
            return None;
        }
        let label = self.labels[y as usize * self.width as usize + x as usize];
        if label == 0 {
            return None;
        }
        self.ids.get(label as usize - 1).map(String::as_str)
    }
}
