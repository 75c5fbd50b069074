//! The canvas a page draws into.
//!
//! A [`RenderSurface`] owns every cell of one page grid, hands out a drawable
//! handle per cell, and composites the cells into a single bitmap on demand.

pub mod bitmap;

pub use bitmap::{BitmapSurface, CellCanvas};

use bytesize::ByteSize;
use image::{Rgb, RgbaImage};

use crate::config::{MontageConfig, inches_to_pixels};
use crate::error::Result;
use crate::grid::GridShape;

/// Largest raster dimension the bitmap encoders are expected to handle.
pub const MAX_RASTER_DIMENSION: u64 = 1 << 16;

/// Geometry and fill of one page surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceLayout {
    pub shape: GridShape,
    /// Cell size in inches, `(width, height)`.
    pub cell_size: (f64, f64),
    pub dpi: u32,
    pub background: Rgb<u8>,
    pub transparent: bool,
}

impl SurfaceLayout {
    pub fn from_config(config: &MontageConfig, shape: GridShape) -> Self {
        Self {
            shape,
            cell_size: config.cell_size,
            dpi: config.dpi,
            background: config.background_rgb(),
            transparent: config.transparent,
        }
    }

    pub fn cell_pixels(&self) -> (u32, u32) {
        inches_to_pixels(self.cell_size, self.dpi)
    }

    /// Full canvas size in pixels when every row is kept.
    pub fn canvas_pixels(&self) -> (u64, u64) {
        let (w, h) = self.cell_pixels();
        (
            w as u64 * self.shape.cols as u64,
            h as u64 * self.shape.rows as u64,
        )
    }

    /// Logs a warning when either canvas dimension exceeds [`MAX_RASTER_DIMENSION`].
    ///
    /// The surface is still created; the encoder may or may not cope with it.
    pub fn warn_if_oversized(&self) -> bool {
        let (w, h) = self.canvas_pixels();
        if w <= MAX_RASTER_DIMENSION && h <= MAX_RASTER_DIMENSION {
            return false;
        }
        tracing::warn!(
            width = w,
            height = h,
            raster = %ByteSize::b(w.saturating_mul(h).saturating_mul(4)),
            "canvas exceeds {MAX_RASTER_DIMENSION} pixels in at least one dimension"
        );
        true
    }
}

/// Backend that renders one page grid.
///
/// A surface is created per page, drawn into cell by cell, rasterized once, and
/// then either released or reset for the next page.
pub trait RenderSurface: Sized {
    /// Drawable handle for one cell.
    type Cell<'a>
    where
        Self: 'a;

    fn create(layout: &SurfaceLayout) -> Result<Self>;

    fn cell(&mut self, index: usize) -> Result<Self::Cell<'_>>;

    /// Background color of the canvas. Must stay valid before rasterization,
    /// which may consume the drawn state.
    fn background_color(&self) -> Rgb<u8>;

    /// Drops cells `from..` so the raster only covers consumed rows.
    fn discard_cells(&mut self, from: usize);

    fn rasterize(&mut self) -> Result<RgbaImage>;

    /// Clears every cell so the surface can serve another page of the same shape.
    fn reset(&mut self);

    fn release(self);
}
