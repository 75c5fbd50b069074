use std::collections::HashSet;

use image::{GrayImage, Luma, Rgb, Rgba, RgbaImage, imageops};
use imageproc::region_labelling::{Connectivity, connected_components};
use plotters::coord::Shift;
use plotters::prelude::*;

use super::{RenderSurface, SurfaceLayout};
use crate::error::{MontageError, Result};
use crate::grid::Slot;

/// In-memory surface: every cell is its own RGB buffer drawn through
/// [`BitMapBackend::with_buffer`].
///
/// Cell buffers are allocated on first use, so an unused tail costs nothing.
pub struct BitmapSurface {
    layout: SurfaceLayout,
    cell_px: (u32, u32),
    cells: Vec<Option<Vec<u8>>>,
    live: usize,
}

/// Handle to one cell of a [`BitmapSurface`].
pub struct CellCanvas<'a> {
    slot: Slot,
    size: (u32, u32),
    pixels: &'a mut [u8],
}

impl CellCanvas<'_> {
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Cell size in pixels, `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// A plotters drawing area covering exactly this cell.
    pub fn drawing_area(&mut self) -> DrawingArea<BitMapBackend<'_>, Shift> {
        BitMapBackend::with_buffer(&mut *self.pixels, self.size).into_drawing_area()
    }

    /// Raw RGB bytes of the cell, row-major.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.pixels
    }
}

impl BitmapSurface {
    pub fn layout(&self) -> &SurfaceLayout {
        &self.layout
    }
}

fn blank_cell(bg: Rgb<u8>, (w, h): (u32, u32)) -> Vec<u8> {
    bg.0.repeat(w as usize * h as usize)
}

impl RenderSurface for BitmapSurface {
    type Cell<'a> = CellCanvas<'a>;

    fn create(layout: &SurfaceLayout) -> Result<Self> {
        let cell_px = layout.cell_pixels();
        if cell_px.0 == 0 || cell_px.1 == 0 {
            return Err(MontageError::config(format!(
                "cell of {:?} inches at {} dpi has no pixels",
                layout.cell_size, layout.dpi
            )));
        }
        let cells = layout.shape.cells();
        if cells == 0 {
            return Err(MontageError::config("surface grid has no cells"));
        }
        Ok(Self {
            layout: layout.clone(),
            cell_px,
            cells: vec![None; cells],
            live: cells,
        })
    }

    fn cell(&mut self, index: usize) -> Result<CellCanvas<'_>> {
        if index >= self.live {
            return Err(MontageError::Exhausted {
                capacity: self.live,
            });
        }
        let slot = self.layout.shape.slot(index);
        let size = self.cell_px;
        let bg = self.layout.background;
        let pixels = self.cells[index].get_or_insert_with(|| blank_cell(bg, size));
        Ok(CellCanvas {
            slot,
            size,
            pixels: pixels.as_mut_slice(),
        })
    }

    fn background_color(&self) -> Rgb<u8> {
        self.layout.background
    }

    fn discard_cells(&mut self, from: usize) {
        let from = from.min(self.cells.len());
        for cell in &mut self.cells[from..] {
            *cell = None;
        }
        self.live = from;
    }

    /// Composites the live cells row-major into one image.
    ///
    /// A partial last row keeps the full column count only when the page spans
    /// more than one row; a single partial row is as wide as its cells. Cell
    /// buffers are consumed.
    fn rasterize(&mut self) -> Result<RgbaImage> {
        if self.live == 0 {
            return Err(MontageError::EmptyPage);
        }
        let cols = self.layout.shape.cols;
        let true_cols = cols.min(self.live) as u32;
        let true_rows = self.live.div_ceil(cols) as u32;
        let (cw, ch) = self.cell_px;
        let bg = self.layout.background;
        let transparent = self.layout.transparent;

        let fill = if transparent {
            Rgba([bg[0], bg[1], bg[2], 0])
        } else {
            Rgba([bg[0], bg[1], bg[2], 255])
        };
        let mut canvas = RgbaImage::from_pixel(true_cols * cw, true_rows * ch, fill);

        for index in 0..self.live {
            let Some(rgb) = self.cells[index].take() else {
                continue;
            };
            let slot = self.layout.shape.slot(index);
            let tile = cell_to_rgba(&rgb, self.cell_px, bg, transparent)?;
            imageops::replace(
                &mut canvas,
                &tile,
                slot.col as i64 * cw as i64,
                slot.row as i64 * ch as i64,
            );
        }

        Ok(canvas)
    }

    fn reset(&mut self) {
        for cell in &mut self.cells {
            *cell = None;
        }
        self.live = self.cells.len();
    }

    fn release(self) {
        tracing::trace!(cells = self.cells.len(), "releasing bitmap surface");
    }
}

fn cell_to_rgba(
    rgb: &[u8],
    size: (u32, u32),
    bg: Rgb<u8>,
    transparent: bool,
) -> Result<RgbaImage> {
    let (w, h) = size;
    let pixel_count = w as usize * h as usize;
    if rgb.len() != pixel_count * 3 {
        return Err(MontageError::Render(format!(
            "cell buffer holds {} bytes, expected {} for {w}x{h}",
            rgb.len(),
            pixel_count * 3
        )));
    }

    let mut rgba = vec![255u8; pixel_count * 4];
    for i in 0..pixel_count {
        rgba[i * 4..i * 4 + 3].copy_from_slice(&rgb[i * 3..i * 3 + 3]);
    }
    let mut tile = RgbaImage::from_raw(w, h, rgba)
        .ok_or_else(|| MontageError::Render(format!("failed to build {w}x{h} cell image")))?;

    if transparent {
        key_out_border_background(&mut tile, bg);
    }
    Ok(tile)
}

/// Sets alpha to 0 on background-colored regions that touch the cell border.
///
/// Background-colored strokes enclosed by drawn content stay opaque.
fn key_out_border_background(tile: &mut RgbaImage, bg: Rgb<u8>) {
    let (w, h) = tile.dimensions();
    let key = Rgba([bg[0], bg[1], bg[2], 255]);
    let mask = GrayImage::from_fn(w, h, |x, y| {
        Luma([if *tile.get_pixel(x, y) == key { 255 } else { 0 }])
    });
    let labels = connected_components(&mask, Connectivity::Four, Luma([0u8]));

    let mut open = HashSet::new();
    for x in 0..w {
        open.insert(labels.get_pixel(x, 0)[0]);
        open.insert(labels.get_pixel(x, h - 1)[0]);
    }
    for y in 0..h {
        open.insert(labels.get_pixel(0, y)[0]);
        open.insert(labels.get_pixel(w - 1, y)[0]);
    }
    open.remove(&0);

    for (pixel, label) in tile.pixels_mut().zip(labels.pixels()) {
        if open.contains(&label[0]) {
            pixel[3] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridShape;

    fn layout(rows: usize, cols: usize, transparent: bool) -> SurfaceLayout {
        SurfaceLayout {
            shape: GridShape { rows, cols },
            cell_size: (0.2, 0.1),
            dpi: 100,
            background: Rgb([255, 255, 255]),
            transparent,
        }
    }

    fn fill_cell(surface: &mut BitmapSurface, index: usize, color: RGBColor) {
        let mut cell = surface.cell(index).expect("cell");
        let area = cell.drawing_area();
        area.fill(&color).expect("fill");
        area.present().expect("present");
    }

    #[test]
    fn cells_start_as_background() {
        let mut surface = BitmapSurface::create(&layout(2, 3, false)).expect("surface");
        let mut cell = surface.cell(4).expect("cell");
        assert_eq!(cell.size(), (20, 10));
        let slot = cell.slot();
        assert_eq!((slot.index, slot.row, slot.col), (4, 1, 1));
        assert!(cell.pixels_mut().iter().all(|&b| b == 255));
    }

    #[test]
    fn rasterize_places_cells_row_major_and_drops_unused_rows() {
        let mut surface = BitmapSurface::create(&layout(3, 3, false)).expect("surface");
        fill_cell(&mut surface, 0, RED);
        fill_cell(&mut surface, 4, BLUE);
        surface.discard_cells(5);

        let bitmap = surface.rasterize().expect("raster");
        assert_eq!(bitmap.dimensions(), (60, 20));
        assert_eq!(*bitmap.get_pixel(5, 5), Rgba([255, 0, 0, 255]));
        assert_eq!(*bitmap.get_pixel(25, 15), Rgba([0, 0, 255, 255]));
        assert_eq!(*bitmap.get_pixel(45, 15), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn single_partial_row_is_only_as_wide_as_its_cells() {
        let mut surface = BitmapSurface::create(&layout(2, 5, false)).expect("surface");
        fill_cell(&mut surface, 0, RED);
        fill_cell(&mut surface, 1, GREEN);
        surface.discard_cells(2);
        assert_eq!(surface.rasterize().expect("raster").dimensions(), (40, 10));
    }

    #[test]
    fn transparent_surface_keys_out_background() {
        let mut surface = BitmapSurface::create(&layout(1, 2, true)).expect("surface");
        {
            let mut cell = surface.cell(0).expect("cell");
            let area = cell.drawing_area();
            area.draw(&Rectangle::new([(2, 2), (5, 5)], BLACK.filled()))
                .expect("draw");
            area.present().expect("present");
        }
        surface.discard_cells(2);
        let bitmap = surface.rasterize().expect("raster");
        assert_eq!(bitmap.get_pixel(0, 0)[3], 0);
        assert_eq!(*bitmap.get_pixel(3, 3), Rgba([0, 0, 0, 255]));
        assert_eq!(bitmap.get_pixel(30, 5)[3], 0);
    }

    #[test]
    fn transparent_surface_keeps_enclosed_background_strokes() {
        let mut surface = BitmapSurface::create(&layout(1, 1, true)).expect("surface");
        {
            let mut cell = surface.cell(0).expect("cell");
            let (w, _) = cell.size();
            let pixels = cell.pixels_mut();
            let mut set = |x: u32, y: u32, color: [u8; 3]| {
                let i = ((y * w + x) * 3) as usize;
                pixels[i..i + 3].copy_from_slice(&color);
            };
            for y in 2..8 {
                for x in 2..18 {
                    set(x, y, [0, 0, 0]);
                }
            }
            // Enclosed white line.
            for x in 4..8 {
                set(x, 6, [255, 255, 255]);
            }
            // White notch open to the top margin.
            for y in 2..5 {
                set(14, y, [255, 255, 255]);
            }
        }
        let bitmap = surface.rasterize().expect("raster");
        assert_eq!(bitmap.get_pixel(0, 0)[3], 0);
        assert_eq!(*bitmap.get_pixel(3, 3), Rgba([0, 0, 0, 255]));
        assert_eq!(*bitmap.get_pixel(5, 6), Rgba([255, 255, 255, 255]));
        assert_eq!(bitmap.get_pixel(14, 3)[3], 0);
    }

    #[test]
    fn discarded_cells_are_not_handed_out() {
        let mut surface = BitmapSurface::create(&layout(2, 2, false)).expect("surface");
        surface.discard_cells(1);
        assert!(matches!(surface.cell(1), Err(MontageError::Exhausted { capacity: 1 })));
        surface.reset();
        assert!(surface.cell(3).is_ok());
    }

    #[test]
    fn empty_surface_refuses_to_rasterize() {
        let mut surface = BitmapSurface::create(&layout(1, 1, false)).expect("surface");
        surface.discard_cells(0);
        assert!(matches!(surface.rasterize(), Err(MontageError::EmptyPage)));
    }
}
