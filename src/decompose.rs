//! Slices a rasterized montage back into one image per slot.
//!
//! Each slot gets a fixed box from the grid geometry, which is then tightened
//! to the pixels that differ from the background and padded slightly.

use std::path::Path;

use image::{DynamicImage, Rgb, RgbaImage, imageops};
use imageproc::map::map_colors2;
use rayon::prelude::*;

use crate::config::OutputFormat;
use crate::error::{MontageError, Result};

/// Pixels added around the tight content box.
pub const CROP_PAD: u32 = 4;

/// Pixel rectangle with exclusive `right`/`bottom` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    pub const fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    fn translate(self, dx: u32, dy: u32) -> BoundingBox {
        BoundingBox {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }
}

/// How foreground is told apart from background when tightening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    /// Pixels whose RGB differs from this color are content.
    Solid(Rgb<u8>),
    /// Pixels with non-zero alpha are content.
    Transparent,
}

/// One decomposed slot. Boxes are in montage coordinates.
#[derive(Debug, Clone)]
pub struct Crop {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub fixed: BoundingBox,
    pub tight: BoundingBox,
    /// False when no content was found and the fixed box was kept.
    pub tightened: bool,
    pub image: RgbaImage,
}

/// A crop that has been written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropRecord {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub fixed: BoundingBox,
    pub tight: BoundingBox,
    pub filename: String,
}

pub fn individual_filename(page_index: usize, slot: usize, ext: &str) -> String {
    format!("{page_index:04}-{slot:02}.{ext}")
}

/// Cell size `(width, height)` of a montage holding `occupied` slots in `cols` columns.
///
/// Integer division: the last row or column may lose a few pixels.
pub fn cell_size(bitmap: (u32, u32), occupied: usize, cols: usize) -> Result<(u32, u32)> {
    if occupied == 0 || cols == 0 {
        return Err(MontageError::EmptyPage);
    }
    let true_rows = occupied.div_ceil(cols) as u32;
    let true_cols = cols.min(occupied) as u32;
    let (w, h) = bitmap;
    let cell = (w / true_cols, h / true_rows);
    if cell.0 == 0 || cell.1 == 0 {
        return Err(MontageError::Render(format!(
            "{w}x{h} montage is too small for {true_rows}x{true_cols} cells"
        )));
    }
    Ok(cell)
}

/// Fixed box of slot `index`. Row and column come from the full `cols`, even when
/// the montage holds fewer columns.
pub fn fixed_box(index: usize, cols: usize, cell: (u32, u32)) -> BoundingBox {
    let (cell_w, cell_h) = cell;
    let row = (index / cols) as u32;
    let col = (index % cols) as u32;
    let left = col * cell_w;
    let top = row * cell_h;
    BoundingBox {
        left,
        top,
        right: left + cell_w,
        bottom: top + cell_h,
    }
}

/// Minimal box around the non-background pixels of `crop`, in crop coordinates.
pub fn content_box(crop: &RgbaImage, background: Background) -> Option<BoundingBox> {
    match background {
        Background::Transparent => bbox_where(crop, |p| p[3] != 0),
        Background::Solid(bg) => {
            let reference = image::RgbImage::from_pixel(crop.width(), crop.height(), bg);
            let diff = map_colors2(crop, &reference, |p, q| {
                Rgb([
                    p[0].abs_diff(q[0]),
                    p[1].abs_diff(q[1]),
                    p[2].abs_diff(q[2]),
                ])
            });
            bbox_where(&diff, |p| p.0 != [0, 0, 0])
        }
    }
}

fn bbox_where<P, F>(
    image: &image::ImageBuffer<P, Vec<P::Subpixel>>,
    is_content: F,
) -> Option<BoundingBox>
where
    P: image::Pixel,
    F: Fn(&P) -> bool,
{
    let mut found: Option<BoundingBox> = None;
    for (x, y, px) in image.enumerate_pixels() {
        if !is_content(px) {
            continue;
        }
        let b = found.get_or_insert(BoundingBox {
            left: x,
            top: y,
            right: x + 1,
            bottom: y + 1,
        });
        b.left = b.left.min(x);
        b.top = b.top.min(y);
        b.right = b.right.max(x + 1);
        b.bottom = b.bottom.max(y + 1);
    }
    found
}

/// Pads a content box inside a crop of `size`.
///
/// Leading edges follow `min(edge - pad, 0)` before being clamped into the crop,
/// so they always land on the crop origin. Trailing edges grow by `pad` up to
/// the crop size. Nothing outside the crop is ever revealed.
pub fn pad_box(content: BoundingBox, pad: u32, size: (u32, u32)) -> BoundingBox {
    let leading = |edge: u32| (edge as i64 - pad as i64).min(0).max(0) as u32;
    BoundingBox {
        left: leading(content.left),
        top: leading(content.top),
        right: content.right.saturating_add(pad).min(size.0),
        bottom: content.bottom.saturating_add(pad).min(size.1),
    }
}

/// Cuts montages into per-slot crops.
#[derive(Debug, Clone, Copy)]
pub struct Decomposer {
    cols: usize,
    background: Background,
    pad: u32,
}

impl Decomposer {
    pub fn new(cols: usize, background: Background) -> Self {
        Self {
            cols,
            background,
            pad: CROP_PAD,
        }
    }

    pub fn background(&self) -> Background {
        self.background
    }

    /// Computes every crop of `bitmap` in slot order.
    pub fn decompose(&self, bitmap: &RgbaImage, occupied: usize) -> Result<Vec<Crop>> {
        let cell = cell_size(bitmap.dimensions(), occupied, self.cols)?;
        Ok((0..occupied)
            .into_par_iter()
            .map(|index| self.crop(bitmap, index, cell))
            .collect())
    }

    /// Computes and writes every crop of page `page_index` into `dir`.
    pub fn decompose_to(
        &self,
        bitmap: &RgbaImage,
        occupied: usize,
        dir: &Path,
        page_index: usize,
        format: OutputFormat,
    ) -> Result<Vec<CropRecord>> {
        let cell = cell_size(bitmap.dimensions(), occupied, self.cols)?;
        (0..occupied)
            .into_par_iter()
            .map(|index| -> Result<CropRecord> {
                let crop = self.crop(bitmap, index, cell);
                let filename = individual_filename(page_index, index, format.extension());
                save_image(&crop.image, &dir.join(&filename), format)?;
                Ok(CropRecord {
                    index: crop.index,
                    row: crop.row,
                    col: crop.col,
                    fixed: crop.fixed,
                    tight: crop.tight,
                    filename,
                })
            })
            .collect()
    }

    fn crop(&self, bitmap: &RgbaImage, index: usize, cell: (u32, u32)) -> Crop {
        let fixed = fixed_box(index, self.cols, cell);
        let fixed_image =
            imageops::crop_imm(bitmap, fixed.left, fixed.top, fixed.width(), fixed.height())
                .to_image();
        let size = fixed_image.dimensions();

        let (local, tightened) = match content_box(&fixed_image, self.background) {
            Some(content) => (pad_box(content, self.pad, size), true),
            None => {
                tracing::warn!(slot = index, "crop has no foreground pixels, keeping fixed box");
                (
                    BoundingBox {
                        left: 0,
                        top: 0,
                        right: size.0,
                        bottom: size.1,
                    },
                    false,
                )
            }
        };

        let image = if tightened {
            imageops::crop_imm(&fixed_image, local.left, local.top, local.width(), local.height())
                .to_image()
        } else {
            fixed_image
        };

        Crop {
            index,
            row: index / self.cols,
            col: index % self.cols,
            fixed,
            tight: local.translate(fixed.left, fixed.top),
            tightened,
            image,
        }
    }
}

/// Writes `image` in `format`, dropping alpha for encoders that cannot store it.
pub fn save_image(image: &RgbaImage, path: &Path, format: OutputFormat) -> Result<()> {
    if format.supports_alpha() {
        image.save_with_format(path, format.image_format())?;
    } else {
        DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .save_with_format(path, format.image_format())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const INK: Rgba<u8> = Rgba([20, 40, 200, 255]);

    fn white(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, WHITE)
    }

    #[test]
    fn cell_size_uses_true_rows_and_cols() {
        assert_eq!(cell_size((100, 60), 7, 5).expect("cell"), (20, 30));
        // Single partial row: width is split across occupied columns only.
        assert_eq!(cell_size((60, 30), 3, 5).expect("cell"), (20, 30));
        // Integer division drops the remainder.
        assert_eq!(cell_size((103, 61), 10, 5).expect("cell"), (20, 30));
        assert!(matches!(cell_size((10, 10), 0, 5), Err(MontageError::EmptyPage)));
    }

    #[test]
    fn fixed_boxes_tile_without_overlap() {
        let (w, h, cols, occupied) = (250u32, 180u32, 5usize, 13usize);
        let cell = cell_size((w, h), occupied, cols).expect("cell");
        let bounds = BoundingBox::new(0, 0, w, h);
        let boxes: Vec<BoundingBox> = (0..occupied).map(|i| fixed_box(i, cols, cell)).collect();
        for (i, a) in boxes.iter().enumerate() {
            assert!(bounds.contains(a), "box {i} {a:?} leaves the montage");
            for b in &boxes[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn fixed_box_row_col_follow_full_cols_on_partial_row() {
        // Three occupied slots with cols = 5: one row, three cells wide.
        let cell = cell_size((90, 40), 3, 5).expect("cell");
        assert_eq!(cell, (30, 40));
        assert_eq!(fixed_box(2, 5, cell), BoundingBox::new(60, 0, 90, 40));
    }

    #[test]
    fn content_box_diffs_against_solid_background() {
        let mut crop = white(40, 30);
        draw_filled_rect_mut(&mut crop, Rect::at(10, 5).of_size(6, 4), INK);
        let found = content_box(&crop, Background::Solid(Rgb([255, 255, 255])));
        assert_eq!(found, Some(BoundingBox::new(10, 5, 16, 9)));
    }

    #[test]
    fn content_box_uses_alpha_when_transparent() {
        let mut crop = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 0]));
        crop.put_pixel(3, 17, Rgba([255, 255, 255, 128]));
        let found = content_box(&crop, Background::Transparent);
        assert_eq!(found, Some(BoundingBox::new(3, 17, 4, 18)));
    }

    // Documented quirk: leading edges always snap to the crop origin while
    // trailing edges get the pad, so only right/bottom margins are trimmed.
    #[test]
    fn padding_only_trims_trailing_margins() {
        let content = BoundingBox::new(10, 12, 20, 22);
        assert_eq!(pad_box(content, CROP_PAD, (40, 40)), BoundingBox::new(0, 0, 24, 26));
        let near_edge = BoundingBox::new(2, 1, 38, 39);
        assert_eq!(pad_box(near_edge, CROP_PAD, (40, 40)), BoundingBox::new(0, 0, 40, 40));
    }

    #[test]
    fn tight_box_stays_inside_padded_fixed_box() {
        let mut bitmap = white(200, 100);
        // Content in slots 0, 3 and 6 of a 5-column grid with 7 occupied slots.
        draw_filled_rect_mut(&mut bitmap, Rect::at(5, 5).of_size(10, 10), INK);
        draw_filled_rect_mut(&mut bitmap, Rect::at(130, 20).of_size(5, 5), INK);
        draw_filled_rect_mut(&mut bitmap, Rect::at(50, 60).of_size(20, 30), INK);

        let crops = Decomposer::new(5, Background::Solid(Rgb([255, 255, 255])))
            .decompose(&bitmap, 7)
            .expect("decompose");
        assert_eq!(crops.len(), 7);
        for crop in &crops {
            let padded = BoundingBox {
                left: crop.fixed.left.saturating_sub(CROP_PAD),
                top: crop.fixed.top.saturating_sub(CROP_PAD),
                right: crop.fixed.right + CROP_PAD,
                bottom: crop.fixed.bottom + CROP_PAD,
            };
            assert!(padded.contains(&crop.tight));
            assert!(crop.fixed.contains(&crop.tight));
            assert!(!crop.tight.is_empty());
            assert_eq!(crop.image.dimensions(), (crop.tight.width(), crop.tight.height()));
        }

        let first = &crops[0];
        assert!(first.tightened);
        assert_eq!(first.tight, BoundingBox::new(0, 0, 19, 19));

        let fourth = &crops[3];
        assert_eq!((fourth.row, fourth.col), (0, 3));
        assert_eq!(fourth.tight, BoundingBox::new(120, 0, 139, 29));

        let seventh = &crops[6];
        assert_eq!((seventh.row, seventh.col), (1, 1));
        assert_eq!(seventh.fixed, BoundingBox::new(40, 50, 80, 100));
        assert_eq!(seventh.tight, BoundingBox::new(40, 50, 74, 94));
    }

    #[test]
    fn blank_cell_falls_back_to_fixed_box() {
        let bitmap = white(100, 50);
        let crops = Decomposer::new(5, Background::Solid(Rgb([255, 255, 255])))
            .decompose(&bitmap, 2)
            .expect("decompose");
        for crop in crops {
            assert!(!crop.tightened);
            assert_eq!(crop.tight, crop.fixed);
            assert_eq!(crop.image.dimensions(), (50, 50));
        }
    }

    #[test]
    fn decompose_to_writes_one_file_per_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bitmap = white(60, 20);
        draw_filled_rect_mut(&mut bitmap, Rect::at(22, 2).of_size(4, 4), INK);
        let records = Decomposer::new(5, Background::Solid(Rgb([255, 255, 255])))
            .decompose_to(&bitmap, 3, dir.path(), 7, OutputFormat::Png)
            .expect("decompose");
        let names: Vec<&str> = records.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["0007-00.png", "0007-01.png", "0007-02.png"]);
        for name in names {
            assert!(dir.path().join(name).is_file());
        }
        let second = image::open(dir.path().join("0007-01.png")).expect("open").to_rgba8();
        assert_eq!(second.dimensions(), (10, 10));
    }
}
