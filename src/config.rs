//! Configuration for a montage run.

use std::path::PathBuf;

use image::{ImageFormat, Rgb};
use serde::{Deserialize, Serialize};

use crate::error::{MontageError, Result};

const PAGE_SIZE: usize = 100;
const CELL_SIZE_INCHES: (f64, f64) = (6.4, 4.8);
const DPI: u32 = 100;
const PREFIX: &str = "montage";
const BACKGROUND: [u8; 3] = [255, 255, 255];

/// Encoding used for montage and individual images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
    Tiff,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Tiff => "tiff",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Bmp => ImageFormat::Bmp,
            OutputFormat::Tiff => ImageFormat::Tiff,
        }
    }

    /// Whether the encoder can store an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }
}

/// What the pager does with a page's surface once the page is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceLifecycle {
    /// Release the surface and create a brand-new one for the next page.
    #[default]
    Recreate,
    /// Keep the surface and clear it in place.
    Reset,
}

/// Options recognized by [`crate::pager::Pager`].
///
/// Every field has a default, so a JSON config only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MontageConfig {
    /// Number of plots per montage page.
    pub page_size: usize,
    /// Explicit column count. `None` derives it from `page_size`.
    pub cols: Option<usize>,
    /// Size of one cell in inches, `(width, height)`.
    pub cell_size: (f64, f64),
    pub dpi: u32,
    /// Root output directory; `montages/`, `individuals/` and `mappings.csv` live here.
    pub path: PathBuf,
    pub prefix: String,
    pub format: OutputFormat,
    /// Key the background out to alpha and tighten crops by alpha instead of color difference.
    pub transparent: bool,
    pub background: [u8; 3],
    pub lifecycle: SurfaceLifecycle,
}

impl Default for MontageConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            cols: None,
            cell_size: CELL_SIZE_INCHES,
            dpi: DPI,
            path: PathBuf::from("."),
            prefix: PREFIX.to_string(),
            format: OutputFormat::default(),
            transparent: false,
            background: BACKGROUND,
            lifecycle: SurfaceLifecycle::default(),
        }
    }
}

impl MontageConfig {
    /// Rejects values that cannot produce a grid or a non-empty cell.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(MontageError::config("page_size must be greater than zero"));
        }
        if self.cols == Some(0) {
            return Err(MontageError::config("cols must be greater than zero"));
        }
        if self.dpi == 0 {
            return Err(MontageError::config("dpi must be greater than zero"));
        }
        let (w, h) = self.cell_size;
        if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
            return Err(MontageError::config(format!(
                "cell_size must be positive, got {w}x{h}"
            )));
        }
        let (pw, ph) = self.cell_pixels();
        if pw == 0 || ph == 0 {
            return Err(MontageError::config(format!(
                "cell_size {w}x{h} at {} dpi rounds to zero pixels",
                self.dpi
            )));
        }
        if self.prefix.is_empty() {
            return Err(MontageError::config("prefix must not be empty"));
        }
        Ok(())
    }

    /// Cell size in pixels, `(width, height)`.
    pub fn cell_pixels(&self) -> (u32, u32) {
        inches_to_pixels(self.cell_size, self.dpi)
    }

    pub fn background_rgb(&self) -> Rgb<u8> {
        Rgb(self.background)
    }
}

/// Rounds a size in inches to whole pixels at `dpi`.
pub fn inches_to_pixels((w, h): (f64, f64), dpi: u32) -> (u32, u32) {
    let dpi = dpi as f64;
    ((w * dpi).round() as u32, (h * dpi).round() as u32)
}
