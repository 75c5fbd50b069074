//! Groups plots into montage pages, flushing a page to disk whenever it overflows.
//!
//! Output layout under the configured path:
//!
//! ```text
//! montages/{prefix}-{page:04}.{ext}
//! individuals/{page:04}-{slot:02}.{ext}
//! mappings.csv
//! ```

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbaImage};

use crate::config::{MontageConfig, OutputFormat, SurfaceLifecycle};
use crate::decompose::{Background, Decomposer, save_image};
use crate::error::{MontageError, Result};
use crate::grid::{GridAllocator, GridShape};
use crate::manifest::{MANIFEST_FILENAME, ManifestWriter};
use crate::surface::{BitmapSurface, CellCanvas, RenderSurface, SurfaceLayout};

pub const MONTAGE_DIR: &str = "montages";
pub const INDIVIDUAL_DIR: &str = "individuals";

pub fn montage_filename(prefix: &str, page_index: usize, ext: &str) -> String {
    format!("{prefix}-{page_index:04}.{ext}")
}

/// One grid, its surface, and the identifiers issued so far (index == slot).
struct Page<S> {
    grid: GridAllocator,
    surface: S,
    items: Vec<String>,
}

impl<S: RenderSurface> Page<S> {
    fn open(config: &MontageConfig) -> Result<Self> {
        let grid = GridAllocator::new(config.page_size, config.cols)?;
        let layout = SurfaceLayout::from_config(config, grid.shape());
        layout.warn_if_oversized();
        let surface = S::create(&layout)?;
        Ok(Self {
            grid,
            surface,
            items: Vec::new(),
        })
    }

    fn reset(&mut self, config: &MontageConfig) -> Result<()> {
        self.grid = GridAllocator::new(config.page_size, config.cols)?;
        self.surface.reset();
        self.items.clear();
        Ok(())
    }

    /// Hands out the next free cell. The grid only advances once the surface has
    /// produced the cell, so a failed request leaves the page as it was.
    fn issue(&mut self, identifier: Option<String>) -> Result<S::Cell<'_>> {
        let Self {
            grid,
            surface,
            items,
        } = self;
        let slot = grid.peek_slot()?;
        let cell = surface.cell(slot.index)?;
        grid.next_slot()?;
        items.extend(identifier);
        Ok(cell)
    }

    /// Trims the unused tail and rasterizes. The background is read first since
    /// rasterizing may consume surface state.
    fn rasterize(&mut self) -> Result<(Rgb<u8>, RgbaImage)> {
        let background = self.surface.background_color();
        let unused = self.grid.trim();
        self.surface.discard_cells(unused.start);
        let bitmap = self.surface.rasterize()?;
        Ok((background, bitmap))
    }
}

/// Renders plots into one or more montages of at most `page_size` cells each.
///
/// Requesting a slot on a full page saves that page (montage, individual crops and
/// manifest rows) and starts a blank one. Callers must [`close`](Pager::close) the
/// pager to save the last, possibly partial, page.
pub struct Pager<S: RenderSurface = BitmapSurface> {
    config: MontageConfig,
    montage_dir: PathBuf,
    individual_dir: PathBuf,
    page: Option<Page<S>>,
    page_index: usize,
    manifest: ManifestWriter,
}

impl<S: RenderSurface> Pager<S> {
    /// Validates `config`, creates the output directories and manifest, and opens the first page.
    pub fn new(config: MontageConfig) -> Result<Self> {
        config.validate()?;
        let montage_dir = config.path.join(MONTAGE_DIR);
        let individual_dir = config.path.join(INDIVIDUAL_DIR);
        fs::create_dir_all(&montage_dir)?;
        fs::create_dir_all(&individual_dir)?;
        let manifest = ManifestWriter::create(config.path.join(MANIFEST_FILENAME))?;
        let page = Page::open(&config)?;
        Ok(Self {
            config,
            montage_dir,
            individual_dir,
            page: Some(page),
            page_index: 0,
            manifest,
        })
    }

    pub fn config(&self) -> &MontageConfig {
        &self.config
    }

    /// Zero-based sequence number of the current montage.
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// File name the current montage will be saved under.
    pub fn current_filename(&self) -> String {
        montage_filename(&self.config.prefix, self.page_index, self.config.format.extension())
    }

    /// Slots issued on the current page.
    pub fn slots_used(&self) -> usize {
        self.page.as_ref().map_or(0, |p| p.grid.next_free_index())
    }

    pub fn shape(&self) -> Option<GridShape> {
        self.page.as_ref().map(|p| p.grid.shape())
    }

    pub fn is_closed(&self) -> bool {
        self.page.is_none()
    }

    pub fn montage_dir(&self) -> &Path {
        &self.montage_dir
    }

    pub fn individual_dir(&self) -> &Path {
        &self.individual_dir
    }

    pub fn manifest_path(&self) -> &Path {
        self.manifest.path()
    }

    /// Returns the next cell and associates it with `identifier`.
    ///
    /// A full page is flushed and replaced before the slot is issued.
    pub fn request_slot(&mut self, identifier: impl Display) -> Result<S::Cell<'_>> {
        let full = self.page.as_ref().ok_or(MontageError::ClosedPager)?.grid.is_full();
        if full {
            self.flush()?;
        }
        let page = self.page.as_mut().ok_or(MontageError::ClosedPager)?;
        page.issue(Some(identifier.to_string()))
    }

    /// Saves the current page and starts a new one. Does nothing if no slot has been issued.
    pub fn flush(&mut self) -> Result<()> {
        let page = self.page.as_ref().ok_or(MontageError::ClosedPager)?;
        if page.grid.is_empty() {
            tracing::debug!(page = self.page_index, "flush skipped, page is empty");
            return Ok(());
        }
        self.write_current()?;
        self.rotate()
    }

    /// Saves the last page if it holds anything, releases its surface, and refuses further slots.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(page) = self.page.as_ref() else {
            return Ok(());
        };
        if !page.grid.is_empty() {
            self.write_current()?;
            self.page_index += 1;
        }
        if let Some(page) = self.page.take() {
            page.surface.release();
        }
        tracing::debug!(
            pages = self.page_index,
            rows = self.manifest.rows(),
            "pager closed"
        );
        Ok(())
    }

    fn write_current(&mut self) -> Result<()> {
        let Self {
            config,
            montage_dir,
            individual_dir,
            page,
            page_index,
            manifest,
        } = self;
        let page = page.as_mut().ok_or(MontageError::ClosedPager)?;
        let occupied = page.grid.next_free_index();
        let cols = page.grid.cols();

        let (background, bitmap) = page.rasterize()?;
        let montage = montage_filename(&config.prefix, *page_index, config.format.extension());
        save_image(&bitmap, &montage_dir.join(&montage), config.format)?;

        let background = if config.transparent {
            Background::Transparent
        } else {
            Background::Solid(background)
        };
        let crops = Decomposer::new(cols, background).decompose_to(
            &bitmap,
            occupied,
            individual_dir.as_path(),
            *page_index,
            config.format,
        )?;
        manifest.write_page(&montage, &page.items, &crops)?;

        tracing::debug!(
            page = *page_index,
            slots = occupied,
            width = bitmap.width(),
            height = bitmap.height(),
            %montage,
            "montage page saved"
        );
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.page_index += 1;
        match self.config.lifecycle {
            SurfaceLifecycle::Recreate => {
                let next = Page::open(&self.config)?;
                if let Some(old) = self.page.replace(next) {
                    old.surface.release();
                }
            }
            SurfaceLifecycle::Reset => {
                let page = self.page.as_mut().ok_or(MontageError::ClosedPager)?;
                page.reset(&self.config)?;
            }
        }
        Ok(())
    }
}

impl Pager<BitmapSurface> {
    /// Requests a slot for `identifier` and draws into it with `draw`.
    pub fn add<R>(
        &mut self,
        identifier: impl Display,
        draw: impl FnOnce(&mut CellCanvas<'_>) -> R,
    ) -> Result<R> {
        let mut cell = self.request_slot(identifier)?;
        Ok(draw(&mut cell))
    }
}

impl<S: RenderSurface> Drop for Pager<S> {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        if !page.grid.is_empty() {
            tracing::warn!(
                page = self.page_index,
                pending = page.grid.next_free_index(),
                "pager dropped without close, pending slots were not saved"
            );
        }
        page.surface.release();
    }
}

/// A single montage without paging: fill cells one after another, then save once.
pub struct MontageSheet<S: RenderSurface = BitmapSurface> {
    page: Option<Page<S>>,
    format: OutputFormat,
}

impl<S: RenderSurface> MontageSheet<S> {
    /// Opens a sheet of `config.page_size` cells using the config's geometry and colors.
    pub fn new(config: &MontageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            page: Some(Page::open(config)?),
            format: config.format,
        })
    }

    pub fn shape(&self) -> Option<GridShape> {
        self.page.as_ref().map(|p| p.grid.shape())
    }

    pub fn slots_used(&self) -> usize {
        self.page.as_ref().map_or(0, |p| p.grid.next_free_index())
    }

    /// Next free cell. Fails with [`MontageError::Exhausted`] once every slot is used.
    pub fn pop(&mut self) -> Result<S::Cell<'_>> {
        let page = self.page.as_mut().ok_or(MontageError::ClosedPager)?;
        page.issue(None)
    }

    /// Trims unused cells, writes the montage to `path`, and releases the surface.
    pub fn save(mut self, path: impl AsRef<Path>) -> Result<RgbaImage> {
        let mut page = self.page.take().ok_or(MontageError::ClosedPager)?;
        let result = page.rasterize();
        page.surface.release();
        let (_, bitmap) = result?;
        save_image(&bitmap, path.as_ref(), self.format)?;
        Ok(bitmap)
    }
}

impl MontageSheet<BitmapSurface> {
    pub fn add<R>(&mut self, draw: impl FnOnce(&mut CellCanvas<'_>) -> R) -> Result<R> {
        let mut cell = self.pop()?;
        Ok(draw(&mut cell))
    }
}

impl<S: RenderSurface> Drop for MontageSheet<S> {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            page.surface.release();
        }
    }
}
