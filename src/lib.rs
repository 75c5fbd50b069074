//! Compose many plots into paginated grid montages, then slice every montage back
//! into individually cropped images with a CSV manifest.
//!
//! ```no_run
//! use plot_montage::{MontageConfig, Pager};
//! use plotters::prelude::*;
//!
//! let mut pager: Pager = Pager::new(MontageConfig::default())?;
//! for i in 0..128 {
//!     let mut cell = pager.request_slot(format!("chart-{i:04}"))?;
//!     let area = cell.drawing_area();
//!     area.fill(&WHITE).map_err(|e| plot_montage::MontageError::Render(e.to_string()))?;
//!     // draw the chart into `area` ...
//! }
//! pager.close()?;
//! # Ok::<(), plot_montage::MontageError>(())
//! ```

pub mod config;
pub mod decompose;
pub mod error;
pub mod grid;
pub mod manifest;
pub mod pager;
pub mod surface;

pub use config::{MontageConfig, OutputFormat, SurfaceLifecycle};
pub use decompose::{Background, BoundingBox, Crop, CropRecord, Decomposer};
pub use error::MontageError;
pub use grid::{GridAllocator, GridShape, Slot};
pub use manifest::ManifestWriter;
pub use pager::{MontageSheet, Pager};
pub use surface::{BitmapSurface, CellCanvas, RenderSurface, SurfaceLayout};
