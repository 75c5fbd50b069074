use std::io;

/// Errors raised while allocating, rendering, or slicing montage pages.
#[derive(Debug, thiserror::Error)]
pub enum MontageError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("no free slot left in grid of capacity {capacity}")]
    Exhausted { capacity: usize },

    #[error("pager is closed")]
    ClosedPager,

    #[error("page has no occupied slots")]
    EmptyPage,

    #[error("render failed: {0}")]
    Render(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("manifest error: {0}")]
    Csv(#[from] csv::Error),
}

impl MontageError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        MontageError::Configuration(msg.into())
    }
}

pub type Result<T, E = MontageError> = std::result::Result<T, E>;
