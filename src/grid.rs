use std::ops::Range;

use crate::error::{MontageError, Result};

const MIN_AUTO_COLS: usize = 5;
const MAX_AUTO_COLS: usize = 20;

/// Rows and columns of a page grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }

    /// Row-major position of a flat index.
    pub fn slot(&self, index: usize) -> Slot {
        Slot {
            index,
            row: index / self.cols,
            col: index % self.cols,
        }
    }
}

/// One issued cell position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub index: usize,
    pub row: usize,
    pub col: usize,
}

/// Column count used when none is given: `round(sqrt(capacity))` clipped to `5..=20`.
pub fn auto_cols(capacity: usize) -> usize {
    ((capacity as f64).sqrt().round() as usize).clamp(MIN_AUTO_COLS, MAX_AUTO_COLS)
}

/// Hands out the slots of one page in row-major order.
#[derive(Debug, Clone)]
pub struct GridAllocator {
    shape: GridShape,
    capacity: usize,
    next_free: usize,
    trimmed: bool,
}

impl GridAllocator {
    pub fn new(capacity: usize, cols: Option<usize>) -> Result<Self> {
        if capacity == 0 {
            return Err(MontageError::config("grid capacity must be greater than zero"));
        }
        let cols = match cols {
            Some(0) => return Err(MontageError::config("grid cols must be greater than zero")),
            Some(c) => c,
            None => auto_cols(capacity),
        };
        let rows = capacity.div_ceil(cols);
        Ok(Self {
            shape: GridShape { rows, cols },
            capacity,
            next_free: 0,
            trimmed: false,
        })
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows
    }

    pub fn cols(&self) -> usize {
        self.shape.cols
    }

    /// Number of slots that may be issued. `rows * cols` can exceed this by less than one row.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn next_free_index(&self) -> usize {
        self.next_free
    }

    pub fn is_full(&self) -> bool {
        self.next_free == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.next_free == 0
    }

    pub fn is_trimmed(&self) -> bool {
        self.trimmed
    }

    pub fn slot(&self, index: usize) -> Slot {
        self.shape.slot(index)
    }

    pub fn next_slot(&mut self) -> Result<Slot> {
        let slot = self.peek_slot()?;
        self.next_free += 1;
        Ok(slot)
    }

    /// The slot [`next_slot`](Self::next_slot) would issue, without issuing it.
    pub fn peek_slot(&self) -> Result<Slot> {
        if self.trimmed || self.is_full() {
            return Err(MontageError::Exhausted {
                capacity: self.capacity,
            });
        }
        Ok(self.shape.slot(self.next_free))
    }

    /// Marks every slot from the next free one onward as unused and returns that range.
    ///
    /// After trimming, no more slots are issued.
    pub fn trim(&mut self) -> Range<usize> {
        self.trimmed = true;
        self.next_free..self.shape.cells()
    }

    /// Rows that hold at least one issued slot.
    pub fn occupied_rows(&self) -> usize {
        self.next_free.div_ceil(self.shape.cols)
    }
}
