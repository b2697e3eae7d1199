//! Splits an event's log entries into model-sized batches.
//!
//! Batching is a partition: concatenating the batches in order yields the
//! input exactly, and every batch but the last holds exactly `batch_size` items.

use crate::config::{ConfigError, DEFAULT_BATCH_SIZE};

/// A contiguous slice of the input together with its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a, T> {
    /// Zero-based batch number.
    pub index: usize,
    /// Offset of the first item in the full input.
    pub offset: usize,
    pub items: &'a [T],
}

impl<T> Batch<'_, T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batcher {
    batch_size: usize,
}

impl Default for Batcher {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Batcher {
    pub fn new(batch_size: usize) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(batch_size.to_string()));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches `split` produces for `len` items: `ceil(len / batch_size)`.
    pub fn batch_count(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size)
    }

    pub fn split<'a, T>(&self, items: &'a [T]) -> Vec<Batch<'a, T>> {
        items
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, chunk)| Batch {
                index,
                offset: index * self.batch_size,
                items: chunk,
            })
            .collect()
    }
}

impl TryFrom<i64> for Batcher {
    type Error = ConfigError;

    fn try_from(batch_size: i64) -> Result<Self, Self::Error> {
        let size = usize::try_from(batch_size)
            .map_err(|_| ConfigError::InvalidBatchSize(batch_size.to_string()))?;
        Self::new(size)
    }
}
