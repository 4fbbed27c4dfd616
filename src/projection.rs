//! Maps newest-first display positions onto oldest-first storage order.

use thiserror::Error;

use crate::history::ChatEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("display index {index} is out of range for {len} history entries")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection<'a> {
    pub storage_index: usize,
    pub entry: &'a ChatEntry,
}

/// Display index 0 is the most recent entry.
pub fn storage_index(len: usize, display_index: usize) -> Option<usize> {
    len.checked_sub(1)?.checked_sub(display_index)
}

pub fn display_index(len: usize, storage_index: usize) -> Option<usize> {
    if storage_index < len {
        Some(len - 1 - storage_index)
    } else {
        None
    }
}

pub fn project(history: &[ChatEntry], display_index: usize) -> Result<Projection<'_>, SelectionError> {
    let out_of_range = SelectionError::OutOfRange {
        index: display_index,
        len: history.len(),
    };
    let storage_index = storage_index(history.len(), display_index).ok_or(out_of_range)?;
    let entry = history.get(storage_index).ok_or(out_of_range)?;
    Ok(Projection { storage_index, entry })
}

/// Entries newest first, paired with their display index.
pub fn display_order(history: &[ChatEntry]) -> impl Iterator<Item = (usize, &ChatEntry)> + '_ {
    history.iter().rev().enumerate()
}
