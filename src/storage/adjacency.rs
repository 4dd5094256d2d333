//! Compressed-sparse-row adjacency lists.
//!
//! Every list lives in one shared `values` array. Two parallel tables, indexed
//! by [`ListId`], record where each list starts and how long it is. No
//! per-vertex container is allocated, and a list's region is never touched
//! again once written: storing a replacement means appending a new list.
//!
//! ```text
//! id:       0(none)  1        2
//! offsets:  [0,      0,       2 ]
//! lengths:  [0,      2,       1 ]
//! values:   [5, 6, 7]
//! ```

use crate::types::{ListId, Result, RoadError};

/// Longest list the byte-sized length field can describe.
pub const MAX_LIST_LEN: usize = u8::MAX as usize;

/// Append-only store of variable-length `u32` lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdjacencyLists {
    values: Vec<u32>,
    offsets: Vec<u32>,
    lengths: Vec<u8>,
}

impl Default for AdjacencyLists {
    fn default() -> Self {
        Self::new()
    }
}

impl AdjacencyLists {
    /// Creates an empty store with the reserved sentinel slot.
    pub fn new() -> Self {
        Self::with_capacity(0, 0)
    }

    /// Creates an empty store pre-sized for `lists` lists holding `values` entries.
    pub fn with_capacity(lists: usize, values: usize) -> Self {
        let mut offsets = Vec::with_capacity(lists + 1);
        let mut lengths = Vec::with_capacity(lists + 1);
        offsets.push(0);
        lengths.push(0);
        Self {
            values: Vec::with_capacity(values),
            offsets,
            lengths,
        }
    }

    /// Appends a list and returns its id. Ids start at 1.
    pub fn append(&mut self, values: &[u32]) -> Result<ListId> {
        if values.len() > MAX_LIST_LEN {
            return Err(RoadError::Capacity {
                what: "adjacency list",
                len: values.len(),
                max: MAX_LIST_LEN,
            });
        }
        let offset = u32::try_from(self.values.len()).map_err(|_| RoadError::Capacity {
            what: "adjacency values",
            len: self.values.len(),
            max: u32::MAX as usize,
        })?;
        let id = u32::try_from(self.offsets.len()).map_err(|_| RoadError::Capacity {
            what: "adjacency list ids",
            len: self.offsets.len(),
            max: u32::MAX as usize,
        })?;
        self.values.extend_from_slice(values);
        self.offsets.push(offset);
        self.lengths.push(values.len() as u8);
        Ok(ListId(id))
    }

    /// Returns a zero-copy view of a list.
    pub fn get(&self, id: ListId) -> Result<&[u32]> {
        let slot = self.slot(id)?;
        let offset = self.offsets[slot] as usize;
        let len = self.lengths[slot] as usize;
        Ok(&self.values[offset..offset + len])
    }

    /// Returns the length of one list.
    pub fn list_len(&self, id: ListId) -> Result<usize> {
        let slot = self.slot(id)?;
        Ok(self.lengths[slot] as usize)
    }

    /// Number of lists stored (the sentinel is not counted).
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Returns true when no list has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of values across all lists.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Releases over-allocated capacity. Offsets and lengths are unchanged.
    pub fn compress(&mut self) {
        self.values.shrink_to_fit();
        self.offsets.shrink_to_fit();
        self.lengths.shrink_to_fit();
    }

    /// Iterates `(id, list)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ListId, &[u32])> + '_ {
        (1..self.offsets.len()).map(move |slot| {
            let offset = self.offsets[slot] as usize;
            let len = self.lengths[slot] as usize;
            (ListId(slot as u32), &self.values[offset..offset + len])
        })
    }

    /// Approximate resident size in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.values.capacity() * 4 + self.offsets.capacity() * 4 + self.lengths.capacity()
    }

    fn slot(&self, id: ListId) -> Result<usize> {
        let slot = id.0 as usize;
        if id.is_none() || slot >= self.offsets.len() {
            return Err(RoadError::IndexOutOfRange {
                what: "adjacency list",
                index: id.0 as u64,
                len: self.len() as u64,
            });
        }
        Ok(slot)
    }
}
