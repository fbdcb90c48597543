//! Chunk grid - how a chunked dataset is divided into independently stored chunks

use crate::error::{ContainerError, Result};

/// Regular grid of chunks covering a dataset extent.
///
/// Both shapes are slowest-moving axis first. Edge chunks are stored at full
/// chunk size; elements past the dataset extent are padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    dims: Vec<u64>,
    chunk_dims: Vec<u64>,
}

impl ChunkGrid {
    pub fn new(dims: &[u64], chunk_dims: &[u64]) -> Result<Self> {
        if dims.len() != chunk_dims.len() {
            return Err(ContainerError::DimensionMismatch(format!(
                "chunk rank {} does not match dataset rank {}",
                chunk_dims.len(),
                dims.len()
            )));
        }
        if chunk_dims.iter().any(|&c| c == 0) {
            return Err(ContainerError::DimensionMismatch(
                "chunk extents must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            dims: dims.to_vec(),
            chunk_dims: chunk_dims.to_vec(),
        })
    }

    /// Default chunk shape for an image: one slab of the slowest axis
    pub fn slab_chunk_dims(dims: &[u64]) -> Vec<u64> {
        let mut chunk_dims: Vec<u64> = dims.iter().map(|&d| d.max(1)).collect();
        if let Some(first) = chunk_dims.first_mut() {
            *first = 1;
        }
        chunk_dims
    }

    pub fn chunk_dims(&self) -> &[u64] {
        &self.chunk_dims
    }

    /// Number of chunks along each axis
    pub fn chunk_count(&self) -> Vec<u64> {
        self.dims
            .iter()
            .zip(&self.chunk_dims)
            .map(|(&d, &c)| d.div_ceil(c))
            .collect()
    }

    pub fn total_chunks(&self) -> u64 {
        self.chunk_count().iter().product()
    }

    /// Elements stored in one chunk, padding included
    pub fn chunk_elements(&self) -> u64 {
        self.chunk_dims.iter().product()
    }

    /// Uncompressed byte size of one chunk
    pub fn chunk_bytes(&self, element_size: usize) -> usize {
        self.chunk_elements() as usize * element_size
    }

    /// Linear index of the chunk holding `coords`, and the element offset inside it
    pub fn locate(&self, coords: &[u64]) -> (u64, u64) {
        let count = self.chunk_count();
        let mut chunk_index = 0u64;
        let mut inner_index = 0u64;
        for axis in 0..coords.len() {
            let c = self.chunk_dims[axis];
            chunk_index = chunk_index * count[axis] + coords[axis] / c;
            inner_index = inner_index * c + coords[axis] % c;
        }
        (chunk_index, inner_index)
    }

    /// Chunk grid coordinates of a linear chunk index
    pub fn chunk_coords(&self, index: u64) -> Vec<u64> {
        let count = self.chunk_count();
        let mut coords = vec![0; count.len()];
        let mut remaining = index;
        for axis in (0..count.len()).rev() {
            coords[axis] = remaining % count[axis];
            remaining /= count[axis];
        }
        coords
    }

    /// Element range `[start, end)` covered by a chunk, clipped to the extent
    pub fn chunk_data_range(&self, chunk_coords: &[u64]) -> Vec<(u64, u64)> {
        chunk_coords
            .iter()
            .enumerate()
            .map(|(axis, &coord)| {
                let start = coord * self.chunk_dims[axis];
                let end = (start + self.chunk_dims[axis]).min(self.dims[axis]);
                (start, end)
            })
            .collect()
    }

    /// Elements left in the chunk row along the fastest axis from `coord`
    pub fn row_remaining(&self, coord: u64) -> u64 {
        match self.chunk_dims.last() {
            Some(&c) => c - coord % c,
            None => 1,
        }
    }
}
