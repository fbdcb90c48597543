//! Dataspaces and hyperslab selections for partial dataset I/O.
//!
//! A [`Hyperslab`] is a regular, strided sub-region of a [`Dataspace`]. All
//! shapes here are in storage order: slowest-moving axis first.

use crate::error::{ContainerError, Result};

/// Shape of a dataset or of an in-memory transfer buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataspace {
    dims: Vec<u64>,
}

impl Dataspace {
    /// N-dimensional space
    pub fn simple(dims: Vec<u64>) -> Self {
        Self { dims }
    }

    /// Single element, rank zero
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn num_elements(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Elements between consecutive indices of each axis
    pub fn pitches(&self) -> Vec<u64> {
        let mut pitches = vec![1u64; self.dims.len()];
        for axis in (0..self.dims.len().saturating_sub(1)).rev() {
            pitches[axis] = pitches[axis + 1] * self.dims[axis + 1];
        }
        pitches
    }

    /// Linear element index of `coords`
    pub fn linear_index(&self, coords: &[u64]) -> u64 {
        coords
            .iter()
            .zip(self.pitches())
            .map(|(&c, pitch)| c * pitch)
            .sum()
    }
}

/// Regular strided selection: `count` elements per axis, `stride` apart, from `offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperslab {
    pub offset: Vec<u64>,
    pub count: Vec<u64>,
    pub stride: Vec<u64>,
}

impl Hyperslab {
    pub fn new(offset: Vec<u64>, count: Vec<u64>, stride: Vec<u64>) -> Self {
        Self {
            offset,
            count,
            stride,
        }
    }

    /// The whole of `space`
    pub fn all(space: &Dataspace) -> Self {
        let rank = space.rank();
        Self {
            offset: vec![0; rank],
            count: space.dims().to_vec(),
            stride: vec![1; rank],
        }
    }

    pub fn rank(&self) -> usize {
        self.count.len()
    }

    pub fn num_elements(&self) -> u64 {
        self.count.iter().product()
    }

    /// Shape of the matching in-memory transfer space
    pub fn memory_space(&self) -> Dataspace {
        Dataspace::simple(self.count.clone())
    }

    /// Check the selection fits inside `space`
    pub fn validate(&self, space: &Dataspace) -> Result<()> {
        let rank = space.rank();
        if self.offset.len() != rank || self.count.len() != rank || self.stride.len() != rank {
            return Err(ContainerError::DimensionMismatch(format!(
                "selection rank {}/{}/{} does not match dataspace rank {}",
                self.offset.len(),
                self.count.len(),
                self.stride.len(),
                rank
            )));
        }

        for axis in 0..rank {
            if self.stride[axis] == 0 {
                return Err(ContainerError::DimensionMismatch(format!(
                    "stride of axis {} must be at least 1",
                    axis
                )));
            }
            if self.count[axis] == 0 {
                continue;
            }
            let last = (self.count[axis] - 1)
                .checked_mul(self.stride[axis])
                .and_then(|span| span.checked_add(self.offset[axis]));
            match last {
                Some(last) if last < space.dims()[axis] => {}
                _ => {
                    return Err(ContainerError::ContainerIo(format!(
                        "selection offset {} count {} stride {} exceeds extent {} on axis {}",
                        self.offset[axis],
                        self.count[axis],
                        self.stride[axis],
                        space.dims()[axis],
                        axis
                    )))
                }
            }
        }
        Ok(())
    }
}

/// One run of selected elements along the fastest-moving axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run<'a> {
    /// Dataset coordinates of the first element
    pub start: &'a [u64],
    /// Distance between elements along the fastest axis
    pub stride: u64,
    /// Number of elements
    pub len: u64,
    /// Element offset of the run inside the memory buffer
    pub memory_offset: u64,
}

/// Visit the selection as runs along the fastest axis, in memory order
pub fn for_each_run<F>(slab: &Hyperslab, mut visit: F) -> Result<()>
where
    F: FnMut(Run<'_>) -> Result<()>,
{
    let rank = slab.rank();
    if rank == 0 {
        return visit(Run {
            start: &[],
            stride: 1,
            len: 1,
            memory_offset: 0,
        });
    }
    if slab.num_elements() == 0 {
        return Ok(());
    }

    let last = rank - 1;
    let mut coords = slab.offset.clone();
    let mut counters = vec![0u64; rank];
    let mut memory_offset = 0u64;

    loop {
        visit(Run {
            start: &coords,
            stride: slab.stride[last],
            len: slab.count[last],
            memory_offset,
        })?;
        memory_offset += slab.count[last];

        // Odometer over every axis but the fastest
        let mut axis = last;
        loop {
            if axis == 0 {
                return Ok(());
            }
            axis -= 1;
            counters[axis] += 1;
            if counters[axis] < slab.count[axis] {
                coords[axis] = slab.offset[axis] + counters[axis] * slab.stride[axis];
                break;
            }
            counters[axis] = 0;
            coords[axis] = slab.offset[axis];
        }
    }
}
