//! Moving selected elements between memory buffers and a dataset's layout.
//!
//! Buffers here hold little-endian storage bytes. Selections are validated by
//! the caller.

use super::dataspace::{for_each_run, Dataspace, Hyperslab};
use super::format::UNDEFINED_ADDRESS;
use super::layout::ChunkGrid;
use super::node::{ChunkRef, DataLayout, DatasetNode};
use crate::compression::{CompressionLevel, CompressionMethod};
use crate::error::{ContainerError, Result};
use crate::io::BlockIo;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Reserve `len` zeroed bytes past the end of the file.
///
/// Existing bytes are never touched, so committed metadata survives until
/// the next commit points elsewhere.
pub(crate) fn allocate(io: &mut dyn BlockIo, eof: &mut u64, len: u64) -> Result<u64> {
    let offset = (*eof).max(io.len()?);
    let end = offset + len;
    io.set_len(end)?;
    *eof = end;
    trace!("allocated {} bytes at {}", len, offset);
    Ok(offset)
}

fn unreadable(reason: &str) -> ContainerError {
    ContainerError::ContainerIo(format!("dataset storage is not supported: {}", reason))
}

fn element_size(dataset: &DatasetNode) -> Result<usize> {
    let storage = dataset.storage_type()?;
    storage.size_in_bytes().ok_or_else(|| {
        ContainerError::UnsupportedType(format!("{} has no fixed element size", storage))
    })
}

/// Read the selected elements of `dataset` into `out`
pub(crate) fn read_selection(
    io: &mut dyn BlockIo,
    dataset: &DatasetNode,
    slab: &Hyperslab,
    out: &mut [u8],
) -> Result<()> {
    let esize = element_size(dataset)?;
    let space = Dataspace::simple(dataset.dims.clone());

    match &dataset.layout {
        DataLayout::Compact { data } => for_each_run(slab, |run| {
            let base = space.linear_index(run.start);
            for k in 0..run.len {
                let src = ((base + k * run.stride) as usize) * esize;
                let dst = ((run.memory_offset + k) as usize) * esize;
                out[dst..dst + esize].copy_from_slice(&data[src..src + esize]);
            }
            Ok(())
        }),
        // Never allocated
        DataLayout::Contiguous { offset, .. } if *offset == UNDEFINED_ADDRESS => {
            out.fill(0);
            Ok(())
        }
        DataLayout::Contiguous { offset, .. } => for_each_run(slab, |run| {
            let base = *offset + space.linear_index(run.start) * esize as u64;
            let dst = run.memory_offset as usize * esize;
            let len = run.len as usize * esize;
            if run.stride == 1 {
                return io.read_at(base, &mut out[dst..dst + len]);
            }

            let span = ((run.len - 1) * run.stride + 1) as usize * esize;
            let mut buffer = vec![0u8; span];
            io.read_at(base, &mut buffer)?;
            for k in 0..run.len as usize {
                let src = k * run.stride as usize * esize;
                out[dst + k * esize..dst + (k + 1) * esize]
                    .copy_from_slice(&buffer[src..src + esize]);
            }
            Ok(())
        }),
        DataLayout::Chunked {
            chunk_dims,
            compression,
            chunks,
            ..
        } => {
            let grid = ChunkGrid::new(&dataset.dims, chunk_dims)?;
            let mut cache = ChunkCache::new(&grid, esize, *compression);
            for_each_run(slab, |run| {
                visit_chunk_segments(&grid, run.start, run.stride, run.len, |chunk, inner, n, done| {
                    let buffer = cache.load(io, chunks, chunk)?;
                    for k in 0..n {
                        let src = (inner + k * run.stride) as usize * esize;
                        let dst = (run.memory_offset + done + k) as usize * esize;
                        out[dst..dst + esize].copy_from_slice(&buffer[src..src + esize]);
                    }
                    Ok(())
                })
            })
        }
        DataLayout::Unsupported { reason, .. } => Err(unreadable(reason)),
    }
}

/// Write `data` into the selected elements of `dataset`
pub(crate) fn write_selection(
    io: &mut dyn BlockIo,
    eof: &mut u64,
    dataset: &mut DatasetNode,
    slab: &Hyperslab,
    data: &[u8],
) -> Result<()> {
    let esize = element_size(dataset)?;
    let space = Dataspace::simple(dataset.dims.clone());
    let dims = dataset.dims.clone();

    match &mut dataset.layout {
        DataLayout::Compact { data: stored } => for_each_run(slab, |run| {
            let base = space.linear_index(run.start);
            for k in 0..run.len {
                let dst = ((base + k * run.stride) as usize) * esize;
                let src = ((run.memory_offset + k) as usize) * esize;
                stored[dst..dst + esize].copy_from_slice(&data[src..src + esize]);
            }
            Ok(())
        }),
        DataLayout::Contiguous { offset, .. } => {
            let offset = *offset;
            for_each_run(slab, |run| {
                let base = offset + space.linear_index(run.start) * esize as u64;
                let src = run.memory_offset as usize * esize;
                let len = run.len as usize * esize;
                if run.stride == 1 {
                    return io.write_at(base, &data[src..src + len]);
                }

                let span = ((run.len - 1) * run.stride + 1) as usize * esize;
                let mut buffer = vec![0u8; span];
                io.read_at(base, &mut buffer)?;
                for k in 0..run.len as usize {
                    let dst = k * run.stride as usize * esize;
                    buffer[dst..dst + esize]
                        .copy_from_slice(&data[src + k * esize..src + (k + 1) * esize]);
                }
                io.write_at(base, &buffer)
            })
        }
        DataLayout::Chunked {
            chunk_dims,
            compression,
            level,
            chunks,
        } => {
            let grid = ChunkGrid::new(&dims, chunk_dims)?;
            let mut cache = ChunkCache::new(&grid, esize, *compression);
            for_each_run(slab, |run| {
                visit_chunk_segments(&grid, run.start, run.stride, run.len, |chunk, inner, n, done| {
                    let buffer = cache.load_for_write(io, chunks, chunk)?;
                    for k in 0..n {
                        let dst = (inner + k * run.stride) as usize * esize;
                        let src = (run.memory_offset + done + k) as usize * esize;
                        buffer[dst..dst + esize].copy_from_slice(&data[src..src + esize]);
                    }
                    Ok(())
                })
            })?;
            cache.store(io, eof, chunks, *level)
        }
        DataLayout::Unsupported { reason, .. } => Err(unreadable(reason)),
    }
}

/// Split a run along the fastest axis at chunk boundaries.
///
/// `visit` receives the chunk index, the element offset inside the chunk,
/// the element count, and how many run elements came before.
fn visit_chunk_segments<F>(
    grid: &ChunkGrid,
    start: &[u64],
    stride: u64,
    len: u64,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(u64, u64, u64, u64) -> Result<()>,
{
    let mut coords = start.to_vec();
    let last = coords.len().saturating_sub(1);
    let mut done = 0u64;

    while done < len {
        let (chunk, inner) = grid.locate(&coords);
        let fits = match coords.get(last) {
            Some(&c) => grid.row_remaining(c).div_ceil(stride),
            None => 1,
        };
        let n = fits.min(len - done);
        visit(chunk, inner, n, done)?;
        done += n;
        if let Some(c) = coords.get_mut(last) {
            *c += n * stride;
        }
    }
    Ok(())
}

/// Decompressed chunks touched by one operation
struct ChunkCache {
    chunk_bytes: usize,
    compression: CompressionMethod,
    loaded: BTreeMap<u64, Vec<u8>>,
    dirty: BTreeSet<u64>,
}

impl ChunkCache {
    fn new(grid: &ChunkGrid, esize: usize, compression: CompressionMethod) -> Self {
        Self {
            chunk_bytes: grid.chunk_bytes(esize),
            compression,
            loaded: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    fn load(
        &mut self,
        io: &mut dyn BlockIo,
        chunks: &[Option<ChunkRef>],
        index: u64,
    ) -> Result<&mut Vec<u8>> {
        if !self.loaded.contains_key(&index) {
            let slot = chunks.get(index as usize).ok_or_else(|| {
                ContainerError::ContainerIo(format!("chunk {} outside the chunk table", index))
            })?;
            let bytes = match slot {
                // Never written
                None => vec![0u8; self.chunk_bytes],
                Some(chunk) => {
                    let mut stored = vec![0u8; chunk.stored_len as usize];
                    io.read_at(chunk.offset, &mut stored)?;
                    self.compression
                        .compressor()
                        .decompress(&stored, self.chunk_bytes)?
                }
            };
            self.loaded.insert(index, bytes);
        }

        self.loaded.get_mut(&index).ok_or_else(|| {
            ContainerError::ContainerIo(format!("chunk {} missing from cache", index))
        })
    }

    fn load_for_write(
        &mut self,
        io: &mut dyn BlockIo,
        chunks: &[Option<ChunkRef>],
        index: u64,
    ) -> Result<&mut Vec<u8>> {
        self.dirty.insert(index);
        self.load(io, chunks, index)
    }

    /// Compress and write back every dirty chunk
    fn store(
        self,
        io: &mut dyn BlockIo,
        eof: &mut u64,
        chunks: &mut [Option<ChunkRef>],
        level: CompressionLevel,
    ) -> Result<()> {
        let compressor = self.compression.compressor();
        for (index, bytes) in self.loaded {
            if !self.dirty.contains(&index) {
                continue;
            }
            let stored = compressor.compress(&bytes, level)?;
            let stored_len = stored.len() as u64;
            let slot = chunks.get_mut(index as usize).ok_or_else(|| {
                ContainerError::ContainerIo(format!("chunk {} outside the chunk table", index))
            })?;

            let chunk = match slot {
                Some(existing) if stored_len <= existing.capacity => ChunkRef {
                    offset: existing.offset,
                    stored_len,
                    capacity: existing.capacity,
                },
                _ => ChunkRef {
                    offset: allocate(io, eof, stored_len)?,
                    stored_len,
                    capacity: stored_len,
                },
            };
            io.write_at(chunk.offset, &stored)?;
            trace!(
                "stored chunk {} ({} of {} bytes)",
                index,
                stored_len,
                self.chunk_bytes
            );
            *slot = Some(chunk);
        }
        Ok(())
    }
}
