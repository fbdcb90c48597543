//! Global heap collections for variable-length data, and local heaps for
//! symbol table link names

use super::format::{read_clamped, read_exact};
use crate::error::{ContainerError, Result};
use crate::io::BlockIo;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

const GCOL_SIGNATURE: &[u8; 4] = b"GCOL";
const HEAP_SIGNATURE: &[u8; 4] = b"HEAP";

const COLLECTION_HEADER_SIZE: usize = 16;
const OBJECT_HEADER_SIZE: usize = 16;

/// Smallest collection the format allows
pub const MIN_COLLECTION_SIZE: usize = 4096;

/// Builds one global heap collection
#[derive(Debug, Default)]
pub struct GlobalHeapWriter {
    objects: Vec<Vec<u8>>,
}

impl GlobalHeapWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data`, returning its object index
    pub fn add(&mut self, data: &[u8]) -> u32 {
        self.objects.push(data.to_vec());
        self.objects.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn used(&self) -> usize {
        COLLECTION_HEADER_SIZE
            + self
                .objects
                .iter()
                .map(|o| OBJECT_HEADER_SIZE + o.len().next_multiple_of(8))
                .sum::<usize>()
    }

    /// Encoded size; zero when nothing was added
    pub fn encoded_len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.used().max(MIN_COLLECTION_SIZE)
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.objects.len() > u16::MAX as usize {
            return Err(ContainerError::ContainerIo(format!(
                "{} variable-length values exceed one heap collection",
                self.objects.len()
            )));
        }
        let size = self.encoded_len();
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(GCOL_SIGNATURE);
        out.extend_from_slice(&[1, 0, 0, 0]);
        out.extend_from_slice(&(size as u64).to_le_bytes());

        for (i, object) in self.objects.iter().enumerate() {
            out.extend_from_slice(&(i as u16 + 1).to_le_bytes());
            // Reference count, reserved
            out.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
            out.extend_from_slice(&(object.len() as u64).to_le_bytes());
            out.extend_from_slice(object);
            out.resize(out.len().next_multiple_of(8), 0);
        }

        // Free space object covering the tail, its own header included
        let free = size - out.len();
        if free >= OBJECT_HEADER_SIZE {
            out.extend_from_slice(&[0u8; 8]);
            out.extend_from_slice(&(free as u64).to_le_bytes());
        }
        out.resize(size, 0);
        Ok(out)
    }
}

/// Objects of every global heap collection read so far
#[derive(Debug, Default)]
pub struct GlobalHeapReader {
    collections: HashMap<u64, HashMap<u16, Vec<u8>>>,
}

impl GlobalHeapReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object `index` of the collection at `addr`
    pub fn object(&mut self, io: &mut dyn BlockIo, addr: u64, index: u32) -> Result<&[u8]> {
        if !self.collections.contains_key(&addr) {
            let collection = read_collection(io, addr)?;
            self.collections.insert(addr, collection);
        }
        self.collections
            .get(&addr)
            .and_then(|c| u16::try_from(index).ok().and_then(|i| c.get(&i)))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                ContainerError::ContainerIo(format!(
                    "global heap object {} missing from collection {}",
                    index, addr
                ))
            })
    }
}

fn read_collection(io: &mut dyn BlockIo, addr: u64) -> Result<HashMap<u16, Vec<u8>>> {
    let header = read_exact(io, addr, COLLECTION_HEADER_SIZE)?;
    if &header[..4] != GCOL_SIGNATURE {
        return Err(ContainerError::ContainerIo(format!(
            "no global heap collection at address {}",
            addr
        )));
    }
    let size = LittleEndian::read_u64(&header[8..]) as usize;
    if size < COLLECTION_HEADER_SIZE {
        return Err(ContainerError::ContainerIo(format!(
            "global heap collection at {} is {} bytes",
            addr, size
        )));
    }
    let data = read_exact(io, addr, size)?;

    let mut objects = HashMap::new();
    let mut pos = COLLECTION_HEADER_SIZE;
    while pos + OBJECT_HEADER_SIZE <= data.len() {
        let index = LittleEndian::read_u16(&data[pos..]);
        let len = LittleEndian::read_u64(&data[pos + 8..]) as usize;
        if index == 0 {
            break;
        }
        let start = pos + OBJECT_HEADER_SIZE;
        let object = data.get(start..start + len).ok_or_else(|| {
            ContainerError::ContainerIo(format!(
                "global heap object {} overruns its collection",
                index
            ))
        })?;
        objects.insert(index, object.to_vec());
        pos = start + len.next_multiple_of(8);
    }
    Ok(objects)
}

/// Data segment of a local heap
#[derive(Debug, Clone)]
pub struct LocalHeap {
    data: Vec<u8>,
}

impl LocalHeap {
    /// Heap at absolute offset `addr`; its data segment address is relative
    /// to `base`
    pub fn read(io: &mut dyn BlockIo, addr: u64, base: u64) -> Result<Self> {
        let header = read_clamped(io, addr, 32)?;
        if header.len() < 32 || &header[..4] != HEAP_SIGNATURE {
            return Err(ContainerError::ContainerIo(format!(
                "no local heap at address {}",
                addr
            )));
        }
        let size = LittleEndian::read_u64(&header[8..]) as usize;
        let data_addr = LittleEndian::read_u64(&header[24..]);
        Ok(Self {
            data: read_exact(io, base + data_addr, size)?,
        })
    }

    /// Null-terminated string at `offset`
    pub fn name_at(&self, offset: u64) -> Result<String> {
        let rest = self.data.get(offset as usize..).ok_or_else(|| {
            ContainerError::ContainerIo(format!("local heap offset {} is out of range", offset))
        })?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        String::from_utf8(rest[..end].to_vec())
            .map_err(|e| ContainerError::ContainerIo(format!("link name is not UTF-8: {}", e)))
    }
}
