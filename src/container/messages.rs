//! Header message bodies: dataspace, datatype, layout, filters, links, attributes

use super::format::{OFFSET_SIZE, UNDEFINED_ADDRESS};
use crate::error::{ContainerError, Result};
use crate::types::StorageType;
use byteorder::{ByteOrder, LittleEndian};

pub const NIL: u16 = 0x00;
pub const DATASPACE: u16 = 0x01;
pub const LINK_INFO: u16 = 0x02;
pub const DATATYPE: u16 = 0x03;
pub const FILL_VALUE: u16 = 0x05;
pub const LINK: u16 = 0x06;
pub const LAYOUT: u16 = 0x08;
pub const GROUP_INFO: u16 = 0x0A;
pub const FILTER_PIPELINE: u16 = 0x0B;
pub const ATTRIBUTE: u16 = 0x0C;
pub const CONTINUATION: u16 = 0x10;
pub const SYMBOL_TABLE: u16 = 0x11;
pub const ATTRIBUTE_INFO: u16 = 0x15;

/// Size of one variable-length element: length, heap collection, object index
pub const VLEN_REF_SIZE: usize = 16;

/// Largest raw payload a compact layout message carries
pub const MAX_COMPACT_BYTES: usize = 64 * 1024 - 64;

/// Bounds-checked little-endian cursor over a message body
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let out = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or_else(|| ContainerError::ContainerIo(format!("{} message is truncated", self.what)))?;
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    /// Unsigned integer of `width` bytes
    pub fn uint(&mut self, width: usize) -> Result<u64> {
        Ok(LittleEndian::read_uint(self.bytes(width)?, width))
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        out
    }
}

fn unsupported(what: &str, detail: impl std::fmt::Display) -> ContainerError {
    ContainerError::ContainerIo(format!("unsupported {} message: {}", what, detail))
}

// ---- Dataspace ----

/// Simple dataspace of `dims`, scalar when `dims` is empty
pub fn encode_dataspace(dims: &[u64]) -> Vec<u8> {
    let space_type = if dims.is_empty() { 0 } else { 1 };
    let mut out = vec![2, dims.len() as u8, 0, space_type];
    for dim in dims {
        out.extend_from_slice(&dim.to_le_bytes());
    }
    out
}

/// Current dimensions; a scalar has none and a null space has zero elements
pub fn decode_dataspace(data: &[u8]) -> Result<Vec<u64>> {
    let mut r = Reader::new(data, "dataspace");
    let version = r.u8()?;
    let rank = r.u8()? as usize;
    let _flags = r.u8()?;
    match version {
        1 => r.skip(5)?,
        2 => {
            if r.u8()? == 2 {
                return Ok(vec![0]);
            }
        }
        other => return Err(unsupported("dataspace", format!("version {}", other))),
    }
    (0..rank).map(|_| r.u64()).collect()
}

// ---- Datatype ----

/// Element type as a file describes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Numeric(StorageType),
    /// Variable-length string
    VarString,
    /// Fixed-size string of `size` bytes
    FixedString { size: usize },
    /// Any other class or byte order
    Other { class: u8, size: u32 },
}

impl ElementType {
    /// Storage type code kept in the object tree; 0 when there is none
    pub fn type_code(&self) -> u8 {
        match self {
            ElementType::Numeric(storage) => storage.code(),
            ElementType::VarString | ElementType::FixedString { .. } => {
                StorageType::VarString.code()
            }
            ElementType::Other { .. } => 0,
        }
    }
}

/// (exponent location, exponent size, mantissa size, bias) of IEEE formats
fn float_layout(size: usize) -> (u8, u8, u8, u32) {
    match size {
        2 => (10, 5, 10, 15),
        4 => (23, 8, 23, 127),
        8 => (52, 11, 52, 1023),
        _ => (112, 15, 112, 16383),
    }
}

fn fixed_point(size: u32, signed: bool) -> Vec<u8> {
    let mut out = vec![0x10, if signed { 0x08 } else { 0 }, 0, 0];
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&((size * 8) as u16).to_le_bytes());
    out
}

/// Little-endian datatype message for `storage`; booleans are one-byte unsigned
pub fn encode_datatype(storage: StorageType) -> Vec<u8> {
    match storage {
        StorageType::I8 => fixed_point(1, true),
        StorageType::U8 | StorageType::Bool => fixed_point(1, false),
        StorageType::I16 => fixed_point(2, true),
        StorageType::U16 => fixed_point(2, false),
        StorageType::I32 => fixed_point(4, true),
        StorageType::U32 => fixed_point(4, false),
        StorageType::I64 => fixed_point(8, true),
        StorageType::U64 => fixed_point(8, false),
        StorageType::F16 | StorageType::F32 | StorageType::F64 | StorageType::F128 => {
            let size = storage.size_in_bytes().unwrap_or(16);
            let bits = size * 8;
            let (exp_loc, exp_size, mant_size, bias) = float_layout(size);
            // Implied leading mantissa bit, sign in the top bit
            let mut out = vec![0x11, 0x20, (bits - 1) as u8, 0];
            out.extend_from_slice(&(size as u32).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&(bits as u16).to_le_bytes());
            out.extend_from_slice(&[exp_loc, exp_size, 0, mant_size]);
            out.extend_from_slice(&bias.to_le_bytes());
            out
        }
        StorageType::VarString => {
            // String sequence, null terminated, UTF-8, of unsigned bytes
            let mut out = vec![0x19, 0x01, 0x01, 0];
            out.extend_from_slice(&(VLEN_REF_SIZE as u32).to_le_bytes());
            out.extend_from_slice(&fixed_point(1, false));
            out
        }
    }
}

pub fn decode_datatype(data: &[u8]) -> Result<ElementType> {
    let mut r = Reader::new(data, "datatype");
    let class_and_version = r.u8()?;
    let bits = r.bytes(3)?;
    let size = r.u32()?;
    let class = class_and_version & 0x0F;

    let kind = match class {
        0 if bits[0] & 0x01 == 0 => {
            let signed = bits[0] & 0x08 != 0;
            match (size, signed) {
                (1, true) => ElementType::Numeric(StorageType::I8),
                (1, false) => ElementType::Numeric(StorageType::U8),
                (2, true) => ElementType::Numeric(StorageType::I16),
                (2, false) => ElementType::Numeric(StorageType::U16),
                (4, true) => ElementType::Numeric(StorageType::I32),
                (4, false) => ElementType::Numeric(StorageType::U32),
                (8, true) => ElementType::Numeric(StorageType::I64),
                (8, false) => ElementType::Numeric(StorageType::U64),
                _ => ElementType::Other { class, size },
            }
        }
        // Byte order lives in bits 0 and 6
        1 if bits[0] & 0x41 == 0 => match size {
            2 => ElementType::Numeric(StorageType::F16),
            4 => ElementType::Numeric(StorageType::F32),
            8 => ElementType::Numeric(StorageType::F64),
            16 => ElementType::Numeric(StorageType::F128),
            _ => ElementType::Other { class, size },
        },
        3 => ElementType::FixedString { size: size as usize },
        // Enumerations read as their integer base type
        8 => match decode_datatype(r.rest())? {
            ElementType::Numeric(storage) => ElementType::Numeric(storage),
            _ => ElementType::Other { class, size },
        },
        9 if bits[0] & 0x0F == 1 => ElementType::VarString,
        _ => ElementType::Other { class, size },
    };
    Ok(kind)
}

// ---- Fill value ----

/// Early allocation for compact and contiguous data, incremental for chunks.
/// No fill value is defined, so unwritten elements read as zero.
pub fn encode_fill_value(layout_class: u8) -> Vec<u8> {
    let alloc_time = if layout_class == 2 { 3 } else { 1 };
    vec![3, alloc_time | (2 << 2)]
}

// ---- Layout ----

/// Where a chunked dataset keeps its chunk index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkIndex {
    /// Version 1 B-tree of chunk addresses
    BTree(u64),
    /// One chunk covering the whole dataset
    Single { addr: u64, stored_len: Option<u64> },
    /// Unfiltered chunks stored back to back in grid order
    Implicit(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutMessage {
    Compact(Vec<u8>),
    /// `addr` is undefined until storage is allocated
    Contiguous { addr: u64, size: u64 },
    Chunked {
        chunk_dims: Vec<u64>,
        element_size: u32,
        index: ChunkIndex,
    },
    Unsupported(String),
}

pub fn encode_compact_layout(data: &[u8]) -> Vec<u8> {
    let mut out = vec![3, 0];
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

pub fn encode_contiguous_layout(addr: u64, size: u64) -> Vec<u8> {
    let mut out = vec![3, 1];
    out.extend_from_slice(&addr.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out
}

pub fn encode_chunked_layout(btree: u64, chunk_dims: &[u64], element_size: u32) -> Vec<u8> {
    let mut out = vec![3, 2, chunk_dims.len() as u8 + 1];
    out.extend_from_slice(&btree.to_le_bytes());
    for dim in chunk_dims {
        out.extend_from_slice(&(*dim as u32).to_le_bytes());
    }
    out.extend_from_slice(&element_size.to_le_bytes());
    out
}

fn split_element_size(mut dims: Vec<u64>) -> Result<(Vec<u64>, u32)> {
    let element_size = dims
        .pop()
        .ok_or_else(|| unsupported("layout", "chunk rank 0"))?;
    Ok((dims, element_size as u32))
}

pub fn decode_layout(data: &[u8]) -> Result<LayoutMessage> {
    let mut r = Reader::new(data, "layout");
    let version = r.u8()?;
    match version {
        1 | 2 => {
            let rank = r.u8()? as usize;
            let class = r.u8()?;
            r.skip(5)?;
            let layout = match class {
                0 => {
                    r.skip(rank * 4)?;
                    let size = r.u32()? as usize;
                    LayoutMessage::Compact(r.bytes(size)?.to_vec())
                }
                1 => {
                    let addr = r.u64()?;
                    let dims = (0..rank).map(|_| r.u32().map(u64::from)).collect::<Result<Vec<_>>>()?;
                    LayoutMessage::Contiguous {
                        addr,
                        size: dims.iter().product(),
                    }
                }
                2 => {
                    let btree = r.u64()?;
                    let dims = (0..rank).map(|_| r.u32().map(u64::from)).collect::<Result<Vec<_>>>()?;
                    let (chunk_dims, element_size) = split_element_size(dims)?;
                    LayoutMessage::Chunked {
                        chunk_dims,
                        element_size,
                        index: ChunkIndex::BTree(btree),
                    }
                }
                other => LayoutMessage::Unsupported(format!("layout class {}", other)),
            };
            Ok(layout)
        }
        3 | 4 => {
            let class = r.u8()?;
            match class {
                0 => {
                    let size = r.u16()? as usize;
                    Ok(LayoutMessage::Compact(r.bytes(size)?.to_vec()))
                }
                1 => Ok(LayoutMessage::Contiguous {
                    addr: r.u64()?,
                    size: r.u64()?,
                }),
                2 if version == 3 => {
                    let rank = r.u8()? as usize;
                    let btree = r.u64()?;
                    let dims = (0..rank).map(|_| r.u32().map(u64::from)).collect::<Result<Vec<_>>>()?;
                    let (chunk_dims, element_size) = split_element_size(dims)?;
                    Ok(LayoutMessage::Chunked {
                        chunk_dims,
                        element_size,
                        index: ChunkIndex::BTree(btree),
                    })
                }
                2 => decode_v4_chunked(&mut r),
                3 => Ok(LayoutMessage::Unsupported("virtual dataset".to_string())),
                other => Ok(LayoutMessage::Unsupported(format!("layout class {}", other))),
            }
        }
        other => Err(unsupported("layout", format!("version {}", other))),
    }
}

fn decode_v4_chunked(r: &mut Reader<'_>) -> Result<LayoutMessage> {
    let flags = r.u8()?;
    let rank = r.u8()? as usize;
    let width = r.u8()? as usize;
    if !(1..=8).contains(&width) {
        return Err(unsupported("layout", format!("{}-byte chunk dimensions", width)));
    }
    let dims = (0..rank).map(|_| r.uint(width)).collect::<Result<Vec<_>>>()?;
    let (chunk_dims, element_size) = split_element_size(dims)?;
    let index = match r.u8()? {
        1 => {
            // Filtered single chunks record their stored size and filter mask
            let stored_len = if flags & 0x02 != 0 {
                let len = r.u64()?;
                let _mask = r.u32()?;
                Some(len)
            } else {
                None
            };
            ChunkIndex::Single {
                addr: r.u64()?,
                stored_len,
            }
        }
        2 => ChunkIndex::Implicit(r.u64()?),
        3 => return Ok(LayoutMessage::Unsupported("fixed array chunk index".to_string())),
        4 => return Ok(LayoutMessage::Unsupported("extensible array chunk index".to_string())),
        5 => return Ok(LayoutMessage::Unsupported("version 2 B-tree chunk index".to_string())),
        other => return Ok(LayoutMessage::Unsupported(format!("chunk index type {}", other))),
    };
    Ok(LayoutMessage::Chunked {
        chunk_dims,
        element_size,
        index,
    })
}

// ---- Filter pipeline ----

/// One filter of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: u16,
    pub name: Option<String>,
    pub client_data: Vec<u32>,
}

pub fn encode_filter_pipeline(filters: &[Filter]) -> Vec<u8> {
    let mut out = vec![2, filters.len() as u8];
    for filter in filters {
        out.extend_from_slice(&filter.id.to_le_bytes());
        let name = filter.name.as_ref().map(|n| {
            let mut bytes = n.as_bytes().to_vec();
            bytes.push(0);
            bytes
        });
        // Names are only recorded for ids outside the reserved range
        if filter.id >= 256 {
            let len = name.as_ref().map_or(0, Vec::len);
            out.extend_from_slice(&(len as u16).to_le_bytes());
        }
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(filter.client_data.len() as u16).to_le_bytes());
        if filter.id >= 256 {
            if let Some(name) = &name {
                out.extend_from_slice(name);
            }
        }
        for value in &filter.client_data {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

pub fn decode_filter_pipeline(data: &[u8]) -> Result<Vec<Filter>> {
    let mut r = Reader::new(data, "filter pipeline");
    let version = r.u8()?;
    let count = r.u8()? as usize;
    if version == 1 {
        r.skip(6)?;
    } else if version != 2 {
        return Err(unsupported("filter pipeline", format!("version {}", version)));
    }

    let mut filters = Vec::with_capacity(count);
    for _ in 0..count {
        let id = r.u16()?;
        let name_len = if version == 1 || id >= 256 {
            r.u16()? as usize
        } else {
            0
        };
        let _flags = r.u16()?;
        let values = r.u16()? as usize;
        let name = if name_len > 0 {
            let raw = r.bytes(name_len)?;
            if version == 1 {
                r.skip(name_len.next_multiple_of(8) - name_len)?;
            }
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Some(String::from_utf8_lossy(&raw[..end]).into_owned())
        } else {
            None
        };
        let client_data = (0..values).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;
        if version == 1 && values % 2 == 1 {
            r.skip(4)?;
        }
        filters.push(Filter {
            id,
            name,
            client_data,
        });
    }
    Ok(filters)
}

// ---- Groups ----

fn name_width(len: usize) -> (u8, usize) {
    match len {
        0..=0xFF => (0, 1),
        0x100..=0xFFFF => (1, 2),
        _ => (2, 4),
    }
}

/// Hard link to the object header at `addr`
pub fn encode_link(name: &str, addr: u64) -> Vec<u8> {
    let (width_flag, width) = name_width(name.len());
    // Flags: name length width, character set present
    let mut out = vec![1, width_flag | 0x10, 1];
    let mut len = [0u8; 8];
    LittleEndian::write_uint(&mut len, name.len() as u64, 8);
    out.extend_from_slice(&len[..width]);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&addr.to_le_bytes());
    out
}

/// Name and target of a hard link; `None` for soft and external links
pub fn decode_link(data: &[u8]) -> Result<(String, Option<u64>)> {
    let mut r = Reader::new(data, "link");
    let version = r.u8()?;
    if version != 1 {
        return Err(unsupported("link", format!("version {}", version)));
    }
    let flags = r.u8()?;
    let link_type = if flags & 0x08 != 0 { r.u8()? } else { 0 };
    if flags & 0x04 != 0 {
        r.skip(8)?;
    }
    if flags & 0x10 != 0 {
        r.skip(1)?;
    }
    let name_len = r.uint(1 << (flags & 0x03))? as usize;
    let name = String::from_utf8(r.bytes(name_len)?.to_vec())
        .map_err(|e| ContainerError::ContainerIo(format!("link name is not UTF-8: {}", e)))?;
    let target = match link_type {
        0 => Some(r.u64()?),
        _ => None,
    };
    Ok((name, target))
}

/// Link info for compact link storage, no creation order
pub fn encode_link_info() -> Vec<u8> {
    let mut out = vec![0, 0];
    out.extend_from_slice(&UNDEFINED_ADDRESS.to_le_bytes());
    out.extend_from_slice(&UNDEFINED_ADDRESS.to_le_bytes());
    out
}

/// Whether link or attribute info points at dense (fractal heap) storage
pub fn uses_dense_storage(data: &[u8], creation_index_width: usize) -> Result<bool> {
    let mut r = Reader::new(data, "storage info");
    let _version = r.u8()?;
    let flags = r.u8()?;
    if flags & 0x01 != 0 {
        r.skip(creation_index_width)?;
    }
    Ok(r.u64()? != UNDEFINED_ADDRESS)
}

/// Default group info
pub fn encode_group_info() -> Vec<u8> {
    vec![0, 0]
}

/// B-tree and local heap addresses of a symbol table group
pub fn decode_symbol_table(data: &[u8]) -> Result<(u64, u64)> {
    let mut r = Reader::new(data, "symbol table");
    Ok((r.u64()?, r.u64()?))
}

// ---- Attributes ----

/// An attribute message with its type and space still encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub datatype: Vec<u8>,
    pub dataspace: Vec<u8>,
    pub data: Vec<u8>,
    /// Type or space is a shared message reference
    pub shared: bool,
}

pub fn encode_attribute(name: &str, datatype: &[u8], dataspace: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = vec![3, 0];
    out.extend_from_slice(&((name.len() + 1) as u16).to_le_bytes());
    out.extend_from_slice(&(datatype.len() as u16).to_le_bytes());
    out.extend_from_slice(&(dataspace.len() as u16).to_le_bytes());
    // UTF-8 name
    out.push(1);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.extend_from_slice(datatype);
    out.extend_from_slice(dataspace);
    out.extend_from_slice(data);
    out
}

pub fn decode_attribute(data: &[u8]) -> Result<RawAttribute> {
    let mut r = Reader::new(data, "attribute");
    let version = r.u8()?;
    let flags = r.u8()?;
    let name_len = r.u16()? as usize;
    let type_len = r.u16()? as usize;
    let space_len = r.u16()? as usize;
    let padded = |n: usize| if version == 1 { n.next_multiple_of(8) } else { n };
    match version {
        1 | 2 => {}
        3 => r.skip(1)?,
        other => return Err(unsupported("attribute", format!("version {}", other))),
    }

    let raw_name = r.bytes(padded(name_len))?;
    let end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len().min(name_len));
    let name = String::from_utf8(raw_name[..end].to_vec())
        .map_err(|e| ContainerError::ContainerIo(format!("attribute name is not UTF-8: {}", e)))?;
    let datatype = r.bytes(padded(type_len))?[..type_len].to_vec();
    let dataspace = r.bytes(padded(space_len))?[..space_len].to_vec();
    Ok(RawAttribute {
        name,
        datatype,
        dataspace,
        data: r.rest().to_vec(),
        shared: version > 1 && flags & 0x03 != 0,
    })
}

// ---- Variable-length references ----

/// Encode one variable-length element pointing into a global heap collection
pub fn encode_vlen_ref(len: u32, collection: u64, index: u32) -> [u8; VLEN_REF_SIZE] {
    let mut out = [0u8; VLEN_REF_SIZE];
    LittleEndian::write_u32(&mut out[0..4], len);
    LittleEndian::write_u64(&mut out[4..4 + OFFSET_SIZE], collection);
    LittleEndian::write_u32(&mut out[12..16], index);
    out
}

/// (length, collection address, object index) of each element
pub fn decode_vlen_refs(data: &[u8]) -> Vec<(u32, u64, u32)> {
    data.chunks_exact(VLEN_REF_SIZE)
        .map(|e| {
            (
                LittleEndian::read_u32(&e[0..4]),
                LittleEndian::read_u64(&e[4..12]),
                LittleEndian::read_u32(&e[12..16]),
            )
        })
        .collect()
}
