//! Object tree to HDF5 metadata and back.
//!
//! A commit encodes the whole tree as one block: the global heap collection
//! holding variable-length strings, then every object header after the objects
//! it links to. Chunk indexes and out-of-line string references sit just before
//! the header that points at them.

use super::btree::{encode_chunk_btree, read_chunk_btree, read_symbol_table, ChunkEntry};
use super::format::{Superblock, UNDEFINED_ADDRESS};
use super::heap::{GlobalHeapReader, GlobalHeapWriter, LocalHeap};
use super::layout::ChunkGrid;
use super::messages::*;
use super::node::{pack_strings, unpack_strings, Attribute, ChunkRef, DataLayout, DatasetNode, GroupNode, Node};
use super::object_header::{HeaderWriter, ObjectHeader, FLAG_CONSTANT, FLAG_SHARED};
use crate::compression::{CompressionLevel, CompressionMethod};
use crate::error::{ContainerError, Result};
use crate::io::BlockIo;
use crate::types::StorageType;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Modification and creation time stamped on every written header, in
/// seconds since the epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderTimes {
    pub modified: u32,
    pub created: u32,
}

/// Object tree read from a file
#[derive(Debug)]
pub struct LoadedTree {
    pub root: GroupNode,
    /// Times of the root group header, when recorded
    pub times: Option<HeaderTimes>,
}

/// Read the object tree below the superblock's root group
pub fn load_tree(io: &mut dyn BlockIo, superblock: &Superblock) -> Result<LoadedTree> {
    let header = ObjectHeader::read(io, superblock.root, superblock.base)?;
    let times = match (header.modified, header.created) {
        (Some(modified), Some(created)) => Some(HeaderTimes { modified, created }),
        _ => None,
    };
    let mut loader = Loader {
        io,
        base: superblock.base,
        heap: GlobalHeapReader::new(),
        open: vec![superblock.root],
    };
    let root = loader.load_group(&header)?;
    Ok(LoadedTree { root, times })
}

/// Encode `root` for placement at absolute offset `start`.
///
/// Returns the bytes and the absolute address of the root group header.
pub fn encode_tree(root: &GroupNode, start: u64, base: u64, times: HeaderTimes) -> Result<(Vec<u8>, u64)> {
    // Headers come after the heap collection, whose size is only known once
    // every string has been collected
    let mut sizing = Emitter::new(0, base, 0, times);
    sizing.group(root)?;
    let heap_len = sizing.heap.encoded_len() as u64;

    let heap_addr = start - base;
    let mut emitter = Emitter::new(heap_addr + heap_len, base, heap_addr, times);
    let root_addr = emitter.group(root)?;

    let mut bytes = emitter.heap.encode()?;
    bytes.extend_from_slice(&emitter.out);
    Ok((bytes, base + root_addr))
}

struct Emitter {
    out: Vec<u8>,
    /// Relative address of `out[0]`
    start: u64,
    base: u64,
    heap: GlobalHeapWriter,
    heap_addr: u64,
    times: HeaderTimes,
}

impl Emitter {
    fn new(start: u64, base: u64, heap_addr: u64, times: HeaderTimes) -> Self {
        Self {
            out: Vec::new(),
            start,
            base,
            heap: GlobalHeapWriter::new(),
            heap_addr,
            times,
        }
    }

    fn pos(&self) -> u64 {
        self.start + self.out.len() as u64
    }

    fn relative(&self, addr: u64) -> u64 {
        if addr == UNDEFINED_ADDRESS {
            addr
        } else {
            addr.saturating_sub(self.base)
        }
    }

    fn place(&mut self, bytes: &[u8]) -> u64 {
        let addr = self.pos();
        self.out.extend_from_slice(bytes);
        addr
    }

    fn header(&self) -> HeaderWriter {
        HeaderWriter::new().with_times(self.times.modified, self.times.created)
    }

    fn node(&mut self, node: &Node) -> Result<u64> {
        match node {
            Node::Group(group) => self.group(group),
            Node::Dataset(dataset) => self.dataset(dataset),
        }
    }

    fn group(&mut self, group: &GroupNode) -> Result<u64> {
        let mut links = Vec::with_capacity(group.children.len());
        for (name, child) in &group.children {
            links.push(encode_link(name, self.node(child)?));
        }

        let mut header = self.header();
        header.add(LINK_INFO, encode_link_info());
        header.add(GROUP_INFO, encode_group_info());
        for link in links {
            header.add(LINK, link);
        }
        self.attributes(&mut header, &group.attributes)?;
        let encoded = header.encode()?;
        Ok(self.place(&encoded))
    }

    fn dataset(&mut self, dataset: &DatasetNode) -> Result<u64> {
        if let DataLayout::Unsupported { header, .. } = &dataset.layout {
            return Ok(self.relative(*header));
        }
        let storage = dataset.storage_type()?;

        let mut header = self.header();
        header.add(DATASPACE, encode_dataspace(&dataset.dims));
        header.add_with_flags(DATATYPE, FLAG_CONSTANT, encode_datatype(storage));

        match (&dataset.layout, storage) {
            (DataLayout::Compact { data }, StorageType::VarString) => {
                let values = unpack_strings(data, dataset.num_elements())?;
                let refs = self.strings(&values);
                if refs.len() <= MAX_COMPACT_BYTES {
                    header.add(FILL_VALUE, encode_fill_value(0));
                    header.add(LAYOUT, encode_compact_layout(&refs));
                } else {
                    let addr = self.place(&refs);
                    header.add(FILL_VALUE, encode_fill_value(1));
                    header.add(LAYOUT, encode_contiguous_layout(addr, refs.len() as u64));
                }
            }
            (DataLayout::Compact { data }, _) => {
                header.add(FILL_VALUE, encode_fill_value(0));
                header.add(LAYOUT, encode_compact_layout(data));
            }
            (DataLayout::Contiguous { offset, len }, _) => {
                header.add(FILL_VALUE, encode_fill_value(1));
                header.add(LAYOUT, encode_contiguous_layout(self.relative(*offset), *len));
            }
            (
                DataLayout::Chunked {
                    chunk_dims,
                    compression,
                    level,
                    chunks,
                },
                _,
            ) => {
                let element_size = storage.size_in_bytes().unwrap_or(1) as u32;
                let grid = ChunkGrid::new(&dataset.dims, chunk_dims)?;
                let mut entries = Vec::new();
                for (index, chunk) in chunks.iter().enumerate() {
                    let Some(chunk) = chunk else { continue };
                    let stored_len = u32::try_from(chunk.stored_len).map_err(|_| {
                        ContainerError::ContainerIo(format!("chunk {} is over 4 GiB", index))
                    })?;
                    entries.push(ChunkEntry {
                        offsets: grid
                            .chunk_coords(index as u64)
                            .iter()
                            .zip(chunk_dims)
                            .map(|(coord, dim)| coord * dim)
                            .collect(),
                        stored_len,
                        filter_mask: 0,
                        addr: self.relative(chunk.offset),
                    });
                }
                let (nodes, root) = encode_chunk_btree(&entries, chunk_dims, self.pos());
                self.place(&nodes);

                header.add(FILL_VALUE, encode_fill_value(2));
                header.add(LAYOUT, encode_chunked_layout(root, chunk_dims, element_size));
                if let Some(id) = compression.filter_id() {
                    let name = (*compression == CompressionMethod::Zstd).then(|| "zstd".to_string());
                    header.add(
                        FILTER_PIPELINE,
                        encode_filter_pipeline(&[Filter {
                            id,
                            name,
                            client_data: vec![level.value() as u32],
                        }]),
                    );
                }
            }
            (DataLayout::Unsupported { .. }, _) => {}
        }

        self.attributes(&mut header, &dataset.attributes)?;
        let encoded = header.encode()?;
        Ok(self.place(&encoded))
    }

    fn attributes(&mut self, header: &mut HeaderWriter, attributes: &BTreeMap<String, Attribute>) -> Result<()> {
        for (name, attribute) in attributes {
            let storage = attribute.storage_type()?;
            let data = if storage == StorageType::VarString {
                self.strings(&attribute.texts()?)
            } else {
                attribute.data.clone()
            };
            header.add(
                ATTRIBUTE,
                encode_attribute(
                    name,
                    &encode_datatype(storage),
                    &encode_dataspace(&attribute.dims),
                    &data,
                ),
            );
        }
        Ok(())
    }

    /// Heap references for `values`; empty strings take no heap object
    fn strings(&mut self, values: &[String]) -> Vec<u8> {
        let mut refs = Vec::with_capacity(values.len() * VLEN_REF_SIZE);
        for value in values {
            let index = if value.is_empty() {
                0
            } else {
                self.heap.add(value.as_bytes())
            };
            refs.extend_from_slice(&encode_vlen_ref(value.len() as u32, self.heap_addr, index));
        }
        refs
    }
}

struct Loader<'a> {
    io: &'a mut dyn BlockIo,
    base: u64,
    heap: GlobalHeapReader,
    /// Headers on the path from the root, for cycle detection
    open: Vec<u64>,
}

impl Loader<'_> {
    fn absolute(&self, addr: u64) -> u64 {
        if addr == UNDEFINED_ADDRESS {
            addr
        } else {
            self.base + addr
        }
    }

    fn load_node(&mut self, addr: u64) -> Result<Option<Node>> {
        if self.open.contains(&addr) {
            warn!("skipping link back to enclosing group at address {}", addr);
            return Ok(None);
        }
        let header = ObjectHeader::read(self.io, addr, self.base)?;

        self.open.push(addr);
        let node = if header.has(LAYOUT) {
            Some(Node::Dataset(self.load_dataset(addr, &header)?))
        } else if [SYMBOL_TABLE, LINK_INFO, GROUP_INFO, LINK].iter().any(|&k| header.has(k)) {
            Some(Node::Group(self.load_group(&header)?))
        } else {
            debug!("skipping object at address {}: neither group nor dataset", addr);
            None
        };
        self.open.pop();
        Ok(node)
    }

    fn load_group(&mut self, header: &ObjectHeader) -> Result<GroupNode> {
        let mut links = Vec::new();
        for message in header.all(LINK) {
            match decode_link(&message.data)? {
                (name, Some(addr)) => links.push((name, self.absolute(addr))),
                (name, None) => debug!("skipping soft or external link {}", name),
            }
        }
        if let Some(message) = header.find(SYMBOL_TABLE) {
            let (btree, heap) = decode_symbol_table(&message.data)?;
            let heap_addr = self.absolute(heap);
            let names = LocalHeap::read(self.io, heap_addr, self.base)?;
            for (name_offset, addr) in read_symbol_table(self.io, btree, self.base)? {
                links.push((names.name_at(name_offset)?, addr));
            }
        }
        if let Some(message) = header.find(LINK_INFO) {
            if uses_dense_storage(&message.data, 8)? {
                warn!("group keeps its links in dense storage, which is not read; links skipped");
            }
        }

        let mut group = GroupNode {
            children: BTreeMap::new(),
            attributes: self.load_attributes(header)?,
        };
        for (name, addr) in links {
            if let Some(node) = self.load_node(addr)? {
                group.children.insert(name, node);
            }
        }
        Ok(group)
    }

    fn load_attributes(&mut self, header: &ObjectHeader) -> Result<BTreeMap<String, Attribute>> {
        if let Some(message) = header.find(ATTRIBUTE_INFO) {
            if uses_dense_storage(&message.data, 2)? {
                warn!("object keeps attributes in dense storage, which is not read");
            }
        }

        let mut attributes = BTreeMap::new();
        for message in header.all(ATTRIBUTE) {
            let raw = decode_attribute(&message.data)?;
            if raw.shared || message.flags & FLAG_SHARED != 0 {
                debug!("skipping attribute {} with a shared type or space", raw.name);
                continue;
            }
            let name = raw.name.clone();
            match self.convert_attribute(raw)? {
                Some(attribute) => {
                    attributes.insert(name, attribute);
                }
                None => debug!("skipping attribute {} of an unsupported type", name),
            }
        }
        Ok(attributes)
    }

    fn convert_attribute(&mut self, raw: RawAttribute) -> Result<Option<Attribute>> {
        let dims = decode_dataspace(&raw.dataspace)?;
        let count = dims.iter().product::<u64>() as usize;
        let take = |size: usize| {
            raw.data.get(..count * size).ok_or_else(|| {
                ContainerError::ContainerIo(format!("attribute {} is truncated", raw.name))
            })
        };

        let attribute = match decode_datatype(&raw.datatype)? {
            ElementType::Numeric(storage) => {
                let size = storage.size_in_bytes().unwrap_or(1);
                Attribute {
                    type_code: storage.code(),
                    dims,
                    data: take(size)?.to_vec(),
                }
            }
            ElementType::VarString => {
                let values = self.strings(take(VLEN_REF_SIZE)?)?;
                Attribute {
                    type_code: StorageType::VarString.code(),
                    dims,
                    data: pack_strings(&values),
                }
            }
            ElementType::FixedString { size } => {
                let values: Vec<String> = take(size)?
                    .chunks(size.max(1))
                    .map(|raw| {
                        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                        String::from_utf8_lossy(&raw[..end]).trim_end().to_string()
                    })
                    .collect();
                Attribute {
                    type_code: StorageType::VarString.code(),
                    dims,
                    data: pack_strings(&values),
                }
            }
            ElementType::Other { .. } => return Ok(None),
        };
        Ok(Some(attribute))
    }

    fn strings(&mut self, refs: &[u8]) -> Result<Vec<String>> {
        let mut values = Vec::new();
        for (len, collection, index) in decode_vlen_refs(refs) {
            if len == 0 {
                values.push(String::new());
                continue;
            }
            let collection = self.absolute(collection);
            let object = self.heap.object(self.io, collection, index)?;
            let bytes = object.get(..len as usize).unwrap_or(object);
            values.push(
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| ContainerError::ContainerIo(format!("text is not UTF-8: {}", e)))?,
            );
        }
        Ok(values)
    }

    fn load_dataset(&mut self, addr: u64, header: &ObjectHeader) -> Result<DatasetNode> {
        let missing = |what: &str| {
            ContainerError::ContainerIo(format!("dataset at address {} has no {} message", addr, what))
        };
        let dims = decode_dataspace(&header.find(DATASPACE).ok_or_else(|| missing("dataspace"))?.data)?;
        let datatype = header.find(DATATYPE).ok_or_else(|| missing("datatype"))?;
        let element = if datatype.flags & FLAG_SHARED != 0 {
            ElementType::Other { class: 0xFF, size: 0 }
        } else {
            decode_datatype(&datatype.data)?
        };
        let layout_message = decode_layout(&header.find(LAYOUT).ok_or_else(|| missing("layout"))?.data)?;
        let filters = match header.find(FILTER_PIPELINE) {
            Some(message) => decode_filter_pipeline(&message.data)?,
            None => Vec::new(),
        };
        let count: u64 = dims.iter().product();

        let unsupported = |reason: String| DataLayout::Unsupported { reason, header: addr };
        let layout = match (element, layout_message) {
            (_, LayoutMessage::Unsupported(reason)) => unsupported(reason),
            (ElementType::Numeric(storage), message) => {
                let element_size = storage.size_in_bytes().unwrap_or(1);
                self.numeric_layout(&dims, element_size, message, &filters)?
                    .unwrap_or_else(|reason| unsupported(reason))
            }
            (ElementType::VarString, LayoutMessage::Compact(refs)) => DataLayout::Compact {
                data: pack_strings(&self.strings(&refs)?),
            },
            (ElementType::VarString, LayoutMessage::Contiguous { addr: refs_addr, .. }) => {
                let mut refs = vec![0u8; count as usize * VLEN_REF_SIZE];
                if refs_addr != UNDEFINED_ADDRESS {
                    self.io.read_at(self.absolute(refs_addr), &mut refs)?;
                }
                DataLayout::Compact {
                    data: pack_strings(&self.strings(&refs)?),
                }
            }
            (ElementType::VarString, _) => unsupported("chunked text dataset".to_string()),
            (ElementType::FixedString { size }, _) => unsupported(format!("{}-byte fixed strings", size)),
            (ElementType::Other { class, size }, _) => {
                unsupported(format!("datatype class {} of {} bytes", class, size))
            }
        };

        Ok(DatasetNode {
            type_code: element.type_code(),
            dims,
            layout,
            attributes: self.load_attributes(header)?,
        })
    }

    /// Layout of a numeric dataset, or why it cannot be read
    fn numeric_layout(
        &mut self,
        dims: &[u64],
        element_size: usize,
        message: LayoutMessage,
        filters: &[Filter],
    ) -> Result<std::result::Result<DataLayout, String>> {
        let bytes = dims.iter().product::<u64>() * element_size as u64;
        let layout = match message {
            LayoutMessage::Compact(mut data) => {
                if (data.len() as u64) < bytes {
                    return Err(ContainerError::ContainerIo(format!(
                        "compact data holds {} of {} bytes",
                        data.len(),
                        bytes
                    )));
                }
                data.truncate(bytes as usize);
                DataLayout::Compact { data }
            }
            LayoutMessage::Contiguous { addr, .. } => DataLayout::Contiguous {
                offset: self.absolute(addr),
                len: bytes,
            },
            LayoutMessage::Chunked {
                chunk_dims,
                element_size: stored_size,
                index,
            } => {
                if stored_size as usize != element_size {
                    return Ok(Err(format!("{}-byte chunk elements", stored_size)));
                }
                let (compression, level) = match filters {
                    [] => (CompressionMethod::None, CompressionLevel::default()),
                    [filter] => match CompressionMethod::from_filter_id(filter.id) {
                        Some(method) => {
                            let level = filter.client_data.first().copied().unwrap_or(0);
                            (method, CompressionLevel::new(level.min(u8::MAX as u32) as u8))
                        }
                        None => return Ok(Err(format!("filter {}", filter.id))),
                    },
                    _ => {
                        let ids: Vec<String> = filters.iter().map(|f| f.id.to_string()).collect();
                        return Ok(Err(format!("filter pipeline {}", ids.join(","))));
                    }
                };

                let grid = ChunkGrid::new(dims, &chunk_dims)?;
                let chunk_bytes = grid.chunk_bytes(element_size) as u64;
                let mut chunks: Vec<Option<ChunkRef>> = vec![None; grid.total_chunks() as usize];
                let whole = |offset: u64| ChunkRef {
                    offset,
                    stored_len: chunk_bytes,
                    capacity: chunk_bytes,
                };
                match index {
                    ChunkIndex::BTree(root) => {
                        for entry in read_chunk_btree(self.io, root, dims.len(), self.base)? {
                            if entry.filter_mask != 0 {
                                return Ok(Err("chunks with skipped filters".to_string()));
                            }
                            if entry.offsets.iter().zip(dims).any(|(o, d)| o >= d) {
                                return Err(ContainerError::ContainerIo(format!(
                                    "chunk at {:?} lies outside {:?}",
                                    entry.offsets, dims
                                )));
                            }
                            let (slot, _) = grid.locate(&entry.offsets);
                            chunks[slot as usize] = Some(ChunkRef {
                                offset: entry.addr,
                                stored_len: entry.stored_len as u64,
                                capacity: entry.stored_len as u64,
                            });
                        }
                    }
                    ChunkIndex::Single { addr, stored_len } => {
                        if addr != UNDEFINED_ADDRESS {
                            if let Some(slot) = chunks.first_mut() {
                                let len = stored_len.unwrap_or(chunk_bytes);
                                *slot = Some(ChunkRef {
                                    offset: self.absolute(addr),
                                    stored_len: len,
                                    capacity: len,
                                });
                            }
                        }
                    }
                    ChunkIndex::Implicit(addr) => {
                        if addr != UNDEFINED_ADDRESS {
                            let first = self.absolute(addr);
                            for (i, slot) in chunks.iter_mut().enumerate() {
                                *slot = Some(whole(first + i as u64 * chunk_bytes));
                            }
                        }
                    }
                }
                DataLayout::Chunked {
                    chunk_dims,
                    compression,
                    level,
                    chunks,
                }
            }
            LayoutMessage::Unsupported(reason) => return Ok(Err(reason)),
        };
        Ok(Ok(layout))
    }
}

/// A file as an older writer lays it out: version 0 superblock, version 1
/// headers and a symbol table root group with one empty child group `scan`
#[cfg(test)]
pub(crate) fn legacy_file() -> Vec<u8> {
    use super::format::HDF5_SIGNATURE;
    const UNDEF: u64 = UNDEFINED_ADDRESS;
    let mut f = Vec::new();
    let u64s = |f: &mut Vec<u8>, values: &[u64]| {
        for v in values {
            f.extend_from_slice(&v.to_le_bytes());
        }
    };
    let symbol_table_header = |f: &mut Vec<u8>, btree: u64, heap: u64| {
        f.extend_from_slice(&[1, 0, 1, 0, 1, 0, 0, 0, 24, 0, 0, 0, 0, 0, 0, 0]);
        f.extend_from_slice(&[0x11, 0, 16, 0, 0, 0, 0, 0]);
        f.extend_from_slice(&btree.to_le_bytes());
        f.extend_from_slice(&heap.to_le_bytes());
    };

    // Superblock, 0..96
    f.extend_from_slice(&HDF5_SIGNATURE);
    f.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0, 4, 0, 16, 0, 0, 0, 0, 0]);
    u64s(&mut f, &[0, UNDEF, 352, UNDEF]);
    u64s(&mut f, &[0, 96]);
    f.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
    u64s(&mut f, &[136, 264]);
    // Root header, 96..136
    symbol_table_header(&mut f, 136, 264);
    // Root B-tree, 136..184
    f.extend_from_slice(b"TREE");
    f.extend_from_slice(&[0, 0, 1, 0]);
    u64s(&mut f, &[UNDEF, UNDEF, 0, 184, 8]);
    // Symbol node, 184..232
    f.extend_from_slice(b"SNOD");
    f.extend_from_slice(&[1, 0, 1, 0]);
    u64s(&mut f, &[8, 312]);
    f.extend_from_slice(&[0u8; 24]);
    // Empty B-tree of the child, 232..264
    f.extend_from_slice(b"TREE");
    f.extend_from_slice(&[0, 0, 0, 0]);
    u64s(&mut f, &[UNDEF, UNDEF, 0]);
    // Local heap, 264..312
    f.extend_from_slice(b"HEAP");
    f.extend_from_slice(&[0, 0, 0, 0]);
    u64s(&mut f, &[16, UNDEF, 296]);
    f.extend_from_slice(b"\0\0\0\0\0\0\0\0scan\0\0\0\0");
    // Child header, 312..352
    symbol_table_header(&mut f, 232, 264);
    f
}
