//! Version 1 B-trees: chunk indexes of chunked datasets and the symbol tables
//! of old-style groups

use super::format::{read_clamped, read_exact, UNDEFINED_ADDRESS};
use crate::error::{ContainerError, Result};
use crate::io::BlockIo;
use byteorder::{ByteOrder, LittleEndian};

const TREE_SIGNATURE: &[u8; 4] = b"TREE";
const SNOD_SIGNATURE: &[u8; 4] = b"SNOD";

const NODE_HEADER_SIZE: usize = 24;
const GROUP_NODE: u8 = 0;
const CHUNK_NODE: u8 = 1;

/// Entries per chunk index node; nodes are always allocated at this size
pub const CHUNK_NODE_ENTRIES: usize = 64;

/// Deepest tree followed when reading
const MAX_DEPTH: u8 = 32;

const SYMBOL_ENTRY_SIZE: usize = 40;

/// One stored chunk as the index records it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Element offset of the chunk along each dataset axis
    pub offsets: Vec<u64>,
    pub stored_len: u32,
    pub filter_mask: u32,
    pub addr: u64,
}

fn chunk_key_size(rank: usize) -> usize {
    8 + 8 * (rank + 1)
}

fn chunk_node_size(rank: usize) -> usize {
    NODE_HEADER_SIZE + CHUNK_NODE_ENTRIES * 8 + (CHUNK_NODE_ENTRIES + 1) * chunk_key_size(rank)
}

fn push_chunk_key(out: &mut Vec<u8>, stored_len: u32, filter_mask: u32, offsets: &[u64]) {
    out.extend_from_slice(&stored_len.to_le_bytes());
    out.extend_from_slice(&filter_mask.to_le_bytes());
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    // Offset into the element itself
    out.extend_from_slice(&0u64.to_le_bytes());
}

/// Key and child of one node entry
struct NodeEntry {
    first: ChunkEntry,
    end: Vec<u64>,
    child: u64,
}

/// Encode a chunk index placed at `base`.
///
/// Entries must be sorted by offset. Returns the encoded nodes and the root
/// address, which is undefined when there are no entries.
pub fn encode_chunk_btree(entries: &[ChunkEntry], chunk_dims: &[u64], base: u64) -> (Vec<u8>, u64) {
    if entries.is_empty() {
        return (Vec::new(), UNDEFINED_ADDRESS);
    }
    let rank = chunk_dims.len();
    let node_size = chunk_node_size(rank);

    let mut level_entries: Vec<NodeEntry> = entries
        .iter()
        .map(|e| NodeEntry {
            first: e.clone(),
            end: e.offsets.iter().zip(chunk_dims).map(|(o, c)| o + c).collect(),
            child: e.addr,
        })
        .collect();

    let mut out = Vec::new();
    let mut level = 0u8;
    loop {
        let groups: Vec<&[NodeEntry]> = level_entries.chunks(CHUNK_NODE_ENTRIES).collect();
        let first_addr = base + out.len() as u64;
        let mut parents = Vec::with_capacity(groups.len());
        for (i, group) in groups.iter().enumerate() {
            let addr = first_addr + (i * node_size) as u64;
            let left = if i == 0 { UNDEFINED_ADDRESS } else { addr - node_size as u64 };
            let right = if i + 1 == groups.len() { UNDEFINED_ADDRESS } else { addr + node_size as u64 };

            let start = out.len();
            out.extend_from_slice(TREE_SIGNATURE);
            out.extend_from_slice(&[CHUNK_NODE, level]);
            out.extend_from_slice(&(group.len() as u16).to_le_bytes());
            out.extend_from_slice(&left.to_le_bytes());
            out.extend_from_slice(&right.to_le_bytes());
            for entry in group.iter() {
                push_chunk_key(&mut out, entry.first.stored_len, entry.first.filter_mask, &entry.first.offsets);
                out.extend_from_slice(&entry.child.to_le_bytes());
            }
            let last = &group[group.len() - 1];
            push_chunk_key(&mut out, 0, 0, &last.end);
            out.resize(start + node_size, 0);

            parents.push(NodeEntry {
                first: group[0].first.clone(),
                end: last.end.clone(),
                child: addr,
            });
        }

        if parents.len() == 1 {
            return (out, parents[0].child);
        }
        level_entries = parents;
        level += 1;
    }
}

struct NodeHeader {
    kind: u8,
    level: u8,
    used: usize,
}

fn read_node(io: &mut dyn BlockIo, addr: u64, key_size: usize) -> Result<(NodeHeader, Vec<u8>)> {
    let prefix = read_clamped(io, addr, NODE_HEADER_SIZE as u64)?;
    if prefix.len() < NODE_HEADER_SIZE || &prefix[..4] != TREE_SIGNATURE {
        return Err(ContainerError::ContainerIo(format!(
            "no B-tree node at address {}",
            addr
        )));
    }
    let header = NodeHeader {
        kind: prefix[4],
        level: prefix[5],
        used: LittleEndian::read_u16(&prefix[6..]) as usize,
    };
    let body_len = header.used * 8 + (header.used + 1) * key_size;
    let body = read_exact(io, addr + NODE_HEADER_SIZE as u64, body_len)?;
    Ok((header, body))
}

/// Every chunk recorded under the index rooted at `root`; `base` is added to
/// each address read
pub fn read_chunk_btree(io: &mut dyn BlockIo, root: u64, rank: usize, base: u64) -> Result<Vec<ChunkEntry>> {
    let mut entries = Vec::new();
    if root != UNDEFINED_ADDRESS {
        read_chunk_node(io, base + root, rank, base, MAX_DEPTH, &mut entries)?;
    }
    Ok(entries)
}

fn read_chunk_node(
    io: &mut dyn BlockIo,
    addr: u64,
    rank: usize,
    base: u64,
    depth: u8,
    entries: &mut Vec<ChunkEntry>,
) -> Result<()> {
    let key_size = chunk_key_size(rank);
    let (header, body) = read_node(io, addr, key_size)?;
    if header.kind != CHUNK_NODE {
        return Err(ContainerError::ContainerIo(format!(
            "B-tree node at {} indexes groups, not chunks",
            addr
        )));
    }
    if depth == 0 {
        return Err(ContainerError::ContainerIo("chunk index is too deep".to_string()));
    }

    for i in 0..header.used {
        let key = &body[i * (key_size + 8)..];
        let child = base + LittleEndian::read_u64(&key[key_size..]);
        if header.level > 0 {
            read_chunk_node(io, child, rank, base, depth - 1, entries)?;
            continue;
        }
        entries.push(ChunkEntry {
            stored_len: LittleEndian::read_u32(key),
            filter_mask: LittleEndian::read_u32(&key[4..]),
            offsets: (0..rank)
                .map(|axis| LittleEndian::read_u64(&key[8 + axis * 8..]))
                .collect(),
            addr: child,
        });
    }
    Ok(())
}

/// (link name heap offset, object header address) of every symbol table
/// entry under the group B-tree at `root`
pub fn read_symbol_table(io: &mut dyn BlockIo, root: u64, base: u64) -> Result<Vec<(u64, u64)>> {
    let mut symbols = Vec::new();
    read_group_node(io, base + root, base, MAX_DEPTH, &mut symbols)?;
    Ok(symbols)
}

fn read_group_node(
    io: &mut dyn BlockIo,
    addr: u64,
    base: u64,
    depth: u8,
    symbols: &mut Vec<(u64, u64)>,
) -> Result<()> {
    // Group keys are heap offsets
    let key_size = 8;
    let (header, body) = read_node(io, addr, key_size)?;
    if header.kind != GROUP_NODE {
        return Err(ContainerError::ContainerIo(format!(
            "B-tree node at {} indexes chunks, not links",
            addr
        )));
    }
    if depth == 0 {
        return Err(ContainerError::ContainerIo("group B-tree is too deep".to_string()));
    }

    for i in 0..header.used {
        let child = base + LittleEndian::read_u64(&body[key_size + i * (key_size + 8)..]);
        if header.level > 0 {
            read_group_node(io, child, base, depth - 1, symbols)?;
        } else {
            read_symbol_node(io, child, base, symbols)?;
        }
    }
    Ok(())
}

fn read_symbol_node(io: &mut dyn BlockIo, addr: u64, base: u64, symbols: &mut Vec<(u64, u64)>) -> Result<()> {
    let header = read_exact(io, addr, 8)?;
    if &header[..4] != SNOD_SIGNATURE {
        return Err(ContainerError::ContainerIo(format!(
            "no symbol table node at address {}",
            addr
        )));
    }
    let count = LittleEndian::read_u16(&header[6..]) as usize;
    let entries = read_exact(io, addr + 8, count * SYMBOL_ENTRY_SIZE)?;
    for entry in entries.chunks_exact(SYMBOL_ENTRY_SIZE) {
        symbols.push((
            LittleEndian::read_u64(entry),
            base + LittleEndian::read_u64(&entry[8..]),
        ));
    }
    Ok(())
}
