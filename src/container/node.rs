//! In-memory object tree mirrored by the file's object headers

use crate::compression::{CompressionLevel, CompressionMethod};
use crate::error::{ContainerError, Result};
use crate::types::{Element, StorageType};
use crate::utils::encode_elements;
use std::collections::BTreeMap;

/// Concatenate strings as `u32` length prefixed UTF-8
pub fn pack_strings<S: AsRef<str>>(values: &[S]) -> Vec<u8> {
    let mut data = Vec::new();
    for value in values {
        let value = value.as_ref();
        data.extend_from_slice(&(value.len() as u32).to_le_bytes());
        data.extend_from_slice(value.as_bytes());
    }
    data
}

/// Split `count` strings out of a packed buffer
pub fn unpack_strings(data: &[u8], count: u64) -> Result<Vec<String>> {
    let truncated = || ContainerError::ContainerIo("packed text is truncated".to_string());
    let mut values = Vec::with_capacity(count as usize);
    let mut cursor = 0usize;
    for _ in 0..count {
        let header = data.get(cursor..cursor + 4).ok_or_else(truncated)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        cursor += 4;
        let raw = data.get(cursor..cursor + len).ok_or_else(truncated)?;
        cursor += len;
        values.push(
            String::from_utf8(raw.to_vec())
                .map_err(|e| ContainerError::ContainerIo(format!("text is not UTF-8: {}", e)))?,
        );
    }
    Ok(values)
}

/// A small named value attached to a group or dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Storage type code; 0 when the file type has no counterpart
    pub type_code: u8,
    /// Shape, slowest-moving first; empty for a scalar
    pub dims: Vec<u64>,
    /// Little-endian payload; text is packed with [`pack_strings`]
    pub data: Vec<u8>,
}

impl Attribute {
    /// One-dimensional numeric attribute
    pub fn vector<T: Element>(storage: StorageType, values: &[T]) -> Self {
        Self {
            type_code: storage.code(),
            dims: vec![values.len() as u64],
            data: encode_elements(values),
        }
    }

    /// Two-dimensional numeric attribute stored row by row
    pub fn matrix<T: Element>(storage: StorageType, rows: &[Vec<T>]) -> Self {
        let columns = rows.first().map(|r| r.len()).unwrap_or(0);
        let flat: Vec<T> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self {
            type_code: storage.code(),
            dims: vec![rows.len() as u64, columns as u64],
            data: encode_elements(&flat),
        }
    }

    /// One-element native boolean
    pub fn flag(value: bool) -> Self {
        Self {
            type_code: StorageType::Bool.code(),
            dims: vec![1],
            data: vec![value as u8],
        }
    }

    /// Scalar text attribute
    pub fn text(value: &str) -> Self {
        Self {
            type_code: StorageType::VarString.code(),
            dims: Vec::new(),
            data: pack_strings(&[value]),
        }
    }

    pub fn storage_type(&self) -> Result<StorageType> {
        StorageType::from_code(self.type_code).ok_or_else(|| {
            ContainerError::UnrecognizedStorageType(format!(
                "attribute type code {}",
                self.type_code
            ))
        })
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of stored elements
    pub fn num_elements(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Every entry of a text attribute
    pub fn texts(&self) -> Result<Vec<String>> {
        if self.storage_type()? != StorageType::VarString {
            return Err(ContainerError::ContainerIo(
                "attribute does not hold text".to_string(),
            ));
        }
        unpack_strings(&self.data, self.num_elements())
    }

    /// Payload of a single-entry text attribute
    pub fn as_text(&self) -> Result<String> {
        self.texts()?
            .into_iter()
            .next()
            .ok_or_else(|| ContainerError::ContainerIo("text attribute is empty".to_string()))
    }
}

/// Location of one stored chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRef {
    /// File offset of the stored bytes
    pub offset: u64,
    /// Stored (possibly compressed) length
    pub stored_len: u64,
    /// Bytes reserved at `offset`
    pub capacity: u64,
}

/// How a dataset's elements are placed in the file
#[derive(Debug, Clone, PartialEq)]
pub enum DataLayout {
    /// Payload kept inside the object header
    Compact { data: Vec<u8> },
    /// One extent in the data region
    Contiguous { offset: u64, len: u64 },
    /// Regular grid of independently stored chunks
    Chunked {
        chunk_dims: Vec<u64>,
        compression: CompressionMethod,
        level: CompressionLevel,
        chunks: Vec<Option<ChunkRef>>,
    },
    /// Found in a file but not readable here; commits keep linking the
    /// original object header
    Unsupported { reason: String, header: u64 },
}

impl DataLayout {
    pub fn name(&self) -> &'static str {
        match self {
            DataLayout::Compact { .. } => "compact",
            DataLayout::Contiguous { .. } => "contiguous",
            DataLayout::Chunked { .. } => "chunked",
            DataLayout::Unsupported { .. } => "unsupported",
        }
    }
}

/// An addressable typed array
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetNode {
    pub type_code: u8,
    /// Storage shape, slowest-moving first
    pub dims: Vec<u64>,
    pub layout: DataLayout,
    pub attributes: BTreeMap<String, Attribute>,
}

impl DatasetNode {
    pub fn storage_type(&self) -> Result<StorageType> {
        StorageType::from_code(self.type_code).ok_or_else(|| {
            ContainerError::UnrecognizedStorageType(format!(
                "dataset type code {}",
                self.type_code
            ))
        })
    }

    pub fn num_elements(&self) -> u64 {
        self.dims.iter().product()
    }
}

/// A namespace node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupNode {
    pub children: BTreeMap<String, Node>,
    pub attributes: BTreeMap<String, Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(GroupNode),
    Dataset(DatasetNode),
}

impl Node {
    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupNode> {
        match self {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&DatasetNode> {
        match self {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }

    pub fn as_dataset_mut(&mut self) -> Option<&mut DatasetNode> {
        match self {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        match self {
            Node::Group(g) => &g.attributes,
            Node::Dataset(d) => &d.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, Attribute> {
        match self {
            Node::Group(g) => &mut g.attributes,
            Node::Dataset(d) => &mut d.attributes,
        }
    }
}

impl GroupNode {
    /// Walk `segments` from this group
    pub fn find(&self, segments: &[String]) -> Option<&Node> {
        let (first, rest) = segments.split_first()?;
        let child = self.children.get(first)?;
        if rest.is_empty() {
            Some(child)
        } else {
            child.as_group()?.find(rest)
        }
    }

    pub fn find_mut(&mut self, segments: &[String]) -> Option<&mut Node> {
        let (first, rest) = segments.split_first()?;
        let child = self.children.get_mut(first)?;
        if rest.is_empty() {
            Some(child)
        } else {
            child.as_group_mut()?.find_mut(rest)
        }
    }

    /// Group reached by `segments`; the empty path is this group
    pub fn find_group(&self, segments: &[String]) -> Option<&GroupNode> {
        if segments.is_empty() {
            return Some(self);
        }
        self.find(segments)?.as_group()
    }

    pub fn find_group_mut(&mut self, segments: &[String]) -> Option<&mut GroupNode> {
        if segments.is_empty() {
            return Some(self);
        }
        self.find_mut(segments)?.as_group_mut()
    }
}
