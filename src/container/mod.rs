//! HDF5 container file - groups, typed datasets and attributes in one file
//!
//! The object tree is held in memory. Dataset storage is appended to the file
//! as it is allocated; a flush appends the tree's metadata and only then
//! rewrites the superblock to point at it, so bytes reachable from the last
//! superblock are never overwritten.

mod btree;
mod codec;
pub mod dataspace;
pub mod format;
mod heap;
pub mod layout;
mod messages;
pub mod node;
mod object_header;
mod storage;

pub use dataspace::{Dataspace, Hyperslab};
pub use node::{Attribute, DataLayout};

use crate::compression::{CompressionLevel, CompressionMethod};
use crate::error::{ContainerError, Result};
use crate::io::{AccessMode, BlockIo, FileBlockIo, MemoryBlockIo};
use crate::path::elements_of;
use crate::types::StorageType;
use chrono::{DateTime, Utc};
use codec::{encode_tree, load_tree, HeaderTimes};
use format::{Superblock, SUPERBLOCK_SIZE, UNDEFINED_ADDRESS};
use layout::ChunkGrid;
use messages::MAX_COMPACT_BYTES;
use node::{pack_strings, unpack_strings, DatasetNode, GroupNode, Node};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// File access properties
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessProperties {
    /// Sync file contents to disk after every flush
    pub sync_on_flush: bool,
}

/// Storage layout requested for a new dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LayoutKind {
    /// Payload kept in the object header; larger payloads fall back to contiguous
    Compact,
    /// One zero-filled extent
    #[default]
    Contiguous,
    /// Chunk grid; `None` uses one slab of the slowest axis per chunk
    Chunked { chunk_dims: Option<Vec<u64>> },
}

/// Dataset creation properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetCreateProps {
    pub layout: LayoutKind,
    pub compression: CompressionMethod,
    pub level: CompressionLevel,
}

impl DatasetCreateProps {
    pub fn compact() -> Self {
        Self {
            layout: LayoutKind::Compact,
            ..Self::default()
        }
    }

    pub fn chunked(chunk_dims: Option<Vec<u64>>) -> Self {
        Self {
            layout: LayoutKind::Chunked { chunk_dims },
            ..Self::default()
        }
    }

    /// Compress chunks; only meaningful for chunked layouts
    pub fn with_compression(mut self, method: CompressionMethod, level: CompressionLevel) -> Self {
        self.compression = method;
        self.level = level;
        self
    }
}

impl Default for DatasetCreateProps {
    fn default() -> Self {
        Self {
            layout: LayoutKind::Contiguous,
            compression: CompressionMethod::None,
            level: CompressionLevel::default(),
        }
    }
}

/// An open container file
pub struct Container {
    io: Box<dyn BlockIo>,
    mode: AccessMode,
    access: AccessProperties,
    root: GroupNode,
    superblock: Superblock,
    /// First byte past everything written; allocations and commits go here
    eof: u64,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    dirty: bool,
    closed: bool,
}

impl Container {
    /// Create a new container, truncating any existing file
    pub fn create(path: impl AsRef<Path>, access: AccessProperties) -> Result<Self> {
        let io = FileBlockIo::create(path.as_ref())?;
        let container = Self::initialize(Box::new(io), access)?;
        info!("created container {}", path.as_ref().display());
        Ok(container)
    }

    /// Open an existing container
    pub fn open(path: impl AsRef<Path>, mode: AccessMode, access: AccessProperties) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ContainerError::NotFound(path.display().to_string()));
        }

        let io = FileBlockIo::open(path, mode)?;
        let container = Self::from_io(Box::new(io), mode, access)?;
        info!("opened container {} ({:?})", path.display(), mode);
        Ok(container)
    }

    /// Empty writable container held in memory
    pub fn in_memory() -> Result<Self> {
        Self::initialize(Box::new(MemoryBlockIo::new()), AccessProperties::default())
    }

    /// Open a container stored behind any block I/O backend
    pub fn from_io(mut io: Box<dyn BlockIo>, mode: AccessMode, access: AccessProperties) -> Result<Self> {
        let superblock = Superblock::read(io.as_mut())?;
        let tree = load_tree(io.as_mut(), &superblock)?;
        let eof = io.len()?.max(superblock.end());
        let now = Utc::now();
        let (created, modified) = match tree.times {
            Some(times) => (from_epoch(times.created), from_epoch(times.modified)),
            None => (now, now),
        };
        debug!(
            "superblock version {} at {}, root group at {}",
            superblock.version, superblock.location, superblock.root
        );
        Ok(Self {
            io,
            mode,
            access,
            root: tree.root,
            superblock,
            eof,
            created,
            modified,
            dirty: false,
            closed: false,
        })
    }

    fn initialize(io: Box<dyn BlockIo>, access: AccessProperties) -> Result<Self> {
        let now = Utc::now();
        let mut container = Self {
            io,
            mode: AccessMode::ReadWrite,
            access,
            root: GroupNode::default(),
            superblock: Superblock::new(SUPERBLOCK_SIZE, UNDEFINED_ADDRESS),
            eof: SUPERBLOCK_SIZE,
            created: now,
            modified: now,
            dirty: true,
            closed: false,
        };
        container.flush()?;
        Ok(container)
    }

    /// Whether `path` holds an HDF5 file whose object tree can be read. Never fails.
    pub fn probe(path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut io = match FileBlockIo::open(path, AccessMode::ReadOnly) {
            Ok(io) => io,
            Err(_) => return false,
        };

        let superblock = match Superblock::read(&mut io) {
            Ok(superblock) => superblock,
            Err(ContainerError::NotAContainer(_)) => return false,
            Err(e) => {
                warn!("{} carries an HDF5 signature but its superblock is unreadable: {}", path.display(), e);
                return false;
            }
        };
        match load_tree(&mut io, &superblock) {
            Ok(_) => true,
            Err(e) => {
                warn!("{} carries an HDF5 signature but is unreadable: {}", path.display(), e);
                false
            }
        }
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn location(&self) -> String {
        self.io.location()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// When the file was created, as recorded in its root group
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Time of the last commit
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ContainerError::ContainerIo(format!(
                "container {} is closed",
                self.io.location()
            )));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.mode.is_writable() {
            return Err(ContainerError::ContainerIo(format!(
                "container {} is opened read-only",
                self.io.location()
            )));
        }
        Ok(())
    }

    // ---- Objects ----

    /// Whether any object exists at `path`; the root always exists
    pub fn exists(&self, path: &str) -> bool {
        let segments = elements_of(path);
        segments.is_empty() || self.root.find(&segments).is_some()
    }

    pub fn is_group(&self, path: &str) -> bool {
        self.root.find_group(&elements_of(path)).is_some()
    }

    pub fn is_dataset(&self, path: &str) -> bool {
        self.root
            .find(&elements_of(path))
            .and_then(Node::as_dataset)
            .is_some()
    }

    /// Create one group; its parent must already exist
    pub fn create_group(&mut self, path: &str) -> Result<()> {
        self.ensure_writable()?;
        let (parent, name) = split_parent(path)?;
        let group = parent_group_mut(&mut self.root, &parent, path)?;
        if group.children.contains_key(&name) {
            return Err(ContainerError::AlreadyExists(path.to_string()));
        }

        group.children.insert(name, Node::Group(GroupNode::default()));
        self.dirty = true;
        debug!("created group {}", path);
        Ok(())
    }

    /// Names of the objects directly under a group
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        let group = self
            .root
            .find_group(&elements_of(path))
            .ok_or_else(|| ContainerError::PathNotFound(path.to_string()))?;
        Ok(group.children.keys().cloned().collect())
    }

    /// Remove an object and everything below it.
    ///
    /// Storage of unlinked datasets is not reclaimed.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        self.ensure_writable()?;
        let (parent, name) = split_parent(path)?;
        let group = parent_group_mut(&mut self.root, &parent, path)?;
        if group.children.remove(&name).is_none() {
            return Err(ContainerError::NotFound(path.to_string()));
        }
        self.dirty = true;
        debug!("unlinked {}", path);
        Ok(())
    }

    // ---- Datasets ----

    /// Create a numeric dataset; its parent group must already exist
    pub fn create_dataset(
        &mut self,
        path: &str,
        storage: StorageType,
        space: &Dataspace,
        props: &DatasetCreateProps,
    ) -> Result<()> {
        self.ensure_writable()?;
        let element_size = storage.size_in_bytes().ok_or_else(|| {
            ContainerError::UnsupportedType(format!("{} datasets hold text, not numbers", storage))
        })?;
        let (parent, name) = split_parent(path)?;
        if parent_group_mut(&mut self.root, &parent, path)?
            .children
            .contains_key(&name)
        {
            return Err(ContainerError::AlreadyExists(path.to_string()));
        }

        let bytes = space.num_elements() * element_size as u64;
        let layout = match &props.layout {
            LayoutKind::Compact if bytes <= MAX_COMPACT_BYTES as u64 => DataLayout::Compact {
                data: vec![0; bytes as usize],
            },
            LayoutKind::Compact | LayoutKind::Contiguous => {
                if props.layout == LayoutKind::Compact {
                    debug!("{} bytes are too many for a compact dataset, storing {} contiguously", bytes, path);
                }
                DataLayout::Contiguous {
                    offset: storage::allocate(self.io.as_mut(), &mut self.eof, bytes)?,
                    len: bytes,
                }
            }
            LayoutKind::Chunked { chunk_dims } => {
                let chunk_dims = chunk_dims
                    .clone()
                    .unwrap_or_else(|| ChunkGrid::slab_chunk_dims(space.dims()));
                let grid = ChunkGrid::new(space.dims(), &chunk_dims)?;
                if chunk_dims.iter().any(|&d| d > u32::MAX as u64)
                    || grid.chunk_bytes(element_size) as u64 > u32::MAX as u64
                {
                    return Err(ContainerError::DimensionMismatch(format!(
                        "chunk shape {:?} exceeds 4 GiB per chunk",
                        chunk_dims
                    )));
                }
                DataLayout::Chunked {
                    chunk_dims,
                    compression: props.compression,
                    level: props.level,
                    chunks: vec![None; grid.total_chunks() as usize],
                }
            }
        };

        debug!(
            "created {} dataset {} {:?} ({})",
            storage,
            path,
            space.dims(),
            layout.name()
        );
        let dataset = DatasetNode {
            type_code: storage.code(),
            dims: space.dims().to_vec(),
            layout,
            attributes: BTreeMap::new(),
        };
        parent_group_mut(&mut self.root, &parent, path)?
            .children
            .insert(name, Node::Dataset(dataset));
        self.dirty = true;
        Ok(())
    }

    fn dataset(&self, path: &str) -> Result<&DatasetNode> {
        lookup_dataset(&self.root, path)
    }

    pub fn dataset_type_code(&self, path: &str) -> Result<u8> {
        Ok(self.dataset(path)?.type_code)
    }

    pub fn dataset_storage_type(&self, path: &str) -> Result<StorageType> {
        self.dataset(path)?.storage_type()
    }

    pub fn dataset_space(&self, path: &str) -> Result<Dataspace> {
        Ok(Dataspace::simple(self.dataset(path)?.dims.clone()))
    }

    /// Name of the dataset's storage layout
    pub fn dataset_layout(&self, path: &str) -> Result<&'static str> {
        Ok(self.dataset(path)?.layout.name())
    }

    // ---- Attributes ----

    fn attributes_of(&self, path: &str) -> Result<&BTreeMap<String, Attribute>> {
        let segments = elements_of(path);
        if segments.is_empty() {
            return Ok(&self.root.attributes);
        }
        self.root
            .find(&segments)
            .map(Node::attributes)
            .ok_or_else(|| ContainerError::PathNotFound(path.to_string()))
    }

    pub fn attribute_exists(&self, path: &str, name: &str) -> Result<bool> {
        Ok(self.attributes_of(path)?.contains_key(name))
    }

    /// Attach an attribute to a group or dataset; existing attributes are never replaced
    pub fn create_attribute(&mut self, path: &str, name: &str, attribute: Attribute) -> Result<()> {
        self.ensure_writable()?;
        let segments = elements_of(path);
        let attributes = if segments.is_empty() {
            &mut self.root.attributes
        } else {
            self.root
                .find_mut(&segments)
                .map(Node::attributes_mut)
                .ok_or_else(|| ContainerError::PathNotFound(path.to_string()))?
        };
        if attributes.contains_key(name) {
            return Err(ContainerError::AlreadyExists(format!(
                "attribute {} on {}",
                name, path
            )));
        }
        attributes.insert(name.to_string(), attribute);
        self.dirty = true;
        Ok(())
    }

    pub fn attribute(&self, path: &str, name: &str) -> Result<&Attribute> {
        self.attributes_of(path)?
            .get(name)
            .ok_or_else(|| ContainerError::NotFound(format!("attribute {} on {}", name, path)))
    }

    pub fn attribute_names(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.attributes_of(path)?.keys().cloned().collect())
    }

    // ---- Data ----

    /// Read a selection as little-endian storage bytes
    pub fn read(&mut self, path: &str, slab: &Hyperslab) -> Result<Vec<u8>> {
        let element_size = element_size(self.dataset(path)?)?;
        let mut out = vec![0u8; slab.num_elements() as usize * element_size];
        self.read_into(path, slab, &mut out)?;
        Ok(out)
    }

    /// Read a selection into `out`, which must match the selection size exactly
    pub fn read_into(&mut self, path: &str, slab: &Hyperslab, out: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        let dataset = lookup_dataset(&self.root, path)?;
        slab.validate(&Dataspace::simple(dataset.dims.clone()))?;
        check_buffer(dataset, slab, out.len())?;
        storage::read_selection(self.io.as_mut(), dataset, slab, out)
    }

    /// Write little-endian storage bytes into a selection
    pub fn write(&mut self, path: &str, slab: &Hyperslab, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let dataset = lookup_dataset_mut(&mut self.root, path)?;
        slab.validate(&Dataspace::simple(dataset.dims.clone()))?;
        check_buffer(dataset, slab, data.len())?;
        if let DataLayout::Contiguous { offset, len } = &mut dataset.layout {
            // Storage of datasets read from other writers may not exist yet
            if *offset == UNDEFINED_ADDRESS {
                *offset = storage::allocate(self.io.as_mut(), &mut self.eof, *len)?;
            }
        }
        storage::write_selection(self.io.as_mut(), &mut self.eof, dataset, slab, data)?;
        self.dirty = true;
        Ok(())
    }

    /// Create a one-dimensional text dataset holding `values`
    pub fn write_strings(&mut self, path: &str, values: &[String]) -> Result<()> {
        self.ensure_writable()?;
        let (parent, name) = split_parent(path)?;
        let group = parent_group_mut(&mut self.root, &parent, path)?;
        if group.children.contains_key(&name) {
            return Err(ContainerError::AlreadyExists(path.to_string()));
        }

        group.children.insert(
            name,
            Node::Dataset(DatasetNode {
                type_code: StorageType::VarString.code(),
                dims: vec![values.len() as u64],
                layout: DataLayout::Compact {
                    data: pack_strings(values),
                },
                attributes: BTreeMap::new(),
            }),
        );
        self.dirty = true;
        Ok(())
    }

    /// Read every entry of a text dataset
    pub fn read_strings(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let dataset = self.dataset(path)?;
        match (&dataset.layout, dataset.storage_type()?) {
            (DataLayout::Compact { data }, StorageType::VarString) => {
                unpack_strings(data, dataset.num_elements())
                    .map_err(|e| ContainerError::ContainerIo(format!("{}: {}", path, e)))
            }
            _ => Err(ContainerError::ContainerIo(format!(
                "{} is not a text dataset",
                path
            ))),
        }
    }

    // ---- Lifecycle ----

    /// Commit the object tree so the file reflects every change so far.
    ///
    /// Metadata is appended past everything already written; the superblock
    /// is rewritten last.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.mode.is_writable() || !self.dirty {
            return Ok(());
        }

        self.modified = Utc::now();
        let times = HeaderTimes {
            modified: to_epoch(self.modified),
            created: to_epoch(self.created),
        };
        let start = self.eof.max(self.io.len()?);
        let (bytes, root) = encode_tree(&self.root, start, self.superblock.base, times)?;
        self.io.write_at(start, &bytes)?;
        let end = start + bytes.len() as u64;
        if self.access.sync_on_flush {
            self.io.sync()?;
        }

        self.superblock = Superblock {
            version: 2,
            eof: end,
            root,
            ..self.superblock
        };
        self.io.write_at(self.superblock.location, &self.superblock.encode())?;
        if self.access.sync_on_flush {
            self.io.sync()?;
        }
        self.eof = end;
        self.dirty = false;
        debug!(
            "committed {} ({} metadata bytes at {}, root group at {})",
            self.io.location(),
            bytes.len(),
            start,
            root
        );
        Ok(())
    }

    /// Flush and release the container; later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush();
        self.closed = true;
        info!("closed container {}", self.io.location());
        flushed
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if !self.closed && self.mode.is_writable() && self.dirty {
            if let Err(e) = self.flush() {
                warn!("failed to flush {} on drop: {}", self.io.location(), e);
            }
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("location", &self.io.location())
            .field("mode", &self.mode)
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish()
    }
}

fn to_epoch(time: DateTime<Utc>) -> u32 {
    u32::try_from(time.timestamp()).unwrap_or(0)
}

fn from_epoch(seconds: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds as i64, 0).unwrap_or_default()
}

fn element_size(dataset: &DatasetNode) -> Result<usize> {
    let storage = dataset.storage_type()?;
    storage
        .size_in_bytes()
        .ok_or_else(|| ContainerError::UnsupportedType(format!("{} has no fixed element size", storage)))
}

fn check_buffer(dataset: &DatasetNode, slab: &Hyperslab, len: usize) -> Result<()> {
    let expected = slab.num_elements() as usize * element_size(dataset)?;
    if len != expected {
        return Err(ContainerError::DimensionMismatch(format!(
            "buffer holds {} bytes, selection needs {}",
            len, expected
        )));
    }
    Ok(())
}

fn split_parent(path: &str) -> Result<(Vec<String>, String)> {
    let mut segments = elements_of(path);
    match segments.pop() {
        Some(name) => Ok((segments, name)),
        None => Err(ContainerError::AlreadyExists("/".to_string())),
    }
}

fn parent_group_mut<'a>(
    root: &'a mut GroupNode,
    parent: &[String],
    path: &str,
) -> Result<&'a mut GroupNode> {
    root.find_group_mut(parent)
        .ok_or_else(|| ContainerError::PathNotFound(format!("parent group of {}", path)))
}

fn lookup_dataset<'a>(root: &'a GroupNode, path: &str) -> Result<&'a DatasetNode> {
    match root.find(&elements_of(path)) {
        Some(Node::Dataset(dataset)) => Ok(dataset),
        Some(Node::Group(_)) => Err(ContainerError::ContainerIo(format!(
            "{} is a group, not a dataset",
            path
        ))),
        None => Err(ContainerError::PathNotFound(path.to_string())),
    }
}

fn lookup_dataset_mut<'a>(root: &'a mut GroupNode, path: &str) -> Result<&'a mut DatasetNode> {
    match root.find_mut(&elements_of(path)) {
        Some(Node::Dataset(dataset)) => Ok(dataset),
        Some(Node::Group(_)) => Err(ContainerError::ContainerIo(format!(
            "{} is a group, not a dataset",
            path
        ))),
        None => Err(ContainerError::PathNotFound(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{decode_elements, encode_elements};
    use tempfile::TempDir;

    fn volume(container: &mut Container, path: &str, props: &DatasetCreateProps) {
        container
            .create_dataset(path, StorageType::I16, &Dataspace::simple(vec![3, 4]), props)
            .unwrap();
        let values: Vec<i16> = (0..12).map(|v| v * 100 - 500).collect();
        let all = Hyperslab::all(&Dataspace::simple(vec![3, 4]));
        container.write(path, &all, &encode_elements(&values)).unwrap();
    }

    #[test]
    fn test_create_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan.h5");

        {
            let mut container = Container::create(&path, AccessProperties::default()).unwrap();
            container.create_group("/scan").unwrap();
            volume(&mut container, "/scan/contiguous", &DatasetCreateProps::default());
            volume(
                &mut container,
                "/scan/chunked",
                &DatasetCreateProps::chunked(None).with_compression(CompressionMethod::Zstd, CompressionLevel::new(3)),
            );
            container
                .create_attribute("/scan/chunked", "Units", Attribute::text("HU"))
                .unwrap();
            container.close().unwrap();
        }

        assert!(Container::probe(&path));
        let mut container =
            Container::open(&path, AccessMode::ReadOnly, AccessProperties::default()).unwrap();
        assert_eq!(container.children("/scan").unwrap(), vec!["chunked", "contiguous"]);
        assert_eq!(container.dataset_layout("/scan/chunked").unwrap(), "chunked");
        assert_eq!(
            container.attribute("/scan/chunked", "Units").unwrap().as_text().unwrap(),
            "HU"
        );

        let all = Hyperslab::all(&container.dataset_space("/scan/contiguous").unwrap());
        for name in ["/scan/contiguous", "/scan/chunked"] {
            let values: Vec<i16> = decode_elements(&container.read(name, &all).unwrap()).unwrap();
            assert_eq!(values[0], -500);
            assert_eq!(values[11], 600);
        }
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ro.h5");
        Container::create(&path, AccessProperties::default()).unwrap();

        let mut container =
            Container::open(&path, AccessMode::ReadOnly, AccessProperties::default()).unwrap();
        assert!(matches!(
            container.create_group("/a"),
            Err(ContainerError::ContainerIo(_))
        ));
        assert!(container.flush().is_ok());
    }

    #[test]
    fn test_open_missing_and_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.h5");
        assert!(matches!(
            Container::open(&missing, AccessMode::ReadOnly, AccessProperties::default()),
            Err(ContainerError::NotFound(_))
        ));
        assert!(!Container::probe(&missing));

        let foreign = temp_dir.path().join("foreign.h5");
        std::fs::write(&foreign, b"plain text, definitely not a container file").unwrap();
        assert!(matches!(
            Container::open(&foreign, AccessMode::ReadOnly, AccessProperties::default()),
            Err(ContainerError::NotAContainer(_))
        ));
        assert!(!Container::probe(&foreign));
    }

    #[test]
    fn test_groups_and_unlink() {
        let mut container = Container::in_memory().unwrap();
        assert!(container.exists("/"));
        assert!(matches!(
            container.create_group("/a/b"),
            Err(ContainerError::PathNotFound(_))
        ));
        container.create_group("/a").unwrap();
        container.create_group("/a/b").unwrap();
        assert!(matches!(
            container.create_group("/a"),
            Err(ContainerError::AlreadyExists(_))
        ));
        assert!(container.is_group("/a/b"));
        assert!(!container.is_dataset("/a/b"));

        container.unlink("/a").unwrap();
        assert!(!container.exists("/a/b"));
        assert!(matches!(container.unlink("/a"), Err(ContainerError::NotFound(_))));
    }

    #[test]
    fn test_attributes_are_never_replaced() {
        let mut container = Container::in_memory().unwrap();
        volume(&mut container, "/image", &DatasetCreateProps::compact());
        container
            .create_attribute("/image", "Spacing", Attribute::vector(StorageType::F64, &[1.0f64, 2.0]))
            .unwrap();
        assert!(container.attribute_exists("/image", "Spacing").unwrap());
        assert!(matches!(
            container.create_attribute("/image", "Spacing", Attribute::flag(true)),
            Err(ContainerError::AlreadyExists(_))
        ));
        assert!(matches!(
            container.attribute("/image", "Origin"),
            Err(ContainerError::NotFound(_))
        ));
        assert!(matches!(
            container.attribute_exists("/missing", "Origin"),
            Err(ContainerError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_strings() {
        let mut container = Container::in_memory().unwrap();
        let values = vec!["patient".to_string(), String::new(), "µm".to_string()];
        container.write_strings("/names", &values).unwrap();
        assert_eq!(container.read_strings("/names").unwrap(), values);
        assert_eq!(container.dataset_space("/names").unwrap().dims(), &[3]);
        assert!(container.write_strings("/names", &values).is_err());
        assert!(matches!(
            container.create_dataset(
                "/text",
                StorageType::VarString,
                &Dataspace::simple(vec![1]),
                &DatasetCreateProps::default()
            ),
            Err(ContainerError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_buffer_size_is_checked() {
        let mut container = Container::in_memory().unwrap();
        volume(&mut container, "/image", &DatasetCreateProps::default());
        let all = Hyperslab::all(&Dataspace::simple(vec![3, 4]));
        assert!(matches!(
            container.write("/image", &all, &[0u8; 10]),
            Err(ContainerError::DimensionMismatch(_))
        ));
        let outside = Hyperslab::new(vec![2, 0], vec![2, 4], vec![1, 1]);
        assert!(container.read("/image", &outside).is_err());
    }

    #[test]
    fn test_allocation_after_flush_reads_zeros() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("grow.h5");
        let mut container = Container::create(&path, AccessProperties::default()).unwrap();
        volume(&mut container, "/first", &DatasetCreateProps::default());
        container.flush().unwrap();

        // The new extent starts past the metadata committed above
        container
            .create_dataset("/second", StorageType::U8, &Dataspace::simple(vec![4096]), &DatasetCreateProps::default())
            .unwrap();
        let all = Hyperslab::all(&Dataspace::simple(vec![4096]));
        assert!(container.read("/second", &all).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unflushed_allocation_keeps_committed_tree() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("crash.h5");
        let mut container = Container::create(&path, AccessProperties::default()).unwrap();
        container.create_group("/scan").unwrap();
        container.flush().unwrap();

        container
            .create_dataset("/scan/volume", StorageType::U8, &Dataspace::simple(vec![4096]), &DatasetCreateProps::default())
            .unwrap();
        // Simulate a crash: no flush, no drop
        std::mem::forget(container);

        assert!(Container::probe(&path));
        let reopened = Container::open(&path, AccessMode::ReadOnly, AccessProperties::default()).unwrap();
        assert!(reopened.is_group("/scan"));
        assert!(!reopened.exists("/scan/volume"));
    }

    #[test]
    fn test_every_commit_stays_readable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("commits.h5");
        {
            let mut container = Container::create(&path, AccessProperties::default()).unwrap();
            volume(&mut container, "/first", &DatasetCreateProps::default());
            container.close().unwrap();
        }
        let committed = std::fs::read(&path).unwrap();
        {
            let mut container =
                Container::open(&path, AccessMode::ReadWrite, AccessProperties::default()).unwrap();
            volume(&mut container, "/second", &DatasetCreateProps::chunked(None));
            container.create_attribute("/", "Title", Attribute::text("phantom")).unwrap();
            container.close().unwrap();
        }

        // Only the superblock changed among the bytes committed first
        let grown = std::fs::read(&path).unwrap();
        assert!(grown.len() > committed.len());
        assert_eq!(&grown[SUPERBLOCK_SIZE as usize..committed.len()], &committed[SUPERBLOCK_SIZE as usize..]);

        let mut container = Container::open(&path, AccessMode::ReadOnly, AccessProperties::default()).unwrap();
        assert_eq!(container.children("/").unwrap(), vec!["first", "second"]);
        assert_eq!(container.attribute("/", "Title").unwrap().as_text().unwrap(), "phantom");
        let all = Hyperslab::all(&Dataspace::simple(vec![3, 4]));
        let values: Vec<i16> = decode_elements(&container.read("/first", &all).unwrap()).unwrap();
        assert_eq!(values[11], 600);
        assert!(container.created() <= container.modified());
    }

    #[test]
    fn test_files_are_hdf5() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("signature.h5");
        Container::create(&path, AccessProperties::default()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89HDF\r\n\x1a\n");

        // Written by an older library: version 0 superblock, symbol table groups
        let legacy = temp_dir.path().join("legacy.h5");
        std::fs::write(&legacy, codec::legacy_file()).unwrap();
        assert!(Container::probe(&legacy));
        let container = Container::open(&legacy, AccessMode::ReadOnly, AccessProperties::default()).unwrap();
        assert!(container.is_group("/scan"));
    }

    #[test]
    fn test_signature_without_objects_is_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hollow.h5");
        let mut bytes = format::HDF5_SIGNATURE.to_vec();
        bytes.resize(2048, 0);
        std::fs::write(&path, &bytes).unwrap();
        assert!(!Container::probe(&path));
        assert!(Container::open(&path, AccessMode::ReadOnly, AccessProperties::default()).is_err());
    }

    #[test]
    fn test_oversized_compact_falls_back_to_contiguous() {
        let mut container = Container::in_memory().unwrap();
        container
            .create_dataset(
                "/large",
                StorageType::F64,
                &Dataspace::simple(vec![10_000]),
                &DatasetCreateProps::compact(),
            )
            .unwrap();
        assert_eq!(container.dataset_layout("/large").unwrap(), "contiguous");
        volume(&mut container, "/small", &DatasetCreateProps::compact());
        assert_eq!(container.dataset_layout("/small").unwrap(), "compact");
    }

    #[test]
    fn test_drop_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dropped.h5");
        {
            let mut container = Container::create(&path, AccessProperties { sync_on_flush: true }).unwrap();
            container.create_group("/kept").unwrap();
        }
        let container =
            Container::open(&path, AccessMode::ReadOnly, AccessProperties::default()).unwrap();
        assert!(container.is_group("/kept"));
    }

    #[test]
    fn test_closed_container_rejects_io() {
        let mut container = Container::in_memory().unwrap();
        container.close().unwrap();
        assert!(container.is_closed());
        assert!(container.close().is_ok());
        assert!(container.read_strings("/x").is_err());
    }
}
