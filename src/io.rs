//! Positioned block I/O backends for container files

use crate::error::{ContainerError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How a container file was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Reads only; every mutation fails
    ReadOnly,
    /// Reads and writes
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }
}

/// Trait for positioned reads and writes against container storage
pub trait BlockIo: Send {
    /// Fill `buf` with the bytes starting at `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `offset`, growing the storage if needed
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current storage length in bytes
    fn len(&self) -> Result<u64>;

    /// Truncate or zero-extend the storage
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Push buffered writes to durable storage
    fn sync(&mut self) -> Result<()>;

    /// Human readable location, used in diagnostics
    fn location(&self) -> String;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// File system block I/O
pub struct FileBlockIo {
    file: File,
    path: PathBuf,
}

impl FileBlockIo {
    /// Open an existing file
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(mode.is_writable())
            .open(&path)?;
        Ok(Self { file, path })
    }

    /// Create a file, truncating any existing content
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockIo for FileBlockIo {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf).map_err(|e| {
            ContainerError::ContainerIo(format!(
                "read of {} bytes at {} in {}: {}",
                buf.len(),
                offset,
                self.path.display(),
                e
            ))
        })
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory block I/O
#[derive(Debug, Default, Clone)]
pub struct MemoryBlockIo {
    data: Vec<u8>,
}

impl MemoryBlockIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing bytes
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl BlockIo for MemoryBlockIo {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(ContainerError::ContainerIo(format!(
                "read of {} bytes at {} past end of {} byte buffer",
                buf.len(),
                offset,
                self.data.len()
            )));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_block_io() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blocks.bin");
        let mut io = FileBlockIo::create(&path).unwrap();

        io.write_at(4, b"voxel").unwrap();
        assert_eq!(io.len().unwrap(), 9);

        let mut buf = [0u8; 9];
        io.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"\0\0\0\0voxel");

        io.set_len(4).unwrap();
        assert!(io.read_at(0, &mut buf).is_err());
    }

    #[test]
    fn test_read_only_file_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ro.bin");
        std::fs::write(&path, b"abc").unwrap();

        let mut io = FileBlockIo::open(&path, AccessMode::ReadOnly).unwrap();
        assert!(io.write_at(0, b"x").is_err());
    }

    #[test]
    fn test_memory_block_io() {
        let mut io = MemoryBlockIo::new();
        assert!(io.is_empty().unwrap());
        io.write_at(2, &[1, 2]).unwrap();
        assert_eq!(io.len().unwrap(), 4);

        let mut buf = [9u8; 4];
        io.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 1, 2]);
        assert!(io.read_at(3, &mut buf).is_err());
        assert_eq!(io.into_bytes(), vec![0, 0, 1, 2]);
    }
}
