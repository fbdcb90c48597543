//! HDF5 superblock: signature search, parsing and encoding
//!
//! Files written here carry a version 2 superblock with 8-byte addresses and
//! lengths. Versions 0 through 3 are read.

use crate::error::{ContainerError, Result};
use crate::io::BlockIo;
use crate::utils::jenkins_lookup3;
use byteorder::{ByteOrder, LittleEndian};

/// Format signature at the start of the superblock
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// The "no address" marker
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Width of every address and length this crate writes
pub const OFFSET_SIZE: usize = 8;

/// Encoded size of a version 2 superblock
pub const SUPERBLOCK_SIZE: u64 = 48;

/// Newest superblock version that can be read
pub const MAX_SUPERBLOCK_VERSION: u8 = 3;

/// Longest superblock encoding (version 1 with its root symbol table entry)
const MAX_SUPERBLOCK_SIZE: u64 = 128;

/// Where the root group lives and how far the file's metadata reaches.
///
/// Addresses are absolute file offsets; the file stores them relative to
/// `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub version: u8,
    /// Offset of the signature
    pub location: u64,
    pub base: u64,
    pub eof: u64,
    pub root: u64,
}

impl Superblock {
    /// Version 2 superblock for a file without a user block
    pub fn new(eof: u64, root: u64) -> Self {
        Self {
            version: 2,
            location: 0,
            base: 0,
            eof,
            root,
        }
    }

    /// Locate and parse the superblock of `io`
    pub fn read(io: &mut dyn BlockIo) -> Result<Self> {
        let location = find_signature(io)?.ok_or_else(|| {
            ContainerError::NotAContainer(format!("{} has no HDF5 signature", io.location()))
        })?;
        let bytes = read_clamped(io, location, MAX_SUPERBLOCK_SIZE)?;
        Self::decode(&bytes, location)
    }

    /// Parse superblock bytes found at `location`
    pub fn decode(d: &[u8], location: u64) -> Result<Self> {
        if !has_signature(d) || d.len() < 12 {
            return Err(ContainerError::NotAContainer(
                "missing HDF5 signature".to_string(),
            ));
        }

        let version = d[8];
        let superblock = match version {
            0 | 1 => {
                check_sizes(d[13], d[14])?;
                // Version 1 adds the indexed storage K and two reserved bytes
                let mut pos = if version == 0 { 24 } else { 28 };
                ensure_len(d, pos + 4 * OFFSET_SIZE + 2 * OFFSET_SIZE)?;
                let base = LittleEndian::read_u64(&d[pos..]);
                pos += 2 * OFFSET_SIZE;
                let eof = LittleEndian::read_u64(&d[pos..]);
                pos += 2 * OFFSET_SIZE;
                // Root symbol table entry: link name offset, then object header address
                let root = LittleEndian::read_u64(&d[pos + OFFSET_SIZE..]);
                Self {
                    version,
                    location,
                    base,
                    eof: base + eof,
                    root: base + root,
                }
            }
            2 | 3 => {
                check_sizes(d[9], d[10])?;
                let checksum_at = 12 + 4 * OFFSET_SIZE;
                ensure_len(d, checksum_at + 4)?;
                let stored = LittleEndian::read_u32(&d[checksum_at..]);
                if jenkins_lookup3(&d[..checksum_at]) != stored {
                    return Err(ContainerError::ContainerIo(
                        "superblock checksum mismatch".to_string(),
                    ));
                }
                let base = LittleEndian::read_u64(&d[12..]);
                let eof = LittleEndian::read_u64(&d[28..]);
                let root = LittleEndian::read_u64(&d[36..]);
                Self {
                    version,
                    location,
                    base,
                    eof: base + eof,
                    root: base + root,
                }
            }
            other => return Err(ContainerError::UnsupportedVersion(other as u32)),
        };
        Ok(superblock)
    }

    /// Version 2 encoding; the written version is always 2
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE as usize] {
        let mut out = [0u8; SUPERBLOCK_SIZE as usize];
        out[..8].copy_from_slice(&HDF5_SIGNATURE);
        out[8] = 2;
        out[9] = OFFSET_SIZE as u8;
        out[10] = OFFSET_SIZE as u8;
        LittleEndian::write_u64(&mut out[12..], self.base);
        LittleEndian::write_u64(&mut out[20..], UNDEFINED_ADDRESS);
        LittleEndian::write_u64(&mut out[28..], self.eof - self.base);
        LittleEndian::write_u64(&mut out[36..], self.root - self.base);
        let checksum = jenkins_lookup3(&out[..44]);
        LittleEndian::write_u32(&mut out[44..], checksum);
        out
    }

    /// Offset right after the encoded superblock
    pub fn end(&self) -> u64 {
        self.location + SUPERBLOCK_SIZE
    }
}

fn check_sizes(offset_size: u8, length_size: u8) -> Result<()> {
    if offset_size as usize != OFFSET_SIZE || length_size as usize != OFFSET_SIZE {
        return Err(ContainerError::ContainerIo(format!(
            "{}-byte addresses and {}-byte lengths are not supported",
            offset_size, length_size
        )));
    }
    Ok(())
}

fn ensure_len(d: &[u8], len: usize) -> Result<()> {
    if d.len() < len {
        return Err(ContainerError::ContainerIo(format!(
            "superblock is truncated ({} of {} bytes)",
            d.len(),
            len
        )));
    }
    Ok(())
}

/// Check the leading signature bytes
pub fn has_signature(bytes: &[u8]) -> bool {
    bytes.len() >= HDF5_SIGNATURE.len() && bytes[..HDF5_SIGNATURE.len()] == HDF5_SIGNATURE
}

/// Offset of the signature: 0, then 512 and every doubling past it
pub fn find_signature(io: &mut dyn BlockIo) -> Result<Option<u64>> {
    let len = io.len()?;
    let mut offset = 0u64;
    let mut signature = [0u8; 8];
    while offset + HDF5_SIGNATURE.len() as u64 <= len {
        io.read_at(offset, &mut signature)?;
        if has_signature(&signature) {
            return Ok(Some(offset));
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    Ok(None)
}

/// Up to `max` bytes from `offset`, fewer when the file ends first
pub fn read_clamped(io: &mut dyn BlockIo, offset: u64, max: u64) -> Result<Vec<u8>> {
    let len = io.len()?;
    if offset >= len {
        return Err(ContainerError::ContainerIo(format!(
            "address {} lies past the end of {}",
            offset,
            io.location()
        )));
    }
    let mut out = vec![0u8; max.min(len - offset) as usize];
    io.read_at(offset, &mut out)?;
    Ok(out)
}

/// Read exactly `len` bytes at `offset`
pub fn read_exact(io: &mut dyn BlockIo, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    io.read_at(offset, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryBlockIo;

    #[test]
    fn test_superblock_round_trip() {
        let superblock = Superblock::new(4096, 48);
        let encoded = superblock.encode();
        assert!(has_signature(&encoded));
        assert_eq!(encoded[8], 2);
        assert_eq!(Superblock::decode(&encoded, 0).unwrap(), superblock);
    }

    #[test]
    fn test_checksum_is_verified() {
        let mut encoded = Superblock::new(4096, 48).encode();
        encoded[30] ^= 0x01;
        assert!(matches!(
            Superblock::decode(&encoded, 0),
            Err(ContainerError::ContainerIo(_))
        ));
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        let bytes = [0u8; SUPERBLOCK_SIZE as usize];
        assert!(matches!(
            Superblock::decode(&bytes, 0),
            Err(ContainerError::NotAContainer(_))
        ));
        assert!(has_signature(b"\x89HDF\r\n\x1a\n"));
        assert!(!has_signature(b"\x89HDC\r\n\x1a\n"));
    }

    #[test]
    fn test_rejects_future_version() {
        let mut encoded = Superblock::new(4096, 48).encode();
        encoded[8] = 7;
        assert!(matches!(
            Superblock::decode(&encoded, 0),
            Err(ContainerError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_version_0_superblock() {
        let mut d = Vec::new();
        d.extend_from_slice(&HDF5_SIGNATURE);
        d.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        d.extend_from_slice(&4u16.to_le_bytes());
        d.extend_from_slice(&16u16.to_le_bytes());
        d.extend_from_slice(&0u32.to_le_bytes());
        for value in [0u64, UNDEFINED_ADDRESS, 2048, UNDEFINED_ADDRESS, 0, 96] {
            d.extend_from_slice(&value.to_le_bytes());
        }
        d.extend_from_slice(&[0u8; 24]);

        let superblock = Superblock::decode(&d, 0).unwrap();
        assert_eq!(superblock.version, 0);
        assert_eq!(superblock.eof, 2048);
        assert_eq!(superblock.root, 96);
    }

    #[test]
    fn test_signature_after_user_block() {
        let mut bytes = vec![0u8; 1024];
        bytes[512..520].copy_from_slice(&HDF5_SIGNATURE);
        let mut io = MemoryBlockIo::from_bytes(bytes);
        assert_eq!(find_signature(&mut io).unwrap(), Some(512));

        let mut io = MemoryBlockIo::from_bytes(vec![0u8; 4096]);
        assert_eq!(find_signature(&mut io).unwrap(), None);
    }

    #[test]
    fn test_read_clamped_stops_at_end() {
        let mut io = MemoryBlockIo::from_bytes(vec![7u8; 10]);
        assert_eq!(read_clamped(&mut io, 4, 128).unwrap(), vec![7u8; 6]);
        assert!(read_clamped(&mut io, 10, 1).is_err());
    }
}
