//! Chunk filters for chunked dataset storage
//!
//! Every chunk is filtered on its own, so a chunk can be decoded without
//! touching its neighbours. Decoding always knows the exact uncompressed size
//! from the chunk grid and rejects anything else.
//!
//! Deflate chunks are zlib streams (HDF5 filter 1). Zstandard chunks use the
//! registered HDF5 filter id 32015.

use crate::error::{ContainerError, Result};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// Highest accepted compression level
pub const MAXIMUM_COMPRESSION_LEVEL: u8 = 9;

/// Compression level used when none is configured
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 5;

/// HDF5 filter id of deflate
pub const DEFLATE_FILTER_ID: u16 = 1;

/// Registered HDF5 filter id of Zstandard
pub const ZSTD_FILTER_ID: u16 = 32015;

/// Filter applied to chunk payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    None = 0,
    /// zlib stream
    #[default]
    Deflate = 1,
    Zstd = 2,
}

impl CompressionMethod {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Deflate),
            2 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }

    /// HDF5 filter id; `None` stores chunks unfiltered
    pub fn filter_id(self) -> Option<u16> {
        match self {
            CompressionMethod::None => None,
            CompressionMethod::Deflate => Some(DEFLATE_FILTER_ID),
            CompressionMethod::Zstd => Some(ZSTD_FILTER_ID),
        }
    }

    pub fn from_filter_id(id: u16) -> Option<Self> {
        match id {
            DEFLATE_FILTER_ID => Some(CompressionMethod::Deflate),
            ZSTD_FILTER_ID => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }

    /// Codec implementing this method
    pub fn compressor(self) -> Box<dyn Compressor> {
        match self {
            CompressionMethod::None => Box::new(NoneCompressor),
            CompressionMethod::Deflate => Box::new(DeflateCompressor),
            CompressionMethod::Zstd => Box::new(ZstdCompressor),
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionMethod::None => "none",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// Compression level, 0 (fastest) to 9 (smallest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    /// Clamps to the accepted range
    pub fn new(level: u8) -> Self {
        Self(level.min(MAXIMUM_COMPRESSION_LEVEL))
    }

    pub fn best() -> Self {
        Self(MAXIMUM_COMPRESSION_LEVEL)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(DEFAULT_COMPRESSION_LEVEL)
    }
}

/// Encodes and decodes one chunk payload
pub trait Compressor: Send + Sync {
    fn compress(&self, chunk: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    /// Decode `stored` back into exactly `chunk_len` bytes
    fn decompress(&self, stored: &[u8], chunk_len: usize) -> Result<Vec<u8>>;

    fn method(&self) -> CompressionMethod;
}

fn check_chunk_len(method: CompressionMethod, decoded: Vec<u8>, chunk_len: usize) -> Result<Vec<u8>> {
    if decoded.len() != chunk_len {
        return Err(ContainerError::Decompression(format!(
            "{} chunk decoded to {} bytes, expected {}",
            method,
            decoded.len(),
            chunk_len
        )));
    }
    Ok(decoded)
}

/// Stores chunks as they are
#[derive(Debug, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, chunk: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(chunk.to_vec())
    }

    fn decompress(&self, stored: &[u8], chunk_len: usize) -> Result<Vec<u8>> {
        check_chunk_len(self.method(), stored.to_vec(), chunk_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn compress(&self, chunk: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(chunk, FlateCompression::new(level.value() as u32));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| ContainerError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, stored: &[u8], chunk_len: usize) -> Result<Vec<u8>> {
        let mut decoded = Vec::with_capacity(chunk_len);
        ZlibDecoder::new(stored)
            .read_to_end(&mut decoded)
            .map_err(|e| ContainerError::Decompression(e.to_string()))?;
        check_chunk_len(self.method(), decoded, chunk_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }
}

#[derive(Debug, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, chunk: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        zstd::encode_all(chunk, level.value() as i32)
            .map_err(|e| ContainerError::Compression(e.to_string()))
    }

    fn decompress(&self, stored: &[u8], chunk_len: usize) -> Result<Vec<u8>> {
        let decoded =
            zstd::decode_all(stored).map_err(|e| ContainerError::Decompression(e.to_string()))?;
        check_chunk_len(self.method(), decoded, chunk_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let compressor = CompressionMethod::None.compressor();
        let chunk = b"0123456789abcdef";
        let stored = compressor.compress(chunk, CompressionLevel::default()).unwrap();
        assert_eq!(stored, chunk);
        assert_eq!(compressor.decompress(&stored, 16).unwrap(), chunk);
        assert!(compressor.decompress(&stored, 8).is_err());
    }

    #[test]
    fn test_deflate_chunk() {
        let compressor = CompressionMethod::Deflate.compressor();
        let chunk = vec![7u8; 4096];
        let stored = compressor.compress(&chunk, CompressionLevel::default()).unwrap();
        assert!(stored.len() < chunk.len());
        assert_eq!(compressor.decompress(&stored, 4096).unwrap(), chunk);
    }

    #[test]
    fn test_zstd_chunk() {
        let compressor = CompressionMethod::Zstd.compressor();
        assert_eq!(compressor.method(), CompressionMethod::Zstd);
        let chunk = b"voxel ".repeat(200);
        let stored = compressor.compress(&chunk, CompressionLevel::best()).unwrap();
        assert!(stored.len() < chunk.len());
        assert_eq!(compressor.decompress(&stored, chunk.len()).unwrap(), chunk);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let compressor = CompressionMethod::Zstd.compressor();
        let stored = compressor.compress(&[1u8; 64], CompressionLevel::new(1)).unwrap();
        assert!(matches!(
            compressor.decompress(&stored, 65),
            Err(ContainerError::Decompression(_))
        ));
    }

    #[test]
    fn test_level_and_method_codes() {
        assert_eq!(CompressionLevel::new(42).value(), MAXIMUM_COMPRESSION_LEVEL);
        assert_eq!(CompressionLevel::default().value(), 5);
        assert_eq!(CompressionMethod::from_u8(2), Some(CompressionMethod::Zstd));
        assert_eq!(CompressionMethod::from_u8(3), None);
        assert_eq!(CompressionMethod::default().to_string(), "deflate");
        assert_eq!(CompressionMethod::Deflate.filter_id(), Some(1));
        assert_eq!(CompressionMethod::from_filter_id(32015), Some(CompressionMethod::Zstd));
        assert_eq!(CompressionMethod::None.filter_id(), None);
        assert_eq!(CompressionMethod::from_filter_id(2), None);
    }

    #[test]
    fn test_deflate_chunks_are_zlib_streams() {
        let stored = DeflateCompressor.compress(&[0u8; 256], CompressionLevel::default()).unwrap();
        // CMF byte of a 32 KiB window deflate stream, header check divisible by 31
        assert_eq!(stored[0], 0x78);
        assert_eq!(u16::from_be_bytes([stored[0], stored[1]]) % 31, 0);
    }

    #[test]
    fn test_corrupt_deflate_stream() {
        let result = DeflateCompressor.decompress(&[0xff, 0xff, 0xff, 0xff], 4);
        assert!(matches!(result, Err(ContainerError::Decompression(_))));
    }
}
