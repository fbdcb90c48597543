//! Byte order, element casting and checksum helpers

use crate::error::{ContainerError, Result};
use crate::types::{Element, StorageType};
use num_traits::NumCast;

/// Convert little-endian storage bytes to typed data
pub fn decode_elements<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(ContainerError::ContainerIo(
            "Byte length not aligned with element size".to_string(),
        ));
    }

    Ok(bytes.chunks_exact(size).map(T::read_le).collect())
}

/// Convert typed data to little-endian storage bytes
pub fn encode_elements<T: Element>(data: &[T]) -> Vec<u8> {
    let size = std::mem::size_of::<T>();
    let mut bytes = vec![0u8; data.len() * size];
    for (value, out) in data.iter().zip(bytes.chunks_exact_mut(size)) {
        value.write_le(out);
    }
    bytes
}

/// Swap a buffer of `element_size`-byte elements between native and storage order
pub fn to_storage_order(buffer: &mut [u8], element_size: usize) {
    if cfg!(target_endian = "big") && element_size > 1 {
        for element in buffer.chunks_exact_mut(element_size) {
            element.reverse();
        }
    }
}

/// Storage order is little-endian, so the conversion is its own inverse
pub fn to_native_order(buffer: &mut [u8], element_size: usize) {
    to_storage_order(buffer, element_size)
}

/// Decode numbers stored as `storage` and cast them to `T`.
///
/// Fails instead of truncating when a stored value does not fit in `T`.
pub fn cast_elements<T: NumCast>(storage: StorageType, bytes: &[u8]) -> Result<Vec<T>> {
    fn cast_all<S: Element + NumCast, T: NumCast>(bytes: &[u8]) -> Result<Vec<T>> {
        decode_elements::<S>(bytes)?
            .into_iter()
            .map(|v| {
                T::from(v).ok_or_else(|| {
                    ContainerError::ContainerIo(
                        "stored value is not representable in the requested type".to_string(),
                    )
                })
            })
            .collect()
    }

    match storage {
        StorageType::I8 => cast_all::<i8, T>(bytes),
        StorageType::U8 | StorageType::Bool => cast_all::<u8, T>(bytes),
        StorageType::I16 => cast_all::<i16, T>(bytes),
        StorageType::U16 => cast_all::<u16, T>(bytes),
        StorageType::I32 => cast_all::<i32, T>(bytes),
        StorageType::U32 => cast_all::<u32, T>(bytes),
        StorageType::I64 => cast_all::<i64, T>(bytes),
        StorageType::U64 => cast_all::<u64, T>(bytes),
        StorageType::F32 => cast_all::<f32, T>(bytes),
        StorageType::F64 => cast_all::<f64, T>(bytes),
        StorageType::F16 | StorageType::F128 | StorageType::VarString => {
            Err(ContainerError::UnrecognizedStorageType(format!(
                "{} is not a numeric storage type",
                storage
            )))
        }
    }
}

/// Reverse axis order at the fastest-first / slowest-first boundary
pub fn reverse_axes<T: Clone>(values: &[T]) -> Vec<T> {
    values.iter().rev().cloned().collect()
}

/// Jenkins lookup3 `hashlittle` with a zero seed, the checksum HDF5 puts on
/// superblocks, object headers and continuation chunks
pub fn jenkins_lookup3(data: &[u8]) -> u32 {
    fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
        *a = a.wrapping_sub(*c);
        *a ^= c.rotate_left(4);
        *c = c.wrapping_add(*b);
        *b = b.wrapping_sub(*a);
        *b ^= a.rotate_left(6);
        *a = a.wrapping_add(*c);
        *c = c.wrapping_sub(*b);
        *c ^= b.rotate_left(8);
        *b = b.wrapping_add(*a);
        *a = a.wrapping_sub(*c);
        *a ^= c.rotate_left(16);
        *c = c.wrapping_add(*b);
        *b = b.wrapping_sub(*a);
        *b ^= a.rotate_left(19);
        *a = a.wrapping_add(*c);
        *c = c.wrapping_sub(*b);
        *c ^= b.rotate_left(4);
        *b = b.wrapping_add(*a);
    }

    fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
        *c ^= *b;
        *c = c.wrapping_sub(b.rotate_left(14));
        *a ^= *c;
        *a = a.wrapping_sub(c.rotate_left(11));
        *b ^= *a;
        *b = b.wrapping_sub(a.rotate_left(25));
        *c ^= *b;
        *c = c.wrapping_sub(b.rotate_left(16));
        *a ^= *c;
        *a = a.wrapping_sub(c.rotate_left(4));
        *b ^= *a;
        *b = b.wrapping_sub(a.rotate_left(14));
        *c ^= *b;
        *c = c.wrapping_sub(b.rotate_left(24));
    }

    fn word(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    let init = 0xdeadbeefu32.wrapping_add(data.len() as u32);
    let (mut a, mut b, mut c) = (init, init, init);
    if data.is_empty() {
        return c;
    }

    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(word(&rest[0..4]));
        b = b.wrapping_add(word(&rest[4..8]));
        c = c.wrapping_add(word(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    // Missing tail bytes count as zero
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(word(&tail[0..4]));
    b = b.wrapping_add(word(&tail[4..8]));
    c = c.wrapping_add(word(&tail[8..12]));
    final_mix(&mut a, &mut b, &mut c);
    c
}

pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    jenkins_lookup3(data) == expected
}

/// Binary-prefixed size, as shown in image summaries
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_conversion() {
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let bytes = encode_elements(&data);
        assert_eq!(bytes.len(), data.len() * 4);

        let recovered: Vec<f32> = decode_elements(&bytes).unwrap();
        assert_eq!(data, recovered);
        assert!(decode_elements::<u32>(&bytes[..5]).is_err());
    }

    #[test]
    fn test_cast_elements_widens() {
        let bytes = encode_elements(&[1.5f32, -2.0]);
        let widened: Vec<f64> = cast_elements(StorageType::F32, &bytes).unwrap();
        assert_eq!(widened, vec![1.5, -2.0]);

        let bytes = encode_elements(&[3u16, 4, 5]);
        let dims: Vec<u64> = cast_elements(StorageType::U16, &bytes).unwrap();
        assert_eq!(dims, vec![3, 4, 5]);
    }

    #[test]
    fn test_cast_elements_rejects_overflow() {
        let bytes = encode_elements(&[-1i32]);
        assert!(cast_elements::<u64>(StorageType::I32, &bytes).is_err());
        assert!(cast_elements::<u64>(StorageType::VarString, &bytes).is_err());
    }

    #[test]
    fn test_reverse_axes() {
        assert_eq!(reverse_axes(&[10u64, 20, 30]), vec![30, 20, 10]);
        assert!(reverse_axes::<u64>(&[]).is_empty());
    }

    #[test]
    fn test_checksum() {
        assert_eq!(jenkins_lookup3(b""), 0xdeadbeef);
        assert_eq!(jenkins_lookup3(b"Four score and seven years ago"), 0x17770551);

        let data = b"Hello, world!";
        let checksum = jenkins_lookup3(data);
        assert!(verify_checksum(data, checksum));
        assert!(!verify_checksum(data, checksum.wrapping_add(1)));
        // Every tail length takes the same path
        for len in 1..=24 {
            let bytes: Vec<u8> = (0..len as u8).collect();
            assert_ne!(jenkins_lookup3(&bytes), jenkins_lookup3(&bytes[..len - 1]));
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
