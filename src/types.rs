//! Core data types for container image I/O

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel component kinds an image can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    /// Unsigned 8-bit integer
    U8,
    /// Signed 8-bit integer
    I8,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 32-bit integer
    I32,
    /// Unsigned 64-bit integer
    U64,
    /// Signed 64-bit integer
    I64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// Extended precision floating point (no storage counterpart)
    LongDouble,
    /// Not yet determined
    Unknown,
}

impl ComponentType {
    /// Every component type with a storage counterpart
    pub const SUPPORTED: [ComponentType; 10] = [
        ComponentType::U8,
        ComponentType::I8,
        ComponentType::U16,
        ComponentType::I16,
        ComponentType::U32,
        ComponentType::I32,
        ComponentType::U64,
        ComponentType::I64,
        ComponentType::F32,
        ComponentType::F64,
    ];

    /// Size in bytes of one component, if the type is sized
    pub fn size_in_bytes(&self) -> Option<usize> {
        match self {
            ComponentType::U8 | ComponentType::I8 => Some(1),
            ComponentType::U16 | ComponentType::I16 => Some(2),
            ComponentType::U32 | ComponentType::I32 | ComponentType::F32 => Some(4),
            ComponentType::U64 | ComponentType::I64 | ComponentType::F64 => Some(8),
            ComponentType::LongDouble => Some(16),
            ComponentType::Unknown => None,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ComponentType::F32 | ComponentType::F64 | ComponentType::LongDouble
        )
    }
}

impl Default for ComponentType {
    fn default() -> Self {
        ComponentType::Unknown
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Native element types the container stores on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StorageType {
    I8 = 1,
    U8 = 2,
    I16 = 3,
    U16 = 4,
    I32 = 5,
    U32 = 6,
    I64 = 7,
    U64 = 8,
    F32 = 9,
    F64 = 10,
    /// One-byte native boolean
    Bool = 11,
    /// IEEE half precision
    F16 = 12,
    /// Quad / extended precision
    F128 = 13,
    /// Variable-length UTF-8 text
    VarString = 14,
}

impl StorageType {
    /// The on-disk type code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode an on-disk type code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(StorageType::I8),
            2 => Some(StorageType::U8),
            3 => Some(StorageType::I16),
            4 => Some(StorageType::U16),
            5 => Some(StorageType::I32),
            6 => Some(StorageType::U32),
            7 => Some(StorageType::I64),
            8 => Some(StorageType::U64),
            9 => Some(StorageType::F32),
            10 => Some(StorageType::F64),
            11 => Some(StorageType::Bool),
            12 => Some(StorageType::F16),
            13 => Some(StorageType::F128),
            14 => Some(StorageType::VarString),
            _ => None,
        }
    }

    /// Size in bytes of one stored element; `None` for variable-length types
    pub fn size_in_bytes(&self) -> Option<usize> {
        match self {
            StorageType::I8 | StorageType::U8 | StorageType::Bool => Some(1),
            StorageType::I16 | StorageType::U16 | StorageType::F16 => Some(2),
            StorageType::I32 | StorageType::U32 | StorageType::F32 => Some(4),
            StorageType::I64 | StorageType::U64 | StorageType::F64 => Some(8),
            StorageType::F128 => Some(16),
            StorageType::VarString => None,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A primitive that can travel between memory and container storage.
///
/// Storage is little-endian; implementations convert from and to native order.
pub trait Element: Copy + Default + Send + Sync + 'static {
    /// Component type this primitive represents
    const COMPONENT: ComponentType;

    /// Decode one element from the first `size_of::<Self>()` bytes
    fn read_le(bytes: &[u8]) -> Self;

    /// Encode one element into the first `size_of::<Self>()` bytes
    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_element {
    ($($t:ty => $component:expr),* $(,)?) => {
        $(
            impl Element for $t {
                const COMPONENT: ComponentType = $component;

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                    <$t>::from_le_bytes(raw)
                }

                fn write_le(self, out: &mut [u8]) {
                    out[..std::mem::size_of::<$t>()].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_element! {
    u8 => ComponentType::U8,
    i8 => ComponentType::I8,
    u16 => ComponentType::U16,
    i16 => ComponentType::I16,
    u32 => ComponentType::U32,
    i32 => ComponentType::I32,
    u64 => ComponentType::U64,
    i64 => ComponentType::I64,
    f32 => ComponentType::F32,
    f64 => ComponentType::F64,
}

/// A region of an image in fastest-moving-first axis order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageIoRegion {
    /// Start index per axis
    pub index: Vec<u64>,
    /// Extent per axis
    pub size: Vec<u64>,
}

impl ImageIoRegion {
    pub fn new(index: Vec<u64>, size: Vec<u64>) -> Self {
        Self { index, size }
    }

    /// Region starting at the origin covering `size`
    pub fn from_size(size: Vec<u64>) -> Self {
        Self {
            index: vec![0; size.len()],
            size,
        }
    }

    /// Number of axes the region spans
    pub fn image_dimension(&self) -> usize {
        self.size.len()
    }

    /// Number of pixels in the region
    pub fn number_of_pixels(&self) -> u64 {
        self.size.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }
}
