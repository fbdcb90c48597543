//! Scalar, vector and metadata dictionary serialization
//!
//! Each metadata entry becomes one small dataset under the `ITKMetaData`
//! group. The container's native types cannot tell every source type apart,
//! so some entries carry a one-element boolean tag attribute recording the
//! original type. The stored identity of a value is its storage type plus that
//! optional tag.

use crate::container::{Attribute, Container, DatasetCreateProps, Dataspace, Hyperslab};
use crate::error::{ContainerError, Result};
use crate::metadata::{MetaDataDictionary, MetaValue};
use crate::path::{join, SEPARATOR};
use crate::types::{Element, StorageType};
use crate::utils::{cast_elements, encode_elements};
use num_traits::NumCast;
use tracing::{debug, warn};

/// Name of the group holding metadata entries, next to the image dataset
pub const METADATA_GROUP: &str = "ITKMetaData";

/// Attribute marking the original type of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Long,
    UnsignedLong,
    LLong,
    ULLong,
}

impl TypeTag {
    pub const ALL: [TypeTag; 5] = [
        TypeTag::Bool,
        TypeTag::Long,
        TypeTag::UnsignedLong,
        TypeTag::LLong,
        TypeTag::ULLong,
    ];

    /// Attribute name of the tag
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Bool => "isBool",
            TypeTag::Long => "isLong",
            TypeTag::UnsignedLong => "isUnsignedLong",
            TypeTag::LLong => "isLLong",
            TypeTag::ULLong => "isULLong",
        }
    }
}

/// Element type of a metadata value, scalar or array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKind {
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    String,
}

/// How a kind is written to the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredIdentity {
    pub storage: StorageType,
    pub tag: Option<TypeTag>,
}

impl MetaKind {
    pub fn identity(self) -> StoredIdentity {
        let (storage, tag) = match self {
            MetaKind::Bool => (StorageType::I32, Some(TypeTag::Bool)),
            MetaKind::Char => (StorageType::I8, None),
            MetaKind::UChar => (StorageType::U8, None),
            MetaKind::Short => (StorageType::I16, None),
            MetaKind::UShort => (StorageType::U16, None),
            MetaKind::Int => (StorageType::I32, None),
            MetaKind::UInt => (StorageType::U32, None),
            MetaKind::Long => (StorageType::I64, Some(TypeTag::Long)),
            MetaKind::ULong => (StorageType::U64, Some(TypeTag::UnsignedLong)),
            MetaKind::LongLong => (StorageType::I64, Some(TypeTag::LLong)),
            MetaKind::ULongLong => (StorageType::U64, Some(TypeTag::ULLong)),
            MetaKind::Float => (StorageType::F32, None),
            MetaKind::Double => (StorageType::F64, None),
            MetaKind::String => (StorageType::VarString, None),
        };
        StoredIdentity { storage, tag }
    }
}

struct DecodeRule {
    storage: StorageType,
    /// Checked in order; the first tag present decides
    tagged: &'static [(TypeTag, MetaKind)],
    default: MetaKind,
}

const DECODE_TABLE: &[DecodeRule] = &[
    DecodeRule {
        storage: StorageType::I32,
        tagged: &[
            (TypeTag::Bool, MetaKind::Bool),
            (TypeTag::Long, MetaKind::Long),
            (TypeTag::UnsignedLong, MetaKind::ULong),
        ],
        default: MetaKind::Int,
    },
    DecodeRule {
        storage: StorageType::U8,
        tagged: &[(TypeTag::Bool, MetaKind::Bool)],
        default: MetaKind::UChar,
    },
    DecodeRule {
        storage: StorageType::Bool,
        tagged: &[],
        default: MetaKind::Bool,
    },
    DecodeRule {
        storage: StorageType::U32,
        tagged: &[(TypeTag::UnsignedLong, MetaKind::ULong)],
        default: MetaKind::UInt,
    },
    DecodeRule {
        storage: StorageType::I64,
        tagged: &[
            (TypeTag::LLong, MetaKind::LongLong),
            (TypeTag::Long, MetaKind::Long),
        ],
        // Native long is 64 bits wide
        default: MetaKind::Long,
    },
    DecodeRule {
        storage: StorageType::U64,
        tagged: &[
            (TypeTag::ULLong, MetaKind::ULongLong),
            (TypeTag::UnsignedLong, MetaKind::ULong),
        ],
        default: MetaKind::ULong,
    },
    DecodeRule {
        storage: StorageType::I8,
        tagged: &[],
        default: MetaKind::Char,
    },
    DecodeRule {
        storage: StorageType::I16,
        tagged: &[],
        default: MetaKind::Short,
    },
    DecodeRule {
        storage: StorageType::U16,
        tagged: &[],
        default: MetaKind::UShort,
    },
    DecodeRule {
        storage: StorageType::F32,
        tagged: &[],
        default: MetaKind::Float,
    },
    DecodeRule {
        storage: StorageType::F64,
        tagged: &[],
        default: MetaKind::Double,
    },
    DecodeRule {
        storage: StorageType::VarString,
        tagged: &[],
        default: MetaKind::String,
    },
];

/// Reconstruct the kind of a stored value from its storage type and tags
pub fn decode_kind(storage: StorageType, has_tag: impl Fn(TypeTag) -> bool) -> Option<MetaKind> {
    let rule = DECODE_TABLE.iter().find(|rule| rule.storage == storage)?;
    Some(
        rule.tagged
            .iter()
            .find(|(tag, _)| has_tag(*tag))
            .map_or(rule.default, |(_, kind)| *kind),
    )
}

fn store<T: Element>(container: &mut Container, path: &str, kind: MetaKind, values: &[T]) -> Result<()> {
    let identity = kind.identity();
    let space = Dataspace::simple(vec![values.len() as u64]);
    container.create_dataset(path, identity.storage, &space, &DatasetCreateProps::compact())?;
    container.write(path, &Hyperslab::all(&space), &encode_elements(values))?;
    if let Some(tag) = identity.tag {
        container.create_attribute(path, tag.name(), Attribute::flag(true))?;
    }
    Ok(())
}

/// Write one value as a dataset at `path`.
///
/// Returns `false` without writing when the value type cannot be stored.
pub fn write_value(container: &mut Container, path: &str, value: &MetaValue) -> Result<bool> {
    match value {
        MetaValue::Bool(v) => store(container, path, MetaKind::Bool, &[if *v { 1i32 } else { 0 }])?,
        MetaValue::Char(v) => store(container, path, MetaKind::Char, &[*v])?,
        MetaValue::UChar(v) => store(container, path, MetaKind::UChar, &[*v])?,
        MetaValue::Short(v) => store(container, path, MetaKind::Short, &[*v])?,
        MetaValue::UShort(v) => store(container, path, MetaKind::UShort, &[*v])?,
        MetaValue::Int(v) => store(container, path, MetaKind::Int, &[*v])?,
        MetaValue::UInt(v) => store(container, path, MetaKind::UInt, &[*v])?,
        MetaValue::Long(v) => store(container, path, MetaKind::Long, &[*v])?,
        MetaValue::ULong(v) => store(container, path, MetaKind::ULong, &[*v])?,
        MetaValue::LongLong(v) => store(container, path, MetaKind::LongLong, &[*v])?,
        MetaValue::ULongLong(v) => store(container, path, MetaKind::ULongLong, &[*v])?,
        MetaValue::Float(v) => store(container, path, MetaKind::Float, &[*v])?,
        MetaValue::Double(v) => store(container, path, MetaKind::Double, &[*v])?,
        MetaValue::CharArray(v) => store(container, path, MetaKind::Char, v)?,
        MetaValue::UCharArray(v) => store(container, path, MetaKind::UChar, v)?,
        MetaValue::ShortArray(v) => store(container, path, MetaKind::Short, v)?,
        MetaValue::UShortArray(v) => store(container, path, MetaKind::UShort, v)?,
        MetaValue::IntArray(v) => store(container, path, MetaKind::Int, v)?,
        MetaValue::UIntArray(v) => store(container, path, MetaKind::UInt, v)?,
        MetaValue::LongArray(v) => store(container, path, MetaKind::Long, v)?,
        MetaValue::ULongArray(v) => store(container, path, MetaKind::ULong, v)?,
        MetaValue::LongLongArray(v) => store(container, path, MetaKind::LongLong, v)?,
        MetaValue::ULongLongArray(v) => store(container, path, MetaKind::ULongLong, v)?,
        MetaValue::FloatArray(v) => store(container, path, MetaKind::Float, v)?,
        MetaValue::DoubleArray(v) => store(container, path, MetaKind::Double, v)?,
        MetaValue::String(v) => container.write_strings(path, std::slice::from_ref(v))?,
        MetaValue::Unsupported(_) => return Ok(false),
    }
    Ok(true)
}

fn one_dimensional_len(container: &Container, path: &str) -> Result<u64> {
    let space = container.dataset_space(path)?;
    match space.dims() {
        [len] => Ok(*len),
        dims => Err(ContainerError::RankMismatch(format!(
            "{} has rank {}, expected 1",
            path,
            dims.len()
        ))),
    }
}

/// Read a numeric one-dimensional dataset, converting to `T`
pub fn read_vector<T: NumCast>(container: &mut Container, path: &str) -> Result<Vec<T>> {
    let len = one_dimensional_len(container, path)?;
    let storage = container.dataset_storage_type(path)?;
    let bytes = container.read(path, &Hyperslab::all(&Dataspace::simple(vec![len])))?;
    cast_elements(storage, &bytes)
}

/// Read a one-element numeric dataset, converting to `T`
pub fn read_scalar<T: NumCast>(container: &mut Container, path: &str) -> Result<T> {
    let mut values = read_vector::<T>(container, path)?;
    if values.len() != 1 {
        return Err(ContainerError::DimensionMismatch(format!(
            "{} holds {} values, expected 1",
            path,
            values.len()
        )));
    }
    values.pop().ok_or_else(|| ContainerError::ContainerIo(format!("{} is empty", path)))
}

/// Read the value stored at `path`.
///
/// Values of unsupported rank or type come back as `None`.
pub fn read_value(container: &mut Container, path: &str) -> Result<Option<MetaValue>> {
    let space = container.dataset_space(path)?;
    if space.rank() != 1 {
        debug!("skipping {}: rank {} metadata is not supported", path, space.rank());
        return Ok(None);
    }

    let storage = match container.dataset_storage_type(path) {
        Ok(storage) => storage,
        Err(ContainerError::UnrecognizedStorageType(e)) => {
            debug!("skipping {}: {}", path, e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let kind = match decode_kind(storage, |tag| {
        container.attribute_exists(path, tag.name()).unwrap_or(false)
    }) {
        Some(kind) => kind,
        None => {
            debug!("skipping {}: no metadata kind for {}", path, storage);
            return Ok(None);
        }
    };

    let scalar = space.num_elements() == 1;
    if kind == MetaKind::String {
        let mut values = container.read_strings(path)?;
        return Ok(match (scalar, values.pop()) {
            (true, Some(value)) => Some(MetaValue::String(value)),
            _ => None,
        });
    }
    if kind == MetaKind::Bool {
        if !scalar {
            debug!("skipping {}: boolean arrays are not supported", path);
            return Ok(None);
        }
        let value: i64 = read_scalar(container, path)?;
        return Ok(Some(MetaValue::Bool(value != 0)));
    }

    macro_rules! numeric {
        ($t:ty, $scalar:ident, $array:ident) => {{
            let mut values: Vec<$t> = read_vector(container, path)?;
            match (scalar, values.pop()) {
                (true, Some(value)) => MetaValue::$scalar(value),
                (_, last) => {
                    values.extend(last);
                    MetaValue::$array(values)
                }
            }
        }};
    }

    let value = match kind {
        MetaKind::Char => numeric!(i8, Char, CharArray),
        MetaKind::UChar => numeric!(u8, UChar, UCharArray),
        MetaKind::Short => numeric!(i16, Short, ShortArray),
        MetaKind::UShort => numeric!(u16, UShort, UShortArray),
        MetaKind::Int => numeric!(i32, Int, IntArray),
        MetaKind::UInt => numeric!(u32, UInt, UIntArray),
        MetaKind::Long => numeric!(i64, Long, LongArray),
        MetaKind::ULong => numeric!(u64, ULong, ULongArray),
        MetaKind::LongLong => numeric!(i64, LongLong, LongLongArray),
        MetaKind::ULongLong => numeric!(u64, ULongLong, ULongLongArray),
        MetaKind::Float => numeric!(f32, Float, FloatArray),
        MetaKind::Double => numeric!(f64, Double, DoubleArray),
        MetaKind::Bool | MetaKind::String => return Ok(None),
    };
    Ok(Some(value))
}

/// Write every storable dictionary entry under `<group>/ITKMetaData`.
///
/// Entries of unsupported type are skipped. Returns the number written.
pub fn persist_metadata(
    container: &mut Container,
    group: &str,
    dictionary: &MetaDataDictionary,
) -> Result<usize> {
    let metadata_group = join(group, METADATA_GROUP);
    container.create_group(&metadata_group)?;

    let mut written = 0;
    for (key, value) in dictionary.iter() {
        if key.is_empty() || key.contains(SEPARATOR) {
            warn!("skipping metadata entry {:?}: not a valid object name", key);
            continue;
        }

        let path = join(&metadata_group, key);
        debug!("creating metadata dataset: {}", path);
        if write_value(container, &path, value)? {
            written += 1;
        } else {
            debug!("skipping metadata entry {} of type {}", key, value.type_name());
        }
    }
    Ok(written)
}

/// Replace the contents of `dictionary` with the entries stored under
/// `<group>/ITKMetaData`
pub fn restore_metadata(
    container: &mut Container,
    group: &str,
    dictionary: &mut MetaDataDictionary,
) -> Result<()> {
    dictionary.clear();
    let metadata_group = join(group, METADATA_GROUP);

    for name in container.children(&metadata_group)? {
        let path = join(&metadata_group, &name);
        if !container.is_dataset(&path) {
            continue;
        }
        if let Some(value) = read_value(container, &path)? {
            debug!("read metadata {} = {}", name, value);
            dictionary.insert(name, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::DatasetCreateProps;

    fn round_trip(value: MetaValue) -> Option<MetaValue> {
        let mut container = Container::in_memory().unwrap();
        assert!(write_value(&mut container, "/value", &value).unwrap());
        read_value(&mut container, "/value").unwrap()
    }

    #[test]
    fn test_tagged_scalars_keep_their_type() {
        for value in [
            MetaValue::Bool(true),
            MetaValue::Bool(false),
            MetaValue::Long(-7_000_000_000),
            MetaValue::ULong(u64::MAX),
            MetaValue::LongLong(i64::MIN),
            MetaValue::ULongLong(42),
            MetaValue::Int(-12),
            MetaValue::UInt(12),
        ] {
            assert_eq!(round_trip(value.clone()), Some(value));
        }
    }

    #[test]
    fn test_arrays_and_strings() {
        for value in [
            MetaValue::DoubleArray(vec![0.5, 1.5, -2.0]),
            MetaValue::UCharArray(vec![1, 2, 3]),
            MetaValue::ULongArray(vec![1, u64::MAX]),
            MetaValue::String("axial".to_string()),
            MetaValue::Float(0.25),
        ] {
            assert_eq!(round_trip(value.clone()), Some(value));
        }

        // A one-element array reads back as a scalar
        assert_eq!(
            round_trip(MetaValue::ShortArray(vec![-4])),
            Some(MetaValue::Short(-4))
        );
    }

    #[test]
    fn test_unsupported_value_is_not_written() {
        let mut container = Container::in_memory().unwrap();
        let value = MetaValue::Unsupported("itk::Matrix<double>".to_string());
        assert!(!write_value(&mut container, "/value", &value).unwrap());
        assert!(!container.exists("/value"));
    }

    #[test]
    fn test_decode_priority() {
        let with = |tags: &'static [TypeTag]| move |tag: TypeTag| tags.contains(&tag);
        assert_eq!(decode_kind(StorageType::I32, with(&[])), Some(MetaKind::Int));
        assert_eq!(
            decode_kind(StorageType::I32, with(&[TypeTag::Long, TypeTag::Bool])),
            Some(MetaKind::Bool)
        );
        assert_eq!(
            decode_kind(StorageType::I64, with(&[TypeTag::Long, TypeTag::LLong])),
            Some(MetaKind::LongLong)
        );
        assert_eq!(
            decode_kind(StorageType::U64, with(&[TypeTag::UnsignedLong])),
            Some(MetaKind::ULong)
        );
        // Untagged 64-bit integers from other writers read as native longs
        assert_eq!(decode_kind(StorageType::I64, with(&[])), Some(MetaKind::Long));
        assert_eq!(decode_kind(StorageType::U64, with(&[])), Some(MetaKind::ULong));
        assert_eq!(
            decode_kind(StorageType::U64, with(&[TypeTag::ULLong])),
            Some(MetaKind::ULongLong)
        );
        assert_eq!(decode_kind(StorageType::U8, with(&[TypeTag::Bool])), Some(MetaKind::Bool));
        assert_eq!(decode_kind(StorageType::Bool, with(&[])), Some(MetaKind::Bool));
        assert_eq!(decode_kind(StorageType::F16, with(&[])), None);
    }

    #[test]
    fn test_identity_table() {
        assert_eq!(
            MetaKind::ULong.identity(),
            StoredIdentity {
                storage: StorageType::U64,
                tag: Some(TypeTag::UnsignedLong)
            }
        );
        assert_eq!(MetaKind::Short.identity().tag, None);
        for kind in [MetaKind::Bool, MetaKind::Long, MetaKind::ULong, MetaKind::LongLong, MetaKind::ULongLong] {
            let identity = kind.identity();
            let tag = identity.tag.unwrap();
            assert_eq!(decode_kind(identity.storage, |t| t == tag), Some(kind));
        }
    }

    #[test]
    fn test_legacy_long_stored_as_int() {
        let mut container = Container::in_memory().unwrap();
        let space = Dataspace::simple(vec![1]);
        container
            .create_dataset("/v", StorageType::I32, &space, &DatasetCreateProps::compact())
            .unwrap();
        container
            .write("/v", &Hyperslab::all(&space), &encode_elements(&[-9i32]))
            .unwrap();
        container
            .create_attribute("/v", TypeTag::Long.name(), Attribute::flag(true))
            .unwrap();
        assert_eq!(read_value(&mut container, "/v").unwrap(), Some(MetaValue::Long(-9)));
    }

    #[test]
    fn test_higher_rank_is_skipped() {
        let mut container = Container::in_memory().unwrap();
        container
            .create_dataset(
                "/grid",
                StorageType::F64,
                &Dataspace::simple(vec![2, 2]),
                &DatasetCreateProps::compact(),
            )
            .unwrap();
        assert_eq!(read_value(&mut container, "/grid").unwrap(), None);
        assert!(matches!(
            read_vector::<f64>(&mut container, "/grid"),
            Err(ContainerError::RankMismatch(_))
        ));
    }

    #[test]
    fn test_dictionary_round_trip() {
        let mut container = Container::in_memory().unwrap();
        container.create_group("/image").unwrap();

        let mut dictionary = MetaDataDictionary::new();
        dictionary.insert("Modality", "MR");
        dictionary.insert("EchoTime", MetaValue::Double(12.5));
        dictionary.insert("Flipped", MetaValue::Bool(true));
        dictionary.insert("Counts", MetaValue::ULongLongArray(vec![1, 2, 3]));
        dictionary.insert("Opaque", MetaValue::Unsupported("std::map".to_string()));
        dictionary.insert("bad/key", MetaValue::Int(1));

        assert_eq!(persist_metadata(&mut container, "/image", &dictionary).unwrap(), 4);

        let mut restored = MetaDataDictionary::new();
        restored.insert("stale", 1);
        restore_metadata(&mut container, "/image", &mut restored).unwrap();

        dictionary.remove("Opaque");
        dictionary.remove("bad/key");
        assert_eq!(restored, dictionary);
        assert!(matches!(
            persist_metadata(&mut container, "/image", &dictionary),
            Err(ContainerError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_read_scalar() {
        let mut container = Container::in_memory().unwrap();
        write_value(&mut container, "/n", &MetaValue::UShort(640)).unwrap();
        assert_eq!(read_scalar::<u64>(&mut container, "/n").unwrap(), 640);
        assert!(read_scalar::<u8>(&mut container, "/n").is_err());

        write_value(&mut container, "/pair", &MetaValue::IntArray(vec![1, 2])).unwrap();
        assert!(matches!(
            read_scalar::<i32>(&mut container, "/pair"),
            Err(ContainerError::DimensionMismatch(_))
        ));
    }
}
