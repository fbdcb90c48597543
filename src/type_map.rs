//! Mapping between image component types and container storage types

use crate::error::{ContainerError, Result};
use crate::types::{ComponentType, StorageType};

/// The one-to-one table every read and write path consults
const TYPE_TABLE: [(ComponentType, StorageType); 10] = [
    (ComponentType::U8, StorageType::U8),
    (ComponentType::I8, StorageType::I8),
    (ComponentType::U16, StorageType::U16),
    (ComponentType::I16, StorageType::I16),
    (ComponentType::U32, StorageType::U32),
    (ComponentType::I32, StorageType::I32),
    (ComponentType::U64, StorageType::U64),
    (ComponentType::I64, StorageType::I64),
    (ComponentType::F32, StorageType::F32),
    (ComponentType::F64, StorageType::F64),
];

/// Storage type used to persist pixels of `component`
pub fn to_storage_type(component: ComponentType) -> Result<StorageType> {
    TYPE_TABLE
        .iter()
        .find(|(c, _)| *c == component)
        .map(|(_, s)| *s)
        .ok_or_else(|| {
            ContainerError::UnsupportedType(format!(
                "{} has no storage counterpart",
                component
            ))
        })
}

/// Component type recovered from a stored pixel type
pub fn from_storage_type(storage: StorageType) -> Result<ComponentType> {
    TYPE_TABLE
        .iter()
        .find(|(_, s)| *s == storage)
        .map(|(c, _)| *c)
        .ok_or_else(|| {
            ContainerError::UnrecognizedStorageType(format!(
                "{} cannot be read as an image component",
                storage
            ))
        })
}

/// Component type recovered from a raw on-disk type code
pub fn from_storage_code(code: u8) -> Result<ComponentType> {
    let storage = StorageType::from_code(code).ok_or_else(|| {
        ContainerError::UnrecognizedStorageType(format!("unknown type code {}", code))
    })?;
    from_storage_type(storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_types_round_trip() {
        for component in ComponentType::SUPPORTED {
            let storage = to_storage_type(component).unwrap();
            assert_eq!(from_storage_type(storage).unwrap(), component);
            assert_eq!(storage.size_in_bytes(), component.size_in_bytes());
        }
    }

    #[test]
    fn test_long_double_is_unsupported() {
        assert!(matches!(
            to_storage_type(ComponentType::LongDouble),
            Err(ContainerError::UnsupportedType(_))
        ));
        assert!(matches!(
            to_storage_type(ComponentType::Unknown),
            Err(ContainerError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_storage_without_component_is_rejected() {
        for storage in [
            StorageType::Bool,
            StorageType::F16,
            StorageType::F128,
            StorageType::VarString,
        ] {
            assert!(matches!(
                from_storage_type(storage),
                Err(ContainerError::UnrecognizedStorageType(_))
            ));
        }
        assert!(matches!(
            from_storage_code(99),
            Err(ContainerError::UnrecognizedStorageType(_))
        ));
        assert_eq!(from_storage_code(10).unwrap(), ComponentType::F64);
    }
}
