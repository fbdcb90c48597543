//! Image metadata dictionary

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    Bool(bool),
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    LongLong(i64),
    ULongLong(u64),
    Float(f32),
    Double(f64),
    String(String),
    CharArray(Vec<i8>),
    UCharArray(Vec<u8>),
    ShortArray(Vec<i16>),
    UShortArray(Vec<u16>),
    IntArray(Vec<i32>),
    UIntArray(Vec<u32>),
    LongArray(Vec<i64>),
    ULongArray(Vec<u64>),
    LongLongArray(Vec<i64>),
    ULongLongArray(Vec<u64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    /// A value of a type the container cannot store; carries the type name
    Unsupported(String),
}

impl MetaValue {
    /// Name of the held type
    pub fn type_name(&self) -> &str {
        match self {
            MetaValue::Bool(_) => "bool",
            MetaValue::Char(_) => "char",
            MetaValue::UChar(_) => "unsigned char",
            MetaValue::Short(_) => "short",
            MetaValue::UShort(_) => "unsigned short",
            MetaValue::Int(_) => "int",
            MetaValue::UInt(_) => "unsigned int",
            MetaValue::Long(_) => "long",
            MetaValue::ULong(_) => "unsigned long",
            MetaValue::LongLong(_) => "long long",
            MetaValue::ULongLong(_) => "unsigned long long",
            MetaValue::Float(_) => "float",
            MetaValue::Double(_) => "double",
            MetaValue::String(_) => "string",
            MetaValue::CharArray(_) => "Array<char>",
            MetaValue::UCharArray(_) => "Array<unsigned char>",
            MetaValue::ShortArray(_) => "Array<short>",
            MetaValue::UShortArray(_) => "Array<unsigned short>",
            MetaValue::IntArray(_) => "Array<int>",
            MetaValue::UIntArray(_) => "Array<unsigned int>",
            MetaValue::LongArray(_) => "Array<long>",
            MetaValue::ULongArray(_) => "Array<unsigned long>",
            MetaValue::LongLongArray(_) => "Array<long long>",
            MetaValue::ULongLongArray(_) => "Array<unsigned long long>",
            MetaValue::FloatArray(_) => "Array<float>",
            MetaValue::DoubleArray(_) => "Array<double>",
            MetaValue::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, MetaValue::Unsupported(_))
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(v) => write!(f, "{}", v),
            MetaValue::Char(v) => write!(f, "{}", v),
            MetaValue::UChar(v) => write!(f, "{}", v),
            MetaValue::Short(v) => write!(f, "{}", v),
            MetaValue::UShort(v) => write!(f, "{}", v),
            MetaValue::Int(v) => write!(f, "{}", v),
            MetaValue::UInt(v) => write!(f, "{}", v),
            MetaValue::Long(v) | MetaValue::LongLong(v) => write!(f, "{}", v),
            MetaValue::ULong(v) | MetaValue::ULongLong(v) => write!(f, "{}", v),
            MetaValue::Float(v) => write!(f, "{}", v),
            MetaValue::Double(v) => write!(f, "{}", v),
            MetaValue::String(v) => write!(f, "{}", v),
            MetaValue::CharArray(v) => write!(f, "{:?}", v),
            MetaValue::UCharArray(v) => write!(f, "{:?}", v),
            MetaValue::ShortArray(v) => write!(f, "{:?}", v),
            MetaValue::UShortArray(v) => write!(f, "{:?}", v),
            MetaValue::IntArray(v) => write!(f, "{:?}", v),
            MetaValue::UIntArray(v) => write!(f, "{:?}", v),
            MetaValue::LongArray(v) | MetaValue::LongLongArray(v) => write!(f, "{:?}", v),
            MetaValue::ULongArray(v) | MetaValue::ULongLongArray(v) => write!(f, "{:?}", v),
            MetaValue::FloatArray(v) => write!(f, "{:?}", v),
            MetaValue::DoubleArray(v) => write!(f, "{:?}", v),
            MetaValue::Unsupported(name) => write!(f, "<{}>", name),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<i32> for MetaValue {
    fn from(value: i32) -> Self {
        MetaValue::Int(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Double(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::String(value)
    }
}

/// Key-ordered metadata attached to an image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaDataDictionary {
    entries: BTreeMap<String, MetaValue>,
}

impl MetaDataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Option<MetaValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaValue)> {
        self.entries.iter()
    }
}

impl<K: Into<String>, V: Into<MetaValue>> FromIterator<(K, V)> for MetaDataDictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
