//! Image I/O configuration

use crate::compression::{CompressionLevel, CompressionMethod, MAXIMUM_COMPRESSION_LEVEL};
use crate::container::{AccessProperties, DatasetCreateProps};
use crate::error::{ContainerError, Result};
use crate::streaming::RegionOverrides;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings controlling where and how an image is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageIoConfig {
    /// Group holding the image dataset
    pub path: String,
    /// Dataset name inside `path`
    pub dataset_name: String,
    /// Replace an existing dataset and metadata group on write
    pub overwrite: bool,
    /// Truncate an existing file on write
    pub recreate: bool,
    /// Store the image in chunks of one slab
    pub use_chunking: bool,
    /// Read and write the metadata dictionary
    pub use_metadata: bool,
    /// Compress chunks; implies chunking
    pub use_compression: bool,
    /// 0 (fastest) to 9 (smallest)
    pub compression_level: u8,
    pub compression_method: CompressionMethod,
    /// Explicit region offset, fastest axis first
    pub dataset_offset: Option<Vec<u64>>,
    /// Explicit region size, fastest axis first
    pub dataset_size: Option<Vec<u64>>,
    /// Explicit sampling stride, fastest axis first
    pub dataset_stride: Option<Vec<u64>>,
    /// Sync the file to disk on every flush
    pub sync_on_flush: bool,
}

impl Default for ImageIoConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            dataset_name: "/data".to_string(),
            overwrite: false,
            recreate: false,
            use_chunking: false,
            use_metadata: false,
            use_compression: false,
            compression_level: CompressionLevel::default().value(),
            compression_method: CompressionMethod::default(),
            dataset_offset: None,
            dataset_size: None,
            dataset_stride: None,
            sync_on_flush: false,
        }
    }
}

impl ImageIoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ContainerError::Configuration(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.compression_level > MAXIMUM_COMPRESSION_LEVEL {
            return Err(ContainerError::Configuration(format!(
                "compression level {} is outside 0-{}",
                self.compression_level, MAXIMUM_COMPRESSION_LEVEL
            )));
        }
        if self.dataset_name.trim_matches('/').is_empty() {
            return Err(ContainerError::Configuration(
                "dataset name must not be empty".to_string(),
            ));
        }
        if let Some(stride) = &self.dataset_stride {
            if stride.contains(&0) {
                return Err(ContainerError::Configuration(
                    "stride entries must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_dataset_name(mut self, name: impl Into<String>) -> Self {
        self.dataset_name = name.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_recreate(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }

    pub fn with_chunking(mut self, use_chunking: bool) -> Self {
        self.use_chunking = use_chunking;
        self
    }

    pub fn with_metadata(mut self, use_metadata: bool) -> Self {
        self.use_metadata = use_metadata;
        self
    }

    /// Enable compression; the level is clamped to 0-9
    pub fn with_compression(mut self, method: CompressionMethod, level: u8) -> Self {
        self.use_compression = true;
        self.compression_method = method;
        self.compression_level = CompressionLevel::new(level).value();
        self
    }

    pub fn with_offset(mut self, offset: Vec<u64>) -> Self {
        self.dataset_offset = Some(offset);
        self
    }

    pub fn with_size(mut self, size: Vec<u64>) -> Self {
        self.dataset_size = Some(size);
        self
    }

    pub fn with_stride(mut self, stride: Vec<u64>) -> Self {
        self.dataset_stride = Some(stride);
        self
    }

    pub fn with_sync_on_flush(mut self, sync_on_flush: bool) -> Self {
        self.sync_on_flush = sync_on_flush;
        self
    }

    /// Explicit region overrides
    pub fn overrides(&self) -> RegionOverrides {
        RegionOverrides {
            offset: self.dataset_offset.clone(),
            size: self.dataset_size.clone(),
            stride: self.dataset_stride.clone(),
        }
    }

    pub fn access_properties(&self) -> AccessProperties {
        AccessProperties {
            sync_on_flush: self.sync_on_flush,
        }
    }

    /// Creation properties for the image dataset
    pub fn dataset_props(&self) -> DatasetCreateProps {
        if self.use_compression {
            DatasetCreateProps::chunked(None).with_compression(
                self.compression_method,
                CompressionLevel::new(self.compression_level),
            )
        } else if self.use_chunking {
            DatasetCreateProps::chunked(None)
        } else {
            DatasetCreateProps::default()
        }
    }
}
