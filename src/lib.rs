//! hdc-imageio - Hierarchical Data Container image I/O
//!
//! A pure Rust reader and writer for N-dimensional, multi-component images
//! stored in HDF5 files: groups, datasets and attributes laid out so other
//! HDF5 tools can open them.
//!
//! # Features
//!
//! - Images of any dimensionality with interleaved pixel components
//! - Origin, spacing and direction stored as dataset attributes
//! - Typed metadata dictionaries persisted as tagged datasets
//! - Region, offset, size and stride selections read without loading the whole image
//! - Contiguous, compact and chunked layouts with Deflate or Zstd compression
//!
//! # Example
//!
//! ```rust,no_run
//! use hdc_imageio::{ContainerImageIo, ImageIoConfig, ImageIoRegion};
//!
//! # fn example() -> hdc_imageio::Result<()> {
//! let config = ImageIoConfig::new().with_path("/study/series").with_metadata(true);
//! let mut reader = ContainerImageIo::new("brain.h5", config);
//! reader.read_image_information()?;
//!
//! // Read a single slice of a 3D volume
//! let dims = reader.information().geometry.dimensions.clone();
//! reader.set_io_region(ImageIoRegion::new(vec![0, 0, 10], vec![dims[0], dims[1], 1]));
//! let slice = reader.read_region::<i16>()?;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod compression;
pub mod config;
pub mod container;
pub mod error;
pub mod image_io;
pub mod io;
pub mod meta_codec;
pub mod metadata;
pub mod path;
pub mod streaming;
pub mod type_map;
pub mod types;
pub mod utils;

// Re-exports
pub use attributes::Geometry;
pub use compression::{CompressionLevel, CompressionMethod, Compressor};
pub use config::ImageIoConfig;
pub use container::{Container, Dataspace, Hyperslab};
pub use error::{ContainerError, Result};
pub use image_io::{ContainerImageIo, ImageInformation};
pub use io::{AccessMode, BlockIo};
pub use metadata::{MetaDataDictionary, MetaValue};
pub use streaming::RegionOverrides;
pub use types::{ComponentType, Element, ImageIoRegion, StorageType};

/// Version of the hdc-imageio implementation
pub const HDC_IMAGEIO_VERSION: &str = env!("CARGO_PKG_VERSION");
