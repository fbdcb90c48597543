//! Image reader/writer on top of the container
//!
//! [`ContainerImageIo`] stores one image per dataset: the pixel array, its
//! geometry as dataset attributes, and optionally the metadata dictionary in a
//! sibling `ITKMetaData` group. Reads can be restricted to a region, or
//! resampled through explicit offset/size/stride overrides.
//!
//! # Example
//!
//! ```rust,no_run
//! use hdc_imageio::{ComponentType, ContainerImageIo, Geometry, ImageInformation, ImageIoConfig};
//!
//! # fn example() -> hdc_imageio::Result<()> {
//! let mut writer = ContainerImageIo::new("volume.h5", ImageIoConfig::new().with_path("/scan"));
//! writer.set_information(ImageInformation::new(
//!     Geometry::new(vec![64, 64, 32]),
//!     ComponentType::U16,
//!     1,
//! ));
//! writer.write_region(&vec![0u16; 64 * 64 * 32])?;
//! writer.close()?;
//!
//! let mut reader = ContainerImageIo::new("volume.h5", ImageIoConfig::new().with_path("/scan"));
//! reader.read_image_information()?;
//! let volume = reader.read_array::<u16>()?;
//! assert_eq!(volume.shape(), &[32, 64, 64]);
//! # Ok(())
//! # }
//! ```

use crate::attributes::{read_geometry, write_geometry, Geometry};
use crate::config::ImageIoConfig;
use crate::container::{Container, Dataspace};
use crate::error::{ContainerError, Result};
use crate::io::AccessMode;
use crate::meta_codec::{persist_metadata, restore_metadata, METADATA_GROUP};
use crate::metadata::MetaDataDictionary;
use crate::path::{ensure_group, join, parent, path_exists};
use crate::streaming::{select_region, storage_rank, StreamingSelection};
use crate::type_map::{from_storage_type, to_storage_type};
use crate::types::{ComponentType, Element, ImageIoRegion};
use crate::utils::{
    decode_elements, encode_elements, format_bytes, reverse_axes, to_native_order,
    to_storage_order,
};
use ndarray::{ArrayD, IxDyn};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name extensions accepted for container images
pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    [".hdf", ".h4", ".hdf4", ".h5", ".hdf5", ".he4", ".he5", ".hd5"];

/// Everything needed to lay out an image's pixels
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInformation {
    pub geometry: Geometry,
    pub component_type: ComponentType,
    /// Interleaved components per pixel
    pub number_of_components: u64,
}

impl ImageInformation {
    pub fn new(geometry: Geometry, component_type: ComponentType, number_of_components: u64) -> Self {
        Self {
            geometry,
            component_type,
            number_of_components,
        }
    }

    pub fn dimensionality(&self) -> usize {
        self.geometry.dimensionality()
    }

    pub fn pixel_count(&self) -> u64 {
        self.geometry.dimensions.iter().product()
    }

    /// Dataset shape: slowest axis first, components last when there are several
    pub fn storage_dims(&self) -> Vec<u64> {
        let mut dims = reverse_axes(&self.geometry.dimensions);
        if self.number_of_components > 1 {
            dims.push(self.number_of_components);
        }
        dims
    }

    fn component_size(&self) -> Result<usize> {
        self.component_type.size_in_bytes().ok_or_else(|| {
            ContainerError::UnsupportedType(format!(
                "component type {} has no size",
                self.component_type
            ))
        })
    }
}

impl Default for ImageInformation {
    fn default() -> Self {
        Self::new(Geometry::default(), ComponentType::Unknown, 1)
    }
}

/// Reads and writes one image stored in a container file
pub struct ContainerImageIo {
    file_name: PathBuf,
    config: ImageIoConfig,
    information: ImageInformation,
    io_region: ImageIoRegion,
    metadata: MetaDataDictionary,
    container: Option<Container>,
    information_written: bool,
    inferred_dimensions: bool,
}

impl ContainerImageIo {
    pub fn new(file_name: impl Into<PathBuf>, config: ImageIoConfig) -> Self {
        Self {
            file_name: file_name.into(),
            config,
            information: ImageInformation::default(),
            io_region: ImageIoRegion::default(),
            metadata: MetaDataDictionary::new(),
            container: None,
            information_written: false,
            inferred_dimensions: false,
        }
    }

    /// Whether `path` is a readable container. Never fails.
    pub fn can_read_file(path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        path.is_file() && Container::probe(path)
    }

    /// Whether `path` carries a container extension, ignoring case
    pub fn can_write_file(path: impl AsRef<Path>) -> bool {
        let name = path.as_ref().to_string_lossy().to_lowercase();
        SUPPORTED_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn config(&self) -> &ImageIoConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ImageIoConfig {
        &mut self.config
    }

    pub fn information(&self) -> &ImageInformation {
        &self.information
    }

    /// Describe the image about to be written
    pub fn set_information(&mut self, information: ImageInformation) {
        self.information = information;
    }

    pub fn metadata(&self) -> &MetaDataDictionary {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetaDataDictionary {
        &mut self.metadata
    }

    pub fn io_region(&self) -> &ImageIoRegion {
        &self.io_region
    }

    /// Restrict reads and writes to `region`; an empty region means the whole image
    pub fn set_io_region(&mut self, region: ImageIoRegion) {
        self.io_region = region;
    }

    /// Geometry came from the storage shape because no Dimension attribute was stored
    pub fn uses_inferred_dimensions(&self) -> bool {
        self.inferred_dimensions
    }

    pub fn is_open(&self) -> bool {
        self.container.is_some()
    }

    /// Full path of the image dataset
    pub fn dataset_path(&self) -> String {
        join(&self.config.path, &self.config.dataset_name)
    }

    fn metadata_path(&self) -> String {
        join(&self.config.path, METADATA_GROUP)
    }

    /// Close the container, surfacing any flush failure
    pub fn close(&mut self) -> Result<()> {
        match self.container.take() {
            Some(mut container) => container.close(),
            None => Ok(()),
        }
    }

    fn discard_container(&mut self) {
        if let Some(mut container) = self.container.take() {
            if let Err(e) = container.close() {
                warn!("closing {} after a failure: {}", self.file_name.display(), e);
            }
        }
    }

    /// Run `op`, closing the container if it fails
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        if result.is_err() {
            self.discard_container();
        }
        result
    }

    fn open_for_read(&self) -> Result<Container> {
        if !self.file_name.exists() {
            return Err(ContainerError::NotFound(self.file_name.display().to_string()));
        }
        if !Container::probe(&self.file_name) {
            return Err(ContainerError::NotAContainer(
                self.file_name.display().to_string(),
            ));
        }
        Container::open(
            &self.file_name,
            AccessMode::ReadOnly,
            self.config.access_properties(),
        )
    }

    fn open_for_write(&self) -> Result<Container> {
        let access = self.config.access_properties();
        if self.config.recreate || !self.file_name.exists() {
            Container::create(&self.file_name, access)
        } else {
            Container::open(&self.file_name, AccessMode::ReadWrite, access)
        }
    }

    fn container_mut(&mut self) -> Result<&mut Container> {
        self.container.as_mut().ok_or_else(|| {
            ContainerError::ContainerIo(format!("{} is not open", self.file_name.display()))
        })
    }

    // ---- Reading ----

    /// Load geometry, component layout and, when enabled, the metadata dictionary.
    ///
    /// Leaves the container open and resets the I/O region to the whole image.
    pub fn read_image_information(&mut self) -> Result<()> {
        self.guarded(|io| {
            io.close()?;
            io.config.validate()?;
            let mut container = io.open_for_read()?;

            if !path_exists(&container, &io.config.path) {
                return Err(ContainerError::PathNotFound(io.config.path.clone()));
            }

            let dataset = io.dataset_path();
            let component_type = from_storage_type(container.dataset_storage_type(&dataset)?)?;
            let stored = read_geometry(&container, &dataset, &io.config.overrides())?;

            io.metadata.clear();
            if io.config.use_metadata {
                let metadata_path = io.metadata_path();
                if !container.is_group(&metadata_path) {
                    return Err(ContainerError::PathNotFound(metadata_path));
                }
                restore_metadata(&mut container, &io.config.path, &mut io.metadata)?;
            }

            debug!(
                "read image information of {}: {} x{} {:?}",
                dataset, component_type, stored.number_of_components, stored.geometry.dimensions
            );
            io.io_region = ImageIoRegion::from_size(stored.geometry.dimensions.clone());
            io.information = ImageInformation::new(
                stored.geometry,
                component_type,
                stored.number_of_components,
            );
            io.inferred_dimensions = stored.inferred;
            io.container = Some(container);
            Ok(())
        })
    }

    fn effective_region(&self) -> ImageIoRegion {
        if self.io_region.is_empty() {
            ImageIoRegion::from_size(self.information.geometry.dimensions.clone())
        } else {
            self.io_region.clone()
        }
    }

    fn selection(&self) -> Result<StreamingSelection> {
        select_region(
            &self.effective_region(),
            self.information.dimensionality(),
            self.information.number_of_components,
            &self.config.overrides(),
        )
    }

    /// Selected elements as little-endian storage bytes
    fn read_storage_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        if self.container.is_none() {
            self.container = Some(self.open_for_read()?);
        }
        let selection = self.selection()?;
        let expected = selection.num_elements() as usize * self.information.component_size()?;
        if out.len() != expected {
            return Err(ContainerError::DimensionMismatch(format!(
                "buffer holds {} bytes, region needs {}",
                out.len(),
                expected
            )));
        }

        let dataset = self.dataset_path();
        self.container_mut()?
            .read_into(&dataset, &selection.file_selection, out)
    }

    /// Read the current region into `buffer` as native-endian components
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<()> {
        self.guarded(|io| {
            io.read_storage_bytes(buffer)?;
            to_native_order(buffer, io.information.component_size()?);
            Ok(())
        })
    }

    fn check_element<T: Element>(&self) -> Result<()> {
        if T::COMPONENT != self.information.component_type {
            return Err(ContainerError::UnsupportedType(format!(
                "requested {} components from a {} image",
                T::COMPONENT,
                self.information.component_type
            )));
        }
        Ok(())
    }

    /// Read the current region as typed components, pixel by pixel
    pub fn read_region<T: Element>(&mut self) -> Result<Vec<T>> {
        self.guarded(|io| {
            io.check_element::<T>()?;
            let mut bytes =
                vec![0u8; io.selection()?.num_elements() as usize * std::mem::size_of::<T>()];
            io.read_storage_bytes(&mut bytes)?;
            decode_elements(&bytes)
        })
    }

    /// Read the current region as an array shaped like the storage selection:
    /// slowest axis first, components last
    pub fn read_array<T: Element>(&mut self) -> Result<ArrayD<T>> {
        let values = self.read_region::<T>()?;
        let shape: Vec<usize> = self
            .selection()?
            .memory_space
            .dims()
            .iter()
            .map(|&d| d as usize)
            .collect();
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| ContainerError::DimensionMismatch(e.to_string()))
    }

    // ---- Writing ----

    /// Create the image dataset with its geometry and metadata.
    ///
    /// Runs at most once per object; later calls do nothing.
    pub fn write_image_information(&mut self) -> Result<()> {
        if self.information_written {
            return Ok(());
        }

        self.guarded(|io| {
            io.close()?;
            io.config.validate()?;
            let storage = to_storage_type(io.information.component_type)?;
            io.information.geometry.validate()?;
            if io.information.number_of_components == 0 {
                return Err(ContainerError::DimensionMismatch(
                    "an image needs at least one component".to_string(),
                ));
            }

            let mut container = io.open_for_write()?;
            let dataset = io.dataset_path();
            let metadata_path = io.metadata_path();
            let space = Dataspace::simple(io.information.storage_dims());

            let group = ensure_group(&mut container, &io.config.path)?;
            ensure_group(&mut container, &parent(&dataset))?;

            for existing in [&dataset, &metadata_path] {
                if container.exists(existing) {
                    if !io.config.overwrite {
                        return Err(ContainerError::AlreadyExists(existing.to_string()));
                    }
                    debug!("overwriting {}", existing);
                    container.unlink(existing)?;
                }
            }

            container.create_dataset(&dataset, storage, &space, &io.config.dataset_props())?;
            write_geometry(&mut container, &dataset, &io.information.geometry)?;
            if io.config.use_metadata {
                let written = persist_metadata(&mut container, group.path(), &io.metadata)?;
                debug!("wrote {} of {} metadata entries", written, io.metadata.len());
            }
            container.flush()?;

            io.container = Some(container);
            io.information_written = true;
            Ok(())
        })
    }

    fn write_storage_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.container.is_none() {
            self.container = Some(Container::open(
                &self.file_name,
                AccessMode::ReadWrite,
                self.config.access_properties(),
            )?);
        }
        let selection = self.selection()?;
        let expected = selection.num_elements() as usize * self.information.component_size()?;
        if data.len() != expected {
            return Err(ContainerError::DimensionMismatch(format!(
                "buffer holds {} bytes, region needs {}",
                data.len(),
                expected
            )));
        }

        let dataset = self.dataset_path();
        let container = self.container_mut()?;
        container.write(&dataset, &selection.file_selection, data)?;
        container.flush()
    }

    /// Write native-endian components for the current region, creating the
    /// dataset first if needed
    pub fn write(&mut self, buffer: &[u8]) -> Result<()> {
        self.write_image_information()?;
        self.guarded(|io| {
            let mut bytes = buffer.to_vec();
            to_storage_order(&mut bytes, io.information.component_size()?);
            io.write_storage_bytes(&bytes)
        })
    }

    /// Write typed components for the current region
    pub fn write_region<T: Element>(&mut self, data: &[T]) -> Result<()> {
        self.guarded(|io| io.check_element::<T>())?;
        self.write_image_information()?;
        self.guarded(|io| io.write_storage_bytes(&encode_elements(data)))
    }

    /// Whether the configured dataset exists in the file. Never fails.
    ///
    /// An open container stays open; otherwise the file is inspected through
    /// a separate read-only handle.
    pub fn dataset_exists(&self) -> bool {
        let dataset = self.dataset_path();
        let holds_dataset =
            |container: &Container| path_exists(container, &self.config.path) && container.is_dataset(&dataset);
        match &self.container {
            Some(container) => holds_dataset(container),
            None => self.open_for_read().map_or(false, |container| holds_dataset(&container)),
        }
    }
}

impl fmt::Display for ContainerImageIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = &self.information;
        writeln!(f, "ContainerImageIo ({})", self.file_name.display())?;
        writeln!(f, "  Dataset: {}", self.dataset_path())?;
        writeln!(
            f,
            "  Component: {} x{}",
            info.component_type, info.number_of_components
        )?;
        writeln!(f, "  Dimensions: {:?}", info.geometry.dimensions)?;
        writeln!(f, "  Origin: {:?}", info.geometry.origin)?;
        writeln!(f, "  Spacing: {:?}", info.geometry.spacing)?;
        writeln!(f, "  Direction: {:?}", info.geometry.direction)?;
        if let Some(size) = info.component_type.size_in_bytes() {
            let bytes = info.pixel_count() * info.number_of_components * size as u64;
            writeln!(f, "  Image size: {}", format_bytes(bytes))?;
        }
        writeln!(
            f,
            "  Storage rank: {}",
            storage_rank(info.dimensionality(), info.number_of_components)
        )?;
        writeln!(f, "  I/O region: {:?} + {:?}", self.io_region.index, self.io_region.size)?;
        writeln!(
            f,
            "  Overwrite: {}, Recreate: {}, Chunking: {}, Compression: {} (level {}), Metadata: {}",
            self.config.overwrite,
            self.config.recreate,
            self.config.use_chunking,
            self.config.use_compression,
            self.config.compression_level,
            self.config.use_metadata
        )?;
        writeln!(f, "  Offset override: {:?}", self.config.dataset_offset)?;
        writeln!(f, "  Size override: {:?}", self.config.dataset_size)?;
        writeln!(f, "  Stride override: {:?}", self.config.dataset_stride)?;
        writeln!(f, "  Inferred dimensions: {}", self.inferred_dimensions)?;
        write!(f, "  Metadata entries: {}", self.metadata.len())
    }
}

impl fmt::Debug for ContainerImageIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerImageIo")
            .field("file_name", &self.file_name)
            .field("dataset", &self.dataset_path())
            .field("information", &self.information)
            .field("open", &self.container.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_ramp(path: &Path, config: ImageIoConfig, dims: Vec<u64>, components: u64) -> Vec<u16> {
        let count = dims.iter().product::<u64>() * components;
        let values: Vec<u16> = (0..count).map(|v| v as u16).collect();
        let mut io = ContainerImageIo::new(path, config);
        io.set_information(ImageInformation::new(
            Geometry::new(dims),
            ComponentType::U16,
            components,
        ));
        io.write_region(&values).unwrap();
        io.close().unwrap();
        values
    }

    #[test]
    fn test_extensions() {
        assert!(ContainerImageIo::can_write_file("scan.h5"));
        assert!(ContainerImageIo::can_write_file("SCAN.HDF5"));
        assert!(ContainerImageIo::can_write_file("/tmp/a.b/scan.hd5"));
        assert!(!ContainerImageIo::can_write_file("scan.nii"));
        assert!(!ContainerImageIo::can_write_file("h5"));
    }

    #[test]
    fn test_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ramp.h5");
        let values = write_ramp(&path, ImageIoConfig::new(), vec![5, 4, 3], 1);

        let mut io = ContainerImageIo::new(&path, ImageIoConfig::new());
        io.read_image_information().unwrap();
        assert_eq!(io.information().component_type, ComponentType::U16);
        assert_eq!(io.io_region().size, vec![5, 4, 3]);
        assert!(!io.uses_inferred_dimensions());
        assert_eq!(io.read_region::<u16>().unwrap(), values);

        let mut buffer = vec![0u8; 120];
        io.read(&mut buffer).unwrap();
        assert_eq!(u16::from_ne_bytes([buffer[2], buffer[3]]), 1);
        assert!(matches!(
            io.read_region::<f32>(),
            Err(ContainerError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_read_subregion() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("region.h5");
        write_ramp(&path, ImageIoConfig::new(), vec![4, 3], 2);

        let mut io = ContainerImageIo::new(&path, ImageIoConfig::new());
        io.read_image_information().unwrap();
        assert_eq!(io.information().number_of_components, 2);
        io.set_io_region(ImageIoRegion::new(vec![1, 2], vec![2, 1]));
        // Pixel (x, y) holds components 2 * (y * 4 + x) and the one after
        assert_eq!(io.read_region::<u16>().unwrap(), vec![18, 19, 20, 21]);

        let array = io.read_array::<u16>().unwrap();
        assert_eq!(array.shape(), &[1, 2, 2]);
    }

    #[test]
    fn test_buffer_length_is_checked() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("short.h5");
        write_ramp(&path, ImageIoConfig::new(), vec![2, 2], 1);

        let mut io = ContainerImageIo::new(&path, ImageIoConfig::new());
        io.read_image_information().unwrap();
        let mut buffer = vec![0u8; 3];
        assert!(matches!(
            io.read(&mut buffer),
            Err(ContainerError::DimensionMismatch(_))
        ));
        assert!(!io.is_open());
    }

    #[test]
    fn test_missing_path_and_dataset() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("paths.h5");
        write_ramp(&path, ImageIoConfig::new().with_path("/a"), vec![2], 1);

        let mut io = ContainerImageIo::new(&path, ImageIoConfig::new().with_path("/b"));
        assert!(matches!(
            io.read_image_information(),
            Err(ContainerError::PathNotFound(_))
        ));
        assert!(!io.dataset_exists());

        let io = ContainerImageIo::new(&path, ImageIoConfig::new().with_path("/a"));
        assert!(io.dataset_exists());
        let io = ContainerImageIo::new(
            &path,
            ImageIoConfig::new().with_path("/a").with_dataset_name("other"),
        );
        assert!(!io.dataset_exists());
    }

    #[test]
    fn test_metadata_group_required_when_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nometa.h5");
        write_ramp(&path, ImageIoConfig::new(), vec![2, 2], 1);

        let mut io = ContainerImageIo::new(&path, ImageIoConfig::new().with_metadata(true));
        assert!(matches!(
            io.read_image_information(),
            Err(ContainerError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_existence_check_keeps_writer_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("open.h5");
        let mut io = ContainerImageIo::new(&path, ImageIoConfig::new());
        io.set_information(ImageInformation::new(Geometry::new(vec![4, 2]), ComponentType::U8, 1));
        io.write_image_information().unwrap();
        assert!(io.is_open());

        assert!(io.dataset_exists());
        assert!(io.is_open());
        io.write_region(&[7u8; 8]).unwrap();
        io.close().unwrap();

        let mut reader = ContainerImageIo::new(&path, ImageIoConfig::new());
        reader.read_image_information().unwrap();
        assert_eq!(reader.read_region::<u8>().unwrap(), vec![7u8; 8]);
    }

    #[test]
    fn test_configuration_is_validated_before_io() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stride.h5");
        write_ramp(&path, ImageIoConfig::new(), vec![4, 4], 1);

        let strided = ImageIoConfig::new().with_stride(vec![0, 1]);
        let mut reader = ContainerImageIo::new(&path, strided.clone());
        assert!(matches!(
            reader.read_image_information(),
            Err(ContainerError::Configuration(_))
        ));
        assert!(!reader.is_open());

        let mut writer = ContainerImageIo::new(temp_dir.path().join("never.h5"), strided);
        writer.set_information(ImageInformation::new(Geometry::new(vec![4, 4]), ComponentType::U16, 1));
        assert!(matches!(
            writer.write_image_information(),
            Err(ContainerError::Configuration(_))
        ));
        assert!(!temp_dir.path().join("never.h5").exists());
    }

    #[test]
    fn test_display_summary() {
        let io = ContainerImageIo::new("summary.h5", ImageIoConfig::new().with_path("/s"));
        let summary = io.to_string();
        assert!(summary.contains("Dataset: /s/data"));
        assert!(summary.contains("Metadata entries: 0"));
    }
}
