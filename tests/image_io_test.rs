//! Integration tests writing and reading images through container files

use hdc_imageio::{
    container::{AccessProperties, DatasetCreateProps},
    AccessMode, CompressionMethod, ComponentType, Container, ContainerError, ContainerImageIo,
    Dataspace, Geometry, Hyperslab, ImageInformation, ImageIoConfig, ImageIoRegion, StorageType,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_image<T: hdc_imageio::Element>(
    path: &Path,
    config: ImageIoConfig,
    geometry: Geometry,
    components: u64,
    values: &[T],
) {
    let mut writer = ContainerImageIo::new(path, config);
    writer.set_information(ImageInformation::new(geometry, T::COMPONENT, components));
    writer.write_region(values).unwrap();
    writer.close().unwrap();
}

fn read_information(path: &Path, config: ImageIoConfig) -> ContainerImageIo {
    let mut reader = ContainerImageIo::new(path, config);
    reader.read_image_information().unwrap();
    reader
}

/// Geometry survives a round trip for every dimensionality from 1 to 5
#[test]
fn test_geometry_round_trip_all_dimensionalities() {
    let temp_dir = TempDir::new().unwrap();

    for n in 1..=5usize {
        let path = temp_dir.path().join(format!("geometry_{}d.h5", n));
        let dimensions: Vec<u64> = (0..n as u64).map(|axis| axis + 2).collect();
        let mut geometry = Geometry::new(dimensions.clone());
        geometry.origin = (0..n).map(|axis| axis as f64 * -1.5).collect();
        geometry.spacing = (0..n).map(|axis| 0.5 + axis as f64).collect();
        // Swap the first two axes where there are two
        if n >= 2 {
            geometry.direction[0] = (0..n).map(|c| if c == 1 { 1.0 } else { 0.0 }).collect();
            geometry.direction[1] = (0..n).map(|c| if c == 0 { 1.0 } else { 0.0 }).collect();
        }

        let count: u64 = dimensions.iter().product();
        let values: Vec<f32> = (0..count).map(|v| v as f32 * 0.25).collect();
        write_image(&path, ImageIoConfig::new(), geometry.clone(), 1, &values);

        let mut reader = read_information(&path, ImageIoConfig::new());
        assert_eq!(reader.information().geometry, geometry, "dimensionality {}", n);
        assert_eq!(reader.information().component_type, ComponentType::F32);
        assert_eq!(reader.information().number_of_components, 1);
        assert_eq!(reader.read_region::<f32>().unwrap(), values);
    }
}

/// Interleaved components come back pixel by pixel, with the component axis last
#[test]
fn test_multi_component_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("rgb.hdf5");

    let values: Vec<u8> = (0..4 * 3 * 3).map(|v| v as u8).collect();
    write_image(&path, ImageIoConfig::new(), Geometry::new(vec![4, 3]), 3, &values);

    let mut reader = read_information(&path, ImageIoConfig::new());
    assert_eq!(reader.information().number_of_components, 3);
    assert_eq!(reader.information().geometry.dimensions, vec![4, 3]);

    let array = reader.read_array::<u8>().unwrap();
    assert_eq!(array.shape(), &[3, 4, 3]);
    // Pixel (x = 1, y = 2), second component
    assert_eq!(array[[2, 1, 1]], ((2 * 4 + 1) * 3 + 1) as u8);

    let mut raw = vec![0u8; values.len()];
    reader.read(&mut raw).unwrap();
    assert_eq!(raw, values);
}

/// Region reads return only the requested pixels
#[test]
fn test_streaming_region_reads() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stream.h5");

    let dims = [10u64, 20, 30];
    let values: Vec<u32> = (0..dims.iter().product::<u64>()).map(|v| v as u32).collect();
    write_image(&path, ImageIoConfig::new(), Geometry::new(dims.to_vec()), 1, &values);

    let mut reader = read_information(&path, ImageIoConfig::new());
    assert_eq!(reader.io_region().size, dims.to_vec());

    // One z slice at a time
    for z in [0u64, 7, 29] {
        reader.set_io_region(ImageIoRegion::new(vec![0, 0, z], vec![10, 20, 1]));
        let slice = reader.read_region::<u32>().unwrap();
        assert_eq!(slice.len(), 200);
        assert_eq!(slice[0], (z * 200) as u32);
        assert_eq!(slice[199], (z * 200 + 199) as u32);
    }

    // A small box in the middle
    reader.set_io_region(ImageIoRegion::new(vec![2, 3, 4], vec![3, 2, 2]));
    let block = reader.read_region::<u32>().unwrap();
    let expected: Vec<u32> = (4..6u64)
        .flat_map(|z| (3..5u64).flat_map(move |y| (2..5u64).map(move |x| (z * 200 + y * 10 + x) as u32)))
        .collect();
    assert_eq!(block, expected);

    let array = reader.read_array::<u32>().unwrap();
    assert_eq!(array.shape(), &[2, 2, 3]);
}

/// A stride override halves the extent and doubles the spacing
#[test]
fn test_stride_override() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stride.h5");

    let dims = vec![100u64, 100, 100];
    let values: Vec<u8> = (0..1_000_000u64).map(|v| (v % 100) as u8).collect();
    let mut geometry = Geometry::new(dims);
    geometry.spacing = vec![0.5, 0.75, 1.0];
    write_image(&path, ImageIoConfig::new(), geometry, 1, &values);

    let config = ImageIoConfig::new().with_stride(vec![2, 2, 2]);
    let mut reader = read_information(&path, config);
    let info = reader.information();
    assert_eq!(info.geometry.dimensions, vec![50, 50, 50]);
    assert_eq!(info.geometry.spacing, vec![1.0, 1.5, 2.0]);

    let sampled = reader.read_region::<u8>().unwrap();
    assert_eq!(sampled.len(), 125_000);
    assert_eq!(&sampled[..4], &[0, 2, 4, 6]);
    assert_eq!(sampled[49], 98);

    // An offset larger than the strided extent cannot be honored
    let config = ImageIoConfig::new()
        .with_stride(vec![2, 2, 2])
        .with_offset(vec![60, 0, 0]);
    let mut reader = ContainerImageIo::new(&path, config);
    assert!(matches!(
        reader.read_image_information(),
        Err(ContainerError::DimensionMismatch(_))
    ));
}

/// Offset and size overrides replace the region and must match the dimensionality
#[test]
fn test_offset_and_size_overrides() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("override.h5");

    let values: Vec<i16> = (0..64).map(|v| v as i16 - 32).collect();
    write_image(&path, ImageIoConfig::new(), Geometry::new(vec![8, 8]), 1, &values);

    let config = ImageIoConfig::new().with_offset(vec![2, 1]).with_size(vec![3, 2]);
    let mut reader = read_information(&path, config);
    assert_eq!(reader.information().geometry.dimensions, vec![3, 2]);
    assert_eq!(
        reader.read_region::<i16>().unwrap(),
        vec![-22, -21, -20, -14, -13, -12]
    );

    let mut reader = ContainerImageIo::new(&path, ImageIoConfig::new().with_size(vec![3]));
    assert!(matches!(
        reader.read_image_information(),
        Err(ContainerError::DimensionMismatch(_))
    ));
}

/// Only real container files are readable, whatever their extension
#[test]
fn test_can_read_file() {
    let temp_dir = TempDir::new().unwrap();

    assert!(!ContainerImageIo::can_read_file(temp_dir.path().join("missing.h5")));
    assert!(!ContainerImageIo::can_read_file(temp_dir.path()));

    let empty = temp_dir.path().join("empty.h5");
    fs::write(&empty, b"").unwrap();
    assert!(!ContainerImageIo::can_read_file(&empty));

    let text = temp_dir.path().join("notes.h5");
    fs::write(&text, "plain text, not a container").unwrap();
    assert!(!ContainerImageIo::can_read_file(&text));

    let image = temp_dir.path().join("image.nrrd");
    write_image(&image, ImageIoConfig::new(), Geometry::new(vec![2, 2]), 1, &[1u8, 2, 3, 4]);
    assert!(ContainerImageIo::can_read_file(&image));

    let mut reader = ContainerImageIo::new(&text, ImageIoConfig::new());
    assert!(matches!(
        reader.read_image_information(),
        Err(ContainerError::NotAContainer(_))
    ));
    let mut reader = ContainerImageIo::new(temp_dir.path().join("missing.h5"), ImageIoConfig::new());
    assert!(matches!(
        reader.read_image_information(),
        Err(ContainerError::NotFound(_))
    ));
}

/// Writing image information twice on one object only creates the dataset once
#[test]
fn test_write_image_information_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("once.h5");

    let mut writer = ContainerImageIo::new(&path, ImageIoConfig::new());
    writer.set_information(ImageInformation::new(
        Geometry::new(vec![3, 3]),
        ComponentType::U16,
        1,
    ));
    writer.write_image_information().unwrap();
    writer.write_image_information().unwrap();
    writer.write_region(&[7u16; 9]).unwrap();
    writer.close().unwrap();

    let mut reader = read_information(&path, ImageIoConfig::new());
    assert_eq!(reader.read_region::<u16>().unwrap(), vec![7u16; 9]);
}

/// Existing datasets are kept unless overwriting is enabled
#[test]
fn test_overwrite_and_already_exists() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("overwrite.h5");
    let config = ImageIoConfig::new().with_path("/study");

    write_image(&path, config.clone(), Geometry::new(vec![2, 2]), 1, &[1i32, 2, 3, 4]);

    let mut writer = ContainerImageIo::new(&path, config.clone());
    writer.set_information(ImageInformation::new(
        Geometry::new(vec![3]),
        ComponentType::I32,
        1,
    ));
    assert!(matches!(
        writer.write_region(&[5i32, 6, 7]),
        Err(ContainerError::AlreadyExists(_))
    ));
    assert!(!writer.is_open());

    write_image(
        &path,
        config.clone().with_overwrite(true),
        Geometry::new(vec![3]),
        1,
        &[5i32, 6, 7],
    );
    let mut reader = read_information(&path, config.clone());
    assert_eq!(reader.information().geometry.dimensions, vec![3]);
    assert_eq!(reader.read_region::<i32>().unwrap(), vec![5, 6, 7]);

    // Another image in a different group of the same file
    let other = ImageIoConfig::new().with_path("/other");
    write_image(&path, other.clone(), Geometry::new(vec![1]), 1, &[9i32]);
    assert!(ContainerImageIo::new(&path, config).dataset_exists());
    assert!(ContainerImageIo::new(&path, other).dataset_exists());

    // Recreating truncates everything
    write_image(
        &path,
        ImageIoConfig::new().with_path("/other").with_recreate(true),
        Geometry::new(vec![1]),
        1,
        &[10i32],
    );
    assert!(!ContainerImageIo::new(&path, ImageIoConfig::new().with_path("/study")).dataset_exists());
}

/// Chunked and compressed images read back exactly, including partial regions
#[test]
fn test_chunked_and_compressed_io() {
    let temp_dir = TempDir::new().unwrap();
    let dims = vec![16u64, 12, 9];
    let values: Vec<f64> = (0..dims.iter().product::<u64>()).map(|v| (v as f64).sqrt()).collect();

    let configs = [
        ("chunked.h5", ImageIoConfig::new().with_chunking(true)),
        ("deflate.h5", ImageIoConfig::new().with_compression(CompressionMethod::Deflate, 6)),
        ("zstd.h5", ImageIoConfig::new().with_compression(CompressionMethod::Zstd, 3)),
    ];

    for (name, config) in configs {
        let path = temp_dir.path().join(name);
        write_image(&path, config.clone(), Geometry::new(dims.clone()), 1, &values);

        let container = Container::open(&path, AccessMode::ReadOnly, AccessProperties::default()).unwrap();
        assert_eq!(container.dataset_layout("/data").unwrap(), "chunked", "{}", name);
        drop(container);

        let mut reader = read_information(&path, config);
        assert_eq!(reader.read_region::<f64>().unwrap(), values, "{}", name);

        reader.set_io_region(ImageIoRegion::new(vec![5, 11, 8], vec![2, 1, 1]));
        let tail = reader.read_region::<f64>().unwrap();
        let first = (8 * 12 * 16 + 11 * 16 + 5) as f64;
        assert_eq!(tail, vec![first.sqrt(), (first + 1.0).sqrt()], "{}", name);
    }
}

/// Slice-by-slice writes through the region fill the whole image
#[test]
fn test_streamed_writes() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("slices.h5");

    let mut writer = ContainerImageIo::new(&path, ImageIoConfig::new().with_chunking(true));
    writer.set_information(ImageInformation::new(
        Geometry::new(vec![4, 3, 5]),
        ComponentType::U16,
        1,
    ));
    for z in 0..5u64 {
        writer.set_io_region(ImageIoRegion::new(vec![0, 0, z], vec![4, 3, 1]));
        writer.write_region(&[z as u16 * 10; 12]).unwrap();
    }
    writer.close().unwrap();

    let mut reader = read_information(&path, ImageIoConfig::new());
    let values = reader.read_region::<u16>().unwrap();
    assert_eq!(values.len(), 60);
    assert_eq!(values[0], 0);
    assert_eq!(values[12 * 3], 30);
    assert_eq!(values[59], 40);
}

/// A dataset without a Dimension attribute takes its geometry from the storage shape
#[test]
fn test_dimensions_inferred_from_storage() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("plain.h5");

    let mut container = Container::create(&path, AccessProperties::default()).unwrap();
    let space = Dataspace::simple(vec![3, 4]);
    container
        .create_dataset("/data", StorageType::U8, &space, &DatasetCreateProps::default())
        .unwrap();
    let values: Vec<u8> = (0..12).collect();
    container.write("/data", &Hyperslab::all(&space), &values).unwrap();
    container.close().unwrap();

    let mut reader = read_information(&path, ImageIoConfig::new());
    assert!(reader.uses_inferred_dimensions());
    assert_eq!(reader.information().geometry, Geometry::new(vec![4, 3]));
    assert_eq!(reader.read_region::<u8>().unwrap(), values);
}

/// Component types without a storage counterpart are rejected before touching the file
#[test]
fn test_unsupported_component_type() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("long_double.h5");

    let mut writer = ContainerImageIo::new(&path, ImageIoConfig::new());
    writer.set_information(ImageInformation::new(
        Geometry::new(vec![2]),
        ComponentType::LongDouble,
        1,
    ));
    assert!(matches!(
        writer.write_image_information(),
        Err(ContainerError::UnsupportedType(_))
    ));
    assert!(!path.exists());
    assert!(ContainerImageIo::can_write_file(&path));
}
