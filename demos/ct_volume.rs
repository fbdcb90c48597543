//! Example: Write a CT-like volume with metadata, then stream it back slice by slice
//!
//! Run with: cargo run --example ct_volume

use hdc_imageio::{
    CompressionMethod, ComponentType, ContainerImageIo, Geometry, ImageInformation, ImageIoConfig,
    ImageIoRegion, MetaValue,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("hdc-imageio Example: CT Volume");
    println!("==============================\n");

    let path = std::env::temp_dir().join("hdc_imageio_ct_volume.h5");
    let config = ImageIoConfig::new()
        .with_path("/patient/series1")
        .with_metadata(true)
        .with_recreate(true)
        .with_compression(CompressionMethod::Zstd, 3);

    // 128 x 128 x 64 voxels, 0.7 mm in plane, 2.5 mm slices
    let mut geometry = Geometry::new(vec![128, 128, 64]);
    geometry.spacing = vec![0.7, 0.7, 2.5];
    geometry.origin = vec![-44.8, -44.8, -80.0];

    let mut writer = ContainerImageIo::new(&path, config.clone());
    writer.set_information(ImageInformation::new(geometry, ComponentType::I16, 1));
    writer.metadata_mut().insert("Modality", "CT");
    writer.metadata_mut().insert("SliceThickness", 2.5);
    writer.metadata_mut().insert("SeriesNumber", MetaValue::ULong(3));
    writer
        .metadata_mut()
        .insert("WindowCenterWidth", MetaValue::ShortArray(vec![40, 400]));

    // A sphere of soft tissue in air
    let voxels: Vec<i16> = (0..128 * 128 * 64)
        .map(|i| {
            let (x, y, z) = (i % 128, (i / 128) % 128, i / (128 * 128));
            let (dx, dy, dz) = (x as f64 - 64.0, y as f64 - 64.0, (z as f64 - 32.0) * 3.5);
            if (dx * dx + dy * dy + dz * dz).sqrt() < 50.0 {
                40
            } else {
                -1000
            }
        })
        .collect();
    writer.write_region(&voxels)?;
    writer.close()?;

    let file_size = std::fs::metadata(&path)?.len();
    println!("Wrote {} ({} bytes on disk)\n", path.display(), file_size);

    let mut reader = ContainerImageIo::new(&path, config.with_recreate(false));
    reader.read_image_information()?;
    println!("{}\n", reader);

    println!("Metadata:");
    for (key, value) in reader.metadata().iter() {
        println!("  {} ({}) = {}", key, value.type_name(), value);
    }
    println!();

    println!("Tissue voxels per slice:");
    for z in (0..64).step_by(8) {
        reader.set_io_region(ImageIoRegion::new(vec![0, 0, z], vec![128, 128, 1]));
        let slice = reader.read_region::<i16>()?;
        let tissue = slice.iter().filter(|&&v| v > -500).count();
        println!("  z = {:>2}: {:>5}", z, tissue);
    }

    reader.close()?;
    std::fs::remove_file(&path)?;
    Ok(())
}
