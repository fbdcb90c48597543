//! Geometric attributes attached to an image dataset
//!
//! The four attributes hold vectors in fastest-moving-first order, exactly as
//! the image describes itself. When they are missing the geometry is inferred
//! from the dataset's storage shape.

use crate::container::{Attribute, Container};
use crate::error::{ContainerError, Result};
use crate::streaming::RegionOverrides;
use crate::types::StorageType;
use crate::utils::{cast_elements, reverse_axes};
use num_traits::NumCast;
use tracing::debug;

/// Origin attribute name
pub const ORIGIN: &str = "Origin";
/// Spacing attribute name
pub const SPACING: &str = "Spacing";
/// Dimension attribute name
pub const DIMENSION: &str = "Dimension";
/// Direction cosine matrix attribute name
pub const DIRECTIONS: &str = "Directions";

/// Physical description of an image grid
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Size along each axis
    pub dimensions: Vec<u64>,
    /// Physical position of the first pixel
    pub origin: Vec<f64>,
    /// Physical distance between pixels
    pub spacing: Vec<f64>,
    /// Row `i` is the direction of axis `i`
    pub direction: Vec<Vec<f64>>,
}

impl Geometry {
    /// Geometry with zero origin, unit spacing and identity direction
    pub fn new(dimensions: Vec<u64>) -> Self {
        let n = dimensions.len();
        Self {
            dimensions,
            origin: vec![0.0; n],
            spacing: vec![1.0; n],
            direction: identity(n),
        }
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensions.len()
    }

    /// Check every vector matches the dimensionality
    pub fn validate(&self) -> Result<()> {
        let n = self.dimensionality();
        if self.origin.len() != n || self.spacing.len() != n {
            return Err(ContainerError::DimensionMismatch(format!(
                "origin has {} and spacing {} entries for {} dimensions",
                self.origin.len(),
                self.spacing.len(),
                n
            )));
        }
        if self.direction.len() != n || self.direction.iter().any(|row| row.len() != n) {
            return Err(ContainerError::DimensionMismatch(format!(
                "direction matrix is not {}x{}",
                n, n
            )));
        }
        Ok(())
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Identity direction matrix
pub fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// Geometry reconstructed from a stored dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetGeometry {
    pub geometry: Geometry,
    pub number_of_components: u64,
    /// No Dimension attribute was stored; sizes come from the storage shape
    pub inferred: bool,
}

/// Attach the four geometry attributes to `dataset`.
///
/// None of them may exist yet.
pub fn write_geometry(container: &mut Container, dataset: &str, geometry: &Geometry) -> Result<()> {
    geometry.validate()?;
    for name in [ORIGIN, SPACING, DIMENSION, DIRECTIONS] {
        if container.attribute_exists(dataset, name)? {
            return Err(ContainerError::AlreadyExists(format!(
                "attribute {} on {}",
                name, dataset
            )));
        }
    }

    container.create_attribute(
        dataset,
        ORIGIN,
        Attribute::vector(StorageType::F64, &geometry.origin),
    )?;
    container.create_attribute(
        dataset,
        SPACING,
        Attribute::vector(StorageType::F64, &geometry.spacing),
    )?;
    container.create_attribute(
        dataset,
        DIMENSION,
        Attribute::vector(StorageType::U64, &geometry.dimensions),
    )?;
    container.create_attribute(
        dataset,
        DIRECTIONS,
        Attribute::matrix(StorageType::F64, &geometry.direction),
    )?;
    Ok(())
}

/// Rebuild geometry from `dataset`, applying explicit region overrides
pub fn read_geometry(
    container: &Container,
    dataset: &str,
    overrides: &RegionOverrides,
) -> Result<DatasetGeometry> {
    let storage_dims = container.dataset_space(dataset)?.dims().to_vec();

    let (dimensions, number_of_components, inferred) =
        if container.attribute_exists(dataset, DIMENSION)? {
            let dimensions = read_dimensions(container.attribute(dataset, DIMENSION)?)?;
            let n = dimensions.len();
            let components = if storage_dims.len() > n {
                storage_dims[n]
            } else {
                1
            };
            (dimensions, components, false)
        } else {
            debug!(
                "no {} attribute on {}, inferring from storage shape {:?}",
                DIMENSION, dataset, storage_dims
            );
            (reverse_axes(&storage_dims), 1, true)
        };

    let n = dimensions.len();
    let mut geometry = Geometry::new(dimensions);

    if let Some(size) = &overrides.size {
        check_override("size", size, n)?;
        geometry.dimensions = size.clone();
    }

    if container.attribute_exists(dataset, DIRECTIONS)? {
        geometry.direction = read_matrix(container.attribute(dataset, DIRECTIONS)?, DIRECTIONS)?;
    }
    if container.attribute_exists(dataset, ORIGIN)? {
        geometry.origin = read_vector(container.attribute(dataset, ORIGIN)?, ORIGIN)?;
    }
    if container.attribute_exists(dataset, SPACING)? {
        geometry.spacing = read_vector(container.attribute(dataset, SPACING)?, SPACING)?;
    }
    geometry.validate()?;

    if let Some(offset) = &overrides.offset {
        check_override("offset", offset, n)?;
    }

    if let Some(stride) = &overrides.stride {
        check_override("stride", stride, n)?;
        for (spacing, &step) in geometry.spacing.iter_mut().zip(stride) {
            *spacing *= step as f64;
        }

        if overrides.size.is_none() {
            for axis in 0..n {
                if stride[axis] <= 1 {
                    continue;
                }
                let offset = overrides.offset.as_ref().map_or(0, |o| o[axis]);
                geometry.dimensions[axis] = (geometry.dimensions[axis] / stride[axis])
                    .checked_sub(offset)
                    .ok_or_else(|| {
                        ContainerError::DimensionMismatch(format!(
                            "offset {} exceeds the {} strided samples of axis {}",
                            offset,
                            geometry.dimensions[axis] / stride[axis],
                            axis
                        ))
                    })?;
            }
        }
    }

    debug!(
        "geometry of {}: dimensions {:?}, {} component(s)",
        dataset, geometry.dimensions, number_of_components
    );
    Ok(DatasetGeometry {
        geometry,
        number_of_components,
        inferred,
    })
}

fn check_override(what: &str, values: &[u64], n: usize) -> Result<()> {
    if values.len() != n {
        return Err(ContainerError::DimensionMismatch(format!(
            "{} override has {} entries for {} dimensions",
            what,
            values.len(),
            n
        )));
    }
    Ok(())
}

fn read_dimensions(attribute: &Attribute) -> Result<Vec<u64>> {
    match attribute.storage_type()? {
        StorageType::F16 | StorageType::F32 | StorageType::F64 | StorageType::F128 => {
            Err(ContainerError::UnrecognizedStorageType(format!(
                "{} must hold integers",
                DIMENSION
            )))
        }
        _ => read_vector(attribute, DIMENSION),
    }
}

fn read_vector<T: NumCast>(attribute: &Attribute, name: &str) -> Result<Vec<T>> {
    if attribute.rank() != 1 {
        return Err(ContainerError::RankMismatch(format!(
            "{} has rank {}, expected 1",
            name,
            attribute.rank()
        )));
    }
    cast_elements(attribute.storage_type()?, &attribute.data)
}

fn read_matrix(attribute: &Attribute, name: &str) -> Result<Vec<Vec<f64>>> {
    if attribute.rank() != 2 {
        return Err(ContainerError::RankMismatch(format!(
            "{} has rank {}, expected 2",
            name,
            attribute.rank()
        )));
    }

    let columns = attribute.dims[1] as usize;
    let values: Vec<f64> = cast_elements(attribute.storage_type()?, &attribute.data)?;
    if columns == 0 {
        return Ok(vec![Vec::new(); attribute.dims[0] as usize]);
    }
    Ok(values.chunks(columns).map(<[f64]>::to_vec).collect())
}
