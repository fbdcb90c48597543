//! Mapping a requested image region onto a storage hyperslab

use crate::container::{Dataspace, Hyperslab};
use crate::error::{ContainerError, Result};
use crate::types::ImageIoRegion;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Explicit per-axis region properties, fastest-moving axis first.
///
/// A `Some` vector replaces the corresponding property of the requested region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOverrides {
    pub offset: Option<Vec<u64>>,
    pub size: Option<Vec<u64>>,
    pub stride: Option<Vec<u64>>,
}

impl RegionOverrides {
    pub fn is_empty(&self) -> bool {
        self.offset.is_none() && self.size.is_none() && self.stride.is_none()
    }
}

/// Storage rank of an image: one axis per dimension plus one for interleaved components
pub fn storage_rank(dimensions: usize, components: u64) -> usize {
    dimensions + usize::from(components > 1)
}

/// Where a region lives in the dataset and the shape it has in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSelection {
    pub file_selection: Hyperslab,
    pub memory_space: Dataspace,
}

impl StreamingSelection {
    pub fn num_elements(&self) -> u64 {
        self.file_selection.num_elements()
    }
}

/// Compute the storage-order hyperslab for `region`
pub fn select_region(
    region: &ImageIoRegion,
    dimensions: usize,
    components: u64,
    overrides: &RegionOverrides,
) -> Result<StreamingSelection> {
    let rank = storage_rank(dimensions, components);
    let mut offset = vec![0u64; rank];
    let mut size = vec![1u64; rank];
    let mut stride = vec![1u64; rank];

    // The fastest storage axis holds the components of one pixel
    let mut i = 0;
    if components > 1 {
        size[rank - 1] = components;
        i += 1;
    }

    let mut j = 0;
    while j < region.image_dimension() && i < rank {
        let axis = rank - i - 1;
        offset[axis] = pick(&overrides.offset, j, "offset")?
            .unwrap_or_else(|| region.index.get(j).copied().unwrap_or(0));
        size[axis] = pick(&overrides.size, j, "size")?.unwrap_or(region.size[j]);
        stride[axis] = pick(&overrides.stride, j, "stride")?.unwrap_or(1);
        i += 1;
        j += 1;
    }

    debug!(
        "streaming selection: offset {:?}, size {:?}, stride {:?}",
        offset, size, stride
    );
    let file_selection = Hyperslab::new(offset, size, stride);
    let memory_space = file_selection.memory_space();
    Ok(StreamingSelection {
        file_selection,
        memory_space,
    })
}

fn pick(values: &Option<Vec<u64>>, axis: usize, what: &str) -> Result<Option<u64>> {
    match values {
        None => Ok(None),
        Some(values) => values.get(axis).copied().map(Some).ok_or_else(|| {
            ContainerError::DimensionMismatch(format!(
                "{} override has no entry for axis {}",
                what, axis
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_region() {
        let region = ImageIoRegion::from_size(vec![10, 20, 30]);
        let selection = select_region(&region, 3, 1, &RegionOverrides::default()).unwrap();
        assert_eq!(selection.file_selection.offset, vec![0, 0, 0]);
        assert_eq!(selection.file_selection.count, vec![30, 20, 10]);
        assert_eq!(selection.file_selection.stride, vec![1, 1, 1]);
        assert_eq!(selection.memory_space.dims(), &[30, 20, 10]);
    }

    #[test]
    fn test_multi_component_region() {
        let region = ImageIoRegion::from_size(vec![10, 20, 30]);
        let selection = select_region(&region, 3, 3, &RegionOverrides::default()).unwrap();
        assert_eq!(selection.file_selection.offset, vec![0, 0, 0, 0]);
        assert_eq!(selection.file_selection.count, vec![30, 20, 10, 3]);
        assert_eq!(selection.num_elements(), 18000);
    }

    #[test]
    fn test_region_index_and_overrides() {
        let region = ImageIoRegion::new(vec![1, 2], vec![3, 4]);
        let selection = select_region(&region, 2, 1, &RegionOverrides::default()).unwrap();
        assert_eq!(selection.file_selection.offset, vec![2, 1]);
        assert_eq!(selection.file_selection.count, vec![4, 3]);

        let overrides = RegionOverrides {
            offset: Some(vec![5, 0]),
            size: None,
            stride: Some(vec![2, 3]),
        };
        let selection = select_region(&region, 2, 1, &overrides).unwrap();
        assert_eq!(selection.file_selection.offset, vec![0, 5]);
        assert_eq!(selection.file_selection.count, vec![4, 3]);
        assert_eq!(selection.file_selection.stride, vec![3, 2]);
    }

    #[test]
    fn test_lower_rank_region_is_padded() {
        let region = ImageIoRegion::from_size(vec![8]);
        let selection = select_region(&region, 3, 2, &RegionOverrides::default()).unwrap();
        assert_eq!(selection.file_selection.count, vec![1, 1, 8, 2]);
        assert_eq!(selection.file_selection.offset, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_short_override_is_rejected() {
        let region = ImageIoRegion::from_size(vec![4, 4]);
        let overrides = RegionOverrides {
            size: Some(vec![2]),
            ..RegionOverrides::default()
        };
        assert!(matches!(
            select_region(&region, 2, 1, &overrides),
            Err(ContainerError::DimensionMismatch(_))
        ));
        assert!(!overrides.is_empty());
        assert!(RegionOverrides::default().is_empty());
    }
}
