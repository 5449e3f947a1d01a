//! Radiance pyramid layout.
//!
//! The pyramid is a chain of 3D radiance volumes. Level 0 has the effective
//! resolution `R`; every next level halves the previous one. When `R` is odd
//! (the `resolution + 1` addressing of the 3x3x3 Gaussian) the odd voxel is
//! kept at every level so the filter stays centred.

/// Number of pyramid levels bound for the lighting and shading programs.
pub const MAX_BOUND_LEVELS: usize = 9;

/// Sizes of every level of a radiance pyramid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PyramidLayout {
    sizes: Vec<u32>,
}

impl PyramidLayout {
    pub fn new(resolution: u32) -> Self {
        let len = pyramid_len(resolution);
        let m = resolution % 2;
        let mut sizes = Vec::with_capacity(len);
        let mut size = resolution;
        for _ in 0..len {
            sizes.push(size);
            size = (size - m) / 2 + m;
        }
        Self { sizes }
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn resolution(&self) -> u32 {
        self.sizes.first().copied().unwrap_or(0)
    }

    /// Edge length of level `level`.
    pub fn size(&self, level: usize) -> u32 {
        self.sizes[level]
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    /// Pyramid level bound to slot `slot` of the fixed-size binding array.
    /// Slots past the end repeat the coarsest level.
    pub fn binding_level(&self, slot: usize) -> usize {
        slot.min(self.len().saturating_sub(1))
    }
}

/// `floor(log2(resolution))`, 0 for an empty volume.
pub fn pyramid_len(resolution: u32) -> usize {
    if resolution == 0 {
        0
    } else {
        resolution.ilog2() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoxelResolution;

    #[test]
    fn test_even_resolutions() {
        let layout = PyramidLayout::new(64);
        assert_eq!(layout.sizes(), &[64, 32, 16, 8, 4, 2]);

        let layout = PyramidLayout::new(256);
        assert_eq!(layout.len(), 8);
        assert_eq!(layout.size(7), 2);
    }

    #[test]
    fn test_odd_resolution_keeps_centre_voxel() {
        let layout = PyramidLayout::new(65);
        assert_eq!(layout.sizes(), &[65, 33, 17, 9, 5, 3]);
    }

    #[test]
    fn test_level_relation_for_every_resolution() {
        for res in VoxelResolution::ALL {
            for plus_one in [0, 1] {
                let r = res.voxels() + plus_one;
                let m = r % 2;
                let layout = PyramidLayout::new(r);
                assert_eq!(layout.len(), (r as f32).log2().floor() as usize);
                assert_eq!(layout.size(0), r);
                for i in 1..layout.len() {
                    assert_eq!(layout.size(i), (layout.size(i - 1) - m) / 2 + m);
                }
            }
        }
    }

    #[test]
    fn test_binding_levels_clamp_to_coarsest() {
        let layout = PyramidLayout::new(32);
        assert_eq!(layout.len(), 5);
        let bound: Vec<usize> = (0..MAX_BOUND_LEVELS)
            .map(|slot| layout.binding_level(slot))
            .collect();
        assert_eq!(bound, vec![0, 1, 2, 3, 4, 4, 4, 4, 4]);

        let layout = PyramidLayout::new(256);
        assert_eq!(layout.binding_level(8), 7);
    }
}
