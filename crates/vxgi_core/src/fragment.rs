//! Voxel fragments produced by voxelization.

use bevy::prelude::*;

/// One covered raster sample, appended by the voxelization fragment stage.
///
/// Layout matches `VoxelFragment` in `voxelize.wgsl` and `voxel_shader.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VoxelFragment {
    /// Linear emission
    pub emission: [f32; 3],
    /// `x + R * (y + R * z)`
    pub voxel_index: u32,
    /// `pack4x8unorm` albedo
    pub albedo: u32,
    /// `pack4x8snorm` world-space normal
    pub normal: u32,
    pub _padding: [u32; 2],
}
// Total: 32 bytes

impl VoxelFragment {
    pub fn new(voxel: UVec3, resolution: u32, albedo: Vec4, normal: Vec3, emission: Vec3) -> Self {
        Self {
            emission: emission.to_array(),
            voxel_index: linear_index(voxel, resolution),
            albedo: pack4x8unorm(albedo),
            normal: pack4x8snorm(normal.extend(0.0)),
            _padding: [0; 2],
        }
    }

    pub fn albedo(&self) -> Vec4 {
        unpack4x8unorm(self.albedo)
    }

    pub fn normal(&self) -> Vec3 {
        unpack4x8snorm(self.normal).truncate()
    }
}

/// Linear voxel index used by the fragment and accumulator buffers.
pub fn linear_index(voxel: UVec3, resolution: u32) -> u32 {
    voxel.x + resolution * (voxel.y + resolution * voxel.z)
}

/// Inverse of [`linear_index`].
pub fn voxel_from_index(index: u32, resolution: u32) -> UVec3 {
    UVec3::new(
        index % resolution,
        (index / resolution) % resolution,
        index / (resolution * resolution),
    )
}

// Same rounding as the WGSL built-ins of the same name.

pub fn pack4x8unorm(v: Vec4) -> u32 {
    v.to_array()
        .iter()
        .enumerate()
        .fold(0, |acc, (i, c)| {
            let byte = (0.5 + 255.0 * c.clamp(0.0, 1.0)).floor() as u32;
            acc | (byte << (8 * i))
        })
}

pub fn unpack4x8unorm(bits: u32) -> Vec4 {
    Vec4::from_array(std::array::from_fn(|i| ((bits >> (8 * i)) & 0xff) as f32 / 255.0))
}

pub fn pack4x8snorm(v: Vec4) -> u32 {
    v.to_array()
        .iter()
        .enumerate()
        .fold(0, |acc, (i, c)| {
            let value = (0.5 + 127.0 * c.clamp(-1.0, 1.0)).floor() as i32;
            acc | (((value as u32) & 0xff) << (8 * i))
        })
}

pub fn unpack4x8snorm(bits: u32) -> Vec4 {
    Vec4::from_array(std::array::from_fn(|i| {
        let byte = ((bits >> (8 * i)) & 0xff) as u8 as i8;
        (byte as f32 / 127.0).max(-1.0)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voxel_fragment_size() {
        assert_eq!(std::mem::size_of::<VoxelFragment>(), 32);
    }

    #[test]
    fn test_linear_index_inverse() {
        let voxel = UVec3::new(3, 17, 63);
        let index = linear_index(voxel, 64);
        assert_eq!(index, 3 + 64 * (17 + 64 * 63));
        assert_eq!(voxel_from_index(index, 64), voxel);
    }

    #[test]
    fn test_packing_matches_wgsl_rounding() {
        assert_eq!(pack4x8unorm(Vec4::new(1.0, 0.0, 0.5, 2.0)), 0xff80_00ff);
        assert_eq!(pack4x8snorm(Vec4::new(1.0, -1.0, 0.0, 0.0)), 0x0000_81_7f);

        let n = unpack4x8snorm(pack4x8snorm(Vec4::new(0.0, -1.0, 0.0, 0.0)));
        assert_eq!(n.y, -1.0);
    }

    #[test]
    fn test_fragment_accessors() {
        let frag = VoxelFragment::new(UVec3::ONE, 4, Vec4::ONE, Vec3::X, Vec3::splat(2.0));
        assert_eq!(frag.voxel_index, 21);
        assert_eq!(frag.albedo(), Vec4::ONE);
        assert_eq!(frag.normal(), Vec3::X);
        assert_eq!(frag.emission, [2.0; 3]);
    }
}
