//! Indirect dispatch arguments.
//!
//! The voxel shader is dispatched indirectly: the fragment counter is copied
//! into a three-word argument buffer and a one-thread kernel turns the
//! work-item counts into group counts in place. [`parameterize`] is the same
//! arithmetic on the CPU.

use crate::num_threads::NumThreads;

/// Initial contents of the indirect argument buffer.
pub const INITIAL_INDIRECT_ARGS: [u32; 3] = [1, 1, 1];

/// Largest group count a single dispatch axis accepts.
pub const MAX_GROUPS_PER_AXIS: u32 = 65_535;

/// Work-item counts to group counts: `max(1, ceil(n / t))` per axis, capped
/// at [`MAX_GROUPS_PER_AXIS`]. The counter keeps counting past the fragment
/// buffer's capacity, so the cap only drops groups that would find nothing.
pub fn parameterize(args: [u32; 3], threads: NumThreads) -> [u32; 3] {
    let groups = threads.groups_for(args.into());
    [groups.x, groups.y, groups.z].map(|g| g.clamp(1, MAX_GROUPS_PER_AXIS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_fragments_dispatch_one_group() {
        assert_eq!(parameterize([0, 0, 0], NumThreads::new(256, 1, 1)), [1, 1, 1]);
    }

    #[test]
    fn test_rounds_up_per_axis() {
        let threads = NumThreads::new(64, 4, 2);
        for n in [1u32, 63, 64, 65, 1000, 262_144] {
            let out = parameterize([n, n, n], threads);
            assert_eq!(out[0], n.div_ceil(64));
            assert_eq!(out[1], n.div_ceil(4));
            assert_eq!(out[2], n.div_ceil(2));
        }
    }

    #[test]
    fn test_overflowing_counter_is_capped() {
        let out = parameterize([u32::MAX, 1, 1], NumThreads::new(256, 1, 1));
        assert_eq!(out, [MAX_GROUPS_PER_AXIS, 1, 1]);
    }

    #[test]
    fn test_unit_axes_stay_one() {
        let out = parameterize([1000, INITIAL_INDIRECT_ARGS[1], INITIAL_INDIRECT_ARGS[2]], NumThreads::new(256, 1, 1));
        assert_eq!(out, [4, 1, 1]);
    }
}
