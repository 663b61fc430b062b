//! Linear bit indexing and Morton arithmetic for subtree nodes.
//!
//! Tile and content availability bitstreams store one bit per node, laid
//! out level by level: all of level 0, then all of level 1 in Morton
//! order, and so on. The child-subtree bitstream holds a single level (the
//! one immediately below the subtree's deepest level), so its Morton
//! indices map to bits directly with no level offset.
//!
//! All arithmetic is exact `u64` arithmetic. Because the branching factor
//! is a power of two, `branching_factor^level` is a bit shift; the shift
//! amount must stay below 64, which supports up to 31 levels per subtree
//! for quadtrees and 21 for octrees. Real datasets use single-digit
//! subtree depths.

use serde::Deserialize;

/// How a tile subdivides into children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Subdivision {
    /// Four children per tile, Morton order over (x, y).
    Quadtree,
    /// Eight children per tile, Morton order over (x, y, z).
    Octree,
}

impl Subdivision {
    /// Number of children per tile: 4 for quadtrees, 8 for octrees.
    #[must_use]
    pub fn branching_factor(self) -> u64 {
        1 << self.log2_branching_factor()
    }

    /// Base-2 logarithm of the branching factor: 2 for quadtrees, 3 for
    /// octrees. One Morton digit is this many bits wide.
    #[must_use]
    pub fn log2_branching_factor(self) -> u32 {
        match self {
            Self::Quadtree => 2,
            Self::Octree => 3,
        }
    }

    /// Number of bit positions preceding `level` in the tile bitstream,
    /// i.e. the total node count of levels `0..level`.
    ///
    /// For an octree, `level_offset(2)` is `1 + 8 = 9`.
    ///
    /// # Panics
    ///
    /// Panics if `level` exceeds the supported depth for this subdivision
    /// (31 for quadtrees, 21 for octrees).
    #[must_use]
    pub fn level_offset(self, level: u32) -> u64 {
        let b = self.log2_branching_factor();
        assert!(
            b * level < 64,
            "level {level} exceeds the supported subtree depth"
        );
        // Geometric series (bf^level - 1) / (bf - 1), with bf^level as a shift.
        ((1u64 << (b * level)) - 1) / (self.branching_factor() - 1)
    }

    /// Number of nodes in a subtree with `levels` levels; equals the bit
    /// length of its tile and content availability streams.
    #[must_use]
    pub fn node_count(self, levels: u32) -> u64 {
        self.level_offset(levels)
    }

    /// Number of child subtrees below a subtree with `levels` levels;
    /// equals the bit length of its child-subtree availability stream.
    ///
    /// # Panics
    ///
    /// Panics if `levels` exceeds the supported depth.
    #[must_use]
    pub fn child_subtree_count(self, levels: u32) -> u64 {
        let b = self.log2_branching_factor();
        assert!(
            b * levels < 64,
            "{levels} levels exceeds the supported subtree depth"
        );
        1u64 << (b * levels)
    }

    /// Morton index of a node's parent, one level up.
    ///
    /// A parent's Morton code is the child's code with its lowest Morton
    /// digit removed, e.g. `parent_morton_index(0b101010101) == 0b101010`
    /// for an octree.
    #[must_use]
    pub fn parent_morton_index(self, morton_index: u64) -> u64 {
        morton_index >> self.log2_branching_factor()
    }

    /// Linear bit index of a node given its level within the subtree and
    /// its Morton index within that level.
    ///
    /// # Panics
    ///
    /// Panics if `morton_index` does not fit in `level` Morton digits.
    #[must_use]
    pub fn linear_bit_index(self, level: u32, morton_index: u64) -> u64 {
        let b = self.log2_branching_factor();
        assert!(
            b * level >= 64 || morton_index < (1u64 << (b * level)),
            "morton index {morton_index} out of range for level {level}"
        );
        self.level_offset(level) + morton_index
    }

    /// Morton index for the given coordinates. Quadtrees interleave
    /// `(x, y)` and require `z == 0`.
    ///
    /// # Panics
    ///
    /// Panics if a coordinate is out of range for this subdivision, or if
    /// `z != 0` for a quadtree.
    #[must_use]
    pub fn morton_index(self, x: u32, y: u32, z: u32) -> u64 {
        match self {
            Self::Quadtree => {
                assert!(z == 0, "quadtree coordinates have no z component");
                morton_encode_2d(x, y)
            }
            Self::Octree => morton_encode_3d(x, y, z),
        }
    }
}

/// Interleave two 32-bit coordinates into a 64-bit Morton code.
///
/// Bit `i` of `x` lands at bit `2i`, bit `i` of `y` at bit `2i + 1`.
#[must_use]
pub fn morton_encode_2d(x: u32, y: u32) -> u64 {
    spread_2(u64::from(x)) | (spread_2(u64::from(y)) << 1)
}

/// Recover `(x, y)` from a 2D Morton code.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn morton_decode_2d(code: u64) -> (u32, u32) {
    (compact_2(code) as u32, compact_2(code >> 1) as u32)
}

/// Interleave three coordinates into a 64-bit Morton code.
///
/// # Panics
///
/// Panics if a coordinate does not fit in 21 bits.
#[must_use]
pub fn morton_encode_3d(x: u32, y: u32, z: u32) -> u64 {
    assert!(
        x < (1 << 21) && y < (1 << 21) && z < (1 << 21),
        "3d morton coordinates must fit in 21 bits"
    );
    spread_3(u64::from(x)) | (spread_3(u64::from(y)) << 1) | (spread_3(u64::from(z)) << 2)
}

/// Recover `(x, y, z)` from a 3D Morton code.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn morton_decode_3d(code: u64) -> (u32, u32, u32) {
    (
        compact_3(code) as u32,
        compact_3(code >> 1) as u32,
        compact_3(code >> 2) as u32,
    )
}

/// Spread the low 32 bits of `v` so each lands two positions apart.
fn spread_2(mut v: u64) -> u64 {
    v &= 0xffff_ffff;
    v = (v | (v << 16)) & 0x0000_ffff_0000_ffff;
    v = (v | (v << 8)) & 0x00ff_00ff_00ff_00ff;
    v = (v | (v << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    v = (v | (v << 2)) & 0x3333_3333_3333_3333;
    v = (v | (v << 1)) & 0x5555_5555_5555_5555;
    v
}

/// Inverse of [`spread_2`].
fn compact_2(mut v: u64) -> u64 {
    v &= 0x5555_5555_5555_5555;
    v = (v | (v >> 1)) & 0x3333_3333_3333_3333;
    v = (v | (v >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
    v = (v | (v >> 4)) & 0x00ff_00ff_00ff_00ff;
    v = (v | (v >> 8)) & 0x0000_ffff_0000_ffff;
    (v | (v >> 16)) & 0xffff_ffff
}

/// Spread the low 21 bits of `v` so each lands three positions apart.
fn spread_3(mut v: u64) -> u64 {
    v &= 0x1f_ffff;
    v = (v | (v << 32)) & 0x001f_0000_0000_ffff;
    v = (v | (v << 16)) & 0x001f_0000_ff00_00ff;
    v = (v | (v << 8)) & 0x100f_00f0_0f00_f00f;
    v = (v | (v << 4)) & 0x10c3_0c30_c30c_30c3;
    v = (v | (v << 2)) & 0x1249_2492_4924_9249;
    v
}

/// Inverse of [`spread_3`].
fn compact_3(mut v: u64) -> u64 {
    v &= 0x1249_2492_4924_9249;
    v = (v | (v >> 2)) & 0x10c3_0c30_c30c_30c3;
    v = (v | (v >> 4)) & 0x100f_00f0_0f00_f00f;
    v = (v | (v >> 8)) & 0x001f_0000_ff00_00ff;
    v = (v | (v >> 16)) & 0x001f_0000_0000_ffff;
    v = (v | (v >> 32)) & 0x1f_ffff;
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_branching_factor() {
        assert_eq!(Subdivision::Quadtree.branching_factor(), 4);
        assert_eq!(Subdivision::Octree.branching_factor(), 8);
    }

    #[test]
    fn test_level_offset_quadtree() {
        assert_eq!(Subdivision::Quadtree.level_offset(0), 0);
        assert_eq!(Subdivision::Quadtree.level_offset(1), 1);
        assert_eq!(Subdivision::Quadtree.level_offset(2), 5);
        assert_eq!(Subdivision::Quadtree.level_offset(3), 21);
    }

    #[test]
    fn test_level_offset_octree() {
        assert_eq!(Subdivision::Octree.level_offset(0), 0);
        assert_eq!(Subdivision::Octree.level_offset(1), 1);
        assert_eq!(Subdivision::Octree.level_offset(2), 9);
        assert_eq!(Subdivision::Octree.level_offset(3), 73);
    }

    #[test]
    fn test_level_offset_matches_exhaustive_sum() {
        for subdivision in [Subdivision::Quadtree, Subdivision::Octree] {
            let mut sum = 0u64;
            for level in 0..8 {
                assert_eq!(subdivision.level_offset(level), sum);
                sum += subdivision.branching_factor().pow(level);
            }
        }
    }

    #[test]
    fn test_level_offset_deep_levels_do_not_truncate() {
        // 4^31 - 1 over 3 exceeds 32-bit range by a wide margin.
        assert_eq!(
            Subdivision::Quadtree.level_offset(31),
            ((1u64 << 62) - 1) / 3
        );
        assert_eq!(Subdivision::Octree.level_offset(21), ((1u64 << 63) - 1) / 7);
    }

    #[test]
    #[should_panic(expected = "supported subtree depth")]
    fn test_level_offset_too_deep_panics() {
        let _ = Subdivision::Octree.level_offset(22);
    }

    #[test]
    fn test_node_count() {
        assert_eq!(Subdivision::Quadtree.node_count(2), 5);
        assert_eq!(Subdivision::Octree.node_count(2), 9);
    }

    #[test]
    fn test_child_subtree_count() {
        assert_eq!(Subdivision::Quadtree.child_subtree_count(2), 16);
        assert_eq!(Subdivision::Octree.child_subtree_count(2), 64);
    }

    #[test]
    fn test_parent_morton_index_octree() {
        // 341 = 0b101010101, parent = 0b101010 = 42.
        assert_eq!(Subdivision::Octree.parent_morton_index(341), 42);
        assert_eq!(Subdivision::Octree.parent_morton_index(42), 5);
    }

    #[test]
    fn test_parent_morton_index_quadtree() {
        assert_eq!(Subdivision::Quadtree.parent_morton_index(0b1101_10), 0b1101);
    }

    #[test]
    fn test_linear_bit_index() {
        assert_eq!(Subdivision::Quadtree.linear_bit_index(0, 0), 0);
        assert_eq!(Subdivision::Quadtree.linear_bit_index(1, 3), 4);
        assert_eq!(Subdivision::Octree.linear_bit_index(2, 3), 12);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_linear_bit_index_rejects_oversized_morton() {
        let _ = Subdivision::Quadtree.linear_bit_index(1, 4);
    }

    #[test]
    fn test_morton_encode_2d() {
        assert_eq!(morton_encode_2d(0, 0), 0);
        assert_eq!(morton_encode_2d(1, 0), 0b01);
        assert_eq!(morton_encode_2d(0, 1), 0b10);
        assert_eq!(morton_encode_2d(1, 1), 0b11);
        assert_eq!(morton_encode_2d(0b11, 0b00), 0b0101);
        assert_eq!(morton_encode_2d(5, 3), 0b11011);
    }

    #[test]
    fn test_morton_encode_3d() {
        assert_eq!(morton_encode_3d(0, 0, 0), 0);
        assert_eq!(morton_encode_3d(1, 0, 0), 0b001);
        assert_eq!(morton_encode_3d(0, 1, 0), 0b010);
        assert_eq!(morton_encode_3d(0, 0, 1), 0b100);
        assert_eq!(morton_encode_3d(1, 1, 1), 0b111);
        assert_eq!(morton_encode_3d(5, 3, 7), 0b101_110_111);
    }

    #[test]
    fn test_morton_index_dispatch() {
        assert_eq!(
            Subdivision::Quadtree.morton_index(5, 3, 0),
            morton_encode_2d(5, 3)
        );
        assert_eq!(
            Subdivision::Octree.morton_index(5, 3, 7),
            morton_encode_3d(5, 3, 7)
        );
    }

    #[test]
    #[should_panic(expected = "no z component")]
    fn test_quadtree_morton_index_rejects_z() {
        let _ = Subdivision::Quadtree.morton_index(0, 0, 1);
    }

    proptest! {
        #[test]
        fn prop_morton_2d_roundtrip(x: u32, y: u32) {
            let code = morton_encode_2d(x, y);
            prop_assert_eq!(morton_decode_2d(code), (x, y));
        }

        #[test]
        fn prop_morton_3d_roundtrip(x in 0u32..(1 << 21), y in 0u32..(1 << 21), z in 0u32..(1 << 21)) {
            let code = morton_encode_3d(x, y, z);
            prop_assert_eq!(morton_decode_3d(code), (x, y, z));
        }

        #[test]
        fn prop_parent_strips_low_digit(code in 0u64..(1 << 60)) {
            prop_assert_eq!(Subdivision::Octree.parent_morton_index(code), code >> 3);
            prop_assert_eq!(Subdivision::Quadtree.parent_morton_index(code), code >> 2);
        }

        #[test]
        fn prop_morton_parent_matches_coordinate_halving(
            x in 0u32..(1 << 21),
            y in 0u32..(1 << 21),
            z in 0u32..(1 << 21),
        ) {
            let child = morton_encode_3d(x, y, z);
            let parent = Subdivision::Octree.parent_morton_index(child);
            prop_assert_eq!(parent, morton_encode_3d(x >> 1, y >> 1, z >> 1));
        }
    }
}
