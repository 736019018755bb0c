//! Segregated free-list size classes.
//!
//! Free regions are grouped into six size classes so that `can_allocate`
//! can start its search at the smallest class likely to fit a request
//! instead of scanning every free region in an extent.

/// Number of size classes (and thus free-list heads per extent).
pub const NUM_CLASSES: usize = 6;

/// Index of the catch-all class holding every free region larger than 512
/// bytes (and, in practice, every splinter carved from one).
pub const LARGE_CLASS: usize = NUM_CLASSES - 1;

/// Upper bound (inclusive) of each size class below the catch-all class.
const CLASS_BOUNDS: [usize; NUM_CLASSES - 1] = [32, 64, 128, 256, 512];

/// Returns the free-list index for a region of total size `size`.
///
/// | Index | Range      |
/// |-------|------------|
/// | 0     | s <= 32    |
/// | 1     | 32 < s <= 64 |
/// | 2     | 64 < s <= 128 |
/// | 3     | 128 < s <= 256 |
/// | 4     | 256 < s <= 512 |
/// | 5     | s > 512    |
pub fn size_class(size: usize) -> usize {
    CLASS_BOUNDS.iter().position(|&bound| size <= bound).unwrap_or(LARGE_CLASS)
}
