//! Pure-data statistics snapshot.
//!
//! Mirrors the reference allocator's `mallocstats` enumeration exactly,
//! except that collecting the numbers and printing them are separate steps:
//! this module only builds the snapshot (see [`crate::report`] for the
//! human-readable printer).

use std::ptr::NonNull;

use crate::extent::ExtentHeader;
use crate::region;
use crate::size_class::NUM_CLASSES;

/// Free-region statistics for one extent.
#[derive(Debug, Clone)]
pub struct ExtentStats {
    /// Address the extent starts at.
    pub start: usize,
    /// Number of OS pages backing the extent.
    pub pages: usize,
    /// Total byte size of the extent.
    pub total_bytes: usize,
    /// Bytes currently handed out (including bookkeeping).
    pub used_bytes: usize,
    /// Number of free regions across all size classes.
    pub free_region_count: usize,
    /// Total bytes held by free regions.
    pub free_bytes: usize,
    /// Size of the largest free region, or `0` if none.
    pub largest_free: usize,
    /// Size of the smallest free region, or `0` if none.
    pub smallest_free: usize,
    /// Free-region count per size class, indexed like [`crate::size_class`].
    pub free_by_class: [usize; NUM_CLASSES],
}

/// A snapshot of every live extent's statistics.
#[derive(Debug, Clone, Default)]
pub struct HeapStats {
    /// One entry per live extent, in extent-list order.
    pub extents: Vec<ExtentStats>,
}

/// Walks the extent list and free lists, building a [`HeapStats`] snapshot.
/// Read-only; does not mutate any allocator state.
pub fn collect(list: Option<NonNull<ExtentHeader>>) -> HeapStats {
    let mut extents = Vec::new();
    let mut cursor = list;

    while let Some(node) = cursor {
        let header = unsafe { node.as_ref() };
        let mut free_region_count = 0;
        let mut free_bytes = 0usize;
        let mut largest_free = 0usize;
        let mut smallest_free = usize::MAX;
        let mut free_by_class = [0usize; NUM_CLASSES];

        for class in 0..NUM_CLASSES {
            let mut it = header.free_heads().head(class);
            while !it.is_null() {
                let tag = unsafe { region::read_tag(region::header_ptr(it)) };
                free_region_count += 1;
                free_bytes += tag.size();
                largest_free = largest_free.max(tag.size());
                smallest_free = smallest_free.min(tag.size());
                free_by_class[class] += 1;
                it = unsafe { region::read_next(it) };
            }
        }

        if free_region_count == 0 {
            smallest_free = 0;
        }

        extents.push(ExtentStats {
            start: header.as_ptr() as usize,
            pages: header.pages,
            total_bytes: header.total_bytes,
            used_bytes: header.used_bytes,
            free_region_count,
            free_bytes,
            largest_free,
            smallest_free,
            free_by_class,
        });

        cursor = header.next;
    }

    HeapStats { extents }
}
