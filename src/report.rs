//! Human-readable printer for [`crate::stats::HeapStats`].
//!
//! Kept out of the core on purpose: the allocator itself never writes to
//! standard output, so embedders that never call this function pay nothing
//! for it. Format mirrors the reference allocator's `mallocstats` dump.

use crate::stats::HeapStats;

/// Prints `stats` to standard output in the style of the reference
/// allocator's `mallocstats`.
pub fn print(stats: &HeapStats) {
    for (i, extent) in stats.extents.iter().enumerate() {
        println!("Extent[{i}] (start: {:#x}):", extent.start);
        println!("  Pages (from OS)     : {}", extent.pages);
        println!("  Size  (from OS)     : {} bytes", extent.total_bytes);
        println!("  Used Size           : {} bytes", extent.used_bytes);
        println!("  Free statistics:");
        println!("    Free Regions Count : {}", extent.free_region_count);
        println!("    Largest Free Space : {} bytes", extent.largest_free);
        println!("    Smallest Free Space: {} bytes", extent.smallest_free);
        println!("    Free Heap Space    : {} bytes", extent.free_bytes);
        for (class, count) in extent.free_by_class.iter().enumerate() {
            println!("      FreeRegion[{class}]: {count} region(s)");
        }
    }
}
