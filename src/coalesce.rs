//! Merging a newly freed region with adjacent free neighbours.
//!
//! Grounded on the reference allocator's `Block_coallesceFreeRegion` and its
//! three `Block_coallesce{Left,Right,Both}Side` helpers. A neighbour is only
//! believed to be free if it is actually reachable by walking the extent's
//! free lists (see [`crate::freelist::is_free_neighbor`]) — never by trusting
//! arbitrary bytes adjacent to the region to be a valid boundary tag.

use crate::extent::ExtentHeader;
use crate::freelist;
use crate::region::{self, TAG_SIZE};

/// Attempts to merge `region` (already inserted into its extent's free list)
/// with its left and/or right neighbour, if either is itself free. Returns
/// the address and size of the region that ends up holding the merged
/// space — either `region` unchanged, or whichever neighbour absorbed it.
///
/// # Safety
/// `region` must already be a free region of `region_size` bytes, linked
/// into `header`'s free lists, fully inside `header`'s extent.
pub unsafe fn coalesce(header: &mut ExtentHeader, region: *mut u8, region_size: usize) -> (*mut u8, usize) {
    let left_footer = unsafe { region.sub(TAG_SIZE) };
    let right_header = unsafe { region.add(region_size) };

    let heads = crate::extent::free_heads_mut(header);
    let left = freelist::is_free_neighbor(heads, left_footer);
    let right = freelist::is_free_neighbor(heads, right_header);

    match (left, right) {
        (None, None) => (region, region_size),

        (None, Some((right_ptr, right_size))) => {
            unsafe {
                freelist::free_list_remove(heads, right_ptr, right_size);
                freelist::free_list_remove(heads, region, region_size);
            }
            let merged = region_size + right_size;
            unsafe {
                region::rewrite_tags(region, false, merged);
                freelist::free_list_insert(heads, region, merged);
            }
            (region, merged)
        }

        (Some((left_ptr, left_size)), None) => {
            unsafe {
                freelist::free_list_remove(heads, left_ptr, left_size);
                freelist::free_list_remove(heads, region, region_size);
            }
            let merged = left_size + region_size;
            unsafe {
                region::rewrite_tags(left_ptr, false, merged);
                freelist::free_list_insert(heads, left_ptr, merged);
            }
            (left_ptr, merged)
        }

        (Some((left_ptr, left_size)), Some((right_ptr, right_size))) => {
            unsafe {
                freelist::free_list_remove(heads, left_ptr, left_size);
                freelist::free_list_remove(heads, right_ptr, right_size);
                freelist::free_list_remove(heads, region, region_size);
            }
            let merged = left_size + region_size + right_size;
            unsafe {
                region::rewrite_tags(left_ptr, false, merged);
                freelist::free_list_insert(heads, left_ptr, merged);
            }
            (left_ptr, merged)
        }
    }
}
