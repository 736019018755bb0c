//! Per-extent segregated free-list operations.
//!
//! Each extent owns six free-list heads, one per [`crate::size_class`]. Every
//! list is address-ordered so that [`free_list_insert`] and the coalescing
//! neighbour search in [`crate::coalesce`] have a single, predictable walk
//! order to reason about.

use crate::region::{self, MIN_FREE_REGION_SIZE};
use crate::size_class::{self, NUM_CLASSES};

/// One extent's six free-list heads, indexed by size class.
#[derive(Debug, Clone, Copy)]
pub struct FreeHeads {
    heads: [*mut u8; NUM_CLASSES],
}

impl Default for FreeHeads {
    fn default() -> Self {
        Self { heads: [std::ptr::null_mut(); NUM_CLASSES] }
    }
}

impl FreeHeads {
    /// The head of the free list for a given class, or null if empty.
    pub fn head(&self, class: usize) -> *mut u8 {
        self.heads[class]
    }

    fn set_head(&mut self, class: usize, value: *mut u8) {
        self.heads[class] = value;
    }
}

/// Inserts `region` (a free region of `size` bytes) into the appropriate
/// class's address-ordered list. A null or zero-size region is a no-op,
/// mirroring the reference allocator's defensive guard.
///
/// # Safety
/// `region` must point at an initialised free region (see
/// [`region::init_free_region`]) of exactly `size` bytes, not currently
/// linked into any free list.
pub unsafe fn free_list_insert(heads: &mut FreeHeads, region: *mut u8, size: usize) {
    if region.is_null() || size == 0 {
        return;
    }
    debug_assert!(size >= MIN_FREE_REGION_SIZE, "region too small to host free-list links");

    let class = size_class::size_class(size);
    let head = heads.head(class);

    if head.is_null() {
        unsafe {
            region::write_next(region, std::ptr::null_mut());
            region::write_prev(region, std::ptr::null_mut());
        }
        heads.set_head(class, region);
        return;
    }

    if (head as usize) > (region as usize) {
        unsafe {
            region::write_next(region, head);
            region::write_prev(region, std::ptr::null_mut());
            region::write_prev(head, region);
        }
        heads.set_head(class, region);
        return;
    }

    // Walk to the insertion point: the last node whose address is still
    // below `region`.
    let mut cursor = head;
    loop {
        let next = unsafe { region::read_next(cursor) };
        if next.is_null() || (next as usize) > (region as usize) {
            break;
        }
        cursor = next;
    }

    let next = unsafe { region::read_next(cursor) };
    unsafe {
        region::write_next(region, next);
        region::write_prev(region, cursor);
        if !next.is_null() {
            region::write_prev(next, region);
        }
        region::write_next(cursor, region);
    }
}

/// Removes `region` (of `size` bytes) from its free list.
///
/// # Safety
/// `region` must currently be linked into `heads`'s list for `size`'s class.
pub unsafe fn free_list_remove(heads: &mut FreeHeads, region: *mut u8, size: usize) {
    if region.is_null() {
        return;
    }
    let class = size_class::size_class(size);

    let prev = unsafe { region::read_prev(region) };
    let next = unsafe { region::read_next(region) };

    if prev.is_null() {
        heads.set_head(class, next);
    } else {
        unsafe { region::write_next(prev, next) };
    }

    if !next.is_null() {
        unsafe { region::write_prev(next, prev) };
    }

    unsafe {
        region::write_next(region, std::ptr::null_mut());
        region::write_prev(region, std::ptr::null_mut());
    }
}

/// Scans every class, smallest first, for the first free region whose total
/// size strictly exceeds `crate::split::align_need(region, need)` — i.e. one
/// that can be split with a usable splinter left over, or used whole.
/// Returns `(region_ptr, region_size)`.
pub fn can_allocate(heads: &FreeHeads, need: usize) -> Option<(*mut u8, usize)> {
    for class in 0..NUM_CLASSES {
        let mut cursor = heads.head(class);
        while !cursor.is_null() {
            let tag = unsafe { region::read_tag(region::header_ptr(cursor)) };
            let aligned = crate::split::align_need(cursor as usize, need);
            if aligned < tag.size() {
                return Some((cursor, tag.size()));
            }
            cursor = unsafe { region::read_next(cursor) };
        }
    }
    None
}

/// Tests whether `addr` is the header or footer address of some node
/// currently linked into one of `heads`'s lists. This is the reference
/// allocator's neighbour-is-free check: rather than trusting an arbitrary
/// 4 bytes of memory to be a valid boundary tag, it only believes a
/// neighbour is free if that neighbour is actually reachable by walking the
/// free lists.
pub fn is_free_neighbor(heads: &FreeHeads, addr: *mut u8) -> Option<(*mut u8, usize)> {
    for class in 0..NUM_CLASSES {
        let mut cursor = heads.head(class);
        while !cursor.is_null() {
            let tag = unsafe { region::read_tag(region::header_ptr(cursor)) };
            let header = region::header_ptr(cursor);
            let footer = unsafe { region::footer_ptr(cursor, tag.size()) };
            if header == addr || footer == addr {
                return Some((cursor, tag.size()));
            }
            cursor = unsafe { region::read_next(cursor) };
        }
    }
    None
}
