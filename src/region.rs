//! Boundary-tag region layout.
//!
//! Every region (used or free) inside an extent is bracketed by a 4-byte
//! header and an identical 4-byte footer encoding `{used: 1 bit, size: 28
//! bits}`. Header and footer always agree, which lets a region's neighbours
//! be inspected in O(1) by pointer arithmetic alone, without consulting any
//! free list.
//!
//! When a region is free, the bytes immediately after its header are
//! overlaid with a tiny free-list node (`next`/`prev` sibling pointers). The
//! overlay is only valid while the region is free; turning a region used
//! reclaims those bytes as payload.

use std::mem::size_of;

use static_assertions::const_assert;

/// Payload/region alignment guaranteed to callers of `allocate`.
pub const ALIGNMENT: usize = 16;

/// Size in bytes of one boundary tag (header or footer).
pub const TAG_SIZE: usize = size_of::<u32>();

/// Smallest region that may exist at all (a used region with no payload
/// beyond its own tags still needs this much room).
pub const MIN_REGION_SIZE: usize = 16;

/// Number of bits used to encode a region's size in a boundary tag.
const SIZE_BITS: u32 = 28;

/// Largest region size representable in a boundary tag.
pub const MAX_REGION_SIZE: usize = (1 << SIZE_BITS) - 1;

const_assert!(ALIGNMENT.is_power_of_two());
const_assert!(TAG_SIZE == 4);
const_assert!(MIN_REGION_SIZE % ALIGNMENT == 0);

/// A decoded boundary tag: whether the region is in use, and its total size
/// (header + payload/links + footer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionTag {
    used: bool,
    size: u32,
}

impl RegionTag {
    /// Build a tag for a region of the given size and use-state.
    ///
    /// `size` must fit in `SIZE_BITS` and be a multiple of [`ALIGNMENT`];
    /// both are invariants maintained by the extent/free-list code, not
    /// re-validated here.
    pub fn new(used: bool, size: usize) -> Self {
        debug_assert!(size <= MAX_REGION_SIZE, "region size does not fit in a boundary tag");
        Self { used, size: size as u32 }
    }

    /// Whether the region is currently allocated to a caller.
    pub fn used(self) -> bool {
        self.used
    }

    /// Total size of the region, including its header and footer.
    pub fn size(self) -> usize {
        self.size as usize
    }

    /// Size available to the caller (or, for a free region, to the free-list
    /// overlay): the region size minus both boundary tags.
    pub fn payload_size(self) -> usize {
        self.size() - 2 * TAG_SIZE
    }

    fn encode(self) -> u32 {
        let used_bit = if self.used { 1u32 << 31 } else { 0 };
        used_bit | (self.size & ((1 << SIZE_BITS) - 1))
    }

    fn decode(word: u32) -> Self {
        let used = word & (1 << 31) != 0;
        let size = word & ((1 << SIZE_BITS) - 1);
        Self { used, size }
    }
}

/// Reads the boundary tag at `ptr`. `ptr` must point at a valid header or
/// footer word within a live extent.
///
/// # Safety
/// `ptr` must be readable for `TAG_SIZE` bytes.
pub unsafe fn read_tag(ptr: *const u8) -> RegionTag {
    let word = unsafe { (ptr as *const u32).read_unaligned() };
    RegionTag::decode(word)
}

/// Writes a boundary tag at `ptr`.
///
/// # Safety
/// `ptr` must be writable for `TAG_SIZE` bytes.
pub unsafe fn write_tag(ptr: *mut u8, tag: RegionTag) {
    unsafe { (ptr as *mut u32).write_unaligned(tag.encode()) };
}

/// Address of a region's header, given the region's start address. The
/// header is always at offset 0, so this is the identity function; it
/// exists to make call sites self-documenting.
#[inline]
pub fn header_ptr(region: *mut u8) -> *mut u8 {
    region
}

/// Address of a region's footer, given the region's start address and its
/// total size.
///
/// # Safety
/// `region` must be the start of a region of at least `size` readable bytes.
#[inline]
pub unsafe fn footer_ptr(region: *mut u8, size: usize) -> *mut u8 {
    unsafe { region.add(size - TAG_SIZE) }
}

/// Address of the payload a caller may write to, given the region's start
/// address.
#[inline]
pub fn payload_ptr(region: *mut u8) -> *mut u8 {
    unsafe { region.add(TAG_SIZE) }
}

/// Recovers a region's start address from a payload pointer previously
/// returned to a caller.
#[inline]
pub fn region_from_payload(payload: *mut u8) -> *mut u8 {
    unsafe { payload.sub(TAG_SIZE) }
}

/// Reserved padding before the free-list link pointers so that, on 64-bit
/// targets, the header stays at offset 0 while `next`/`prev` remain
/// pointer-aligned.
#[cfg(target_pointer_width = "64")]
const LINK_RESERVED: usize = 4;
#[cfg(not(target_pointer_width = "64"))]
const LINK_RESERVED: usize = 0;

/// Offset of the `next` link from the region's start.
const NEXT_OFFSET: usize = TAG_SIZE + LINK_RESERVED;
/// Offset of the `prev` link from the region's start.
const PREV_OFFSET: usize = NEXT_OFFSET + size_of::<usize>();

/// Total size of the free-node overlay (header + reserved padding + two
/// links), not counting the footer.
pub const FREE_NODE_HEADER_SIZE: usize = PREV_OFFSET + size_of::<usize>();

/// Smallest region that can actually be linked into a free list: it must
/// have room for the free-node overlay plus its footer, rounded up to
/// [`ALIGNMENT`].
pub const MIN_FREE_REGION_SIZE: usize = {
    let raw = FREE_NODE_HEADER_SIZE + TAG_SIZE;
    (raw + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
};

const_assert!(MIN_FREE_REGION_SIZE % ALIGNMENT == 0);
const_assert!(MIN_FREE_REGION_SIZE >= FREE_NODE_HEADER_SIZE + TAG_SIZE);

/// Reads the `next` sibling pointer from a free region's overlay. Null means
/// "no next sibling".
///
/// # Safety
/// `region` must point at a free region of at least `MIN_FREE_REGION_SIZE` bytes.
pub unsafe fn read_next(region: *mut u8) -> *mut u8 {
    unsafe { (region.add(NEXT_OFFSET) as *mut *mut u8).read_unaligned() }
}

/// Writes the `next` sibling pointer into a free region's overlay.
///
/// # Safety
/// `region` must point at a free region of at least `MIN_FREE_REGION_SIZE` bytes.
pub unsafe fn write_next(region: *mut u8, next: *mut u8) {
    unsafe { (region.add(NEXT_OFFSET) as *mut *mut u8).write_unaligned(next) };
}

/// Reads the `prev` sibling pointer from a free region's overlay.
///
/// # Safety
/// `region` must point at a free region of at least `MIN_FREE_REGION_SIZE` bytes.
pub unsafe fn read_prev(region: *mut u8) -> *mut u8 {
    unsafe { (region.add(PREV_OFFSET) as *mut *mut u8).read_unaligned() }
}

/// Writes the `prev` sibling pointer into a free region's overlay.
///
/// # Safety
/// `region` must point at a free region of at least `MIN_FREE_REGION_SIZE` bytes.
pub unsafe fn write_prev(region: *mut u8, prev: *mut u8) {
    unsafe { (region.add(PREV_OFFSET) as *mut *mut u8).write_unaligned(prev) };
}

/// Writes both tags and clears the free-node overlay for a brand-new free
/// region covering `[start, start + size)`.
///
/// # Safety
/// `[start, start + size)` must be writable and not overlap any other live
/// region.
pub unsafe fn init_free_region(start: *mut u8, size: usize) {
    debug_assert!(size >= MIN_FREE_REGION_SIZE);
    debug_assert_eq!(size % ALIGNMENT, 0);
    let tag = RegionTag::new(false, size);
    unsafe {
        write_tag(header_ptr(start), tag);
        write_tag(footer_ptr(start, size), tag);
        write_next(start, std::ptr::null_mut());
        write_prev(start, std::ptr::null_mut());
    }
}

/// Rewrites both tags of an existing region to a new `used`/`size`, keeping
/// its start address fixed.
///
/// # Safety
/// `region` must point at a region whose current size is at least `size`.
pub unsafe fn rewrite_tags(region: *mut u8, used: bool, size: usize) {
    let tag = RegionTag::new(used, size);
    unsafe {
        write_tag(header_ptr(region), tag);
        write_tag(footer_ptr(region, size), tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips() {
        for &(used, size) in &[(false, 16usize), (true, 32), (false, 4096), (true, 1 << 20)] {
            let tag = RegionTag::new(used, size);
            let encoded = tag.encode();
            let decoded = RegionTag::decode(encoded);
            assert_eq!(decoded.used(), used);
            assert_eq!(decoded.size(), size);
        }
    }

    #[test]
    fn min_free_region_size_is_16_aligned_and_holds_overlay() {
        assert_eq!(MIN_FREE_REGION_SIZE % ALIGNMENT, 0);
        assert!(MIN_FREE_REGION_SIZE >= FREE_NODE_HEADER_SIZE + TAG_SIZE);
    }

    #[test]
    fn read_write_tag_round_trip() {
        let mut buf = [0u8; 16];
        let tag = RegionTag::new(true, 16);
        unsafe {
            write_tag(buf.as_mut_ptr(), tag);
            let back = read_tag(buf.as_ptr());
            assert_eq!(back, tag);
        }
    }

    #[test]
    fn free_region_links_round_trip() {
        let mut buf = vec![0u8; MIN_FREE_REGION_SIZE];
        let ptr = buf.as_mut_ptr();
        unsafe {
            init_free_region(ptr, MIN_FREE_REGION_SIZE);
            assert!(read_next(ptr).is_null());
            assert!(read_prev(ptr).is_null());

            let fake_sibling = ptr.add(1);
            write_next(ptr, fake_sibling);
            write_prev(ptr, fake_sibling);
            assert_eq!(read_next(ptr), fake_sibling);
            assert_eq!(read_prev(ptr), fake_sibling);

            let header = read_tag(header_ptr(ptr));
            let footer = read_tag(footer_ptr(ptr, MIN_FREE_REGION_SIZE));
            assert_eq!(header, footer);
            assert!(!header.used());
            assert_eq!(header.size(), MIN_FREE_REGION_SIZE);
        }
    }
}
