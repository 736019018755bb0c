//! Extent ("block") management: the OS-backed contiguous page ranges that
//! every region lives inside.
//!
//! Grounded on the reference allocator's `BlockHeader_t`/`Block_create`/
//! `BlockList_*` family: each extent is one `PageSource::acquire` result,
//! header at offset 0, the remainder laid out as one big free region, plus a
//! small synthetic "bookkeeping" allocation that reserves the header's
//! neighbourhood and keeps the first real payload aligned.

use std::mem::size_of;
use std::ptr::NonNull;

use crate::config::HeapConfig;
use crate::error::{AllocError, Result};
use crate::freelist::{self, FreeHeads};
use crate::page_source::{self, PageSource};
use crate::region::{self, TAG_SIZE};
use crate::split;

/// Payload size of the synthetic bookkeeping allocation made at the head of
/// every extent: room for two pointers, mirroring the reference source's
/// `sizeof(uintptr_t) * 2`.
const BOOKKEEPING_PAYLOAD: usize = 2 * size_of::<usize>();

/// Fixed-size record at the start of every extent.
#[repr(C)]
pub struct ExtentHeader {
    /// Number of OS pages backing this extent.
    pub pages: usize,
    /// Total byte size of the extent, including this header.
    pub total_bytes: usize,
    /// Bytes currently handed out, including the synthetic bookkeeping
    /// allocation made in [`create`].
    pub used_bytes: usize,
    /// Previous extent in the address-ordered extent list.
    pub prev: Option<NonNull<ExtentHeader>>,
    /// Next extent in the address-ordered extent list.
    pub next: Option<NonNull<ExtentHeader>>,
    free_heads: FreeHeads,
}

/// Size, in bytes, of [`ExtentHeader`] itself.
pub const HEADER_SIZE: usize = size_of::<ExtentHeader>();

impl ExtentHeader {
    /// Start address of this extent, as a byte pointer.
    pub fn as_ptr(&self) -> *mut u8 {
        self as *const ExtentHeader as *mut u8
    }

    /// This extent's free-list heads.
    pub fn free_heads(&self) -> &FreeHeads {
        &self.free_heads
    }
}

/// Creates a new extent with room for at least `requested_bytes` of payload,
/// no smaller than `min_pages` pages. Performs the synthetic bookkeeping
/// allocation before returning.
///
/// # Safety
/// Must be called with a `source` that has not been moved/dropped, and the
/// returned extent must eventually be unlinked via [`list_remove`] and
/// released via [`destroy`] exactly once.
pub unsafe fn create<P: PageSource>(
    source: &P,
    requested_bytes: usize,
    min_pages: usize,
) -> Result<NonNull<ExtentHeader>> {
    let overhead = HEADER_SIZE
        .saturating_add(region::FREE_NODE_HEADER_SIZE)
        .saturating_add(TAG_SIZE);
    let needed = requested_bytes.saturating_add(overhead);

    let page_size = source.page_size();
    let pages = page_source::pages_for(needed, page_size)
        .unwrap_or(usize::MAX)
        .max(min_pages);

    let raw = page_source::checked_acquire(source, pages)?;
    let total_bytes = pages * page_size;
    let header_ptr = raw.as_ptr() as *mut ExtentHeader;

    unsafe {
        header_ptr.write(ExtentHeader {
            pages,
            total_bytes,
            used_bytes: HEADER_SIZE,
            prev: None,
            next: None,
            free_heads: FreeHeads::default(),
        });
    }

    let header = unsafe { &mut *header_ptr };
    let free_start = unsafe { raw.as_ptr().add(HEADER_SIZE) };
    let free_size = total_bytes - HEADER_SIZE;

    unsafe {
        region::init_free_region(free_start, free_size);
        freelist::free_list_insert(&mut header.free_heads, free_start, free_size);
        allocate_region(header, BOOKKEEPING_PAYLOAD)
            .expect("a freshly created extent must fit its own bookkeeping allocation");
    }

    tracing::debug!(addr = ?raw.as_ptr(), pages, total_bytes, "extent created");

    Ok(unsafe { NonNull::new_unchecked(header_ptr) })
}

/// Releases an extent's pages back to `source`. Caller must have already
/// unlinked it from the extent list.
///
/// # Safety
/// `extent` must not be used again after this call.
pub unsafe fn destroy<P: PageSource>(source: &P, extent: NonNull<ExtentHeader>) {
    let (pages, addr) = unsafe {
        let header = extent.as_ref();
        (header.pages, NonNull::new_unchecked(extent.as_ptr() as *mut u8))
    };
    tracing::debug!(?addr, pages, "extent destroyed");
    unsafe { source.release(addr, pages) };
}

/// Finds and removes a free region able to host `payload_bytes`, splitting
/// off a splinter if one remains, and marks the chosen region used.
///
/// # Safety
/// `header` must be a live, fully initialised extent header.
pub unsafe fn allocate_region(header: &mut ExtentHeader, payload_bytes: usize) -> Option<(*mut u8, usize)> {
    let need = payload_bytes + 2 * TAG_SIZE;
    let (region_ptr, region_size) = freelist::can_allocate(&header.free_heads, need)?;

    unsafe { freelist::free_list_remove(&mut header.free_heads, region_ptr, region_size) };

    let mut final_size = region_size;
    if let Some((splinter_ptr, splinter_size)) = unsafe { split::split(region_ptr, region_size, need) } {
        unsafe { freelist::free_list_insert(&mut header.free_heads, splinter_ptr, splinter_size) };
        let header_tag = unsafe { region::read_tag(region::header_ptr(region_ptr)) };
        final_size = header_tag.size();
    }

    unsafe { region::rewrite_tags(region_ptr, true, final_size) };
    header.used_bytes += final_size;
    Some((region_ptr, final_size))
}

/// Exposes this extent's free-region search without mutating anything,
/// matching the reference `Block_canAllocateSize` query used while walking
/// the extent list for a home for a new allocation.
pub fn can_allocate(header: &ExtentHeader, need: usize) -> Option<(*mut u8, usize)> {
    freelist::can_allocate(&header.free_heads, need)
}

/// Mutable access to this extent's free-list heads, for the coalesce path.
pub fn free_heads_mut(header: &mut ExtentHeader) -> &mut FreeHeads {
    &mut header.free_heads
}

/// Whether `header` currently holds no user allocations beyond the
/// synthetic bookkeeping region captured at `baseline`.
pub fn is_empty(header: &ExtentHeader, baseline: usize) -> bool {
    header.used_bytes <= baseline
}

/// Inserts `node` into the extent list, keeping it sorted ascending by
/// address.
pub fn list_insert(list: &mut Option<NonNull<ExtentHeader>>, mut node: NonNull<ExtentHeader>) {
    unsafe {
        node.as_mut().prev = None;
        node.as_mut().next = None;
    }

    let head = match *list {
        None => {
            *list = Some(node);
            return;
        }
        Some(head) => head,
    };

    if (head.as_ptr() as usize) > (node.as_ptr() as usize) {
        unsafe {
            node.as_mut().next = Some(head);
            (*head.as_ptr()).prev = Some(node);
        }
        *list = Some(node);
        return;
    }

    let mut cursor = head;
    loop {
        let next = unsafe { cursor.as_ref().next };
        match next {
            Some(n) if (n.as_ptr() as usize) <= (node.as_ptr() as usize) => cursor = n,
            _ => break,
        }
    }

    unsafe {
        let next = cursor.as_ref().next;
        node.as_mut().next = next;
        node.as_mut().prev = Some(cursor);
        if let Some(mut n) = next {
            n.as_mut().prev = Some(node);
        }
        cursor.as_mut().next = Some(node);
    }
}

/// Unlinks `node` from the extent list.
pub fn list_remove(list: &mut Option<NonNull<ExtentHeader>>, node: NonNull<ExtentHeader>) {
    unsafe {
        let prev = node.as_ref().prev;
        let next = node.as_ref().next;

        match prev {
            Some(mut p) => p.as_mut().next = next,
            None => *list = next,
        }
        if let Some(mut n) = next {
            n.as_mut().prev = prev;
        }
    }
}

/// Linear scan of the extent list for the extent containing `address`.
pub fn find_containing(list: Option<NonNull<ExtentHeader>>, address: *const u8) -> Option<NonNull<ExtentHeader>> {
    let mut cursor = list;
    while let Some(node) = cursor {
        let header = unsafe { node.as_ref() };
        let start = header.as_ptr() as usize;
        let end = start + header.total_bytes;
        let addr = address as usize;
        if addr >= start && addr < end {
            return Some(node);
        }
        cursor = header.next;
    }
    None
}

/// Locates an extent able to host `payload_bytes`, creating one if
/// necessary, and performs the allocation, returning the owning extent and
/// the allocated region.
///
/// # Safety
/// Must only be called while holding exclusive access to `list`/`baseline`.
pub unsafe fn find_for_allocation<P: PageSource>(
    list: &mut Option<NonNull<ExtentHeader>>,
    source: &P,
    config: &HeapConfig,
    baseline: &mut Option<usize>,
    payload_bytes: usize,
) -> Result<(NonNull<ExtentHeader>, *mut u8, usize)> {
    let need = payload_bytes + 2 * TAG_SIZE;

    let target = if list.is_none() {
        let extent = unsafe { create(source, need, config.min_extent_pages)? };
        *list = Some(extent);
        *baseline = Some(unsafe { extent.as_ref().used_bytes });
        extent
    } else {
        let mut cursor = *list;
        let mut found = None;
        while let Some(node) = cursor {
            let header = unsafe { node.as_ref() };
            if can_allocate(header, need).is_some() {
                found = Some(node);
                break;
            }
            cursor = header.next;
        }

        match found {
            Some(node) => node,
            None => {
                let extent = unsafe { create(source, need, 1)? };
                list_insert(list, extent);
                extent
            }
        }
    };

    let header = unsafe { &mut *target.as_ptr() };
    let (region_ptr, region_size) = unsafe { allocate_region(header, payload_bytes) }
        .ok_or(AllocError::OutOfMemory { pages: header.pages })?;

    Ok((target, region_ptr, region_size))
}
