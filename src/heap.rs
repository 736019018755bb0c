//! The public allocator handles: [`UnsafeHeap`], the raw single-threaded
//! core, and [`Heap`], the `parking_lot`-synchronised embedder-facing
//! wrapper around it.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::coalesce;
use crate::config::HeapConfig;
use crate::extent::{self, ExtentHeader};
use crate::freelist;
use crate::page_source::PageSource;
use crate::region;
use crate::stats::HeapStats;

/// The allocator core: one extent list, not internally synchronised.
///
/// Every public method assumes the caller already holds whatever exclusion
/// is appropriate for their environment — a single-threaded embedder (a
/// freestanding kernel, say) can use this directly; anything else should go
/// through [`Heap`].
pub struct UnsafeHeap<P: PageSource> {
    source: P,
    config: HeapConfig,
    extents: Option<NonNull<ExtentHeader>>,
    bookkeeping_baseline: Option<usize>,
}

// SAFETY: `UnsafeHeap` holds no thread-local state; every raw pointer it
// owns points into memory it alone controls. It is *not* `Sync` — callers
// must still serialise access to a single instance, which `Heap` does.
unsafe impl<P: PageSource + Send> Send for UnsafeHeap<P> {}

impl<P: PageSource> UnsafeHeap<P> {
    /// Creates an empty heap backed by `source`, using default configuration.
    pub fn new(source: P) -> Self {
        Self::with_config(source, HeapConfig::default())
    }

    /// Creates an empty heap backed by `source` with an explicit configuration.
    pub fn with_config(source: P, config: HeapConfig) -> Self {
        Self { source, config, extents: None, bookkeeping_baseline: None }
    }

    /// Extension point for an embedder-supplied mutual-exclusion scheme.
    /// No-op on the raw core; see [`Heap`] for a ready-made locked handle.
    pub fn lock(&self) {}

    /// Extension point paired with [`Self::lock`].
    pub fn unlock(&self) {}

    /// Allocates `n` bytes, returning a 16-byte-aligned pointer, or `None`
    /// if the request could not be satisfied. `n == 0` returns `None`.
    pub fn allocate(&mut self, n: usize) -> Option<NonNull<u8>> {
        if n == 0 {
            return None;
        }

        let (_, region_ptr, _) = unsafe {
            extent::find_for_allocation(
                &mut self.extents,
                &self.source,
                &self.config,
                &mut self.bookkeeping_baseline,
                n,
            )
        }
        .ok()?;

        NonNull::new(region::payload_ptr(region_ptr))
    }

    /// Releases a previously allocated pointer. A `None`/foreign pointer, or
    /// one already free, is silently ignored.
    pub fn free(&mut self, p: Option<NonNull<u8>>) {
        let Some(p) = p else { return };

        let Some(mut extent) = extent::find_containing(self.extents, p.as_ptr()) else {
            return;
        };

        let region = region::region_from_payload(p.as_ptr());
        let tag = unsafe { region::read_tag(region::header_ptr(region)) };
        if !tag.used() {
            return;
        }
        let size = tag.size();

        let header = unsafe { extent.as_mut() };
        unsafe {
            region::rewrite_tags(region, false, size);
            header.used_bytes -= size;
            freelist::free_list_insert(extent::free_heads_mut(header), region, size);
            coalesce::coalesce(header, region, size);
        }

        let baseline = self.bookkeeping_baseline.unwrap_or(usize::MAX);
        if extent::is_empty(header, baseline) {
            extent::list_remove(&mut self.extents, extent);
            unsafe { extent::destroy(&self.source, extent) };
        }
    }

    /// Resizes the allocation at `p` to `n` bytes. `p == None` behaves like
    /// [`Self::allocate`]; always copies (no in-place grow/shrink). Leaves
    /// `p` intact if the new allocation fails.
    pub fn reallocate(&mut self, p: Option<NonNull<u8>>, n: usize) -> Option<NonNull<u8>> {
        let Some(p) = p else { return self.allocate(n) };

        let region = region::region_from_payload(p.as_ptr());
        let tag = unsafe { region::read_tag(region::header_ptr(region)) };
        let payload_len = tag.payload_size();

        if n == payload_len {
            return Some(p);
        }

        let new_ptr = self.allocate(n)?;
        let copy_len = n.min(payload_len);
        unsafe {
            std::ptr::copy_nonoverlapping(p.as_ptr(), new_ptr.as_ptr(), copy_len);
        }
        self.free(Some(p));
        Some(new_ptr)
    }

    /// Allocates space for `count` elements of `size` bytes each, zeroed.
    /// Returns `None` on `size == 0`, on `count * size` overflow, or if the
    /// underlying allocation fails.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let total = count.checked_mul(size)?;
        let ptr = self.allocate(total)?;
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// Snapshots per-extent statistics. Pure read; does not mutate state.
    pub fn statistics(&self) -> HeapStats {
        crate::stats::collect(self.extents)
    }
}

/// A `Send + Sync` embedder-facing allocator handle: an [`UnsafeHeap`]
/// behind a `parking_lot::Mutex`, serialising every public entry point.
pub struct Heap<P: PageSource> {
    inner: Mutex<UnsafeHeap<P>>,
}

impl<P: PageSource> Heap<P> {
    /// Creates an empty, lock-protected heap backed by `source`.
    pub fn new(source: P) -> Self {
        Self { inner: Mutex::new(UnsafeHeap::new(source)) }
    }

    /// Creates an empty, lock-protected heap with an explicit configuration.
    pub fn with_config(source: P, config: HeapConfig) -> Self {
        Self { inner: Mutex::new(UnsafeHeap::with_config(source, config)) }
    }

    /// See [`UnsafeHeap::allocate`].
    pub fn allocate(&self, n: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate(n)
    }

    /// See [`UnsafeHeap::free`].
    pub fn free(&self, p: Option<NonNull<u8>>) {
        self.inner.lock().free(p)
    }

    /// See [`UnsafeHeap::reallocate`].
    pub fn reallocate(&self, p: Option<NonNull<u8>>, n: usize) -> Option<NonNull<u8>> {
        self.inner.lock().reallocate(p, n)
    }

    /// See [`UnsafeHeap::zero_allocate`].
    pub fn zero_allocate(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().zero_allocate(count, size)
    }

    /// See [`UnsafeHeap::statistics`].
    pub fn statistics(&self) -> HeapStats {
        self.inner.lock().statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_source::OsPageSource;

    #[test]
    fn allocate_zero_returns_none() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        assert!(heap.allocate(0).is_none());
    }

    #[test]
    fn allocate_write_free_round_trip() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        let p = heap.allocate(4).expect("allocate should succeed");
        assert_eq!((p.as_ptr() as usize) % 16, 0);
        unsafe { *(p.as_ptr() as *mut i32) = 42 };
        heap.free(Some(p));
    }

    #[test]
    fn sequential_allocations_are_isolated_and_aligned() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        let mut ptrs = Vec::new();
        for i in 0..5 {
            let p = heap.allocate(4).expect("allocate should succeed");
            assert_eq!((p.as_ptr() as usize) % 16, 0);
            unsafe { *(p.as_ptr() as *mut i32) = 42 + i };
            ptrs.push(p);
        }
        for (i, &p) in ptrs.iter().enumerate() {
            let value = unsafe { *(p.as_ptr() as *const i32) };
            assert_eq!(value, 42 + i as i32);
        }
        for p in ptrs {
            heap.free(Some(p));
        }
    }

    #[test]
    fn coalesce_left_reuses_freed_address() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        for &s in &[64usize, 4096] {
            let a = heap.allocate(s).unwrap();
            let b = heap.allocate(s).unwrap();
            let c = heap.allocate(s).unwrap();
            let addr_a = a.as_ptr() as usize;

            heap.free(Some(b));
            heap.free(Some(a));

            let p = heap.allocate(2 * s).expect("should reuse coalesced space");
            assert_eq!(p.as_ptr() as usize, addr_a);

            heap.free(Some(p));
            heap.free(Some(c));
        }
    }

    #[test]
    fn coalesce_right_reuses_freed_address() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        for &s in &[64usize, 4096] {
            let a = heap.allocate(s).unwrap();
            let b = heap.allocate(s).unwrap();
            let c = heap.allocate(s).unwrap();
            let d = heap.allocate(s).unwrap();
            let addr_c = c.as_ptr() as usize;

            heap.free(Some(c));
            heap.free(Some(d));

            let p = heap.allocate(2 * s).expect("should reuse coalesced space");
            assert_eq!(p.as_ptr() as usize, addr_c);

            heap.free(Some(p));
            heap.free(Some(a));
            heap.free(Some(b));
        }
    }

    #[test]
    fn coalesce_both_sides_reuses_freed_address() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        for &s in &[64usize, 4096] {
            let a = heap.allocate(s).unwrap();
            let b = heap.allocate(s).unwrap();
            let c = heap.allocate(s).unwrap();
            let d = heap.allocate(s).unwrap();
            let addr_b = b.as_ptr() as usize;

            heap.free(Some(c));
            heap.free(Some(b));
            heap.free(Some(d));

            let p = heap.allocate(3 * s).expect("should reuse coalesced space");
            assert_eq!(p.as_ptr() as usize, addr_b);

            heap.free(Some(p));
            heap.free(Some(a));
        }
    }

    #[test]
    fn reallocate_preserves_contents() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        let p = heap.allocate(8).unwrap();
        unsafe { std::ptr::copy_nonoverlapping(b"ABCDEFGH".as_ptr(), p.as_ptr(), 8) };

        let bigger = heap.reallocate(Some(p), 32).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(bigger.as_ptr(), 8) };
        assert_eq!(bytes, b"ABCDEFGH");

        heap.free(Some(bigger));
    }

    #[test]
    fn zero_allocate_zeroes_payload() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        let p = heap.zero_allocate(16, 8).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 128) };
        assert!(bytes.iter().all(|&b| b == 0));
        heap.free(Some(p));
    }

    #[test]
    fn zero_allocate_rejects_overflow_and_zero_size() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        assert!(heap.zero_allocate(usize::MAX, 2).is_none());
        assert!(heap.zero_allocate(4, 0).is_none());
    }

    /// Walks every region of every live extent in address order, checking
    /// P3 (header/footer agreement) and P4 (no two address-adjacent regions
    /// both free).
    fn assert_p3_p4(heap: &UnsafeHeap<OsPageSource>) {
        let mut extent = heap.extents;
        while let Some(node) = extent {
            let header = unsafe { node.as_ref() };
            let start = header.as_ptr();
            let end = unsafe { start.add(header.total_bytes) };

            let mut cursor = start;
            let mut prev_was_free = false;
            while (cursor as usize) < (end as usize) {
                let tag = unsafe { region::read_tag(region::header_ptr(cursor)) };
                let size = tag.size();
                let footer_tag = unsafe { region::read_tag(region::footer_ptr(cursor, size)) };
                assert_eq!(tag, footer_tag, "header/footer disagree for region at {:?}", cursor);

                if !tag.used() {
                    assert!(!prev_was_free, "two adjacent free regions at {:?}", cursor);
                }
                prev_was_free = !tag.used();

                cursor = unsafe { cursor.add(size) };
            }

            extent = header.next;
        }
    }

    #[test]
    fn header_footer_agree_and_no_adjacent_frees_after_mixed_workload() {
        let mut heap = UnsafeHeap::new(OsPageSource::new());
        let sizes = [32usize, 500, 64, 4096, 16, 1024];
        let mut ptrs = Vec::new();
        for &s in &sizes {
            ptrs.push(heap.allocate(s).unwrap());
        }
        assert_p3_p4(&heap);

        heap.free(Some(ptrs.remove(2)));
        heap.free(Some(ptrs.remove(0)));
        assert_p3_p4(&heap);

        let p = heap.allocate(200).unwrap();
        ptrs.push(p);
        assert_p3_p4(&heap);

        for p in ptrs {
            heap.free(Some(p));
        }
        assert_p3_p4(&heap);
    }

    #[test]
    fn heap_wrapper_is_usable_from_multiple_threads() {
        use std::sync::Arc;

        let heap = Arc::new(Heap::new(OsPageSource::new()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let heap = Arc::clone(&heap);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let p = heap.allocate(32).unwrap();
                    heap.free(Some(p));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
