//! Scenarios 1 and 2 from the allocator's concrete test plan: single and
//! sequential allocate/write/free cycles.

use segalloc::{OsPageSource, UnsafeHeap};

#[test]
fn single_allocation_is_aligned_writable_and_freeable() {
    let mut heap = UnsafeHeap::new(OsPageSource::new());

    let p = heap.allocate(4).expect("allocate should succeed");
    assert_eq!((p.as_ptr() as usize) % 16, 0);

    unsafe { *(p.as_ptr() as *mut i32) = 42 };
    assert_eq!(unsafe { *(p.as_ptr() as *const i32) }, 42);

    heap.free(Some(p));
}

#[test]
fn sequential_allocations_stay_isolated() {
    let mut heap = UnsafeHeap::new(OsPageSource::new());

    let mut pointers = Vec::new();
    for i in 0..5 {
        let p = heap.allocate(4).expect("allocate should succeed");
        assert_eq!((p.as_ptr() as usize) % 16, 0);
        unsafe { *(p.as_ptr() as *mut i32) = 42 + i };
        pointers.push(p);
    }

    for (i, &p) in pointers.iter().enumerate() {
        assert_eq!(unsafe { *(p.as_ptr() as *const i32) }, 42 + i as i32);
    }

    for p in pointers {
        heap.free(Some(p));
    }
}

#[test]
fn free_of_null_is_a_no_op() {
    let mut heap = UnsafeHeap::new(OsPageSource::new());
    heap.free(None);
}

#[test]
fn double_free_is_silently_ignored() {
    let mut heap = UnsafeHeap::new(OsPageSource::new());
    // Keep a second live allocation so the extent isn't drained (and
    // released) after the first free, which would otherwise make the
    // second `free` a no-op for the unrelated reason of a foreign pointer.
    let keep_alive = heap.allocate(16).unwrap();
    let p = heap.allocate(16).unwrap();

    heap.free(Some(p));
    heap.free(Some(p));

    heap.free(Some(keep_alive));
}

#[test]
fn allocating_zero_bytes_returns_none() {
    let mut heap = UnsafeHeap::new(OsPageSource::new());
    assert!(heap.allocate(0).is_none());
}
