//! Heap source for fault primitives.
//!
//! Primitives allocate through the [`Heap`] trait rather than calling the
//! global allocator directly, so an allocation failure during fault setup
//! can be exercised deterministically.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Byte allocator used to set up heap faults.
pub trait Heap: Send + Sync {
    /// Allocate `size` bytes with byte alignment.  `None` on exhaustion.
    fn allocate(&self, size: usize, zeroed: bool) -> Option<NonNull<u8>>;

    /// Return a block obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    /// `ptr` must come from `allocate(size, _)` on this heap and must not
    /// have been released already.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize);
}

/// The process's global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHeap;

impl Heap for SystemHeap {
    fn allocate(&self, size: usize, zeroed: bool) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size.max(1), 1).ok()?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        NonNull::new(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        let layout = Layout::from_size_align_unchecked(size.max(1), 1);
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// A heap that is always out of memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExhaustedHeap;

impl Heap for ExhaustedHeap {
    fn allocate(&self, _size: usize, _zeroed: bool) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn release(&self, _ptr: NonNull<u8>, _size: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_heap_zeroed_allocation() {
        let heap = SystemHeap;
        let ptr = heap.allocate(64, true).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { heap.release(ptr, 64) };
    }

    #[test]
    fn exhausted_heap_never_allocates() {
        assert!(ExhaustedHeap.allocate(1, false).is_none());
        assert!(ExhaustedHeap.allocate(1520, true).is_none());
    }
}
