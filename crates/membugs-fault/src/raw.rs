//! Raw memory view — unchecked, offset-addressed byte access.
//!
//! Every out-of-bounds and dangling access the harness performs goes
//! through [`RawView`].  It is the only place where indexing is done with
//! plain address arithmetic instead of checked slices, so that underflow
//! (`offset < 0`) and overflow (`offset >= len`) reach memory exactly as
//! written and remain visible to a sanitizer.
//!
//! All loads and stores are volatile: the optimiser may not drop, merge, or
//! reorder them, even when it can prove the access is undefined.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};

/// A byte window over memory the caller vouches for, with no bounds checks.
///
/// `len` is the declared extent of the underlying object.  It is used for
/// [`contains`](Self::contains) and for computing in-bounds and
/// out-of-bounds offsets, never to reject an access.
#[derive(Debug, Clone, Copy)]
pub struct RawView<'a> {
    base: NonNull<u8>,
    len: usize,
    _object: PhantomData<&'a mut [u8]>,
}

impl<'a> RawView<'a> {
    /// Wrap `len` bytes starting at `base`.
    ///
    /// Returns `None` for a null base.
    ///
    /// # Safety
    /// `base` must be the start of an object of `len` bytes that stays
    /// allocated for `'a`, or the caller must intend the resulting accesses
    /// to be undefined.
    #[inline(always)]
    pub unsafe fn new(base: *mut u8, len: usize) -> Option<Self> {
        NonNull::new(base).map(|base| Self {
            base,
            len,
            _object: PhantomData,
        })
    }

    /// Wrap `len` bytes of a block known to be non-null.
    ///
    /// # Safety
    /// Same as [`new`](Self::new).
    #[inline(always)]
    pub unsafe fn from_non_null(base: NonNull<u8>, len: usize) -> Self {
        Self {
            base,
            len,
            _object: PhantomData,
        }
    }

    /// Declared length of the object.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the object.
    #[inline(always)]
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Whether `offset` lies inside the declared extent.
    #[inline(always)]
    pub fn contains(&self, offset: isize) -> bool {
        offset >= 0 && (offset as usize) < self.len
    }

    /// Address of `base + offset`, computed without any provenance checks.
    #[inline(always)]
    pub fn addr_at(&self, offset: isize) -> *mut u8 {
        self.base.as_ptr().wrapping_offset(offset)
    }

    /// Volatile load of the byte at `base + offset`.
    ///
    /// # Safety
    /// Undefined unless `contains(offset)` holds and the object is live.
    #[inline(always)]
    pub unsafe fn read(&self, offset: isize) -> u8 {
        ptr::read_volatile(self.addr_at(offset))
    }

    /// Volatile store of `value` at `base + offset`.
    ///
    /// # Safety
    /// Undefined unless `contains(offset)` holds and the object is live.
    #[inline(always)]
    pub unsafe fn write(&self, offset: isize, value: u8) {
        ptr::write_volatile(self.addr_at(offset), value)
    }

    /// Volatile load of `N` consecutive bytes starting at `base + offset`.
    ///
    /// # Safety
    /// Same as [`read`](Self::read), for every byte of the range.
    #[inline(always)]
    pub unsafe fn read_array<const N: usize>(&self, offset: isize) -> [u8; N] {
        let mut out = [0u8; N];
        let mut i = 0;
        while i < N {
            out[i] = self.read(offset + i as isize);
            i += 1;
        }
        out
    }
}
