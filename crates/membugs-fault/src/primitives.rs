//! The fault primitives.
//!
//! Each routine here commits one memory-safety violation on purpose.  None
//! of them checks bounds, recovers, or otherwise softens the bug: the
//! undefined behaviour has to reach memory so the sanitizer can see it.
//!
//! Rules the routines follow:
//!
//! - Stack faults never call anything that uses stack between producing the
//!   bad state and reading it back; a reused frame would erase the fault.
//! - Array faults address memory through [`RawView`] with signed offsets
//!   from the declared bounds, never through checked indexing.
//! - Every faulty load and store is volatile and every produced pointer goes
//!   through [`black_box`], so the optimiser cannot fold the bug away.
//! - Setup allocations that fail produce [`ExecError::ResourceExhausted`];
//!   nothing panics.

use crate::catalog::{AccessKind, Direction, FaultCategory};
use crate::heap::Heap;
use crate::raw::RawView;
use std::hint::black_box;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use thiserror::Error;

/// Length of the static global array.
pub const GLOBAL_ARR_LEN: usize = 8;
/// Length of the stack-local array used by the static faults.
pub const LOCAL_ARR_LEN: usize = 20;
/// Distance past (or before) the global array's bounds.
pub const GLOBAL_MARGIN: isize = 2;
/// Distance past (or before) the local array's bounds.
pub const LOCAL_MARGIN: isize = 5;
/// Size of the heap block overflowed by `out-of-bounds-dynamic-right`.
pub const DYNAMIC_ALLOC_LEN: usize = 123;
/// Size of the block `leak-owned` never frees.
pub const LEAK_OWNED_LEN: usize = 1520;
/// Size of the block handed to the caller by `leak-caller-owned`.
pub const LEAK_CALLER_OWNED_LEN: usize = 8;
/// Size of the stack buffer whose address escapes in `use-after-return`.
pub const UAR_BUF_LEN: usize = 64;

const LEAK_CALLER_CONTENT: &[u8; LEAK_CALLER_OWNED_LEN] = b"leaky!!\0";

static mut GLOBAL_ARR: [u8; GLOBAL_ARR_LEN] = [0; GLOBAL_ARR_LEN];

/// Errors raised while setting up a primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("allocation of {bytes} bytes failed")]
    ResourceExhausted { bytes: usize },
}

/// A block a leak primitive deliberately kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retained {
    pub ptr: NonNull<u8>,
    pub bytes: usize,
}

/// What a primitive observed directly, if it returned at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// Bytes loaded by the primitive, in access order.
    pub raw_value: Option<Vec<u8>>,
    /// Address of the object involved, for faults where exposing it cannot
    /// mask the bug.
    pub address: Option<usize>,
    /// Allocation size for leak faults.
    pub bytes: Option<usize>,
    /// Block that must go to the leak ledger.
    pub retained: Option<Retained>,
}

/// Run the primitive for `category`.
pub fn run(
    category: FaultCategory,
    direction: Direction,
    access: AccessKind,
    heap: &dyn Heap,
) -> Result<Observation, ExecError> {
    match category {
        FaultCategory::UninitializedRead => Ok(uninitialized_read()),
        FaultCategory::UseAfterReturn => Ok(use_after_return()),
        FaultCategory::OobStaticRight => Ok(static_oob_right(direction, access)),
        FaultCategory::OobStaticLeft => Ok(static_oob_left(direction, access)),
        FaultCategory::OobDynamicRight => dynamic_oob_right(direction, access, heap),
        FaultCategory::LeakOwned => leak_owned(heap),
        FaultCategory::LeakCallerOwned => leak_caller_owned(heap),
    }
}

// ── Stack faults ────────────────────────────────────────────────

#[inline(never)]
fn uninitialized_read() -> Observation {
    let x = MaybeUninit::<i32>::uninit();
    // SAFETY: none; `x` has never been written.
    let value = black_box(unsafe { ptr::read_volatile(x.as_ptr()) });
    Observation {
        raw_value: Some(value.to_le_bytes().to_vec()),
        ..Default::default()
    }
}

/// Fill a frame-local buffer and let its address escape the frame.
#[inline(never)]
fn escape_stack_buffer() -> *mut u8 {
    let mut name = MaybeUninit::<[u8; UAR_BUF_LEN]>::uninit();
    let base = name.as_mut_ptr().cast::<u8>();
    // SAFETY: in bounds of `name`, which is live here.
    unsafe {
        let view = RawView::from_non_null(NonNull::new_unchecked(base), UAR_BUF_LEN);
        let mut i = 0;
        while i < UAR_BUF_LEN - 1 {
            view.write(i as isize, b'x');
            i += 1;
        }
        view.write(i as isize, 0);
    }
    black_box(base)
}

#[inline(never)]
fn use_after_return() -> Observation {
    let mut captured = [0u8; UAR_BUF_LEN];
    let dangling = escape_stack_buffer();
    // SAFETY: none; the frame owning `dangling` has returned.
    if let Some(view) = unsafe { RawView::new(dangling, UAR_BUF_LEN) } {
        captured = unsafe { view.read_array(0) };
    }
    Observation {
        raw_value: Some(captured.to_vec()),
        address: Some(dangling as usize),
        ..Default::default()
    }
}

// ── Static (compile-time) memory faults ─────────────────────────

/// In-bounds and out-of-bounds offsets for one array.
#[derive(Clone, Copy)]
struct Probe {
    control: isize,
    violation: isize,
    control_fill: u8,
    violation_fill: u8,
}

/// Up to four loaded bytes, kept on the stack until the accesses are done.
struct Loaded {
    bytes: [u8; 4],
    len: usize,
}

impl Loaded {
    #[inline(always)]
    fn new() -> Self {
        Self { bytes: [0; 4], len: 0 }
    }

    #[inline(always)]
    fn push(&mut self, byte: Option<u8>) {
        if let Some(b) = byte {
            self.bytes[self.len] = b;
            self.len += 1;
        }
    }

    fn into_raw(self) -> Option<Vec<u8>> {
        (self.len > 0).then(|| self.bytes[..self.len].to_vec())
    }
}

#[inline(always)]
unsafe fn touch(view: &RawView<'_>, offset: isize, direction: Direction, fill: u8) -> Option<u8> {
    match direction {
        Direction::Read => Some(view.read(offset)),
        Direction::Write => {
            view.write(offset, fill);
            None
        }
    }
}

#[inline(always)]
unsafe fn probe(
    view: &RawView<'_>,
    p: Probe,
    direction: Direction,
    access: AccessKind,
    loaded: &mut Loaded,
) {
    loaded.push(touch(view, p.control, direction, p.control_fill));
    if access == AccessKind::Violation {
        loaded.push(touch(view, p.violation, direction, p.violation_fill));
    }
}

#[inline(always)]
fn global_view() -> RawView<'static> {
    // SAFETY: GLOBAL_ARR is a static of GLOBAL_ARR_LEN bytes; it is only
    // ever touched through raw pointers.
    unsafe {
        RawView::from_non_null(
            NonNull::new_unchecked(ptr::addr_of_mut!(GLOBAL_ARR).cast::<u8>()),
            GLOBAL_ARR_LEN,
        )
    }
}

#[inline(never)]
fn static_oob_right(direction: Direction, access: AccessKind) -> Observation {
    let mut local = MaybeUninit::<[u8; LOCAL_ARR_LEN]>::uninit();
    let global = global_view();
    let global_len = GLOBAL_ARR_LEN as isize;
    let local_len = LOCAL_ARR_LEN as isize;
    let mut loaded = Loaded::new();
    // SAFETY: none for the violation offsets; that is the fault.
    unsafe {
        let local = RawView::from_non_null(
            NonNull::new_unchecked(local.as_mut_ptr().cast::<u8>()),
            LOCAL_ARR_LEN,
        );
        let g = Probe {
            control: global_len - GLOBAL_MARGIN,
            violation: global_len + GLOBAL_MARGIN,
            control_fill: b'w',
            violation_fill: b'x',
        };
        let l = Probe {
            control: local_len - LOCAL_MARGIN,
            violation: local_len + LOCAL_MARGIN,
            control_fill: b'y',
            violation_fill: b'z',
        };
        probe(&global, g, direction, access, &mut loaded);
        probe(&local, l, direction, access, &mut loaded);
    }
    Observation {
        raw_value: loaded.into_raw(),
        ..Default::default()
    }
}

#[inline(never)]
fn static_oob_left(direction: Direction, access: AccessKind) -> Observation {
    let mut local = MaybeUninit::<[u8; LOCAL_ARR_LEN]>::uninit();
    let global = global_view();
    let mut loaded = Loaded::new();
    // SAFETY: none for the violation offsets; that is the fault.
    unsafe {
        let local = RawView::from_non_null(
            NonNull::new_unchecked(local.as_mut_ptr().cast::<u8>()),
            LOCAL_ARR_LEN,
        );
        let g = Probe {
            control: GLOBAL_MARGIN,
            violation: -GLOBAL_MARGIN,
            control_fill: b'w',
            violation_fill: b'x',
        };
        let l = Probe {
            control: LOCAL_MARGIN,
            violation: -LOCAL_MARGIN,
            control_fill: b'y',
            violation_fill: b'z',
        };
        probe(&global, g, direction, access, &mut loaded);
        probe(&local, l, direction, access, &mut loaded);
    }
    Observation {
        raw_value: loaded.into_raw(),
        ..Default::default()
    }
}

// ── Heap faults ─────────────────────────────────────────────────

#[inline(never)]
fn dynamic_oob_right(
    direction: Direction,
    access: AccessKind,
    heap: &dyn Heap,
) -> Result<Observation, ExecError> {
    let block = heap
        .allocate(DYNAMIC_ALLOC_LEN, false)
        .ok_or(ExecError::ResourceExhausted {
            bytes: DYNAMIC_ALLOC_LEN,
        })?;
    let len = DYNAMIC_ALLOC_LEN as isize;
    let mut loaded = Loaded::new();
    // SAFETY: none for offset `len`; that is the fault.
    unsafe {
        let view = RawView::from_non_null(block, DYNAMIC_ALLOC_LEN);
        let p = Probe {
            control: len - 1,
            violation: len,
            control_fill: b'w',
            violation_fill: b'x',
        };
        probe(&view, p, direction, access, &mut loaded);
        heap.release(block, DYNAMIC_ALLOC_LEN);
    }
    Ok(Observation {
        raw_value: loaded.into_raw(),
        ..Default::default()
    })
}

/// Allocate and never free.  The routine itself owns the block.
#[inline(never)]
fn leak_owned(heap: &dyn Heap) -> Result<Observation, ExecError> {
    let block = heap
        .allocate(LEAK_OWNED_LEN, true)
        .ok_or(ExecError::ResourceExhausted {
            bytes: LEAK_OWNED_LEN,
        })?;
    Ok(Observation {
        bytes: Some(LEAK_OWNED_LEN),
        retained: Some(Retained {
            ptr: block,
            bytes: LEAK_OWNED_LEN,
        }),
        ..Default::default()
    })
}

/// Allocate, fill, and hand the block to the caller, who must free it.
#[inline(never)]
fn alloc_for_caller(heap: &dyn Heap) -> Option<NonNull<u8>> {
    let q = heap.allocate(LEAK_CALLER_OWNED_LEN, false)?;
    // SAFETY: in bounds of the fresh block.
    unsafe {
        let view = RawView::from_non_null(q, LEAK_CALLER_OWNED_LEN);
        for (i, &b) in LEAK_CALLER_CONTENT.iter().enumerate() {
            view.write(i as isize, b);
        }
    }
    Some(black_box(q))
}

/// The caller side of the contract: use the block, never free it.
#[inline(never)]
fn leak_caller_owned(heap: &dyn Heap) -> Result<Observation, ExecError> {
    let q = alloc_for_caller(heap).ok_or(ExecError::ResourceExhausted {
        bytes: LEAK_CALLER_OWNED_LEN,
    })?;
    // SAFETY: in bounds of the live block.
    let content: [u8; LEAK_CALLER_OWNED_LEN] =
        unsafe { RawView::from_non_null(q, LEAK_CALLER_OWNED_LEN).read_array(0) };
    Ok(Observation {
        raw_value: Some(content.to_vec()),
        bytes: Some(LEAK_CALLER_OWNED_LEN),
        retained: Some(Retained {
            ptr: q,
            bytes: LEAK_CALLER_OWNED_LEN,
        }),
        ..Default::default()
    })
}
