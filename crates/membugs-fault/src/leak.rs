//! Ledger of deliberately retained allocations.
//!
//! Leak faults hand their block to the [`LeakLedger`] instead of freeing
//! it.  The ledger keeps size and owner so the block can be reported as
//! outstanding for the rest of the process, but stores the address
//! xor-masked: a leak checker scanning the ledger's memory must not find a
//! live pointer to the block, or the leak would be masked.
//!
//! There is no release path.  A retained block is never freed.

use crate::catalog::FaultId;
use std::ptr::NonNull;
use std::sync::{Mutex, PoisonError};

/// Mask applied to stored addresses.  Any value with the top bits set turns
/// a user-space address into something no pointer scanner accepts.
const ADDR_MASK: usize = (usize::MAX ^ (usize::MAX >> 4)) | 0x5a5a_5a5a;

/// One retained allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedBlock {
    /// Fault that produced the block.
    pub fault: FaultId,
    /// Size of the allocation in bytes.
    pub bytes: usize,
    masked_addr: usize,
}

impl RetainedBlock {
    /// The block's real address.
    pub fn address(&self) -> usize {
        self.masked_addr ^ ADDR_MASK
    }
}

/// Append-only set of blocks that leak faults deliberately never free.
#[derive(Debug, Default)]
pub struct LeakLedger {
    blocks: Mutex<Vec<RetainedBlock>>,
}

impl LeakLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `ptr` as deliberately leaked by `fault`.
    pub fn retain(&self, fault: FaultId, ptr: NonNull<u8>, bytes: usize) {
        let block = RetainedBlock {
            fault,
            bytes,
            masked_addr: ptr.as_ptr() as usize ^ ADDR_MASK,
        };
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(block);
    }

    /// Number of retained blocks and their total size.
    pub fn outstanding(&self) -> (usize, usize) {
        let blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        (blocks.len(), blocks.iter().map(|b| b.bytes).sum())
    }

    /// Retained blocks produced by `fault`, oldest first.
    pub fn by_fault(&self, fault: FaultId) -> Vec<RetainedBlock> {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|b| b.fault == fault)
            .cloned()
            .collect()
    }

    /// All retained blocks, oldest first.
    pub fn blocks(&self) -> Vec<RetainedBlock> {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retained_blocks_are_outstanding() {
        let ledger = LeakLedger::new();
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        ledger.retain(5, NonNull::new(a.as_mut_ptr()).unwrap(), 1520);
        ledger.retain(6, NonNull::new(b.as_mut_ptr()).unwrap(), 8);
        assert_eq!(ledger.outstanding(), (2, 1528));
        assert_eq!(ledger.by_fault(5).len(), 1);
        assert_eq!(ledger.by_fault(5)[0].bytes, 1520);
    }

    #[test]
    fn stored_address_is_masked_but_recoverable() {
        let ledger = LeakLedger::new();
        let mut a = [0u8; 4];
        let addr = a.as_mut_ptr() as usize;
        ledger.retain(0, NonNull::new(a.as_mut_ptr()).unwrap(), 4);
        let block = &ledger.blocks()[0];
        assert_ne!(block.masked_addr, addr);
        assert_eq!(block.address(), addr);
    }
}
