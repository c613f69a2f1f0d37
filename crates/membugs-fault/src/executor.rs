//! Fault executor — runs one primitive and classifies what happened.
//!
//! The executor never looks at memory to decide whether a violation was
//! caught.  It asks the sanitizer for its report counter immediately before
//! and after the primitive runs:
//!
//! | Primitive result      | Report counter | Outcome                      |
//! |-----------------------|----------------|------------------------------|
//! | setup allocation fail | (not read)     | `skipped-resource-exhausted` |
//! | block retained (leak) | (ignored)      | `leaked`                     |
//! | returned              | increased      | `detected`                   |
//! | returned              | unchanged      | `undetected`                 |
//!
//! A primitive that takes the process down produces no result at all; the
//! supervisor in `membugs-runner` records that as `crashed`.
//!
//! Executions of the same fault are serialized by a per-fault gate.
//! Different faults may run concurrently.

use crate::catalog::{AccessKind, Direction, FaultCatalog, FaultCategory, FaultId, FaultSpec};
use crate::config::MAX_REPEAT;
use crate::heap::Heap;
use crate::instrument::Sanitizer;
use crate::leak::LeakLedger;
use crate::primitives;
use crate::report::{ExecutionResult, Outcome};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// What a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    One(FaultCategory),
    /// Every enabled fault, in catalog order.
    All,
}

/// A transient request to run one or all faults.
///
/// # Example
///
/// ```
/// use membugs_fault::{AccessKind, Direction, ExecutionRequest, FaultCategory, Target};
///
/// let request = ExecutionRequest::one(FaultCategory::OobDynamicRight)
///     .direction(Direction::Read)
///     .access(AccessKind::Control)
///     .repeat(3);
/// assert_eq!(request.target, Target::One(FaultCategory::OobDynamicRight));
/// assert_eq!(request.repeat, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub target: Target,
    /// Executions per fault.  Zero is treated as one; anything above
    /// [`MAX_REPEAT`] as `MAX_REPEAT`.
    pub repeat: u32,
    /// Requested direction; `None` uses each fault's default.
    pub direction: Option<Direction>,
    pub access: AccessKind,
}

impl ExecutionRequest {
    pub fn one(category: FaultCategory) -> Self {
        Self {
            target: Target::One(category),
            repeat: 1,
            direction: None,
            access: AccessKind::Violation,
        }
    }

    pub fn all() -> Self {
        Self {
            target: Target::All,
            ..Self::one(FaultCategory::UninitializedRead)
        }
    }

    pub fn repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn access(mut self, access: AccessKind) -> Self {
        self.access = access;
        self
    }

    /// Executions per fault, clamped to `1..=MAX_REPEAT`.
    pub fn times(&self) -> u32 {
        self.repeat.clamp(1, MAX_REPEAT)
    }
}

/// Runs fault primitives against a heap and a sanitizer.
pub struct FaultExecutor {
    sanitizer: Arc<dyn Sanitizer>,
    heap: Arc<dyn Heap>,
    ledger: LeakLedger,
    gates: BTreeMap<FaultId, Mutex<()>>,
    /// Gate for specs that are not part of the catalog the executor was
    /// built from.
    stray: Mutex<()>,
}

impl FaultExecutor {
    /// One gate per entry of `catalog`.
    pub fn new(catalog: &FaultCatalog, sanitizer: Arc<dyn Sanitizer>, heap: Arc<dyn Heap>) -> Self {
        let gates = catalog
            .list()
            .iter()
            .map(|spec| (spec.id, Mutex::new(())))
            .collect();
        Self {
            sanitizer,
            heap,
            ledger: LeakLedger::new(),
            gates,
            stray: Mutex::new(()),
        }
    }

    /// Run `spec` once.  The result is not yet sequenced.
    pub fn execute(&self, spec: &FaultSpec, request: &ExecutionRequest) -> ExecutionResult {
        let gate = self.gates.get(&spec.id).unwrap_or(&self.stray);
        // A panic inside a previous run does not make the gate unusable.
        let _guard = gate.lock().unwrap_or_else(PoisonError::into_inner);

        let direction = spec.category.resolve_direction(request.direction);
        if request.direction.is_some_and(|d| d != direction) {
            debug!(
                "fault={} only supports direction={direction}, ignoring requested direction",
                spec.category
            );
        }

        let before = self.sanitizer.reports();
        let observed = primitives::run(spec.category, direction, request.access, self.heap.as_ref());
        let after = self.sanitizer.reports();

        let result = match observed {
            Err(e) => {
                warn!("fault={} skipped: {e}", spec.category);
                ExecutionResult::new(spec.id, spec.category, direction, request.access, Outcome::SkippedResourceExhausted)
                    .with_detail(e.to_string())
            }
            Ok(obs) => {
                let outcome = if let Some(block) = obs.retained {
                    self.ledger.retain(spec.id, block.ptr, block.bytes);
                    Outcome::Leaked
                } else if after > before {
                    Outcome::Detected
                } else {
                    Outcome::Undetected
                };
                let mut result =
                    ExecutionResult::new(spec.id, spec.category, direction, request.access, outcome);
                result.raw_value = obs.raw_value;
                result.address = obs.address;
                result.bytes = obs.bytes;
                result
            }
        };

        info!(
            "fault={} direction={} access={} outcome={}",
            spec.category, direction, request.access, result.outcome
        );
        result
    }

    /// Blocks retained by leak faults so far.
    pub fn ledger(&self) -> &LeakLedger {
        &self.ledger
    }

    pub fn sanitizer(&self) -> &Arc<dyn Sanitizer> {
        &self.sanitizer
    }
}

impl std::fmt::Debug for FaultExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultExecutor")
            .field("sanitizer", &self.sanitizer.name())
            .field("gates", &self.gates.len())
            .field("ledger", &self.ledger.outstanding())
            .finish()
    }
}
