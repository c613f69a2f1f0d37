//! Result reporter — append-only log of fault executions.
//!
//! The reporter receives one [`ExecutionResult`] per execution and keeps
//! them in sequence order.  Entries are never modified; the only way to
//! remove them is [`ResultReporter::reset`].
//!
//! # Outcome semantics
//!
//! | Outcome                      | Meaning                                        |
//! |------------------------------|------------------------------------------------|
//! | `detected`                   | The sanitizer reported during the execution    |
//! | `undetected`                 | The primitive returned and nothing reported    |
//! | `crashed`                    | The executing process died without a report    |
//! | `leaked`                     | The block was retained, as the fault intends  |
//! | `skipped-resource-exhausted` | Setup allocation failed; the fault never ran   |
//!
//! Sequence numbers are assigned on append and keep increasing across
//! resets, so ordering never depends on wall-clock time.

use crate::catalog::{AccessKind, Direction, FaultCategory, FaultId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// What happened when a fault ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Detected,
    Undetected,
    Crashed,
    Leaked,
    SkippedResourceExhausted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Detected => write!(f, "detected"),
            Outcome::Undetected => write!(f, "undetected"),
            Outcome::Crashed => write!(f, "crashed"),
            Outcome::Leaked => write!(f, "leaked"),
            Outcome::SkippedResourceExhausted => write!(f, "skipped-resource-exhausted"),
        }
    }
}

/// One execution of one fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Position in the log.  Zero until appended.
    pub sequence: u64,
    /// Wall-clock time of the execution, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    pub fault_id: FaultId,
    pub category: FaultCategory,
    pub direction: Direction,
    pub access: AccessKind,
    pub outcome: Outcome,
    /// Bytes the primitive loaded, in access order.
    pub raw_value: Option<Vec<u8>>,
    pub address: Option<usize>,
    /// Allocation size for leak faults.
    pub bytes: Option<usize>,
    /// Free-form note (crash signal, exhaustion size, ...).
    pub detail: Option<String>,
}

impl ExecutionResult {
    /// A result with no observations, not yet sequenced.
    pub fn new(
        fault_id: FaultId,
        category: FaultCategory,
        direction: Direction,
        access: AccessKind,
        outcome: Outcome,
    ) -> Self {
        Self {
            sequence: 0,
            timestamp_ns: now_ns(),
            fault_id,
            category,
            direction,
            access,
            outcome,
            raw_value: None,
            address: None,
            bytes: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} direction={} access={} outcome={}",
            self.sequence, self.category, self.direction, self.access, self.outcome
        )?;
        if let Some(raw) = &self.raw_value {
            write!(f, " raw=")?;
            for b in raw {
                write!(f, "{b:02x}")?;
            }
        }
        if let Some(addr) = self.address {
            write!(f, " addr={addr:#x}")?;
        }
        if let Some(bytes) = self.bytes {
            write!(f, " bytes={bytes}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " detail={detail:?}")?;
        }
        Ok(())
    }
}

/// Selects entries from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFilter {
    All,
    ById(FaultId),
    ByCategory(FaultCategory),
    /// Half-open range `[from_ns, to_ns)` over `timestamp_ns`.
    ByTimeRange { from_ns: u64, to_ns: u64 },
}

impl ResultFilter {
    pub fn matches(&self, result: &ExecutionResult) -> bool {
        match *self {
            ResultFilter::All => true,
            ResultFilter::ById(id) => result.fault_id == id,
            ResultFilter::ByCategory(category) => result.category == category,
            ResultFilter::ByTimeRange { from_ns, to_ns } => {
                result.timestamp_ns >= from_ns && result.timestamp_ns < to_ns
            }
        }
    }
}

/// A lazily filtered view of the log at the time of the query.
///
/// Iterating never touches the live log, and a `Query` can be iterated
/// any number of times with the same result.
#[derive(Debug, Clone)]
pub struct Query {
    snapshot: Vec<Arc<ExecutionResult>>,
    filter: ResultFilter,
}

impl Query {
    /// Iterate matching entries in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionResult> + '_ {
        self.snapshot
            .iter()
            .map(Arc::as_ref)
            .filter(move |r| self.filter.matches(r))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

impl<'a> IntoIterator for &'a Query {
    type Item = &'a ExecutionResult;
    type IntoIter = Box<dyn Iterator<Item = &'a ExecutionResult> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[derive(Debug, Default)]
struct Log {
    entries: Vec<Arc<ExecutionResult>>,
    next_sequence: u64,
}

/// Append-only, thread-safe result log.
///
/// # Example
///
/// ```
/// use membugs_fault::catalog::{AccessKind, Direction, FaultCategory};
/// use membugs_fault::report::{ExecutionResult, Outcome, ResultFilter, ResultReporter};
///
/// let reporter = ResultReporter::new();
/// let result = ExecutionResult::new(
///     6,
///     FaultCategory::LeakCallerOwned,
///     Direction::Write,
///     AccessKind::Violation,
///     Outcome::Leaked,
/// );
/// let appended = reporter.append(result);
/// assert_eq!(appended.sequence, 1);
///
/// let query = reporter.query(ResultFilter::ById(6));
/// assert_eq!(query.count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ResultReporter {
    log: RwLock<Log>,
}

impl ResultReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence `result` and append it.  Returns the stored entry.
    pub fn append(&self, mut result: ExecutionResult) -> ExecutionResult {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        log.next_sequence += 1;
        result.sequence = log.next_sequence;
        log.entries.push(Arc::new(result.clone()));
        result
    }

    /// Snapshot the log and select entries lazily.
    pub fn query(&self, filter: ResultFilter) -> Query {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        Query {
            snapshot: log.entries.clone(),
            filter,
        }
    }

    /// Most recent entry for `fault`.
    pub fn last(&self, fault: FaultId) -> Option<ExecutionResult> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        log.entries
            .iter()
            .rev()
            .find(|r| r.fault_id == fault)
            .map(|r| r.as_ref().clone())
    }

    pub fn len(&self) -> usize {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.  Returns how many were removed.
    pub fn reset(&self) -> usize {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        let removed = log.entries.len();
        log.entries.clear();
        removed
    }
}

pub(crate) fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
