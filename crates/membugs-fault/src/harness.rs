//! Harness lifecycle: init, the control-surface operations, teardown.
//!
//! ```text
//! init                                    teardown (idempotent, also on Drop)
//! ────                                    ────────
//! 1. attach ModeController (capture mode) 1. ModeController::restore()
//! 2. enable multi-shot if requested       2. remove all control entries
//!    (ConfigurationError aborts here)
//! 3. build + freeze catalog
//! 4. create control entries
//! ```
//!
//! Nothing runs on its own.  Every execution starts from a call into
//! [`Harness::run`], [`Harness::run_all`], [`Harness::run_request`] or a
//! write to a control entry.

use crate::catalog::{CatalogError, Direction, FaultCatalog, FaultCategory, FaultId, FaultSpec};
use crate::config::HarnessConfig;
use crate::control::{self, EntryKind, EntryTable, Payload, SurfaceError};
use crate::executor::{ExecutionRequest, FaultExecutor, Target};
use crate::heap::{Heap, SystemHeap};
use crate::instrument::{self, InstrumentationState, ModeController, ModeError, OwnerId, Sanitizer, StateView};
use crate::leak::LeakLedger;
use crate::report::{ExecutionResult, Query, ResultFilter, ResultReporter};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by harness operations.  None of them stops the harness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("fault {0} is disabled")]
    Disabled(FaultCategory),

    #[error("no result recorded for {0}")]
    NoResult(FaultCategory),

    #[error("harness has been torn down")]
    TornDown,
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Configures and initializes a [`Harness`].
///
/// # Example
///
/// ```
/// use membugs_fault::{FaultCategory, Harness, InstrumentationState, Outcome};
/// use membugs_fault::instrument::Absent;
/// use std::sync::Arc;
///
/// let harness = Harness::builder()
///     .sanitizer(Arc::new(Absent))
///     .state(InstrumentationState::new())
///     .init()
///     .unwrap();
///
/// let result = harness.run(FaultCategory::LeakOwned, None).unwrap();
/// assert_eq!(result.outcome, Outcome::Leaked);
/// assert_eq!(result.bytes, Some(1520));
/// assert_eq!(harness.ledger().outstanding(), (1, 1520));
/// ```
#[derive(Default)]
pub struct HarnessBuilder {
    config: HarnessConfig,
    sanitizer: Option<Arc<dyn Sanitizer>>,
    state: Option<Arc<InstrumentationState>>,
    heap: Option<Arc<dyn Heap>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Request multi-shot reporting for the harness's lifetime.
    pub fn multi_shot(mut self, multi_shot: bool) -> Self {
        self.config.multi_shot = multi_shot;
        self
    }

    /// Sanitizer backend.  Defaults to [`instrument::detect`].
    pub fn sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    /// Instrumentation state to own.  Defaults to the process state.
    pub fn state(mut self, state: Arc<InstrumentationState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Allocator for heap faults.  Defaults to [`SystemHeap`].
    pub fn heap(mut self, heap: Arc<dyn Heap>) -> Self {
        self.heap = Some(heap);
        self
    }

    pub fn init(self) -> Result<Harness, HarnessError> {
        let sanitizer = self.sanitizer.unwrap_or_else(instrument::detect);
        let state = self.state.unwrap_or_else(InstrumentationState::process);
        let heap = self.heap.unwrap_or_else(|| Arc::new(SystemHeap));
        let owner = OwnerId(NEXT_OWNER.fetch_add(1, Ordering::Relaxed));

        info!(
            "harness {owner} starting: sanitizer={} multi-shot={}",
            sanitizer.name(),
            if self.config.multi_shot { "requested" } else { "off" }
        );

        let controller = ModeController::attach(Arc::clone(&sanitizer), state, owner)?;
        if self.config.multi_shot {
            // Dropping the controller on this path restores the captured mode.
            controller.enable_multi_shot()?;
        }

        let catalog = FaultCatalog::standard(|category| self.config.is_enabled(category));
        let entries = EntryTable::new();
        if let Err(e) = entries.create(&catalog) {
            controller.restore();
            entries.remove_all();
            return Err(e.into());
        }

        let executor = FaultExecutor::new(&catalog, sanitizer, heap);
        debug!(
            "harness {owner} ready: {} faults ({} enabled), {} entries",
            catalog.len(),
            catalog.enabled().count(),
            entries.names().len()
        );

        Ok(Harness {
            config: self.config,
            controller,
            catalog,
            executor,
            reporter: ResultReporter::new(),
            entries,
            torn_down: AtomicBool::new(false),
        })
    }
}

/// A running fault-injection harness.
pub struct Harness {
    config: HarnessConfig,
    controller: ModeController,
    catalog: FaultCatalog,
    executor: FaultExecutor,
    reporter: ResultReporter,
    entries: EntryTable,
    torn_down: AtomicBool,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    // ── Control-surface operations ──────────────────────────────

    /// Every catalog entry, in registration order.
    pub fn list_categories(&self) -> Result<&[FaultSpec], HarnessError> {
        self.ensure_live()?;
        Ok(self.catalog.list())
    }

    /// Run `category` exactly once.
    pub fn run(
        &self,
        category: FaultCategory,
        direction: Option<Direction>,
    ) -> Result<ExecutionResult, HarnessError> {
        let mut request = ExecutionRequest::one(category);
        request.direction = direction;
        let mut results = self.run_request(&request)?;
        results.pop().ok_or(HarnessError::NoResult(category))
    }

    /// Run every enabled fault in catalog order, `repeat` times each.
    pub fn run_all(&self) -> Result<Vec<ExecutionResult>, HarnessError> {
        self.run_request(&ExecutionRequest::all().repeat(self.config.repeat()))
    }

    /// Execute `request`.  Results come back sequenced, in execution order.
    pub fn run_request(&self, request: &ExecutionRequest) -> Result<Vec<ExecutionResult>, HarnessError> {
        self.ensure_live()?;
        let specs: Vec<&FaultSpec> = match request.target {
            Target::All => self.catalog.enabled().collect(),
            Target::One(category) => {
                let spec = self.spec(category)?;
                if !spec.enabled {
                    return Err(HarnessError::Disabled(category));
                }
                vec![spec]
            }
        };

        let mut results = Vec::new();
        for spec in specs {
            for _ in 0..request.times() {
                let result = self.executor.execute(spec, request);
                results.push(self.reporter.append(result));
            }
        }
        Ok(results)
    }

    /// Latest result recorded for `category`.
    pub fn last_result(&self, category: FaultCategory) -> Result<ExecutionResult, HarnessError> {
        self.ensure_live()?;
        let spec = self.spec(category)?;
        self.reporter
            .last(spec.id)
            .ok_or(HarnessError::NoResult(category))
    }

    /// Clear the result log.  Returns how many entries were dropped.
    pub fn reset_log(&self) -> Result<usize, HarnessError> {
        self.ensure_live()?;
        let dropped = self.reporter.reset();
        info!("result log reset ({dropped} entries dropped)");
        Ok(dropped)
    }

    pub fn query(&self, filter: ResultFilter) -> Query {
        self.reporter.query(filter)
    }

    /// Register another fault.  Always fails once init has completed.
    pub fn register(&mut self, spec: FaultSpec) -> Result<FaultId, HarnessError> {
        Ok(self.catalog.register(spec)?)
    }

    // ── Text entries ────────────────────────────────────────────

    /// Names of the live control entries.
    pub fn entries(&self) -> Vec<String> {
        self.entries.names()
    }

    /// Write `payload` to the entry `name`; returns the response text.
    pub fn write_entry(&self, name: &str, payload: &str) -> Result<String, HarnessError> {
        let kind = self.entries.resolve(name)?;
        if !kind.writable() {
            return Err(SurfaceError::ReadOnly(name.to_string()).into());
        }
        let payload = Payload::parse(payload)?;
        let target = match kind {
            EntryKind::ResetLog => return Ok(format!("cleared {}\n", self.reset_log()?)),
            EntryKind::Fault(category) => ExecutionRequest::one(category),
            _ => ExecutionRequest::all(),
        };
        let mut request = target
            .access(payload.access)
            .repeat(payload.repeat.unwrap_or(self.config.repeat()));
        request.direction = payload.direction;
        let results = self.run_request(&request)?;
        Ok(control::render_results(&results))
    }

    /// Read the entry `name`.
    pub fn read_entry(&self, name: &str) -> Result<String, HarnessError> {
        let kind = self.entries.resolve(name)?;
        if !kind.readable() {
            return Err(SurfaceError::WriteOnly(name.to_string()).into());
        }
        match kind {
            EntryKind::List => Ok(control::render_list(&self.catalog)),
            EntryKind::Fault(category) => Ok(format!("{}\n", self.last_result(category)?)),
            EntryKind::RunAll | EntryKind::ResetLog => {
                Ok(control::render_results(&self.query(ResultFilter::All)))
            }
        }
    }

    // ── Introspection ───────────────────────────────────────────

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn catalog(&self) -> &FaultCatalog {
        &self.catalog
    }

    pub fn reporter(&self) -> &ResultReporter {
        &self.reporter
    }

    /// Blocks retained by leak faults.  Outstanding for the harness's life.
    pub fn ledger(&self) -> &LeakLedger {
        self.executor.ledger()
    }

    pub fn owner(&self) -> OwnerId {
        self.controller.owner()
    }

    pub fn sanitizer(&self) -> &Arc<dyn Sanitizer> {
        self.controller.sanitizer()
    }

    /// Snapshot of the instrumentation state this harness owns.
    pub fn instrumentation(&self) -> StateView {
        self.controller.view()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Restore the captured report mode, then remove every control entry.
    /// Idempotent.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.controller.restore();
        let removed = self.entries.remove_all();
        let (blocks, bytes) = self.ledger().outstanding();
        info!(
            "harness {} torn down: {removed} entries removed, {} results, {blocks} leaked blocks ({bytes} bytes) outstanding",
            self.owner(),
            self.reporter.len()
        );
    }

    fn spec(&self, category: FaultCategory) -> Result<&FaultSpec, HarnessError> {
        self.catalog
            .by_category(category)
            .ok_or_else(|| CatalogError::UnknownName(category.to_string()).into())
    }

    fn ensure_live(&self) -> Result<(), HarnessError> {
        if self.is_torn_down() {
            Err(HarnessError::TornDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("owner", &self.owner())
            .field("config", &self.config)
            .field("faults", &self.catalog.len())
            .field("results", &self.reporter.len())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AccessKind;
    use crate::config::MAX_REPEAT;
    use crate::heap::ExhaustedHeap;
    use crate::instrument::testing::FlagEverything;
    use crate::instrument::{Absent, ReportMode};
    use crate::report::Outcome;

    fn harness(sanitizer: Arc<dyn Sanitizer>, config: HarnessConfig) -> (Harness, Arc<InstrumentationState>) {
        let state = InstrumentationState::new();
        let h = Harness::builder()
            .config(config)
            .sanitizer(sanitizer)
            .state(Arc::clone(&state))
            .init()
            .unwrap();
        (h, state)
    }

    /// Runs the whole catalog without any out-of-bounds store.  The reads
    /// still violate, so callers are uninstrumented-only.
    #[cfg(not(feature = "asan"))]
    fn all_reads() -> ExecutionRequest {
        ExecutionRequest::all().direction(Direction::Read)
    }

    #[cfg(not(feature = "asan"))]
    #[test]
    fn static_right_read_is_detected_when_instrumented() {
        let (h, _) = harness(Arc::new(FlagEverything::default()), HarnessConfig::default());
        let result = h.run(FaultCategory::OobStaticRight, Some(Direction::Read)).unwrap();
        assert_eq!(result.category, FaultCategory::OobStaticRight);
        assert_eq!(result.outcome, Outcome::Detected);
        assert_eq!(result.raw_value.map(|v| v.len()), Some(4));
    }

    #[cfg(not(feature = "asan"))]
    #[test]
    fn leak_owned_stays_outstanding() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let result = h.run(FaultCategory::LeakOwned, None).unwrap();
        assert_eq!(result.outcome, Outcome::Leaked);
        assert_eq!(result.bytes, Some(1520));

        h.run(FaultCategory::UseAfterReturn, None).unwrap();
        h.reset_log().unwrap();
        let blocks = h.ledger().by_fault(result.fault_id);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].bytes, 1520);
    }

    #[cfg(not(feature = "asan"))]
    #[test]
    fn multi_shot_run_all_logs_seven_in_order_and_restores() {
        let sanitizer = Arc::new(FlagEverything::default());
        let config = HarnessConfig {
            multi_shot: true,
            ..Default::default()
        };
        let (h, state) = harness(sanitizer.clone(), config);
        let captured = state.view().captured_mode;
        assert_eq!(captured, Some(ReportMode::SingleShot));
        assert_eq!(state.view().current_mode, ReportMode::MultiShot);

        let results = h.run_request(&all_reads()).unwrap();
        assert_eq!(results.len(), 7);
        let order: Vec<_> = results.iter().map(|r| r.category).collect();
        assert_eq!(order, FaultCategory::ALL.to_vec());
        let seqs: Vec<_> = results.iter().map(|r| r.sequence).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(h.reporter().len(), 7);
        assert_eq!(state.view().current_mode, ReportMode::MultiShot);

        h.teardown();
        assert_eq!(Some(state.view().current_mode), captured);
        assert_eq!(sanitizer.report_mode(), ReportMode::SingleShot);
    }

    #[test]
    fn dynamic_right_control_is_undetected_with_raw_byte() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let request = ExecutionRequest::one(FaultCategory::OobDynamicRight)
            .direction(Direction::Read)
            .access(AccessKind::Control);
        let results = h.run_request(&request).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::Undetected);
        assert_eq!(results[0].raw_value.as_ref().map(Vec::len), Some(1));
    }

    #[cfg(not(feature = "asan"))]
    #[test]
    fn dynamic_right_violation_is_detected_when_instrumented() {
        let (h, _) = harness(Arc::new(FlagEverything::default()), HarnessConfig::default());
        let result = h
            .run(FaultCategory::OobDynamicRight, Some(Direction::Read))
            .unwrap();
        assert_eq!(result.outcome, Outcome::Detected);
    }

    #[cfg(not(feature = "asan"))]
    #[test]
    fn use_after_return_read_back_survives() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let result = h.run(FaultCategory::UseAfterReturn, None).unwrap();
        assert_eq!(result.raw_value.as_ref().map(Vec::len), Some(64));
        let here = 0u8;
        let here = &here as *const u8 as usize;
        let dangling = result.address.unwrap();
        assert!(!(dangling..dangling + 64).contains(&here));
    }

    #[cfg(not(feature = "asan"))]
    #[test]
    fn each_run_appends_exactly_one_matching_result() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        for spec in h.list_categories().unwrap().to_vec() {
            let before = h.reporter().len();
            let result = h.run(spec.category, Some(Direction::Read)).unwrap();
            assert_eq!(h.reporter().len(), before + 1);
            assert_eq!(result.fault_id, spec.id);
            assert_eq!(h.last_result(spec.category).unwrap(), result);
        }
    }

    #[cfg(not(feature = "asan"))]
    #[test]
    fn repeat_runs_each_fault_that_many_times() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let results = h.run_request(&all_reads().repeat(3)).unwrap();
        assert_eq!(results.len(), 21);
        for category in FaultCategory::ALL {
            let spec = h.catalog().by_category(category).unwrap();
            assert_eq!(h.query(ResultFilter::ById(spec.id)).count(), 3);
        }
        assert_eq!(h.ledger().outstanding().0, 6);
    }

    #[test]
    fn oversized_repeat_payload_is_rejected_before_anything_runs() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        assert!(matches!(
            h.write_entry("run-all", "read repeat=4294967295"),
            Err(HarnessError::Surface(SurfaceError::BadPayload(_)))
        ));
        assert!(h.reporter().is_empty());
        assert!(!h.is_torn_down());
        assert_eq!(h.read_entry("list").unwrap().lines().count(), 7);
    }

    #[test]
    fn oversized_repeat_request_is_capped() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let request = ExecutionRequest::one(FaultCategory::UninitializedRead).repeat(u32::MAX);
        let results = h.run_request(&request).unwrap();
        assert_eq!(results.len(), MAX_REPEAT as usize);
        assert_eq!(h.reporter().len(), MAX_REPEAT as usize);
    }

    #[cfg(feature = "asan")]
    #[test]
    fn instrumented_control_access_is_not_flagged() {
        use crate::instrument::AddressSanitizer;

        let (h, _) = harness(Arc::new(AddressSanitizer::new()), HarnessConfig::default());
        let request = ExecutionRequest::one(FaultCategory::OobDynamicRight)
            .direction(Direction::Read)
            .access(AccessKind::Control);
        let results = h.run_request(&request).unwrap();
        assert_eq!(results[0].outcome, Outcome::Undetected);
    }

    #[test]
    fn list_categories_is_idempotent() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let first = h.list_categories().unwrap().to_vec();
        h.run(FaultCategory::UninitializedRead, None).unwrap();
        assert_eq!(h.list_categories().unwrap(), first.as_slice());
    }

    #[test]
    fn last_result_before_any_run_is_not_found() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        assert_eq!(
            h.last_result(FaultCategory::UseAfterReturn).unwrap_err(),
            HarnessError::NoResult(FaultCategory::UseAfterReturn)
        );
    }

    #[test]
    fn register_after_init_is_catalog_frozen() {
        let (mut h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let err = h
            .register(FaultSpec::new(7, FaultCategory::UninitializedRead))
            .unwrap_err();
        assert_eq!(
            err,
            HarnessError::Catalog(CatalogError::CatalogFrozen(FaultCategory::UninitializedRead))
        );
        assert_eq!(h.list_categories().unwrap().len(), 7);
    }

    #[test]
    fn multi_shot_without_support_aborts_init_and_releases_state() {
        let state = InstrumentationState::new();
        let err = Harness::builder()
            .sanitizer(Arc::new(Absent))
            .state(Arc::clone(&state))
            .multi_shot(true)
            .init()
            .unwrap_err();
        assert_eq!(err, HarnessError::Mode(ModeError::ConfigurationError("none".into())));
        assert_eq!(state.view().owner, None);

        let h = Harness::builder()
            .sanitizer(Arc::new(Absent))
            .state(state)
            .init();
        assert!(h.is_ok());
    }

    #[cfg(not(feature = "asan"))]
    #[test]
    fn disabled_faults_stay_listed_but_never_run() {
        let config = HarnessConfig {
            disabled: vec![FaultCategory::OobStaticLeft],
            ..Default::default()
        };
        let (h, _) = harness(Arc::new(Absent), config);
        assert_eq!(h.list_categories().unwrap().len(), 7);
        assert_eq!(
            h.run(FaultCategory::OobStaticLeft, None).unwrap_err(),
            HarnessError::Disabled(FaultCategory::OobStaticLeft)
        );
        let results = h.run_request(&all_reads()).unwrap();
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.category != FaultCategory::OobStaticLeft));
    }

    #[test]
    fn exhausted_heap_skips_only_heap_faults() {
        let config = HarnessConfig {
            disabled: vec![FaultCategory::UseAfterReturn],
            ..Default::default()
        };
        let h = Harness::builder()
            .config(config)
            .sanitizer(Arc::new(Absent))
            .state(InstrumentationState::new())
            .heap(Arc::new(ExhaustedHeap))
            .init()
            .unwrap();
        let request = ExecutionRequest::all()
            .direction(Direction::Read)
            .access(AccessKind::Control);
        let results = h.run_request(&request).unwrap();
        assert_eq!(results.len(), 6);
        let skipped: Vec<_> = results
            .iter()
            .filter(|r| r.outcome == Outcome::SkippedResourceExhausted)
            .map(|r| r.category)
            .collect();
        assert_eq!(
            skipped,
            vec![
                FaultCategory::OobDynamicRight,
                FaultCategory::LeakOwned,
                FaultCategory::LeakCallerOwned
            ]
        );
        assert_eq!(h.ledger().outstanding(), (0, 0));
    }

    #[test]
    fn text_entries_round_trip() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let listing = h.read_entry("list").unwrap();
        assert_eq!(listing.lines().count(), 7);

        let out = h.write_entry("oob-dynamic-right", "read control repeat=2").unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("access=control"));

        let last = h.read_entry("out-of-bounds-dynamic-right").unwrap();
        assert!(last.starts_with("#2 out-of-bounds-dynamic-right"));

        assert_eq!(h.write_entry("reset-log", "").unwrap(), "cleared 2\n");
        assert!(h.read_entry("run-all").unwrap().is_empty());
    }

    #[test]
    fn text_entry_errors_are_values() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        assert!(matches!(
            h.write_entry("list", ""),
            Err(HarnessError::Surface(SurfaceError::ReadOnly(_)))
        ));
        assert!(matches!(
            h.read_entry("reset-log"),
            Err(HarnessError::Surface(SurfaceError::WriteOnly(_)))
        ));
        assert!(matches!(
            h.read_entry("use-after-free"),
            Err(HarnessError::Surface(SurfaceError::NotFound(_)))
        ));
        assert!(matches!(
            h.write_entry("umr", "sideways"),
            Err(HarnessError::Surface(SurfaceError::BadPayload(_)))
        ));
        assert!(matches!(
            h.read_entry("umr"),
            Err(HarnessError::NoResult(FaultCategory::UninitializedRead))
        ));
    }

    #[test]
    fn teardown_is_idempotent_and_removes_entries() {
        let sanitizer = Arc::new(FlagEverything::default());
        let config = HarnessConfig {
            multi_shot: true,
            ..Default::default()
        };
        let (h, state) = harness(sanitizer.clone(), config);
        assert_eq!(h.entries().len(), 10);

        h.teardown();
        h.teardown();
        assert!(h.entries().is_empty());
        assert_eq!(state.view().owner, None);
        assert_eq!(state.view().writes, 2);
        assert_eq!(h.run(FaultCategory::UninitializedRead, None).unwrap_err(), HarnessError::TornDown);
        assert!(matches!(
            h.read_entry("list"),
            Err(HarnessError::Surface(SurfaceError::TornDown))
        ));
    }

    #[test]
    fn drop_restores_mode() {
        let sanitizer = Arc::new(FlagEverything::default());
        let config = HarnessConfig {
            multi_shot: true,
            ..Default::default()
        };
        let (h, state) = harness(sanitizer.clone(), config);
        h.run(FaultCategory::UninitializedRead, None).unwrap();
        drop(h);
        assert_eq!(state.view().current_mode, ReportMode::SingleShot);
        assert_eq!(sanitizer.report_mode(), ReportMode::SingleShot);
    }

    #[test]
    fn concurrent_callers_share_one_log() {
        let (h, _) = harness(Arc::new(Absent), HarnessConfig::default());
        let h = Arc::new(h);
        let handles: Vec<_> = [
            FaultCategory::UninitializedRead,
            FaultCategory::OobDynamicRight,
            FaultCategory::OobStaticLeft,
            FaultCategory::UninitializedRead,
        ]
        .into_iter()
        .map(|category| {
            let h = Arc::clone(&h);
            let request = ExecutionRequest::one(category)
                .direction(Direction::Read)
                .access(AccessKind::Control);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    assert_eq!(h.run_request(&request).unwrap().len(), 1);
                }
            })
        })
        .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(h.reporter().len(), 40);
        let mut seqs: Vec<_> = h.query(ResultFilter::All).iter().map(|r| r.sequence).collect();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 40);
    }
}
