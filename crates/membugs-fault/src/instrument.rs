//! Sanitizer backends and the multi-shot mode controller.
//!
//! The sanitizer is a black box behind the [`Sanitizer`] trait.  The
//! harness asks it two things: how many violation reports it has produced so
//! far, and whether it keeps reporting after the first one (multi-shot) or
//! goes quiet (single-shot).
//!
//! [`InstrumentationState`] records the report mode observed when a harness
//! starts, the current mode, and which harness owns the state.  It is an
//! explicit object injected into the harness rather than a hidden global;
//! [`InstrumentationState::process`] hands out the one instance that stands
//! for the real process.
//!
//! [`ModeController`] is the only writer.  It captures the mode on attach,
//! switches to multi-shot at most once, and restores exactly the captured
//! mode on teardown, however the mode changed in between.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use thiserror::Error;

/// Errors from the mode controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeError {
    #[error("multi-shot reporting requested but {0} does not support it")]
    ConfigurationError(String),

    #[error("instrumentation state already owned by harness {0}")]
    AlreadyOwned(OwnerId),

    #[error("harness {0} does not own the instrumentation state")]
    NotOwner(OwnerId),

    #[error("multi-shot reporting already enabled")]
    AlreadyEnabled,
}

/// Identity of the harness instance holding the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether the sanitizer keeps reporting after the first violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMode {
    #[default]
    SingleShot,
    MultiShot,
}

impl fmt::Display for ReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportMode::SingleShot => write!(f, "single-shot"),
            ReportMode::MultiShot => write!(f, "multi-shot"),
        }
    }
}

// ── Sanitizer backends ──────────────────────────────────────────

/// An external memory-safety instrumentation layer.
pub trait Sanitizer: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Whether any instrumentation is active in this process.
    fn is_present(&self) -> bool;

    /// Whether the backend can be switched to multi-shot reporting.
    fn supports_multi_shot(&self) -> bool;

    fn report_mode(&self) -> ReportMode;

    /// Switch reporting mode.  Backends that cannot honour the request
    /// leave the mode unchanged.
    fn set_report_mode(&self, mode: ReportMode);

    /// Violation reports produced so far.  Monotonic.
    fn reports(&self) -> u64;
}

/// No instrumentation: nothing is ever reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct Absent;

impl Sanitizer for Absent {
    fn name(&self) -> &str {
        "none"
    }

    fn is_present(&self) -> bool {
        false
    }

    fn supports_multi_shot(&self) -> bool {
        false
    }

    fn report_mode(&self) -> ReportMode {
        ReportMode::SingleShot
    }

    fn set_report_mode(&self, _mode: ReportMode) {}

    fn reports(&self) -> u64 {
        0
    }
}

#[cfg(feature = "asan")]
pub use asan::AddressSanitizer;

#[cfg(feature = "asan")]
mod asan {
    //! AddressSanitizer backend.
    //!
    //! Hooks the runtime's error-report callback and counts reports.  In
    //! single-shot mode only the first report is counted, which is what a
    //! sanitizer that silences itself after one error looks like from
    //! outside.  Multi-shot needs the runtime to keep running after an
    //! error: a build with `-Zsanitizer-recover=address` run with
    //! `ASAN_OPTIONS=halt_on_error=0`.  Only the option is visible here.

    use super::{halt_on_error_disabled, ReportMode, Sanitizer};
    use std::ffi::c_char;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Once;

    extern "C" {
        fn __asan_set_error_report_callback(callback: Option<unsafe extern "C" fn(*const c_char)>);
    }

    static REPORTS: AtomicU64 = AtomicU64::new(0);
    static MULTI_SHOT: AtomicBool = AtomicBool::new(false);
    static HOOK: Once = Once::new();

    unsafe extern "C" fn on_report(_report: *const c_char) {
        if MULTI_SHOT.load(Ordering::SeqCst) || REPORTS.load(Ordering::SeqCst) == 0 {
            REPORTS.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// The AddressSanitizer runtime linked into this process.
    #[derive(Debug)]
    pub struct AddressSanitizer {
        recoverable: bool,
    }

    impl AddressSanitizer {
        pub fn new() -> Self {
            HOOK.call_once(|| {
                // SAFETY: the callback only touches atomics.
                unsafe { __asan_set_error_report_callback(Some(on_report)) };
            });
            let recoverable = std::env::var("ASAN_OPTIONS")
                .map(|opts| halt_on_error_disabled(&opts))
                .unwrap_or(false);
            Self { recoverable }
        }
    }

    impl Default for AddressSanitizer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Sanitizer for AddressSanitizer {
        fn name(&self) -> &str {
            "asan"
        }

        fn is_present(&self) -> bool {
            true
        }

        fn supports_multi_shot(&self) -> bool {
            self.recoverable
        }

        fn report_mode(&self) -> ReportMode {
            if MULTI_SHOT.load(Ordering::SeqCst) {
                ReportMode::MultiShot
            } else {
                ReportMode::SingleShot
            }
        }

        fn set_report_mode(&self, mode: ReportMode) {
            if mode == ReportMode::MultiShot && !self.recoverable {
                return;
            }
            MULTI_SHOT.store(mode == ReportMode::MultiShot, Ordering::SeqCst);
        }

        fn reports(&self) -> u64 {
            REPORTS.load(Ordering::SeqCst)
        }
    }
}

/// Whether an `ASAN_OPTIONS` string turns `halt_on_error` off.  Options
/// may be separated by `:`, `,` or whitespace; the last setting wins.
#[cfg_attr(not(feature = "asan"), allow(dead_code))]
fn halt_on_error_disabled(options: &str) -> bool {
    options
        .split(|c: char| c == ':' || c == ',' || c.is_whitespace())
        .filter_map(|opt| opt.strip_prefix("halt_on_error="))
        .last()
        .is_some_and(|value| matches!(value, "0" | "false" | "no"))
}

/// The backend compiled into this binary.
pub fn detect() -> Arc<dyn Sanitizer> {
    #[cfg(feature = "asan")]
    let sanitizer: Arc<dyn Sanitizer> = Arc::new(AddressSanitizer::new());
    #[cfg(not(feature = "asan"))]
    let sanitizer: Arc<dyn Sanitizer> = Arc::new(Absent);
    debug!(
        "sanitizer backend: {} (multi-shot {})",
        sanitizer.name(),
        if sanitizer.supports_multi_shot() { "supported" } else { "unsupported" }
    );
    sanitizer
}

// ── Instrumentation state ───────────────────────────────────────

/// Point-in-time copy of [`InstrumentationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateView {
    /// Mode observed when the current or last owner attached.
    pub captured_mode: Option<ReportMode>,
    pub current_mode: ReportMode,
    pub owner: Option<OwnerId>,
    /// Mode writes performed by the current or last owner.
    pub writes: u32,
}

#[derive(Debug, Default)]
struct StateInner {
    captured_mode: Option<ReportMode>,
    current_mode: ReportMode,
    owner: Option<OwnerId>,
    writes: u32,
}

/// Process-scoped record of the sanitizer's report mode.
#[derive(Debug, Default)]
pub struct InstrumentationState {
    inner: Mutex<StateInner>,
}

impl InstrumentationState {
    /// A fresh, unowned state.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The state standing for this process.
    pub fn process() -> Arc<Self> {
        static PROCESS: OnceLock<Arc<InstrumentationState>> = OnceLock::new();
        Arc::clone(PROCESS.get_or_init(InstrumentationState::new))
    }

    pub fn view(&self) -> StateView {
        let inner = self.lock();
        StateView {
            captured_mode: inner.captured_mode,
            current_mode: inner.current_mode,
            owner: inner.owner,
            writes: inner.writes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Mode controller ─────────────────────────────────────────────

/// Exclusive writer of an [`InstrumentationState`].
///
/// # Example
///
/// ```
/// use membugs_fault::instrument::{Absent, InstrumentationState, ModeController, OwnerId, ReportMode};
/// use std::sync::Arc;
///
/// let state = InstrumentationState::new();
/// let controller = ModeController::attach(Arc::new(Absent), Arc::clone(&state), OwnerId(1)).unwrap();
///
/// // No instrumentation present: multi-shot is a configuration error.
/// assert!(controller.enable_multi_shot().is_err());
///
/// controller.restore();
/// assert_eq!(state.view().current_mode, ReportMode::SingleShot);
/// assert_eq!(state.view().owner, None);
/// ```
pub struct ModeController {
    sanitizer: Arc<dyn Sanitizer>,
    state: Arc<InstrumentationState>,
    owner: OwnerId,
    enabled: AtomicBool,
    restored: AtomicBool,
}

impl ModeController {
    /// Claim `state` for `owner` and capture the sanitizer's current mode.
    pub fn attach(
        sanitizer: Arc<dyn Sanitizer>,
        state: Arc<InstrumentationState>,
        owner: OwnerId,
    ) -> Result<Self, ModeError> {
        {
            let mut inner = state.lock();
            if let Some(current) = inner.owner {
                return Err(ModeError::AlreadyOwned(current));
            }
            let mode = sanitizer.report_mode();
            inner.captured_mode = Some(mode);
            inner.current_mode = mode;
            inner.owner = Some(owner);
            inner.writes = 0;
            debug!("harness {owner} captured {} mode {mode}", sanitizer.name());
        }
        Ok(Self {
            sanitizer,
            state,
            owner,
            enabled: AtomicBool::new(false),
            restored: AtomicBool::new(false),
        })
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn sanitizer(&self) -> &Arc<dyn Sanitizer> {
        &self.sanitizer
    }

    /// Snapshot of the controlled state.
    pub fn view(&self) -> StateView {
        self.state.view()
    }

    /// Switch to multi-shot reporting.  Returns the mode it replaced.
    pub fn enable_multi_shot(&self) -> Result<ReportMode, ModeError> {
        if !self.sanitizer.is_present() || !self.sanitizer.supports_multi_shot() {
            return Err(ModeError::ConfigurationError(self.sanitizer.name().to_string()));
        }
        let mut inner = self.state.lock();
        if inner.owner != Some(self.owner) {
            return Err(ModeError::NotOwner(self.owner));
        }
        if self.enabled.swap(true, Ordering::SeqCst) {
            return Err(ModeError::AlreadyEnabled);
        }
        let previous = inner.current_mode;
        self.sanitizer.set_report_mode(ReportMode::MultiShot);
        inner.current_mode = self.sanitizer.report_mode();
        inner.writes += 1;
        info!("{} reporting: {previous} -> {}", self.sanitizer.name(), inner.current_mode);
        Ok(previous)
    }

    /// Put back the captured mode and release ownership.  Idempotent.
    pub fn restore(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.state.lock();
        if inner.owner != Some(self.owner) {
            warn!("harness {} restoring state it does not own", self.owner);
            return;
        }
        if let Some(captured) = inner.captured_mode {
            if self.sanitizer.report_mode() != captured {
                self.sanitizer.set_report_mode(captured);
                inner.writes += 1;
            }
            inner.current_mode = captured;
            debug!("harness {} restored {} mode {captured}", self.owner, self.sanitizer.name());
        }
        inner.owner = None;
    }
}

impl Drop for ModeController {
    fn drop(&mut self) {
        self.restore();
    }
}

impl fmt::Debug for ModeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeController")
            .field("sanitizer", &self.sanitizer.name())
            .field("owner", &self.owner)
            .field("enabled", &self.enabled.load(Ordering::SeqCst))
            .field("restored", &self.restored.load(Ordering::SeqCst))
            .finish()
    }
}
