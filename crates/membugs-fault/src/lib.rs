//! Deliberate memory-safety violations for measuring sanitizer coverage.
//!
//! This crate reproduces a fixed set of known memory bugs on demand so that
//! an external instrumentation layer (AddressSanitizer, MemorySanitizer,
//! LeakSanitizer, ...) has something real to catch.  It detects nothing by
//! itself: it only triggers the bug and records what the sanitizer reported.
//!
//! The crate provides these components:
//!
//! 1. **[`catalog`]** — The frozen registry of fault primitives
//! 2. **[`primitives`]** — The faulty routines themselves, built on the
//!    [`raw`] memory view
//! 3. **[`executor`]** — Runs one primitive under a per-fault lock and
//!    classifies the outcome from the sanitizer's report counter
//! 4. **[`instrument`]** — Sanitizer backends and the multi-shot mode
//!    controller
//! 5. **[`report`]** — Append-only result log
//! 6. **[`control`]** — Named text entries for list / run / read-back
//! 7. **[`harness`]** — Init and teardown tying everything together
//!
//! # Architecture
//!
//! ```text
//! Caller                  Harness                 Sanitizer
//! ──────                  ───────                 ─────────
//! write_entry("umr") ──→ executor.execute()  ──→ reports() before
//!                         primitives::run()   ──→ (violation happens)
//!                                             ──→ reports() after
//!                         reporter.append()
//! read_entry("umr")  ──→ reporter.last()
//! ```
//!
//! # Instrumented builds
//!
//! The `asan` feature links the AddressSanitizer backend and needs
//! `RUSTFLAGS=-Zsanitizer=address` on a nightly toolchain.  Multi-shot
//! reporting additionally needs a recoverable build
//! (`-Zsanitizer-recover=address`) run with `ASAN_OPTIONS=halt_on_error=0`.
//! Only the option can be checked at runtime: a non-recoverable build that
//! sets it still claims multi-shot support and aborts on the first report.

pub mod catalog;
pub mod config;
pub mod control;
pub mod executor;
pub mod harness;
pub mod heap;
pub mod instrument;
pub mod leak;
pub mod primitives;
pub mod raw;
pub mod report;

pub use catalog::{AccessKind, Direction, FaultCatalog, FaultCategory, FaultId, FaultSpec, MemoryClass};
pub use config::HarnessConfig;
pub use executor::{ExecutionRequest, FaultExecutor, Target};
pub use harness::{Harness, HarnessBuilder, HarnessError};
pub use instrument::{InstrumentationState, ModeController, ReportMode, Sanitizer};
pub use report::{ExecutionResult, Outcome, ResultFilter, ResultReporter};
