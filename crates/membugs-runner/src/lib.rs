//! Disposable-worker runner for the membugs fault harness.
//!
//! A fault that a sanitizer catches usually ends the process that
//! triggered it.  The runner therefore executes every fault in a fresh child
//! process and turns whatever happens to that child into an
//! [`ExecutionResult`](membugs_fault::ExecutionResult):
//!
//! 1. **[`supervisor`]** — Spawns one `membugs worker` per execution, parses
//!    its JSON result, and classifies workers that die as `detected` or
//!    `crashed`
//! 2. **[`report`]** — Plain-text coverage summary of a result log
//!
//! # Architecture
//!
//! ```text
//! membugs run-all --isolate     membugs worker --fault X     Sanitizer
//! ─────────────────────────     ────────────────────────     ─────────
//! Supervisor::run_request() ──→ Harness::run_request()   ──→ violation
//!                           ←── JSON on stdout (if alive)
//! classify exit status      ←── signal / exit code / banner on stderr
//! reporter.append()
//! ```

pub mod report;
pub mod supervisor;

pub use report::format_report;
pub use supervisor::{Supervisor, SupervisorError, WorkerExit};
