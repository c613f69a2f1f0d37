//! Control surface — named entries with short text request/response payloads.
//!
//! Entries are created at harness init and removed at teardown.  The
//! transport (CLI, RPC, files) is somebody else's problem; this module only
//! owns the names, what writing to and reading from each one means, and the
//! payload grammar.
//!
//! | Entry           | Write                              | Read                   |
//! |-----------------|------------------------------------|------------------------|
//! | `list`          | (read-only)                        | one line per fault     |
//! | `run-all`       | run every enabled fault            | the whole result log   |
//! | `reset-log`     | clear the result log               | (write-only)           |
//! | `<fault name>`  | run that fault                     | its latest result      |
//!
//! # Payload grammar
//!
//! Tokens separated by whitespace or commas, any order, all optional:
//!
//! ```text
//! read | write | r | w        direction
//! control | violation        access kind
//! repeat=N                   executions per fault (1 <= N <= 10000)
//! ```

use crate::catalog::{AccessKind, Direction, FaultCatalog, FaultCategory};
use crate::config::MAX_REPEAT;
use crate::report::ExecutionResult;
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Errors reported by the control surface.  Never fatal to the harness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("no entry named {0:?}")]
    NotFound(String),

    #[error("bad payload: {0}")]
    BadPayload(String),

    #[error("entry {0:?} is read-only")]
    ReadOnly(String),

    #[error("entry {0:?} is write-only")]
    WriteOnly(String),

    #[error("entry {0:?} already exists")]
    DuplicateEntry(String),

    #[error("control surface has been torn down")]
    TornDown,
}

/// What an entry does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    List,
    RunAll,
    ResetLog,
    Fault(FaultCategory),
}

impl EntryKind {
    pub fn readable(&self) -> bool {
        !matches!(self, EntryKind::ResetLog)
    }

    pub fn writable(&self) -> bool {
        !matches!(self, EntryKind::List)
    }
}

/// A named entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
}

/// The introspectable table of live entries.
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: RwLock<Option<Vec<Entry>>>,
}

impl EntryTable {
    /// An empty table, not yet created.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the aggregate entries plus one per catalog fault.
    pub fn create(&self, catalog: &FaultCatalog) -> Result<usize, SurfaceError> {
        let mut entries = vec![
            Entry {
                name: "list".into(),
                kind: EntryKind::List,
            },
            Entry {
                name: "run-all".into(),
                kind: EntryKind::RunAll,
            },
            Entry {
                name: "reset-log".into(),
                kind: EntryKind::ResetLog,
            },
        ];
        for spec in catalog.list() {
            let name = spec.category.as_str();
            if entries.iter().any(|e| e.name == name) {
                return Err(SurfaceError::DuplicateEntry(name.to_string()));
            }
            entries.push(Entry {
                name: name.to_string(),
                kind: EntryKind::Fault(spec.category),
            });
        }
        let count = entries.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Some(entries);
        Ok(count)
    }

    /// Find the entry called `name`.  Fault aliases (`umr`, `leak1`, ...)
    /// resolve to their fault's entry.
    pub fn resolve(&self, name: &str) -> Result<EntryKind, SurfaceError> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entries = guard.as_ref().ok_or(SurfaceError::TornDown)?;
        let name = name.trim();
        if let Some(entry) = entries.iter().find(|e| e.name == name) {
            return Ok(entry.kind);
        }
        name.parse::<FaultCategory>()
            .ok()
            .and_then(|category| {
                entries
                    .iter()
                    .find(|e| e.kind == EntryKind::Fault(category))
                    .map(|e| e.kind)
            })
            .ok_or_else(|| SurfaceError::NotFound(name.to_string()))
    }

    /// Names of the live entries, in creation order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|entries| entries.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove every entry.  Returns how many were removed; idempotent.
    pub fn remove_all(&self) -> usize {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map_or(0, |entries| entries.len())
    }

    pub fn is_live(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

// ── Payloads ────────────────────────────────────────────────────

/// A parsed write payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Payload {
    pub direction: Option<Direction>,
    pub access: AccessKind,
    pub repeat: Option<u32>,
}

impl Payload {
    pub fn parse(text: &str) -> Result<Self, SurfaceError> {
        let mut payload = Payload::default();
        for token in text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
        {
            match token.to_lowercase().as_str() {
                "control" => payload.access = AccessKind::Control,
                "violation" => payload.access = AccessKind::Violation,
                t => {
                    if let Some(n) = t.strip_prefix("repeat=") {
                        let n: u32 = n
                            .parse()
                            .map_err(|_| SurfaceError::BadPayload(format!("bad repeat count {n:?}")))?;
                        if !(1..=MAX_REPEAT).contains(&n) {
                            return Err(SurfaceError::BadPayload(format!(
                                "repeat must be in 1..={MAX_REPEAT}, got {n}"
                            )));
                        }
                        payload.repeat = Some(n);
                    } else {
                        let d = t
                            .parse::<Direction>()
                            .map_err(|_| SurfaceError::BadPayload(format!("unknown token {token:?}")))?;
                        payload.direction = Some(d);
                    }
                }
            }
        }
        Ok(payload)
    }
}

// ── Rendering ───────────────────────────────────────────────────

/// One line per catalog entry.
pub fn render_list(catalog: &FaultCatalog) -> String {
    let mut out = String::new();
    for spec in catalog.list() {
        let _ = writeln!(out, "{spec}");
    }
    out
}

/// One line per result.
pub fn render_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> String {
    let mut out = String::new();
    for result in results {
        let _ = writeln!(out, "{result}");
    }
    out
}
