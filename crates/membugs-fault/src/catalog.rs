//! Fault catalog — the fixed set of memory bugs the harness can trigger.
//!
//! Each [`FaultSpec`] names one class of memory-safety violation along with
//! the memory it lives in and the default access direction.  The catalog is
//! populated once when the harness initialises and frozen immediately after;
//! any later [`FaultCatalog::register`] fails with
//! [`CatalogError::CatalogFrozen`].
//!
//! | Category                     | Memory   | Bad access                     |
//! |------------------------------|----------|--------------------------------|
//! | `uninitialized-read`         | stack    | read before any write          |
//! | `use-after-return`           | stack    | deref of a dead frame's buffer |
//! | `out-of-bounds-static-right` | static   | `[8 + 2]` global, `[20 + 5]` local |
//! | `out-of-bounds-static-left`  | static   | `[-2]` global, `[-5]` local    |
//! | `out-of-bounds-dynamic-right`| heap     | `[123]` of a 123-byte block    |
//! | `leak-owned`                 | heap     | 1520 bytes never released      |
//! | `leak-caller-owned`          | heap     | 8 bytes the caller never frees |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a catalog entry (its registration index).
pub type FaultId = u32;

/// Errors from catalog registration and lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog is frozen, cannot register {0}")]
    CatalogFrozen(FaultCategory),

    #[error("fault {0} is already registered")]
    DuplicateFault(FaultCategory),

    #[error("no fault with id {0}")]
    NotFound(FaultId),

    #[error("no fault named {0:?}")]
    UnknownName(String),
}

// ── Classification ──────────────────────────────────────────────

/// The class of memory-safety violation a fault reproduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FaultCategory {
    #[serde(rename = "uninitialized-read")]
    UninitializedRead,
    #[serde(rename = "use-after-return")]
    UseAfterReturn,
    #[serde(rename = "out-of-bounds-static-right")]
    OobStaticRight,
    #[serde(rename = "out-of-bounds-static-left")]
    OobStaticLeft,
    #[serde(rename = "out-of-bounds-dynamic-right")]
    OobDynamicRight,
    #[serde(rename = "leak-owned")]
    LeakOwned,
    #[serde(rename = "leak-caller-owned")]
    LeakCallerOwned,
}

impl FaultCategory {
    /// Every category, in catalog order.
    pub const ALL: [FaultCategory; 7] = [
        FaultCategory::UninitializedRead,
        FaultCategory::UseAfterReturn,
        FaultCategory::OobStaticRight,
        FaultCategory::OobStaticLeft,
        FaultCategory::OobDynamicRight,
        FaultCategory::LeakOwned,
        FaultCategory::LeakCallerOwned,
    ];

    /// Canonical kebab-case name, also used as the control entry name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultCategory::UninitializedRead => "uninitialized-read",
            FaultCategory::UseAfterReturn => "use-after-return",
            FaultCategory::OobStaticRight => "out-of-bounds-static-right",
            FaultCategory::OobStaticLeft => "out-of-bounds-static-left",
            FaultCategory::OobDynamicRight => "out-of-bounds-dynamic-right",
            FaultCategory::LeakOwned => "leak-owned",
            FaultCategory::LeakCallerOwned => "leak-caller-owned",
        }
    }

    /// Where the faulty object lives.
    pub fn memory_class(&self) -> MemoryClass {
        match self {
            FaultCategory::UninitializedRead | FaultCategory::UseAfterReturn => MemoryClass::Stack,
            FaultCategory::OobStaticRight | FaultCategory::OobStaticLeft => {
                MemoryClass::StaticGlobal
            }
            FaultCategory::OobDynamicRight
            | FaultCategory::LeakOwned
            | FaultCategory::LeakCallerOwned => MemoryClass::Heap,
        }
    }

    /// Direction used when a request does not name one.
    pub fn default_direction(&self) -> Direction {
        match self {
            FaultCategory::UninitializedRead
            | FaultCategory::UseAfterReturn
            | FaultCategory::OobStaticLeft
            | FaultCategory::OobDynamicRight => Direction::Read,
            FaultCategory::OobStaticRight
            | FaultCategory::LeakOwned
            | FaultCategory::LeakCallerOwned => Direction::Write,
        }
    }

    /// Whether both read and write variants exist for this category.
    pub fn is_bidirectional(&self) -> bool {
        matches!(
            self,
            FaultCategory::OobStaticRight
                | FaultCategory::OobStaticLeft
                | FaultCategory::OobDynamicRight
        )
    }

    /// Whether the category has an in-bounds sanity-control access.
    pub fn has_control(&self) -> bool {
        self.is_bidirectional()
    }

    pub fn is_leak(&self) -> bool {
        matches!(self, FaultCategory::LeakOwned | FaultCategory::LeakCallerOwned)
    }

    /// Resolve a requested direction against what the category supports.
    ///
    /// Single-direction categories always run in their default direction.
    pub fn resolve_direction(&self, requested: Option<Direction>) -> Direction {
        match requested {
            Some(d) if self.is_bidirectional() => d,
            _ => self.default_direction(),
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultCategory {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uninitialized-read" | "umr" => Ok(FaultCategory::UninitializedRead),
            "use-after-return" | "uar" => Ok(FaultCategory::UseAfterReturn),
            "out-of-bounds-static-right" | "oob-static-right" => Ok(FaultCategory::OobStaticRight),
            "out-of-bounds-static-left" | "oob-static-left" => Ok(FaultCategory::OobStaticLeft),
            "out-of-bounds-dynamic-right" | "oob-dynamic-right" => {
                Ok(FaultCategory::OobDynamicRight)
            }
            "leak-owned" | "leak1" => Ok(FaultCategory::LeakOwned),
            "leak-caller-owned" | "leak2" => Ok(FaultCategory::LeakCallerOwned),
            other => Err(CatalogError::UnknownName(other.to_string())),
        }
    }
}

/// Broad class of memory a fault targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryClass {
    Stack,
    Heap,
    StaticGlobal,
}

impl fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryClass::Stack => write!(f, "stack"),
            MemoryClass::Heap => write!(f, "heap"),
            MemoryClass::StaticGlobal => write!(f, "static-global"),
        }
    }
}

/// Whether the faulty access loads or stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read" | "r" => Ok(Direction::Read),
            "write" | "w" => Ok(Direction::Write),
            other => Err(format!("unknown direction {other:?}")),
        }
    }
}

/// Which access of a primitive to perform.
///
/// `Violation` performs the in-bounds control access followed by the
/// out-of-bounds one.  `Control` performs only the in-bounds access and is
/// expected to go unflagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessKind {
    #[default]
    Violation,
    Control,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Violation => write!(f, "violation"),
            AccessKind::Control => write!(f, "control"),
        }
    }
}

// ── Catalog ─────────────────────────────────────────────────────

/// An immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSpec {
    pub id: FaultId,
    /// Name of the primitive routine.
    pub name: String,
    pub category: FaultCategory,
    pub memory_class: MemoryClass,
    /// Default direction of the faulty access.
    pub direction: Direction,
    pub enabled: bool,
}

impl FaultSpec {
    /// Build the entry for `category` with its standard metadata.
    pub fn new(id: FaultId, category: FaultCategory) -> Self {
        let name = match category {
            FaultCategory::UninitializedRead => "umr",
            FaultCategory::UseAfterReturn => "uar",
            FaultCategory::OobStaticRight => "static_mem_oob_right",
            FaultCategory::OobStaticLeft => "static_mem_oob_left",
            FaultCategory::OobDynamicRight => "dynamic_mem_oob_right",
            FaultCategory::LeakOwned => "leak_simple1",
            FaultCategory::LeakCallerOwned => "leak_simple2",
        };
        Self {
            id,
            name: name.to_string(),
            category,
            memory_class: category.memory_class(),
            direction: category.default_direction(),
            enabled: true,
        }
    }

    /// Mark the entry disabled; it stays listed but never runs.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Display for FaultSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} memory={} direction={} {}",
            self.id,
            self.category,
            self.memory_class,
            self.direction,
            if self.enabled { "enabled" } else { "disabled" }
        )
    }
}

/// Ordered registry of fault entries.
///
/// Registration order is listing order.  Once [`freeze`](Self::freeze) has
/// been called the catalog never changes again.
#[derive(Debug, Clone, Default)]
pub struct FaultCatalog {
    specs: Vec<FaultSpec>,
    frozen: bool,
}

impl FaultCatalog {
    /// Create an empty, unfrozen catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard seven-entry catalog and freeze it.
    ///
    /// `is_enabled` decides the `enabled` flag of each entry.
    pub fn standard(is_enabled: impl Fn(FaultCategory) -> bool) -> Self {
        let specs = FaultCategory::ALL
            .into_iter()
            .enumerate()
            .map(|(id, category)| {
                let spec = FaultSpec::new(id as FaultId, category);
                if is_enabled(category) {
                    spec
                } else {
                    spec.disabled()
                }
            })
            .collect();
        Self { specs, frozen: true }
    }

    /// Add an entry.  Fails once the catalog is frozen.
    pub fn register(&mut self, spec: FaultSpec) -> Result<FaultId, CatalogError> {
        if self.frozen {
            return Err(CatalogError::CatalogFrozen(spec.category));
        }
        if self.specs.iter().any(|s| s.category == spec.category || s.id == spec.id) {
            return Err(CatalogError::DuplicateFault(spec.category));
        }
        let id = spec.id;
        self.specs.push(spec);
        Ok(id)
    }

    /// Freeze the catalog.  Idempotent.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn lookup(&self, id: FaultId) -> Result<&FaultSpec, CatalogError> {
        self.specs
            .iter()
            .find(|s| s.id == id)
            .ok_or(CatalogError::NotFound(id))
    }

    pub fn by_category(&self, category: FaultCategory) -> Option<&FaultSpec> {
        self.specs.iter().find(|s| s.category == category)
    }

    /// Look up by category name or alias.
    pub fn by_name(&self, name: &str) -> Result<&FaultSpec, CatalogError> {
        let category: FaultCategory = name.parse()?;
        self.by_category(category)
            .ok_or_else(|| CatalogError::UnknownName(name.to_string()))
    }

    /// All entries in registration order.
    pub fn list(&self) -> &[FaultSpec] {
        &self.specs
    }

    /// Enabled entries in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &FaultSpec> {
        self.specs.iter().filter(|s| s.enabled)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
