//! Harness configuration.
//!
//! Settings come from [`HarnessConfig::default`], then the environment
//! ([`HarnessConfig::from_env`]), then whatever the caller overrides (the
//! CLI flags).
//!
//! | Variable             | Meaning                                      |
//! |----------------------|----------------------------------------------|
//! | `MEMBUGS_MULTI_SHOT` | `1`/`true`/`yes`/`on` requests multi-shot    |
//! | `MEMBUGS_REPEAT`     | executions per fault per request (1..=10000) |
//! | `MEMBUGS_DISABLE`    | comma-separated fault names to disable       |

use crate::catalog::FaultCategory;
use log::warn;
use serde::{Deserialize, Serialize};

pub const ENV_MULTI_SHOT: &str = "MEMBUGS_MULTI_SHOT";
pub const ENV_REPEAT: &str = "MEMBUGS_REPEAT";
pub const ENV_DISABLE: &str = "MEMBUGS_DISABLE";

/// Upper bound on executions per fault per request.
pub const MAX_REPEAT: u32 = 10_000;

/// Startup parameters of a harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Switch the sanitizer to multi-shot reporting for the harness's life.
    pub multi_shot: bool,
    /// Executions per fault per request.
    pub repeat: u32,
    /// Faults that stay listed but never run.
    pub disabled: Vec<FaultCategory>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            multi_shot: false,
            repeat: 1,
            disabled: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by the `MEMBUGS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup(ENV_MULTI_SHOT) {
            match parse_bool(&val) {
                Some(b) => config.multi_shot = b,
                None => warn!("ignoring {ENV_MULTI_SHOT}={val:?}: not a boolean"),
            }
        }

        if let Some(val) = lookup(ENV_REPEAT) {
            match val.trim().parse::<u32>() {
                Ok(n) if (1..=MAX_REPEAT).contains(&n) => config.repeat = n,
                _ => warn!("ignoring {ENV_REPEAT}={val:?}: need an integer in 1..={MAX_REPEAT}"),
            }
        }

        if let Some(val) = lookup(ENV_DISABLE) {
            config.disabled = parse_categories(&val);
        }

        config
    }

    /// Whether `category` may run.
    pub fn is_enabled(&self, category: FaultCategory) -> bool {
        !self.disabled.contains(&category)
    }

    /// Repeat count, clamped to `1..=MAX_REPEAT`.
    pub fn repeat(&self) -> u32 {
        self.repeat.clamp(1, MAX_REPEAT)
    }
}

/// Parse a comma-separated list of fault names, skipping unknown ones.
pub fn parse_categories(list: &str) -> Vec<FaultCategory> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<FaultCategory>() {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("ignoring fault name in disable list: {e}");
                None
            }
        })
        .collect()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = HarnessConfig::default();
        assert!(!config.multi_shot);
        assert_eq!(config.repeat(), 1);
        assert!(FaultCategory::ALL.iter().all(|&c| config.is_enabled(c)));
    }

    #[test]
    fn reads_environment() {
        let config = HarnessConfig::from_lookup(lookup(&[
            (ENV_MULTI_SHOT, "yes"),
            (ENV_REPEAT, "3"),
            (ENV_DISABLE, "oob-static-left, leak-owned"),
        ]));
        assert!(config.multi_shot);
        assert_eq!(config.repeat, 3);
        assert!(!config.is_enabled(FaultCategory::OobStaticLeft));
        assert!(!config.is_enabled(FaultCategory::LeakOwned));
        assert!(config.is_enabled(FaultCategory::UseAfterReturn));
    }

    #[test]
    fn bad_values_are_ignored() {
        let config = HarnessConfig::from_lookup(lookup(&[
            (ENV_MULTI_SHOT, "maybe"),
            (ENV_REPEAT, "0"),
            (ENV_DISABLE, "use-after-free,umr"),
        ]));
        assert!(!config.multi_shot);
        assert_eq!(config.repeat, 1);
        assert_eq!(config.disabled, vec![FaultCategory::UninitializedRead]);
    }

    #[test]
    fn repeat_is_clamped() {
        let config = HarnessConfig {
            repeat: 0,
            ..Default::default()
        };
        assert_eq!(config.repeat(), 1);
        let config = HarnessConfig {
            repeat: u32::MAX,
            ..Default::default()
        };
        assert_eq!(config.repeat(), MAX_REPEAT);
    }

    #[test]
    fn oversized_repeat_from_environment_is_ignored() {
        let config = HarnessConfig::from_lookup(lookup(&[(ENV_REPEAT, "4294967295")]));
        assert_eq!(config.repeat, 1);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: HarnessConfig =
            serde_json::from_str(r#"{"disabled":["out-of-bounds-static-right"]}"#).unwrap();
        assert_eq!(config.repeat, 1);
        assert!(!config.is_enabled(FaultCategory::OobStaticRight));
    }
}
