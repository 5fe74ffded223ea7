// src/options.rs

//! Provisioning option validation.
//!
//! Options reach a provisioning run from two places: values persisted in
//! the provisioning configuration and per-invocation overrides. Both are
//! checked against the built-in options plus everything declared by the
//! discovered plugins. Overrides naming unknown options always fail;
//! persisted unknowns fail too unless cleanup is requested, in which
//! case they are dropped from the persisted set.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{Error, Result};
use crate::plugin::{PluginOption, PluginRegistry};

/// Built-in: drop persisted options no discovered plugin recognizes
pub const CLEANUP_UNKNOWN_OPTIONS: &str = "cleanup-unknown-options";
/// Built-in: aggregate declared system paths into the session
pub const EXPORT_SYSTEM_PATHS: &str = "export-system-paths";

/// Options understood without any plugin
pub fn builtin_options() -> Vec<PluginOption> {
    vec![
        PluginOption::new(CLEANUP_UNKNOWN_OPTIONS)
            .with_default("false")
            .with_values(["true", "false"]),
        PluginOption::new(EXPORT_SYSTEM_PATHS)
            .persistent()
            .with_default("false")
            .with_values(["true", "false"]),
    ]
}

/// The outcome of option validation for one build
#[derive(Debug, Clone, Default)]
pub struct ValidatedOptions {
    effective: BTreeMap<String, String>,
    persisted: BTreeMap<String, String>,
    dropped: Vec<String>,
}

impl ValidatedOptions {
    /// Every option with a value, defaults included
    pub fn effective(&self) -> &BTreeMap<String, String> {
        &self.effective
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.effective.get(name).map(String::as_str)
    }

    pub fn is_true(&self, name: &str) -> bool {
        self.get(name) == Some("true")
    }

    /// What the provisioning configuration should now persist
    pub fn persisted(&self) -> &BTreeMap<String, String> {
        &self.persisted
    }

    /// Persisted option names removed by cleanup
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }
}

/// Validate persisted options and overrides against the registry.
///
/// Returns the effective option values (defaults filled in) and the
/// persisted set to store back, with persistent overrides recorded and
/// cleaned-up unknowns removed.
pub fn validate_options(
    registry: &PluginRegistry,
    persisted: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Result<ValidatedOptions> {
    let mut known: BTreeMap<String, PluginOption> = BTreeMap::new();
    for option in builtin_options() {
        known.insert(option.name.clone(), option);
    }
    for option in registry.declared_options() {
        if let Some(existing) = known.get(&option.name) {
            if existing != option {
                warn!(name = %option.name, "conflicting redeclaration of option, keeping first");
            }
            continue;
        }
        known.insert(option.name.clone(), option.clone());
    }

    let unknown_overrides: Vec<String> = overrides
        .keys()
        .filter(|name| !known.contains_key(*name))
        .cloned()
        .collect();
    if !unknown_overrides.is_empty() {
        return Err(Error::UnknownOptions(unknown_overrides));
    }

    let cleanup = overrides
        .get(CLEANUP_UNKNOWN_OPTIONS)
        .or_else(|| persisted.get(CLEANUP_UNKNOWN_OPTIONS))
        .map(String::as_str)
        == Some("true");

    let mut dropped = Vec::new();
    let unknown_persisted: Vec<String> = persisted
        .keys()
        .filter(|name| !known.contains_key(*name))
        .cloned()
        .collect();
    if !unknown_persisted.is_empty() {
        if cleanup {
            for name in &unknown_persisted {
                warn!(option = %name, "dropping persisted option no plugin recognizes");
            }
            dropped = unknown_persisted;
        } else {
            return Err(Error::UnknownOptions(unknown_persisted));
        }
    }

    let mut effective = BTreeMap::new();
    for option in known.values() {
        if let Some(default) = &option.default {
            effective.insert(option.name.clone(), default.clone());
        }
    }
    for source in [persisted, overrides] {
        for (name, value) in source {
            let Some(option) = known.get(name) else {
                continue;
            };
            if !option.accepts(value) {
                return Err(Error::InvalidOptionValue {
                    name: name.clone(),
                    value: value.clone(),
                    allowed: option.values.clone(),
                });
            }
            effective.insert(name.clone(), value.clone());
        }
    }

    for option in known.values() {
        if option.required && !effective.contains_key(&option.name) {
            return Err(Error::MissingOption(option.name.clone()));
        }
    }

    let mut persisted_out: BTreeMap<String, String> = persisted
        .iter()
        .filter(|(name, _)| !dropped.contains(name))
        .map(|(n, v)| (n.clone(), v.clone()))
        .collect();
    for (name, value) in overrides {
        if known.get(name).is_some_and(|o| o.persistent) {
            persisted_out.insert(name.clone(), value.clone());
        }
    }

    Ok(ValidatedOptions {
        effective,
        persisted: persisted_out,
        dropped,
    })
}
