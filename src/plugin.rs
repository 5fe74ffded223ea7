// src/plugin.rs

//! Provisioning plugin manifests and the session plugin registry.
//!
//! Feature-packs ship plugins as subtrees that the layout engine copies
//! into the session's aggregated `plugins/` directory. Each plugin
//! carries a `plugin.toml` manifest naming it, its capability, and the
//! provisioning options it understands. [`PluginRegistry::discover`]
//! walks the aggregate after a build and collects the manifests; option
//! validation runs against the registry plus the built-in options.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::spec::parse_toml;

pub const PLUGIN_MANIFEST: &str = "plugin.toml";

fn default_capability() -> String {
    "install".to_string()
}

/// A provisioning option declared by a plugin (or built in)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOption {
    pub name: String,
    /// Must be given a value when no default exists
    #[serde(default)]
    pub required: bool,
    /// Recorded in the provisioning configuration once set
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Accepted values, empty for unconstrained
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl PluginOption {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            persistent: false,
            default: None,
            values: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `value` is acceptable under the declared value set
    pub fn accepts(&self, value: &str) -> bool {
        self.values.is_empty() || self.values.iter().any(|v| v == value)
    }
}

/// Parsed `plugin.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default = "default_capability")]
    pub capability: String,
    #[serde(default, rename = "option")]
    pub options: Vec<PluginOption>,
}

/// Plugins discovered in a session's aggregated plugins directory
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginManifest>,
}

impl PluginRegistry {
    /// A registry with no plugins, used before the first build
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scan `dir` for plugin manifests.
    ///
    /// Manifests live at the top of the aggregate or one directory deep,
    /// matching how packs lay out their plugin subtrees. Duplicate plugin
    /// names keep the first manifest found.
    pub fn discover(dir: &Path) -> Result<Self> {
        let mut plugins: Vec<PluginManifest> = Vec::new();
        if !dir.is_dir() {
            return Ok(Self { plugins });
        }
        let mut seen = BTreeSet::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry =
                entry.map_err(|e| Error::Catalog(format!("plugin scan failed: {}", e)))?;
            if !entry.file_type().is_file() || entry.file_name() != PLUGIN_MANIFEST {
                continue;
            }
            let manifest: PluginManifest = parse_toml(entry.path())?;
            if !seen.insert(manifest.name.clone()) {
                warn!(
                    name = %manifest.name,
                    path = %entry.path().display(),
                    "ignoring duplicate plugin manifest"
                );
                continue;
            }
            debug!(name = %manifest.name, capability = %manifest.capability, "discovered plugin");
            plugins.push(manifest);
        }
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { plugins })
    }

    pub fn plugins(&self) -> &[PluginManifest] {
        &self.plugins
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins providing the given capability
    pub fn with_capability<'a>(
        &'a self,
        capability: &'a str,
    ) -> impl Iterator<Item = &'a PluginManifest> + 'a {
        self.plugins
            .iter()
            .filter(move |p| p.capability == capability)
    }

    /// Every option declared by any discovered plugin
    pub fn declared_options(&self) -> impl Iterator<Item = &PluginOption> {
        self.plugins.iter().flat_map(|p| p.options.iter())
    }
}
