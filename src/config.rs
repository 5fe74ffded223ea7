// src/config.rs

//! Provisioning configuration model.
//!
//! A [`ProvisioningConfig`] is the aggregate root the layout engine
//! resolves: ordered direct dependency edges, transitive dependency edges,
//! and named option values. Configurations are immutable values; every
//! mutation goes through [`ProvisioningConfigBuilder`], seeded from the
//! previous instance, so a half-edited configuration is never observable.
//!
//! Configurations round-trip through TOML:
//!
//! ```toml
//! [[feature-pack]]
//! location = "wildfly@maven:stable#27.0.1"
//! patches = ["wildfly-fix@maven#27.0.2"]
//!
//! [[transitive]]
//! location = "core@maven#5.0.0"
//!
//! [options]
//! "docs.skip" = "true"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::family::FamilyConstraint;
use crate::location::{ConfigId, PackId, PackLocation, Producer};

/// Package include/exclude patterns on a dependency edge.
///
/// Patterns are glob-matched against package names; a pattern that is not
/// valid glob syntax falls back to literal comparison. Includes are checked
/// before excludes, and a name matching neither keeps its default state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackageFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl PackageFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a package named `name` is selected, given whether the pack
    /// ships it as a default package.
    pub fn selects(&self, name: &str, default_on: bool) -> bool {
        if Self::matches(&self.include, name) {
            return true;
        }
        if Self::matches(&self.exclude, name) {
            return false;
        }
        default_on
    }

    fn matches(patterns: &[String], name: &str) -> bool {
        patterns.iter().any(|p| {
            glob::Pattern::new(p)
                .map(|pattern| pattern.matches(name))
                .unwrap_or_else(|_| p == name)
        })
    }
}

/// Config include/exclude customizations on a dependency edge
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<ConfigId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ConfigId>,
}

impl ConfigFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn selects(&self, id: &ConfigId, default_on: bool) -> bool {
        if self.include.contains(id) {
            return true;
        }
        if self.exclude.contains(id) {
            return false;
        }
        default_on
    }
}

/// A dependency edge: the target feature-pack plus customizations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackConfig {
    pub location: PackLocation,
    /// Whether this edge is a transitive pin rather than a direct
    /// dependency. Kept in sync with the list the edge sits in.
    #[serde(default, skip_serializing_if = "is_false")]
    pub transitive: bool,
    #[serde(default, skip_serializing_if = "PackageFilter::is_empty")]
    pub packages: PackageFilter,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PackId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<FamilyConstraint>,
    #[serde(default, skip_serializing_if = "ConfigFilter::is_empty")]
    pub configs: ConfigFilter,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl PackConfig {
    /// A direct dependency on the given location
    pub fn new(location: PackLocation) -> Self {
        Self {
            location,
            transitive: false,
            packages: PackageFilter::default(),
            patches: Vec::new(),
            family: None,
            configs: ConfigFilter::default(),
        }
    }

    /// A transitive dependency pin on the given location
    pub fn new_transitive(location: PackLocation) -> Self {
        let mut config = Self::new(location);
        config.transitive = true;
        config
    }

    pub fn with_patch(mut self, patch: PackId) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn with_family(mut self, constraint: FamilyConstraint) -> Self {
        self.family = Some(constraint);
        self
    }

    pub fn with_included_package(mut self, pattern: impl Into<String>) -> Self {
        self.packages.include.push(pattern.into());
        self
    }

    pub fn with_excluded_package(mut self, pattern: impl Into<String>) -> Self {
        self.packages.exclude.push(pattern.into());
        self
    }

    pub fn producer(&self) -> &Producer {
        &self.location.producer
    }
}

/// Conventional file name for a persisted provisioning configuration
pub const CONFIG_FILE: &str = "provisioning.toml";

/// The immutable aggregate root the layout engine resolves
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default, rename = "feature-pack", skip_serializing_if = "Vec::is_empty")]
    direct: Vec<PackConfig>,
    #[serde(default, rename = "transitive", skip_serializing_if = "Vec::is_empty")]
    transitive: Vec<PackConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, String>,
}

impl ProvisioningConfig {
    pub fn builder() -> ProvisioningConfigBuilder {
        ProvisioningConfigBuilder::default()
    }

    /// A builder seeded with this configuration's contents
    pub fn to_builder(&self) -> ProvisioningConfigBuilder {
        ProvisioningConfigBuilder {
            direct: self.direct.clone(),
            transitive: self.transitive.clone(),
            options: self.options.clone(),
        }
    }

    /// Ordered direct dependency edges
    pub fn direct(&self) -> &[PackConfig] {
        &self.direct
    }

    /// Transitive dependency edges
    pub fn transitive(&self) -> &[PackConfig] {
        &self.transitive
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.transitive.is_empty()
    }

    pub fn find_direct(&self, producer: &Producer) -> Option<&PackConfig> {
        self.direct.iter().find(|c| c.producer() == producer)
    }

    pub fn find_transitive(&self, producer: &Producer) -> Option<&PackConfig> {
        self.transitive.iter().find(|c| c.producer() == producer)
    }

    /// Look an edge up in either list
    pub fn find(&self, producer: &Producer) -> Option<&PackConfig> {
        self.find_direct(producer)
            .or_else(|| self.find_transitive(producer))
    }

    /// Load a configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
        let mut config: ProvisioningConfig =
            toml::from_str(&text).map_err(|e| Error::ParseDescriptor {
                path: path.to_path_buf(),
                source: Box::new(e),
            })?;
        // List placement is authoritative for the transitive flag
        for edge in &mut config.direct {
            edge.transitive = false;
        }
        for edge in &mut config.transitive {
            edge.transitive = true;
        }
        config.validate(path)?;
        Ok(config)
    }

    /// Persist the configuration as TOML
    pub fn store(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Serialize {
            what: "provisioning configuration".to_string(),
            source: Box::new(e),
        })?;
        fs::write(path, text).map_err(|e| Error::write(path, e))?;
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for edge in self.direct.iter().chain(&self.transitive) {
            if !seen.insert(edge.producer().clone()) {
                return Err(Error::InvalidDescriptor {
                    path: path.to_path_buf(),
                    reason: format!("more than one entry for producer {}", edge.producer()),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`ProvisioningConfig`].
///
/// Producers are unique across the direct and transitive lists; adding a
/// duplicate is rejected rather than silently replacing.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningConfigBuilder {
    direct: Vec<PackConfig>,
    transitive: Vec<PackConfig>,
    options: BTreeMap<String, String>,
}

impl ProvisioningConfigBuilder {
    /// Append a direct dependency edge
    pub fn add_direct(&mut self, mut config: PackConfig) -> Result<&mut Self> {
        self.ensure_new(config.producer())?;
        config.transitive = false;
        self.direct.push(config);
        Ok(self)
    }

    /// Insert a direct dependency edge at a specific index
    pub fn insert_direct(&mut self, index: usize, mut config: PackConfig) -> Result<&mut Self> {
        self.ensure_new(config.producer())?;
        config.transitive = false;
        let index = index.min(self.direct.len());
        self.direct.insert(index, config);
        Ok(self)
    }

    /// Append a transitive dependency edge
    pub fn add_transitive(&mut self, mut config: PackConfig) -> Result<&mut Self> {
        self.ensure_new(config.producer())?;
        config.transitive = true;
        self.transitive.push(config);
        Ok(self)
    }

    /// Replace the existing edge for a producer in place, keeping its index
    pub fn replace(&mut self, mut config: PackConfig) -> Result<&mut Self> {
        let producer = config.producer().clone();
        if let Some(edge) = self.direct.iter_mut().find(|c| *c.producer() == producer) {
            config.transitive = false;
            *edge = config;
        } else if let Some(edge) = self
            .transitive
            .iter_mut()
            .find(|c| *c.producer() == producer)
        {
            config.transitive = true;
            *edge = config;
        } else {
            return Err(Error::Config(format!("no configured edge for {}", producer)));
        }
        Ok(self)
    }

    /// Remove the direct edge for a producer, if any
    pub fn remove_direct(&mut self, producer: &Producer) -> Option<PackConfig> {
        let pos = self.direct.iter().position(|c| c.producer() == producer)?;
        Some(self.direct.remove(pos))
    }

    /// Remove the transitive edge for a producer, if any
    pub fn remove_transitive(&mut self, producer: &Producer) -> Option<PackConfig> {
        let pos = self
            .transitive
            .iter()
            .position(|c| c.producer() == producer)?;
        Some(self.transitive.remove(pos))
    }

    pub fn clear_transitive(&mut self) -> &mut Self {
        self.transitive.clear();
        self
    }

    pub fn set_option(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn remove_option(&mut self, name: &str) -> &mut Self {
        self.options.remove(name);
        self
    }

    pub fn clear_options(&mut self) -> &mut Self {
        self.options.clear();
        self
    }

    pub fn set_options(&mut self, options: BTreeMap<String, String>) -> &mut Self {
        self.options = options;
        self
    }

    /// Consuming convenience for literal construction
    pub fn with_direct(mut self, config: PackConfig) -> Result<Self> {
        self.add_direct(config)?;
        Ok(self)
    }

    /// Consuming convenience for literal construction
    pub fn with_transitive(mut self, config: PackConfig) -> Result<Self> {
        self.add_transitive(config)?;
        Ok(self)
    }

    /// Consuming convenience for literal construction
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_option(name, value);
        self
    }

    pub fn direct(&self) -> &[PackConfig] {
        &self.direct
    }

    pub fn transitive(&self) -> &[PackConfig] {
        &self.transitive
    }

    pub fn find(&self, producer: &Producer) -> Option<&PackConfig> {
        self.direct
            .iter()
            .chain(&self.transitive)
            .find(|c| c.producer() == producer)
    }

    /// Mutable access to the edge for a producer, wherever it sits
    pub fn find_mut(&mut self, producer: &Producer) -> Option<&mut PackConfig> {
        self.direct
            .iter_mut()
            .chain(&mut self.transitive)
            .find(|c| c.producer() == producer)
    }

    pub fn build(self) -> ProvisioningConfig {
        ProvisioningConfig {
            direct: self.direct,
            transitive: self.transitive,
            options: self.options,
        }
    }

    fn ensure_new(&self, producer: &Producer) -> Result<()> {
        if self.find(producer).is_some() {
            return Err(Error::Config(format!(
                "producer {} is already configured",
                producer
            )));
        }
        Ok(())
    }
}
