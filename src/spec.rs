// src/spec.rs

//! Feature-pack descriptors.
//!
//! A mounted feature-pack directory is described by a `feature-pack.toml`
//! at its root, parsed into an immutable [`PackSpec`]. Sub-descriptors for
//! packages, layers, features, and configs live at well-known relative
//! paths inside the pack:
//!
//! ```text
//! feature-pack.toml
//! packages/<name>/package.toml
//! layers/<model>/<name>/layer.toml
//! features/<name>/feature.toml
//! feature-groups/<name>.toml
//! configs/<model>/config.toml
//! resources/
//! plugins/
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PackConfig;
use crate::error::{Error, Result};
use crate::family::FamilySpec;
use crate::location::{ConfigId, PackId, PackLocation};

/// File name of the root descriptor inside a feature-pack
pub const PACK_DESCRIPTOR: &str = "feature-pack.toml";

pub(crate) fn parse_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    toml::from_str(&text).map_err(|e| Error::ParseDescriptor {
        path: path.to_path_buf(),
        source: Box::new(e),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct RawHeader {
    location: PackLocation,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPatch {
    #[serde(rename = "for")]
    target: PackId,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawDefaults {
    #[serde(default)]
    packages: Vec<String>,
    #[serde(default)]
    configs: Vec<ConfigId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawSpec {
    feature_pack: RawHeader,
    #[serde(default, rename = "dependency")]
    dependencies: Vec<PackConfig>,
    #[serde(default, rename = "transitive")]
    transitives: Vec<PackConfig>,
    #[serde(default)]
    family: Option<FamilySpec>,
    #[serde(default)]
    patch: Option<RawPatch>,
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    plugins: Vec<String>,
    #[serde(default)]
    system_paths: Vec<String>,
}

/// The immutable descriptor of one feature-pack build.
#[derive(Debug, Clone, PartialEq)]
pub struct PackSpec {
    id: PackId,
    deps: Vec<PackConfig>,
    transitive_deps: Vec<PackConfig>,
    family: Option<FamilySpec>,
    patch_for: Option<PackId>,
    default_packages: Vec<String>,
    default_configs: Vec<ConfigId>,
    plugins: Vec<String>,
    system_paths: Vec<String>,
}

impl PackSpec {
    /// Load and validate the descriptor at the root of a mounted pack
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PACK_DESCRIPTOR);
        let raw: RawSpec = parse_toml(&path)?;

        let id = raw.feature_pack.location.id().ok_or_else(|| {
            Error::InvalidDescriptor {
                path: path.clone(),
                reason: format!(
                    "feature-pack location {} has no build",
                    raw.feature_pack.location
                ),
            }
        })?;

        let mut deps = raw.dependencies;
        for dep in &mut deps {
            dep.transitive = false;
        }
        let mut transitive_deps = raw.transitives;
        for dep in &mut transitive_deps {
            dep.transitive = true;
        }

        let mut seen = std::collections::BTreeSet::new();
        for dep in deps.iter().chain(&transitive_deps) {
            if !seen.insert(dep.producer().clone()) {
                return Err(Error::InvalidDescriptor {
                    path,
                    reason: format!("more than one dependency on producer {}", dep.producer()),
                });
            }
        }

        Ok(Self {
            id,
            deps,
            transitive_deps,
            family: raw.family,
            patch_for: raw.patch.map(|p| p.target),
            default_packages: raw.defaults.packages,
            default_configs: raw.defaults.configs,
            plugins: raw.plugins,
            system_paths: raw.system_paths,
        })
    }

    pub fn id(&self) -> &PackId {
        &self.id
    }

    /// Direct dependency edges, in declared order
    pub fn deps(&self) -> &[PackConfig] {
        &self.deps
    }

    /// Transitive dependency pins
    pub fn transitive_deps(&self) -> &[PackConfig] {
        &self.transitive_deps
    }

    pub fn family(&self) -> Option<&FamilySpec> {
        self.family.as_ref()
    }

    /// The pack this spec patches, when it is a patch
    pub fn patch_for(&self) -> Option<&PackId> {
        self.patch_for.as_ref()
    }

    pub fn is_patch(&self) -> bool {
        self.patch_for.is_some()
    }

    pub fn default_packages(&self) -> &[String] {
        &self.default_packages
    }

    pub fn default_configs(&self) -> &[ConfigId] {
        &self.default_configs
    }

    /// Plugin module names the pack ships under `plugins/`
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// Paths the pack wants exported into the target's system path set
    pub fn system_paths(&self) -> &[String] {
        &self.system_paths
    }
}

/// Descriptor of one package inside a feature-pack
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    /// Other packages this one pulls in
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PackageSpec {
    pub fn dir(pack_dir: &Path, name: &str) -> PathBuf {
        pack_dir.join("packages").join(name)
    }

    pub fn load(pack_dir: &Path, name: &str) -> Result<Self> {
        parse_toml(&Self::dir(pack_dir, name).join("package.toml"))
    }

    pub fn exists(pack_dir: &Path, name: &str) -> bool {
        Self::dir(pack_dir, name).join("package.toml").is_file()
    }
}

/// Descriptor of a config layer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub packages: Vec<String>,
}

impl LayerSpec {
    pub fn load(pack_dir: &Path, model: &str, name: &str) -> Result<Self> {
        parse_toml(&pack_dir.join("layers").join(model).join(name).join("layer.toml"))
    }
}

/// Descriptor of a feature declaration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl FeatureSpec {
    pub fn load(pack_dir: &Path, name: &str) -> Result<Self> {
        parse_toml(&pack_dir.join("features").join(name).join("feature.toml"))
    }
}

/// Descriptor of a generated config model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigSpec {
    pub model: String,
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ConfigSpec {
    pub fn load(pack_dir: &Path, model: &str) -> Result<Self> {
        parse_toml(&pack_dir.join("configs").join(model).join("config.toml"))
    }
}
