// src/lib.rs

//! Ashlar Feature-Pack Provisioning
//!
//! Provisioning engine that resolves a configured set of feature-packs
//! into an ordered layout, overlays patches, and rewrites the
//! configuration through transactional install/uninstall/update plans.
//!
//! # Architecture
//!
//! - Descriptor-first: every feature-pack is a directory of TOML descriptors
//! - Layouts: one resolution pass produces an immutable ordered pack list
//! - Patches: overlay packs staged as private copies, never shared
//! - Plans: disjoint install/uninstall/update intents applied atomically
//! - Session working directories: locked, reference-counted, torn down last

pub mod config;
mod error;
pub mod family;
pub mod fsutil;
pub mod layout;
pub mod location;
pub mod options;
pub mod plan;
pub mod plugin;
pub mod progress;
pub mod spec;
pub mod universe;
pub mod workdir;

pub use config::{
    PackConfig, PackageFilter, ProvisioningConfig, ProvisioningConfigBuilder, CONFIG_FILE,
};
pub use error::{Error, Result};
pub use layout::{Layout, LayoutBuilder, PackOrigin, ResolvedPack};
pub use location::{ConfigId, LocationError, PackId, PackLocation, Producer};
pub use options::ValidatedOptions;
pub use plan::ProvisioningPlan;
pub use plugin::{PluginManifest, PluginOption, PluginRegistry};
pub use progress::{
    CallbackProgress, LogProgress, ProgressEvent, ProgressStyle, ProgressTracker, SilentProgress,
};
pub use universe::{Catalog, PackCache, PackUpdate, Universe};
