// tests/common/mod.rs

//! Shared fixtures for the integration suites.
//!
//! Each test gets a tempdir-rooted catalog plus a scratch area for
//! feature-pack sources; packs are registered through the same path the
//! CLI uses, so resolution exercises the real store.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use ashlar::config::PackConfig;
use ashlar::universe::{Catalog, PackCache};

/// A catalog rooted in a tempdir.
///
/// Keep the fixture alive for the duration of the test to prevent
/// cleanup of the store.
pub struct CatalogFixture {
    root: TempDir,
    pub catalog: Catalog,
}

impl CatalogFixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let catalog = Catalog::open(root.path().join("catalog")).unwrap();
        Self { root, catalog }
    }

    /// Write a feature-pack source tree without registering it
    pub fn pack_source(&self, location: &str, body: &str) -> PathBuf {
        self.pack_source_raw(
            location,
            &format!("[feature-pack]\nlocation = \"{}\"\n{}", location, body),
        )
    }

    /// Write a source tree with a verbatim descriptor.
    ///
    /// Needed when the descriptor carries top-level keys such as
    /// `plugins`, which must precede the `[feature-pack]` table.
    pub fn pack_source_raw(&self, location: &str, descriptor: &str) -> PathBuf {
        let name = location.replace(['@', ':', '#'], "_");
        let dir = self.root.path().join("sources").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("feature-pack.toml"), descriptor).unwrap();
        dir
    }

    /// Register a source tree with the catalog
    pub fn register(&self, dir: &Path) {
        self.catalog.add_local_dir(dir, &[]).unwrap();
    }

    /// Register a source tree under the given channels
    pub fn register_in(&self, dir: &Path, channels: &[&str]) {
        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        self.catalog.add_local_dir(dir, &channels).unwrap();
    }

    /// Write and register a pack in one step
    pub fn add_pack(&self, location: &str, body: &str) -> PathBuf {
        let dir = self.pack_source(location, body);
        self.register(&dir);
        dir
    }

    /// A cache mounting from this fixture's catalog
    pub fn cache(&self) -> Arc<PackCache> {
        let catalog = Catalog::open(self.root.path().join("catalog")).unwrap();
        Arc::new(PackCache::new(Arc::new(catalog)))
    }
}

/// Write a package descriptor into a pack source tree
pub fn write_package(pack: &Path, name: &str, deps: &[&str]) {
    let dir = pack.join("packages").join(name);
    fs::create_dir_all(&dir).unwrap();
    let deps: Vec<String> = deps.iter().map(|d| format!("\"{}\"", d)).collect();
    fs::write(
        dir.join("package.toml"),
        format!("name = \"{}\"\ndependencies = [{}]\n", name, deps.join(", ")),
    )
    .unwrap();
}

/// Write an arbitrary file into a pack source tree
pub fn write_file(pack: &Path, rel: &str, contents: &str) {
    let path = pack.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

pub fn direct(location: &str) -> PackConfig {
    PackConfig::new(location.parse().unwrap())
}

pub fn transitive(location: &str) -> PackConfig {
    PackConfig::new_transitive(location.parse().unwrap())
}
