// src/universe.rs

//! Build resolution: universes, the local catalog, and the mount cache.
//!
//! A [`Universe`] answers three questions the layout engine cannot answer
//! itself: where a resolved feature-pack's contents live on disk, which
//! build is "latest" for an unresolved location, and whether updates or
//! new patches exist for an installed build. The engine never interprets
//! archive bytes; it consumes directories handed back by the universe.
//!
//! [`Catalog`] is the filesystem-backed universe: a local store of
//! registered feature-packs under `store/<universe>/<name>/<build>/`,
//! populated by unpacking `.tar.gz` archives. [`PackCache`] sits in front
//! of any universe and memoizes mounts so several layouts can share one
//! resolver safely.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::fsutil;
use crate::location::{PackId, PackLocation, Producer};
use crate::spec::{PackSpec, PACK_DESCRIPTOR};

/// An update plan for one installed feature-pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackUpdate {
    pub producer: Producer,
    /// What is installed right now
    pub installed: PackId,
    /// The build to move to (equal to `installed` for patch-only updates)
    pub updated: PackId,
    /// Whether the producer is currently a transitive dependency
    pub transitive: bool,
    /// The complete patch set to carry after the update
    #[serde(default)]
    pub patches: Vec<PackId>,
}

impl PackUpdate {
    /// An update that only changes the patch set
    pub fn is_patch_only(&self) -> bool {
        self.installed == self.updated
    }
}

/// Source of feature-pack builds.
///
/// Implementations must be usable from several layouts at once; the
/// engine serializes mount lookups through [`PackCache`].
pub trait Universe: Send + Sync {
    /// Directory holding the contents of a resolved build
    fn resolve(&self, id: &PackId) -> Result<PathBuf>;

    /// Pick the latest build for an unresolved location
    fn latest_build(&self, location: &PackLocation) -> Result<PackId>;

    /// Update plan for an installed build and its applied patches, if any
    fn update_plan(
        &self,
        producer: &Producer,
        installed: &str,
        patches: &[PackId],
        transitive: bool,
    ) -> Result<Option<PackUpdate>>;

    /// Canonical coordinates capability.
    ///
    /// Universes that can translate producer identities into a canonical
    /// coordinate system return the translation here; the default is no
    /// capability. Family-member identity comparisons go through this.
    fn canonical_producer(&self, producer: &Producer) -> Option<Producer> {
        let _ = producer;
        None
    }
}

/// Ordering for build strings: semver when both parse, lexicographic otherwise
pub fn compare_builds(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// Registration metadata stored next to each catalog build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: PackId,
    /// Channels this build was published to
    #[serde(default)]
    pub channels: Vec<String>,
    pub added: DateTime<Utc>,
    /// Digest of the source archive, absent for directory imports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

const RECORD_FILE: &str = "record.toml";
const PACK_DIR: &str = "pack";

/// A filesystem-backed universe of feature-packs.
///
/// Store layout: `store/<universe>/<name>/<build>/pack/` holds the
/// unpacked feature-pack; `record.toml` beside it records registration
/// metadata.
#[derive(Debug, Clone)]
pub struct Catalog {
    store: PathBuf,
}

impl Catalog {
    /// Open (creating if needed) the catalog rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = root.into().join("store");
        fsutil::ensure_dir(&store)?;
        Ok(Self { store })
    }

    /// Default per-user catalog root
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("ashlar")
            .join("catalog")
    }

    fn producer_dir(&self, producer: &Producer) -> PathBuf {
        self.store.join(&producer.universe).join(&producer.name)
    }

    fn build_dir(&self, id: &PackId) -> PathBuf {
        self.producer_dir(&id.producer).join(&id.build)
    }

    fn pack_dir(&self, id: &PackId) -> PathBuf {
        self.build_dir(id).join(PACK_DIR)
    }

    /// All registered builds of a producer, sorted ascending by build
    pub fn builds(&self, producer: &Producer) -> Result<Vec<BuildRecord>> {
        let dir = self.producer_dir(producer);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::read(&dir, e))? {
            let entry = entry.map_err(|e| Error::read(&dir, e))?;
            let record_path = entry.path().join(RECORD_FILE);
            if !record_path.is_file() {
                warn!(path = %entry.path().display(), "skipping store entry without a record");
                continue;
            }
            let text = fs::read_to_string(&record_path).map_err(|e| Error::read(&record_path, e))?;
            let record: BuildRecord =
                toml::from_str(&text).map_err(|e| Error::ParseDescriptor {
                    path: record_path.clone(),
                    source: Box::new(e),
                })?;
            records.push(record);
        }
        records.sort_by(|a, b| compare_builds(&a.id.build, &b.id.build));
        Ok(records)
    }

    /// Register a `.tar.gz` feature-pack archive.
    ///
    /// The pack's identity is discovered from the descriptor embedded in
    /// the archive; registering an identity twice is an error.
    pub fn add_local(&self, archive: &Path, channels: &[String]) -> Result<PackId> {
        let tmp = tempfile::tempdir().map_err(Error::Io)?;

        let file = fs::File::open(archive).map_err(|e| Error::read(archive, e))?;
        let mut tarball = tar::Archive::new(GzDecoder::new(file));
        tarball
            .unpack(tmp.path())
            .map_err(|e| Error::read(archive, e))?;

        let root = Self::archive_root(tmp.path())?;
        let digest = fsutil::sha256_file(archive)?;
        let id = self.register(&root, channels, Some(digest))?;
        info!(%id, archive = %archive.display(), "registered feature-pack archive");
        Ok(id)
    }

    /// Register an already-unpacked feature-pack directory
    pub fn add_local_dir(&self, dir: &Path, channels: &[String]) -> Result<PackId> {
        let id = self.register(dir, channels, None)?;
        info!(%id, dir = %dir.display(), "registered feature-pack directory");
        Ok(id)
    }

    fn register(&self, root: &Path, channels: &[String], sha256: Option<String>) -> Result<PackId> {
        let spec = PackSpec::load(root)?;
        let id = spec.id().clone();

        let build_dir = self.build_dir(&id);
        if build_dir.exists() {
            return Err(Error::Catalog(format!("{} is already registered", id)));
        }
        fsutil::copy_dir_all(root, &build_dir.join(PACK_DIR))?;

        let record = BuildRecord {
            id: id.clone(),
            channels: channels.to_vec(),
            added: Utc::now(),
            sha256,
        };
        let text = toml::to_string_pretty(&record).map_err(|e| Error::Serialize {
            what: format!("build record for {}", id),
            source: Box::new(e),
        })?;
        let record_path = build_dir.join(RECORD_FILE);
        fs::write(&record_path, text).map_err(|e| Error::write(&record_path, e))?;
        Ok(id)
    }

    fn archive_root(unpacked: &Path) -> Result<PathBuf> {
        if unpacked.join(PACK_DESCRIPTOR).is_file() {
            return Ok(unpacked.to_path_buf());
        }
        // Archives commonly wrap their content in one top-level directory
        let mut dirs = Vec::new();
        for entry in fs::read_dir(unpacked).map_err(|e| Error::read(unpacked, e))? {
            let entry = entry.map_err(|e| Error::read(unpacked, e))?;
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        if let [single] = dirs.as_slice() {
            if single.join(PACK_DESCRIPTOR).is_file() {
                return Ok(single.clone());
            }
        }
        Err(Error::Catalog(format!(
            "archive does not contain a {} descriptor",
            PACK_DESCRIPTOR
        )))
    }

    /// Registered patch packs targeting the given build, sorted
    fn patches_for(&self, target: &PackId) -> Result<Vec<PackId>> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.store)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Catalog(format!("store scan failed: {}", e)))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let pack_dir = entry.path().join(PACK_DIR);
            if !pack_dir.join(PACK_DESCRIPTOR).is_file() {
                continue;
            }
            let spec = PackSpec::load(&pack_dir)?;
            if spec.patch_for() == Some(target) {
                out.push(spec.id().clone());
            }
        }
        out.sort();
        Ok(out)
    }
}

impl Universe for Catalog {
    fn resolve(&self, id: &PackId) -> Result<PathBuf> {
        let dir = self.pack_dir(id);
        if dir.join(PACK_DESCRIPTOR).is_file() {
            Ok(dir)
        } else {
            Err(Error::UnknownPack(id.clone()))
        }
    }

    fn latest_build(&self, location: &PackLocation) -> Result<PackId> {
        let records = self.builds(&location.producer)?;
        let latest = records
            .iter()
            .filter(|r| match &location.channel {
                Some(channel) => r.channels.contains(channel),
                None => true,
            })
            .max_by(|a, b| compare_builds(&a.id.build, &b.id.build));
        match latest {
            Some(record) => {
                debug!(location = %location, resolved = %record.id, "resolved latest build");
                Ok(record.id.clone())
            }
            None => Err(Error::NoBuilds(location.clone())),
        }
    }

    fn update_plan(
        &self,
        producer: &Producer,
        installed: &str,
        patches: &[PackId],
        transitive: bool,
    ) -> Result<Option<PackUpdate>> {
        let records = self.builds(producer)?;
        if records.is_empty() {
            return Ok(None);
        }

        // Stay within the channels the installed build came from, when known
        let channels: Vec<String> = records
            .iter()
            .find(|r| r.id.build == installed)
            .map(|r| r.channels.clone())
            .unwrap_or_default();
        let candidates: Vec<&BuildRecord> = records
            .iter()
            .filter(|r| {
                channels.is_empty() || r.channels.iter().any(|c| channels.contains(c))
            })
            .collect();

        let latest = candidates
            .iter()
            .max_by(|a, b| compare_builds(&a.id.build, &b.id.build))
            .map(|r| r.id.build.clone());
        let target_build = match latest {
            Some(latest) if compare_builds(&latest, installed) == Ordering::Greater => latest,
            _ => installed.to_string(),
        };

        let target = PackId::new(producer.clone(), target_build);
        let mut plan_patches = self.patches_for(&target)?;

        if target.build == installed {
            if !plan_patches.iter().any(|p| !patches.contains(p)) {
                return Ok(None);
            }
            for applied in patches {
                if !plan_patches.contains(applied) {
                    plan_patches.push(applied.clone());
                }
            }
            plan_patches.sort();
        }

        Ok(Some(PackUpdate {
            producer: producer.clone(),
            installed: PackId::new(producer.clone(), installed),
            updated: target,
            transitive,
            patches: plan_patches,
        }))
    }

    fn canonical_producer(&self, producer: &Producer) -> Option<Producer> {
        // Local store coordinates are already canonical
        Some(producer.clone())
    }
}

/// Memoizing mount cache shared by layouts.
///
/// Lookups hold the cache lock across the underlying resolve, so a mount
/// is created at most once per identity even under concurrent callers.
pub struct PackCache {
    universe: Arc<dyn Universe>,
    mounts: Mutex<HashMap<PackId, PathBuf>>,
}

impl PackCache {
    pub fn new(universe: Arc<dyn Universe>) -> Self {
        Self {
            universe,
            mounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn universe(&self) -> &dyn Universe {
        self.universe.as_ref()
    }

    /// Mounted directory for a resolved identity, memoized
    pub fn dir(&self, id: &PackId) -> Result<PathBuf> {
        let mut mounts = self.mounts.lock().unwrap();
        if let Some(dir) = mounts.get(id) {
            return Ok(dir.clone());
        }
        let dir = self.universe.resolve(id)?;
        mounts.insert(id.clone(), dir.clone());
        Ok(dir)
    }

    pub fn latest_build(&self, location: &PackLocation) -> Result<PackId> {
        self.universe.latest_build(location)
    }

    pub fn update_plan(
        &self,
        producer: &Producer,
        installed: &str,
        patches: &[PackId],
        transitive: bool,
    ) -> Result<Option<PackUpdate>> {
        self.universe
            .update_plan(producer, installed, patches, transitive)
    }

    /// Number of memoized mounts
    pub fn mounted(&self) -> usize {
        self.mounts.lock().unwrap().len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Canned universe for unit tests
    #[derive(Debug, Default)]
    pub struct StaticUniverse {
        pub dirs: HashMap<PackId, PathBuf>,
        pub latest: HashMap<Producer, PackId>,
        pub updates: HashMap<Producer, PackUpdate>,
    }

    impl Universe for StaticUniverse {
        fn resolve(&self, id: &PackId) -> Result<PathBuf> {
            self.dirs
                .get(id)
                .cloned()
                .ok_or_else(|| Error::UnknownPack(id.clone()))
        }

        fn latest_build(&self, location: &PackLocation) -> Result<PackId> {
            self.latest
                .get(&location.producer)
                .cloned()
                .ok_or_else(|| Error::NoBuilds(location.clone()))
        }

        fn update_plan(
            &self,
            producer: &Producer,
            _installed: &str,
            _patches: &[PackId],
            _transitive: bool,
        ) -> Result<Option<PackUpdate>> {
            Ok(self.updates.get(producer).cloned())
        }

        fn canonical_producer(&self, producer: &Producer) -> Option<Producer> {
            Some(producer.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use tempfile::TempDir;

    fn write_pack(dir: &Path, location: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(PACK_DESCRIPTOR),
            format!("[feature-pack]\nlocation = \"{}\"\n", location),
        )
        .unwrap();
    }

    fn write_patch(dir: &Path, location: &str, target: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(PACK_DESCRIPTOR),
            format!(
                "[feature-pack]\nlocation = \"{}\"\n\n[patch]\nfor = \"{}\"\n",
                location, target
            ),
        )
        .unwrap();
    }

    fn make_archive(src: &Path, archive: &Path) {
        let file = File::create(archive).unwrap();
        let enc = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(enc);
        builder.append_dir_all("fp", src).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_add_local_discovers_identity() {
        let work = TempDir::new().unwrap();
        let pack_src = work.path().join("src");
        write_pack(&pack_src, "fp1@core#1.0.0");
        fs::create_dir_all(pack_src.join("packages/base")).unwrap();
        fs::write(pack_src.join("packages/base/package.toml"), "name = \"base\"\n").unwrap();

        let archive = work.path().join("fp1.tar.gz");
        make_archive(&pack_src, &archive);

        let catalog = Catalog::open(work.path().join("catalog")).unwrap();
        let id = catalog
            .add_local(&archive, &["stable".to_string()])
            .unwrap();
        assert_eq!(id.to_string(), "fp1@core#1.0.0");

        let dir = catalog.resolve(&id).unwrap();
        assert!(dir.join("packages/base/package.toml").is_file());

        let records = catalog.builds(&id.producer).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channels, ["stable"]);
        assert!(records[0].sha256.is_some());

        // Same identity twice is rejected
        assert!(catalog.add_local(&archive, &[]).is_err());
    }

    #[test]
    fn test_resolve_unknown_pack() {
        let work = TempDir::new().unwrap();
        let catalog = Catalog::open(work.path()).unwrap();
        let id = PackId::parse("nope@core#1.0.0").unwrap();
        assert!(matches!(
            catalog.resolve(&id),
            Err(Error::UnknownPack(unknown)) if unknown == id
        ));
    }

    #[test]
    fn test_latest_build_respects_channels() {
        let work = TempDir::new().unwrap();
        let catalog = Catalog::open(work.path().join("catalog")).unwrap();

        for (build, channel) in [("1.0.0", "stable"), ("1.1.0", "stable"), ("2.0.0", "beta")] {
            let src = work.path().join(format!("src-{}", build));
            write_pack(&src, &format!("fp1@core#{}", build));
            catalog
                .add_local_dir(&src, &[channel.to_string()])
                .unwrap();
        }

        let stable = PackLocation::parse("fp1@core:stable").unwrap();
        assert_eq!(
            catalog.latest_build(&stable).unwrap().to_string(),
            "fp1@core#1.1.0"
        );

        let any = PackLocation::parse("fp1@core").unwrap();
        assert_eq!(
            catalog.latest_build(&any).unwrap().to_string(),
            "fp1@core#2.0.0"
        );

        let missing = PackLocation::parse("fp1@core:nightly").unwrap();
        assert!(matches!(
            catalog.latest_build(&missing),
            Err(Error::NoBuilds(_))
        ));
    }

    #[test]
    fn test_update_plan_with_new_build_and_patches() {
        let work = TempDir::new().unwrap();
        let catalog = Catalog::open(work.path().join("catalog")).unwrap();
        let producer = Producer::new("core", "fp1");

        for build in ["1.0.0", "2.0.0"] {
            let src = work.path().join(format!("src-{}", build));
            write_pack(&src, &format!("fp1@core#{}", build));
            catalog.add_local_dir(&src, &["stable".to_string()]).unwrap();
        }
        let patch_src = work.path().join("patch-src");
        write_patch(&patch_src, "fp1-fix@core#2.0.1", "fp1@core#2.0.0");
        catalog.add_local_dir(&patch_src, &[]).unwrap();

        let plan = catalog
            .update_plan(&producer, "1.0.0", &[], false)
            .unwrap()
            .expect("an update should be found");
        assert_eq!(plan.installed.build, "1.0.0");
        assert_eq!(plan.updated.build, "2.0.0");
        assert!(!plan.is_patch_only());
        assert_eq!(plan.patches.len(), 1);
        assert_eq!(plan.patches[0].to_string(), "fp1-fix@core#2.0.1");

        // Up to date once on 2.0.0 with the patch applied
        let applied = vec![PackId::parse("fp1-fix@core#2.0.1").unwrap()];
        assert!(catalog
            .update_plan(&producer, "2.0.0", &applied, false)
            .unwrap()
            .is_none());

        // Patch-only plan when the build is current but the patch is not applied
        let plan = catalog
            .update_plan(&producer, "2.0.0", &[], false)
            .unwrap()
            .expect("a patch-only update should be found");
        assert!(plan.is_patch_only());
        assert_eq!(plan.patches.len(), 1);
    }

    #[test]
    fn test_pack_cache_memoizes_mounts() {
        let work = TempDir::new().unwrap();
        let catalog = Catalog::open(work.path().join("catalog")).unwrap();
        let src = work.path().join("src");
        write_pack(&src, "fp1@core#1.0.0");
        let id = catalog.add_local_dir(&src, &[]).unwrap();

        let cache = PackCache::new(Arc::new(catalog));
        assert_eq!(cache.mounted(), 0);
        let first = cache.dir(&id).unwrap();
        let second = cache.dir(&id).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.mounted(), 1);
    }

    #[test]
    fn test_compare_builds_semver_with_fallback() {
        assert_eq!(compare_builds("1.9.0", "1.10.0"), Ordering::Less);
        assert_eq!(compare_builds("2.0.0", "2.0.0"), Ordering::Equal);
        // Non-semver builds fall back to lexicographic
        assert_eq!(compare_builds("alpha", "beta"), Ordering::Less);
    }
}
