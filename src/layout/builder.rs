// src/layout/builder.rs

//! The layout build pass: recursive graph resolution, conflict and
//! branch tracking, patch loading, and overlay application.
//!
//! One call to [`build_state`] turns a provisioning configuration into
//! the resolved state a [`super::Layout`] owns. All bookkeeping for a
//! pass lives in a [`ResolutionContext`] created at the top of the call
//! and discarded with it; nothing resolution-scoped survives between
//! builds.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{PackConfig, ProvisioningConfig};
use crate::error::{Error, Result};
use crate::family::FamilyResolver;
use crate::fsutil;
use crate::location::{PackId, Producer};
use crate::options::{validate_options, ValidatedOptions, EXPORT_SYSTEM_PATHS};
use crate::plugin::PluginRegistry;
use crate::progress::ProgressTracker;
use crate::spec::{PackSpec, PACK_DESCRIPTOR};
use crate::universe::PackCache;
use crate::workdir::WorkDir;

use super::{PackOrigin, ResolvedPack};

/// Subtrees a patch overlays into its target's private copy
const PATCH_OVERLAYS: [&str; 5] = ["packages", "features", "feature-groups", "configs", "layers"];
/// Subtrees a patch contributes to the session aggregates as well
const PATCH_SHARED: [&str; 2] = ["plugins", "resources"];

/// File written under `staged/` when system-path export is requested
pub const SYSTEM_PATHS_FILE: &str = "system-paths.txt";

/// Everything one successful build pass produces
#[derive(Debug)]
pub(crate) struct LayoutState {
    pub(crate) config: ProvisioningConfig,
    /// Dependency order: a pack's dependencies precede it, roots come last
    pub(crate) packs: Vec<ResolvedPack>,
    pub(crate) index: BTreeMap<Producer, usize>,
    /// Loaded patches keyed by target identity, in arrival order
    pub(crate) patches: BTreeMap<PackId, Vec<ResolvedPack>>,
    pub(crate) registry: PluginRegistry,
    pub(crate) options: ValidatedOptions,
    pub(crate) system_paths: Vec<String>,
}

/// Build a layout state from a configuration.
///
/// The returned configuration may differ from the input: latest-build
/// substitutions are folded back into edges, unused transitive pins are
/// pruned, and persistent option overrides are recorded.
pub(crate) fn build_state(
    cache: &PackCache,
    workdir: &WorkDir,
    config: ProvisioningConfig,
    overrides: &BTreeMap<String, String>,
    progress: &dyn ProgressTracker,
) -> Result<LayoutState> {
    let mut ctx = ResolutionContext {
        cache,
        workdir,
        progress,
        families: FamilyResolver::new(),
        branch: HashMap::new(),
        resolved: BTreeMap::new(),
        order: Vec::new(),
        conflicts: BTreeMap::new(),
        transitive_seen: BTreeSet::new(),
        patches: BTreeMap::new(),
        loaded_patches: HashMap::new(),
        system_paths: BTreeSet::new(),
    };
    ctx.expand(config.direct(), config.transitive(), PackOrigin::Direct)?;

    let ResolutionContext {
        families,
        mut resolved,
        order,
        conflicts,
        transitive_seen,
        patches,
        system_paths,
        ..
    } = ctx;

    // Conflicts abort only once the whole pass is done, so every conflict
    // for a configuration surfaces together
    if !conflicts.is_empty() {
        return Err(Error::VersionConflict(conflicts));
    }
    families.validate().map_err(Error::Family)?;

    // Known transitive producers that never resolved: prune the ones the
    // configuration pins explicitly, fail on the ones a descriptor needs
    let mut pruned = Vec::new();
    for producer in &transitive_seen {
        if resolved.contains_key(producer) {
            continue;
        }
        if config.find_transitive(producer).is_some() {
            pruned.push(producer.clone());
        } else {
            return Err(Error::UnresolvedTransitive(producer.clone()));
        }
    }

    let mut builder = config.to_builder();
    for producer in &pruned {
        debug!(%producer, "pruning unused transitive dependency");
        builder.remove_transitive(producer);
    }
    for edge in config.direct().iter().chain(config.transitive()) {
        if edge.location.is_resolved() || pruned.contains(edge.producer()) {
            continue;
        }
        if let Some(pack) = resolved.get(edge.producer()) {
            let mut updated = edge.clone();
            updated.location = edge.location.resolved(&pack.id().build);
            builder.replace(updated)?;
        }
    }

    apply_patches(workdir, &mut resolved, &patches)?;

    let registry = PluginRegistry::discover(&workdir.plugins_dir())?;
    let options = validate_options(&registry, config.options(), overrides)?;
    builder.set_options(options.persisted().clone());

    let system_paths: Vec<String> = system_paths.into_iter().collect();
    if options.is_true(EXPORT_SYSTEM_PATHS) {
        let export = workdir.staged_dir().join(SYSTEM_PATHS_FILE);
        let mut text = system_paths.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(&export, text).map_err(|e| Error::write(&export, e))?;
    }

    let mut packs = Vec::with_capacity(order.len());
    let mut index = BTreeMap::new();
    for producer in order {
        if let Some(pack) = resolved.remove(&producer) {
            index.insert(producer, packs.len());
            packs.push(pack);
        }
    }

    Ok(LayoutState {
        config: builder.build(),
        packs,
        index,
        patches,
        registry,
        options,
        system_paths,
    })
}

/// Per-pass bookkeeping threaded through the recursive expansion
struct ResolutionContext<'a> {
    cache: &'a PackCache,
    workdir: &'a WorkDir,
    progress: &'a dyn ProgressTracker,
    families: FamilyResolver,
    /// Producer pins for the branch currently being expanded
    branch: HashMap<Producer, PackId>,
    resolved: BTreeMap<Producer, ResolvedPack>,
    /// Producers in append-on-finish order
    order: Vec<Producer>,
    conflicts: BTreeMap<Producer, BTreeSet<PackId>>,
    transitive_seen: BTreeSet<Producer>,
    patches: BTreeMap<PackId, Vec<ResolvedPack>>,
    loaded_patches: HashMap<Producer, PackId>,
    system_paths: BTreeSet<String>,
}

impl ResolutionContext<'_> {
    /// Expand one dependency container (the root configuration or a
    /// resolved pack's descriptor).
    fn expand(
        &mut self,
        direct: &[PackConfig],
        transitive: &[PackConfig],
        origin: PackOrigin,
    ) -> Result<()> {
        // Pins added at this level, removed when the level completes
        let mut added: Vec<Producer> = Vec::new();

        for edge in transitive {
            self.transitive_seen.insert(edge.producer().clone());
            self.load_patches(&edge.patches)?;
            let Some(id) = edge.location.id() else {
                continue;
            };
            if self.branch.contains_key(&id.producer) {
                continue;
            }
            added.push(id.producer.clone());
            self.branch.insert(id.producer.clone(), id);
        }

        let mut queue: Vec<(PackId, PathBuf, PackSpec)> = Vec::new();
        for edge in direct {
            // Family substitution first: the effective producer drives
            // every check that follows
            let location = self.families.resolve_dependency(
                self.cache.universe(),
                &edge.location,
                edge.family.as_ref(),
            );
            let mut id = match location.id() {
                Some(id) => id,
                None => {
                    let latest = self.cache.latest_build(&location)?;
                    debug!(edge = %location, latest = %latest, "substituted latest build");
                    latest
                }
            };
            if let Some(pinned) = self.branch.get(&id.producer) {
                if pinned.build != id.build {
                    debug!(edge = %id, pin = %pinned, "rewriting edge to branch pin");
                    id = pinned.clone();
                }
            }

            self.load_patches(&edge.patches)?;

            if let Some(existing) = self.resolved.get(&id.producer) {
                if existing.id().build != id.build {
                    self.record_conflict(existing.id().clone(), id);
                }
                continue;
            }

            self.progress.set_message(&format!("resolving {}", id));
            let dir = self.cache.dir(&id)?;
            let spec = PackSpec::load(&dir)?;
            if spec.id() != &id {
                return Err(Error::Catalog(format!(
                    "{} resolved to a descriptor for {}",
                    id,
                    spec.id()
                )));
            }
            if spec.is_patch() {
                return Err(Error::Config(format!(
                    "{} is a patch and cannot be a dependency; attach it to its target instead",
                    id
                )));
            }
            if let Some(family) = spec.family() {
                self.families
                    .register(self.cache.universe(), &id, family, edge.family.is_some());
            }
            self.resolved.insert(
                id.producer.clone(),
                ResolvedPack::new(id.clone(), dir.clone(), spec.clone(), origin),
            );
            queue.push((id, dir, spec));
        }

        // A pack is pinned only while its own subtree expands: descendants
        // resolve against the chain above them, siblings resolve
        // independently and meet in the global map
        for (id, dir, spec) in queue {
            let chained = !self.branch.contains_key(&id.producer);
            if chained {
                self.branch.insert(id.producer.clone(), id.clone());
            }
            self.expand(spec.deps(), spec.transitive_deps(), PackOrigin::Transitive)?;
            if chained {
                self.branch.remove(&id.producer);
            }
            self.finish_pack(&id, &dir, &spec)?;
        }

        for producer in added {
            self.branch.remove(&producer);
        }
        Ok(())
    }

    /// Aggregate a fully expanded pack's shared content and record it in
    /// the ordered result.
    fn finish_pack(&mut self, id: &PackId, dir: &Path, spec: &PackSpec) -> Result<()> {
        fsutil::copy_dir_if_present(&dir.join("resources"), &self.workdir.resources_dir())?;
        for plugin in spec.plugins() {
            let src = dir.join(plugin);
            let Some(name) = src.file_name() else {
                return Err(Error::InvalidDescriptor {
                    path: dir.join(PACK_DESCRIPTOR),
                    reason: format!("invalid plugin path {}", plugin),
                });
            };
            let dst = self.workdir.plugins_dir().join(name);
            if src.is_dir() {
                fsutil::copy_dir_all(&src, &dst)?;
            } else if src.is_file() {
                fs::copy(&src, &dst).map_err(|e| Error::copy(&src, &dst, e))?;
            } else {
                return Err(Error::InvalidDescriptor {
                    path: dir.join(PACK_DESCRIPTOR),
                    reason: format!("declared plugin {} not found", plugin),
                });
            }
        }
        for path in spec.system_paths() {
            self.system_paths.insert(path.clone());
        }
        self.order.push(id.producer.clone());
        self.progress.increment(1);
        Ok(())
    }

    fn load_patches(&mut self, patches: &[PackId]) -> Result<()> {
        for patch in patches {
            self.load_patch(patch)?;
        }
        Ok(())
    }

    /// Load a patch pack and register it under its target identity.
    ///
    /// Recursive: a patch's dependencies must themselves be patches and
    /// are loaded along with it.
    fn load_patch(&mut self, id: &PackId) -> Result<()> {
        match self.loaded_patches.get(&id.producer) {
            Some(loaded) if loaded == id => return Ok(()),
            Some(loaded) => {
                let loaded = loaded.clone();
                self.record_conflict(loaded, id.clone());
                return Ok(());
            }
            None => {}
        }

        let dir = self.cache.dir(id)?;
        let spec = PackSpec::load(&dir)?;
        let Some(target) = spec.patch_for().cloned() else {
            return Err(Error::NotPatch(id.clone()));
        };
        debug!(patch = %id, target = %target, "loaded patch");
        self.loaded_patches.insert(id.producer.clone(), id.clone());
        self.patches
            .entry(target)
            .or_default()
            .push(ResolvedPack::new(
                id.clone(),
                dir,
                spec.clone(),
                PackOrigin::Patch,
            ));

        for dep in spec.deps().iter().chain(spec.transitive_deps()) {
            let Some(dep_id) = dep.location.id() else {
                return Err(Error::Config(format!(
                    "patch dependency {} of {} must name a build",
                    dep.location, id
                )));
            };
            self.load_patch(&dep_id)?;
        }
        Ok(())
    }

    fn record_conflict(&mut self, existing: PackId, incoming: PackId) {
        warn!(existing = %existing, incoming = %incoming, "version conflict");
        let entry = self.conflicts.entry(existing.producer.clone()).or_default();
        entry.insert(existing);
        entry.insert(incoming);
    }
}

/// Materialize patch overlays for every target resolved at the patched
/// identity, redirecting the target's directory to its private copy.
fn apply_patches(
    workdir: &WorkDir,
    resolved: &mut BTreeMap<Producer, ResolvedPack>,
    patches: &BTreeMap<PackId, Vec<ResolvedPack>>,
) -> Result<()> {
    for (target, list) in patches {
        let Some(pack) = resolved.get_mut(&target.producer) else {
            debug!(target = %target, "patches target a pack outside the layout");
            continue;
        };
        if pack.id() != target {
            debug!(target = %target, resolved = %pack.id(), "patches do not match the resolved build");
            continue;
        }

        let patched = workdir.patched_dir(target);
        fsutil::recreate_dir(&patched)?;
        fsutil::copy_dir_all(pack.dir(), &patched)?;
        for patch in list {
            info!(patch = %patch.id(), target = %target, "applying patch overlay");
            for sub in PATCH_OVERLAYS {
                fsutil::copy_dir_if_present(&patch.dir().join(sub), &patched.join(sub))?;
            }
            for sub in PATCH_SHARED {
                let aggregate = workdir.path().join(sub);
                fsutil::copy_dir_if_present(&patch.dir().join(sub), &patched.join(sub))?;
                fsutil::copy_dir_if_present(&patch.dir().join(sub), &aggregate)?;
            }
        }
        pack.redirect(patched);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use crate::universe::testing::StaticUniverse;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_pack(root: &Path, location: &str, body: &str) -> PathBuf {
        let name = location.replace(['@', '#', ':'], "_");
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(PACK_DESCRIPTOR),
            format!("[feature-pack]\nlocation = \"{}\"\n{}", location, body),
        )
        .unwrap();
        dir
    }

    fn universe(root: &Path, packs: &[&str]) -> StaticUniverse {
        let mut dirs = HashMap::new();
        for location in packs {
            let id = PackId::parse(location).unwrap();
            dirs.insert(id, root.join(location.replace(['@', '#', ':'], "_")));
        }
        StaticUniverse {
            dirs,
            ..Default::default()
        }
    }

    fn build(
        universe: StaticUniverse,
        config: ProvisioningConfig,
    ) -> Result<(LayoutState, Arc<WorkDir>)> {
        let cache = PackCache::new(Arc::new(universe));
        let workdir = WorkDir::session().unwrap();
        let state = build_state(
            &cache,
            &workdir,
            config,
            &BTreeMap::new(),
            &SilentProgress::new(),
        )?;
        Ok((state, workdir))
    }

    fn direct(location: &str) -> PackConfig {
        PackConfig::new(crate::location::PackLocation::parse(location).unwrap())
    }

    fn transitive(location: &str) -> PackConfig {
        PackConfig::new_transitive(crate::location::PackLocation::parse(location).unwrap())
    }

    #[test]
    fn test_diamond_at_same_build_resolves_once() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "a@core#1.0.0", "[[dependency]]\nlocation = \"b@core#1.0.0\"\n");
        write_pack(tmp.path(), "c@core#1.0.0", "[[dependency]]\nlocation = \"b@core#1.0.0\"\n");
        write_pack(tmp.path(), "b@core#1.0.0", "");
        let uni = universe(tmp.path(), &["a@core#1.0.0", "b@core#1.0.0", "c@core#1.0.0"]);

        let config = ProvisioningConfig::builder()
            .with_direct(direct("a@core#1.0.0"))
            .unwrap()
            .with_direct(direct("c@core#1.0.0"))
            .unwrap()
            .build();
        let (state, _workdir) = build(uni, config).unwrap();

        assert_eq!(state.packs.len(), 3);
        assert_eq!(state.index.len(), 3);
        // Dependencies precede their dependents, roots come last
        let names: Vec<&str> = state
            .packs
            .iter()
            .map(|p| p.id().producer.name.as_str())
            .collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn test_sibling_branches_with_different_builds_conflict() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "b@core#1.0.0", "");
        write_pack(tmp.path(), "b@core#2.0.0", "");
        write_pack(tmp.path(), "c@core#1.0.0", "[[dependency]]\nlocation = \"b@core#2.0.0\"\n");
        let uni = universe(
            tmp.path(),
            &["b@core#1.0.0", "b@core#2.0.0", "c@core#1.0.0"],
        );

        let config = ProvisioningConfig::builder()
            .with_direct(direct("b@core#1.0.0"))
            .unwrap()
            .with_direct(direct("c@core#1.0.0"))
            .unwrap()
            .build();
        let err = build(uni, config).unwrap_err();

        let Error::VersionConflict(conflicts) = err else {
            panic!("expected a version conflict, got {:?}", err);
        };
        let producer = Producer::new("core", "b");
        let builds: Vec<String> = conflicts[&producer].iter().map(|id| id.to_string()).collect();
        assert_eq!(builds, ["b@core#1.0.0", "b@core#2.0.0"]);
    }

    #[test]
    fn test_transitive_pin_aligns_diamond() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "b@core#1.0.0", "");
        write_pack(tmp.path(), "c@core#1.0.0", "[[dependency]]\nlocation = \"b@core#2.0.0\"\n");
        let uni = universe(tmp.path(), &["b@core#1.0.0", "c@core#1.0.0"]);

        // The transitive pin covers every subtree, so c's edge to 2.0.0
        // is rewritten to 1.0.0
        let config = ProvisioningConfig::builder()
            .with_transitive(transitive("b@core#1.0.0"))
            .unwrap()
            .with_direct(direct("c@core#1.0.0"))
            .unwrap()
            .build();
        let (state, _workdir) = build(uni, config).unwrap();

        let producer = Producer::new("core", "b");
        assert_eq!(state.packs[state.index[&producer]].id().build, "1.0.0");
        assert_eq!(state.packs.len(), 2);
    }

    #[test]
    fn test_latest_build_folds_back_into_config() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "a@core#2.0.0", "");
        let mut uni = universe(tmp.path(), &["a@core#2.0.0"]);
        uni.latest.insert(
            Producer::new("core", "a"),
            PackId::parse("a@core#2.0.0").unwrap(),
        );

        let config = ProvisioningConfig::builder()
            .with_direct(direct("a@core:stable"))
            .unwrap()
            .build();
        let (state, _workdir) = build(uni, config).unwrap();

        let edge = &state.config.direct()[0];
        assert_eq!(edge.location.to_string(), "a@core:stable#2.0.0");
    }

    #[test]
    fn test_unused_config_transitive_is_pruned() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "a@core#1.0.0", "");
        write_pack(tmp.path(), "old@core#1.0.0", "");
        let uni = universe(tmp.path(), &["a@core#1.0.0", "old@core#1.0.0"]);

        let config = ProvisioningConfig::builder()
            .with_direct(direct("a@core#1.0.0"))
            .unwrap()
            .with_transitive(transitive("old@core#1.0.0"))
            .unwrap()
            .build();
        let (state, _workdir) = build(uni, config).unwrap();

        assert!(state.config.transitive().is_empty());
        assert_eq!(state.packs.len(), 1);
    }

    #[test]
    fn test_descriptor_transitive_without_resolution_fails() {
        let tmp = TempDir::new().unwrap();
        write_pack(
            tmp.path(),
            "a@core#1.0.0",
            "[[transitive]]\nlocation = \"ghost@core#1.0.0\"\n",
        );
        let uni = universe(tmp.path(), &["a@core#1.0.0"]);

        let config = ProvisioningConfig::builder()
            .with_direct(direct("a@core#1.0.0"))
            .unwrap()
            .build();
        let err = build(uni, config).unwrap_err();
        assert!(
            matches!(&err, Error::UnresolvedTransitive(p) if p.name == "ghost"),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_patch_overlay_redirects_target_dir() {
        let tmp = TempDir::new().unwrap();
        let target_dir = write_pack(tmp.path(), "a@core#1.0.0", "");
        fs::create_dir_all(target_dir.join("packages/base")).unwrap();
        fs::write(target_dir.join("packages/base/package.toml"), "name = \"base\"\n").unwrap();

        let patch_dir = write_pack(
            tmp.path(),
            "a-fix@core#1.0.1",
            "[patch]\nfor = \"a@core#1.0.0\"\n",
        );
        fs::create_dir_all(patch_dir.join("packages/extra")).unwrap();
        fs::write(patch_dir.join("packages/extra/package.toml"), "name = \"extra\"\n").unwrap();
        fs::create_dir_all(patch_dir.join("resources")).unwrap();
        fs::write(patch_dir.join("resources/fix.txt"), "patched").unwrap();

        let uni = universe(tmp.path(), &["a@core#1.0.0", "a-fix@core#1.0.1"]);
        let config = ProvisioningConfig::builder()
            .with_direct(
                direct("a@core#1.0.0").with_patch(PackId::parse("a-fix@core#1.0.1").unwrap()),
            )
            .unwrap()
            .build();
        let (state, workdir) = build(uni, config).unwrap();

        let producer = Producer::new("core", "a");
        let pack = &state.packs[state.index[&producer]];
        assert_ne!(pack.dir(), target_dir.as_path());
        assert!(pack.dir().join("packages/base/package.toml").is_file());
        assert!(pack.dir().join("packages/extra/package.toml").is_file());
        // Shared patch content reaches the session aggregate too
        assert!(workdir.resources_dir().join("fix.txt").is_file());

        let target_id = PackId::parse("a@core#1.0.0").unwrap();
        assert_eq!(state.patches[&target_id].len(), 1);
    }

    #[test]
    fn test_patch_for_other_build_is_left_unapplied() {
        let tmp = TempDir::new().unwrap();
        let target_dir = write_pack(tmp.path(), "a@core#2.0.0", "");
        write_pack(
            tmp.path(),
            "a-fix@core#1.0.1",
            "[patch]\nfor = \"a@core#1.0.0\"\n",
        );
        let uni = universe(tmp.path(), &["a@core#2.0.0", "a-fix@core#1.0.1"]);

        let config = ProvisioningConfig::builder()
            .with_direct(
                direct("a@core#2.0.0").with_patch(PackId::parse("a-fix@core#1.0.1").unwrap()),
            )
            .unwrap()
            .build();
        let (state, _workdir) = build(uni, config).unwrap();

        let producer = Producer::new("core", "a");
        assert_eq!(state.packs[state.index[&producer]].dir(), target_dir.as_path());
    }

    #[test]
    fn test_non_patch_dependency_of_patch_is_rejected() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "a@core#1.0.0", "");
        write_pack(tmp.path(), "plain@core#1.0.0", "");
        write_pack(
            tmp.path(),
            "a-fix@core#1.0.1",
            "[patch]\nfor = \"a@core#1.0.0\"\n\n[[dependency]]\nlocation = \"plain@core#1.0.0\"\n",
        );
        let uni = universe(
            tmp.path(),
            &["a@core#1.0.0", "plain@core#1.0.0", "a-fix@core#1.0.1"],
        );

        let config = ProvisioningConfig::builder()
            .with_direct(
                direct("a@core#1.0.0").with_patch(PackId::parse("a-fix@core#1.0.1").unwrap()),
            )
            .unwrap()
            .build();
        let err = build(uni, config).unwrap_err();
        assert!(
            matches!(&err, Error::NotPatch(id) if id.to_string() == "plain@core#1.0.0"),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_family_exclusivity_fails_the_build() {
        let tmp = TempDir::new().unwrap();
        let family = "[family]\nname = \"web\"\n\n[[family.criteria]]\nname = \"servlet\"\n";
        write_pack(tmp.path(), "fp1@core#1.0.0", family);
        write_pack(tmp.path(), "fp2@core#1.0.0", family);
        let uni = universe(tmp.path(), &["fp1@core#1.0.0", "fp2@core#1.0.0"]);

        let config = ProvisioningConfig::builder()
            .with_direct(direct("fp1@core#1.0.0"))
            .unwrap()
            .with_direct(direct("fp2@core#1.0.0"))
            .unwrap()
            .build();
        let err = build(uni, config).unwrap_err();

        let Error::Family(errors) = err else {
            panic!("expected a family error, got {:?}", err);
        };
        assert!(errors
            .iter()
            .any(|e| e.contains("implemented by more than one feature-pack")
                && e.contains("fp1@core#1.0.0")
                && e.contains("fp2@core#1.0.0")));
    }
}
