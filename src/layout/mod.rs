// src/layout/mod.rs

//! Resolved provisioning layouts and the transactions that evolve them.
//!
//! A [`Layout`] is built from a [`ProvisioningConfig`] by resolving the
//! full feature-pack dependency graph to one build per producer,
//! materializing patch overlays, and aggregating shared resources and
//! plugins into a session working directory. Once built, the layout
//! accepts configuration edits: [`Layout::install`],
//! [`Layout::uninstall`], and [`Layout::apply_plan`] each derive a new
//! configuration and rebuild the whole graph from it. The in-memory
//! state is swapped only after the rebuild succeeds, so a failing edit
//! never leaves a half-applied configuration behind.
//!
//! Cloning a layout shares its working directory and mount cache; the
//! on-disk session root is torn down when the last clone goes away.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(PackCache::new(universe));
//! let config = ProvisioningConfig::builder()
//!     .with_direct(PackConfig::new("app@galaxy#1.0.0".parse()?))?
//!     .build();
//! let mut layout = LayoutBuilder::new(cache, config).build()?;
//! layout.install(PackConfig::new("metrics@galaxy".parse()?))?;
//! layout.config().store(&config_path)?;
//! ```

mod builder;

pub use builder::SYSTEM_PATHS_FILE;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strum_macros::Display;
use tracing::{debug, info};

use crate::config::{PackConfig, ProvisioningConfig, ProvisioningConfigBuilder};
use crate::error::{Error, Result};
use crate::location::{PackId, Producer};
use crate::options::ValidatedOptions;
use crate::plan::ProvisioningPlan;
use crate::plugin::PluginRegistry;
use crate::progress::{ProgressTracker, SilentProgress};
use crate::spec::{PackSpec, PackageSpec};
use crate::universe::{PackCache, PackUpdate};
use crate::workdir::WorkDir;

/// How a resolved feature-pack entered the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum PackOrigin {
    /// Listed in the provisioning configuration
    Direct,
    /// Pulled in through another feature-pack's dependencies
    Transitive,
    /// Loaded as a patch attached to a configured edge
    Patch,
}

/// One feature-pack resolved into a layout.
///
/// Carries the identity, the directory its content is read from, and
/// the parsed descriptor. The directory starts at the cache mount and
/// is redirected to a private patched copy when patches apply.
#[derive(Debug, Clone)]
pub struct ResolvedPack {
    id: PackId,
    dir: PathBuf,
    spec: PackSpec,
    origin: PackOrigin,
}

impl ResolvedPack {
    pub(crate) fn new(id: PackId, dir: PathBuf, spec: PackSpec, origin: PackOrigin) -> Self {
        Self {
            id,
            dir,
            spec,
            origin,
        }
    }

    pub fn id(&self) -> &PackId {
        &self.id
    }

    /// Directory the pack's content is served from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn spec(&self) -> &PackSpec {
        &self.spec
    }

    pub fn origin(&self) -> PackOrigin {
        self.origin
    }

    pub fn is_patch(&self) -> bool {
        matches!(self.origin, PackOrigin::Patch)
    }

    pub(crate) fn redirect(&mut self, dir: PathBuf) {
        self.dir = dir;
    }
}

/// Builder for the initial [`Layout`] of a session.
pub struct LayoutBuilder {
    cache: Arc<PackCache>,
    config: ProvisioningConfig,
    workdir: Option<Arc<WorkDir>>,
    progress: Arc<dyn ProgressTracker>,
    overrides: BTreeMap<String, String>,
}

impl LayoutBuilder {
    pub fn new(cache: Arc<PackCache>, config: ProvisioningConfig) -> Self {
        Self {
            cache,
            config,
            workdir: None,
            progress: Arc::new(SilentProgress::new()),
            overrides: BTreeMap::new(),
        }
    }

    /// Use an existing working directory instead of a fresh session one
    pub fn with_workdir(mut self, workdir: Arc<WorkDir>) -> Self {
        self.workdir = Some(workdir);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Session-level option override, applied on top of persisted options
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Layout> {
        let workdir = match self.workdir {
            Some(workdir) => workdir,
            None => WorkDir::session()?,
        };
        let state = build_pass(
            &self.cache,
            &workdir,
            self.config,
            &self.overrides,
            self.progress.as_ref(),
        )?;
        Ok(Layout {
            cache: self.cache,
            workdir,
            progress: self.progress,
            overrides: self.overrides,
            config: state.config,
            packs: state.packs,
            index: state.index,
            patches: state.patches,
            registry: state.registry,
            options: state.options,
            system_paths: state.system_paths,
        })
    }
}

/// One full resolution pass over a fresh working directory
fn build_pass(
    cache: &PackCache,
    workdir: &WorkDir,
    config: ProvisioningConfig,
    overrides: &BTreeMap<String, String>,
    progress: &dyn ProgressTracker,
) -> Result<builder::LayoutState> {
    workdir.reset()?;
    match builder::build_state(cache, workdir, config, overrides, progress) {
        Ok(state) => {
            progress.finish_with_message(&format!("{} feature-packs resolved", state.packs.len()));
            Ok(state)
        }
        Err(e) => {
            progress.finish_with_error(&e.to_string());
            Err(e)
        }
    }
}

/// A fully resolved provisioning session.
///
/// Owns the resolved configuration, the ordered feature-pack list (a
/// pack's dependencies precede it, configured roots come last), the
/// patch index, discovered plugins, and the validated option view.
/// The working directory and mount cache are shared handles, so
/// layouts are cheap to clone and clones see the same on-disk session.
///
/// Transactions rebuild the whole graph; any error from
/// [`Layout::install`], [`Layout::uninstall`], [`Layout::apply_plan`],
/// or [`Layout::rebuild`] that occurs after the working directory was
/// reset leaves the previously staged content discarded. The
/// configuration itself is never half-applied, but callers should
/// treat a layout whose transaction failed as unusable and discard it.
#[derive(Clone)]
pub struct Layout {
    cache: Arc<PackCache>,
    workdir: Arc<WorkDir>,
    progress: Arc<dyn ProgressTracker>,
    overrides: BTreeMap<String, String>,
    config: ProvisioningConfig,
    packs: Vec<ResolvedPack>,
    index: BTreeMap<Producer, usize>,
    patches: BTreeMap<PackId, Vec<ResolvedPack>>,
    registry: PluginRegistry,
    options: ValidatedOptions,
    system_paths: Vec<String>,
}

impl Layout {
    /// The configuration as of the last successful build, with resolved
    /// builds folded into its edges
    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Resolved feature-packs in dependency order
    pub fn resolved_packs(&self) -> &[ResolvedPack] {
        &self.packs
    }

    pub fn pack(&self, producer: &Producer) -> Option<&ResolvedPack> {
        self.index.get(producer).map(|i| &self.packs[*i])
    }

    /// Patches applied to the given resolved identity, in arrival order
    pub fn patches_for(&self, id: &PackId) -> &[ResolvedPack] {
        self.patches.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Plugins discovered in the session's aggregated plugins directory
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Validated options: defaults, persisted values, session overrides
    pub fn options(&self) -> &ValidatedOptions {
        &self.options
    }

    /// System paths declared by the resolved feature-packs, sorted
    pub fn system_paths(&self) -> &[String] {
        &self.system_paths
    }

    pub fn workdir(&self) -> &Arc<WorkDir> {
        &self.workdir
    }

    pub fn cache(&self) -> &Arc<PackCache> {
        &self.cache
    }

    /// Package names staged for one resolved feature-pack: the
    /// descriptor's defaults plus the edge's explicit includes, minus
    /// excludes, closed over package dependencies. Packages without a
    /// descriptor file are treated as content-only and kept as leaves.
    pub fn effective_packages(&self, producer: &Producer) -> Result<BTreeSet<String>> {
        let pack = self
            .pack(producer)
            .ok_or_else(|| Error::UnknownProducer(producer.clone()))?;
        let filter = self
            .config
            .find(producer)
            .map(|edge| edge.packages.clone())
            .unwrap_or_default();

        let mut queue: Vec<String> = pack
            .spec()
            .default_packages()
            .iter()
            .filter(|name| filter.selects(name.as_str(), true))
            .cloned()
            .collect();
        // Explicit includes may select packages outside the default set
        let packages_root = pack.dir().join("packages");
        if !filter.include.is_empty() && packages_root.is_dir() {
            let entries =
                fs::read_dir(&packages_root).map_err(|e| Error::read(&packages_root, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::read(&packages_root, e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if PackageSpec::exists(pack.dir(), &name)
                    && !pack.spec().default_packages().contains(&name)
                    && filter.selects(&name, false)
                {
                    queue.push(name);
                }
            }
        }

        let mut selected = BTreeSet::new();
        while let Some(name) = queue.pop() {
            if !selected.insert(name.clone()) {
                continue;
            }
            if !PackageSpec::exists(pack.dir(), &name) {
                continue;
            }
            let package = PackageSpec::load(pack.dir(), &name)?;
            for dep in &package.dependencies {
                if !selected.contains(dep) && filter.selects(dep, true) {
                    queue.push(dep.clone());
                }
            }
        }
        Ok(selected)
    }

    /// Add a feature-pack or patch to the configuration and rebuild.
    ///
    /// An unresolved location is pinned to its latest build first. A
    /// patch attaches to its target's configured edge (or a new
    /// transitive edge when the target has none); installing a patch
    /// that is already attached fails. Reinstalling a configured
    /// feature-pack replaces its edge, flipping it between the direct
    /// and transitive lists when the new edge says so.
    pub fn install(&mut self, pack: PackConfig) -> Result<()> {
        info!(location = %pack.location, "install");
        let config = self.installed_config(self.config.clone(), pack)?;
        self.rebuild_with(config)
    }

    /// Remove a feature-pack or detach a patch, then rebuild.
    ///
    /// Removing the last direct dependency also clears all transitive
    /// pins and options, since nothing references them anymore.
    pub fn uninstall(&mut self, id: &PackId) -> Result<()> {
        info!(pack = %id, "uninstall");
        let config = self.uninstalled_config(self.config.clone(), id)?;
        self.rebuild_with(config)
    }

    /// Apply a provisioning plan as one transaction.
    ///
    /// Updates are folded into the configuration first (rewriting
    /// configured edges, pinning unconfigured producers as new
    /// transitive edges), then installs, then uninstalls, and the
    /// resulting configuration is rebuilt once.
    pub fn apply_plan(&mut self, plan: &ProvisioningPlan) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        info!(steps = plan.len(), "applying provisioning plan");
        let mut config = self.config.clone();
        for update in plan.updates() {
            config = self.updated_config(config, update)?;
        }
        for pack in plan.installs() {
            config = self.installed_config(config, pack.clone())?;
        }
        for id in plan.uninstalls() {
            config = self.uninstalled_config(config, id)?;
        }
        self.rebuild_with(config)
    }

    /// Re-resolve the current configuration from scratch
    pub fn rebuild(&mut self) -> Result<()> {
        let config = self.config.clone();
        self.rebuild_with(config)
    }

    /// Update plans for every resolved feature-pack
    pub fn updates(&self) -> Result<Vec<PackUpdate>> {
        let producers: Vec<Producer> = self.index.keys().cloned().collect();
        self.updates_for(&producers)
    }

    /// Update plans for the given producers; producers with nothing to
    /// update contribute no entry
    pub fn updates_for(&self, producers: &[Producer]) -> Result<Vec<PackUpdate>> {
        let mut plans = Vec::new();
        for producer in producers {
            let Some(pack) = self.pack(producer) else {
                return Err(Error::UnknownProducer(producer.clone()));
            };
            let patches: Vec<PackId> = self
                .patches_for(pack.id())
                .iter()
                .map(|patch| patch.id().clone())
                .collect();
            let transitive = self.config.find_direct(producer).is_none();
            if let Some(update) =
                self.cache
                    .update_plan(producer, &pack.id().build, &patches, transitive)?
            {
                plans.push(update);
            }
        }
        Ok(plans)
    }

    /// Aggregate the available updates for the given producers into a
    /// plan ready for [`Layout::apply_plan`]
    pub fn update_plan(&self, producers: &[Producer]) -> Result<ProvisioningPlan> {
        let mut plan = ProvisioningPlan::new();
        for update in self.updates_for(producers)? {
            plan.update(update)?;
        }
        Ok(plan)
    }

    /// Release this handle on the session.
    ///
    /// Dropping the layout does the same; `close` only makes the
    /// release point explicit. The working directory is torn down with
    /// the last layout sharing it.
    pub fn close(self) {}

    fn rebuild_with(&mut self, config: ProvisioningConfig) -> Result<()> {
        let state = build_pass(
            &self.cache,
            &self.workdir,
            config,
            &self.overrides,
            self.progress.as_ref(),
        )?;
        self.config = state.config;
        self.packs = state.packs;
        self.index = state.index;
        self.patches = state.patches;
        self.registry = state.registry;
        self.options = state.options;
        self.system_paths = state.system_paths;
        Ok(())
    }

    fn installed_config(
        &self,
        config: ProvisioningConfig,
        mut pack: PackConfig,
    ) -> Result<ProvisioningConfig> {
        let id = match pack.location.id() {
            Some(id) => id,
            None => {
                let id = self.cache.latest_build(&pack.location)?;
                pack.location = pack.location.resolved(&id.build);
                id
            }
        };
        let dir = self.cache.dir(&id)?;
        let spec = PackSpec::load(&dir)?;
        if spec.is_patch() {
            let target = spec
                .patch_for()
                .cloned()
                .ok_or_else(|| Error::NotPatch(id.clone()))?;
            return self.patch_attached(config, id, target);
        }

        debug!(pack = %id, "installing feature-pack");
        let producer = id.producer.clone();
        let mut builder = config.to_builder();
        let had_direct = builder.direct().iter().any(|e| e.producer() == &producer);
        let had_transitive = builder
            .transitive()
            .iter()
            .any(|e| e.producer() == &producer);

        if pack.transitive {
            if had_direct {
                debug!(%producer, "demoting direct dependency to a transitive pin");
                builder.remove_direct(&producer);
            }
            if had_transitive {
                builder.replace(pack)?;
            } else {
                builder.add_transitive(pack)?;
            }
            return Ok(builder.build());
        }

        if had_direct {
            builder.replace(pack)?;
            return Ok(builder.build());
        }
        if had_transitive {
            debug!(%producer, "promoting transitive pin to a direct dependency");
            builder.remove_transitive(&producer);
        }
        match self.direct_insert_index(&builder, &producer) {
            Some(index) => builder.insert_direct(index, pack)?,
            None => builder.add_direct(pack)?,
        };
        Ok(builder.build())
    }

    /// Attach a patch to its target's configured edge, adding a
    /// transitive edge for the target when it has none.
    fn patch_attached(
        &self,
        config: ProvisioningConfig,
        patch: PackId,
        target: PackId,
    ) -> Result<ProvisioningConfig> {
        let Some(installed) = self.pack(&target.producer) else {
            return Err(Error::PatchTargetMissing { patch, target });
        };
        if installed.id() != &target {
            return Err(Error::Config(format!(
                "patch {} applies to {} but {} is installed",
                patch,
                target,
                installed.id()
            )));
        }
        info!(patch = %patch, target = %target, "attaching patch");
        let mut builder = config.to_builder();
        match builder.find_mut(&target.producer) {
            Some(edge) => {
                if edge.patches.contains(&patch) {
                    return Err(Error::AlreadyInstalled(patch));
                }
                edge.patches.push(patch);
            }
            None => {
                builder
                    .add_transitive(PackConfig::new_transitive(target.location()).with_patch(patch))?;
            }
        }
        Ok(builder.build())
    }

    fn uninstalled_config(
        &self,
        config: ProvisioningConfig,
        id: &PackId,
    ) -> Result<ProvisioningConfig> {
        let mut builder = config.to_builder();

        // A patch uninstall detaches the id from the edge carrying it
        let carrier = config
            .direct()
            .iter()
            .chain(config.transitive())
            .find(|edge| edge.patches.contains(id))
            .map(|edge| edge.producer().clone());
        if let Some(producer) = carrier {
            info!(patch = %id, target = %producer, "detaching patch");
            let edge = builder
                .find_mut(&producer)
                .ok_or_else(|| Error::Config(format!("no configured edge for {}", producer)))?;
            edge.patches.retain(|p| p != id);
            let bare = edge.transitive
                && edge.patches.is_empty()
                && edge.packages.is_empty()
                && edge.family.is_none()
                && edge.configs.is_empty();
            if bare {
                // The edge existed only to carry the patch
                builder.remove_transitive(&producer);
            }
            return Ok(builder.build());
        }

        let producer = &id.producer;
        let Some(installed) = self.pack(producer) else {
            return Err(Error::UnknownProducer(producer.clone()));
        };
        if installed.id() != id {
            return Err(Error::Config(format!(
                "{} is not installed; the layout has {}",
                id,
                installed.id()
            )));
        }
        debug!(pack = %id, "uninstalling feature-pack");
        if builder.remove_direct(producer).is_none() {
            return Err(Error::Config(format!(
                "{} is not a direct dependency; it is required by other feature-packs",
                producer
            )));
        }
        if builder.direct().is_empty() {
            builder.clear_transitive().clear_options();
        }
        Ok(builder.build())
    }

    fn updated_config(
        &self,
        config: ProvisioningConfig,
        update: &PackUpdate,
    ) -> Result<ProvisioningConfig> {
        let producer = &update.producer;
        let mut builder = config.to_builder();
        if let Some(edge) = builder.find_mut(producer) {
            let current = edge.location.id();
            if current.as_ref() != Some(&update.installed) {
                return Err(Error::UpdateMismatch {
                    producer: producer.clone(),
                    recorded: update.installed.build.clone(),
                    installed: current
                        .map(|id| id.build)
                        .unwrap_or_else(|| edge.location.to_string()),
                });
            }
            debug!(%producer, from = %update.installed, to = %update.updated, "updating configured edge");
            edge.location = edge.location.resolved(&update.updated.build);
            edge.patches = update.patches.clone();
            return Ok(builder.build());
        }

        // Not configured: the update pins a resolved transitive dependency
        let Some(installed) = self.pack(producer) else {
            return Err(Error::UnknownProducer(producer.clone()));
        };
        if installed.id() != &update.installed {
            return Err(Error::UpdateMismatch {
                producer: producer.clone(),
                recorded: update.installed.build.clone(),
                installed: installed.id().build.clone(),
            });
        }
        debug!(%producer, to = %update.updated, "pinning updated transitive dependency");
        let mut edge = PackConfig::new_transitive(update.updated.location());
        edge.patches = update.patches.clone();
        builder.add_transitive(edge)?;
        Ok(builder.build())
    }

    /// Earliest index among existing direct edges whose pack already
    /// depends on `producer`, keeping the serialized order a usable
    /// topological hint.
    fn direct_insert_index(
        &self,
        builder: &ProvisioningConfigBuilder,
        producer: &Producer,
    ) -> Option<usize> {
        builder
            .direct()
            .iter()
            .position(|edge| self.depends_on(edge.producer(), producer))
    }

    /// Whether `from`'s resolved descriptor reaches `target` through
    /// direct dependency edges
    fn depends_on(&self, from: &Producer, target: &Producer) -> bool {
        let mut seen: BTreeSet<Producer> = BTreeSet::new();
        let mut queue = vec![from.clone()];
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(pack) = self.pack(&current) else {
                continue;
            };
            for dep in pack.spec().deps() {
                if dep.producer() == target {
                    return true;
                }
                queue.push(dep.producer().clone());
            }
        }
        false
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("session", &self.workdir.session_id())
            .field("packs", &self.packs.len())
            .field("patches", &self.patches.len())
            .finish_non_exhaustive()
    }
}
