// src/cli.rs
//! CLI definitions and command handlers for the ashlar binary.
//!
//! Clap definitions, the indicatif-backed progress display, and the
//! command handlers all live here; `main.rs` only parses and dispatches.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle as BarStyle};
use tracing::info;

use ashlar::config::{PackConfig, ProvisioningConfig, CONFIG_FILE};
use ashlar::layout::{Layout, LayoutBuilder};
use ashlar::location::{PackId, PackLocation, Producer};
use ashlar::plan::ProvisioningPlan;
use ashlar::universe::{Catalog, PackCache};
use ashlar::workdir::WorkDir;
use ashlar::{ProgressStyle, ProgressTracker};

#[derive(Parser)]
#[command(name = "ashlar")]
#[command(author = "Ashlar Contributors")]
#[command(version)]
#[command(about = "Feature-pack provisioning with layout resolution and patch overlays", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the configured layout and report its contents
    Provision {
        /// Installation directory holding provisioning.toml
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Catalog root directory (default: the per-user catalog)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Provisioning option override (repeatable)
        #[arg(short = 'o', long = "option", value_name = "NAME=VALUE")]
        options: Vec<String>,

        /// Keep the session working directory at this path
        #[arg(long, value_name = "PATH")]
        workdir: Option<PathBuf>,
    },

    /// Install a feature-pack, or attach a patch to its target
    Install {
        /// Feature-pack location (name@universe[:channel][#build])
        location: String,

        /// Installation directory holding provisioning.toml
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Catalog root directory (default: the per-user catalog)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Configure the pack as a transitive dependency
        #[arg(long)]
        transitive: bool,

        /// Package include pattern (repeatable)
        #[arg(long = "include", value_name = "PATTERN")]
        include: Vec<String>,

        /// Package exclude pattern (repeatable)
        #[arg(long = "exclude", value_name = "PATTERN")]
        exclude: Vec<String>,

        /// Provisioning option override (repeatable)
        #[arg(short = 'o', long = "option", value_name = "NAME=VALUE")]
        options: Vec<String>,
    },

    /// Remove an installed feature-pack or detach a patch
    Uninstall {
        /// Feature-pack or patch to remove (name@universe[#build])
        id: String,

        /// Installation directory holding provisioning.toml
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Catalog root directory (default: the per-user catalog)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Check for and apply feature-pack updates
    Update {
        /// Producers to update (default: every configured producer)
        producers: Vec<String>,

        /// Installation directory holding provisioning.toml
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Catalog root directory (default: the per-user catalog)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Report available updates without applying them
        #[arg(long)]
        check: bool,

        /// Print available updates as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register a feature-pack archive or directory with the catalog
    AddLocal {
        /// Path to a .tar.gz archive or an unpacked feature-pack directory
        path: PathBuf,

        /// Catalog root directory (default: the per-user catalog)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Channel to tag the build with (repeatable)
        #[arg(long = "channel", value_name = "NAME")]
        channels: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a parsed command line
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Provision {
            dir,
            catalog,
            options,
            workdir,
        }) => cmd_provision(&dir, catalog, &options, workdir),
        Some(Commands::Install {
            location,
            dir,
            catalog,
            transitive,
            include,
            exclude,
            options,
        }) => cmd_install(
            &location, &dir, catalog, transitive, &include, &exclude, &options,
        ),
        Some(Commands::Uninstall { id, dir, catalog }) => cmd_uninstall(&id, &dir, catalog),
        Some(Commands::Update {
            producers,
            dir,
            catalog,
            check,
            json,
        }) => cmd_update(&producers, &dir, catalog, check, json),
        Some(Commands::AddLocal {
            path,
            catalog,
            channels,
        }) => cmd_add_local(&path, catalog, &channels),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "ashlar", &mut std::io::stdout());
            Ok(())
        }
        None => {
            println!("Ashlar Provisioning v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'ashlar --help' for usage information");
            Ok(())
        }
    }
}

fn cmd_provision(
    dir: &Path,
    catalog: Option<PathBuf>,
    options: &[String],
    workdir: Option<PathBuf>,
) -> Result<()> {
    let cache = open_cache(catalog)?;
    let config = load_config(dir)?;
    let overrides = parse_overrides(options)?;

    let mut builder = LayoutBuilder::new(cache, config)
        .with_progress(Arc::new(CliProgress::new("Resolving feature-packs")));
    for (name, value) in overrides {
        builder = builder.with_option(name, value);
    }
    let keep = workdir.is_some();
    if let Some(path) = workdir {
        builder = builder.with_workdir(WorkDir::at(path)?);
    }
    let layout = builder.build()?;

    print_layout(&layout);
    if keep {
        println!(
            "session {} kept at {}",
            layout.workdir().session_id(),
            layout.workdir().path().display()
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_install(
    location: &str,
    dir: &Path,
    catalog: Option<PathBuf>,
    transitive: bool,
    include: &[String],
    exclude: &[String],
    options: &[String],
) -> Result<()> {
    let target: PackLocation = location
        .parse()
        .with_context(|| format!("invalid feature-pack location '{}'", location))?;

    let cache = open_cache(catalog)?;
    let config = load_or_default_config(dir)?;
    let overrides = parse_overrides(options)?;

    let mut pack = if transitive {
        PackConfig::new_transitive(target)
    } else {
        PackConfig::new(target)
    };
    for pattern in include {
        pack = pack.with_included_package(pattern);
    }
    for pattern in exclude {
        pack = pack.with_excluded_package(pattern);
    }

    let mut builder = LayoutBuilder::new(cache, config)
        .with_progress(Arc::new(CliProgress::new("Resolving feature-packs")));
    for (name, value) in overrides {
        builder = builder.with_option(name, value);
    }
    let mut layout = builder.build()?;

    layout.install(pack)?;
    store_config(dir, layout.config())?;

    info!(config = %config_path(dir).display(), "configuration updated");
    println!("Installed {}", location);
    println!(
        "Layout now holds {} feature-pack(s) ({} direct)",
        layout.resolved_packs().len(),
        layout.config().direct().len()
    );
    Ok(())
}

fn cmd_uninstall(id: &str, dir: &Path, catalog: Option<PathBuf>) -> Result<()> {
    let location: PackLocation = id
        .parse()
        .with_context(|| format!("invalid feature-pack id '{}'", id))?;

    let cache = open_cache(catalog)?;
    let config = load_config(dir)?;

    let mut layout = LayoutBuilder::new(cache, config)
        .with_progress(Arc::new(CliProgress::new("Resolving feature-packs")))
        .build()?;

    let target = resolve_target(&layout, &location)?;
    layout.uninstall(&target)?;
    store_config(dir, layout.config())?;

    println!("Uninstalled {}", target);
    Ok(())
}

fn cmd_update(
    producers: &[String],
    dir: &Path,
    catalog: Option<PathBuf>,
    check: bool,
    json: bool,
) -> Result<()> {
    let cache = open_cache(catalog)?;
    let config = load_config(dir)?;

    let mut layout = LayoutBuilder::new(cache, config)
        .with_progress(Arc::new(CliProgress::new("Resolving feature-packs")))
        .build()?;

    let producers: Vec<Producer> = producers
        .iter()
        .map(|p| {
            p.parse::<Producer>()
                .with_context(|| format!("invalid producer '{}'", p))
        })
        .collect::<Result<_>>()?;

    let updates = if producers.is_empty() {
        layout.updates()?
    } else {
        layout.updates_for(&producers)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&updates)?);
    } else if updates.is_empty() {
        println!("Everything is up to date");
    } else {
        for update in &updates {
            if update.is_patch_only() {
                println!(
                    "{}: patch set changes ({} patch(es))",
                    update.producer,
                    update.patches.len()
                );
            } else {
                println!(
                    "{}: {} -> {}",
                    update.producer, update.installed.build, update.updated.build
                );
            }
        }
    }

    if check || updates.is_empty() {
        return Ok(());
    }

    let mut plan = ProvisioningPlan::new();
    for update in updates {
        plan.update(update)?;
    }
    layout.apply_plan(&plan)?;
    store_config(dir, layout.config())?;

    println!("Updated {} feature-pack(s)", plan.len());
    Ok(())
}

fn cmd_add_local(path: &Path, catalog: Option<PathBuf>, channels: &[String]) -> Result<()> {
    let root = catalog.unwrap_or_else(Catalog::default_root);
    let catalog = Catalog::open(&root)
        .with_context(|| format!("failed to open catalog at {}", root.display()))?;

    let id = if path.is_dir() {
        catalog.add_local_dir(path, channels)?
    } else {
        catalog.add_local(path, channels)?
    };
    println!("Registered {}", id);
    Ok(())
}

fn open_cache(catalog: Option<PathBuf>) -> Result<Arc<PackCache>> {
    let root = catalog.unwrap_or_else(Catalog::default_root);
    let catalog = Catalog::open(&root)
        .with_context(|| format!("failed to open catalog at {}", root.display()))?;
    Ok(Arc::new(PackCache::new(Arc::new(catalog))))
}

fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

fn load_config(dir: &Path) -> Result<ProvisioningConfig> {
    let path = config_path(dir);
    if !path.is_file() {
        bail!("no {} in {}", CONFIG_FILE, dir.display());
    }
    Ok(ProvisioningConfig::load(&path)?)
}

fn load_or_default_config(dir: &Path) -> Result<ProvisioningConfig> {
    let path = config_path(dir);
    if path.is_file() {
        Ok(ProvisioningConfig::load(&path)?)
    } else {
        Ok(ProvisioningConfig::default())
    }
}

fn store_config(dir: &Path, config: &ProvisioningConfig) -> Result<()> {
    config.store(&config_path(dir))?;
    Ok(())
}

fn parse_overrides(options: &[String]) -> Result<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    for option in options {
        let (name, value) = option
            .split_once('=')
            .with_context(|| format!("option '{}' is not NAME=VALUE", option))?;
        parsed.insert(name.to_string(), value.to_string());
    }
    Ok(parsed)
}

/// Resolve a possibly buildless id against the current layout.
///
/// Accepts a full feature-pack id, the producer of a resolved pack, or
/// the producer of an attached patch.
fn resolve_target(layout: &Layout, location: &PackLocation) -> Result<PackId> {
    if let Some(id) = location.id() {
        return Ok(id);
    }
    if let Some(pack) = layout.pack(&location.producer) {
        return Ok(pack.id().clone());
    }
    let attached = layout
        .config()
        .direct()
        .iter()
        .chain(layout.config().transitive())
        .flat_map(|edge| edge.patches.iter())
        .find(|patch| patch.producer == location.producer);
    match attached {
        Some(id) => Ok(id.clone()),
        None => bail!("{} is not part of the installation", location.producer),
    }
}

fn print_layout(layout: &Layout) {
    println!(
        "{} feature-pack(s) in the layout:",
        layout.resolved_packs().len()
    );
    for pack in layout.resolved_packs() {
        println!("  {:<10} {}", pack.origin().to_string(), pack.id());
        for patch in layout.patches_for(pack.id()) {
            println!("             + patch {}", patch.id());
        }
    }
    if !layout.registry().is_empty() {
        println!("plugins:");
        for plugin in layout.registry().plugins() {
            println!("  {} ({})", plugin.name, plugin.capability);
        }
    }
    let options = layout.options().effective();
    if !options.is_empty() {
        println!("options:");
        for (name, value) in options {
            println!("  {} = {}", name, value);
        }
    }
    if !layout.system_paths().is_empty() {
        println!("system paths: {}", layout.system_paths().len());
    }
}

/// Progress display for terminal sessions.
///
/// An overall line counts finished feature-packs while a spinner below
/// names the pack currently being expanded. The engine reuses one
/// tracker across rebuild passes, so a finished display re-arms itself
/// when the next pass starts.
pub struct CliProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
}

impl CliProgress {
    pub fn new(operation: &str) -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new_spinner();
        overall.set_style(
            BarStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .expect("Invalid spinner template"),
        );
        overall.set_message(operation.to_string());
        overall.enable_steady_tick(Duration::from_millis(100));

        let status = ProgressBar::new_spinner();
        status.set_style(
            BarStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .expect("Invalid spinner template"),
        );
        status.enable_steady_tick(Duration::from_millis(100));

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            multi,
            overall,
            status,
        }
    }

    fn rearm(&self) {
        if self.overall.is_finished() {
            self.overall.reset();
            self.overall.enable_steady_tick(Duration::from_millis(100));
            self.status.reset();
            self.status.enable_steady_tick(Duration::from_millis(100));
        }
    }
}

impl ProgressTracker for CliProgress {
    fn set_message(&self, message: &str) {
        self.rearm();
        self.status.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.rearm();
        self.overall.inc(amount);
    }

    fn set_position(&self, position: u64) {
        self.rearm();
        self.overall.set_position(position);
    }

    fn set_length(&self, length: u64) {
        self.rearm();
        self.overall.set_length(length);
        self.overall.set_style(
            BarStyle::default_bar()
                .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
                .expect("Invalid progress bar template")
                .progress_chars("##-"),
        );
    }

    fn position(&self) -> u64 {
        self.overall.position()
    }

    fn length(&self) -> u64 {
        self.overall.length().unwrap_or(0)
    }

    fn finish_with_message(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.abandon_with_message(message.to_string());
    }

    fn is_finished(&self) -> bool {
        self.overall.is_finished()
    }

    fn child(&self, message: &str, length: u64, style: ProgressStyle) -> Box<dyn ProgressTracker> {
        attach_child(&self.multi, message, length, style)
    }
}

/// A sub-bar below the overall display, for nested operations
struct CliChildProgress {
    multi: MultiProgress,
    bar: ProgressBar,
}

fn attach_child(
    multi: &MultiProgress,
    message: &str,
    length: u64,
    style: ProgressStyle,
) -> Box<dyn ProgressTracker> {
    let bar = match style {
        ProgressStyle::Bar => {
            let bar = ProgressBar::new(length);
            bar.set_style(
                BarStyle::default_bar()
                    .template("    {msg} [{bar:30.blue/dim}] {pos}/{len}")
                    .expect("Invalid progress bar template")
                    .progress_chars("=>-"),
            );
            bar
        }
        ProgressStyle::Spinner => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                BarStyle::default_spinner()
                    .template("    {spinner:.cyan} {msg}")
                    .expect("Invalid spinner template"),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        }
    };
    bar.set_message(message.to_string());
    let bar = multi.add(bar);
    Box::new(CliChildProgress {
        multi: multi.clone(),
        bar,
    })
}

impl ProgressTracker for CliChildProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn set_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn length(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }

    fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }

    fn child(&self, message: &str, length: u64, style: ProgressStyle) -> Box<dyn ProgressTracker> {
        attach_child(&self.multi, message, length, style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides_splits_on_first_equals() {
        let parsed = parse_overrides(&[
            "cleanup-unknown-options=true".to_string(),
            "note=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed.get("cleanup-unknown-options").unwrap(), "true");
        assert_eq!(parsed.get("note").unwrap(), "a=b");
    }

    #[test]
    fn test_parse_overrides_rejects_bare_name() {
        assert!(parse_overrides(&["cleanup".to_string()]).is_err());
    }

    #[test]
    fn test_cli_progress_rearms_after_finish() {
        let progress = CliProgress::new("Resolving");
        progress.increment(2);
        progress.finish_with_message("done");
        assert!(progress.is_finished());

        progress.increment(1);
        assert!(!progress.is_finished());
        assert_eq!(progress.position(), 1);
    }

    #[test]
    fn test_cli_parses_install_flags() {
        let cli = Cli::try_parse_from([
            "ashlar",
            "install",
            "web@core:stable",
            "--transitive",
            "--include",
            "docs*",
            "-o",
            "export-system-paths=true",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Install {
                location,
                transitive,
                include,
                options,
                ..
            }) => {
                assert_eq!(location, "web@core:stable");
                assert!(transitive);
                assert_eq!(include, vec!["docs*".to_string()]);
                assert_eq!(options, vec!["export-system-paths=true".to_string()]);
            }
            _ => panic!("expected install command"),
        }
    }
}
