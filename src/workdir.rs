// src/workdir.rs

//! Session working directories.
//!
//! Every layout build stages its intermediate state under one working
//! directory: aggregated plugin and resource subtrees, private patched
//! copies of feature-packs, and staged output. The directory is created
//! on demand, shared between layouts by `Arc`, and torn down when the
//! last reference drops. Rebuilding a layout resets the subtrees in
//! place so stale aggregates from a previous build cannot leak through.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::fsutil;
use crate::location::PackId;

pub const RESOURCES_DIR: &str = "resources";
pub const PLUGINS_DIR: &str = "plugins";
pub const PATCHED_DIR: &str = "patched";
pub const STAGED_DIR: &str = "staged";
pub const TMP_DIR: &str = "tmp";

const LOCK_FILE: &str = ".lock";

enum Root {
    /// Removed when the last handle drops
    Temp(TempDir),
    /// Caller-owned location, contents left behind on drop
    Fixed(PathBuf),
}

impl Root {
    fn path(&self) -> &Path {
        match self {
            Root::Temp(dir) => dir.path(),
            Root::Fixed(path) => path,
        }
    }
}

/// A locked, session-scoped working directory.
///
/// Constructed as `Arc<WorkDir>`; layouts sharing a session share the
/// handle, and the directory disappears with the last clone. The root
/// carries an exclusive advisory lock for the whole session so a second
/// engine cannot reuse it.
pub struct WorkDir {
    session: Uuid,
    root: Root,
    lock: fs::File,
}

impl WorkDir {
    /// Create a fresh temporary session directory
    pub fn session() -> Result<Arc<Self>> {
        let session = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("ashlar-{}-", session.simple()))
            .tempdir()
            .map_err(Error::Io)?;
        let workdir = Self::init(session, Root::Temp(dir))?;
        debug!(session = %workdir.session, path = %workdir.path().display(), "opened session workdir");
        Ok(Arc::new(workdir))
    }

    /// Open a session at a fixed location, creating it if needed.
    ///
    /// Unlike [`WorkDir::session`], the directory survives the handle;
    /// only the lock is released on drop.
    pub fn at(path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let path = path.into();
        fsutil::ensure_dir(&path)?;
        let workdir = Self::init(Uuid::new_v4(), Root::Fixed(path))?;
        debug!(session = %workdir.session, path = %workdir.path().display(), "opened fixed workdir");
        Ok(Arc::new(workdir))
    }

    fn init(session: Uuid, root: Root) -> Result<Self> {
        let lock_path = root.path().join(LOCK_FILE);
        let lock = fs::File::create(&lock_path).map_err(|e| Error::write(&lock_path, e))?;
        lock.try_lock_exclusive().map_err(|_| {
            Error::WorkDir(format!(
                "{} is in use by another session",
                root.path().display()
            ))
        })?;

        let workdir = Self {
            session,
            root,
            lock,
        };
        workdir.create_subtrees()?;
        Ok(workdir)
    }

    fn create_subtrees(&self) -> Result<()> {
        for name in [RESOURCES_DIR, PLUGINS_DIR, PATCHED_DIR, STAGED_DIR, TMP_DIR] {
            fsutil::ensure_dir(&self.path().join(name))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    /// Aggregated `resources/` subtrees from every resolved pack
    pub fn resources_dir(&self) -> PathBuf {
        self.path().join(RESOURCES_DIR)
    }

    /// Aggregated plugin subtrees from every resolved pack
    pub fn plugins_dir(&self) -> PathBuf {
        self.path().join(PLUGINS_DIR)
    }

    /// Staging area for provisioned output
    pub fn staged_dir(&self) -> PathBuf {
        self.path().join(STAGED_DIR)
    }

    /// Scratch space for callers and plugins
    pub fn tmp_dir(&self) -> PathBuf {
        self.path().join(TMP_DIR)
    }

    /// Private patched copy location for one feature-pack build
    pub fn patched_dir(&self, id: &PackId) -> PathBuf {
        self.path().join(PATCHED_DIR).join(format!(
            "{}-{}",
            fsutil::sanitize_component(&id.producer.name),
            fsutil::sanitize_component(&id.build)
        ))
    }

    /// Drop the state of a previous build, keeping the session alive.
    ///
    /// Every subtree is recreated empty; the lock is untouched.
    pub fn reset(&self) -> Result<()> {
        debug!(session = %self.session, "resetting session workdir");
        for name in [RESOURCES_DIR, PLUGINS_DIR, PATCHED_DIR, STAGED_DIR, TMP_DIR] {
            fsutil::recreate_dir(&self.path().join(name))?;
        }
        Ok(())
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock);
    }
}

impl std::fmt::Debug for WorkDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkDir")
            .field("session", &self.session)
            .field("path", &self.path())
            .finish()
    }
}
