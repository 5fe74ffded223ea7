// src/error.rs

//! Crate-wide error and result types.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use thiserror::Error;

use crate::location::{LocationError, PackId, PackLocation, Producer};

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while resolving, patching, or reconfiguring a layout
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed coordinate text
    #[error(transparent)]
    Location(#[from] LocationError),

    /// Uncontextualized I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Copy failure carrying both endpoints
    #[error("failed to copy {} to {}: {source}", .src.display(), .dst.display())]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A descriptor file failed to parse
    #[error("failed to parse {}: {source}", .path.display())]
    ParseDescriptor {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A descriptor parsed but violates a structural rule
    #[error("invalid descriptor {}: {reason}", .path.display())]
    InvalidDescriptor { path: PathBuf, reason: String },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: Box<toml::ser::Error>,
    },

    /// The catalog has no entry for a resolved identity
    #[error("feature-pack {0} not found in the catalog")]
    UnknownPack(PackId),

    /// Latest-build resolution found nothing to pick from
    #[error("no build of {0} is available")]
    NoBuilds(PackLocation),

    /// A catalog store or archive problem outside plain I/O
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Same producer reached at diverging builds with no transitive pin
    #[error("feature-pack version conflicts: {}", render_conflicts(.0))]
    VersionConflict(BTreeMap<Producer, BTreeSet<PackId>>),

    /// A transitive dependency never received a build
    #[error("unresolved build for transitive dependency {0}")]
    UnresolvedTransitive(Producer),

    /// Family resolution or validation failures, accumulated over a pass
    #[error("feature-pack family errors:\n  {}", .0.join("\n  "))]
    Family(Vec<String>),

    /// A pack referenced in a patch position is not a patch
    #[error("{0} is not a patch")]
    NotPatch(PackId),

    /// A patch names a target that is not part of the installation
    #[error("patch {patch} applies to {target}, which is not resolved in the layout")]
    PatchTargetMissing { patch: PackId, target: PackId },

    /// Rejected configuration change
    #[error("configuration error: {0}")]
    Config(String),

    /// Install of a build that is already present
    #[error("feature-pack {0} is already installed")]
    AlreadyInstalled(PackId),

    /// Uninstall or update of a producer the layout does not contain
    #[error("{0} is not part of the installation")]
    UnknownProducer(Producer),

    /// Plan entries for one producer landed in more than one intent set
    #[error("conflicting plan entry: {0}")]
    PlanConflict(String),

    /// An update was planned against a build that is no longer installed
    #[error("update for {producer} recorded {recorded} but {installed} is installed")]
    UpdateMismatch {
        producer: Producer,
        recorded: String,
        installed: String,
    },

    /// Options neither built in nor declared by any discovered plugin
    #[error("unrecognized provisioning options: {}", .0.join(", "))]
    UnknownOptions(Vec<String>),

    /// A required plugin option with no value and no default
    #[error("no value for required option {0}")]
    MissingOption(String),

    /// An option value outside the declared value set
    #[error("invalid value '{value}' for option {name} (allowed: {})", .allowed.join(", "))]
    InvalidOptionValue {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    /// A session working directory could not be prepared or locked
    #[error("working directory error: {0}")]
    WorkDir(String),
}

fn render_conflicts(conflicts: &BTreeMap<Producer, BTreeSet<PackId>>) -> String {
    conflicts
        .iter()
        .map(|(producer, ids)| {
            let builds: Vec<&str> = ids.iter().map(|id| id.build.as_str()).collect();
            format!("{} [{}]", producer, builds.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Read failure tied to a path
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Write failure tied to a path
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Copy failure tied to both endpoints
    pub(crate) fn copy(
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Error::Copy {
            src: src.into(),
            dst: dst.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_rendering_lists_every_build() {
        let producer = Producer::new("core", "fp2");
        let mut ids = BTreeSet::new();
        ids.insert(PackId::new(producer.clone(), "1.0.0"));
        ids.insert(PackId::new(producer.clone(), "2.0.0"));
        let mut conflicts = BTreeMap::new();
        conflicts.insert(producer, ids);

        let err = Error::VersionConflict(conflicts);
        let msg = err.to_string();
        assert!(msg.contains("fp2@core"), "message was: {}", msg);
        assert!(msg.contains("1.0.0"), "message was: {}", msg);
        assert!(msg.contains("2.0.0"), "message was: {}", msg);
    }

    #[test]
    fn test_copy_error_names_both_paths() {
        let err = Error::copy(
            "/a/src",
            "/b/dst",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/a/src"));
        assert!(msg.contains("/b/dst"));
    }
}
