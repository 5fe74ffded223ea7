// src/location.rs

//! Coordinate types for feature-packs.
//!
//! A feature-pack location names the producer of a pack plus optional
//! release-channel and build qualifiers, using the format:
//! `name@universe[:channel][#build]`
//!
//! Examples:
//! - `wildfly@maven:stable#27.0.1` - fully resolved, pinned to a build
//! - `wildfly@maven:stable` - channel given, build left to the resolver
//! - `wildfly@maven#27.0.1` - pinned build, no channel preference
//!
//! # Components
//!
//! - **Name**: The feature-pack's short name within its universe
//! - **Universe**: The namespace that owns the producer (a catalog scope)
//! - **Channel**: A release stream the resolver picks latest builds from
//! - **Build**: A concrete version of the pack
//!
//! A location with a build is *resolved*; the `producer` part alone
//! (`name@universe`) is the identity version conflicts are keyed on.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The identity of a feature-pack line: who publishes it, regardless of build.
///
/// Format: `name@universe`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Producer {
    /// Universe (namespace) that owns the producer
    pub universe: String,
    /// Feature-pack name within the universe
    pub name: String,
}

impl Producer {
    /// Create a new producer identity
    pub fn new(universe: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            universe: universe.into(),
            name: name.into(),
        }
    }

    /// Parse a producer from string format `name@universe`
    pub fn parse(s: &str) -> Result<Self, LocationError> {
        let loc = PackLocation::parse(s)?;
        if loc.channel.is_some() || loc.build.is_some() {
            return Err(LocationError::UnexpectedQualifier(s.to_string()));
        }
        Ok(loc.producer)
    }
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.universe)
    }
}

impl FromStr for Producer {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Producer::parse(s)
    }
}

/// A fully resolved feature-pack identity: producer plus concrete build.
///
/// Format: `name@universe#build`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackId {
    /// Producer identity
    pub producer: Producer,
    /// Concrete build of the pack
    pub build: String,
}

impl PackId {
    /// Create a new pack identity
    pub fn new(producer: Producer, build: impl Into<String>) -> Self {
        Self {
            producer,
            build: build.into(),
        }
    }

    /// Parse a pack identity from string format `name@universe#build`
    pub fn parse(s: &str) -> Result<Self, LocationError> {
        let loc = PackLocation::parse(s)?;
        match loc.build {
            Some(build) => Ok(Self {
                producer: loc.producer,
                build,
            }),
            None => Err(LocationError::MissingBuild(s.to_string())),
        }
    }

    /// The channel-less location carrying this identity
    pub fn location(&self) -> PackLocation {
        PackLocation {
            producer: self.producer.clone(),
            channel: None,
            build: Some(self.build.clone()),
        }
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.producer, self.build)
    }
}

impl FromStr for PackId {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackId::parse(s)
    }
}

/// A possibly-unresolved feature-pack coordinate
///
/// Format: `name@universe[:channel][#build]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackLocation {
    /// Producer identity
    pub producer: Producer,
    /// Release channel the resolver should draw builds from
    pub channel: Option<String>,
    /// Concrete build, when resolved
    pub build: Option<String>,
}

impl PackLocation {
    /// Create an unresolved location for a producer
    pub fn new(producer: Producer) -> Self {
        Self {
            producer,
            channel: None,
            build: None,
        }
    }

    /// Set the release channel
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set the build
    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    /// Parse a location from string format `name@universe[:channel][#build]`
    pub fn parse(s: &str) -> Result<Self, LocationError> {
        if s.is_empty() {
            return Err(LocationError::Empty);
        }

        let (coords, build) = match s.split_once('#') {
            Some((coords, build)) => (coords, Some(build)),
            None => (s, None),
        };
        let (producer, channel) = match coords.split_once(':') {
            Some((producer, channel)) => (producer, Some(channel)),
            None => (coords, None),
        };
        let (name, universe) = producer
            .split_once('@')
            .ok_or_else(|| LocationError::MissingAt(s.to_string()))?;

        if name.is_empty() {
            return Err(LocationError::EmptyName(s.to_string()));
        }
        if universe.is_empty() {
            return Err(LocationError::EmptyUniverse(s.to_string()));
        }

        // Validate characters (alphanumeric, dots, hyphens, underscores)
        let valid_chars = |c: char| c.is_alphanumeric() || c == '.' || c == '-' || c == '_';

        if !name.chars().all(valid_chars) {
            return Err(LocationError::InvalidName(name.to_string()));
        }
        if !universe.chars().all(valid_chars) {
            return Err(LocationError::InvalidUniverse(universe.to_string()));
        }
        if let Some(channel) = channel {
            if channel.is_empty() || !channel.chars().all(valid_chars) {
                return Err(LocationError::InvalidChannel(channel.to_string()));
            }
        }
        if let Some(build) = build {
            if build.is_empty() || !build.chars().all(valid_chars) {
                return Err(LocationError::InvalidBuild(build.to_string()));
            }
        }

        Ok(Self {
            producer: Producer::new(universe, name),
            channel: channel.map(str::to_string),
            build: build.map(str::to_string),
        })
    }

    /// Whether the location carries a concrete build
    pub fn is_resolved(&self) -> bool {
        self.build.is_some()
    }

    /// The resolved identity, when a build is present
    pub fn id(&self) -> Option<PackId> {
        self.build
            .as_ref()
            .map(|build| PackId::new(self.producer.clone(), build.clone()))
    }

    /// A copy of this location pinned to the given build, keeping the channel
    pub fn resolved(&self, build: impl Into<String>) -> PackLocation {
        PackLocation {
            producer: self.producer.clone(),
            channel: self.channel.clone(),
            build: Some(build.into()),
        }
    }
}

impl fmt::Display for PackLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.producer)?;
        if let Some(channel) = &self.channel {
            write!(f, ":{}", channel)?;
        }
        if let Some(build) = &self.build {
            write!(f, "#{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for PackLocation {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackLocation::parse(s)
    }
}

/// Names a generated configuration: model plus configuration name.
///
/// Format: `model/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigId {
    /// Configuration model (e.g. `standalone`)
    pub model: String,
    /// Configuration name within the model
    pub name: String,
}

impl ConfigId {
    /// Create a new configuration identity
    pub fn new(model: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            name: name.into(),
        }
    }

    /// Parse a configuration identity from string format `model/name`
    pub fn parse(s: &str) -> Result<Self, LocationError> {
        let (model, name) = s
            .split_once('/')
            .ok_or_else(|| LocationError::MissingSlash(s.to_string()))?;
        if model.is_empty() || name.is_empty() {
            return Err(LocationError::EmptyConfigPart(s.to_string()));
        }
        let valid_chars = |c: char| c.is_alphanumeric() || c == '.' || c == '-' || c == '_';
        if !model.chars().all(valid_chars) || !name.chars().all(valid_chars) {
            return Err(LocationError::InvalidConfig(s.to_string()));
        }
        Ok(Self::new(model, name))
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.name)
    }
}

impl FromStr for ConfigId {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigId::parse(s)
    }
}

/// Errors that can occur when parsing a coordinate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    /// Empty input
    Empty,
    /// Missing @ separator
    MissingAt(String),
    /// Empty name component
    EmptyName(String),
    /// Empty universe component
    EmptyUniverse(String),
    /// Invalid characters in name
    InvalidName(String),
    /// Invalid characters in universe
    InvalidUniverse(String),
    /// Invalid or empty channel
    InvalidChannel(String),
    /// Invalid or empty build
    InvalidBuild(String),
    /// A build was required but not present
    MissingBuild(String),
    /// A channel or build qualifier where only a producer is allowed
    UnexpectedQualifier(String),
    /// Missing / separator in a config identity
    MissingSlash(String),
    /// Empty model or name in a config identity
    EmptyConfigPart(String),
    /// Invalid characters in a config identity
    InvalidConfig(String),
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationError::Empty => write!(f, "Empty location"),
            LocationError::MissingAt(s) => write!(f, "Missing '@' in location: {}", s),
            LocationError::EmptyName(s) => write!(f, "Empty name in location: {}", s),
            LocationError::EmptyUniverse(s) => write!(f, "Empty universe in location: {}", s),
            LocationError::InvalidName(s) => write!(f, "Invalid feature-pack name: {}", s),
            LocationError::InvalidUniverse(s) => write!(f, "Invalid universe: {}", s),
            LocationError::InvalidChannel(s) => write!(f, "Invalid channel: {}", s),
            LocationError::InvalidBuild(s) => write!(f, "Invalid build: {}", s),
            LocationError::MissingBuild(s) => write!(f, "Missing '#build' in location: {}", s),
            LocationError::UnexpectedQualifier(s) => {
                write!(f, "Expected a plain producer (name@universe): {}", s)
            }
            LocationError::MissingSlash(s) => write!(f, "Missing '/' in config identity: {}", s),
            LocationError::EmptyConfigPart(s) => {
                write!(f, "Empty model or name in config identity: {}", s)
            }
            LocationError::InvalidConfig(s) => write!(f, "Invalid config identity: {}", s),
        }
    }
}

impl std::error::Error for LocationError {}

macro_rules! string_coordinate_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

string_coordinate_serde!(Producer);
string_coordinate_serde!(PackId);
string_coordinate_serde!(PackLocation);
string_coordinate_serde!(ConfigId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parse_full() {
        let loc = PackLocation::parse("wildfly@maven:stable#27.0.1").unwrap();
        assert_eq!(loc.producer.name, "wildfly");
        assert_eq!(loc.producer.universe, "maven");
        assert_eq!(loc.channel.as_deref(), Some("stable"));
        assert_eq!(loc.build.as_deref(), Some("27.0.1"));
    }

    #[test]
    fn test_location_parse_partial() {
        let loc = PackLocation::parse("fp1@core").unwrap();
        assert!(loc.channel.is_none());
        assert!(loc.build.is_none());
        assert!(!loc.is_resolved());

        let loc = PackLocation::parse("fp1@core#1.0.0").unwrap();
        assert!(loc.channel.is_none());
        assert_eq!(loc.build.as_deref(), Some("1.0.0"));
        assert!(loc.is_resolved());

        let loc = PackLocation::parse("fp1@core:beta").unwrap();
        assert_eq!(loc.channel.as_deref(), Some("beta"));
        assert!(loc.build.is_none());
    }

    #[test]
    fn test_location_display_round_trip() {
        for s in [
            "fp1@core",
            "fp1@core:stable",
            "fp1@core#1.0.0",
            "fp1@core:stable#1.0.0",
        ] {
            let loc = PackLocation::parse(s).unwrap();
            assert_eq!(loc.to_string(), s);
        }
    }

    #[test]
    fn test_location_parse_errors() {
        assert!(PackLocation::parse("").is_err());
        assert!(PackLocation::parse("missing-at").is_err());
        assert!(PackLocation::parse("@core").is_err()); // empty name
        assert!(PackLocation::parse("fp1@").is_err()); // empty universe
        assert!(PackLocation::parse("fp1@core:").is_err()); // empty channel
        assert!(PackLocation::parse("fp1@core#").is_err()); // empty build
        assert!(PackLocation::parse("fp 1@core").is_err()); // bad char
        assert!(PackLocation::parse("fp1@core#1.0:beta").is_err()); // ':' inside build
    }

    #[test]
    fn test_pack_id() {
        let id = PackId::parse("fp1@core#1.0.0").unwrap();
        assert_eq!(id.producer, Producer::new("core", "fp1"));
        assert_eq!(id.build, "1.0.0");
        assert_eq!(id.to_string(), "fp1@core#1.0.0");

        assert!(PackId::parse("fp1@core").is_err());
    }

    #[test]
    fn test_producer_rejects_qualifiers() {
        assert!(Producer::parse("fp1@core").is_ok());
        assert!(Producer::parse("fp1@core:stable").is_err());
        assert!(Producer::parse("fp1@core#1.0.0").is_err());
    }

    #[test]
    fn test_location_resolved_keeps_channel() {
        let loc = PackLocation::parse("fp1@core:stable").unwrap();
        let resolved = loc.resolved("2.0.0");
        assert_eq!(resolved.to_string(), "fp1@core:stable#2.0.0");
        assert_eq!(resolved.id().unwrap().to_string(), "fp1@core#2.0.0");
    }

    #[test]
    fn test_config_id() {
        let id = ConfigId::parse("standalone/main").unwrap();
        assert_eq!(id.model, "standalone");
        assert_eq!(id.name, "main");
        assert_eq!(id.to_string(), "standalone/main");

        assert!(ConfigId::parse("no-slash").is_err());
        assert!(ConfigId::parse("/name").is_err());
        assert!(ConfigId::parse("model/").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        #[derive(Serialize, Deserialize)]
        struct Doc {
            location: PackLocation,
        }

        let doc: Doc = toml::from_str(r#"location = "fp1@core:stable#1.0.0""#).unwrap();
        assert_eq!(doc.location.to_string(), "fp1@core:stable#1.0.0");

        let out = toml::to_string(&doc).unwrap();
        assert!(out.contains("fp1@core:stable#1.0.0"));
    }
}
