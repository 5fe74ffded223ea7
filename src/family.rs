// src/family.rs

//! Feature-pack families: groups of mutually substitutable packs.
//!
//! A family is a name plus a set of named criteria, each marked inherited
//! or local. A dependency edge may carry an "allowed family" constraint,
//! which lets the resolver substitute an already-chosen family member for
//! the edge's nominal target. Two packs conflict if both locally implement
//! the same family criterion.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::location::{PackId, PackLocation, Producer};
use crate::universe::Universe;

/// One named criterion of a family descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyCriterion {
    pub name: String,
    /// Inherited criteria come from a parent pack; local ones are
    /// implemented by the declaring pack itself.
    #[serde(default)]
    pub inherited: bool,
}

impl FamilyCriterion {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inherited: false,
        }
    }

    pub fn inherited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inherited: true,
        }
    }
}

/// A family membership declaration inside a feature-pack descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySpec {
    pub name: String,
    #[serde(default)]
    pub criteria: Vec<FamilyCriterion>,
}

impl FamilySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            criteria: Vec::new(),
        }
    }

    pub fn with_criterion(mut self, criterion: FamilyCriterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Criteria the declaring pack implements itself
    pub fn local_criteria(&self) -> impl Iterator<Item = &str> {
        self.criteria
            .iter()
            .filter(|c| !c.inherited)
            .map(|c| c.name.as_str())
    }

    /// All criteria, inherited ones included
    pub fn all_criteria(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().map(|c| c.name.as_str())
    }

    fn covers_locally(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .all(|r| self.local_criteria().any(|c| c == r))
    }

    fn covers(&self, requested: &[String]) -> bool {
        requested.iter().all(|r| self.all_criteria().any(|c| c == r))
    }
}

/// An "allowed family" constraint on a dependency edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyConstraint {
    pub name: String,
    #[serde(default)]
    pub criteria: Vec<String>,
}

impl FamilyConstraint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            criteria: Vec::new(),
        }
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.criteria.push(criterion.into());
        self
    }
}

#[derive(Debug, Clone)]
struct FamilyMember {
    id: PackId,
    spec: FamilySpec,
}

impl fmt::Display for FamilyMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Per-build-pass family state.
///
/// Tracks which members have been registered for each family, rewrites
/// constrained dependency edges to already-chosen members, and validates
/// family consistency once the whole graph is resolved. Errors accumulate
/// over the pass and are reported together by [`FamilyResolver::validate`].
#[derive(Debug, Default)]
pub struct FamilyResolver {
    // family name -> member key -> registration; first registration of a
    // key wins, later duplicates are ignored
    families: BTreeMap<String, BTreeMap<String, FamilyMember>>,
    errors: Vec<String>,
}

impl FamilyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable member key for identity comparisons across universes.
    fn member_key(universe: &dyn Universe, producer: &Producer) -> String {
        match universe.canonical_producer(producer) {
            Some(canonical) => canonical.to_string(),
            None => producer.to_string(),
        }
    }

    /// Rewrite a dependency edge through its allowed-family constraint.
    ///
    /// When a member is already chosen for the constraint's family whose
    /// local criteria cover the requested ones (full criteria checked as a
    /// fallback), and that member is not the edge's own target, the edge is
    /// redirected to the member. Otherwise the edge resolves as given.
    pub fn resolve_dependency(
        &self,
        universe: &dyn Universe,
        location: &PackLocation,
        constraint: Option<&FamilyConstraint>,
    ) -> PackLocation {
        let Some(constraint) = constraint else {
            return location.clone();
        };
        let Some(members) = self.families.get(&constraint.name) else {
            return location.clone();
        };

        let own_key = Self::member_key(universe, &location.producer);
        let candidate = members
            .values()
            .find(|m| m.spec.covers_locally(&constraint.criteria))
            .or_else(|| members.values().find(|m| m.spec.covers(&constraint.criteria)))
            .filter(|m| Self::member_key(universe, &m.id.producer) != own_key);

        match candidate {
            Some(member) => {
                debug!(
                    family = %constraint.name,
                    from = %location,
                    to = %member.id,
                    "substituting family member"
                );
                member.id.location()
            }
            None => location.clone(),
        }
    }

    /// Register a resolved pack's own family membership.
    ///
    /// Divergence from an already-chosen member of the same family is an
    /// error unless a family constraint on the resolving edge justified it.
    /// First registration of a member key wins.
    pub fn register(
        &mut self,
        universe: &dyn Universe,
        id: &PackId,
        spec: &FamilySpec,
        constrained: bool,
    ) {
        if !constrained {
            if let Some(members) = self.families.get(&spec.name) {
                for member in members.values() {
                    if member.id.producer != id.producer {
                        self.errors.push(format!(
                            "family {} already has member {} conflicting with {}",
                            spec.name, member, id
                        ));
                        break;
                    }
                }
            }
        }

        let key = Self::member_key(universe, &id.producer);
        self.families
            .entry(spec.name.clone())
            .or_default()
            .entry(key)
            .or_insert_with(|| FamilyMember {
                id: id.clone(),
                spec: spec.clone(),
            });
    }

    /// Build-wide consistency check, called once after resolution.
    ///
    /// Reports every local criterion implemented by more than one pack and,
    /// separately, the use of more than one family name in the graph.
    /// Accumulated per-edge errors from the pass are included.
    pub fn validate(mut self) -> Result<(), Vec<String>> {
        for (family, members) in &self.families {
            let mut implementors: BTreeMap<&str, Vec<&PackId>> = BTreeMap::new();
            for member in members.values() {
                for criterion in member.spec.local_criteria() {
                    implementors.entry(criterion).or_default().push(&member.id);
                }
            }
            for (criterion, packs) in implementors {
                if packs.len() > 1 {
                    let names: Vec<String> = packs.iter().map(|id| id.to_string()).collect();
                    self.errors.push(format!(
                        "family {} criterion {} implemented by more than one feature-pack: {}",
                        family,
                        criterion,
                        names.join(", ")
                    ));
                }
            }
        }

        if self.families.len() > 1 {
            let names: Vec<&str> = self.families.keys().map(String::as_str).collect();
            self.errors.push(format!(
                "more than one feature-pack family in use: {}",
                names.join(", ")
            ));
        }

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::testing::StaticUniverse;

    fn pack(s: &str) -> PackId {
        PackId::parse(s).unwrap()
    }

    #[test]
    fn test_substitutes_chosen_member_for_constrained_edge() {
        let universe = StaticUniverse::default();
        let mut resolver = FamilyResolver::new();
        let spec = FamilySpec::new("web").with_criterion(FamilyCriterion::local("servlet"));
        resolver.register(&universe, &pack("fp-a@core#1.0.0"), &spec, false);

        let edge = PackLocation::parse("fp-b@core#2.0.0").unwrap();
        let constraint = FamilyConstraint::new("web").with_criterion("servlet");
        let rewritten = resolver.resolve_dependency(&universe, &edge, Some(&constraint));
        assert_eq!(rewritten.to_string(), "fp-a@core#1.0.0");
    }

    #[test]
    fn test_unconstrained_edge_resolves_as_given() {
        let universe = StaticUniverse::default();
        let mut resolver = FamilyResolver::new();
        let spec = FamilySpec::new("web").with_criterion(FamilyCriterion::local("servlet"));
        resolver.register(&universe, &pack("fp-a@core#1.0.0"), &spec, false);

        let edge = PackLocation::parse("fp-b@core#2.0.0").unwrap();
        let kept = resolver.resolve_dependency(&universe, &edge, None);
        assert_eq!(kept, edge);
    }

    #[test]
    fn test_local_criteria_preferred_over_inherited() {
        let universe = StaticUniverse::default();
        let mut resolver = FamilyResolver::new();
        resolver.register(
            &universe,
            &pack("fp-inh@core#1.0.0"),
            &FamilySpec::new("web").with_criterion(FamilyCriterion::inherited("servlet")),
            false,
        );
        resolver.register(
            &universe,
            &pack("fp-loc@core#1.0.0"),
            &FamilySpec::new("web").with_criterion(FamilyCriterion::local("servlet")),
            true,
        );

        let edge = PackLocation::parse("fp-x@core#1.0.0").unwrap();
        let constraint = FamilyConstraint::new("web").with_criterion("servlet");
        let rewritten = resolver.resolve_dependency(&universe, &edge, Some(&constraint));
        assert_eq!(rewritten.to_string(), "fp-loc@core#1.0.0");
    }

    #[test]
    fn test_member_never_pins_its_own_edge() {
        let universe = StaticUniverse::default();
        let mut resolver = FamilyResolver::new();
        let spec = FamilySpec::new("web").with_criterion(FamilyCriterion::local("servlet"));
        resolver.register(&universe, &pack("fp-a@core#1.0.0"), &spec, false);

        // An edge that already targets the member resolves as given, even
        // at a different build
        let edge = PackLocation::parse("fp-a@core#2.0.0").unwrap();
        let constraint = FamilyConstraint::new("web").with_criterion("servlet");
        let kept = resolver.resolve_dependency(&universe, &edge, Some(&constraint));
        assert_eq!(kept, edge);
    }

    #[test]
    fn test_duplicate_local_criterion_fails_validation() {
        let universe = StaticUniverse::default();
        let mut resolver = FamilyResolver::new();
        let spec = FamilySpec::new("web").with_criterion(FamilyCriterion::local("servlet"));
        resolver.register(&universe, &pack("fp1@core#1.0.0"), &spec, true);
        resolver.register(&universe, &pack("fp2@core#1.0.0"), &spec, true);

        let errors = resolver.validate().unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| e.contains("implemented by more than one feature-pack")
                    && e.contains("fp1@core#1.0.0")
                    && e.contains("fp2@core#1.0.0")),
            "errors were: {:?}",
            errors
        );
    }

    #[test]
    fn test_multiple_family_names_fail_validation() {
        let universe = StaticUniverse::default();
        let mut resolver = FamilyResolver::new();
        resolver.register(&universe, &pack("fp1@core#1.0.0"), &FamilySpec::new("web"), false);
        resolver.register(&universe, &pack("fp2@core#1.0.0"), &FamilySpec::new("data"), false);

        let errors = resolver.validate().unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| e.contains("more than one feature-pack family")),
            "errors were: {:?}",
            errors
        );
    }

    #[test]
    fn test_unjustified_divergence_is_recorded() {
        let universe = StaticUniverse::default();
        let mut resolver = FamilyResolver::new();
        resolver.register(&universe, &pack("fp1@core#1.0.0"), &FamilySpec::new("web"), false);
        // No constraint justified resolving a second member
        resolver.register(&universe, &pack("fp2@core#1.0.0"), &FamilySpec::new("web"), false);

        let errors = resolver.validate().unwrap_err();
        assert!(
            errors.iter().any(|e| e.contains("conflicting with")),
            "errors were: {:?}",
            errors
        );
    }

    #[test]
    fn test_first_registration_wins() {
        let universe = StaticUniverse::default();
        let mut resolver = FamilyResolver::new();
        let spec = FamilySpec::new("web").with_criterion(FamilyCriterion::local("servlet"));
        resolver.register(&universe, &pack("fp-a@core#1.0.0"), &spec, false);
        // Same producer re-registered at another build is ignored
        resolver.register(&universe, &pack("fp-a@core#9.9.9"), &spec, false);

        let edge = PackLocation::parse("fp-b@core#1.0.0").unwrap();
        let constraint = FamilyConstraint::new("web").with_criterion("servlet");
        let rewritten = resolver.resolve_dependency(&universe, &edge, Some(&constraint));
        assert_eq!(rewritten.to_string(), "fp-a@core#1.0.0");
    }
}
