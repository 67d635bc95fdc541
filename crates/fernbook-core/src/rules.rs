//! Forced-regeneration ruleset: the current ruleset version, the per-version
//! rule table and the prerequisite/cascade graphs between fields.
//!
//! The builtin tables below are the single source of truth for what the
//! shipped application regenerates. A registry is built once at startup and
//! never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field::ForceField;
use crate::resolve::{self, ForcedFields};

pub type RulesetVersion = u32;

use ForceField::*;

/// Ruleset version the shipped application generates under.
pub const CURRENT_VERSION: RulesetVersion = 3;

const BUILTIN_RULES: &[(RulesetVersion, &[ForceField])] = &[
    (
        1,
        &[
            Profile,
            CareLight,
            CareWater,
            CareTempHumidity,
            CareFertilizer,
            CarePruning,
            SoilDescription,
            PropagationMethods,
            Description,
            Availability,
            Rarity,
            DisplayName,
        ],
    ),
    // Light and watering guidance rewritten around measured ranges.
    (2, &[CareLight, CareWater]),
    (3, &[SoilDescription, PropagationMethods]),
];

/// `field -> fields that must be regenerated before it`.
const BUILTIN_UPSTREAM: &[(ForceField, &[ForceField])] = &[
    (CareLight, &[Profile]),
    (CareWater, &[Profile]),
    (CareTempHumidity, &[Profile]),
    (CareFertilizer, &[Profile]),
    (CarePruning, &[Profile]),
    (SoilDescription, &[Profile]),
    (PropagationMethods, &[Profile]),
    (Description, &[Profile]),
    (Availability, &[Profile]),
    (Rarity, &[Profile]),
];

/// `field -> fields that go stale when it changes`.
const BUILTIN_DOWNSTREAM: &[(ForceField, &[ForceField])] = &[
    (Profile, &[Description]),
    (CareWater, &[SoilDescription]),
    (SoilDescription, &[CareWater]),
    (Description, &[DisplayName]),
];

static NO_NEIGHBORS: BTreeSet<ForceField> = BTreeSet::new();

/// As of `version`, `fields` are stale for any record generated under an earlier version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceRule {
    pub version: RulesetVersion,
    pub fields: BTreeSet<ForceField>,
}

impl ForceRule {
    pub fn new(version: RulesetVersion, fields: impl IntoIterator<Item = ForceField>) -> Self {
        Self {
            version,
            fields: fields.into_iter().collect(),
        }
    }
}

pub type DependencyGraph = BTreeMap<ForceField, BTreeSet<ForceField>>;

/// On-disk form of a ruleset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetDocument {
    pub current_version: RulesetVersion,
    pub rules: Vec<ForceRule>,
    #[serde(default)]
    pub upstream: DependencyGraph,
    #[serde(default)]
    pub downstream: DependencyGraph,
}

/// Immutable, process-wide regeneration configuration.
#[derive(Debug, Clone)]
pub struct RulesetRegistry {
    current_version: RulesetVersion,
    rules: Vec<ForceRule>,
    upstream: DependencyGraph,
    downstream: DependencyGraph,
}

impl RulesetRegistry {
    pub fn new(
        current_version: RulesetVersion,
        mut rules: Vec<ForceRule>,
        upstream: DependencyGraph,
        downstream: DependencyGraph,
    ) -> Result<Self, CoreError> {
        for rule in &rules {
            if rule.version == 0 {
                return Err(CoreError::InvalidRuleset(
                    "rule versions start at 1".to_string(),
                ));
            }
            if rule.version > current_version {
                return Err(CoreError::InvalidRuleset(format!(
                    "rule version {} is newer than current version {}",
                    rule.version, current_version
                )));
            }
        }
        rules.sort_by_key(|r| r.version);

        Ok(Self {
            current_version,
            rules,
            upstream,
            downstream,
        })
    }

    /// The ruleset shipped with the application.
    pub fn builtin() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(version, fields)| ForceRule::new(*version, fields.iter().copied()))
            .collect();

        Self {
            current_version: CURRENT_VERSION,
            rules,
            upstream: graph_from(BUILTIN_UPSTREAM),
            downstream: graph_from(BUILTIN_DOWNSTREAM),
        }
    }

    pub fn from_document(doc: RulesetDocument) -> Result<Self, CoreError> {
        Self::new(doc.current_version, doc.rules, doc.upstream, doc.downstream)
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let doc: RulesetDocument = serde_json::from_str(raw)?;
        Self::from_document(doc)
    }

    /// Read a ruleset document from disk.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        Self::from_json(&raw)
    }

    pub fn to_document(&self) -> RulesetDocument {
        RulesetDocument {
            current_version: self.current_version,
            rules: self.rules.clone(),
            upstream: self.upstream.clone(),
            downstream: self.downstream.clone(),
        }
    }

    pub fn current_version(&self) -> RulesetVersion {
        self.current_version
    }

    /// Rules sorted by ascending version.
    pub fn rules(&self) -> &[ForceRule] {
        &self.rules
    }

    /// Prerequisites of `field`. Missing entries are empty.
    pub fn upstream(&self, field: ForceField) -> &BTreeSet<ForceField> {
        self.upstream.get(&field).unwrap_or(&NO_NEIGHBORS)
    }

    /// Cascades of `field`. Missing entries are empty.
    pub fn downstream(&self, field: ForceField) -> &BTreeSet<ForceField> {
        self.downstream.get(&field).unwrap_or(&NO_NEIGHBORS)
    }

    pub fn compute_forced_fields_since(
        &self,
        stored_version: Option<i64>,
        target_version: RulesetVersion,
    ) -> ForcedFields {
        resolve::compute_forced_fields_since(self, stored_version, target_version)
    }

    pub fn compute_forced_fields(&self, stored_version: Option<i64>) -> ForcedFields {
        resolve::compute_forced_fields(self, stored_version)
    }
}

impl Default for RulesetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn graph_from(edges: &[(ForceField, &[ForceField])]) -> DependencyGraph {
    edges
        .iter()
        .map(|(field, neighbors)| (*field, neighbors.iter().copied().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_are_sorted_and_within_current_version() {
        let registry = RulesetRegistry::builtin();
        let versions: Vec<_> = registry.rules().iter().map(|r| r.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
        assert!(versions.iter().all(|v| *v >= 1 && *v <= registry.current_version()));
    }

    #[test]
    fn first_builtin_rule_covers_every_field() {
        let registry = RulesetRegistry::builtin();
        let first = &registry.rules()[0];
        assert_eq!(first.version, 1);
        assert_eq!(first.fields.len(), ForceField::ALL.len());
    }

    #[test]
    fn missing_graph_entries_are_empty() {
        let registry = RulesetRegistry::builtin();
        assert!(registry.upstream(DisplayName).is_empty());
        assert!(registry.downstream(Rarity).is_empty());
        assert!(registry.upstream(CareLight).contains(&Profile));
    }

    #[test]
    fn new_sorts_rules() {
        let registry = RulesetRegistry::new(
            5,
            vec![ForceRule::new(4, [Rarity]), ForceRule::new(2, [CareLight])],
            DependencyGraph::new(),
            DependencyGraph::new(),
        )
        .unwrap();
        assert_eq!(registry.rules()[0].version, 2);
        assert_eq!(registry.rules()[1].version, 4);
    }

    #[test]
    fn rejects_rule_newer_than_current() {
        let err = RulesetRegistry::new(
            2,
            vec![ForceRule::new(3, [CareLight])],
            DependencyGraph::new(),
            DependencyGraph::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRuleset(_)));
    }

    #[test]
    fn rejects_version_zero() {
        let err = RulesetRegistry::new(
            1,
            vec![ForceRule::new(0, [CareLight])],
            DependencyGraph::new(),
            DependencyGraph::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRuleset(_)));
    }

    #[test]
    fn loads_from_json_document() {
        let raw = r#"{
            "current_version": 2,
            "rules": [
                {"version": 1, "fields": ["care_light"]},
                {"version": 2, "fields": ["care_light"]}
            ],
            "upstream": {"care_light": ["profile"]},
            "downstream": {"care_light": ["care_water"]}
        }"#;
        let registry = RulesetRegistry::from_json(raw).unwrap();
        assert_eq!(registry.current_version(), 2);
        assert!(registry.upstream(CareLight).contains(&Profile));
        assert!(registry.downstream(CareLight).contains(&CareWater));
        assert!(registry.downstream(CareWater).is_empty());
    }

    #[test]
    fn document_round_trips_builtin() {
        let builtin = RulesetRegistry::builtin();
        let raw = serde_json::to_string(&builtin.to_document()).unwrap();
        let reloaded = RulesetRegistry::from_json(&raw).unwrap();
        assert_eq!(reloaded.rules(), builtin.rules());
        assert_eq!(reloaded.current_version(), builtin.current_version());
    }
}
