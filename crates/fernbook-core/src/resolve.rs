//! Decides which fields of a stored record must be regenerated when the
//! ruleset advances.
//!
//! Three phases, unioned:
//! 1. every rule with `stored < version <= target` contributes its fields,
//! 2. the upstream (prerequisite) closure of that set,
//! 3. the downstream (cascade) closure of everything so far.

use std::collections::BTreeSet;

use crate::field::{FieldGroup, ForceField};
use crate::rules::{RulesetRegistry, RulesetVersion};

pub type ForcedFields = BTreeSet<ForceField>;

/// Fields forced by the registry's current version.
pub fn compute_forced_fields(
    registry: &RulesetRegistry,
    stored_version: Option<i64>,
) -> ForcedFields {
    compute_forced_fields_since(registry, stored_version, registry.current_version())
}

/// Fields a record generated under `stored_version` must regenerate to reach `target_version`.
///
/// A missing or negative stored version counts as never generated. A stored
/// version at or past the target yields an empty set.
pub fn compute_forced_fields_since(
    registry: &RulesetRegistry,
    stored_version: Option<i64>,
    target_version: RulesetVersion,
) -> ForcedFields {
    let stored = normalize_stored(stored_version);
    if stored >= i64::from(target_version) {
        return ForcedFields::new();
    }

    let explicit: ForcedFields = registry
        .rules()
        .iter()
        .filter(|rule| i64::from(rule.version) > stored && rule.version <= target_version)
        .flat_map(|rule| rule.fields.iter().copied())
        .collect();

    let with_prerequisites = close_over(explicit, |f| registry.upstream(f));
    close_over(with_prerequisites, |f| registry.downstream(f))
}

fn normalize_stored(stored_version: Option<i64>) -> i64 {
    stored_version.unwrap_or(0).max(0)
}

/// Smallest superset of `seeds` closed under `neighbors`. Each node is expanded once.
fn close_over<'a, F>(seeds: ForcedFields, neighbors: F) -> ForcedFields
where
    F: Fn(ForceField) -> &'a BTreeSet<ForceField>,
{
    let mut closed = seeds.clone();
    let mut expanded = ForcedFields::new();
    let mut queue: Vec<ForceField> = seeds.into_iter().collect();

    while let Some(field) = queue.pop() {
        if !expanded.insert(field) {
            continue;
        }
        for next in neighbors(field) {
            if closed.insert(*next) {
                queue.push(*next);
            }
        }
    }

    closed
}

/// Groups touched by `forced`, `Profile` first.
pub fn stale_groups(forced: &ForcedFields) -> Vec<FieldGroup> {
    FieldGroup::ALL
        .iter()
        .copied()
        .filter(|group| forced.iter().any(|f| f.group() == *group))
        .collect()
}

/// The subset of `forced` that is written back to the record store.
pub fn persisted_only(forced: &ForcedFields) -> ForcedFields {
    forced.iter().copied().filter(|f| f.is_persisted()).collect()
}
