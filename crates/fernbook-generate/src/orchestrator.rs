//! Brings a stored record up to a ruleset version: resolve which fields are
//! stale, regenerate each stale group, write the results and stamp the version.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use fernbook_core::resolve::{persisted_only, stale_groups};
use fernbook_core::{
    FieldGroup, ForceField, ForcedFields, GeneratorSettings, PlantRecord, RecordStore,
    RulesetRegistry, RulesetVersion,
};

use crate::engine::{GenerationReport, StructuredClient, Tier};
use crate::error::{GenerationError, OrchestratorError};
use crate::prompt::{check_payload, payload_fields, request_for};
use crate::protocol::Transport;

/// What a refresh of one record would regenerate.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPlan {
    pub record_id: String,
    pub stored_version: Option<i64>,
    pub target_version: RulesetVersion,
    pub forced: ForcedFields,
    pub groups: Vec<FieldGroup>,
}

impl RefreshPlan {
    pub fn is_empty(&self) -> bool {
        self.forced.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    UpToDate {
        stored_version: Option<i64>,
        target_version: RulesetVersion,
    },
    Refreshed {
        record: PlantRecord,
        /// Tier that produced each regenerated group.
        groups: Vec<(FieldGroup, Tier)>,
        written: Vec<ForceField>,
    },
}

pub struct Orchestrator<T, S> {
    registry: Arc<RulesetRegistry>,
    client: StructuredClient<T>,
    store: S,
    settings: GeneratorSettings,
}

impl<T: Transport, S: RecordStore> Orchestrator<T, S> {
    pub fn new(
        registry: Arc<RulesetRegistry>,
        client: StructuredClient<T>,
        store: S,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            registry,
            client,
            store,
            settings,
        }
    }

    pub fn client(&self) -> &StructuredClient<T> {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn plan(
        &self,
        id: &str,
        target: Option<RulesetVersion>,
    ) -> Result<RefreshPlan, OrchestratorError> {
        let record = self.store.load(id)?;
        Ok(self.plan_for(&record, target))
    }

    fn plan_for(&self, record: &PlantRecord, target: Option<RulesetVersion>) -> RefreshPlan {
        let target_version = target.unwrap_or_else(|| self.registry.current_version());
        let forced = self
            .registry
            .compute_forced_fields_since(record.ruleset_version, target_version);
        RefreshPlan {
            record_id: record.id.clone(),
            stored_version: record.ruleset_version,
            target_version,
            groups: stale_groups(&forced),
            forced,
        }
    }

    /// Regenerate every stale group of record `id` and save it stamped with the target version.
    ///
    /// Any failed group aborts the refresh before anything is saved.
    pub async fn refresh(
        &self,
        id: &str,
        target: Option<RulesetVersion>,
    ) -> Result<RefreshOutcome, OrchestratorError> {
        let mut record = self.store.load(id)?;
        let plan = self.plan_for(&record, target);
        if plan.is_empty() {
            tracing::debug!(
                id,
                stored = ?plan.stored_version,
                target = plan.target_version,
                "record up to date"
            );
            return Ok(RefreshOutcome::UpToDate {
                stored_version: plan.stored_version,
                target_version: plan.target_version,
            });
        }
        tracing::info!(
            id,
            stored = ?plan.stored_version,
            target = plan.target_version,
            groups = ?plan.groups,
            "refreshing record"
        );

        let mut tiers = Vec::with_capacity(plan.groups.len());

        let profile: Option<Value> = if plan.groups.contains(&FieldGroup::Profile) {
            let report = self.generate(FieldGroup::Profile, &record, None).await?;
            tiers.push((FieldGroup::Profile, report.tier));
            Some(report.payload)
        } else {
            None
        };

        let rest: Vec<FieldGroup> = plan
            .groups
            .iter()
            .copied()
            .filter(|g| *g != FieldGroup::Profile)
            .collect();
        let results = join_all(
            rest.iter()
                .map(|group| self.generate(*group, &record, profile.as_ref())),
        )
        .await;

        let writable = persisted_only(&plan.forced);
        let mut written = Vec::new();
        for (group, result) in rest.into_iter().zip(results) {
            let report = result?;
            tiers.push((group, report.tier));
            for (field, value) in payload_fields(&report.payload) {
                if writable.contains(&field) {
                    record.attributes.insert(field, value);
                    written.push(field);
                }
            }
        }
        written.sort();

        record.ruleset_version = Some(i64::from(plan.target_version));
        self.store.save(&record)?;
        tracing::info!(
            id,
            version = plan.target_version,
            written = written.len(),
            "record refreshed"
        );

        Ok(RefreshOutcome::Refreshed {
            record,
            groups: tiers,
            written,
        })
    }

    async fn generate(
        &self,
        group: FieldGroup,
        record: &PlantRecord,
        profile: Option<&Value>,
    ) -> Result<GenerationReport, OrchestratorError> {
        let request = request_for(group, record, profile, &self.settings);
        let report = self
            .client
            .generate_with_report(&request)
            .await
            .map_err(|source| OrchestratorError::Generation { group, source })?;
        check_payload(group, &report.payload).map_err(|e| OrchestratorError::Generation {
            group,
            source: GenerationError::Payload(e),
        })?;
        Ok(report)
    }
}
