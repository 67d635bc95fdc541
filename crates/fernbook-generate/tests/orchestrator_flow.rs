mod common;

use std::sync::Arc;

use common::{context_of, responses_body, schema_name, KeyedTransport, Step};
use fernbook_core::{
    CoreError, FieldGroup, ForceField, GeneratorSettings, MemoryStore, PlantRecord, RecordStore,
    RulesetRegistry,
};
use fernbook_generate::{
    GenerationError, Orchestrator, OrchestratorError, RefreshOutcome, StructuredClient, Tier,
    TransportError,
};
use serde_json::{json, Value};

fn reply(payload: Value) -> Step {
    Step::Reply(responses_body(payload))
}

fn full_service() -> KeyedTransport {
    KeyedTransport::new()
        .on(
            "profile",
            reply(json!({
                "summary": "A trailing succulent from southern Africa.",
                "growth_habit": "trailing",
                "native_range": "South Africa",
                "hardiness": "Not frost hardy"
            })),
        )
        .on(
            "care",
            reply(json!({
                "care_light": "Bright light with some direct sun.",
                "care_water": "Water when the soil is fully dry.",
                "care_temp_humidity": "10-27 °C, dry air is fine.",
                "care_fertilizer": "Half-strength feed monthly in summer.",
                "care_pruning": "Trim leggy strands in spring."
            })),
        )
        .on("soil", reply(json!({"soil_description": "Cactus mix with extra grit."})))
        .on(
            "propagation",
            reply(json!({
                "propagation_methods": ["Stem cuttings laid on soil", "Single pearls pressed into mix"]
            })),
        )
        .on(
            "overview",
            reply(json!({
                "description": "Strings of pea-like leaves spill over the pot.",
                "availability": "widely available",
                "rarity": "common"
            })),
        )
        .on("naming", reply(json!({"display_name": "String of pearls"})))
}

fn orchestrator(
    transport: KeyedTransport,
    records: impl IntoIterator<Item = PlantRecord>,
) -> Orchestrator<KeyedTransport, MemoryStore> {
    Orchestrator::new(
        Arc::new(RulesetRegistry::builtin()),
        StructuredClient::new(transport),
        MemoryStore::with_records(records),
        GeneratorSettings::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn never_generated_record_gets_every_group() {
    let record = PlantRecord::new("senecio", "Curio rowleyanus");
    let orchestrator = orchestrator(full_service(), [record]);

    let plan = orchestrator.plan("senecio", None).unwrap();
    assert_eq!(plan.stored_version, None);
    assert_eq!(plan.target_version, 3);
    assert_eq!(plan.groups, FieldGroup::ALL.to_vec());

    let outcome = orchestrator.refresh("senecio", None).await.unwrap();
    let RefreshOutcome::Refreshed { record, groups, written } = outcome else {
        panic!("expected a refresh");
    };

    assert_eq!(groups[0], (FieldGroup::Profile, Tier::Primary));
    assert_eq!(groups.len(), 6);
    assert_eq!(written.len(), 11);
    assert!(!written.contains(&ForceField::Profile));
    assert_eq!(record.ruleset_version, Some(3));

    let stored = orchestrator.store().load("senecio").unwrap();
    assert_eq!(stored, record);
    assert_eq!(stored.attribute(ForceField::Profile), None);
    assert_eq!(
        stored.attribute(ForceField::DisplayName),
        Some(&json!("String of pearls"))
    );
    assert_eq!(
        stored.attribute(ForceField::PropagationMethods),
        Some(&json!(["Stem cuttings laid on soil", "Single pearls pressed into mix"]))
    );

    let transport = orchestrator.client().transport();
    assert_eq!(transport.first_calls()[0], "profile");
    for envelope in transport.sent().iter().filter(|e| schema_name(e) != "profile") {
        assert!(
            context_of(envelope).contains("summary: A trailing succulent from southern Africa."),
            "{} did not see the profile",
            schema_name(envelope)
        );
    }
    assert_eq!(orchestrator.client().pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn only_forced_fields_are_written() {
    let mut record = PlantRecord::new("senecio", "Curio rowleyanus").with_ruleset_version(2);
    record.attributes.insert(ForceField::CareLight, json!("kept light"));
    record.attributes.insert(ForceField::Availability, json!("kept availability"));
    let orchestrator = orchestrator(full_service(), [record]);

    let plan = orchestrator.plan("senecio", None).unwrap();
    assert_eq!(
        plan.forced.iter().copied().collect::<Vec<_>>(),
        vec![
            ForceField::Profile,
            ForceField::CareWater,
            ForceField::SoilDescription,
            ForceField::PropagationMethods,
            ForceField::Description,
            ForceField::DisplayName,
        ]
    );

    let RefreshOutcome::Refreshed { record, written, .. } =
        orchestrator.refresh("senecio", None).await.unwrap()
    else {
        panic!("expected a refresh");
    };

    assert_eq!(
        written,
        vec![
            ForceField::CareWater,
            ForceField::SoilDescription,
            ForceField::PropagationMethods,
            ForceField::Description,
            ForceField::DisplayName,
        ]
    );
    assert_eq!(record.attribute(ForceField::CareLight), Some(&json!("kept light")));
    assert_eq!(
        record.attribute(ForceField::Availability),
        Some(&json!("kept availability"))
    );
    assert_eq!(record.attribute(ForceField::Rarity), None);
    assert_eq!(
        record.attribute(ForceField::CareWater),
        Some(&json!("Water when the soil is fully dry."))
    );
    assert_eq!(record.ruleset_version, Some(3));
}

#[tokio::test(start_paused = true)]
async fn up_to_date_record_makes_no_calls() {
    let record = PlantRecord::new("pilea", "Pilea peperomioides").with_ruleset_version(3);
    let orchestrator = orchestrator(KeyedTransport::new(), [record.clone()]);

    let outcome = orchestrator.refresh("pilea", None).await.unwrap();
    assert_eq!(
        outcome,
        RefreshOutcome::UpToDate {
            stored_version: Some(3),
            target_version: 3,
        }
    );
    assert!(orchestrator.client().transport().sent().is_empty());
    assert_eq!(orchestrator.store().load("pilea").unwrap(), record);
}

#[tokio::test(start_paused = true)]
async fn explicit_target_limits_the_refresh() {
    let record = PlantRecord::new("pilea", "Pilea peperomioides").with_ruleset_version(1);
    let orchestrator = orchestrator(full_service(), [record]);

    let plan = orchestrator.plan("pilea", Some(2)).unwrap();
    assert_eq!(
        plan.forced.iter().copied().collect::<Vec<_>>(),
        vec![
            ForceField::Profile,
            ForceField::CareLight,
            ForceField::CareWater,
            ForceField::SoilDescription,
            ForceField::Description,
            ForceField::DisplayName,
        ]
    );
    assert_eq!(
        plan.groups,
        vec![
            FieldGroup::Profile,
            FieldGroup::Care,
            FieldGroup::Soil,
            FieldGroup::Overview,
            FieldGroup::Naming,
        ]
    );

    let RefreshOutcome::Refreshed { record, .. } =
        orchestrator.refresh("pilea", Some(2)).await.unwrap()
    else {
        panic!("expected a refresh");
    };
    assert_eq!(record.ruleset_version, Some(2));
    assert_eq!(record.attribute(ForceField::PropagationMethods), None);
}

#[tokio::test(start_paused = true)]
async fn failed_group_leaves_record_untouched() {
    let record = PlantRecord::new("senecio", "Curio rowleyanus").with_ruleset_version(2);
    let transport = KeyedTransport::new()
        .on("profile", reply(json!({
            "summary": "s", "growth_habit": "g", "native_range": "n", "hardiness": "h"
        })))
        .on("care", reply(json!({
            "care_light": "l", "care_water": "w", "care_temp_humidity": "t",
            "care_fertilizer": "f", "care_pruning": "p"
        })))
        .on("soil", Step::Fail(TransportError::network("connection reset")))
        .on("soil", Step::Fail(TransportError::network("connection reset")))
        .on("soil", Step::Fail(TransportError::status(503, "service unavailable")))
        .on("propagation", reply(json!({"propagation_methods": ["cuttings"]})))
        .on("overview", reply(json!({"description": "d", "availability": "a", "rarity": "r"})))
        .on("naming", reply(json!({"display_name": "n"})));
    let orchestrator = orchestrator(transport, [record.clone()]);

    let err = orchestrator.refresh("senecio", None).await.unwrap_err();
    match &err {
        OrchestratorError::Generation { group, source } => {
            assert_eq!(*group, FieldGroup::Soil);
            assert!(matches!(source, GenerationError::Transport(e) if e.status == Some(503)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.to_string(), "soil generation failed: service unavailable");
    assert_eq!(orchestrator.store().load("senecio").unwrap(), record);
}

#[tokio::test(start_paused = true)]
async fn missing_record_is_a_store_error() {
    let orchestrator = orchestrator(KeyedTransport::new(), []);
    let err = orchestrator.refresh("nope", None).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Store(CoreError::RecordNotFound(ref id)) if id == "nope"
    ));
    assert!(orchestrator.client().transport().sent().is_empty());
}
