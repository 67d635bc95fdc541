use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use fernbook_core::{FieldGroup, ForceField, GeneratorSettings, PlantRecord};

use crate::engine::RegenerationRequest;

const KNOWN_VALUE_LIMIT: usize = 160;

// --- Payloads ---
//
// Persisted payload keys are record column names, so a payload object maps
// straight onto record attributes.

/// Upstream synthesis every other group reads. Never stored.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProfilePayload {
    /// Two or three sentences on what the plant is and how it grows
    pub summary: String,
    /// Growth habit, e.g. "climbing epiphyte"
    pub growth_habit: String,
    pub native_range: String,
    /// Cold tolerance, e.g. "USDA 10-12, damaged below 10 °C"
    pub hardiness: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CarePayload {
    pub care_light: String,
    pub care_water: String,
    pub care_temp_humidity: String,
    pub care_fertilizer: String,
    pub care_pruning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SoilPayload {
    pub soil_description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PropagationPayload {
    /// One entry per method, most reliable first
    pub propagation_methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OverviewPayload {
    pub description: String,
    /// How easily the plant can be bought, e.g. "widely available"
    pub availability: String,
    /// "common", "uncommon" or "rare"
    pub rarity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NamingPayload {
    pub display_name: String,
}

/// JSON schema for `P` in the form strict structured output accepts.
pub fn strict_schema<P: JsonSchema>() -> Value {
    let mut schema = schemars::schema_for!(P).to_value();
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
    }
    schema
}

// --- Instructions ---

const PREAMBLE: &str = "You are a horticulture reference writer for a houseplant care app. \
Write for hobbyists: plain language, concrete numbers where they exist (hours of light, \
temperatures in °C, watering intervals), no marketing tone. If the species is uncertain, \
describe the genus and say so.";

pub fn instruction(group: FieldGroup) -> String {
    let task = match group {
        FieldGroup::Profile => {
            "Summarise the plant: what it is, how it grows, where it comes from and how much \
cold it tolerates. This summary is used as background for later questions."
        }
        FieldGroup::Care => {
            "Write care guidance. care_light: light level and exposure. care_water: how and when \
to water, signs of over- and under-watering. care_temp_humidity: temperature range and humidity \
needs. care_fertilizer: feeding schedule and strength. care_pruning: when and how to prune."
        }
        FieldGroup::Soil => {
            "Describe the ideal potting mix: components with rough proportions, drainage and pH."
        }
        FieldGroup::Propagation => {
            "List practical propagation methods for a home grower, each as one short sentence \
naming the method and the key step."
        }
        FieldGroup::Overview => {
            "Write a short description of the plant for its detail page, then state how \
available it is to buy and how rare it is in cultivation."
        }
        FieldGroup::Naming => {
            "Choose the display name: the most widely used English common name, or the \
scientific name if no common name is established."
        }
    };
    format!("{}\n\n{}", PREAMBLE, task)
}

// --- Context ---

/// Compact text rendering of a record for the model.
pub fn serialize_record(record: &PlantRecord, profile: Option<&Value>) -> String {
    let mut out = String::with_capacity(1024);

    out.push_str("PLANT: \"");
    out.push_str(&record.scientific_name);
    out.push('"');
    if let Some(common) = record.common_name.as_deref().filter(|c| !c.is_empty()) {
        out.push_str(" (common: ");
        out.push_str(common);
        out.push(')');
    }
    out.push('\n');

    if let Some(profile) = profile {
        out.push_str("PROFILE:\n");
        for (key, value) in profile.as_object().into_iter().flatten() {
            out.push_str("  ");
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&value_text(value));
            out.push('\n');
        }
    }

    let known: Vec<_> = record
        .attributes
        .iter()
        .filter(|(field, _)| field.is_persisted())
        .collect();
    if !known.is_empty() {
        out.push_str("KNOWN:\n");
        for (field, value) in known {
            out.push_str("  ");
            out.push_str(field.as_str());
            out.push_str(": ");
            out.push_str(&truncate(&value_text(value), KNOWN_VALUE_LIMIT));
            out.push('\n');
        }
    }

    out
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join("; "),
        other => other.to_string(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

/// The structured-generation request for one stale group of `record`.
pub fn request_for(
    group: FieldGroup,
    record: &PlantRecord,
    profile: Option<&Value>,
    settings: &GeneratorSettings,
) -> RegenerationRequest {
    let name = group.as_str();
    let schema = match group {
        FieldGroup::Profile => strict_schema::<ProfilePayload>(),
        FieldGroup::Care => strict_schema::<CarePayload>(),
        FieldGroup::Soil => strict_schema::<SoilPayload>(),
        FieldGroup::Propagation => strict_schema::<PropagationPayload>(),
        FieldGroup::Overview => strict_schema::<OverviewPayload>(),
        FieldGroup::Naming => strict_schema::<NamingPayload>(),
    };

    RegenerationRequest::new(name, schema, instruction(group), serialize_record(record, profile))
        .model(&settings.model)
        .timeout_ms(settings.timeout_ms)
        .max_output_tokens(settings.max_output_tokens)
}

/// Deserialize `payload` as `group`'s payload type, rejecting anything off-schema.
pub fn check_payload(group: FieldGroup, payload: &Value) -> Result<(), serde_json::Error> {
    fn check<P: serde::de::DeserializeOwned>(payload: &Value) -> Result<(), serde_json::Error> {
        P::deserialize(payload).map(|_| ())
    }
    match group {
        FieldGroup::Profile => check::<ProfilePayload>(payload),
        FieldGroup::Care => check::<CarePayload>(payload),
        FieldGroup::Soil => check::<SoilPayload>(payload),
        FieldGroup::Propagation => check::<PropagationPayload>(payload),
        FieldGroup::Overview => check::<OverviewPayload>(payload),
        FieldGroup::Naming => check::<NamingPayload>(payload),
    }
}

/// Payload entries that name a persisted field.
pub fn payload_fields(payload: &Value) -> Vec<(ForceField, Value)> {
    payload
        .as_object()
        .into_iter()
        .flatten()
        .filter_map(|(key, value)| {
            let field: ForceField = key.parse().ok()?;
            field.is_persisted().then(|| (field, value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_schema_forbids_extra_keys() {
        let schema = strict_schema::<CarePayload>();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert!(schema.get("$schema").is_none());
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 5);
    }

    #[test]
    fn persisted_payload_keys_are_column_names() {
        for group in FieldGroup::ALL.into_iter().filter(|g| *g != FieldGroup::Profile) {
            let schema = request_for(
                group,
                &PlantRecord::new("p", "Pilea peperomioides"),
                None,
                &GeneratorSettings::default(),
            )
            .schema;
            let keys: Vec<&String> = schema["properties"].as_object().unwrap().keys().collect();
            let expected: Vec<&str> = group.fields().iter().map(|f| f.as_str()).collect();
            assert_eq!(keys.len(), expected.len(), "{group}");
            for key in keys {
                assert!(expected.contains(&key.as_str()), "{group}: {key}");
            }
        }
    }

    #[test]
    fn serialize_record_includes_profile_and_known_fields() {
        let mut record =
            PlantRecord::new("p", "Monstera deliciosa").with_common_name("Swiss cheese plant");
        record.attributes.insert(ForceField::CareLight, json!("Bright, indirect light."));
        record
            .attributes
            .insert(ForceField::PropagationMethods, json!(["Stem cuttings", "Air layering"]));
        let profile = json!({"summary": "A climbing aroid."});

        let text = serialize_record(&record, Some(&profile));
        assert!(text.starts_with("PLANT: \"Monstera deliciosa\" (common: Swiss cheese plant)\n"));
        assert!(text.contains("PROFILE:\n  summary: A climbing aroid.\n"));
        assert!(text.contains("  care_light: Bright, indirect light.\n"));
        assert!(text.contains("  propagation_methods: Stem cuttings; Air layering\n"));
    }

    #[test]
    fn long_known_values_are_truncated_on_char_boundaries() {
        let mut record = PlantRecord::new("p", "Ficus lyrata");
        record
            .attributes
            .insert(ForceField::Description, json!("é".repeat(300)));
        let text = serialize_record(&record, None);
        let line = text.lines().find(|l| l.contains("description")).unwrap();
        assert!(line.ends_with("..."));
        assert_eq!(line.chars().filter(|c| *c == 'é').count(), KNOWN_VALUE_LIMIT);
    }

    #[test]
    fn request_uses_settings() {
        let settings = GeneratorSettings {
            model: "small-model".into(),
            timeout_ms: 12_000,
            max_output_tokens: 500,
            ..GeneratorSettings::default()
        };
        let record = PlantRecord::new("p", "Hoya carnosa");
        let request = request_for(FieldGroup::Soil, &record, None, &settings);
        assert_eq!(request.model, "small-model");
        assert_eq!(request.max_output_tokens, 500);
        assert_eq!(request.timeout.as_millis(), 12_000);
        assert_eq!(request.schema_name, "soil");
        assert!(request.instruction.contains("potting mix"));
    }

    #[test]
    fn check_payload_rejects_missing_and_extra_keys() {
        assert!(check_payload(FieldGroup::Soil, &json!({"soil_description": "gritty"})).is_ok());
        assert!(check_payload(FieldGroup::Soil, &json!({})).is_err());
        assert!(check_payload(
            FieldGroup::Soil,
            &json!({"soil_description": "gritty", "ph": 6})
        )
        .is_err());
        let not_a_list = json!({"propagation_methods": "cuttings"});
        assert!(check_payload(FieldGroup::Propagation, &not_a_list).is_err());
    }

    #[test]
    fn payload_fields_skip_virtual_and_unknown_keys() {
        let payload = json!({"care_light": "bright", "profile": "x", "mood": "happy"});
        assert_eq!(payload_fields(&payload), vec![(ForceField::CareLight, json!("bright"))]);
    }
}
