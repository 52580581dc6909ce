//! MedicationRequest resource assembly and serialisation.
//!
//! Responsibilities:
//! - Route each recognised top-level key of a raw MedicationRequest to its builder
//! - Resolve the `medication[x]` choice against the original input
//! - Carry unmodelled top-level fields (status, intent, priority, id, meta, ...) through
//!   verbatim
//! - Serialise the typed resource back to a FHIR JSON mapping
//!
//! Notes:
//! - Field routing is declared once in [`FIELD_RULES`]; the assembler loop is generic.
//! - Assembly never fails on malformed data below the top level. Problems are returned as
//!   [`Diagnostics`] alongside the resource.

use crate::builder::{BuildContext, BuildError};
use crate::choice::{self, Choice, ChoiceFamily, ChoicePolicy};
use crate::datatypes::{
    build_annotation, build_codeable_concept, build_identifier, build_reference, Annotation,
    CodeableConcept, Identifier, Reference,
};
use crate::diagnostics::Diagnostics;
use crate::dosage::{build_dosage, Dosage};
use crate::primitive::{value_kind, CanonicalValue, DateTimeValue, UriValue};
use crate::reference::{build_relative_reference, parse_reference};
use crate::{FhirError, FhirResult};
use serde::Serialize;
use serde_json::{Map, Value};

pub const RESOURCE_TYPE: &str = "MedicationRequest";

// ============================================================================
// Medication choice
// ============================================================================

/// `MedicationRequest.medication[x]`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Medication {
    #[serde(rename = "medicationCodeableConcept")]
    CodeableConcept(CodeableConcept),
    #[serde(rename = "medicationReference")]
    Reference(Reference),
}

impl Choice for Medication {
    const FAMILY: ChoiceFamily = choice::MEDICATION;

    fn key(&self) -> &'static str {
        match self {
            Medication::CodeableConcept(_) => "medicationCodeableConcept",
            Medication::Reference(_) => "medicationReference",
        }
    }

    fn build_variant(key: &str, raw: &Value, cx: &mut BuildContext) -> Option<Self> {
        match key {
            "medicationCodeableConcept" => cx
                .value(raw, build_codeable_concept)
                .map(Medication::CodeableConcept),
            _ => cx.value(raw, build_reference).map(Medication::Reference),
        }
    }
}

// ============================================================================
// Resource
// ============================================================================

/// A typed FHIR R4 MedicationRequest.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationRequest {
    /// Unmodelled top-level fields, kept in input order.
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,

    #[serde(flatten)]
    pub medication: Option<Medication>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub supporting_information: Vec<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authored_on: Option<DateTimeValue>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reason_code: Vec<CodeableConcept>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reason_reference: Vec<Reference>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instantiates_canonical: Vec<CanonicalValue>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instantiates_uri: Vec<UriValue>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub based_on: Vec<Reference>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub insurance: Vec<Reference>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<Annotation>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dosage_instruction: Vec<Dosage>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detected_issue: Vec<Reference>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_history: Vec<Reference>,
}

/// Per-call assembly settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblyOptions {
    pub choice_policy: ChoicePolicy,
}

impl AssemblyOptions {
    pub fn with_policy(choice_policy: ChoicePolicy) -> Self {
        Self { choice_policy }
    }
}

/// An assembled resource and the diagnostics recorded while building it.
#[derive(Clone, Debug, PartialEq)]
pub struct Transcoded {
    pub resource: MedicationRequest,
    pub diagnostics: Diagnostics,
}

// ============================================================================
// Field routing
// ============================================================================

type Apply = fn(&Map<String, Value>, &mut BuildContext, &mut MedicationRequest);

/// One routed top-level field: the keys it consumes and how it is attached.
pub struct FieldRule {
    pub keys: &'static [&'static str],
    apply: Apply,
}

/// Every top-level key the assembler models.
pub const FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        keys: &["identifier"],
        apply: |map, cx, out| out.identifier = cx.list(map, "identifier", build_identifier),
    },
    FieldRule {
        keys: &["category"],
        apply: |map, cx, out| out.category = cx.list(map, "category", build_codeable_concept),
    },
    FieldRule {
        keys: choice::MEDICATION.keys,
        apply: |map, cx, out| out.medication = choice::resolve(map, cx),
    },
    FieldRule {
        keys: &["subject"],
        apply: |map, cx, out| out.subject = cx.composite(map, "subject", build_subject),
    },
    FieldRule {
        keys: &["supportingInformation"],
        apply: |map, cx, out| {
            out.supporting_information = cx.list(map, "supportingInformation", build_reference)
        },
    },
    FieldRule {
        keys: &["authoredOn"],
        apply: |map, cx, out| out.authored_on = cx.primitive(map, "authoredOn"),
    },
    FieldRule {
        keys: &["reasonCode"],
        apply: |map, cx, out| out.reason_code = cx.list(map, "reasonCode", build_codeable_concept),
    },
    FieldRule {
        keys: &["reasonReference"],
        apply: |map, cx, out| {
            out.reason_reference = cx.list(map, "reasonReference", build_reference)
        },
    },
    FieldRule {
        keys: &["instantiatesCanonical"],
        apply: |map, cx, out| {
            out.instantiates_canonical = cx.primitive_list(map, "instantiatesCanonical")
        },
    },
    FieldRule {
        keys: &["instantiatesUri"],
        apply: |map, cx, out| out.instantiates_uri = cx.primitive_list(map, "instantiatesUri"),
    },
    FieldRule {
        keys: &["basedOn"],
        apply: |map, cx, out| out.based_on = cx.list(map, "basedOn", build_reference),
    },
    FieldRule {
        keys: &["insurance"],
        apply: |map, cx, out| out.insurance = cx.list(map, "insurance", build_reference),
    },
    FieldRule {
        keys: &["note"],
        apply: |map, cx, out| out.note = cx.list(map, "note", build_annotation),
    },
    FieldRule {
        keys: &["dosageInstruction"],
        apply: |map, cx, out| {
            out.dosage_instruction = cx.list(map, "dosageInstruction", build_dosage)
        },
    },
    FieldRule {
        keys: &["detectedIssue"],
        apply: |map, cx, out| out.detected_issue = cx.list(map, "detectedIssue", build_reference),
    },
    FieldRule {
        keys: &["eventHistory"],
        apply: |map, cx, out| out.event_history = cx.list(map, "eventHistory", build_reference),
    },
];

fn is_modelled_key(key: &str) -> bool {
    key == "resourceType" || FIELD_RULES.iter().any(|rule| rule.keys.contains(&key))
}

/// Build `subject` as a relative reference rebuilt from the id in its `reference`.
///
/// The target type is the explicit `type` when present, otherwise the type parsed from
/// the reference string. A subject without a derivable id is kept as given.
fn build_subject(raw: &Value, cx: &mut BuildContext) -> Result<Reference, BuildError> {
    let reference = build_reference(raw, cx)?;
    let parsed = reference
        .reference
        .as_ref()
        .and_then(|text| text.as_str())
        .map(parse_reference)
        .unwrap_or_default();

    let resource_type = reference
        .resource_type
        .as_ref()
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .or(parsed.resource_type);

    match (resource_type, parsed.id) {
        (Some(resource_type), Some(id)) => {
            let display = reference.display.as_ref().and_then(|d| d.as_str());
            let mut rebuilt = build_relative_reference(&resource_type, &id, display);
            rebuilt.identifier = reference.identifier;
            Ok(rebuilt)
        }
        _ => Ok(reference),
    }
}

// ============================================================================
// Public operations
// ============================================================================

impl MedicationRequest {
    /// Assemble a typed resource from raw FHIR JSON.
    ///
    /// # Arguments
    ///
    /// * `raw` - a JSON object shaped like a FHIR R4 MedicationRequest
    /// * `options` - assembly settings, chiefly the choice-type policy
    ///
    /// # Returns
    ///
    /// The resource plus every diagnostic recorded while building it.
    ///
    /// # Errors
    ///
    /// * [`FhirError::InvalidInput`] - `raw` is not an object, or names another resource type
    /// * [`FhirError::AmbiguousChoice`] - several keys of a choice family are populated and
    ///   the policy is [`ChoicePolicy::Reject`]
    pub fn deserialize(raw: &Value, options: &AssemblyOptions) -> FhirResult<Transcoded> {
        let map = raw.as_object().ok_or_else(|| {
            FhirError::InvalidInput(format!(
                "expected a {RESOURCE_TYPE} JSON object, got {}",
                value_kind(raw)
            ))
        })?;

        match map.get("resourceType") {
            None => {}
            Some(Value::String(name)) if name == RESOURCE_TYPE => {}
            Some(other) => {
                return Err(FhirError::InvalidInput(format!(
                    "expected resourceType {RESOURCE_TYPE}, got {other}"
                )));
            }
        }

        let mut cx = BuildContext::new(options.choice_policy);
        let mut resource = MedicationRequest::default();
        for rule in FIELD_RULES {
            (rule.apply)(map, &mut cx, &mut resource);
        }
        if let Some(err) = cx.take_rejection() {
            return Err(err);
        }

        resource.passthrough = map
            .iter()
            .filter(|(key, _)| !is_modelled_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Transcoded {
            resource,
            diagnostics: cx.into_diagnostics(),
        })
    }

    /// Serialise to a FHIR JSON object, `resourceType` first.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if the resource does not serialise to an object.
    pub fn serialize(&self) -> FhirResult<Map<String, Value>> {
        let mut out = Map::new();
        out.insert(
            "resourceType".to_string(),
            Value::String(RESOURCE_TYPE.to_string()),
        );
        match serde_json::to_value(self)? {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if key != "resourceType" {
                        out.insert(key, value);
                    }
                }
            }
            other => {
                return Err(FhirError::Translation(format!(
                    "{RESOURCE_TYPE} serialised to {} instead of an object",
                    value_kind(&other)
                )));
            }
        }
        Ok(out)
    }

    /// Parse JSON text and assemble it.
    pub fn from_json_str(text: &str, options: &AssemblyOptions) -> FhirResult<Transcoded> {
        let raw: Value = serde_json::from_str(text)?;
        Self::deserialize(&raw, options)
    }

    /// Serialise to pretty-printed JSON text.
    pub fn to_json_string(&self) -> FhirResult<String> {
        Ok(serde_json::to_string_pretty(&Value::Object(self.serialize()?))?)
    }

    pub fn id(&self) -> Option<&str> {
        self.passthrough_str("id")
    }

    pub fn status(&self) -> Option<&str> {
        self.passthrough_str("status")
    }

    pub fn intent(&self) -> Option<&str> {
        self.passthrough_str("intent")
    }

    pub fn priority(&self) -> Option<&str> {
        self.passthrough_str("priority")
    }

    fn passthrough_str(&self, key: &str) -> Option<&str> {
        self.passthrough.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use serde_json::json;

    fn assemble(raw: Value) -> Transcoded {
        MedicationRequest::deserialize(&raw, &AssemblyOptions::default()).expect("assembles")
    }

    #[test]
    fn rules_claim_each_key_once() {
        let mut seen = std::collections::HashSet::new();
        for rule in FIELD_RULES {
            for key in rule.keys {
                assert!(seen.insert(*key), "{key} routed twice");
            }
        }
        assert!(seen.contains("medicationReference"));
    }

    #[test]
    fn rejects_non_object_input() {
        let err = MedicationRequest::deserialize(&json!(["not", "a", "map"]), &AssemblyOptions::default())
            .expect_err("list input");
        match err {
            FhirError::InvalidInput(message) => assert!(message.contains("list")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn rejects_other_resource_types() {
        let err = MedicationRequest::deserialize(
            &json!({"resourceType": "Patient", "id": "1"}),
            &AssemblyOptions::default(),
        )
        .expect_err("wrong resource type");
        assert!(matches!(err, FhirError::InvalidInput(_)));
    }

    #[test]
    fn unmodelled_fields_pass_through_in_order() {
        let transcoded = assemble(json!({
            "resourceType": "MedicationRequest",
            "id": "mr-1",
            "meta": {"versionId": "2"},
            "status": "active",
            "intent": "order",
            "priority": "routine",
            "doNotPerform": false
        }));
        let resource = transcoded.resource;
        let keys: Vec<&str> = resource.passthrough.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["id", "meta", "status", "intent", "priority", "doNotPerform"]);
        assert_eq!(resource.status(), Some("active"));
        assert_eq!(resource.intent(), Some("order"));
        assert_eq!(resource.priority(), Some("routine"));
        assert_eq!(resource.id(), Some("mr-1"));
    }

    #[test]
    fn serialises_resource_type_first() {
        let transcoded = assemble(json!({"status": "draft", "intent": "plan"}));
        let out = transcoded.resource.serialize().expect("serialise");
        assert_eq!(out.keys().next().map(String::as_str), Some("resourceType"));
        assert_eq!(out["resourceType"], RESOURCE_TYPE);
        assert_eq!(out["status"], "draft");
    }

    #[test]
    fn list_fields_do_not_alias() {
        let transcoded = assemble(json!({
            "category": [{"text": "outpatient"}],
            "reasonCode": [{"text": "hypertension"}],
            "detectedIssue": [{"reference": "DetectedIssue/1"}],
            "eventHistory": [{"reference": "Provenance/1"}, {"reference": "Provenance/2"}]
        }));
        let resource = transcoded.resource;
        assert_eq!(resource.category.len(), 1);
        assert_eq!(resource.reason_code.len(), 1);
        assert_eq!(resource.detected_issue.len(), 1);
        assert_eq!(resource.event_history.len(), 2);
    }

    #[test]
    fn single_mapping_list_is_one_element() {
        let transcoded = assemble(json!({"basedOn": {"reference": "CarePlan/7"}}));
        assert_eq!(transcoded.resource.based_on.len(), 1);
        assert!(transcoded.diagnostics.is_empty());
    }

    #[test]
    fn subject_is_rebuilt_from_its_id() {
        let transcoded = assemble(json!({
            "subject": {"reference": "Patient/98baaf33", "display": "Jane Doe"}
        }));
        let subject = transcoded.resource.subject.expect("subject");
        assert_eq!(subject.reference.map(|r| r.to_string()).as_deref(), Some("Patient/98baaf33"));
        assert_eq!(subject.resource_type.map(|t| t.to_string()).as_deref(), Some("Patient"));
        assert_eq!(subject.display.map(|d| d.to_string()).as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn subject_without_id_is_kept() {
        let transcoded = assemble(json!({"subject": {"display": "Unknown patient"}}));
        let subject = transcoded.resource.subject.expect("subject");
        assert!(subject.reference.is_none());
        assert_eq!(subject.display.map(|d| d.to_string()).as_deref(), Some("Unknown patient"));
    }

    #[test]
    fn malformed_subject_is_absent() {
        let transcoded = assemble(json!({"subject": "Patient/1", "status": "active"}));
        assert!(transcoded.resource.subject.is_none());
        let only = transcoded.diagnostics.iter().next().expect("diagnostic");
        assert_eq!(only.path, "subject");
        assert_eq!(only.kind, DiagnosticKind::MalformedSubstructure);
    }

    #[test]
    fn ambiguous_medication_under_reject_fails() {
        let raw = json!({
            "medicationCodeableConcept": {"text": "Amoxicillin"},
            "medicationReference": {"reference": "Medication/abc"}
        });
        let err = MedicationRequest::deserialize(
            &raw,
            &AssemblyOptions::with_policy(ChoicePolicy::Reject),
        )
        .expect_err("ambiguous");
        match err {
            FhirError::AmbiguousChoice { path, family, .. } => {
                assert_eq!(path, "medication[x]");
                assert_eq!(family, "medication");
            }
            other => panic!("expected AmbiguousChoice, got {other:?}"),
        }
    }

    #[test]
    fn choice_keys_never_reach_passthrough() {
        let transcoded = assemble(json!({
            "medicationCodeableConcept": {"text": "Amoxicillin"},
            "medicationReference": {"reference": "Medication/abc"}
        }));
        assert!(transcoded.resource.passthrough.is_empty());
        assert_eq!(
            transcoded.resource.medication.as_ref().map(Choice::key),
            Some("medicationCodeableConcept")
        );
    }

    #[test]
    fn instantiates_lists_are_primitives() {
        let transcoded = assemble(json!({
            "instantiatesCanonical": "http://example.org/PlanDefinition/p1",
            "instantiatesUri": ["http://example.org/protocol/1", "http://example.org/protocol/2"]
        }));
        assert_eq!(transcoded.resource.instantiates_canonical.len(), 1);
        assert_eq!(transcoded.resource.instantiates_uri.len(), 2);
    }

    #[test]
    fn invalid_json_text_is_an_error() {
        let err = MedicationRequest::from_json_str("{not json", &AssemblyOptions::default())
            .expect_err("bad json");
        assert!(matches!(err, FhirError::Json(_)));
    }
}
