//! Choice-type resolution.
//!
//! A FHIR choice element (`medication[x]`, `asNeeded[x]`, ...) appears in JSON under one of
//! several type-suffixed keys. Each family is declared once here with its candidate keys in
//! precedence order, and each has an enum implementing [`Choice`] that carries the payload.
//!
//! FHIR allows at most one key of a family to be populated. Lenient clients do not always
//! comply, so the behaviour for several populated keys is a [`ChoicePolicy`].

use crate::builder::BuildContext;
use crate::diagnostics::DiagnosticKind;
use crate::primitive::is_empty;
use crate::FhirError;
use serde_json::{Map, Value};
use std::str::FromStr;

/// A choice family: the logical element name and its candidate keys in precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChoiceFamily {
    pub name: &'static str,
    pub keys: &'static [&'static str],
}

impl ChoiceFamily {
    /// Candidate keys that are populated in `map`, in precedence order.
    pub fn present_keys(&self, map: &Map<String, Value>) -> Vec<&'static str> {
        self.keys
            .iter()
            .copied()
            .filter(|key| map.get(*key).is_some_and(|value| !is_empty(value)))
            .collect()
    }
}

pub const MEDICATION: ChoiceFamily = ChoiceFamily {
    name: "medication",
    keys: &["medicationCodeableConcept", "medicationReference"],
};

pub const AS_NEEDED: ChoiceFamily = ChoiceFamily {
    name: "asNeeded",
    keys: &["asNeededBoolean", "asNeededCodeableConcept"],
};

pub const DOSE: ChoiceFamily = ChoiceFamily {
    name: "dose",
    keys: &["doseRange", "doseQuantity"],
};

pub const RATE: ChoiceFamily = ChoiceFamily {
    name: "rate",
    keys: &["rateRatio", "rateRange", "rateQuantity"],
};

pub const BOUNDS: ChoiceFamily = ChoiceFamily {
    name: "bounds",
    keys: &["boundsDuration", "boundsRange", "boundsPeriod"],
};

pub const ANNOTATION_AUTHOR: ChoiceFamily = ChoiceFamily {
    name: "author",
    keys: &["authorReference", "authorString"],
};

/// Every family this crate resolves.
pub const FAMILIES: &[ChoiceFamily] = &[
    MEDICATION,
    AS_NEEDED,
    DOSE,
    RATE,
    BOUNDS,
    ANNOTATION_AUTHOR,
];

/// What to do when more than one key of a family is populated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChoicePolicy {
    /// Take the first populated key in precedence order and record a diagnostic.
    #[default]
    FirstMatch,
    /// Fail the whole assembly with [`FhirError::AmbiguousChoice`].
    Reject,
}

impl ChoicePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ChoicePolicy::FirstMatch => "first-match",
            ChoicePolicy::Reject => "reject",
        }
    }
}

impl FromStr for ChoicePolicy {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-match" | "first_match" | "firstmatch" => Ok(ChoicePolicy::FirstMatch),
            "reject" => Ok(ChoicePolicy::Reject),
            other => Err(FhirError::InvalidInput(format!(
                "unknown choice policy '{other}' (expected 'first-match' or 'reject')"
            ))),
        }
    }
}

/// A tagged union for one choice family.
pub trait Choice: Sized {
    const FAMILY: ChoiceFamily;

    /// The JSON key this variant is written under.
    fn key(&self) -> &'static str;

    /// Build the variant for `key` from its raw value. Called with the path positioned at
    /// `key`; returns `None` (after recording a diagnostic where relevant) if the value
    /// does not build.
    fn build_variant(key: &str, raw: &Value, cx: &mut BuildContext) -> Option<Self>;
}

/// Resolve a choice family against the original map.
///
/// Scans the family's keys in precedence order and builds the first populated one. If the
/// winning key does not build, the family is absent and a diagnostic is recorded at that key;
/// lower-precedence keys are not tried.
pub fn resolve<C: Choice>(map: &Map<String, Value>, cx: &mut BuildContext) -> Option<C> {
    let family = C::FAMILY;
    let present = family.present_keys(map);
    let (&key, rest) = present.split_first()?;

    if !rest.is_empty() {
        match cx.policy() {
            ChoicePolicy::FirstMatch => {
                let ignored = rest.join(", ");
                cx.at_key(&format!("{}[x]", family.name), |cx| {
                    cx.record(
                        DiagnosticKind::ChoiceTypeAmbiguous,
                        format!("several {}[x] keys populated; using {key}, ignoring {ignored}", family.name),
                    )
                });
            }
            ChoicePolicy::Reject => {
                let path = cx.at_key(&format!("{}[x]", family.name), |cx| cx.path());
                cx.reject(FhirError::AmbiguousChoice {
                    path,
                    family: family.name,
                    keys: present.iter().map(|k| k.to_string()).collect(),
                });
                return None;
            }
        }
    }

    let raw = map.get(key)?;
    cx.at_key(key, |cx| {
        let recorded = cx.diagnostic_count();
        let built = C::build_variant(key, raw, cx);
        if built.is_none() && cx.diagnostic_count() == recorded {
            cx.record(
                DiagnosticKind::MalformedSubstructure,
                format!("{key} has no usable content; {}[x] left absent", family.name),
            );
        }
        built
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{CodeableConcept, Reference};
    use crate::medication_request::Medication;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn families_have_unique_keys() {
        let mut seen = std::collections::HashSet::new();
        for family in FAMILIES {
            for key in family.keys {
                assert!(seen.insert(*key), "duplicate choice key {key}");
                assert!(key.starts_with(family.name));
            }
        }
    }

    #[test]
    fn absent_family_resolves_to_none() {
        let map = object(json!({"status": "active"}));
        let mut cx = BuildContext::new(ChoicePolicy::FirstMatch);
        assert!(resolve::<Medication>(&map, &mut cx).is_none());
        assert!(cx.into_diagnostics().is_empty());
    }

    #[test]
    fn first_match_prefers_declared_precedence() {
        let map = object(json!({
            "medicationReference": {"reference": "Medication/abc"},
            "medicationCodeableConcept": {"text": "Amoxicillin"}
        }));

        for _ in 0..3 {
            let mut cx = BuildContext::new(ChoicePolicy::FirstMatch);
            let resolved = resolve::<Medication>(&map, &mut cx).expect("resolved");
            assert_eq!(resolved.key(), "medicationCodeableConcept");
            match resolved {
                Medication::CodeableConcept(CodeableConcept { text, .. }) => {
                    assert_eq!(text.map(|t| t.to_string()).as_deref(), Some("Amoxicillin"));
                }
                other => panic!("expected CodeableConcept, got {other:?}"),
            }
            let diagnostics = cx.into_diagnostics();
            assert_eq!(diagnostics.len(), 1);
            let only = diagnostics.iter().next().expect("diagnostic");
            assert_eq!(only.kind, DiagnosticKind::ChoiceTypeAmbiguous);
            assert_eq!(only.path, "medication[x]");
        }
    }

    #[test]
    fn reject_policy_records_rejection() {
        let map = object(json!({
            "medicationReference": {"reference": "Medication/abc"},
            "medicationCodeableConcept": {"text": "Amoxicillin"}
        }));
        let mut cx = BuildContext::new(ChoicePolicy::Reject);
        assert!(resolve::<Medication>(&map, &mut cx).is_none());
        match cx.take_rejection() {
            Some(FhirError::AmbiguousChoice { family, keys, .. }) => {
                assert_eq!(family, "medication");
                assert_eq!(keys, vec!["medicationCodeableConcept", "medicationReference"]);
            }
            other => panic!("expected AmbiguousChoice, got {other:?}"),
        }
    }

    #[test]
    fn empty_candidate_does_not_count_as_present() {
        let map = object(json!({
            "medicationCodeableConcept": {},
            "medicationReference": {"reference": "Medication/abc"}
        }));
        let mut cx = BuildContext::new(ChoicePolicy::Reject);
        let resolved = resolve::<Medication>(&map, &mut cx).expect("resolved");
        match resolved {
            Medication::Reference(Reference { reference, .. }) => {
                assert_eq!(
                    reference.map(|r| r.to_string()).as_deref(),
                    Some("Medication/abc")
                );
            }
            other => panic!("expected Reference, got {other:?}"),
        }
        assert!(cx.take_rejection().is_none());
    }

    #[test]
    fn winning_key_without_content_is_reported() {
        let map = object(json!({
            "medicationCodeableConcept": {"coding": []},
            "medicationReference": {"reference": "Medication/abc"}
        }));
        let mut cx = BuildContext::new(ChoicePolicy::FirstMatch);
        assert!(resolve::<Medication>(&map, &mut cx).is_none());

        let diagnostics = cx.into_diagnostics();
        let kinds: Vec<_> = diagnostics.iter().map(|d| (d.kind, d.path.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (DiagnosticKind::ChoiceTypeAmbiguous, "medication[x]"),
                (DiagnosticKind::MalformedSubstructure, "medicationCodeableConcept"),
            ]
        );
    }

    #[test]
    fn malformed_winner_is_reported_once() {
        let map = object(json!({"medicationReference": "Medication/abc"}));
        let mut cx = BuildContext::new(ChoicePolicy::FirstMatch);
        assert!(resolve::<Medication>(&map, &mut cx).is_none());

        let diagnostics = cx.into_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        let only = diagnostics.iter().next().expect("diagnostic");
        assert_eq!(only.kind, DiagnosticKind::MalformedSubstructure);
        assert_eq!(only.path, "medicationReference");
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("first-match".parse::<ChoicePolicy>().ok(), Some(ChoicePolicy::FirstMatch));
        assert_eq!(" Reject ".parse::<ChoicePolicy>().ok(), Some(ChoicePolicy::Reject));
        assert!("sometimes".parse::<ChoicePolicy>().is_err());
    }
}
