//! Dosage instructions and their scheduling.
//!
//! Responsibilities:
//! - Model `Dosage`, `Dosage.doseAndRate`, `Timing` and `Timing.repeat`
//! - Resolve the `asNeeded[x]`, `dose[x]`, `rate[x]` and `bounds[x]` choice families
//! - Normalise the scalar-or-list fields of `Timing.repeat` to ordered lists
//!
//! Notes:
//! - `dayOfWeek`, `timeOfDay` and `when` are always lists once built, even when the input
//!   carried a single bare value.

use crate::builder::{expect_object, BuildContext, BuildError};
use crate::choice::{self, Choice, ChoiceFamily};
use crate::datatypes::{
    build_codeable_concept, build_duration, build_period, build_quantity, build_range,
    build_ratio, CodeableConcept, Duration, Period, Quantity, Range, Ratio,
};
use crate::primitive::{
    kind, BooleanValue, CodeValue, DateTimeValue, DecimalValue, IntegerValue, PositiveIntValue,
    StringValue, TimeValue, UnsignedIntValue,
};
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Choice families
// ============================================================================

/// `Dosage.asNeeded[x]`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum AsNeeded {
    #[serde(rename = "asNeededBoolean")]
    Boolean(BooleanValue),
    #[serde(rename = "asNeededCodeableConcept")]
    CodeableConcept(CodeableConcept),
}

impl Choice for AsNeeded {
    const FAMILY: ChoiceFamily = choice::AS_NEEDED;

    fn key(&self) -> &'static str {
        match self {
            AsNeeded::Boolean(_) => "asNeededBoolean",
            AsNeeded::CodeableConcept(_) => "asNeededCodeableConcept",
        }
    }

    fn build_variant(key: &str, raw: &Value, cx: &mut BuildContext) -> Option<Self> {
        match key {
            "asNeededBoolean" => cx
                .primitive_value::<kind::Boolean>(raw)
                .map(AsNeeded::Boolean),
            _ => cx
                .value(raw, build_codeable_concept)
                .map(AsNeeded::CodeableConcept),
        }
    }
}

/// `Dosage.doseAndRate.dose[x]`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Dose {
    #[serde(rename = "doseRange")]
    Range(Range),
    #[serde(rename = "doseQuantity")]
    Quantity(Quantity),
}

impl Choice for Dose {
    const FAMILY: ChoiceFamily = choice::DOSE;

    fn key(&self) -> &'static str {
        match self {
            Dose::Range(_) => "doseRange",
            Dose::Quantity(_) => "doseQuantity",
        }
    }

    fn build_variant(key: &str, raw: &Value, cx: &mut BuildContext) -> Option<Self> {
        match key {
            "doseRange" => cx.value(raw, build_range).map(Dose::Range),
            _ => cx.value(raw, build_quantity).map(Dose::Quantity),
        }
    }
}

/// `Dosage.doseAndRate.rate[x]`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Rate {
    #[serde(rename = "rateRatio")]
    Ratio(Ratio),
    #[serde(rename = "rateRange")]
    Range(Range),
    #[serde(rename = "rateQuantity")]
    Quantity(Quantity),
}

impl Choice for Rate {
    const FAMILY: ChoiceFamily = choice::RATE;

    fn key(&self) -> &'static str {
        match self {
            Rate::Ratio(_) => "rateRatio",
            Rate::Range(_) => "rateRange",
            Rate::Quantity(_) => "rateQuantity",
        }
    }

    fn build_variant(key: &str, raw: &Value, cx: &mut BuildContext) -> Option<Self> {
        match key {
            "rateRatio" => cx.value(raw, build_ratio).map(Rate::Ratio),
            "rateRange" => cx.value(raw, build_range).map(Rate::Range),
            _ => cx.value(raw, build_quantity).map(Rate::Quantity),
        }
    }
}

/// `Timing.repeat.bounds[x]`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Bounds {
    #[serde(rename = "boundsDuration")]
    Duration(Duration),
    #[serde(rename = "boundsRange")]
    Range(Range),
    #[serde(rename = "boundsPeriod")]
    Period(Period),
}

impl Choice for Bounds {
    const FAMILY: ChoiceFamily = choice::BOUNDS;

    fn key(&self) -> &'static str {
        match self {
            Bounds::Duration(_) => "boundsDuration",
            Bounds::Range(_) => "boundsRange",
            Bounds::Period(_) => "boundsPeriod",
        }
    }

    fn build_variant(key: &str, raw: &Value, cx: &mut BuildContext) -> Option<Self> {
        match key {
            "boundsDuration" => cx.value(raw, build_duration).map(Bounds::Duration),
            "boundsRange" => cx.value(raw, build_range).map(Bounds::Range),
            _ => cx.value(raw, build_period).map(Bounds::Period),
        }
    }
}

// ============================================================================
// Timing
// ============================================================================

/// `Timing.repeat`: when and how often an event recurs.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingRepeat {
    #[serde(flatten)]
    pub bounds: Option<Bounds>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<PositiveIntValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_max: Option<PositiveIntValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<DecimalValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_max: Option<DecimalValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_unit: Option<CodeValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<PositiveIntValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_max: Option<PositiveIntValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<DecimalValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_max: Option<DecimalValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_unit: Option<CodeValue>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub day_of_week: Vec<CodeValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub time_of_day: Vec<TimeValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<CodeValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<UnsignedIntValue>,
}

pub fn build_timing_repeat(raw: &Value, cx: &mut BuildContext) -> Result<TimingRepeat, BuildError> {
    let map = expect_object(raw)?;
    Ok(TimingRepeat {
        bounds: choice::resolve(map, cx),
        count: cx.primitive(map, "count"),
        count_max: cx.primitive(map, "countMax"),
        duration: cx.primitive(map, "duration"),
        duration_max: cx.primitive(map, "durationMax"),
        duration_unit: cx.primitive(map, "durationUnit"),
        frequency: cx.primitive(map, "frequency"),
        frequency_max: cx.primitive(map, "frequencyMax"),
        period: cx.primitive(map, "period"),
        period_max: cx.primitive(map, "periodMax"),
        period_unit: cx.primitive(map, "periodUnit"),
        day_of_week: cx.primitive_list(map, "dayOfWeek"),
        time_of_day: cx.primitive_list(map, "timeOfDay"),
        when: cx.primitive_list(map, "when"),
        offset: cx.primitive(map, "offset"),
    })
}

/// A schedule: explicit event times, a repeat rule, or a coded shorthand (`BID`, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Timing {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event: Vec<DateTimeValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<TimingRepeat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
}

pub fn build_timing(raw: &Value, cx: &mut BuildContext) -> Result<Timing, BuildError> {
    let map = expect_object(raw)?;
    Ok(Timing {
        event: cx.primitive_list(map, "event"),
        repeat: cx.composite(map, "repeat", build_timing_repeat),
        code: cx.composite(map, "code", build_codeable_concept),
    })
}

// ============================================================================
// Dosage
// ============================================================================

/// One `Dosage.doseAndRate` entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DoseAndRate {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub dose_type: Option<CodeableConcept>,

    #[serde(flatten)]
    pub dose: Option<Dose>,

    #[serde(flatten)]
    pub rate: Option<Rate>,
}

pub fn build_dose_and_rate(raw: &Value, cx: &mut BuildContext) -> Result<DoseAndRate, BuildError> {
    let map = expect_object(raw)?;
    Ok(DoseAndRate {
        dose_type: cx.composite(map, "type", build_codeable_concept),
        dose: choice::resolve(map, cx),
        rate: choice::resolve(map, cx),
    })
}

/// How a medication is to be taken.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dosage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<IntegerValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<StringValue>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_instruction: Vec<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_instruction: Option<StringValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,

    #[serde(flatten)]
    pub as_needed: Option<AsNeeded>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dose_and_rate: Vec<DoseAndRate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dose_per_period: Option<Ratio>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dose_per_administration: Option<Quantity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dose_per_lifetime: Option<Quantity>,
}

pub fn build_dosage(raw: &Value, cx: &mut BuildContext) -> Result<Dosage, BuildError> {
    let map = expect_object(raw)?;
    Ok(Dosage {
        sequence: cx.primitive(map, "sequence"),
        text: cx.primitive(map, "text"),
        additional_instruction: cx.list(map, "additionalInstruction", build_codeable_concept),
        patient_instruction: cx.primitive(map, "patientInstruction"),
        timing: cx.composite(map, "timing", build_timing),
        as_needed: choice::resolve(map, cx),
        site: cx.composite(map, "site", build_codeable_concept),
        route: cx.composite(map, "route", build_codeable_concept),
        method: cx.composite(map, "method", build_codeable_concept),
        dose_and_rate: cx.list(map, "doseAndRate", build_dose_and_rate),
        max_dose_per_period: cx.composite(map, "maxDosePerPeriod", build_ratio),
        max_dose_per_administration: cx.composite(map, "maxDosePerAdministration", build_quantity),
        max_dose_per_lifetime: cx.composite(map, "maxDosePerLifetime", build_quantity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::ChoicePolicy;
    use crate::diagnostics::DiagnosticKind;
    use serde_json::json;

    fn cx() -> BuildContext {
        BuildContext::new(ChoicePolicy::default())
    }

    fn codes(values: &[CodeValue]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn day_of_week_scalar_becomes_single_element_list() {
        let repeat = build_timing_repeat(&json!({"dayOfWeek": "mon"}), &mut cx()).expect("repeat");
        assert_eq!(codes(&repeat.day_of_week), vec!["mon"]);

        let repeat =
            build_timing_repeat(&json!({"dayOfWeek": ["mon", "tue"]}), &mut cx()).expect("repeat");
        assert_eq!(codes(&repeat.day_of_week), vec!["mon", "tue"]);
    }

    #[test]
    fn repeat_keeps_every_field() {
        let raw = json!({
            "boundsPeriod": {"start": "2023-05-01", "end": "2023-05-10"},
            "count": 10,
            "countMax": 12,
            "duration": 30,
            "durationMax": 45,
            "durationUnit": "min",
            "frequency": 2,
            "frequencyMax": 3,
            "period": 1,
            "periodMax": 2,
            "periodUnit": "d",
            "timeOfDay": ["08:00:00", "20:00:00"],
            "when": "PCM",
            "offset": 0
        });
        let repeat = build_timing_repeat(&raw, &mut cx()).expect("repeat");
        match &repeat.bounds {
            Some(Bounds::Period(period)) => {
                assert_eq!(period.end.as_ref().map(|e| e.to_string()).as_deref(), Some("2023-05-10"));
            }
            other => panic!("expected Period bounds, got {other:?}"),
        }
        assert_eq!(repeat.time_of_day.len(), 2);
        assert_eq!(codes(&repeat.when), vec!["PCM"]);
        assert!(repeat.offset.is_some());

        let value = serde_json::to_value(&repeat).expect("serialise");
        assert_eq!(value["when"], json!(["PCM"]));
        assert_eq!(value["offset"], json!(0));
        assert_eq!(value["countMax"], json!(12));
        assert!(value.get("boundsPeriod").is_some());
    }

    #[test]
    fn timing_events_are_date_time_checked() {
        let mut context = cx();
        let timing = build_timing(
            &json!({"event": ["2023-05-01T08:00:00Z", "tomorrow"], "code": {"text": "BID"}}),
            &mut context,
        )
        .expect("timing");
        assert_eq!(timing.event.len(), 1);
        assert!(timing.code.is_some());

        let diagnostics = context.into_diagnostics();
        let only = diagnostics.iter().next().expect("diagnostic");
        assert_eq!(only.path, "event[1]");
        assert_eq!(only.kind, DiagnosticKind::InvalidPrimitiveFormat);
    }

    #[test]
    fn dose_and_rate_resolve_independently() {
        let entry = build_dose_and_rate(
            &json!({
                "type": {"text": "ordered"},
                "doseQuantity": {"value": 1, "unit": "tablet"},
                "rateRatio": {"numerator": {"value": 1}, "denominator": {"value": 8, "unit": "h"}}
            }),
            &mut cx(),
        )
        .expect("dose and rate");
        assert!(matches!(entry.dose, Some(Dose::Quantity(_))));
        assert!(matches!(entry.rate, Some(Rate::Ratio(_))));

        let value = serde_json::to_value(&entry).expect("serialise");
        assert_eq!(value["doseQuantity"]["unit"], "tablet");
        assert_eq!(value["rateRatio"]["denominator"]["value"], 8);
        assert_eq!(value["type"]["text"], "ordered");
    }

    #[test]
    fn dose_prefers_range_over_quantity() {
        let mut context = cx();
        let entry = build_dose_and_rate(
            &json!({
                "doseQuantity": {"value": 1},
                "doseRange": {"low": {"value": 1}, "high": {"value": 2}}
            }),
            &mut context,
        )
        .expect("dose and rate");
        assert_eq!(entry.dose.as_ref().map(Choice::key), Some("doseRange"));
        assert_eq!(
            context
                .into_diagnostics()
                .of_kind(DiagnosticKind::ChoiceTypeAmbiguous)
                .count(),
            1
        );
    }

    #[test]
    fn as_needed_false_is_kept() {
        let dosage = build_dosage(&json!({"asNeededBoolean": false}), &mut cx()).expect("dosage");
        match dosage.as_needed {
            Some(AsNeeded::Boolean(flag)) => assert_eq!(flag.value().as_bool(), Some(false)),
            other => panic!("expected Boolean, got {other:?}"),
        }
    }

    #[test]
    fn dosage_max_doses_use_their_own_slots() {
        let dosage = build_dosage(
            &json!({
                "maxDosePerPeriod": {"numerator": {"value": 4}, "denominator": {"value": 1, "unit": "d"}},
                "maxDosePerAdministration": {"value": 2, "unit": "tablet"},
                "maxDosePerLifetime": {"value": 100, "unit": "tablet"}
            }),
            &mut cx(),
        )
        .expect("dosage");
        let administration = dosage.max_dose_per_administration.expect("administration");
        let lifetime = dosage.max_dose_per_lifetime.expect("lifetime");
        assert_eq!(administration.value.map(|v| v.to_string()).as_deref(), Some("2"));
        assert_eq!(lifetime.value.map(|v| v.to_string()).as_deref(), Some("100"));
        assert!(dosage.max_dose_per_period.is_some());
    }

    #[test]
    fn additional_instructions_build_independently() {
        let mut context = cx();
        let dosage = build_dosage(
            &json!({
                "additionalInstruction": [
                    {"coding": [{"code": "311504000", "display": "With or after food"}]},
                    42,
                    {"text": "Avoid alcohol"}
                ]
            }),
            &mut context,
        )
        .expect("dosage");
        assert_eq!(dosage.additional_instruction.len(), 2);
        assert_eq!(
            dosage.additional_instruction[1]
                .text
                .as_ref()
                .map(|t| t.to_string())
                .as_deref(),
            Some("Avoid alcohol")
        );
        let diagnostics = context.into_diagnostics();
        assert_eq!(
            diagnostics.iter().next().map(|d| d.path.as_str()),
            Some("additionalInstruction[1]")
        );
    }

    #[test]
    fn nested_timing_paths_are_reported() {
        let mut context = cx();
        let dosage = build_dosage(
            &json!({"timing": {"repeat": {"boundsDuration": "ten days", "frequency": 1}}}),
            &mut context,
        )
        .expect("dosage");
        let repeat = dosage.timing.and_then(|t| t.repeat).expect("repeat");
        assert!(repeat.bounds.is_none());
        assert!(repeat.frequency.is_some());

        let diagnostics = context.into_diagnostics();
        assert_eq!(
            diagnostics.iter().next().map(|d| d.path.as_str()),
            Some("timing.repeat.boundsDuration")
        );
    }
}
