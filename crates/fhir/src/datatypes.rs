//! General-purpose FHIR datatypes and their builders.
//!
//! Responsibilities:
//! - Define typed structures for the general-purpose datatypes a medication order uses
//!   (Coding, CodeableConcept, Identifier, Reference, Quantity, Duration, Ratio, Range,
//!   Period, Annotation, Extension)
//! - Build each from a raw JSON mapping via a pure `build_*` function
//! - Serialise back to FHIR JSON through `serde`, omitting absent fields
//!
//! Notes:
//! - A coding always carries `display` and `system`; when the input omits them they are
//!   empty strings. Downstream consumers rely on those keys always being present.
//! - `Duration` is a distinct type over the same fields as `Quantity`.

use crate::builder::{expect_object, BuildContext, BuildError};
use crate::choice::{self, Choice, ChoiceFamily};
use crate::primitive::{
    kind, CodeValue, DateTimeValue, DecimalValue, Scalar, StringValue, UriValue,
};
use serde::Serialize;
use serde_json::Value;

pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";
pub const DATA_ABSENT_REASON_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/data-absent-reason";
pub const DATA_ABSENT_REASON_EXTENSION: &str =
    "http://hl7.org/fhir/StructureDefinition/data-absent-reason";
pub const NULL_FLAVOR_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-NullFlavor";

// ============================================================================
// Coding / CodeableConcept
// ============================================================================

/// A single (system, code, display) triple from an external terminology.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<UriValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<StringValue>,
}

impl Coding {
    /// Construct a coding from its triple. `display` and `system` are trimmed.
    pub fn new(code: impl Into<String>, display: impl AsRef<str>, system: impl AsRef<str>) -> Self {
        let code = code.into();
        let code = code.trim();
        Self {
            system: Some(UriValue::wrap(system.as_ref().trim())),
            code: (!code.is_empty()).then(|| CodeValue::wrap(code)),
            display: Some(StringValue::wrap(display.as_ref().trim())),
        }
    }
}

/// Build a [`Coding`]. Numeric codes are rendered as strings.
pub fn build_coding(raw: &Value, cx: &mut BuildContext) -> Result<Coding, BuildError> {
    let map = expect_object(raw)?;

    let code = cx
        .primitive::<kind::Code>(map, "code")
        .map(|code| code.to_string())
        .filter(|code| !code.trim().is_empty());
    let display = cx
        .primitive::<kind::FhirString>(map, "display")
        .map(|display| display.to_string())
        .unwrap_or_default();
    let system = cx
        .primitive::<kind::Uri>(map, "system")
        .map(|system| system.to_string())
        .unwrap_or_default();

    Ok(Coding::new(code.unwrap_or_default(), display, system))
}

/// A concept: zero or more codings plus optional free text.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CodeableConcept {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<StringValue>,
}

impl CodeableConcept {
    /// The data-absent-reason `unknown` concept.
    pub fn data_absent_unknown() -> Self {
        Self {
            coding: vec![Coding::new("unknown", "Unknown", DATA_ABSENT_REASON_SYSTEM)],
            text: None,
        }
    }

    /// The HL7 v3 null-flavor `UNK` concept.
    pub fn null_flavor_unknown() -> Self {
        Self {
            coding: vec![Coding::new("UNK", "unknown", NULL_FLAVOR_SYSTEM)],
            text: None,
        }
    }
}

pub fn build_codeable_concept(
    raw: &Value,
    cx: &mut BuildContext,
) -> Result<CodeableConcept, BuildError> {
    let map = expect_object(raw)?;
    Ok(CodeableConcept {
        coding: cx.list(map, "coding", build_coding),
        text: cx.primitive(map, "text"),
    })
}

// ============================================================================
// Identifier / Reference
// ============================================================================

/// A business identifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Identifier {
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_type: Option<CodeValue>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub identifier_type: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<UriValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<StringValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigner: Option<Box<Reference>>,
}

pub fn build_identifier(raw: &Value, cx: &mut BuildContext) -> Result<Identifier, BuildError> {
    let map = expect_object(raw)?;
    Ok(Identifier {
        use_type: cx.primitive(map, "use"),
        identifier_type: cx.composite(map, "type", build_codeable_concept),
        system: cx.primitive(map, "system"),
        value: cx.primitive(map, "value"),
        period: cx.composite(map, "period", build_period),
        assigner: cx.composite(map, "assigner", build_reference).map(Box::new),
    })
}

/// A link to another resource, by relative reference and/or business identifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Reference {
    /// `ResourceType/id`, or an absolute URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<StringValue>,

    /// The target resource type.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<UriValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<StringValue>,
}

pub fn build_reference(raw: &Value, cx: &mut BuildContext) -> Result<Reference, BuildError> {
    let map = expect_object(raw)?;
    Ok(Reference {
        reference: cx.primitive(map, "reference"),
        resource_type: cx.primitive(map, "type"),
        identifier: cx.composite(map, "identifier", build_identifier),
        display: cx.primitive(map, "display"),
    })
}

// ============================================================================
// Quantity family
// ============================================================================

/// A measured amount.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Quantity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<DecimalValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparator: Option<CodeValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<StringValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<UriValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeValue>,
}

impl Quantity {
    /// A quantity coded in UCUM.
    pub fn ucum(value: impl Into<Scalar>, unit: &str, code: &str) -> Self {
        Self {
            value: Some(DecimalValue::wrap(value)),
            comparator: None,
            unit: Some(StringValue::wrap(unit)),
            system: Some(UriValue::wrap(UCUM_SYSTEM)),
            code: Some(CodeValue::wrap(code)),
        }
    }
}

pub fn build_quantity(raw: &Value, cx: &mut BuildContext) -> Result<Quantity, BuildError> {
    let map = expect_object(raw)?;
    Ok(Quantity {
        value: cx.primitive(map, "value"),
        comparator: cx.primitive(map, "comparator"),
        unit: cx.primitive(map, "unit"),
        system: cx.primitive(map, "system"),
        code: cx.primitive(map, "code"),
    })
}

/// A length of time: a [`Quantity`] whose code is a UCUM time unit.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Duration(pub Quantity);

pub fn build_duration(raw: &Value, cx: &mut BuildContext) -> Result<Duration, BuildError> {
    build_quantity(raw, cx).map(Duration)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Ratio {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numerator: Option<Quantity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub denominator: Option<Quantity>,
}

pub fn build_ratio(raw: &Value, cx: &mut BuildContext) -> Result<Ratio, BuildError> {
    let map = expect_object(raw)?;
    Ok(Ratio {
        numerator: cx.composite(map, "numerator", build_quantity),
        denominator: cx.composite(map, "denominator", build_quantity),
    })
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Range {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Quantity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Quantity>,
}

pub fn build_range(raw: &Value, cx: &mut BuildContext) -> Result<Range, BuildError> {
    let map = expect_object(raw)?;
    Ok(Range {
        low: cx.composite(map, "low", build_quantity),
        high: cx.composite(map, "high", build_quantity),
    })
}

// ============================================================================
// Period
// ============================================================================

/// A time span with optional start and end.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Period {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTimeValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTimeValue>,
}

/// Start and end of a [`Period`] in milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeriodTimestamps {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl Period {
    /// Resolve both bounds to epoch milliseconds; unresolvable bounds are `None`.
    pub fn timestamps(&self) -> PeriodTimestamps {
        let millis = |bound: &Option<DateTimeValue>| {
            bound
                .as_ref()
                .and_then(DateTimeValue::to_utc)
                .map(|instant| instant.timestamp_millis())
        };
        PeriodTimestamps {
            start: millis(&self.start),
            end: millis(&self.end),
        }
    }
}

pub fn build_period(raw: &Value, cx: &mut BuildContext) -> Result<Period, BuildError> {
    let map = expect_object(raw)?;
    Ok(Period {
        start: cx.primitive(map, "start"),
        end: cx.primitive(map, "end"),
    })
}

// ============================================================================
// Annotation
// ============================================================================

/// Who wrote an [`Annotation`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum AnnotationAuthor {
    #[serde(rename = "authorReference")]
    Reference(Reference),
    #[serde(rename = "authorString")]
    String(StringValue),
}

impl Choice for AnnotationAuthor {
    const FAMILY: ChoiceFamily = choice::ANNOTATION_AUTHOR;

    fn key(&self) -> &'static str {
        match self {
            AnnotationAuthor::Reference(_) => "authorReference",
            AnnotationAuthor::String(_) => "authorString",
        }
    }

    fn build_variant(key: &str, raw: &Value, cx: &mut BuildContext) -> Option<Self> {
        match key {
            "authorReference" => cx.value(raw, build_reference).map(AnnotationAuthor::Reference),
            _ => cx
                .primitive_value::<kind::FhirString>(raw)
                .map(AnnotationAuthor::String),
        }
    }
}

/// A text note with optional author and time.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Annotation {
    #[serde(flatten)]
    pub author: Option<AnnotationAuthor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTimeValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<StringValue>,
}

pub fn build_annotation(raw: &Value, cx: &mut BuildContext) -> Result<Annotation, BuildError> {
    let map = expect_object(raw)?;
    Ok(Annotation {
        author: choice::resolve(map, cx),
        time: cx.primitive(map, "time"),
        text: cx.primitive(map, "text"),
    })
}

// ============================================================================
// Extension (data-absent marker only)
// ============================================================================

/// A FHIR extension. Only the shapes this crate emits are modelled.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: UriValue,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_code: Option<CodeValue>,
}

impl Extension {
    /// The `data-absent-reason` extension with value `unknown`, used to mark a required
    /// element whose value is not known.
    pub fn data_absent_reason() -> Self {
        Self {
            url: UriValue::wrap(DATA_ABSENT_REASON_EXTENSION),
            value_code: Some(CodeValue::wrap("unknown")),
        }
    }
}
