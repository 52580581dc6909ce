//! FHIR wire/boundary support for medication orders.
//!
//! This crate transcodes between untyped FHIR R4 JSON (`serde_json::Value`) and a
//! strongly-typed `MedicationRequest` resource graph, and back again.
//!
//! This crate focuses on:
//! - primitive coercion with format checks where FHIR demands them (`dateTime`)
//! - composite builders for the datatypes a medication order is made of
//! - choice-type (`value[x]`-style) resolution into explicit enums
//! - reference and canonical URL helpers
//! - best-effort assembly: malformed parts are dropped and reported as
//!   [`Diagnostic`]s instead of failing the whole resource
//!
//! Everything here is pure and synchronous. Nothing in this crate logs or performs
//! I/O; diagnostics are returned to the caller, which decides how to report them.

pub mod builder;
pub mod choice;
pub mod datatypes;
pub mod diagnostics;
pub mod dosage;
pub mod medication_request;
pub mod primitive;
pub mod reference;

// Re-export facades
pub use medication_request::{AssemblyOptions, MedicationRequest, Transcoded};

// Re-export public domain-level types
pub use builder::{BuildContext, BuildError};
pub use choice::{Choice, ChoiceFamily, ChoicePolicy};
pub use datatypes::{
    Annotation, AnnotationAuthor, CodeableConcept, Coding, Duration, Extension, Identifier,
    Period, Quantity, Range, Ratio, Reference,
};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use dosage::{AsNeeded, Bounds, Dosage, DoseAndRate, Dose, Rate, Timing, TimingRepeat};
pub use medication_request::Medication;
pub use primitive::{Primitive, PrimitiveError, PrimitiveKind, Scalar};
pub use reference::{ParsedCanonical, ParsedReference, ResolvedReference, ServerEndpoints};

/// Errors returned by the `fhir` boundary crate.
///
/// Malformed *data* inside a resource never produces one of these; it is reported as a
/// [`Diagnostic`] instead. These errors are reserved for contract violations by the caller
/// and for policies that explicitly ask for rejection.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ambiguous choice type {family}[x] at {path}: {keys:?} are all populated")]
    AmbiguousChoice {
        path: String,
        family: &'static str,
        keys: Vec<String>,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
