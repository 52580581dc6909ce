//! Diagnostics collected while assembling a resource.
//!
//! Builders never log. Every recoverable problem they hit is recorded here with the JSON
//! path it occurred at, and handed back to the caller alongside the assembled resource.

use serde_json::{json, Value};
use std::fmt;

/// The recoverable problem categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A value had the wrong shape (for example a scalar where a mapping was expected).
    /// The element was dropped, or the field left absent.
    MalformedSubstructure,
    /// A primitive failed its format check. The field was left absent.
    InvalidPrimitiveFormat,
    /// More than one key of a choice family was populated. The first in precedence won.
    ChoiceTypeAmbiguous,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::MalformedSubstructure => "malformed-substructure",
            DiagnosticKind::InvalidPrimitiveFormat => "invalid-primitive-format",
            DiagnosticKind::ChoiceTypeAmbiguous => "choice-type-ambiguous",
        }
    }

    /// OperationOutcome `issue.code` for this kind.
    fn issue_type(self) -> &'static str {
        match self {
            DiagnosticKind::MalformedSubstructure => "structure",
            DiagnosticKind::InvalidPrimitiveFormat => "value",
            DiagnosticKind::ChoiceTypeAmbiguous => "multiple-matches",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded problem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// Path of the offending element, e.g. `dosageInstruction[1].timing.repeat`.
    pub path: String,
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.path, self.detail)
    }
}

/// Ordered collection of diagnostics, in the order they were encountered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// Diagnostics of a single kind.
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(move |d| d.kind == kind)
    }

    /// Render as a FHIR `OperationOutcome` resource.
    ///
    /// Each diagnostic becomes a `warning` issue whose `expression` points at the element.
    /// With no diagnostics, a single informational issue is emitted so the outcome is
    /// still a valid resource.
    pub fn to_operation_outcome(&self, resource_type: &str) -> Value {
        let issues: Vec<Value> = if self.0.is_empty() {
            vec![json!({
                "severity": "information",
                "code": "informational",
                "details": { "text": "All OK" }
            })]
        } else {
            self.0
                .iter()
                .map(|d| {
                    let expression = if d.path.is_empty() {
                        resource_type.to_string()
                    } else {
                        format!("{resource_type}.{}", d.path)
                    };
                    json!({
                        "severity": "warning",
                        "code": d.kind.issue_type(),
                        "details": { "text": d.detail },
                        "expression": [expression]
                    })
                })
                .collect()
        };

        json!({
            "resourceType": "OperationOutcome",
            "issue": issues
        })
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic {
            path: "authoredOn".into(),
            kind: DiagnosticKind::InvalidPrimitiveFormat,
            detail: "\"not-a-date\" is not a valid FHIR dateTime".into(),
        });
        diagnostics.push(Diagnostic {
            path: "dosageInstruction[1]".into(),
            kind: DiagnosticKind::MalformedSubstructure,
            detail: "expected object, got string".into(),
        });
        diagnostics
    }

    #[test]
    fn renders_issues_with_expressions() {
        let outcome = sample().to_operation_outcome("MedicationRequest");
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        let issues = outcome["issue"].as_array().expect("issue list");
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0]["code"], "value");
        assert_eq!(issues[0]["expression"][0], "MedicationRequest.authoredOn");
        assert_eq!(issues[1]["code"], "structure");
        assert_eq!(issues[1]["severity"], "warning");
    }

    #[test]
    fn empty_outcome_is_informational() {
        let outcome = Diagnostics::new().to_operation_outcome("MedicationRequest");
        let issues = outcome["issue"].as_array().expect("issue list");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["severity"], "information");
    }

    #[test]
    fn filters_by_kind() {
        let diagnostics = sample();
        assert_eq!(
            diagnostics
                .of_kind(DiagnosticKind::MalformedSubstructure)
                .count(),
            1
        );
        assert_eq!(
            diagnostics.of_kind(DiagnosticKind::ChoiceTypeAmbiguous).count(),
            0
        );
    }
}
