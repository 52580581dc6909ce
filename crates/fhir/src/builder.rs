//! Shared machinery for composite builders.
//!
//! A builder is a plain function `fn(&Value, &mut BuildContext) -> Result<T, BuildError>`.
//! It returns `Err` only when its own input has the wrong shape; everything below it is
//! routed through the [`BuildContext`] helpers, which record a [`Diagnostic`] and carry on.
//!
//! Policy implemented by the helpers:
//! - missing or empty keys are "not set", never an error
//! - a malformed singular field is left absent
//! - a malformed list element is dropped, its siblings are kept in order
//! - a list field given a single mapping is treated as a one-element list
//! - a scalar-or-list primitive field always normalises to a list

use crate::choice::ChoicePolicy;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::primitive::{coerce, is_empty, value_kind, Primitive, PrimitiveError, PrimitiveKind};
use crate::FhirError;
use serde_json::{Map, Value};

/// Signature shared by every composite builder.
pub type BuildFn<T> = fn(&Value, &mut BuildContext) -> Result<T, BuildError>;

/// A builder was handed input of the wrong shape.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("expected {expected}, got {found}")]
    Malformed {
        expected: &'static str,
        found: &'static str,
    },
}

/// Borrow a raw value as a JSON object, or fail with [`BuildError::Malformed`].
pub fn expect_object(raw: &Value) -> Result<&Map<String, Value>, BuildError> {
    raw.as_object().ok_or(BuildError::Malformed {
        expected: "object",
        found: value_kind(raw),
    })
}

#[derive(Clone, Debug)]
enum PathSegment {
    Key(String),
    Index(usize),
}

/// State threaded through one assembly pass: the current JSON path, the diagnostics
/// recorded so far and the choice-type policy.
///
/// A context is created per call and never shared, so concurrent transcoding needs no
/// locking.
#[derive(Debug)]
pub struct BuildContext {
    policy: ChoicePolicy,
    path: Vec<PathSegment>,
    diagnostics: Diagnostics,
    rejection: Option<FhirError>,
}

impl BuildContext {
    pub fn new(policy: ChoicePolicy) -> Self {
        Self {
            policy,
            path: Vec::new(),
            diagnostics: Diagnostics::new(),
            rejection: None,
        }
    }

    pub fn policy(&self) -> ChoicePolicy {
        self.policy
    }

    /// Current position, rendered as `a.b[2].c`.
    pub fn path(&self) -> String {
        let mut rendered = String::new();
        for segment in &self.path {
            match segment {
                PathSegment::Key(key) => {
                    if !rendered.is_empty() {
                        rendered.push('.');
                    }
                    rendered.push_str(key);
                }
                PathSegment::Index(index) => {
                    rendered.push_str(&format!("[{index}]"));
                }
            }
        }
        rendered
    }

    /// Run `f` with `key` pushed onto the path.
    pub fn at_key<T>(&mut self, key: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        self.path.push(PathSegment::Key(key.to_string()));
        let out = f(self);
        self.path.pop();
        out
    }

    /// Run `f` with a list index pushed onto the path.
    pub fn at_index<T>(&mut self, index: usize, f: impl FnOnce(&mut Self) -> T) -> T {
        self.path.push(PathSegment::Index(index));
        let out = f(self);
        self.path.pop();
        out
    }

    /// Record a diagnostic at the current path.
    pub fn record(&mut self, kind: DiagnosticKind, detail: impl Into<String>) {
        let path = self.path();
        self.diagnostics.push(Diagnostic {
            path,
            kind,
            detail: detail.into(),
        });
    }

    /// Mark the whole assembly as rejected. Only the first rejection is kept.
    pub(crate) fn reject(&mut self, error: FhirError) {
        if self.rejection.is_none() {
            self.rejection = Some(error);
        }
    }

    pub fn take_rejection(&mut self) -> Option<FhirError> {
        self.rejection.take()
    }

    pub(crate) fn diagnostic_count(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    // ------------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------------

    /// Coerce a raw value at the current path, recording a diagnostic on failure.
    pub fn primitive_value<K: PrimitiveKind>(&mut self, raw: &Value) -> Option<Primitive<K>> {
        match coerce::<K>(raw) {
            Ok(value) => value,
            Err(err) => {
                let kind = match err {
                    PrimitiveError::NotScalar { .. } => DiagnosticKind::MalformedSubstructure,
                    PrimitiveError::InvalidFormat { .. } => DiagnosticKind::InvalidPrimitiveFormat,
                };
                self.record(kind, err.to_string());
                None
            }
        }
    }

    /// Coerce `map[key]` into a primitive. Missing keys are absent.
    pub fn primitive<K: PrimitiveKind>(
        &mut self,
        map: &Map<String, Value>,
        key: &str,
    ) -> Option<Primitive<K>> {
        let raw = map.get(key)?;
        self.at_key(key, |cx| cx.primitive_value::<K>(raw))
    }

    /// Coerce `map[key]` into an ordered list of primitives.
    ///
    /// A bare scalar yields a one-element list. Members that fail coercion are dropped.
    pub fn primitive_list<K: PrimitiveKind>(
        &mut self,
        map: &Map<String, Value>,
        key: &str,
    ) -> Vec<Primitive<K>> {
        let Some(raw) = map.get(key) else {
            return Vec::new();
        };
        self.at_key(key, |cx| match raw {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| cx.at_index(index, |cx| cx.primitive_value::<K>(item)))
                .collect(),
            single => cx.primitive_value::<K>(single).into_iter().collect(),
        })
    }

    // ------------------------------------------------------------------------
    // Composites
    // ------------------------------------------------------------------------

    /// Build a singular composite from a raw value at the current path.
    ///
    /// Empty input and values that build to nothing (all fields absent) both resolve to
    /// `None`, so an absent field stays absent through a serialise/deserialise cycle.
    pub fn value<T: Default + PartialEq>(&mut self, raw: &Value, build: BuildFn<T>) -> Option<T> {
        if is_empty(raw) {
            return None;
        }
        match build(raw, self) {
            Ok(value) if value == T::default() => None,
            Ok(value) => Some(value),
            Err(err) => {
                self.record(DiagnosticKind::MalformedSubstructure, err.to_string());
                None
            }
        }
    }

    /// Build the singular composite at `map[key]`.
    pub fn composite<T: Default + PartialEq>(
        &mut self,
        map: &Map<String, Value>,
        key: &str,
        build: BuildFn<T>,
    ) -> Option<T> {
        let raw = map.get(key)?;
        self.at_key(key, |cx| cx.value(raw, build))
    }

    /// Build the list of composites at `map[key]`, preserving input order.
    pub fn list<T>(&mut self, map: &Map<String, Value>, key: &str, build: BuildFn<T>) -> Vec<T> {
        let Some(raw) = map.get(key) else {
            return Vec::new();
        };
        if is_empty(raw) {
            return Vec::new();
        }
        self.at_key(key, |cx| match raw {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| cx.at_index(index, |cx| cx.element(item, build)))
                .collect(),
            Value::Object(_) => cx.element(raw, build).into_iter().collect(),
            other => {
                cx.record(
                    DiagnosticKind::MalformedSubstructure,
                    format!("expected a list, got {}", value_kind(other)),
                );
                Vec::new()
            }
        })
    }

    fn element<T>(&mut self, raw: &Value, build: BuildFn<T>) -> Option<T> {
        match build(raw, self) {
            Ok(value) => Some(value),
            Err(err) => {
                self.record(
                    DiagnosticKind::MalformedSubstructure,
                    format!("dropped list element: {err}"),
                );
                None
            }
        }
    }
}
