//! FHIR primitive wrappers and coercion from raw JSON scalars.
//!
//! Responsibilities:
//! - Represent a raw JSON scalar without losing its original form ([`Scalar`])
//! - Tag scalars with their FHIR primitive kind at the type level ([`Primitive`])
//! - Coerce raw JSON into primitives, treating empty input as "not set"
//!
//! Notes:
//! - Only `dateTime` carries a format check. Every other kind wraps any scalar verbatim;
//!   terminology and range validation belong to profile validation, not transcoding.
//! - `false` and `0` are values, not absence.

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;

/// FHIR R4 `dateTime` grammar, anchored at both ends.
const DATE_TIME_PATTERN: &str = r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?$";

fn date_time_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(DATE_TIME_PATTERN).expect("dateTime pattern is valid"))
}

// ============================================================================
// Raw scalars
// ============================================================================

/// A raw JSON scalar, kept in the form it arrived in.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    String(String),
    Number(Number),
    Boolean(bool),
}

impl Scalar {
    /// Extract a scalar from a JSON value, or `None` for null, lists and objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Scalar::String(s.clone())),
            Value::Number(n) => Some(Scalar::Number(n.clone())),
            Value::Bool(b) => Some(Scalar::Boolean(*b)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Scalar::String(s) => Value::String(s.clone()),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::Boolean(b) => Value::Bool(*b),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Scalar::String(s) => serializer.serialize_str(s),
            Scalar::Number(n) => n.serialize(serializer),
            Scalar::Boolean(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<Number> for Scalar {
    fn from(value: Number) -> Self {
        Scalar::Number(value)
    }
}

// ============================================================================
// Primitive kinds
// ============================================================================

/// Errors raised while turning a raw value into a primitive.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PrimitiveError {
    #[error("expected a scalar {kind}, got {found}")]
    NotScalar {
        kind: &'static str,
        found: &'static str,
    },

    #[error("{value:?} is not a valid FHIR {kind}")]
    InvalidFormat { kind: &'static str, value: String },
}

/// A FHIR primitive kind, used as a type-level tag on [`Primitive`].
pub trait PrimitiveKind {
    /// The FHIR name of the kind (`dateTime`, `positiveInt`, ...).
    const NAME: &'static str;

    /// Format check applied before a primitive of this kind is constructed.
    fn check(_scalar: &Scalar) -> Result<(), PrimitiveError> {
        Ok(())
    }
}

/// Kinds that accept any scalar, so construction cannot fail.
pub trait UncheckedKind: PrimitiveKind {}

/// Marker types for each supported FHIR primitive kind.
pub mod kind {
    use super::{date_time_regex, PrimitiveError, PrimitiveKind, Scalar, UncheckedKind};

    macro_rules! unchecked_kinds {
        ($($(#[$meta:meta])* $name:ident => $fhir:literal,)*) => {
            $(
                $(#[$meta])*
                #[derive(Clone, Copy, Debug, PartialEq, Eq)]
                pub struct $name;

                impl PrimitiveKind for $name {
                    const NAME: &'static str = $fhir;
                }

                impl UncheckedKind for $name {}
            )*
        };
    }

    unchecked_kinds! {
        Code => "code",
        /// FHIR `string`.
        FhirString => "string",
        Uri => "uri",
        Canonical => "canonical",
        Time => "time",
        Decimal => "decimal",
        Integer => "integer",
        PositiveInt => "positiveInt",
        UnsignedInt => "unsignedInt",
        Boolean => "boolean",
    }

    /// FHIR `dateTime`: partial precision allowed, a time requires a zone.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DateTime;

    impl PrimitiveKind for DateTime {
        const NAME: &'static str = "dateTime";

        fn check(scalar: &Scalar) -> Result<(), PrimitiveError> {
            match scalar.as_str() {
                Some(text) if date_time_regex().is_match(text) => Ok(()),
                _ => Err(PrimitiveError::InvalidFormat {
                    kind: Self::NAME,
                    value: scalar.to_string(),
                }),
            }
        }
    }
}

// ============================================================================
// Primitive values
// ============================================================================

/// An immutable FHIR primitive value of kind `K`.
#[derive(Clone, Debug, PartialEq)]
pub struct Primitive<K> {
    value: Scalar,
    kind: PhantomData<K>,
}

pub type CodeValue = Primitive<kind::Code>;
pub type StringValue = Primitive<kind::FhirString>;
pub type UriValue = Primitive<kind::Uri>;
pub type CanonicalValue = Primitive<kind::Canonical>;
pub type DateTimeValue = Primitive<kind::DateTime>;
pub type TimeValue = Primitive<kind::Time>;
pub type DecimalValue = Primitive<kind::Decimal>;
pub type IntegerValue = Primitive<kind::Integer>;
pub type PositiveIntValue = Primitive<kind::PositiveInt>;
pub type UnsignedIntValue = Primitive<kind::UnsignedInt>;
pub type BooleanValue = Primitive<kind::Boolean>;

impl<K: PrimitiveKind> Primitive<K> {
    /// Construct a primitive, applying the kind's format check.
    pub fn new(value: Scalar) -> Result<Self, PrimitiveError> {
        K::check(&value)?;
        Ok(Self {
            value,
            kind: PhantomData,
        })
    }

    pub fn value(&self) -> &Scalar {
        &self.value
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn kind_name(&self) -> &'static str {
        K::NAME
    }
}

impl<K: UncheckedKind> Primitive<K> {
    /// Wrap a scalar. Infallible for kinds without a format check.
    pub fn wrap(value: impl Into<Scalar>) -> Self {
        Self {
            value: value.into(),
            kind: PhantomData,
        }
    }
}

impl Primitive<kind::DateTime> {
    /// Parse a FHIR `dateTime` string.
    pub fn parse(text: &str) -> Result<Self, PrimitiveError> {
        Self::new(Scalar::from(text))
    }

    /// Resolve to a UTC instant. Partial dates resolve to their earliest instant.
    ///
    /// Returns `None` for calendar-impossible values the grammar still accepts (for
    /// example `2023-02-31`).
    pub fn to_utc(&self) -> Option<chrono::DateTime<Utc>> {
        let text = self.as_str()?;
        let date = match text.len() {
            4 => NaiveDate::from_ymd_opt(text.parse().ok()?, 1, 1),
            7 => NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d").ok(),
            10 => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok(),
            _ => {
                return chrono::DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
        };
        date.and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

impl<K> fmt::Display for Primitive<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

impl<K> Serialize for Primitive<K> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.value.serialize(serializer)
    }
}

// ============================================================================
// Coercion
// ============================================================================

/// Coerce a raw JSON value into a primitive of kind `K`.
///
/// # Returns
///
/// * `Ok(None)` - the value is missing or empty (`null`, `""`, `[]`, `{}`)
/// * `Ok(Some(_))` - the value was wrapped
///
/// # Errors
///
/// * [`PrimitiveError::NotScalar`] - the value is a list or object
/// * [`PrimitiveError::InvalidFormat`] - the kind's format check rejected it
pub fn coerce<K: PrimitiveKind>(raw: &Value) -> Result<Option<Primitive<K>>, PrimitiveError> {
    if is_empty(raw) {
        return Ok(None);
    }
    let scalar = Scalar::from_value(raw).ok_or(PrimitiveError::NotScalar {
        kind: K::NAME,
        found: value_kind(raw),
    })?;
    Primitive::new(scalar).map(Some)
}

/// Whether a raw value counts as "not set".
pub(crate) fn is_empty(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// JSON type name of a value, for diagnostics.
pub(crate) fn value_kind(raw: &Value) -> &'static str {
    match raw {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
