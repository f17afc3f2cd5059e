// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Type hints and scalar coercion of text.

use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use super::SimpleError;
use crate::{BoxedStdError, Value};

/// XML white space: space, tab, CR, LF.
const XML_WHITESPACE: &[char] = &['\x09', '\x0A', '\x0D', '\x20'];

/// Returns true if `text` is empty or only XML white space.
pub(crate) fn is_blank(text: &str) -> bool {
    text.trim_matches(XML_WHITESPACE).is_empty()
}

/// A coercion target declared by an element's `type` attribute.
///
/// This is a closed set: [`TypeHint::from_attribute`] returns `None` for any
/// other name, and the caller rejects the document. There's deliberately no
/// way to name an arbitrary type.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum TypeHint {
    String,
    Integer,

    /// `float` or `double`.
    Float,
    Decimal,
    Boolean,
    Date,

    /// `datetime` or `dateTime`.
    DateTime,

    /// The element's children, whatever their names, form a [`Value::Array`].
    Array,
    Base64Binary,

    /// Raw bytes, base64-decoded when `encoding="base64"`.
    Binary,
}

impl TypeHint {
    /// Looks up a `type` attribute value.
    ///
    /// ```rust
    /// # use xml_params::TypeHint;
    /// assert_eq!(TypeHint::from_attribute("integer"), Some(TypeHint::Integer));
    /// assert_eq!(TypeHint::from_attribute("dateTime"), Some(TypeHint::DateTime));
    /// assert_eq!(TypeHint::from_attribute("symbol"), None);
    /// assert_eq!(TypeHint::from_attribute("yaml"), None);
    /// ```
    pub fn from_attribute(value: &str) -> Option<Self> {
        Some(match value {
            "string" => TypeHint::String,
            "integer" => TypeHint::Integer,
            "float" | "double" => TypeHint::Float,
            "decimal" => TypeHint::Decimal,
            "boolean" => TypeHint::Boolean,
            "date" => TypeHint::Date,
            "datetime" | "dateTime" => TypeHint::DateTime,
            "array" => TypeHint::Array,
            "base64Binary" => TypeHint::Base64Binary,
            "binary" => TypeHint::Binary,
            _ => return None,
        })
    }

    /// Returns the canonical attribute value for this hint.
    pub fn as_str(self) -> &'static str {
        match self {
            TypeHint::String => "string",
            TypeHint::Integer => "integer",
            TypeHint::Float => "float",
            TypeHint::Decimal => "decimal",
            TypeHint::Boolean => "boolean",
            TypeHint::Date => "date",
            TypeHint::DateTime => "datetime",
            TypeHint::Array => "array",
            TypeHint::Base64Binary => "base64Binary",
            TypeHint::Binary => "binary",
        }
    }

    /// Coerces leaf text to a scalar [`Value`].
    ///
    /// `encoding` is the element's `encoding` attribute, consulted only for
    /// [`TypeHint::Binary`].
    pub fn parse(self, text: String, encoding: Option<&str>) -> Result<Value, BoxedStdError> {
        Ok(match self {
            TypeHint::String => Value::String(text),
            TypeHint::Integer => Value::Integer(<i64 as ParseText>::parse(text)?),
            TypeHint::Float => Value::Float(<f64 as ParseText>::parse(text)?),
            TypeHint::Decimal => Value::Decimal(<Decimal as ParseText>::parse(text)?),
            TypeHint::Boolean => Value::Boolean(<bool as ParseText>::parse(text)?),
            TypeHint::Date => Value::Date(<NaiveDate as ParseText>::parse(text)?),
            TypeHint::DateTime => Value::DateTime(<DateTime<Utc> as ParseText>::parse(text)?),
            TypeHint::Base64Binary => Value::Binary(decode_base64(&text)?),
            TypeHint::Binary if encoding == Some("base64") => Value::Binary(decode_base64(&text)?),
            TypeHint::Binary => Value::Binary(text.into_bytes()),
            TypeHint::Array => {
                return Err(Box::new(SimpleError("array is not a scalar type".to_owned())))
            }
        })
    }
}

impl std::fmt::Display for TypeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>, BoxedStdError> {
    let compact: String = text.chars().filter(|c| !XML_WHITESPACE.contains(c)).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

/// Parses the text of a typed leaf element.
///
/// Implementations other than `String` trim surrounding XML white space
/// first, as XML Schema's "collapse" rule does for atomic types.
pub trait ParseText: Sized {
    fn parse(text: String) -> Result<Self, BoxedStdError>;
}

impl ParseText for String {
    fn parse(text: String) -> Result<Self, BoxedStdError> {
        Ok(text)
    }
}

/// Lenient: `true` and `1` (any case) are true; everything else is false.
impl ParseText for bool {
    fn parse(text: String) -> Result<Self, BoxedStdError> {
        let text = text.trim_matches(XML_WHITESPACE);
        Ok(text.eq_ignore_ascii_case("true") || text == "1")
    }
}

impl ParseText for i64 {
    fn parse(text: String) -> Result<Self, BoxedStdError> {
        Ok(text.trim_matches(XML_WHITESPACE).parse::<i64>()?)
    }
}

/// Finite values only; `inf` and `NaN` are rejected.
impl ParseText for f64 {
    fn parse(text: String) -> Result<Self, BoxedStdError> {
        let f = text.trim_matches(XML_WHITESPACE).parse::<f64>()?;
        if !f.is_finite() {
            return Err(Box::new(SimpleError(format!("{} is not finite", f))));
        }
        Ok(f)
    }
}

impl ParseText for Decimal {
    fn parse(text: String) -> Result<Self, BoxedStdError> {
        Ok(text.trim_matches(XML_WHITESPACE).parse::<Decimal>()?)
    }
}

/// `YYYY-MM-DD`.
impl ParseText for NaiveDate {
    fn parse(text: String) -> Result<Self, BoxedStdError> {
        Ok(NaiveDate::parse_from_str(
            text.trim_matches(XML_WHITESPACE),
            "%Y-%m-%d",
        )?)
    }
}

/// RFC 3339, converted to UTC. A timestamp without an offset is taken to be UTC.
impl ParseText for DateTime<Utc> {
    fn parse(text: String) -> Result<Self, BoxedStdError> {
        let text = text.trim_matches(XML_WHITESPACE);
        if let Ok(t) = DateTime::parse_from_rfc3339(text) {
            return Ok(t.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")?;
        Ok(Utc.from_utc_datetime(&naive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(hint: TypeHint, text: &str) -> Result<Value, BoxedStdError> {
        hint.parse(text.to_owned(), None)
    }

    #[test]
    fn integer() {
        assert_eq!(parse(TypeHint::Integer, "15").unwrap(), Value::Integer(15));
        assert_eq!(parse(TypeHint::Integer, "\n  -7 ").unwrap(), Value::Integer(-7));
        parse(TypeHint::Integer, "fifteen").unwrap_err();
        parse(TypeHint::Integer, "1.5").unwrap_err();
        parse(TypeHint::Integer, "99999999999999999999").unwrap_err();
    }

    #[test]
    fn float() {
        assert_eq!(parse(TypeHint::Float, " 1.25 ").unwrap(), Value::Float(1.25));
        assert_eq!(parse(TypeHint::Float, "-3e2").unwrap(), Value::Float(-300.0));
        parse(TypeHint::Float, "1,25").unwrap_err();
        parse(TypeHint::Float, "inf").unwrap_err();
        parse(TypeHint::Float, "NaN").unwrap_err();
    }

    #[test]
    fn decimal() {
        assert_eq!(
            parse(TypeHint::Decimal, "12.50").unwrap(),
            Value::Decimal(Decimal::new(1250, 2))
        );
        parse(TypeHint::Decimal, "twelve").unwrap_err();
    }

    #[test]
    fn boolean() {
        for t in ["true", "TRUE", " True\n", "1"] {
            assert_eq!(parse(TypeHint::Boolean, t).unwrap(), Value::Boolean(true), "{:?}", t);
        }
        for t in ["false", "0", "yes", "", "banana"] {
            assert_eq!(parse(TypeHint::Boolean, t).unwrap(), Value::Boolean(false), "{:?}", t);
        }
    }

    #[test]
    fn date() {
        assert_eq!(
            parse(TypeHint::Date, "2005-03-17").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2005, 3, 17).unwrap())
        );
        parse(TypeHint::Date, "2005-02-30").unwrap_err();
        parse(TypeHint::Date, "17/03/2005").unwrap_err();
    }

    #[test]
    fn datetime() {
        let expected = Utc.with_ymd_and_hms(2005, 3, 17, 21, 41, 7).unwrap();
        assert_eq!(
            parse(TypeHint::DateTime, "2005-03-17T21:41:07Z").unwrap(),
            Value::DateTime(expected)
        );
        assert_eq!(
            parse(TypeHint::DateTime, "2005-03-17T23:41:07+02:00").unwrap(),
            Value::DateTime(expected)
        );
        assert_eq!(
            parse(TypeHint::DateTime, "2005-03-17T21:41:07").unwrap(),
            Value::DateTime(expected)
        );
        parse(TypeHint::DateTime, "2005-03-17").unwrap_err();
        parse(TypeHint::DateTime, "yesterday").unwrap_err();
    }

    #[test]
    fn binary() {
        assert_eq!(
            parse(TypeHint::Base64Binary, "aGVs\n bG8=").unwrap(),
            Value::Binary(b"hello".to_vec())
        );
        parse(TypeHint::Base64Binary, "not base64!").unwrap_err();
        assert_eq!(
            TypeHint::Binary.parse("aGVsbG8=".to_owned(), Some("base64")).unwrap(),
            Value::Binary(b"hello".to_vec())
        );
        assert_eq!(
            parse(TypeHint::Binary, "aGVsbG8=").unwrap(),
            Value::Binary(b"aGVsbG8=".to_vec())
        );
    }

    #[test]
    fn string_is_untouched() {
        assert_eq!(
            parse(TypeHint::String, "  spaced  ").unwrap(),
            Value::from("  spaced  ")
        );
    }

    #[test]
    fn hint_names_round_trip() {
        for hint in [
            TypeHint::String,
            TypeHint::Integer,
            TypeHint::Float,
            TypeHint::Decimal,
            TypeHint::Boolean,
            TypeHint::Date,
            TypeHint::DateTime,
            TypeHint::Array,
            TypeHint::Base64Binary,
            TypeHint::Binary,
        ] {
            assert_eq!(TypeHint::from_attribute(hint.as_str()), Some(hint));
        }
        for disallowed in ["symbol", "yaml", "object", "Integer", "file", ""] {
            assert_eq!(TypeHint::from_attribute(disallowed), None, "{:?}", disallowed);
        }
    }
}
