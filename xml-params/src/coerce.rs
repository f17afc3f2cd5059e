// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion of an XML document into typed [`Params`].
//!
//! The rules, applied recursively from the root element:
//!
//! *   A `type` attribute selects a [`TypeHint`]. Unknown hints are rejected
//!     with [`ErrorKind::DisallowedType`].
//! *   `nil="true"` yields [`Value::Null`].
//! *   `type="array"` yields a [`Value::Array`] of all children.
//! *   An element with children yields a [`Value::Map`]. A child name seen
//!     once maps to that child's value; a name seen more than once maps to a
//!     [`Value::Array`] of the values in document order. Other attributes
//!     become string entries in the same map; a child wins over an attribute
//!     of the same name.
//! *   A leaf yields its text, coerced by its hint. A blank, untyped leaf with
//!     attributes yields a map of the attributes.
//!
//! The result is keyed by the root element's name:
//!
//! ```rust
//! use xml_params::{from_slice, Value};
//!
//! let params = from_slice(br#"<data><a type="integer">15</a><g>x</g><g>y</g></data>"#).unwrap();
//! assert_eq!(params["data"]["a"], Value::Integer(15));
//! assert_eq!(
//!     params["data"]["g"],
//!     Value::Array(vec![Value::from("x"), Value::from("y")]),
//! );
//! ```

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::de::text::{is_blank, TypeHint};
use crate::de::{self, Element, Error, ErrorKind};
use crate::{normalize_key, Params, TextPosition, Value, XmlOptions};

const TYPE_ATTR: &str = "type";
const NIL_ATTR: &str = "nil";
const ENCODING_ATTR: &str = "encoding";

/// Parses an XML body with default [`XmlOptions`].
///
/// An empty or all-whitespace body yields empty `Params` without parsing.
pub fn from_slice(body: &[u8]) -> Result<Params, Error> {
    from_slice_with_options(body, &XmlOptions::default())
}

/// Parses an XML body into a single-entry `Params` keyed by the root element's name.
pub fn from_slice_with_options(body: &[u8], options: &XmlOptions) -> Result<Params, Error> {
    if body.trim_ascii().is_empty() {
        return Ok(Params::new());
    }
    let root = de::read(body, options.max_depth)?;
    let value = Coercer {
        options,
        path: Vec::new(),
    }
    .element(&root)?;
    let mut params = Params::new();
    params.insert(&root.name.local_name, value);
    Ok(params)
}

/// Walks an [`Element`] tree, tracking the current path for error context.
struct Coercer<'a> {
    options: &'a XmlOptions,
    path: Vec<&'a Element>,
}

impl<'a> Coercer<'a> {
    fn error(&self, pos: TextPosition, kind: ErrorKind) -> Error {
        Error::new(
            self.path.iter().map(|e| e.stack_element()).collect(),
            pos,
            kind,
        )
    }

    fn element(&mut self, element: &'a Element) -> Result<Value, Error> {
        self.path.push(element);
        let value = self.element_inner(element)?;
        self.path.pop();
        Ok(value)
    }

    fn element_inner(&mut self, element: &'a Element) -> Result<Value, Error> {
        let hint = match element.attribute(TYPE_ATTR) {
            None => None,
            Some(t) => match TypeHint::from_attribute(t) {
                Some(hint) => Some(hint),
                None => {
                    warn!(
                        "rejecting disallowed type attribute {:?} on <{}> @ {}",
                        t, &element.name, &element.pos
                    );
                    return Err(self.error(element.pos, ErrorKind::DisallowedType(t.to_owned())));
                }
            },
        };
        if self.options.recognize_nil && element.attribute(NIL_ATTR) == Some("true") {
            return Ok(Value::Null);
        }
        if hint == Some(TypeHint::Array) {
            let mut entries = Vec::with_capacity(element.children.len());
            for child in &element.children {
                entries.push(self.element(child)?);
            }
            return Ok(Value::Array(entries));
        }
        if !element.children.is_empty() {
            return self.children(element, hint).map(Value::Map);
        }
        self.leaf(element, hint)
    }

    /// Returns the attributes which become parameters, excluding control attributes.
    fn attributes<'e>(
        &self,
        element: &'e Element,
        hint: Option<TypeHint>,
    ) -> impl Iterator<Item = (&'e str, &'e str)> {
        let recognize_nil = self.options.recognize_nil;
        let binary = matches!(hint, Some(TypeHint::Binary | TypeHint::Base64Binary));
        element
            .attributes
            .iter()
            .filter(move |a| {
                let local = a.name.local_name.as_str();
                let control = local == TYPE_ATTR
                    || (recognize_nil && local == NIL_ATTR)
                    || (binary && local == ENCODING_ATTR);
                !(control && a.name.prefix.is_none())
            })
            .map(|a| (a.name.local_name.as_str(), a.value.as_str()))
    }

    fn attribute_params(&self, element: &Element, hint: Option<TypeHint>) -> Params {
        self.attributes(element, hint)
            .map(|(name, value)| (name, Value::from(value)))
            .collect()
    }

    fn children(&mut self, element: &'a Element, hint: Option<TypeHint>) -> Result<Params, Error> {
        let mut params = self.attribute_params(element, hint);
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for child in &element.children {
            let value = self.element(child)?;
            grouped
                .entry(normalize_key(&child.name.local_name).into_owned())
                .or_default()
                .push(value);
        }
        for (name, mut values) in grouped {
            let value = if values.len() == 1 {
                values.pop().unwrap_or(Value::Null)
            } else {
                Value::Array(values)
            };
            if params.insert(&name, value).is_some() {
                debug!(
                    "<{}> child element {:?} replaces the attribute of the same name",
                    &element.name, &name
                );
            }
        }
        Ok(params)
    }

    fn leaf(&mut self, element: &'a Element, hint: Option<TypeHint>) -> Result<Value, Error> {
        let blank = is_blank(&element.text);
        let scalar = match hint {
            Some(TypeHint::String) => Value::String(if blank {
                String::new()
            } else {
                element.text.clone()
            }),
            Some(_) if blank => return Ok(Value::Null),
            Some(hint) => hint
                .parse(element.text.clone(), element.attribute(ENCODING_ATTR))
                .map_err(|source| {
                    self.error(
                        element.pos,
                        ErrorKind::Coercion {
                            hint,
                            text: element.text.clone(),
                            source,
                        },
                    )
                })?,
            None if blank => {
                let attrs = self.attribute_params(element, hint);
                return Ok(if attrs.is_empty() {
                    Value::String(String::new())
                } else {
                    Value::Map(attrs)
                });
            }
            None => Value::String(element.text.clone()),
        };
        Ok(match &self.options.content_key {
            Some(key) => {
                let mut attrs = self.attribute_params(element, hint);
                if attrs.is_empty() {
                    scalar
                } else {
                    attrs.insert(key, scalar);
                    Value::Map(attrs)
                }
            }
            None => scalar,
        })
    }
}
