// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed request parameters from XML request bodies.
//!
//! The two halves are:
//!
//! *   [`coerce`], which turns an XML document into a [`Params`] map keyed by
//!     the root element's name, honoring a closed set of `type="..."` hints.
//! *   [`dispatch`], which selects a [`BodyParser`] by the request's media
//!     type and merges its output into the request's parameters.
//!
//! ```rust
//! use xml_params::{Dispatcher, ParserRegistry, Params, Value};
//!
//! let registry = ParserRegistry::default();
//! let mut params = Params::new();
//! Dispatcher::new(&registry)
//!     .parse_into(
//!         "application/xml",
//!         br#"<entry attributed="true"><summary>content...</summary></entry>"#,
//!         &mut params,
//!     )
//!     .unwrap();
//! assert_eq!(params["entry"]["summary"], Value::from("content..."));
//! assert_eq!(params["entry"]["attributed"], Value::from("true"));
//! ```

pub mod coerce;
pub mod de;
pub mod dispatch;
pub mod options;
pub mod value;

pub use coerce::{from_slice, from_slice_with_options};
pub use de::text::TypeHint;
pub use dispatch::{BadRequest, BodyParser, Dispatcher, ParserRegistry, Reason, XmlParser};
pub use options::XmlOptions;
pub use value::{Params, Value};

pub use xml::common::TextPosition;

/// Shorthand for `Box<dyn std::error::Error + Send + Sync + 'static>`.
pub type BoxedStdError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Normalizes an element or attribute name into a parameter key.
///
/// Dashes become underscores, so `first-key` and `first_key` name the same
/// parameter.
pub fn normalize_key(name: &str) -> std::borrow::Cow<'_, str> {
    if name.contains('-') {
        std::borrow::Cow::Owned(name.replace('-', "_"))
    } else {
        std::borrow::Cow::Borrowed(name)
    }
}
