// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the XML parser.

/// Options controlling how an XML body becomes [`crate::Params`].
///
/// ```rust
/// use xml_params::XmlOptions;
///
/// let options = XmlOptions::builder()
///     .max_depth(16)
///     .content_key("__content__")
///     .build();
/// assert_eq!(options.max_depth, 16);
/// assert!(options.recognize_nil);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XmlOptions {
    /// Maximum element nesting depth; the root is depth 1.
    ///
    /// Coercion is recursive, so this also bounds stack use.
    pub max_depth: usize,

    /// Treat `nil="true"` as [`crate::Value::Null`] rather than an ordinary attribute.
    pub recognize_nil: bool,

    /// When set, a childless element with both text and attributes becomes a
    /// map of its attributes plus its text under this key. When unset, the
    /// text wins and the attributes are dropped.
    pub content_key: Option<String>,
}

impl Default for XmlOptions {
    fn default() -> Self {
        Self {
            max_depth: 128,
            recognize_nil: true,
            content_key: None,
        }
    }
}

impl XmlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> XmlOptionsBuilder {
        XmlOptionsBuilder::default()
    }
}

/// Builder for [`XmlOptions`]. Unset fields take their [`Default`] values.
#[derive(Debug, Default)]
pub struct XmlOptionsBuilder {
    max_depth: Option<usize>,
    recognize_nil: Option<bool>,
    content_key: Option<String>,
}

impl XmlOptionsBuilder {
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn recognize_nil(mut self, recognize_nil: bool) -> Self {
        self.recognize_nil = Some(recognize_nil);
        self
    }

    pub fn content_key(mut self, key: impl Into<String>) -> Self {
        self.content_key = Some(key.into());
        self
    }

    pub fn build(self) -> XmlOptions {
        let default = XmlOptions::default();
        XmlOptions {
            max_depth: self.max_depth.unwrap_or(default.max_depth),
            recognize_nil: self.recognize_nil.unwrap_or(default.recognize_nil),
            content_key: self.content_key.or(default.content_key),
        }
    }
}
