// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selection of a body parser by media type, and merging of its output.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use log::{debug, warn};

use crate::de::{self, ErrorKind};
use crate::{BoxedStdError, Params, XmlOptions};

/// Media types handled by [`XmlParser`] in a default [`ParserRegistry`].
pub const XML_MEDIA_TYPES: &[&str] = &["application/xml", "text/xml", "application/x-xml"];

/// Turns a request body into parameters.
///
/// Implemented by [`XmlParser`] and by any
/// `Fn(&[u8]) -> Result<Params, BoxedStdError> + Send + Sync`, so a plain
/// function can be registered directly:
///
/// ```rust
/// use xml_params::{BoxedStdError, Params, ParserRegistry, Value};
///
/// fn request_only(body: &[u8]) -> Result<Params, BoxedStdError> {
///     match xml_params::from_slice(body)?.remove("request") {
///         Some(Value::Map(m)) => Ok(m),
///         _ => Ok(Params::new()),
///     }
/// }
///
/// let mut registry = ParserRegistry::default();
/// registry.register("application/xml", request_only).unwrap();
/// ```
pub trait BodyParser: Send + Sync {
    /// Parses a non-empty body.
    fn parse(&self, body: &[u8]) -> Result<Params, BoxedStdError>;
}

impl<F> BodyParser for F
where
    F: Fn(&[u8]) -> Result<Params, BoxedStdError> + Send + Sync,
{
    fn parse(&self, body: &[u8]) -> Result<Params, BoxedStdError> {
        self(body)
    }
}

/// The default XML body parser; see [`crate::coerce`].
#[derive(Clone, Debug, Default)]
pub struct XmlParser {
    options: XmlOptions,
}

impl XmlParser {
    pub fn new(options: XmlOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &XmlOptions {
        &self.options
    }
}

impl BodyParser for XmlParser {
    fn parse(&self, body: &[u8]) -> Result<Params, BoxedStdError> {
        Ok(crate::from_slice_with_options(body, &self.options)?)
    }
}

/// A media type string which couldn't be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid media type {media_type:?}")]
pub struct InvalidMediaType {
    pub media_type: String,
    #[source]
    source: mime::FromStrError,
}

/// Returns the lowercased `type/subtype` of a media type, without parameters.
fn essence(media_type: &str) -> Result<String, InvalidMediaType> {
    match media_type.trim().parse::<mime::Mime>() {
        Ok(m) => Ok(m.essence_str().to_ascii_lowercase()),
        Err(source) => Err(InvalidMediaType {
            media_type: media_type.to_owned(),
            source,
        }),
    }
}

/// Maps media types to [`BodyParser`]s.
///
/// This is setup-time configuration: it's built and adjusted through
/// `&mut self`, then shared by reference with any number of concurrent
/// [`Dispatcher`]s. The borrow checker thus rules out registration while a
/// request is being parsed.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn BodyParser>>,
}

/// A registry with a default [`XmlParser`] for each of [`XML_MEDIA_TYPES`].
impl Default for ParserRegistry {
    fn default() -> Self {
        let xml: Arc<dyn BodyParser> = Arc::new(XmlParser::default());
        Self {
            parsers: XML_MEDIA_TYPES
                .iter()
                .map(|&m| (m.to_owned(), xml.clone()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut media_types: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        media_types.sort_unstable();
        f.debug_struct("ParserRegistry")
            .field("media_types", &media_types)
            .finish()
    }
}

impl ParserRegistry {
    /// Returns a registry with no parsers at all.
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Installs `parser` for `media_type`, returning the parser it replaced.
    ///
    /// Parameters such as `charset` are ignored, and matching is case-insensitive.
    pub fn register<P: BodyParser + 'static>(
        &mut self,
        media_type: &str,
        parser: P,
    ) -> Result<Option<Arc<dyn BodyParser>>, InvalidMediaType> {
        let key = essence(media_type)?;
        debug!("registering body parser for {}", &key);
        Ok(self.parsers.insert(key, Arc::new(parser)))
    }

    /// Removes the parser for `media_type`, returning it.
    pub fn unregister(&mut self, media_type: &str) -> Option<Arc<dyn BodyParser>> {
        self.parsers.remove(&essence(media_type).ok()?)
    }

    /// Returns the parser for `media_type`, if any.
    pub fn get(&self, media_type: &str) -> Option<&Arc<dyn BodyParser>> {
        self.parsers.get(&essence(media_type).ok()?)
    }

    /// Temporarily installs `parser` for `media_type`.
    ///
    /// The returned guard dereferences to this registry; when it's dropped,
    /// the previous registration (or its absence) is restored. Guards nest in
    /// stack order.
    ///
    /// ```rust
    /// use xml_params::{BoxedStdError, Dispatcher, Params, ParserRegistry};
    ///
    /// fn nothing(_body: &[u8]) -> Result<Params, BoxedStdError> {
    ///     Ok(Params::new())
    /// }
    ///
    /// let mut registry = ParserRegistry::default();
    /// {
    ///     let scoped = registry.scoped("application/xml", nothing).unwrap();
    ///     let params = Dispatcher::new(&scoped).parse("application/xml", b"<a>1</a>").unwrap();
    ///     assert!(params.is_empty());
    /// }
    /// let params = Dispatcher::new(&registry).parse("application/xml", b"<a>1</a>").unwrap();
    /// assert!(params.contains_key("a"));
    /// ```
    pub fn scoped<P: BodyParser + 'static>(
        &mut self,
        media_type: &str,
        parser: P,
    ) -> Result<ScopedParser<'_>, InvalidMediaType> {
        let key = essence(media_type)?;
        debug!("overriding body parser for {}", &key);
        let previous = self.parsers.insert(key.clone(), Arc::new(parser));
        Ok(ScopedParser {
            registry: self,
            key,
            previous,
        })
    }

    /// Runs `f` with `parser` temporarily installed for `media_type`.
    pub fn with_parser<P, F, T>(
        &mut self,
        media_type: &str,
        parser: P,
        f: F,
    ) -> Result<T, InvalidMediaType>
    where
        P: BodyParser + 'static,
        F: FnOnce(&ParserRegistry) -> T,
    {
        let scoped = self.scoped(media_type, parser)?;
        Ok(f(&*scoped))
    }
}

/// A temporary registration; see [`ParserRegistry::scoped`].
pub struct ScopedParser<'r> {
    registry: &'r mut ParserRegistry,
    key: String,
    previous: Option<Arc<dyn BodyParser>>,
}

impl Deref for ScopedParser<'_> {
    type Target = ParserRegistry;

    fn deref(&self) -> &ParserRegistry {
        &*self.registry
    }
}

impl DerefMut for ScopedParser<'_> {
    fn deref_mut(&mut self) -> &mut ParserRegistry {
        &mut *self.registry
    }
}

impl Drop for ScopedParser<'_> {
    fn drop(&mut self) {
        debug!("restoring body parser for {}", &self.key);
        match self.previous.take() {
            Some(p) => {
                self.registry.parsers.insert(std::mem::take(&mut self.key), p);
            }
            None => {
                self.registry.parsers.remove(&self.key);
            }
        }
    }
}

/// Why a body was refused; see [`BadRequest::reason`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reason {
    /// Not well-formed, or structurally unacceptable (DTD, nesting depth).
    MalformedBody,

    /// A `type` attribute outside the allowed set.
    DisallowedType,

    /// A value which doesn't parse as its declared type.
    Coercion,

    /// A failure from a parser other than [`XmlParser`].
    Other,
}

/// A body which couldn't be parsed; maps to HTTP 400 Bad Request.
#[derive(Debug, thiserror::Error)]
#[error("can't parse {media_type} request body: {source}")]
pub struct BadRequest {
    pub media_type: String,
    #[source]
    pub source: BoxedStdError,
}

impl BadRequest {
    /// The HTTP status code for this failure.
    pub fn status(&self) -> u16 {
        400
    }

    pub fn reason(&self) -> Reason {
        match self.source.downcast_ref::<de::Error>().map(de::Error::kind) {
            Some(ErrorKind::DisallowedType(_)) => Reason::DisallowedType,
            Some(ErrorKind::Coercion { .. }) => Reason::Coercion,
            Some(k) if k.is_malformed() => Reason::MalformedBody,
            _ => Reason::Other,
        }
    }
}

/// Parses request bodies with the parsers of a [`ParserRegistry`].
#[derive(Copy, Clone, Debug)]
pub struct Dispatcher<'r> {
    registry: &'r ParserRegistry,
}

impl<'r> Dispatcher<'r> {
    pub fn new(registry: &'r ParserRegistry) -> Self {
        Self { registry }
    }

    /// Parses `body` according to `media_type`.
    ///
    /// An empty body, or one with no registered parser, yields empty `Params`
    /// without calling any parser. A whitespace-only body is passed along;
    /// [`XmlParser`] yields empty `Params` for it.
    pub fn parse(&self, media_type: &str, body: &[u8]) -> Result<Params, BadRequest> {
        if body.is_empty() {
            return Ok(Params::new());
        }
        let parser = match self.registry.get(media_type) {
            Some(p) => p,
            None => {
                debug!("no body parser for {:?}; leaving body unparsed", media_type);
                return Ok(Params::new());
            }
        };
        parser.parse(body).map_err(|source| {
            let e = BadRequest {
                media_type: media_type.to_owned(),
                source,
            };
            match e.reason() {
                Reason::DisallowedType => warn!("refusing request body: {}", &e),
                _ => debug!("refusing request body: {}", &e),
            }
            e
        })
    }

    /// Parses `body` and shallow-merges the result into `params`.
    ///
    /// On error, `params` is left untouched.
    pub fn parse_into(
        &self,
        media_type: &str,
        body: &[u8],
        params: &mut Params,
    ) -> Result<(), BadRequest> {
        let parsed = self.parse(media_type, body)?;
        params.merge(parsed);
        Ok(())
    }
}
