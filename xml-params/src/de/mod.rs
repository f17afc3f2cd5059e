// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading XML into an owned element tree.

pub mod text;

use std::sync::Arc;

use log::trace;
use xml::{
    attribute::OwnedAttribute,
    common::{Position, TextPosition},
    name::OwnedName,
    reader::{ParserConfig, XmlEvent},
};

use self::text::TypeHint;

/// A single element in the XML stack; see [`Error::stack`].
#[derive(Clone, Debug)]
pub struct StackElement {
    /// The full name of the element, including its prefix (if any) and local name.
    pub name: OwnedName,

    /// The position of this element's `StartElement` event within the underlying document.
    pub pos: TextPosition,
}

/// A simple `Error` impl for use by internal parsers.
#[derive(Debug)]
pub(crate) struct SimpleError(pub(crate) String);

impl std::fmt::Display for SimpleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for SimpleError {}

/// An error encountered while reading or coercing an XML body.
///
/// This type's `Display` impl will show the error encountered and the XML
/// element stack, printing the qname and line:column of each element. E.g.:
///
/// ```text
/// can't parse "fifteen" as integer: invalid digit found in string @ 3:11
///
/// XML element stack:
///    1: <a> @ 3:11
///    0: <data> @ 1:1
/// ```
///
/// Cloning an `Error` is cheap.
#[derive(Clone, Debug)]
pub struct Error(Arc<ErrorInner>);

impl Error {
    /// Returns what went wrong.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Returns the stack of XML elements as of when this error occurred.
    ///
    /// `stack()[0]` is the root; `stack.last()` is the current element.
    pub fn stack(&self) -> &[StackElement] {
        &self.0.stack
    }

    /// Returns the position within the document where the error was noticed.
    pub fn position(&self) -> TextPosition {
        self.0.pos
    }

    pub(crate) fn new(stack: Vec<StackElement>, pos: TextPosition, kind: ErrorKind) -> Self {
        Error(Arc::new(ErrorInner { kind, stack, pos }))
    }

    fn xml(stack: Vec<StackElement>, e: xml::reader::Error) -> Self {
        let pos = e.position();
        Self::new(stack, pos, ErrorKind::Xml(e))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = &*self.0;
        write!(f, "{} @ {}", &inner.kind, &inner.pos)?;
        if !inner.stack.is_empty() {
            write!(f, "\n\nXML element stack:\n")?;
            for (i, element) in inner.stack.iter().enumerate().rev() {
                writeln!(
                    f,
                    "{:4x}: <{}> @ {}",
                    i,
                    element.name.borrow().repr_display(),
                    &element.pos
                )?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.0.kind)
    }
}

/// Information about an error, which should be enclosed in an `Arc` to make cloning cheap.
#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    stack: Vec<StackElement>,
    pos: TextPosition,
}

/// The category of an [`Error`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An error produced by `xml-rs`: syntax, bad UTF-8, or premature EOF.
    #[error("{}", .0.msg())]
    Xml(#[source] xml::reader::Error),

    /// The document carries a `<!DOCTYPE`; DTDs are never processed.
    #[error("document type declarations are not allowed")]
    Doctype,

    /// The body isn't in an ASCII-compatible encoding such as UTF-8.
    #[error("request body must be UTF-8; UTF-16 and UTF-32 are not accepted")]
    Encoding,

    /// The document has no root element, more than one, or text outside it.
    #[error("document must have exactly one root element and no text outside it")]
    Root,

    /// Elements are nested deeper than [`crate::XmlOptions::max_depth`].
    #[error("elements nested deeper than {0}")]
    TooDeep(usize),

    /// A `type` attribute outside the fixed set of [`TypeHint`]s.
    #[error("disallowed type attribute {0:?}")]
    DisallowedType(String),

    /// Text which doesn't parse as its declared [`TypeHint`].
    #[error("can't parse {text:?} as {hint}: {source}")]
    Coercion {
        hint: TypeHint,
        text: String,
        #[source]
        source: crate::BoxedStdError,
    },
}

impl ErrorKind {
    /// Returns true if the body isn't acceptable XML at all, as opposed to
    /// well-formed XML with unacceptable content.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ErrorKind::Xml(_)
                | ErrorKind::Encoding
                | ErrorKind::Doctype
                | ErrorKind::Root
                | ErrorKind::TooDeep(_)
        )
    }
}

/// A fully-read element.
///
/// Built by [`read`] and consumed by [`crate::coerce`]; it never escapes the crate.
#[derive(Debug)]
pub(crate) struct Element {
    pub(crate) name: OwnedName,
    pub(crate) pos: TextPosition,
    pub(crate) attributes: Vec<OwnedAttribute>,
    pub(crate) children: Vec<Element>,

    /// Concatenated character data, CDATA, and whitespace directly within
    /// this element, with entities already expanded.
    pub(crate) text: String,
}

impl Element {
    /// Returns the value of the unprefixed attribute with the given local name.
    pub(crate) fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.prefix.is_none() && a.name.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub(crate) fn stack_element(&self) -> StackElement {
        StackElement {
            name: self.name.clone(),
            pos: self.pos,
        }
    }
}

/// Reads the root element (and everything inside it) from `source`.
///
/// Only the predefined entities (`&lt;` and friends) and character references
/// are expanded. A document type declaration is rejected outright, so
/// neither internal nor external entities can be defined.
pub(crate) fn read(source: &[u8], max_depth: usize) -> Result<Element, Error> {
    reject_wide_encoding(source)?;
    reject_doctype(source)?;
    let inner = ParserConfig::new()
        .trim_whitespace(false)
        .whitespace_to_characters(true)
        .cdata_to_characters(true)
        .coalesce_characters(true)
        .ignore_comments(true)
        .create_reader(source);
    Reader {
        inner,
        open: Vec::new(),
        max_depth,
    }
    .root()
}

/// Returns `Err` for a UTF-16 or UTF-32 body.
///
/// xml-rs decodes these from their byte order mark, which would hide a
/// document type declaration from [`reject_doctype`]'s byte scan. Without a
/// BOM, such text always contains NUL bytes, which no XML document may.
fn reject_wide_encoding(source: &[u8]) -> Result<(), Error> {
    let bom = source.starts_with(b"\xFF\xFE") || source.starts_with(b"\xFE\xFF");
    if bom || source.contains(&0) {
        return Err(Error::new(Vec::new(), TextPosition::new(), ErrorKind::Encoding));
    }
    Ok(())
}

/// Returns `Err` if the prolog contains a document type declaration.
///
/// xml-rs has no switch to refuse DTDs, so this looks for one before the
/// first element, skipping over the XML declaration, processing
/// instructions, comments, and a UTF-8 byte order mark. Anything it can't
/// make sense of is left for xml-rs to report.
fn reject_doctype(source: &[u8]) -> Result<(), Error> {
    let mut rest = source.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(source);
    loop {
        rest = rest.trim_ascii_start();
        let terminator: &[u8] = if rest.starts_with(b"<?") {
            b"?>"
        } else if rest.starts_with(b"<!--") {
            b"-->"
        } else if rest.starts_with(b"<!DOCTYPE") {
            return Err(Error::new(Vec::new(), TextPosition::new(), ErrorKind::Doctype));
        } else {
            return Ok(());
        };
        match rest
            .windows(terminator.len())
            .position(|w| w == terminator)
        {
            Some(i) => rest = &rest[i + terminator.len()..],
            None => return Ok(()),
        }
    }
}

/// Reads XML events into a tree of [`Element`]s.
struct Reader<R: std::io::Read> {
    inner: xml::reader::EventReader<R>,

    /// Elements which have started but not yet ended. `open[0]` is the root.
    open: Vec<Element>,
    max_depth: usize,
}

impl<R: std::io::Read> Reader<R> {
    fn stack(&self) -> Vec<StackElement> {
        self.open.iter().map(Element::stack_element).collect()
    }

    /// Reads the whole document, returning its root element.
    fn root(mut self) -> Result<Element, Error> {
        let mut root = None;
        loop {
            let event = match self.inner.next() {
                Ok(e) => e,
                Err(e) => return Err(Error::xml(self.stack(), e)),
            };
            match event {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    let pos = self.inner.position();
                    if self.open.is_empty() && root.is_some() {
                        return Err(Error::new(Vec::new(), pos, ErrorKind::Root));
                    }
                    if self.open.len() >= self.max_depth {
                        return Err(Error::new(
                            self.stack(),
                            pos,
                            ErrorKind::TooDeep(self.max_depth),
                        ));
                    }
                    trace!("Starting {}, new depth {}", &name, self.open.len() + 1);
                    self.open.push(Element {
                        name,
                        pos,
                        attributes,
                        children: Vec::new(),
                        text: String::new(),
                    });
                }
                XmlEvent::EndElement { name } => {
                    trace!("Ending {}, new depth {}", &name, self.open.len().saturating_sub(1));

                    // xml-rs guarantees start/end balance, so `pop` always succeeds.
                    if let Some(element) = self.open.pop() {
                        debug_assert_eq!(&element.name, &name);
                        match self.open.last_mut() {
                            Some(parent) => parent.children.push(element),
                            None => root = Some(element),
                        }
                    }
                }
                XmlEvent::Characters(s) | XmlEvent::CData(s) | XmlEvent::Whitespace(s) => {
                    match self.open.last_mut() {
                        Some(cur) if cur.text.is_empty() => cur.text = s,
                        Some(cur) => cur.text.push_str(&s),
                        None if text::is_blank(&s) => {}
                        None => {
                            let pos = self.inner.position();
                            return Err(Error::new(Vec::new(), pos, ErrorKind::Root));
                        }
                    }
                }
                XmlEvent::EndDocument => break,

                // StartDocument, processing instructions, comments.
                _ => {}
            }
        }
        root.ok_or_else(|| Error::new(Vec::new(), self.inner.position(), ErrorKind::Root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn read_default(source: &[u8]) -> Result<Element, Error> {
        read(source, 128)
    }

    #[test]
    fn bad_xml() {
        init();
        let e = read_default(b"argh").unwrap_err();
        assert!(e.kind().is_malformed());
        let e = read_default(b"<a b=></a>").unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Xml(_));
    }

    #[test]
    fn unterminated() {
        init();
        let e = read_default(b"<a><b>text</b>").unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Xml(_));
        assert_eq!(e.stack().len(), 1);
        assert_eq!(e.stack()[0].name.local_name, "a");
    }

    #[test]
    fn mismatched_end() {
        init();
        read_default(b"<a><b>text</c></a>").unwrap_err();
    }

    #[test]
    fn nested_element() {
        init();
        let root =
            read_default(br#"<?xml version="1.0"?><root x="1"><a><b><c /></b></a><a/></root>"#)
                .unwrap();
        assert_eq!(root.name.local_name, "root");
        assert_eq!(root.attribute("x"), Some("1"));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].children[0].children[0].name.local_name, "c");
    }

    #[test]
    fn entities_and_cdata() {
        init();
        let root = read_default(
            b"<data>&lt;foo &quot;bar&apos;s&quot; &amp; friends&gt; <![CDATA[<raw>]]>&#65;</data>",
        )
        .unwrap();
        assert_eq!(root.text, r#"<foo "bar's" & friends> <raw>A"#);
    }

    #[test]
    fn comments_are_skipped() {
        init();
        let root = read_default(b"<!-- hi --><a>x<!-- inner -->y</a><!-- bye -->").unwrap();
        assert_eq!(root.text, "xy");
    }

    #[test]
    fn undefined_entity() {
        init();
        let e = read_default(b"<a>&bogus;</a>").unwrap_err();
        assert!(e.kind().is_malformed());
    }

    #[test]
    fn doctype_rejected() {
        init();
        let e = read_default(
            br#"<?xml version="1.0"?>
<!-- leading comment -->
<!DOCTYPE a [<!ENTITY x "boom">]>
<a>&x;</a>"#,
        )
        .unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Doctype);

        let e = read_default(b"\xEF\xBB\xBF<!DOCTYPE a SYSTEM \"file:///etc/passwd\"><a/>")
            .unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Doctype);

        // The same declaration in UTF-16 must not get past the byte scan.
        let doc = r#"<!DOCTYPE a [<!ENTITY x "boom">]><a>&x;</a>"#;
        for body in [utf16(doc, true, true), utf16(doc, false, true), utf16(doc, true, false)] {
            let e = read_default(&body).unwrap_err();
            assert_matches!(e.kind(), ErrorKind::Encoding);
            assert!(e.kind().is_malformed());
        }
    }

    fn utf16(text: &str, little_endian: bool, bom: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in bom.then_some(0xFEFFu16).into_iter().chain(text.encode_utf16()) {
            out.extend_from_slice(&if little_endian {
                unit.to_le_bytes()
            } else {
                unit.to_be_bytes()
            });
        }
        out
    }

    #[test]
    fn wide_encodings_rejected() {
        init();
        let e = read_default(&utf16("<a>x</a>", true, true)).unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Encoding);
        let e = read_default(b"<a>\0</a>").unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Encoding);
        let root = read_default("<a>caf\u{e9}</a>".as_bytes()).unwrap();
        assert_eq!(root.text, "caf\u{e9}");
    }

    #[test]
    fn too_deep() {
        init();
        let e = read(b"<a><b><c><d/></c></b></a>", 3).unwrap_err();
        assert_matches!(e.kind(), ErrorKind::TooDeep(3));
        assert_eq!(e.stack().len(), 3);
        read(b"<a><b><c/></b></a>", 3).unwrap();
    }

    #[test]
    fn trailing_garbage() {
        init();
        let e = read_default(b"<a/><b/>").unwrap_err();
        assert!(e.kind().is_malformed());
        read_default(b"<a/>junk").unwrap_err();
    }

    #[test]
    fn display_includes_stack() {
        init();
        let e = read_default(b"<outer>\n  <inner>\n</outer>").unwrap_err();
        let msg = e.to_string();
        assert!(msg.contains("XML element stack"), "{}", msg);
        assert!(msg.contains("<inner>"), "{}", msg);
        assert!(msg.contains("<outer>"), "{}", msg);
    }
}
