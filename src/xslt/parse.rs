//! Namespace-aware loading of XML text into `sxd_document` trees.
//!
//! quick-xml supplies the events; prefixes are resolved here and every
//! element and attribute is created with its expanded name. Named entity
//! references are looked up among the XML built-ins, then the document's
//! internal DTD subset, then the caller's [`EntityResolver`]. External
//! subsets are never fetched.

use crate::common::xml::entities::decode_char_ref;
use crate::common::{Error, Result};
use crate::pipeline::entity::EntityResolver;
use quick_xml::Reader;
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::rc::Rc;
use sxd_document::dom::{ChildOfRoot, Document, Element};
use sxd_document::{Package, QName};

/// Namespace bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Deepest element nesting accepted in a document.
pub const MAX_NESTING: usize = 1024;

/// Prefix bindings in scope, innermost last. `None` is the default
/// namespace; an empty URI undeclares it.
pub type Bindings = Rc<Vec<(Option<String>, String)>>;

/// In-scope bindings of every element of a loaded document.
pub type Scopes<'d> = HashMap<Element<'d>, Bindings>;

/// Whether whitespace-only text directly inside an element with the given
/// namespace and local name is dropped while loading.
pub type StripSpace<'a> = &'a dyn Fn(Option<&str>, &str) -> bool;

/// XML whitespace is space, tab, CR and LF only.
pub fn is_xml_whitespace(text: &str) -> bool {
    text.bytes().all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
}

pub fn split_qname(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}

/// Namespace bound to `prefix` in `bindings`.
pub fn lookup_namespace<'b>(
    bindings: &'b [(Option<String>, String)],
    prefix: Option<&str>,
) -> Option<&'b str> {
    if prefix == Some("xml") {
        return Some(XML_NAMESPACE);
    }
    bindings
        .iter()
        .rev()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.as_str())
        .filter(|uri| !uri.is_empty())
}

/// The single element child of the document root.
pub fn document_element<'d>(doc: &Document<'d>) -> Option<Element<'d>> {
    doc.root().children().into_iter().find_map(|child| match child {
        ChildOfRoot::Element(element) => Some(element),
        _ => None,
    })
}

/// Parse `text` into a new package.
///
/// # Examples
/// ```
/// use quire::pipeline::entity::XhtmlEntities;
/// use quire::xslt::parse::{document_element, parse_document};
///
/// let package = parse_document("<p>caf&eacute;</p>", "ch1.xhtml", &XhtmlEntities).unwrap();
/// let doc = package.as_document();
/// assert_eq!(document_element(&doc).unwrap().name().local_part(), "p");
/// ```
pub fn parse_document(text: &str, href: &str, entities: &dyn EntityResolver) -> Result<Package> {
    let package = Package::new();
    Loader::new(href, entities).load(&package.as_document(), text)?;
    Ok(package)
}

/// Loads markup into an existing document.
pub struct Loader<'a> {
    href: &'a str,
    entities: &'a dyn EntityResolver,
    strip_space: Option<StripSpace<'a>>,
}

impl<'a> Loader<'a> {
    pub fn new(href: &'a str, entities: &'a dyn EntityResolver) -> Self {
        Self {
            href,
            entities,
            strip_space: None,
        }
    }

    /// Drop whitespace-only text inside elements selected by `strip`,
    /// except where `xml:space="preserve"` is in effect.
    pub fn strip_space(mut self, strip: StripSpace<'a>) -> Self {
        self.strip_space = Some(strip);
        self
    }

    /// Load `text` below the root of `doc`, which should be empty.
    pub fn load<'d>(&self, doc: &Document<'d>, text: &str) -> Result<Scopes<'d>> {
        Builder {
            loader: self,
            doc,
            open: Vec::new(),
            text: String::new(),
            internal: HashMap::new(),
            scopes: HashMap::new(),
            has_root: false,
        }
        .run(text)
    }
}

struct Open<'d> {
    element: Element<'d>,
    bindings: Bindings,
    /// `xml:space="preserve"` in effect
    preserve: bool,
    strip: bool,
}

struct Builder<'l, 'a, 'd> {
    loader: &'l Loader<'a>,
    doc: &'l Document<'d>,
    /// Currently open elements, innermost last
    open: Vec<Open<'d>>,
    /// Character data not yet attached; adjacent text, CDATA and references
    /// become one text node
    text: String,
    /// Entities declared in the internal DTD subset
    internal: HashMap<String, String>,
    scopes: Scopes<'d>,
    has_root: bool,
}

impl<'d> Builder<'_, '_, 'd> {
    fn malformed(&self, message: impl Into<String>) -> Error {
        Error::MalformedMarkup {
            href: self.loader.href.to_string(),
            message: message.into(),
        }
    }

    fn utf8<'t>(&self, bytes: &'t [u8]) -> Result<&'t str> {
        std::str::from_utf8(bytes).map_err(|e| self.malformed(e.to_string()))
    }

    fn run(mut self, text: &str) -> Result<Scopes<'d>> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().check_end_names = true;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| Error::from_xml_error(self.loader.href, e))?;
            match event {
                Event::Start(start) => {
                    self.flush()?;
                    let open = self.open_element(&start)?;
                    self.open.push(open);
                },
                Event::Empty(start) => {
                    self.flush()?;
                    self.open_element(&start)?;
                },
                Event::End(_) => {
                    self.flush()?;
                    self.open.pop();
                },
                Event::Text(text) => {
                    let text = self.utf8(&text)?;
                    self.text.push_str(text);
                },
                Event::CData(data) => {
                    let text = self.utf8(&data)?;
                    self.text.push_str(text);
                },
                Event::GeneralRef(reference) => {
                    let name = self.utf8(&reference)?;
                    let replacement = self.resolve_reference(name)?;
                    self.text.push_str(&replacement);
                },
                Event::Comment(comment) => {
                    self.flush()?;
                    let comment = self.doc.create_comment(self.utf8(&comment)?);
                    match self.open.last() {
                        Some(parent) => parent.element.append_child(comment),
                        None => self.doc.root().append_child(comment),
                    }
                },
                Event::PI(pi) => {
                    self.flush()?;
                    let target = self.utf8(pi.target())?;
                    let value = self.utf8(pi.content())?.trim_start();
                    let pi = self
                        .doc
                        .create_processing_instruction(target, Some(value).filter(|v| !v.is_empty()));
                    match self.open.last() {
                        Some(parent) => parent.element.append_child(pi),
                        None => self.doc.root().append_child(pi),
                    }
                },
                Event::DocType(doctype) => {
                    let doctype = self.utf8(&doctype)?.to_string();
                    self.declare_entities(&doctype);
                },
                Event::Eof => break,
                // XML declaration
                _ => {},
            }
        }

        self.flush()?;
        if let Some(unclosed) = self.open.last() {
            let name = unclosed.element.name().local_part().to_string();
            return Err(self.malformed(format!("unclosed element <{name}>")));
        }
        if !self.has_root {
            return Err(self.malformed("no root element"));
        }
        Ok(self.scopes)
    }

    /// Attach pending character data to the innermost open element.
    fn flush(&mut self) -> Result<()> {
        if self.text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.text);
        match self.open.last() {
            None if is_xml_whitespace(&text) => {},
            None => return Err(self.malformed("text outside the root element")),
            Some(open) if open.strip && is_xml_whitespace(&text) => {},
            Some(open) => open.element.append_child(self.doc.create_text(&text)),
        }
        Ok(())
    }

    fn resolve_reference(&self, name: &str) -> Result<String> {
        if name.starts_with('#') {
            return decode_char_ref(name)
                .map(String::from)
                .ok_or_else(|| self.malformed(format!("invalid character reference &{name};")));
        }
        self.entity(name)
            .map(str::to_string)
            .ok_or_else(|| self.malformed(format!("undefined entity &{name};")))
    }

    fn entity(&self, name: &str) -> Option<&str> {
        resolve_predefined_entity(name)
            .or_else(|| self.internal.get(name).map(String::as_str))
            .or_else(|| self.loader.entities.resolve(name))
    }

    /// Record the internal general entities of a DOCTYPE.
    ///
    /// Parameter and external entities are ignored. Character references in
    /// a value are expanded at declaration; the first declaration of a name
    /// wins.
    fn declare_entities(&mut self, doctype: &str) {
        let Some(open) = doctype.find('[') else {
            return;
        };
        let mut rest = &doctype[open + 1..];
        while let Some(at) = rest.find("<!ENTITY") {
            let decl = rest[at + "<!ENTITY".len()..].trim_start();
            rest = decl;
            if decl.starts_with('%') {
                continue;
            }
            let name_end = decl
                .find(|c: char| c.is_ascii_whitespace())
                .unwrap_or(decl.len());
            let name = &decl[..name_end];
            let definition = decl[name_end..].trim_start();
            let Some(quote) = definition.chars().next().filter(|&c| c == '"' || c == '\'') else {
                continue;
            };
            let body = &definition[1..];
            let Some(end) = body.find(quote) else {
                break;
            };
            if !name.is_empty() && !self.internal.contains_key(name) {
                let value = self.expand_literal(&body[..end]);
                self.internal.insert(name.to_string(), value);
            }
            rest = &body[end + 1..];
        }
    }

    fn expand_literal(&self, value: &str) -> String {
        unescape_with(value, |name| {
            resolve_predefined_entity(name).or_else(|| self.loader.entities.resolve(name))
        })
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
    }

    fn open_element(&mut self, start: &BytesStart<'_>) -> Result<Open<'d>> {
        if self.open.len() >= MAX_NESTING {
            return Err(self.malformed(format!(
                "elements nested deeper than {MAX_NESTING} levels"
            )));
        }
        if self.open.is_empty() && self.has_root {
            return Err(self.malformed("more than one root element"));
        }

        let raw_name = self.utf8(start.name().as_ref())?.to_string();

        // Declarations first so the element's own prefix can use them.
        let mut plain: Vec<(String, String)> = Vec::new();
        let mut declared: SmallVec<[(Option<String>, String); 4]> = SmallVec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.malformed(e.to_string()))?;
            let key = self.utf8(attr.key.as_ref())?.to_string();
            let value = self.attribute_value(self.utf8(&attr.value)?)?;

            if key == "xmlns" {
                declared.push((None, value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                declared.push((Some(prefix.to_string()), value));
            } else {
                plain.push((key, value));
            }
        }

        let (parent_bindings, mut preserve) = match self.open.last() {
            Some(parent) => (parent.bindings.clone(), parent.preserve),
            None => (Bindings::default(), false),
        };
        let bindings = if declared.is_empty() {
            parent_bindings
        } else {
            let mut all = Vec::clone(&parent_bindings);
            all.extend(declared);
            Rc::new(all)
        };

        let (prefix, local) = split_qname(&raw_name);
        let namespace = match prefix {
            Some(p) => Some(lookup_namespace(&bindings, Some(p)).ok_or_else(|| {
                self.malformed(format!("unbound namespace prefix in {raw_name}"))
            })?),
            None => lookup_namespace(&bindings, None),
        };
        let element = self
            .doc
            .create_element(QName::with_namespace_uri(namespace, local));
        if namespace.is_some() {
            element.set_preferred_prefix(prefix);
        }

        // Unprefixed attributes are in no namespace.
        for (key, value) in &plain {
            let (prefix, local) = split_qname(key);
            let namespace = match prefix {
                Some(p) => Some(lookup_namespace(&bindings, Some(p)).ok_or_else(|| {
                    self.malformed(format!("unbound namespace prefix in {key}"))
                })?),
                None => None,
            };
            if element
                .attribute_value(QName::with_namespace_uri(namespace, local))
                .is_some()
            {
                return Err(self.malformed(format!("duplicate attribute {key} on <{raw_name}>")));
            }
            if namespace == Some(XML_NAMESPACE) && local == "space" {
                preserve = match value.as_str() {
                    "preserve" => true,
                    "default" => false,
                    _ => preserve,
                };
            }
            let attribute =
                element.set_attribute_value(QName::with_namespace_uri(namespace, local), value);
            attribute.set_preferred_prefix(prefix);
        }

        let strip = !preserve
            && self
                .loader
                .strip_space
                .is_some_and(|strip| strip(namespace, local));

        match self.open.last() {
            Some(parent) => parent.element.append_child(element),
            None => self.doc.root().append_child(element),
        }
        self.has_root = true;
        self.scopes.insert(element, bindings.clone());
        Ok(Open {
            element,
            bindings,
            preserve,
            strip,
        })
    }

    /// Normalise literal whitespace, then expand references.
    fn attribute_value(&self, raw: &str) -> Result<String> {
        let normalized = raw.replace(['\t', '\n', '\r'], " ");
        let value = unescape_with(&normalized, |name| self.entity(name))
            .map_err(|e| self.malformed(e.to_string()))?;
        Ok(value.into_owned())
    }
}
