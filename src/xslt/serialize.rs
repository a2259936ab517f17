//! Serialization of result trees as xml, html or text.
//!
//! Result trees carry expanded names, so the xml writer works out the
//! namespace declarations each element needs from a scope stack. Elements
//! are written without recursion.

use super::parse::{XML_NAMESPACE, is_xml_whitespace};
use super::stylesheet::{OutputMethod, OutputSettings};
use crate::common::xml::{escape_attribute, escape_text};
use sxd_document::dom::{ChildOfElement, Element};
use sxd_xpath::nodeset::Node;

/// Elements html output writes without an end tag.
const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "br", "col", "embed", "frame", "hr", "img", "input", "isindex",
    "link", "meta", "param", "source", "track", "wbr",
];

fn first_element(result: Element<'_>) -> Option<Element<'_>> {
    result.children().into_iter().find_map(|child| match child {
        ChildOfElement::Element(element) => Some(element),
        _ => None,
    })
}

/// The method `output` selects for the children of `result`.
///
/// Without an explicit method, a result whose first element is an
/// unqualified `html` (ignoring case) is written as html, anything else as
/// xml.
pub fn output_method(result: Element<'_>, output: &OutputSettings) -> OutputMethod {
    if let Some(method) = output.method {
        return method;
    }
    for child in result.children() {
        match child {
            ChildOfElement::Element(element) => {
                let name = element.name();
                return if name.namespace_uri().is_none()
                    && name.local_part().eq_ignore_ascii_case("html")
                {
                    OutputMethod::Html
                } else {
                    OutputMethod::Xml
                };
            },
            ChildOfElement::Text(text) if !is_xml_whitespace(text.text()) => {
                return OutputMethod::Xml;
            },
            _ => {},
        }
    }
    OutputMethod::Xml
}

/// Write the children of `result` as a string according to `output`.
pub fn serialize(result: Element<'_>, output: &OutputSettings) -> String {
    let method = output_method(result, output);
    if method == OutputMethod::Text {
        return Node::Element(result).string_value();
    }

    let mut writer = Writer {
        html: method == OutputMethod::Html,
        out: String::with_capacity(4096),
        scope: Vec::new(),
    };
    if method == OutputMethod::Xml && !output.omit_xml_declaration {
        writer.out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        writer.out.push('\n');
    }
    if let Some(element) = first_element(result) {
        writer.doctype(element, output);
    }
    writer.write(result);
    writer.out
}

enum Step<'d> {
    Node { node: ChildOfElement<'d>, raw: bool },
    End { tag: String, mark: usize },
}

struct Writer {
    html: bool,
    out: String,
    /// Bindings in effect, innermost last; an empty URI undeclares the
    /// default namespace
    scope: Vec<(Option<String>, String)>,
}

impl Writer {
    fn doctype(&mut self, element: Element<'_>, output: &OutputSettings) {
        let (public, system) = (&output.doctype_public, &output.doctype_system);
        let external = match (public, system) {
            (Some(public), Some(system)) => format!(r#" PUBLIC "{public}" "{system}""#),
            (None, Some(system)) => format!(r#" SYSTEM "{system}""#),
            // Public identifiers alone are only meaningful for html
            (Some(public), None) if self.html => format!(r#" PUBLIC "{public}""#),
            _ => return,
        };
        let local = element.name().local_part();
        let root_name = match element.preferred_prefix() {
            Some(prefix) if element.name().namespace_uri().is_some() => format!("{prefix}:{local}"),
            _ => local.to_string(),
        };
        self.out.push_str("<!DOCTYPE ");
        self.out.push_str(&root_name);
        self.out.push_str(&external);
        self.out.push_str(">\n");
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        match self
            .scope
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == prefix)
        {
            Some((_, uri)) => Some(uri.as_str()),
            None if prefix.is_none() => Some(""),
            None => None,
        }
    }

    fn write<'d>(&mut self, result: Element<'d>) {
        let mut steps: Vec<Step<'d>> = result
            .children()
            .into_iter()
            .rev()
            .map(|node| Step::Node { node, raw: false })
            .collect();

        while let Some(step) = steps.pop() {
            match step {
                Step::End { tag, mark } => {
                    self.end_tag(&tag);
                    self.scope.truncate(mark);
                },
                Step::Node { node, raw } => match node {
                    ChildOfElement::Element(element) => self.element(element, &mut steps),
                    ChildOfElement::Text(text) if raw => self.out.push_str(text.text()),
                    ChildOfElement::Text(text) => self.out.push_str(&escape_text(text.text())),
                    ChildOfElement::Comment(comment) => {
                        self.out.push_str("<!--");
                        self.out.push_str(comment.text());
                        self.out.push_str("-->");
                    },
                    ChildOfElement::ProcessingInstruction(pi) => {
                        self.out.push_str("<?");
                        self.out.push_str(pi.target());
                        if let Some(value) = pi.value() {
                            self.out.push(' ');
                            self.out.push_str(value);
                        }
                        self.out.push_str(if self.html { ">" } else { "?>" });
                    },
                },
            }
        }
    }

    /// Write the start tag of `element` and queue its content.
    fn element<'d>(&mut self, element: Element<'d>, steps: &mut Vec<Step<'d>>) {
        let name = element.name();
        let local = name.local_part();
        let mark = self.scope.len();
        let mut declared: Vec<(Option<String>, String)> = Vec::new();

        let uri = name.namespace_uri().unwrap_or("");
        let prefix = if uri.is_empty() {
            None
        } else {
            element.preferred_prefix().filter(|p| *p != "xml" && *p != "xmlns")
        };
        if self.lookup(prefix) != Some(uri) {
            self.bind(&mut declared, prefix.map(str::to_string), uri.to_string());
        }
        let tag = match prefix {
            Some(prefix) => format!("{prefix}:{local}"),
            None => local.to_string(),
        };

        // Attribute names need a prefix whenever they have a namespace
        let mut attributes = Vec::new();
        for attribute in element.attributes() {
            let attribute_name = attribute.name();
            let qualified = match attribute_name.namespace_uri() {
                None => attribute_name.local_part().to_string(),
                Some(uri) => {
                    let prefix =
                        self.attribute_prefix(&mut declared, attribute.preferred_prefix(), uri);
                    format!("{prefix}:{}", attribute_name.local_part())
                },
            };
            attributes.push((qualified, attribute.value()));
        }

        self.out.push('<');
        self.out.push_str(&tag);
        for (prefix, uri) in &declared {
            match prefix {
                Some(prefix) => {
                    self.out.push_str(" xmlns:");
                    self.out.push_str(prefix);
                },
                None => self.out.push_str(" xmlns"),
            }
            self.out.push_str("=\"");
            self.out.push_str(&escape_attribute(uri));
            self.out.push('"');
        }
        for (qualified, value) in attributes {
            self.out.push(' ');
            self.out.push_str(&qualified);
            self.out.push_str("=\"");
            self.out.push_str(&escape_attribute(value));
            self.out.push('"');
        }

        let children = element.children();
        let html_element = self.html && name.namespace_uri().is_none();
        if html_element {
            self.out.push('>');
            let void = HTML_VOID_ELEMENTS
                .iter()
                .any(|v| v.eq_ignore_ascii_case(local));
            if void && children.is_empty() {
                self.scope.truncate(mark);
                return;
            }
        } else if children.is_empty() {
            self.out.push_str("/>");
            self.scope.truncate(mark);
            return;
        } else {
            self.out.push('>');
        }

        let raw = html_element
            && (local.eq_ignore_ascii_case("script") || local.eq_ignore_ascii_case("style"));
        steps.push(Step::End { tag, mark });
        steps.extend(
            children
                .into_iter()
                .rev()
                .map(|node| Step::Node { node, raw }),
        );
    }

    fn end_tag(&mut self, tag: &str) {
        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push('>');
    }

    fn bind(&mut self, declared: &mut Vec<(Option<String>, String)>, prefix: Option<String>, uri: String) {
        match declared.iter_mut().find(|(p, _)| *p == prefix) {
            Some(existing) => existing.1 = uri.clone(),
            None => declared.push((prefix.clone(), uri.clone())),
        }
        self.scope.push((prefix, uri));
    }

    fn attribute_prefix(
        &mut self,
        declared: &mut Vec<(Option<String>, String)>,
        preferred: Option<&str>,
        uri: &str,
    ) -> String {
        if uri == XML_NAMESPACE {
            return "xml".to_string();
        }
        if let Some(prefix) = preferred.filter(|p| *p != "xml" && *p != "xmlns") {
            match self.lookup(Some(prefix)) {
                Some(bound) if bound == uri => return prefix.to_string(),
                None if !declared.iter().any(|(p, _)| p.as_deref() == Some(prefix)) => {
                    self.bind(declared, Some(prefix.to_string()), uri.to_string());
                    return prefix.to_string();
                },
                _ => {},
            }
        }
        let existing = self.scope.iter().rev().find_map(|(p, u)| match p {
            Some(p) if u == uri && self.lookup(Some(p.as_str())) == Some(uri) => Some(p.clone()),
            _ => None,
        });
        if let Some(prefix) = existing {
            return prefix;
        }
        let prefix = (0..)
            .map(|n| format!("ns{n}"))
            .find(|candidate| self.lookup(Some(candidate.as_str())).is_none())
            .unwrap_or_default();
        self.bind(declared, Some(prefix.clone()), uri.to_string());
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sxd_document::dom::Document;
    use sxd_document::{Package, QName};

    fn xml() -> OutputSettings {
        OutputSettings {
            method: Some(OutputMethod::Xml),
            omit_xml_declaration: true,
            ..Default::default()
        }
    }

    fn element<'d>(doc: &Document<'d>, parent: Element<'d>, namespace: Option<&str>, prefix: Option<&str>, local: &str) -> Element<'d> {
        let element = doc.create_element(QName::with_namespace_uri(namespace, local));
        element.set_preferred_prefix(prefix);
        parent.append_child(element);
        element
    }

    #[test]
    fn test_namespace_fixup() {
        let package = Package::new();
        let doc = package.as_document();
        let result = doc.create_element("quire-result");
        let a = element(&doc, result, Some("urn:a"), None, "a");
        let b = element(&doc, a, Some("urn:b"), Some("p"), "b");
        b.set_attribute_value(QName::with_namespace_uri(Some("urn:c"), "at"), "1");
        let lang = b.set_attribute_value(QName::with_namespace_uri(Some(XML_NAMESPACE), "lang"), "en");
        lang.set_preferred_prefix(Some("xml"));
        element(&doc, a, None, None, "c");
        assert_eq!(
            serialize(result, &xml()),
            r#"<a xmlns="urn:a"><p:b xmlns:p="urn:b" xmlns:ns0="urn:c" ns0:at="1" xml:lang="en"/><c xmlns=""/></a>"#
        );
    }

    #[test]
    fn test_declarations_only_where_needed() {
        let package = Package::new();
        let doc = package.as_document();
        let result = doc.create_element("quire-result");
        let a = element(&doc, result, Some("urn:e"), Some("e"), "a");
        let b = element(&doc, a, None, None, "b");
        b.append_child(doc.create_text("1 < 2 & 3"));
        let inner = element(&doc, a, Some("urn:e"), Some("e"), "c");
        inner.append_child(doc.create_processing_instruction("t", Some("v")));
        assert_eq!(
            serialize(result, &xml()),
            r#"<e:a xmlns:e="urn:e"><b>1 &lt; 2 &amp; 3</b><e:c><?t v?></e:c></e:a>"#
        );
    }

    #[test]
    fn test_xml_declaration_and_doctype() {
        let package = Package::new();
        let doc = package.as_document();
        let result = doc.create_element("quire-result");
        element(&doc, result, None, None, "r");
        let output = OutputSettings {
            doctype_public: Some("-//P".into()),
            doctype_system: Some("r.dtd".into()),
            ..Default::default()
        };
        assert_eq!(
            serialize(result, &output),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE r PUBLIC \"-//P\" \"r.dtd\">\n<r/>"
        );
    }

    #[test]
    fn test_html_output() {
        let package = Package::new();
        let doc = package.as_document();
        let result = doc.create_element("quire-result");
        let html = element(&doc, result, None, None, "html");
        let head = element(&doc, html, None, None, "head");
        element(&doc, head, None, None, "meta");
        let script = element(&doc, head, None, None, "script");
        script.append_child(doc.create_text("a < b"));
        let body = element(&doc, html, None, None, "body");
        element(&doc, body, None, None, "p");
        element(&doc, body, None, None, "br");
        body.append_child(doc.create_processing_instruction("php", Some("x")));

        let output = OutputSettings::default();
        assert_eq!(output_method(result, &output), OutputMethod::Html);
        assert_eq!(
            serialize(result, &output),
            "<html><head><meta><script>a < b</script></head><body><p></p><br><?php x></body></html>"
        );
    }

    #[test]
    fn test_text_output() {
        let package = Package::new();
        let doc = package.as_document();
        let result = doc.create_element("quire-result");
        let a = element(&doc, result, None, None, "a");
        a.append_child(doc.create_text("x < y"));
        a.append_child(doc.create_comment("hidden"));
        result.append_child(doc.create_text(" tail"));
        let output = OutputSettings {
            method: Some(OutputMethod::Text),
            ..Default::default()
        };
        assert_eq!(serialize(result, &output), "x < y tail");
    }

    #[test]
    fn test_deep_trees_are_written_iteratively() {
        let package = Package::new();
        let doc = package.as_document();
        let result = doc.create_element("quire-result");
        let mut parent = result;
        for _ in 0..100_000 {
            parent = element(&doc, parent, None, None, "d");
        }
        let written = serialize(result, &xml());
        assert!(written.starts_with("<d><d>"));
        assert!(written.ends_with("<d/></d></d>"));
    }
}
