//! Compilation of stylesheet documents into templates and instructions.

use super::exec::on_transform_stack;
use super::expr::{Expression, Expressions, Namespaces};
use super::parse::{Loader, Scopes, document_element, is_xml_whitespace, lookup_namespace, split_qname};
use super::pattern::Pattern;
use crate::common::{Error, Result};
use crate::pipeline::entity::PredefinedOnly;
use crate::resource::collection::is_valid_ncname;
use std::collections::HashMap;
use std::sync::Arc;
use sxd_document::dom::{ChildOfElement, Element};
use sxd_document::{Package, QName};

/// Namespace of XSLT instructions.
pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// All bindings in scope at an instruction, including the default
/// namespace, for resolving computed names.
pub type Scope = Arc<[(Option<String>, String)]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    Xml,
    Html,
    Text,
}

/// Settings of `xsl:output`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSettings {
    /// `None` picks html or xml from the result tree
    pub method: Option<OutputMethod>,
    pub omit_xml_declaration: bool,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
}

/// Name of a node created in the result tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedName {
    pub namespace: Option<String>,
    /// Preferred prefix for serialization
    pub prefix: Option<String>,
    pub local: String,
}

/// Attribute value template: literal text with `{expr}` holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Avt(Vec<AvtPart>);

#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Literal(String),
    Expr(Expression),
}

impl Avt {
    pub fn parse(text: &str, expressions: &Expressions, namespaces: &Namespaces) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidProgram(format!("{message} in '{text}'"));
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((at, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                    chars.next();
                    literal.push('{');
                },
                '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                    chars.next();
                    literal.push('}');
                },
                '}' => return Err(invalid("unmatched '}'")),
                '{' => {
                    let start = at + 1;
                    let mut quote = None;
                    let mut end = None;
                    for (i, c) in chars.by_ref() {
                        match (quote, c) {
                            (None, '"' | '\'') => quote = Some(c),
                            (Some(q), c) if q == c => quote = None,
                            (None, '}') => {
                                end = Some(i);
                                break;
                            },
                            _ => {},
                        }
                    }
                    let end = end.ok_or_else(|| invalid("unterminated '{'"))?;
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Expr(expressions.compile(&text[start..end], namespaces)?));
                },
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[AvtPart] {
        &self.0
    }
}

/// `xsl:variable`, `xsl:param` or `xsl:with-param`.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: VariableValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Select(Expression),
    /// Content instantiated into a result tree fragment; empty content is
    /// the empty string
    Fragment(Vec<Instruction>),
}

/// One `xsl:sort` key.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub select: Expression,
    pub numeric: bool,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Literal text and `xsl:text`
    Text(String),
    LiteralElement {
        name: ExpandedName,
        attributes: Vec<(ExpandedName, Avt)>,
        body: Vec<Instruction>,
    },
    ApplyTemplates {
        select: Option<Expression>,
        mode: Option<String>,
        sorts: Vec<Sort>,
        params: Vec<Variable>,
    },
    CallTemplate {
        name: String,
        params: Vec<Variable>,
    },
    Copy(Vec<Instruction>),
    CopyOf(Expression),
    ValueOf(Expression),
    Element {
        name: Avt,
        namespace: Option<Avt>,
        /// Namespaces in scope at the instruction, for prefixed names
        scope: Scope,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Avt,
        namespace: Option<Avt>,
        scope: Scope,
        body: Vec<Instruction>,
    },
    Comment(Vec<Instruction>),
    ProcessingInstruction {
        name: Avt,
        body: Vec<Instruction>,
    },
    If {
        test: Expression,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(Expression, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    ForEach {
        select: Expression,
        sorts: Vec<Sort>,
        body: Vec<Instruction>,
    },
    /// Binds for the rest of the enclosing sequence
    Variable(Variable),
}

#[derive(Debug, Clone)]
pub struct Template {
    pub pattern: Option<Pattern>,
    pub name: Option<String>,
    pub mode: Option<String>,
    pub priority: Option<f64>,
    pub params: Vec<Variable>,
    pub body: Vec<Instruction>,
}

/// One pattern alternative of a template, the unit of conflict resolution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rule {
    pub template: usize,
    pub alternative: usize,
    pub priority: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum NameTest {
    Any,
    Namespace(String),
    Name {
        namespace: Option<String>,
        local: String,
    },
}

impl NameTest {
    fn priority(&self, namespace: Option<&str>, local: &str) -> Option<f64> {
        match self {
            NameTest::Name { namespace: ns, local: l } if ns.as_deref() == namespace && l == local => {
                Some(0.0)
            },
            NameTest::Namespace(uri) if namespace == Some(uri.as_str()) => Some(-0.25),
            NameTest::Any => Some(-0.5),
            _ => None,
        }
    }
}

/// A compiled stylesheet. Immutable once built.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    templates: Vec<Template>,
    /// Highest priority first, later declarations first among equals
    rules: Vec<Rule>,
    named: HashMap<String, usize>,
    /// Top-level variables and parameters in declaration order
    globals: Vec<Variable>,
    output: OutputSettings,
    strip_space: Vec<NameTest>,
    preserve_space: Vec<NameTest>,
    expression_count: usize,
}

impl Stylesheet {
    /// Parse and compile a stylesheet. Any failure is reported as
    /// [`Error::InvalidProgram`].
    pub fn compile(text: &str) -> Result<Self> {
        on_transform_stack(|| Self::compile_here(text))
    }

    fn compile_here(text: &str) -> Result<Self> {
        let package = Package::new();
        let doc = package.as_document();
        // Whitespace-only text only survives in xsl:text and under xml:space
        let strip = |namespace: Option<&str>, local: &str| {
            !(namespace == Some(XSLT_NAMESPACE) && local == "text")
        };
        let scopes = Loader::new("stylesheet", &PredefinedOnly)
            .strip_space(&strip)
            .load(&doc, text)
            .map_err(|e| match e {
                Error::MalformedMarkup { message, .. } => Error::InvalidProgram(message),
                other => other,
            })?;
        let root = document_element(&doc)
            .ok_or_else(|| Error::InvalidProgram("empty stylesheet".to_string()))?;

        let compiler = Compiler {
            scopes,
            expressions: Expressions::default(),
        };
        let mut sheet = Self {
            templates: Vec::new(),
            rules: Vec::new(),
            named: HashMap::new(),
            globals: Vec::new(),
            output: OutputSettings::default(),
            strip_space: Vec::new(),
            preserve_space: Vec::new(),
            expression_count: 0,
        };

        if matches!(xsl_local(root), Some("stylesheet" | "transform")) {
            for child in root.children() {
                match child {
                    ChildOfElement::Element(element) => match xsl_local(element) {
                        Some(local) => compiler.top_level(element, local, &mut sheet)?,
                        // User-defined top-level elements are ignored
                        None if element.name().namespace_uri().is_some() => {},
                        None => {
                            return Err(Error::InvalidProgram(format!(
                                "'{}' is not allowed at the top level",
                                element.name().local_part()
                            )));
                        },
                    },
                    ChildOfElement::Text(text) if !is_xml_whitespace(text.text()) => {
                        return Err(Error::InvalidProgram(
                            "text is not allowed at the top level".to_string(),
                        ));
                    },
                    _ => {},
                }
            }
        } else if root
            .attribute_value(QName::with_namespace_uri(Some(XSLT_NAMESPACE), "version"))
            .is_some()
        {
            // Literal result element as stylesheet
            let pattern = Pattern::parse("/", &compiler.expressions, &compiler.namespaces(root))?;
            sheet.templates.push(Template {
                pattern: Some(pattern),
                name: None,
                mode: None,
                priority: None,
                params: Vec::new(),
                body: vec![compiler.literal_element(root)?],
            });
        } else {
            return Err(Error::InvalidProgram(format!(
                "'{}' is not a stylesheet element",
                root.name().local_part()
            )));
        }

        sheet.expression_count = compiler.expressions.count();
        sheet.index_rules();
        Ok(sheet)
    }

    fn index_rules(&mut self) {
        for (index, template) in self.templates.iter().enumerate() {
            let Some(pattern) = &template.pattern else {
                continue;
            };
            for (alternative, alt) in pattern.alternatives().iter().enumerate() {
                self.rules.push(Rule {
                    template: index,
                    alternative,
                    priority: template.priority.unwrap_or(alt.priority()),
                });
            }
        }
        self.rules.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then(b.template.cmp(&a.template))
        });
    }

    #[inline]
    pub fn output(&self) -> &OutputSettings {
        &self.output
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub(crate) fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn globals(&self) -> &[Variable] {
        &self.globals
    }

    /// Number of XPath expressions, patterns included.
    pub fn expression_count(&self) -> usize {
        self.expression_count
    }

    pub fn named_template(&self, name: &str) -> Option<&Template> {
        self.named.get(name).map(|&i| &self.templates[i])
    }

    /// Whether whitespace-only text children of an element with this name
    /// are removed from source documents. Equal matches favour preserving.
    pub fn strips_whitespace(&self, namespace: Option<&str>, local: &str) -> bool {
        if self.strip_space.is_empty() {
            return false;
        }
        let best = |tests: &[NameTest]| {
            tests
                .iter()
                .filter_map(|test| test.priority(namespace, local))
                .fold(f64::NEG_INFINITY, f64::max)
        };
        let strip = best(&self.strip_space);
        strip > f64::NEG_INFINITY && strip > best(&self.preserve_space)
    }
}

fn xsl_local<'d>(element: Element<'d>) -> Option<&'d str> {
    let name = element.name();
    (name.namespace_uri() == Some(XSLT_NAMESPACE)).then(|| name.local_part())
}

fn element_children(element: Element<'_>) -> impl Iterator<Item = Element<'_>> {
    element.children().into_iter().filter_map(|child| match child {
        ChildOfElement::Element(e) => Some(e),
        _ => None,
    })
}

struct Compiler<'d> {
    scopes: Scopes<'d>,
    expressions: Expressions,
}

impl<'d> Compiler<'d> {
    fn scope(&self, element: Element<'d>) -> Scope {
        match self.scopes.get(&element) {
            Some(bindings) => Arc::from(bindings.as_slice()),
            None => Arc::from(Vec::new()),
        }
    }

    fn namespaces(&self, element: Element<'d>) -> Namespaces {
        let prefixed: Vec<(String, String)> = self
            .scopes
            .get(&element)
            .into_iter()
            .flat_map(|bindings| bindings.iter())
            .filter_map(|(prefix, uri)| Some((prefix.clone()?, uri.clone())))
            .collect();
        Arc::from(prefixed)
    }

    fn expression(&self, element: Element<'d>, text: &str) -> Result<Expression> {
        self.expressions.compile(text, &self.namespaces(element))
    }

    fn avt(&self, element: Element<'d>, text: &str) -> Result<Avt> {
        Avt::parse(text, &self.expressions, &self.namespaces(element))
    }

    fn required(&self, element: Element<'d>, attribute: &str) -> Result<&'d str> {
        element.attribute_value(attribute).ok_or_else(|| {
            Error::InvalidProgram(format!(
                "xsl:{} requires a '{attribute}' attribute",
                element.name().local_part()
            ))
        })
    }

    fn optional(&self, element: Element<'d>, attribute: &str) -> Option<String> {
        element.attribute_value(attribute).map(str::to_string)
    }

    fn top_level(&self, element: Element<'d>, local: &str, sheet: &mut Stylesheet) -> Result<()> {
        match local {
            "template" => {
                let pattern = match element.attribute_value("match") {
                    Some(source) => Some(Pattern::parse(
                        source,
                        &self.expressions,
                        &self.namespaces(element),
                    )?),
                    None => None,
                };
                let name = self.optional(element, "name");
                if pattern.is_none() && name.is_none() {
                    return Err(Error::InvalidProgram(
                        "xsl:template needs a 'match' or 'name' attribute".to_string(),
                    ));
                }
                let priority = match element.attribute_value("priority") {
                    Some(value) => Some(value.trim().parse::<f64>().map_err(|_| {
                        Error::InvalidProgram(format!("invalid priority '{value}'"))
                    })?),
                    None => None,
                };
                let index = sheet.templates.len();
                if let Some(name) = &name
                    && sheet.named.insert(name.clone(), index).is_some()
                {
                    return Err(Error::InvalidProgram(format!(
                        "duplicate template name '{name}'"
                    )));
                }
                let (params, body) = self.template_body(element)?;
                sheet.templates.push(Template {
                    pattern,
                    name,
                    mode: self.optional(element, "mode"),
                    priority,
                    params,
                    body,
                });
            },
            "variable" | "param" => {
                let variable = self.variable(element)?;
                if sheet.globals.iter().any(|g| g.name == variable.name) {
                    return Err(Error::InvalidProgram(format!(
                        "duplicate global variable '{}'",
                        variable.name
                    )));
                }
                sheet.globals.push(variable);
            },
            "output" => {
                if let Some(method) = element.attribute_value("method") {
                    sheet.output.method = Some(match method.trim() {
                        "xml" => OutputMethod::Xml,
                        "html" => OutputMethod::Html,
                        "text" => OutputMethod::Text,
                        other => {
                            return Err(Error::InvalidProgram(format!(
                                "unsupported output method '{other}'"
                            )));
                        },
                    });
                }
                if let Some(omit) = element.attribute_value("omit-xml-declaration") {
                    sheet.output.omit_xml_declaration = omit.trim() == "yes";
                }
                if let Some(public) = self.optional(element, "doctype-public") {
                    sheet.output.doctype_public = Some(public);
                }
                if let Some(system) = self.optional(element, "doctype-system") {
                    sheet.output.doctype_system = Some(system);
                }
            },
            "strip-space" | "preserve-space" => {
                let tests = self.name_tests(element, self.required(element, "elements")?)?;
                if local == "strip-space" {
                    sheet.strip_space.extend(tests);
                } else {
                    sheet.preserve_space.extend(tests);
                }
            },
            other => {
                return Err(Error::InvalidProgram(format!(
                    "unsupported top-level element xsl:{other}"
                )));
            },
        }
        Ok(())
    }

    fn name_tests(&self, element: Element<'d>, list: &str) -> Result<Vec<NameTest>> {
        let scope = self.scope(element);
        list.split_whitespace()
            .map(|token| {
                if token == "*" {
                    return Ok(NameTest::Any);
                }
                let (prefix, local) = split_qname(token);
                let namespace = match prefix {
                    Some(prefix) => Some(
                        lookup_namespace(&scope, Some(prefix))
                            .map(str::to_string)
                            .ok_or_else(|| {
                                Error::InvalidProgram(format!("unbound prefix in '{token}'"))
                            })?,
                    ),
                    None => None,
                };
                Ok(match (namespace, local) {
                    (Some(uri), "*") => NameTest::Namespace(uri),
                    (namespace, local) => NameTest::Name {
                        namespace,
                        local: local.to_string(),
                    },
                })
            })
            .collect()
    }

    fn variable(&self, element: Element<'d>) -> Result<Variable> {
        let name = self.required(element, "name")?.trim();
        if !is_valid_ncname(name) {
            return Err(Error::InvalidProgram(format!(
                "'{name}' is not a supported variable name"
            )));
        }
        let body = self.body(element)?;
        let value = match element.attribute_value("select") {
            Some(_) if !body.is_empty() => {
                return Err(Error::InvalidProgram(format!(
                    "variable '{name}' has both a 'select' attribute and content"
                )));
            },
            Some(select) => VariableValue::Select(self.expression(element, select)?),
            None => VariableValue::Fragment(body),
        };
        Ok(Variable {
            name: name.to_string(),
            value,
        })
    }

    /// Leading `xsl:param` elements, then the sequence constructor.
    fn template_body(&self, element: Element<'d>) -> Result<(Vec<Variable>, Vec<Instruction>)> {
        let mut params: Vec<Variable> = Vec::new();
        let mut rest = Vec::new();
        for child in element.children() {
            match child {
                ChildOfElement::Element(e) if rest.is_empty() && xsl_local(e) == Some("param") => {
                    let param = self.variable(e)?;
                    if params.iter().any(|p| p.name == param.name) {
                        return Err(Error::InvalidProgram(format!(
                            "duplicate parameter '{}'",
                            param.name
                        )));
                    }
                    params.push(param);
                },
                ChildOfElement::Comment(_) | ChildOfElement::ProcessingInstruction(_) => {},
                other => rest.push(other),
            }
        }
        Ok((params, self.sequence(rest)?))
    }

    /// Compile the children of `element` into a sequence constructor.
    fn body(&self, element: Element<'d>) -> Result<Vec<Instruction>> {
        self.sequence(element.children())
    }

    fn sequence(&self, children: Vec<ChildOfElement<'d>>) -> Result<Vec<Instruction>> {
        let mut body = Vec::new();
        for child in children {
            match child {
                ChildOfElement::Text(text) => body.push(Instruction::Text(text.text().to_string())),
                ChildOfElement::Element(element) => match xsl_local(element) {
                    Some(local) => body.push(self.instruction(element, local)?),
                    None => body.push(self.literal_element(element)?),
                },
                _ => {},
            }
        }
        Ok(body)
    }

    /// `xsl:with-param` and, where allowed, `xsl:sort` children.
    fn arguments(&self, element: Element<'d>, sortable: bool) -> Result<(Vec<Sort>, Vec<Variable>)> {
        let mut sorts = Vec::new();
        let mut params: Vec<Variable> = Vec::new();
        for child in element_children(element) {
            match xsl_local(child) {
                Some("sort") if sortable => sorts.push(self.sort(child)?),
                Some("with-param") => {
                    let param = self.variable(child)?;
                    if params.iter().any(|p| p.name == param.name) {
                        return Err(Error::InvalidProgram(format!(
                            "duplicate xsl:with-param '{}'",
                            param.name
                        )));
                    }
                    params.push(param);
                },
                _ => {
                    return Err(Error::InvalidProgram(format!(
                        "{} is not allowed inside xsl:{}",
                        child.name().local_part(),
                        element.name().local_part()
                    )));
                },
            }
        }
        Ok((sorts, params))
    }

    fn sort(&self, element: Element<'d>) -> Result<Sort> {
        let numeric = match element.attribute_value("data-type").map(str::trim) {
            None | Some("text") => false,
            Some("number") => true,
            Some(other) => {
                return Err(Error::InvalidProgram(format!("unsupported sort data-type '{other}'")));
            },
        };
        let descending = match element.attribute_value("order").map(str::trim) {
            None | Some("ascending") => false,
            Some("descending") => true,
            Some(other) => {
                return Err(Error::InvalidProgram(format!("unsupported sort order '{other}'")));
            },
        };
        Ok(Sort {
            select: self.expression(element, element.attribute_value("select").unwrap_or("."))?,
            numeric,
            descending,
        })
    }

    fn instruction(&self, element: Element<'d>, local: &str) -> Result<Instruction> {
        Ok(match local {
            "apply-templates" => {
                let (sorts, params) = self.arguments(element, true)?;
                Instruction::ApplyTemplates {
                    select: match element.attribute_value("select") {
                        Some(select) => Some(self.expression(element, select)?),
                        None => None,
                    },
                    mode: self.optional(element, "mode"),
                    sorts,
                    params,
                }
            },
            "call-template" => {
                let (_, params) = self.arguments(element, false)?;
                Instruction::CallTemplate {
                    name: self.required(element, "name")?.to_string(),
                    params,
                }
            },
            "variable" => Instruction::Variable(self.variable(element)?),
            "copy" => Instruction::Copy(self.body(element)?),
            "copy-of" => Instruction::CopyOf(self.expression(element, self.required(element, "select")?)?),
            "value-of" => {
                Instruction::ValueOf(self.expression(element, self.required(element, "select")?)?)
            },
            "text" => {
                let mut text = String::new();
                for child in element.children() {
                    match child {
                        ChildOfElement::Text(t) => text.push_str(t.text()),
                        ChildOfElement::Comment(_) => {},
                        _ => {
                            return Err(Error::InvalidProgram(
                                "xsl:text may only contain text".to_string(),
                            ));
                        },
                    }
                }
                Instruction::Text(text)
            },
            "element" | "attribute" => {
                let name = self.avt(element, self.required(element, "name")?)?;
                let namespace = match element.attribute_value("namespace") {
                    Some(ns) => Some(self.avt(element, ns)?),
                    None => None,
                };
                let scope = self.scope(element);
                let body = self.body(element)?;
                if local == "element" {
                    Instruction::Element {
                        name,
                        namespace,
                        scope,
                        body,
                    }
                } else {
                    Instruction::Attribute {
                        name,
                        namespace,
                        scope,
                        body,
                    }
                }
            },
            "comment" => Instruction::Comment(self.body(element)?),
            "processing-instruction" => Instruction::ProcessingInstruction {
                name: self.avt(element, self.required(element, "name")?)?,
                body: self.body(element)?,
            },
            "if" => Instruction::If {
                test: self.expression(element, self.required(element, "test")?)?,
                body: self.body(element)?,
            },
            "choose" => {
                let mut branches = Vec::new();
                let mut otherwise = None;
                for child in element.children() {
                    match child {
                        ChildOfElement::Element(e) if xsl_local(e) == Some("when") && otherwise.is_none() => {
                            branches.push((
                                self.expression(e, self.required(e, "test")?)?,
                                self.body(e)?,
                            ));
                        },
                        ChildOfElement::Element(e)
                            if xsl_local(e) == Some("otherwise") && otherwise.is_none() =>
                        {
                            otherwise = Some(self.body(e)?);
                        },
                        ChildOfElement::Text(text) if is_xml_whitespace(text.text()) => {},
                        ChildOfElement::Comment(_) | ChildOfElement::ProcessingInstruction(_) => {},
                        _ => {
                            return Err(Error::InvalidProgram(
                                "xsl:choose may only contain xsl:when followed by xsl:otherwise"
                                    .to_string(),
                            ));
                        },
                    }
                }
                if branches.is_empty() {
                    return Err(Error::InvalidProgram(
                        "xsl:choose needs at least one xsl:when".to_string(),
                    ));
                }
                Instruction::Choose {
                    branches,
                    otherwise: otherwise.unwrap_or_default(),
                }
            },
            "for-each" => {
                let mut sorts = Vec::new();
                let mut rest = Vec::new();
                for child in element.children() {
                    match child {
                        ChildOfElement::Element(e) if rest.is_empty() && xsl_local(e) == Some("sort") => {
                            sorts.push(self.sort(e)?);
                        },
                        ChildOfElement::Comment(_) | ChildOfElement::ProcessingInstruction(_) => {},
                        other => rest.push(other),
                    }
                }
                Instruction::ForEach {
                    select: self.expression(element, self.required(element, "select")?)?,
                    sorts,
                    body: self.sequence(rest)?,
                }
            },
            other => {
                return Err(Error::InvalidProgram(format!(
                    "unsupported instruction xsl:{other}"
                )));
            },
        })
    }

    fn literal_element(&self, element: Element<'d>) -> Result<Instruction> {
        let name = element.name();
        let mut attributes = Vec::new();
        for attribute in element.attributes() {
            let attribute_name = attribute.name();
            if attribute_name.namespace_uri() == Some(XSLT_NAMESPACE) {
                continue;
            }
            attributes.push((
                ExpandedName {
                    namespace: attribute_name.namespace_uri().map(str::to_string),
                    prefix: attribute.preferred_prefix().map(str::to_string),
                    local: attribute_name.local_part().to_string(),
                },
                self.avt(element, attribute.value())?,
            ));
        }

        Ok(Instruction::LiteralElement {
            name: ExpandedName {
                namespace: name.namespace_uri().map(str::to_string),
                prefix: element.preferred_prefix().map(str::to_string),
                local: name.local_part().to_string(),
            },
            attributes,
            body: self.body(element)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(body: &str) -> Result<Stylesheet> {
        Stylesheet::compile(&format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="{XSLT_NAMESPACE}" xmlns:h="urn:h" exclude-result-prefixes="h">{body}</xsl:stylesheet>"#
        ))
    }

    fn no_namespaces() -> Namespaces {
        Arc::from(Vec::new())
    }

    #[test]
    fn test_templates_and_rules() {
        let sheet = sheet(
            r#"<xsl:template match="p | h:div"><x/></xsl:template>
               <xsl:template match="p" priority="2"/>
               <xsl:template name="named"/>"#,
        )
        .unwrap();
        assert_eq!(sheet.templates().len(), 3);
        assert!(sheet.named_template("named").is_some());
        let order: Vec<(usize, f64)> = sheet
            .rules()
            .iter()
            .map(|r| (r.template, r.priority))
            .collect();
        assert_eq!(order, [(1, 2.0), (0, 0.0), (0, 0.0)]);
        assert_eq!(sheet.expression_count(), 3);
    }

    #[test]
    fn test_output_settings() {
        let sheet = sheet(
            r#"<xsl:output method="text" omit-xml-declaration="yes" indent="yes"/>"#,
        )
        .unwrap();
        assert_eq!(sheet.output().method, Some(OutputMethod::Text));
        assert!(sheet.output().omit_xml_declaration);
    }

    #[test]
    fn test_literal_elements_keep_expanded_names() {
        let sheet = sheet(r#"<xsl:template match="/"><h:out xmlns:k="urn:k" k:a="{1+1}" xsl:use-attribute-sets=""/></xsl:template>"#)
            .unwrap();
        let Instruction::LiteralElement {
            name, attributes, ..
        } = &sheet.templates()[0].body[0]
        else {
            panic!("expected a literal element");
        };
        assert_eq!(name.namespace.as_deref(), Some("urn:h"));
        assert_eq!(name.prefix.as_deref(), Some("h"));
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].0.namespace.as_deref(), Some("urn:k"));
    }

    #[test]
    fn test_whitespace_in_templates() {
        let sheet = sheet(
            r#"<xsl:template match="/">
                 <xsl:text> </xsl:text>
                 <p xml:space="preserve"> </p>
               </xsl:template>"#,
        )
        .unwrap();
        let body = &sheet.templates()[0].body;
        assert_eq!(body[0], Instruction::Text(" ".into()));
        let Instruction::LiteralElement { body: inner, .. } = &body[1] else {
            panic!("expected a literal element");
        };
        assert_eq!(inner, &[Instruction::Text(" ".into())]);
    }

    #[test]
    fn test_variables_params_and_sorts() {
        let sheet = sheet(
            r#"<xsl:variable name="g" select="1"/>
               <xsl:param name="p"><b/></xsl:param>
               <xsl:template match="/">
                 <xsl:param name="x" select="2"/>
                 <xsl:variable name="local"/>
                 <xsl:for-each select="//i">
                   <xsl:sort select="@k" data-type="number" order="descending"/>
                   <xsl:value-of select="."/>
                 </xsl:for-each>
                 <xsl:apply-templates select="//i">
                   <xsl:with-param name="x" select="3"/>
                   <xsl:sort/>
                 </xsl:apply-templates>
               </xsl:template>"#,
        )
        .unwrap();
        let names: Vec<&str> = sheet.globals().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["g", "p"]);
        assert!(matches!(sheet.globals()[1].value, VariableValue::Fragment(ref body) if body.len() == 1));

        let template = &sheet.templates()[0];
        assert_eq!(template.params.len(), 1);
        assert!(matches!(
            &template.body[0],
            Instruction::Variable(Variable { value: VariableValue::Fragment(body), .. }) if body.is_empty()
        ));
        let Instruction::ForEach { sorts, body, .. } = &template.body[1] else {
            panic!("expected xsl:for-each");
        };
        assert!(sorts[0].numeric && sorts[0].descending);
        assert_eq!(body.len(), 1);
        let Instruction::ApplyTemplates { sorts, params, .. } = &template.body[2] else {
            panic!("expected xsl:apply-templates");
        };
        assert_eq!(sorts[0].select.text(), ".");
        assert_eq!(params[0].name, "x");
    }

    #[test]
    fn test_invalid_programs() {
        let cases = [
            r#"<xsl:template match="p"><xsl:number/></xsl:template>"#,
            r#"<xsl:template match="p"><xsl:value-of/></xsl:template>"#,
            r#"<xsl:template match="p["/>"#,
            r#"<xsl:template/>"#,
            r#"<xsl:key name="k" match="p" use="."/>"#,
            r#"<xsl:template match="p"><xsl:choose/></xsl:template>"#,
            r#"<xsl:template match="p"><a href="{@x"/></xsl:template>"#,
            r#"<xsl:output method="pdf"/>"#,
            r#"<xsl:template match="p"><xsl:sort/></xsl:template>"#,
            r#"<xsl:template match="p"><b/><xsl:param name="late"/></xsl:template>"#,
            r#"<xsl:template match="p"><xsl:variable name="v" select="1">x</xsl:variable></xsl:template>"#,
            r#"<xsl:template match="p"><xsl:for-each select="*"><xsl:sort order="up"/></xsl:for-each></xsl:template>"#,
            r#"<xsl:template match="p"><xsl:call-template name="t"><xsl:sort/></xsl:call-template></xsl:template>"#,
            r#"<xsl:variable name="a:b" select="1"/>"#,
            r#"<xsl:variable name="g"/><xsl:param name="g"/>"#,
            r#"<stray/>"#,
        ];
        for case in cases {
            assert!(
                matches!(sheet(case), Err(Error::InvalidProgram(_))),
                "{case}"
            );
        }
        assert!(matches!(
            Stylesheet::compile("<xsl:stylesheet"),
            Err(Error::InvalidProgram(_))
        ));
        assert!(matches!(
            Stylesheet::compile("<html/>"),
            Err(Error::InvalidProgram(_))
        ));
    }

    #[test]
    fn test_simplified_stylesheet() {
        let sheet = Stylesheet::compile(&format!(
            r#"<html xsl:version="1.0" xmlns:xsl="{XSLT_NAMESPACE}"><xsl:value-of select="/doc"/></html>"#
        ))
        .unwrap();
        assert_eq!(sheet.templates().len(), 1);
        assert_eq!(sheet.rules().len(), 1);
    }

    #[test]
    fn test_strip_space_ties_favour_preserve() {
        let sheet = sheet(
            r#"<xsl:strip-space elements="*"/><xsl:preserve-space elements="pre h:*"/>"#,
        )
        .unwrap();
        assert!(sheet.strips_whitespace(None, "p"));
        assert!(!sheet.strips_whitespace(None, "pre"));
        assert!(!sheet.strips_whitespace(Some("urn:h"), "div"));
    }

    #[test]
    fn test_avt_escapes() {
        let expressions = Expressions::default();
        let avt = Avt::parse("a{{b}}c", &expressions, &no_namespaces()).unwrap();
        assert_eq!(avt, Avt(vec![AvtPart::Literal("a{b}c".into())]));
        assert!(Avt::parse("a}b", &expressions, &no_namespaces()).is_err());
        let avt = Avt::parse("x{'}'}y", &expressions, &no_namespaces()).unwrap();
        assert_eq!(avt.parts().len(), 3);
    }
}
