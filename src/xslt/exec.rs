//! Execution of a compiled stylesheet against a source tree.
//!
//! All evaluation state lives in [`Executor`], created per call, so one
//! [`Stylesheet`] can serve any number of concurrent transformations.
//! Instantiation recurses once per template level, so whole transformations
//! run on a dedicated thread with a large stack (see [`transform_text`]).

use super::expr::{CURRENT_VARIABLE, Expression, LAST_VARIABLE, POSITION_VARIABLE};
use super::parse::{Loader, lookup_namespace, split_qname};
use super::serialize::serialize;
use super::stylesheet::{
    Avt, AvtPart, ExpandedName, Instruction, Scope, Sort, Stylesheet, Template, Variable,
    VariableValue,
};
use crate::common::{Error, Result};
use crate::pipeline::entity::EntityResolver;
use crate::resource::collection::is_valid_ncname;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::thread;
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Document, Element};
use sxd_document::{Package, QName};
use sxd_xpath::nodeset::{Node, Nodeset};
use sxd_xpath::{Context, Factory, Value, XPath};

/// Nesting limit for template instantiation.
pub const MAX_DEPTH: usize = 2048;

const TRANSFORM_STACK_SIZE: usize = 128 * 1024 * 1024;

/// Detached element holding the top level of a result tree.
const RESULT_CONTAINER: &str = "quire-result";
/// Detached element holding a result tree fragment.
const FRAGMENT: &str = "quire-fragment";

/// Run `job` on a scoped thread whose stack fits [`MAX_DEPTH`] template
/// levels over documents nested up to the loader's limit.
pub(crate) fn on_transform_stack<T: Send>(job: impl FnOnce() -> Result<T> + Send) -> Result<T> {
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("quire-xslt".to_string())
            .stack_size(TRANSFORM_STACK_SIZE)
            .spawn_scoped(scope, job)?;
        handle
            .join()
            .map_err(|_| Error::Xslt("transformation thread panicked".to_string()))?
    })
}

/// Parse `text`, apply `sheet` and serialize the result.
///
/// Whitespace-only text selected by `xsl:strip-space` is dropped while the
/// source loads.
pub fn transform_text(
    sheet: &Stylesheet,
    text: &str,
    href: &str,
    entities: &dyn EntityResolver,
) -> Result<String> {
    on_transform_stack(|| {
        let source = Package::new();
        let source = source.as_document();
        let strip = |namespace: Option<&str>, local: &str| sheet.strips_whitespace(namespace, local);
        Loader::new(href, entities)
            .strip_space(&strip)
            .load(&source, text)?;

        let result = Package::new();
        let result = result.as_document();
        let container = transform(sheet, &source, &result)?;
        Ok(serialize(container, sheet.output()))
    })
}

/// Apply `sheet` to `source`, building the result in `result`.
///
/// The returned element is detached from `result`'s root and holds the
/// top level of the result tree. Runs on the calling thread, whose stack
/// bounds how deep the source may be.
pub fn transform<'d>(
    sheet: &Stylesheet,
    source: &Document<'d>,
    result: &Document<'d>,
) -> Result<Element<'d>> {
    let container = result.create_element(RESULT_CONTAINER);
    let root = Node::Root(source.root());
    let mut executor = Executor {
        sheet,
        out: result,
        root,
        container,
        factory: Factory::new(),
        compiled: std::iter::repeat_with(|| None)
            .take(sheet.expression_count())
            .collect(),
        context: Context::new(),
        variables: Vec::new(),
        matched: vec![None; sheet.rules().len()],
        depth: 0,
    };

    let focus = Focus {
        node: root,
        position: 1,
        size: 1,
    };
    for global in sheet.globals() {
        let binding = executor.binding(global, focus)?;
        executor.bind(&global.name, binding);
    }
    executor.apply_templates(vec![root], None, &[], container)?;
    Ok(container)
}

#[derive(Clone, Copy)]
struct Focus<'d> {
    node: Node<'d>,
    position: usize,
    size: usize,
}

#[derive(Clone)]
enum Binding<'d> {
    Value(Value<'d>),
    /// Result tree fragment; XPath sees its string value
    Fragment(Element<'d>),
}

impl<'d> Binding<'d> {
    fn value(&self) -> Value<'d> {
        match self {
            Binding::Value(value) => value.clone(),
            Binding::Fragment(fragment) => Value::String(Node::Element(*fragment).string_value()),
        }
    }
}

enum SortKey {
    Number(f64),
    Text(String),
}

struct Executor<'a, 'd> {
    sheet: &'a Stylesheet,
    out: &'a Document<'d>,
    /// Root of the source, where patterns are evaluated
    root: Node<'d>,
    container: Element<'d>,
    factory: Factory,
    /// Built lazily, indexed by expression id
    compiled: Vec<Option<XPath>>,
    context: Context<'d>,
    /// Bindings in scope, innermost last
    variables: Vec<(String, Binding<'d>)>,
    /// Nodes matched by each rule, computed on first use
    matched: Vec<Option<HashSet<Node<'d>>>>,
    depth: usize,
}

impl<'a, 'd> Executor<'a, 'd> {
    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::Xslt(format!(
                "template nesting exceeds {MAX_DEPTH} levels"
            )));
        }
        Ok(())
    }

    fn evaluate(&mut self, expression: &Expression, focus: Focus<'d>) -> Result<Value<'d>> {
        for (prefix, uri) in expression.namespaces() {
            self.context.set_namespace(prefix, uri);
        }
        if expression.uses_focus() {
            let mut current = Nodeset::new();
            current.add(focus.node);
            self.context.set_variable(POSITION_VARIABLE, focus.position as f64);
            self.context.set_variable(LAST_VARIABLE, focus.size as f64);
            self.context.set_variable(CURRENT_VARIABLE, current);
        }

        let id = expression.id();
        let xpath = match self.compiled.get_mut(id).and_then(Option::take) {
            Some(xpath) => xpath,
            None => expression.build(&self.factory)?,
        };
        let value = xpath.evaluate(&self.context, focus.node);
        if let Some(slot) = self.compiled.get_mut(id) {
            *slot = Some(xpath);
        }
        value.map_err(|e| Error::Xslt(format!("evaluating '{}': {e}", expression.text())))
    }

    fn select(&mut self, expression: &Expression, focus: Focus<'d>) -> Result<Vec<Node<'d>>> {
        match self.evaluate(expression, focus)? {
            Value::Nodeset(nodes) => Ok(nodes.document_order()),
            _ => Err(Error::Xslt(format!(
                "'{}' does not select nodes",
                expression.text()
            ))),
        }
    }

    fn bind(&mut self, name: &str, binding: Binding<'d>) {
        self.context.set_variable(name, binding.value());
        self.variables.push((name.to_string(), binding));
    }

    /// Drop bindings made after `mark`, restoring any they shadowed.
    fn unbind_to(&mut self, mark: usize) {
        while self.variables.len() > mark {
            let Some((name, _)) = self.variables.pop() else {
                break;
            };
            let shadowed = self
                .variables
                .iter()
                .rev()
                .find(|(bound, _)| *bound == name)
                .map(|(_, binding)| binding.value());
            if let Some(value) = shadowed {
                self.context.set_variable(name.as_str(), value);
            }
        }
    }

    fn binding(&mut self, variable: &'a Variable, focus: Focus<'d>) -> Result<Binding<'d>> {
        Ok(match &variable.value {
            VariableValue::Select(select) => Binding::Value(self.evaluate(select, focus)?),
            VariableValue::Fragment(body) if body.is_empty() => {
                Binding::Value(Value::String(String::new()))
            },
            VariableValue::Fragment(body) => {
                let fragment = self.out.create_element(FRAGMENT);
                self.run(body, focus, fragment)?;
                Binding::Fragment(fragment)
            },
        })
    }

    fn with_params(
        &mut self,
        params: &'a [Variable],
        focus: Focus<'d>,
    ) -> Result<Vec<(String, Binding<'d>)>> {
        params
            .iter()
            .map(|param| Ok((param.name.clone(), self.binding(param, focus)?)))
            .collect()
    }

    fn apply_templates(
        &mut self,
        nodes: Vec<Node<'d>>,
        mode: Option<&str>,
        params: &[(String, Binding<'d>)],
        parent: Element<'d>,
    ) -> Result<()> {
        let size = nodes.len();
        for (index, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                position: index + 1,
                size,
            };
            self.descend()?;
            match self.find_template(node, mode)? {
                Some(template) => self.instantiate(template, focus, params.to_vec(), parent)?,
                None => self.builtin(focus, mode, params, parent)?,
            }
            self.depth -= 1;
        }
        Ok(())
    }

    fn find_template(&mut self, node: Node<'d>, mode: Option<&str>) -> Result<Option<&'a Template>> {
        let sheet = self.sheet;
        for (index, rule) in sheet.rules().iter().enumerate() {
            let template = &sheet.templates()[rule.template];
            if template.mode.as_deref() != mode {
                continue;
            }
            let Some(pattern) = &template.pattern else {
                continue;
            };
            if self.rule_matches(index, pattern.alternatives()[rule.alternative].select(), node)? {
                return Ok(Some(template));
            }
        }
        Ok(None)
    }

    fn rule_matches(&mut self, rule: usize, select: &Expression, node: Node<'d>) -> Result<bool> {
        if let Some(Some(matched)) = self.matched.get(rule) {
            return Ok(matched.contains(&node));
        }
        let focus = Focus {
            node: self.root,
            position: 1,
            size: 1,
        };
        let matched: HashSet<Node<'d>> = self.select(select, focus)?.into_iter().collect();
        let found = matched.contains(&node);
        if let Some(slot) = self.matched.get_mut(rule) {
            *slot = Some(matched);
        }
        Ok(found)
    }

    fn instantiate(
        &mut self,
        template: &'a Template,
        focus: Focus<'d>,
        mut passed: Vec<(String, Binding<'d>)>,
        parent: Element<'d>,
    ) -> Result<()> {
        let mark = self.variables.len();
        let result = self
            .bind_params(&template.params, focus, &mut passed)
            .and_then(|()| self.run(&template.body, focus, parent));
        self.unbind_to(mark);
        result
    }

    fn bind_params(
        &mut self,
        params: &'a [Variable],
        focus: Focus<'d>,
        passed: &mut Vec<(String, Binding<'d>)>,
    ) -> Result<()> {
        for param in params {
            let binding = match passed.iter().position(|(name, _)| *name == param.name) {
                Some(index) => passed.swap_remove(index).1,
                None => self.binding(param, focus)?,
            };
            self.bind(&param.name, binding);
        }
        Ok(())
    }

    fn builtin(
        &mut self,
        focus: Focus<'d>,
        mode: Option<&str>,
        params: &[(String, Binding<'d>)],
        parent: Element<'d>,
    ) -> Result<()> {
        match focus.node {
            Node::Root(_) | Node::Element(_) => {
                self.apply_templates(children(focus.node), mode, params, parent)?;
            },
            Node::Text(text) => self.append_text(parent, text.text()),
            Node::Attribute(attribute) => self.append_text(parent, attribute.value()),
            _ => {},
        }
        Ok(())
    }

    fn run(&mut self, body: &'a [Instruction], focus: Focus<'d>, parent: Element<'d>) -> Result<()> {
        let mark = self.variables.len();
        let result = body
            .iter()
            .try_for_each(|instruction| self.execute(instruction, focus, parent));
        self.unbind_to(mark);
        result
    }

    fn execute(
        &mut self,
        instruction: &'a Instruction,
        focus: Focus<'d>,
        parent: Element<'d>,
    ) -> Result<()> {
        match instruction {
            Instruction::Text(text) => self.append_text(parent, text),
            Instruction::LiteralElement {
                name,
                attributes,
                body,
            } => {
                let element = self.create_element(name);
                parent.append_child(element);
                for (name, value) in attributes {
                    let value = self.avt(value, focus)?;
                    let attribute = element.set_attribute_value(
                        QName::with_namespace_uri(name.namespace.as_deref(), &name.local),
                        &value,
                    );
                    attribute.set_preferred_prefix(name.prefix.as_deref());
                }
                self.run(body, focus, element)?;
            },
            Instruction::ApplyTemplates {
                select,
                mode,
                sorts,
                params,
            } => {
                let nodes = match select {
                    Some(select) => self.select(select, focus)?,
                    None => children(focus.node),
                };
                let nodes = self.sort(nodes, sorts)?;
                let params = self.with_params(params, focus)?;
                self.apply_templates(nodes, mode.as_deref(), &params, parent)?;
            },
            Instruction::CallTemplate { name, params } => {
                let template = self
                    .sheet
                    .named_template(name)
                    .ok_or_else(|| Error::Xslt(format!("no template named '{name}'")))?;
                let params = self.with_params(params, focus)?;
                self.descend()?;
                self.instantiate(template, focus, params, parent)?;
                self.depth -= 1;
            },
            Instruction::Copy(body) => match focus.node {
                Node::Root(_) => self.run(body, focus, parent)?,
                Node::Element(source) => {
                    let element = self.out.create_element(source.name());
                    element.set_preferred_prefix(source.preferred_prefix());
                    parent.append_child(element);
                    self.run(body, focus, element)?;
                },
                node => self.copy_node(node, parent),
            },
            Instruction::CopyOf(select) => {
                let fragment = select.variable_reference().and_then(|name| {
                    match self.variables.iter().rev().find(|(bound, _)| bound == name) {
                        Some((_, Binding::Fragment(fragment))) => Some(*fragment),
                        _ => None,
                    }
                });
                if let Some(fragment) = fragment {
                    for child in children(Node::Element(fragment)) {
                        self.copy_node(child, parent);
                    }
                    return Ok(());
                }
                match self.evaluate(select, focus)? {
                    Value::Nodeset(nodes) => {
                        for node in nodes.document_order() {
                            self.copy_node(node, parent);
                        }
                    },
                    other => self.append_text(parent, &other.string()),
                }
            },
            Instruction::ValueOf(select) => {
                let text = self.evaluate(select, focus)?.string();
                self.append_text(parent, &text);
            },
            Instruction::Element {
                name,
                namespace,
                scope,
                body,
            } => {
                let name = self.computed_name(name, namespace.as_ref(), scope, focus, true)?;
                let element = self.create_element(&name);
                parent.append_child(element);
                self.run(body, focus, element)?;
            },
            Instruction::Attribute {
                name,
                namespace,
                scope,
                body,
            } => {
                let name = self.computed_name(name, namespace.as_ref(), scope, focus, false)?;
                let value = self.text_content(body, focus)?;
                self.add_attribute(parent, &name, &value);
            },
            Instruction::Comment(body) => {
                let text = self.text_content(body, focus)?;
                parent.append_child(self.out.create_comment(&sanitize_comment(&text)));
            },
            Instruction::ProcessingInstruction { name, body } => {
                let target = self.avt(name, focus)?;
                let target = target.trim();
                if !is_valid_ncname(target) || target.eq_ignore_ascii_case("xml") {
                    return Err(Error::Xslt(format!(
                        "'{target}' is not a valid processing instruction name"
                    )));
                }
                let value = self.text_content(body, focus)?.replace("?>", "? >");
                let value = value.trim_start();
                let pi = self
                    .out
                    .create_processing_instruction(target, Some(value).filter(|v| !v.is_empty()));
                parent.append_child(pi);
            },
            Instruction::If { test, body } => {
                if self.evaluate(test, focus)?.boolean() {
                    self.run(body, focus, parent)?;
                }
            },
            Instruction::Choose {
                branches,
                otherwise,
            } => {
                for (test, body) in branches {
                    if self.evaluate(test, focus)?.boolean() {
                        return self.run(body, focus, parent);
                    }
                }
                self.run(otherwise, focus, parent)?;
            },
            Instruction::ForEach {
                select,
                sorts,
                body,
            } => {
                let nodes = self.select(select, focus)?;
                let nodes = self.sort(nodes, sorts)?;
                let size = nodes.len();
                for (index, node) in nodes.into_iter().enumerate() {
                    let focus = Focus {
                        node,
                        position: index + 1,
                        size,
                    };
                    self.run(body, focus, parent)?;
                }
            },
            Instruction::Variable(variable) => {
                let binding = self.binding(variable, focus)?;
                self.bind(&variable.name, binding);
            },
        }
        Ok(())
    }

    /// Stable sort of `nodes` by the keys of `sorts`, evaluated with each
    /// node's position in the unsorted list.
    fn sort(&mut self, nodes: Vec<Node<'d>>, sorts: &'a [Sort]) -> Result<Vec<Node<'d>>> {
        if sorts.is_empty() {
            return Ok(nodes);
        }
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (index, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                position: index + 1,
                size,
            };
            let mut keys = Vec::with_capacity(sorts.len());
            for sort in sorts {
                let value = self.evaluate(&sort.select, focus)?;
                keys.push(if sort.numeric {
                    SortKey::Number(value.number())
                } else {
                    SortKey::Text(value.string())
                });
            }
            keyed.push((keys, node));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, sorts));
        Ok(keyed.into_iter().map(|(_, node)| node).collect())
    }

    fn avt(&mut self, avt: &Avt, focus: Focus<'d>) -> Result<String> {
        let mut out = String::new();
        for part in avt.parts() {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(expression) => out.push_str(&self.evaluate(expression, focus)?.string()),
            }
        }
        Ok(out)
    }

    /// Instantiate `body` into a scratch fragment and return its text.
    fn text_content(&mut self, body: &'a [Instruction], focus: Focus<'d>) -> Result<String> {
        let fragment = self.out.create_element(FRAGMENT);
        self.run(body, focus, fragment)?;
        Ok(Node::Element(fragment).string_value())
    }

    fn computed_name(
        &mut self,
        name: &Avt,
        namespace: Option<&Avt>,
        scope: &Scope,
        focus: Focus<'d>,
        element: bool,
    ) -> Result<ExpandedName> {
        let raw = self.avt(name, focus)?;
        let raw = raw.trim();
        let (prefix, local) = split_qname(raw);
        if !is_valid_ncname(local)
            || prefix.is_some_and(|p| !is_valid_ncname(p))
            || (!element && raw == "xmlns")
        {
            return Err(Error::Xslt(format!("'{raw}' is not a valid name")));
        }

        let namespace = match namespace {
            Some(avt) => Some(self.avt(avt, focus)?).filter(|uri| !uri.is_empty()),
            None => match prefix {
                Some(p) => Some(
                    lookup_namespace(scope, Some(p))
                        .ok_or_else(|| Error::Xslt(format!("unbound prefix in name '{raw}'")))?
                        .to_string(),
                ),
                // Unprefixed attributes never take the default namespace
                None if element => lookup_namespace(scope, None).map(str::to_string),
                None => None,
            },
        };
        Ok(ExpandedName {
            prefix: prefix.filter(|_| namespace.is_some()).map(str::to_string),
            namespace,
            local: local.to_string(),
        })
    }

    fn create_element(&self, name: &ExpandedName) -> Element<'d> {
        let element = self
            .out
            .create_element(QName::with_namespace_uri(name.namespace.as_deref(), &name.local));
        element.set_preferred_prefix(name.prefix.as_deref());
        element
    }

    fn append_text(&self, parent: Element<'d>, text: &str) {
        if !text.is_empty() {
            parent.append_child(self.out.create_text(text));
        }
    }

    /// Attributes are only added to an element that has no children yet;
    /// anything else is ignored.
    fn add_attribute(&self, parent: Element<'d>, name: &ExpandedName, value: &str) {
        if parent == self.container || !parent.children().is_empty() {
            return;
        }
        let attribute = parent.set_attribute_value(
            QName::with_namespace_uri(name.namespace.as_deref(), &name.local),
            value,
        );
        attribute.set_preferred_prefix(name.prefix.as_deref());
    }

    /// Deep copy of `node` below `parent`, without recursion.
    fn copy_node(&self, node: Node<'d>, parent: Element<'d>) {
        let mut pending = vec![(node, parent)];
        while let Some((node, parent)) = pending.pop() {
            match node {
                Node::Root(_) => {
                    pending.extend(children(node).into_iter().rev().map(|child| (child, parent)));
                },
                Node::Element(source) => {
                    let copy = self.out.create_element(source.name());
                    copy.set_preferred_prefix(source.preferred_prefix());
                    for attribute in source.attributes() {
                        let copied = copy.set_attribute_value(attribute.name(), attribute.value());
                        copied.set_preferred_prefix(attribute.preferred_prefix());
                    }
                    parent.append_child(copy);
                    pending.extend(children(node).into_iter().rev().map(|child| (child, copy)));
                },
                Node::Attribute(attribute) => self.add_attribute(
                    parent,
                    &ExpandedName {
                        namespace: attribute.name().namespace_uri().map(str::to_string),
                        prefix: attribute.preferred_prefix().map(str::to_string),
                        local: attribute.name().local_part().to_string(),
                    },
                    attribute.value(),
                ),
                Node::Text(text) => self.append_text(parent, text.text()),
                Node::Comment(comment) => {
                    parent.append_child(self.out.create_comment(comment.text()));
                },
                Node::ProcessingInstruction(pi) => {
                    parent.append_child(
                        self.out.create_processing_instruction(pi.target(), pi.value()),
                    );
                },
                Node::Namespace(_) => {},
            }
        }
    }
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    match node {
        Node::Root(root) => root
            .children()
            .into_iter()
            .map(|child| match child {
                ChildOfRoot::Element(e) => Node::Element(e),
                ChildOfRoot::Comment(c) => Node::Comment(c),
                ChildOfRoot::ProcessingInstruction(pi) => Node::ProcessingInstruction(pi),
            })
            .collect(),
        Node::Element(element) => element
            .children()
            .into_iter()
            .map(|child| match child {
                ChildOfElement::Element(e) => Node::Element(e),
                ChildOfElement::Text(t) => Node::Text(t),
                ChildOfElement::Comment(c) => Node::Comment(c),
                ChildOfElement::ProcessingInstruction(pi) => Node::ProcessingInstruction(pi),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// NaN sorts before every number.
fn compare_keys(a: &[SortKey], b: &[SortKey], sorts: &[Sort]) -> Ordering {
    for ((a, b), sort) in a.iter().zip(b).zip(sorts) {
        let ordering = match (a, b) {
            (SortKey::Number(x), SortKey::Number(y)) => match (x.is_nan(), y.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            },
            (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
            _ => Ordering::Equal,
        };
        let ordering = if sort.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn sanitize_comment(text: &str) -> String {
    let mut text = text.replace("--", "- -");
    if text.ends_with('-') {
        text.push(' ');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::entity::XhtmlEntities;
    use crate::xslt::parse::MAX_NESTING;
    use crate::xslt::stylesheet::XSLT_NAMESPACE;

    fn compile(templates: &str) -> Result<Stylesheet> {
        Stylesheet::compile(&format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="{XSLT_NAMESPACE}"><xsl:output method="xml" omit-xml-declaration="yes"/>{templates}</xsl:stylesheet>"#
        ))
    }

    fn run(templates: &str, source: &str) -> Result<String> {
        transform_text(&compile(templates)?, source, "in.xhtml", &XhtmlEntities)
    }

    const IDENTITY: &str = r#"<xsl:template match="@* | node()"><xsl:copy><xsl:apply-templates select="@* | node()"/></xsl:copy></xsl:template>"#;

    #[test]
    fn test_identity_transform() {
        let source = r#"<html xmlns="http://www.w3.org/1999/xhtml"><body class="x"><p>a &amp; b</p><!--c--></body></html>"#;
        assert_eq!(run(IDENTITY, source).unwrap(), source);
    }

    #[test]
    fn test_builtin_rules_copy_text() {
        assert_eq!(run("", "<a>x<b y='1'>z</b><!--no--><?pi no?></a>").unwrap(), "xz");
    }

    #[test]
    fn test_rename_with_priority_conflicts() {
        let templates = format!(
            r#"{IDENTITY}
            <xsl:template match="p"><para><xsl:apply-templates/></para></xsl:template>
            <xsl:template match="p[@class='skip']"/>"#
        );
        assert_eq!(
            run(&templates, r#"<d><p>one</p><p class="skip">two</p></d>"#).unwrap(),
            "<d><para>one</para></d>"
        );
    }

    #[test]
    fn test_modes_and_named_templates() {
        let templates = r#"
            <xsl:template match="/"><r><xsl:apply-templates select="//i" mode="m"/><xsl:call-template name="tail"/></r></xsl:template>
            <xsl:template match="i" mode="m">[<xsl:value-of select="."/>]</xsl:template>
            <xsl:template match="i">wrong</xsl:template>
            <xsl:template name="tail"><end n="{count(//i)}"/></xsl:template>"#;
        assert_eq!(
            run(templates, "<l><i>1</i><i>2</i></l>").unwrap(),
            r#"<r>[1][2]<end n="2"/></r>"#
        );
    }

    #[test]
    fn test_control_flow() {
        let templates = r#"
            <xsl:template match="/">
              <xsl:for-each select="//n">
                <xsl:choose>
                  <xsl:when test=". &gt; 2">big</xsl:when>
                  <xsl:otherwise><xsl:value-of select="position()"/></xsl:otherwise>
                </xsl:choose>
                <xsl:if test="position() != last()">,</xsl:if>
              </xsl:for-each>
            </xsl:template>"#;
        assert_eq!(
            run(templates, "<l><n>1</n><n>5</n><n>2</n></l>").unwrap(),
            "1,big,3"
        );
    }

    #[test]
    fn test_current_inside_predicates() {
        let templates = r#"
            <xsl:template match="/">
              <xsl:for-each select="//ref"><xsl:value-of select="//p[@id = current()/@to]"/></xsl:for-each>
            </xsl:template>"#;
        assert_eq!(
            run(templates, r#"<l><p id="a">A</p><p id="b">B</p><ref to="b"/></l>"#).unwrap(),
            "B"
        );
    }

    #[test]
    fn test_computed_nodes() {
        let templates = r#"
            <xsl:template match="/*">
              <xsl:element name="{local-name()}-x" namespace="urn:x">
                <xsl:attribute name="id">a<xsl:value-of select="@k"/></xsl:attribute>
                <xsl:comment>note--here-</xsl:comment>
                <xsl:copy-of select="b"/>
              </xsl:element>
            </xsl:template>"#;
        assert_eq!(
            run(templates, r#"<doc k="7"><b>bold</b></doc>"#).unwrap(),
            r#"<doc-x xmlns="urn:x" id="a7"><!--note- -here- --><b xmlns="">bold</b></doc-x>"#
        );
    }

    #[test]
    fn test_strip_space() {
        let templates = r#"<xsl:strip-space elements="*"/><xsl:preserve-space elements="pre"/>"#;
        assert_eq!(
            run(templates, "<a> <b> </b> x <pre> </pre></a>").unwrap(),
            " x  "
        );
    }

    #[test]
    fn test_variables_and_params() {
        let templates = r#"
            <xsl:param name="greeting" select="'hi'"/>
            <xsl:variable name="count" select="count(//v)"/>
            <xsl:template match="/">
              <r g="{$greeting}" n="{$count}">
                <xsl:variable name="count" select="2"/>
                <xsl:attribute name="c"><xsl:value-of select="$count"/></xsl:attribute>
                <xsl:call-template name="show"><xsl:with-param name="p" select="//v[1]"/></xsl:call-template>
                <xsl:call-template name="show"/>
              </r>
              <xsl:value-of select="$count"/>
            </xsl:template>
            <xsl:template name="show"><xsl:param name="p" select="'default'"/><v><xsl:value-of select="$p"/></v></xsl:template>"#;
        assert_eq!(
            run(templates, "<l><v>x</v><v>y</v><v>z</v></l>").unwrap(),
            r#"<r g="hi" n="3" c="2"><v>x</v><v>default</v></r>3"#
        );
    }

    #[test]
    fn test_apply_templates_passes_params() {
        // Built-in rules hand parameters on to the templates they reach
        let templates = r#"
            <xsl:template match="/"><r><xsl:apply-templates select="*"><xsl:with-param name="sep" select="'-'"/></xsl:apply-templates></r></xsl:template>
            <xsl:template match="i"><xsl:param name="sep"/><xsl:value-of select="concat(., $sep)"/></xsl:template>"#;
        assert_eq!(
            run(templates, "<l><i>a</i><i>b</i></l>").unwrap(),
            "<r>a-b-</r>"
        );
    }

    #[test]
    fn test_result_tree_fragments() {
        let templates = r#"
            <xsl:variable name="frag"><b>bold</b> tail</xsl:variable>
            <xsl:template match="/"><r len="{string-length($frag)}"><xsl:copy-of select="$frag"/></r></xsl:template>"#;
        assert_eq!(
            run(templates, "<a/>").unwrap(),
            r#"<r len="9"><b>bold</b> tail</r>"#
        );
    }

    #[test]
    fn test_sorting() {
        let source = r#"<l><i k="2">a</i><i k="10">z</i><i k="x">b</i><i k="5">c</i></l>"#;
        let numeric = r#"
            <xsl:template match="/">
              <xsl:for-each select="//i">
                <xsl:sort select="@k" data-type="number" order="descending"/>
                <xsl:value-of select="."/>;</xsl:for-each>
            </xsl:template>"#;
        assert_eq!(run(numeric, source).unwrap(), "z;c;a;b;");

        let text = r#"<xsl:template match="/"><xsl:apply-templates select="//i"><xsl:sort select="."/></xsl:apply-templates></xsl:template>"#;
        assert_eq!(run(text, source).unwrap(), "abcz");
    }

    #[test]
    fn test_processing_instructions() {
        let templates = r#"<xsl:template match="/"><r><xsl:processing-instruction name="xml-stylesheet">href="s.css" ?&gt;</xsl:processing-instruction></r></xsl:template>"#;
        assert_eq!(
            run(templates, "<a/>").unwrap(),
            r#"<r><?xml-stylesheet href="s.css" ? >?></r>"#
        );

        let reserved = r#"<xsl:template match="/"><xsl:processing-instruction name="xml">v</xsl:processing-instruction></xsl:template>"#;
        assert!(matches!(run(reserved, "<a/>"), Err(Error::Xslt(_))));

        assert_eq!(
            run(IDENTITY, "<a><?pi data?><b/></a>").unwrap(),
            "<a><?pi data?><b/></a>"
        );
        let matched = format!(
            r#"{IDENTITY}<xsl:template match="processing-instruction()"><seen/></xsl:template>"#
        );
        assert_eq!(
            run(&matched, "<a><?pi data?><b/></a>").unwrap(),
            "<a><seen/><b/></a>"
        );
    }

    #[test]
    fn test_internal_subset_entities_reach_output() {
        let source = r#"<!DOCTYPE x [<!ENTITY foo "bar">]><x>&foo;</x>"#;
        assert_eq!(run(IDENTITY, source).unwrap(), "<x>bar</x>");
    }

    fn nested(depth: usize) -> String {
        let mut doc = "<d>".repeat(depth);
        doc.push_str(&"</d>".repeat(depth));
        doc
    }

    #[test]
    fn test_deep_documents_on_a_small_caller_stack() {
        let worker = thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let depth = 1000;
                let mut expected = "<d>".repeat(depth - 1);
                expected.push_str("<d/>");
                expected.push_str(&"</d>".repeat(depth - 1));

                assert_eq!(run(IDENTITY, &nested(depth)).unwrap(), expected);
                let copy = r#"<xsl:template match="/"><xsl:copy-of select="."/></xsl:template>"#;
                assert_eq!(run(copy, &nested(depth)).unwrap(), expected);

                assert!(matches!(
                    run(IDENTITY, &nested(MAX_NESTING * 5)),
                    Err(Error::MalformedMarkup { .. })
                ));
            })
            .unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_runtime_errors() {
        let recursive = r#"<xsl:template match="/"><xsl:call-template name="loop"/></xsl:template>
                           <xsl:template name="loop"><xsl:call-template name="loop"/></xsl:template>"#;
        assert!(matches!(run(recursive, "<a/>"), Err(Error::Xslt(_))));

        let missing = r#"<xsl:template match="/"><xsl:call-template name="nope"/></xsl:template>"#;
        assert!(matches!(run(missing, "<a/>"), Err(Error::Xslt(_))));

        let bad_name = r#"<xsl:template match="/"><xsl:element name="1x"/></xsl:template>"#;
        assert!(matches!(run(bad_name, "<a/>"), Err(Error::Xslt(_))));

        let not_nodes = r#"<xsl:template match="/"><xsl:apply-templates select="'s'"/></xsl:template>"#;
        assert!(matches!(run(not_nodes, "<a/>"), Err(Error::Xslt(_))));

        let unbound = r#"<xsl:template match="/"><xsl:value-of select="$nowhere"/></xsl:template>"#;
        assert!(matches!(run(unbound, "<a/>"), Err(Error::Xslt(_))));
    }

    #[test]
    fn test_transform_into_caller_documents() {
        let sheet = compile(r#"<xsl:template match="/">top<b/></xsl:template>"#).unwrap();
        let source = Package::new();
        let source = source.as_document();
        source.root().append_child(source.create_element("a"));
        let result = Package::new();
        let result = result.as_document();
        let container = transform(&sheet, &source, &result).unwrap();
        assert_eq!(children(Node::Element(container)).len(), 2);
        assert_eq!(serialize(container, sheet.output()), "top<b/>");
    }
}
