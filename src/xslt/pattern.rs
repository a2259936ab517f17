//! Match patterns of template rules.
//!
//! A pattern is a union of location paths restricted to the child and
//! attribute axes. Each alternative is checked lexically, given its default
//! priority, and turned into an expression that selects every node it
//! matches when evaluated from the root. Executors evaluate that selection
//! once per source document.

use super::expr::{Expression, Expressions, Namespaces};
use crate::common::{Error, Result};

/// One member of a pattern union.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    text: String,
    select: Expression,
    priority: f64,
}

impl Alternative {
    fn parse(text: &str, expressions: &Expressions, namespaces: &Namespaces) -> Result<Self> {
        let text = text.trim();
        check_location_path(text)?;
        let select = if text.starts_with('/') {
            text.to_string()
        } else {
            format!("/descendant-or-self::node()/{text}")
        };
        Ok(Self {
            text: text.to_string(),
            select: expressions.compile(&select, namespaces)?,
            priority: default_priority(text),
        })
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Expression selecting the matched nodes from the root.
    #[inline]
    pub fn select(&self) -> &Expression {
        &self.select
    }

    /// Default priority, used when the template does not set one.
    #[inline]
    pub fn priority(&self) -> f64 {
        self.priority
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    text: String,
    alternatives: Vec<Alternative>,
}

impl Pattern {
    pub fn parse(text: &str, expressions: &Expressions, namespaces: &Namespaces) -> Result<Self> {
        let alternatives = split_union(text)
            .into_iter()
            .map(|alternative| Alternative::parse(alternative, expressions, namespaces))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            text: text.to_string(),
            alternatives,
        })
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }
}

/// Split at `|` outside literals, parentheses and predicates.
fn split_union(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if q == c => quote = None,
            (Some(_), _) => {},
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, '|') if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            },
            _ => {},
        }
    }
    parts.push(&text[start..]);
    parts
}

const NODE_TYPES: &[&str] = &["node", "text", "comment", "processing-instruction"];

fn invalid(text: &str, why: &str) -> Error {
    Error::InvalidProgram(format!("pattern '{text}': {why}"))
}

/// Reject anything but a location path over the child and attribute axes.
/// Predicates are left to the expression parser.
fn check_location_path(text: &str) -> Result<()> {
    match text.chars().next() {
        None => return Err(invalid(text, "empty alternative")),
        Some(c) if c == '(' || c == '$' || c == '"' || c == '\'' || c == '-' || c.is_ascii_digit() => {
            return Err(invalid(text, "not a location path"));
        },
        _ => {},
    }
    if text.len() > 1 && text.ends_with('/') {
        return Err(invalid(text, "ends with '/'"));
    }

    let mut predicates = 0usize;
    let mut quote = None;
    let mut name = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' => predicates += 1,
            ']' => predicates = predicates.saturating_sub(1),
            _ if predicates > 0 => {},
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                if name != "child" && name != "attribute" {
                    return Err(invalid(text, &format!("axis '{name}' is not allowed")));
                }
                name.clear();
                continue;
            },
            '(' => {
                if !NODE_TYPES.contains(&name.as_str()) {
                    return Err(invalid(text, &format!("'{name}()' is not a node test")));
                }
            },
            c if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') => {
                name.push(c);
                continue;
            },
            c if c.is_whitespace() => continue,
            '/' | '@' | '*' | ')' => {},
            other => return Err(invalid(text, &format!("unexpected '{other}'"))),
        }
        name.clear();
    }
    Ok(())
}

fn default_priority(text: &str) -> f64 {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains(['/', '[']) {
        return 0.5;
    }
    let step = compact
        .strip_prefix("child::")
        .or_else(|| compact.strip_prefix("attribute::"))
        .or_else(|| compact.strip_prefix('@'))
        .unwrap_or(&compact);
    match step {
        "*" | "node()" | "text()" | "comment()" | "processing-instruction()" => -0.5,
        s if s.ends_with(":*") => -0.25,
        _ => 0.0,
    }
}
