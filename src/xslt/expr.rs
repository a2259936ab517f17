//! XPath expressions of a stylesheet.
//!
//! Expressions are kept as source text so a compiled stylesheet stays
//! `Send + Sync`; each transformation builds its own `sxd_xpath::XPath`
//! values from them. XSLT's context position, context size and
//! `current()` have no place in an sxd-xpath [`Context`](sxd_xpath::Context),
//! so their uses outside predicates are rewritten into references to
//! variables the executor binds before evaluating.

use crate::common::{Error, Result};
use std::cell::Cell;
use std::sync::Arc;
use sxd_xpath::{Factory, XPath};

pub const POSITION_VARIABLE: &str = "quire.position";
pub const LAST_VARIABLE: &str = "quire.last";
pub const CURRENT_VARIABLE: &str = "quire.current";

/// Prefixed namespace bindings visible to an expression, outermost first.
pub type Namespaces = Arc<[(String, String)]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    id: usize,
    /// As written in the stylesheet
    text: String,
    /// Handed to sxd-xpath
    source: String,
    namespaces: Namespaces,
    uses_focus: bool,
}

impl Expression {
    /// Index of the expression within its stylesheet.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn namespaces(&self) -> &[(String, String)] {
        &self.namespaces
    }

    /// Whether evaluation needs the position, size and current node bound.
    #[inline]
    pub fn uses_focus(&self) -> bool {
        self.uses_focus
    }

    /// The variable name if the expression is a lone `$name`.
    pub fn variable_reference(&self) -> Option<&str> {
        let name = self.text.trim().strip_prefix('$')?;
        name.chars()
            .all(|c| is_name_char(c) && c != ':')
            .then_some(name)
            .filter(|n| !n.is_empty())
    }

    pub fn build(&self, factory: &Factory) -> Result<XPath> {
        match factory.build(&self.source) {
            Ok(Some(xpath)) => Ok(xpath),
            Ok(None) => Err(Error::InvalidProgram("empty expression".to_string())),
            Err(e) => Err(Error::InvalidProgram(format!("expression '{}': {e}", self.text))),
        }
    }
}

/// Compiles the expressions of one stylesheet and numbers them.
pub struct Expressions {
    factory: Factory,
    count: Cell<usize>,
}

impl Default for Expressions {
    fn default() -> Self {
        Self {
            factory: Factory::new(),
            count: Cell::new(0),
        }
    }
}

impl Expressions {
    /// Check `text` and assign it the next id.
    pub fn compile(&self, text: &str, namespaces: &Namespaces) -> Result<Expression> {
        if text.trim().is_empty() {
            return Err(Error::InvalidProgram("empty expression".to_string()));
        }
        let (source, uses_focus) = rewrite_focus(text);
        let expression = Expression {
            id: self.count.get(),
            text: text.to_string(),
            source,
            namespaces: Arc::clone(namespaces),
            uses_focus,
        };
        expression.build(&self.factory)?;
        self.count.set(expression.id + 1);
        Ok(expression)
    }

    /// Number of expressions compiled so far.
    pub fn count(&self) -> usize {
        self.count.get()
    }
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_numeric() || matches!(c, '-' | '.' | ':' | '\u{B7}')
}

fn scan(text: &str, from: usize, accept: impl Fn(char) -> bool) -> usize {
    text[from..]
        .char_indices()
        .find(|&(_, c)| !accept(c))
        .map_or(text.len(), |(i, _)| from + i)
}

/// End of `()` (whitespace allowed) starting at `from`.
fn empty_call_end(text: &str, from: usize) -> Option<usize> {
    let open = scan(text, from, char::is_whitespace);
    text[open..].strip_prefix('(')?;
    let close = scan(text, open + 1, char::is_whitespace);
    text[close..].strip_prefix(')')?;
    Some(close + 1)
}

/// Replace `position()` and `last()` outside predicates, and `current()`
/// anywhere, with variable references.
fn rewrite_focus(text: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut uses_focus = false;
    let mut predicates = 0usize;
    let mut previous: Option<char> = None;
    let mut pos = 0;

    while let Some(c) = text[pos..].chars().next() {
        let start = pos;
        pos += c.len_utf8();
        match c {
            '"' | '\'' => {
                pos = text[pos..].find(c).map_or(text.len(), |i| pos + i + 1);
                out.push_str(&text[start..pos]);
            },
            '[' => {
                predicates += 1;
                out.push(c);
            },
            ']' => {
                predicates = predicates.saturating_sub(1);
                out.push(c);
            },
            c if c.is_ascii_digit() => {
                pos = scan(text, pos, |c| c.is_ascii_digit() || c == '.');
                out.push_str(&text[start..pos]);
            },
            c if is_name_start(c) => {
                pos = scan(text, pos, is_name_char);
                let name = &text[start..pos];
                let variable = match name {
                    "position" if predicates == 0 => Some(POSITION_VARIABLE),
                    "last" if predicates == 0 => Some(LAST_VARIABLE),
                    "current" => Some(CURRENT_VARIABLE),
                    _ => None,
                };
                match (variable, empty_call_end(text, pos)) {
                    (Some(variable), Some(end)) if !matches!(previous, Some('$' | '@' | ':')) => {
                        out.push('$');
                        out.push_str(variable);
                        pos = end;
                        uses_focus = true;
                    },
                    _ => out.push_str(name),
                }
            },
            c => out.push(c),
        }
        if let Some(last) = text[start..pos].chars().rev().find(|c| !c.is_whitespace()) {
            previous = Some(last);
        }
    }
    (out, uses_focus)
}
