//! Resolution of named entity references during markup parsing.
//!
//! Content documents routinely use HTML entities such as `&nbsp;` that an
//! XML parser only knows from the (external, never fetched) XHTML DTD. A
//! resolver supplies their replacement text instead.

use crate::common::xml::lookup_entity;
use std::collections::HashMap;

/// Replacement text for named entities beyond the five XML built-ins.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<&str>;
}

/// The HTML 4 / XHTML 1.x entity sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct XhtmlEntities;

impl EntityResolver for XhtmlEntities {
    #[inline]
    fn resolve(&self, name: &str) -> Option<&str> {
        lookup_entity(name)
    }
}

/// Only `lt`, `gt`, `amp`, `quot` and `apos`; any other name is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct PredefinedOnly;

impl EntityResolver for PredefinedOnly {
    #[inline]
    fn resolve(&self, _name: &str) -> Option<&str> {
        None
    }
}

impl EntityResolver for HashMap<String, String> {
    fn resolve(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}
