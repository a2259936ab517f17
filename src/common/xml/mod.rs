//! XML text helpers: escaping for serialization and the HTML entity table
//! shared by title extraction and the XHTML entity resolver.

pub mod entities;
pub mod escape;

pub use entities::{lookup_entity, unescape_html};
pub use escape::{escape_attribute, escape_text};
