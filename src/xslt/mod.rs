//! A compact XSLT 1.0 processor.
//!
//! Source, stylesheet and result trees are `sxd_document` documents and
//! every select, test and attribute value template is evaluated by
//! `sxd_xpath`. This module holds the instruction layer on top: stylesheets
//! are compiled once into an immutable [`Stylesheet`], [`transform`] builds
//! a result tree and [`serialize`] writes it out as xml, html or text.
//!
//! # Examples
//! ```
//! use quire::pipeline::entity::XhtmlEntities;
//! use quire::xslt::{Stylesheet, transform_text};
//!
//! let sheet = Stylesheet::compile(r#"
//!     <xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
//!       <xsl:output method="text"/>
//!       <xsl:template match="/"><xsl:value-of select="count(//p)"/></xsl:template>
//!     </xsl:stylesheet>"#).unwrap();
//! let text = transform_text(&sheet, "<body><p/><p/></body>", "ch1.xhtml", &XhtmlEntities).unwrap();
//! assert_eq!(text, "2");
//! ```

pub mod exec;
pub mod expr;
pub mod parse;
pub mod pattern;
pub mod serialize;
pub mod stylesheet;

pub use exec::{MAX_DEPTH, transform, transform_text};
pub use parse::{Loader, MAX_NESTING, XML_NAMESPACE, parse_document};
pub use serialize::serialize;
pub use stylesheet::{OutputMethod, OutputSettings, Stylesheet, XSLT_NAMESPACE};
