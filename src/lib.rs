//! Quire - EPUB resources, encoding detection and XSLT processing
//!
//! This library models the resources of an EPUB publication and the
//! processing applied to them on the way into or out of a package.
//!
//! # Features
//!
//! - **Resources**: in-memory or store-backed content, loaded lazily or eagerly
//! - **Encoding detection**: BOM, XML declaration and fallback handling via [`DecodedReader`]
//! - **Titles**: `<title>` extraction from content documents without a full parse
//! - **Media types**: resolution from file extensions
//! - **XSLT**: XSLT 1.0 instruction layer over `sxd-document` trees and `sxd-xpath`, for rewriting content documents
//! - **Pipeline**: ordered processing stages, run in parallel with rayon
//!
//! # Example - Transforming a chapter
//!
//! ```
//! use quire::{Pipeline, Resource, XslProcessor};
//!
//! # fn main() -> quire::Result<()> {
//! let xsl = XslProcessor::compile(r#"
//!     <xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
//!       <xsl:output method="text"/>
//!       <xsl:template match="/"><xsl:value-of select="//title"/></xsl:template>
//!     </xsl:stylesheet>"#)?;
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.push(xsl);
//!
//! let mut chapter = Resource::from_text(
//!     "<html><head><title>Chapter One</title></head></html>",
//!     "ch1.xhtml",
//! );
//! pipeline.process(&mut chapter)?;
//! assert_eq!(chapter.read_text()?, "Chapter One");
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Decoding legacy text
//!
//! ```
//! use quire::DecodedReader;
//!
//! # fn main() -> quire::Result<()> {
//! let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><p>caf\xE9</p>";
//! let text = DecodedReader::new(&bytes[..], None)?.into_string()?;
//! assert!(text.ends_with("<p>caf\u{e9}</p>"));
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod config;
pub mod media_type;
pub mod pipeline;
pub mod resource;
pub mod xslt;

pub use common::{Error, Result};
pub use config::ProcessingConfig;
pub use media_type::{MediaType, determine_media_type};
pub use pipeline::{Pipeline, ProcessReport, ResourceProcessor, TitleFillProcessor, XslProcessor};
pub use resource::{DecodedReader, EncodingSource, Resource, Resources, TitleExtractor};
pub use xslt::Stylesheet;
