//! XSLT as a pipeline stage.

use super::entity::{EntityResolver, XhtmlEntities};
use super::processor::ResourceProcessor;
use crate::common::diagnostics::{Diagnostics, default_diagnostics};
use crate::common::{Error, Result};
use crate::resource::{DecodedReader, Resource};
use crate::xslt::{Stylesheet, transform_text};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

const COMPONENT: &str = "xslt";

/// Applies one compiled stylesheet to markup resources.
///
/// The stylesheet is compiled once; every call parses its own source tree
/// and builds its own result, so a single processor can be shared between
/// threads.
///
/// # Examples
/// ```
/// use quire::pipeline::{ResourceProcessor, XslProcessor};
/// use quire::resource::Resource;
///
/// let xsl = XslProcessor::compile(r#"
///     <xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
///       <xsl:output omit-xml-declaration="yes"/>
///       <xsl:template match="/"><n><xsl:value-of select="count(//p)"/></n></xsl:template>
///     </xsl:stylesheet>"#).unwrap();
///
/// let page = Resource::from_text("<html><p/><p/></html>", "ch1.xhtml");
/// let out = xsl.apply(&page).unwrap().unwrap();
/// assert_eq!(out, b"<n>2</n>");
/// ```
#[derive(Clone)]
pub struct XslProcessor {
    stylesheet: Arc<Stylesheet>,
    entities: Arc<dyn EntityResolver>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl XslProcessor {
    /// Compile the stylesheet in `source`.
    pub fn compile(source: &str) -> Result<Self> {
        Ok(Self::new(Stylesheet::compile(source)?))
    }

    pub fn new(stylesheet: Stylesheet) -> Self {
        Self {
            stylesheet: Arc::new(stylesheet),
            entities: Arc::new(XhtmlEntities),
            diagnostics: default_diagnostics(),
        }
    }

    /// Read and compile a stylesheet file, honouring its encoding
    /// declaration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let source = DecodedReader::new(reader, None)?.into_string()?;
        Self::compile(&source)
    }

    /// Resolver for named entities in content documents.
    pub fn with_entities(mut self, entities: Arc<dyn EntityResolver>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    #[inline]
    pub fn stylesheet(&self) -> &Stylesheet {
        &self.stylesheet
    }

    /// Transform markup text. Errors are returned unwrapped.
    pub fn transform_str(&self, text: &str, href: &str) -> Result<String> {
        transform_text(&self.stylesheet, text, href, self.entities.as_ref())
    }

    /// Transform a resource into UTF-8 bytes.
    ///
    /// Every failure, from reading the content to running the stylesheet,
    /// comes back as [`Error::TransformFailure`] for the resource's href.
    pub fn transform(&self, resource: &Resource) -> Result<Vec<u8>> {
        let href = resource.href();
        let result = resource
            .read_text()
            .and_then(|text| self.transform_str(&text, href));
        match result {
            Ok(output) => {
                self.diagnostics.debug(COMPONENT, Some(href), "transformed");
                Ok(output.into_bytes())
            },
            Err(err) => {
                let err: Error = err.into_transform_failure(href);
                self.diagnostics.error(COMPONENT, Some(href), &err.to_string());
                Err(err)
            },
        }
    }
}

impl ResourceProcessor for XslProcessor {
    fn name(&self) -> &str {
        COMPONENT
    }

    /// Non-markup resources pass through unchanged.
    fn apply(&self, resource: &Resource) -> Result<Option<Vec<u8>>> {
        if !resource.is_markup() {
            return Ok(None);
        }
        self.transform(resource).map(Some)
    }
}
