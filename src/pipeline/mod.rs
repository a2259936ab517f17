//! Processing stages and the pipeline that runs them.
//!
//! A [`Pipeline`] owns an ordered list of [`ResourceProcessor`] stages and
//! applies them to one resource, a slice of resources or a whole
//! [`Resources`] collection. Resources are processed in parallel with rayon;
//! a failure stops the remaining stages for that resource only.

pub mod entity;
pub mod processor;
pub mod title;
pub mod xsl;

pub use entity::{EntityResolver, PredefinedOnly, XhtmlEntities};
pub use processor::{IdentityProcessor, ResourceProcessor};
pub use title::TitleFillProcessor;
pub use xsl::XslProcessor;

use crate::common::diagnostics::{Diagnostics, default_diagnostics};
use crate::common::{Error, Result};
use crate::config::ProcessingConfig;
use crate::resource::{Resource, Resources, TitleExtractor};
use encoding_rs::Encoding;
use rayon::prelude::*;
use std::sync::Arc;

const COMPONENT: &str = "pipeline";

/// Outcome of running a pipeline over many resources.
#[derive(Debug, Default)]
pub struct ProcessReport {
    /// Resources that went through every stage
    pub processed: usize,
    /// Resources whose content was replaced at least once
    pub changed: usize,
    /// Href and error of every resource that failed
    pub failures: Vec<(String, Error)>,
}

impl ProcessReport {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, href: String, outcome: Result<usize>) {
        match outcome {
            Ok(changes) => {
                self.processed += 1;
                if changes > 0 {
                    self.changed += 1;
                }
            },
            Err(err) => self.failures.push((href, err)),
        }
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn ResourceProcessor>>,
    diagnostics: Arc<dyn Diagnostics>,
    default_encoding: Option<&'static Encoding>,
    parallel: bool,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            diagnostics: default_diagnostics(),
            default_encoding: None,
            parallel: true,
        }
    }

    /// Build the stages a configuration asks for: title extraction, then
    /// the stylesheet.
    pub fn from_config(config: &ProcessingConfig) -> Result<Self> {
        Self::from_config_with(config, default_diagnostics())
    }

    pub fn from_config_with(
        config: &ProcessingConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        config.validate()?;
        let mut pipeline = Self::new()
            .with_diagnostics(diagnostics.clone())
            .with_default_encoding(Some(config.encoding()?))
            .parallel(config.parallel);

        if config.extract_titles {
            pipeline.push(TitleFillProcessor::new(TitleExtractor::new(
                diagnostics.clone(),
            )));
        }
        if let Some(path) = &config.stylesheet {
            let xsl = XslProcessor::from_path(path)?
                .with_entities(config.entities.resolver())
                .with_diagnostics(diagnostics);
            pipeline.push(xsl);
        }
        Ok(pipeline)
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Encoding given to text resources that have none.
    pub fn with_default_encoding(mut self, encoding: Option<&'static Encoding>) -> Self {
        self.default_encoding = encoding;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn push(&mut self, stage: impl ResourceProcessor + 'static) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.stages.iter().map(|stage| stage.name())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage over `resource` in order, returning how many stages
    /// replaced its content.
    ///
    /// Stage output is UTF-8, so rewritten text resources are switched to
    /// that encoding. The first failing stage ends processing; its error is
    /// reported as [`Error::TransformFailure`].
    pub fn process(&self, resource: &mut Resource) -> Result<usize> {
        if resource.encoding().is_none()
            && resource.media_type().is_some_and(|m| m.text)
            && let Some(encoding) = self.default_encoding
        {
            resource.set_encoding(Some(encoding));
        }

        let mut changes = 0;
        for stage in &self.stages {
            match stage.apply(resource) {
                Ok(Some(bytes)) => {
                    resource.set_data(bytes);
                    if resource.encoding().is_some() {
                        resource.set_encoding(Some(encoding_rs::UTF_8));
                    }
                    changes += 1;
                },
                Ok(None) => {},
                Err(err) => {
                    let err = err.into_transform_failure(resource.href());
                    self.diagnostics.warn(
                        COMPONENT,
                        Some(resource.href()),
                        &format!("stage '{}' failed: {}", stage.name(), err),
                    );
                    return Err(err);
                },
            }
        }
        Ok(changes)
    }

    /// Process every resource in the slice.
    pub fn process_all(&self, resources: &mut [Resource]) -> ProcessReport {
        let outcomes: Vec<(String, Result<usize>)> = if self.parallel {
            resources
                .par_iter_mut()
                .map(|resource| self.run_one(resource))
                .collect()
        } else {
            resources
                .iter_mut()
                .map(|resource| self.run_one(resource))
                .collect()
        };
        self.report(outcomes)
    }

    /// Process every resource of a collection.
    pub fn process_collection(&self, resources: &mut Resources) -> ProcessReport {
        let outcomes: Vec<(String, Result<usize>)> = if self.parallel {
            resources
                .map_mut()
                .par_iter_mut()
                .map(|(_, resource)| self.run_one(resource))
                .collect()
        } else {
            resources
                .iter_mut()
                .map(|resource| self.run_one(resource))
                .collect()
        };
        self.report(outcomes)
    }

    fn run_one(&self, resource: &mut Resource) -> (String, Result<usize>) {
        (resource.href().to_string(), self.process(resource))
    }

    fn report(&self, outcomes: Vec<(String, Result<usize>)>) -> ProcessReport {
        let mut report = ProcessReport::default();
        for (href, outcome) in outcomes {
            report.record(href, outcome);
        }
        self.diagnostics.debug(
            COMPONENT,
            None,
            &format!(
                "processed {} resources, {} changed, {} failed",
                report.processed,
                report.changed,
                report.failures.len()
            ),
        );
        report
    }
}
