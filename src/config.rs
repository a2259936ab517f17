//! Processing configuration loaded from YAML.
//!
//! ```yaml
//! default_encoding: windows-1252
//! stylesheet: styles/normalize.xsl
//! extract_titles: true
//! entities: xhtml
//! parallel: false
//! ```

use crate::common::encoding::encoding_for_label;
use crate::common::{Error, Result};
use crate::pipeline::entity::{EntityResolver, PredefinedOnly, XhtmlEntities};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Named entity set used when parsing content documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitySet {
    #[default]
    Xhtml,
    Predefined,
}

impl EntitySet {
    pub fn resolver(self) -> Arc<dyn EntityResolver> {
        match self {
            EntitySet::Xhtml => Arc::new(XhtmlEntities),
            EntitySet::Predefined => Arc::new(PredefinedOnly),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Encoding assumed for text resources that carry none
    pub default_encoding: String,
    /// XSLT program applied to every markup resource
    pub stylesheet: Option<PathBuf>,
    pub extract_titles: bool,
    pub entities: EntitySet,
    /// Process resources on the rayon thread pool
    pub parallel: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            default_encoding: "UTF-8".to_string(),
            stylesheet: None,
            extract_titles: true,
            entities: EntitySet::Xhtml,
            parallel: true,
        }
    }
}

impl ProcessingConfig {
    /// Parse and validate a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_saphyr::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_saphyr::to_string(self)
            .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))
    }

    /// Check that the encoding label is known and the stylesheet, if any,
    /// exists.
    pub fn validate(&self) -> Result<()> {
        self.encoding()?;
        if let Some(path) = &self.stylesheet
            && !path.is_file()
        {
            return Err(Error::Config(format!(
                "stylesheet {} does not exist",
                path.display()
            )));
        }
        Ok(())
    }

    /// The resolved default encoding.
    pub fn encoding(&self) -> Result<&'static Encoding> {
        encoding_for_label(&self.default_encoding).map_err(|_| {
            Error::Config(format!("unknown encoding '{}'", self.default_encoding))
        })
    }
}
