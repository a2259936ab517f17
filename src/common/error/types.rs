//! Unified error type for quire.
//!
//! Every fallible operation in the crate returns [`Result`]. Store failures,
//! markup failures and stylesheet failures are kept as distinct variants so
//! pipeline drivers can decide per resource whether to skip, retry or abort.
use thiserror::Error;

/// Main error type for quire operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The external store could not be opened or read for an entry
    #[error("Store unavailable for '{name}': {source}")]
    StoreUnavailable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The store returned fewer bytes than the recorded length
    #[error("Short read of '{name}': expected {expected} bytes, got {actual}")]
    ShortRead {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Markup could not be parsed
    #[error("Malformed markup in '{href}': {message}")]
    MalformedMarkup { href: String, message: String },

    /// A transformation stage failed for one resource
    #[error("Transform failed for '{href}': {source}")]
    TransformFailure {
        href: String,
        #[source]
        source: Box<Error>,
    },

    /// The stylesheet failed to compile
    #[error("Invalid stylesheet: {0}")]
    InvalidProgram(String),

    /// The stylesheet raised an error while running
    #[error("XSLT error: {0}")]
    Xslt(String),

    /// Encoding label not known to the decoder
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Resource id is not a valid XML name
    #[error("Invalid resource id: {0}")]
    InvalidId(String),

    /// Another resource already occupies the href
    #[error("Duplicate href: {0}")]
    DuplicateHref(String),

    /// Another resource already carries the id
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// No resource with the given href or id
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap `self` as the cause of a failed transformation of `href`.
    ///
    /// Errors that already are transform failures are returned unchanged so
    /// nested stages never produce a chain of identical wrappers.
    pub fn into_transform_failure(self, href: &str) -> Self {
        match self {
            Error::TransformFailure { .. } => self,
            other => Error::TransformFailure {
                href: href.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The error at the bottom of a transform failure, or `self`.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::TransformFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for quire operations.
pub type Result<T> = std::result::Result<T, Error>;
