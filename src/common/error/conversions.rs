//! Error conversion implementations.
//!
//! This module contains From trait implementations to convert from the error
//! types of the crates quire builds on to the unified Error type.

use super::types::Error;

#[cfg(feature = "archive")]
impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::Io(e),
            other => Error::Io(std::io::Error::other(other)),
        }
    }
}

impl Error {
    /// Build a [`Error::MalformedMarkup`] from a quick-xml failure.
    pub(crate) fn from_xml_error(href: &str, err: quick_xml::Error) -> Self {
        Error::MalformedMarkup {
            href: href.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_failure_is_not_double_wrapped() {
        let err = Error::Xslt("boom".to_string()).into_transform_failure("a.xhtml");
        let err = err.into_transform_failure("b.xhtml");

        match &err {
            Error::TransformFailure { href, .. } => assert_eq!(href, "a.xhtml"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root_cause(), Error::Xslt(_)));
    }

    #[test]
    fn test_store_unavailable_display() {
        let err = Error::StoreUnavailable {
            name: "OEBPS/ch1.xhtml".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(
            err.to_string(),
            "Store unavailable for 'OEBPS/ch1.xhtml': gone"
        );
    }
}
