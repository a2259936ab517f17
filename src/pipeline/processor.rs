//! The contract between resources and processing stages.

use crate::common::Result;
use crate::resource::Resource;

/// One stage of a processing pipeline.
///
/// Stages receive shared access to the resource and hand back new content
/// instead of mutating it, which keeps a failing stage from leaving partial
/// output behind. Implementations must be usable from several threads at
/// once.
pub trait ResourceProcessor: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Process `resource`. `Ok(Some(bytes))` replaces the content,
    /// `Ok(None)` leaves it unchanged. Text output is UTF-8.
    fn apply(&self, resource: &Resource) -> Result<Option<Vec<u8>>>;
}

/// A stage that never changes anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityProcessor;

impl ResourceProcessor for IdentityProcessor {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, _resource: &Resource) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_leaves_content() {
        let resource = Resource::from_text("<p/>", "a.xhtml");
        assert_eq!(IdentityProcessor.apply(&resource).unwrap(), None);
        assert_eq!(IdentityProcessor.name(), "identity");
    }
}
