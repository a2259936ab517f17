//! Title memoisation as a pipeline stage.

use super::processor::ResourceProcessor;
use crate::common::Result;
use crate::resource::{Resource, TitleExtractor};

/// Computes and memoises the title of every markup resource it sees.
/// Content is never changed.
#[derive(Clone, Default)]
pub struct TitleFillProcessor {
    extractor: TitleExtractor,
}

impl TitleFillProcessor {
    pub fn new(extractor: TitleExtractor) -> Self {
        Self { extractor }
    }
}

impl ResourceProcessor for TitleFillProcessor {
    fn name(&self) -> &str {
        "title"
    }

    fn apply(&self, resource: &Resource) -> Result<Option<Vec<u8>>> {
        if resource.is_markup() {
            self.extractor.find_title(resource);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_title_for_markup_only() {
        let stage = TitleFillProcessor::default();

        let page = Resource::from_text("<html><title>Intro</title></html>", "intro.xhtml");
        assert!(!page.has_title_result());
        assert_eq!(stage.apply(&page).unwrap(), None);
        assert_eq!(page.title(), Some("Intro"));

        let style = Resource::from_text("h1 { }", "style.css");
        stage.apply(&style).unwrap();
        assert!(!style.has_title_result());
    }
}
