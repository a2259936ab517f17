//! Title extraction from markup resources.
//!
//! The scan is lexical: the decoded text is split on `<`, and the first
//! `title` or `h1`..`h7` tag wins. Its text up to the next tag is trimmed
//! and entity-decoded. Malformed markup is scanned the same way.

use super::Resource;
use crate::common::diagnostics::{Diagnostics, default_diagnostics};
use crate::common::Error;
use crate::common::xml::unescape_html;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;

const COMPONENT: &str = "title";

/// Scan decoded markup for the first title-like element.
///
/// Returns `Ok(Some(""))` for an empty title and `Ok(None)` when no such
/// element exists.
///
/// ```
/// use quire::resource::title::scan_title;
///
/// let html = "<html><body><H2 id=\"c1\"> Chapter &amp; Verse </H2></body></html>";
/// assert_eq!(scan_title(html.as_bytes()).unwrap().as_deref(), Some("Chapter & Verse"));
/// ```
pub fn scan_title<R: BufRead>(mut reader: R) -> io::Result<Option<String>> {
    let mut segment = Vec::new();

    // Text before the first '<' cannot hold a tag.
    reader.read_until(b'<', &mut segment)?;

    loop {
        segment.clear();
        let n = reader.read_until(b'<', &mut segment)?;
        if n == 0 {
            return Ok(None);
        }
        if segment.last() == Some(&b'<') {
            segment.pop();
        }

        let Some(gt) = memchr::memchr(b'>', &segment) else {
            continue;
        };
        if is_title_tag(&segment[..gt]) {
            let text = String::from_utf8_lossy(&segment[gt + 1..]);
            return Ok(Some(unescape_html(text.trim()).into_owned()));
        }
    }
}

/// `title` or `h1`..`h7`, case-insensitive, ignoring attributes.
fn is_title_tag(tag: &[u8]) -> bool {
    let end = tag
        .iter()
        .position(|&b| b.is_ascii_whitespace() || b == b'/')
        .unwrap_or(tag.len());
    match &tag[..end] {
        name if name.eq_ignore_ascii_case(b"title") => true,
        [h, digit] => h.eq_ignore_ascii_case(&b'h') && (b'1'..=b'7').contains(digit),
        _ => false,
    }
}

/// Derives and memoises resource titles.
#[derive(Clone)]
pub struct TitleExtractor {
    diagnostics: Arc<dyn Diagnostics>,
}

impl TitleExtractor {
    pub fn new(diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self { diagnostics }
    }

    /// The title found in the resource, memoised on it.
    ///
    /// A title already present on the resource is returned without scanning.
    /// Read or decode failures are reported to the diagnostics sink and
    /// yield `None` without being memoised.
    pub fn find_title(&self, resource: &Resource) -> Option<String> {
        let cell = resource.title_cell();
        if let Some(memo) = cell.get() {
            return memo.clone();
        }

        let scanned = resource
            .reader()
            .and_then(|reader| scan_title(BufReader::new(reader)).map_err(Error::from));

        match scanned {
            Ok(title) => {
                self.diagnostics.debug(
                    COMPONENT,
                    Some(resource.href()),
                    if title.is_some() {
                        "title found"
                    } else {
                        "no title element"
                    },
                );
                cell.get_or_init(|| title).clone()
            },
            Err(err) => {
                self.diagnostics
                    .error(COMPONENT, Some(resource.href()), &err.to_string());
                None
            },
        }
    }

    /// A display title for any resource.
    ///
    /// Non-markup resources are titled by their href; markup without a title
    /// element yields the empty string.
    pub fn title(&self, resource: &Resource) -> String {
        if !resource.is_markup() {
            return resource.href().to_string();
        }
        self.find_title(resource).unwrap_or_default()
    }
}

impl Default for TitleExtractor {
    fn default() -> Self {
        Self::new(default_diagnostics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::diagnostics::{Level, MemoryDiagnostics};
    use crate::resource::store::{MemoryStore, ResourceStore, StoreRef};

    fn scan(text: &str) -> Option<String> {
        scan_title(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_scan_title_variants() {
        assert_eq!(scan("<html><head><title>Hello</title></head></html>").as_deref(), Some("Hello"));
        assert_eq!(scan("<HTML><TITLE>  Upper  </TITLE></HTML>").as_deref(), Some("Upper"));
        assert_eq!(scan("<body><h1 class=\"x\">Chapter 1</h1></body>").as_deref(), Some("Chapter 1"));
        assert_eq!(scan("<body><h7>Seven</h7></body>").as_deref(), Some("Seven"));
        assert_eq!(scan("<title></title>").as_deref(), Some(""));
        assert_eq!(scan("<body><p>No heading</p></body>"), None);
        assert_eq!(scan(""), None);
    }

    #[test]
    fn test_scan_title_first_match_wins() {
        let html = "<head><title>Doc</title></head><body><h1>Heading</h1></body>";
        assert_eq!(scan(html).as_deref(), Some("Doc"));
        let html = "<body><h2>Second</h2><h1>First</h1></body>";
        assert_eq!(scan(html).as_deref(), Some("Second"));
    }

    #[test]
    fn test_scan_title_ignores_lookalikes() {
        // Neither h8, header nor titlepage are title tags.
        let html = "<h8>x</h8><header>y</header><titlepage>z</titlepage><h3>ok</h3>";
        assert_eq!(scan(html).as_deref(), Some("ok"));
    }

    #[test]
    fn test_scan_title_decodes_entities() {
        let html = "<title>Caf&eacute; &#8220;Noir&#8221;</title>";
        assert_eq!(scan(html).as_deref(), Some("Café \u{201C}Noir\u{201D}"));
    }

    #[test]
    fn test_find_title_memoises() {
        let extractor = TitleExtractor::new(Arc::new(MemoryDiagnostics::new()));
        let mut resource = Resource::from_text("<title>One</title>", "a.xhtml");
        assert_eq!(extractor.find_title(&resource).as_deref(), Some("One"));
        assert_eq!(resource.title(), Some("One"));

        // Memo survives content changes until explicitly overwritten.
        resource.set_data(b"<title>Two</title>".to_vec());
        assert_eq!(extractor.find_title(&resource).as_deref(), Some("One"));
        resource.clear_title();
        assert_eq!(extractor.find_title(&resource).as_deref(), Some("Two"));
    }

    #[test]
    fn test_preset_title_short_circuits() {
        let extractor = TitleExtractor::default();
        let mut resource = Resource::from_text("<title>Scanned</title>", "a.xhtml");
        resource.set_title("Preset");
        assert_eq!(extractor.find_title(&resource).as_deref(), Some("Preset"));
    }

    #[test]
    fn test_not_found_is_memoised() {
        let extractor = TitleExtractor::default();
        let resource = Resource::from_text("<p>none</p>", "a.xhtml");
        assert_eq!(extractor.find_title(&resource), None);
        assert!(resource.has_title_result());
        assert_eq!(extractor.title(&resource), "");
    }

    #[test]
    fn test_title_of_non_markup_is_href() {
        let extractor = TitleExtractor::default();
        let image = Resource::from_bytes(vec![0u8; 4], "images/cover.png");
        assert_eq!(extractor.title(&image), "images/cover.png");
    }

    #[test]
    fn test_read_failure_is_reported_and_not_memoised() {
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let extractor = TitleExtractor::new(diagnostics.clone());

        let store = Arc::new(MemoryStore::new());
        let as_dyn: Arc<dyn ResourceStore> = store.clone();
        let resource = Resource::lazy(StoreRef::new(as_dyn, "ch.xhtml", 16), "ch.xhtml");

        assert_eq!(extractor.find_title(&resource), None);
        assert!(!resource.has_title_result());
        let errors = diagnostics.at_least(Level::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].href.as_deref(), Some("ch.xhtml"));

        // The entry appears later; a retry succeeds.
        store.insert("ch.xhtml", b"<title>Late</title>".to_vec());
        let resource = Resource::lazy(
            StoreRef::new(store.clone() as Arc<dyn ResourceStore>, "ch.xhtml", 19),
            "ch.xhtml",
        );
        assert_eq!(extractor.find_title(&resource).as_deref(), Some("Late"));
    }
}
