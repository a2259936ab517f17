//! Media types of package resources.
//!
//! A resource's media type is derived once from the extension of its href.
//! The table below covers the core media types of EPUB 2 and 3 publications.

use phf::phf_map;
use std::fmt;

/// Broad classification of a media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// XHTML/HTML content documents
    Markup,
    Stylesheet,
    Script,
    /// Package-level XML (NCX, OPF, SMIL, page templates)
    Xml,
    Image,
    Font,
    Audio,
    Video,
    Container,
}

/// A media type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaType {
    /// MIME name, e.g. `application/xhtml+xml`
    pub name: &'static str,
    pub category: Category,
    /// Whether resources of this type carry character data
    pub text: bool,
    /// Extension used when generating a file name
    pub default_extension: &'static str,
}

impl MediaType {
    const fn new(
        name: &'static str,
        category: Category,
        text: bool,
        default_extension: &'static str,
    ) -> Self {
        Self {
            name,
            category,
            text,
            default_extension,
        }
    }

    /// True for XHTML/HTML content documents.
    #[inline]
    pub fn is_markup(&self) -> bool {
        self.category == Category::Markup
    }

    #[inline]
    pub fn is_image(&self) -> bool {
        self.category == Category::Image
    }

    /// True for any type that can be parsed as XML.
    pub fn is_xml(&self) -> bool {
        matches!(self.category, Category::Markup | Category::Xml)
            || self.name == SVG.name
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub const XHTML: MediaType = MediaType::new("application/xhtml+xml", Category::Markup, true, "xhtml");
pub const EPUB: MediaType = MediaType::new("application/epub+zip", Category::Container, false, "epub");
pub const NCX: MediaType = MediaType::new("application/x-dtbncx+xml", Category::Xml, true, "ncx");
pub const OPF: MediaType = MediaType::new("application/oebps-package+xml", Category::Xml, true, "opf");
pub const JAVASCRIPT: MediaType = MediaType::new("text/javascript", Category::Script, true, "js");
pub const CSS: MediaType = MediaType::new("text/css", Category::Stylesheet, true, "css");
pub const JPG: MediaType = MediaType::new("image/jpeg", Category::Image, false, "jpg");
pub const PNG: MediaType = MediaType::new("image/png", Category::Image, false, "png");
pub const GIF: MediaType = MediaType::new("image/gif", Category::Image, false, "gif");
pub const SVG: MediaType = MediaType::new("image/svg+xml", Category::Image, true, "svg");
pub const TTF: MediaType = MediaType::new("application/x-truetype-font", Category::Font, false, "ttf");
pub const OPENTYPE: MediaType = MediaType::new("application/vnd.ms-opentype", Category::Font, false, "otf");
pub const WOFF: MediaType = MediaType::new("application/font-woff", Category::Font, false, "woff");
pub const WOFF2: MediaType = MediaType::new("font/woff2", Category::Font, false, "woff2");
pub const MP3: MediaType = MediaType::new("audio/mpeg", Category::Audio, false, "mp3");
pub const OGG: MediaType = MediaType::new("audio/ogg", Category::Audio, false, "ogg");
pub const MP4: MediaType = MediaType::new("video/mp4", Category::Video, false, "mp4");
pub const SMIL: MediaType = MediaType::new("application/smil+xml", Category::Xml, true, "smil");
pub const XPGT: MediaType = MediaType::new("application/adobe-page-template+xml", Category::Xml, true, "xpgt");
pub const PLS: MediaType = MediaType::new("application/pls+xml", Category::Xml, true, "pls");

/// Lower-case extension to media type.
static BY_EXTENSION: phf::Map<&'static str, MediaType> = phf_map! {
    "xhtml" => XHTML,
    "html" => XHTML,
    "htm" => XHTML,
    "epub" => EPUB,
    "ncx" => NCX,
    "opf" => OPF,
    "js" => JAVASCRIPT,
    "css" => CSS,
    "jpg" => JPG,
    "jpeg" => JPG,
    "png" => PNG,
    "gif" => GIF,
    "svg" => SVG,
    "ttf" => TTF,
    "otf" => OPENTYPE,
    "woff" => WOFF,
    "woff2" => WOFF2,
    "mp3" => MP3,
    "ogg" => OGG,
    "mp4" => MP4,
    "smil" => SMIL,
    "xpgt" => XPGT,
    "pls" => PLS,
};

/// Every distinct media type known to the resolver.
pub const ALL: &[MediaType] = &[
    XHTML, EPUB, NCX, OPF, JAVASCRIPT, CSS, JPG, PNG, GIF, SVG, TTF, OPENTYPE, WOFF, WOFF2,
    MP3, OGG, MP4, SMIL, XPGT, PLS,
];

/// Resolve the media type of `href` from its file extension.
///
/// Matching is case-insensitive; query strings and fragments are not
/// expected in package hrefs and are not stripped.
///
/// ```
/// use quire::media_type::{self, determine_media_type};
///
/// assert_eq!(determine_media_type("OEBPS/Chapter1.XHTML"), Some(media_type::XHTML));
/// assert_eq!(determine_media_type("cover.jpeg"), Some(media_type::JPG));
/// assert_eq!(determine_media_type("README"), None);
/// ```
pub fn determine_media_type(href: &str) -> Option<MediaType> {
    let file_name = href.rsplit('/').next().unwrap_or(href);
    let (_, extension) = file_name.rsplit_once('.')?;
    if extension.is_empty() || extension.len() > 5 {
        return None;
    }
    let lower = extension.to_ascii_lowercase();
    BY_EXTENSION.get(lower.as_str()).copied()
}

/// Look up a media type by its MIME name.
pub fn from_name(name: &str) -> Option<MediaType> {
    ALL.iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_media_type() {
        assert_eq!(determine_media_type("chapter1.html"), Some(XHTML));
        assert_eq!(determine_media_type("text/ch.htm"), Some(XHTML));
        assert_eq!(determine_media_type("style/main.CSS"), Some(CSS));
        assert_eq!(determine_media_type("fonts/a.woff2"), Some(WOFF2));
        assert_eq!(determine_media_type("toc.ncx"), Some(NCX));
        assert_eq!(determine_media_type("no_extension"), None);
        assert_eq!(determine_media_type("dir.d/file"), None);
        assert_eq!(determine_media_type("file.unknown"), None);
        assert_eq!(determine_media_type("trailing."), None);
    }

    #[test]
    fn test_media_type_properties() {
        assert!(XHTML.is_markup());
        assert!(XHTML.text);
        assert!(PNG.is_image() && !PNG.text);
        assert!(SVG.is_image() && SVG.is_xml());
        assert!(NCX.is_xml() && !NCX.is_markup());
        assert!(!CSS.is_xml());
        assert_eq!(XHTML.to_string(), "application/xhtml+xml");
    }

    #[test]
    fn test_from_name() {
        assert_eq!(from_name("image/PNG"), Some(PNG));
        assert_eq!(from_name("application/octet-stream"), None);
    }

    #[test]
    fn test_table_entries_are_listed() {
        for (ext, mt) in BY_EXTENSION.entries() {
            assert!(ALL.contains(mt), "{ext} maps to an unlisted type");
        }
    }
}
