use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;

// Static initialization: automatons are built only once, thread-safe
static TEXT_ESCAPER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .build(["&", "<", ">"])
        .expect("Failed to build XML text escaper")
});

static ATTRIBUTE_ESCAPER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .build(["&", "<", ">", "\"", "\t", "\n", "\r"])
        .expect("Failed to build XML attribute escaper")
});

/// Escape character data for element content.
///
/// Quotes are left alone since they carry no meaning outside attributes.
///
/// # Examples
///
/// ```
/// use quire::common::xml::escape_text;
/// assert_eq!(escape_text("a & b"), "a &amp; b");
/// assert_eq!(escape_text("<p>\"hi\"</p>"), "&lt;p&gt;\"hi\"&lt;/p&gt;");
/// ```
#[inline]
pub fn escape_text(s: &str) -> String {
    TEXT_ESCAPER.replace_all(s, &["&amp;", "&lt;", "&gt;"])
}

/// Escape a value for a double-quoted attribute.
///
/// Whitespace control characters are written as character references so
/// they survive attribute-value normalisation on re-parse.
///
/// # Examples
///
/// ```
/// use quire::common::xml::escape_attribute;
/// assert_eq!(escape_attribute("say \"hi\""), "say &quot;hi&quot;");
/// assert_eq!(escape_attribute("a\tb"), "a&#9;b");
/// ```
#[inline]
pub fn escape_attribute(s: &str) -> String {
    ATTRIBUTE_ESCAPER.replace_all(
        s,
        &["&amp;", "&lt;", "&gt;", "&quot;", "&#9;", "&#10;", "&#13;"],
    )
}
