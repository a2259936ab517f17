//! Character encoding utilities for text resources.
//!
//! Text resources inside a package frequently carry no encoding information,
//! or carry a declaration that disagrees with the package metadata. This
//! module resolves encoding labels and sniffs in-document declarations from a
//! bounded prefix of the raw bytes; the streaming decoder built on top of it
//! lives in [`crate::resource::reader`].

use crate::common::{Error, Result};
use encoding_rs::Encoding;
use memchr::memmem;

/// Resolve an encoding label such as `"UTF-8"`, `"latin1"` or `"Shift_JIS"`.
///
/// Labels follow the WHATWG Encoding Standard, so `"ISO-8859-1"` resolves to
/// windows-1252, which is a superset of it.
///
/// # Examples
/// ```
/// use quire::common::encoding::encoding_for_label;
///
/// let encoding = encoding_for_label("utf8").unwrap();
/// assert_eq!(encoding.name(), "UTF-8");
/// assert!(encoding_for_label("no-such-charset").is_err());
/// ```
pub fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::UnsupportedEncoding(label.to_string()))
}

/// Guess UTF-16 from the byte pattern of `<?` when no BOM is present.
///
/// An XML document without BOM must start with `<?xml` if it is not UTF-8,
/// which makes the first four bytes sufficient.
pub fn guess_utf16_without_bom(prefix: &[u8]) -> Option<&'static Encoding> {
    match prefix {
        [0x3C, 0x00, 0x3F, 0x00, ..] => Some(encoding_rs::UTF_16LE),
        [0x00, 0x3C, 0x00, 0x3F, ..] => Some(encoding_rs::UTF_16BE),
        _ => None,
    }
}

/// Find the encoding named by the XML declaration at the start of `prefix`.
///
/// Only ASCII-compatible prefixes are inspected; leading whitespace before
/// the declaration is tolerated.
pub fn xml_declared_label(prefix: &[u8]) -> Option<&[u8]> {
    let start = prefix.iter().position(|b| !b.is_ascii_whitespace())?;
    let decl = &prefix[start..];
    if !decl.starts_with(b"<?xml") {
        return None;
    }
    let end = memmem::find(decl, b"?>")?;
    let decl = &decl[..end];
    let pos = memmem::find(decl, b"encoding")?;
    quoted_value_after_equals(&decl[pos + b"encoding".len()..])
}

/// Find the charset named by an HTML `<meta>` element inside `prefix`.
///
/// Both `<meta charset="…">` and the `http-equiv` form with a
/// `content="text/html; charset=…"` attribute are recognised.
pub fn html_meta_charset(prefix: &[u8]) -> Option<Vec<u8>> {
    let lower = prefix.to_ascii_lowercase();
    let mut offset = 0;

    while let Some(pos) = memmem::find(&lower[offset..], b"<meta") {
        let tag_start = offset + pos;
        let tag_end = memchr::memchr(b'>', &lower[tag_start..])
            .map(|end| tag_start + end)
            .unwrap_or(lower.len());
        let tag = &lower[tag_start..tag_end];

        if let Some(at) = memmem::find(tag, b"charset") {
            let rest = &tag[at + b"charset".len()..];
            let rest = trim_ascii_start(rest);
            if let Some(rest) = rest.strip_prefix(b"=") {
                let rest = trim_ascii_start(rest);
                let rest = rest
                    .strip_prefix(b"\"")
                    .or_else(|| rest.strip_prefix(b"'"))
                    .unwrap_or(rest);
                let len = rest
                    .iter()
                    .position(|&b| {
                        matches!(b, b'"' | b'\'' | b';' | b'/') || b.is_ascii_whitespace()
                    })
                    .unwrap_or(rest.len());
                if len > 0 {
                    // Labels are case-insensitive, the lowered copy is fine.
                    return Some(rest[..len].to_vec());
                }
            }
        }
        offset = tag_end;
    }

    None
}

/// Sniff the encoding declared inside the document prefix.
///
/// A declaration naming UTF-16 inside an ASCII-compatible prefix cannot be
/// right (the declaration itself was readable as ASCII), so it maps to UTF-8
/// the way browsers do.
pub fn sniff_declared_encoding(prefix: &[u8]) -> Option<&'static Encoding> {
    let encoding = match xml_declared_label(prefix) {
        Some(label) => Encoding::for_label(label),
        None => html_meta_charset(prefix).and_then(|label| Encoding::for_label(&label)),
    }?;
    Some(encoding.output_encoding())
}

/// Decode a complete byte buffer with the given encoding.
///
/// Malformed sequences are replaced with U+FFFD. A BOM matching a Unicode
/// encoding is removed.
#[inline]
pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _) = encoding.decode_with_bom_removal(bytes);
    text.into_owned()
}

fn quoted_value_after_equals(rest: &[u8]) -> Option<&[u8]> {
    let rest = trim_ascii_start(rest);
    let rest = trim_ascii_start(rest.strip_prefix(b"=")?);
    let quote = *rest.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let rest = &rest[1..];
    let end = memchr::memchr(quote, rest)?;
    Some(&rest[..end])
}

#[inline]
fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_declared_label() {
        let doc = br#"<?xml version="1.0" encoding="ISO-8859-1"?><html/>"#;
        assert_eq!(xml_declared_label(doc), Some(&b"ISO-8859-1"[..]));

        let single = b"  \n<?xml version='1.0' encoding = 'utf-8' ?>";
        assert_eq!(xml_declared_label(single), Some(&b"utf-8"[..]));

        assert_eq!(xml_declared_label(br#"<?xml version="1.0"?>"#), None);
        assert_eq!(xml_declared_label(b"<html/>"), None);
    }

    #[test]
    fn test_html_meta_charset() {
        let html = br#"<html><head><META CHARSET="Shift_JIS"></head>"#;
        assert_eq!(html_meta_charset(html), Some(b"shift_jis".to_vec()));

        let equiv = br#"<meta http-equiv="Content-Type" content="text/html; charset=windows-1251"/>"#;
        assert_eq!(html_meta_charset(equiv), Some(b"windows-1251".to_vec()));

        assert_eq!(html_meta_charset(br#"<meta name="author" content="x">"#), None);
    }

    #[test]
    fn test_sniff_declared_encoding() {
        let latin = br#"<?xml version="1.0" encoding="ISO-8859-1"?>"#;
        assert_eq!(
            sniff_declared_encoding(latin),
            Some(encoding_rs::WINDOWS_1252)
        );

        let bogus_utf16 = br#"<?xml version="1.0" encoding="UTF-16"?>"#;
        assert_eq!(sniff_declared_encoding(bogus_utf16), Some(encoding_rs::UTF_8));

        let unknown = br#"<?xml version="1.0" encoding="x-klingon"?>"#;
        assert_eq!(sniff_declared_encoding(unknown), None);
    }

    #[test]
    fn test_guess_utf16_without_bom() {
        assert_eq!(
            guess_utf16_without_bom(b"<\x00?\x00x\x00"),
            Some(encoding_rs::UTF_16LE)
        );
        assert_eq!(
            guess_utf16_without_bom(b"\x00<\x00?\x00x"),
            Some(encoding_rs::UTF_16BE)
        );
        assert_eq!(guess_utf16_without_bom(b"<?xml"), None);
    }

    #[test]
    fn test_decode_bytes() {
        assert_eq!(decode_bytes(b"caf\xE9", encoding_rs::WINDOWS_1252), "café");
        assert_eq!(decode_bytes(b"\xEF\xBB\xBFok", encoding_rs::UTF_8), "ok");
    }
}
