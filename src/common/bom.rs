//! Byte Order Mark (BOM) detection for text resources.
//!
//! Detection works on an already-buffered prefix so the caller keeps control
//! over what is replayed to downstream readers.

use encoding_rs::Encoding;

/// Supported BOM encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BomKind {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
}

impl BomKind {
    /// Returns the byte representation of the BOM.
    #[inline]
    pub const fn as_bytes(&self) -> &'static [u8] {
        match self {
            BomKind::Utf8 => &UTF8_BOM,
            BomKind::Utf16Le => &UTF16_LE_BOM,
            BomKind::Utf16Be => &UTF16_BE_BOM,
            BomKind::Utf32Le => &UTF32_LE_BOM,
            BomKind::Utf32Be => &UTF32_BE_BOM,
        }
    }

    /// Returns the length in bytes of the BOM.
    #[inline]
    #[allow(clippy::len_without_is_empty)] // No need to check for empty BOMs
    pub const fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// The decoder for text carrying this BOM.
    ///
    /// UTF-32 has no decoder in `encoding_rs` (it is not a web encoding), so
    /// callers get `None` and must report the stream as unsupported.
    pub fn encoding(&self) -> Option<&'static Encoding> {
        match self {
            BomKind::Utf8 => Some(encoding_rs::UTF_8),
            BomKind::Utf16Le => Some(encoding_rs::UTF_16LE),
            BomKind::Utf16Be => Some(encoding_rs::UTF_16BE),
            BomKind::Utf32Le | BomKind::Utf32Be => None,
        }
    }
}

/// UTF-8 BOM bytes.
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
/// UTF-16 little-endian BOM bytes.
pub const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];
/// UTF-16 big-endian BOM bytes.
pub const UTF16_BE_BOM: [u8; 2] = [0xFE, 0xFF];
/// UTF-32 little-endian BOM bytes.
pub const UTF32_LE_BOM: [u8; 4] = [0xFF, 0xFE, 0x00, 0x00];
/// UTF-32 big-endian BOM bytes.
pub const UTF32_BE_BOM: [u8; 4] = [0x00, 0x00, 0xFE, 0xFF];

/// Detects a BOM at the start of `buf`.
///
/// The UTF-32 LE mark shares its first two bytes with UTF-16 LE, so the
/// longer marks are tested first.
pub fn detect_bom(buf: &[u8]) -> Option<BomKind> {
    if buf.starts_with(&UTF32_BE_BOM) {
        return Some(BomKind::Utf32Be);
    }
    if buf.starts_with(&UTF32_LE_BOM) {
        return Some(BomKind::Utf32Le);
    }
    if buf.starts_with(&UTF8_BOM) {
        return Some(BomKind::Utf8);
    }
    if buf.starts_with(&UTF16_BE_BOM) {
        return Some(BomKind::Utf16Be);
    }
    if buf.starts_with(&UTF16_LE_BOM) {
        return Some(BomKind::Utf16Le);
    }
    None
}
