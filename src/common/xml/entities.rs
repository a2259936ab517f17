//! HTML 4 named character entities.
//!
//! The table covers the three XHTML 1.x entity sets (Latin-1, symbols and
//! special characters) plus `apos` from XML. It backs both title decoding and
//! the default entity resolver of the transform stage.

use memchr::memchr;
use phf::phf_map;
use std::borrow::Cow;

static HTML_ENTITIES: phf::Map<&'static str, &'static str> = phf_map! {
    // Markup-significant
    "quot" => "\"", "amp" => "&", "lt" => "<", "gt" => ">", "apos" => "'",
    // Latin-1
    "nbsp" => "\u{A0}", "iexcl" => "\u{A1}", "cent" => "\u{A2}", "pound" => "\u{A3}",
    "curren" => "\u{A4}", "yen" => "\u{A5}", "brvbar" => "\u{A6}", "sect" => "\u{A7}",
    "uml" => "\u{A8}", "copy" => "\u{A9}", "ordf" => "\u{AA}", "laquo" => "\u{AB}",
    "not" => "\u{AC}", "shy" => "\u{AD}", "reg" => "\u{AE}", "macr" => "\u{AF}",
    "deg" => "\u{B0}", "plusmn" => "\u{B1}", "sup2" => "\u{B2}", "sup3" => "\u{B3}",
    "acute" => "\u{B4}", "micro" => "\u{B5}", "para" => "\u{B6}", "middot" => "\u{B7}",
    "cedil" => "\u{B8}", "sup1" => "\u{B9}", "ordm" => "\u{BA}", "raquo" => "\u{BB}",
    "frac14" => "\u{BC}", "frac12" => "\u{BD}", "frac34" => "\u{BE}", "iquest" => "\u{BF}",
    "Agrave" => "\u{C0}", "Aacute" => "\u{C1}", "Acirc" => "\u{C2}", "Atilde" => "\u{C3}",
    "Auml" => "\u{C4}", "Aring" => "\u{C5}", "AElig" => "\u{C6}", "Ccedil" => "\u{C7}",
    "Egrave" => "\u{C8}", "Eacute" => "\u{C9}", "Ecirc" => "\u{CA}", "Euml" => "\u{CB}",
    "Igrave" => "\u{CC}", "Iacute" => "\u{CD}", "Icirc" => "\u{CE}", "Iuml" => "\u{CF}",
    "ETH" => "\u{D0}", "Ntilde" => "\u{D1}", "Ograve" => "\u{D2}", "Oacute" => "\u{D3}",
    "Ocirc" => "\u{D4}", "Otilde" => "\u{D5}", "Ouml" => "\u{D6}", "times" => "\u{D7}",
    "Oslash" => "\u{D8}", "Ugrave" => "\u{D9}", "Uacute" => "\u{DA}", "Ucirc" => "\u{DB}",
    "Uuml" => "\u{DC}", "Yacute" => "\u{DD}", "THORN" => "\u{DE}", "szlig" => "\u{DF}",
    "agrave" => "\u{E0}", "aacute" => "\u{E1}", "acirc" => "\u{E2}", "atilde" => "\u{E3}",
    "auml" => "\u{E4}", "aring" => "\u{E5}", "aelig" => "\u{E6}", "ccedil" => "\u{E7}",
    "egrave" => "\u{E8}", "eacute" => "\u{E9}", "ecirc" => "\u{EA}", "euml" => "\u{EB}",
    "igrave" => "\u{EC}", "iacute" => "\u{ED}", "icirc" => "\u{EE}", "iuml" => "\u{EF}",
    "eth" => "\u{F0}", "ntilde" => "\u{F1}", "ograve" => "\u{F2}", "oacute" => "\u{F3}",
    "ocirc" => "\u{F4}", "otilde" => "\u{F5}", "ouml" => "\u{F6}", "divide" => "\u{F7}",
    "oslash" => "\u{F8}", "ugrave" => "\u{F9}", "uacute" => "\u{FA}", "ucirc" => "\u{FB}",
    "uuml" => "\u{FC}", "yacute" => "\u{FD}", "thorn" => "\u{FE}", "yuml" => "\u{FF}",
    // Special
    "OElig" => "\u{152}", "oelig" => "\u{153}", "Scaron" => "\u{160}", "scaron" => "\u{161}",
    "Yuml" => "\u{178}", "circ" => "\u{2C6}", "tilde" => "\u{2DC}", "ensp" => "\u{2002}",
    "emsp" => "\u{2003}", "thinsp" => "\u{2009}", "zwnj" => "\u{200C}", "zwj" => "\u{200D}",
    "lrm" => "\u{200E}", "rlm" => "\u{200F}", "ndash" => "\u{2013}", "mdash" => "\u{2014}",
    "lsquo" => "\u{2018}", "rsquo" => "\u{2019}", "sbquo" => "\u{201A}", "ldquo" => "\u{201C}",
    "rdquo" => "\u{201D}", "bdquo" => "\u{201E}", "dagger" => "\u{2020}", "Dagger" => "\u{2021}",
    "permil" => "\u{2030}", "lsaquo" => "\u{2039}", "rsaquo" => "\u{203A}", "euro" => "\u{20AC}",
    // Symbols
    "fnof" => "\u{192}", "Alpha" => "\u{391}", "Beta" => "\u{392}", "Gamma" => "\u{393}",
    "Delta" => "\u{394}", "Epsilon" => "\u{395}", "Zeta" => "\u{396}", "Eta" => "\u{397}",
    "Theta" => "\u{398}", "Iota" => "\u{399}", "Kappa" => "\u{39A}", "Lambda" => "\u{39B}",
    "Mu" => "\u{39C}", "Nu" => "\u{39D}", "Xi" => "\u{39E}", "Omicron" => "\u{39F}",
    "Pi" => "\u{3A0}", "Rho" => "\u{3A1}", "Sigma" => "\u{3A3}", "Tau" => "\u{3A4}",
    "Upsilon" => "\u{3A5}", "Phi" => "\u{3A6}", "Chi" => "\u{3A7}", "Psi" => "\u{3A8}",
    "Omega" => "\u{3A9}", "alpha" => "\u{3B1}", "beta" => "\u{3B2}", "gamma" => "\u{3B3}",
    "delta" => "\u{3B4}", "epsilon" => "\u{3B5}", "zeta" => "\u{3B6}", "eta" => "\u{3B7}",
    "theta" => "\u{3B8}", "iota" => "\u{3B9}", "kappa" => "\u{3BA}", "lambda" => "\u{3BB}",
    "mu" => "\u{3BC}", "nu" => "\u{3BD}", "xi" => "\u{3BE}", "omicron" => "\u{3BF}",
    "pi" => "\u{3C0}", "rho" => "\u{3C1}", "sigmaf" => "\u{3C2}", "sigma" => "\u{3C3}",
    "tau" => "\u{3C4}", "upsilon" => "\u{3C5}", "phi" => "\u{3C6}", "chi" => "\u{3C7}",
    "psi" => "\u{3C8}", "omega" => "\u{3C9}", "thetasym" => "\u{3D1}", "upsih" => "\u{3D2}",
    "piv" => "\u{3D6}", "bull" => "\u{2022}", "hellip" => "\u{2026}", "prime" => "\u{2032}",
    "Prime" => "\u{2033}", "oline" => "\u{203E}", "frasl" => "\u{2044}", "weierp" => "\u{2118}",
    "image" => "\u{2111}", "real" => "\u{211C}", "trade" => "\u{2122}", "alefsym" => "\u{2135}",
    "larr" => "\u{2190}", "uarr" => "\u{2191}", "rarr" => "\u{2192}", "darr" => "\u{2193}",
    "harr" => "\u{2194}", "crarr" => "\u{21B5}", "lArr" => "\u{21D0}", "uArr" => "\u{21D1}",
    "rArr" => "\u{21D2}", "dArr" => "\u{21D3}", "hArr" => "\u{21D4}", "forall" => "\u{2200}",
    "part" => "\u{2202}", "exist" => "\u{2203}", "empty" => "\u{2205}", "nabla" => "\u{2207}",
    "isin" => "\u{2208}", "notin" => "\u{2209}", "ni" => "\u{220B}", "prod" => "\u{220F}",
    "sum" => "\u{2211}", "minus" => "\u{2212}", "lowast" => "\u{2217}", "radic" => "\u{221A}",
    "prop" => "\u{221D}", "infin" => "\u{221E}", "ang" => "\u{2220}", "and" => "\u{2227}",
    "or" => "\u{2228}", "cap" => "\u{2229}", "cup" => "\u{222A}", "int" => "\u{222B}",
    "there4" => "\u{2234}", "sim" => "\u{223C}", "cong" => "\u{2245}", "asymp" => "\u{2248}",
    "ne" => "\u{2260}", "equiv" => "\u{2261}", "le" => "\u{2264}", "ge" => "\u{2265}",
    "sub" => "\u{2282}", "sup" => "\u{2283}", "nsub" => "\u{2284}", "sube" => "\u{2286}",
    "supe" => "\u{2287}", "oplus" => "\u{2295}", "otimes" => "\u{2297}", "perp" => "\u{22A5}",
    "sdot" => "\u{22C5}", "lceil" => "\u{2308}", "rceil" => "\u{2309}", "lfloor" => "\u{230A}",
    "rfloor" => "\u{230B}", "lang" => "\u{2329}", "rang" => "\u{232A}", "loz" => "\u{25CA}",
    "spades" => "\u{2660}", "clubs" => "\u{2663}", "hearts" => "\u{2665}", "diams" => "\u{2666}",
};

/// Look up the replacement text of a named entity (without `&` and `;`).
#[inline]
pub fn lookup_entity(name: &str) -> Option<&'static str> {
    HTML_ENTITIES.get(name).copied()
}

/// Decode a numeric character reference body such as `#233` or `#xE9`.
pub fn decode_char_ref(body: &str) -> Option<char> {
    let digits = body.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}

/// Replace HTML named and numeric character references in `text`.
///
/// Unknown or unterminated references are kept verbatim, the way browsers
/// treat stray ampersands.
///
/// # Examples
///
/// ```
/// use quire::common::xml::unescape_html;
/// assert_eq!(unescape_html("Caf&eacute; &amp; Bar"), "Café & Bar");
/// assert_eq!(unescape_html("&#8220;Q&#x201D;"), "\u{201C}Q\u{201D}");
/// assert_eq!(unescape_html("AT&T"), "AT&T");
/// ```
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    let Some(first) = memchr(b'&', text.as_bytes()) else {
        return Cow::Borrowed(text);
    };

    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..first]);
    let mut rest = &text[first..];

    while let Some(amp) = memchr(b'&', rest.as_bytes()) {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp + 1..];
        // Entity names are short; a distant ';' belongs to something else.
        let end = candidate
            .bytes()
            .take(32)
            .position(|b| b == b';');

        let decoded = end.and_then(|end| {
            let body = &candidate[..end];
            if body.starts_with('#') {
                decode_char_ref(body).map(|c| (Replacement::Char(c), end))
            } else {
                lookup_entity(body).map(|s| (Replacement::Str(s), end))
            }
        });

        match decoded {
            Some((replacement, end)) => {
                match replacement {
                    Replacement::Char(c) => out.push(c),
                    Replacement::Str(s) => out.push_str(s),
                }
                rest = &candidate[end + 1..];
            },
            None => {
                out.push('&');
                rest = candidate;
            },
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

enum Replacement {
    Char(char),
    Str(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_entity() {
        assert_eq!(lookup_entity("nbsp"), Some("\u{A0}"));
        assert_eq!(lookup_entity("hellip"), Some("\u{2026}"));
        assert_eq!(lookup_entity("Omega"), Some("\u{3A9}"));
        assert_eq!(lookup_entity("bogus"), None);
        // Case-sensitive, like the DTD.
        assert_eq!(lookup_entity("AMP"), None);
    }

    #[test]
    fn test_decode_char_ref() {
        assert_eq!(decode_char_ref("#65"), Some('A'));
        assert_eq!(decode_char_ref("#x41"), Some('A'));
        assert_eq!(decode_char_ref("#X2014"), Some('\u{2014}'));
        assert_eq!(decode_char_ref("#xD800"), None);
        assert_eq!(decode_char_ref("65"), None);
    }

    #[test]
    fn test_unescape_html_borrowed_without_refs() {
        assert!(matches!(unescape_html("plain text"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_unescape_html_mixed() {
        assert_eq!(
            unescape_html("&lt;b&gt; &copy;2024 &mdash; &#169;"),
            "<b> \u{A9}2024 \u{2014} \u{A9}"
        );
        assert_eq!(unescape_html("&unknown; & ;"), "&unknown; & ;");
        assert_eq!(unescape_html("trailing &"), "trailing &");
    }
}
