//! Encoding-aware decoding of text resources.
//!
//! [`DecodedReader`] turns raw resource bytes into a UTF-8 byte stream. The
//! encoding is chosen, in order of precedence, from a byte-order mark, an
//! in-document declaration found in a bounded prefix, the caller's hint,
//! and finally UTF-8.

use crate::common::bom::{BomKind, detect_bom};
use crate::common::encoding::{guess_utf16_without_bom, sniff_declared_encoding};
use crate::common::{Error, Result};
use encoding_rs::{CoderResult, Decoder, Encoding};
use std::fmt;
use std::io::{self, Read};

/// Number of leading bytes inspected for a BOM or a declaration.
pub const SNIFF_LEN: usize = 4096;

/// Size of the raw chunks pulled from the underlying reader.
const CHUNK_LEN: usize = 8192;

/// How the encoding of a [`DecodedReader`] was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingSource {
    ByteOrderMark,
    /// XML declaration, HTML `<meta>` or the byte pattern of BOM-less UTF-16
    Declaration,
    Hint,
    Default,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EncodingSource::ByteOrderMark => "byte order mark",
            EncodingSource::Declaration => "declaration",
            EncodingSource::Hint => "hint",
            EncodingSource::Default => "default",
        };
        f.write_str(s)
    }
}

/// A `Read` adapter producing UTF-8 from text in any supported encoding.
///
/// The sniffed prefix is replayed to the decoder, so consumers see the whole
/// content exactly once; only a byte-order mark is dropped. Multi-byte
/// sequences split across chunk boundaries are carried over by the
/// underlying `encoding_rs` decoder.
pub struct DecodedReader<R> {
    inner: R,
    encoding: &'static Encoding,
    source: EncodingSource,
    decoder: Decoder,
    /// Sniffed bytes not yet handed to the decoder
    prefix: Option<Vec<u8>>,
    raw: Vec<u8>,
    decoded: String,
    decoded_pos: usize,
    finished: bool,
}

impl<R: Read> DecodedReader<R> {
    /// Wrap `inner`, sniffing its encoding.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedEncoding`] for UTF-32 input (detected by its BOM),
    /// [`Error::Io`] if the prefix cannot be read.
    pub fn new(mut inner: R, hint: Option<&'static Encoding>) -> Result<Self> {
        let mut prefix = read_prefix(&mut inner, SNIFF_LEN)?;

        let (encoding, source) = match detect_bom(&prefix) {
            Some(bom @ (BomKind::Utf32Le | BomKind::Utf32Be)) => {
                return Err(Error::UnsupportedEncoding(format!(
                    "UTF-32 ({:?} byte order mark)",
                    bom
                )));
            },
            Some(bom) => {
                prefix.drain(..bom.len());
                // Checked above: every remaining BOM kind has a decoder.
                let encoding = bom.encoding().unwrap_or(encoding_rs::UTF_8);
                (encoding, EncodingSource::ByteOrderMark)
            },
            None => match guess_utf16_without_bom(&prefix)
                .or_else(|| sniff_declared_encoding(&prefix))
            {
                Some(encoding) => (encoding, EncodingSource::Declaration),
                None => match hint {
                    Some(hint) => (hint, EncodingSource::Hint),
                    None => (encoding_rs::UTF_8, EncodingSource::Default),
                },
            },
        };

        Ok(Self {
            inner,
            encoding,
            source,
            decoder: encoding.new_decoder_without_bom_handling(),
            prefix: Some(prefix),
            raw: Vec::new(),
            decoded: String::new(),
            decoded_pos: 0,
            finished: false,
        })
    }

    /// The encoding the content is decoded from.
    #[inline]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// How [`encoding`](Self::encoding) was chosen.
    #[inline]
    pub fn encoding_source(&self) -> EncodingSource {
        self.source
    }

    /// Decode the remaining content into a string.
    pub fn into_string(mut self) -> Result<String> {
        let mut text = String::new();
        self.read_to_string(&mut text)?;
        Ok(text)
    }

    /// Decode the next raw chunk into `self.decoded`.
    fn fill(&mut self) -> io::Result<()> {
        let (len, last) = match self.prefix.take() {
            Some(prefix) => {
                self.raw = prefix;
                (self.raw.len(), false)
            },
            None => {
                self.raw.resize(CHUNK_LEN, 0);
                let n = read_retrying(&mut self.inner, &mut self.raw)?;
                (n, n == 0)
            },
        };

        self.decoded.clear();
        self.decoded_pos = 0;

        let mut consumed = 0;
        loop {
            let remaining = len - consumed;
            let needed = self
                .decoder
                .max_utf8_buffer_length(remaining)
                .unwrap_or(remaining.saturating_mul(3))
                .max(16);
            self.decoded.reserve(needed);

            let (result, read, _) =
                self.decoder
                    .decode_to_string(&self.raw[consumed..len], &mut self.decoded, last);
            consumed += read;
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }

        if last {
            self.finished = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let pending = &self.decoded.as_bytes()[self.decoded_pos..];
            if !pending.is_empty() {
                let n = pending.len().min(buf.len());
                buf[..n].copy_from_slice(&pending[..n]);
                self.decoded_pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

impl<R> fmt::Debug for DecodedReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedReader")
            .field("encoding", &self.encoding.name())
            .field("source", &self.source)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Read until `limit` bytes are buffered or the reader is exhausted.
fn read_prefix<R: Read>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut prefix = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = read_retrying(reader, &mut prefix[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    prefix.truncate(filled);
    Ok(prefix)
}

fn read_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
