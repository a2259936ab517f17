//! Storage states of a resource's bytes.

use super::store::StoreRef;

/// Where a resource's bytes currently live.
///
/// The three states are exclusive, so "data present but no store" and
/// "store present but data cached" never need to be inferred from optional
/// fields.
#[derive(Debug, Clone)]
pub enum Content {
    /// Authoritative in-memory bytes with no store behind them.
    Loaded(Vec<u8>),
    /// In-memory copy of a store entry; can be released back to `Deferred`.
    Cached { source: StoreRef, bytes: Vec<u8> },
    /// Only the store reference is held; bytes are read on demand.
    Deferred(StoreRef),
}

impl Content {
    /// In-memory bytes, if any.
    #[inline]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Content::Loaded(bytes) | Content::Cached { bytes, .. } => Some(bytes),
            Content::Deferred(_) => None,
        }
    }

    /// Store reference, if the content is backed by one.
    #[inline]
    pub fn source(&self) -> Option<&StoreRef> {
        match self {
            Content::Loaded(_) => None,
            Content::Cached { source, .. } | Content::Deferred(source) => Some(source),
        }
    }

    #[inline]
    pub fn is_in_memory(&self) -> bool {
        !matches!(self, Content::Deferred(_))
    }

    /// In-memory length, or the recorded length of a deferred entry.
    pub fn len(&self) -> u64 {
        match self {
            Content::Loaded(bytes) | Content::Cached { bytes, .. } => bytes.len() as u64,
            Content::Deferred(source) => source.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop cached bytes, keeping the store reference.
    ///
    /// Returns `true` if anything was released.
    pub(crate) fn release(&mut self) -> bool {
        let Content::Cached { source, .. } = self else {
            return false;
        };
        let source = source.clone();
        *self = Content::Deferred(source);
        true
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Loaded(Vec::new())
    }
}
