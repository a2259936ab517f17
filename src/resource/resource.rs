//! The package resource: one addressable entry with lazily loaded content.

use super::content::Content;
use super::reader::DecodedReader;
use super::store::StoreRef;
use crate::common::encoding::encoding_for_label;
use crate::common::{Error, Result};
use crate::media_type::{MediaType, determine_media_type};
use encoding_rs::Encoding;
use once_cell::sync::OnceCell;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Read};

/// A single entry of a publication package.
///
/// Equality and hashing consider the href only, matching how resources are
/// keyed inside a [`Resources`](super::Resources) collection.
///
/// # Examples
///
/// ```
/// use quire::resource::Resource;
///
/// let chapter = Resource::from_text("<html><title>One</title></html>", "ch1.xhtml");
/// assert!(chapter.is_initialized());
/// assert_eq!(chapter.size(), 31);
/// assert_eq!(chapter.encoding().map(|e| e.name()), Some("UTF-8"));
/// assert_eq!(chapter.read_text().unwrap(), "<html><title>One</title></html>");
/// ```
#[derive(Debug, Clone)]
pub struct Resource {
    id: Option<String>,
    href: String,
    media_type: Option<MediaType>,
    encoding: Option<&'static Encoding>,
    title: OnceCell<Option<String>>,
    content: Content,
}

impl Resource {
    fn with_content(href: String, content: Content) -> Self {
        let media_type = determine_media_type(&href);
        let encoding = default_encoding(media_type);
        Self {
            id: None,
            href,
            media_type,
            encoding,
            title: OnceCell::new(),
            content,
        }
    }

    /// An empty resource at `href`.
    pub fn new(href: impl Into<String>) -> Self {
        Self::with_content(href.into(), Content::default())
    }

    /// A resource holding `data`, with the media type taken from `href`.
    pub fn from_bytes(data: impl Into<Vec<u8>>, href: impl Into<String>) -> Self {
        Self::with_content(href.into(), Content::Loaded(data.into()))
    }

    /// A text resource stored as UTF-8.
    pub fn from_text(text: &str, href: impl Into<String>) -> Self {
        let mut resource = Self::from_bytes(text.as_bytes(), href);
        resource.encoding = Some(encoding_rs::UTF_8);
        resource
    }

    /// A resource holding everything `reader` yields.
    pub fn from_reader<R: Read>(mut reader: R, href: impl Into<String>) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Self::from_bytes(data, href))
    }

    /// Copy up to the recorded length of `source` from `reader`.
    ///
    /// When the stream delivers the full length the bytes are kept as a
    /// releasable cache of `source`. When it ends early the resource is left
    /// deferred and will read from `source` on first access.
    pub fn from_stream<R: Read>(
        reader: R,
        source: StoreRef,
        href: impl Into<String>,
    ) -> Result<Self> {
        let mut bytes = Vec::with_capacity(usize::try_from(source.len()).unwrap_or(0));
        reader.take(source.len()).read_to_end(&mut bytes)?;

        let content = if bytes.len() as u64 == source.len() {
            Content::Cached { source, bytes }
        } else {
            Content::Deferred(source)
        };
        Ok(Self::with_content(href.into(), content))
    }

    /// A lazy resource: nothing is read until the data is requested.
    pub fn lazy(source: StoreRef, href: impl Into<String>) -> Self {
        Self::with_content(href.into(), Content::Deferred(source))
    }

    /// Builder-style id assignment, see [`set_id`](Self::set_id).
    pub fn with_id(mut self, id: impl Into<String>) -> Result<Self> {
        self.set_id(id)?;
        Ok(self)
    }

    /// Builder-style encoding assignment.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    #[inline]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Set the id. It must be a valid XML name without a colon.
    pub fn set_id(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if !super::collection::is_valid_ncname(&id) {
            return Err(Error::InvalidId(id));
        }
        self.id = Some(id);
        Ok(())
    }

    pub(crate) fn set_id_unchecked(&mut self, id: String) {
        self.id = Some(id);
    }

    /// Location of the entry within the package, e.g. `OEBPS/ch1.xhtml`.
    #[inline]
    pub fn href(&self) -> &str {
        &self.href
    }

    pub(crate) fn set_href(&mut self, href: String) {
        self.href = href;
    }

    #[inline]
    pub fn media_type(&self) -> Option<MediaType> {
        self.media_type
    }

    pub fn set_media_type(&mut self, media_type: Option<MediaType>) {
        self.media_type = media_type;
    }

    /// True for XHTML/HTML content documents.
    #[inline]
    pub fn is_markup(&self) -> bool {
        self.media_type.is_some_and(|m| m.is_markup())
    }

    /// Declared or assumed character encoding; `None` for binary content.
    #[inline]
    pub fn encoding(&self) -> Option<&'static Encoding> {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: Option<&'static Encoding>) {
        self.encoding = encoding;
    }

    /// Set the encoding from a label such as `"ISO-8859-1"`.
    pub fn set_encoding_label(&mut self, label: &str) -> Result<()> {
        self.encoding = Some(encoding_for_label(label)?);
        Ok(())
    }

    /// The memoised title, if one was computed or set.
    ///
    /// `Some("")` is a title that was found and empty; `None` means none was
    /// found or no extraction has run yet.
    #[inline]
    pub fn title(&self) -> Option<&str> {
        self.title.get().and_then(|t| t.as_deref())
    }

    /// Whether a title lookup result (found or not) is memoised.
    #[inline]
    pub fn has_title_result(&self) -> bool {
        self.title.get().is_some()
    }

    /// Overwrite the memoised title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = OnceCell::with_value(Some(title.into()));
    }

    /// Forget the memoised title so the next extraction scans again.
    pub fn clear_title(&mut self) {
        self.title = OnceCell::new();
    }

    pub(crate) fn title_cell(&self) -> &OnceCell<Option<String>> {
        &self.title
    }

    #[inline]
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// The authoritative bytes.
    ///
    /// In-memory content is borrowed. Deferred content is read from its store
    /// on every call and not kept; use [`load`](Self::load) to cache it.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] if the store cannot be opened or read,
    /// [`Error::ShortRead`] if it holds fewer bytes than recorded.
    pub fn data(&self) -> Result<Cow<'_, [u8]>> {
        match &self.content {
            Content::Loaded(bytes) | Content::Cached { bytes, .. } => Ok(Cow::Borrowed(bytes)),
            Content::Deferred(source) => source.read_all().map(Cow::Owned),
        }
    }

    /// Read deferred content into memory, keeping the store reference so the
    /// bytes can be released again.
    pub fn load(&mut self) -> Result<()> {
        if let Content::Deferred(source) = &self.content {
            let bytes = source.read_all()?;
            let source = source.clone();
            self.content = Content::Cached { source, bytes };
        }
        Ok(())
    }

    /// Replace the content with `data`. Any store reference is dropped.
    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.content = Content::Loaded(data.into());
    }

    /// Release cached bytes of a store-backed resource.
    ///
    /// No-op for resources without a store and for resources whose bytes are
    /// already released.
    pub fn release(&mut self) {
        self.content.release();
    }

    /// True iff the bytes are held in memory.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.content.is_in_memory()
    }

    /// Size in bytes. Never triggers a load.
    #[inline]
    pub fn size(&self) -> u64 {
        self.content.len()
    }

    /// The content as a UTF-8 stream, decoded with the resource encoding as
    /// hint.
    pub fn reader(&self) -> Result<DecodedReader<Cursor<Cow<'_, [u8]>>>> {
        let data = self.data()?;
        DecodedReader::new(Cursor::new(data), self.encoding)
    }

    /// The whole content decoded to a string.
    pub fn read_text(&self) -> Result<String> {
        self.reader()?.into_string()
    }
}

fn default_encoding(media_type: Option<MediaType>) -> Option<&'static Encoding> {
    match media_type {
        Some(m) if m.text => Some(encoding_rs::UTF_8),
        _ => None,
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.href == other.href
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.href.hash(state);
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resource[id: {}, title: {}, encoding: {}, mediaType: {}, href: {}, size: {}]",
            self.id.as_deref().unwrap_or("<none>"),
            self.title().unwrap_or("<none>"),
            self.encoding.map_or("<none>", |e| e.name()),
            self.media_type.map_or("<none>", |m| m.name),
            self.href,
            self.size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_type;
    use crate::resource::store::{MemoryStore, ResourceStore};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn lazy_fixture(data: &[u8]) -> (Arc<MemoryStore>, Resource) {
        let store = Arc::new(MemoryStore::new());
        store.insert("OEBPS/ch1.xhtml", data.to_vec());
        let as_dyn: Arc<dyn ResourceStore> = store.clone();
        let source = StoreRef::new(as_dyn, "OEBPS/ch1.xhtml", data.len() as u64);
        (store, Resource::lazy(source, "ch1.xhtml"))
    }

    #[test]
    fn test_new_resource_defaults() {
        let resource = Resource::new("chapter1.html");
        assert_eq!(resource.media_type(), Some(media_type::XHTML));
        assert_eq!(resource.encoding(), Some(encoding_rs::UTF_8));
        assert_eq!(resource.size(), 0);
        assert!(resource.is_initialized());
        assert!(resource.id().is_none());

        let image = Resource::from_bytes(vec![1, 2, 3], "cover.png");
        assert_eq!(image.encoding(), None);
        assert!(!image.is_markup());

        let unknown = Resource::new("notes.bin");
        assert_eq!(unknown.media_type(), None);
    }

    #[test]
    fn test_lazy_reads_every_time_without_caching() {
        let (store, resource) = lazy_fixture(b"<p>v1</p>");
        assert!(!resource.is_initialized());
        assert_eq!(resource.size(), 9);
        assert_eq!(resource.data().unwrap().as_ref(), b"<p>v1</p>");
        assert!(!resource.is_initialized());

        // Re-read picks up the replaced entry.
        store.insert("OEBPS/ch1.xhtml", b"<p>v2</p>".to_vec());
        assert_eq!(resource.data().unwrap().as_ref(), b"<p>v2</p>");
    }

    #[test]
    fn test_lazy_short_read_and_missing_store_entry() {
        let (store, resource) = lazy_fixture(b"<p>v1</p>");
        store.insert("OEBPS/ch1.xhtml", b"<p>".to_vec());
        assert!(matches!(resource.data(), Err(Error::ShortRead { .. })));

        store.remove("OEBPS/ch1.xhtml");
        assert!(matches!(
            resource.data(),
            Err(Error::StoreUnavailable { .. })
        ));
        assert!(resource.reader().is_err());
    }

    #[test]
    fn test_load_then_release_reloads() {
        let (store, mut resource) = lazy_fixture(b"<p>v1</p>");
        resource.load().unwrap();
        assert!(resource.is_initialized());

        // Cached bytes are authoritative while loaded.
        store.insert("OEBPS/ch1.xhtml", b"<p>v2</p>".to_vec());
        assert_eq!(resource.data().unwrap().as_ref(), b"<p>v1</p>");

        resource.release();
        assert!(!resource.is_initialized());
        assert_eq!(resource.data().unwrap().as_ref(), b"<p>v2</p>");
    }

    #[test]
    fn test_release_is_noop_for_eager_resources() {
        let mut resource = Resource::from_bytes(b"abc".to_vec(), "a.css");
        resource.release();
        assert!(resource.is_initialized());
        assert_eq!(resource.data().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_set_data_detaches_store() {
        let (_store, mut resource) = lazy_fixture(b"<p>v1</p>");
        resource.set_data(b"<p>new</p>".to_vec());
        assert!(resource.content().source().is_none());
        resource.release();
        assert!(resource.is_initialized());
        assert_eq!(resource.data().unwrap().as_ref(), b"<p>new</p>");
        assert_eq!(resource.size(), 10);
    }

    #[test]
    fn test_from_stream_full_and_short() {
        let (store, _) = lazy_fixture(b"0123456789");
        let as_dyn: Arc<dyn ResourceStore> = store.clone();
        let source = StoreRef::new(as_dyn, "OEBPS/ch1.xhtml", 10);

        let full = Resource::from_stream(&b"0123456789extra"[..], source.clone(), "a.xhtml").unwrap();
        assert!(full.is_initialized());
        assert_eq!(full.data().unwrap().as_ref(), b"0123456789");

        let short = Resource::from_stream(&b"0123"[..], source, "a.xhtml").unwrap();
        assert!(!short.is_initialized());
        assert_eq!(short.size(), 10);
        assert_eq!(short.data().unwrap().as_ref(), b"0123456789");
    }

    #[test]
    fn test_reader_uses_encoding_hint() {
        let mut resource = Resource::from_bytes(b"<t>\xE9</t>".to_vec(), "a.xhtml");
        resource.set_encoding_label("ISO-8859-1").unwrap();
        assert_eq!(resource.read_text().unwrap(), "<t>é</t>");
        assert!(resource.set_encoding_label("klingon").is_err());
    }

    #[test]
    fn test_set_id_validation() {
        let mut resource = Resource::new("a.xhtml");
        assert!(resource.set_id("chapter-1").is_ok());
        assert_eq!(resource.id(), Some("chapter-1"));
        assert!(matches!(resource.set_id("1abc"), Err(Error::InvalidId(_))));
        assert!(resource.set_id("a:b").is_err());
        assert_eq!(resource.id(), Some("chapter-1"));
    }

    #[test]
    fn test_title_memo_and_overwrite() {
        let mut resource = Resource::new("a.xhtml");
        assert!(!resource.has_title_result());
        resource.set_title("First");
        assert_eq!(resource.title(), Some("First"));
        resource.set_title("");
        assert_eq!(resource.title(), Some(""));
        resource.clear_title();
        assert_eq!(resource.title(), None);
    }

    #[test]
    fn test_display() {
        let resource = Resource::from_text("abc", "style.css").with_id("css").unwrap();
        let text = resource.to_string();
        assert!(text.contains("id: css"));
        assert!(text.contains("mediaType: text/css"));
        assert!(text.contains("size: 3"));
    }

    proptest! {
        #[test]
        fn prop_eager_data_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let resource = Resource::from_bytes(data.clone(), "blob.png");
            let loaded = resource.data().unwrap();
            prop_assert_eq!(loaded.as_ref(), data.as_slice());
            prop_assert_eq!(resource.size(), data.len() as u64);
        }

        #[test]
        fn prop_equality_is_href_only(
            href in "[a-z]{1,8}\\.xhtml",
            a in proptest::collection::vec(any::<u8>(), 0..32),
            b in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            let first = Resource::from_bytes(a, href.clone());
            let mut second = Resource::from_bytes(b, href);
            second.set_title("different");
            prop_assert_eq!(&first, &second);

            let mut set = HashSet::new();
            set.insert(first);
            prop_assert!(!set.insert(second));
        }
    }
}
