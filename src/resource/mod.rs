//! Package resources and their content.
//!
//! A [`Resource`] is one entry of a publication package: a content document,
//! stylesheet, image or font. Its bytes may be held in memory or read on
//! demand from a [`ResourceStore`]. Text is decoded through
//! [`DecodedReader`], which works out the real encoding of documents whose
//! metadata is missing or wrong.

pub mod collection;
pub mod content;
pub mod reader;
#[allow(clippy::module_inception)]
pub mod resource;
pub mod store;
pub mod title;

pub use collection::Resources;
pub use content::Content;
pub use reader::{DecodedReader, EncodingSource};
pub use resource::Resource;
#[cfg(feature = "archive")]
pub use store::{ArchiveEntry, ArchiveStore};
pub use store::{DirectoryStore, MemoryStore, ResourceStore, StoreRef};
pub use title::{TitleExtractor, scan_title};
