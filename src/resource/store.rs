//! External stores that back lazily loaded resources.
//!
//! A store hands out a fresh byte stream per request. Opening the stream is
//! the "open" step, reading it is `Read`, and dropping it closes it; no
//! handle outlives a single load.

use crate::common::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Source of entry bytes for lazy resources.
pub trait ResourceStore: Send + Sync {
    /// Open a fresh stream over the entry `name`.
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Human-readable location of the store, used in diagnostics.
    fn describe(&self) -> String {
        String::from("<store>")
    }
}

/// Reference to one entry of a store together with its recorded length.
#[derive(Clone)]
pub struct StoreRef {
    store: Arc<dyn ResourceStore>,
    name: String,
    len: u64,
}

impl StoreRef {
    pub fn new(store: Arc<dyn ResourceStore>, name: impl Into<String>, len: u64) -> Self {
        Self {
            store,
            name: name.into(),
            len,
        }
    }

    /// Entry name inside the store.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length recorded when the reference was created.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read exactly the recorded length from a freshly opened stream.
    ///
    /// Fewer bytes than recorded is a [`Error::ShortRead`]; trailing bytes
    /// beyond the recorded length are ignored.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let stream = self
            .store
            .open(&self.name)
            .map_err(|source| Error::StoreUnavailable {
                name: self.name.clone(),
                source,
            })?;

        let data = read_declared(stream, self.len).map_err(|source| Error::StoreUnavailable {
            name: self.name.clone(),
            source,
        })?;

        if (data.len() as u64) < self.len {
            return Err(Error::ShortRead {
                name: self.name.clone(),
                expected: self.len,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }
}

impl fmt::Debug for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRef")
            .field("store", &self.store.describe())
            .field("name", &self.name)
            .field("len", &self.len)
            .finish()
    }
}

/// Largest up-front allocation made on the strength of a declared length.
const PREALLOCATE_LIMIT: u64 = 1 << 20;

/// Read at most `declared` bytes from `reader`.
///
/// Declared lengths come from container metadata and are not trusted for
/// allocation: the buffer starts at no more than [`PREALLOCATE_LIMIT`] and
/// grows only with bytes actually read.
pub(crate) fn read_declared<R: Read>(reader: R, declared: u64) -> io::Result<Vec<u8>> {
    let capacity = declared.min(PREALLOCATE_LIMIT) as usize;
    let mut data = Vec::with_capacity(capacity);
    reader.take(declared).read_to_end(&mut data)?;
    Ok(data)
}

/// Entries are files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an entry name to a path, refusing names that escape the root.
    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("entry name escapes store root: {name}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl ResourceStore for DirectoryStore {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(self.resolve(name)?)?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Entries held in memory, keyed by name.
///
/// Entries can be replaced or removed after resources referencing them were
/// created, which makes the store useful for exercising reload behaviour.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        let data: Vec<u8> = data.into();
        self.entries.write().insert(name.into(), Arc::from(data));
    }

    /// Remove an entry, returning whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    /// Recorded length of an entry.
    pub fn entry_len(&self, name: &str) -> Option<u64> {
        self.entries.read().get(name).map(|d| d.len() as u64)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ResourceStore for MemoryStore {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let data = self.entries.read().get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no entry named {name}"))
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn describe(&self) -> String {
        String::from("<memory>")
    }
}

#[cfg(feature = "archive")]
pub use archive::{ArchiveEntry, ArchiveStore};

#[cfg(feature = "archive")]
mod archive {
    use super::{ResourceStore, StoreRef};
    use crate::common::Result;
    use crate::resource::{Resource, Resources};
    use std::fs::File;
    use std::io::{self, Cursor, Read};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    /// One file entry listed in an archive.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ArchiveEntry {
        pub name: String,
        pub size: u64,
    }

    /// Entries of a ZIP container (an `.epub` file).
    ///
    /// The archive file is re-opened for every read and closed again once the
    /// entry is decompressed, so no file handle is held between loads.
    #[derive(Debug, Clone)]
    pub struct ArchiveStore {
        path: PathBuf,
    }

    impl ArchiveStore {
        /// Create a store over the archive at `path`.
        ///
        /// The file is opened once to check that it is a readable archive.
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            let path = path.as_ref().to_path_buf();
            zip::ZipArchive::new(File::open(&path)?)?;
            Ok(Self { path })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// List the file entries (directories excluded) with their sizes.
        pub fn entries(&self) -> Result<Vec<ArchiveEntry>> {
            let mut archive = zip::ZipArchive::new(File::open(&self.path)?)?;
            let mut entries = Vec::with_capacity(archive.len());
            for i in 0..archive.len() {
                let file = archive.by_index(i)?;
                if file.is_dir() {
                    continue;
                }
                entries.push(ArchiveEntry {
                    name: file.name().to_string(),
                    size: file.size(),
                });
            }
            Ok(entries)
        }

        /// Build a collection of lazy resources, one per file entry.
        ///
        /// Entries whose name does not start with `base` are skipped; the
        /// remainder of the name becomes the resource href. Use `""` to take
        /// every entry.
        pub fn lazy_resources(self: &Arc<Self>, base: &str) -> Result<Resources> {
            let mut resources = Resources::new();
            for entry in self.entries()? {
                let Some(href) = entry.name.strip_prefix(base) else {
                    continue;
                };
                if href.is_empty() {
                    continue;
                }
                let store: Arc<dyn ResourceStore> = self.clone();
                let source = StoreRef::new(store, entry.name.clone(), entry.size);
                resources.add(Resource::lazy(source, href));
            }
            Ok(resources)
        }

        /// Reference to one entry, for building a single lazy resource.
        pub fn entry_ref(self: &Arc<Self>, name: &str) -> Result<StoreRef> {
            let mut archive = zip::ZipArchive::new(File::open(&self.path)?)?;
            let size = archive.by_name(name)?.size();
            let store: Arc<dyn ResourceStore> = self.clone();
            Ok(StoreRef::new(store, name, size))
        }
    }

    impl ResourceStore for ArchiveStore {
        fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
            let mut archive = zip::ZipArchive::new(File::open(&self.path)?)
                .map_err(io::Error::other)?;
            let file = archive.by_name(name).map_err(|e| match e {
                zip::result::ZipError::FileNotFound => {
                    io::Error::new(io::ErrorKind::NotFound, format!("no entry named {name}"))
                },
                other => io::Error::other(other),
            })?;
            let declared = file.size();
            let data = super::read_declared(file, declared)?;
            Ok(Box::new(Cursor::new(data)))
        }

        fn describe(&self) -> String {
            self.path.display().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_ref(data: &[u8], len: u64) -> (Arc<MemoryStore>, StoreRef) {
        let store = Arc::new(MemoryStore::new());
        store.insert("entry", data.to_vec());
        let as_dyn: Arc<dyn ResourceStore> = store.clone();
        (store, StoreRef::new(as_dyn, "entry", len))
    }

    #[test]
    fn test_read_all_exact() {
        let (_, source) = memory_ref(b"hello", 5);
        assert_eq!(source.read_all().unwrap(), b"hello");
    }

    #[test]
    fn test_read_declared_does_not_trust_length() {
        let data = read_declared(&b"tiny entry"[..], u64::MAX).unwrap();
        assert_eq!(data, b"tiny entry");
        assert!(data.capacity() <= PREALLOCATE_LIMIT as usize);

        let data = read_declared(&b"tiny entry"[..], 4).unwrap();
        assert_eq!(data, b"tiny");
    }

    #[test]
    fn test_read_all_with_inflated_length() {
        let (_, source) = memory_ref(b"hello", u64::from(u32::MAX) * 16);
        match source.read_all() {
            Err(Error::ShortRead { actual, .. }) => assert_eq!(actual, 5),
            other => panic!("expected short read, got {other:?}"),
        }
    }

    #[test]
    fn test_read_all_ignores_trailing_bytes() {
        let (_, source) = memory_ref(b"hello world", 5);
        assert_eq!(source.read_all().unwrap(), b"hello");
    }

    #[test]
    fn test_read_all_short() {
        let (_, source) = memory_ref(b"hi", 5);
        match source.read_all() {
            Err(Error::ShortRead {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 5);
                assert_eq!(actual, 2);
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_read_all_missing_entry() {
        let (store, source) = memory_ref(b"hello", 5);
        assert!(store.remove("entry"));
        assert!(matches!(
            source.read_all(),
            Err(Error::StoreUnavailable { ref name, .. }) if name == "entry"
        ));
    }

    #[test]
    fn test_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("OEBPS")).unwrap();
        std::fs::write(dir.path().join("OEBPS/ch1.xhtml"), b"<html/>").unwrap();

        let store = DirectoryStore::new(dir.path());
        let mut out = Vec::new();
        store
            .open("OEBPS/ch1.xhtml")
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"<html/>");

        assert!(store.open("../outside").is_err());
        assert!(store.open("OEBPS/missing.xhtml").is_err());
    }

    #[cfg(feature = "archive")]
    #[test]
    fn test_archive_store_lazy_resources() {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = SimpleFileOptions::default();
            writer.start_file("mimetype", options).unwrap();
            writer.write_all(b"application/epub+zip").unwrap();
            writer.add_directory("OEBPS/", options).unwrap();
            writer.start_file("OEBPS/ch1.xhtml", options).unwrap();
            writer
                .write_all(b"<html><head><title>One</title></head></html>")
                .unwrap();
            writer.start_file("OEBPS/cover.png", options).unwrap();
            writer.write_all(&[0x89, b'P', b'N', b'G']).unwrap();
            writer.finish().unwrap();
        }

        let store = Arc::new(ArchiveStore::open(&path).unwrap());
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 3);

        let resources = store.lazy_resources("OEBPS/").unwrap();
        assert_eq!(resources.len(), 2);

        let chapter = resources.get("ch1.xhtml").unwrap();
        assert!(!chapter.is_initialized());
        assert_eq!(chapter.size(), 44);
        assert_eq!(
            chapter.data().unwrap().as_ref(),
            b"<html><head><title>One</title></head></html>"
        );
        // Lazy reads are not cached.
        assert!(!chapter.is_initialized());

        let cover = resources.get("cover.png").unwrap();
        assert_eq!(cover.id(), Some("image_1"));
    }
}
