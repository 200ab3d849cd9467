//! Per-handle memoization of derived blob content.

use crate::blob::MetadataRecord;
use crate::error::{Error, Result};
use crate::layout::BlobLocation;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

type ReadFn = dyn Fn(&Path, &MetadataRecord) -> Result<Vec<u8>> + Send + Sync;

/// A named transform applied to stored content.
///
/// Cached results are keyed by the reader's `id`, so two readers with the
/// same id must compute the same thing.
#[derive(Clone)]
pub struct Reader {
    id: String,
    func: Arc<ReadFn>,
}

impl Reader {
    /// A reader that receives the content path and the item's metadata.
    pub fn new<F>(id: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Path, &MetadataRecord) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            func: Arc::new(func),
        }
    }

    /// A reader that transforms the content as UTF-8 text.
    pub fn text<F>(id: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let id = id.into();
        let reader_id = id.clone();
        Self::new(id, move |path, _meta| {
            let text = fs::read_to_string(path)
                .map_err(|e| Error::reader(&reader_id, e.to_string()))?;
            Ok(func(&text).into_bytes())
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn apply(&self, path: &Path, meta: &MetadataRecord) -> Result<Vec<u8>> {
        (self.func)(path, meta)
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader").field("id", &self.id).finish()
    }
}

/// Derived content keyed by (reader id, blob location).
///
/// Blob content never changes once written, so entries are never invalidated
/// short of [`ReadCache::clear`].
#[derive(Debug, Default)]
pub struct ReadCache {
    entries: RwLock<HashMap<(String, BlobLocation), Arc<[u8]>>>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the blob at `location`, applying `reader` if given.
    ///
    /// `metadata` resolves the item's metadata record and is only called when
    /// the value is not already cached. Without a reader the record is still
    /// resolved, so a missing item fails the same way with or without one,
    /// and the raw bytes are read from disk on every call without caching.
    /// With a reader, the first call runs it and later calls return the
    /// stored result without touching the filesystem.
    pub fn read_through<M>(
        &self,
        location: &BlobLocation,
        reader: Option<&Reader>,
        metadata: M,
    ) -> Result<Arc<[u8]>>
    where
        M: FnOnce() -> Result<MetadataRecord>,
    {
        let Some(reader) = reader else {
            metadata()?;
            return Ok(fs::read(location.content_path())?.into());
        };

        let key = (reader.id().to_string(), location.clone());
        if let Some(hit) = self.entries.read().get(&key) {
            return Ok(Arc::clone(hit));
        }

        debug!(
            "Cache miss for reader '{}' at {}",
            reader.id(),
            location.dir().display()
        );
        let metadata = metadata()?;
        let derived: Arc<[u8]> = reader.apply(&location.content_path(), &metadata)?.into();

        // Another thread may have filled the slot meanwhile; keep the first value.
        let mut entries = self.entries.write();
        Ok(Arc::clone(entries.entry(key).or_insert(derived)))
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached result.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Fingerprint;
    use crate::tags::TagSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn stored(root: &Path, content: &[u8]) -> BlobLocation {
        let location = BlobLocation::locate(root, &Fingerprint::of(content)).unwrap();
        fs::write(location.content_path(), content).unwrap();
        location
    }

    fn meta() -> MetadataRecord {
        MetadataRecord::new("item", TagSet::new())
    }

    fn counting_upper(calls: Arc<AtomicUsize>) -> Reader {
        Reader::text("upper", move |s| {
            calls.fetch_add(1, Ordering::SeqCst);
            s.to_uppercase()
        })
    }

    #[test]
    fn test_reader_runs_once() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"this content");
        let cache = ReadCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let reader = counting_upper(calls.clone());

        let first = cache.read_through(&location, Some(&reader), || Ok(meta())).unwrap();
        let second = cache.read_through(&location, Some(&reader), || Ok(meta())).unwrap();

        assert_eq!(&*first, b"THIS CONTENT");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_does_not_touch_filesystem() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"content");
        let cache = ReadCache::new();
        let reader = Reader::text("upper", |s| s.to_uppercase());

        cache.read_through(&location, Some(&reader), || Ok(meta())).unwrap();
        fs::remove_file(location.content_path()).unwrap();

        let cached = cache.read_through(&location, Some(&reader), || Ok(meta())).unwrap();
        assert_eq!(&*cached, b"CONTENT");
    }

    #[test]
    fn test_hit_skips_metadata_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"content");
        let cache = ReadCache::new();
        let reader = Reader::text("upper", |s| s.to_uppercase());
        let lookups = AtomicUsize::new(0);
        let lookup = || -> Result<MetadataRecord> {
            lookups.fetch_add(1, Ordering::SeqCst);
            Ok(meta())
        };

        cache.read_through(&location, Some(&reader), lookup).unwrap();
        cache.read_through(&location, Some(&reader), lookup).unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 1);

        let cached = cache
            .read_through(&location, Some(&reader), || Err(Error::not_found("content")))
            .unwrap();
        assert_eq!(&*cached, b"CONTENT");
    }

    #[test]
    fn test_missing_metadata_fails_raw_read() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"raw");
        let cache = ReadCache::new();

        assert!(matches!(
            cache.read_through(&location, None, || Err(Error::not_found("raw"))),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_equal_ids_share_entries() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"content");
        let cache = ReadCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .read_through(&location, Some(&counting_upper(calls.clone())), || Ok(meta()))
            .unwrap();
        cache
            .read_through(&location, Some(&counting_upper(calls.clone())), || Ok(meta()))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_readers_cached_separately() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"Content");
        let cache = ReadCache::new();
        let upper = Reader::text("upper", |s| s.to_uppercase());
        let lower = Reader::text("lower", |s| s.to_lowercase());

        let a = cache.read_through(&location, Some(&upper), || Ok(meta())).unwrap();
        let b = cache.read_through(&location, Some(&lower), || Ok(meta())).unwrap();

        assert_eq!(&*a, b"CONTENT");
        assert_eq!(&*b, b"content");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_raw_reads_are_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"raw");
        let cache = ReadCache::new();

        assert_eq!(&*cache.read_through(&location, None, || Ok(meta())).unwrap(), b"raw");
        assert!(cache.is_empty());

        fs::remove_file(location.content_path()).unwrap();
        assert!(matches!(
            cache.read_through(&location, None, || Ok(meta())),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_reader_receives_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"body");
        let cache = ReadCache::new();
        let reader = Reader::new("named", |path, meta| {
            let mut out = meta.name.clone().into_bytes();
            out.push(b':');
            out.extend(fs::read(path)?);
            Ok(out)
        });

        let derived = cache.read_through(&location, Some(&reader), || Ok(meta())).unwrap();
        assert_eq!(&*derived, b"item:body");
    }

    #[test]
    fn test_failed_reader_caches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"body");
        let cache = ReadCache::new();
        let reader = Reader::new("broken", |_, _| Err(Error::reader("broken", "nope")));

        assert!(matches!(
            cache.read_through(&location, Some(&reader), || Ok(meta())),
            Err(Error::Reader { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let location = stored(temp_dir.path(), b"body");
        let cache = ReadCache::new();
        let reader = Reader::text("upper", |s| s.to_uppercase());

        cache.read_through(&location, Some(&reader), || Ok(meta())).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
