//! Persistence of the tag index.
//!
//! The index lives in a single file shared by every blob in the store. Every
//! update runs as lock, load, mutate, replace. Readers never lock: the file is
//! only ever swapped in whole by an atomic rename, so a reader sees either the
//! previous or the next complete index.

use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use crate::lock::Gate;
use crate::tags::{TagIndex, TagSet, TagTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File name of the index inside the store root.
pub const INDEX_FILE: &str = "index.json";

/// Current on-disk index format version.
pub const INDEX_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, I> {
    version: u32,
    index: &'a I,
}

#[derive(Deserialize)]
struct RawEnvelope {
    version: u32,
    index: serde_json::Value,
}

/// Lock-protected access to the persisted index.
#[derive(Debug, Clone)]
pub struct IndexStore<I = TagTable> {
    path: PathBuf,
    gate: Gate,
    timeout: Duration,
    _index: PhantomData<fn() -> I>,
}

impl<I: TagIndex> IndexStore<I> {
    /// Create an accessor for the index at `path`, guarded by `gate`.
    pub fn new(path: impl Into<PathBuf>, gate: Gate, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            gate,
            timeout,
            _index: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Associate `tags` with `fingerprint` in the persisted index.
    pub fn record(&self, tags: &TagSet, fingerprint: Fingerprint) -> Result<()> {
        self.update(|index| index.associate(tags, fingerprint))
    }

    /// Apply `mutate` to the index under the lock and persist the result.
    ///
    /// A store without an index starts from an empty one.
    pub fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut I),
    {
        let _guard = self.gate.acquire(self.timeout)?;

        let mut index = self.load()?.unwrap_or_default();
        mutate(&mut index);
        self.write_atomic(&index)
    }

    /// Fingerprints of every association whose tags are a superset of `query`.
    ///
    /// Returns an empty list if no index has been written yet.
    pub fn query(&self, query: &TagSet) -> Result<Vec<Fingerprint>> {
        Ok(match self.load()? {
            Some(index) => index.query(query),
            None => Vec::new(),
        })
    }

    /// Read the current index, or `None` if none has been written.
    pub fn load(&self) -> Result<Option<I>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.decode(&bytes).map(Some)
    }

    /// Read the current index, failing with `IndexMissing` if none has been written.
    pub fn load_required(&self) -> Result<I> {
        self.load()?
            .ok_or_else(|| Error::index_missing(&self.path))
    }

    fn decode(&self, bytes: &[u8]) -> Result<I> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::index_corrupt(&self.path, e.to_string()))?;

        if raw.version != INDEX_VERSION {
            return Err(Error::index_corrupt(
                &self.path,
                format!("Unsupported index version: {}", raw.version),
            ));
        }

        serde_json::from_value(raw.index)
            .map_err(|e| Error::index_corrupt(&self.path, e.to_string()))
    }

    /// Write the index to a temporary file beside it, then rename over it.
    fn write_atomic(&self, index: &I) -> Result<()> {
        let envelope = EnvelopeRef {
            version: INDEX_VERSION,
            index,
        };
        let payload = serde_json::to_vec(&envelope).map_err(io::Error::other)?;

        let temp_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(temp_dir)?;
        temp_file.write_all(&payload)?;
        temp_file.flush()?;
        temp_file.persist(&self.path)?;

        debug!("Wrote index {} ({} bytes)", self.path.display(), payload.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::DEFAULT_POLL_INTERVAL;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use tempfile::TempDir;

    fn index_store(root: &Path) -> IndexStore {
        IndexStore::new(
            root.join(INDEX_FILE),
            Gate::new(root.join("lock"), Duration::from_millis(5)),
            Duration::from_secs(10),
        )
    }

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_index_queries_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = index_store(temp_dir.path());

        assert!(store.load().unwrap().is_none());
        assert!(store.query(&tags(&[("lang", "en")])).unwrap().is_empty());
        assert!(matches!(
            store.load_required(),
            Err(Error::IndexMissing { .. })
        ));
    }

    #[test]
    fn test_record_then_query() {
        let temp_dir = TempDir::new().unwrap();
        let store = index_store(temp_dir.path());
        let fp = Fingerprint::of(b"hello");

        store.record(&tags(&[("lang", "en")]), fp).unwrap();

        assert_eq!(store.query(&tags(&[("lang", "en")])).unwrap(), vec![fp]);
        assert!(store.query(&tags(&[("lang", "fr")])).unwrap().is_empty());
        assert_eq!(store.load_required().unwrap().len(), 1);
    }

    #[test]
    fn test_record_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let store = index_store(temp_dir.path());

        store.record(&tags(&[]), Fingerprint::of(b"x")).unwrap();
        assert!(!temp_dir.path().join("lock").exists());
    }

    #[test]
    fn test_record_times_out_while_locked() {
        let temp_dir = TempDir::new().unwrap();
        let store: IndexStore = IndexStore::new(
            temp_dir.path().join(INDEX_FILE),
            Gate::new(temp_dir.path().join("lock"), DEFAULT_POLL_INTERVAL),
            Duration::from_millis(50),
        );
        fs::write(temp_dir.path().join("lock"), b"1").unwrap();

        let result = store.record(&tags(&[]), Fingerprint::of(b"x"));
        assert!(matches!(result, Err(Error::LockTimeout { .. })));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_index() {
        let temp_dir = TempDir::new().unwrap();
        let store = index_store(temp_dir.path());
        fs::write(store.path(), b"\x80\x03garbage").unwrap();

        assert!(matches!(
            store.query(&tags(&[])),
            Err(Error::IndexCorrupt { .. })
        ));
        assert!(matches!(
            store.record(&tags(&[]), Fingerprint::of(b"x")),
            Err(Error::IndexCorrupt { .. })
        ));
        // The failed update must not hold on to the lock.
        assert!(!temp_dir.path().join("lock").exists());
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let store = index_store(temp_dir.path());
        fs::write(
            store.path(),
            br#"{"version": 99, "index": {"associations": []}}"#,
        )
        .unwrap();

        assert!(matches!(store.load(), Err(Error::IndexCorrupt { .. })));
    }

    #[test]
    fn test_on_disk_format_is_versioned() {
        let temp_dir = TempDir::new().unwrap();
        let store = index_store(temp_dir.path());
        store.record(&tags(&[("k", "v")]), Fingerprint::of(b"x")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], INDEX_VERSION);
        assert!(raw["index"]["associations"].is_array());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let store = index_store(temp_dir.path());

        for i in 0..5 {
            store
                .record(&tags(&[]), Fingerprint::of(format!("{}", i).as_bytes()))
                .unwrap();
        }

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(INDEX_FILE)]);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let writers = 8;

        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let root = root.clone();
                thread::spawn(move || {
                    let store = index_store(&root);
                    let id = i.to_string();
                    store.record(&tags(&[("writer", id.as_str())]), Fingerprint::of(id.as_bytes()))
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let store = index_store(&root);
        assert_eq!(store.query(&TagSet::new()).unwrap().len(), writers);
        assert_eq!(store.load_required().unwrap().len(), writers);
    }
    #[test]
    fn test_readers_see_complete_index_during_writes() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let writers = 4;
        let records_per_writer = 10;
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let root = root.clone();
            let done = done.clone();
            thread::spawn(move || {
                let store = index_store(&root);
                let mut seen = 0;
                let mut reads = 0;
                loop {
                    let finished = done.load(Ordering::SeqCst);
                    let found = store.query(&TagSet::new())?.len();
                    assert!(found >= seen, "index shrank from {} to {}", seen, found);
                    seen = found;

                    let table = store.load()?.unwrap_or_default();
                    assert!(table.fingerprints().len() >= seen);
                    reads += 1;
                    if finished {
                        break;
                    }
                }
                Ok::<_, Error>(reads)
            })
        };

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let root = root.clone();
                thread::spawn(move || {
                    let store = index_store(&root);
                    for r in 0..records_per_writer {
                        let id = format!("{}-{}", w, r);
                        let fingerprint = Fingerprint::of(id.as_bytes());
                        store.record(&tags(&[("id", id.as_str())]), fingerprint)?;
                    }
                    Ok::<_, Error>(())
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        done.store(true, Ordering::SeqCst);

        assert!(reader.join().unwrap().unwrap() > 0);
        assert_eq!(
            index_store(&root).query(&TagSet::new()).unwrap().len(),
            writers * records_per_writer
        );
    }
}
