//! The store handle tying the index, blobs and read cache together.

use crate::blob::{BlobStore, Extra, MetadataRecord};
use crate::cache::{ReadCache, Reader};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use crate::index::{INDEX_FILE, IndexStore};
use crate::lock::Gate;
use crate::tags::{TagIndex, TagSet, TagTable};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// File name of the index lock marker inside the store root.
pub const LOCK_FILE: &str = "lock";

/// A stored item: where its content lives and what was recorded about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub fingerprint: Fingerprint,
    pub file: PathBuf,
    pub meta: MetadataRecord,
}

/// A handle on a tag-indexed content store.
///
/// Several handles, in one process or many, may share a root. Index updates
/// are serialized through the lock file; everything else is either immutable
/// once written or replaced atomically.
///
/// Storing is two steps, recording the tags in the index and then writing the
/// blob. They are not atomic together: if the process dies in between, the
/// index names a fingerprint whose blob is missing, and lookups of it fail
/// with [`Error::NotFound`].
#[derive(Debug)]
pub struct Filer<I = TagTable> {
    root: PathBuf,
    config: Config,
    index: IndexStore<I>,
    blobs: BlobStore,
    cache: ReadCache,
}

impl Filer<TagTable> {
    /// Open the store at `root`, creating it if absent.
    ///
    /// An existing store keeps the settings in its config file.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open_with_index(root)
    }
}

impl<I: TagIndex> Filer<I> {
    /// Like [`Filer::open`], for a store using a custom tag index.
    pub fn open_with_index<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let config = match Config::load(&root)? {
            Some(config) => config,
            None => {
                let config = Config::default();
                config.save(&root)?;
                info!("Initialized store at {}", root.display());
                config
            }
        };

        Ok(Self::from_parts(root, config))
    }

    /// Open the store at `root` with explicit settings, creating it if absent.
    ///
    /// Fails with `InvalidStore` if the settings are unusable or the store
    /// already uses another algorithm.
    pub fn with_config<P: AsRef<Path>>(root: P, config: Config) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        config.validate(&root)?;
        fs::create_dir_all(&root)?;

        match Config::load(&root)? {
            Some(existing) if existing.algorithm != config.algorithm => {
                return Err(Error::invalid_store(
                    &root,
                    format!(
                        "store uses {}, not {}",
                        existing.algorithm.as_str(),
                        config.algorithm.as_str()
                    ),
                ));
            }
            Some(_) => {}
            None => config.save(&root)?,
        }

        Ok(Self::from_parts(root, config))
    }

    fn from_parts(root: PathBuf, config: Config) -> Self {
        let gate = Gate::new(root.join(LOCK_FILE), config.lock_poll);
        let index = IndexStore::new(root.join(INDEX_FILE), gate, config.lock_timeout);
        let blobs = BlobStore::new(&root);

        Self {
            root,
            config,
            index,
            blobs,
            cache: ReadCache::new(),
        }
    }

    /// Get the root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The persisted tag index.
    pub fn index(&self) -> &IndexStore<I> {
        &self.index
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// Store `content` under `tags` with the logical name `name`.
    ///
    /// Storing bytes that are already present reuses the same location and
    /// replaces its metadata record.
    pub fn store_content(&self, name: &str, content: &[u8], tags: &TagSet) -> Result<Fingerprint> {
        self.store_content_with(name, content, tags, Extra::new())
    }

    /// Like [`Filer::store_content`], with extra metadata fields.
    pub fn store_content_with(
        &self,
        name: &str,
        content: &[u8],
        tags: &TagSet,
        extra: Extra,
    ) -> Result<Fingerprint> {
        self.store(name, content, tags, extra).map(|item| item.fingerprint)
    }

    /// Store the file at `path` under `tags`.
    ///
    /// The item is named `name`, or after the file name if `None`.
    pub fn store_file(&self, path: &Path, name: Option<&str>, tags: &TagSet) -> Result<Item> {
        let content = fs::read(path)?;
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        };

        self.store(&name, &content, tags, Extra::new())
    }

    fn store(&self, name: &str, content: &[u8], tags: &TagSet, extra: Extra) -> Result<Item> {
        let fingerprint = Fingerprint::of(content);

        self.index.record(tags, fingerprint)?;

        let meta = MetadataRecord::new(name, tags.clone()).with_extra(extra);
        let location = self.blobs.put(&fingerprint, content, &meta)?;

        info!("Stored '{}' as {}", name, fingerprint);
        Ok(Item {
            fingerprint,
            file: location.content_path(),
            meta,
        })
    }

    /// Fingerprints whose tags are a superset of `query`.
    pub fn fingerprints(&self, query: &TagSet) -> Result<Vec<Fingerprint>> {
        self.index.query(query)
    }

    /// Content file paths for every item matching `query`.
    pub fn content_files(&self, query: &TagSet) -> Result<Vec<PathBuf>> {
        Ok(self
            .fingerprints(query)?
            .iter()
            .map(|fp| self.blobs.content_path(fp))
            .collect())
    }

    /// Metadata records for every item matching `query`.
    pub fn meta(&self, query: &TagSet) -> Result<Vec<MetadataRecord>> {
        Ok(self.get(query)?.into_iter().map(|item| item.meta).collect())
    }

    /// Content paths and metadata for every item matching `query`.
    pub fn get(&self, query: &TagSet) -> Result<Vec<Item>> {
        self.fingerprints(query)?
            .into_iter()
            .map(|fp| self.get_by_fingerprint(&fp))
            .collect()
    }

    /// Content path and metadata of one fingerprint.
    pub fn get_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Item> {
        let (file, meta) = self.blobs.get(fingerprint)?;
        Ok(Item {
            fingerprint: *fingerprint,
            file,
            meta,
        })
    }

    /// Content of every item matching `query`, transformed by `reader` if given.
    ///
    /// Reader results are cached on this handle; raw content is re-read on
    /// every call.
    pub fn content(&self, query: &TagSet, reader: Option<&Reader>) -> Result<Vec<Arc<[u8]>>> {
        self.fingerprints(query)?
            .iter()
            .map(|fp| self.content_of(fp, reader))
            .collect()
    }

    /// Content of one fingerprint, transformed by `reader` if given.
    ///
    /// A cached reader result is returned without reading the metadata record.
    pub fn content_of(
        &self,
        fingerprint: &Fingerprint,
        reader: Option<&Reader>,
    ) -> Result<Arc<[u8]>> {
        self.cache.read_through(&self.blobs.location(fingerprint), reader, || {
            self.blobs.get(fingerprint).map(|(_, meta)| meta)
        })
    }

    /// Delete all content, the index and the cache, leaving an empty store.
    pub fn reset(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root)?;
        self.config.save(&self.root)?;
        self.cache.clear();

        info!("Reset store at {}", self.root.display());
        Ok(())
    }
}
