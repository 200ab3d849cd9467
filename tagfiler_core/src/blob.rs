//! Blob content and metadata records at their addressed locations.

use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use crate::layout::BlobLocation;
use crate::tags::TagSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Caller-supplied metadata fields beyond `name` and `tag`.
pub type Extra = BTreeMap<String, serde_json::Value>;

/// Metadata persisted next to a blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Logical name given by the caller, usually the original file name.
    pub name: String,
    /// The tags the content was stored under.
    pub tag: TagSet,
    #[serde(flatten)]
    pub extra: Extra,
}

impl MetadataRecord {
    pub fn new(name: impl Into<String>, tag: TagSet) -> Self {
        Self {
            name: name.into(),
            tag,
            extra: Extra::new(),
        }
    }

    pub fn with_extra(mut self, extra: Extra) -> Self {
        self.extra = extra;
        self
    }
}

/// Reads and writes blobs under a store root.
///
/// Metadata is keyed by fingerprint alone, so storing the same bytes again
/// replaces the previous record.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a fingerprint's directory (not created).
    pub fn location(&self, fingerprint: &Fingerprint) -> BlobLocation {
        BlobLocation::new(&self.root, fingerprint)
    }

    /// Path of a fingerprint's content file (not checked for existence).
    pub fn content_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.location(fingerprint).content_path()
    }

    /// Write `content` and `metadata` at the fingerprint's location.
    ///
    /// The two files are written independently.
    pub fn put(
        &self,
        fingerprint: &Fingerprint,
        content: &[u8],
        metadata: &MetadataRecord,
    ) -> Result<BlobLocation> {
        let location = BlobLocation::locate(&self.root, fingerprint)?;

        write_atomic(location.dir(), &location.content_path(), content)?;

        let meta = serde_json::to_vec_pretty(metadata).map_err(io::Error::other)?;
        write_atomic(location.dir(), &location.meta_path(), &meta)?;

        debug!(
            "Stored blob {} ({} bytes) as '{}'",
            fingerprint,
            content.len(),
            metadata.name
        );
        Ok(location)
    }

    /// Resolve a fingerprint to its content path and metadata record.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<(PathBuf, MetadataRecord)> {
        let location = self.location(fingerprint);
        let content_path = location.content_path();

        if !content_path.is_file() {
            return Err(Error::not_found(fingerprint.to_hex()));
        }
        let metadata = self.read_metadata(fingerprint, &location.meta_path())?;

        Ok((content_path, metadata))
    }

    /// Read the raw bytes of a blob.
    pub fn read(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>> {
        match fs::read(self.content_path(fingerprint)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::not_found(fingerprint.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_metadata(&self, fingerprint: &Fingerprint, path: &Path) -> Result<MetadataRecord> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_found(fingerprint.to_hex()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map_err(|e| Error::corrupt_metadata(path, e.to_string()))
    }
}

/// Write via a temporary file in `dir` so readers never see a partial file.
fn write_atomic(dir: &Path, dest: &Path, data: &[u8]) -> Result<()> {
    let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
    temp_file.write_all(data)?;
    temp_file.flush()?;
    temp_file.persist(dest)?;
    Ok(())
}
