//! Sharded on-disk layout of fingerprint directories.

use crate::error::Result;
use crate::hash::Fingerprint;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the raw content file inside a blob directory.
pub const CONTENT_FILE: &str = "content";

/// Name of the metadata record inside a blob directory.
pub const META_FILE: &str = "meta.json";

/// The directory holding one blob and its metadata record.
///
/// Returns paths of the form `{root}/{prefix}/{suffix}/`, so the outer level
/// never holds more than 256 entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobLocation {
    dir: PathBuf,
}

impl BlobLocation {
    /// Derive the location of `fingerprint` under `root` without touching the filesystem.
    pub fn new(root: &Path, fingerprint: &Fingerprint) -> Self {
        Self {
            dir: root.join(fingerprint.prefix()).join(fingerprint.suffix()),
        }
    }

    /// Derive the location and make sure its directory exists.
    pub fn locate(root: &Path, fingerprint: &Fingerprint) -> Result<Self> {
        let location = Self::new(root, fingerprint);
        fs::create_dir_all(&location.dir)?;
        Ok(location)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn content_path(&self) -> PathBuf {
        self.dir.join(CONTENT_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_location_is_sharded() {
        let fp = Fingerprint::of(b"test");
        let location = BlobLocation::new(Path::new("/store"), &fp);

        let expected = PathBuf::from("/store").join(fp.prefix()).join(fp.suffix());
        assert_eq!(location.dir(), expected);
        assert_eq!(location.content_path(), expected.join("content"));
        assert_eq!(location.meta_path(), expected.join("meta.json"));
    }

    #[test]
    fn test_new_does_not_create() {
        let temp_dir = TempDir::new().unwrap();
        let location = BlobLocation::new(temp_dir.path(), &Fingerprint::of(b"x"));
        assert!(!location.dir().exists());
    }

    #[test]
    fn test_locate_creates_and_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let fp = Fingerprint::of(b"x");

        let first = BlobLocation::locate(temp_dir.path(), &fp).unwrap();
        assert!(first.dir().is_dir());

        let second = BlobLocation::locate(temp_dir.path(), &fp).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_locate_fails_when_root_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("not-a-dir");
        fs::write(&root, b"file").unwrap();

        assert!(BlobLocation::locate(&root, &Fingerprint::of(b"x")).is_err());
    }
}
