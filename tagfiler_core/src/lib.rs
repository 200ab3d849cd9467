//! # Tagfiler Core
//!
//! A content-addressed file store with an associative tag index.
//!
//! Content is stored once per distinct byte sequence, addressed by its BLAKE3
//! fingerprint, together with a set of key/value tags. Retrieval selects every
//! item whose tags are a superset of a query.
//!
//! ## Features
//!
//! - Content-addressed blobs in a two-level sharded directory tree
//! - A single shared tag index, updated under an advisory lock file and
//!   replaced atomically so readers never see a partial write
//! - Per-handle caching of derived content, keyed by an explicit reader id
//!
//! ## Example
//!
//! ```no_run
//! use tagfiler_core::{Filer, Reader, TagSet};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let filer = Filer::open("./my-store")?;
//!
//! let tags: TagSet = [("lang", "es"), ("company", "first")]
//!     .into_iter()
//!     .map(|(k, v)| (k.to_string(), v.to_string()))
//!     .collect();
//! filer.store_content("filer-first", b"this content, company first", &tags)?;
//!
//! let query: TagSet = [("lang".to_string(), "es".to_string())].into_iter().collect();
//! for item in filer.get(&query)? {
//!     println!("{} {}", item.meta.name, item.file.display());
//! }
//!
//! // Derived content is computed once per handle and then served from memory.
//! let upper = Reader::text("upper", |s| s.to_uppercase());
//! for content in filer.content(&query, Some(&upper))? {
//!     println!("{}", String::from_utf8_lossy(&content));
//! }
//! # Ok(())
//! # }
//! ```

mod blob;
mod cache;
mod config;
mod error;
mod filer;
mod hash;
mod index;
mod layout;
mod lock;
mod tags;

pub use blob::{BlobStore, Extra, MetadataRecord};
pub use cache::{ReadCache, Reader};
pub use config::{CONFIG_FILE, Config};
pub use error::{Error, Result};
pub use filer::{Filer, Item, LOCK_FILE};
pub use hash::{Algorithm, Fingerprint};
pub use index::{INDEX_FILE, INDEX_VERSION, IndexStore};
pub use layout::{BlobLocation, CONTENT_FILE, META_FILE};
pub use lock::{Gate, LockGuard};
pub use tags::{Association, TagIndex, TagSet, TagTable, is_superset, parse_tag};
