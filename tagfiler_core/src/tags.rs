//! Tag sets and the associative index that maps them to fingerprints.

use crate::hash::Fingerprint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Key/value attributes attached to a stored item.
pub type TagSet = BTreeMap<String, String>;

/// Returns true if every pair in `query` is present in `tags` with an equal value.
pub fn is_superset(tags: &TagSet, query: &TagSet) -> bool {
    query.iter().all(|(k, v)| tags.get(k) == Some(v))
}

/// Parse `key=value` into a tag pair. The value may itself contain `=`.
pub fn parse_tag(s: &str) -> Option<(String, String)> {
    let (key, value) = s.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// An index associating tag sets with fingerprints.
///
/// Implementations are persisted by serialization, so they must round-trip
/// through serde without losing associations.
pub trait TagIndex: Default + Serialize + DeserializeOwned {
    /// Record that `fingerprint` was stored under `tags`.
    fn associate(&mut self, tags: &TagSet, fingerprint: Fingerprint);

    /// All fingerprints recorded under a tag set that is a superset of `query`.
    ///
    /// The order must be the same for repeated calls against the same state.
    fn query(&self, query: &TagSet) -> Vec<Fingerprint>;
}

/// One recorded association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub tags: TagSet,
    pub fingerprint: Fingerprint,
}

/// The default [`TagIndex`]: a flat table of every association ever recorded.
///
/// Storing the same content twice records two associations. Queries return
/// each matching fingerprint once, in ascending fingerprint order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTable {
    associations: Vec<Association>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded associations, duplicates included.
    pub fn len(&self) -> usize {
        self.associations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Every distinct fingerprint in the table.
    pub fn fingerprints(&self) -> BTreeSet<Fingerprint> {
        self.associations.iter().map(|a| a.fingerprint).collect()
    }
}

impl TagIndex for TagTable {
    fn associate(&mut self, tags: &TagSet, fingerprint: Fingerprint) {
        self.associations.push(Association {
            tags: tags.clone(),
            fingerprint,
        });
    }

    fn query(&self, query: &TagSet) -> Vec<Fingerprint> {
        self.associations
            .iter()
            .filter(|a| is_superset(&a.tags, query))
            .map(|a| a.fingerprint)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
