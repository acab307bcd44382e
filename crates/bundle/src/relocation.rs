//! Image relocation maps.
//!
//! A relocation map records, for each image reference written in a bundle,
//! where that image is actually hosted at the registry currently holding the
//! bundle. The bundle itself keeps its original references; consumers
//! resolve an image through [`RelocationMap::lookup`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Mapping from original image reference to relocated image reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelocationMap(BTreeMap<String, String>);

impl RelocationMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns an optional map into a concrete one, treating absent as empty.
    pub fn from_option(map: Option<RelocationMap>) -> Self {
        map.unwrap_or_default()
    }

    /// Returns `None` for an empty map, so that presence means "something
    /// was relocated".
    pub fn into_option(self) -> Option<RelocationMap> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    /// Deserializes a map from JSON data.
    pub fn from_json(contents: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(contents)
    }

    /// Serializes the map into JSON data.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.0)
    }

    /// Returns true if no image has been relocated.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of relocated images.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the relocated reference for `original`, if any.
    pub fn get(&self, original: &str) -> Option<&str> {
        self.0.get(original).map(String::as_str)
    }

    /// Resolves where `original` is currently hosted: its relocated
    /// reference if it has one, otherwise `original` itself.
    pub fn lookup<'a>(&'a self, original: &'a str) -> &'a str {
        self.get(original).unwrap_or(original)
    }

    /// Records that `original` is now hosted at `relocated`, returning the
    /// previous location if there was one.
    pub fn insert(
        &mut self,
        original: impl Into<String>,
        relocated: impl Into<String>,
    ) -> Option<String> {
        self.0.insert(original.into(), relocated.into())
    }

    /// Iterates over `(original, relocated)` pairs in original-reference order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for RelocationMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for RelocationMap {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
