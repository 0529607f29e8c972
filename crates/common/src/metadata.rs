//! Metadata attached to every material
//!
//! Metadata is an immutable, key-ordered map of string attributes. It is the
//! semantic identity of a capture (which URL, which sequence number) and the
//! key the pairing engine matches on.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Immutable key/value attributes of a material
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Key seeded by [`Metadata::builder`]
    pub const URL_KEY: &'static str = "URL";

    /// Start a builder seeded with the originating URL or locator
    pub fn builder(url: impl Into<String>) -> MetadataBuilder {
        MetadataBuilder::new(url)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Entries ordered by key
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of this metadata with the ignored keys removed
    pub fn without(&self, ignore: &IgnoreMetadataKeys) -> Metadata {
        Metadata(
            self.0
                .iter()
                .filter(|(k, _)| !ignore.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Equality over every key not in `ignore`
    pub fn matches_ignoring(&self, other: &Metadata, ignore: &IgnoreMetadataKeys) -> bool {
        self.without(ignore) == other.without(ignore)
    }

    /// Compact JSON with sorted keys, e.g. `{"URL":"a","seq":"1"}`
    pub fn canonical(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map).to_string()
    }

    /// Parse the form produced by [`Metadata::canonical`]
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Metadata(serde_json::from_str(text)?))
    }
}

impl std::fmt::Display for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Metadata(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Accumulating builder for [`Metadata`]
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    entries: BTreeMap<String, String>,
}

impl MetadataBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(Metadata::URL_KEY.to_string(), url.into());
        Self { entries }
    }

    /// Add or replace one attribute
    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn put_all<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in pairs {
            self.entries.insert(k.into(), v.into());
        }
        self
    }

    pub fn build(self) -> Metadata {
        Metadata(self.entries)
    }
}

/// Metadata keys excluded when two materials are matched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoreMetadataKeys(BTreeSet<String>);

impl IgnoreMetadataKeys {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
