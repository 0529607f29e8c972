//! Stored materials and ordered lists of them

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::query::QueryOnMetadata;
use crate::types::{FileType, JobName, JobTimestamp};

/// Identity of a material: its address plus content fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId {
    pub job_name: JobName,
    pub job_timestamp: JobTimestamp,
    pub fingerprint: String,
}

impl std::fmt::Display for MaterialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.job_name, self.job_timestamp, self.fingerprint)
    }
}

/// A persisted artifact. Only the store creates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub job_name: JobName,
    pub job_timestamp: JobTimestamp,
    pub file_type: FileType,
    pub metadata: Metadata,
    /// SHA-256 of the payload, lowercase hex
    pub fingerprint: String,
    pub size: u64,
    /// Location of the payload relative to the store root
    pub path: PathBuf,
}

impl Material {
    pub fn id(&self) -> MaterialId {
        MaterialId {
            job_name: self.job_name.clone(),
            job_timestamp: self.job_timestamp,
            fingerprint: self.fingerprint.clone(),
        }
    }

    /// First 7 hex digits, the way reports abbreviate fingerprints
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..7.min(self.fingerprint.len())]
    }
}

/// Ordered, identity-deduplicated materials plus the query that selected them
#[derive(Debug, Clone, Default)]
pub struct MaterialList {
    query: QueryOnMetadata,
    materials: Vec<Material>,
    ids: HashSet<MaterialId>,
}

impl MaterialList {
    /// Empty list remembering the query that will fill it
    pub fn new(query: QueryOnMetadata) -> Self {
        Self {
            query,
            materials: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Collect `materials` in order, dropping repeated identities
    pub fn from_materials(query: QueryOnMetadata, materials: impl IntoIterator<Item = Material>) -> Self {
        let mut list = Self::new(query);
        list.extend(materials);
        list
    }

    /// Append unless a material with the same identity is already present.
    /// Returns whether the material was added.
    pub fn push(&mut self, material: Material) -> bool {
        if self.ids.insert(material.id()) {
            self.materials.push(material);
            true
        } else {
            false
        }
    }

    pub fn extend(&mut self, materials: impl IntoIterator<Item = Material>) {
        for m in materials {
            self.push(m);
        }
    }

    /// Query that produced the list
    pub fn query(&self) -> &QueryOnMetadata {
        &self.query
    }

    /// Number of distinct materials
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Material at `index` in insertion order
    pub fn get(&self, index: usize) -> Option<&Material> {
        self.materials.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Material> {
        self.materials.iter()
    }

    pub fn as_slice(&self) -> &[Material] {
        &self.materials
    }

    pub fn contains(&self, id: &MaterialId) -> bool {
        self.ids.contains(id)
    }

    /// Distinct jobs the list draws from
    pub fn job_names(&self) -> BTreeSet<JobName> {
        self.materials.iter().map(|m| m.job_name.clone()).collect()
    }

    /// Distinct timestamps, oldest first
    pub fn job_timestamps(&self) -> BTreeSet<JobTimestamp> {
        self.materials.iter().map(|m| m.job_timestamp).collect()
    }

    /// Sub-list of the materials captured at `ts`, order preserved
    pub fn at_timestamp(&self, ts: JobTimestamp) -> MaterialList {
        MaterialList::from_materials(
            self.query.clone(),
            self.materials.iter().filter(|m| m.job_timestamp == ts).cloned(),
        )
    }
}

impl<'a> IntoIterator for &'a MaterialList {
    type Item = &'a Material;
    type IntoIter = std::slice::Iter<'a, Material>;

    fn into_iter(self) -> Self::IntoIter {
        self.materials.iter()
    }
}

impl std::fmt::Display for MaterialList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MaterialList(query={}, size={})", self.query, self.materials.len())
    }
}
