//! Pairing results
//!
//! An [`MProduct`] holds one material from each side (either may be absent)
//! and, once reduced, the difference score between them. An
//! [`MProductGroup`] is the ordered set of products built from two material
//! lists; every material of either list appears in exactly one product.

use materialstore_common::{IgnoreMetadataKeys, Material, MaterialId};
use serde::{Deserialize, Serialize};

/// Outcome of comparing one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Both sides present, not reduced yet
    Pending,
    Equivalent,
    Different,
    /// Only the right (later / second) side exists
    MissingLeft,
    /// Only the left (earlier / first) side exists
    MissingRight,
}

impl Classification {
    pub fn is_missing(&self) -> bool {
        matches!(self, Classification::MissingLeft | Classification::MissingRight)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Pending => write!(f, "PENDING"),
            Classification::Equivalent => write!(f, "EQUIVALENT"),
            Classification::Different => write!(f, "DIFFERENT"),
            Classification::MissingLeft => write!(f, "MISSING_LEFT"),
            Classification::MissingRight => write!(f, "MISSING_RIGHT"),
        }
    }
}

/// Whether missing entries and scores above `threshold` make a warning
pub fn is_warning(classification: Classification, score: Option<f64>, threshold: f64) -> bool {
    classification.is_missing() || score.map(|s| s > threshold).unwrap_or(false)
}

#[derive(Debug, Clone, Serialize)]
pub struct MProduct {
    pub left: Option<Material>,
    pub right: Option<Material>,
    /// Difference in [0, 1]; set by reduction when both sides exist
    pub score: Option<f64>,
    pub classification: Classification,
    /// Canonical metadata, minus ignored keys, the pair was matched on
    pub query_key: String,
    pub diagnostic: Option<String>,
}

impl MProduct {
    pub fn matched(left: Material, right: Material, query_key: String) -> Self {
        Self {
            left: Some(left),
            right: Some(right),
            score: None,
            classification: Classification::Pending,
            query_key,
            diagnostic: None,
        }
    }

    pub fn left_only(left: Material, query_key: String) -> Self {
        Self {
            left: Some(left),
            right: None,
            score: None,
            classification: Classification::MissingRight,
            query_key,
            diagnostic: None,
        }
    }

    pub fn right_only(right: Material, query_key: String) -> Self {
        Self {
            left: None,
            right: Some(right),
            score: None,
            classification: Classification::MissingLeft,
            query_key,
            diagnostic: None,
        }
    }

    pub fn is_warning(&self, threshold: f64) -> bool {
        is_warning(self.classification, self.score, threshold)
    }

    pub fn material_ids(&self) -> impl Iterator<Item = MaterialId> + '_ {
        self.left.iter().chain(self.right.iter()).map(Material::id)
    }
}

/// How the two sides of a group were chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingKind {
    Chronological,
    Twin,
}

impl std::fmt::Display for PairingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingKind::Chronological => write!(f, "chronological"),
            PairingKind::Twin => write!(f, "twin"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MProductGroup {
    pub kind: PairingKind,
    /// Human readable address of each side, e.g. `MyAdmin/20240101_120000`
    pub left_label: String,
    pub right_label: String,
    pub ignore_keys: IgnoreMetadataKeys,
    pub products: Vec<MProduct>,
    /// Set once every pending product has been scored
    pub reduced: bool,
}

impl MProductGroup {
    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MProduct> {
        self.products.iter()
    }

    /// Entries scoring above `threshold` plus every missing entry.
    /// Pending entries carry no score and never count. A NaN threshold
    /// counts only missing entries; [`validate_threshold`] rejects one.
    ///
    /// [`validate_threshold`]: materialstore_common::validate_threshold
    pub fn warnings(&self, threshold: f64) -> usize {
        self.products.iter().filter(|p| p.is_warning(threshold)).count()
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.products
            .iter()
            .filter(|p| p.classification == classification)
            .count()
    }
}

impl<'a> IntoIterator for &'a MProductGroup {
    type Item = &'a MProduct;
    type IntoIter = std::slice::Iter<'a, MProduct>;

    fn into_iter(self) -> Self::IntoIter {
        self.products.iter()
    }
}

impl std::fmt::Display for MProductGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MProductGroup({} {} vs {}, size={}, reduced={})",
            self.kind,
            self.left_label,
            self.right_label,
            self.products.len(),
            self.reduced
        )
    }
}
