//! JSON reports over material lists and reduced groups
//!
//! Reports are written to the store root, next to the job directories, and
//! are not materials themselves. A group report carries everything needed
//! to recompute its warning count.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use materialstore_common::store::write_durably;
use materialstore_common::{
    validate_threshold, Error, FileType, Material, MaterialList, Metadata, ReportConfig, Result,
    Store,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::group::{is_warning, Classification, MProduct, MProductGroup};

/// One side of a report entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialEntry {
    pub job_name: String,
    pub job_timestamp: String,
    pub fingerprint: String,
    pub file_type: FileType,
    pub media_type: String,
    pub size: u64,
    /// Payload path relative to the store root (and thus to the report)
    pub path: String,
    pub metadata: Metadata,
    /// Leading bytes of text payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductEntry {
    pub index: usize,
    pub classification: Classification,
    pub score: Option<f64>,
    pub query_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub warning: bool,
    pub left: Option<MaterialEntry>,
    pub right: Option<MaterialEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReport {
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub left: String,
    pub right: String,
    pub ignore_keys: Vec<String>,
    pub reduced: bool,
    pub threshold: f64,
    pub warnings: usize,
    pub entries: Vec<ProductEntry>,
}

impl GroupReport {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| Error::report_io(path, e))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Warning count derived from the entries alone
    pub fn recompute_warnings(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| is_warning(e.classification, e.score, self.threshold))
            .count()
    }

    pub fn passed(&self) -> bool {
        self.warnings == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListReport {
    pub generated_at: DateTime<Utc>,
    pub query: String,
    pub size: usize,
    pub materials: Vec<MaterialEntry>,
}

impl ListReport {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| Error::report_io(path, e))?;
        Ok(serde_json::from_slice(&content)?)
    }
}

/// Writes reports into the root directory of a store
#[derive(Debug, Clone)]
pub struct Reporter {
    store: Store,
    excerpt_bytes: usize,
}

impl Reporter {
    pub fn new(store: Store) -> Self {
        Self::from_config(store, &ReportConfig::default())
    }

    pub fn from_config(store: Store, config: &ReportConfig) -> Self {
        Self {
            store,
            excerpt_bytes: config.excerpt_bytes,
        }
    }

    /// Serialize a group and its warning count at `threshold`, which must
    /// lie in [0, 1]
    pub async fn report_group(
        &self,
        group: &MProductGroup,
        name: &str,
        threshold: f64,
    ) -> Result<PathBuf> {
        validate_threshold(threshold)?;
        let destination = self.destination(name)?;

        let mut entries = Vec::with_capacity(group.len());
        for (index, product) in group.iter().enumerate() {
            entries.push(self.product_entry(index, product, threshold).await);
        }

        let report = GroupReport {
            generated_at: Utc::now(),
            mode: group.kind.to_string(),
            left: group.left_label.clone(),
            right: group.right_label.clone(),
            ignore_keys: group.ignore_keys.iter().map(str::to_string).collect(),
            reduced: group.reduced,
            threshold,
            warnings: group.warnings(threshold),
            entries,
        };

        self.emit(&destination, &report).await?;
        info!(
            "Wrote report {:?}: {} entries, {} warnings at threshold {}",
            destination,
            report.entries.len(),
            report.warnings,
            threshold
        );
        Ok(destination)
    }

    /// Serialize a plain material list
    pub async fn report_list(&self, list: &MaterialList, name: &str) -> Result<PathBuf> {
        let destination = self.destination(name)?;

        let mut materials = Vec::with_capacity(list.len());
        for material in list {
            materials.push(self.material_entry(material).await);
        }

        let report = ListReport {
            generated_at: Utc::now(),
            query: list.query().to_string(),
            size: materials.len(),
            materials,
        };

        self.emit(&destination, &report).await?;
        info!("Wrote report {:?}: {} materials", destination, report.size);
        Ok(destination)
    }

    fn destination(&self, name: &str) -> Result<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(|c: char| c == '/' || c == '\\');
        if !plain {
            return Err(Error::report_io(
                self.store.root().join(name),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "report name must be a plain file name",
                ),
            ));
        }
        Ok(self.store.root().join(name))
    }

    async fn emit<T: Serialize>(&self, destination: &Path, report: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(report)?;
        write_durably(destination, &json)
            .await
            .map_err(|e| Error::report_io(destination, e))
    }

    async fn product_entry(&self, index: usize, product: &MProduct, threshold: f64) -> ProductEntry {
        let left = match &product.left {
            Some(m) => Some(self.material_entry(m).await),
            None => None,
        };
        let right = match &product.right {
            Some(m) => Some(self.material_entry(m).await),
            None => None,
        };

        ProductEntry {
            index,
            classification: product.classification,
            score: product.score,
            query_key: product.query_key.clone(),
            diagnostic: product.diagnostic.clone(),
            warning: product.is_warning(threshold),
            left,
            right,
        }
    }

    async fn material_entry(&self, material: &Material) -> MaterialEntry {
        let excerpt = if material.file_type.is_text() && self.excerpt_bytes > 0 {
            match self.store.read(material).await {
                Ok(bytes) => Some(excerpt(&bytes, self.excerpt_bytes)),
                Err(e) => {
                    warn!("No excerpt for {}: {}", material.id(), e);
                    None
                }
            }
        } else {
            None
        };

        MaterialEntry {
            job_name: material.job_name.to_string(),
            job_timestamp: material.job_timestamp.to_string(),
            fingerprint: material.fingerprint.clone(),
            file_type: material.file_type,
            media_type: material.file_type.media_type().to_string(),
            size: material.size,
            path: material.path.to_string_lossy().replace('\\', "/"),
            metadata: material.metadata.clone(),
            excerpt,
        }
    }
}

/// At most `limit` bytes of `bytes` as text, cut on a char boundary
fn excerpt(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(limit)]);
    text.trim_end_matches('\u{FFFD}').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MProductGroupBuilder, PairingMode};
    use crate::reduce::Inspector;
    use materialstore_common::{JobName, JobTimestamp, QueryOnMetadata};
    use tempfile::TempDir;

    #[test]
    fn test_excerpt_cuts_on_char_boundary() {
        assert_eq!(excerpt(b"hello world", 5), "hello");
        assert_eq!(excerpt("héllo".as_bytes(), 2), "h");
        assert_eq!(excerpt(b"hi", 100), "hi");
    }

    #[tokio::test]
    async fn test_report_list_and_group() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        let job = JobName::new("J").unwrap();
        let t1 = JobTimestamp::parse("20240101_000000").unwrap();
        let t2 = t1.plus_seconds(60);

        store.write(&job, &t1, FileType::Txt, Metadata::builder("a").build(), b"alpha\nbeta").await.unwrap();
        store.write(&job, &t2, FileType::Txt, Metadata::builder("a").build(), b"alpha\ngamma").await.unwrap();
        store.write(&job, &t2, FileType::Txt, Metadata::builder("b").build(), b"new").await.unwrap();

        let left = store.select(&job, &t1, &QueryOnMetadata::ANY).await.unwrap();
        let right = store.select(&job, &t2, &QueryOnMetadata::ANY).await.unwrap();

        let reporter = Reporter::new(store.clone());
        let list_path = reporter.report_list(&right, "J-list.json").await.unwrap();
        assert_eq!(list_path, tmp.path().join("J-list.json"));
        let list_report = ListReport::load(&list_path).await.unwrap();
        assert_eq!(list_report.size, 2);
        assert_eq!(list_report.materials[0].excerpt.as_deref(), Some("alpha\ngamma"));
        assert_eq!(list_report.query, "*");

        let group = MProductGroupBuilder::new(&store)
            .build(PairingMode::twin(left, right))
            .await
            .unwrap();
        let reduced = Inspector::new(store.clone()).reduce(&group).await.unwrap();
        let path = reporter.report_group(&reduced, "J-diff.json", 0.1).await.unwrap();

        let report = GroupReport::load(&path).await.unwrap();
        assert_eq!(report.mode, "twin");
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.warnings, reduced.warnings(0.1));
        assert_eq!(report.warnings, report.recompute_warnings());
        assert_eq!(report.warnings, 2);
        assert!(!report.passed());
        assert_eq!(report.entries[0].classification, Classification::Different);
        assert_eq!(report.entries[1].classification, Classification::MissingLeft);
    }

    #[tokio::test]
    async fn test_report_rejects_paths() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        let reporter = Reporter::new(store);

        let list = MaterialList::new(QueryOnMetadata::Any);
        for name in ["", "..", "sub/report.json"] {
            let err = reporter.report_list(&list, name).await.unwrap_err();
            assert!(matches!(err, Error::ReportIo { .. }), "name {name:?}");
        }
    }

    #[tokio::test]
    async fn test_report_unwritable_destination() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        let job = JobName::new("J").unwrap();
        let ts = JobTimestamp::parse("20240101_000000").unwrap();
        store.write(&job, &ts, FileType::Txt, Metadata::builder("a").build(), b"x").await.unwrap();

        // `J` is a job directory; a report cannot replace it
        let reporter = Reporter::new(store);
        let list = MaterialList::new(QueryOnMetadata::Any);
        let err = reporter.report_list(&list, "J").await.unwrap_err();
        assert!(matches!(err, Error::ReportIo { .. }));
    }

    #[tokio::test]
    async fn test_report_rejects_out_of_range_threshold() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        let reporter = Reporter::new(store.clone());
        let group = MProductGroupBuilder::new(&store)
            .build(PairingMode::twin(
                MaterialList::new(QueryOnMetadata::Any),
                MaterialList::new(QueryOnMetadata::Any),
            ))
            .await
            .unwrap();

        for threshold in [-0.1, 1.5, f64::NAN] {
            let err = reporter.report_group(&group, "bad.json", threshold).await.unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "threshold {threshold}");
        }
        assert!(!tmp.path().join("bad.json").exists());
        assert!(reporter.report_group(&group, "ok.json", 1.0).await.is_ok());
    }
}
