//! Reduction: scores every pending pair of a group

use std::cmp::Ordering;

use materialstore_common::{
    Error, InspectorConfig, Material, Result, Store, UnsupportedPolicy,
};
use tracing::{debug, info, warn};

use crate::compare::{Comparator, ComparatorRegistry};
use crate::group::{Classification, MProduct, MProductGroup};

/// Scores and orders product groups using a comparator per file type
#[derive(Debug, Clone)]
pub struct Inspector {
    store: Store,
    comparators: ComparatorRegistry,
    unsupported: UnsupportedPolicy,
}

struct Scored {
    score: f64,
    diagnostic: Option<String>,
}

impl Inspector {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            comparators: ComparatorRegistry::default(),
            unsupported: UnsupportedPolicy::Degrade,
        }
    }

    pub fn from_config(store: Store, config: &InspectorConfig) -> Self {
        Self {
            store,
            comparators: ComparatorRegistry::standard(config.pixel_tolerance),
            unsupported: config.unsupported,
        }
    }

    pub fn with_comparators(mut self, comparators: ComparatorRegistry) -> Self {
        self.comparators = comparators;
        self
    }

    pub fn with_unsupported_policy(mut self, policy: UnsupportedPolicy) -> Self {
        self.unsupported = policy;
        self
    }

    /// Score pending products and order the result by descending score,
    /// missing entries last. The input group is left untouched.
    pub async fn reduce(&self, group: &MProductGroup) -> Result<MProductGroup> {
        let mut reduced = group.clone();

        for product in reduced.products.iter_mut() {
            if product.classification != Classification::Pending {
                continue;
            }
            let (Some(left), Some(right)) = (&product.left, &product.right) else {
                return Err(Error::InvalidPairing(format!(
                    "pending product {} lacks a side",
                    product.query_key
                )));
            };

            let scored = self.score(left, right).await?;
            product.classification = if scored.score == 0.0 {
                Classification::Equivalent
            } else {
                Classification::Different
            };
            product.score = Some(scored.score);
            product.diagnostic = scored.diagnostic;
        }

        sort_by_score(&mut reduced.products);
        reduced.reduced = true;

        info!(
            "Reduced {}: {} equivalent, {} different, {} missing left, {} missing right",
            reduced,
            reduced.count(Classification::Equivalent),
            reduced.count(Classification::Different),
            reduced.count(Classification::MissingLeft),
            reduced.count(Classification::MissingRight)
        );
        Ok(reduced)
    }

    async fn score(&self, left: &Material, right: &Material) -> Result<Scored> {
        if left.fingerprint == right.fingerprint {
            return Ok(Scored {
                score: 0.0,
                diagnostic: None,
            });
        }

        if left.file_type != right.file_type {
            return Ok(Scored {
                score: 1.0,
                diagnostic: Some(format!(
                    "file type mismatch: {} vs {}",
                    left.file_type, right.file_type
                )),
            });
        }

        let Some(comparator) = self.comparators.get(left.file_type) else {
            return match self.unsupported {
                UnsupportedPolicy::Fail => Err(Error::UnsupportedFileType(left.file_type)),
                UnsupportedPolicy::Degrade => {
                    warn!(
                        "No comparator for {}; treating {} as different",
                        left.file_type,
                        left.metadata
                    );
                    Ok(Scored {
                        score: 1.0,
                        diagnostic: Some(
                            Error::UnsupportedFileType(left.file_type).to_string(),
                        ),
                    })
                }
            };
        };

        match self.compare_payloads(comparator, left, right).await {
            Ok(score) => {
                debug!(
                    "{} comparator scored {} vs {}: {:.6}",
                    comparator.name(),
                    left.short_fingerprint(),
                    right.short_fingerprint(),
                    score
                );
                Ok(Scored {
                    score,
                    diagnostic: None,
                })
            }
            Err(e) if self.unsupported == UnsupportedPolicy::Degrade => {
                warn!(
                    "Comparing {} with {} failed; treating as different: {}",
                    left.id(),
                    right.id(),
                    e
                );
                Ok(Scored {
                    score: 1.0,
                    diagnostic: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn compare_payloads(
        &self,
        comparator: &dyn Comparator,
        left: &Material,
        right: &Material,
    ) -> Result<f64> {
        let left_bytes = self.store.read(left).await?;
        let right_bytes = self.store.read(right).await?;
        let raw = comparator.compare(&left_bytes, &right_bytes)?;
        Ok(if raw.is_nan() { 1.0 } else { raw.clamp(0.0, 1.0) })
    }
}

/// Stable sort: scored entries by descending score, then missing entries
pub fn sort_by_score(products: &mut [MProduct]) {
    products.sort_by(|a, b| {
        match (a.classification.is_missing(), b.classification.is_missing()) {
            (false, false) => b
                .score
                .unwrap_or(0.0)
                .total_cmp(&a.score.unwrap_or(0.0)),
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => Ordering::Equal,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{pair, MProductGroupBuilder, PairingMode};
    use crate::compare::fixtures::png;
    use crate::group::PairingKind;
    use materialstore_common::{
        FileType, IgnoreMetadataKeys, JobName, JobTimestamp, MaterialList, Metadata,
        QueryOnMetadata,
    };
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        store: Store,
        left_ts: JobTimestamp,
        right_ts: JobTimestamp,
        job: JobName,
    }

    async fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        Fixture {
            _tmp: tmp,
            store,
            left_ts: JobTimestamp::parse("20240101_000000").unwrap(),
            right_ts: JobTimestamp::parse("20240101_000100").unwrap(),
            job: JobName::new("J").unwrap(),
        }
    }

    impl Fixture {
        async fn put(&self, ts: JobTimestamp, url: &str, file_type: FileType, bytes: &[u8]) {
            self.store
                .write(&self.job, &ts, file_type, Metadata::builder(url).build(), bytes)
                .await
                .unwrap();
        }

        async fn lists(&self) -> (MaterialList, MaterialList) {
            let left = self.store.select(&self.job, &self.left_ts, &QueryOnMetadata::ANY).await.unwrap();
            let right = self.store.select(&self.job, &self.right_ts, &QueryOnMetadata::ANY).await.unwrap();
            (left, right)
        }
    }

    #[tokio::test]
    async fn test_reduce_classifies_and_orders() {
        let fx = fixture().await;
        let base = png(10, 10, [0, 0, 0, 255], 0);
        fx.put(fx.left_ts, "same", FileType::Png, &base).await;
        fx.put(fx.right_ts, "same", FileType::Png, &base).await;
        fx.put(fx.left_ts, "small", FileType::Png, &png(10, 10, [0, 0, 0, 255], 1)).await;
        fx.put(fx.right_ts, "small", FileType::Png, &png(10, 10, [0, 0, 0, 255], 2)).await;
        fx.put(fx.left_ts, "big", FileType::Png, &png(10, 10, [0, 0, 0, 255], 3)).await;
        fx.put(fx.right_ts, "big", FileType::Png, &png(10, 10, [0, 0, 0, 255], 60)).await;
        fx.put(fx.left_ts, "gone", FileType::Png, &png(1, 1, [1, 1, 1, 255], 0)).await;

        let (left, right) = fx.lists().await;
        let group = MProductGroupBuilder::new(&fx.store)
            .build(PairingMode::twin(left, right))
            .await
            .unwrap();
        assert_eq!(group.kind, PairingKind::Twin);

        let reduced = Inspector::new(fx.store.clone()).reduce(&group).await.unwrap();
        assert!(reduced.reduced);
        assert!(!group.reduced);

        let order: Vec<(&str, Classification)> = reduced
            .iter()
            .map(|p| {
                let m = p.left.as_ref().or(p.right.as_ref()).unwrap();
                (m.metadata.get("URL").unwrap(), p.classification)
            })
            .collect();
        assert_eq!(
            order,
            vec![
                ("big", Classification::Different),
                ("small", Classification::Different),
                ("same", Classification::Equivalent),
                ("gone", Classification::MissingRight),
            ]
        );
        assert!((reduced.products[0].score.unwrap() - 0.57).abs() < 1e-9);
        assert_eq!(reduced.products[2].score, Some(0.0));
        assert_eq!(reduced.products[3].score, None);

        assert_eq!(reduced.warnings(0.0), 3);
        assert_eq!(reduced.warnings(0.05), 2);
        assert_eq!(reduced.warnings(1.0), 1);
    }

    #[tokio::test]
    async fn test_unsupported_type_degrades_or_fails() {
        let fx = fixture().await;
        fx.put(fx.left_ts, "blob", FileType::Binary, b"one").await;
        fx.put(fx.right_ts, "blob", FileType::Binary, b"two").await;
        let (left, right) = fx.lists().await;
        let group = MProductGroup {
            kind: PairingKind::Chronological,
            left_label: "l".into(),
            right_label: "r".into(),
            ignore_keys: IgnoreMetadataKeys::none(),
            products: pair(&left, &right, &IgnoreMetadataKeys::none()).unwrap(),
            reduced: false,
        };

        let registry = ComparatorRegistry::standard(5).without_fallback();
        let degrading = Inspector::new(fx.store.clone()).with_comparators(registry.clone());
        let reduced = degrading.reduce(&group).await.unwrap();
        assert_eq!(reduced.products[0].classification, Classification::Different);
        assert_eq!(reduced.products[0].score, Some(1.0));
        assert!(reduced.products[0].diagnostic.is_some());

        let failing = degrading.with_unsupported_policy(UnsupportedPolicy::Fail);
        let err = failing.reduce(&group).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(FileType::Binary)));
    }

    #[tokio::test]
    async fn test_file_type_mismatch_is_different() {
        let fx = fixture().await;
        fx.put(fx.left_ts, "page", FileType::Png, &png(2, 2, [0, 0, 0, 255], 0)).await;
        fx.put(fx.right_ts, "page", FileType::Txt, b"now text").await;
        let (left, right) = fx.lists().await;

        let group = MProductGroupBuilder::new(&fx.store)
            .build(PairingMode::twin(left, right))
            .await
            .unwrap();
        let reduced = Inspector::new(fx.store.clone()).reduce(&group).await.unwrap();
        let product = &reduced.products[0];
        assert_eq!(product.classification, Classification::Different);
        assert_eq!(product.diagnostic.as_deref(), Some("file type mismatch: png vs txt"));
    }

    #[tokio::test]
    async fn test_undecodable_image_degrades_without_losing_the_group() {
        let fx = fixture().await;
        fx.put(fx.left_ts, "notes", FileType::Txt, b"a").await;
        fx.put(fx.right_ts, "notes", FileType::Txt, b"b").await;
        fx.put(fx.left_ts, "shot", FileType::Png, b"\x89PNG\r\n\x1a\nAAAA").await;
        fx.put(fx.right_ts, "shot", FileType::Png, b"\x89PNG\r\n\x1a\nBBBB").await;
        let (left, right) = fx.lists().await;

        let group = MProductGroupBuilder::new(&fx.store)
            .build(PairingMode::twin(left, right))
            .await
            .unwrap();
        let reduced = Inspector::new(fx.store.clone()).reduce(&group).await.unwrap();

        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced.count(Classification::Different), 2);
        let shot = reduced
            .iter()
            .find(|p| p.left.as_ref().unwrap().file_type == FileType::Png)
            .unwrap();
        assert_eq!(shot.score, Some(1.0));
        assert!(shot.diagnostic.as_deref().unwrap().contains("left image"));
        let notes = reduced
            .iter()
            .find(|p| p.left.as_ref().unwrap().file_type == FileType::Txt)
            .unwrap();
        assert!(notes.diagnostic.is_none());

        let failing = Inspector::new(fx.store.clone()).with_unsupported_policy(UnsupportedPolicy::Fail);
        let err = failing.reduce(&group).await.unwrap_err();
        assert!(matches!(err, Error::Comparison(_)));
    }

    #[tokio::test]
    async fn test_tampered_payload_degrades_to_different() {
        let fx = fixture().await;
        fx.put(fx.left_ts, "page", FileType::Txt, b"one").await;
        fx.put(fx.right_ts, "page", FileType::Txt, b"two").await;
        let (left, right) = fx.lists().await;
        let tampered = fx.store.resolve(right.get(0).unwrap());
        tokio::fs::write(&tampered, b"changed behind the store").await.unwrap();

        let group = MProductGroupBuilder::new(&fx.store)
            .build(PairingMode::twin(left, right))
            .await
            .unwrap();
        let reduced = Inspector::new(fx.store.clone()).reduce(&group).await.unwrap();
        assert_eq!(reduced.products[0].classification, Classification::Different);
        assert_eq!(reduced.products[0].score, Some(1.0));

        let failing = Inspector::new(fx.store.clone()).with_unsupported_policy(UnsupportedPolicy::Fail);
        assert!(matches!(failing.reduce(&group).await, Err(Error::Integrity { .. })));
    }

    struct Fixed(f64);

    impl Comparator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn compare(&self, _left: &[u8], _right: &[u8]) -> Result<f64> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_registered_comparators_are_used() {
        let fx = fixture().await;
        fx.put(fx.left_ts, "page", FileType::Html, b"<p>old</p>").await;
        fx.put(fx.right_ts, "page", FileType::Html, b"<p>new</p>").await;
        fx.put(fx.left_ts, "blob", FileType::Binary, b"\x00\x01").await;
        fx.put(fx.right_ts, "blob", FileType::Binary, b"\x00\x02").await;
        let (left, right) = fx.lists().await;

        let group = MProductGroupBuilder::new(&fx.store)
            .build(PairingMode::twin(left, right))
            .await
            .unwrap();
        let registry = ComparatorRegistry::standard(5)
            .register(FileType::Html, Fixed(0.42))
            .with_fallback(Fixed(0.17));
        let reduced = Inspector::new(fx.store.clone())
            .with_comparators(registry)
            .reduce(&group)
            .await
            .unwrap();

        let scores: Vec<(FileType, Option<f64>, Classification)> = reduced
            .iter()
            .map(|p| (p.left.as_ref().unwrap().file_type, p.score, p.classification))
            .collect();
        assert_eq!(
            scores,
            vec![
                (FileType::Html, Some(0.42), Classification::Different),
                (FileType::Binary, Some(0.17), Classification::Different),
            ]
        );
    }

    #[test]
    fn test_sort_is_stable_for_missing() {
        let m = |fp: &str| Material {
            job_name: JobName::new("J").unwrap(),
            job_timestamp: JobTimestamp::parse("20240101_000000").unwrap(),
            file_type: FileType::Txt,
            metadata: Metadata::builder(fp).build(),
            fingerprint: fp.to_string(),
            size: 0,
            path: fp.into(),
        };
        let mut products = vec![
            MProduct::right_only(m("r1"), "1".into()),
            MProduct::left_only(m("l1"), "2".into()),
            MProduct::right_only(m("r2"), "3".into()),
        ];
        let mut scored = MProduct::matched(m("a"), m("b"), "0".into());
        scored.classification = Classification::Different;
        scored.score = Some(0.1);
        products.push(scored);

        sort_by_score(&mut products);
        let keys: Vec<&str> = products.iter().map(|p| p.query_key.as_str()).collect();
        assert_eq!(keys, vec!["0", "1", "2", "3"]);
    }
}
