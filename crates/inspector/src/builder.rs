//! Group builder: matches two material lists into an [`MProductGroup`]

use std::collections::HashMap;

use materialstore_common::{
    Error, IgnoreMetadataKeys, Material, MaterialList, Result, Side, Store,
};
use tracing::{debug, warn};

use crate::group::{MProduct, MProductGroup, PairingKind};

/// Inputs for chronological pairing of one job
#[derive(Debug, Clone)]
pub enum ChronologicalInput {
    /// A single list covering exactly two timestamps; the earlier is left
    Spanning { materials: MaterialList },
    /// Lists selected by the caller
    Explicit {
        earlier: MaterialList,
        later: MaterialList,
    },
    /// The current run, paired with the latest earlier run found in the store
    Previous { current: MaterialList },
}

#[derive(Debug, Clone)]
pub enum PairingMode {
    Chronological(ChronologicalInput),
    /// Two independent lists, typically two job names
    Twin {
        left: MaterialList,
        right: MaterialList,
    },
}

impl PairingMode {
    pub fn chronos(current: MaterialList) -> Self {
        PairingMode::Chronological(ChronologicalInput::Previous { current })
    }

    pub fn twin(left: MaterialList, right: MaterialList) -> Self {
        PairingMode::Twin { left, right }
    }
}

/// Builds product groups; holds the store for lookups of earlier runs
#[derive(Debug, Clone)]
pub struct MProductGroupBuilder<'a> {
    store: &'a Store,
    ignore: IgnoreMetadataKeys,
}

impl<'a> MProductGroupBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            ignore: IgnoreMetadataKeys::none(),
        }
    }

    pub fn ignore_keys(mut self, ignore: IgnoreMetadataKeys) -> Self {
        self.ignore = ignore;
        self
    }

    pub async fn build(&self, mode: PairingMode) -> Result<MProductGroup> {
        let (kind, left, right) = match mode {
            PairingMode::Twin { left, right } => (PairingKind::Twin, left, right),
            PairingMode::Chronological(input) => {
                let (earlier, later) = self.resolve_chronological(input).await?;
                (PairingKind::Chronological, earlier, later)
            }
        };

        let products = pair(&left, &right, &self.ignore)?;
        debug!(
            "Paired {} left and {} right materials into {} products ({})",
            left.len(),
            right.len(),
            products.len(),
            kind
        );

        Ok(MProductGroup {
            kind,
            left_label: describe(&left),
            right_label: describe(&right),
            ignore_keys: self.ignore.clone(),
            products,
            reduced: false,
        })
    }

    async fn resolve_chronological(
        &self,
        input: ChronologicalInput,
    ) -> Result<(MaterialList, MaterialList)> {
        match input {
            ChronologicalInput::Explicit { earlier, later } => Ok((earlier, later)),
            ChronologicalInput::Spanning { materials } => {
                if materials.job_names().len() != 1 {
                    return Err(Error::InvalidPairing(format!(
                        "chronological pairing needs exactly one job, got {}",
                        materials.job_names().len()
                    )));
                }
                let timestamps: Vec<_> = materials.job_timestamps().into_iter().collect();
                match timestamps.as_slice() {
                    [earlier, later] => Ok((materials.at_timestamp(*earlier), materials.at_timestamp(*later))),
                    other => Err(Error::InvalidPairing(format!(
                        "chronological pairing needs exactly two timestamps, got {}",
                        other.len()
                    ))),
                }
            }
            ChronologicalInput::Previous { current } => {
                let first = current.get(0).ok_or_else(|| {
                    Error::InvalidPairing("current material list is empty".to_string())
                })?;
                if current.job_names().len() != 1 || current.job_timestamps().len() != 1 {
                    return Err(Error::InvalidPairing(
                        "current material list must come from one job and timestamp".to_string(),
                    ));
                }
                let (job, ts) = (first.job_name.clone(), first.job_timestamp);

                match self.store.previous_timestamp(&job, &ts).await? {
                    Some(previous) => {
                        let earlier = self.store.select(&job, &previous, current.query()).await?;
                        Ok((earlier, current))
                    }
                    None => {
                        warn!(
                            "No run of {} precedes {}; comparing the current run with itself",
                            job, ts
                        );
                        Ok((current.clone(), current))
                    }
                }
            }
        }
    }
}

/// `job/timestamp` of a list, or a brace set when it spans several
fn describe(list: &MaterialList) -> String {
    let jobs: Vec<String> = list.job_names().iter().map(|j| j.to_string()).collect();
    let timestamps: Vec<String> = list.job_timestamps().iter().map(|t| t.to_string()).collect();
    let join = |parts: Vec<String>| match parts.len() {
        0 => "-".to_string(),
        1 => parts.into_iter().collect(),
        _ => format!("{{{}}}", parts.join(",")),
    };
    format!("{}/{}", join(jobs), join(timestamps))
}

/// Reduced lookup keys of `list`, rejecting duplicates
fn keys_of(list: &MaterialList, ignore: &IgnoreMetadataKeys, side: Side) -> Result<Vec<String>> {
    let keys: Vec<String> = list
        .iter()
        .map(|m| m.metadata.without(ignore).canonical())
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for key in &keys {
        *counts.entry(key.as_str()).or_default() += 1;
    }
    if let Some(dup) = keys.iter().find(|k| counts[k.as_str()] > 1) {
        return Err(Error::AmbiguousMatch {
            side,
            key: dup.clone(),
            count: counts[dup.as_str()],
        });
    }
    Ok(keys)
}

/// Match `left` against `right` by metadata minus `ignore`.
///
/// Matches come out pending, unmatched left materials as missing-right and
/// unmatched right materials as missing-left, sorted by key and then by
/// input order (left before right-only).
pub fn pair(
    left: &MaterialList,
    right: &MaterialList,
    ignore: &IgnoreMetadataKeys,
) -> Result<Vec<MProduct>> {
    let right_keys = keys_of(right, ignore, Side::Right)?;
    let left_keys = keys_of(left, ignore, Side::Left)?;

    let lookup: HashMap<&str, usize> = right_keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();
    let mut matched = vec![false; right.len()];
    let mut entries: Vec<(String, usize, MProduct)> = Vec::with_capacity(left.len() + right.len());

    for (i, (material, key)) in left.iter().zip(left_keys).enumerate() {
        let product = match lookup.get(key.as_str()) {
            Some(&j) => {
                matched[j] = true;
                MProduct::matched(material.clone(), right_material(right, j)?, key.clone())
            }
            None => MProduct::left_only(material.clone(), key.clone()),
        };
        entries.push((key, i, product));
    }

    for (j, (material, key)) in right.iter().zip(right_keys).enumerate() {
        if !matched[j] {
            entries.push((key.clone(), left.len() + j, MProduct::right_only(material.clone(), key)));
        }
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    Ok(entries.into_iter().map(|(_, _, p)| p).collect())
}

fn right_material(right: &MaterialList, index: usize) -> Result<Material> {
    right
        .get(index)
        .cloned()
        .ok_or_else(|| Error::InvalidPairing(format!("right material {} vanished", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Classification;
    use materialstore_common::{FileType, JobName, JobTimestamp, Metadata, QueryOnMetadata};
    use std::path::PathBuf;

    fn material(ts: &str, fingerprint: &str, metadata: Metadata) -> Material {
        Material {
            job_name: JobName::new("J").unwrap(),
            job_timestamp: JobTimestamp::parse(ts).unwrap(),
            file_type: FileType::Png,
            metadata,
            fingerprint: fingerprint.to_string(),
            size: 0,
            path: PathBuf::from(fingerprint),
        }
    }

    fn list(materials: Vec<Material>) -> MaterialList {
        MaterialList::from_materials(QueryOnMetadata::Any, materials)
    }

    const T1: &str = "20240101_000000";
    const T2: &str = "20240102_000000";

    #[test]
    fn test_pair_match_and_missing() {
        let left = list(vec![
            material(T1, "l-a", Metadata::builder("a").build()),
            material(T1, "l-b", Metadata::builder("b").build()),
        ]);
        let right = list(vec![
            material(T2, "r-c", Metadata::builder("c").build()),
            material(T2, "r-a", Metadata::builder("a").build()),
        ]);

        let products = pair(&left, &right, &IgnoreMetadataKeys::none()).unwrap();
        let tags: Vec<Classification> = products.iter().map(|p| p.classification).collect();
        assert_eq!(
            tags,
            vec![Classification::Pending, Classification::MissingRight, Classification::MissingLeft]
        );
        assert_eq!(products[0].right.as_ref().unwrap().fingerprint, "r-a");
    }

    #[test]
    fn test_pair_ignores_keys() {
        let left = list(vec![material(T1, "l", Metadata::builder("a").put("seq", "1").build())]);
        let right = list(vec![material(T2, "r", Metadata::builder("a").put("seq", "7").build())]);

        let strict = pair(&left, &right, &IgnoreMetadataKeys::none()).unwrap();
        assert_eq!(strict.len(), 2);

        let loose = pair(&left, &right, &IgnoreMetadataKeys::of(["seq"])).unwrap();
        assert_eq!(loose.len(), 1);
        assert_eq!(loose[0].classification, Classification::Pending);
        assert_eq!(loose[0].query_key, r#"{"URL":"a"}"#);
    }

    #[test]
    fn test_duplicate_right_key_is_ambiguous() {
        let left = list(vec![material(T1, "l", Metadata::builder("a").put("seq", "1").build())]);
        let right = list(vec![
            material(T2, "r1", Metadata::builder("a").put("seq", "1").build()),
            material(T2, "r2", Metadata::builder("a").put("seq", "2").build()),
        ]);

        let err = pair(&left, &right, &IgnoreMetadataKeys::of(["seq"])).unwrap_err();
        match err {
            Error::AmbiguousMatch { side, count, key } => {
                assert_eq!(side, Side::Right);
                assert_eq!(count, 2);
                assert_eq!(key, r#"{"URL":"a"}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_describe() {
        let one = list(vec![material(T1, "x", Metadata::builder("a").build())]);
        assert_eq!(describe(&one), format!("J/{}", T1));

        let two = list(vec![
            material(T1, "x", Metadata::builder("a").build()),
            material(T2, "y", Metadata::builder("a").build()),
        ]);
        assert_eq!(describe(&two), format!("J/{{{},{}}}", T1, T2));
        assert_eq!(describe(&list(vec![])), "-/-");
    }

    #[tokio::test]
    async fn test_spanning_requires_two_timestamps() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        let builder = MProductGroupBuilder::new(&store);

        let single = list(vec![material(T1, "x", Metadata::builder("a").build())]);
        let err = builder
            .build(PairingMode::Chronological(ChronologicalInput::Spanning { materials: single }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPairing(_)));

        let spanning = list(vec![
            material(T2, "later", Metadata::builder("a").build()),
            material(T1, "earlier", Metadata::builder("a").build()),
        ]);
        let group = builder
            .build(PairingMode::Chronological(ChronologicalInput::Spanning { materials: spanning }))
            .await
            .unwrap();
        assert_eq!(group.len(), 1);
        let product = &group.products[0];
        assert_eq!(product.left.as_ref().unwrap().fingerprint, "earlier");
        assert_eq!(product.right.as_ref().unwrap().fingerprint, "later");
        assert_eq!(group.left_label, format!("J/{}", T1));
    }

    #[tokio::test]
    async fn test_previous_with_empty_current_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();

        let err = MProductGroupBuilder::new(&store)
            .build(PairingMode::chronos(list(vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPairing(_)));
    }

    #[tokio::test]
    async fn test_previous_skips_incomplete_runs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        let job = JobName::new("J").unwrap();
        let (t1, t2, t3) = (
            JobTimestamp::parse(T1).unwrap(),
            JobTimestamp::parse(T2).unwrap(),
            JobTimestamp::parse(T2).unwrap().plus_seconds(60),
        );

        store
            .write(&job, &t1, FileType::Txt, Metadata::builder("a").build(), b"good run")
            .await
            .unwrap();
        tokio::fs::create_dir_all(store.address_dir(&job, &t2).join("objects"))
            .await
            .unwrap();
        store
            .write(&job, &t3, FileType::Txt, Metadata::builder("a").build(), b"current run")
            .await
            .unwrap();

        let current = store.select(&job, &t3, &QueryOnMetadata::ANY).await.unwrap();
        let group = MProductGroupBuilder::new(&store)
            .build(PairingMode::chronos(current))
            .await
            .unwrap();

        assert_eq!(group.left_label, format!("J/{}", T1));
        assert_eq!(group.len(), 1);
        assert_eq!(group.products[0].classification, Classification::Pending);
    }
}
