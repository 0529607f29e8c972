//! Content-addressed material store
//!
//! Materials live under a three-level address:
//!
//! ```text
//! <root>/<job name>/<job timestamp>/objects/<sha256>.<ext>
//! <root>/<job name>/<job timestamp>/index
//! ```
//!
//! Each index line is `<sha256>\t<ext>\t<size>\t<metadata json>` in write
//! order. Objects and the index are only ever replaced by rename, never
//! edited in place, so a reader sees either the previous or the next state
//! of an address.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::material::{Material, MaterialList};
use crate::metadata::Metadata;
use crate::query::QueryOnMetadata;
use crate::types::{FileType, JobName, JobTimestamp};
use crate::{Error, Result};

const OBJECTS_DIR: &str = "objects";
const INDEX_FILE: &str = "index";

/// Handle to a store rooted at one directory
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

/// One line of an address index
#[derive(Debug, Clone)]
struct IndexEntry {
    fingerprint: String,
    file_type: FileType,
    size: u64,
    metadata: Metadata,
}

impl IndexEntry {
    fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.fingerprint,
            self.file_type.extension(),
            self.size,
            self.metadata.canonical()
        )
    }

    fn parse(path: &Path, line_no: usize, line: &str) -> Result<Self> {
        let corrupt = |reason: &str| Error::IndexCorrupt {
            path: path.to_path_buf(),
            line: line_no,
            reason: reason.to_string(),
        };

        let mut fields = line.splitn(4, '\t');
        let fingerprint = fields.next().ok_or_else(|| corrupt("missing fingerprint"))?;
        let ext = fields.next().ok_or_else(|| corrupt("missing file type"))?;
        let size = fields.next().ok_or_else(|| corrupt("missing size"))?;
        let metadata = fields.next().ok_or_else(|| corrupt("missing metadata"))?;

        if fingerprint.len() != 64 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(corrupt("malformed fingerprint"));
        }

        Ok(Self {
            fingerprint: fingerprint.to_string(),
            file_type: FileType::from_extension(ext)
                .ok_or_else(|| corrupt(&format!("unknown file type {:?}", ext)))?,
            size: size.parse().map_err(|_| corrupt("malformed size"))?,
            metadata: Metadata::from_json(metadata)
                .map_err(|e| corrupt(&format!("malformed metadata: {}", e)))?,
        })
    }
}

/// Source of the bytes of a new material
enum Payload<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Result of pruning old timestamps of a job
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub removed_timestamps: usize,
    pub removed_files: usize,
    pub removed_bytes: u64,
}

impl Store {
    /// Open the store at `root`, creating the directory if needed
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::store_io(&root, e))?;

        info!("Opened material store at {:?}", root);
        Ok(Self { root })
    }

    /// Open the store at the configured root
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::open(&config.root).await
    }

    /// Root directory; reports are written here too
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// SHA-256 of `data`, lowercase hex
    pub fn hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// SHA-256 of a file, streamed
    pub async fn hash_file(path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| Error::store_io(path, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];

        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| Error::store_io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Directory holding one (job, timestamp) address
    pub fn address_dir(&self, job: &JobName, ts: &JobTimestamp) -> PathBuf {
        self.root.join(job.as_str()).join(ts.to_string())
    }

    fn index_path(&self, job: &JobName, ts: &JobTimestamp) -> PathBuf {
        self.address_dir(job, ts).join(INDEX_FILE)
    }

    /// Object path relative to the store root
    pub fn object_relative_path(
        job: &JobName,
        ts: &JobTimestamp,
        fingerprint: &str,
        file_type: FileType,
    ) -> PathBuf {
        PathBuf::from(job.as_str())
            .join(ts.to_string())
            .join(OBJECTS_DIR)
            .join(format!("{}.{}", fingerprint, file_type.extension()))
    }

    /// Absolute location of a material's payload
    pub fn resolve(&self, material: &Material) -> PathBuf {
        self.root.join(&material.path)
    }

    fn material_from(&self, job: &JobName, ts: &JobTimestamp, entry: &IndexEntry) -> Material {
        Material {
            job_name: job.clone(),
            job_timestamp: *ts,
            file_type: entry.file_type,
            metadata: entry.metadata.clone(),
            fingerprint: entry.fingerprint.clone(),
            size: entry.size,
            path: Self::object_relative_path(job, ts, &entry.fingerprint, entry.file_type),
        }
    }

    async fn load_index(&self, job: &JobName, ts: &JobTimestamp) -> Result<Vec<IndexEntry>> {
        let path = self.index_path(job, ts);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::store_io(&path, e)),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| IndexEntry::parse(&path, i + 1, line))
            .collect()
    }

    async fn save_index(&self, job: &JobName, ts: &JobTimestamp, entries: &[IndexEntry]) -> Result<()> {
        let path = self.index_path(job, ts);
        let mut content = String::new();
        for entry in entries {
            content.push_str(&entry.to_line());
            content.push('\n');
        }
        write_durably(&path, content.as_bytes())
            .await
            .map_err(|e| Error::store_io(&path, e))
    }

    /// Persist `payload` under (job, ts).
    ///
    /// Byte-identical payloads under one address deduplicate to the material
    /// written first; its metadata is kept.
    pub async fn write(
        &self,
        job: &JobName,
        ts: &JobTimestamp,
        file_type: FileType,
        metadata: Metadata,
        payload: &[u8],
    ) -> Result<Material> {
        let fingerprint = Self::hash(payload);
        self.commit(job, ts, file_type, metadata, fingerprint, Payload::Bytes(payload))
            .await
    }

    /// Persist the content of a file produced outside the store. The file is
    /// streamed, never loaded whole, and must not change during the call.
    pub async fn write_file(
        &self,
        job: &JobName,
        ts: &JobTimestamp,
        file_type: FileType,
        metadata: Metadata,
        src: impl AsRef<Path>,
    ) -> Result<Material> {
        let src = src.as_ref();
        let fingerprint = Self::hash_file(src).await?;
        self.commit(job, ts, file_type, metadata, fingerprint, Payload::File(src))
            .await
    }

    async fn commit(
        &self,
        job: &JobName,
        ts: &JobTimestamp,
        file_type: FileType,
        metadata: Metadata,
        fingerprint: String,
        payload: Payload<'_>,
    ) -> Result<Material> {
        let objects_dir = self.address_dir(job, ts).join(OBJECTS_DIR);
        fs::create_dir_all(&objects_dir)
            .await
            .map_err(|e| Error::store_io(&objects_dir, e))?;

        let mut entries = self.load_index(job, ts).await?;
        if let Some(existing) = entries.iter().find(|e| e.fingerprint == fingerprint) {
            if existing.metadata != metadata {
                warn!(
                    "Payload {} already stored in {}/{} with metadata {}; ignoring metadata {}",
                    &fingerprint[..7],
                    job,
                    ts,
                    existing.metadata,
                    metadata
                );
            } else {
                debug!("Material {} already exists in {}/{}", &fingerprint[..7], job, ts);
            }
            return Ok(self.material_from(job, ts, existing));
        }

        let relative = Self::object_relative_path(job, ts, &fingerprint, file_type);
        let object_path = self.root.join(&relative);
        let size = match payload {
            Payload::Bytes(data) => {
                if fs::metadata(&object_path).await.is_err() {
                    write_durably(&object_path, data)
                        .await
                        .map_err(|e| Error::store_io(&object_path, e))?;
                }
                data.len() as u64
            }
            Payload::File(src) => copy_durably(src, &object_path)
                .await
                .map_err(|e| Error::store_io(&object_path, e))?,
        };

        let entry = IndexEntry {
            fingerprint,
            file_type,
            size,
            metadata,
        };
        let material = self.material_from(job, ts, &entry);
        entries.push(entry);
        self.save_index(job, ts, &entries).await?;

        debug!(
            "Stored material {} ({} bytes) in {}/{} with metadata {}",
            material.short_fingerprint(),
            material.size,
            job,
            ts,
            material.metadata
        );
        Ok(material)
    }

    /// Materials under (job, ts) satisfying `query`, in write order
    pub async fn select(
        &self,
        job: &JobName,
        ts: &JobTimestamp,
        query: &QueryOnMetadata,
    ) -> Result<MaterialList> {
        // An address without an index was never completely written
        let index = self.index_path(job, ts);
        if let Err(e) = fs::metadata(&index).await {
            return Err(Error::store_io(self.address_dir(job, ts), e));
        }

        let entries = self.load_index(job, ts).await?;
        let list = MaterialList::from_materials(
            query.clone(),
            entries
                .iter()
                .filter(|e| query.matches(&e.metadata))
                .map(|e| self.material_from(job, ts, e)),
        );

        debug!(
            "Selected {}/{} materials from {}/{} with query {}",
            list.len(),
            entries.len(),
            job,
            ts,
            query
        );
        Ok(list)
    }

    /// Payload bytes of `material`, verified against its fingerprint
    pub async fn read(&self, material: &Material) -> Result<Vec<u8>> {
        let path = self.resolve(material);
        let data = fs::read(&path).await.map_err(|e| Error::store_io(&path, e))?;

        let actual = Self::hash(&data);
        if actual != material.fingerprint {
            return Err(Error::Integrity {
                path: material.path.display().to_string(),
                expected: material.fingerprint.clone(),
                actual,
            });
        }

        Ok(data)
    }

    /// Job names present in the store, sorted
    pub async fn list_jobs(&self) -> Result<Vec<JobName>> {
        let mut jobs: Vec<JobName> = list_dir_names(&self.root)
            .await?
            .into_iter()
            .filter_map(|name| JobName::new(name).ok())
            .collect();
        jobs.sort();
        Ok(jobs)
    }

    /// Timestamps recorded for `job`, oldest first. A job that was never
    /// written has none; addresses left without an index are skipped.
    pub async fn list_timestamps(&self, job: &JobName) -> Result<Vec<JobTimestamp>> {
        let job_dir = self.root.join(job.as_str());
        if fs::metadata(&job_dir).await.is_err() {
            return Ok(Vec::new());
        }

        let mut timestamps = Vec::new();
        for name in list_dir_names(&job_dir).await? {
            let Ok(ts) = JobTimestamp::parse(&name) else {
                continue;
            };
            if fs::metadata(self.index_path(job, &ts)).await.is_ok() {
                timestamps.push(ts);
            } else {
                debug!("Skipping {}/{}: no index", job, ts);
            }
        }
        timestamps.sort();
        Ok(timestamps)
    }

    /// Latest timestamp of `job` strictly before `ts`
    pub async fn previous_timestamp(
        &self,
        job: &JobName,
        ts: &JobTimestamp,
    ) -> Result<Option<JobTimestamp>> {
        Ok(self
            .list_timestamps(job)
            .await?
            .into_iter()
            .filter(|t| t < ts)
            .max())
    }

    /// Remove all but the newest `keep` timestamps of `job`
    pub async fn prune(&self, job: &JobName, keep: usize) -> Result<PruneStats> {
        let mut stats = PruneStats::default();
        let timestamps = self.list_timestamps(job).await?;
        let excess = timestamps.len().saturating_sub(keep);

        for ts in &timestamps[..excess] {
            let dir = self.address_dir(job, ts);
            for entry in walkdir::WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    stats.removed_files += 1;
                    stats.removed_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
            fs::remove_dir_all(&dir)
                .await
                .map_err(|e| Error::store_io(&dir, e))?;
            stats.removed_timestamps += 1;
        }

        info!(
            "Pruned {}: removed {} timestamps ({} files, {} bytes), kept {}",
            job,
            stats.removed_timestamps,
            stats.removed_files,
            stats.removed_bytes,
            timestamps.len() - excess
        );
        Ok(stats)
    }
}

/// Names of the sub-directories of `dir`
async fn list_dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(|e| Error::store_io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::store_io(dir, e))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    path.with_file_name(tmp_name)
}

/// Write via a sibling temp file, fsync, then rename over `path`
pub async fn write_durably(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = temp_sibling(path);

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await
}

/// Copy `src` to `path` the same way, returning the bytes copied
async fn copy_durably(src: &Path, path: &Path) -> std::io::Result<u64> {
    let tmp_path = temp_sibling(path);

    let size = fs::copy(src, &tmp_path).await?;
    fs::File::open(&tmp_path).await?.sync_all().await?;

    fs::rename(&tmp_path, path).await?;
    Ok(size)
}
