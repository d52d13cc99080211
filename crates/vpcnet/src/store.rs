//! Durable per-VPC state: one JSON file per VPC, written atomically.
//!
//! The reconciler writes a record only after every kernel step of an
//! operation has succeeded, so after a crash at most the VPC that was being
//! reconciled can be ahead of reality; the next operation on it re-drives
//! convergence.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::types::VpcRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state io: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file corrupt: {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state encode: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One `<vpc>.json` file per VPC under the state directory.
pub struct VpcStore {
    dir: PathBuf,
}

impl VpcStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Atomic write: encode to a sibling temp file, fsync, rename over the
    /// target.
    pub async fn put(&self, record: &VpcRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| StoreError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let json = serde_json::to_string_pretty(record).map_err(StoreError::Encode)?;
        let path = self.path_for(&record.name);
        let tmp = self.dir.join(format!("{}.json.tmp", record.name));

        let io_err = |p: &Path| {
            let p = p.to_path_buf();
            move |e: std::io::Error| StoreError::Io { path: p, source: e }
        };

        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err(&tmp))?;
        file.write_all(json.as_bytes()).await.map_err(io_err(&tmp))?;
        file.sync_all().await.map_err(io_err(&tmp))?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))
    }

    pub async fn get(&self, name: &str) -> Result<Option<VpcRecord>, StoreError> {
        let path = self.path_for(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| StoreError::Corrupt { path, source: e }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }

    /// All records in the state directory, sorted by VPC name.
    ///
    /// A missing directory is an empty store; a corrupt record is an error.
    pub async fn list(&self) -> Result<Vec<VpcRecord>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io { path: self.dir.clone(), source: e });
            }
        };

        let mut records = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|e| StoreError::Io {
                path: self.dir.clone(),
                source: e,
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| StoreError::Io {
                path: path.clone(),
                source: e,
            })?;
            let record: VpcRecord = serde_json::from_str(&content)
                .map_err(|e| StoreError::Corrupt { path, source: e })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Remove a record. Missing files are success.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }
}
