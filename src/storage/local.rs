//! Local filesystem storage implementation.
//!
//! ## Features
//!
//! - **Write-once**: dated files are published with `hard_link`, which fails
//!   instead of replacing an existing file
//! - **Atomic baseline**: `latest.json` names the baseline's dated file and is
//!   replaced by temp-file rename, so a reader sees either the old or the new
//!   baseline, never rows of one with the token of the other

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Snapshot, UpdateToken};
use crate::storage::{LatestPointer, RunReport, SaveMetadata, SnapshotId, SnapshotStore, csv};

const LATEST_KEY: &str = "latest.csv";
const POINTER_KEY: &str = "latest.json";
const REPORT_KEY: &str = "last_run.json";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// File name of the dated snapshot for `token`.
    fn dated_key(token: &UpdateToken) -> Result<String> {
        let raw = token.as_str();
        if raw.is_empty()
            || raw.contains(['/', '\\'])
            || raw.contains("..")
            || raw == "latest"
        {
            return Err(AppError::validation(format!(
                "update token '{raw}' cannot be used as a file name"
            )));
        }
        Ok(format!("{raw}.csv"))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = self.path(&format!("{key}.tmp"));
        Self::write_file(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write bytes only if `key` does not exist yet.
    ///
    /// Returns `false` if the file was already there.
    async fn write_bytes_once(&self, key: &str, bytes: &[u8]) -> Result<bool> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = self.path(&format!("{key}.tmp"));
        Self::write_file(&tmp, bytes).await?;

        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) if e.kind() == ErrorKind::Unsupported => {
                log::debug!("hard_link unsupported under {:?}; using create_new", self.root_dir);
                self.create_new(&path, bytes).await
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn create_new(&self, path: &Path, bytes: &[u8]) -> Result<bool> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await;

        match file {
            Ok(mut file) => {
                file.write_all(bytes).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_snapshot(&self, key: &str, token: UpdateToken) -> Result<Option<Snapshot>> {
        let Some(bytes) = self.read_bytes(key).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| AppError::storage(format!("{key} is not valid UTF-8: {e}")))?;
        csv::decode(&text, token).map(Some)
    }

    /// Load the baseline.
    ///
    /// The pointer names the dated file, which never changes once written, so
    /// the rows always match the token. Without a pointer, `latest.csv` is
    /// read on its own.
    async fn load_latest(&self) -> Result<Option<Snapshot>> {
        match self.read_json::<LatestPointer>(POINTER_KEY).await? {
            Some(pointer) => {
                let key = Self::dated_key(&pointer.token)?;
                let snapshot = self.read_snapshot(&key, pointer.token.clone()).await?;
                if snapshot.is_none() {
                    return Err(AppError::storage(format!(
                        "{POINTER_KEY} points to {key}, which does not exist"
                    )));
                }
                Ok(snapshot)
            }
            None => {
                let snapshot = self
                    .read_snapshot(LATEST_KEY, UpdateToken::new("latest"))
                    .await?;
                if snapshot.is_some() {
                    log::warn!("No {POINTER_KEY} next to {LATEST_KEY}; baseline token unknown");
                }
                Ok(snapshot)
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for LocalStorage {
    async fn exists(&self, token: &UpdateToken) -> Result<bool> {
        let path = self.path(&Self::dated_key(token)?);
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn load(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        match id {
            SnapshotId::Latest => self.load_latest().await,
            SnapshotId::Dated(token) => {
                let key = Self::dated_key(token)?;
                self.read_snapshot(&key, token.clone()).await
            }
        }
    }

    async fn save(&self, token: &UpdateToken, snapshot: &Snapshot) -> Result<SaveMetadata> {
        let key = Self::dated_key(token)?;
        let text = csv::encode(snapshot);

        if !self.write_bytes_once(&key, text.as_bytes()).await? {
            log::warn!("Snapshot {key} already exists; not overwriting");
            return Err(AppError::AlreadyPublished(token.to_string()));
        }

        log::info!("Saved {} rows to {}", snapshot.len(), key);
        Ok(SaveMetadata {
            location: self.path(&key).display().to_string(),
            rows: snapshot.len(),
        })
    }

    async fn promote(&self, token: &UpdateToken) -> Result<()> {
        let key = Self::dated_key(token)?;
        let bytes = self.read_bytes(&key).await?.ok_or_else(|| {
            AppError::storage(format!("cannot promote {token}: {key} was never saved"))
        })?;

        // latest.csv is a convenience copy; the pointer is what `load` follows
        // and is replaced last.
        self.write_bytes(LATEST_KEY, &bytes).await?;
        self.write_json(
            POINTER_KEY,
            &LatestPointer {
                token: token.clone(),
                promoted_at: Utc::now(),
            },
        )
        .await?;

        log::info!("Promoted {key} to {LATEST_KEY}");
        Ok(())
    }

    async fn write_report(&self, report: &RunReport) -> Result<()> {
        self.write_json(REPORT_KEY, report).await
    }

    async fn load_report(&self) -> Result<Option<RunReport>> {
        self.read_json(REPORT_KEY).await
    }
}
