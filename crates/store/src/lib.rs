mod project_name;

pub use project_name::url_to_project_name;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use historian_types::{
    CommitEmbedding, CommitRecord, FileCacheEntry, HistorianError, ProjectStatus, Result, Store,
};

/// Lock files older than this are treated as released.
pub const LOCK_TTL_SECS: u64 = 7200;

/// Whole-project-directory, whole-file-JSON implementation of `Store`
/// (SPEC_FULL.md §4.1). See DESIGN.md for the storage-backend rationale.
pub struct JsonStore {
    project_name: String,
    project_dir: PathBuf,
}

impl JsonStore {
    /// Opens (creating if necessary) a project store rooted at `project_dir`.
    pub async fn open(
        project_dir: impl Into<PathBuf>,
        project_name: impl Into<String>,
    ) -> Result<Self> {
        let project_dir = project_dir.into();
        tokio::fs::create_dir_all(&project_dir).await?;
        Ok(JsonStore {
            project_name: project_name.into(),
            project_dir,
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn commits_logs_path(&self) -> PathBuf {
        self.project_dir.join("commits_logs.json")
    }

    fn commits_embeddings_path(&self) -> PathBuf {
        self.project_dir.join("commits_embeddings.json")
    }

    fn files_embeddings_path(&self) -> PathBuf {
        self.project_dir.join("files_embeddings.json")
    }

    fn status_path(&self) -> PathBuf {
        self.project_dir.join("status.json")
    }

    fn logs_path(&self) -> PathBuf {
        self.project_dir.join("logs.txt")
    }

    fn lock_path(&self) -> PathBuf {
        self.project_dir.join("repo.lock")
    }

    /// Reads and JSON-decodes `path`, returning `default` if the file does
    /// not exist. Mirrors `read_json_file`'s empty-on-absent behavior from
    /// the retrieved Python original.
    async fn read_json_or<T: serde::de::DeserializeOwned>(path: &Path, default: T) -> Result<T> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(default),
            Err(e) => Err(e.into()),
        }
    }

    /// Pretty-prints `value` and writes it via a temp-file-then-rename swap,
    /// so a crash mid-write never leaves a half-written artifact on disk.
    async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonStore {
    fn project_name(&self) -> &str {
        &self.project_name
    }

    async fn read_commit_logs(&self) -> Result<Vec<CommitRecord>> {
        Self::read_json_or(&self.commits_logs_path(), Vec::new()).await
    }

    async fn write_commit_logs(&self, logs: &[CommitRecord]) -> Result<()> {
        historian_types::validate_commit_records(logs)?;
        Self::write_json_atomic(&self.commits_logs_path(), &logs.to_vec()).await
    }

    async fn read_commits_embeddings(&self) -> Result<BTreeMap<String, CommitEmbedding>> {
        Self::read_json_or(&self.commits_embeddings_path(), BTreeMap::new()).await
    }

    async fn write_commits_embeddings(
        &self,
        embeddings: &BTreeMap<String, CommitEmbedding>,
    ) -> Result<()> {
        historian_types::validate_commits_embeddings(embeddings)?;
        Self::write_json_atomic(&self.commits_embeddings_path(), embeddings).await
    }

    async fn read_files_embeddings(&self) -> Result<BTreeMap<String, FileCacheEntry>> {
        Self::read_json_or(&self.files_embeddings_path(), BTreeMap::new()).await
    }

    async fn write_files_embeddings(&self, cache: &BTreeMap<String, FileCacheEntry>) -> Result<()> {
        historian_types::validate_files_embeddings(cache)?;
        Self::write_json_atomic(&self.files_embeddings_path(), cache).await
    }

    async fn read_status(&self) -> Result<Option<ProjectStatus>> {
        match tokio::fs::read(self.status_path()).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_status(&self, status: &ProjectStatus) -> Result<()> {
        Self::write_json_atomic(&self.status_path(), status).await
    }

    async fn read_logs(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.logs_path()).await {
            Ok(contents) => {
                if contents.trim().is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(contents))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn reset_logs(&self) -> Result<()> {
        tokio::fs::write(self.logs_path(), b"").await?;
        Ok(())
    }

    async fn log_error(&self, message: &str) -> Result<()> {
        tokio::fs::write(self.logs_path(), format!("ERROR: {message}")).await?;
        Ok(())
    }

    async fn is_locked(&self) -> Result<(bool, Option<u64>)> {
        let meta = match tokio::fs::metadata(self.lock_path()).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((false, None)),
            Err(e) => return Err(e.into()),
        };
        let created = meta
            .created()
            .or_else(|_| meta.modified())
            .map_err(HistorianError::from)?;
        let elapsed = SystemTime::now()
            .duration_since(created)
            .unwrap_or_default()
            .as_secs();
        if elapsed > LOCK_TTL_SECS {
            return Ok((false, None));
        }
        Ok((true, Some(elapsed)))
    }

    async fn acquire_lock(&self) -> Result<()> {
        let path = self.lock_path();
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let (locked, elapsed) = self.is_locked().await?;
                if locked {
                    return Err(HistorianError::Locked {
                        elapsed_secs: elapsed.unwrap_or(0),
                    });
                }
                // Stale lock: the previous holder never released it. Replace it.
                tokio::fs::remove_file(&path).await.ok();
                tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release_lock(&self) -> Result<()> {
        match tokio::fs::remove_file(self.lock_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use historian_types::FileDiff;
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("proj"), "proj").await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let (_dir, store) = store().await;
        assert!(store.read_commit_logs().await.unwrap().is_empty());
        assert!(store.read_commits_embeddings().await.unwrap().is_empty());
        assert!(store.read_files_embeddings().await.unwrap().is_empty());
        assert!(store.read_status().await.unwrap().is_none());
        assert!(store.read_logs().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_logs_round_trip() {
        let (_dir, store) = store().await;
        let record = CommitRecord {
            oid: "abc123".to_string(),
            message: vec!["hello".to_string()],
            files: vec!["a.txt".to_string()],
            diffs: BTreeMap::from([(
                "a.txt".to_string(),
                FileDiff {
                    diff: "+hello".to_string(),
                    added: true,
                    deleted: false,
                },
            )]),
            summaries: vec!["a file".to_string()],
        };
        store.write_commit_logs(&[record.clone()]).await.unwrap();
        let back = store.read_commit_logs().await.unwrap();
        assert_eq!(back, vec![record]);
    }

    #[tokio::test]
    async fn write_commit_logs_rejects_misaligned_records() {
        let (_dir, store) = store().await;
        let record = CommitRecord {
            oid: "abc".to_string(),
            message: vec![],
            files: vec!["a.txt".to_string(), "b.txt".to_string()],
            diffs: BTreeMap::new(),
            summaries: vec!["only one".to_string()],
        };
        assert!(store.write_commit_logs(&[record]).await.is_err());
    }

    #[tokio::test]
    async fn lock_acquire_then_contend_then_release() {
        let (_dir, store) = store().await;
        store.acquire_lock().await.unwrap();
        let (locked, elapsed) = store.is_locked().await.unwrap();
        assert!(locked);
        assert!(elapsed.is_some());

        let err = store.acquire_lock().await.unwrap_err();
        assert!(matches!(err, HistorianError::Locked { .. }));

        store.release_lock().await.unwrap();
        let (locked, _) = store.is_locked().await.unwrap();
        assert!(!locked);

        // Re-acquire succeeds after release.
        store.acquire_lock().await.unwrap();
        store.release_lock().await.unwrap();
    }

    #[tokio::test]
    async fn release_lock_is_idempotent_when_absent() {
        let (_dir, store) = store().await;
        store.release_lock().await.unwrap();
    }

    #[tokio::test]
    async fn log_error_then_read_then_reset() {
        let (_dir, store) = store().await;
        assert!(store.read_logs().await.unwrap().is_none());
        store.log_error("boom").await.unwrap();
        let logs = store.read_logs().await.unwrap().unwrap();
        assert!(logs.contains("boom"));
        store.reset_logs().await.unwrap();
        assert!(store.read_logs().await.unwrap().is_none());
    }
}
