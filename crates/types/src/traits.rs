use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{CommitRecord, FileCacheEntry, ProjectStatus, RawCommit};

/// Parameters governing one `Chat::send` call, per SPEC_FULL.md §4.3.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: std::time::Duration,
    pub max_retries: u32,
}

impl Default for ChatParams {
    fn default() -> Self {
        ChatParams {
            model: String::new(),
            temperature: None,
            max_tokens: None,
            timeout: std::time::Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Abstract LLM chat backend. The async form is canonical; bounded
/// concurrency is the *caller's* responsibility (a `tokio::sync::Semaphore`
/// acquired before calling `send`), so the gates named in SPEC_FULL.md §5
/// stay visible at the call sites that the ordering guarantees depend on.
#[async_trait]
pub trait Chat: Send + Sync {
    async fn send(&self, prompt: &str, params: &ChatParams) -> Result<String>;
}

/// Abstract text-embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_one(&self, text: &str) -> Result<Option<Vec<f32>>>;
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;
}

/// Wraps an external VCS. `historian-ingest::Git2RepoSource` is the only
/// implementation; the trait exists so the pipeline crate never depends on
/// `git2` directly.
#[async_trait]
pub trait RepoSource: Send + Sync {
    async fn checkout(&self, rev: &str) -> Result<()>;

    /// Newest-first, up to `max_depth` entries.
    async fn iter_commits_from_head(&self, max_depth: usize) -> Result<Vec<RawCommit>>;

    async fn file_exists_in_worktree(&self, path: &str) -> Result<bool>;

    /// Reads a file's current working-tree contents, if it exists and is
    /// valid UTF-8 text.
    async fn read_worktree_file(&self, path: &str) -> Result<Option<String>>;

    /// Textual project tree rooted at the worktree, for the Localizer.
    async fn project_tree(&self, exclude_dirs: &[String]) -> Result<Vec<String>>;

    fn worktree_path(&self) -> &std::path::Path;
}

/// On-disk layout for a project's persisted artifacts (SPEC_FULL.md §4.1).
#[async_trait]
pub trait Store: Send + Sync {
    fn project_name(&self) -> &str;

    async fn read_commit_logs(&self) -> Result<Vec<CommitRecord>>;
    async fn write_commit_logs(&self, logs: &[CommitRecord]) -> Result<()>;

    async fn read_commits_embeddings(
        &self,
    ) -> Result<BTreeMap<String, crate::model::CommitEmbedding>>;
    async fn write_commits_embeddings(
        &self,
        embeddings: &BTreeMap<String, crate::model::CommitEmbedding>,
    ) -> Result<()>;

    async fn read_files_embeddings(&self) -> Result<BTreeMap<String, FileCacheEntry>>;
    async fn write_files_embeddings(
        &self,
        cache: &BTreeMap<String, FileCacheEntry>,
    ) -> Result<()>;

    async fn read_status(&self) -> Result<Option<ProjectStatus>>;
    async fn write_status(&self, status: &ProjectStatus) -> Result<()>;

    async fn read_logs(&self) -> Result<Option<String>>;
    async fn reset_logs(&self) -> Result<()>;
    async fn log_error(&self, message: &str) -> Result<()>;

    /// Returns `(locked, elapsed_secs)`. `locked` is false once the lock's
    /// age exceeds the TTL, even if the lock file is still present.
    async fn is_locked(&self) -> Result<(bool, Option<u64>)>;
    async fn acquire_lock(&self) -> Result<()>;
    async fn release_lock(&self) -> Result<()>;
}
