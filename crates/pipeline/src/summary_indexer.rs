use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use historian_types::{
    Chat, ChatParams, CommitRecord, Embedder, FileCacheEntry, RepoSource, Result, EMPTY_SUMMARY,
};
use tokio::sync::Semaphore;

use crate::glue;

/// Per-file summarization with cache reuse (SPEC_FULL.md §4.5). Bounded
/// concurrency via `tokio::sync::Semaphore`; results are written into a
/// pre-sized `Vec` rather than pushed on completion, to keep summary/file
/// index alignment regardless of completion order.
pub struct SummaryIndexer;

impl SummaryIndexer {
    pub async fn run(
        new_commits: &mut [CommitRecord],
        cache: &mut BTreeMap<String, FileCacheEntry>,
        source: Arc<dyn RepoSource>,
        chat: Arc<dyn Chat>,
        embedder: Arc<dyn Embedder>,
        ignore_patterns: &[String],
        chat_gate: Arc<Semaphore>,
        file_io_gate: Arc<Semaphore>,
        progress: impl Fn(f64) + Send + Sync + 'static,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        let mut candidates: Vec<String> = Vec::new();
        let mut total_files = 0usize;

        for commit in new_commits.iter() {
            for file in &commit.files {
                if !seen.insert(file.clone()) {
                    continue;
                }
                total_files += 1;
                if glue::is_ignored(file, ignore_patterns) {
                    continue;
                }
                if cache.contains_key(file) {
                    continue;
                }
                candidates.push(file.clone());
            }
        }

        let progress = Arc::new(progress);
        let processed = Arc::new(AtomicUsize::new(total_files - candidates.len()));
        Self::report(&processed, total_files, &progress);

        // Step 1: read worktree contents under the file I/O gate, classifying
        // each candidate as either EMPTY_SUMMARY (missing/empty/binary) or a
        // pending summarization job.
        let mut reads = Vec::with_capacity(candidates.len());
        for path in &candidates {
            let source = Arc::clone(&source);
            let gate = Arc::clone(&file_io_gate);
            let path = path.clone();
            reads.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.expect("file i/o semaphore closed");
                let content = source.read_worktree_file(&path).await;
                (path, content)
            }));
        }

        let mut pending_jobs: Vec<(String, String)> = Vec::new();
        let mut resolved: BTreeMap<String, String> = BTreeMap::new();
        for handle in reads {
            let (path, content) = handle.await.map_err(|e| {
                historian_types::HistorianError::Internal(format!("read task panicked: {e}"))
            })?;
            match content? {
                Some(text) if !text.trim().is_empty() => pending_jobs.push((path, text)),
                _ => {
                    resolved.insert(path, EMPTY_SUMMARY.to_string());
                }
            }
            processed.fetch_add(1, Ordering::SeqCst);
            Self::report(&processed, total_files, &progress);
        }

        // Step 2: summarize remaining files concurrently, preserving job
        // index via a pre-sized Vec so out-of-order completion never
        // misaligns results.
        let mut summary_slots: Vec<Option<String>> = vec![None; pending_jobs.len()];
        let mut handles = Vec::with_capacity(pending_jobs.len());
        for (idx, (path, content)) in pending_jobs.iter().enumerate() {
            let chat = Arc::clone(&chat);
            let gate = Arc::clone(&chat_gate);
            let prompt = format!("Summarize this file ({path}):\n{content}");
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.expect("chat semaphore closed");
                let params = ChatParams::default();
                let result = chat.send(&prompt, &params).await;
                (idx, result)
            }));
        }
        for handle in handles {
            let (idx, result) = handle.await.map_err(|e| {
                historian_types::HistorianError::Internal(format!("summarize task panicked: {e}"))
            })?;
            let summary = match result {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "file summarization failed, using empty summary");
                    EMPTY_SUMMARY.to_string()
                }
            };
            summary_slots[idx] = Some(summary);
            processed.fetch_add(1, Ordering::SeqCst);
            Self::report(&processed, total_files, &progress);
        }

        // Step 3: batch-embed the non-empty summaries in a single call.
        let to_embed: Vec<String> = summary_slots
            .iter()
            .map(|s| s.clone().unwrap_or_default())
            .collect();
        let embeddings = if to_embed.is_empty() {
            Vec::new()
        } else {
            embedder.embed_many(&to_embed).await?
        };

        for (idx, (path, _content)) in pending_jobs.into_iter().enumerate() {
            let summary = summary_slots[idx].clone().unwrap_or_else(|| EMPTY_SUMMARY.to_string());
            match embeddings.get(idx).cloned().flatten() {
                Some(embedding) => {
                    cache.insert(path.clone(), FileCacheEntry { summary: summary.clone(), embedding });
                    resolved.insert(path, summary);
                }
                None => {
                    resolved.insert(path.clone(), EMPTY_SUMMARY.to_string());
                }
            }
        }

        // Step 4: align each commit's summaries with its files from the cache.
        for commit in new_commits.iter_mut() {
            let mut summaries = Vec::with_capacity(commit.files.len());
            for file in &commit.files {
                if let Some(entry) = cache.get(file) {
                    summaries.push(entry.summary.clone());
                } else if let Some(summary) = resolved.get(file) {
                    summaries.push(summary.clone());
                } else {
                    summaries.push(EMPTY_SUMMARY.to_string());
                }
            }
            commit.summaries = summaries;
        }

        processed.store(total_files, Ordering::SeqCst);
        Self::report(&processed, total_files, &progress);
        Ok(())
    }

    fn report(processed: &AtomicUsize, total: usize, progress: &(impl Fn(f64) + Send + Sync)) {
        let pct = if total == 0 {
            100.0
        } else {
            (processed.load(Ordering::SeqCst) as f64 / total as f64) * 100.0
        };
        progress(pct.clamp(0.0, 100.0));
    }
}
