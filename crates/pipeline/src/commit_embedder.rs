use std::collections::BTreeMap;
use std::sync::Arc;

use historian_types::{CommitEmbedding, CommitRecord, Embedder, FileCacheEntry, HistorianError, Result};

enum Slot {
    Cached(Vec<f32>),
    Batch(usize),
}

/// Embeds commit messages + summaries, reusing cached summary vectors
/// (SPEC_FULL.md §4.7). One cross-commit batch call amortizes network cost,
/// then results are reassembled per commit in original order.
pub struct CommitEmbedder;

impl CommitEmbedder {
    pub async fn run(
        new_commits: &[CommitRecord],
        cache: &BTreeMap<String, FileCacheEntry>,
        embedder: Arc<dyn Embedder>,
        embeddings_store: &mut BTreeMap<String, CommitEmbedding>,
    ) -> Result<Vec<String>> {
        let mut to_embed: Vec<String> = Vec::new();
        let mut plans: Vec<Vec<Slot>> = Vec::with_capacity(new_commits.len());
        let mut texts_per_commit: Vec<Vec<String>> = Vec::with_capacity(new_commits.len());

        for commit in new_commits {
            let mut plan = Vec::with_capacity(commit.message.len() + commit.summaries.len());
            let mut texts = Vec::with_capacity(commit.message.len() + commit.summaries.len());

            for message in &commit.message {
                texts.push(message.clone());
                plan.push(Slot::Batch(to_embed.len()));
                to_embed.push(message.clone());
            }

            for (i, summary) in commit.summaries.iter().enumerate() {
                texts.push(summary.clone());
                let cached = commit
                    .files
                    .get(i)
                    .and_then(|file| cache.get(file))
                    .filter(|entry| &entry.summary == summary);
                match cached {
                    Some(entry) => plan.push(Slot::Cached(entry.embedding.clone())),
                    None => {
                        plan.push(Slot::Batch(to_embed.len()));
                        to_embed.push(summary.clone());
                    }
                }
            }

            plans.push(plan);
            texts_per_commit.push(texts);
        }

        let batch_embeddings = if to_embed.is_empty() {
            Vec::new()
        } else {
            embedder.embed_many(&to_embed).await?
        };

        let mut new_oids = Vec::with_capacity(new_commits.len());
        for ((commit, plan), texts) in new_commits.iter().zip(plans.into_iter()).zip(texts_per_commit.into_iter()) {
            let mut embeddings = Vec::with_capacity(plan.len());
            for slot in plan {
                let vector = match slot {
                    Slot::Cached(v) => v,
                    Slot::Batch(idx) => batch_embeddings.get(idx).cloned().flatten().unwrap_or_default(),
                };
                embeddings.push(vector);
            }

            let record = CommitEmbedding { messages: texts, embeddings };
            if !record.is_aligned() {
                tracing::error!(
                    oid = %commit.oid,
                    messages = record.messages.len(),
                    embeddings = record.embeddings.len(),
                    "commit embeddings misaligned"
                );
                return Err(HistorianError::Validation(format!(
                    "commit {} embeddings misaligned: {} messages vs {} embeddings",
                    commit.oid,
                    record.messages.len(),
                    record.embeddings.len()
                )));
            }
            embeddings_store.insert(commit.oid.clone(), record);
            new_oids.push(commit.oid.clone());
        }

        Ok(new_oids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use historian_embed::MockBackend;
    use historian_types::FileDiff;

    fn commit(oid: &str, files: &[&str], summaries: &[&str]) -> CommitRecord {
        CommitRecord {
            oid: oid.to_string(),
            message: vec!["original".to_string()],
            files: files.iter().map(|f| f.to_string()).collect(),
            diffs: files
                .iter()
                .map(|f| (f.to_string(), FileDiff { diff: String::new(), added: true, deleted: false }))
                .collect(),
            summaries: summaries.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn embeds_and_validates_alignment() {
        let embedder: Arc<dyn Embedder> = Arc::new(MockBackend::default());
        let cache = BTreeMap::new();
        let mut store = BTreeMap::new();
        let commits = vec![commit("c1", &["a.txt"], &["a summary"])];

        let new_oids = CommitEmbedder::run(&commits, &cache, embedder, &mut store).await.unwrap();

        assert_eq!(new_oids, vec!["c1".to_string()]);
        let record = &store["c1"];
        assert!(record.is_aligned());
        assert_eq!(record.messages.len(), 2);
    }

    #[tokio::test]
    async fn reuses_cached_summary_embedding() {
        let embedder: Arc<dyn Embedder> = Arc::new(MockBackend::default());
        let cached_vec = vec![9.0_f32, 9.0, 9.0];
        let cache = BTreeMap::from([(
            "a.txt".to_string(),
            FileCacheEntry { summary: "cached summary".to_string(), embedding: cached_vec.clone() },
        )]);
        let mut store = BTreeMap::new();
        let commits = vec![commit("c1", &["a.txt"], &["cached summary"])];

        CommitEmbedder::run(&commits, &cache, embedder, &mut store).await.unwrap();

        let record = &store["c1"];
        assert_eq!(record.embeddings[1], cached_vec);
    }
}
