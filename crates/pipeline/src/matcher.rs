use std::collections::BTreeMap;
use std::sync::Arc;

use historian_types::{CommitEmbedding, Embedder, MatchResult, MatchStrength, Result};

/// Cosine similarity against a zero-norm guard (SPEC_FULL.md §4.8): a
/// zero-norm vector on either side yields `0.0` rather than `NaN`/`inf`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Embedding-similarity retrieval over stored commit vectors. A plain
/// in-memory linear scan, since `JsonStore` holds everything in a flat
/// mapping rather than a vector index.
pub struct Matcher;

impl Matcher {
    pub async fn search(
        query: &str,
        strength: MatchStrength,
        top_n: usize,
        embedder: Arc<dyn Embedder>,
        commits_embeddings: &BTreeMap<String, CommitEmbedding>,
    ) -> Result<Vec<MatchResult>> {
        let Some(query_vec) = embedder.embed_one(query).await? else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<MatchResult> = commits_embeddings
            .iter()
            .filter_map(|(oid, record)| {
                let similarity = record
                    .embeddings
                    .iter()
                    .map(|v| cosine_similarity(&query_vec, v))
                    .fold(f32::MIN, f32::max);
                if similarity >= strength.min_similarity() {
                    Some(MatchResult { oid: oid.clone(), similarity })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_n);
        Ok(matches)
    }
}
