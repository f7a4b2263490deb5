use std::collections::BTreeMap;

use crate::error::{HistorianError, Result};
use crate::model::{CommitEmbedding, CommitRecord, FileCacheEntry};

/// Invariant 1 (SPEC_FULL.md §8): every commit's `files`/`summaries` stay
/// aligned. Mirrors the retrieved Python original's `validate_commits_logs`.
pub fn validate_commit_records(records: &[CommitRecord]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for record in records {
        if !seen.insert(record.oid.as_str()) {
            return Err(HistorianError::Validation(format!(
                "duplicate commit oid: {}",
                record.oid
            )));
        }
        if !record.is_aligned() {
            return Err(HistorianError::Validation(format!(
                "commit {} has {} files but {} summaries",
                record.oid,
                record.files.len(),
                record.summaries.len()
            )));
        }
    }
    Ok(())
}

/// Mirrors `validate_commits_embeddings` in the retrieved Python original.
pub fn validate_commits_embeddings(embeddings: &BTreeMap<String, CommitEmbedding>) -> Result<()> {
    for (oid, record) in embeddings {
        if !record.is_aligned() {
            return Err(HistorianError::Validation(format!(
                "embedding for {oid} has {} messages but {} vectors",
                record.messages.len(),
                record.embeddings.len()
            )));
        }
    }
    Ok(())
}

/// Mirrors `validate_files_embeddings` in the retrieved Python original.
pub fn validate_files_embeddings(cache: &BTreeMap<String, FileCacheEntry>) -> Result<()> {
    for (path, entry) in cache {
        if entry.summary.is_empty() && entry.embedding.is_empty() {
            return Err(HistorianError::Validation(format!(
                "file cache entry for {path} has neither summary nor embedding"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileDiff;

    fn commit(oid: &str, files: Vec<&str>, summaries: Vec<&str>) -> CommitRecord {
        CommitRecord {
            oid: oid.to_string(),
            message: vec!["msg".to_string()],
            files: files.into_iter().map(str::to_string).collect(),
            diffs: BTreeMap::new(),
            summaries: summaries.into_iter().map(str::to_string).collect(),
        }
    }

    #[test]
    fn aligned_records_pass() {
        let records = vec![commit("a", vec!["x.rs"], vec!["sum"])];
        assert!(validate_commit_records(&records).is_ok());
    }

    #[test]
    fn misaligned_records_fail() {
        let records = vec![commit("a", vec!["x.rs", "y.rs"], vec!["sum"])];
        assert!(validate_commit_records(&records).is_err());
    }

    #[test]
    fn duplicate_oid_fails() {
        let records = vec![commit("a", vec![], vec![]), commit("a", vec![], vec![])];
        assert!(validate_commit_records(&records).is_err());
    }

    #[test]
    fn embeddings_alignment() {
        let mut map = BTreeMap::new();
        map.insert(
            "a".to_string(),
            CommitEmbedding {
                messages: vec!["m".to_string()],
                embeddings: vec![vec![0.1, 0.2]],
            },
        );
        assert!(validate_commits_embeddings(&map).is_ok());

        map.insert(
            "b".to_string(),
            CommitEmbedding {
                messages: vec!["m".to_string(), "n".to_string()],
                embeddings: vec![vec![0.1]],
            },
        );
        assert!(validate_commits_embeddings(&map).is_err());
    }

    #[test]
    fn file_diff_round_trips_through_json() {
        let diff = FileDiff {
            diff: "+line".to_string(),
            added: true,
            deleted: false,
        };
        let json = serde_json::to_string(&diff).unwrap();
        let back: FileDiff = serde_json::from_str(&json).unwrap();
        assert_eq!(diff, back);
    }
}
