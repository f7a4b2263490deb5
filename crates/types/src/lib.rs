mod error;
mod model;
mod traits;
mod validate;

pub use error::{ChatFailureKind, HistorianError, Result};
pub use model::{
    AmplificationLevel, ChangeType, CommitEmbedding, CommitRecord, FileCacheEntry, FileDiff,
    LocalizationResult, MatchResult, MatchStrength, OverallStatus, PipelineOutcome, ProjectStatus,
    RawCommit, StageKey, StageStatus, StageStatusKind, EMPTY_SUMMARY,
};
pub use traits::{Chat, ChatParams, Embedder, RepoSource, Store};
pub use validate::{validate_commit_records, validate_commits_embeddings, validate_files_embeddings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_strength_thresholds() {
        assert_eq!(MatchStrength::High.min_similarity(), 0.40);
        assert_eq!(MatchStrength::Mid.min_similarity(), 0.30);
        assert_eq!(MatchStrength::Low.min_similarity(), 0.20);
    }

    #[test]
    fn amplification_level_policy() {
        assert!(!AmplificationLevel::Off.runs_whole_commit());
        assert!(AmplificationLevel::Low.runs_whole_commit());
        assert!(!AmplificationLevel::Low.runs_per_file());
        assert!(AmplificationLevel::Mid.runs_whole_commit());
        assert!(AmplificationLevel::Mid.runs_per_file());
        assert!(AmplificationLevel::High.runs_whole_commit());
        assert!(AmplificationLevel::High.runs_per_file());
    }

    #[test]
    fn project_status_overall_progress_is_mean() {
        let mut status = ProjectStatus::new(&StageKey::ALL, 0);
        status
            .stages
            .get_mut(StageKey::AddCommitsAndSummaries.as_str())
            .unwrap()
            .progress = 100.0;
        status.recompute_overall_progress();
        assert!((status.overall_progress - (100.0 / 3.0)).abs() < 1e-9);
    }
}
