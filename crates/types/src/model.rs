use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sentinel stored in `CommitRecord::summaries` for files skipped because they
/// are binary, empty, unreadable, or ignored. The retrieved Python original
/// used an opaque SHA-1-shaped literal for this; this implementation names it
/// plainly instead (see DESIGN.md, Open Question resolution 5).
pub const EMPTY_SUMMARY: &str = "<no-summary:skipped>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Deleted,
    Modified,
}

/// Per-file diff entry, keyed by path in `CommitRecord::diffs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub diff: String,
    pub added: bool,
    pub deleted: bool,
}

/// A single persisted commit, as described in SPEC_FULL.md §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub oid: String,
    pub message: Vec<String>,
    pub files: Vec<String>,
    pub diffs: BTreeMap<String, FileDiff>,
    pub summaries: Vec<String>,
}

impl CommitRecord {
    /// Invariant 1 from SPEC_FULL.md §8: `|files| == |summaries|`.
    pub fn is_aligned(&self) -> bool {
        self.files.len() == self.summaries.len()
    }
}

/// A raw commit as produced by a `RepoSource`, before any summarization or
/// amplification has happened.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCommit {
    pub oid: String,
    pub message: String,
    pub parents: Vec<String>,
    pub files: Vec<String>,
    pub diffs: BTreeMap<String, FileDiff>,
    pub empty: bool,
}

/// One embedded commit record, keyed by oid in the `commits_embeddings.json`
/// mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CommitEmbedding {
    pub messages: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

impl CommitEmbedding {
    pub fn is_aligned(&self) -> bool {
        self.messages.len() == self.embeddings.len()
    }
}

/// One entry of the file summary/embedding cache (`files_embeddings.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCacheEntry {
    pub summary: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatusKind {
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    AddCommitsAndSummaries,
    CommitAmplification,
    GenerateCommitEmbeddings,
}

impl StageKey {
    pub const ALL: [StageKey; 3] = [
        StageKey::AddCommitsAndSummaries,
        StageKey::CommitAmplification,
        StageKey::GenerateCommitEmbeddings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKey::AddCommitsAndSummaries => "add_commits_and_summaries",
            StageKey::CommitAmplification => "commit_amplification",
            StageKey::GenerateCommitEmbeddings => "generate_commit_embeddings",
        }
    }
}

impl std::fmt::Display for StageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStatus {
    pub name: String,
    pub status: StageStatusKind,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageStatus {
    pub fn pending(name: &str) -> Self {
        StageStatus {
            name: name.to_string(),
            status: StageStatusKind::Pending,
            progress: 0.0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub stages: BTreeMap<String, StageStatus>,
    pub overall_progress: f64,
    pub overall_status: OverallStatus,
    pub updated_at: i64,
}

impl ProjectStatus {
    pub fn new(stage_keys: &[StageKey], now: i64) -> Self {
        let mut stages = BTreeMap::new();
        for key in stage_keys {
            stages.insert(key.as_str().to_string(), StageStatus::pending(key.as_str()));
        }
        ProjectStatus {
            stages,
            overall_progress: 0.0,
            overall_status: OverallStatus::Pending,
            updated_at: now,
        }
    }

    /// Overall progress is the mean of stage progresses, bounded to [0,100].
    pub fn recompute_overall_progress(&mut self) {
        if self.stages.is_empty() {
            self.overall_progress = 0.0;
            return;
        }
        let sum: f64 = self.stages.values().map(|s| s.progress).sum();
        let mean = sum / self.stages.len() as f64;
        self.overall_progress = mean.clamp(0.0, 100.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmplificationLevel {
    Off,
    Low,
    Mid,
    High,
}

impl AmplificationLevel {
    pub fn runs_whole_commit(self) -> bool {
        !matches!(self, AmplificationLevel::Off)
    }

    pub fn runs_per_file(self) -> bool {
        matches!(self, AmplificationLevel::Mid | AmplificationLevel::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrength {
    High,
    Mid,
    Low,
}

impl MatchStrength {
    pub fn min_similarity(self) -> f32 {
        match self {
            MatchStrength::High => 0.40,
            MatchStrength::Mid => 0.30,
            MatchStrength::Low => 0.20,
        }
    }
}

/// One row of `Matcher` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub oid: String,
    pub similarity: f32,
}

/// Result of a `Localizer` run: the fused file list plus the prompts used,
/// kept for observability (not a named field in SPEC_FULL.md's data model,
/// but useful and harmless to carry, mirroring the Python original's return
/// shape).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalizationResult {
    pub files: Vec<String>,
    pub prompts_used: Vec<String>,
}

/// Outcome of one `Pipeline::run` invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub new_commit_oids: Vec<String>,
}
