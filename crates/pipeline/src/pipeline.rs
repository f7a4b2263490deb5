use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use historian_ingest::CommitWalker;
use historian_types::{
    AmplificationLevel, Chat, Embedder, HistorianError, LocalizationResult, MatchResult,
    MatchStrength, OverallStatus, PipelineOutcome, ProjectStatus, RepoSource, Result, StageKey,
    StageStatusKind, Store,
};
use tokio::sync::Semaphore;

use crate::amplifier::Amplifier;
use crate::commit_embedder::CommitEmbedder;
use crate::localizer::Localizer;
use crate::matcher::Matcher;
use crate::summary_indexer::SummaryIndexer;

/// Per-run configuration for `Pipeline::index` (SPEC_FULL.md §4.10).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ignore_patterns: Vec<String>,
    pub amplification: AmplificationLevel,
    pub max_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig { ignore_patterns: Vec::new(), amplification: AmplificationLevel::Off, max_depth: 500 }
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Releases a project's lock on drop, mirroring a try/finally release
/// pattern. The explicit `release().await` call in `Pipeline::index`'s both
/// success and failure paths is the primary release mechanism; this guard is
/// a backstop against a panic unwinding past those paths.
struct LockGuard {
    store: Arc<dyn Store>,
    released: Arc<AtomicBool>,
}

impl LockGuard {
    async fn release(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.store.release_lock().await?;
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            let store = Arc::clone(&self.store);
            let released = Arc::clone(&self.released);
            tokio::spawn(async move {
                if !released.swap(true, Ordering::SeqCst) {
                    let _ = store.release_lock().await;
                }
            });
        }
    }
}

/// Bounded-concurrency gates shared across one pipeline run (SPEC_FULL.md
/// §5): 20 for file-summary chat calls, 10 for amplification, 100 for file
/// I/O.
pub struct ConcurrencyGates {
    pub summary_chat: Arc<Semaphore>,
    pub amplification_chat: Arc<Semaphore>,
    pub file_io: Arc<Semaphore>,
}

impl Default for ConcurrencyGates {
    fn default() -> Self {
        ConcurrencyGates {
            summary_chat: Arc::new(Semaphore::new(20)),
            amplification_chat: Arc::new(Semaphore::new(10)),
            file_io: Arc::new(Semaphore::new(100)),
        }
    }
}

/// Orchestrates indexing and retrieval for one project (SPEC_FULL.md §4.10).
pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub source: Arc<dyn RepoSource>,
    pub chat: Arc<dyn Chat>,
    pub embedder: Arc<dyn Embedder>,
    pub gates: ConcurrencyGates,
}

impl Pipeline {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn RepoSource>, chat: Arc<dyn Chat>, embedder: Arc<dyn Embedder>) -> Self {
        Pipeline { store, source, chat, embedder, gates: ConcurrencyGates::default() }
    }

    /// Active stage set for a run at the given amplification level: all
    /// three keys always appear in the status map; `commit_amplification`
    /// is marked `completed` immediately (never entered) when the level is
    /// `Off`, rather than omitted, so `recompute_overall_progress`'s mean
    /// stays well-defined.
    fn initial_status(level: AmplificationLevel) -> ProjectStatus {
        let mut status = ProjectStatus::new(&StageKey::ALL, now_secs());
        if !level.runs_whole_commit() {
            if let Some(stage) = status.stages.get_mut(StageKey::CommitAmplification.as_str()) {
                stage.status = StageStatusKind::Completed;
                stage.progress = 100.0;
            }
        }
        status
    }

    pub async fn index(&self, config: &PipelineConfig) -> Result<PipelineOutcome> {
        if let Err(e) = self.store.acquire_lock().await {
            tracing::warn!(error = %e, "index run rejected, project locked");
            return Err(e);
        }
        let guard = LockGuard { store: Arc::clone(&self.store), released: Arc::new(AtomicBool::new(false)) };

        let result = self.run_stages(config).await;

        match &result {
            Ok(outcome) => {
                tracing::info!(new_commits = outcome.new_commit_oids.len(), "index run completed");
            }
            Err(e) => {
                tracing::error!(error = %e, "index run failed");
                let _ = self.store.log_error(&e.to_string()).await;
            }
        }
        guard.release().await?;
        result
    }

    async fn run_stages(&self, config: &PipelineConfig) -> Result<PipelineOutcome> {
        let mut status = Self::initial_status(config.amplification);
        self.store.write_status(&status).await?;

        let existing_logs = self.store.read_commit_logs().await?;
        let mut new_commits =
            CommitWalker::walk_new_commits(self.source.as_ref(), &existing_logs, config.max_depth).await?;

        if new_commits.is_empty() {
            for key in StageKey::ALL {
                if let Some(stage) = status.stages.get_mut(key.as_str()) {
                    stage.status = StageStatusKind::Completed;
                    stage.progress = 100.0;
                }
            }
            status.recompute_overall_progress();
            status.overall_status = OverallStatus::Completed;
            status.updated_at = now_secs();
            self.store.write_status(&status).await?;
            return Ok(PipelineOutcome::default());
        }

        // Stage 1: summaries. A periodic task samples `progress` and writes
        // the status file every second (SPEC_FULL.md §5); it is aborted as
        // soon as the stage finishes, with `finish_stage` writing the final
        // value authoritatively.
        self.mark_active(&mut status, StageKey::AddCommitsAndSummaries).await?;
        let mut cache = self.store.read_files_embeddings().await?;
        let progress = Arc::new(AtomicU64::new(0f64.to_bits()));
        let progress_for_hook = Arc::clone(&progress);
        let updater = tokio::spawn(Self::run_progress_updater(
            Arc::clone(&self.store),
            StageKey::AddCommitsAndSummaries,
            Arc::clone(&progress),
        ));
        let stage_result = SummaryIndexer::run(
            &mut new_commits,
            &mut cache,
            Arc::clone(&self.source),
            Arc::clone(&self.chat),
            Arc::clone(&self.embedder),
            &config.ignore_patterns,
            Arc::clone(&self.gates.summary_chat),
            Arc::clone(&self.gates.file_io),
            move |pct| progress_for_hook.store(pct.to_bits(), Ordering::Relaxed),
        )
        .await;
        updater.abort();
        self.finish_stage(&mut status, StageKey::AddCommitsAndSummaries, stage_result.as_ref().err()).await?;
        stage_result?;
        self.store.write_files_embeddings(&cache).await?;

        // Stage 2: amplification (may be a no-op already marked completed).
        if config.amplification.runs_whole_commit() {
            self.mark_active(&mut status, StageKey::CommitAmplification).await?;
            let amp_result = Amplifier::run(
                &mut new_commits,
                config.amplification,
                Arc::clone(&self.chat),
                Arc::clone(&self.gates.amplification_chat),
            )
            .await;
            self.finish_stage(&mut status, StageKey::CommitAmplification, amp_result.as_ref().err()).await?;
            amp_result?;
        }

        // Persist commit logs now that amplified messages are durable,
        // before embeddings reference them (SPEC_FULL.md §4.10 persistence
        // ordering rule).
        let mut all_logs = new_commits.clone();
        all_logs.extend(existing_logs);
        self.store.write_commit_logs(&all_logs).await?;

        // Stage 3: commit embeddings.
        self.mark_active(&mut status, StageKey::GenerateCommitEmbeddings).await?;
        let mut embeddings_store = self.store.read_commits_embeddings().await?;
        let embed_result =
            CommitEmbedder::run(&new_commits, &cache, Arc::clone(&self.embedder), &mut embeddings_store).await;
        self.finish_stage(&mut status, StageKey::GenerateCommitEmbeddings, embed_result.as_ref().err()).await?;
        let new_oids = embed_result?;
        self.store.write_commits_embeddings(&embeddings_store).await?;

        status.recompute_overall_progress();
        status.overall_status = OverallStatus::Completed;
        status.updated_at = now_secs();
        self.store.write_status(&status).await?;

        Ok(PipelineOutcome { new_commit_oids: new_oids })
    }

    async fn mark_active(&self, status: &mut ProjectStatus, key: StageKey) -> Result<()> {
        tracing::info!(stage = key.as_str(), "stage started");
        if let Some(stage) = status.stages.get_mut(key.as_str()) {
            stage.status = StageStatusKind::Active;
        }
        status.updated_at = now_secs();
        self.store.write_status(status).await
    }

    async fn finish_stage(&self, status: &mut ProjectStatus, key: StageKey, error: Option<&HistorianError>) -> Result<()> {
        if let Some(stage) = status.stages.get_mut(key.as_str()) {
            match error {
                None => {
                    tracing::info!(stage = key.as_str(), "stage completed");
                    stage.status = StageStatusKind::Completed;
                    stage.progress = 100.0;
                    stage.error = None;
                }
                Some(e) => {
                    tracing::error!(stage = key.as_str(), error = %e, "stage failed");
                    stage.status = StageStatusKind::Failed;
                    stage.error = Some(e.to_string());
                }
            }
        }
        status.recompute_overall_progress();
        if error.is_some() {
            status.overall_status = OverallStatus::Failed;
        }
        status.updated_at = now_secs();
        self.store.write_status(status).await
    }

    pub async fn search(&self, query: &str, strength: MatchStrength, top_n: usize) -> Result<Vec<MatchResult>> {
        let embeddings = self.store.read_commits_embeddings().await?;
        Matcher::search(query, strength, top_n, Arc::clone(&self.embedder), &embeddings).await
    }

    pub async fn locate(&self, query: &str, ignore_patterns: &[String]) -> Result<LocalizationResult> {
        let cache = self.store.read_files_embeddings().await?;
        Localizer::run(query, Arc::clone(&self.source), &cache, Arc::clone(&self.chat), ignore_patterns).await
    }

    pub async fn status(&self) -> Result<Option<ProjectStatus>> {
        self.store.read_status().await
    }

    async fn run_progress_updater(store: Arc<dyn Store>, key: StageKey, progress: Arc<AtomicU64>) {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0));
        loop {
            interval.tick().await;
            let Ok(Some(mut status)) = store.read_status().await else { continue };
            let pct = f64::from_bits(progress.load(Ordering::Relaxed));
            if let Some(stage) = status.stages.get_mut(key.as_str()) {
                stage.progress = pct;
            }
            status.recompute_overall_progress();
            status.updated_at = now_secs();
            let _ = store.write_status(&status).await;
        }
    }
}
