use std::sync::Arc;

use historian_types::{AmplificationLevel, Chat, ChatParams, CommitRecord, Result};
use tokio::sync::Semaphore;

/// Generates synthetic commit messages (SPEC_FULL.md §4.6). Each commit's
/// whole-commit-then-per-file calls run sequentially within one task
/// (preserving append order) while different commits amplify concurrently,
/// bounded by `gate`.
pub struct Amplifier;

impl Amplifier {
    pub async fn run(
        new_commits: &mut [CommitRecord],
        level: AmplificationLevel,
        chat: Arc<dyn Chat>,
        gate: Arc<Semaphore>,
    ) -> Result<()> {
        if !level.runs_whole_commit() {
            return Ok(());
        }

        let mut handles = Vec::with_capacity(new_commits.len());
        for (idx, commit) in new_commits.iter().enumerate() {
            let chat = Arc::clone(&chat);
            let gate = Arc::clone(&gate);
            let commit = commit.clone();
            let per_file = level.runs_per_file();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.expect("amplification semaphore closed");
                let messages = amplify_one(&commit, per_file, chat.as_ref()).await.unwrap_or_default();
                (idx, messages)
            }));
        }

        for handle in handles {
            let (idx, messages) = handle.await.map_err(|e| {
                historian_types::HistorianError::Internal(format!("amplify task panicked: {e}"))
            })?;
            new_commits[idx].message.extend(messages);
        }
        Ok(())
    }
}

async fn amplify_one(commit: &CommitRecord, per_file: bool, chat: &dyn Chat) -> Result<Vec<String>> {
    let mut messages = Vec::new();
    let params = ChatParams { temperature: Some(0.0), ..ChatParams::default() };

    let whole_prompt = build_whole_commit_prompt(commit);
    match chat.send(&whole_prompt, &params).await {
        Ok(response) => messages.push(response),
        Err(e) => tracing::warn!(oid = %commit.oid, error = %e, "whole-commit amplification failed, skipping"),
    }

    if per_file {
        for file in &commit.files {
            let Some(file_diff) = commit.diffs.get(file) else { continue };
            let prompt = format!("{file}\n{}", file_diff.diff);
            match chat.send(&prompt, &params).await {
                Ok(response) => messages.push(response),
                Err(e) => {
                    tracing::warn!(oid = %commit.oid, file, error = %e, "per-file amplification failed, skipping")
                }
            }
        }
    }

    Ok(messages)
}

fn build_whole_commit_prompt(commit: &CommitRecord) -> String {
    commit
        .files
        .iter()
        .filter_map(|f| commit.diffs.get(f).map(|d| format!("{f}\n{}", d.diff)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use historian_embed::MockBackend;
    use historian_types::FileDiff;

    fn commit_with_files(files: &[&str]) -> CommitRecord {
        CommitRecord {
            oid: "c1".to_string(),
            message: vec!["original".to_string()],
            files: files.iter().map(|f| f.to_string()).collect(),
            diffs: files
                .iter()
                .map(|f| (f.to_string(), FileDiff { diff: format!("+{f}"), added: true, deleted: false }))
                .collect(),
            summaries: vec![String::new(); files.len()],
        }
    }

    #[tokio::test]
    async fn off_level_does_not_amplify() {
        let mut commits = vec![commit_with_files(&["a.txt"])];
        let chat: Arc<dyn Chat> = Arc::new(MockBackend::default());
        Amplifier::run(&mut commits, AmplificationLevel::Off, chat, Arc::new(Semaphore::new(10)))
            .await
            .unwrap();
        assert_eq!(commits[0].message.len(), 1);
    }

    #[tokio::test]
    async fn low_level_appends_one_whole_commit_message() {
        let mut commits = vec![commit_with_files(&["a.txt", "b.txt"])];
        let chat: Arc<dyn Chat> = Arc::new(MockBackend::default());
        Amplifier::run(&mut commits, AmplificationLevel::Low, chat, Arc::new(Semaphore::new(10)))
            .await
            .unwrap();
        assert_eq!(commits[0].message.len(), 2);
    }

    #[tokio::test]
    async fn mid_level_appends_whole_commit_then_per_file() {
        let mut commits = vec![commit_with_files(&["a.txt", "b.txt"])];
        let chat: Arc<dyn Chat> = Arc::new(MockBackend::default());
        Amplifier::run(&mut commits, AmplificationLevel::Mid, chat, Arc::new(Semaphore::new(10)))
            .await
            .unwrap();
        assert_eq!(commits[0].message.len(), 4);
    }
}
