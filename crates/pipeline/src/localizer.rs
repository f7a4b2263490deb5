use std::collections::BTreeMap;
use std::sync::Arc;

use historian_types::{Chat, ChatParams, FileCacheEntry, LocalizationResult, RepoSource, Result};

use crate::glue;

const NO_RELEVANT_FILES: &str = "No relevant files found.";
const NO_ADDITIONAL_FILES: &str = "No additional relevant files.";

/// Two-phase LLM file localization (SPEC_FULL.md §4.9). Phase 2 degrades
/// gracefully to phase-1 results on any LLM error.
pub struct Localizer;

impl Localizer {
    pub async fn run(
        query: &str,
        source: Arc<dyn RepoSource>,
        cache: &BTreeMap<String, FileCacheEntry>,
        chat: Arc<dyn Chat>,
        ignore_patterns: &[String],
    ) -> Result<LocalizationResult> {
        let tree = source.project_tree(&glue::excluded_tree_dirs()).await?;
        let tree = glue::filter_ignored(&tree, ignore_patterns);
        let tree_text = tree.join("\n");

        let prompt1 = format!(
            "Given this project file tree:\n{tree_text}\n\nList at most 5 file paths most relevant to: {query}\nWrap the list in triple backticks, one path per line, or respond exactly \"{NO_RELEVANT_FILES}\" if none apply."
        );
        let params = ChatParams::default();
        let response1 = chat.send(&prompt1, &params).await?;
        let candidates1 = parse_file_list(&response1, NO_RELEVANT_FILES);
        let existing1 = Self::filter_existing(&candidates1, source.as_ref(), ignore_patterns).await?;

        if existing1.is_empty() {
            return Ok(LocalizationResult { files: Vec::new(), prompts_used: vec![prompt1] });
        }

        let summaries_block = existing1
            .iter()
            .map(|path| {
                let summary = cache.get(path).map(|e| e.summary.as_str()).unwrap_or("");
                format!("{path}: {summary}")
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt2 = format!(
            "These files were already identified as relevant to: {query}\n{summaries_block}\n\nList at most 5 *additional* relevant file paths not already listed, wrapped in triple backticks, or respond exactly \"{NO_ADDITIONAL_FILES}\" if none apply."
        );

        let existing2 = match chat.send(&prompt2, &params).await {
            Ok(response2) => {
                let candidates2 = parse_file_list(&response2, NO_ADDITIONAL_FILES);
                Self::filter_existing(&candidates2, source.as_ref(), ignore_patterns).await?
            }
            Err(e) => {
                tracing::warn!(error = %e, "phase-2 localization failed, degrading to phase-1 results");
                Vec::new()
            }
        };

        let files = fuse(&existing1, &existing2);
        Ok(LocalizationResult { files, prompts_used: vec![prompt1, prompt2] })
    }

    async fn filter_existing(
        candidates: &[String],
        source: &dyn RepoSource,
        ignore_patterns: &[String],
    ) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for path in candidates {
            if glue::is_ignored(path, ignore_patterns) {
                continue;
            }
            if source.file_exists_in_worktree(path).await? {
                out.push(path.clone());
            }
        }
        Ok(out)
    }
}

fn fuse(phase1: &[String], phase2: &[String]) -> Vec<String> {
    let mut fused = Vec::new();
    let mut push_unique = |path: &String, fused: &mut Vec<String>| {
        if !fused.contains(path) {
            fused.push(path.clone());
        }
    };
    for path in phase1.iter().take(3) {
        push_unique(path, &mut fused);
    }
    for path in phase2.iter().take(2) {
        push_unique(path, &mut fused);
    }
    for path in phase1.iter().skip(3) {
        push_unique(path, &mut fused);
    }
    for path in phase2.iter().skip(2) {
        push_unique(path, &mut fused);
    }
    fused
}

fn parse_file_list(response: &str, empty_sentinel: &str) -> Vec<String> {
    let trimmed = response.trim();
    if trimmed == empty_sentinel {
        return Vec::new();
    }
    let body = extract_fenced(trimmed).unwrap_or_else(|| trimmed.to_string());
    body.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.trim_start_matches('-').trim_start_matches('*').trim().to_string())
        .map(|l| l.replace('\\', "/"))
        .collect()
}

fn extract_fenced(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.trim_start_matches(|c: char| c != '\n');
    let after = after.trim_start_matches('\n');
    let end = after.find("```")?;
    Some(after[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use historian_types::RawCommit;
    use std::path::Path;

    struct FixedSource {
        tree: Vec<String>,
    }

    #[async_trait]
    impl RepoSource for FixedSource {
        async fn checkout(&self, _rev: &str) -> Result<()> {
            Ok(())
        }
        async fn iter_commits_from_head(&self, _max_depth: usize) -> Result<Vec<RawCommit>> {
            Ok(Vec::new())
        }
        async fn file_exists_in_worktree(&self, path: &str) -> Result<bool> {
            Ok(self.tree.contains(&path.to_string()))
        }
        async fn read_worktree_file(&self, _path: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn project_tree(&self, _exclude_dirs: &[String]) -> Result<Vec<String>> {
            Ok(self.tree.clone())
        }
        fn worktree_path(&self) -> &Path {
            Path::new(".")
        }
    }

    struct ScriptedChat {
        responses: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Chat for ScriptedChat {
        async fn send(&self, _prompt: &str, _params: &ChatParams) -> Result<String> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
    }

    #[test]
    fn parses_fenced_list() {
        let response = "```\nsrc/a.rs\nsrc/b.rs\n```";
        assert_eq!(parse_file_list(response, NO_RELEVANT_FILES), vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn sentinel_yields_empty() {
        assert!(parse_file_list("No relevant files found.", NO_RELEVANT_FILES).is_empty());
    }

    #[tokio::test]
    async fn phase2_skipped_when_phase1_empty() {
        let source: Arc<dyn RepoSource> = Arc::new(FixedSource { tree: vec!["src/a.rs".to_string()] });
        let chat: Arc<dyn Chat> = Arc::new(ScriptedChat {
            responses: std::sync::Mutex::new(vec![NO_RELEVANT_FILES.to_string()]),
        });
        let result = Localizer::run("query", source, &BTreeMap::new(), chat, &[])
            .await
            .unwrap();
        assert!(result.files.is_empty());
        assert_eq!(result.prompts_used.len(), 1);
    }

    #[tokio::test]
    async fn fuses_phase1_and_phase2() {
        let source: Arc<dyn RepoSource> = Arc::new(FixedSource {
            tree: vec!["src/a.rs".to_string(), "src/b.rs".to_string()],
        });
        let chat: Arc<dyn Chat> = Arc::new(ScriptedChat {
            responses: std::sync::Mutex::new(vec![
                "```\nsrc/a.rs\n```".to_string(),
                "```\nsrc/b.rs\n```".to_string(),
            ]),
        });
        let result = Localizer::run("query", source, &BTreeMap::new(), chat, &[])
            .await
            .unwrap();
        assert_eq!(result.files, vec!["src/a.rs".to_string(), "src/b.rs".to_string()]);
    }
}
