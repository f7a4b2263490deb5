use std::path::{Path, PathBuf};

use async_trait::async_trait;
use historian_types::{CommitRecord, HistorianError, RawCommit, RepoSource, Result};

use crate::patch;

/// `RepoSource` implementation backed by `git2`. Every git2 call happens
/// inside `spawn_blocking`, re-opening the repository fresh each time, since
/// `git2::Repository` never needs to cross an `.await` point this way.
pub struct Git2RepoSource {
    repo_path: PathBuf,
}

impl Git2RepoSource {
    pub fn open(repo_path: impl Into<PathBuf>) -> Result<Self> {
        let repo_path = repo_path.into();
        git2::Repository::open(&repo_path)?;
        Ok(Git2RepoSource { repo_path })
    }

    /// Opens `repo_spec` directly if it names a local path, otherwise
    /// clones it into `worktree_dir` (skipping the clone if already
    /// present) and opens that. The project's working copy lives under its
    /// own directory, per SPEC_FULL.md §4.1.
    pub fn open_or_clone(repo_spec: &str, worktree_dir: &std::path::Path) -> Result<Self> {
        let looks_remote = repo_spec.contains("://") || repo_spec.starts_with("git@");
        if !looks_remote {
            return Git2RepoSource::open(repo_spec);
        }
        if !worktree_dir.join(".git").exists() {
            std::fs::create_dir_all(worktree_dir)?;
            git2::Repository::clone(repo_spec, worktree_dir)?;
        }
        Git2RepoSource::open(worktree_dir)
    }

    fn spawn_err(e: tokio::task::JoinError) -> HistorianError {
        HistorianError::Internal(format!("blocking task panicked: {e}"))
    }
}

#[async_trait]
impl RepoSource for Git2RepoSource {
    async fn checkout(&self, rev: &str) -> Result<()> {
        let repo_path = self.repo_path.clone();
        let rev = rev.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let repo = git2::Repository::open(&repo_path)?;
            let obj = repo
                .revparse_single(&rev)
                .map_err(|_| HistorianError::Validation(format!("revision not found: {rev}")))?;
            repo.checkout_tree(&obj, None)?;
            repo.set_head_detached(obj.id())?;
            Ok(())
        })
        .await
        .map_err(Self::spawn_err)??;
        Ok(())
    }

    async fn iter_commits_from_head(&self, max_depth: usize) -> Result<Vec<RawCommit>> {
        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || walk_raw_commits(&repo_path, max_depth))
            .await
            .map_err(Self::spawn_err)?
    }

    async fn file_exists_in_worktree(&self, path: &str) -> Result<bool> {
        let full = self.repo_path.join(path);
        Ok(tokio::fs::metadata(full).await.is_ok())
    }

    async fn read_worktree_file(&self, path: &str) -> Result<Option<String>> {
        let full = self.repo_path.join(path);
        match tokio::fs::read(&full).await {
            Ok(bytes) => {
                if patch::looks_binary(path, &bytes) {
                    return Ok(None);
                }
                Ok(String::from_utf8(bytes).ok())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn project_tree(&self, exclude_dirs: &[String]) -> Result<Vec<String>> {
        let root = self.repo_path.clone();
        let exclude = exclude_dirs.to_vec();
        tokio::task::spawn_blocking(move || walk_project_tree(&root, &exclude))
            .await
            .map_err(Self::spawn_err)?
    }

    fn worktree_path(&self) -> &Path {
        &self.repo_path
    }
}

fn walk_raw_commits(repo_path: &Path, max_depth: usize) -> Result<Vec<RawCommit>> {
    let repo = git2::Repository::open(repo_path)?;
    if repo.head().is_err() {
        // Empty repository: no commits at all (SPEC_FULL.md S1 scenario).
        return Ok(Vec::new());
    }

    let mut revwalk = repo.revwalk()?;
    revwalk.push_head()?;
    revwalk.set_sorting(git2::Sort::TOPOLOGICAL)?;

    let mut commits = Vec::new();
    for oid_result in revwalk {
        if commits.len() >= max_depth {
            break;
        }
        let oid = oid_result?;
        let commit = repo.find_commit(oid)?;
        let (files, diffs) = patch::diff_commit(&repo, &commit)?;
        let empty = files.is_empty();
        let message = commit.message().unwrap_or("").trim().to_string();
        let parents = commit.parent_ids().map(|id| id.to_string()).collect();
        commits.push(RawCommit {
            oid: oid.to_string(),
            message,
            parents,
            files,
            diffs,
            empty,
        });
    }
    Ok(commits)
}

fn walk_project_tree(root: &Path, exclude_dirs: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    walk_dir(root, root, exclude_dirs, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk_dir(dir: &Path, root: &Path, exclude_dirs: &[String], out: &mut Vec<String>) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            if exclude_dirs.iter().any(|d| d == &name) {
                continue;
            }
            walk_dir(&path, root, exclude_dirs, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

/// Incremental, sentinel-stopped commit walk (SPEC_FULL.md §4.4). Turns raw
/// commits from a `RepoSource` into `CommitRecord` skeletons — `summaries` is
/// sized to match `files` with empty placeholders, to be filled in by the
/// summary indexer.
pub struct CommitWalker;

impl CommitWalker {
    pub async fn walk_new_commits(
        source: &dyn RepoSource,
        existing_logs: &[CommitRecord],
        max_depth: usize,
    ) -> Result<Vec<CommitRecord>> {
        let stop_oid = existing_logs.first().map(|c| c.oid.clone());
        let raw = source.iter_commits_from_head(max_depth).await?;

        let mut new_commits = Vec::new();
        for raw_commit in raw {
            if let Some(stop) = &stop_oid {
                if &raw_commit.oid == stop {
                    break;
                }
            }
            if raw_commit.empty {
                continue;
            }
            let summaries = vec![String::new(); raw_commit.files.len()];
            new_commits.push(CommitRecord {
                oid: raw_commit.oid,
                message: vec![raw_commit.message],
                files: raw_commit.files,
                diffs: raw_commit.diffs,
                summaries,
            });
        }
        Ok(new_commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .expect("git command failed to run");
        assert!(status.success(), "git {:?} failed", args);
    }

    fn init_repo_with_commit() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        git(dir.path(), &["init", "-q", "-b", "main"]);
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        git(dir.path(), &["add", "a.txt"]);
        git(dir.path(), &["commit", "-q", "-m", "add a.txt"]);
        dir
    }

    #[tokio::test]
    async fn empty_repo_yields_no_commits() {
        let dir = tempdir().unwrap();
        git(dir.path(), &["init", "-q", "-b", "main"]);
        let source = Git2RepoSource::open(dir.path()).unwrap();
        let commits = source.iter_commits_from_head(50).await.unwrap();
        assert!(commits.is_empty());
    }

    #[tokio::test]
    async fn single_commit_is_walked() {
        let dir = init_repo_with_commit();
        let source = Git2RepoSource::open(dir.path()).unwrap();
        let commits = source.iter_commits_from_head(50).await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].files, vec!["a.txt".to_string()]);
        assert!(!commits[0].empty);
    }

    #[tokio::test]
    async fn incremental_walk_stops_at_sentinel() {
        let dir = init_repo_with_commit();
        let source = Git2RepoSource::open(dir.path()).unwrap();
        let first_pass = CommitWalker::walk_new_commits(&source, &[], 50)
            .await
            .unwrap();
        assert_eq!(first_pass.len(), 1);

        std::fs::write(dir.path().join("b.txt"), "world").unwrap();
        git(dir.path(), &["add", "b.txt"]);
        git(dir.path(), &["commit", "-q", "-m", "add b.txt"]);

        let second_pass = CommitWalker::walk_new_commits(&source, &first_pass, 50)
            .await
            .unwrap();
        assert_eq!(second_pass.len(), 1);
        assert_eq!(second_pass[0].files, vec!["b.txt".to_string()]);
        assert_ne!(second_pass[0].oid, first_pass[0].oid);
    }

    #[tokio::test]
    async fn rerunning_with_no_changes_finds_nothing_new() {
        let dir = init_repo_with_commit();
        let source = Git2RepoSource::open(dir.path()).unwrap();
        let first_pass = CommitWalker::walk_new_commits(&source, &[], 50)
            .await
            .unwrap();
        let second_pass = CommitWalker::walk_new_commits(&source, &first_pass, 50)
            .await
            .unwrap();
        assert!(second_pass.is_empty());
    }

    #[tokio::test]
    async fn project_tree_excludes_git_and_dotfiles() {
        let dir = init_repo_with_commit();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        let source = Git2RepoSource::open(dir.path()).unwrap();
        let tree = source
            .project_tree(&["node_modules".to_string()])
            .await
            .unwrap();
        assert!(tree.contains(&"a.txt".to_string()));
        assert!(!tree.iter().any(|p| p.starts_with(".git")));
        assert!(!tree.contains(&".hidden".to_string()));
    }
}
