use glob::Pattern;

pub use historian_embed::estimate_tokens;

/// Shell-glob (`fnmatch`) ignore-pattern matching against repo-relative
/// paths, per SPEC_FULL.md §6.
pub fn is_ignored(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        Pattern::new(pattern)
            .map(|p| p.matches(path))
            .unwrap_or(false)
    })
}

pub fn filter_ignored<'a>(paths: impl IntoIterator<Item = &'a String>, patterns: &[String]) -> Vec<String> {
    paths
        .into_iter()
        .filter(|p| !is_ignored(p, patterns))
        .cloned()
        .collect()
}

pub const EXCLUDED_TREE_DIRS: &[&str] = &[
    ".git",
    ".venv",
    "node_modules",
    "__pycache__",
    "env",
    "virtualenv",
    "lib64",
];

pub fn excluded_tree_dirs() -> Vec<String> {
    EXCLUDED_TREE_DIRS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_extension() {
        assert!(is_ignored("secret.env", &["*.env".to_string()]));
        assert!(!is_ignored("secret.txt", &["*.env".to_string()]));
    }

    #[test]
    fn filter_drops_matching_paths() {
        let paths = vec!["a.txt".to_string(), "secret.env".to_string()];
        let kept = filter_ignored(&paths, &["*.env".to_string()]);
        assert_eq!(kept, vec!["a.txt".to_string()]);
    }

    #[test]
    fn no_patterns_keeps_everything() {
        let paths = vec!["a.txt".to_string()];
        assert_eq!(filter_ignored(&paths, &[]), paths);
    }
}
