use historian_types::{HistorianError, Result};

/// Derives a project name from a code-host URL by normalizing scheme/host/
/// user/repo into a lowercased, underscore-joined token, stripping a trailing
/// `.git` suffix.
pub fn url_to_project_name(repo_url: &str) -> Result<String> {
    let trimmed = repo_url.trim_end_matches('/');
    let without_git = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let (scheme, rest) = without_git.split_once("://").ok_or_else(|| {
        HistorianError::Validation(format!("unsupported repo URL: {repo_url}"))
    })?;
    if !matches!(scheme, "http" | "https" | "git" | "ssh") {
        return Err(HistorianError::Validation(format!(
            "unsupported URL scheme: {scheme}"
        )));
    }

    let (host, path) = rest.split_once('/').ok_or_else(|| {
        HistorianError::Validation(format!("invalid repository URL format: {repo_url}"))
    })?;
    let components: Vec<&str> = path.trim_matches('/').split('/').collect();
    if components.len() < 2 {
        return Err(HistorianError::Validation(format!(
            "invalid repository URL format: {repo_url}"
        )));
    }
    let (user, repo_name) = (components[0], components[1]);

    let raw = format!("{host}_{user}_{repo_name}");
    let normalized: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect::<String>()
        .to_lowercase();
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_expected_name() {
        let name = url_to_project_name("https://github.com/rust-lang/rust.git").unwrap();
        assert_eq!(name, "github_com_rust-lang_rust");
    }

    #[test]
    fn preserves_hyphens_in_user_and_repo() {
        let name = url_to_project_name("https://github.com/rust-lang/my-repo.git").unwrap();
        assert_eq!(name, "github_com_rust-lang_my-repo");
    }

    #[test]
    fn strips_trailing_slash_without_git_suffix() {
        let name = url_to_project_name("https://example.com/org/repo/").unwrap();
        assert_eq!(name, "example_com_org_repo");
    }

    #[test]
    fn rejects_bad_scheme() {
        assert!(url_to_project_name("ftp://example.com/org/repo").is_err());
    }

    #[test]
    fn rejects_missing_repo_component() {
        assert!(url_to_project_name("https://example.com/org").is_err());
    }
}
