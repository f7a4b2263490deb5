use std::path::PathBuf;

use serde::Deserialize;

/// Optional `historian.toml` contents. Every field is optional; absent
/// fields fall through to environment variables, then to hardcoded
/// defaults. CLI flags, handled by the caller, always win over all of this
/// (SPEC_FULL.md §1, Ambient stack / Configuration).
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub projects_root: Option<PathBuf>,
    pub api_base: Option<String>,
    pub chat_model: Option<String>,
    pub embed_model: Option<String>,
}

/// Fully resolved configuration for one CLI invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub projects_root: PathBuf,
    pub api_base: String,
    pub api_key: String,
    pub chat_model: String,
    pub embed_model: String,
}

impl AppConfig {
    /// Loads `.env` (if present, via `dotenvy`) then `historian.toml` (if
    /// present in the current directory), and merges both under hardcoded
    /// defaults. Caller-supplied CLI flag overrides are applied afterward
    /// via `with_overrides`.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let file_config = std::fs::read_to_string("historian.toml")
            .ok()
            .and_then(|text| toml::from_str::<FileConfig>(&text).ok())
            .unwrap_or_default();

        let projects_root = file_config.projects_root.unwrap_or_else(default_projects_root);
        let api_base = std::env::var("HISTORIAN_API_BASE")
            .ok()
            .or(file_config.api_base)
            .unwrap_or_else(|| "http://localhost:11434/v1".to_string());
        let api_key = std::env::var("HISTORIAN_API_KEY").unwrap_or_else(|_| "unset".to_string());
        let chat_model = std::env::var("HISTORIAN_CHAT_MODEL")
            .ok()
            .or(file_config.chat_model)
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let embed_model = std::env::var("HISTORIAN_EMBED_MODEL")
            .ok()
            .or(file_config.embed_model)
            .unwrap_or_else(|| "nomic-embed-text".to_string());

        AppConfig { projects_root, api_base, api_key, chat_model, embed_model }
    }

    pub fn with_projects_root(mut self, flag: Option<PathBuf>) -> Self {
        if let Some(root) = flag {
            self.projects_root = root;
        }
        self
    }
}

fn default_projects_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".historian").join("projects")
}
