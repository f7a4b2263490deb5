mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use historian_embed::{MockBackend, OpenAiBackend};
use historian_ingest::Git2RepoSource;
use historian_pipeline::{Pipeline, PipelineConfig};
use historian_store::JsonStore;
use historian_types::{AmplificationLevel, Chat, Embedder, MatchStrength, Store};

use config::AppConfig;

#[derive(Parser)]
#[command(name = "historian", about = "Indexes a git repository's history for natural-language file retrieval")]
struct Cli {
    #[arg(long, global = true)]
    projects_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty project store.
    Init {
        project: String,
    },
    /// Run the indexing pipeline once for a project.
    Index {
        #[arg(long)]
        project: String,
        #[arg(long)]
        repo: String,
        #[arg(long = "ignore")]
        ignore: Vec<String>,
        #[arg(long, value_enum, default_value_t = AmplificationArg::Off)]
        amplification: AmplificationArg,
        #[arg(long, default_value_t = 500)]
        depth: usize,
        #[arg(long)]
        mock: bool,
    },
    /// Run the matcher over a project's stored commit embeddings.
    Search {
        #[arg(long)]
        project: String,
        #[arg(long)]
        query: String,
        #[arg(long, value_enum, default_value_t = StrengthArg::Mid)]
        strength: StrengthArg,
        #[arg(long = "top-n", default_value_t = 10)]
        top_n: usize,
    },
    /// Run the two-phase localizer over a project's repo.
    Locate {
        #[arg(long)]
        project: String,
        #[arg(long)]
        query: String,
        #[arg(long = "ignore")]
        ignore: Vec<String>,
    },
    /// Print a project's persisted status.
    Status {
        #[arg(long)]
        project: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AmplificationArg {
    Off,
    Low,
    Mid,
    High,
}

impl From<AmplificationArg> for AmplificationLevel {
    fn from(value: AmplificationArg) -> Self {
        match value {
            AmplificationArg::Off => AmplificationLevel::Off,
            AmplificationArg::Low => AmplificationLevel::Low,
            AmplificationArg::Mid => AmplificationLevel::Mid,
            AmplificationArg::High => AmplificationLevel::High,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StrengthArg {
    High,
    Mid,
    Low,
}

impl From<StrengthArg> for MatchStrength {
    fn from(value: StrengthArg) -> Self {
        match value {
            StrengthArg::High => MatchStrength::High,
            StrengthArg::Mid => MatchStrength::Mid,
            StrengthArg::Low => MatchStrength::Low,
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn backends(app_config: &AppConfig, mock: bool) -> (Arc<dyn Chat>, Arc<dyn Embedder>) {
    if mock {
        let backend = Arc::new(MockBackend::default());
        (backend.clone() as Arc<dyn Chat>, backend as Arc<dyn Embedder>)
    } else {
        let backend = Arc::new(OpenAiBackend::new(
            &app_config.api_base,
            &app_config.api_key,
            &app_config.chat_model,
            &app_config.embed_model,
        ));
        (backend.clone() as Arc<dyn Chat>, backend as Arc<dyn Embedder>)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let app_config = AppConfig::load().with_projects_root(cli.projects_root.clone());

    match cli.command {
        Commands::Init { project } => {
            let project_dir = app_config.projects_root.join(&project);
            JsonStore::open(&project_dir, &project)
                .await
                .with_context(|| format!("failed to initialize project store at {}", project_dir.display()))?;
            println!("initialized project '{project}' at {}", project_dir.display());
        }

        Commands::Index { project, repo, ignore, amplification, depth, mock } => {
            let project_dir = app_config.projects_root.join(&project);
            let store: Arc<dyn historian_types::Store> = Arc::new(
                JsonStore::open(&project_dir, &project)
                    .await
                    .with_context(|| format!("failed to open project store at {}", project_dir.display()))?,
            );
            let worktree_dir = project_dir.join("worktree");
            let source: Arc<dyn historian_types::RepoSource> = Arc::new(
                Git2RepoSource::open_or_clone(&repo, &worktree_dir)
                    .with_context(|| format!("failed to open or clone repo '{repo}'"))?,
            );
            let (chat, embedder) = backends(&app_config, mock);
            let pipeline = Pipeline::new(store, source, chat, embedder);
            let config = PipelineConfig {
                ignore_patterns: ignore,
                amplification: amplification.into(),
                max_depth: depth,
            };
            let outcome = pipeline.index(&config).await.context("indexing pipeline failed")?;
            println!("indexed {} new commit(s)", outcome.new_commit_oids.len());
        }

        Commands::Search { project, query, strength, top_n } => {
            let project_dir = app_config.projects_root.join(&project);
            let (pipeline, _worktree_dir) = open_for_retrieval(&app_config, &project_dir, &project).await?;
            let results = pipeline
                .search(&query, strength.into(), top_n)
                .await
                .context("search failed")?;
            for result in results {
                println!("{:.4}  {}", result.similarity, result.oid);
            }
        }

        Commands::Locate { project, query, ignore } => {
            let project_dir = app_config.projects_root.join(&project);
            let (pipeline, _worktree_dir) = open_for_retrieval(&app_config, &project_dir, &project).await?;
            let result = pipeline.locate(&query, &ignore).await.context("localization failed")?;
            for file in result.files {
                println!("{file}");
            }
        }

        Commands::Status { project } => {
            let project_dir = app_config.projects_root.join(&project);
            let store = JsonStore::open(&project_dir, &project)
                .await
                .with_context(|| format!("failed to open project store at {}", project_dir.display()))?;
            match store.read_status().await? {
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                None => println!("project '{project}' has not been indexed yet"),
            }
            if let Some(logs) = store.read_logs().await? {
                println!("--- error logs ---\n{logs}");
            }
        }
    }

    Ok(())
}

/// Opens the store and a local-worktree `RepoSource` for read-only
/// retrieval commands (`search`/`locate`), which never clone a remote repo
/// themselves — only `index` does.
async fn open_for_retrieval(
    app_config: &AppConfig,
    project_dir: &std::path::Path,
    project: &str,
) -> Result<(Pipeline, PathBuf)> {
    let store: Arc<dyn historian_types::Store> = Arc::new(
        JsonStore::open(project_dir, project)
            .await
            .with_context(|| format!("failed to open project store at {}", project_dir.display()))?,
    );
    let worktree_dir = project_dir.join("worktree");
    let source: Arc<dyn historian_types::RepoSource> = Arc::new(
        Git2RepoSource::open(&worktree_dir)
            .with_context(|| format!("project '{project}' has no indexed worktree yet; run `historian index` first"))?,
    );
    let (chat, embedder) = backends(app_config, false);
    Ok((Pipeline::new(store, source, chat, embedder), worktree_dir))
}
