//! Application state wiring storage, the model provider, and the build loop.
//!
//! AppState holds the concrete instances used by both CLI commands and REST
//! handlers. The core build loop is generic over its session store; AppState
//! pins it to the SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;

use pagewright_core::build::driver::{BuildLoop, LoopConfig};
use pagewright_core::build::prompt::DefaultPromptComposer;
use pagewright_infra::config::{load_api_key, load_global_config, resolve_data_dir, sites_dir};
use pagewright_infra::llm::create_provider;
use pagewright_infra::sqlite::build_session::SqliteBuildSessionStore;
use pagewright_infra::sqlite::pool::{DatabasePool, database_url};
use pagewright_infra::sqlite::project::SqliteProjectRepository;
use pagewright_infra::tools::{ToolSettings, default_registry};
use pagewright_types::config::GlobalConfig;

/// Build loop pinned to the SQLite session store.
pub type ConcreteBuildLoop = BuildLoop<SqliteBuildSessionStore>;

/// Advisors answer briefly; no need for the full turn budget.
const ADVISOR_MAX_TOKENS: u32 = 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub projects: Arc<SqliteProjectRepository>,
    pub sessions: Arc<SqliteBuildSessionStore>,
    /// `None` when no API key is configured; project commands still work.
    pub build_loop: Option<Arc<ConcreteBuildLoop>>,
    build_unavailable: Option<String>,
    pub composer: Arc<DefaultPromptComposer>,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize from the environment: data dir, config, API key.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let config = load_global_config(&data_dir).await;
        let api_key = match load_api_key() {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::debug!(error = %e, "build loop disabled");
                None
            }
        };
        Self::open(data_dir, config, api_key).await
    }

    /// Wire everything under an explicit data directory.
    pub async fn open(
        data_dir: PathBuf,
        config: GlobalConfig,
        api_key: Option<SecretString>,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open the database")?;

        let projects = Arc::new(SqliteProjectRepository::new(db_pool.clone()));
        let ttl = chrono::Duration::hours(config.session_ttl_hours as i64);
        let sessions = Arc::new(SqliteBuildSessionStore::new(db_pool.clone(), ttl));

        let (build_loop, build_unavailable) = match api_key {
            Some(key) => (
                Some(Arc::new(Self::wire_build_loop(
                    &config,
                    key,
                    &data_dir,
                    sessions.clone(),
                )?)),
                None,
            ),
            None => (
                None,
                Some(format!(
                    "{} is not set; builds are unavailable",
                    pagewright_infra::config::API_KEY_ENV
                )),
            ),
        };

        let composer = match read_guidance(&data_dir).await {
            Some(guidance) => DefaultPromptComposer::with_guidance(guidance),
            None => DefaultPromptComposer::new(),
        };

        Ok(Self {
            projects,
            sessions,
            build_loop,
            build_unavailable,
            composer: Arc::new(composer),
            config: Arc::new(config),
            data_dir,
        })
    }

    fn wire_build_loop(
        config: &GlobalConfig,
        api_key: SecretString,
        data_dir: &Path,
        sessions: Arc<SqliteBuildSessionStore>,
    ) -> anyhow::Result<ConcreteBuildLoop> {
        let provider = create_provider(config, api_key).context("failed to create model provider")?;
        let tools = default_registry(ToolSettings {
            provider: provider.clone(),
            model: config.model.clone(),
            advisor_max_tokens: ADVISOR_MAX_TOKENS,
            sites_dir: sites_dir(data_dir),
            site_base_url: config.site_base_url.clone(),
        })
        .context("tool registry does not cover the build plan")?;

        Ok(BuildLoop::new(
            provider,
            Arc::new(tools),
            sessions,
            LoopConfig::from(config),
        ))
    }

    /// The build loop, or a message saying why builds are disabled.
    pub fn require_build_loop(&self) -> Result<Arc<ConcreteBuildLoop>, String> {
        self.build_loop.clone().ok_or_else(|| {
            self.build_unavailable
                .clone()
                .unwrap_or_else(|| "builds are unavailable".to_string())
        })
    }
}

/// Optional house-style notes from `{data_dir}/guidance.md`.
async fn read_guidance(data_dir: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(data_dir.join("guidance.md"))
        .await
        .ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
