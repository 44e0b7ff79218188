use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::config::{parse_config, sync_agent_directory, NightshiftConfig};
use crate::engine::{ExecutionEngine, HandlerRegistry};
use crate::errors::NightshiftError;
use crate::facts::{FactSource, FileFactSource, LayeredFactSource, StaticFactSource};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::scheduler::{AgentRegistry, Scheduler};
use crate::store::Database;

pub async fn load_config(path: Option<&Path>) -> Result<NightshiftConfig, NightshiftError> {
    match path {
        Some(path) => parse_config(path).await,
        None => Ok(NightshiftConfig::default()),
    }
}

pub fn open_database(config: &NightshiftConfig) -> Result<Database, NightshiftError> {
    Database::new(&config.storage.database.to_string_lossy())
}

/// Everything a daemon or a one-off trigger needs, wired from the config.
pub struct Runtime {
    pub config: NightshiftConfig,
    pub db: Database,
    pub scheduler: Arc<Scheduler>,
    pub api_facts: Arc<StaticFactSource>,
}

impl Runtime {
    /// Wiring for one-off commands. Runs a daemon may own are left alone.
    pub async fn build(config_path: Option<&Path>) -> Result<Self, NightshiftError> {
        Self::assemble(config_path, false).await
    }

    /// Wiring for the long-running scheduler. Runs a previous process left
    /// open are closed out before any agent is loaded.
    pub async fn build_daemon(config_path: Option<&Path>) -> Result<Self, NightshiftError> {
        Self::assemble(config_path, true).await
    }

    async fn assemble(config_path: Option<&Path>, recover: bool) -> Result<Self, NightshiftError> {
        let config = load_config(config_path).await?;
        let db = open_database(&config)?;

        if recover {
            let recovered = db.recover_interrupted_runs()?;
            if !recovered.is_empty() {
                warn!(runs = recovered.len(), "Closed runs interrupted by the previous shutdown");
            }
        }

        if let Some(dir) = &config.agents.directory {
            let report = sync_agent_directory(&db, dir).await?;
            for (path, error) in &report.failed {
                warn!(path = %path.display(), error = %error, "Agent definition not loaded");
            }
        }

        let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url)?),
            None => Arc::new(LogNotifier),
        };
        let handlers = HandlerRegistry::builtin(notifier.clone()).with_templates(&config.handlers);
        info!(kinds = ?handlers.kinds(), "Action handlers registered");

        let engine = ExecutionEngine::new(Arc::new(handlers), Arc::new(db.clone()), notifier)
            .with_settings(config.engine.settings());

        let api_facts = Arc::new(StaticFactSource::new());
        let file_source = config
            .facts
            .file
            .as_deref()
            .map(|path| Arc::new(FileFactSource::new(path)) as Arc<dyn FactSource>);
        let facts: Arc<dyn FactSource> = Arc::new(LayeredFactSource::new(file_source, api_facts.clone()));

        let scheduler = Scheduler::new(Arc::new(AgentRegistry::new()), Arc::new(db.clone()), facts, Arc::new(engine))
            .with_settings(config.scheduler.settings());
        scheduler.reload()?;

        Ok(Self {
            config,
            db,
            scheduler: Arc::new(scheduler),
            api_facts,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            scheduler: self.scheduler.clone(),
            facts: self.api_facts.clone(),
        }
    }

    /// Run the scheduler (and the API when `listen` is set) until Ctrl-C.
    pub async fn run_daemon(self, listen: Option<&str>) -> Result<(), NightshiftError> {
        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            signal_token.cancel();
        });

        let server = match listen {
            Some(addr) => {
                let listener = tokio::net::TcpListener::bind(addr).await?;
                info!("Listening on {}", addr);
                let app = api::build_router(self.app_state());
                let server_token = shutdown.clone();
                Some(tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move { server_token.cancelled().await })
                        .await
                }))
            }
            None => None,
        };

        self.scheduler.run(shutdown.clone()).await;

        if let Some(server) = server {
            shutdown.cancel();
            server
                .await
                .map_err(|e| NightshiftError::Internal(format!("Server task failed: {}", e)))?
                .map_err(|e| NightshiftError::Internal(format!("Server error: {}", e)))?;
        }
        Ok(())
    }
}
