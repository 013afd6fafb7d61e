//! Application state shared by the CLI commands.
//!
//! Pins the core's generic ports to the concrete infra implementations.

use std::path::PathBuf;
use std::sync::Arc;

use turnflow_core::agent::AgentRegistry;
use turnflow_core::workflow::PatternWorkflowSource;
use turnflow_infra::config::{data_dir, load_global_config, resolve_database_url};
use turnflow_infra::sqlite::{DatabasePool, SqliteConversationStore};
use turnflow_infra::workflow::{WorkflowLibrary, workflows_dir};
use turnflow_types::config::GlobalConfig;

#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: GlobalConfig,
    pub store: SqliteConversationStore,
}

impl AppState {
    /// Resolve the data dir, load `config.toml` and open the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;
        let db_pool = DatabasePool::new(&resolve_database_url(&config, &data_dir)).await?;

        Ok(Self {
            store: SqliteConversationStore::new(db_pool),
            data_dir,
            config,
        })
    }

    pub fn workflows_dir(&self) -> PathBuf {
        workflows_dir(&self.data_dir)
    }

    /// Stored workflows, falling back to pattern assembly over `registry`.
    pub fn workflow_library(
        &self,
        registry: Arc<AgentRegistry>,
        default_agents: Vec<String>,
    ) -> anyhow::Result<WorkflowLibrary> {
        let fallback = PatternWorkflowSource::new(registry).with_default_agents(default_agents);
        Ok(WorkflowLibrary::load(&self.workflows_dir())?.with_fallback(Arc::new(fallback)))
    }
}
