pub mod add;
pub mod crawl;
pub mod gc;
pub mod remove;
pub mod status;
pub mod sync;
pub mod tree;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tributary_core::sources::github::GithubClient;
use tributary_core::{SourceClient, SyncOrchestrator, SyncTarget, TributaryConfig};
use tributary_store::{ConnectorRow, MirrorStore};

/// Shared command context: open store plus loaded configuration.
pub struct Context {
    pub store: MirrorStore,
    pub config: TributaryConfig,
}

impl Context {
    pub async fn load(db: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => TributaryConfig::load(path)?,
            None => TributaryConfig::default(),
        };
        let store = MirrorStore::new(db).await?;
        Ok(Self { store, config })
    }

    pub async fn connector(&self, connector_id: i64) -> Result<ConnectorRow> {
        self.store
            .get_connector(connector_id)
            .await?
            .ok_or_else(|| anyhow!("no connector with id {connector_id}"))
    }

    /// Build the sync orchestrator for a GitHub connector.
    pub fn github_orchestrator(&self) -> Result<SyncOrchestrator> {
        let client = GithubClient::new(&self.config.github)?;
        Ok(SyncOrchestrator::new(
            Arc::new(client) as Arc<dyn SourceClient>,
            self.store.clone(),
            self.config.step_timeouts(),
            self.config.sync_concurrency(),
        ))
    }

    pub fn sync_target(&self, connector: &ConnectorRow) -> SyncTarget {
        SyncTarget {
            connector_id: connector.id,
            installation_id: connector.connection_id.clone(),
            data_source: connector.data_source.clone(),
            code_only: false,
        }
    }
}
