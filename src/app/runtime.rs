//! Runtime initialization and setup

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::app::config::AppConfig;
use crate::mapreduce::build_engine;
use crate::orchestration::{JsonlHistoryStore, OrchestrationEngine};
use crate::storage::StorageFactory;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the engine described by `config`: JSONL history under the state
/// dir, blob access routed by scheme through one shared HTTP client
pub async fn initialize_engine(config: &AppConfig) -> Result<Arc<OrchestrationEngine>> {
    let settings = &config.settings;

    let history = JsonlHistoryStore::new(&settings.state_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to open state directory {}",
                settings.state_dir.display()
            )
        })?;
    debug!("Instance histories stored in {}", history.dir().display());

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let blobs = StorageFactory::from_client(client)
        .await
        .context("Failed to initialize blob storage")?;

    let engine = build_engine(Arc::new(history), blobs, &settings.mapreduce_options());
    Ok(Arc::new(engine))
}
