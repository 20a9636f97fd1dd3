use anyhow::{Context, Result};
use docgate::prelude::*;
use std::path::PathBuf;

pub async fn execute(config_path: Option<PathBuf>, port: Option<u16>, memory: bool) -> Result<()> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = port {
        config.service.port = port;
    }
    if memory {
        config.store.backend = StoreBackend::Memory;
    }

    init_tracing(&config)?;

    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Serving from an in-memory collection; documents are lost on exit");
            run(config, MemoryConnector::new(MemoryStore::new())).await
        }
        StoreBackend::Mongodb => {
            let connector = MongoConnector::new(config.service.name.clone());
            run(config, connector).await
        }
    }
}

async fn run<C: StoreConnector>(config: Config, connector: C) -> Result<()> {
    let state = AppState::connect(config.clone(), connector)
        .await
        .with_context(|| format!("Failed to reach store at {}", config.store.redacted_uri()))?;

    Server::new(config).serve(router(state)).await?;
    Ok(())
}
