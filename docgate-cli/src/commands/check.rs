use anyhow::{bail, Result};
use colored::Colorize;
use docgate::prelude::*;
use std::path::PathBuf;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = &config.store;

    println!("{}", "Checking document store...".bold());
    println!();
    print!("Store ({})... ", store.redacted_uri());

    let outcome = match store.backend {
        StoreBackend::Memory => probe(&MemoryConnector::default(), store).await,
        StoreBackend::Mongodb => probe(&MongoConnector::new(config.service.name.clone()), store).await,
    };

    match outcome {
        Ok(()) => {
            println!("{}", "✓ OK".green().bold());
            println!("  Database: {}", store.database);
            println!("  Collection: {}", store.collection);
            Ok(())
        }
        Err(e) => {
            println!("{}", "✗ FAILED".red().bold());
            bail!(e)
        }
    }
}

/// Open one connection and ping it within the configured deadlines
async fn probe<C: StoreConnector>(connector: &C, config: &StoreConfig) -> std::result::Result<(), StoreError> {
    let deadline = config.connect_timeout() + config.op_timeout();
    let attempt = async {
        let conn = connector.connect(config).await?;
        conn.ping().await
    };

    match tokio::time::timeout(deadline, attempt).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::timeout(
            StoreOperation::Connect,
            format!("No reply within {:?}", deadline),
        )),
    }
}
