//! Application state management

use std::sync::Arc;

use crate::{
    config::Config,
    error::Result,
    handler::{HandlerSettings, RequestHandler},
    pool::{self, StorePool, StorePoolHealth},
    store::StoreConnector,
};

/// Application state shared across handlers
pub struct AppState<C: StoreConnector> {
    config: Arc<Config>,
    handler: RequestHandler<C>,
}

impl<C: StoreConnector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<C: StoreConnector> AppState<C> {
    /// Create the store pool for `config` and wrap it in application state
    ///
    /// Honors `store.lazy_init`: an eager pool opens (and retries) one
    /// connection before this returns.
    pub async fn connect(config: Config, connector: C) -> Result<Self> {
        let store_config = Arc::new(config.store.clone());
        let pool = pool::create_pool(connector, store_config).await?;
        Ok(Self::with_pool(config, pool))
    }

    /// Wrap an existing pool
    pub fn with_pool(config: Config, pool: StorePool<C>) -> Self {
        let settings = HandlerSettings::from_config(&config);
        Self {
            config: Arc::new(config),
            handler: RequestHandler::new(pool, settings),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handler(&self) -> &RequestHandler<C> {
        &self.handler
    }

    pub fn pool(&self) -> &StorePool<C> {
        self.handler.pool()
    }

    pub fn pool_health(&self) -> StorePoolHealth {
        StorePoolHealth::from_pool(self.pool())
    }
}
