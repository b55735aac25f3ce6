//!
//! Named datasources the changesets are applied to.
//!

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use changelog_engine::{Connection, SqlConnection};
use sqlx::{any::AnyPoolOptions, AnyPool};

use crate::config::{ConnectionString, DataSourceToml};

/// Failure to hand out a connection for a datasource.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No datasource is registered under this name.
    #[error("unknown datasource [{0}]")]
    UnknownDataSource(String),
    /// The pool could not be created for the datasource url.
    #[error("invalid datasource [{name}] url {url}: {source}")]
    InvalidUrl {
        name: String,
        url: String,
        #[source]
        source: sqlx::Error,
    },
    /// The pool could not open or hand out a connection.
    #[error("failed to acquire a connection for datasource [{name}]: {source}")]
    Acquire {
        name: String,
        #[source]
        source: sqlx::Error,
    },
    /// The connection refused to switch to manual transaction mode.
    #[error("failed to start a transaction on datasource [{name}]: {source}")]
    Transaction {
        name: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Hands out exclusively owned connections by datasource name.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    async fn get(&self, datasource: &str) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// [ConnectionSource] over one lazily connected sqlx pool per configured datasource.
#[derive(Clone, Default)]
pub struct DataSourceRegistry {
    pools: BTreeMap<String, AnyPool>,
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("datasources", &self.pools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DataSourceRegistry {
    /// Create a pool for every datasource. No connection is opened until one is requested.
    pub fn from_config(
        datasources: &BTreeMap<String, DataSourceToml>,
    ) -> Result<Self, ConnectionError> {
        let mut registry = Self::default();
        for (name, datasource) in datasources {
            registry.register(name, datasource)?;
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        name: &str,
        datasource: &DataSourceToml,
    ) -> Result<(), ConnectionError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(datasource.max_connections)
            .acquire_timeout(Duration::from_secs(datasource.acquire_timeout_s))
            .connect_lazy(datasource.url.as_str())
            .map_err(|source| ConnectionError::InvalidUrl {
                name: name.to_string(),
                url: datasource.url.redacted(),
                source,
            })?;
        tracing::debug!(
            "Registered datasource [{}] at {}",
            name,
            datasource.url.redacted()
        );
        self.pools.insert(name.to_string(), pool);
        Ok(())
    }

    /// Register a datasource from a url with default pool settings.
    pub fn register_url(
        &mut self,
        name: &str,
        url: &ConnectionString,
    ) -> Result<(), ConnectionError> {
        self.register(name, &DataSourceToml::new(url.clone()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Close every pool, waiting for checked out connections to come back.
    pub async fn close(&self) {
        for pool in self.pools.values() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl ConnectionSource for DataSourceRegistry {
    async fn get(&self, datasource: &str) -> Result<Box<dyn Connection>, ConnectionError> {
        let pool = self
            .pools
            .get(datasource)
            .ok_or_else(|| ConnectionError::UnknownDataSource(datasource.to_string()))?;
        let connection = SqlConnection::acquire(pool)
            .await
            .map_err(|source| ConnectionError::Acquire {
                name: datasource.to_string(),
                source,
            })?;
        Ok(Box::new(connection))
    }
}
