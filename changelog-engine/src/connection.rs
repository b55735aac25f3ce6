use async_trait::async_trait;
use futures_util::future::BoxFuture;
use sqlx::{
    any::AnyPoolOptions,
    AnyConnection, AnyPool,
    pool::PoolConnection,
    Any, Transaction,
};

/// A raw database connection, exclusively owned by whoever holds it.
///
/// Connections start in auto-commit mode. [Connection::begin] switches to manual
/// transaction mode until the next [Connection::commit] or [Connection::rollback].
#[async_trait]
pub trait Connection: Send {
    /// Backend name reported by the driver, e.g. `SQLite` or `PostgreSQL`.
    fn backend_name(&self) -> &str;

    /// Start a transaction. Calling it while a transaction is open is a no-op.
    async fn begin(&mut self) -> Result<(), sqlx::Error>;

    async fn commit(&mut self) -> Result<(), sqlx::Error>;

    async fn rollback(&mut self) -> Result<(), sqlx::Error>;

    /// The sqlx connection to run statements on. Inside a transaction this is
    /// the transaction's connection.
    async fn executor(&mut self) -> Result<&mut AnyConnection, sqlx::Error>;

    /// Release the connection. An open transaction is rolled back first.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), sqlx::Error>>;
}

/// [Connection] over a sqlx `Any` pool.
///
/// Outside a transaction statements run on a pooled connection in auto-commit
/// mode. [Connection::begin] hands that connection back and opens a sqlx
/// [Transaction] from the pool, so commit, rollback and the rollback on drop
/// all go through sqlx.
pub struct SqlConnection {
    pool: AnyPool,
    /// Set for [SqlConnection::connect], whose pool serves only this connection.
    owns_pool: bool,
    backend: String,
    idle: Option<PoolConnection<Any>>,
    transaction: Option<Transaction<'static, Any>>,
}

impl std::fmt::Debug for SqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlConnection")
            .field("backend", &self.backend)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl SqlConnection {
    /// Open a standalone connection from a sqlx connection url.
    ///
    /// The connection lives in a pool of its own with a single slot, closed
    /// together with the connection.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect(url).await?;
        Self::from_pool(pool, true).await
    }

    /// Check out a connection of `pool`. Closing it hands it back.
    pub async fn acquire(pool: &AnyPool) -> Result<Self, sqlx::Error> {
        Self::from_pool(pool.clone(), false).await
    }

    async fn from_pool(pool: AnyPool, owns_pool: bool) -> Result<Self, sqlx::Error> {
        let idle = pool.acquire().await?;
        Ok(Self {
            backend: idle.backend_name().to_string(),
            idle: Some(idle),
            transaction: None,
            pool,
            owns_pool,
        })
    }

    /// Whether a transaction started with [Connection::begin] is still open.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

#[async_trait]
impl Connection for SqlConnection {
    fn backend_name(&self) -> &str {
        &self.backend
    }

    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        if self.transaction.is_some() {
            return Ok(());
        }
        // Give the slot back first, a single slot pool would wait on it otherwise.
        drop(self.idle.take());
        self.transaction = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        match self.transaction.take() {
            Some(transaction) => transaction.commit().await,
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        match self.transaction.take() {
            Some(transaction) => transaction.rollback().await,
            None => Ok(()),
        }
    }

    async fn executor(&mut self) -> Result<&mut AnyConnection, sqlx::Error> {
        if let Some(transaction) = self.transaction.as_mut() {
            return Ok(&mut **transaction);
        }
        let connection = match self.idle.take() {
            Some(connection) => connection,
            None => self.pool.acquire().await?,
        };
        Ok(&mut **self.idle.insert(connection))
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), sqlx::Error>> {
        Box::pin(async move {
            let SqlConnection {
                pool,
                owns_pool,
                idle,
                transaction,
                ..
            } = *self;
            // A failed rollback still leaves the transaction open, sqlx then
            // rolls it back before the connection is reused.
            let result = match transaction {
                Some(transaction) => transaction.rollback().await,
                None => Ok(()),
            };
            drop(idle);
            if owns_pool {
                pool.close().await;
            }
            result
        })
    }
}
