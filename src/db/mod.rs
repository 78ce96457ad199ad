//! Database layer
//!
//! SQLite is the default for single-binary deployments; MySQL is available for
//! larger installs. Code above this module only sees [`DynDatabasePool`] and
//! the repository traits.
//!
//! ```ignore
//! use blueprintue::config::DatabaseConfig;
//! use blueprintue::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, InsertId, MysqlDatabase,
    SqliteDatabase,
};

/// Run the same query body against whichever backend the pool wraps.
///
/// The body is expanded once per driver, so `sqlx::query*` calls in it are
/// typed against the concrete `SqlitePool` or `MySqlPool`.
///
/// ```ignore
/// let count = with_pool!(self.pool, |p| {
///     sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tags")
///         .fetch_one(p)
///         .await
///         .context("Failed to count tags")?
/// });
/// ```
#[macro_export]
macro_rules! with_pool {
    ($pool:expr, |$p:ident| $body:expr) => {
        match $pool.driver() {
            $crate::config::DatabaseDriver::Sqlite => {
                let $p = $pool
                    .as_sqlite()
                    .ok_or_else(|| ::anyhow::anyhow!("SQLite pool not available"))?;
                $body
            }
            $crate::config::DatabaseDriver::Mysql => {
                let $p = $pool
                    .as_mysql()
                    .ok_or_else(|| ::anyhow::anyhow!("MySQL pool not available"))?;
                $body
            }
        }
    };
}
