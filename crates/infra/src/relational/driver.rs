//! Concrete sqlx pools behind one handle. The URL scheme picks the backend:
//! `sqlite:` URLs open SQLite, everything else MySQL.

use std::str::FromStr;

use serde_json::Value as JsonValue;
use sqlx::Transaction;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions};

use super::config::RelationalConfig;
use super::row::{ExecResult, SqlRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    MySql,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite:") {
            Backend::Sqlite
        } else {
            Backend::MySql
        }
    }
}

/// A live connection pool.
#[derive(Debug, Clone)]
pub enum SqlPool {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl SqlPool {
    /// Open a pool and verify it with one round-trip.
    ///
    /// MySQL sessions get the configured charset and time zone on every
    /// new connection.
    pub(crate) async fn open(config: &RelationalConfig) -> Result<Self, sqlx::Error> {
        let url = config.connection_url();
        let pool = match Backend::from_url(&url) {
            Backend::MySql => {
                let options = MySqlConnectOptions::from_str(&url)?
                    .charset(&config.charset)
                    .timezone(Some(config.timezone.clone()));
                let pool = MySqlPoolOptions::new()
                    .max_connections(config.pool_size)
                    .acquire_timeout(config.connect_timeout)
                    .connect_with(options)
                    .await?;
                SqlPool::MySql(pool)
            }
            Backend::Sqlite => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(config.pool_size)
                    .acquire_timeout(config.connect_timeout)
                    .connect(&url)
                    .await?;
                SqlPool::Sqlite(pool)
            }
        };

        pool.execute("SELECT 1", &[]).await?;
        Ok(pool)
    }

    pub fn backend(&self) -> Backend {
        match self {
            SqlPool::MySql(_) => Backend::MySql,
            SqlPool::Sqlite(_) => Backend::Sqlite,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            SqlPool::MySql(pool) => pool.is_closed(),
            SqlPool::Sqlite(pool) => pool.is_closed(),
        }
    }

    /// Wait for checked-out connections to return, then close them all.
    pub async fn close(&self) {
        match self {
            SqlPool::MySql(pool) => pool.close().await,
            SqlPool::Sqlite(pool) => pool.close().await,
        }
    }

    pub(crate) async fn fetch_all(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<SqlRow>, sqlx::Error> {
        match self {
            SqlPool::MySql(pool) => mysql::fetch_all(pool, sql, params).await,
            SqlPool::Sqlite(pool) => sqlite::fetch_all(pool, sql, params).await,
        }
    }

    pub(crate) async fn fetch_optional(
        &self,
        sql: &str,
        params: &[JsonValue],
    ) -> Result<Option<SqlRow>, sqlx::Error> {
        match self {
            SqlPool::MySql(pool) => mysql::fetch_optional(pool, sql, params).await,
            SqlPool::Sqlite(pool) => sqlite::fetch_optional(pool, sql, params).await,
        }
    }

    pub(crate) async fn execute(&self, sql: &str, params: &[JsonValue]) -> Result<ExecResult, sqlx::Error> {
        match self {
            SqlPool::MySql(pool) => mysql::execute(pool, sql, params).await,
            SqlPool::Sqlite(pool) => sqlite::execute(pool, sql, params).await,
        }
    }

    pub(crate) async fn begin(&self) -> Result<SqlTransaction, sqlx::Error> {
        Ok(match self {
            SqlPool::MySql(pool) => SqlTransaction::MySql(pool.begin().await?),
            SqlPool::Sqlite(pool) => SqlTransaction::Sqlite(pool.begin().await?),
        })
    }
}

/// An open transaction on one pooled connection.
pub(crate) enum SqlTransaction {
    MySql(Transaction<'static, MySql>),
    Sqlite(Transaction<'static, Sqlite>),
}

impl SqlTransaction {
    pub(crate) async fn fetch_all(&mut self, sql: &str, params: &[JsonValue]) -> Result<Vec<SqlRow>, sqlx::Error> {
        match self {
            SqlTransaction::MySql(tx) => mysql::fetch_all(&mut **tx, sql, params).await,
            SqlTransaction::Sqlite(tx) => sqlite::fetch_all(&mut **tx, sql, params).await,
        }
    }

    pub(crate) async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[JsonValue],
    ) -> Result<Option<SqlRow>, sqlx::Error> {
        match self {
            SqlTransaction::MySql(tx) => mysql::fetch_optional(&mut **tx, sql, params).await,
            SqlTransaction::Sqlite(tx) => sqlite::fetch_optional(&mut **tx, sql, params).await,
        }
    }

    pub(crate) async fn execute(&mut self, sql: &str, params: &[JsonValue]) -> Result<ExecResult, sqlx::Error> {
        match self {
            SqlTransaction::MySql(tx) => mysql::execute(&mut **tx, sql, params).await,
            SqlTransaction::Sqlite(tx) => sqlite::execute(&mut **tx, sql, params).await,
        }
    }

    pub(crate) async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            SqlTransaction::MySql(tx) => tx.commit().await,
            SqlTransaction::Sqlite(tx) => tx.commit().await,
        }
    }

    pub(crate) async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            SqlTransaction::MySql(tx) => tx.rollback().await,
            SqlTransaction::Sqlite(tx) => tx.rollback().await,
        }
    }
}

/// Statement helpers for one concrete driver, generic over pool or connection.
macro_rules! statements {
    ($module:ident, $db:ty, $row_to_map:path) => {
        mod $module {
            use serde_json::Value as JsonValue;
            use sqlx::Executor;

            use super::super::row::{ExecResult, SqlRow, bind_params};

            pub(super) async fn fetch_all<'c, E>(
                executor: E,
                sql: &str,
                params: &[JsonValue],
            ) -> Result<Vec<SqlRow>, sqlx::Error>
            where
                E: Executor<'c, Database = $db>,
            {
                let rows = bind_params(sqlx::query::<$db>(sql), params).fetch_all(executor).await?;
                rows.iter().map($row_to_map).collect()
            }

            pub(super) async fn fetch_optional<'c, E>(
                executor: E,
                sql: &str,
                params: &[JsonValue],
            ) -> Result<Option<SqlRow>, sqlx::Error>
            where
                E: Executor<'c, Database = $db>,
            {
                let row = bind_params(sqlx::query::<$db>(sql), params)
                    .fetch_optional(executor)
                    .await?;
                row.as_ref().map($row_to_map).transpose()
            }

            pub(super) async fn execute<'c, E>(
                executor: E,
                sql: &str,
                params: &[JsonValue],
            ) -> Result<ExecResult, sqlx::Error>
            where
                E: Executor<'c, Database = $db>,
            {
                let done = bind_params(sqlx::query::<$db>(sql), params).execute(executor).await?;
                Ok(ExecResult::from(done))
            }
        }
    };
}

statements!(mysql, sqlx::mysql::MySql, super::super::row::mysql_row_to_map);
statements!(sqlite, sqlx::sqlite::Sqlite, super::super::row::sqlite_row_to_map);
