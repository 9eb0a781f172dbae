//! Relational store client.
//!
//! One pool per client, opened lazily and reopened on the next call after a
//! connection-class failure. All public methods go through `ensure_connected`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::instrument;

use innkeep_core::{ConnectionKind, ConnectionState, Page, Pagination, StateCell};

use super::config::RelationalConfig;
use super::driver::{SqlPool, SqlTransaction};
use super::error::{RelationalError, map_sqlx_error};
use super::row::{ExecResult, SqlRow};

/// Boxed future returned by `transaction` bodies.
pub type ScopeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RelationalError>> + Send + 'a>>;

/// The cached pool, tagged with the open attempt that produced it.
#[derive(Debug, Clone)]
struct LivePool {
    generation: u64,
    pool: SqlPool,
}

/// Gateway to the relational database.
///
/// Cheap to share behind an `Arc`; the pool itself is created on first use.
#[derive(Debug)]
pub struct RelationalClient {
    config: RelationalConfig,
    pool: Mutex<Option<LivePool>>,
    opened: AtomicU64,
    state: Arc<StateCell>,
}

impl RelationalClient {
    pub fn new(config: RelationalConfig) -> Self {
        Self {
            config,
            pool: Mutex::new(None),
            opened: AtomicU64::new(0),
            state: Arc::new(StateCell::new(ConnectionKind::Relational)),
        }
    }

    pub fn config(&self) -> &RelationalConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.snapshot()
    }

    /// Non-blocking status check for health reporting.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Open the pool if there is no live one. Idempotent.
    pub async fn connect(&self) -> Result<SqlPool, RelationalError> {
        Ok(self.ensure_connected().await?.pool)
    }

    /// Close the pool. Idempotent; the next call reconnects.
    pub async fn disconnect(&self) {
        let live = self.pool.lock().await.take();
        if let Some(live) = live {
            live.pool.close().await;
            tracing::info!(endpoint = %self.config.redacted_target(), "relational store disconnected");
        }
        self.state.set_disconnected();
    }

    /// Run a statement and return every row in order.
    #[instrument(skip(self, params), fields(param_count = params.len()), err)]
    pub async fn query(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<SqlRow>, RelationalError> {
        let live = self.ensure_connected().await?;
        let result = live.pool.fetch_all(sql, params).await;
        self.observe("query", &live, result).await
    }

    /// First row of `query`, or `None` when nothing matches.
    #[instrument(skip(self, params), fields(param_count = params.len()), err)]
    pub async fn fetch_one(&self, sql: &str, params: &[JsonValue]) -> Result<Option<SqlRow>, RelationalError> {
        let live = self.ensure_connected().await?;
        let result = live.pool.fetch_optional(sql, params).await;
        self.observe("fetch_one", &live, result).await
    }

    /// Run an INSERT/UPDATE/DELETE.
    #[instrument(skip(self, params), fields(param_count = params.len()), err)]
    pub async fn execute(&self, sql: &str, params: &[JsonValue]) -> Result<ExecResult, RelationalError> {
        let live = self.ensure_connected().await?;
        let result = live.pool.execute(sql, params).await;
        self.observe("execute", &live, result).await
    }

    /// Run `sql` one page at a time.
    ///
    /// `sql` must be a plain SELECT without its own LIMIT/OFFSET; it is wrapped
    /// as a subquery for the total count.
    #[instrument(skip(self, params), fields(page = pagination.page(), limit = pagination.limit()), err)]
    pub async fn paginate(
        &self,
        sql: &str,
        params: &[JsonValue],
        pagination: Pagination,
    ) -> Result<Page<SqlRow>, RelationalError> {
        let base = sql.trim().trim_end_matches(';');

        let count_sql = format!("SELECT COUNT(*) AS total FROM ({base}) AS paged");
        let total = self
            .fetch_one(&count_sql, params)
            .await?
            .and_then(|row| row.get("total").and_then(JsonValue::as_u64))
            .unwrap_or(0);

        let page_sql = format!("{base} LIMIT {} OFFSET {}", pagination.limit(), pagination.offset());
        let items = self.query(&page_sql, params).await?;

        Ok(Page::new(items, total, pagination))
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`; rolls back and returns the error otherwise.
    /// The transaction holds one pooled connection for its whole scope.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, RelationalError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut TransactionScope) -> ScopeFuture<'t, T> + Send,
    {
        let live = self.ensure_connected().await?;
        let begun = live.pool.begin().await;
        let tx = self.observe("begin_transaction", &live, begun).await?;
        let mut scope = TransactionScope { tx };

        match f(&mut scope).await {
            Ok(value) => {
                let committed = scope.tx.commit().await;
                self.observe("commit_transaction", &live, committed).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.tx.rollback().await {
                    tracing::error!(error = %rollback_err, "transaction rollback failed");
                    let _ = self.observe::<()>("rollback_transaction", &live, Err(rollback_err)).await;
                } else {
                    tracing::debug!(error = %err, "transaction rolled back");
                }
                Err(err)
            }
        }
    }

    /// The single reconnect guard: returns the live pool or opens a new one.
    ///
    /// Holding the mutex across the connect keeps at most one pool alive.
    async fn ensure_connected(&self) -> Result<LivePool, RelationalError> {
        let mut guard = self.pool.lock().await;
        if let Some(live) = guard.as_ref() {
            if !live.pool.is_closed() {
                if !self.state.is_connected() {
                    self.state.set_connected();
                }
                return Ok(live.clone());
            }
        }

        self.state.set_connecting();
        let endpoint = self.config.redacted_target();
        let generation = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        match SqlPool::open(&self.config).await {
            Ok(pool) => {
                tracing::info!(%endpoint, backend = ?pool.backend(), pool_size = self.config.pool_size, "relational store connected");
                self.state.set_connected();
                let live = LivePool { generation, pool };
                *guard = Some(live.clone());
                Ok(live)
            }
            Err(err) => {
                let err = connect_error(err);
                tracing::error!(%endpoint, error = %err, "relational store connection failed");
                self.state.set_failed(err.to_string());
                *guard = None;
                Err(err)
            }
        }
    }

    /// Map a driver result. A connection-class failure closes the pool that
    /// produced it, unless a newer pool has already replaced it.
    async fn observe<T>(
        &self,
        operation: &str,
        live: &LivePool,
        result: Result<T, sqlx::Error>,
    ) -> Result<T, RelationalError> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(e) => map_sqlx_error(operation, e),
        };
        if err.is_connection() {
            let stale = {
                let mut guard = self.pool.lock().await;
                match guard.as_ref() {
                    Some(cached) if cached.generation == live.generation => guard.take(),
                    _ => None,
                }
            };
            if let Some(stale) = stale {
                tracing::warn!(operation, error = %err, "relational connection lost; will reconnect on next use");
                self.state.set_failed(err.to_string());
                stale.pool.close().await;
            }
        }
        Err(err)
    }
}

/// Any failure while opening the pool is a connection failure, whatever its cause.
fn connect_error(err: sqlx::Error) -> RelationalError {
    match map_sqlx_error("connect", err) {
        RelationalError::Connection(msg) => RelationalError::Connection(msg),
        RelationalError::Query(msg) | RelationalError::Decode(msg) => RelationalError::Connection(msg),
    }
}

/// Transactional context handed to `RelationalClient::transaction` bodies.
pub struct TransactionScope {
    tx: SqlTransaction,
}

impl TransactionScope {
    pub async fn query(&mut self, sql: &str, params: &[JsonValue]) -> Result<Vec<SqlRow>, RelationalError> {
        self.tx
            .fetch_all(sql, params)
            .await
            .map_err(|e| map_sqlx_error("tx_query", e))
    }

    pub async fn fetch_one(&mut self, sql: &str, params: &[JsonValue]) -> Result<Option<SqlRow>, RelationalError> {
        self.tx
            .fetch_optional(sql, params)
            .await
            .map_err(|e| map_sqlx_error("tx_fetch_one", e))
    }

    pub async fn execute(&mut self, sql: &str, params: &[JsonValue]) -> Result<ExecResult, RelationalError> {
        self.tx
            .execute(sql, params)
            .await
            .map_err(|e| map_sqlx_error("tx_execute", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn sqlite_client() -> RelationalClient {
        let client = RelationalClient::new(RelationalConfig::for_url("sqlite::memory:"));
        client
            .execute(
                "CREATE TABLE rooms (id INTEGER PRIMARY KEY AUTOINCREMENT, number TEXT NOT NULL UNIQUE, floor INTEGER, rate REAL)",
                &[],
            )
            .await
            .unwrap();
        client
    }

    async fn room_count(client: &RelationalClient) -> i64 {
        let row = client
            .fetch_one("SELECT COUNT(*) AS n FROM rooms", &[])
            .await
            .unwrap()
            .unwrap();
        row["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn first_use_connects_lazily() {
        let client = RelationalClient::new(RelationalConfig::for_url("sqlite::memory:"));
        assert!(!client.is_connected());

        client.query("SELECT 1 AS one", &[]).await.unwrap();
        assert!(client.is_connected());
        assert!(client.state().last_error.is_none());
    }

    #[tokio::test]
    async fn execute_then_query_returns_rows_in_order() {
        let client = sqlite_client().await;
        let first = client
            .execute(
                "INSERT INTO rooms (number, floor, rate) VALUES (?, ?, ?)",
                &[json!("101"), json!(1), json!(89.5)],
            )
            .await
            .unwrap();
        assert_eq!(first.affected_rows, 1);
        assert_eq!(first.last_insert_id, Some(1));

        client
            .execute(
                "INSERT INTO rooms (number, floor, rate) VALUES (?, ?, ?)",
                &[json!("102"), JsonValue::Null, json!(99.0)],
            )
            .await
            .unwrap();

        let rows = client
            .query("SELECT number, floor, rate FROM rooms ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["number"], json!("101"));
        assert_eq!(rows[0]["floor"], json!(1));
        assert_eq!(rows[0]["rate"], json!(89.5));
        assert_eq!(rows[1]["floor"], JsonValue::Null);
    }

    #[tokio::test]
    async fn fetch_one_matches_first_query_row_or_none() {
        let client = sqlite_client().await;
        for number in ["201", "202"] {
            client
                .execute("INSERT INTO rooms (number, floor) VALUES (?, 2)", &[json!(number)])
                .await
                .unwrap();
        }

        let sql = "SELECT number FROM rooms WHERE floor = ? ORDER BY number";
        let all = client.query(sql, &[json!(2)]).await.unwrap();
        let one = client.fetch_one(sql, &[json!(2)]).await.unwrap();
        assert_eq!(one.as_ref(), all.first());

        let none = client.fetch_one(sql, &[json!(9)]).await.unwrap();
        assert!(client.query(sql, &[json!(9)]).await.unwrap().is_empty());
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn constraint_violation_is_query_error() {
        let client = sqlite_client().await;
        client
            .execute("INSERT INTO rooms (number) VALUES ('301')", &[])
            .await
            .unwrap();
        let err = client
            .execute("INSERT INTO rooms (number) VALUES ('301')", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RelationalError::Query(_)), "{err:?}");
        // A query error is not a connection problem.
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn malformed_sql_is_query_error() {
        let client = sqlite_client().await;
        let err = client.query("SELEC nothing", &[]).await.unwrap_err();
        assert!(matches!(err, RelationalError::Query(_)), "{err:?}");
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_rows_behind() {
        let client = sqlite_client().await;
        let before = room_count(&client).await;

        let result: Result<(), RelationalError> = client
            .transaction(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO rooms (number) VALUES ('401')", &[]).await?;
                    let seen = tx.fetch_one("SELECT COUNT(*) AS n FROM rooms", &[]).await?;
                    assert_eq!(seen.unwrap()["n"], json!(1));
                    Err(RelationalError::Query("booking validation failed".into()))
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(room_count(&client).await, before);
    }

    #[tokio::test]
    async fn successful_transaction_commits() {
        let client = sqlite_client().await;
        let inserted = client
            .transaction(|tx| {
                Box::pin(async move {
                    let a = tx.execute("INSERT INTO rooms (number) VALUES ('501')", &[]).await?;
                    let b = tx.execute("INSERT INTO rooms (number) VALUES ('502')", &[]).await?;
                    Ok(a.affected_rows + b.affected_rows)
                })
            })
            .await
            .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(room_count(&client).await, 2);
    }

    #[tokio::test]
    async fn paginate_reports_totals() {
        let client = sqlite_client().await;
        for i in 0..7 {
            client
                .execute("INSERT INTO rooms (number, floor) VALUES (?, 6)", &[json!(format!("6{i:02}"))])
                .await
                .unwrap();
        }

        let page = client
            .paginate(
                "SELECT number FROM rooms WHERE floor = ? ORDER BY number",
                &[json!(6)],
                Pagination::new(Some(2), Some(3)),
            )
            .await
            .unwrap();

        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0]["number"], json!("603"));
    }

    #[tokio::test]
    async fn unreachable_database_fails_with_connection_error_and_retries() {
        let mut config = RelationalConfig::for_url("sqlite:///nonexistent-dir/innkeep/hotel.db?mode=ro");
        config.connect_timeout = std::time::Duration::from_millis(500);
        let client = RelationalClient::new(config);

        let err = client.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, RelationalError::Connection(_)), "{err:?}");
        assert!(!client.is_connected());
        assert!(client.state().last_error.is_some());

        // Every call retries the connect rather than caching the failure.
        let again = client.query("SELECT 1", &[]).await.unwrap_err();
        assert!(again.is_connection());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_next_call_reconnects() {
        let client = RelationalClient::new(RelationalConfig::for_url("sqlite::memory:"));
        client.connect().await.unwrap();
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());

        client.query("SELECT 1", &[]).await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connects_open_a_single_pool() {
        let client = Arc::new(RelationalClient::new(RelationalConfig::for_url("sqlite::memory:")));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.connect().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(client.opened.load(Ordering::SeqCst), 1);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn successful_call_restores_connected_state() {
        let client = RelationalClient::new(RelationalConfig::for_url("sqlite::memory:"));
        client.connect().await.unwrap();

        // A stale failure report while the cached pool is still healthy.
        client.state.set_failed("transient io error");
        assert!(!client.is_connected());

        client.query("SELECT 1", &[]).await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_failure_on_replaced_pool_keeps_the_new_one() {
        let client = RelationalClient::new(RelationalConfig::for_url("sqlite::memory:"));
        let old = client.ensure_connected().await.unwrap();
        client.disconnect().await;
        let fresh = client.ensure_connected().await.unwrap();
        assert_ne!(old.generation, fresh.generation);

        let err = client
            .observe::<()>("query", &old, Err(sqlx::Error::PoolClosed))
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert!(client.is_connected());
        assert!(!fresh.pool.is_closed());
    }

    #[tokio::test]
    async fn connection_failure_closes_the_cached_pool() {
        let client = RelationalClient::new(RelationalConfig::for_url("sqlite::memory:"));
        let live = client.ensure_connected().await.unwrap();

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let _ = client.observe::<()>("query", &live, Err(sqlx::Error::Io(io))).await;

        assert!(live.pool.is_closed());
        assert!(!client.is_connected());
        client.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(client.opened.load(Ordering::SeqCst), 2);
    }

    /// Needs a MySQL server: `TEST_MYSQL_URL=mysql://root:pw@localhost:3306/hotel`.
    #[tokio::test]
    #[ignore]
    async fn mysql_maps_decimal_temporal_and_flag_columns() {
        let url = std::env::var("TEST_MYSQL_URL").expect("TEST_MYSQL_URL not set");
        let client = RelationalClient::new(RelationalConfig::for_url(url));

        client.execute("DROP TEMPORARY TABLE IF EXISTS rates", &[]).await.unwrap();
        client
            .execute(
                "CREATE TEMPORARY TABLE rates (
                    id INT AUTO_INCREMENT PRIMARY KEY,
                    amount DECIMAL(10,2) NOT NULL,
                    check_in DATE NOT NULL,
                    booked_at DATETIME NOT NULL,
                    active TINYINT(1) NOT NULL,
                    extras JSON NULL
                )",
                &[],
            )
            .await
            .unwrap();
        let done = client
            .execute(
                "INSERT INTO rates (amount, check_in, booked_at, active, extras) VALUES (?, ?, ?, ?, ?)",
                &[
                    json!("129.90"),
                    json!("2026-03-01"),
                    json!("2026-02-14 09:30:00"),
                    json!(true),
                    json!({ "breakfast": true }).to_string().into(),
                ],
            )
            .await
            .unwrap();
        assert_eq!(done.affected_rows, 1);
        assert!(done.last_insert_id.is_some());

        let row = client
            .fetch_one("SELECT amount, check_in, booked_at, active, extras FROM rates", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["amount"], json!("129.90"));
        assert_eq!(row["check_in"], json!("2026-03-01"));
        assert_eq!(row["booked_at"], json!("2026-02-14 09:30:00"));
        assert_eq!(row["active"], json!(true));
        assert_eq!(row["extras"], json!({ "breakfast": true }));
    }
}
