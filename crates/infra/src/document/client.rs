//! Document store client (logs, analytics).
//!
//! The store is non-critical. No method returns an error: every call yields an
//! `Outcome`, and an unavailable or disabled store shows up as
//! `Outcome::Degraded`. There is no background reconnect loop; while the store
//! is down each call makes one bounded reconnect attempt.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::TryStreamExt;
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection, Database};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::instrument;

use innkeep_core::{ConnectionKind, ConnectionState, ConnectionStatus, Outcome, StateCell};

use super::config::DocumentConfig;

/// Sort/limit/skip for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindParams {
    pub sort: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

/// Counts reported by `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone)]
struct Handle {
    client: Client,
    database: Database,
}

/// Best-effort gateway to the document store.
#[derive(Debug)]
pub struct DocumentClient {
    config: DocumentConfig,
    handle: Mutex<Option<Handle>>,
    /// Finished connect attempts; lets queued callers reuse a fresh result.
    attempts: AtomicU64,
    state: Arc<StateCell>,
}

/// `true` only when the feature flag is on and the connection is up.
pub fn usable(enabled: bool, state: &ConnectionState) -> bool {
    enabled && state.status == ConnectionStatus::Connected
}

impl DocumentClient {
    pub fn new(config: DocumentConfig) -> Self {
        let state = Arc::new(StateCell::new(ConnectionKind::Document));
        if !config.enabled {
            state.set_degraded("document store disabled by configuration");
        }
        Self {
            config,
            handle: Mutex::new(None),
            attempts: AtomicU64::new(0),
            state,
        }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn should_use(&self) -> bool {
        usable(self.config.enabled, &self.state.snapshot())
    }

    /// Connect and verify with a `ping`, bounded by the selection timeout.
    ///
    /// Returns `None` instead of failing; absence of the store must not block
    /// startup. Does nothing when the feature flag is off. Callers that queue
    /// behind an attempt in progress take its result instead of starting their
    /// own, so concurrent callers wait at most one selection timeout.
    #[instrument(skip(self), fields(database = %self.config.database))]
    pub async fn connect(&self) -> Option<Database> {
        if !self.config.enabled {
            tracing::debug!("document store disabled; skipping connect");
            return None;
        }

        let seen = self.attempts.load(Ordering::SeqCst);
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_ref() {
            if self.state.is_connected() {
                return Some(handle.database.clone());
            }
        }
        if self.attempts.load(Ordering::SeqCst) != seen {
            return guard.as_ref().map(|handle| handle.database.clone());
        }

        self.state.set_connecting();
        let opened = self.open().await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match opened {
            Ok(handle) => {
                tracing::info!("document store connected");
                self.state.set_connected();
                let database = handle.database.clone();
                *guard = Some(handle);
                Some(database)
            }
            Err(err) => {
                tracing::warn!(error = %err, "document store unavailable; continuing in degraded mode");
                self.state.set_failed(err.to_string());
                *guard = None;
                None
            }
        }
    }

    /// Shut the connection down. Idempotent.
    pub async fn close(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.client.shutdown().await;
            tracing::info!("document store connection closed");
        }
        if self.config.enabled {
            self.state.set_disconnected();
        }
    }

    /// Collection handle, or `None` when the store should not be used.
    pub async fn get_collection(&self, name: &str) -> Option<Collection<Document>> {
        if !self.should_use() {
            return None;
        }
        let guard = self.handle.lock().await;
        guard
            .as_ref()
            .map(|handle| handle.database.collection::<Document>(name))
    }

    /// Insert one document, stamping `created_at` and `updated_at`.
    ///
    /// Yields the generated id (hex for ObjectIds).
    #[instrument(skip(self, document))]
    pub async fn insert(&self, collection: &str, mut document: Document) -> Outcome<String> {
        let coll = match self.collection(collection).await {
            Ok(coll) => coll,
            Err(degraded) => return degraded,
        };

        let now = bson::DateTime::now();
        document.insert("created_at", now);
        document.insert("updated_at", now);

        self.guarded("insert", async move {
            let inserted = coll.insert_one(document).await?;
            Ok(match inserted.inserted_id {
                Bson::ObjectId(oid) => oid.to_hex(),
                Bson::String(s) => s,
                other => other.to_string(),
            })
        })
        .await
    }

    /// Find documents matching `filter`.
    #[instrument(skip(self, filter, params))]
    pub async fn find(&self, collection: &str, filter: Document, params: FindParams) -> Outcome<Vec<Document>> {
        let coll = match self.collection(collection).await {
            Ok(coll) => coll,
            Err(degraded) => return degraded,
        };

        let mut options = FindOptions::default();
        options.sort = params.sort;
        options.limit = params.limit;
        options.skip = params.skip;

        self.guarded("find", async move {
            let cursor = coll.find(filter).with_options(options).await?;
            cursor.try_collect::<Vec<_>>().await
        })
        .await
    }

    /// Merge `patch` into the first document matching `filter`.
    ///
    /// Partial update via `$set`; `updated_at` is stamped.
    #[instrument(skip(self, filter, patch))]
    pub async fn update(&self, collection: &str, filter: Document, mut patch: Document) -> Outcome<UpdateSummary> {
        let coll = match self.collection(collection).await {
            Ok(coll) => coll,
            Err(degraded) => return degraded,
        };

        patch.insert("updated_at", bson::DateTime::now());

        self.guarded("update", async move {
            let result = coll.update_one(filter, doc! { "$set": patch }).await?;
            Ok(UpdateSummary {
                matched: result.matched_count,
                modified: result.modified_count,
            })
        })
        .await
    }

    /// Delete the first document matching `filter`; yields 0 or 1.
    #[instrument(skip(self, filter))]
    pub async fn delete(&self, collection: &str, filter: Document) -> Outcome<u64> {
        let coll = match self.collection(collection).await {
            Ok(coll) => coll,
            Err(degraded) => return degraded,
        };

        self.guarded("delete", async move {
            let result = coll.delete_one(filter).await?;
            Ok(result.deleted_count)
        })
        .await
    }

    /// Run an aggregation pipeline; stages are passed through verbatim.
    #[instrument(skip(self, pipeline), fields(stages = pipeline.len()))]
    pub async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Outcome<Vec<Document>> {
        let coll = match self.collection(collection).await {
            Ok(coll) => coll,
            Err(degraded) => return degraded,
        };

        self.guarded("aggregate", async move {
            let cursor = coll.aggregate(pipeline).await?;
            cursor.try_collect::<Vec<_>>().await
        })
        .await
    }

    /// The single availability guard used by every data operation.
    ///
    /// Disabled: degraded without touching the network. Disconnected: one lazy
    /// reconnect attempt, degraded if it fails.
    async fn collection<T>(&self, name: &str) -> Result<Collection<Document>, Outcome<T>> {
        if !self.config.enabled {
            return Err(Outcome::degraded("document store disabled"));
        }

        if !self.state.is_connected() {
            self.connect().await;
        }

        match self.get_collection(name).await {
            Some(coll) => Ok(coll),
            None => {
                let reason = self
                    .state
                    .snapshot()
                    .last_error
                    .map(|e| format!("document store unavailable: {e}"))
                    .unwrap_or_else(|| "document store unavailable".to_string());
                Err(Outcome::degraded(reason))
            }
        }
    }

    /// Run one driver call under the socket timeout and classify its failure.
    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Outcome<T>
    where
        F: Future<Output = Result<T, MongoError>>,
    {
        match tokio::time::timeout(self.config.socket_timeout, call).await {
            Ok(Ok(value)) => Outcome::Ok(value),
            Ok(Err(err)) if is_transport_error(&err) => {
                self.mark_lost(operation, err.to_string()).await;
                Outcome::degraded(err.to_string())
            }
            Ok(Err(err)) => {
                tracing::error!(operation, error = %err, "document store operation failed");
                Outcome::failed(err.to_string())
            }
            Err(_) => {
                let reason = format!("{operation} timed out after {:?}", self.config.socket_timeout);
                self.mark_lost(operation, reason.clone()).await;
                Outcome::degraded(reason)
            }
        }
    }

    async fn mark_lost(&self, operation: &str, reason: String) {
        tracing::warn!(operation, error = %reason, "document store connection lost; degrading");
        self.state.set_failed(reason);
        self.handle.lock().await.take();
    }

    async fn open(&self) -> Result<Handle, MongoError> {
        let mut options = ClientOptions::parse(&self.config.url).await?;
        options.server_selection_timeout = Some(self.config.selection_timeout);
        options.connect_timeout = Some(self.config.selection_timeout);
        options.max_pool_size = Some(self.config.pool_size);
        options.app_name = Some("innkeep".to_string());

        let client = Client::with_options(options)?;
        let database = client.database(&self.config.database);
        database.run_command(doc! { "ping": 1 }).await?;

        Ok(Handle { client, database })
    }

    #[cfg(test)]
    pub(crate) fn state_cell(&self) -> &StateCell {
        &self.state
    }
}

fn is_transport_error(err: &MongoError) -> bool {
    matches!(
        *err.kind,
        ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn unreachable_config() -> DocumentConfig {
        DocumentConfig {
            selection_timeout: Duration::from_millis(300),
            ..DocumentConfig::enabled("mongodb://127.0.0.1:1/?directConnection=true", "hotel_logs")
        }
    }

    #[test]
    fn should_use_requires_flag_and_connection() {
        let mut state = ConnectionState::new(ConnectionKind::Document);
        for (enabled, status, expected) in [
            (false, ConnectionStatus::Disconnected, false),
            (false, ConnectionStatus::Connected, false),
            (true, ConnectionStatus::Disconnected, false),
            (true, ConnectionStatus::Connected, true),
        ] {
            state.status = status;
            assert_eq!(usable(enabled, &state), expected, "enabled={enabled} status={status:?}");
        }
    }

    #[test]
    fn client_should_use_tracks_state_cell() {
        let disabled = DocumentClient::new(DocumentConfig::default());
        disabled.state_cell().set_connected();
        assert!(!disabled.should_use());

        let enabled = DocumentClient::new(unreachable_config());
        assert!(!enabled.should_use());
        enabled.state_cell().set_connected();
        assert!(enabled.should_use());
        enabled.state_cell().set_failed("socket closed");
        assert!(!enabled.should_use());
    }

    #[tokio::test]
    async fn disabled_store_degrades_without_network() {
        let client = DocumentClient::new(DocumentConfig::default());
        assert_eq!(client.state().status, ConnectionStatus::Degraded);
        assert!(client.connect().await.is_none());

        let inserted = client.insert("device_logs", doc! { "device_id": "d-1" }).await;
        assert!(inserted.is_degraded());

        let found = client
            .find("device_logs", doc! {}, FindParams::default())
            .await
            .into_listing_result();
        assert!(!found.success);
        assert!(found.degraded);
        assert_eq!(found.data, Some(vec![]));

        assert!(client.update("device_logs", doc! {}, doc! { "x": 1 }).await.is_degraded());
        assert!(client.delete("device_logs", doc! {}).await.is_degraded());
        assert!(client.aggregate("device_logs", vec![]).await.is_degraded());
        assert!(client.get_collection("device_logs").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_store_degrades_within_selection_timeout() {
        let client = DocumentClient::new(unreachable_config());

        assert!(client.connect().await.is_none());
        assert!(!client.should_use());
        assert!(!client.is_connected());
        assert!(client.state().last_error.is_some());

        let found = tokio::time::timeout(
            Duration::from_secs(5),
            client.find("device_logs", doc! {}, FindParams::default()),
        )
        .await
        .expect("find must not hang on an unreachable store");

        let result = found.into_listing_result();
        assert!(!result.success);
        assert!(result.degraded);
        assert_eq!(result.data, Some(vec![]));
        assert!(result.error_message.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_connect_attempt() {
        let client = Arc::new(DocumentClient::new(unreachable_config()));
        let started = std::time::Instant::now();

        let calls: Vec<_> = (0..6)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        client.connect().await.is_none()
                    } else {
                        client
                            .find("device_logs", doc! {}, FindParams::default())
                            .await
                            .is_degraded()
                    }
                })
            })
            .collect();
        for call in calls {
            assert!(call.await.unwrap());
        }

        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(1200), "took {elapsed:?}");
        assert_eq!(client.attempts.load(Ordering::SeqCst), 1);

        // Once the attempt is over, the next call retries.
        assert!(client.connect().await.is_none());
        assert_eq!(client.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = DocumentClient::new(unreachable_config());
        client.close().await;
        client.close().await;
        assert_eq!(client.state().status, ConnectionStatus::Disconnected);
    }

    /// Needs a live server: `TEST_MONGODB_URL=mongodb://localhost:27017 cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn insert_then_find_round_trips_against_live_store() {
        let url = std::env::var("TEST_MONGODB_URL").unwrap_or_else(|_| "mongodb://localhost:27017".into());
        let client = DocumentClient::new(DocumentConfig::enabled(url, "innkeep_test"));
        assert!(client.connect().await.is_some());
        assert!(client.should_use());

        let collection = format!("device_logs_{}", uuid::Uuid::new_v4().simple());
        let original = doc! { "device_id": "thermostat-12", "level": "info", "message": "boot" };

        let id = client.insert(&collection, original.clone()).await.ok().unwrap();
        let oid = bson::oid::ObjectId::parse_str(&id).unwrap();

        let found = client
            .find(&collection, doc! { "_id": oid }, FindParams::default())
            .await
            .items();
        assert_eq!(found.len(), 1);
        let stored = &found[0];
        for (key, value) in &original {
            assert_eq!(stored.get(key), Some(value));
        }
        assert!(stored.get_datetime("created_at").is_ok());
        assert!(stored.get_datetime("updated_at").is_ok());

        // Second matching document: update/delete touch only the first match.
        client.insert(&collection, original.clone()).await;
        let summary = client
            .update(&collection, doc! { "device_id": "thermostat-12" }, doc! { "level": "warn" })
            .await
            .ok()
            .unwrap();
        assert_eq!(summary.matched, 1);

        let deleted = client.delete(&collection, doc! { "device_id": "thermostat-12" }).await;
        assert_eq!(deleted, Outcome::Ok(1));

        let counted = client
            .aggregate(&collection, vec![doc! { "$count": "n" }])
            .await
            .items();
        assert_eq!(counted[0].get_i32("n").unwrap(), 1);

        if let Some(coll) = client.get_collection(&collection).await {
            let _ = coll.drop().await;
        }
        client.close().await;
    }
}
