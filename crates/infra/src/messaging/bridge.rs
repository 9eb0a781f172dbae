use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use arc_swap::ArcSwap;
use innkeep_core::{ConnectionKind, ConnectionState, StateCell};
use rumqttc::QoS;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::config::{BrokerConfig, DEFAULT_KEY};
use super::error::{BrokerError, ConfigError};
use super::mqtt::MqttTransport;
use super::topic::render_topic;
use super::transport::{BrokerSession, BrokerTransport, InboundMessage, MessagePayload, SessionOptions};
use crate::config::env_or;

/// Callback invoked with `(topic, payload)` for every message on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(&str, &MessagePayload) + Send + Sync>;

type Handlers = Arc<RwLock<HashMap<String, Vec<MessageHandler>>>>;

pub const DEFAULT_CONFIG_PATH: &str = "config/mqtt.json";

/// Per-publish overrides; `None` falls back to the config's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: Option<QoS>,
    pub retain: Option<bool>,
}

impl PublishOptions {
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = Some(retain);
        self
    }
}

/// Publish/subscribe bridge to the device broker.
///
/// Holds the current [`BrokerConfig`] snapshot (swappable at runtime via
/// [`MessagingBridge::reload_config`]), at most one live transport session,
/// and the topic → callback registry that survives reconnects.
pub struct MessagingBridge {
    source: Option<PathBuf>,
    config: ArcSwap<BrokerConfig>,
    transport: Arc<dyn BrokerTransport>,
    session: AsyncMutex<Option<Arc<dyn BrokerSession>>>,
    handlers: Handlers,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    client_id: Mutex<Option<String>>,
    state: Arc<StateCell>,
}

impl MessagingBridge {
    pub fn new(config: BrokerConfig, transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            source: None,
            config: ArcSwap::from_pointee(config),
            transport,
            session: AsyncMutex::new(None),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            dispatcher: Mutex::new(None),
            client_id: Mutex::new(None),
            state: Arc::new(StateCell::new(ConnectionKind::Broker)),
        }
    }

    /// Load the config resource at `path`; later reloads re-read the same path.
    pub fn from_path(
        path: impl AsRef<Path>,
        transport: Arc<dyn BrokerTransport>,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = BrokerConfig::load(path)?;
        let mut bridge = Self::new(config, transport);
        bridge.source = Some(path.to_path_buf());
        Ok(bridge)
    }

    /// `MQTT_CONFIG_PATH` (default `config/mqtt.json`) over the MQTT transport.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env_or("MQTT_CONFIG_PATH", DEFAULT_CONFIG_PATH);
        Self::from_path(path, Arc::new(MqttTransport::new()))
    }

    pub fn state(&self) -> ConnectionState {
        self.state.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Client id of the most recent session attempt.
    pub fn client_id(&self) -> Option<String> {
        lock(&self.client_id).clone()
    }

    /// Open a session with a freshly randomized client id.
    ///
    /// A no-op while a session is live. Topics registered through
    /// [`MessagingBridge::subscribe_to_topic`] are subscribed on the new session.
    #[instrument(skip(self), err)]
    pub async fn connect(&self) -> Result<(), BrokerError> {
        let mut session = self.session.lock().await;
        if session.is_some() && self.state.is_connected() {
            return Ok(());
        }
        if let Some(stale) = session.take() {
            let _ = stale.disconnect().await;
        }
        self.stop_dispatcher();

        let config = self.config.load_full();
        let client_id = session_client_id(&config.mqtt.client_id);
        *lock(&self.client_id) = Some(client_id.clone());

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let opened: Arc<dyn BrokerSession> = Arc::from(
            self.transport
                .connect(
                    SessionOptions {
                        client_id: client_id.clone(),
                        settings: config.mqtt.clone(),
                    },
                    self.state.clone(),
                    inbound_tx,
                )
                .await?,
        );

        *lock(&self.dispatcher) = Some(tokio::spawn(dispatch(inbound_rx, self.handlers.clone())));

        let topics: Vec<String> = read(&self.handlers).keys().cloned().collect();
        let qos = config.qos_for(DEFAULT_KEY);
        for topic in topics {
            if let Err(err) = opened.subscribe(&topic, qos).await {
                warn!(%topic, error = %err, "subscribe on new session failed");
            }
        }

        *session = Some(opened);
        info!(%client_id, host = %config.mqtt.host, port = config.mqtt.port, "broker connected");
        Ok(())
    }

    /// Publish `message` to `topic`.
    ///
    /// Strings are sent verbatim, every other value as compact JSON. Resolves
    /// once the transport confirmed delivery for the effective QoS.
    #[instrument(skip(self, message), err)]
    pub async fn publish(
        &self,
        topic: &str,
        message: &JsonValue,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        let session = self.live_session().await.ok_or(BrokerError::NotConnected)?;
        let config = self.config.load_full();
        let qos = options.qos.unwrap_or_else(|| config.qos_for(DEFAULT_KEY));
        let retain = options.retain.unwrap_or_else(|| config.retain_for(DEFAULT_KEY));

        session.publish(topic, encode_payload(message)?, qos, retain).await
    }

    /// Render the `name` template and publish with that template's qos/retain.
    ///
    /// Returns the rendered topic.
    pub async fn publish_to(
        &self,
        name: &str,
        placeholders: &[(&str, &str)],
        message: &JsonValue,
    ) -> Result<String, BrokerError> {
        let topic = self.topic(name, placeholders)?;
        let config = self.config.load_full();
        let options = PublishOptions::default()
            .with_qos(config.qos_for(name))
            .with_retain(config.retain_for(name));
        self.publish(&topic, message, options).await?;
        Ok(topic)
    }

    /// Register `on_message` for messages on exactly `topic`.
    ///
    /// Registrations persist across reconnects. When a session is live the
    /// broker subscription is made immediately, otherwise on the next connect.
    #[instrument(skip(self, on_message), err)]
    pub async fn subscribe_to_topic<F>(&self, topic: &str, on_message: F) -> Result<(), BrokerError>
    where
        F: Fn(&str, &MessagePayload) + Send + Sync + 'static,
    {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(BrokerError::Topic(format!(
                "subscriptions must name one exact topic, got '{topic}'"
            )));
        }

        let first = {
            let mut handlers = self
                .handlers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let entry = handlers.entry(topic.to_string()).or_default();
            entry.push(Arc::new(on_message));
            entry.len() == 1
        };

        if first {
            if let Some(session) = self.live_session().await {
                let qos = self.config.load().qos_for(DEFAULT_KEY);
                session.subscribe(topic, qos).await?;
            }
        }
        Ok(())
    }

    /// Re-read the config resource.
    ///
    /// On failure the error is logged, the previous snapshot stays active and
    /// `false` is returned. The live session is never touched; connection
    /// settings take effect on the next connect.
    pub fn reload_config(&self) -> bool {
        match self.try_reload_config() {
            Ok(config) => {
                info!(topics = config.topics.len(), "broker config reloaded");
                true
            }
            Err(err) => {
                error!(error = %err, "broker config reload failed; keeping previous config");
                false
            }
        }
    }

    pub fn try_reload_config(&self) -> Result<Arc<BrokerConfig>, ConfigError> {
        let path = self.source.as_deref().ok_or(ConfigError::NoSource)?;
        let config = Arc::new(BrokerConfig::load(path)?);
        self.config.store(config.clone());
        Ok(config)
    }

    pub fn get_config(&self) -> Arc<BrokerConfig> {
        self.config.load_full()
    }

    /// Render the topic template called `name`.
    pub fn topic(&self, name: &str, placeholders: &[(&str, &str)]) -> Result<String, BrokerError> {
        let config = self.config.load();
        let template = config
            .topics
            .get(name)
            .ok_or_else(|| BrokerError::UnknownTopic(name.to_string()))?;
        render_topic(template, placeholders)
    }

    /// Close the live session, if any. Safe to call repeatedly.
    #[instrument(skip(self), err)]
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        let session = self.session.lock().await.take();
        let result = match session {
            Some(session) => {
                let result = session.disconnect().await;
                info!("broker disconnected");
                result
            }
            None => Ok(()),
        };
        self.stop_dispatcher();
        self.state.set_disconnected();
        result
    }

    async fn live_session(&self) -> Option<Arc<dyn BrokerSession>> {
        let session = self.session.lock().await.clone()?;
        self.state.is_connected().then_some(session)
    }

    fn stop_dispatcher(&self) {
        if let Some(task) = lock(&self.dispatcher).take() {
            task.abort();
        }
    }
}

impl Drop for MessagingBridge {
    fn drop(&mut self) {
        self.stop_dispatcher();
    }
}

async fn dispatch(mut inbound: mpsc::UnboundedReceiver<InboundMessage>, handlers: Handlers) {
    while let Some(message) = inbound.recv().await {
        let callbacks = read(&handlers)
            .get(&message.topic)
            .cloned()
            .unwrap_or_default();
        if callbacks.is_empty() {
            continue;
        }
        let payload = MessagePayload::decode(&message.payload);
        for callback in callbacks {
            callback(&message.topic, &payload);
        }
    }
}

fn encode_payload(message: &JsonValue) -> Result<Vec<u8>, BrokerError> {
    match message {
        JsonValue::String(text) => Ok(text.clone().into_bytes()),
        other => serde_json::to_vec(other).map_err(|e| BrokerError::Serialize(e.to_string())),
    }
}

fn session_client_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &suffix[..8])
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(rwlock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}
