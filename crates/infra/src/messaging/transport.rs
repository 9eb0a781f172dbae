//! Broker transport seam.
//!
//! The bridge owns configuration, subscriptions and dispatch; a transport only
//! moves bytes. [`super::mqtt::MqttTransport`] talks to a real broker,
//! [`super::loopback::LoopbackBroker`] keeps everything in-process.

use std::sync::Arc;

use async_trait::async_trait;
use innkeep_core::StateCell;
use rumqttc::QoS;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use super::config::MqttSettings;
use super::error::BrokerError;

/// Raw message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;

/// Decoded payload handed to subscription callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Json(JsonValue),
    Text(String),
}

impl MessagePayload {
    /// JSON if the bytes parse as JSON, raw (lossy UTF-8) text otherwise.
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(value) => MessagePayload::Json(value),
            Err(_) => MessagePayload::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            MessagePayload::Json(value) => Some(value),
            MessagePayload::Text(_) => None,
        }
    }
}

/// Everything a transport needs to open one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Fully randomized client id for this session.
    pub client_id: String,
    pub settings: MqttSettings,
}

#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open a session and resolve once the broker acknowledged it.
    ///
    /// The transport reports status changes through `state` for the lifetime
    /// of the session and forwards every received publish to `inbound`.
    async fn connect(
        &self,
        options: SessionOptions,
        state: Arc<StateCell>,
        inbound: InboundSender,
    ) -> Result<Box<dyn BrokerSession>, BrokerError>;
}

#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Resolves once the transport confirmed delivery for the given QoS.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;
}
