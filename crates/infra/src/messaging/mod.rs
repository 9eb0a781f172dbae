//! Publish/subscribe bridge to the device broker.

mod bridge;
mod config;
mod error;
mod loopback;
mod mqtt;
mod topic;
mod transport;

pub use bridge::{DEFAULT_CONFIG_PATH, MessageHandler, MessagingBridge, PublishOptions};
pub use config::{BrokerConfig, DEFAULT_KEY, MqttSettings, qos_from_level};
pub use error::{BrokerError, ConfigError};
pub use loopback::LoopbackBroker;
pub use mqtt::MqttTransport;
pub use rumqttc::QoS;
pub use topic::render_topic;
pub use transport::{BrokerSession, BrokerTransport, InboundMessage, InboundSender, MessagePayload, SessionOptions};
