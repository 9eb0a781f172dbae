//! In-process broker for development and tests.
//!
//! Every bridge connected to the same [`LoopbackBroker`] shares one topic
//! space. Delivery is exact-topic only, retained messages are replayed on
//! subscribe, and publishes are confirmed as soon as they are fanned out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use innkeep_core::StateCell;
use rumqttc::QoS;

use super::error::BrokerError;
use super::transport::{BrokerSession, BrokerTransport, InboundMessage, InboundSender, SessionOptions};

#[derive(Clone, Default)]
pub struct LoopbackBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

#[derive(Default)]
struct BrokerInner {
    offline: bool,
    next_session: u64,
    sessions: HashMap<u64, LoopSession>,
    retained: HashMap<String, Vec<u8>>,
}

struct LoopSession {
    client_id: String,
    topics: HashSet<String>,
    inbound: InboundSender,
    state: Arc<StateCell>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refuse new sessions (existing ones are unaffected).
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Simulate the broker closing every connection.
    pub fn drop_connections(&self) {
        let sessions: Vec<LoopSession> = self.lock().sessions.drain().map(|(_, s)| s).collect();
        for session in sessions {
            tracing::debug!(client_id = %session.client_id, "loopback dropping session");
            session.state.set_failed("connection closed by broker");
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Client ids of the currently connected sessions.
    pub fn client_ids(&self) -> Vec<String> {
        self.lock()
            .sessions
            .values()
            .map(|s| s.client_id.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerTransport for LoopbackBroker {
    async fn connect(
        &self,
        options: SessionOptions,
        state: Arc<StateCell>,
        inbound: InboundSender,
    ) -> Result<Box<dyn BrokerSession>, BrokerError> {
        state.set_connecting();
        let mut inner = self.lock();
        if inner.offline {
            let message = format!(
                "loopback broker {}:{} is offline",
                options.settings.host, options.settings.port
            );
            state.set_failed(&message);
            return Err(BrokerError::Connection(message));
        }

        let id = inner.next_session;
        inner.next_session += 1;
        inner.sessions.insert(
            id,
            LoopSession {
                client_id: options.client_id,
                topics: HashSet::new(),
                inbound,
                state: state.clone(),
            },
        );
        state.set_connected();

        Ok(Box::new(LoopbackSession {
            broker: self.clone(),
            id,
        }))
    }
}

struct LoopbackSession {
    broker: LoopbackBroker,
    id: u64,
}

#[async_trait]
impl BrokerSession for LoopbackSession {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        let mut inner = self.broker.lock();
        if !inner.sessions.contains_key(&self.id) {
            return Err(BrokerError::NotConnected);
        }

        if retain {
            if payload.is_empty() {
                inner.retained.remove(topic);
            } else {
                inner.retained.insert(topic.to_string(), payload.clone());
            }
        }

        for session in inner.sessions.values() {
            if session.topics.contains(topic) {
                let _ = session.inbound.send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), BrokerError> {
        let mut inner = self.broker.lock();
        let retained = inner.retained.get(topic).cloned();
        let session = inner
            .sessions
            .get_mut(&self.id)
            .ok_or(BrokerError::NotConnected)?;

        if session.topics.insert(topic.to_string()) {
            if let Some(payload) = retained {
                let _ = session.inbound.send(InboundMessage {
                    topic: topic.to_string(),
                    payload,
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if let Some(session) = self.broker.lock().sessions.remove(&self.id) {
            session.state.set_disconnected();
        }
        Ok(())
    }
}
