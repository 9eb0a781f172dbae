//! MQTT transport over `rumqttc`.
//!
//! One event-loop task per session drives the socket. It reports connection
//! status into the shared [`StateCell`], forwards incoming publishes, matches
//! PubAck/PubComp packets to waiting publishers, and resubscribes every known
//! topic after the transport reconnects on its own.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use innkeep_core::StateCell;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::error::BrokerError;
use super::transport::{BrokerSession, BrokerTransport, InboundMessage, InboundSender, SessionOptions};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;
const TLS_PORT: u16 = 8883;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type Confirm = oneshot::Sender<Result<(), BrokerError>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    #[instrument(skip_all, fields(client_id = %options.client_id, host = %options.settings.host, port = options.settings.port), err)]
    async fn connect(
        &self,
        options: SessionOptions,
        state: Arc<StateCell>,
        inbound: InboundSender,
    ) -> Result<Box<dyn BrokerSession>, BrokerError> {
        let settings = options.settings;
        state.set_connecting();

        let mut mqtt = MqttOptions::new(options.client_id, settings.host.clone(), settings.port);
        mqtt.set_keep_alive(KEEP_ALIVE);
        mqtt.set_clean_session(settings.clean);
        if let Some(username) = &settings.username {
            mqtt.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
        }
        if settings.port == TLS_PORT {
            if !settings.reject_unauthorized {
                warn!("certificate verification cannot be disabled for the mqtt transport");
            }
            mqtt.set_transport(Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);
        let shared = Arc::new(Shared {
            client,
            state: state.clone(),
            inbound,
            acks: Mutex::new(PendingAcks::default()),
            topics: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(drive(
            eventloop,
            shared.clone(),
            ready_tx,
            settings.reconnect_period(),
        ));

        let failure = match tokio::time::timeout(settings.connect_timeout(), ready_rx).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(err))) => Some(err),
            Ok(Err(_)) => Some(BrokerError::Connection(
                "event loop stopped before the broker answered".into(),
            )),
            Err(_) => Some(BrokerError::Connection(format!(
                "no connect acknowledgement within {:?}",
                settings.connect_timeout()
            ))),
        };
        if let Some(err) = failure {
            task.abort();
            state.set_failed(err.to_string());
            return Err(err);
        }

        Ok(Box::new(MqttSession {
            shared,
            publish_order: AsyncMutex::new(()),
            task: Mutex::new(Some(task)),
        }))
    }
}

struct Shared {
    client: AsyncClient,
    state: Arc<StateCell>,
    inbound: InboundSender,
    acks: Mutex<PendingAcks>,
    topics: Mutex<Vec<(String, QoS)>>,
    closing: AtomicBool,
}

impl Shared {
    fn acks(&self) -> MutexGuard<'_, PendingAcks> {
        self.acks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn topics(&self) -> MutexGuard<'_, Vec<(String, QoS)>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resubscribe(&self) {
        for (topic, qos) in self.topics().iter() {
            if let Err(err) = self.client.try_subscribe(topic.clone(), *qos) {
                warn!(%topic, error = %err, "resubscribe after reconnect failed");
            }
        }
    }
}

/// Publishers waiting for the transport to confirm their message.
///
/// Publish requests leave the client in the order they were queued, so the
/// n-th outgoing publish belongs to the n-th queued waiter. QoS 0 completes on
/// hand-off; QoS 1/2 move to `inflight` until PubAck/PubComp for their pkid.
///
/// Waiters survive a dropped connection: the event loop replays unacknowledged
/// publishes with their original pkid and re-sends queued requests after it
/// reconnects. An outgoing pkid that is already in flight is such a replay and
/// never consumes a queued waiter.
#[derive(Default)]
struct PendingAcks {
    queued: VecDeque<(QoS, Confirm)>,
    inflight: HashMap<u16, Confirm>,
}

impl PendingAcks {
    fn sent(&mut self, pkid: u16) {
        if pkid != 0 && self.inflight.contains_key(&pkid) {
            return;
        }
        let Some((qos, confirm)) = self.queued.pop_front() else {
            return;
        };
        if qos == QoS::AtMostOnce {
            let _ = confirm.send(Ok(()));
        } else {
            self.inflight.insert(pkid, confirm);
        }
    }

    fn acknowledged(&mut self, pkid: u16) {
        if let Some(confirm) = self.inflight.remove(&pkid) {
            let _ = confirm.send(Ok(()));
        }
    }

    fn outstanding(&self) -> usize {
        self.queued.len() + self.inflight.len()
    }

    fn fail_all(&mut self, reason: &str) {
        let waiting = self
            .queued
            .drain(..)
            .map(|(_, confirm)| confirm)
            .chain(self.inflight.drain().map(|(_, confirm)| confirm));
        for confirm in waiting {
            let _ = confirm.send(Err(BrokerError::Publish(reason.to_string())));
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    shared: Arc<Shared>,
    ready: oneshot::Sender<Result<(), BrokerError>>,
    reconnect_period: Duration,
) {
    let mut ready = Some(ready);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    let message = format!("broker refused connection: {:?}", ack.code);
                    shared.state.set_failed(&message);
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Err(BrokerError::Connection(message)));
                        return;
                    }
                    continue;
                }
                shared.state.set_connected();
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Ok(()));
                    }
                    None => {
                        info!("broker connection re-established");
                        shared.resubscribe();
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = String::from_utf8_lossy(AsRef::<[u8]>::as_ref(&publish.topic)).into_owned();
                let _ = shared.inbound.send(InboundMessage {
                    topic,
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => shared.acks().acknowledged(ack.pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => shared.acks().acknowledged(comp.pkid),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => shared.acks().sent(pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                shared.acks().fail_all("session disconnected");
                shared.state.set_disconnected();
                return;
            }
            Ok(_) => {}
            Err(err) => {
                let message = err.to_string();
                if shared.closing.load(Ordering::SeqCst) {
                    shared.acks().fail_all("session disconnected");
                    shared.state.set_disconnected();
                    return;
                }
                shared.state.set_failed(&message);
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(BrokerError::Connection(message)));
                    return;
                }
                if reconnect_period.is_zero() {
                    warn!(error = %message, "broker connection lost; reconnect disabled");
                    shared.acks().fail_all(&message);
                    return;
                }
                let awaiting = shared.acks().outstanding();
                warn!(error = %message, retry_in = ?reconnect_period, awaiting, "broker connection lost; unconfirmed publishes will be replayed");
                tokio::time::sleep(reconnect_period).await;
                shared.state.set_connecting();
            }
        }
    }
}

struct MqttSession {
    shared: Arc<Shared>,
    /// Keeps waiter order identical to request order.
    publish_order: AsyncMutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        let (confirm, confirmed) = oneshot::channel();
        {
            let _order = self.publish_order.lock().await;
            self.shared.acks().queued.push_back((qos, confirm));
            if let Err(err) = self.shared.client.publish(topic, qos, retain, payload).await {
                self.shared.acks().queued.pop_back();
                return Err(BrokerError::Publish(err.to_string()));
            }
        }

        confirmed
            .await
            .unwrap_or_else(|_| Err(BrokerError::Publish("session closed before confirmation".into())))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        self.shared
            .client
            .subscribe(topic, qos)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let mut topics = self.shared.topics();
        if !topics.iter().any(|(known, _)| known == topic) {
            topics.push((topic.to_string(), qos));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.shared.closing.store(true, Ordering::SeqCst);
        let sent = self.shared.client.disconnect().await;

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut task) = task {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.shared.state.set_disconnected();

        sent.map_err(|e| BrokerError::Connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos0_confirms_on_hand_off() {
        let mut acks = PendingAcks::default();
        let (tx, mut rx) = oneshot::channel();
        acks.queued.push_back((QoS::AtMostOnce, tx));

        acks.sent(0);
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert!(acks.inflight.is_empty());
    }

    #[test]
    fn qos1_waits_for_matching_ack() {
        let mut acks = PendingAcks::default();
        let (first_tx, mut first) = oneshot::channel();
        let (second_tx, mut second) = oneshot::channel();
        acks.queued.push_back((QoS::AtLeastOnce, first_tx));
        acks.queued.push_back((QoS::AtLeastOnce, second_tx));

        acks.sent(7);
        acks.sent(8);
        assert!(first.try_recv().is_err());

        // Acks may arrive out of issue order.
        acks.acknowledged(8);
        assert!(matches!(second.try_recv(), Ok(Ok(()))));
        assert!(first.try_recv().is_err());
        acks.acknowledged(7);
        assert!(matches!(first.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn replayed_publish_does_not_confirm_a_newer_one() {
        let mut acks = PendingAcks::default();
        let (a_tx, mut a) = oneshot::channel();
        let (b_tx, mut b) = oneshot::channel();
        acks.queued.push_back((QoS::AtLeastOnce, a_tx));
        acks.sent(5);

        // Connection drops; B is queued while the loop reconnects.
        acks.queued.push_back((QoS::AtMostOnce, b_tx));
        assert_eq!(acks.outstanding(), 2);

        // The loop replays A with its original pkid first.
        acks.sent(5);
        assert!(b.try_recv().is_err());
        assert!(a.try_recv().is_err());

        // B's own hand-off confirms B.
        acks.sent(0);
        assert!(matches!(b.try_recv(), Ok(Ok(()))));

        acks.acknowledged(5);
        assert!(matches!(a.try_recv(), Ok(Ok(()))));
        assert_eq!(acks.outstanding(), 0);
    }

    #[test]
    fn replay_keeps_queued_waiters_in_order() {
        let mut acks = PendingAcks::default();
        let (a_tx, mut a) = oneshot::channel();
        let (b_tx, mut b) = oneshot::channel();
        let (c_tx, mut c) = oneshot::channel();
        acks.queued.push_back((QoS::AtLeastOnce, a_tx));
        acks.sent(1);
        acks.queued.push_back((QoS::AtLeastOnce, b_tx));
        acks.queued.push_back((QoS::AtLeastOnce, c_tx));

        // Replay of 1, then the two queued requests get fresh pkids.
        acks.sent(1);
        acks.sent(2);
        acks.sent(3);
        acks.acknowledged(3);
        assert!(matches!(c.try_recv(), Ok(Ok(()))));
        assert!(b.try_recv().is_err());
        acks.acknowledged(2);
        acks.acknowledged(1);
        assert!(matches!(b.try_recv(), Ok(Ok(()))));
        assert!(matches!(a.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn session_close_fails_every_waiter() {
        let mut acks = PendingAcks::default();
        let (queued_tx, mut queued) = oneshot::channel();
        let (inflight_tx, mut inflight) = oneshot::channel();
        acks.queued.push_back((QoS::ExactlyOnce, inflight_tx));
        acks.sent(3);
        acks.queued.push_back((QoS::AtLeastOnce, queued_tx));

        acks.fail_all("session disconnected");
        assert!(matches!(queued.try_recv(), Ok(Err(BrokerError::Publish(_)))));
        assert!(matches!(inflight.try_recv(), Ok(Err(BrokerError::Publish(_)))));
    }

    #[test]
    fn stray_outgoing_publish_is_ignored() {
        let mut acks = PendingAcks::default();
        acks.sent(1);
        acks.acknowledged(1);
        assert!(acks.queued.is_empty() && acks.inflight.is_empty());
    }
}
