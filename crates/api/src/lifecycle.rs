//! Process lifecycle: client construction, startup connects, shutdown.
//!
//! The relational store is mandatory and connected before serving. The
//! document store and the broker are connected in the background; their
//! failures are logged and never stop the process.

use std::sync::Arc;

use innkeep_infra::document::{DocumentClient, DocumentConfig};
use innkeep_infra::messaging::{
    BrokerConfig, BrokerTransport, DEFAULT_CONFIG_PATH, LoopbackBroker, MessagingBridge,
    MqttTransport,
};
use innkeep_infra::relational::{RelationalClient, RelationalConfig};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The three shared clients, constructed once and injected everywhere.
pub struct Clients {
    pub relational: Arc<RelationalClient>,
    pub document: Arc<DocumentClient>,
    pub broker: Arc<MessagingBridge>,
}

impl Clients {
    pub fn new(relational: RelationalClient, document: DocumentClient, broker: MessagingBridge) -> Self {
        Self {
            relational: Arc::new(relational),
            document: Arc::new(document),
            broker: Arc::new(broker),
        }
    }

    /// Build every client from `DB_*`, `MONGODB_*`/`USE_MONGODB` and
    /// `MQTT_CONFIG_PATH`/`MQTT_TRANSPORT`.
    pub fn from_env() -> Self {
        Self::new(
            RelationalClient::new(RelationalConfig::from_env()),
            DocumentClient::new(DocumentConfig::from_env()),
            broker_from_env(),
        )
    }
}

fn broker_from_env() -> MessagingBridge {
    let transport: Arc<dyn BrokerTransport> = match std::env::var("MQTT_TRANSPORT").as_deref() {
        Ok("loopback") => {
            warn!("MQTT_TRANSPORT=loopback; device messages stay in-process");
            Arc::new(LoopbackBroker::new())
        }
        _ => Arc::new(MqttTransport::new()),
    };

    let path = std::env::var("MQTT_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    match MessagingBridge::from_path(&path, transport.clone()) {
        Ok(bridge) => bridge,
        Err(err) => {
            warn!(%path, error = %err, "broker config unavailable; using localhost:1883 without topics");
            MessagingBridge::new(BrokerConfig::for_broker("localhost", 1883), transport)
        }
    }
}

/// Connect the relational store, then start background connects for the
/// document store and the broker.
///
/// Returns the background tasks; callers may ignore them.
pub async fn startup(clients: &Clients) -> Vec<JoinHandle<()>> {
    match clients.relational.connect().await {
        Ok(_) => info!("relational store ready"),
        Err(err) => error!(error = %err, "relational store unavailable at startup"),
    }

    let document = clients.document.clone();
    let document_task = tokio::spawn(async move {
        if document.connect().await.is_none() && document.config().enabled {
            warn!("document store not connected; running degraded");
        }
    });

    let broker = clients.broker.clone();
    let broker_task = tokio::spawn(async move {
        if let Err(err) = broker.connect().await {
            warn!(error = %err, "broker not connected; device messaging unavailable");
        }
    });

    vec![document_task, broker_task]
}

/// Resolves on SIGINT or SIGTERM (ctrl-c only on non-unix targets).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Close every client. Each step runs even if an earlier one failed.
pub async fn shutdown(clients: &Clients) {
    info!("closing connections");
    clients.relational.disconnect().await;
    clients.document.close().await;
    if let Err(err) = clients.broker.disconnect().await {
        error!(error = %err, "broker disconnect failed");
    }
}
