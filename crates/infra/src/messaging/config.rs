//! Broker config resource (`mqtt.*`, `topics.*`, `qos.*`, `retain.*`).
//!
//! ```json
//! {
//!   "mqtt": { "host": "broker.local", "port": 1883, "clientId": "innkeep" },
//!   "topics": { "device_command": "hotel/{site_id}/device/{device_id}/command" },
//!   "qos": { "default": 1, "device_command": 1 },
//!   "retain": { "default": false }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Key used in `qos`/`retain` for the fallback value.
pub const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Prefix; a random suffix is appended on every connect.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_true")]
    pub clean: bool,
    /// Milliseconds between transport reconnect attempts; 0 disables them.
    #[serde(default = "default_reconnect_period")]
    pub reconnect_period: u64,
    /// Milliseconds to wait for the broker's connect acknowledgement.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "innkeep".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reconnect_period() -> u64 {
    5_000
}

fn default_connect_timeout() -> u64 {
    30_000
}

impl MqttSettings {
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }
}

/// Immutable broker configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub topics: BTreeMap<String, String>,
    #[serde(default)]
    pub qos: BTreeMap<String, u8>,
    #[serde(default)]
    pub retain: BTreeMap<String, bool>,
}

impl BrokerConfig {
    /// Read and validate the resource at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: BrokerConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal config pointing at `host:port` with no templates.
    pub fn for_broker(host: impl Into<String>, port: u16) -> Self {
        Self {
            mqtt: MqttSettings {
                host: host.into(),
                port,
                username: None,
                password: None,
                client_id: default_client_id(),
                clean: true,
                reconnect_period: default_reconnect_period(),
                connect_timeout: default_connect_timeout(),
                reject_unauthorized: true,
            },
            topics: BTreeMap::new(),
            qos: BTreeMap::new(),
            retain: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host must not be empty".into()));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("mqtt.port must not be 0".into()));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.clientId must not be empty".into()));
        }
        for (name, template) in &self.topics {
            if template.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("topics.{name} must not be empty")));
            }
            if template.contains('+') || template.contains('#') {
                return Err(ConfigError::Invalid(format!(
                    "topics.{name} must not contain wildcards"
                )));
            }
        }
        for (name, level) in &self.qos {
            if *level > 2 {
                return Err(ConfigError::Invalid(format!("qos.{name} must be 0, 1 or 2")));
            }
        }
        Ok(())
    }

    /// QoS for `kind`, else `qos.default`, else at-most-once.
    pub fn qos_for(&self, kind: &str) -> QoS {
        let level = self
            .qos
            .get(kind)
            .or_else(|| self.qos.get(DEFAULT_KEY))
            .copied()
            .unwrap_or(0);
        qos_from_level(level)
    }

    /// Retain flag for `kind`, else `retain.default`, else false.
    pub fn retain_for(&self, kind: &str) -> bool {
        self.retain
            .get(kind)
            .or_else(|| self.retain.get(DEFAULT_KEY))
            .copied()
            .unwrap_or(false)
    }
}

/// Levels above 2 are rejected by `validate`; anything else maps to exactly-once.
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "mqtt": {
            "host": "broker.local",
            "port": 1884,
            "username": "hotel",
            "password": "pw",
            "clientId": "frontdesk",
            "clean": false,
            "reconnectPeriod": 1000,
            "connectTimeout": 4000,
            "rejectUnauthorized": false
        },
        "topics": { "device_command": "hotel/{site_id}/device/{device_id}/command" },
        "qos": { "default": 1, "notification": 0 },
        "retain": { "device_status": true }
    }"#;

    #[test]
    fn parses_camel_case_resource() {
        let cfg = BrokerConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(cfg.mqtt.host, "broker.local");
        assert_eq!(cfg.mqtt.port, 1884);
        assert_eq!(cfg.mqtt.client_id, "frontdesk");
        assert!(!cfg.mqtt.clean);
        assert_eq!(cfg.mqtt.connect_timeout(), Duration::from_secs(4));
        assert!(!cfg.mqtt.reject_unauthorized);
        assert_eq!(
            cfg.topics["device_command"],
            "hotel/{site_id}/device/{device_id}/command"
        );
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg = BrokerConfig::from_json_str(r#"{"mqtt":{"host":"localhost"}}"#).unwrap();
        assert_eq!(cfg.mqtt.port, 1883);
        assert!(cfg.mqtt.clean);
        assert!(cfg.topics.is_empty());
        assert_eq!(cfg.qos_for("anything"), QoS::AtMostOnce);
        assert!(!cfg.retain_for("anything"));
    }

    #[test]
    fn qos_and_retain_fall_back_to_default_key() {
        let cfg = BrokerConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(cfg.qos_for("notification"), QoS::AtMostOnce);
        assert_eq!(cfg.qos_for("device_command"), QoS::AtLeastOnce);
        assert!(cfg.retain_for("device_status"));
        assert!(!cfg.retain_for("device_command"));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            BrokerConfig::from_json_str(r#"{"mqtt":{"host":""}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BrokerConfig::from_json_str(r#"{"mqtt":{"host":"h"},"qos":{"default":3}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BrokerConfig::from_json_str(r#"{"mqtt":{"host":"h"},"topics":{"all":"hotel/#"}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BrokerConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn password_is_never_serialized() {
        let cfg = BrokerConfig::from_json_str(SAMPLE).unwrap();
        let json = serde_json::to_value(&cfg).unwrap();
        assert!(json["mqtt"].get("password").is_none());
    }
}
