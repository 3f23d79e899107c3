//! MQTT connection configuration.

use std::time::Duration;

use irbridge_core::config::{defaults, env_vars};
use serde::{Deserialize, Serialize};

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum Qos {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    pub broker: String,

    /// Broker port (1883 plain, 8883 TLS).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client ID; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Use TLS with the platform's root certificates.
    #[serde(default)]
    pub tls: bool,

    /// QoS for the telemetry and ack subscriptions.
    #[serde(default)]
    pub subscribe_qos: Qos,

    /// QoS for command publishes.
    #[serde(default = "default_publish_qos")]
    pub publish_qos: Qos,

    /// Pause after a connection error before polling again, in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
}

fn default_port() -> u16 {
    defaults::MQTT_PORT
}

fn default_keep_alive() -> u64 {
    defaults::MQTT_KEEP_ALIVE_SECS
}

fn default_clean_session() -> bool {
    true
}

fn default_publish_qos() -> Qos {
    Qos::AtLeastOnce
}

fn default_reconnect_interval() -> u64 {
    5000
}

impl MqttConfig {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            clean_session: default_clean_session(),
            tls: false,
            subscribe_qos: Qos::default(),
            publish_qos: default_publish_qos(),
            reconnect_interval_ms: default_reconnect_interval(),
        }
    }

    /// Build from the `IRBRIDGE_MQTT_*` environment.
    pub fn from_env() -> Self {
        let mut config = Self::new(env_vars::mqtt_host()).with_tls(env_vars::mqtt_tls());
        config.port = env_vars::mqtt_port();
        config.username = env_vars::mqtt_username();
        config.password = env_vars::mqtt_password();
        config.client_id = env_vars::mqtt_client_id();
        config
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Enable TLS; moves the default plain port to the TLS port.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        if tls && self.port == defaults::MQTT_PORT {
            self.port = defaults::MQTT_TLS_PORT;
        }
        self
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// rumqttc options for this configuration.
    pub fn to_options(&self) -> rumqttc::MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("irbridge_{}", uuid::Uuid::new_v4().simple()));

        let mut opts = rumqttc::MqttOptions::new(client_id, &self.broker, self.port);
        opts.set_keep_alive(Duration::from_secs(self.keep_alive.max(5)));
        opts.set_clean_session(self.clean_session);
        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            opts.set_credentials(u, p);
        }
        if self.tls {
            opts.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        opts
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self::new(defaults::MQTT_HOST)
    }
}
