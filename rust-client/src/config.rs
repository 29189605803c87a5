//! Configuration types and environment variable parsing.
//!
//! The server records and queue settings are plain serde types so they can be
//! embedded in any larger configuration document. `Config::from_env` covers
//! the drain binary.

use std::collections::BTreeMap;
use std::env;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Connection settings for one candidate broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCredentials {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default)]
    pub host: String,

    /// `0` means the scheme default.
    #[serde(default, skip_serializing_if = "is_default_port")]
    pub port: u16,

    /// Virtual host, used verbatim in the URI path (encode `/` as `%2f`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vhost: String,

    /// Extra connection options, rendered as URI query parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
}

impl ServerCredentials {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }
}

fn is_default_port(port: &u16) -> bool {
    *port == 0
}

/// Servers and naming for one logical queue (mail, activation, …).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Candidates, tried in order.
    #[serde(default)]
    pub servers: Vec<ServerCredentials>,

    #[serde(default)]
    pub prefix: String,
}

impl QueueSettings {
    /// Convert an arbitrary JSON configuration fragment.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Drain binary configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub queue: QueueSettings,

    /// Queue used when callers pass an empty name
    pub default_queue: String,

    /// Channel purpose used by the drain loop
    pub purpose: String,

    /// Sleep between polls of an empty queue
    pub poll_interval_ms: u64,

    /// Requeues allowed before a message is discarded
    pub max_requeue: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            queue: QueueSettings {
                servers: parse_servers("QUEUE_SERVERS"),
                prefix: env::var("QUEUE_PREFIX").unwrap_or_default(),
            },

            default_queue: env::var("QUEUE_NAME").unwrap_or_else(|_| "mail".to_string()),

            purpose: env::var("QUEUE_PURPOSE").unwrap_or_else(|_| "drain".to_string()),

            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),

            max_requeue: env::var("MAX_REQUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

fn default_servers() -> Vec<ServerCredentials> {
    vec![ServerCredentials::new("localhost", 5672)]
}

/// Parse a JSON array of server records.
fn parse_servers(name: &str) -> Vec<ServerCredentials> {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default_servers(),
    };

    match serde_json::from_str::<Vec<ServerCredentials>>(&raw) {
        Ok(servers) if !servers.is_empty() => servers,
        Ok(_) => {
            warn!(env_var = name, "Empty server list, using default");
            default_servers()
        }
        Err(e) => {
            warn!(env_var = name, error = %e, "Invalid server list, using default");
            default_servers()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_servers_valid() {
        env::set_var(
            "TEST_SERVERS_VALID",
            r#"[{"host":"mq-1","port":5671,"user":"app"},{"host":"mq-2"}]"#,
        );
        let servers = parse_servers("TEST_SERVERS_VALID");
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].host, "mq-1");
        assert_eq!(servers[0].port, 5671);
        assert_eq!(servers[0].user, "app");
        assert_eq!(servers[1].port, 0);
        env::remove_var("TEST_SERVERS_VALID");
    }

    #[test]
    fn test_parse_servers_invalid_uses_default() {
        env::set_var("TEST_SERVERS_INVALID", "mq-1:5672");
        let servers = parse_servers("TEST_SERVERS_INVALID");
        assert_eq!(servers, default_servers());
        env::remove_var("TEST_SERVERS_INVALID");
    }

    #[test]
    fn test_parse_servers_default() {
        let servers = parse_servers("NONEXISTENT_SERVERS");
        assert_eq!(servers, vec![ServerCredentials::new("localhost", 5672)]);
    }

    #[test]
    fn test_queue_settings_from_value() {
        let settings = QueueSettings::from_value(json!({
            "prefix": "vault",
            "servers": [{"host": "mq", "vhost": "%2f", "options": {"heartbeat": 30}}]
        }))
        .unwrap();

        assert_eq!(settings.prefix, "vault");
        assert_eq!(settings.servers[0].vhost, "%2f");
        assert_eq!(settings.servers[0].options["heartbeat"], json!(30));
    }

    #[test]
    fn test_credentials_builder() {
        let server = ServerCredentials::new("mq", 5672)
            .with_auth("app", "secret")
            .with_vhost("jobs")
            .with_option("heartbeat", 10);

        assert_eq!(server.user, "app");
        assert_eq!(server.vhost, "jobs");
        assert_eq!(server.options.len(), 1);
    }
}
