use crate::discovery::ServiceRecord;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

fn default_dial_timeout() -> u64 {
    3
}

fn default_rw_timeout() -> u64 {
    3
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

/// Per-app configuration, loaded from a JSON file. Each deployed service
/// (gateway, user, connector) ships its own file; the `etcd.register`
/// section describes that service's own registration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app_name: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default)]
    pub http_port: u16,
    #[serde(default)]
    pub grpc_addr: String,
    #[serde(default)]
    pub database_url: String,
    #[serde(default)]
    pub connector: ConnectorConf,
    pub etcd: EtcdConf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorConf {
    /// Address handed to game clients by the gateway.
    #[serde(default)]
    pub client_host: String,
    #[serde(default)]
    pub client_port: u16,
    /// Websocket listen address of the connector itself.
    #[serde(default)]
    pub ws_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtcdConf {
    pub addrs: Vec<String>,
    /// Connection timeout in seconds, also bounds individual write calls.
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout: u64,
    /// Read timeout in seconds for prefix scans.
    #[serde(default = "default_rw_timeout")]
    pub rw_timeout: u64,
    #[serde(default)]
    pub register: RegisterConf,
}

/// The registration this process publishes about itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterConf {
    pub name: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub weight: i32,
    pub ttl: i64,
}

impl RegisterConf {
    pub fn to_record(&self) -> ServiceRecord {
        ServiceRecord {
            name: self.name.clone(),
            addr: self.addr.clone(),
            version: self.version.clone(),
            weight: self.weight,
            ttl: self.ttl,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let conf = serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path))?;
        Ok(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etcd_conf_defaults() {
        let conf: EtcdConf = serde_json::from_str(
            r#"{ "addrs": ["http://localhost:2379"], "register": { "name": "user", "ttl": 10 } }"#,
        )
        .unwrap();
        assert_eq!(conf.dial_timeout, 3);
        assert_eq!(conf.rw_timeout, 3);
        assert_eq!(conf.register.name, "user");
        assert_eq!(conf.register.weight, 0);
        assert!(conf.register.version.is_empty());
    }

    #[test]
    fn register_conf_builds_record() {
        let conf = RegisterConf {
            name: "user".to_string(),
            addr: "10.0.0.1:9000".to_string(),
            version: "v2".to_string(),
            weight: 10,
            ttl: 10,
        };
        let record = conf.to_record();
        assert_eq!(record.register_key(), "/user/v2/10.0.0.1:9000");
        assert_eq!(record.weight, 10);
    }

    #[test]
    fn full_config_parses() {
        let conf: Config = serde_json::from_str(
            r#"{
                "app_name": "gateway",
                "http_port": 8080,
                "connector": { "client_host": "127.0.0.1", "client_port": 9101 },
                "etcd": {
                    "addrs": ["http://localhost:2379"],
                    "dial_timeout": 5,
                    "register": { "name": "gateway", "ttl": 10 }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(conf.http_port, 8080);
        assert_eq!(conf.etcd.dial_timeout, 5);
        assert_eq!(conf.log_dir, "./logs");
        assert_eq!(conf.connector.client_port, 9101);
    }
}
