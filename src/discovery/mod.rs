pub mod registrar;
pub mod resolver;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use registrar::Registrar;
pub use resolver::Resolver;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("etcd connection failed: {0}")]
    Connection(#[source] etcd_client::Error),

    #[error("etcd call timed out after {0}s")]
    Timeout(u64),

    #[error("lease operation failed: {0}")]
    Lease(#[source] etcd_client::Error),

    #[error("etcd operation failed: {0}")]
    Store(#[source] etcd_client::Error),

    #[error("malformed service record: {0}")]
    MalformedRecord(#[from] serde_json::Error),

    #[error("invalid registration key: {0}")]
    InvalidKey(String),
}

/// Discovery metadata for one server instance.
///
/// The JSON encoding of this struct is the registration value stored in etcd
/// and is shared with every other process in the cluster, so field names are
/// part of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub addr: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub ttl: i64,
}

impl ServiceRecord {
    /// Registration key for this record: `/{name}/{addr}`, or
    /// `/{name}/{version}/{addr}` when a version tag is set.
    ///
    /// (name, version, addr) identifies an instance, so two registrations of
    /// the same triple land on the same key and the last write wins.
    pub fn register_key(&self) -> String {
        if self.version.is_empty() {
            format!("/{}/{}", self.name, self.addr)
        } else {
            format!("/{}/{}/{}", self.name, self.version, self.addr)
        }
    }
}

/// Decode a registration value back into a [`ServiceRecord`].
pub fn parse_value(value: &[u8]) -> Result<ServiceRecord, DiscoveryError> {
    Ok(serde_json::from_slice(value)?)
}

/// Recover (name, version, addr) from a registration key.
///
/// Used when only the key is available, e.g. on a delete event where etcd no
/// longer carries the value. Empty segments from doubled slashes are ignored;
/// anything other than 2 or 3 remaining segments is rejected.
pub fn parse_key(key: &str) -> Result<ServiceRecord, DiscoveryError> {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    let (name, version, addr) = match segments.as_slice() {
        [name, addr] => (*name, "", *addr),
        [name, version, addr] => (*name, *version, *addr),
        _ => return Err(DiscoveryError::InvalidKey(key.to_string())),
    };
    Ok(ServiceRecord {
        name: name.to_string(),
        addr: addr.to_string(),
        version: version.to_string(),
        weight: 0,
        ttl: 0,
    })
}

/// One live instance as seen by a resolver: the dialable address plus the
/// load-balancing hints carried in its registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub addr: String,
    pub weight: i32,
    pub version: String,
}

impl From<&ServiceRecord> for ServerAddr {
    fn from(record: &ServiceRecord) -> Self {
        Self {
            addr: record.addr.clone(),
            weight: record.weight,
            version: record.version.clone(),
        }
    }
}
