use crate::config::EtcdConf;
use crate::discovery::{Resolver, ServerAddr};
use crate::grpc::pb::user_service_client::UserServiceClient;
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tonic::transport::{Channel, Endpoint};
use tower::discover::Change;
use tracing::{error, info};

/// Constructs a strongly-typed client from a resolved channel. Implemented
/// per generated client so [`ClientRegistry::client`] stays generic over the
/// service being called.
pub trait FromChannel {
    fn from_channel(channel: Channel) -> Self;
}

impl FromChannel for UserServiceClient<Channel> {
    fn from_channel(channel: Channel) -> Self {
        UserServiceClient::new(channel)
    }
}

/// Owns one discovery-backed [`Channel`] per remote service.
///
/// Each channel balances over the live instance set: a [`Resolver`] publishes
/// address snapshots into a watch channel and a feed task turns snapshot
/// diffs into endpoint insert/remove events for `Channel::balance_channel`.
/// Callers hold the registry explicitly instead of reaching for globals.
pub struct ClientRegistry {
    conf: EtcdConf,
    channels: HashMap<String, Channel>,
    resolvers: Vec<Resolver>,
}

impl ClientRegistry {
    pub fn new(conf: EtcdConf) -> Self {
        Self {
            conf,
            channels: HashMap::new(),
            resolvers: Vec::new(),
        }
    }

    /// Typed client for `service`, e.g.
    /// `registry.client::<UserServiceClient<Channel>>("user")`.
    pub async fn client<C: FromChannel>(&mut self, service: &str) -> Result<C> {
        Ok(C::from_channel(self.channel(service).await?))
    }

    /// Load-balanced channel for `service`, building the resolver on first
    /// use. Channels are cheap to clone and cached per service name.
    pub async fn channel(&mut self, service: &str) -> Result<Channel> {
        if let Some(channel) = self.channels.get(service) {
            return Ok(channel.clone());
        }

        let (sink, updates) = watch::channel(Vec::new());
        let resolver = Resolver::build(&self.conf, service, sink).await?;
        let (channel, endpoint_tx) = Channel::balance_channel(64);
        tokio::spawn(feed_endpoints(updates, endpoint_tx));

        info!("RPC channel for {} ready", service);
        self.resolvers.push(resolver);
        self.channels.insert(service.to_string(), channel.clone());
        Ok(channel)
    }

    /// Close every resolver. Existing channels keep their current endpoint
    /// set but stop receiving updates.
    pub async fn shutdown(self) {
        for resolver in self.resolvers {
            resolver.close().await;
        }
    }
}

/// Translate address-list snapshots into balance-channel endpoint changes.
/// Exits when either side of the pipeline goes away.
async fn feed_endpoints(
    mut updates: watch::Receiver<Vec<ServerAddr>>,
    tx: mpsc::Sender<Change<String, Endpoint>>,
) {
    let mut current: Vec<ServerAddr> = Vec::new();
    loop {
        let next = updates.borrow_and_update().clone();
        for change in diff(&current, &next) {
            if tx.send(change).await.is_err() {
                return;
            }
        }
        current = next;
        if updates.changed().await.is_err() {
            return;
        }
    }
}

/// Set difference between two snapshots, keyed by address. Weight is carried
/// by discovery as a hint only; the channel balances over live endpoints.
fn diff(old: &[ServerAddr], new: &[ServerAddr]) -> Vec<Change<String, Endpoint>> {
    let mut changes = Vec::new();
    for addr in new {
        if !old.iter().any(|o| o.addr == addr.addr) {
            match Endpoint::from_shared(format!("http://{}", addr.addr)) {
                Ok(endpoint) => changes.push(Change::Insert(addr.addr.clone(), endpoint)),
                Err(e) => error!("Skipping undialable address {}: {}", addr.addr, e),
            }
        }
    }
    for addr in old {
        if !new.iter().any(|n| n.addr == addr.addr) {
            changes.push(Change::Remove(addr.addr.clone()));
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: &str, weight: i32) -> ServerAddr {
        ServerAddr {
            addr: a.to_string(),
            weight,
            version: String::new(),
        }
    }

    fn keys(changes: &[Change<String, Endpoint>]) -> (Vec<String>, Vec<String>) {
        let mut inserted = Vec::new();
        let mut removed = Vec::new();
        for change in changes {
            match change {
                Change::Insert(k, _) => inserted.push(k.clone()),
                Change::Remove(k) => removed.push(k.clone()),
            }
        }
        (inserted, removed)
    }

    #[test]
    fn diff_inserts_new_addresses() {
        let old = vec![];
        let new = vec![addr("10.0.0.1:9000", 1), addr("10.0.0.2:9000", 2)];
        let (inserted, removed) = keys(&diff(&old, &new));
        assert_eq!(inserted, vec!["10.0.0.1:9000", "10.0.0.2:9000"]);
        assert!(removed.is_empty());
    }

    #[test]
    fn diff_removes_vanished_addresses() {
        let old = vec![addr("10.0.0.1:9000", 1), addr("10.0.0.2:9000", 2)];
        let new = vec![addr("10.0.0.2:9000", 2)];
        let (inserted, removed) = keys(&diff(&old, &new));
        assert!(inserted.is_empty());
        assert_eq!(removed, vec!["10.0.0.1:9000"]);
    }

    #[test]
    fn diff_ignores_weight_changes() {
        let old = vec![addr("10.0.0.1:9000", 1)];
        let new = vec![addr("10.0.0.1:9000", 5)];
        assert!(diff(&old, &new).is_empty());
    }
}
