use super::{DiscoveryError, ServiceRecord};
use crate::config::EtcdConf;
use etcd_client::{Client, ConnectOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Keeps one [`ServiceRecord`] continuously visible in etcd for as long as
/// the owning process is alive.
///
/// A lease with the record's TTL is granted and the key is bound to it, so a
/// process that dies simply vanishes from discovery once the lease expires.
/// A background task renews the lease and re-runs the whole registration
/// whenever the keep-alive stream dies; only the very first registration
/// attempt can fail the caller.
pub struct Registrar {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Registrar {
    /// Connect to etcd and publish `record` under a fresh lease.
    ///
    /// Returns once the initial registration succeeded and the supervisory
    /// task is running. Connection and first-registration errors are the
    /// caller's to handle; everything after that is retried internally.
    pub async fn start(conf: &EtcdConf, record: ServiceRecord) -> Result<Self, DiscoveryError> {
        let dial = Duration::from_secs(conf.dial_timeout);
        let options = ConnectOptions::new().with_connect_timeout(dial);
        let client = timeout(dial, Client::connect(conf.addrs.clone(), Some(options)))
            .await
            .map_err(|_| DiscoveryError::Timeout(conf.dial_timeout))?
            .map_err(DiscoveryError::Connection)?;

        let mut session = Session {
            client,
            record,
            op_timeout: dial,
            lease_id: 0,
            keeper: None,
        };
        session.register().await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(session.run(stop_rx));

        Ok(Self { stop_tx, handle })
    }

    /// Withdraw the registration: delete the key, revoke the lease and stop
    /// the supervisory task. Returns only once the withdrawal has run, so the
    /// key is already gone when a shutting-down process drops its runtime.
    /// Consumes the registrar, so it can only run once.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.await;
    }
}

/// All mutable registration state, owned by the supervisory task. Nothing
/// here is shared, so no locking is needed.
struct Session {
    client: Client,
    record: ServiceRecord,
    op_timeout: Duration,
    lease_id: i64,
    keeper: Option<(LeaseKeeper, LeaseKeepAliveStream)>,
}

impl Session {
    /// The full registration protocol: grant a lease, open the keep-alive
    /// stream against it, then write key -> value bound to the lease.
    /// Any failing step aborts the attempt; the ticker retries it later.
    async fn register(&mut self) -> Result<(), DiscoveryError> {
        self.keeper = None;

        let grant = timeout(
            self.op_timeout,
            self.client.lease_grant(self.record.ttl, None),
        )
        .await
        .map_err(|_| DiscoveryError::Timeout(self.op_timeout.as_secs()))?
        .map_err(DiscoveryError::Lease)?;
        self.lease_id = grant.id();

        let (mut keeper, stream) = self
            .client
            .lease_keep_alive(self.lease_id)
            .await
            .map_err(DiscoveryError::Lease)?;
        keeper.keep_alive().await.map_err(DiscoveryError::Lease)?;

        let key = self.record.register_key();
        let value = serde_json::to_vec(&self.record)?;
        let options = PutOptions::new().with_lease(self.lease_id);
        timeout(self.op_timeout, self.client.put(key, value, Some(options)))
            .await
            .map_err(|_| DiscoveryError::Timeout(self.op_timeout.as_secs()))?
            .map_err(DiscoveryError::Store)?;

        self.keeper = Some((keeper, stream));
        info!(
            "Registered {} at {} with lease {}",
            self.record.name, self.record.addr, self.lease_id
        );
        Ok(())
    }

    /// Supervisory loop: one task, three event sources.
    ///
    /// - stop signal: withdraw and exit;
    /// - keep-alive ack: a TTL of 0 means etcd already dropped the lease, an
    ///   ended or failing stream means the heartbeat is gone. Both clear the
    ///   stream handle so the ticker path re-registers;
    /// - ticker (ttl / 3, at least 1s): renew the lease while the stream is
    ///   live, re-run the full registration once it is not.
    ///
    /// Worst-case recovery after a dead heartbeat is bounded by one tick,
    /// well inside the lease TTL.
    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        let period = Duration::from_secs((self.record.ttl / 3).max(1) as u64);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of a tokio interval fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    self.withdraw().await;
                    break;
                }
                ack = recv_ack(&mut self.keeper) => {
                    match ack {
                        Ok(Some(resp)) if resp.ttl() > 0 => {
                            // lease confirmed alive, nothing to do
                        }
                        Ok(Some(_)) => {
                            warn!("Lease {} expired on {}, re-registering", self.lease_id, self.record.name);
                            self.keeper = None;
                        }
                        Ok(None) => {
                            warn!("Keep-alive stream for {} ended", self.record.name);
                            self.keeper = None;
                        }
                        Err(e) => {
                            warn!("Keep-alive stream for {} failed: {}", self.record.name, e);
                            self.keeper = None;
                        }
                    }
                }
                _ = ticker.tick() => {
                    match self.keeper.take() {
                        Some((mut keeper, stream)) => match keeper.keep_alive().await {
                            Ok(()) => self.keeper = Some((keeper, stream)),
                            Err(e) => warn!("Failed to renew lease {}: {}", self.lease_id, e),
                        },
                        None => {
                            if let Err(e) = self.register().await {
                                error!("Re-registration of {} failed: {}", self.record.name, e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Graceful withdrawal on stop. Failures are logged only: the lease will
    /// expire on its own if etcd is unreachable here.
    async fn withdraw(&mut self) {
        let key = self.record.register_key();
        match timeout(self.op_timeout, self.client.delete(key, None)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Failed to delete registration key: {}", e),
            Err(_) => error!("Deleting registration key timed out"),
        }
        match timeout(self.op_timeout, self.client.lease_revoke(self.lease_id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Failed to revoke lease {}: {}", self.lease_id, e),
            Err(_) => error!("Revoking lease {} timed out", self.lease_id),
        }
        info!("Unregistered {} from etcd", self.record.name);
    }
}

/// Next keep-alive ack, or block forever while no stream is open so the
/// ticker branch drives recovery alone.
async fn recv_ack(
    keeper: &mut Option<(LeaseKeeper, LeaseKeepAliveStream)>,
) -> Result<Option<etcd_client::LeaseKeepAliveResponse>, etcd_client::Error> {
    match keeper {
        Some((_, stream)) => stream.message().await,
        None => std::future::pending().await,
    }
}
