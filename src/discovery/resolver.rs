use super::{parse_key, parse_value, DiscoveryError, ServerAddr};
use crate::config::EtcdConf;
use etcd_client::{
    Client, ConnectOptions, Event, EventType, GetOptions, WatchOptions, WatchStream, Watcher,
};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Interval of the periodic full resync. Watches can silently drop events
/// across reconnects, so divergence is bounded to one interval.
const RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Tracks every live instance of one named service and publishes the address
/// list into a [`watch`] channel after every change.
///
/// The list is built from an initial prefix scan, patched incrementally from
/// watch events, and replaced wholesale by a periodic resync. Downstream
/// readers (the RPC balancing layer) only ever see complete snapshots.
pub struct Resolver {
    close_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Resolver {
    /// Connect to etcd, scan the `/{service_name}` prefix, publish the
    /// initial address list into `sink` and start watching for changes.
    ///
    /// Fails if the connection, the initial scan or the watch cannot be
    /// established; later failures are logged and healed by the resync tick.
    pub async fn build(
        conf: &EtcdConf,
        service_name: &str,
        sink: watch::Sender<Vec<ServerAddr>>,
    ) -> Result<Self, DiscoveryError> {
        let dial = Duration::from_secs(conf.dial_timeout);
        let options = ConnectOptions::new().with_connect_timeout(dial);
        let client = timeout(dial, Client::connect(conf.addrs.clone(), Some(options)))
            .await
            .map_err(|_| DiscoveryError::Timeout(conf.dial_timeout))?
            .map_err(DiscoveryError::Connection)?;

        let mut session = Session {
            client,
            key: format!("/{}", service_name),
            rw_timeout: Duration::from_secs(conf.rw_timeout),
            addrs: Vec::new(),
            sink,
        };
        session.sync().await?;
        let watch = session.watch().await?;

        let (close_tx, close_rx) = oneshot::channel();
        let handle = tokio::spawn(session.run(Some(watch), close_rx));

        info!("Resolver for {} started", service_name);
        Ok(Self { close_tx, handle })
    }

    /// Stop watching and release the etcd connection. Returns once the event
    /// loop has exited, after which no further updates reach the sink.
    /// Consumes the resolver, so it can only run once.
    pub async fn close(self) {
        let _ = self.close_tx.send(());
        let _ = self.handle.await;
    }
}

struct Session {
    client: Client,
    key: String,
    rw_timeout: Duration,
    addrs: Vec<ServerAddr>,
    sink: watch::Sender<Vec<ServerAddr>>,
}

impl Session {
    /// Full prefix scan: replace the cached list with whatever is registered
    /// right now and push it downstream. Resync always pushes, even when the
    /// scanned set is identical to the cache.
    async fn sync(&mut self) -> Result<(), DiscoveryError> {
        let options = GetOptions::new().with_prefix();
        let resp = timeout(
            self.rw_timeout,
            self.client.get(self.key.clone(), Some(options)),
        )
        .await
        .map_err(|_| DiscoveryError::Timeout(self.rw_timeout.as_secs()))?
        .map_err(DiscoveryError::Store)?;

        let mut addrs = Vec::new();
        for kv in resp.kvs() {
            match parse_value(kv.value()) {
                Ok(record) => {
                    put_addr(&mut addrs, ServerAddr::from(&record));
                }
                Err(e) => error!("Skipping bad registration under {}: {}", self.key, e),
            }
        }
        self.addrs = addrs;
        self.publish();
        Ok(())
    }

    async fn watch(&mut self) -> Result<(Watcher, WatchStream), DiscoveryError> {
        let options = WatchOptions::new().with_prefix();
        self.client
            .watch(self.key.clone(), Some(options))
            .await
            .map_err(DiscoveryError::Store)
    }

    /// Event loop: one task, three event sources.
    ///
    /// - close signal: cancel the watcher and exit;
    /// - watch batch: fold each event into the list in arrival order, pushing
    ///   after every actual change. A dead stream is cleared and re-opened on
    ///   the next resync tick;
    /// - resync tick: full scan as a backstop against missed events.
    async fn run(
        mut self,
        mut watch: Option<(Watcher, WatchStream)>,
        mut close_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = interval_at(Instant::now() + RESYNC_INTERVAL, RESYNC_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut close_rx => {
                    if let Some((mut watcher, _)) = watch.take() {
                        let _ = watcher.cancel().await;
                    }
                    info!("Resolver for {} closed", self.key);
                    break;
                }
                msg = recv_events(&mut watch) => {
                    match msg {
                        Ok(Some(resp)) if !resp.canceled() => self.update(resp.events()),
                        Ok(Some(_)) | Ok(None) => {
                            warn!("Watch stream for {} ended", self.key);
                            watch = None;
                        }
                        Err(e) => {
                            warn!("Watch stream for {} failed: {}", self.key, e);
                            watch = None;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        error!("Resync for {} failed: {}", self.key, e);
                    }
                    if watch.is_none() {
                        match self.watch().await {
                            Ok(w) => watch = Some(w),
                            Err(e) => error!("Re-watching {} failed: {}", self.key, e),
                        }
                    }
                }
            }
        }
    }

    /// Fold a batch of watch events into the address list, in arrival order.
    /// Decode failures skip the event, never the batch.
    fn update(&mut self, events: &[Event]) {
        for event in events {
            let Some(kv) = event.kv() else { continue };
            match event.event_type() {
                EventType::Put => match parse_value(kv.value()) {
                    Ok(record) => {
                        if put_addr(&mut self.addrs, ServerAddr::from(&record)) {
                            self.publish();
                        }
                    }
                    Err(e) => error!("Bad put event under {}: {}", self.key, e),
                },
                // the value is gone on delete, recover the address from the key
                EventType::Delete => match kv.key_str().map_err(DiscoveryError::Store).and_then(parse_key) {
                    Ok(record) => {
                        if remove_addr(&mut self.addrs, &record.addr) {
                            self.publish();
                        }
                    }
                    Err(e) => error!("Bad delete event under {}: {}", self.key, e),
                },
            }
        }
    }

    fn publish(&self) {
        if self.sink.send(self.addrs.clone()).is_err() {
            warn!("Address sink for {} dropped, update discarded", self.key);
        }
    }
}

/// Next watch batch, or block forever while the stream is down so only the
/// resync tick fires.
async fn recv_events(
    watch: &mut Option<(Watcher, WatchStream)>,
) -> Result<Option<etcd_client::WatchResponse>, etcd_client::Error> {
    match watch {
        Some((_, stream)) => stream.message().await,
        None => std::future::pending().await,
    }
}

/// Append `addr` unless an entry with the same address already exists.
/// Dedup is by address alone; a re-put of a known address is a no-op.
pub fn put_addr(list: &mut Vec<ServerAddr>, addr: ServerAddr) -> bool {
    if list.iter().any(|a| a.addr == addr.addr) {
        return false;
    }
    list.push(addr);
    true
}

/// Remove the entry with the given address, matching by address alone so a
/// delete decoded from a bare key always finds its entry.
pub fn remove_addr(list: &mut Vec<ServerAddr>, addr: &str) -> bool {
    match list.iter().position(|a| a.addr == addr) {
        Some(i) => {
            list.swap_remove(i);
            true
        }
        None => false,
    }
}
