//! Peer lifecycle: starts every service on the shared runtime and performs
//! the ordered shutdown.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery;
use crate::host::{Host, Registry};
use crate::inventory::{self, HandlerSlot};
use crate::sync::SyncClient;
use crate::transfer;

/// Shutdown state machine. There is no way back from `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Stopping,
    Stopped,
}

/// One running sync peer: discovery, inventory service, transfer service
/// and the registry they share.
///
/// Cheap to clone; all clones share the same state. Services are spawned on
/// the ambient tokio runtime by [`Peer::start`] and torn down by
/// [`Peer::shutdown`].
#[derive(Clone)]
pub struct Peer {
    config: Config,
    local_ip: Option<IpAddr>,
    registry: Registry,
    state: Arc<Mutex<Lifecycle>>,
    discovery_cancel: CancellationToken,
    inventory_cancel: CancellationToken,
    transfer_cancel: CancellationToken,
    inventory_inflight: HandlerSlot,
    transfer_inflight: HandlerSlot,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Peer {
    /// Builds a peer. Local IP detection may fail (no usable interface);
    /// the peer still runs, with discovery self-filtering degraded to the
    /// loopback check.
    pub fn new(config: Config) -> Self {
        let local_ip = match discovery::detect_local_ip() {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };

        Self {
            config,
            local_ip,
            registry: Registry::new(),
            state: Arc::new(Mutex::new(Lifecycle::Running)),
            discovery_cancel: CancellationToken::new(),
            inventory_cancel: CancellationToken::new(),
            transfer_cancel: CancellationToken::new(),
            inventory_inflight: HandlerSlot::default(),
            transfer_inflight: HandlerSlot::default(),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawns the inventory accept loop, the broadcaster, the discovery
    /// listener and the transfer accept loop. Order is not significant;
    /// the broadcaster's schedule begins immediately.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(inventory::serve(
            self.config.clone(),
            self.inventory_inflight.clone(),
            self.inventory_cancel.clone(),
        )));
        tasks.push(tokio::spawn(discovery::broadcast_presence(
            self.config.advertised_name.clone(),
            self.config.discovery_port,
            self.discovery_cancel.clone(),
        )));
        tasks.push(tokio::spawn(discovery::listen(
            self.registry.clone(),
            self.config.discovery_port,
            self.local_ip,
            self.discovery_cancel.clone(),
        )));
        tasks.push(tokio::spawn(transfer::serve(
            self.config.clone(),
            self.transfer_inflight.clone(),
            self.transfer_cancel.clone(),
        )));
    }

    /// Point-in-time copy of the known hosts.
    pub fn hosts(&self) -> Vec<Host> {
        self.registry.snapshot()
    }

    /// Handle to the shared registry (manual host entry, tests).
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// A sync client sharing this peer's config and registry.
    pub fn client(&self) -> SyncClient {
        SyncClient::new(self.config.clone(), self.registry.clone())
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.lock().unwrap()
    }

    /// Liveness check; false once the shutdown sequence has finished.
    pub fn is_running(&self) -> bool {
        self.state() != Lifecycle::Stopped
    }

    /// Begins the ordered shutdown and returns immediately; the sequence
    /// runs as its own task so the caller is never blocked.
    ///
    /// Order: stop broadcasting and discovery at once; wait for an
    /// in-flight inventory response, then close that listener; the same for
    /// the transfer listener; finally abort whatever is left and wait for
    /// every task to finish.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != Lifecycle::Running {
                return;
            }
            *state = Lifecycle::Stopping;
        }
        info!("peer stopping");

        let peer = self.clone();
        tokio::spawn(async move { peer.run_shutdown().await });
    }

    async fn run_shutdown(self) {
        self.discovery_cancel.cancel();

        if let Some(handle) = take_inflight(&self.inventory_inflight) {
            let _ = handle.await;
        }
        self.inventory_cancel.cancel();

        if let Some(handle) = take_inflight(&self.transfer_inflight) {
            let _ = handle.await;
        }
        self.transfer_cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        futures::future::join_all(tasks).await;

        *self.state.lock().unwrap() = Lifecycle::Stopped;
        info!("peer stopped");
    }

    /// Polls until the shutdown sequence reports `Stopped`.
    pub async fn wait_until_stopped(&self) {
        while self.is_running() {
            time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn take_inflight(slot: &HandlerSlot) -> Option<JoinHandle<()>> {
    slot.lock().unwrap().take()
}
