//! In-process session transport
//!
//! Transports attached to the same [`LocalNetwork`] can host and join each
//! other by address. Useful for tests and single-process demos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{SessionTransport, StatsTracker, TransportEvent, TransportStats};
use crate::error::{LobbyError, Result};
use crate::types::SceneRef;

#[derive(Debug, Default)]
struct HostEntry {
    /// Connected clients by address
    clients: HashMap<String, flume::Sender<TransportEvent>>,
}

/// Shared in-process network
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    hosts: Arc<Mutex<HashMap<String, HostEntry>>>,
}

impl LocalNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HostEntry>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a transport reachable at `address`
    pub fn transport(&self, address: impl Into<String>) -> LocalTransport {
        let (events_tx, events_rx) = flume::unbounded();
        LocalTransport {
            network: self.clone(),
            address: address.into(),
            role: Mutex::new(LocalRole::Idle),
            events_tx,
            events_rx,
            stats: StatsTracker::new(),
        }
    }

    /// Addresses currently hosting
    pub fn hosts(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of clients connected to the host at `address`
    pub fn client_count(&self, address: &str) -> usize {
        self.lock()
            .get(address)
            .map(|entry| entry.clients.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LocalRole {
    Idle,
    Host,
    Client { host: String },
}

/// One member's transport on a [`LocalNetwork`]
///
/// Events are delivered to a single internal queue; `subscribe()` hands out
/// receivers of that queue.
#[derive(Debug)]
pub struct LocalTransport {
    network: LocalNetwork,
    address: String,
    role: Mutex<LocalRole>,
    events_tx: flume::Sender<TransportEvent>,
    events_rx: flume::Receiver<TransportEvent>,
    stats: StatsTracker,
}

impl LocalTransport {
    fn role(&self) -> MutexGuard<'_, LocalRole> {
        self.role.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Address clients use to reach this transport's host
    pub fn address(&self) -> &str {
        &self.address
    }

    fn do_start_host(&self) -> Result<()> {
        let mut role = self.role();
        if *role != LocalRole::Idle {
            return Err(LobbyError::RoleConflict(format!(
                "'{}' cannot start host while {:?}",
                self.address, *role
            )));
        }
        let mut hosts = self.network.lock();
        if hosts.contains_key(&self.address) {
            return Err(LobbyError::RoleConflict(format!(
                "address '{}' already hosting",
                self.address
            )));
        }
        hosts.insert(self.address.clone(), HostEntry::default());
        *role = LocalRole::Host;
        self.stats.host_started();
        tracing::debug!("Local transport '{}' hosting", self.address);
        Ok(())
    }

    fn do_start_client(&self, address: &str) -> Result<()> {
        let mut role = self.role();
        if *role != LocalRole::Idle {
            return Err(LobbyError::RoleConflict(format!(
                "'{}' cannot start client while {:?}",
                self.address, *role
            )));
        }
        if address == self.address {
            return Err(LobbyError::RoleConflict(format!(
                "'{}' cannot connect to itself",
                address
            )));
        }
        let mut hosts = self.network.lock();
        let entry = hosts
            .get_mut(address)
            .ok_or_else(|| LobbyError::HostUnreachable(address.to_string()))?;
        entry
            .clients
            .insert(self.address.clone(), self.events_tx.clone());
        *role = LocalRole::Client {
            host: address.to_string(),
        };
        self.stats.client_started();
        tracing::debug!("Local transport '{}' connected to '{}'", self.address, address);
        Ok(())
    }

    fn do_stop_host(&self) {
        let mut role = self.role();
        if *role != LocalRole::Host {
            return;
        }
        if let Some(entry) = self.network.lock().remove(&self.address) {
            for client in entry.clients.values() {
                let _ = client.send(TransportEvent::HostLost);
            }
        }
        *role = LocalRole::Idle;
        tracing::debug!("Local transport '{}' stopped hosting", self.address);
    }

    fn do_stop_client(&self) {
        let mut role = self.role();
        if let LocalRole::Client { host } = &*role {
            if let Some(entry) = self.network.lock().get_mut(host) {
                entry.clients.remove(&self.address);
            }
            tracing::debug!("Local transport '{}' disconnected from '{}'", self.address, host);
            *role = LocalRole::Idle;
        }
    }

    fn do_change_scene(&self, scene: &SceneRef) -> Result<()> {
        if *self.role() != LocalRole::Host {
            return Err(LobbyError::RoleConflict(format!(
                "'{}' is not hosting, cannot change scene",
                self.address
            )));
        }
        if let Some(entry) = self.network.lock().get(&self.address) {
            for client in entry.clients.values() {
                let _ = client.send(TransportEvent::SceneChanged(scene.clone()));
            }
        }
        self.stats.scene_changed();
        Ok(())
    }
}

impl SessionTransport for LocalTransport {
    fn start_host(&self) -> BoxFuture<'_, Result<()>> {
        futures::future::ready(self.do_start_host()).boxed()
    }

    fn start_client<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>> {
        futures::future::ready(self.do_start_client(address)).boxed()
    }

    fn stop_host(&self) -> BoxFuture<'_, ()> {
        self.do_stop_host();
        futures::future::ready(()).boxed()
    }

    fn stop_client(&self) -> BoxFuture<'_, ()> {
        self.do_stop_client();
        futures::future::ready(()).boxed()
    }

    fn is_host_active(&self) -> bool {
        *self.role() == LocalRole::Host
    }

    fn is_client_active(&self) -> bool {
        matches!(*self.role(), LocalRole::Client { .. })
    }

    fn change_scene<'a>(&'a self, scene: &'a SceneRef) -> BoxFuture<'a, Result<()>> {
        futures::future::ready(self.do_change_scene(scene)).boxed()
    }

    fn subscribe(&self) -> flume::Receiver<TransportEvent> {
        self.events_rx.clone()
    }

    fn stats(&self) -> TransportStats {
        self.stats.get_stats()
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.do_stop_client();
        self.do_stop_host();
    }
}
