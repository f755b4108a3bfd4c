//! Session transport seam: host/client roles and synchronized scene changes

pub mod local;
pub mod stats;
pub mod zenoh_transport;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::SceneRef;

pub use local::{LocalNetwork, LocalTransport};
pub use stats::{StatsTracker, TransportStats};
pub use zenoh_transport::ZenohTransport;

/// Notification from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The host this client is connected to changed scene
    SceneChanged(SceneRef),
    /// The host this client is connected to went away
    HostLost,
}

/// Network session backend with idle, host and client states
///
/// At most one role is active at a time: starting a role while another (or the
/// same) is active fails with [`crate::LobbyError::RoleConflict`].
pub trait SessionTransport: Send + Sync {
    /// Start hosting a session reachable at the local member's address
    fn start_host(&self) -> BoxFuture<'_, Result<()>>;

    /// Connect as a client to the host at `address`
    fn start_client<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Stop hosting; connected clients observe `HostLost`
    fn stop_host(&self) -> BoxFuture<'_, ()>;

    /// Disconnect from the host
    fn stop_client(&self) -> BoxFuture<'_, ()>;

    /// Whether the host role is active
    fn is_host_active(&self) -> bool;

    /// Whether the client role is active
    fn is_client_active(&self) -> bool;

    /// Move every connected peer to `scene` (host only)
    fn change_scene<'a>(&'a self, scene: &'a SceneRef) -> BoxFuture<'a, Result<()>>;

    /// Subscribe to transport notifications
    fn subscribe(&self) -> flume::Receiver<TransportEvent>;

    /// Activity counters
    fn stats(&self) -> TransportStats;
}
