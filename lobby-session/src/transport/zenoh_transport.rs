//! Session transport over zenoh
//!
//! A host is a liveliness token at `<prefix>/host/<member>` plus a scene
//! publisher at `<prefix>/scene/<member>`. A client addresses the host by its
//! member id, checks the token, then follows the scene channel and the token's
//! liveliness from a background task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use zenoh::key_expr::KeyExpr;

use super::{SessionTransport, StatsTracker, TransportEvent, TransportStats};
use crate::error::{LobbyError, Result};
use crate::network::{
    host_alive, HostKeyexpr, HostLivelinessToken, HostWatch, SceneKeyexpr, ScenePublisher,
    SceneSubscriber,
};
use crate::types::{MemberId, SceneRef};

/// Default time to wait for a host's liveliness reply
pub const DEFAULT_LIVELINESS_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug)]
struct HostSession {
    token: HostLivelinessToken,
    publisher: Arc<ScenePublisher>,
}

#[derive(Debug)]
struct ClientSession {
    host: MemberId,
    task: JoinHandle<()>,
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Default)]
enum ZenohRole {
    #[default]
    Idle,
    Host(HostSession),
    Client(ClientSession),
}

impl ZenohRole {
    fn describe(&self) -> &'static str {
        match self {
            ZenohRole::Idle => "idle",
            ZenohRole::Host(_) => "hosting",
            ZenohRole::Client(_) => "connected as client",
        }
    }
}

/// Zenoh-backed [`SessionTransport`]; addresses are member ids
pub struct ZenohTransport {
    session: zenoh::Session,
    prefix: KeyExpr<'static>,
    local: MemberId,
    liveliness_timeout: Duration,
    role: Mutex<ZenohRole>,
    events_tx: flume::Sender<TransportEvent>,
    events_rx: flume::Receiver<TransportEvent>,
    stats: StatsTracker,
}

impl std::fmt::Debug for ZenohTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZenohTransport")
            .field("prefix", &self.prefix)
            .field("local", &self.local)
            .field("role", &self.role().describe())
            .finish()
    }
}

impl ZenohTransport {
    pub fn new(session: zenoh::Session, prefix: KeyExpr<'static>, local: MemberId) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            session,
            prefix,
            local,
            liveliness_timeout: DEFAULT_LIVELINESS_TIMEOUT,
            role: Mutex::new(ZenohRole::Idle),
            events_tx,
            events_rx,
            stats: StatsTracker::new(),
        }
    }

    /// Set how long a client waits for the host's liveliness reply
    pub fn with_liveliness_timeout(mut self, timeout: Duration) -> Self {
        self.liveliness_timeout = timeout;
        self
    }

    /// Member id clients use as this transport's address
    pub fn local_member(&self) -> &MemberId {
        &self.local
    }

    fn role(&self) -> MutexGuard<'_, ZenohRole> {
        self.role.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        let role = self.role();
        match &*role {
            ZenohRole::Idle => Ok(()),
            other => Err(LobbyError::RoleConflict(format!(
                "'{}' cannot {} while {}",
                self.local,
                action,
                other.describe()
            ))),
        }
    }

    /// Install a freshly started role, rejecting it if another won the race
    fn install(&self, new_role: ZenohRole, action: &str) -> Result<()> {
        let mut role = self.role();
        if !matches!(*role, ZenohRole::Idle) {
            return Err(LobbyError::RoleConflict(format!(
                "'{}' cannot {} while {}",
                self.local,
                action,
                role.describe()
            )));
        }
        *role = new_role;
        Ok(())
    }

    async fn do_start_host(&self) -> Result<()> {
        self.ensure_idle("start host")?;

        let host = HostKeyexpr::new(&self.prefix, &self.local)?;
        let scene = SceneKeyexpr::new(&self.prefix, &self.local)?;
        let publisher = ScenePublisher::new(&self.session, scene).await?;
        let token = HostLivelinessToken::declare(&self.session, host).await?;

        self.install(
            ZenohRole::Host(HostSession {
                token,
                publisher: Arc::new(publisher),
            }),
            "start host",
        )?;
        self.stats.host_started();
        tracing::info!("Zenoh transport '{}' hosting", self.local);
        Ok(())
    }

    async fn do_start_client(&self, address: &str) -> Result<()> {
        self.ensure_idle("start client")?;

        let host =
            MemberId::parse(address).map_err(|_| LobbyError::StaleAddress(address.to_string()))?;
        if host == self.local {
            return Err(LobbyError::RoleConflict(format!(
                "'{}' cannot connect to itself",
                self.local
            )));
        }

        let host_keyexpr = HostKeyexpr::new(&self.prefix, &host)?;
        if !host_alive(&self.session, &host_keyexpr, self.liveliness_timeout).await? {
            return Err(LobbyError::HostUnreachable(address.to_string()));
        }

        let watch = HostWatch::new(&self.session, host_keyexpr).await?;
        let scenes =
            SceneSubscriber::new(&self.session, SceneKeyexpr::new(&self.prefix, &host)?).await?;
        let events = self.events_tx.clone();
        let local = self.local.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watch.lost() => {
                        let _ = events.send(TransportEvent::HostLost);
                        break;
                    }
                    scene = scenes.recv() => match scene {
                        Ok(scene) => {
                            let _ = events.send(TransportEvent::SceneChanged(scene));
                        }
                        Err(LobbyError::Serialization(e)) => {
                            tracing::warn!("Zenoh transport '{}' dropped scene sample: {}", local, e);
                        }
                        Err(e) => {
                            tracing::debug!("Zenoh transport '{}' scene channel closed: {}", local, e);
                            break;
                        }
                    },
                }
            }
        });

        self.install(
            ZenohRole::Client(ClientSession {
                host: host.clone(),
                task,
            }),
            "start client",
        )?;
        self.stats.client_started();
        tracing::info!("Zenoh transport '{}' connected to '{}'", self.local, host);
        Ok(())
    }

    async fn do_stop_host(&self) {
        let previous = std::mem::take(&mut *self.role());
        match previous {
            ZenohRole::Host(host) => {
                if let Err(e) = host.token.undeclare().await {
                    tracing::warn!(
                        "Zenoh transport '{}' failed to undeclare host token: {}",
                        self.local,
                        e
                    );
                }
                tracing::info!("Zenoh transport '{}' stopped hosting", self.local);
            }
            other => *self.role() = other,
        }
    }

    fn do_stop_client(&self) {
        let mut role = self.role();
        if let ZenohRole::Client(client) = &*role {
            tracing::info!(
                "Zenoh transport '{}' disconnected from '{}'",
                self.local,
                client.host
            );
            *role = ZenohRole::Idle;
        }
    }

    async fn do_change_scene(&self, scene: &SceneRef) -> Result<()> {
        let publisher = match &*self.role() {
            ZenohRole::Host(host) => host.publisher.clone(),
            other => {
                return Err(LobbyError::RoleConflict(format!(
                    "'{}' cannot change scene while {}",
                    self.local,
                    other.describe()
                )))
            }
        };
        publisher.put(scene).await?;
        self.stats.scene_changed();
        Ok(())
    }
}

impl SessionTransport for ZenohTransport {
    fn start_host(&self) -> BoxFuture<'_, Result<()>> {
        self.do_start_host().boxed()
    }

    fn start_client<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>> {
        self.do_start_client(address).boxed()
    }

    fn stop_host(&self) -> BoxFuture<'_, ()> {
        self.do_stop_host().boxed()
    }

    fn stop_client(&self) -> BoxFuture<'_, ()> {
        self.do_stop_client();
        futures::future::ready(()).boxed()
    }

    fn is_host_active(&self) -> bool {
        matches!(*self.role(), ZenohRole::Host(_))
    }

    fn is_client_active(&self) -> bool {
        matches!(*self.role(), ZenohRole::Client(_))
    }

    fn change_scene<'a>(&'a self, scene: &'a SceneRef) -> BoxFuture<'a, Result<()>> {
        self.do_change_scene(scene).boxed()
    }

    fn subscribe(&self) -> flume::Receiver<TransportEvent> {
        self.events_rx.clone()
    }

    fn stats(&self) -> TransportStats {
        self.stats.get_stats()
    }
}
