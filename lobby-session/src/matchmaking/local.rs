//! In-process matchmaking backend
//!
//! All members share one [`LocalLobbyService`]; each member talks to it through
//! its own [`LocalMatchmaking`] client. Notifications are delivered
//! synchronously into the subscribers' channels, in the order the backend
//! produces them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{name_generator, LobbyEvent, MatchmakingClient};
use crate::avatar::Avatar;
use crate::error::{LobbyError, Result};
use crate::types::{LobbyId, MemberId, Visibility};

const AVATAR_SIZE: u32 = 4;

#[derive(Debug)]
struct LobbyRecord {
    owner: MemberId,
    /// Members in join order
    members: Vec<MemberId>,
    metadata: HashMap<String, String>,
    visibility: Visibility,
    max_members: usize,
}

#[derive(Debug)]
struct Profile {
    name: String,
    avatar: Avatar,
}

#[derive(Debug)]
struct ServiceInner {
    ready: bool,
    /// Reason reported for every lobby creation while set
    create_failure: Option<String>,
    avatar_delay: Duration,
    lobbies: HashMap<LobbyId, LobbyRecord>,
    profiles: HashMap<MemberId, Profile>,
    subscribers: HashMap<MemberId, Vec<flume::Sender<LobbyEvent>>>,
    invite_dialogs: Vec<(MemberId, LobbyId)>,
}

impl ServiceInner {
    fn emit(&mut self, member: &MemberId, event: LobbyEvent) {
        if let Some(senders) = self.subscribers.get_mut(member) {
            // Dropped receivers unsubscribe
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn broadcast(&mut self, lobby: &LobbyId, event: LobbyEvent) {
        let members = self
            .lobbies
            .get(lobby)
            .map(|record| record.members.clone())
            .unwrap_or_default();
        for member in &members {
            self.emit(member, event.clone());
        }
    }

    fn remove_member(&mut self, lobby: &LobbyId, member: &MemberId) {
        let Some(record) = self.lobbies.get_mut(lobby) else {
            return;
        };
        let before = record.members.len();
        record.members.retain(|m| m != member);
        if record.members.len() == before {
            return;
        }

        if record.members.is_empty() {
            tracing::debug!("Lobby '{}' is empty, deleting it", lobby);
            self.lobbies.remove(lobby);
            return;
        }

        if &record.owner == member {
            // Backend migration: first remaining member in join order
            record.owner = record.members[0].clone();
            tracing::debug!(
                "Lobby '{}' owner '{}' left, ownership passes to '{}'",
                lobby,
                member,
                record.owner
            );
        }
        self.broadcast(lobby, LobbyEvent::MembersChanged(lobby.clone()));
    }
}

/// Shared in-process lobby service
#[derive(Debug, Clone)]
pub struct LocalLobbyService {
    inner: Arc<Mutex<ServiceInner>>,
}

impl Default for LocalLobbyService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLobbyService {
    /// Create a ready service with instantly available avatars
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServiceInner {
                ready: true,
                create_failure: None,
                avatar_delay: Duration::ZERO,
                lobbies: HashMap::new(),
                profiles: HashMap::new(),
                subscribers: HashMap::new(),
                invite_dialogs: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay before avatars resolve
    pub fn set_avatar_delay(&self, delay: Duration) {
        self.lock().avatar_delay = delay;
    }

    /// Simulate an initialized or uninitialized backend
    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    /// Make the backend reject lobby creation with `LobbyCreateFailed`
    pub fn set_create_failure(&self, reason: Option<String>) {
        self.lock().create_failure = reason;
    }

    /// Register a member and return its client
    ///
    /// Without a name a persona name is generated.
    pub fn connect(&self, name: Option<String>) -> LocalMatchmaking {
        let member = MemberId::generate();
        let name = name.unwrap_or_else(name_generator::generate_tagged_name);
        let avatar = generated_avatar(&member);
        tracing::debug!("Local lobby service registered member '{}' ({})", member, name);
        self.lock()
            .profiles
            .insert(member.clone(), Profile { name, avatar });
        LocalMatchmaking {
            service: self.clone(),
            member,
        }
    }

    /// Deliver an invite: `to` receives `JoinRequested`
    pub fn invite(&self, to: &MemberId, lobby: &LobbyId) -> Result<()> {
        let mut inner = self.lock();
        if !inner.lobbies.contains_key(lobby) {
            return Err(LobbyError::LobbyNotFound(lobby.clone()));
        }
        inner.emit(to, LobbyEvent::JoinRequested(lobby.clone()));
        Ok(())
    }

    /// Drop a member from every lobby, as if its connection to the backend died
    pub fn disconnect(&self, member: &MemberId) {
        let mut inner = self.lock();
        let lobbies: Vec<LobbyId> = inner
            .lobbies
            .iter()
            .filter(|(_, record)| record.members.contains(member))
            .map(|(id, _)| id.clone())
            .collect();
        for lobby in &lobbies {
            inner.remove_member(lobby, member);
        }
        inner.subscribers.remove(member);
    }

    /// Lobbies that are listed publicly
    pub fn public_lobbies(&self) -> Vec<LobbyId> {
        self.lock()
            .lobbies
            .iter()
            .filter(|(_, record)| record.visibility == Visibility::Public)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether a lobby exists
    pub fn lobby_exists(&self, lobby: &LobbyId) -> bool {
        self.lock().lobbies.contains_key(lobby)
    }

    /// Invite dialogs opened so far, as (member, lobby)
    pub fn invite_dialogs(&self) -> Vec<(MemberId, LobbyId)> {
        self.lock().invite_dialogs.clone()
    }
}

/// Deterministic solid-colour avatar derived from the member id
fn generated_avatar(member: &MemberId) -> Avatar {
    let seed = member
        .as_str()
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let [r, g, b, _] = seed.to_le_bytes();
    Avatar::solid(AVATAR_SIZE, [r, g, b, 255])
}

/// One member's view of a [`LocalLobbyService`]
#[derive(Debug, Clone)]
pub struct LocalMatchmaking {
    service: LocalLobbyService,
    member: MemberId,
}

impl LocalMatchmaking {
    /// The shared service
    pub fn service(&self) -> &LocalLobbyService {
        &self.service
    }
}

impl MatchmakingClient for LocalMatchmaking {
    fn is_ready(&self) -> bool {
        self.service.lock().ready
    }

    fn local_member(&self) -> MemberId {
        self.member.clone()
    }

    fn create_lobby(&self, visibility: Visibility, max_members: usize) -> Result<()> {
        let mut inner = self.service.lock();
        if !inner.ready {
            return Err(LobbyError::BackendUnavailable);
        }
        if let Some(reason) = inner.create_failure.clone() {
            tracing::debug!("Member '{}' lobby creation rejected: {}", self.member, reason);
            inner.emit(&self.member, LobbyEvent::LobbyCreateFailed(reason));
            return Ok(());
        }
        let lobby = LobbyId::generate();
        inner.lobbies.insert(
            lobby.clone(),
            LobbyRecord {
                owner: self.member.clone(),
                members: vec![self.member.clone()],
                metadata: HashMap::new(),
                visibility,
                max_members: max_members.max(1),
            },
        );
        tracing::debug!("Member '{}' created lobby '{}' ({:?})", self.member, lobby, visibility);
        inner.emit(&self.member, LobbyEvent::LobbyCreated(lobby.clone()));
        inner.emit(&self.member, LobbyEvent::LobbyEntered(lobby));
        Ok(())
    }

    fn join_lobby(&self, lobby: &LobbyId) -> Result<()> {
        let mut inner = self.service.lock();
        if !inner.ready {
            return Err(LobbyError::BackendUnavailable);
        }
        let record = inner
            .lobbies
            .get_mut(lobby)
            .ok_or_else(|| LobbyError::LobbyNotFound(lobby.clone()))?;
        if !record.members.contains(&self.member) {
            if record.members.len() >= record.max_members {
                return Err(LobbyError::LobbyFull(lobby.clone()));
            }
            record.members.push(self.member.clone());
        }
        inner.emit(&self.member, LobbyEvent::LobbyEntered(lobby.clone()));
        inner.broadcast(lobby, LobbyEvent::MembersChanged(lobby.clone()));
        Ok(())
    }

    fn leave_lobby(&self, lobby: &LobbyId) {
        self.service.lock().remove_member(lobby, &self.member);
    }

    fn lobby_owner(&self, lobby: &LobbyId) -> Option<MemberId> {
        self.service
            .lock()
            .lobbies
            .get(lobby)
            .map(|record| record.owner.clone())
    }

    fn set_lobby_owner(&self, lobby: &LobbyId, member: &MemberId) -> Result<()> {
        let mut inner = self.service.lock();
        let record = inner
            .lobbies
            .get_mut(lobby)
            .ok_or_else(|| LobbyError::LobbyNotFound(lobby.clone()))?;
        if record.owner != self.member {
            return Err(LobbyError::AuthorizationDenied("SetLobbyOwner".to_string()));
        }
        if !record.members.contains(member) {
            return Err(LobbyError::MemberNotInLobby(member.clone()));
        }
        record.owner = member.clone();
        inner.broadcast(lobby, LobbyEvent::MetadataChanged(lobby.clone()));
        Ok(())
    }

    fn set_metadata(&self, lobby: &LobbyId, key: &str, value: &str) -> Result<()> {
        let mut inner = self.service.lock();
        if !inner.ready {
            return Err(LobbyError::BackendUnavailable);
        }
        let record = inner
            .lobbies
            .get_mut(lobby)
            .ok_or_else(|| LobbyError::LobbyNotFound(lobby.clone()))?;
        if record.owner != self.member {
            return Err(LobbyError::AuthorizationDenied(format!("SetMetadata({})", key)));
        }
        record.metadata.insert(key.to_string(), value.to_string());
        inner.broadcast(lobby, LobbyEvent::MetadataChanged(lobby.clone()));
        Ok(())
    }

    fn metadata(&self, lobby: &LobbyId, key: &str) -> String {
        self.service
            .lock()
            .lobbies
            .get(lobby)
            .and_then(|record| record.metadata.get(key).cloned())
            .unwrap_or_default()
    }

    fn members(&self, lobby: &LobbyId) -> Vec<MemberId> {
        self.service
            .lock()
            .lobbies
            .get(lobby)
            .map(|record| record.members.clone())
            .unwrap_or_default()
    }

    fn member_name(&self, member: &MemberId) -> String {
        self.service
            .lock()
            .profiles
            .get(member)
            .map(|profile| profile.name.clone())
            .unwrap_or_else(|| member.to_string())
    }

    fn fetch_avatar(&self, member: &MemberId) -> BoxFuture<'static, Option<Avatar>> {
        let (avatar, delay) = {
            let inner = self.service.lock();
            (
                inner.profiles.get(member).map(|p| p.avatar.clone()),
                inner.avatar_delay,
            )
        };
        if delay.is_zero() {
            return futures::future::ready(avatar).boxed();
        }
        async move {
            tokio::time::sleep(delay).await;
            avatar
        }
        .boxed()
    }

    fn open_invite_dialog(&self, lobby: &LobbyId) {
        tracing::info!("Member '{}' opened invite dialog for lobby '{}'", self.member, lobby);
        self.service
            .lock()
            .invite_dialogs
            .push((self.member.clone(), lobby.clone()));
    }

    fn subscribe(&self) -> flume::Receiver<LobbyEvent> {
        let (tx, rx) = flume::unbounded();
        self.service
            .lock()
            .subscribers
            .entry(self.member.clone())
            .or_default()
            .push(tx);
        rx
    }
}
