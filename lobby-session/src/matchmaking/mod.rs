//! Matchmaking seam: lobbies, membership, metadata and their notifications

pub mod local;
pub(crate) mod name_generator;

use futures::future::BoxFuture;

use crate::avatar::Avatar;
use crate::error::Result;
use crate::types::{LobbyId, MemberId, Visibility};

pub use local::{LocalLobbyService, LocalMatchmaking};

/// Push notification from the matchmaking backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// A lobby requested by this member was created
    LobbyCreated(LobbyId),
    /// Lobby creation failed on the backend
    LobbyCreateFailed(String),
    /// The user accepted an invite (or otherwise asked) to join a lobby
    JoinRequested(LobbyId),
    /// This member entered a lobby
    LobbyEntered(LobbyId),
    /// Lobby membership changed
    MembersChanged(LobbyId),
    /// Lobby metadata or ownership changed
    MetadataChanged(LobbyId),
}

/// Matchmaking backend as seen by one member
///
/// Mutating calls are fire-and-forget: success means the request was accepted,
/// and the outcome is confirmed later through a [`LobbyEvent`]. Reads return the
/// backend's local, eventually-consistent view.
pub trait MatchmakingClient: Send + Sync {
    /// Whether the backend is initialized
    fn is_ready(&self) -> bool;

    /// Identity of the local member
    fn local_member(&self) -> MemberId;

    /// Request a new lobby; confirmed by `LobbyCreated`
    fn create_lobby(&self, visibility: Visibility, max_members: usize) -> Result<()>;

    /// Request to join a lobby; confirmed by `LobbyEntered`
    fn join_lobby(&self, lobby: &LobbyId) -> Result<()>;

    /// Leave a lobby
    fn leave_lobby(&self, lobby: &LobbyId);

    /// Current lobby owner
    fn lobby_owner(&self, lobby: &LobbyId) -> Option<MemberId>;

    /// Hand lobby ownership to another member
    fn set_lobby_owner(&self, lobby: &LobbyId, member: &MemberId) -> Result<()>;

    /// Write a metadata value (owner only)
    fn set_metadata(&self, lobby: &LobbyId, key: &str, value: &str) -> Result<()>;

    /// Read a metadata value; absent keys read as the empty string
    fn metadata(&self, lobby: &LobbyId, key: &str) -> String;

    /// Lobby members in backend order
    fn members(&self, lobby: &LobbyId) -> Vec<MemberId>;

    /// Display name of a member
    fn member_name(&self, member: &MemberId) -> String;

    /// Resolve a member's avatar once it is available
    ///
    /// Dropping the future cancels the fetch.
    fn fetch_avatar(&self, member: &MemberId) -> BoxFuture<'static, Option<Avatar>>;

    /// Open the backend's invite dialog for a lobby
    fn open_invite_dialog(&self, lobby: &LobbyId);

    /// Subscribe to notifications; dropping the receiver unsubscribes
    fn subscribe(&self) -> flume::Receiver<LobbyEvent>;
}
