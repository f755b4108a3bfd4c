/// Error types for the lobby-session library
use thiserror::Error;

use crate::types::{LobbyId, MemberId};

/// Result type alias for lobby session operations
pub type Result<T> = std::result::Result<T, LobbyError>;

/// Errors that can occur in lobby session operations
#[derive(Debug, Error)]
pub enum LobbyError {
    /// Zenoh-related errors
    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    /// Matchmaking backend not initialized
    #[error("Matchmaking backend unavailable")]
    BackendUnavailable,

    /// Owner-only action invoked by a non-owner
    #[error("Not authorized: {0} requires lobby ownership")]
    AuthorizationDenied(String),

    /// Published host address is empty or unparsable
    #[error("Stale host address: '{0}'")]
    StaleAddress(String),

    /// Action needs a lobby but none is joined
    #[error("Not in a lobby: {0} requires a lobby")]
    NotInLobby(String),

    /// Already affiliated with a lobby
    #[error("Already in lobby {0}")]
    AlreadyInLobby(LobbyId),

    /// A transport role is already active
    #[error("Role conflict: {0}")]
    RoleConflict(String),

    /// Invalid member or lobby identifier
    #[error("Invalid member id: {0}. Must be non-empty and contain none of / * $ ? # @")]
    InvalidMemberId(String),

    /// Invalid keyexpr pattern
    #[error("Invalid keyexpr: {0}")]
    InvalidKeyexpr(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lobby does not exist on the backend
    #[error("Lobby not found: {0}")]
    LobbyNotFound(LobbyId),

    /// Lobby has no free member slot
    #[error("Lobby full: {0}")]
    LobbyFull(LobbyId),

    /// Member is not part of the lobby
    #[error("Member not in lobby: {0}")]
    MemberNotInLobby(MemberId),

    /// No host is reachable at the given address
    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    /// Avatar image data does not match its dimensions
    #[error("Invalid avatar: {0}")]
    InvalidAvatar(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LobbyError {
    /// Errors that are expected in normal operation and only deserve a warning
    pub(crate) fn is_benign(&self) -> bool {
        matches!(
            self,
            LobbyError::AuthorizationDenied(_)
                | LobbyError::BackendUnavailable
                | LobbyError::StaleAddress(_)
                | LobbyError::NotInLobby(_)
                | LobbyError::AlreadyInLobby(_)
        )
    }
}

impl From<serde_json::Error> for LobbyError {
    fn from(e: serde_json::Error) -> Self {
        LobbyError::Serialization(e.to_string())
    }
}
