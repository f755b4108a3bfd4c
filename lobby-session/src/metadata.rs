//! Lobby metadata keys and their encoding

use crate::matchmaking::MatchmakingClient;
use crate::types::LobbyId;

/// Member id of the session host
pub const HOST_ADDRESS_KEY: &str = "HostAddress";
/// `"1"` once the host has started the game
pub const GAME_STARTED_KEY: &str = "GameStarted";
/// `"1"` when the host sends everyone back to the menu
pub const RETURN_TO_MENU_KEY: &str = "ReturnToMenu";
/// `"true"` while the host tears the lobby down
pub const LOBBY_CLOSING_KEY: &str = "LobbyClosing";
/// Human-readable lobby name
pub const LOBBY_NAME_KEY: &str = "name";

/// Encode a boolean flag for `GameStarted` / `ReturnToMenu`
pub fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Decode a boolean flag; `"true"` is accepted for older writers
pub fn is_set(value: &str) -> bool {
    matches!(value, "1" | "true")
}

/// Snapshot of the session-relevant lobby metadata
///
/// Always read fresh at decision time; notifications may be coalesced or
/// reordered, so a snapshot only reflects some recent state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LobbyFlags {
    /// Raw `HostAddress` value (may be empty)
    pub host_address: String,
    /// `GameStarted`
    pub game_started: bool,
    /// `ReturnToMenu`
    pub return_to_menu: bool,
    /// `LobbyClosing`
    pub closing: bool,
}

impl LobbyFlags {
    /// Read the flags of `lobby` from the backend
    pub fn read(matchmaking: &dyn MatchmakingClient, lobby: &LobbyId) -> Self {
        Self {
            host_address: matchmaking.metadata(lobby, HOST_ADDRESS_KEY),
            game_started: is_set(&matchmaking.metadata(lobby, GAME_STARTED_KEY)),
            return_to_menu: is_set(&matchmaking.metadata(lobby, RETURN_TO_MENU_KEY)),
            closing: matchmaking.metadata(lobby, LOBBY_CLOSING_KEY) == "true",
        }
    }
}
