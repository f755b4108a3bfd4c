//! # lobby-session
//!
//! Lobby and game-session coordination for peer-hosted multiplayer games.
//!
//! ## Overview
//!
//! A [`LobbyCoordinator`] sits between a matchmaking backend (lobbies, members,
//! key-value metadata and their notifications) and a session transport (host or
//! client role, synchronized scene changes). It decides who hosts, when a member
//! connects, how ownership migrates and how everyone is sent back to the menu.
//! A [`Roster`] keeps the slot view of the lobby's members for the UI.
//!
//! ## Key Features
//!
//! - Host discovery through lobby metadata (`HostAddress`, `GameStarted`)
//! - Late join into a running game
//! - Owner-only start, return-to-menu and lobby close, propagated via metadata
//! - Ownership hand-over when the owner exits
//! - Roster with the local member pinned to slot 0 and cached avatars
//! - In-process matchmaking and transport backends, plus a zenoh transport
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lobby_session::{
//!     LobbyCoordinator, LocalLobbyService, LocalNetwork, MatchmakingClient, MenuFrontend,
//!     SceneRef, StepResult,
//! };
//!
//! struct Headless;
//!
//! impl MenuFrontend for Headless {
//!     fn show_menu(&self) {}
//!     fn hide_menu(&self) {}
//!     fn load_scene(&self, scene: &SceneRef) {
//!         println!("loading {}", scene);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> lobby_session::Result<()> {
//!     let service = LocalLobbyService::new();
//!     let network = LocalNetwork::new();
//!
//!     let matchmaking = service.connect(None);
//!     let transport = network.transport(matchmaking.local_member().as_str());
//!     let mut coordinator =
//!         LobbyCoordinator::builder(Arc::new(matchmaking), Arc::new(transport), Arc::new(Headless))
//!             .max_players(4)
//!             .build()?;
//!
//!     coordinator.create_lobby(None).await;
//!     while coordinator.step().await != StepResult::Timeout {}
//!     coordinator.start_game().await;
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod avatar;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod frontend;
pub mod matchmaking;
pub mod metadata;
pub mod network;
pub mod roster;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use avatar::{Avatar, AvatarCache};
pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorBuilder, LobbyCommand, LobbyCoordinator, SessionState, StepResult};
pub use error::{LobbyError, Result};
pub use frontend::MenuFrontend;
pub use matchmaking::{LobbyEvent, LocalLobbyService, LocalMatchmaking, MatchmakingClient};
pub use roster::{Roster, SlotAvatar, SlotView};
pub use transport::{
    LocalNetwork, LocalTransport, SessionTransport, TransportEvent, TransportStats, ZenohTransport,
};
pub use types::{LobbyId, MemberId, Role, SceneRef, Visibility};
