//! Lobby session coordinator: the state machine between matchmaking and transport

mod builder;
mod lobby_coordinator;
mod state;

pub use builder::CoordinatorBuilder;
pub use lobby_coordinator::{LobbyCommand, LobbyCoordinator};
pub use state::{SessionState, StepResult};
