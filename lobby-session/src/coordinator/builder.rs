//! Builder for a LobbyCoordinator

use std::sync::Arc;

use super::lobby_coordinator::LobbyCoordinator;
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::frontend::MenuFrontend;
use crate::matchmaking::MatchmakingClient;
use crate::transport::SessionTransport;
use crate::types::{SceneRef, Visibility};

/// Builder for [`LobbyCoordinator`]
///
/// Starts from [`CoordinatorConfig::default`]; a whole config can be supplied
/// with [`config`](Self::config) and individual fields overridden afterwards.
#[must_use = "builders do nothing unless build() is called"]
pub struct CoordinatorBuilder {
    matchmaking: Arc<dyn MatchmakingClient>,
    transport: Arc<dyn SessionTransport>,
    frontend: Arc<dyn MenuFrontend>,
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    pub(crate) fn new(
        matchmaking: Arc<dyn MatchmakingClient>,
        transport: Arc<dyn SessionTransport>,
        frontend: Arc<dyn MenuFrontend>,
    ) -> Self {
        Self {
            matchmaking,
            transport,
            frontend,
            config: CoordinatorConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the roster size and lobby member limit
    pub fn max_players(mut self, max_players: usize) -> Self {
        self.config = self.config.with_max_players(max_players);
        self
    }

    /// Set the visibility of created lobbies
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.config = self.config.with_visibility(visibility);
        self
    }

    /// Set the HostCloseLobby grace period in milliseconds
    pub fn close_grace_ms(mut self, grace_ms: u64) -> Self {
        self.config = self.config.with_close_grace_ms(grace_ms);
        self
    }

    /// Set the step timeout in milliseconds
    pub fn step_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config = self.config.with_step_timeout_ms(timeout_ms);
        self
    }

    /// Set the online, offline and bootstrap scenes
    pub fn scenes(mut self, online: SceneRef, offline: SceneRef, bootstrap: SceneRef) -> Self {
        self.config = self.config.with_scenes(online, offline, bootstrap);
        self
    }

    /// Set the label of unoccupied roster slots
    pub fn invite_label(mut self, label: impl Into<String>) -> Self {
        self.config = self.config.with_invite_label(label.into());
        self
    }

    /// Validate the configuration and create the coordinator
    pub fn build(self) -> Result<LobbyCoordinator> {
        self.config.validate()?;
        Ok(LobbyCoordinator::new_internal(
            self.config,
            self.matchmaking,
            self.transport,
            self.frontend,
        ))
    }
}
