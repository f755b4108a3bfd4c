//! Configuration for a LobbyCoordinator

use std::path::Path;

use serde::Deserialize;

use crate::error::{LobbyError, Result};
use crate::types::{SceneRef, Visibility};

/// Largest roster supported
pub const MAX_PLAYERS_LIMIT: usize = 10;

/// Main configuration for a LobbyCoordinator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Roster size and lobby member limit
    pub max_players: usize,

    /// Visibility used when a lobby is created without an explicit one
    pub visibility: Visibility,

    /// Delay between publishing `LobbyClosing` and leaving the lobby (in milliseconds)
    pub close_grace_ms: u64,

    /// Timeout for step() method in milliseconds
    pub step_timeout_ms: u64,

    /// In-game scene
    pub online_scene: SceneRef,

    /// Menu / lobby browser scene
    pub offline_scene: SceneRef,

    /// Neutral scene loaded after the host closes the lobby
    pub bootstrap_scene: SceneRef,

    /// Display name of unoccupied roster slots
    pub invite_label: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_players: 4,
            visibility: Visibility::FriendsOnly,
            close_grace_ms: 500,
            step_timeout_ms: 1000,
            online_scene: SceneRef::new("Game"),
            offline_scene: SceneRef::new("MainMenu"),
            bootstrap_scene: SceneRef::new("Bootstrap"),
            invite_label: "Invite Friend".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_players == 0 || self.max_players > MAX_PLAYERS_LIMIT {
            return Err(LobbyError::InvalidConfig(format!(
                "max_players must be within 1..={}, got {}",
                MAX_PLAYERS_LIMIT, self.max_players
            )));
        }
        for scene in [&self.online_scene, &self.offline_scene, &self.bootstrap_scene] {
            if scene.as_str().is_empty() {
                return Err(LobbyError::InvalidConfig(
                    "scene names cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Set the roster size
    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    /// Set the default lobby visibility
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Set the lobby close grace delay in milliseconds
    pub fn with_close_grace_ms(mut self, grace_ms: u64) -> Self {
        self.close_grace_ms = grace_ms;
        self
    }

    /// Set the step timeout in milliseconds
    pub fn with_step_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.step_timeout_ms = timeout_ms;
        self
    }

    /// Set the online, offline and bootstrap scenes
    pub fn with_scenes(mut self, online: SceneRef, offline: SceneRef, bootstrap: SceneRef) -> Self {
        self.online_scene = online;
        self.offline_scene = offline;
        self.bootstrap_scene = bootstrap;
        self
    }

    /// Set the label shown on unoccupied slots
    pub fn with_invite_label(mut self, label: String) -> Self {
        self.invite_label = label;
        self
    }
}
