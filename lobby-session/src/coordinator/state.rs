//! Session states and step results

/// Union of lobby affiliation and transport role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No lobby, no transport role
    Idle,
    /// Owns a lobby, transport not started
    LobbyOwner,
    /// Member of someone else's lobby, transport not started
    LobbyMember,
    /// Hosting the game session
    HostActive,
    /// Connected to the lobby host's session
    ClientActive,
    /// Lobby teardown announced, waiting for the grace period
    Closing,
    /// Left for good; every further step returns `Stop`
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::LobbyOwner => "lobby owner",
            SessionState::LobbyMember => "lobby member",
            SessionState::HostActive => "hosting",
            SessionState::ClientActive => "connected as client",
            SessionState::Closing => "closing lobby",
            SessionState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Result of one coordinator step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// The session state changed
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Roster slots changed without a state change
    RosterUpdated,
    /// Step timeout elapsed without any change
    Timeout,
    /// The coordinator stopped
    Stop,
}
