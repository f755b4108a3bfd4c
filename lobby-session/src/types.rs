/// Core identifier and value types for the lobby-session library
use serde::Deserialize;

use crate::error::{LobbyError, Result};

/// Generate a keyexpr-safe random identifier
///
/// Uses base58 encoding of a UUID to avoid special characters
fn generate_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let encoded = bs58::encode(uuid.as_bytes()).into_string();
    // Take first 16 characters for reasonable length
    encoded.chars().take(16).collect::<String>()
}

/// Validate that a string can be used as an identifier (single keyexpr chunk)
fn validate_id(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(LobbyError::InvalidMemberId(
            "identifier cannot be empty".to_string(),
        ));
    }

    // Check for invalid characters: / * $ ? # @
    for ch in s.chars() {
        if matches!(ch, '/' | '*' | '$' | '?' | '#' | '@') {
            return Err(LobbyError::InvalidMemberId(format!(
                "'{}' contains invalid character '{}'",
                s, ch
            )));
        }
    }

    Ok(())
}

/// Unique member identifier
///
/// A MemberId is also the host address published in lobby metadata, and the
/// zenoh transport embeds it into key expressions, so it must be a valid
/// single-chunk keyexpr:
/// - Non-empty UTF-8 string
/// - Cannot contain: / * $ ? # @
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(String);

impl MemberId {
    /// Generate a new unique member ID
    pub fn generate() -> Self {
        MemberId(generate_id())
    }

    /// Parse a member ID, rejecting empty or keyexpr-unsafe strings
    pub fn parse(s: &str) -> Result<Self> {
        validate_id(s)?;
        Ok(MemberId(s.to_string()))
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque matchmaking lobby identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LobbyId(String);

impl LobbyId {
    /// Generate a new unique lobby ID
    pub fn generate() -> Self {
        LobbyId(generate_id())
    }

    /// Parse a lobby ID
    pub fn parse(s: &str) -> Result<Self> {
        validate_id(s)?;
        Ok(LobbyId(s.to_string()))
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LobbyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who can see and join a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Joinable by invite only
    Private,
    /// Visible to friends of members
    #[default]
    FriendsOnly,
    /// Listed publicly
    Public,
    /// Joinable but never listed
    Invisible,
}

impl std::str::FromStr for Visibility {
    type Err = LobbyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "private" => Ok(Visibility::Private),
            "friends" | "friends_only" => Ok(Visibility::FriendsOnly),
            "public" => Ok(Visibility::Public),
            "invisible" => Ok(Visibility::Invisible),
            other => Err(LobbyError::InvalidConfig(format!(
                "unknown lobby visibility '{}'",
                other
            ))),
        }
    }
}

/// Reference to an application scene
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct SceneRef(String);

impl SceneRef {
    /// Create a scene reference from its name
    pub fn new(name: impl Into<String>) -> Self {
        SceneRef(name.into())
    }

    /// Scene name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SceneRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Member role, derived from transport state and lobby ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No lobby and no transport role
    Unaffiliated,
    /// Lobby member that does not own the lobby, or a connected client
    Client,
    /// Lobby owner, or an offline host
    Host,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unaffiliated => write!(f, "unaffiliated"),
            Role::Client => write!(f, "client"),
            Role::Host => write!(f, "host"),
        }
    }
}
