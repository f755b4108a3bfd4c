//! Key expression types for session hosts and their scene channel

use crate::error::{LobbyError, Result};
use crate::types::MemberId;
use zenoh::key_expr::KeyExpr;

fn build(prefix: &str, kind: &str, member: &MemberId) -> Result<KeyExpr<'static>> {
    KeyExpr::try_from(format!("{}/{}/{}", prefix, kind, member.as_str()))
        .map(KeyExpr::into_owned)
        .map_err(|e| LobbyError::InvalidKeyexpr(e.to_string()))
}

/// Split `[...prefix]/<kind>/<member>` into prefix and member
fn parse(keyexpr: &KeyExpr<'_>, kind: &str) -> Result<(String, MemberId)> {
    let parts: Vec<&str> = keyexpr.as_str().split('/').collect();
    if parts.len() < 3 || parts[parts.len() - 2] != kind {
        return Err(LobbyError::InvalidKeyexpr(format!(
            "expected '<prefix>/{}/<member>', got '{}'",
            kind,
            keyexpr.as_str()
        )));
    }
    let member = MemberId::parse(parts[parts.len() - 1])?;
    let prefix = parts[..parts.len() - 2].join("/");
    Ok((prefix, member))
}

/// Host keyexpr - presence of a member hosting a session
///
/// Pattern: `<prefix>/host/<member>`
///
/// The host declares a liveliness token on it; clients query and watch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyexpr {
    prefix: String,
    member: MemberId,
    keyexpr: KeyExpr<'static>,
}

impl HostKeyexpr {
    pub fn new(prefix: &KeyExpr<'_>, member: &MemberId) -> Result<Self> {
        Ok(Self {
            prefix: prefix.to_string(),
            member: member.clone(),
            keyexpr: build(prefix.as_str(), "host", member)?,
        })
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl TryFrom<KeyExpr<'_>> for HostKeyexpr {
    type Error = LobbyError;

    fn try_from(keyexpr: KeyExpr<'_>) -> Result<Self> {
        let (prefix, member) = parse(&keyexpr, "host")?;
        Ok(Self {
            prefix,
            member,
            keyexpr: keyexpr.into_owned(),
        })
    }
}

impl From<HostKeyexpr> for KeyExpr<'static> {
    fn from(host: HostKeyexpr) -> Self {
        host.keyexpr
    }
}

/// Scene keyexpr - the host's synchronized scene changes
///
/// Pattern: `<prefix>/scene/<member>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneKeyexpr {
    prefix: String,
    member: MemberId,
    keyexpr: KeyExpr<'static>,
}

impl SceneKeyexpr {
    pub fn new(prefix: &KeyExpr<'_>, member: &MemberId) -> Result<Self> {
        Ok(Self {
            prefix: prefix.to_string(),
            member: member.clone(),
            keyexpr: build(prefix.as_str(), "scene", member)?,
        })
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl TryFrom<KeyExpr<'_>> for SceneKeyexpr {
    type Error = LobbyError;

    fn try_from(keyexpr: KeyExpr<'_>) -> Result<Self> {
        let (prefix, member) = parse(&keyexpr, "scene")?;
        Ok(Self {
            prefix,
            member,
            keyexpr: keyexpr.into_owned(),
        })
    }
}

impl From<SceneKeyexpr> for KeyExpr<'static> {
    fn from(scene: SceneKeyexpr) -> Self {
        scene.keyexpr
    }
}
