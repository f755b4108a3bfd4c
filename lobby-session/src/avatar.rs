//! Member avatars and their process-lifetime cache

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{LobbyError, Result};
use crate::types::MemberId;

/// RGBA avatar image
#[derive(Clone, PartialEq, Eq)]
pub struct Avatar {
    width: u32,
    height: u32,
    rgba: Arc<[u8]>,
}

impl std::fmt::Debug for Avatar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Avatar")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Avatar {
    /// Create an avatar from raw RGBA pixels (4 bytes per pixel)
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(LobbyError::InvalidAvatar(format!(
                "empty image {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(LobbyError::InvalidAvatar(format!(
                "{}x{} image needs {} bytes, got {}",
                width,
                height,
                expected,
                rgba.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba: rgba.into(),
        })
    }

    /// Square avatar filled with one colour
    pub fn solid(size: u32, color: [u8; 4]) -> Self {
        let size = size.max(1);
        let pixels = size as usize * size as usize;
        Self {
            width: size,
            height: size,
            rgba: color.repeat(pixels).into(),
        }
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

/// Avatars keyed by member, populated at most once per member and never evicted
///
/// Written only by the coordinator when a fetch resolves; read when the roster
/// is rendered. Not synchronized: it lives inside the coordinator.
#[derive(Debug, Default)]
pub struct AvatarCache {
    avatars: HashMap<MemberId, Avatar>,
    in_flight: HashSet<MemberId>,
}

impl AvatarCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached avatar for `member`
    pub fn get(&self, member: &MemberId) -> Option<&Avatar> {
        self.avatars.get(member)
    }

    /// Whether a fetch should be issued for `member`
    ///
    /// Returns false when the avatar is cached or a fetch is already running,
    /// otherwise marks the member as in flight.
    pub fn begin_fetch(&mut self, member: &MemberId) -> bool {
        if self.avatars.contains_key(member) || self.in_flight.contains(member) {
            return false;
        }
        self.in_flight.insert(member.clone());
        true
    }

    /// Record a fetch result; the first stored avatar wins
    pub fn finish_fetch(&mut self, member: &MemberId, avatar: Option<Avatar>) {
        self.in_flight.remove(member);
        if let Some(avatar) = avatar {
            self.avatars.entry(member.clone()).or_insert(avatar);
        }
    }

    /// Forget in-flight markers (fetches were cancelled)
    pub fn cancel_fetches(&mut self) {
        self.in_flight.clear();
    }

    /// Number of cached avatars
    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }
}
