//! Player roster: the slot view of lobby membership

use crate::avatar::{Avatar, AvatarCache};
use crate::types::MemberId;

/// One roster position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Member shown in this slot
    pub member: Option<MemberId>,
    /// Member display name, or the invite label
    pub display_name: String,
    /// Loaded avatar (None renders the placeholder)
    pub avatar: Option<Avatar>,
    /// Whether a member occupies the slot
    pub occupied: bool,
    /// Whether the slot shows the local member
    pub is_local: bool,
}

impl Slot {
    fn invite(label: &str) -> Self {
        Self {
            member: None,
            display_name: label.to_string(),
            avatar: None,
            occupied: false,
            is_local: false,
        }
    }
}

/// Avatar image or placeholder for a rendered slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotAvatar {
    /// Fetched avatar
    Loaded(Avatar),
    /// Not loaded yet, or an invite slot
    Placeholder,
}

/// UI-facing view of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    /// Slot index
    pub index: usize,
    /// Whether a member occupies the slot
    pub occupied: bool,
    /// Member name or invite label
    pub display_name: String,
    /// Avatar or placeholder
    pub avatar: SlotAvatar,
    /// Invite slots are clickable, member slots are not
    pub interactable: bool,
    /// Whether the slot shows the local member
    pub is_local: bool,
}

/// Avatar fetch issued by a roster refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarRequest {
    /// Refresh generation that issued the request
    pub generation: u64,
    /// Slot the member occupied in that refresh
    pub slot: usize,
    /// Member whose avatar is fetched
    pub member: MemberId,
}

/// Ordered, fixed-size collection of slots
///
/// Slot 0 always shows the local member. The remaining members are placed by
/// member id so that the layout does not depend on backend enumeration order.
#[derive(Debug, Clone)]
pub struct Roster {
    slots: Vec<Slot>,
    generation: u64,
    invite_label: String,
}

impl Roster {
    /// Create a roster of `max_players` invite slots
    pub fn new(max_players: usize, invite_label: impl Into<String>) -> Self {
        let invite_label = invite_label.into();
        Self {
            slots: (0..max_players).map(|_| Slot::invite(&invite_label)).collect(),
            generation: 0,
            invite_label,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current refresh generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Raw slots
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Number of occupied slots
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }

    /// Index of the slot showing `member`
    pub fn slot_of(&self, member: &MemberId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.member.as_ref() == Some(member))
    }

    /// Show only the local member (no lobby)
    pub fn reset(
        &mut self,
        local: &MemberId,
        name_of: impl Fn(&MemberId) -> String,
        cache: &mut AvatarCache,
    ) -> Vec<AvatarRequest> {
        self.refresh(local, &[], name_of, cache)
    }

    /// Rebuild slots from the backend's member enumeration
    ///
    /// Starts a new generation and returns the avatar fetches to issue for
    /// members that are neither cached nor already being fetched.
    pub fn refresh(
        &mut self,
        local: &MemberId,
        members: &[MemberId],
        name_of: impl Fn(&MemberId) -> String,
        cache: &mut AvatarCache,
    ) -> Vec<AvatarRequest> {
        self.generation += 1;

        let mut others: Vec<&MemberId> = members.iter().filter(|m| *m != local).collect();
        others.sort();
        others.dedup();

        let mut ordered = Vec::with_capacity(others.len() + 1);
        ordered.push(local);
        ordered.extend(others);

        if ordered.len() > self.slots.len() {
            tracing::debug!(
                "Roster has {} slots for {} members, hiding {}",
                self.slots.len(),
                ordered.len(),
                ordered.len() - self.slots.len()
            );
        }

        let mut requests = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(member) = ordered.get(index) else {
                *slot = Slot::invite(&self.invite_label);
                continue;
            };
            let avatar = cache.get(member).cloned();
            if avatar.is_none() && cache.begin_fetch(member) {
                requests.push(AvatarRequest {
                    generation: self.generation,
                    slot: index,
                    member: (*member).clone(),
                });
            }
            *slot = Slot {
                member: Some((*member).clone()),
                display_name: name_of(member),
                avatar,
                occupied: true,
                is_local: index == 0,
            };
        }
        requests
    }

    /// Apply a resolved avatar fetch
    ///
    /// A result from the current generation lands in the slot it was requested
    /// for. A stale result never touches that slot; instead, any slot of the
    /// current generation showing the member with a placeholder is filled from
    /// the cache. Returns whether a slot changed.
    pub fn apply_avatar(&mut self, request: &AvatarRequest, cache: &AvatarCache) -> bool {
        let Some(avatar) = cache.get(&request.member) else {
            return false;
        };

        if request.generation == self.generation {
            if let Some(slot) = self.slots.get_mut(request.slot) {
                if slot.member.as_ref() == Some(&request.member) {
                    slot.avatar = Some(avatar.clone());
                    return true;
                }
            }
            return false;
        }

        tracing::debug!(
            "Discarding stale avatar result for '{}' (generation {} < {})",
            request.member,
            request.generation,
            self.generation
        );
        let mut changed = false;
        for slot in &mut self.slots {
            if slot.member.as_ref() == Some(&request.member) && slot.avatar.is_none() {
                slot.avatar = Some(avatar.clone());
                changed = true;
            }
        }
        changed
    }

    /// UI-facing view of every slot
    pub fn views(&self) -> Vec<SlotView> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| SlotView {
                index,
                occupied: slot.occupied,
                display_name: slot.display_name.clone(),
                avatar: match &slot.avatar {
                    Some(avatar) => SlotAvatar::Loaded(avatar.clone()),
                    None => SlotAvatar::Placeholder,
                },
                interactable: !slot.occupied,
                is_local: slot.is_local,
            })
            .collect()
    }
}
