//! Session code to room membership.
//!
//! Plain data structure with no I/O and no locking; the relay decides how
//! access is serialized.

use std::collections::HashMap;
use std::fmt;

use handoff_protocol::{SessionCode, SessionErrorKind};

/// Maximum members in one room.
pub const ROOM_CAPACITY: usize = 2;

/// Identifies one relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(uuid::Uuid);

impl MemberId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Occupancy of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Empty,
    Waiting,
    Full,
}

/// A room bound to one session code.
#[derive(Debug, Clone)]
pub struct Room {
    members: Vec<MemberId>,
}

impl Room {
    fn with_creator(creator: MemberId) -> Self {
        Self {
            members: vec![creator],
        }
    }

    pub fn state(&self) -> RoomState {
        match self.members.len() {
            0 => RoomState::Empty,
            n if n < ROOM_CAPACITY => RoomState::Waiting,
            _ => RoomState::Full,
        }
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    /// Returns the member other than `member`, if present.
    pub fn peer_of(&self, member: MemberId) -> Option<MemberId> {
        self.members.iter().copied().find(|m| *m != member)
    }

    pub fn contains(&self, member: MemberId) -> bool {
        self.members.contains(&member)
    }
}

/// Registry-level failures, reported only to the requesting member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("session code {0} already exists")]
    CodeAlreadyExists(SessionCode),

    #[error("session {0} not found")]
    SessionNotFound(SessionCode),

    #[error("session {0} is full")]
    SessionFull(SessionCode),

    #[error("already in session {0}")]
    AlreadyInSession(SessionCode),

    #[error("not a member of session {0}")]
    NotInSession(SessionCode),

    #[error("no peer connected to session {0} yet")]
    NoPeer(SessionCode),
}

impl RegistryError {
    /// The wire-level error kind for this failure.
    pub fn kind(&self) -> SessionErrorKind {
        match self {
            Self::CodeAlreadyExists(_) => SessionErrorKind::CodeAlreadyExists,
            Self::SessionNotFound(_) => SessionErrorKind::SessionNotFound,
            Self::SessionFull(_) => SessionErrorKind::SessionFull,
            Self::AlreadyInSession(_) => SessionErrorKind::AlreadyInSession,
            Self::NotInSession(_) => SessionErrorKind::NotInSession,
            Self::NoPeer(_) => SessionErrorKind::NoPeer,
        }
    }
}

/// Result of removing a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub code: SessionCode,
    /// The member still in the room, who must be told about the departure.
    /// `None` when the room was destroyed.
    pub remaining: Option<MemberId>,
}

/// Owns every active room plus the reverse member-to-code index.
#[derive(Debug, Default)]
pub struct RendezvousRegistry {
    rooms: HashMap<SessionCode, Room>,
    membership: HashMap<MemberId, SessionCode>,
}

impl RendezvousRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new room for `code` with `member` as its only occupant.
    pub fn create(&mut self, code: SessionCode, member: MemberId) -> Result<(), RegistryError> {
        if let Some(current) = self.membership.get(&member) {
            return Err(RegistryError::AlreadyInSession(current.clone()));
        }
        if self.rooms.contains_key(&code) {
            return Err(RegistryError::CodeAlreadyExists(code));
        }
        self.rooms.insert(code.clone(), Room::with_creator(member));
        self.membership.insert(member, code);
        Ok(())
    }

    /// Adds `member` to the room for `code`.
    ///
    /// Returns the existing member, who is owed a `peer-joined`.
    pub fn join(&mut self, code: SessionCode, member: MemberId) -> Result<MemberId, RegistryError> {
        if let Some(current) = self.membership.get(&member) {
            return Err(RegistryError::AlreadyInSession(current.clone()));
        }
        let Some(room) = self.rooms.get_mut(&code) else {
            return Err(RegistryError::SessionNotFound(code));
        };
        if room.members.len() >= ROOM_CAPACITY {
            return Err(RegistryError::SessionFull(code));
        }
        // Empty rooms are removed eagerly, so a room always has a first member.
        let Some(existing) = room.members.first().copied() else {
            return Err(RegistryError::SessionNotFound(code));
        };
        room.members.push(member);
        self.membership.insert(member, code);
        Ok(existing)
    }

    /// Removes `member` from whatever room it occupies.
    ///
    /// Empty rooms are destroyed immediately, freeing the code. Returns
    /// `None` if the member was not in any room.
    pub fn leave(&mut self, member: MemberId) -> Option<Departure> {
        let code = self.membership.remove(&member)?;
        let room = self.rooms.get_mut(&code)?;
        room.members.retain(|m| *m != member);

        let remaining = room.members.first().copied();
        if remaining.is_none() {
            self.rooms.remove(&code);
        }
        Some(Departure { code, remaining })
    }

    /// Resolves the member a negotiation message from `from` should go to.
    pub fn peer_of(&self, code: &SessionCode, from: MemberId) -> Result<MemberId, RegistryError> {
        let room = self
            .rooms
            .get(code)
            .ok_or_else(|| RegistryError::SessionNotFound(code.clone()))?;
        if !room.contains(from) {
            return Err(RegistryError::NotInSession(code.clone()));
        }
        room.peer_of(from)
            .ok_or_else(|| RegistryError::NoPeer(code.clone()))
    }

    /// Returns the room for `code`.
    pub fn room(&self, code: &SessionCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    /// Returns the code `member` is bound to.
    pub fn code_of(&self, member: MemberId) -> Option<&SessionCode> {
        self.membership.get(&member)
    }

    /// Number of active rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
