//! Room registry: which live sessions belong to which room.
//!
//! Rooms exist only while they have members. The first `join` creates the
//! room and the `leave` that empties it removes the entry again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use super::fanout::DeliveryError;

/// An encoded outbound frame, shared by every recipient of one broadcast.
pub type OutboundText = Arc<str>;

/// The registry's view of a session: its id and its outbound queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    outbound: mpsc::Sender<OutboundText>,
}

impl SessionHandle {
    pub fn new(session_id: String, outbound: mpsc::Sender<OutboundText>) -> Self {
        Self {
            session_id,
            outbound,
        }
    }

    /// Queue a frame without waiting. Fails if the session is gone or its
    /// queue is full.
    pub fn push(&self, frame: OutboundText) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Lagging,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

/// Issues message timestamps for one room.
///
/// Holding the lock is a room's turn to persist and broadcast, so history
/// order and delivery order agree. Stamps never go backwards within a room.
///
/// The clock goes away with the room. A fresh clock knows nothing of earlier
/// occupancies until it is raised to the room's newest stored timestamp.
#[derive(Debug, Default)]
pub struct RoomClock {
    last: Option<DateTime<Utc>>,
}

impl RoomClock {
    /// Whether no stamp or floor has been recorded yet.
    pub fn is_fresh(&self) -> bool {
        self.last.is_none()
    }

    /// Never stamp earlier than `floor` from now on.
    pub fn raise_floor(&mut self, floor: DateTime<Utc>) {
        let floor = floor.trunc_subsecs(6);
        self.last = match self.last {
            Some(last) if last >= floor => Some(last),
            _ => Some(floor),
        };
    }

    /// Current time at microsecond precision, clamped to the previous stamp.
    pub fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let at = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last = Some(at);
        at
    }
}

#[derive(Default)]
struct Room {
    members: HashMap<String, SessionHandle>,
    clock: Arc<Mutex<RoomClock>>,
}

/// Shared registry of all chat rooms.
///
/// `DashMap` gives shard-level locking, so joins and leaves on different
/// rooms rarely contend; every operation on one room is atomic.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a room, creating the room if needed.
    pub fn join(&self, room_id: &str, session: SessionHandle) {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .members
            .insert(session.session_id.clone(), session);
    }

    /// Remove a session from a room and drop the room once it is empty.
    ///
    /// Unknown rooms or sessions are a no-op. Returns whether a member was
    /// actually removed.
    pub fn leave(&self, room_id: &str, session_id: &str) -> bool {
        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut room) => {
                let removed = room.get_mut().members.remove(session_id).is_some();
                if room.get().members.is_empty() {
                    room.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Point-in-time snapshot of a room's members. Empty for unknown rooms.
    pub fn members_of(&self, room_id: &str) -> Vec<SessionHandle> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The ordering clock for a room.
    ///
    /// A room without members gets a detached clock; nobody could observe
    /// its broadcasts anyway.
    pub fn clock(&self, room_id: &str) -> Arc<Mutex<RoomClock>> {
        self.rooms
            .get(room_id)
            .map(|room| room.clock.clone())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    /// Number of rooms currently held in memory.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
