//! Room multiplexer.
//!
//! Tracks which peers are in which room and fans messages out to them. A room
//! exists exactly as long as its membership set is non-empty.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;
use voxel_shared::{
    protocol::{encode_frame, PeerId, PeerSummary, ServerMsg},
    room::RoomKey,
};

use crate::peers::PeerRegistry;

#[derive(Debug, Default)]
pub struct RoomMultiplexer {
    rooms: HashMap<RoomKey, BTreeSet<PeerId>>,
}

impl RoomMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly registered peer to the room its registry entry names.
    pub fn enter(&mut self, peers: &PeerRegistry, id: PeerId) {
        if let Some(peer) = peers.get(id) {
            self.rooms.entry(peer.room.clone()).or_default().insert(id);
        }
    }

    /// Moves a peer into `room`, returning the room it was in before.
    pub fn join(&mut self, peers: &mut PeerRegistry, id: PeerId, room: RoomKey) -> Option<RoomKey> {
        let previous = peers.set_room(id, room.clone())?;
        self.remove(&previous, id);
        self.rooms.entry(room).or_default().insert(id);
        Some(previous)
    }

    /// Drops a peer from a room's membership, deleting the room if it empties.
    pub fn remove(&mut self, room: &RoomKey, id: PeerId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    /// Serializes `msg` once and queues it for every member except `exclude`.
    ///
    /// Returns how many peers accepted the frame.
    pub fn broadcast(
        &self,
        peers: &PeerRegistry,
        room: &RoomKey,
        msg: &ServerMsg,
        exclude: Option<PeerId>,
    ) -> usize {
        let Some(members) = self.rooms.get(room) else {
            return 0;
        };
        let frame = match encode_frame(msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room = %room, error = %e, "Failed to encode broadcast");
                return 0;
            }
        };

        members
            .iter()
            .filter(|&&id| Some(id) != exclude)
            .filter_map(|&id| peers.get(id))
            .filter(|peer| peer.try_send(&frame))
            .count()
    }

    /// Every member but `exclude`, with identity and last known state, ordered by id.
    pub fn snapshot(
        &self,
        peers: &PeerRegistry,
        room: &RoomKey,
        exclude: PeerId,
    ) -> Vec<PeerSummary> {
        self.members(room)
            .filter(|&id| id != exclude)
            .filter_map(|id| peers.get(id))
            .map(|peer| peer.summary())
            .collect()
    }

    pub fn members<'a>(&'a self, room: &RoomKey) -> impl Iterator<Item = PeerId> + 'a {
        self.rooms.get(room).into_iter().flatten().copied()
    }

    pub fn member_count(&self, room: &RoomKey) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    pub fn contains(&self, room: &RoomKey) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
