//! Peer registry.
//!
//! One entry per open connection: identity, current room, last accepted
//! player state and the outbound queue used to reach it. Entries change only
//! in response to messages from their own connection and vanish on disconnect.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;
use voxel_shared::{
    protocol::{
        encode_frame, sanitize_name, sanitize_skin, Frame, PeerId, PeerSummary, PlayerState,
        ServerMsg, StateUpdate, DEFAULT_NAME,
    },
    room::RoomKey,
};

/// Outbound frame queue of one connection.
pub type Outbox = mpsc::Sender<Frame>;

/// A connected client.
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub skin: String,
    /// Kept in step with the room multiplexer's membership sets.
    pub room: RoomKey,
    pub state: PlayerState,
    /// Set by the first JOIN; before that the peer sits silently in `GLOBAL`.
    pub joined: bool,
    outbox: Outbox,
}

impl Peer {
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id,
            name: self.name.clone(),
            skin: self.skin.clone(),
            state: self.state,
        }
    }

    /// Queues a frame without waiting. A full or closed queue counts as not
    /// writable and the frame is skipped.
    pub fn try_send(&self, frame: &Frame) -> bool {
        match self.outbox.try_send(frame.clone()) {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %self.id, error = %e, "Skipping frame for unwritable peer");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
    next_id: u64,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self {
            peers: HashMap::new(),
            next_id: 1,
        }
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer with a fresh id, default identity and state, in `GLOBAL`.
    pub fn register(&mut self, outbox: Outbox) -> PeerId {
        let id = PeerId(self.next_id);
        self.next_id += 1;
        self.peers.insert(
            id,
            Peer {
                id,
                name: DEFAULT_NAME.to_string(),
                skin: String::new(),
                room: RoomKey::global(),
                state: PlayerState::default(),
                joined: false,
                outbox,
            },
        );
        id
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Applies JOIN identity fields; absent values fall back to defaults.
    pub fn update_identity(&mut self, id: PeerId, name: Option<&str>, skin: Option<&str>) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        peer.name = sanitize_name(name);
        peer.skin = sanitize_skin(skin);
        true
    }

    /// Replaces the peer's state wholesale if the update is acceptable.
    pub fn update_state(&mut self, id: PeerId, update: &StateUpdate) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        match PlayerState::from_update(update) {
            Some(state) => {
                peer.state = state;
                true
            }
            None => false,
        }
    }

    /// Records that the peer has sent a JOIN; returns whether it had before.
    pub(crate) fn mark_joined(&mut self, id: PeerId) -> bool {
        self.peers
            .get_mut(&id)
            .is_some_and(|peer| std::mem::replace(&mut peer.joined, true))
    }

    pub(crate) fn set_room(&mut self, id: PeerId, room: RoomKey) -> Option<RoomKey> {
        self.peers
            .get_mut(&id)
            .map(|peer| std::mem::replace(&mut peer.room, room))
    }

    /// Sends one message to one peer.
    pub fn send(&self, id: PeerId, msg: &ServerMsg) -> bool {
        let Some(peer) = self.peers.get(&id) else {
            return false;
        };
        match encode_frame(msg) {
            Ok(frame) => peer.try_send(&frame),
            Err(e) => {
                debug!(peer = %id, error = %e, "Failed to encode reply");
                false
            }
        }
    }

    pub fn unregister(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
