//! Message dispatcher.
//!
//! Owns every piece of mutable relay state and applies inbound messages to it
//! strictly one at a time. Per connection the protocol is:
//!
//! ```text
//! Connected (member of GLOBAL) --JOIN--> Joined(R) --JOIN--> Joined(R') ... --close--> Closed
//! ```
//!
//! Invalid frames are dropped without a reply.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};
use voxel_shared::{
    protocol::{ClientMsg, PeerId, ServerMsg, StateUpdate},
    room::RoomKey,
    world::{Block, ChunkKey, WorldStore},
};

use crate::{
    peers::{Outbox, PeerRegistry},
    persist::Debounce,
    rooms::RoomMultiplexer,
};

pub struct Dispatcher {
    peers: PeerRegistry,
    rooms: RoomMultiplexer,
    world: WorldStore,
    persist: Debounce,
}

impl Dispatcher {
    pub fn new(world: WorldStore, persist_delay: Duration) -> Self {
        Self {
            peers: PeerRegistry::new(),
            rooms: RoomMultiplexer::new(),
            world,
            persist: Debounce::new(persist_delay),
        }
    }

    /// Registers a new connection; it starts out in `GLOBAL`.
    pub fn connect(&mut self, outbox: Outbox) -> PeerId {
        let id = self.peers.register(outbox);
        self.rooms.enter(&self.peers, id);
        info!(peer = %id, peers = self.peers.len(), "Peer connected");
        id
    }

    /// Parses one raw frame and applies it.
    pub fn handle_text(&mut self, id: PeerId, text: &str) {
        match ClientMsg::parse(text) {
            Some(msg) => self.handle(id, msg),
            None => debug!(peer = %id, len = text.len(), "Dropping invalid frame"),
        }
    }

    pub fn handle(&mut self, id: PeerId, msg: ClientMsg) {
        if self.peers.get(id).is_none() {
            debug!(peer = %id, "Message from unknown peer");
            return;
        }
        match msg {
            ClientMsg::Join { room, name, skin } => {
                self.on_join(id, room, name.as_deref(), skin.as_deref())
            }
            ClientMsg::Chat { text } => self.on_chat(id, text),
            ClientMsg::Block(block) => self.on_block(id, block),
            ClientMsg::ChunkRequest { cx, cz } => self.on_chunk_request(id, ChunkKey::new(cx, cz)),
            ClientMsg::PlayerState(update) => self.on_player_state(id, &update),
        }
    }

    fn on_join(&mut self, id: PeerId, room: RoomKey, name: Option<&str>, skin: Option<&str>) {
        self.peers.update_identity(id, name, skin);
        let was_joined = self.peers.mark_joined(id);
        let Some(previous) = self.rooms.join(&mut self.peers, id, room.clone()) else {
            return;
        };
        let Some(peer) = self.peers.get(id) else {
            return;
        };
        let (name, skin) = (peer.name.clone(), peer.skin.clone());
        info!(peer = %id, name = %name, room = %room, "Peer joined room");

        if was_joined && previous != room {
            self.announce_leave(&previous, id, &name);
        }

        self.peers.send(
            id,
            &ServerMsg::System {
                text: format!("Joined room {room}"),
            },
        );
        self.peers.send(
            id,
            &ServerMsg::RoomSnapshot {
                peers: self.rooms.snapshot(&self.peers, &room, id),
            },
        );
        self.peers.send(id, &ServerMsg::Welcome { id });

        self.rooms.broadcast(
            &self.peers,
            &room,
            &ServerMsg::PlayerJoin {
                id,
                name: name.clone(),
                skin,
            },
            Some(id),
        );
        self.rooms.broadcast(
            &self.peers,
            &room,
            &ServerMsg::System {
                text: format!("{name} joined"),
            },
            Some(id),
        );
    }

    fn on_chat(&mut self, id: PeerId, text: String) {
        let Some(peer) = self.peers.get(id) else {
            return;
        };
        let msg = ServerMsg::Chat {
            name: peer.name.clone(),
            text,
        };
        self.rooms.broadcast(&self.peers, &peer.room, &msg, None);
    }

    fn on_block(&mut self, id: PeerId, block: Block) {
        let Some(room) = self.peers.get(id).map(|p| p.room.clone()) else {
            return;
        };
        self.world.set_block(&room, block.x, block.y, block.z, block.id);
        self.persist.schedule(Instant::now());
        self.rooms
            .broadcast(&self.peers, &room, &ServerMsg::Block(block), Some(id));
    }

    fn on_chunk_request(&mut self, id: PeerId, key: ChunkKey) {
        let Some(peer) = self.peers.get(id) else {
            return;
        };
        let blocks = self.world.chunk_blocks(&peer.room, key);
        self.peers.send(
            id,
            &ServerMsg::ChunkData {
                cx: key.cx,
                cz: key.cz,
                blocks,
            },
        );
    }

    fn on_player_state(&mut self, id: PeerId, update: &StateUpdate) {
        if !self.peers.update_state(id, update) {
            debug!(peer = %id, "Dropping non-finite player state");
            return;
        }
        let Some(peer) = self.peers.get(id) else {
            return;
        };
        self.rooms.broadcast(
            &self.peers,
            &peer.room,
            &ServerMsg::PlayerState(peer.summary()),
            Some(id),
        );
    }

    /// Tears down a closed connection and tells its room.
    pub fn disconnect(&mut self, id: PeerId) {
        let Some(peer) = self.peers.unregister(id) else {
            return;
        };
        self.rooms.remove(&peer.room, id);
        if peer.joined {
            self.announce_leave(&peer.room, id, &peer.name);
        }
        info!(peer = %id, room = %peer.room, peers = self.peers.len(), "Peer disconnected");
    }

    fn announce_leave(&self, room: &RoomKey, id: PeerId, name: &str) {
        self.rooms
            .broadcast(&self.peers, room, &ServerMsg::PlayerLeave { id }, Some(id));
        self.rooms.broadcast(
            &self.peers,
            room,
            &ServerMsg::System {
                text: format!("{name} left"),
            },
            Some(id),
        );
    }

    pub fn persist_deadline(&self) -> Option<Instant> {
        self.persist.deadline()
    }

    /// True once per elapsed debounce window.
    pub fn take_due_persist(&mut self, now: Instant) -> bool {
        self.persist.take_due(now)
    }

    /// Re-arms the debounce when a due write could not start yet.
    pub fn defer_persist(&mut self, now: Instant) {
        self.persist.schedule(now);
    }

    /// Drops any pending debounced write; used when a full flush supersedes it.
    pub fn cancel_persist(&mut self) {
        self.persist.cancel();
    }

    pub fn world(&self) -> &WorldStore {
        &self.world
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn rooms(&self) -> &RoomMultiplexer {
        &self.rooms
    }
}
