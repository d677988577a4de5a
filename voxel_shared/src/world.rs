//! Chunked world store.
//!
//! Each room owns a sparse grid of 16x16 (X by Z, unbounded Y) chunks and each
//! chunk a sparse map of block records. Removing the last block of a chunk
//! drops the chunk; dropping the last chunk of a room drops the room. Nothing
//! with `id <= 0` is ever stored.
//!
//! The persisted form is [`WorldDocument`]:
//!
//! ```json
//! { "rooms": { "ABC": { "0,0": [ { "x": 1, "y": 2, "z": 3, "id": 5 } ] } } }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::RoomKey;

/// Chunk edge length along X and Z.
pub const CHUNK_SIZE: i32 = 16;

/// Block type used to mean "empty"; anything at or below it removes.
pub const AIR: i32 = 0;

/// Converts a validated finite wire number to a block/chunk coordinate.
///
/// Floors toward negative infinity; values outside `i32` saturate.
pub fn coord_from_f64(v: f64) -> i32 {
    v.floor() as i32
}

/// One placed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Block {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub id: i32,
}

/// Horizontal chunk coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub cx: i32,
    pub cz: i32,
}

impl ChunkKey {
    pub fn new(cx: i32, cz: i32) -> Self {
        ChunkKey { cx, cz }
    }

    /// Chunk holding block column `(x, z)`.
    pub fn containing(x: i32, z: i32) -> Self {
        ChunkKey {
            cx: x.div_euclid(CHUNK_SIZE),
            cz: z.div_euclid(CHUNK_SIZE),
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.cx, self.cz)
    }
}

type BlockPos = (i32, i32, i32);
type Chunk = HashMap<BlockPos, i32>;
type ChunkMap = HashMap<ChunkKey, Chunk>;

/// Serialized world: room key -> `"cx,cz"` -> blocks.
///
/// Maps are ordered and block lists sorted, so equal worlds encode to equal bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldDocument {
    #[serde(default)]
    pub rooms: BTreeMap<String, BTreeMap<String, Vec<Block>>>,
}

/// Outcome of [`WorldStore::hydrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrateReport {
    /// Blocks accepted into the store.
    pub loaded: usize,
    /// Entries skipped as malformed or empty.
    pub dropped: usize,
}

/// Per-room chunked block storage.
#[derive(Debug, Default)]
pub struct WorldStore {
    rooms: HashMap<RoomKey, ChunkMap>,
}

impl WorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places or removes one block. `id <= 0` removes whatever is at the coordinate.
    ///
    /// Returns whether the stored state changed.
    pub fn set_block(&mut self, room: &RoomKey, x: i32, y: i32, z: i32, id: i32) -> bool {
        let key = ChunkKey::containing(x, z);
        if id <= AIR {
            return self.remove_block(room, key, (x, y, z));
        }

        let chunk = self
            .rooms
            .entry(room.clone())
            .or_default()
            .entry(key)
            .or_default();
        chunk.insert((x, y, z), id) != Some(id)
    }

    fn remove_block(&mut self, room: &RoomKey, key: ChunkKey, pos: BlockPos) -> bool {
        let Some(chunks) = self.rooms.get_mut(room) else {
            return false;
        };
        let Some(chunk) = chunks.get_mut(&key) else {
            return false;
        };
        let removed = chunk.remove(&pos).is_some();

        if chunk.is_empty() {
            chunks.remove(&key);
        }
        if chunks.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    /// Block type at a coordinate, if any.
    pub fn block_at(&self, room: &RoomKey, x: i32, y: i32, z: i32) -> Option<i32> {
        self.rooms
            .get(room)?
            .get(&ChunkKey::containing(x, z))?
            .get(&(x, y, z))
            .copied()
    }

    /// All blocks in one chunk, sorted. Unknown rooms and chunks yield an empty list.
    pub fn chunk_blocks(&self, room: &RoomKey, key: ChunkKey) -> Vec<Block> {
        let mut blocks: Vec<Block> = self
            .rooms
            .get(room)
            .and_then(|chunks| chunks.get(&key))
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|(&(x, y, z), &id)| Block { x, y, z, id })
                    .collect()
            })
            .unwrap_or_default();
        blocks.sort_unstable();
        blocks
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn chunk_count(&self, room: &RoomKey) -> usize {
        self.rooms.get(room).map_or(0, |chunks| chunks.len())
    }

    pub fn block_count(&self) -> usize {
        self.rooms
            .values()
            .flat_map(|chunks| chunks.values())
            .map(|chunk| chunk.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Sparse snapshot of the whole world.
    pub fn to_document(&self) -> WorldDocument {
        let mut rooms = BTreeMap::new();
        for (room, chunks) in &self.rooms {
            let mut encoded = BTreeMap::new();
            for key in chunks.keys() {
                encoded.insert(key.to_string(), self.chunk_blocks(room, *key));
            }
            rooms.insert(room.as_str().to_string(), encoded);
        }
        WorldDocument { rooms }
    }

    /// Builds a store from an untrusted persisted document.
    ///
    /// Each block must carry finite numeric `x`, `y`, `z` and `id`; anything else,
    /// and any `id <= 0`, is dropped without failing the load. Blocks are re-keyed
    /// by their own coordinates rather than the chunk key they were filed under.
    pub fn hydrate(doc: &Value) -> (Self, HydrateReport) {
        let mut store = Self::new();
        let mut report = HydrateReport::default();

        let Some(rooms) = doc.get("rooms").and_then(Value::as_object) else {
            return (store, report);
        };

        for (room, chunks) in rooms {
            let room = RoomKey::normalize_str(room);
            let Some(chunks) = chunks.as_object() else {
                report.dropped += 1;
                continue;
            };
            for blocks in chunks.values() {
                let Some(blocks) = blocks.as_array() else {
                    report.dropped += 1;
                    continue;
                };
                for entry in blocks {
                    match parse_block(entry) {
                        Some(b) => {
                            store.set_block(&room, b.x, b.y, b.z, b.id);
                            report.loaded += 1;
                        }
                        None => report.dropped += 1,
                    }
                }
            }
        }

        (store, report)
    }

    /// Typed variant of [`WorldStore::hydrate`].
    pub fn from_document(doc: &WorldDocument) -> Self {
        let mut store = Self::new();
        for (room, chunks) in &doc.rooms {
            let room = RoomKey::normalize_str(room);
            for b in chunks.values().flatten() {
                store.set_block(&room, b.x, b.y, b.z, b.id);
            }
        }
        store
    }
}

fn finite_field(entry: &Value, key: &str) -> Option<f64> {
    entry.get(key)?.as_f64().filter(|v| v.is_finite())
}

fn parse_block(entry: &Value) -> Option<Block> {
    let block = Block {
        x: coord_from_f64(finite_field(entry, "x")?),
        y: coord_from_f64(finite_field(entry, "y")?),
        z: coord_from_f64(finite_field(entry, "z")?),
        id: coord_from_f64(finite_field(entry, "id")?),
    };
    (block.id > AIR).then_some(block)
}
