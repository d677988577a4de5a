//! `voxel_server`
//!
//! Server-side systems:
//! - Peer registry (identity + last known player state per connection)
//! - Room multiplexer (membership sets, selective broadcast)
//! - Persistence gateway (debounced, atomic world writes; startup hydration)
//! - Message dispatcher (validates inbound frames, mutates state, replies)
//!
//! Networking model:
//! - WebSocket, one JSON object per text frame
//! - All state mutated by a single event loop, in arrival order

pub mod dispatch;
pub mod peers;
pub mod persist;
pub mod rooms;
pub mod server;

pub use server::RelayServer;
