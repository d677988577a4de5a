//! `voxel_client`
//!
//! Client-side pieces of the relay protocol:
//! - WebSocket connection management
//! - Typed request helpers (join, chat, block edits, chunk requests, state)
//! - Minimal bookkeeping of assigned id and current room

pub mod client;

pub use client::{ClientState, JoinReply, RelayClient};
