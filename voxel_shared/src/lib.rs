//! `voxel_shared`
//!
//! Libraries used by both the relay server and its clients.
//!
//! Design goals:
//! - Wire types are validated once, at the edge, and typed everywhere after.
//! - The world store is plain data with no I/O; persistence lives in the server.
//! - Deterministic output where it is observable (persisted documents, snapshots).
//! - No `unsafe`.

pub mod config;
pub mod protocol;
pub mod room;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::protocol::*;
    pub use crate::room::*;
    pub use crate::world::*;
}
