//! Peer coordination for one torrent.
//!
//! A [`Swarm`] owns every peer connection of a torrent: it feeds discovery
//! results into new connections, schedules piece requests against the
//! remote bitfields, serves inbound piece and metadata requests from the
//! shared store, runs the requester side of the metadata bootstrap, and
//! multiplexes everything into a single [`SwarmEvent`] stream for the
//! orchestrator.
//!
//! All coordination state lives in one task; per-connection driver tasks
//! only move frames. Failures on one connection never touch its siblings:
//! they surface as that peer's disconnect and a retry elsewhere.

mod coordinator;
mod discovery;

use thiserror::Error;

pub use coordinator::{Swarm, SwarmConfig, SwarmEvent, SwarmMetainfo};
pub use discovery::{Discovery, PeerIo, PeerStream, StaticDiscovery};

/// Errors surfaced by swarm operations.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// No connected peer advertises the requested piece. Nothing was sent;
    /// the caller may retry when availability changes.
    #[error("no peer available for piece {0}")]
    NoPeerAvailable(u32),

    /// The coordinator task has shut down.
    #[error("swarm stopped")]
    Stopped,
}
