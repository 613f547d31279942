//! Per-torrent orchestration.
//!
//! A [`Torrent`] is the top-level state machine for one content set. It
//! owns the identity question (hash- or signature-addressed), the piece
//! store, and piece verification; the swarm below it owns the wire. The
//! consumer side is a [`ContentStream`]: a lazy, consumed-once sequence of
//! verified pieces tagged with their index and byte offset, closed when
//! the content is complete.
//!
//! Re-pointing a signature-addressed torrent at new content is not an
//! in-place mutation: a new `Torrent` is created for the new descriptor
//! and the old one is stopped and discarded.

mod session;

use thiserror::Error;

pub use session::{ContentPiece, ContentStream, Torrent, TorrentState};

use crate::crypto::CryptoError;
use crate::metainfo::MetainfoError;
use crate::store::StoreError;
use crate::swarm::SwarmError;

/// Errors from torrent assembly and seeding.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("swarm error: {0}")]
    Swarm(#[from] SwarmError),

    /// Supplied content does not match the descriptor's digests.
    #[error("piece {index} failed verification")]
    Integrity { index: u32 },

    /// Supplied content has the wrong number of pieces.
    #[error("expected {expected} pieces, got {got}")]
    PieceCountMismatch { expected: usize, got: usize },
}

#[cfg(test)]
mod tests;
