//! Per-torrent piece storage.
//!
//! A [`PieceStore`] is pure bookkeeping: which pieces are held, and their
//! bytes. It never hashes and never touches the network; verification
//! happens in the orchestrator before anything reaches `put`, so the store
//! only ever holds validated data.
//!
//! One store is owned by exactly one torrent. The coordinator reads it to
//! serve remote requests and to build the local bitfield, so the shared
//! form is [`SharedPieceStore`], a `parking_lot::RwLock` behind an `Arc`.

mod piece_store;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

pub use piece_store::PieceStore;

/// A piece store shared between its owning torrent (writes) and the peer
/// coordinator (reads).
pub type SharedPieceStore = Arc<RwLock<PieceStore>>;

/// Errors from piece store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested piece is not held.
    #[error("piece {0} not available")]
    NotAvailable(u32),

    /// An empty buffer was offered; a held piece always has bytes.
    #[error("piece {0} is empty")]
    EmptyPiece(u32),

    /// The index is outside the torrent's piece range.
    #[error("piece index {index} out of bounds (piece count {count})")]
    OutOfBounds { index: u32, count: usize },
}
