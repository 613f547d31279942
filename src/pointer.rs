//! Signed mutable pointers over a distributed store.
//!
//! A publisher stores a small signed value, typically an infohash, under
//! a key derived from its public key. Each update carries a monotonically
//! increasing sequence number and a signature over the value and sequence,
//! so the store and every consumer can order updates and reject forgeries
//! without trusting each other. This is what lets a signature-addressed
//! torrent be re-pointed at new content while subscribers follow along.
//!
//! The distributed store itself is a capability ([`PointerStore`]): the
//! service only needs `put` and `get` plus the verify primitive.
//! [`MemoryPointerStore`] is the in-process implementation used by tests
//! and single-node setups.

mod record;
mod service;
mod store;

use thiserror::Error;

pub use record::MutableRecord;
pub use service::{PointerService, Subscription};
pub use store::{MemoryPointerStore, PointerStore};

/// Errors from the mutable pointer layer.
#[derive(Debug, Error)]
pub enum PointerError {
    /// No verifiable record exists under the key. Records that fail
    /// signature or key checks surface as this, never as data.
    #[error("no record found")]
    NotFound,

    /// The record's sequence number does not supersede the stored one.
    #[error("stale sequence: stored seq is {current}")]
    StaleSequence { current: i64 },

    /// The record is internally inconsistent (bad signature, key not
    /// derived from the public key).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A hashing or signing capability failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    /// The store substrate failed.
    #[error("store error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests;
