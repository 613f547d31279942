//! Hashing and signing capabilities.
//!
//! The exchange engine never calls a digest or signature primitive
//! directly: every component that needs one receives a [`Hasher`] or
//! [`Signer`] at construction. Algorithms are selected by name, because the
//! names travel inside descriptors and signed envelopes (`piece hash algo`,
//! `infosig algo`) and a remote peer must be able to reproduce the exact
//! computation.
//!
//! [`StdHasher`] and [`Ed25519Signer`] are the stock implementations;
//! embedders with their own primitives implement the traits instead.

mod hash;
mod sign;

use std::sync::Arc;

use thiserror::Error;

pub use hash::{Hasher, StdHasher};
pub use sign::{Ed25519Signer, KeyPair, Signer};

/// Errors from hashing and signing capabilities.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("malformed signature")]
    MalformedSignature,
}

/// The capability bundle handed to each torrent session.
///
/// Explicit constructor composition replaces any global registry: the
/// assembly site builds one of these and threads it through the object
/// graph.
#[derive(Clone)]
pub struct Capabilities {
    pub hasher: Arc<dyn Hasher>,
    pub signer: Arc<dyn Signer>,
}

impl Capabilities {
    pub fn new(hasher: Arc<dyn Hasher>, signer: Arc<dyn Signer>) -> Self {
        Self { hasher, signer }
    }
}
