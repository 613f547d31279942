use thiserror::Error;

use crate::bencode::BencodeError;
use crate::crypto::CryptoError;

/// Errors from descriptor and handle construction, encoding, and
/// verification.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The envelope or descriptor is not valid canonical encoding.
    #[error("encoding error: {0}")]
    Bencode(#[from] BencodeError),

    /// A hashing or signing capability failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field has the wrong shape or an inconsistent value.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The recomputed content hash does not match the declared or expected
    /// one. The descriptor must not be used.
    #[error("content hash mismatch")]
    HashMismatch,

    /// The declared signature does not verify over the content hash.
    #[error("content signature invalid")]
    SignatureInvalid,

    /// The envelope's identity form does not match the identifier it was
    /// validated against (e.g. an unsigned envelope for a signature
    /// identifier).
    #[error("identifier mismatch")]
    IdentifierMismatch,

    /// A link is malformed.
    #[error("invalid content link: {0}")]
    InvalidLink(String),
}
