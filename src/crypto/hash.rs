use bytes::Bytes;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::CryptoError;

/// A named-algorithm digest capability.
///
/// The algorithm name is data, not configuration: descriptors carry it so
/// any peer can recompute piece digests and the infohash byte-for-byte.
pub trait Hasher: Send + Sync {
    /// Computes the digest of `data` under the named algorithm.
    fn digest(&self, algo: &str, data: &[u8]) -> Result<Bytes, CryptoError>;
}

/// Stock hasher backed by the `sha1`/`sha2` crates.
///
/// Knows `"sha1"` (20-byte digests) and `"sha256"` (32-byte digests).
pub struct StdHasher;

impl Hasher for StdHasher {
    fn digest(&self, algo: &str, data: &[u8]) -> Result<Bytes, CryptoError> {
        match algo {
            "sha1" => {
                let mut hasher = Sha1::new();
                hasher.update(data);
                Ok(Bytes::copy_from_slice(&hasher.finalize()))
            }
            "sha256" => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                Ok(Bytes::copy_from_slice(&hasher.finalize()))
            }
            other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
        }
    }
}
