use bytes::Bytes;

use super::PointerError;
use crate::crypto::{Hasher, Signer};

/// Digest algorithm for deriving a record key from a public key.
pub(crate) const KEY_ALGO: &str = "sha1";

/// A signed, sequence-numbered value in the distributed store.
///
/// Two records under the same key are ordered by `seq`; a consumer must
/// never accept a record whose `seq` does not exceed the last one it
/// delivered. The signature covers the canonical signing payload over
/// `(salt, seq, value)`, so the store can validate replacements without
/// any channel security.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableRecord {
    /// `hash(public_key)` under [`KEY_ALGO`].
    pub key: Bytes,
    /// The publisher's public key.
    pub public_key: Bytes,
    /// Optional namespace, letting one key hold several values.
    pub salt: Option<Bytes>,
    /// Monotonically increasing per key.
    pub seq: i64,
    /// The pointed-to value, opaque to this layer.
    pub value: Bytes,
    /// Detached signature over [`signing_payload`](Self::signing_payload).
    pub signature: Bytes,
}

impl MutableRecord {
    /// Derives the store key for a public key.
    pub fn derive_key(public_key: &[u8], hasher: &dyn Hasher) -> Result<Bytes, PointerError> {
        Ok(hasher.digest(KEY_ALGO, public_key)?)
    }

    /// The canonical byte sequence the signature covers:
    ///
    /// ```text
    /// [4:salt<len>:<salt>]3:seqi<seq>e1:v<len>:<value>
    /// ```
    ///
    /// The dictionary-entry framing makes the payload injective: no two
    /// distinct `(salt, seq, value)` triples serialize identically.
    pub fn signing_payload(value: &[u8], seq: i64, salt: Option<&[u8]>) -> Vec<u8> {
        let mut payload = Vec::with_capacity(value.len() + 32);
        if let Some(salt) = salt {
            payload.extend_from_slice(b"4:salt");
            payload.extend_from_slice(salt.len().to_string().as_bytes());
            payload.push(b':');
            payload.extend_from_slice(salt);
        }
        payload.extend_from_slice(b"3:seqi");
        payload.extend_from_slice(seq.to_string().as_bytes());
        payload.extend_from_slice(b"e1:v");
        payload.extend_from_slice(value.len().to_string().as_bytes());
        payload.push(b':');
        payload.extend_from_slice(value);
        payload
    }

    /// Checks the record's internal consistency: key derivation and
    /// signature.
    pub fn verify(&self, hasher: &dyn Hasher, signer: &dyn Signer) -> Result<bool, PointerError> {
        if Self::derive_key(&self.public_key, hasher)? != self.key {
            return Ok(false);
        }
        let payload = Self::signing_payload(&self.value, self.seq, self.salt.as_deref());
        Ok(signer.verify(&payload, &self.signature, &self.public_key)?)
    }
}
