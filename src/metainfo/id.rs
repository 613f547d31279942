use std::fmt;

use bytes::Bytes;

use super::error::MetainfoError;

/// The identifier a torrent is discovered and handshaken under.
///
/// Either the content hash of a descriptor (immutable addressing) or a
/// public-key signature over that hash (mutable addressing: the key holder
/// can sign a new descriptor later and re-point the identity).
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TorrentId {
    /// Infohash bytes; names exactly one descriptor.
    Hash(Bytes),
    /// Infosig bytes; names whatever the signing key currently endorses.
    Signature(Bytes),
}

impl TorrentId {
    /// The raw identifier bytes, used as the discovery topic and carried
    /// in the connection handshake.
    pub fn topic(&self) -> &Bytes {
        match self {
            TorrentId::Hash(b) | TorrentId::Signature(b) => b,
        }
    }

    /// True for the signature (mutable) form.
    pub fn is_signature(&self) -> bool {
        matches!(self, TorrentId::Signature(_))
    }

    /// Parses a hash identifier from hex.
    pub fn hash_from_hex(s: &str) -> Result<Self, MetainfoError> {
        hex_decode(s)
            .map(|b| TorrentId::Hash(Bytes::from(b)))
            .ok_or_else(|| MetainfoError::InvalidLink("invalid hash hex".into()))
    }

    /// Parses a signature identifier from hex.
    pub fn signature_from_hex(s: &str) -> Result<Self, MetainfoError> {
        hex_decode(s)
            .map(|b| TorrentId::Signature(Bytes::from(b)))
            .ok_or_else(|| MetainfoError::InvalidLink("invalid signature hex".into()))
    }

    /// Hex form of the identifier bytes.
    pub fn to_hex(&self) -> String {
        hex_encode(self.topic())
    }
}

impl fmt::Debug for TorrentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentId::Hash(_) => write!(f, "TorrentId::Hash({})", self.to_hex()),
            TorrentId::Signature(_) => write!(f, "TorrentId::Signature({})", self.to_hex()),
        }
    }
}

impl fmt::Display for TorrentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentId::Hash(_) => write!(f, "hash:{}", self.to_hex()),
            TorrentId::Signature(_) => write!(f, "sig:{}", self.to_hex()),
        }
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

pub(crate) fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || s.is_empty() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
