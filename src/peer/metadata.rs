//! Descriptor bootstrap over the `metadata` channel.
//!
//! A participant holding only an identifier retrieves the encoded handle
//! envelope from a peer that has it, reusing the piece/bitfield idiom one
//! level up: the holder splits its encoded envelope into fixed-size
//! chunks, the requester fetches them lowest-missing-first, reassembles,
//! and validates the result against the identifier before anything else
//! sees it.

use bytes::Bytes;

use super::error::PeerError;
use super::message::{arg_bytes, arg_u32};
use crate::bencode::{decode, encode, Value};

/// Size a holder chunks its encoded envelope at (16 KiB).
pub const METADATA_CHUNK_SIZE: u32 = 16384;

/// Upper bound on an announced envelope (1 MiB); anything larger is a
/// protocol violation, not a download.
const MAX_METADATA_SIZE: u64 = 1 << 20;

// Metadata-channel flags, disjoint from the exchange channel's 1..=5.
const FLAG_HAVE_METADATA: u32 = 10;
const FLAG_PIECE_BITFIELD: u32 = 11;
const FLAG_BITFIELD: u32 = 12;
const FLAG_FETCH: u32 = 13;
const FLAG_PIECE: u32 = 14;
const FLAG_RECEIVED: u32 = 15;
const FLAG_ERROR: u32 = 16;

/// A message on the `metadata` channel, as a `[flag, ...args]` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataMessage {
    /// Announces whether the sender holds a full descriptor envelope.
    HaveMetadata(bool),
    /// Asks the holder how its envelope is chunked.
    PieceBitfield,
    /// The holder's chunking parameters and possession map.
    Bitfield {
        bitfield: Bytes,
        piece_count: u32,
        piece_length: u32,
    },
    /// Requests chunk `index`.
    Fetch { index: u32 },
    /// Chunk payload.
    Piece { index: u32, data: Bytes },
    /// The requester reassembled and validated the envelope.
    ReceivedMetainfo,
    /// Protocol-level failure, either direction.
    Error(String),
}

impl MetadataMessage {
    pub fn encode(&self) -> Result<Bytes, PeerError> {
        let list = match self {
            MetadataMessage::HaveMetadata(have) => vec![
                Value::from(FLAG_HAVE_METADATA),
                Value::Integer(i64::from(*have)),
            ],
            MetadataMessage::PieceBitfield => vec![Value::from(FLAG_PIECE_BITFIELD)],
            MetadataMessage::Bitfield {
                bitfield,
                piece_count,
                piece_length,
            } => vec![
                Value::from(FLAG_BITFIELD),
                Value::Bytes(bitfield.clone()),
                Value::from(*piece_count),
                Value::from(*piece_length),
            ],
            MetadataMessage::Fetch { index } => {
                vec![Value::from(FLAG_FETCH), Value::from(*index)]
            }
            MetadataMessage::Piece { index, data } => vec![
                Value::from(FLAG_PIECE),
                Value::from(*index),
                Value::Bytes(data.clone()),
            ],
            MetadataMessage::ReceivedMetainfo => vec![Value::from(FLAG_RECEIVED)],
            MetadataMessage::Error(message) => {
                vec![Value::from(FLAG_ERROR), Value::string(message)]
            }
        };
        Ok(Bytes::from(encode(&Value::List(list))?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let value = decode(payload)?;
        let args = value
            .as_list()
            .ok_or_else(|| PeerError::InvalidMessage("expected list".into()))?;
        let flag = args
            .first()
            .and_then(|v| v.as_u32())
            .ok_or_else(|| PeerError::InvalidMessage("missing flag".into()))?;

        match flag {
            FLAG_HAVE_METADATA => Ok(MetadataMessage::HaveMetadata(
                arg_u32(args, 1, "have_metadata flag")? != 0,
            )),
            FLAG_PIECE_BITFIELD => Ok(MetadataMessage::PieceBitfield),
            FLAG_BITFIELD => Ok(MetadataMessage::Bitfield {
                bitfield: arg_bytes(args, 1, "metadata bitfield")?.clone(),
                piece_count: arg_u32(args, 2, "metadata piece count")?,
                piece_length: arg_u32(args, 3, "metadata piece length")?,
            }),
            FLAG_FETCH => Ok(MetadataMessage::Fetch {
                index: arg_u32(args, 1, "fetch index")?,
            }),
            FLAG_PIECE => Ok(MetadataMessage::Piece {
                index: arg_u32(args, 1, "metadata piece index")?,
                data: arg_bytes(args, 2, "metadata piece data")?.clone(),
            }),
            FLAG_RECEIVED => Ok(MetadataMessage::ReceivedMetainfo),
            FLAG_ERROR => Ok(MetadataMessage::Error(
                args.get(1)
                    .and_then(|v| v.as_str())
                    .unwrap_or("unspecified")
                    .to_string(),
            )),
            other => Err(PeerError::InvalidMessage(format!(
                "unknown metadata flag: {other}"
            ))),
        }
    }
}

/// Number of chunks an envelope of `total` bytes splits into.
pub fn chunk_count(total: usize, chunk_length: u32) -> u32 {
    total.div_ceil(chunk_length as usize) as u32
}

/// The `index`-th chunk of `data`, `None` past the end. Every chunk is
/// `chunk_length` bytes except a shorter final one.
pub fn chunk_of(data: &Bytes, index: u32, chunk_length: u32) -> Option<Bytes> {
    let start = index as usize * chunk_length as usize;
    if start >= data.len() {
        return None;
    }
    let end = (start + chunk_length as usize).min(data.len());
    Some(data.slice(start..end))
}

/// Requester-side reassembly state for one metadata fetch.
///
/// Chunks are requested in ascending order of the lowest missing index, so
/// reassembly is monotonic; a final short chunk determines the envelope's
/// real length.
#[derive(Debug)]
pub struct MetadataFetch {
    chunks: Vec<Option<Bytes>>,
    chunk_length: u32,
}

impl MetadataFetch {
    /// Starts a fetch from announced chunking parameters.
    ///
    /// # Errors
    ///
    /// `Protocol` when the parameters are degenerate or announce an
    /// envelope over the size bound.
    pub fn new(piece_count: u32, piece_length: u32) -> Result<Self, PeerError> {
        if piece_count == 0 || piece_length == 0 {
            return Err(PeerError::Protocol("empty metadata chunking".into()));
        }
        if u64::from(piece_count) * u64::from(piece_length) > MAX_METADATA_SIZE {
            return Err(PeerError::Protocol("metadata too large".into()));
        }
        Ok(Self {
            chunks: vec![None; piece_count as usize],
            chunk_length: piece_length,
        })
    }

    /// The lowest chunk index still missing.
    pub fn next_missing(&self) -> Option<u32> {
        self.chunks
            .iter()
            .position(Option::is_none)
            .map(|i| i as u32)
    }

    /// Accepts a chunk payload.
    ///
    /// # Errors
    ///
    /// `Protocol` for an out-of-range index, an empty payload, an
    /// oversized payload, or a short payload anywhere but the final chunk.
    pub fn accept(&mut self, index: u32, data: Bytes) -> Result<(), PeerError> {
        let last = self.chunks.len() - 1;
        let slot = self
            .chunks
            .get_mut(index as usize)
            .ok_or_else(|| PeerError::Protocol(format!("chunk index {index} out of range")))?;
        if data.is_empty() || data.len() > self.chunk_length as usize {
            return Err(PeerError::Protocol(format!(
                "chunk {index} has bad length {}",
                data.len()
            )));
        }
        if (index as usize) < last && data.len() != self.chunk_length as usize {
            return Err(PeerError::Protocol(format!("chunk {index} is short")));
        }
        *slot = Some(data);
        Ok(())
    }

    /// True once every chunk arrived.
    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(Option::is_some)
    }

    /// Concatenates the chunks into the candidate envelope bytes.
    pub fn assemble(&self) -> Result<Vec<u8>, PeerError> {
        let mut out = Vec::with_capacity(self.chunks.len() * self.chunk_length as usize);
        for (i, chunk) in self.chunks.iter().enumerate() {
            let chunk = chunk
                .as_ref()
                .ok_or_else(|| PeerError::Protocol(format!("chunk {i} missing")))?;
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }
}
