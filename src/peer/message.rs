use bytes::{BufMut, Bytes, BytesMut};

use super::error::PeerError;
use crate::bencode::{decode, encode, Value};

/// Handshake preamble naming this protocol.
pub const PROTOCOL: &[u8] = b"mbit protocol";

/// The connection-opening message.
///
/// Carries the torrent identifier bytes (hash or signature; length
/// varies with the addressing form, hence the length prefix) and the
/// sender's peer id:
///
/// ```text
/// [u8 proto len][proto][u16be topic len][topic][20-byte peer id]
/// ```
#[derive(Debug, Clone)]
pub struct Handshake {
    pub topic: Bytes,
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(topic: Bytes, peer_id: [u8; 20]) -> Self {
        Self { topic, peer_id }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + PROTOCOL.len() + 2 + self.topic.len() + 20);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_u16(self.topic.len() as u16);
        buf.put_slice(&self.topic);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    /// Attempts to decode a handshake from the front of `data`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, and the consumed
    /// length on success so the transport can split its buffer.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, PeerError> {
        if data.is_empty() {
            return Ok(None);
        }
        let proto_len = data[0] as usize;
        if proto_len != PROTOCOL.len() {
            return Err(PeerError::InvalidHandshake);
        }
        if data.len() < 1 + proto_len + 2 {
            return Ok(None);
        }
        if &data[1..1 + proto_len] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }
        let topic_len =
            u16::from_be_bytes([data[1 + proto_len], data[1 + proto_len + 1]]) as usize;
        let total = 1 + proto_len + 2 + topic_len + 20;
        if data.len() < total {
            return Ok(None);
        }

        let topic_start = 1 + proto_len + 2;
        let topic = Bytes::copy_from_slice(&data[topic_start..topic_start + topic_len]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[topic_start + topic_len..total]);

        Ok(Some((Self { topic, peer_id }, total)))
    }
}

// Exchange-channel flags. The metadata channel uses 10..=16; the two
// namespaces stay disjoint.
const FLAG_BITFIELD: u32 = 1;
const FLAG_HAVE: u32 = 2;
const FLAG_REQUEST: u32 = 3;
const FLAG_PIECE: u32 = 4;
const FLAG_INTEREST: u32 = 5;

/// A piece-exchange message, carried as a `[flag, ...args]` list on the
/// `exchange` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeMessage {
    /// The sender's full possession map.
    Bitfield(Bytes),
    /// The sender now holds piece `index`.
    Have { index: u32 },
    /// Ask for `length` bytes of piece `index` starting at `offset`.
    Request { index: u32, offset: u32, length: u32 },
    /// Piece payload answering a request.
    Piece { index: u32, offset: u32, data: Bytes },
    /// Whether the sender wants anything the receiver has.
    Interest(bool),
}

impl ExchangeMessage {
    pub fn encode(&self) -> Result<Bytes, PeerError> {
        let list = match self {
            ExchangeMessage::Bitfield(bits) => {
                vec![Value::from(FLAG_BITFIELD), Value::Bytes(bits.clone())]
            }
            ExchangeMessage::Have { index } => {
                vec![Value::from(FLAG_HAVE), Value::from(*index)]
            }
            ExchangeMessage::Request {
                index,
                offset,
                length,
            } => vec![
                Value::from(FLAG_REQUEST),
                Value::from(*index),
                Value::from(*offset),
                Value::from(*length),
            ],
            ExchangeMessage::Piece {
                index,
                offset,
                data,
            } => vec![
                Value::from(FLAG_PIECE),
                Value::from(*index),
                Value::from(*offset),
                Value::Bytes(data.clone()),
            ],
            ExchangeMessage::Interest(interested) => vec![
                Value::from(FLAG_INTEREST),
                Value::Integer(i64::from(*interested)),
            ],
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
            FLAG_BITFIELD => Ok(ExchangeMessage::Bitfield(
                arg_bytes(args, 1, "bitfield")?.clone(),
            )),
            FLAG_HAVE => Ok(ExchangeMessage::Have {
                index: arg_u32(args, 1, "have index")?,
            }),
            FLAG_REQUEST => Ok(ExchangeMessage::Request {
                index: arg_u32(args, 1, "request index")?,
                offset: arg_u32(args, 2, "request offset")?,
                length: arg_u32(args, 3, "request length")?,
            }),
            FLAG_PIECE => Ok(ExchangeMessage::Piece {
                index: arg_u32(args, 1, "piece index")?,
                offset: arg_u32(args, 2, "piece offset")?,
                data: arg_bytes(args, 3, "piece data")?.clone(),
            }),
            FLAG_INTEREST => Ok(ExchangeMessage::Interest(
                arg_u32(args, 1, "interest flag")? != 0,
            )),
            other => Err(PeerError::InvalidMessage(format!(
                "unknown exchange flag: {other}"
            ))),
        }
    }
}

pub(super) fn arg_u32(args: &[Value], at: usize, what: &str) -> Result<u32, PeerError> {
    args.get(at)
        .and_then(|v| v.as_u32())
        .ok_or_else(|| PeerError::InvalidMessage(format!("missing {what}")))
}

pub(super) fn arg_bytes<'a>(
    args: &'a [Value],
    at: usize,
    what: &str,
) -> Result<&'a Bytes, PeerError> {
    args.get(at)
        .and_then(|v| v.as_bytes())
        .ok_or_else(|| PeerError::InvalidMessage(format!("missing {what}")))
}
