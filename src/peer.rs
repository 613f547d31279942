//! Peer wire protocol.
//!
//! A connection starts with a handshake naming the torrent identifier
//! (hash or signature bytes) and the local peer id, then negotiates named
//! extension channels. All subsequent traffic is length-prefixed frames
//! carrying a channel id and a canonically-encoded `[flag, ...args]` list:
//!
//! - the `exchange` channel moves bitfields, piece requests, and pieces;
//! - the `metadata` channel bootstraps the content descriptor for peers
//!   that joined with nothing but an identifier.
//!
//! Connections are generic over the byte stream; establishing the duplex
//! link between two endpoints is the transport substrate's job, not this
//! module's.

mod bitfield;
mod connection;
mod error;
mod extension;
mod message;
mod metadata;
mod peer_id;
mod transport;

pub use bitfield::Bitfield;
pub use connection::{ConnectionState, InboundMessage, PeerConnection};
pub use error::PeerError;
pub use extension::{ExtensionHandshake, EXCHANGE_CHANNEL, METADATA_CHANNEL};
pub use message::{ExchangeMessage, Handshake};
pub use metadata::{
    chunk_count, chunk_of, MetadataFetch, MetadataMessage, METADATA_CHUNK_SIZE,
};
pub use peer_id::PeerId;
pub use transport::{Frame, Transport};

#[cfg(test)]
mod tests;
