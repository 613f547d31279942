use thiserror::Error;

/// Errors from one peer connection.
///
/// Every variant is fatal to that connection only; sibling connections and
/// the torrent are unaffected except through retry.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O failure on the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake bytes are not this protocol.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The remote handshook for a different torrent identifier.
    #[error("handshake topic mismatch")]
    TopicMismatch,

    /// A frame or message payload violates the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message flag or argument list is malformed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The remote never advertised the channel this send needs.
    #[error("extension channel not supported: {0}")]
    ChannelNotSupported(&'static str),

    /// No reply arrived within the deadline; the caller may retry against
    /// a different connection.
    #[error("timeout")]
    Timeout,

    /// The stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// A payload failed to decode as canonical encoding.
    #[error("encoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),
}
