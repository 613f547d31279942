use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::error::PeerError;
use super::extension::{
    ExtensionHandshake, EXCHANGE_CHANNEL, EXTENSION_HANDSHAKE_ID, METADATA_CHANNEL,
};
use super::message::{ExchangeMessage, Handshake};
use super::metadata::MetadataMessage;
use super::peer_id::PeerId;
use super::transport::Transport;

// Channel ids this side assigns for inbound traffic; the remote learns
// them from our extension handshake.
const LOCAL_EXCHANGE_ID: u8 = 1;
const LOCAL_METADATA_ID: u8 = 2;

/// Lifecycle of one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Stream established, nothing sent yet.
    Connected,
    /// Our handshake is on the wire.
    HandshakeSent,
    /// Extension handshakes crossed; channels are negotiated.
    ExtensionExchanged,
    /// Bitfield sent; normal message flow.
    Active,
    /// Torn down.
    Closed,
}

/// A decoded inbound message, routed by negotiated channel.
#[derive(Debug)]
pub enum InboundMessage {
    Exchange(ExchangeMessage),
    Metadata(MetadataMessage),
    KeepAlive,
    /// A channel this side never advertised; ignored by callers.
    Unknown { channel: u8 },
}

/// The wire state machine for a single remote endpoint.
///
/// Generic over the byte stream: the discovery substrate hands over any
/// established duplex connection. Nothing here is authoritative about
/// piece content: this type moves validated frames, the store and the
/// orchestrator decide what is true.
pub struct PeerConnection<S> {
    transport: Transport<S>,
    /// The remote's peer id from its handshake.
    pub peer_id: Option<PeerId>,
    /// Current lifecycle state.
    pub state: ConnectionState,
    remote_channels: ExtensionHandshake,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerConnection<S> {
    /// Runs the handshake sequence on a fresh stream: protocol handshake
    /// (topic must match), extension handshake, then the current bitfield
    /// when one exists yet.
    ///
    /// # Errors
    ///
    /// `TopicMismatch` when the remote handshook for a different
    /// identifier; `Protocol` when its first frame is not the extension
    /// handshake.
    pub async fn establish(
        stream: S,
        topic: Bytes,
        peer_id: PeerId,
        bitfield: Option<Bytes>,
    ) -> Result<Self, PeerError> {
        let mut transport = Transport::new(stream);

        let handshake = Handshake::new(topic.clone(), *peer_id.as_bytes());
        transport.send_handshake(&handshake).await?;

        let theirs = transport.receive_handshake().await?;
        if theirs.topic != topic {
            return Err(PeerError::TopicMismatch);
        }

        let ours = ExtensionHandshake::with_channels(&[
            (EXCHANGE_CHANNEL, LOCAL_EXCHANGE_ID),
            (METADATA_CHANNEL, LOCAL_METADATA_ID),
        ]);
        transport
            .send_frame(EXTENSION_HANDSHAKE_ID, &ours.encode()?)
            .await?;

        let frame = transport.receive_frame().await?;
        let remote_channels = match frame.channel {
            Some(EXTENSION_HANDSHAKE_ID) => ExtensionHandshake::decode(&frame.payload)?,
            other => {
                return Err(PeerError::Protocol(format!(
                    "expected extension handshake, got channel {other:?}"
                )))
            }
        };

        let mut conn = Self {
            transport,
            peer_id: PeerId::from_bytes(&theirs.peer_id),
            state: ConnectionState::ExtensionExchanged,
            remote_channels,
        };

        if let Some(bits) = bitfield {
            conn.send_exchange(&ExchangeMessage::Bitfield(bits)).await?;
        }
        conn.state = ConnectionState::Active;

        debug!(peer = ?conn.peer_id, "peer connection established");
        Ok(conn)
    }

    /// True when the remote advertised the metadata channel.
    pub fn supports_metadata(&self) -> bool {
        self.remote_channels.channel_id(METADATA_CHANNEL).is_some()
    }

    /// Sends a message on the remote's exchange channel.
    pub async fn send_exchange(&mut self, message: &ExchangeMessage) -> Result<(), PeerError> {
        let id = self
            .remote_channels
            .channel_id(EXCHANGE_CHANNEL)
            .ok_or(PeerError::ChannelNotSupported(EXCHANGE_CHANNEL))?;
        self.transport.send_frame(id, &message.encode()?).await
    }

    /// Sends a message on the remote's metadata channel.
    pub async fn send_metadata(&mut self, message: &MetadataMessage) -> Result<(), PeerError> {
        let id = self
            .remote_channels
            .channel_id(METADATA_CHANNEL)
            .ok_or(PeerError::ChannelNotSupported(METADATA_CHANNEL))?;
        self.transport.send_frame(id, &message.encode()?).await
    }

    /// Receives and decodes the next inbound message.
    ///
    /// Cancellation-safe: dropping the returned future between frames
    /// loses nothing (the transport buffers partial reads).
    pub async fn receive(&mut self) -> Result<InboundMessage, PeerError> {
        let frame = self.transport.receive_frame().await?;
        match frame.channel {
            None => Ok(InboundMessage::KeepAlive),
            Some(LOCAL_EXCHANGE_ID) => Ok(InboundMessage::Exchange(ExchangeMessage::decode(
                &frame.payload,
            )?)),
            Some(LOCAL_METADATA_ID) => Ok(InboundMessage::Metadata(MetadataMessage::decode(
                &frame.payload,
            )?)),
            Some(EXTENSION_HANDSHAKE_ID) => Err(PeerError::Protocol(
                "repeated extension handshake".into(),
            )),
            Some(channel) => Ok(InboundMessage::Unknown { channel }),
        }
    }

    /// Marks the connection closed. The stream drops with the connection.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
