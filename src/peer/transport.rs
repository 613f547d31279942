use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::error::PeerError;
use super::message::Handshake;

const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// One frame off the wire: `u32be` length, then a channel id byte and the
/// channel payload. A zero-length frame is a keep-alive (`channel: None`).
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: Option<u8>,
    pub payload: Bytes,
}

/// Length-prefixed framing over any duplex byte stream.
///
/// The read buffer persists across calls, so a receive future cancelled at
/// an await point (the coordinator's `select!` does this) never loses
/// partially-read bytes.
pub struct Transport<S> {
    stream: S,
    read_buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        let data = handshake.encode();
        timeout(WRITE_TIMEOUT, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        loop {
            if let Some((handshake, consumed)) = Handshake::decode(&self.read_buf)? {
                self.read_buf.advance(consumed);
                return Ok(handshake);
            }
            self.fill().await?;
        }
    }

    /// Sends one frame on `channel`.
    pub async fn send_frame(&mut self, channel: u8, payload: &[u8]) -> Result<(), PeerError> {
        let mut buf = BytesMut::with_capacity(4 + 1 + payload.len());
        buf.put_u32(1 + payload.len() as u32);
        buf.put_u8(channel);
        buf.put_slice(payload);
        timeout(WRITE_TIMEOUT, self.stream.write_all(&buf))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    /// Receives the next frame, keep-alives included.
    pub async fn receive_frame(&mut self) -> Result<Frame, PeerError> {
        while self.read_buf.len() < 4 {
            self.fill().await?;
        }

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(PeerError::Protocol(format!("frame too large: {length}")));
        }
        if length == 0 {
            self.read_buf.advance(4);
            return Ok(Frame {
                channel: None,
                payload: Bytes::new(),
            });
        }

        while self.read_buf.len() < 4 + length {
            self.fill().await?;
        }

        self.read_buf.advance(4);
        let mut body = self.read_buf.split_to(length).freeze();
        let channel = body.get_u8();
        Ok(Frame {
            channel: Some(channel),
            payload: body,
        })
    }

    async fn fill(&mut self) -> Result<(), PeerError> {
        let n = timeout(READ_TIMEOUT, self.stream.read_buf(&mut self.read_buf))
            .await
            .map_err(|_| PeerError::Timeout)??;
        if n == 0 {
            return Err(PeerError::ConnectionClosed);
        }
        Ok(())
    }
}
