use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode, encode, Value};

/// Channel id of the extension handshake itself.
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Name of the piece-exchange channel.
pub const EXCHANGE_CHANNEL: &str = "exchange";

/// Name of the descriptor-bootstrap channel.
pub const METADATA_CHANNEL: &str = "metadata";

/// The extension handshake: a dictionary mapping channel names to the
/// sender's local channel ids.
///
/// Each side sends messages using the ids the *other* side advertised. A
/// side that omits a name does not speak that sub-protocol on this
/// connection; the peer falls back accordingly (for `metadata`, that means
/// requiring an out-of-band descriptor).
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    pub channels: BTreeMap<String, u8>,
    pub client: Option<String>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a handshake advertising the given `(name, id)` channels.
    pub fn with_channels(channels: &[(&str, u8)]) -> Self {
        let mut hs = Self::new();
        for (name, id) in channels {
            hs.channels.insert((*name).to_string(), *id);
        }
        hs
    }

    pub fn encode(&self) -> Result<Bytes, PeerError> {
        let mut m = BTreeMap::new();
        for (name, id) in &self.channels {
            m.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Value::Integer(i64::from(*id)),
            );
        }

        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));
        if let Some(ref client) = self.client {
            dict.insert(Bytes::from_static(b"v"), Value::string(client));
        }

        Ok(Bytes::from(encode(&Value::Dict(dict))?))
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let value = decode(data)?;
        if value.as_dict().is_none() {
            return Err(PeerError::InvalidMessage("extension handshake not a dict".into()));
        }

        let mut hs = Self::new();
        if let Some(m) = value.get(b"m").and_then(|v| v.as_dict()) {
            for (key, val) in m {
                if let (Ok(name), Some(id)) = (std::str::from_utf8(key), val.as_integer()) {
                    // Id 0 is reserved for the handshake itself.
                    if (1..=255).contains(&id) {
                        hs.channels.insert(name.to_string(), id as u8);
                    }
                }
            }
        }
        hs.client = value.get(b"v").and_then(|v| v.as_str()).map(String::from);
        Ok(hs)
    }

    /// The id the sender assigned to `name`, if advertised.
    pub fn channel_id(&self, name: &str) -> Option<u8> {
        self.channels.get(name).copied()
    }
}
