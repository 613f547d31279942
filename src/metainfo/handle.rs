use std::collections::BTreeMap;

use bytes::Bytes;

use super::descriptor::Descriptor;
use super::error::MetainfoError;
use super::id::TorrentId;
use crate::bencode::{decode, encode, Value};
use crate::crypto::{Hasher, KeyPair, Signer};

/// A descriptor bound to its own content hash.
///
/// `infohash = hash(encode(info), info.piece_hash_algo)`. Construction and
/// decoding both recompute the hash, so an inconsistent pair cannot exist.
#[derive(Debug, Clone)]
pub struct MetainfoFile {
    /// The content descriptor.
    pub info: Descriptor,
    /// Digest of the encoded descriptor.
    pub infohash: Bytes,
    raw_info: Bytes,
}

impl MetainfoFile {
    /// Binds a descriptor to its hash.
    pub fn from_descriptor(info: Descriptor, hasher: &dyn Hasher) -> Result<Self, MetainfoError> {
        let raw_info = Bytes::from(info.to_bytes()?);
        let infohash = hasher.digest(&info.piece_hash_algo, &raw_info)?;
        Ok(Self {
            info,
            infohash,
            raw_info,
        })
    }

    /// The canonical encoded descriptor, exactly the bytes the infohash
    /// covers.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// The immutable identifier for this content.
    pub fn id(&self) -> TorrentId {
        TorrentId::Hash(self.infohash.clone())
    }

    fn envelope(&self) -> BTreeMap<Bytes, Value> {
        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"info"), self.info.to_value());
        dict.insert(
            Bytes::from_static(b"infohash"),
            Value::Bytes(self.infohash.clone()),
        );
        dict
    }
}

/// A content handle additionally endorsed by a signing key.
///
/// The signature covers the infohash, so endorsing new content means
/// signing a new handle under the same key; the public key is the stable
/// identity, the signature is the current identifier.
#[derive(Debug, Clone)]
pub struct SignedMetainfoFile {
    /// The underlying hash-bound handle.
    pub file: MetainfoFile,
    /// Detached signature over `file.infohash`.
    pub infosig: Bytes,
    /// The signing identity.
    pub pub_key: Bytes,
    /// Signature algorithm name.
    pub infosig_algo: String,
}

impl SignedMetainfoFile {
    /// Signs a content handle with `keys`.
    pub fn sign(
        file: MetainfoFile,
        keys: &KeyPair,
        signer: &dyn Signer,
    ) -> Result<Self, MetainfoError> {
        let infosig = signer.sign(&file.infohash, keys)?;
        Ok(Self {
            file,
            infosig,
            pub_key: keys.public_key.clone(),
            infosig_algo: signer.algo().to_string(),
        })
    }

    /// Checks the signature over the infohash.
    pub fn verify(&self, signer: &dyn Signer) -> Result<bool, MetainfoError> {
        Ok(signer.verify(&self.file.infohash, &self.infosig, &self.pub_key)?)
    }

    /// The mutable identifier for this content.
    pub fn id(&self) -> TorrentId {
        TorrentId::Signature(self.infosig.clone())
    }
}

/// Either handle form, as carried in an encoded envelope.
#[derive(Debug, Clone)]
pub enum Handle {
    Plain(MetainfoFile),
    Signed(SignedMetainfoFile),
}

impl From<MetainfoFile> for Handle {
    fn from(file: MetainfoFile) -> Self {
        Handle::Plain(file)
    }
}

impl From<SignedMetainfoFile> for Handle {
    fn from(file: SignedMetainfoFile) -> Self {
        Handle::Signed(file)
    }
}

impl Handle {
    /// The descriptor inside.
    pub fn info(&self) -> &Descriptor {
        &self.metainfo().info
    }

    /// The hash-bound handle inside.
    pub fn metainfo(&self) -> &MetainfoFile {
        match self {
            Handle::Plain(m) => m,
            Handle::Signed(s) => &s.file,
        }
    }

    /// The identifier this handle answers to.
    pub fn id(&self) -> TorrentId {
        match self {
            Handle::Plain(m) => m.id(),
            Handle::Signed(s) => s.id(),
        }
    }

    /// Encodes the envelope: `{info, infohash}` plus, for the signed form,
    /// `{infosig, pub key, infosig algo}`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MetainfoError> {
        let mut dict = self.metainfo().envelope();
        if let Handle::Signed(s) = self {
            dict.insert(Bytes::from_static(b"infosig"), Value::Bytes(s.infosig.clone()));
            dict.insert(Bytes::from_static(b"pub key"), Value::Bytes(s.pub_key.clone()));
            dict.insert(
                Bytes::from_static(b"infosig algo"),
                Value::string(&s.infosig_algo),
            );
        }
        Ok(encode(&Value::Dict(dict))?)
    }

    /// Decodes an envelope and checks its internal consistency: the
    /// recomputed hash must equal the declared one, and a declared
    /// signature must verify under the declared key.
    pub fn from_bytes(
        data: &[u8],
        hasher: &dyn Hasher,
        signer: &dyn Signer,
    ) -> Result<Self, MetainfoError> {
        let value = decode(data)?;

        let info_value = value.get(b"info").ok_or(MetainfoError::MissingField("info"))?;
        let info = Descriptor::from_value(info_value)?;

        let declared_hash = value
            .get(b"infohash")
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or(MetainfoError::MissingField("infohash"))?;

        let file = MetainfoFile::from_descriptor(info, hasher)?;
        if file.infohash != declared_hash {
            return Err(MetainfoError::HashMismatch);
        }

        let Some(infosig) = value.get(b"infosig").and_then(|v| v.as_bytes()).cloned() else {
            return Ok(Handle::Plain(file));
        };

        let pub_key = value
            .get(b"pub key")
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or(MetainfoError::MissingField("pub key"))?;
        let infosig_algo = value
            .get(b"infosig algo")
            .and_then(|v| v.as_str())
            .ok_or(MetainfoError::MissingField("infosig algo"))?
            .to_string();

        let signed = SignedMetainfoFile {
            file,
            infosig,
            pub_key,
            infosig_algo,
        };
        if !signed.verify(signer)? {
            return Err(MetainfoError::SignatureInvalid);
        }
        Ok(Handle::Signed(signed))
    }

    /// Decodes an untrusted envelope and validates it against the
    /// identifier the caller was fetching.
    ///
    /// For a hash identifier the recomputed infohash must equal it; for a
    /// signature identifier the envelope must be signed, the declared
    /// signature must equal the identifier, and it must verify over the
    /// recomputed hash. Anything that fails here is discarded by the
    /// caller, never retried against the same peer.
    pub fn decode_verified(
        data: &[u8],
        expected: &TorrentId,
        hasher: &dyn Hasher,
        signer: &dyn Signer,
    ) -> Result<Self, MetainfoError> {
        let handle = Self::from_bytes(data, hasher, signer)?;
        match (expected, &handle) {
            (TorrentId::Hash(want), _) => {
                if &handle.metainfo().infohash != want {
                    return Err(MetainfoError::HashMismatch);
                }
            }
            (TorrentId::Signature(want), Handle::Signed(s)) => {
                if &s.infosig != want {
                    return Err(MetainfoError::IdentifierMismatch);
                }
            }
            (TorrentId::Signature(_), Handle::Plain(_)) => {
                return Err(MetainfoError::IdentifierMismatch);
            }
        }
        Ok(handle)
    }
}
