use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::Bytes;

use super::error::MetainfoError;
use crate::bencode::{decode, encode, Value};

/// The immutable description of a torrent's content.
///
/// Holds everything a peer needs to verify pieces: the chunking parameters,
/// the digest algorithm name, one digest per piece, and the file layout.
/// The i-th digest covers the i-th `piece_length`-sized chunk of the
/// concatenated file contents; the final chunk may be shorter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Suggested name for the content.
    pub name: String,
    /// Bytes per piece.
    pub piece_length: u64,
    /// Digest algorithm for `pieces` and for the infohash.
    pub piece_hash_algo: String,
    /// Per-piece digests, in piece order.
    pub pieces: Vec<Bytes>,
    /// Files, in concatenation order.
    pub files: Vec<FileEntry>,
}

/// One file within a torrent's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the content root.
    pub path: PathBuf,
    /// Size in bytes.
    pub length: u64,
    /// Byte offset within the concatenated content. Derived, not encoded.
    pub offset: u64,
}

impl Descriptor {
    /// Total content length, the sum of all file lengths.
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    /// Number of pieces.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Size of the piece at `index`; the last piece may be shorter.
    pub fn piece_size(&self, index: u32) -> u64 {
        let start = u64::from(index) * self.piece_length;
        let total = self.total_length();
        if start >= total {
            0
        } else {
            (total - start).min(self.piece_length)
        }
    }

    /// Encodes into the canonical byte form.
    ///
    /// This form is what the infohash is computed over, so two descriptors
    /// with equal fields always encode identically.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MetainfoError> {
        Ok(encode(&self.to_value())?)
    }

    /// Decodes from the canonical byte form.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        Self::from_value(&decode(data)?)
    }

    pub(crate) fn to_value(&self) -> Value {
        let files = self
            .files
            .iter()
            .map(|f| {
                let mut entry = BTreeMap::new();
                entry.insert(
                    Bytes::from_static(b"length"),
                    Value::Integer(f.length as i64),
                );
                let components: Vec<Value> = f
                    .path
                    .iter()
                    .filter_map(|c| c.to_str())
                    .map(Value::from)
                    .collect();
                entry.insert(Bytes::from_static(b"path"), Value::List(components));
                Value::Dict(entry)
            })
            .collect();

        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"files"), Value::List(files));
        dict.insert(Bytes::from_static(b"name"), Value::string(&self.name));
        dict.insert(
            Bytes::from_static(b"piece hash algo"),
            Value::string(&self.piece_hash_algo),
        );
        dict.insert(
            Bytes::from_static(b"piece length"),
            Value::Integer(self.piece_length as i64),
        );
        dict.insert(
            Bytes::from_static(b"pieces"),
            Value::List(self.pieces.iter().cloned().map(Value::Bytes).collect()),
        );
        Value::Dict(dict)
    }

    pub(crate) fn from_value(value: &Value) -> Result<Self, MetainfoError> {
        let name = value
            .get(b"name")
            .and_then(|v| v.as_str())
            .ok_or(MetainfoError::MissingField("name"))?
            .to_string();

        let piece_length = value
            .get(b"piece length")
            .and_then(|v| v.as_u64())
            .ok_or(MetainfoError::MissingField("piece length"))?;
        if piece_length == 0 {
            return Err(MetainfoError::InvalidField("piece length"));
        }

        let piece_hash_algo = value
            .get(b"piece hash algo")
            .and_then(|v| v.as_str())
            .ok_or(MetainfoError::MissingField("piece hash algo"))?
            .to_string();

        let pieces: Vec<Bytes> = value
            .get(b"pieces")
            .and_then(|v| v.as_list())
            .ok_or(MetainfoError::MissingField("pieces"))?
            .iter()
            .map(|p| p.as_bytes().cloned())
            .collect::<Option<_>>()
            .ok_or(MetainfoError::InvalidField("pieces"))?;

        let file_list = value
            .get(b"files")
            .and_then(|v| v.as_list())
            .ok_or(MetainfoError::MissingField("files"))?;

        let mut files = Vec::with_capacity(file_list.len());
        let mut offset = 0u64;
        for entry in file_list {
            let length = entry
                .get(b"length")
                .and_then(|v| v.as_u64())
                .ok_or(MetainfoError::MissingField("file length"))?;
            let path: PathBuf = entry
                .get(b"path")
                .and_then(|v| v.as_list())
                .ok_or(MetainfoError::MissingField("file path"))?
                .iter()
                .map(|c| c.as_str().map(String::from))
                .collect::<Option<Vec<_>>>()
                .ok_or(MetainfoError::InvalidField("file path"))?
                .into_iter()
                .collect();

            files.push(FileEntry {
                path,
                length,
                offset,
            });
            offset += length;
        }

        let descriptor = Self {
            name,
            piece_length,
            piece_hash_algo,
            pieces,
            files,
        };

        // Chunking must account for exactly the declared content length.
        let expected = descriptor.total_length().div_ceil(descriptor.piece_length) as usize;
        if descriptor.pieces.len() != expected {
            return Err(MetainfoError::InvalidField("pieces"));
        }

        Ok(descriptor)
    }
}
