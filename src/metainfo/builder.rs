//! Descriptor construction from in-memory content.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use super::descriptor::{Descriptor, FileEntry};
use super::error::MetainfoError;
use super::handle::MetainfoFile;
use crate::crypto::Hasher;

/// Default piece length (256 KiB).
pub const DEFAULT_PIECE_LENGTH: u64 = 262144;

/// Builds a [`MetainfoFile`] and its piece buffers from named file
/// contents.
///
/// Files are concatenated in insertion order, chunked at the piece length,
/// and each chunk digested under the chosen algorithm. The returned piece
/// buffers are what a seeder loads into its piece store.
///
/// # Examples
///
/// ```
/// use mbit::crypto::StdHasher;
/// use mbit::metainfo::DescriptorBuilder;
///
/// let (metainfo, pieces) = DescriptorBuilder::new("docs")
///     .piece_length(16384)
///     .add_file("readme.txt", b"hello".to_vec())
///     .add_file("notes/day1.txt", b"world".to_vec())
///     .build(&StdHasher)
///     .unwrap();
///
/// assert_eq!(metainfo.info.total_length(), 10);
/// assert_eq!(pieces.len(), 1);
/// ```
#[derive(Debug)]
pub struct DescriptorBuilder {
    name: String,
    piece_length: u64,
    hash_algo: String,
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl DescriptorBuilder {
    /// Creates a builder for content with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            piece_length: DEFAULT_PIECE_LENGTH,
            hash_algo: "sha1".to_string(),
            files: Vec::new(),
        }
    }

    /// Sets the piece length in bytes.
    pub fn piece_length(mut self, length: u64) -> Self {
        self.piece_length = length;
        self
    }

    /// Sets the digest algorithm recorded in the descriptor.
    pub fn hash_algo(mut self, algo: impl Into<String>) -> Self {
        self.hash_algo = algo.into();
        self
    }

    /// Adds a file. The path is relative to the content root; parent and
    /// root components are stripped.
    pub fn add_file(mut self, path: impl AsRef<Path>, data: Vec<u8>) -> Self {
        let clean: PathBuf = path
            .as_ref()
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s),
                _ => None,
            })
            .collect();
        self.files.push((clean, data));
        self
    }

    /// Produces the hash-bound handle and the piece buffers.
    ///
    /// # Errors
    ///
    /// `InvalidField` when the piece length is zero or no file was added.
    pub fn build(self, hasher: &dyn Hasher) -> Result<(MetainfoFile, Vec<Bytes>), MetainfoError> {
        if self.piece_length == 0 {
            return Err(MetainfoError::InvalidField("piece length"));
        }
        if self.files.is_empty() {
            return Err(MetainfoError::InvalidField("files"));
        }

        let mut entries = Vec::with_capacity(self.files.len());
        let mut content = Vec::new();
        let mut offset = 0u64;
        for (path, data) in &self.files {
            entries.push(FileEntry {
                path: path.clone(),
                length: data.len() as u64,
                offset,
            });
            offset += data.len() as u64;
            content.extend_from_slice(data);
        }

        let mut pieces = Vec::new();
        let mut digests = Vec::new();
        for chunk in content.chunks(self.piece_length as usize) {
            digests.push(hasher.digest(&self.hash_algo, chunk)?);
            pieces.push(Bytes::copy_from_slice(chunk));
        }

        let info = Descriptor {
            name: self.name,
            piece_length: self.piece_length,
            piece_hash_algo: self.hash_algo,
            pieces: digests,
            files: entries,
        };

        let metainfo = MetainfoFile::from_descriptor(info, hasher)?;
        Ok((metainfo, pieces))
    }
}
