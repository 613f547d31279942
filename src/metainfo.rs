//! Descriptors, content handles, and identifiers.
//!
//! A torrent's content is described by a [`Descriptor`]: the content name,
//! the chunking parameters, one digest per piece, and the file list. The
//! descriptor is immutable; changing content means producing a new one.
//!
//! Two handle forms bind a descriptor to an identity:
//!
//! - [`MetainfoFile`] couples the descriptor with its own content hash
//!   (`infohash = hash(encode(info), piece_hash_algo)`). The hash is the
//!   immutable identifier: it names exactly one content set, forever.
//! - [`SignedMetainfoFile`] additionally carries a detached signature over
//!   the infohash. The signature is the mutable identifier: the same
//!   public key can sign successive descriptors, and the pointer layer
//!   lets subscribers follow the latest one.
//!
//! [`Handle::decode_verified`] is the single entry point for untrusted
//! encoded envelopes (metadata fetched over the wire): it re-derives the
//! hash, checks it against both the declared value and the expected
//! identifier, and verifies the signature when one is present. A
//! descriptor that fails any of these checks never escapes this module.
//!
//! # Examples
//!
//! ```
//! use mbit::crypto::{Hasher, StdHasher};
//! use mbit::metainfo::DescriptorBuilder;
//!
//! let (metainfo, pieces) = DescriptorBuilder::new("example")
//!     .piece_length(4)
//!     .add_file("a.txt", b"abcdefgh".to_vec())
//!     .build(&StdHasher)
//!     .unwrap();
//!
//! assert_eq!(metainfo.info.piece_count(), 2);
//! assert_eq!(pieces.len(), 2);
//! let digest = StdHasher.digest("sha1", metainfo.raw_info()).unwrap();
//! assert_eq!(digest, metainfo.infohash);
//! ```

mod builder;
mod descriptor;
mod error;
mod handle;
mod id;
mod link;

pub use builder::{DescriptorBuilder, DEFAULT_PIECE_LENGTH};
pub use descriptor::{Descriptor, FileEntry};
pub use error::MetainfoError;
pub use handle::{Handle, MetainfoFile, SignedMetainfoFile};
pub use id::TorrentId;
pub use link::ContentLink;
