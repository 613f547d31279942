//! mbit - a mutable-content peer-to-peer exchange engine
//!
//! This library implements a BitTorrent-family piece exchange protocol with
//! two additions to the classic design: torrent metadata can be bootstrapped
//! over the wire itself (no out-of-band `.torrent` file needed), and content
//! can be addressed by a public-key signature that a publisher re-points to
//! new content over time through a signed, sequence-numbered pointer layer.
//!
//! # Modules
//!
//! - [`bencode`] - Canonical binary encoding used on the wire and on disk
//! - [`crypto`] - Hashing and signing capability interfaces
//! - [`metainfo`] - Descriptors, content handles, identifiers, links
//! - [`store`] - Per-torrent piece storage and possession bookkeeping
//! - [`peer`] - Handshake, framing, and the exchange/metadata sub-protocols
//! - [`swarm`] - Peer coordination, discovery, and piece scheduling
//! - [`torrent`] - The per-torrent orchestration state machine
//! - [`pointer`] - Signed mutable pointers over a distributed store
//!
//! # Addressing
//!
//! A torrent is identified either by the hash of its encoded descriptor
//! (immutable: the identifier names exactly one content set forever) or by
//! a signature over that hash (mutable: the signing key can later produce a
//! new signature over a new descriptor, and subscribers of the pointer
//! layer follow the move).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mbit::crypto::{Capabilities, Ed25519Signer, StdHasher};
//! use mbit::metainfo::DescriptorBuilder;
//! use mbit::swarm::{Discovery, StaticDiscovery};
//! use mbit::torrent::Torrent;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let caps = Capabilities::new(Arc::new(StdHasher), Arc::new(Ed25519Signer));
//!
//! let (metainfo, pieces) = DescriptorBuilder::new("hello")
//!     .piece_length(16384)
//!     .add_file("hello.txt", b"hello, world".to_vec())
//!     .build(caps.hasher.as_ref())?;
//!
//! let id = metainfo.id();
//! let discovery: Arc<dyn Discovery> = Arc::new(StaticDiscovery::new());
//! let (_seeder, _stream) = Torrent::seed(metainfo, &pieces, caps, vec![discovery])?;
//! println!("seeding {}", id);
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod crypto;
pub mod metainfo;
pub mod peer;
pub mod pointer;
pub mod store;
pub mod swarm;
pub mod torrent;

pub use bencode::{decode, encode, BencodeError, Value};
pub use crypto::{Capabilities, CryptoError, Ed25519Signer, Hasher, KeyPair, Signer, StdHasher};
pub use metainfo::{
    ContentLink, Descriptor, DescriptorBuilder, FileEntry, Handle, MetainfoError, MetainfoFile,
    SignedMetainfoFile, TorrentId,
};
pub use peer::{Bitfield, ExchangeMessage, MetadataMessage, PeerConnection, PeerError, PeerId};
pub use pointer::{
    MemoryPointerStore, MutableRecord, PointerError, PointerService, PointerStore, Subscription,
};
pub use store::{PieceStore, SharedPieceStore, StoreError};
pub use swarm::{Discovery, StaticDiscovery, Swarm, SwarmError, SwarmEvent};
pub use torrent::{ContentPiece, ContentStream, Torrent, TorrentError, TorrentState};
