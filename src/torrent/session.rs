use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::TorrentError;
use crate::crypto::Capabilities;
use crate::metainfo::{Handle, TorrentId};
use crate::peer::PeerId;
use crate::store::{PieceStore, SharedPieceStore};
use crate::swarm::{Discovery, Swarm, SwarmConfig, SwarmEvent, SwarmMetainfo};

const EVENT_CAPACITY: usize = 256;
const OUTPUT_CAPACITY: usize = 64;

/// Lifecycle of one torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    /// Only an identifier is known; the descriptor is being bootstrapped.
    AwaitingMetadata,
    /// Descriptor known; pieces are moving. A torrent with no reachable
    /// source stalls here rather than failing, since more peers may appear.
    Exchanging,
    /// Every piece is stored and verified.
    Complete,
}

/// One verified piece, tagged for re-seating at the right byte offset.
#[derive(Debug, Clone)]
pub struct ContentPiece {
    pub index: u32,
    /// Byte offset of this piece within the concatenated content.
    pub offset: u64,
    pub data: Bytes,
}

/// The lazy output sequence of a torrent: verified pieces in arrival
/// order. Ends (yields `None`) when the content is complete or the
/// torrent is stopped. Consumed once; not restartable.
pub struct ContentStream {
    rx: mpsc::Receiver<ContentPiece>,
}

impl ContentStream {
    /// The next verified piece, or `None` at end-of-data.
    pub async fn next(&mut self) -> Option<ContentPiece> {
        self.rx.recv().await
    }
}

enum Control {
    Stop,
}

/// A running torrent session.
///
/// Built by one of the three assembly constructors; each wires the full
/// object graph (store, swarm, orchestrator task) explicitly from the
/// capability bundle and discovery strategies it is given. The
/// constructors spawn tasks, so they must be called within a Tokio
/// runtime.
pub struct Torrent {
    id: TorrentId,
    swarm: Swarm,
    state: Arc<RwLock<TorrentState>>,
    metainfo: Arc<RwLock<Option<Handle>>>,
    control: mpsc::Sender<Control>,
}

impl Torrent {
    /// Starts a download from nothing but an identifier. The descriptor
    /// is bootstrapped from whichever discovered peer holds it.
    pub fn download(
        id: TorrentId,
        caps: Capabilities,
        discoveries: Vec<Arc<dyn Discovery>>,
    ) -> Result<(Self, ContentStream), TorrentError> {
        Self::assemble(id, None, None, caps, discoveries)
    }

    /// Starts a download with a descriptor already in hand.
    pub fn download_with_metainfo(
        handle: impl Into<Handle>,
        caps: Capabilities,
        discoveries: Vec<Arc<dyn Discovery>>,
    ) -> Result<(Self, ContentStream), TorrentError> {
        let handle = handle.into();
        Self::assemble(handle.id(), Some(handle), None, caps, discoveries)
    }

    /// Seeds content: every piece is verified against the descriptor,
    /// loaded into the store, and served to the swarm.
    ///
    /// # Errors
    ///
    /// `PieceCountMismatch` / `Integrity` when the supplied pieces do not
    /// match the descriptor.
    pub fn seed(
        handle: impl Into<Handle>,
        pieces: &[Bytes],
        caps: Capabilities,
        discoveries: Vec<Arc<dyn Discovery>>,
    ) -> Result<(Self, ContentStream), TorrentError> {
        let handle = handle.into();
        let info = handle.info();

        if pieces.len() != info.piece_count() {
            return Err(TorrentError::PieceCountMismatch {
                expected: info.piece_count(),
                got: pieces.len(),
            });
        }

        let mut store = PieceStore::new(info.piece_count());
        for (index, piece) in pieces.iter().enumerate() {
            let index = index as u32;
            let digest = caps.hasher.digest(&info.piece_hash_algo, piece)?;
            if digest != info.pieces[index as usize] {
                return Err(TorrentError::Integrity { index });
            }
            store.put(index, piece.clone())?;
        }

        Self::assemble(handle.id(), Some(handle), Some(store), caps, discoveries)
    }

    fn assemble(
        id: TorrentId,
        handle: Option<Handle>,
        prefilled: Option<PieceStore>,
        caps: Capabilities,
        discoveries: Vec<Arc<dyn Discovery>>,
    ) -> Result<(Self, ContentStream), TorrentError> {
        let store: SharedPieceStore = match (&handle, prefilled) {
            (_, Some(store)) => Arc::new(RwLock::new(store)),
            (Some(handle), None) => {
                Arc::new(RwLock::new(PieceStore::new(handle.info().piece_count())))
            }
            (None, None) => Arc::new(RwLock::new(PieceStore::new(0))),
        };

        let swarm_metainfo = handle.as_ref().map(swarm_metainfo_for).transpose()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let swarm = Swarm::spawn(SwarmConfig {
            caps: caps.clone(),
            discoveries,
            store: store.clone(),
            peer_id: PeerId::generate(),
            metainfo: swarm_metainfo,
            events: events_tx,
        });

        let complete = store.read().is_complete() && handle.is_some();
        let initial_state = match (&handle, complete) {
            (None, _) => TorrentState::AwaitingMetadata,
            (Some(_), false) => TorrentState::Exchanging,
            (Some(_), true) => TorrentState::Complete,
        };

        let state = Arc::new(RwLock::new(initial_state));
        let metainfo = Arc::new(RwLock::new(handle));
        let (control_tx, control_rx) = mpsc::channel(4);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CAPACITY);

        let orchestrator = Orchestrator {
            id: id.clone(),
            caps,
            store,
            swarm: swarm.clone(),
            state: state.clone(),
            metainfo: metainfo.clone(),
            // A torrent that starts complete has no content left to yield.
            output: (!complete).then_some(output_tx),
        };
        tokio::spawn(orchestrator.run(events_rx, control_rx));

        let torrent = Self {
            id,
            swarm,
            state,
            metainfo,
            control: control_tx,
        };
        Ok((torrent, ContentStream { rx: output_rx }))
    }

    /// The identifier this torrent answers to.
    pub fn id(&self) -> &TorrentId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TorrentState {
        *self.state.read()
    }

    /// The descriptor handle, once known.
    pub fn metainfo(&self) -> Option<Handle> {
        self.metainfo.read().clone()
    }

    /// The coordinator handle, for direct piece requests and have
    /// broadcasts.
    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// Stops the torrent: discovery halted, connections closed, the
    /// output stream ended. Idempotent.
    pub async fn stop(&self) {
        let _ = self.control.send(Control::Stop).await;
    }
}

fn swarm_metainfo_for(handle: &Handle) -> Result<SwarmMetainfo, TorrentError> {
    Ok(SwarmMetainfo {
        raw: Bytes::from(handle.to_bytes()?),
        piece_length: handle.info().piece_length,
        total_length: handle.info().total_length(),
    })
}

struct Orchestrator {
    id: TorrentId,
    caps: Capabilities,
    store: SharedPieceStore,
    swarm: Swarm,
    state: Arc<RwLock<TorrentState>>,
    metainfo: Arc<RwLock<Option<Handle>>>,
    output: Option<mpsc::Sender<ContentPiece>>,
}

impl Orchestrator {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<SwarmEvent>,
        mut control: mpsc::Receiver<Control>,
    ) {
        if self.swarm.search(self.id.clone()).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                command = control.recv() => match command {
                    Some(Control::Stop) | None => break,
                },
            }
        }

        let _ = self.swarm.shutdown().await;
        debug!(id = %self.id, "torrent stopped");
    }

    async fn handle_event(&mut self, event: SwarmEvent) {
        match event {
            SwarmEvent::PeerConnected { peer } => {
                debug!(id = %self.id, peer, "peer joined");
            }
            SwarmEvent::PeerDisconnected { peer } => {
                debug!(id = %self.id, peer, "peer left");
            }
            SwarmEvent::MetadataFetched(handle) => self.adopt_metadata(handle).await,
            SwarmEvent::PieceReceived {
                peer,
                index,
                offset,
                data,
            } => self.process_piece(peer, index, offset, data).await,
        }
    }

    /// Exits `AwaitingMetadata`: sizes the store from the descriptor and
    /// hands the swarm what it needs to exchange and serve.
    async fn adopt_metadata(&mut self, handle: Handle) {
        if self.metainfo.read().is_some() {
            return;
        }

        let piece_count = handle.info().piece_count();
        let swarm_metainfo = match swarm_metainfo_for(&handle) {
            Ok(m) => m,
            Err(e) => {
                warn!(id = %self.id, "metadata re-encode failed: {e}");
                return;
            }
        };

        *self.store.write() = PieceStore::new(piece_count);
        *self.metainfo.write() = Some(handle);
        *self.state.write() = TorrentState::Exchanging;
        info!(id = %self.id, piece_count, "descriptor adopted, exchanging");

        let _ = self.swarm.set_metainfo(swarm_metainfo).await;

        if piece_count == 0 {
            self.finish().await;
        }
    }

    /// Verifies one arriving piece against the descriptor. A mismatch is
    /// never stored: the same coordinates are re-requested from a
    /// different peer and the consumer sees nothing but latency.
    async fn process_piece(&mut self, peer: u64, index: u32, offset: u32, data: Bytes) {
        let Some(handle) = self.metainfo.read().clone() else {
            return;
        };
        let info = handle.info();

        if index as usize >= info.piece_count() {
            warn!(id = %self.id, peer, index, "piece index out of range");
            return;
        }
        if self.store.read().has(index) {
            return;
        }

        let digest = match self.caps.hasher.digest(&info.piece_hash_algo, &data) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(id = %self.id, "piece digest failed: {e}");
                return;
            }
        };
        if digest != info.pieces[index as usize] {
            warn!(id = %self.id, peer, index, "piece failed verification, re-requesting");
            let length = info.piece_size(index) as u32;
            // Detached so this loop keeps draining events while the
            // coordinator resolves the retry.
            let swarm = self.swarm.clone();
            tokio::spawn(async move {
                if let Err(e) = swarm.request_piece(index, 0, length, Some(peer)).await {
                    debug!(index, "re-request not possible now: {e}");
                }
            });
            return;
        }

        if let Err(e) = self.store.write().put(index, data.clone()) {
            warn!(id = %self.id, index, "store rejected verified piece: {e}");
            return;
        }
        let _ = self.swarm.broadcast_have(index).await;

        if let Some(output) = &self.output {
            let piece = ContentPiece {
                index,
                offset: u64::from(index) * info.piece_length + u64::from(offset),
                data,
            };
            let _ = output.send(piece).await;
        }

        if self.store.read().is_complete() {
            self.finish().await;
        }
    }

    async fn finish(&mut self) {
        *self.state.write() = TorrentState::Complete;
        let _ = self.swarm.set_uninterested().await;
        // Dropping the sender is the end-of-data signal, not an error.
        self.output = None;
        info!(id = %self.id, "content complete");
    }
}
