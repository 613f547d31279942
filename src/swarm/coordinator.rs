use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::discovery::{Discovery, PeerStream};
use super::SwarmError;
use crate::crypto::Capabilities;
use crate::metainfo::{Handle, TorrentId};
use crate::peer::{
    chunk_count, chunk_of, Bitfield, ExchangeMessage, InboundMessage, MetadataFetch,
    MetadataMessage, PeerConnection, PeerId, METADATA_CHUNK_SIZE,
};
use crate::store::SharedPieceStore;

/// How long a piece request may stay unanswered before it is retried
/// against a different peer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinator maintenance cadence: timeout sweep plus a rescue pass that
/// re-issues any wanted-but-unrequested piece.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

const COMMAND_CAPACITY: usize = 256;
const INBOUND_CAPACITY: usize = 256;
const INCOMING_CAPACITY: usize = 16;
const PEER_COMMAND_CAPACITY: usize = 64;

/// What the coordinator reports upward to its orchestrator.
#[derive(Debug)]
pub enum SwarmEvent {
    /// A connection finished its handshakes.
    PeerConnected { peer: u64 },
    /// A connection ended, for any reason.
    PeerDisconnected { peer: u64 },
    /// The metadata bootstrap produced a validated handle.
    MetadataFetched(Handle),
    /// A piece payload arrived. Unverified: the orchestrator decides
    /// whether it is real.
    PieceReceived {
        peer: u64,
        index: u32,
        offset: u32,
        data: Bytes,
    },
}

/// Descriptor facts the coordinator needs once metadata is known: the raw
/// envelope it serves to bootstrapping peers, and the chunking parameters
/// it schedules requests with.
#[derive(Debug, Clone)]
pub struct SwarmMetainfo {
    pub raw: Bytes,
    pub piece_length: u64,
    pub total_length: u64,
}

/// Everything a coordinator is built from.
pub struct SwarmConfig {
    pub caps: Capabilities,
    pub discoveries: Vec<Arc<dyn Discovery>>,
    pub store: SharedPieceStore,
    pub peer_id: PeerId,
    pub metainfo: Option<SwarmMetainfo>,
    pub events: mpsc::Sender<SwarmEvent>,
}

enum Command {
    Search(TorrentId),
    StopDiscovery,
    BroadcastHave(u32),
    RequestPiece {
        index: u32,
        offset: u32,
        length: u32,
        exclude: Option<u64>,
        reply: oneshot::Sender<Result<(), SwarmError>>,
    },
    SetMetainfo(SwarmMetainfo),
    SetUninterested,
    Shutdown,
}

/// Handle to a running coordinator task. Cloneable; all methods forward
/// over the command channel.
#[derive(Clone)]
pub struct Swarm {
    commands: mpsc::Sender<Command>,
}

impl Swarm {
    /// Spawns the coordinator task.
    pub fn spawn(config: SwarmConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let coordinator = Coordinator {
            caps: config.caps,
            discoveries: config.discoveries,
            store: config.store,
            peer_id: config.peer_id,
            metainfo: config.metainfo,
            events: config.events,
            id: None,
            searching: false,
            globally_interested: true,
            peers: HashMap::new(),
            pending: HashMap::new(),
            fetch: None,
            fetch_complete: false,
            fetch_failed: HashSet::new(),
            next_peer_key: 0,
            incoming_tx,
            inbound_tx,
        };
        tokio::spawn(coordinator.run(command_rx, incoming_rx, inbound_rx));

        Self { commands }
    }

    /// Starts discovery for `id` and begins accepting connections.
    pub async fn search(&self, id: TorrentId) -> Result<(), SwarmError> {
        self.send(Command::Search(id)).await
    }

    /// Halts discovery. Idempotent; existing connections stay up.
    pub async fn stop(&self) -> Result<(), SwarmError> {
        self.send(Command::StopDiscovery).await
    }

    /// Announces a newly stored piece to every connection.
    pub async fn broadcast_have(&self, index: u32) -> Result<(), SwarmError> {
        self.send(Command::BroadcastHave(index)).await
    }

    /// Requests a piece from any connected peer advertising it, excluding
    /// `exclude` (the peer a bad copy came from).
    ///
    /// # Errors
    ///
    /// `NoPeerAvailable`, resolved against the remote bitfields before
    /// anything is sent, when no eligible peer has the piece.
    pub async fn request_piece(
        &self,
        index: u32,
        offset: u32,
        length: u32,
        exclude: Option<u64>,
    ) -> Result<(), SwarmError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::RequestPiece {
            index,
            offset,
            length,
            exclude,
            reply,
        })
        .await?;
        response.await.map_err(|_| SwarmError::Stopped)?
    }

    /// Supplies the descriptor facts once the orchestrator has them,
    /// switching this coordinator into full exchange mode.
    pub async fn set_metainfo(&self, metainfo: SwarmMetainfo) -> Result<(), SwarmError> {
        self.send(Command::SetMetainfo(metainfo)).await
    }

    /// Signals uninterest to every peer; sent on completion.
    pub async fn set_uninterested(&self) -> Result<(), SwarmError> {
        self.send(Command::SetUninterested).await
    }

    /// Tears the swarm down: discovery halted, every connection closed,
    /// the coordinator task ended.
    pub async fn shutdown(&self) -> Result<(), SwarmError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), SwarmError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SwarmError::Stopped)
    }
}

enum PeerCommand {
    Exchange(ExchangeMessage),
    Metadata(MetadataMessage),
    Close,
}

enum PeerInbound {
    Connected {
        key: u64,
        commands: mpsc::Sender<PeerCommand>,
        supports_metadata: bool,
    },
    Message {
        key: u64,
        message: InboundMessage,
    },
    Closed {
        key: u64,
    },
}

struct PeerEntry {
    commands: mpsc::Sender<PeerCommand>,
    /// Raw bitfield bytes, parseable only once the piece count is known.
    bitfield_raw: Option<Bytes>,
    bitfield: Option<Bitfield>,
    /// `have` indices that arrived before the piece count was known.
    early_haves: Vec<u32>,
    /// Whether we told this peer we are interested.
    interested: bool,
    peer_interested: bool,
    has_metadata: bool,
    supports_metadata: bool,
}

struct PendingRequest {
    peer: u64,
    deadline: Instant,
}

struct FetchState {
    peer: u64,
    reassembly: Option<MetadataFetch>,
}

struct Coordinator {
    caps: Capabilities,
    discoveries: Vec<Arc<dyn Discovery>>,
    store: SharedPieceStore,
    peer_id: PeerId,
    metainfo: Option<SwarmMetainfo>,
    events: mpsc::Sender<SwarmEvent>,
    id: Option<TorrentId>,
    searching: bool,
    /// Cleared on completion; no new piece requests go out after that.
    globally_interested: bool,
    peers: HashMap<u64, PeerEntry>,
    /// In-flight piece requests, keyed by piece index.
    pending: HashMap<u32, PendingRequest>,
    fetch: Option<FetchState>,
    fetch_complete: bool,
    fetch_failed: HashSet<u64>,
    next_peer_key: u64,
    incoming_tx: mpsc::Sender<PeerStream>,
    inbound_tx: mpsc::Sender<PeerInbound>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut incoming: mpsc::Receiver<PeerStream>,
        mut inbound: mpsc::Receiver<PeerInbound>,
    ) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(stream) = incoming.recv() => self.accept(stream),
                Some(message) = inbound.recv() => self.handle_inbound(message).await,
                _ = tick.tick() => self.on_tick(),
            }
        }

        self.halt_discovery();
        for entry in self.peers.values() {
            let _ = entry.commands.try_send(PeerCommand::Close);
        }
        debug!("swarm coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Search(id) => {
                info!(id = %id, "starting discovery");
                let topic = id.topic().clone();
                self.id = Some(id);
                self.searching = true;
                for strategy in &self.discoveries {
                    strategy.start(topic.clone(), self.incoming_tx.clone());
                }
            }
            Command::StopDiscovery => self.halt_discovery(),
            Command::BroadcastHave(index) => {
                for entry in self.peers.values() {
                    send_peer(&entry.commands, PeerCommand::Exchange(ExchangeMessage::Have { index }));
                }
            }
            Command::RequestPiece {
                index,
                offset,
                length,
                exclude,
                reply,
            } => {
                let result = self.request_from_any(index, offset, length, exclude);
                let _ = reply.send(result);
            }
            Command::SetMetainfo(metainfo) => self.apply_metainfo(metainfo),
            Command::SetUninterested => {
                self.globally_interested = false;
                let keys: Vec<u64> = self.peers.keys().copied().collect();
                for key in keys {
                    self.set_interest(key, false);
                }
            }
            // Intercepted by the run loop before dispatch.
            Command::Shutdown => {}
        }
    }

    fn halt_discovery(&mut self) {
        if !self.searching {
            return;
        }
        if let Some(id) = &self.id {
            for strategy in &self.discoveries {
                strategy.stop(id.topic());
            }
        }
        self.searching = false;
    }

    /// Spawns the handshake and driver task for a discovered stream.
    fn accept(&mut self, stream: PeerStream) {
        let Some(id) = &self.id else {
            debug!("dropping discovered stream, no identifier yet");
            return;
        };

        let key = self.next_peer_key;
        self.next_peer_key += 1;

        let topic = id.topic().clone();
        let peer_id = self.peer_id;
        let bitfield = self
            .metainfo
            .is_some()
            .then(|| self.store.read().bitfield().to_bytes());
        let inbound = self.inbound_tx.clone();

        tokio::spawn(async move {
            let conn = match PeerConnection::establish(stream, topic, peer_id, bitfield).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(peer = key, "connection setup failed: {e}");
                    return;
                }
            };

            let (commands, command_rx) = mpsc::channel(PEER_COMMAND_CAPACITY);
            let connected = PeerInbound::Connected {
                key,
                commands,
                supports_metadata: conn.supports_metadata(),
            };
            if inbound.send(connected).await.is_err() {
                return;
            }

            drive_peer(conn, command_rx, &inbound, key).await;
            let _ = inbound.send(PeerInbound::Closed { key }).await;
        });
    }

    async fn handle_inbound(&mut self, message: PeerInbound) {
        match message {
            PeerInbound::Connected {
                key,
                commands,
                supports_metadata,
            } => {
                let entry = PeerEntry {
                    commands,
                    bitfield_raw: None,
                    bitfield: None,
                    early_haves: Vec::new(),
                    interested: false,
                    peer_interested: false,
                    has_metadata: false,
                    supports_metadata,
                };
                // Announce descriptor possession; the bootstrap protocol
                // starts from these announcements on both sides.
                if supports_metadata {
                    send_peer(
                        &entry.commands,
                        PeerCommand::Metadata(MetadataMessage::HaveMetadata(
                            self.metainfo.is_some(),
                        )),
                    );
                }
                self.peers.insert(key, entry);
                let _ = self.events.send(SwarmEvent::PeerConnected { peer: key }).await;
            }
            PeerInbound::Closed { key } => self.drop_peer(key).await,
            PeerInbound::Message { key, message } => match message {
                InboundMessage::Exchange(message) => self.on_exchange(key, message).await,
                InboundMessage::Metadata(message) => self.on_metadata(key, message).await,
                InboundMessage::KeepAlive => {}
                InboundMessage::Unknown { channel } => {
                    debug!(peer = key, channel, "ignoring unknown channel");
                }
            },
        }
    }

    async fn drop_peer(&mut self, key: u64) {
        if self.peers.remove(&key).is_none() {
            return;
        }

        // Re-route whatever was in flight on this peer.
        let orphaned: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.peer == key)
            .map(|(&index, _)| index)
            .collect();
        for index in orphaned {
            self.pending.remove(&index);
            let length = self.piece_size(index);
            let _ = self.request_from_any(index, 0, length, Some(key));
        }

        if self.fetch.as_ref().is_some_and(|f| f.peer == key) {
            self.fetch = None;
            self.begin_fetch();
        }

        let _ = self
            .events
            .send(SwarmEvent::PeerDisconnected { peer: key })
            .await;
    }

    async fn on_exchange(&mut self, key: u64, message: ExchangeMessage) {
        match message {
            ExchangeMessage::Bitfield(bytes) => {
                let piece_count = self.known_piece_count();
                if let Some(entry) = self.peers.get_mut(&key) {
                    entry.bitfield_raw = Some(bytes.clone());
                    if let Some(count) = piece_count {
                        entry.bitfield = Some(Bitfield::from_bytes(&bytes, count));
                    }
                }
                self.evaluate_peer(key);
            }
            ExchangeMessage::Have { index } => {
                let piece_count = self.known_piece_count();
                if let Some(entry) = self.peers.get_mut(&key) {
                    match (piece_count, entry.bitfield.as_mut()) {
                        (Some(_), Some(bitfield)) => bitfield.set(index as usize),
                        (Some(count), None) => {
                            let mut bitfield = Bitfield::new(count);
                            bitfield.set(index as usize);
                            entry.bitfield = Some(bitfield);
                        }
                        (None, _) => entry.early_haves.push(index),
                    }
                }
                self.evaluate_peer(key);
            }
            ExchangeMessage::Request {
                index,
                offset,
                length,
            } => self.serve_piece(key, index, offset, length),
            ExchangeMessage::Piece {
                index,
                offset,
                data,
            } => {
                self.pending.remove(&index);
                let _ = self
                    .events
                    .send(SwarmEvent::PieceReceived {
                        peer: key,
                        index,
                        offset,
                        data,
                    })
                    .await;
            }
            ExchangeMessage::Interest(interested) => {
                if let Some(entry) = self.peers.get_mut(&key) {
                    entry.peer_interested = interested;
                }
            }
        }
    }

    /// Answers a remote piece request from the shared store. A request for
    /// a piece we lack, or with bad coordinates, is logged and ignored;
    /// the remote's own timeout covers it.
    fn serve_piece(&mut self, key: u64, index: u32, offset: u32, length: u32) {
        let data = match self.store.read().get(index) {
            Ok(data) => data,
            Err(_) => {
                debug!(peer = key, index, "request for piece we lack");
                return;
            }
        };

        let start = offset as usize;
        let end = start + length as usize;
        if end > data.len() {
            debug!(peer = key, index, offset, length, "request out of piece bounds");
            return;
        }

        if let Some(entry) = self.peers.get(&key) {
            send_peer(
                &entry.commands,
                PeerCommand::Exchange(ExchangeMessage::Piece {
                    index,
                    offset,
                    data: data.slice(start..end),
                }),
            );
        }
    }

    async fn on_metadata(&mut self, key: u64, message: MetadataMessage) {
        match message {
            MetadataMessage::HaveMetadata(have) => {
                if let Some(entry) = self.peers.get_mut(&key) {
                    entry.has_metadata = have;
                }
                if have {
                    self.begin_fetch();
                }
            }
            MetadataMessage::PieceBitfield => {
                let response = match &self.metainfo {
                    Some(metainfo) => {
                        let count = chunk_count(metainfo.raw.len(), METADATA_CHUNK_SIZE);
                        MetadataMessage::Bitfield {
                            bitfield: Bitfield::full(count as usize).to_bytes(),
                            piece_count: count,
                            piece_length: METADATA_CHUNK_SIZE,
                        }
                    }
                    None => MetadataMessage::Error("metadata not available".into()),
                };
                if let Some(entry) = self.peers.get(&key) {
                    send_peer(&entry.commands, PeerCommand::Metadata(response));
                }
            }
            MetadataMessage::Bitfield {
                piece_count,
                piece_length,
                ..
            } => {
                if !self.fetch.as_ref().is_some_and(|f| f.peer == key && f.reassembly.is_none()) {
                    debug!(peer = key, "unsolicited metadata bitfield");
                    return;
                }
                match MetadataFetch::new(piece_count, piece_length) {
                    Ok(reassembly) => {
                        if let Some(fetch) = self.fetch.as_mut() {
                            fetch.reassembly = Some(reassembly);
                        }
                        self.send_next_fetch(key);
                    }
                    Err(e) => {
                        warn!(peer = key, "bad metadata chunking: {e}");
                        self.fail_fetch(key);
                    }
                }
            }
            MetadataMessage::Fetch { index } => {
                let response = match &self.metainfo {
                    Some(metainfo) => match chunk_of(&metainfo.raw, index, METADATA_CHUNK_SIZE) {
                        Some(data) => MetadataMessage::Piece { index, data },
                        None => MetadataMessage::Error(format!("chunk {index} out of range")),
                    },
                    None => MetadataMessage::Error("metadata not available".into()),
                };
                if let Some(entry) = self.peers.get(&key) {
                    send_peer(&entry.commands, PeerCommand::Metadata(response));
                }
            }
            MetadataMessage::Piece { index, data } => self.on_metadata_chunk(key, index, data).await,
            MetadataMessage::ReceivedMetainfo => {
                debug!(peer = key, "peer completed metadata bootstrap");
            }
            MetadataMessage::Error(message) => {
                warn!(peer = key, "metadata error from peer: {message}");
                if self.fetch.as_ref().is_some_and(|f| f.peer == key) {
                    self.fail_fetch(key);
                }
            }
        }
    }

    async fn on_metadata_chunk(&mut self, key: u64, index: u32, data: Bytes) {
        if !self.fetch.as_ref().is_some_and(|f| f.peer == key) {
            debug!(peer = key, "unsolicited metadata chunk");
            return;
        }
        let Some(reassembly) = self.fetch.as_mut().and_then(|f| f.reassembly.as_mut()) else {
            self.fail_fetch(key);
            return;
        };

        if let Err(e) = reassembly.accept(index, data) {
            warn!(peer = key, "bad metadata chunk: {e}");
            self.fail_fetch(key);
            return;
        }

        if !reassembly.is_complete() {
            self.send_next_fetch(key);
            return;
        }

        let assembled = match reassembly.assemble() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer = key, "metadata reassembly failed: {e}");
                self.fail_fetch(key);
                return;
            }
        };

        let Some(id) = self.id.clone() else {
            self.fetch = None;
            return;
        };
        match Handle::decode_verified(
            &assembled,
            &id,
            self.caps.hasher.as_ref(),
            self.caps.signer.as_ref(),
        ) {
            Ok(handle) => {
                info!(id = %id, "metadata bootstrap validated");
                self.fetch = None;
                self.fetch_complete = true;
                if let Some(entry) = self.peers.get(&key) {
                    send_peer(
                        &entry.commands,
                        PeerCommand::Metadata(MetadataMessage::ReceivedMetainfo),
                    );
                }
                let _ = self.events.send(SwarmEvent::MetadataFetched(handle)).await;
            }
            Err(e) => {
                // Fatal for this fetch; this peer is never asked again.
                warn!(peer = key, "metadata envelope rejected: {e}");
                if let Some(entry) = self.peers.get(&key) {
                    send_peer(
                        &entry.commands,
                        PeerCommand::Metadata(MetadataMessage::Error(
                            "envelope validation failed".into(),
                        )),
                    );
                }
                self.fail_fetch(key);
            }
        }
    }

    /// Starts a metadata fetch against the first usable announcing peer,
    /// if none is running and the descriptor is still unknown.
    fn begin_fetch(&mut self) {
        if self.metainfo.is_some() || self.fetch_complete || self.fetch.is_some() {
            return;
        }
        let candidate = self.peers.iter().find(|&(key, entry)| {
            entry.has_metadata && entry.supports_metadata && !self.fetch_failed.contains(key)
        });
        let Some((&key, entry)) = candidate else {
            return;
        };

        debug!(peer = key, "starting metadata fetch");
        send_peer(
            &entry.commands,
            PeerCommand::Metadata(MetadataMessage::PieceBitfield),
        );
        self.fetch = Some(FetchState {
            peer: key,
            reassembly: None,
        });
    }

    fn fail_fetch(&mut self, key: u64) {
        self.fetch = None;
        self.fetch_failed.insert(key);
        self.begin_fetch();
    }

    fn send_next_fetch(&mut self, key: u64) {
        let next = self
            .fetch
            .as_ref()
            .and_then(|f| f.reassembly.as_ref())
            .and_then(|r| r.next_missing());
        if let (Some(index), Some(entry)) = (next, self.peers.get(&key)) {
            send_peer(
                &entry.commands,
                PeerCommand::Metadata(MetadataMessage::Fetch { index }),
            );
        }
    }

    fn apply_metainfo(&mut self, metainfo: SwarmMetainfo) {
        self.metainfo = Some(metainfo);
        self.fetch = None;
        self.fetch_complete = true;

        let count = self.known_piece_count().unwrap_or(0);
        let local_bits = self.store.read().bitfield().to_bytes();
        let keys: Vec<u64> = self.peers.keys().copied().collect();
        for key in keys {
            if let Some(entry) = self.peers.get_mut(&key) {
                if let Some(raw) = entry.bitfield_raw.clone() {
                    entry.bitfield = Some(Bitfield::from_bytes(&raw, count));
                }
                if !entry.early_haves.is_empty() {
                    let bitfield = entry
                        .bitfield
                        .get_or_insert_with(|| Bitfield::new(count));
                    for index in entry.early_haves.drain(..) {
                        bitfield.set(index as usize);
                    }
                }
                send_peer(
                    &entry.commands,
                    PeerCommand::Exchange(ExchangeMessage::Bitfield(local_bits.clone())),
                );
                if entry.supports_metadata {
                    send_peer(
                        &entry.commands,
                        PeerCommand::Metadata(MetadataMessage::HaveMetadata(true)),
                    );
                }
            }
            self.evaluate_peer(key);
        }
    }

    /// Interest and request scheduling for one peer: every piece it has
    /// and the local store lacks is requested, ascending, skipping pieces
    /// already in flight. A wholly disjoint peer gets (and keeps) an
    /// uninterested connection.
    fn evaluate_peer(&mut self, key: u64) {
        if self.known_piece_count().is_none() {
            return;
        }
        let local = self.store.read().bitfield();
        let Some(entry) = self.peers.get(&key) else {
            return;
        };
        let Some(remote) = entry.bitfield.clone() else {
            return;
        };

        let wanted = remote.missing_from(&local);
        let interested = !wanted.is_empty() && self.globally_interested;
        self.set_interest(key, interested);
        if !interested {
            return;
        }

        for index in wanted {
            let index = index as u32;
            if self.pending.contains_key(&index) {
                continue;
            }
            let length = self.piece_size(index);
            if let Some(entry) = self.peers.get(&key) {
                send_peer(
                    &entry.commands,
                    PeerCommand::Exchange(ExchangeMessage::Request {
                        index,
                        offset: 0,
                        length,
                    }),
                );
                self.pending.insert(
                    index,
                    PendingRequest {
                        peer: key,
                        deadline: Instant::now() + REQUEST_TIMEOUT,
                    },
                );
            }
        }
    }

    fn set_interest(&mut self, key: u64, interested: bool) {
        if let Some(entry) = self.peers.get_mut(&key) {
            if entry.interested != interested {
                entry.interested = interested;
                send_peer(
                    &entry.commands,
                    PeerCommand::Exchange(ExchangeMessage::Interest(interested)),
                );
            }
        }
    }

    /// Issues a request to any eligible peer holding `index`, or fails
    /// with `NoPeerAvailable` before anything touches the wire.
    fn request_from_any(
        &mut self,
        index: u32,
        offset: u32,
        length: u32,
        exclude: Option<u64>,
    ) -> Result<(), SwarmError> {
        let candidate = self.peers.iter().find(|(&key, entry)| {
            Some(key) != exclude
                && entry
                    .bitfield
                    .as_ref()
                    .is_some_and(|b| b.has(index as usize))
        });
        let Some((&key, entry)) = candidate else {
            return Err(SwarmError::NoPeerAvailable(index));
        };

        send_peer(
            &entry.commands,
            PeerCommand::Exchange(ExchangeMessage::Request {
                index,
                offset,
                length,
            }),
        );
        self.pending.insert(
            index,
            PendingRequest {
                peer: key,
                deadline: Instant::now() + REQUEST_TIMEOUT,
            },
        );
        Ok(())
    }

    /// Periodic maintenance: expire overdue requests onto other peers and
    /// re-issue any wanted piece that has no request in flight.
    fn on_tick(&mut self) {
        let now = Instant::now();
        let expired: Vec<(u32, u64)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&index, p)| (index, p.peer))
            .collect();
        for (index, peer) in expired {
            debug!(index, peer, "piece request timed out");
            self.pending.remove(&index);
            let length = self.piece_size(index);
            let _ = self.request_from_any(index, 0, length, Some(peer));
        }

        if self.globally_interested && self.known_piece_count().is_some() {
            let keys: Vec<u64> = self.peers.keys().copied().collect();
            for key in keys {
                self.evaluate_peer(key);
            }
        }
    }

    fn known_piece_count(&self) -> Option<usize> {
        self.metainfo
            .as_ref()
            .map(|_| self.store.read().piece_count())
    }

    fn piece_size(&self, index: u32) -> u32 {
        let Some(metainfo) = &self.metainfo else {
            return 0;
        };
        let start = u64::from(index) * metainfo.piece_length;
        if start >= metainfo.total_length {
            0
        } else {
            (metainfo.total_length - start).min(metainfo.piece_length) as u32
        }
    }
}

/// Commands from the coordinator are fire-and-forget; a full peer channel
/// means the peer is stalled, and the timeout/rescue pass recovers any
/// dropped request.
fn send_peer(commands: &mpsc::Sender<PeerCommand>, command: PeerCommand) {
    if commands.try_send(command).is_err() {
        warn!("peer command channel full, dropping command");
    }
}

/// Per-connection driver: forwards inbound messages up, writes queued
/// commands out. Ends on the first I/O or protocol error, which the
/// coordinator observes as a disconnect.
async fn drive_peer<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
    mut conn: PeerConnection<S>,
    mut commands: mpsc::Receiver<PeerCommand>,
    inbound: &mpsc::Sender<PeerInbound>,
    key: u64,
) {
    loop {
        tokio::select! {
            message = conn.receive() => match message {
                Ok(message) => {
                    if inbound
                        .send(PeerInbound::Message { key, message })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    debug!(peer = key, "connection ended: {e}");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(PeerCommand::Exchange(message)) => {
                    if let Err(e) = conn.send_exchange(&message).await {
                        debug!(peer = key, "send failed: {e}");
                        break;
                    }
                }
                Some(PeerCommand::Metadata(message)) => {
                    if let Err(e) = conn.send_metadata(&message).await {
                        debug!(peer = key, "send failed: {e}");
                        break;
                    }
                }
                Some(PeerCommand::Close) | None => break,
            },
        }
    }
    conn.close();
}
