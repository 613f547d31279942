use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::debug;

/// The stream shape a discovery strategy must deliver: any established
/// duplex byte stream.
pub trait PeerIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerIo for T {}

/// A boxed established connection, as handed to the coordinator.
pub type PeerStream = Box<dyn PeerIo>;

/// A peer discovery strategy.
///
/// Given a topic (the torrent identifier bytes), a strategy delivers
/// established connections into the provided sink until stopped. How the
/// connections come to exist (trackers, a DHT, rendezvous servers, a
/// static list) is entirely the strategy's business.
pub trait Discovery: Send + Sync {
    /// Begins discovery for `topic`, delivering connections into `sink`.
    fn start(&self, topic: Bytes, sink: mpsc::Sender<PeerStream>);

    /// Halts discovery for `topic`. Idempotent; never fails when no
    /// discovery is active.
    fn stop(&self, topic: &Bytes);
}

/// A discovery strategy over pre-established streams.
///
/// Streams queued with [`add`](StaticDiscovery::add) are delivered once a
/// search starts; streams added while a search is active are delivered
/// immediately. Used for direct-connect setups and throughout the tests.
#[derive(Default)]
pub struct StaticDiscovery {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queued: Vec<PeerStream>,
    sink: Option<mpsc::Sender<PeerStream>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an established stream for delivery.
    pub fn add(&self, stream: impl PeerIo + 'static) {
        let mut state = self.state.lock();
        let boxed: PeerStream = Box::new(stream);
        match &state.sink {
            Some(sink) => {
                if let Err(e) = sink.try_send(boxed) {
                    debug!("static discovery sink full, queuing: {e}");
                    state.queued.push(e.into_inner());
                }
            }
            None => state.queued.push(boxed),
        }
    }
}

impl Discovery for StaticDiscovery {
    fn start(&self, _topic: Bytes, sink: mpsc::Sender<PeerStream>) {
        let mut state = self.state.lock();
        for stream in state.queued.drain(..) {
            if let Err(e) = sink.try_send(stream) {
                debug!("static discovery sink full, dropping stream: {e}");
            }
        }
        state.sink = Some(sink);
    }

    fn stop(&self, _topic: &Bytes) {
        self.state.lock().sink = None;
    }
}
