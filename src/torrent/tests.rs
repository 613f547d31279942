use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use super::*;
use crate::crypto::{Capabilities, Ed25519Signer, StdHasher};
use crate::metainfo::{DescriptorBuilder, Handle, MetainfoFile};
use crate::peer::{
    ExchangeMessage, InboundMessage, MetadataMessage, PeerConnection, PeerId,
};
use crate::swarm::{Discovery, StaticDiscovery, SwarmError};

const TEST_DEADLINE: Duration = Duration::from_secs(10);

fn caps() -> Capabilities {
    Capabilities::new(Arc::new(StdHasher), Arc::new(Ed25519Signer))
}

fn strategies(discovery: &Arc<StaticDiscovery>) -> Vec<Arc<dyn Discovery>> {
    let strategy: Arc<dyn Discovery> = discovery.clone();
    vec![strategy]
}

fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn build(name: &str, piece_length: u64, content: &[u8]) -> (MetainfoFile, Vec<Bytes>) {
    DescriptorBuilder::new(name)
        .piece_length(piece_length)
        .add_file("data.bin", content.to_vec())
        .build(&StdHasher)
        .unwrap()
}

/// Wires a seeder and a leecher together over an in-memory duplex pair.
fn linked_discoveries() -> (Arc<StaticDiscovery>, Arc<StaticDiscovery>) {
    let (a, b) = tokio::io::duplex(1 << 20);
    let left = Arc::new(StaticDiscovery::new());
    left.add(a);
    let right = Arc::new(StaticDiscovery::new());
    right.add(b);
    (left, right)
}

async fn collect(stream: &mut ContentStream, total_len: usize) -> (usize, Vec<u8>) {
    let mut received = vec![0u8; total_len];
    let mut count = 0;
    while let Some(piece) = timeout(TEST_DEADLINE, stream.next()).await.unwrap() {
        let start = piece.offset as usize;
        received[start..start + piece.data.len()].copy_from_slice(&piece.data);
        count += 1;
    }
    (count, received)
}

#[tokio::test]
async fn seeder_to_leecher_full_transfer() {
    let caps = caps();
    let content = sample_content(2500);
    let (metainfo, pieces) = build("scenario-a", 512, &content);
    assert_eq!(pieces.len(), 5);

    let (seed_disc, leech_disc) = linked_discoveries();
    let (seeder, _seed_stream) =
        Torrent::seed(metainfo.clone(), &pieces, caps.clone(), strategies(&seed_disc)).unwrap();
    assert_eq!(seeder.state(), TorrentState::Complete);

    let (leecher, mut stream) =
        Torrent::download_with_metainfo(metainfo, caps, strategies(&leech_disc)).unwrap();
    assert_eq!(leecher.state(), TorrentState::Exchanging);

    let (count, received) = collect(&mut stream, content.len()).await;
    assert_eq!(count, 5);
    assert_eq!(received, content);
    assert_eq!(leecher.state(), TorrentState::Complete);

    seeder.stop().await;
    leecher.stop().await;
}

#[tokio::test]
async fn metadata_bootstrap_from_bare_identifier() {
    let caps = caps();
    let content = sample_content(1200);
    let (metainfo, pieces) = build("scenario-b", 256, &content);
    let id = metainfo.id();

    let (seed_disc, leech_disc) = linked_discoveries();
    let (_seeder, _seed_stream) =
        Torrent::seed(metainfo.clone(), &pieces, caps.clone(), strategies(&seed_disc)).unwrap();

    let (leecher, mut stream) = Torrent::download(id.clone(), caps, strategies(&leech_disc)).unwrap();
    assert_eq!(leecher.state(), TorrentState::AwaitingMetadata);

    let (count, received) = collect(&mut stream, content.len()).await;
    assert_eq!(count, pieces.len());
    assert_eq!(received, content);
    assert_eq!(leecher.state(), TorrentState::Complete);

    // The bootstrapped descriptor answers to the identifier it was
    // fetched under.
    let fetched = leecher.metainfo().unwrap();
    assert_eq!(fetched.id(), id);
    assert_eq!(fetched.metainfo().infohash, metainfo.infohash);
}

#[tokio::test]
async fn corrupted_metadata_never_becomes_a_descriptor() {
    let caps = caps();
    let content = sample_content(600);
    let (metainfo, _pieces) = build("scenario-b-corrupt", 256, &content);
    let id = metainfo.id();

    let (a, b) = tokio::io::duplex(1 << 20);
    let disc = Arc::new(StaticDiscovery::new());
    disc.add(a);
    let (leecher, _stream) = Torrent::download(id.clone(), caps, strategies(&disc)).unwrap();

    // Play a holder that serves garbage in place of the envelope.
    let mut fake = PeerConnection::establish(b, id.topic().clone(), PeerId::generate(), None)
        .await
        .unwrap();
    fake.send_metadata(&MetadataMessage::HaveMetadata(true))
        .await
        .unwrap();

    let garbage = Bytes::from(vec![0xAA; 300]);
    let saw_rejection = loop {
        let message = timeout(TEST_DEADLINE, fake.receive()).await.unwrap().unwrap();
        match message {
            InboundMessage::Metadata(MetadataMessage::PieceBitfield) => {
                fake.send_metadata(&MetadataMessage::Bitfield {
                    bitfield: Bytes::from_static(&[0x80]),
                    piece_count: 1,
                    piece_length: garbage.len() as u32,
                })
                .await
                .unwrap();
            }
            InboundMessage::Metadata(MetadataMessage::Fetch { index }) => {
                fake.send_metadata(&MetadataMessage::Piece {
                    index,
                    data: garbage.clone(),
                })
                .await
                .unwrap();
            }
            InboundMessage::Metadata(MetadataMessage::Error(_)) => break true,
            _ => {}
        }
    };

    assert!(saw_rejection);
    assert_eq!(leecher.state(), TorrentState::AwaitingMetadata);
    assert!(leecher.metainfo().is_none());
}

#[tokio::test]
async fn request_without_a_holder_fails_before_the_wire() {
    let caps = caps();
    let content = sample_content(600);
    let (metainfo, _pieces) = build("scenario-d", 512, &content);
    let id = metainfo.id();

    let (a, b) = tokio::io::duplex(1 << 20);
    let disc = Arc::new(StaticDiscovery::new());
    disc.add(a);
    let (leecher, _stream) =
        Torrent::download_with_metainfo(metainfo, caps, strategies(&disc)).unwrap();

    // A peer that advertises only piece 0 of 2.
    let mut fake = PeerConnection::establish(b, id.topic().clone(), PeerId::generate(), None)
        .await
        .unwrap();
    fake.send_exchange(&ExchangeMessage::Bitfield(Bytes::from_static(&[0x80])))
        .await
        .unwrap();

    // The leecher asks this peer for piece 0, which it does have.
    loop {
        let message = timeout(TEST_DEADLINE, fake.receive()).await.unwrap().unwrap();
        if let InboundMessage::Exchange(ExchangeMessage::Request { index, .. }) = message {
            assert_eq!(index, 0);
            break;
        }
    }

    // Piece 1 has no holder: resolved locally, nothing sent.
    let err = leecher
        .swarm()
        .request_piece(1, 0, 88, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::NoPeerAvailable(1)));

    assert!(
        timeout(Duration::from_millis(200), fake.receive()).await.is_err(),
        "no wire traffic may follow a NoPeerAvailable request"
    );
}

#[tokio::test]
async fn bad_piece_is_never_stored_and_is_refetched() {
    let caps = caps();
    let content = sample_content(64);
    let (metainfo, pieces) = build("bad-piece", 64, &content);
    assert_eq!(pieces.len(), 1);
    let id = metainfo.id();

    let (a, b) = tokio::io::duplex(1 << 20);
    let disc = Arc::new(StaticDiscovery::new());
    disc.add(a);
    let (leecher, mut stream) =
        Torrent::download_with_metainfo(metainfo, caps, strategies(&disc)).unwrap();

    let mut fake = PeerConnection::establish(b, id.topic().clone(), PeerId::generate(), None)
        .await
        .unwrap();
    fake.send_exchange(&ExchangeMessage::Bitfield(Bytes::from_static(&[0x80])))
        .await
        .unwrap();

    // First answer is corrupt; the retry gets the real bytes.
    let fake_task = tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok(Ok(message)) = timeout(TEST_DEADLINE, fake.receive()).await else {
                break;
            };
            if let InboundMessage::Exchange(ExchangeMessage::Request { index, offset, length }) =
                message
            {
                served += 1;
                let data = if served == 1 {
                    Bytes::from(vec![0xFF; length as usize])
                } else {
                    pieces[index as usize].clone()
                };
                if fake
                    .send_exchange(&ExchangeMessage::Piece {
                        index,
                        offset,
                        data,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
        served
    });

    let piece = timeout(TEST_DEADLINE, stream.next()).await.unwrap().unwrap();
    assert_eq!(piece.index, 0);
    assert_eq!(piece.data.as_ref(), &content[..]);
    assert!(timeout(TEST_DEADLINE, stream.next()).await.unwrap().is_none());
    assert_eq!(leecher.state(), TorrentState::Complete);

    leecher.stop().await;
    let served = fake_task.await.unwrap();
    assert!(served >= 2, "corrupt answer must trigger a re-request");
}

#[tokio::test]
async fn seeding_empty_content_is_immediately_complete() {
    let caps = caps();
    let (metainfo, pieces) = DescriptorBuilder::new("empty")
        .piece_length(64)
        .add_file("empty.bin", Vec::new())
        .build(&StdHasher)
        .unwrap();
    assert!(pieces.is_empty());

    let disc = Arc::new(StaticDiscovery::new());
    let (torrent, mut stream) = Torrent::seed(metainfo, &pieces, caps, strategies(&disc)).unwrap();
    assert_eq!(torrent.state(), TorrentState::Complete);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn seed_rejects_content_that_contradicts_the_descriptor() {
    let caps = caps();
    let content = sample_content(256);
    let (metainfo, pieces) = build("seed-checks", 64, &content);

    let short = &pieces[..pieces.len() - 1];
    assert!(matches!(
        Torrent::seed(
            metainfo.clone(),
            short,
            caps.clone(),
            strategies(&Arc::new(StaticDiscovery::new()))
        ),
        Err(TorrentError::PieceCountMismatch { .. })
    ));

    let mut tampered = pieces.clone();
    tampered[1] = Bytes::from(vec![0x00; 64]);
    assert!(matches!(
        Torrent::seed(
            metainfo,
            &tampered,
            caps,
            strategies(&Arc::new(StaticDiscovery::new()))
        ),
        Err(TorrentError::Integrity { index: 1 })
    ));
}

#[tokio::test]
async fn stop_ends_the_output_stream() {
    let caps = caps();
    let content = sample_content(600);
    let (metainfo, _pieces) = build("stopped", 256, &content);

    let (torrent, mut stream) = Torrent::download(
        Handle::Plain(metainfo).id(),
        caps,
        strategies(&Arc::new(StaticDiscovery::new())),
    )
    .unwrap();

    torrent.stop().await;
    assert!(
        timeout(TEST_DEADLINE, stream.next()).await.unwrap().is_none(),
        "stopping must close the output stream"
    );
    // Idempotent.
    torrent.stop().await;
}
