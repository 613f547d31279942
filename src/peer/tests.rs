use bytes::Bytes;

use super::*;

#[test]
fn peer_id_has_client_prefix() {
    let a = PeerId::generate();
    let b = PeerId::generate();
    assert_ne!(a.0, b.0);
    assert_eq!(a.client_id(), Some("MB0001"));
}

#[test]
fn bitfield_set_clear_count() {
    let mut bf = Bitfield::new(100);
    assert!(!bf.has(0));

    bf.set(0);
    bf.set(99);
    assert!(bf.has(0));
    assert!(bf.has(99));
    assert_eq!(bf.count_ones(), 2);

    bf.clear(0);
    assert!(!bf.has(0));
    assert_eq!(bf.count_ones(), 1);

    // Out-of-range indices are inert.
    bf.set(100);
    assert_eq!(bf.count_ones(), 1);
}

#[test]
fn bitfield_from_bytes_clears_spare_bits() {
    // 10 pieces in 2 bytes; the low 6 bits of the second byte are spare.
    let bf = Bitfield::from_bytes(&[0xFF, 0xFF], 10);
    assert_eq!(bf.count_ones(), 10);
    assert!(bf.has(9));
    assert!(!bf.has(10));
    assert_eq!(bf.as_bytes(), &[0xFF, 0xC0]);
}

#[test]
fn bitfield_missing_from() {
    let mut remote = Bitfield::new(8);
    remote.set(1);
    remote.set(3);
    remote.set(5);

    let mut local = Bitfield::new(8);
    local.set(3);

    assert_eq!(remote.missing_from(&local), vec![1, 5]);
}

#[test]
fn handshake_roundtrip() {
    let topic = Bytes::from_static(&[0xAB; 64]);
    let hs = Handshake::new(topic.clone(), [7u8; 20]);
    let encoded = hs.encode();

    let (decoded, consumed) = Handshake::decode(&encoded).unwrap().unwrap();
    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded.topic, topic);
    assert_eq!(decoded.peer_id, [7u8; 20]);
}

#[test]
fn handshake_wants_more_bytes_when_truncated() {
    let hs = Handshake::new(Bytes::from_static(&[1; 20]), [0u8; 20]);
    let encoded = hs.encode();
    assert!(Handshake::decode(&encoded[..10]).unwrap().is_none());
}

#[test]
fn handshake_rejects_foreign_protocol() {
    let mut encoded = Handshake::new(Bytes::from_static(&[1; 20]), [0u8; 20])
        .encode()
        .to_vec();
    encoded[1] = b'X';
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn exchange_message_roundtrip() {
    let messages = vec![
        ExchangeMessage::Bitfield(Bytes::from_static(&[0xF0])),
        ExchangeMessage::Have { index: 42 },
        ExchangeMessage::Request {
            index: 1,
            offset: 0,
            length: 16384,
        },
        ExchangeMessage::Piece {
            index: 1,
            offset: 0,
            data: Bytes::from_static(b"hello"),
        },
        ExchangeMessage::Interest(true),
        ExchangeMessage::Interest(false),
    ];

    for msg in messages {
        let encoded = msg.encode().unwrap();
        assert_eq!(ExchangeMessage::decode(&encoded).unwrap(), msg);
    }
}

#[test]
fn exchange_message_rejects_unknown_flag() {
    // [99]
    assert!(matches!(
        ExchangeMessage::decode(b"li99ee"),
        Err(PeerError::InvalidMessage(_))
    ));
}

#[test]
fn metadata_message_roundtrip() {
    let messages = vec![
        MetadataMessage::HaveMetadata(true),
        MetadataMessage::HaveMetadata(false),
        MetadataMessage::PieceBitfield,
        MetadataMessage::Bitfield {
            bitfield: Bytes::from_static(&[0x80]),
            piece_count: 1,
            piece_length: 16384,
        },
        MetadataMessage::Fetch { index: 0 },
        MetadataMessage::Piece {
            index: 0,
            data: Bytes::from_static(b"chunk"),
        },
        MetadataMessage::ReceivedMetainfo,
        MetadataMessage::Error("validation failed".to_string()),
    ];

    for msg in messages {
        let encoded = msg.encode().unwrap();
        assert_eq!(MetadataMessage::decode(&encoded).unwrap(), msg);
    }
}

#[test]
fn flag_namespaces_are_disjoint() {
    // An exchange payload must not decode as a metadata message.
    let exchange = ExchangeMessage::Have { index: 3 }.encode().unwrap();
    assert!(MetadataMessage::decode(&exchange).is_err());

    let metadata = MetadataMessage::Fetch { index: 3 }.encode().unwrap();
    assert!(ExchangeMessage::decode(&metadata).is_err());
}

#[test]
fn extension_handshake_advertises_channels() {
    let hs = ExtensionHandshake::with_channels(&[(EXCHANGE_CHANNEL, 1), (METADATA_CHANNEL, 2)]);
    let encoded = hs.encode().unwrap();
    let decoded = ExtensionHandshake::decode(&encoded).unwrap();

    assert_eq!(decoded.channel_id(EXCHANGE_CHANNEL), Some(1));
    assert_eq!(decoded.channel_id(METADATA_CHANNEL), Some(2));
    assert_eq!(decoded.channel_id("other"), None);
}

#[test]
fn metadata_chunking_math() {
    assert_eq!(chunk_count(0, METADATA_CHUNK_SIZE), 0);
    assert_eq!(chunk_count(1, METADATA_CHUNK_SIZE), 1);
    assert_eq!(chunk_count(16384, METADATA_CHUNK_SIZE), 1);
    assert_eq!(chunk_count(16385, METADATA_CHUNK_SIZE), 2);

    let data = Bytes::from(vec![9u8; 20000]);
    assert_eq!(chunk_of(&data, 0, METADATA_CHUNK_SIZE).unwrap().len(), 16384);
    assert_eq!(chunk_of(&data, 1, METADATA_CHUNK_SIZE).unwrap().len(), 3616);
    assert!(chunk_of(&data, 2, METADATA_CHUNK_SIZE).is_none());
}

#[test]
fn metadata_fetch_reassembles_in_order() {
    let mut fetch = MetadataFetch::new(3, 4).unwrap();
    assert_eq!(fetch.next_missing(), Some(0));

    fetch.accept(0, Bytes::from_static(b"aaaa")).unwrap();
    assert_eq!(fetch.next_missing(), Some(1));
    fetch.accept(1, Bytes::from_static(b"bbbb")).unwrap();
    assert_eq!(fetch.next_missing(), Some(2));
    assert!(!fetch.is_complete());

    // Final chunk may be short.
    fetch.accept(2, Bytes::from_static(b"cc")).unwrap();
    assert!(fetch.is_complete());
    assert_eq!(fetch.next_missing(), None);
    assert_eq!(fetch.assemble().unwrap(), b"aaaabbbbcc");
}

#[test]
fn metadata_fetch_rejects_bad_chunks() {
    let mut fetch = MetadataFetch::new(2, 4).unwrap();
    assert!(fetch.accept(5, Bytes::from_static(b"aaaa")).is_err());
    assert!(fetch.accept(0, Bytes::new()).is_err());
    assert!(fetch.accept(0, Bytes::from_static(b"aaaaa")).is_err());
    // Non-final chunk must be full-size.
    assert!(fetch.accept(0, Bytes::from_static(b"aa")).is_err());
}

#[test]
fn metadata_fetch_rejects_degenerate_parameters() {
    assert!(MetadataFetch::new(0, 16384).is_err());
    assert!(MetadataFetch::new(1, 0).is_err());
    assert!(MetadataFetch::new(1024, 1 << 20).is_err());
}

#[tokio::test]
async fn connections_establish_over_duplex() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let topic = Bytes::from_static(&[0x11; 20]);

    let topic_a = topic.clone();
    let left = tokio::spawn(async move {
        PeerConnection::establish(a, topic_a, PeerId::generate(), None).await
    });
    let right = PeerConnection::establish(b, topic, PeerId::generate(), Some(Bytes::from_static(&[0x80])))
        .await
        .unwrap();

    let mut left = left.await.unwrap().unwrap();
    assert_eq!(right.state, ConnectionState::Active);
    assert!(right.supports_metadata());

    // The right side sent its bitfield during establish.
    match left.receive().await.unwrap() {
        InboundMessage::Exchange(ExchangeMessage::Bitfield(bits)) => {
            assert_eq!(bits, Bytes::from_static(&[0x80]));
        }
        other => panic!("expected bitfield, got {other:?}"),
    }
}

#[tokio::test]
async fn establish_rejects_topic_mismatch() {
    let (a, b) = tokio::io::duplex(64 * 1024);

    let left = tokio::spawn(async move {
        PeerConnection::establish(a, Bytes::from_static(&[0x11; 20]), PeerId::generate(), None)
            .await
    });
    let right =
        PeerConnection::establish(b, Bytes::from_static(&[0x22; 20]), PeerId::generate(), None)
            .await;

    assert!(matches!(right, Err(PeerError::TopicMismatch)));
    assert!(matches!(
        left.await.unwrap(),
        Err(PeerError::TopicMismatch) | Err(PeerError::ConnectionClosed) | Err(PeerError::Io(_))
    ));
}

#[tokio::test]
async fn messages_flow_between_established_connections() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let topic = Bytes::from_static(&[0x33; 32]);

    let topic_a = topic.clone();
    let left = tokio::spawn(async move {
        PeerConnection::establish(a, topic_a, PeerId::generate(), None).await
    });
    let mut right = PeerConnection::establish(b, topic, PeerId::generate(), None)
        .await
        .unwrap();
    let mut left = left.await.unwrap().unwrap();

    right
        .send_exchange(&ExchangeMessage::Request {
            index: 2,
            offset: 0,
            length: 64,
        })
        .await
        .unwrap();
    right
        .send_metadata(&MetadataMessage::HaveMetadata(true))
        .await
        .unwrap();

    match left.receive().await.unwrap() {
        InboundMessage::Exchange(ExchangeMessage::Request { index, .. }) => assert_eq!(index, 2),
        other => panic!("expected request, got {other:?}"),
    }
    match left.receive().await.unwrap() {
        InboundMessage::Metadata(MetadataMessage::HaveMetadata(true)) => {}
        other => panic!("expected have_metadata, got {other:?}"),
    }
}
