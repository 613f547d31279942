use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::*;
use crate::crypto::{Ed25519Signer, Signer, StdHasher};
use crate::metainfo::{DescriptorBuilder, SignedMetainfoFile, TorrentId};

fn service() -> PointerService {
    let hasher = Arc::new(StdHasher);
    let signer = Arc::new(Ed25519Signer);
    let store = Arc::new(MemoryPointerStore::new(hasher.clone(), signer.clone()));
    PointerService::new(store, hasher, signer)
}

#[tokio::test]
async fn publish_then_get_roundtrips() {
    let service = service();
    let keys = Ed25519Signer.generate_key_pair().unwrap();

    let key = service
        .publish(&keys, Bytes::from_static(b"Hello"), None, 0)
        .await
        .unwrap();

    let record = service.get(&key, None).await.unwrap();
    assert_eq!(record.value, Bytes::from_static(b"Hello"));
    assert_eq!(record.seq, 0);
    assert_eq!(record.public_key, keys.public_key);
}

#[tokio::test]
async fn get_of_unknown_key_is_not_found() {
    let service = service();
    assert!(matches!(
        service.get(&[0u8; 20], None).await,
        Err(PointerError::NotFound)
    ));
}

#[tokio::test]
async fn stale_sequence_is_rejected() {
    let service = service();
    let keys = Ed25519Signer.generate_key_pair().unwrap();

    service
        .publish(&keys, Bytes::from_static(b"v1"), None, 5)
        .await
        .unwrap();

    // Same seq and lower seq both fail; the stored record is untouched.
    for seq in [5, 3] {
        assert!(matches!(
            service
                .publish(&keys, Bytes::from_static(b"v2"), None, seq)
                .await,
            Err(PointerError::StaleSequence { current: 5 })
        ));
    }

    let key = MutableRecord::derive_key(&keys.public_key, &StdHasher).unwrap();
    assert_eq!(
        service.get(&key, None).await.unwrap().value,
        Bytes::from_static(b"v1")
    );
}

#[tokio::test]
async fn forged_record_never_reaches_the_caller() {
    let hasher = Arc::new(StdHasher);
    let signer = Arc::new(Ed25519Signer);
    let store = Arc::new(MemoryPointerStore::new(hasher.clone(), signer.clone()));
    let service = PointerService::new(store.clone(), hasher, signer);

    let keys = Ed25519Signer.generate_key_pair().unwrap();
    let value = Bytes::from_static(b"real");
    let payload = MutableRecord::signing_payload(&value, 0, None);
    let signature = Ed25519Signer.sign(&payload, &keys).unwrap();
    let key = MutableRecord::derive_key(&keys.public_key, &StdHasher).unwrap();

    // A store write that bypasses signing: value swapped after signature.
    let forged = MutableRecord {
        key: key.clone(),
        public_key: keys.public_key.clone(),
        salt: None,
        seq: 0,
        value: Bytes::from_static(b"fake"),
        signature,
    };
    assert!(matches!(
        store.put(forged).await,
        Err(PointerError::InvalidRecord(_))
    ));
    assert!(matches!(
        service.get(&key, None).await,
        Err(PointerError::NotFound)
    ));
}

#[tokio::test]
async fn salted_records_occupy_separate_slots() {
    let service = service();
    let keys = Ed25519Signer.generate_key_pair().unwrap();

    let key = service
        .publish(&keys, Bytes::from_static(b"a"), Some(Bytes::from_static(b"one")), 0)
        .await
        .unwrap();
    service
        .publish(&keys, Bytes::from_static(b"b"), Some(Bytes::from_static(b"two")), 0)
        .await
        .unwrap();

    let a = service.get(&key, Some(b"one".as_slice())).await.unwrap();
    let b = service.get(&key, Some(b"two".as_slice())).await.unwrap();
    assert_eq!(a.value, Bytes::from_static(b"a"));
    assert_eq!(b.value, Bytes::from_static(b"b"));
    assert!(matches!(
        service.get(&key, None).await,
        Err(PointerError::NotFound)
    ));
}

#[tokio::test]
async fn subscriber_sees_each_update_once_in_order() {
    let service = service();
    let keys = Ed25519Signer.generate_key_pair().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let key = service
        .publish(&keys, Bytes::from_static(b"Hello"), None, 0)
        .await
        .unwrap();

    let subscription = service.subscribe(
        key.clone(),
        None,
        Duration::from_millis(10),
        move |record| {
            let _ = tx.send((record.seq, record.value.clone()));
        },
    );

    let (seq, value) = rx.recv().await.unwrap();
    assert_eq!(seq, 0);
    assert_eq!(value, Bytes::from_static(b"Hello"));

    service
        .publish(&keys, Bytes::from_static(b"World"), None, 1)
        .await
        .unwrap();

    let (seq, value) = rx.recv().await.unwrap();
    assert_eq!(seq, 1);
    assert_eq!(value, Bytes::from_static(b"World"));

    // No re-delivery of an unchanged record.
    assert!(
        tokio::time::timeout(Duration::from_millis(80), rx.recv())
            .await
            .is_err()
    );
    subscription.cancel();
}

#[tokio::test]
async fn sequence_delivery_is_strictly_monotonic() {
    let service = service();
    let keys = Ed25519Signer.generate_key_pair().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let key = service
        .publish(&keys, Bytes::from_static(b"first"), None, 10)
        .await
        .unwrap();

    let subscription = service.subscribe(
        key.clone(),
        None,
        Duration::from_millis(10),
        move |record| {
            let _ = tx.send(record.seq);
        },
    );

    assert_eq!(rx.recv().await, Some(10));
    service
        .publish(&keys, Bytes::from_static(b"second"), None, 12)
        .await
        .unwrap();
    assert_eq!(rx.recv().await, Some(12));

    // Seq 10 is already delivered; later polls must never re-deliver it
    // or anything below 12.
    assert!(
        tokio::time::timeout(Duration::from_millis(80), rx.recv())
            .await
            .is_err()
    );
    subscription.cancel();
}

#[tokio::test]
async fn cancel_stops_deliveries() {
    let service = service();
    let keys = Ed25519Signer.generate_key_pair().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let key = service
        .publish(&keys, Bytes::from_static(b"v0"), None, 0)
        .await
        .unwrap();

    let subscription = service.subscribe(
        key.clone(),
        None,
        Duration::from_millis(10),
        move |record| {
            let _ = tx.send(record.seq);
        },
    );
    assert_eq!(rx.recv().await, Some(0));

    subscription.cancel();
    assert!(subscription.is_cancelled());

    service
        .publish(&keys, Bytes::from_static(b"v1"), None, 1)
        .await
        .unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(80), rx.recv())
            .await
            .map(|r| r.is_none())
            .unwrap_or(true)
    );

    // Idempotent.
    subscription.cancel();
}

#[tokio::test]
async fn publish_handle_resolves_to_current_infohash() {
    let service = service();
    let signer = Ed25519Signer;
    let keys = signer.generate_key_pair().unwrap();

    let (first, _) = DescriptorBuilder::new("v1")
        .piece_length(8)
        .add_file("a", vec![1; 8])
        .build(&StdHasher)
        .unwrap();
    let signed_first = SignedMetainfoFile::sign(first.clone(), &keys, &signer).unwrap();
    service.publish_handle(&keys, &signed_first, 0).await.unwrap();

    assert_eq!(
        service.resolve(&keys.public_key).await.unwrap(),
        TorrentId::Hash(first.infohash.clone())
    );

    // Re-point the same identity at new content.
    let (second, _) = DescriptorBuilder::new("v2")
        .piece_length(8)
        .add_file("a", vec![2; 8])
        .build(&StdHasher)
        .unwrap();
    let signed_second = SignedMetainfoFile::sign(second.clone(), &keys, &signer).unwrap();
    service.publish_handle(&keys, &signed_second, 1).await.unwrap();

    assert_eq!(
        service.resolve(&keys.public_key).await.unwrap(),
        TorrentId::Hash(second.infohash)
    );
}
