use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::record::MutableRecord;
use super::store::PointerStore;
use super::PointerError;
use crate::crypto::{Hasher, KeyPair, Signer};
use crate::metainfo::{SignedMetainfoFile, TorrentId};

/// Publish/subscribe over a [`PointerStore`].
///
/// Signing happens synchronously here, before the store sees anything;
/// retrieval re-verifies every record, so a forged or corrupted entry in
/// the substrate surfaces as [`PointerError::NotFound`], never as data.
#[derive(Clone)]
pub struct PointerService {
    store: Arc<dyn PointerStore>,
    hasher: Arc<dyn Hasher>,
    signer: Arc<dyn Signer>,
}

impl PointerService {
    pub fn new(
        store: Arc<dyn PointerStore>,
        hasher: Arc<dyn Hasher>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            store,
            hasher,
            signer,
        }
    }

    /// Signs and stores a record under `hash(keys.public_key)`, returning
    /// the key.
    pub async fn publish(
        &self,
        keys: &KeyPair,
        value: Bytes,
        salt: Option<Bytes>,
        seq: i64,
    ) -> Result<Bytes, PointerError> {
        let key = MutableRecord::derive_key(&keys.public_key, self.hasher.as_ref())?;
        let payload = MutableRecord::signing_payload(&value, seq, salt.as_deref());
        let signature = self.signer.sign(&payload, keys)?;

        let record = MutableRecord {
            key: key.clone(),
            public_key: keys.public_key.clone(),
            salt,
            seq,
            value,
            signature,
        };
        self.store.put(record).await?;
        debug!(seq, "published mutable pointer");
        Ok(key)
    }

    /// Retrieves and verifies the record under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing is stored, or when what is stored does
    /// not verify.
    pub async fn get(
        &self,
        key: &[u8],
        salt: Option<&[u8]>,
    ) -> Result<MutableRecord, PointerError> {
        let record = self.store.get(key, salt).await?;
        let consistent = record.key == key
            && record.verify(self.hasher.as_ref(), self.signer.as_ref())?;
        if !consistent {
            warn!("discarding unverifiable mutable record");
            return Err(PointerError::NotFound);
        }
        Ok(record)
    }

    /// Polls `key` on `interval` and invokes `callback` for each record
    /// whose sequence number strictly exceeds the last one delivered.
    ///
    /// The poll is a cooperative timer, not a busy-wait. The returned
    /// [`Subscription`] cancels the loop; after [`Subscription::cancel`]
    /// the callback is never invoked again, even if a poll was already in
    /// flight when the cancel landed.
    pub fn subscribe<F>(
        &self,
        key: Bytes,
        salt: Option<Bytes>,
        interval: Duration,
        mut callback: F,
    ) -> Subscription
    where
        F: FnMut(MutableRecord) + Send + 'static,
    {
        let service = self.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let delivery = Arc::new(parking_lot::Mutex::new(None::<i64>));
        let flag = cancelled.clone();
        let last_delivered = delivery.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                let result = service.get(&key, salt.as_deref()).await;
                match result {
                    Ok(record) => {
                        // The flag re-check and the delivery share one
                        // critical section with cancel(): a cancel that
                        // landed while the poll was in flight discards
                        // this result.
                        let mut last = last_delivered.lock();
                        if flag.load(Ordering::Acquire) {
                            break;
                        }
                        if last.is_none_or(|seq| record.seq > seq) {
                            *last = Some(record.seq);
                            callback(record);
                        }
                    }
                    Err(PointerError::NotFound) => {}
                    Err(e) => warn!("pointer poll failed: {e}"),
                }
            }
        });

        Subscription {
            cancelled,
            delivery,
            task,
        }
    }

    /// Publishes the infohash a signed handle points at, under the
    /// signing key's identity.
    pub async fn publish_handle(
        &self,
        keys: &KeyPair,
        handle: &SignedMetainfoFile,
        seq: i64,
    ) -> Result<Bytes, PointerError> {
        self.publish(keys, handle.file.infohash.clone(), None, seq)
            .await
    }

    /// Resolves a publisher's current content hash from its public key.
    pub async fn resolve(&self, public_key: &[u8]) -> Result<TorrentId, PointerError> {
        let key = MutableRecord::derive_key(public_key, self.hasher.as_ref())?;
        let record = self.get(&key, None).await?;
        Ok(TorrentId::Hash(record.value))
    }
}

/// Cancellation handle for one subscription.
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
    delivery: Arc<parking_lot::Mutex<Option<i64>>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stops the subscription. Idempotent; guarantees no further callback
    /// invocations once it returns.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // Wait out any delivery already in its critical section; every
        // later one observes the flag and bails.
        drop(self.delivery.lock());
        self.task.abort();
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
