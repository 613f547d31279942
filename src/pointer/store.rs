use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use super::record::MutableRecord;
use super::PointerError;
use crate::crypto::{Hasher, Signer};

/// The distributed-store capability the pointer service runs against.
///
/// Implementations talk to whatever substrate actually holds the records
/// (a DHT, a rendezvous server, this process). The service never reaches
/// network peers directly; these two calls are its whole world.
#[async_trait]
pub trait PointerStore: Send + Sync {
    /// Stores a signed record, replacing an older one under the same key
    /// and salt.
    ///
    /// # Errors
    ///
    /// `InvalidRecord` for records that fail verification,
    /// `StaleSequence` when the stored record is as new or newer.
    async fn put(&self, record: MutableRecord) -> Result<Bytes, PointerError>;

    /// Retrieves the record under `key` and `salt`.
    async fn get(&self, key: &[u8], salt: Option<&[u8]>) -> Result<MutableRecord, PointerError>;
}

/// In-process store implementing the same replacement rules a distributed
/// substrate enforces: signatures checked on write, replacement only with
/// a strictly greater sequence number.
pub struct MemoryPointerStore {
    hasher: Arc<dyn Hasher>,
    signer: Arc<dyn Signer>,
    records: RwLock<HashMap<(Bytes, Option<Bytes>), MutableRecord>>,
}

impl MemoryPointerStore {
    pub fn new(hasher: Arc<dyn Hasher>, signer: Arc<dyn Signer>) -> Self {
        Self {
            hasher,
            signer,
            records: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PointerStore for MemoryPointerStore {
    async fn put(&self, record: MutableRecord) -> Result<Bytes, PointerError> {
        if !record.verify(self.hasher.as_ref(), self.signer.as_ref())? {
            return Err(PointerError::InvalidRecord("signature rejected".into()));
        }

        let slot = (record.key.clone(), record.salt.clone());
        let mut records = self.records.write();
        if let Some(existing) = records.get(&slot) {
            if existing.seq >= record.seq {
                return Err(PointerError::StaleSequence {
                    current: existing.seq,
                });
            }
        }
        debug!(seq = record.seq, "stored mutable record");
        let key = record.key.clone();
        records.insert(slot, record);
        Ok(key)
    }

    async fn get(&self, key: &[u8], salt: Option<&[u8]>) -> Result<MutableRecord, PointerError> {
        let slot = (
            Bytes::copy_from_slice(key),
            salt.map(Bytes::copy_from_slice),
        );
        self.records
            .read()
            .get(&slot)
            .cloned()
            .ok_or(PointerError::NotFound)
    }
}
