use bytes::Bytes;

use super::StoreError;
use crate::peer::Bitfield;

/// Piece buffers plus the possession bitfield for one torrent.
///
/// `put` is idempotent-safe: re-storing an index replaces the buffer and
/// leaves the bitfield bit set, so a duplicate arrival cannot corrupt
/// state.
#[derive(Debug)]
pub struct PieceStore {
    pieces: Vec<Option<Bytes>>,
    bitfield: Bitfield,
}

impl PieceStore {
    /// Creates an empty store sized for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            pieces: vec![None; piece_count],
            bitfield: Bitfield::new(piece_count),
        }
    }

    /// Returns true if the piece at `index` is held.
    pub fn has(&self, index: u32) -> bool {
        self.pieces
            .get(index as usize)
            .map(Option::is_some)
            .unwrap_or(false)
    }

    /// Returns the piece bytes at `index`.
    ///
    /// # Errors
    ///
    /// `NotAvailable` when the piece is absent or the index is out of
    /// range.
    pub fn get(&self, index: u32) -> Result<Bytes, StoreError> {
        self.pieces
            .get(index as usize)
            .and_then(Clone::clone)
            .ok_or(StoreError::NotAvailable(index))
    }

    /// Stores the piece bytes at `index` and sets its bitfield bit.
    ///
    /// # Errors
    ///
    /// `EmptyPiece` for an empty buffer, `OutOfBounds` past the piece
    /// count. Neither mutates the store.
    pub fn put(&mut self, index: u32, data: Bytes) -> Result<(), StoreError> {
        if data.is_empty() {
            return Err(StoreError::EmptyPiece(index));
        }
        let count = self.pieces.len();
        let slot = self
            .pieces
            .get_mut(index as usize)
            .ok_or(StoreError::OutOfBounds { index, count })?;
        *slot = Some(data);
        self.bitfield.set(index as usize);
        Ok(())
    }

    /// A snapshot of the possession bitfield.
    pub fn bitfield(&self) -> Bitfield {
        self.bitfield.clone()
    }

    /// Number of pieces currently held.
    pub fn count(&self) -> usize {
        self.bitfield.count_ones()
    }

    /// Total number of pieces this store is sized for.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// True once every piece is held.
    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_has() {
        let mut store = PieceStore::new(4);
        assert!(!store.has(2));
        assert!(matches!(store.get(2), Err(StoreError::NotAvailable(2))));

        store.put(2, Bytes::from_static(b"data")).unwrap();
        assert!(store.has(2));
        assert_eq!(store.get(2).unwrap(), Bytes::from_static(b"data"));
        assert_eq!(store.count(), 1);
        assert!(store.bitfield().has(2));
        assert!(!store.bitfield().has(0));
    }

    #[test]
    fn put_is_idempotent_safe() {
        let mut store = PieceStore::new(2);
        let data = Bytes::from_static(b"abc");
        store.put(0, data.clone()).unwrap();
        store.put(0, data.clone()).unwrap();

        assert_eq!(store.get(0).unwrap(), data);
        assert!(store.has(0));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn put_rejects_empty_bytes() {
        let mut store = PieceStore::new(2);
        assert!(matches!(
            store.put(0, Bytes::new()),
            Err(StoreError::EmptyPiece(0))
        ));
        assert!(!store.has(0));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn put_rejects_out_of_bounds_index() {
        let mut store = PieceStore::new(2);
        assert!(matches!(
            store.put(2, Bytes::from_static(b"x")),
            Err(StoreError::OutOfBounds { index: 2, count: 2 })
        ));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn completion_tracks_all_pieces() {
        let mut store = PieceStore::new(3);
        assert!(!store.is_complete());
        for i in 0..3 {
            store.put(i, Bytes::from_static(b"p")).unwrap();
        }
        assert!(store.is_complete());
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn zero_piece_store_is_complete() {
        let store = PieceStore::new(0);
        assert!(store.is_complete());
        assert!(!store.has(0));
    }
}
