use bytes::Bytes;

/// A per-piece possession map.
///
/// Bit i, counted from the high bit of the first byte, records whether
/// piece i is held. The byte form may round up to a byte boundary; bits
/// past the piece count carry no meaning and are kept zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Creates an empty bitfield for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Creates a bitfield from wire bytes, truncating or zero-extending to
    /// the piece count and clearing spare bits.
    pub fn from_bytes(bytes: &[u8], piece_count: usize) -> Self {
        let mut bits = bytes.to_vec();
        bits.resize(piece_count.div_ceil(8), 0);
        let mut bf = Self { bits, piece_count };
        bf.clear_spare_bits();
        bf
    }

    /// Creates a bitfield with every piece set.
    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Returns true if piece `index` is set.
    pub fn has(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Sets piece `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] |= 1 << (7 - index % 8);
        }
    }

    /// Clears piece `index`. Out-of-range indices are ignored.
    pub fn clear(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] &= !(1 << (7 - index % 8));
        }
    }

    /// Number of pieces set.
    pub fn count_ones(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// True when every piece is set.
    pub fn is_complete(&self) -> bool {
        self.count_ones() == self.piece_count
    }

    /// True when no piece is set.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Total number of pieces this bitfield covers.
    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// The raw byte form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// The raw byte form, owned.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Indices set here but not in `other`, ascending.
    pub fn missing_from(&self, other: &Bitfield) -> Vec<usize> {
        (0..self.piece_count)
            .filter(|&i| self.has(i) && !other.has(i))
            .collect()
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
    }
}
