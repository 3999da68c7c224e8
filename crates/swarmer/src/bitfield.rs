//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

pub trait PieceBitfield {
    /// An empty bitfield with room for `pieces` pieces.
    fn from_piece(pieces: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; pieces]
    }

    /// Build a bitfield from the payload of a BITFIELD message. Spare bits
    /// at the end of the last byte are dropped and a short payload is
    /// filled with zeroes, the result always has exactly `pieces` bits.
    fn from_payload(payload: Vec<u8>, pieces: usize) -> Bitfield {
        let mut bitfield = Bitfield::from_vec(payload);
        bitfield.resize(pieces, false);
        bitfield
    }

    /// `false` for indices outside of the bitfield.
    fn safe_get(&self, index: usize) -> bool;

    /// Set the bit of `index`, returns `false` without mutating when the
    /// index is out of bounds.
    fn safe_set(&mut self, index: usize) -> bool;
}

impl PieceBitfield for Bitfield {
    fn safe_get(&self, index: usize) -> bool {
        self.get(index).map(|b| *b).unwrap_or(false)
    }

    fn safe_set(&mut self, index: usize) -> bool {
        if index >= self.len() {
            return false;
        }
        self.set(index, true);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_piece() {
        let bitfield = Bitfield::from_piece(1407);
        assert_eq!(bitfield.len(), 1407);
        assert!(bitfield.not_any());
    }

    #[test]
    fn payload_padding_is_ignored() {
        // 10 pieces, the last 6 bits of the second byte are padding
        let bitfield = Bitfield::from_payload(vec![0b1000_0001, 0b0111_1111], 10);

        assert_eq!(bitfield.len(), 10);
        assert!(bitfield.safe_get(0));
        assert!(bitfield.safe_get(7));
        assert!(bitfield.safe_get(9));
        assert!(!bitfield.safe_get(8));
        assert!(!bitfield.safe_get(10));
        assert_eq!(bitfield.count_ones(), 3);
    }

    #[test]
    fn short_payload_is_extended() {
        let bitfield = Bitfield::from_payload(vec![0xFF], 12);
        assert_eq!(bitfield.len(), 12);
        assert_eq!(bitfield.count_ones(), 8);
        assert!(!bitfield.safe_get(11));
    }

    #[test]
    fn safe_set() {
        let mut bitfield = Bitfield::from_piece(3);
        assert!(bitfield.safe_set(2));
        assert!(!bitfield.safe_set(3));
        assert_eq!(bitfield.len(), 3);
        assert!(bitfield.safe_get(2));
    }
}
