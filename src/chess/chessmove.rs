use std::fmt::{Debug, Display, Formatter};

use crate::chess::{piece::PieceType, types::Square};

/// A move, packed into sixteen bits: six for the source square, six for the
/// target, two for the promotion piece, two to discriminate the special kinds
/// (en passant, castling, promotion).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Move {
    data: u16,
}

impl Move {
    const FROM_MASK: u16 = 0b0000_0000_0011_1111;
    const TO_MASK: u16 = 0b0000_1111_1100_0000;
    const PROMO_MASK: u16 = 0b0011_0000_0000_0000;
    pub const EP_FLAG: u16 = 0b0100_0000_0000_0000;
    pub const CASTLE_FLAG: u16 = 0b1000_0000_0000_0000;
    pub const PROMO_FLAG: u16 = 0b1100_0000_0000_0000;

    pub const fn new(from: Square, to: Square) -> Self {
        Self {
            data: from.inner() as u16 | ((to.inner() as u16) << 6),
        }
    }

    pub const fn new_with_flags(from: Square, to: Square, flags: u16) -> Self {
        debug_assert!(flags == Self::EP_FLAG || flags == Self::CASTLE_FLAG);
        Self {
            data: from.inner() as u16 | ((to.inner() as u16) << 6) | flags,
        }
    }

    pub fn new_promo(from: Square, to: Square, promotion: PieceType) -> Self {
        debug_assert!(promotion.legal_promo());
        // Knight..Queen occupy discriminants 1..=4, packed into two bits.
        let promotion = (promotion as u16 - 1) & 0b11;
        Self {
            data: from.inner() as u16
                | ((to.inner() as u16) << 6)
                | (promotion << 12)
                | Self::PROMO_FLAG,
        }
    }

    pub const fn from(self) -> Square {
        // SAFETY: the masked value is always within `0..64`.
        unsafe { Square::new_unchecked((self.data & Self::FROM_MASK) as u8) }
    }

    pub const fn to(self) -> Square {
        // SAFETY: the masked value is always within `0..64`.
        unsafe { Square::new_unchecked(((self.data & Self::TO_MASK) >> 6) as u8) }
    }

    pub const fn is_promo(self) -> bool {
        (self.data & Self::PROMO_FLAG) == Self::PROMO_FLAG
    }

    pub const fn is_ep(self) -> bool {
        (self.data & Self::PROMO_FLAG) == Self::EP_FLAG
    }

    pub const fn is_castle(self) -> bool {
        (self.data & Self::PROMO_FLAG) == Self::CASTLE_FLAG
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn promotion_type(self) -> Option<PieceType> {
        if self.is_promo() {
            PieceType::new(((self.data & Self::PROMO_MASK) >> 12) as u8 + 1)
        } else {
            None
        }
    }
}

impl Display for Move {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if let Some(promo) = self.promotion_type() {
            let pchar = promo.promo_char().unwrap_or('?');
            write!(f, "{}{}{pchar}", self.from(), self.to())
        } else {
            write!(f, "{}{}", self.from(), self.to())
        }
    }
}

impl Debug for Move {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{} -> {} (promo {:?}, ep {}, castle {})",
            self.from(),
            self.to(),
            self.promotion_type(),
            self.is_ep(),
            self.is_castle()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_move_fields() {
        let m = Move::new(Square::E2, Square::E4);
        assert_eq!(m.from(), Square::E2);
        assert_eq!(m.to(), Square::E4);
        assert!(!m.is_promo());
        assert!(!m.is_ep());
        assert!(!m.is_castle());
        assert_eq!(m.to_string(), "e2e4");
    }

    #[test]
    fn promotion_round_trip() {
        for pt in [
            PieceType::Knight,
            PieceType::Bishop,
            PieceType::Rook,
            PieceType::Queen,
        ] {
            let m = Move::new_promo(Square::E7, Square::E8, pt);
            assert!(m.is_promo());
            assert_eq!(m.promotion_type(), Some(pt));
            assert_eq!(m.from(), Square::E7);
            assert_eq!(m.to(), Square::E8);
        }
        assert_eq!(
            Move::new_promo(Square::A7, Square::A8, PieceType::Queen).to_string(),
            "a7a8q"
        );
    }

    #[test]
    fn flag_kinds_are_distinct() {
        let ep = Move::new_with_flags(Square::E5, Square::D6, Move::EP_FLAG);
        assert!(ep.is_ep());
        assert!(!ep.is_castle());
        assert!(!ep.is_promo());

        let castle = Move::new_with_flags(Square::E1, Square::G1, Move::CASTLE_FLAG);
        assert!(castle.is_castle());
        assert!(!castle.is_ep());
        assert!(!castle.is_promo());
    }
}
