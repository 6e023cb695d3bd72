use std::{
    fmt::Display,
    ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Not, Sub, SubAssign},
};

use crate::chess::types::Square;

/// A set of squares, one bit per square, a1 in the low bit.
/// Most chess engines call this type `Bitboard`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct SquareSet {
    inner: u64,
}

impl SquareSet {
    pub const EMPTY: Self = Self { inner: 0 };

    pub const FILE_A: Self = Self {
        inner: 0x0101_0101_0101_0101,
    };
    pub const FILE_H: Self = Self {
        inner: 0x8080_8080_8080_8080,
    };
    pub const LIGHT_SQUARES: Self = Self {
        inner: 0x55AA_55AA_55AA_55AA,
    };
    pub const DARK_SQUARES: Self = Self {
        inner: 0xAA55_AA55_AA55_AA55,
    };

    pub const fn from_inner(inner: u64) -> Self {
        Self { inner }
    }

    pub const fn count(self) -> u32 {
        self.inner.count_ones()
    }

    pub const fn is_empty(self) -> bool {
        self.inner == 0
    }

    pub const fn non_empty(self) -> bool {
        self.inner != 0
    }

    pub const fn contains_square(self, square: Square) -> bool {
        (self.inner & (1 << square.index())) != 0
    }

    pub const fn add_square(self, square: Square) -> Self {
        Self {
            inner: self.inner | (1 << square.index()),
        }
    }

    pub const fn union(self, other: Self) -> Self {
        Self {
            inner: self.inner | other.inner,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub const fn first(self) -> Option<Square> {
        Square::new(self.inner.trailing_zeros() as u8)
    }

    #[allow(clippy::missing_const_for_fn)]
    pub fn iter(self) -> SquareIter {
        SquareIter::new(self.inner)
    }

    pub const fn north_east_one(self) -> Self {
        Self {
            inner: (self.inner << 9) & !Self::FILE_A.inner,
        }
    }

    pub const fn north_west_one(self) -> Self {
        Self {
            inner: (self.inner << 7) & !Self::FILE_H.inner,
        }
    }

    pub const fn south_east_one(self) -> Self {
        Self {
            inner: (self.inner >> 7) & !Self::FILE_A.inner,
        }
    }

    pub const fn south_west_one(self) -> Self {
        Self {
            inner: (self.inner >> 9) & !Self::FILE_H.inner,
        }
    }
}

/// Iterator over the squares of a square-set.
/// The squares are returned in increasing order.
pub struct SquareIter {
    value: u64,
}

impl SquareIter {
    pub const fn new(value: u64) -> Self {
        Self { value }
    }
}

impl Iterator for SquareIter {
    type Item = Square;

    fn next(&mut self) -> Option<Self::Item> {
        if self.value == 0 {
            None
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let lsb: u8 = self.value.trailing_zeros() as u8;
            self.value &= self.value - 1;
            // SAFETY: u64::trailing_zeros on a non-zero value returns values
            // within `0..64`, all of which are valid Square variants.
            Some(unsafe { Square::new_unchecked(lsb) })
        }
    }
}

impl IntoIterator for SquareSet {
    type Item = Square;
    type IntoIter = SquareIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl BitOr for SquareSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self {
            inner: self.inner | rhs.inner,
        }
    }
}

impl BitOrAssign for SquareSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.inner |= rhs.inner;
    }
}

impl BitAnd for SquareSet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self {
            inner: self.inner & rhs.inner,
        }
    }
}

impl BitAndAssign for SquareSet {
    fn bitand_assign(&mut self, rhs: Self) {
        self.inner &= rhs.inner;
    }
}

impl BitXor for SquareSet {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Self {
            inner: self.inner ^ rhs.inner,
        }
    }
}

impl BitXorAssign for SquareSet {
    fn bitxor_assign(&mut self, rhs: Self) {
        self.inner ^= rhs.inner;
    }
}

impl Sub for SquareSet {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            inner: self.inner & !rhs.inner,
        }
    }
}

impl SubAssign for SquareSet {
    fn sub_assign(&mut self, rhs: Self) {
        self.inner &= !rhs.inner;
    }
}

impl Not for SquareSet {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self { inner: !self.inner }
    }
}

impl Display for SquareSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for rank in (0..8).rev() {
            for file in 0..8 {
                let bit = 1u64 << (rank * 8 + file);
                write!(f, "{}", if self.inner & bit != 0 { '1' } else { '0' })?;
            }
            if rank > 0 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_operations() {
        let set = Square::E4.as_set().add_square(Square::E5);
        assert_eq!(set.count(), 2);
        assert!(set.contains_square(Square::E4));
        assert!(!set.contains_square(Square::E6));
        assert_eq!((set - Square::E5.as_set()).first(), Some(Square::E4));
        assert!((set - set).is_empty());
        assert_eq!(set & Square::E4.as_set(), Square::E4.as_set());
        assert_eq!(set ^ Square::E4.as_set(), Square::E5.as_set());
    }

    #[test]
    fn iteration_order_is_ascending() {
        let set = Square::H8.as_set().add_square(Square::A1).add_square(Square::D4);
        let squares: Vec<_> = set.iter().collect();
        assert_eq!(squares, vec![Square::A1, Square::D4, Square::H8]);
    }

    #[test]
    fn pawn_shifts_respect_board_edges() {
        assert_eq!(Square::A4.as_set().north_west_one(), SquareSet::EMPTY);
        assert_eq!(Square::H4.as_set().north_east_one(), SquareSet::EMPTY);
        assert_eq!(
            Square::E4.as_set().north_east_one().first(),
            Some(Square::F5)
        );
        assert_eq!(
            Square::E4.as_set().south_west_one().first(),
            Some(Square::D3)
        );
    }
}
