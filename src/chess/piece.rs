use std::{
    fmt::Display,
    mem::size_of,
    ops::{Index, IndexMut, Not},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Colour {
    White,
    Black,
}

const _COLOUR_ASSERT: () = assert!(size_of::<Colour>() == size_of::<Option<Colour>>());

impl Display for Colour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::White => write!(f, "White"),
            Self::Black => write!(f, "Black"),
        }
    }
}

#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum PieceType {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

const _PIECE_TYPE_ASSERT: () = assert!(size_of::<PieceType>() == size_of::<Option<PieceType>>());

impl Display for PieceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pawn => write!(f, "Pawn"),
            Self::Knight => write!(f, "Knight"),
            Self::Bishop => write!(f, "Bishop"),
            Self::Rook => write!(f, "Rook"),
            Self::Queen => write!(f, "Queen"),
            Self::King => write!(f, "King"),
        }
    }
}

/// A coloured piece. The discriminant doubles as the piece's feature plane:
/// white planes 0..6, black planes 6..12, P, N, B, R, Q, K within each half.
#[rustfmt::skip]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum Piece {
    WP, WN, WB, WR, WQ, WK,
    BP, BN, BB, BR, BQ, BK,
}

const _PIECE_ASSERT: () = assert!(size_of::<Piece>() == size_of::<Option<Piece>>());

impl Display for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.char())
    }
}

impl Colour {
    pub const fn flip(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl Not for Colour {
    type Output = Self;

    fn not(self) -> Self::Output {
        self.flip()
    }
}

impl PieceType {
    pub const fn new(v: u8) -> Option<Self> {
        if v < 6 {
            // SAFETY: inner is less than 6, so it corresponds to a valid enum variant.
            Some(unsafe { std::mem::transmute::<u8, Self>(v) })
        } else {
            None
        }
    }

    /// SAFETY: you may only call this function with a value of `v` less than 6.
    pub const unsafe fn from_index_unchecked(v: u8) -> Self {
        debug_assert!(v < 6);
        // SAFETY: caller's precondition.
        unsafe { std::mem::transmute(v) }
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn legal_promo(self) -> bool {
        matches!(self, Self::Queen | Self::Knight | Self::Bishop | Self::Rook)
    }

    pub const fn promo_char(self) -> Option<char> {
        match self {
            Self::Queen => Some('q'),
            Self::Knight => Some('n'),
            Self::Bishop => Some('b'),
            Self::Rook => Some('r'),
            _ => None,
        }
    }
}

impl Piece {
    pub const fn new(colour: Colour, piece_type: PieceType) -> Self {
        let index = colour as u8 * 6 + piece_type as u8;
        // SAFETY: Colour is {0, 1}, piece_type is {0, 1, 2, 3, 4, 5}.
        // colour * 6 + piece_type is therefore at most 11, which corresponds
        // to a valid enum variant.
        unsafe { std::mem::transmute(index) }
    }

    pub const fn from_index(v: u8) -> Option<Self> {
        if v < 12 {
            // SAFETY: inner is less than 12, so it corresponds to a valid enum variant.
            Some(unsafe { std::mem::transmute::<u8, Self>(v) })
        } else {
            None
        }
    }

    pub const fn colour(self) -> Colour {
        if (self as u8) < 6 {
            Colour::White
        } else {
            Colour::Black
        }
    }

    pub const fn piece_type(self) -> PieceType {
        let pt_index = self as u8 % 6;
        // SAFETY: pt_index is always within the bounds of the type.
        unsafe { PieceType::from_index_unchecked(pt_index) }
    }

    pub const fn char(self) -> char {
        match self {
            Self::WP => 'P',
            Self::WN => 'N',
            Self::WB => 'B',
            Self::WR => 'R',
            Self::WQ => 'Q',
            Self::WK => 'K',
            Self::BP => 'p',
            Self::BN => 'n',
            Self::BB => 'b',
            Self::BR => 'r',
            Self::BQ => 'q',
            Self::BK => 'k',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        const SYMBOLS: [char; 12] = ['P', 'N', 'B', 'R', 'Q', 'K', 'p', 'n', 'b', 'r', 'q', 'k'];
        SYMBOLS
            .iter()
            .position(|&x| x == c)
            .and_then(|x| Self::from_index(x.try_into().ok()?))
    }

    pub fn all() -> impl DoubleEndedIterator<Item = Self> {
        // SAFETY: all values are within `0..12`.
        (0..12u8).map(|i| unsafe { std::mem::transmute(i) })
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl<T> Index<Colour> for [T; 2] {
    type Output = T;

    fn index(&self, index: Colour) -> &Self::Output {
        // SAFETY: the legal values for this type are all in bounds.
        unsafe { self.get_unchecked(index as usize) }
    }
}

impl<T> IndexMut<Colour> for [T; 2] {
    fn index_mut(&mut self, index: Colour) -> &mut Self::Output {
        // SAFETY: the legal values for this type are all in bounds.
        unsafe { self.get_unchecked_mut(index as usize) }
    }
}

impl<T> Index<PieceType> for [T; 6] {
    type Output = T;

    fn index(&self, index: PieceType) -> &Self::Output {
        // SAFETY: the legal values for this type are all in bounds.
        unsafe { self.get_unchecked(index as usize) }
    }
}

impl<T> IndexMut<PieceType> for [T; 6] {
    fn index_mut(&mut self, index: PieceType) -> &mut Self::Output {
        // SAFETY: the legal values for this type are all in bounds.
        unsafe { self.get_unchecked_mut(index as usize) }
    }
}

impl<T> Index<Piece> for [T; 12] {
    type Output = T;

    fn index(&self, index: Piece) -> &Self::Output {
        // SAFETY: the legal values for this type are all in bounds.
        unsafe { self.get_unchecked(index as usize) }
    }
}

impl<T> IndexMut<Piece> for [T; 12] {
    fn index_mut(&mut self, index: Piece) -> &mut Self::Output {
        // SAFETY: the legal values for this type are all in bounds.
        unsafe { self.get_unchecked_mut(index as usize) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piece_construction_and_decomposition() {
        use PieceType::{Bishop, King, Knight, Pawn, Queen, Rook};
        for colour in [Colour::White, Colour::Black] {
            for piece_type in [Pawn, Knight, Bishop, Rook, Queen, King] {
                let piece = Piece::new(colour, piece_type);
                assert_eq!(
                    piece.colour(),
                    colour,
                    "Colour mismatch for {colour:?} {piece_type:?}"
                );
                assert_eq!(
                    piece.piece_type(),
                    piece_type,
                    "PieceType mismatch for {colour:?} {piece_type:?}"
                );
            }
        }
    }

    #[test]
    fn piece_plane_layout() {
        // The enum discriminants are the network's feature planes, so the
        // white pieces must occupy 0..6 and the black pieces 6..12, in
        // P, N, B, R, Q, K order.
        assert_eq!(Piece::WP.index(), 0);
        assert_eq!(Piece::WN.index(), 1);
        assert_eq!(Piece::WB.index(), 2);
        assert_eq!(Piece::WR.index(), 3);
        assert_eq!(Piece::WQ.index(), 4);
        assert_eq!(Piece::WK.index(), 5);
        assert_eq!(Piece::BP.index(), 6);
        assert_eq!(Piece::BN.index(), 7);
        assert_eq!(Piece::BB.index(), 8);
        assert_eq!(Piece::BR.index(), 9);
        assert_eq!(Piece::BQ.index(), 10);
        assert_eq!(Piece::BK.index(), 11);
    }

    #[test]
    fn piece_round_trip_construction() {
        for piece in Piece::all() {
            let reconstructed = Piece::new(piece.colour(), piece.piece_type());
            assert_eq!(piece, reconstructed, "Round-trip failed for {piece:?}");
        }
    }

    #[test]
    fn piece_from_index() {
        for i in 0..12 {
            assert!(
                Piece::from_index(i).is_some(),
                "from_index({i}) should be Some"
            );
        }
        for i in 12..=255 {
            assert!(
                Piece::from_index(i).is_none(),
                "from_index({i}) should be None"
            );
        }
    }

    #[test]
    fn piece_char_round_trip() {
        for piece in Piece::all() {
            let c = piece.char();
            if piece.colour() == Colour::White {
                assert!(c.is_uppercase(), "{piece:?} should have uppercase char");
            } else {
                assert!(c.is_lowercase(), "{piece:?} should have lowercase char");
            }
            assert_eq!(Piece::from_char(c), Some(piece));
        }
        assert_eq!(Piece::from_char('x'), None);
    }
}
