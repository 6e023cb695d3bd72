use std::{num::NonZeroUsize, str::SplitWhitespace};

use arrayvec::ArrayVec;

use crate::{
    chess::{
        piece::{Colour, Piece},
        types::{CastlingRights, File, Rank, Square},
    },
    errors::FenParseError,
};

/// A parsed FEN representation.
///
/// Parsing checks the structure of the string, not the legality of the
/// position: kingless and over-populated boards are accepted so that
/// synthetic encoder inputs round-trip through here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fen {
    pub pieces: [Option<Piece>; 64],
    pub turn: Colour,
    pub castling: CastlingRights,
    pub ep: Option<Square>,
    pub halfmove: u8,
    pub fullmove: NonZeroUsize,
}

impl Fen {
    const DEFAULT_FULL_MOVE: NonZeroUsize = NonZeroUsize::new(1).unwrap();

    /// Parse a FEN string in strict mode.
    /// All 6 fields must be present, and no extra tokens are allowed.
    pub fn parse(fen: &str) -> Result<Self, FenParseError> {
        let mut tokens = fen.split_whitespace();
        let result = Self::parse_inner(&mut tokens, true)?;
        if tokens.next().is_some() {
            return Err(FenParseError::ExtraTokens);
        }
        Ok(result)
    }

    /// Parse a FEN string in relaxed mode.
    /// Missing or malformed fields after the board default to: w, -, -, 0, 1.
    /// Extra tokens after the fullmove counter are permitted but ignored.
    pub fn parse_relaxed(fen: &str) -> Result<Self, FenParseError> {
        let mut tokens = fen.split_whitespace();
        Self::parse_inner(&mut tokens, false)
    }

    fn parse_inner(tokens: &mut SplitWhitespace<'_>, strict: bool) -> Result<Self, FenParseError> {
        let board_str = tokens.next().ok_or(FenParseError::MissingBoard)?;
        let pieces = Self::parse_board(board_str)?;

        let turn = match tokens.next() {
            Some(s) if strict => Self::parse_turn(s)?,
            Some(s) => Self::parse_turn(s).unwrap_or(Colour::White),
            None if strict => return Err(FenParseError::MissingSide),
            None => Colour::White,
        };

        let castling = match tokens.next() {
            Some(s) if strict => Self::parse_castling(s)?,
            Some(s) => Self::parse_castling(s).unwrap_or_default(),
            None if strict => return Err(FenParseError::MissingCastling),
            None => CastlingRights::default(),
        };

        let ep = match tokens.next() {
            Some(s) if strict => Self::parse_ep(s, turn)?,
            Some(s) => Self::parse_ep(s, turn).unwrap_or(None),
            None if strict => return Err(FenParseError::MissingEnPassant),
            None => None,
        };

        let halfmove = match tokens.next() {
            Some(s) if strict => Self::parse_halfmove(s)?,
            Some(s) => Self::parse_halfmove(s).unwrap_or(0),
            None if strict => return Err(FenParseError::MissingHalfmoveClock),
            None => 0,
        };

        let fullmove = match tokens.next() {
            Some(s) if strict => Self::parse_fullmove(s)?,
            Some(s) => Self::parse_fullmove(s).unwrap_or(Self::DEFAULT_FULL_MOVE),
            None if strict => return Err(FenParseError::MissingFullmoveNumber),
            None => Self::DEFAULT_FULL_MOVE,
        };

        Ok(Self {
            pieces,
            turn,
            castling,
            ep,
            halfmove,
            fullmove,
        })
    }

    fn parse_board(board_str: &str) -> Result<[Option<Piece>; 64], FenParseError> {
        let mut pieces = [None; 64];

        let mut ranks = ArrayVec::<&str, 8>::new();
        let mut board_parts = board_str.split('/');
        while let Some(segment) = board_parts.next() {
            if ranks.try_push(segment).is_err() {
                // 8 successfully pushed, plus this one, plus the rest.
                return Err(FenParseError::BoardSegments(8 + 1 + board_parts.count()));
            }
        }
        if ranks.len() != 8 {
            return Err(FenParseError::BoardSegments(ranks.len()));
        }

        // FEN lists ranks top to bottom.
        for (segment, rank) in ranks.iter().zip(Rank::all().rev()) {
            let mut file_idx = 0u8;
            let mut prev_was_digit = false;

            for c in segment.chars() {
                match c {
                    '1'..='8' => {
                        if prev_was_digit {
                            return Err(FenParseError::AdjacentDigits);
                        }
                        prev_was_digit = true;
                        file_idx += c as u8 - b'0';
                        if file_idx > 8 {
                            return Err(FenParseError::BadSquaresInSegment);
                        }
                    }
                    c => {
                        let Some(piece) = Piece::from_char(c) else {
                            return Err(FenParseError::UnexpectedCharacter(c));
                        };
                        prev_was_digit = false;
                        let Some(file) = File::from_index(file_idx) else {
                            return Err(FenParseError::BadSquaresInSegment);
                        };
                        pieces[Square::from_rank_file(rank, file)] = Some(piece);
                        file_idx += 1;
                    }
                }
            }

            if file_idx != 8 {
                return Err(FenParseError::BadSquaresInSegment);
            }
        }

        Ok(pieces)
    }

    fn parse_turn(s: &str) -> Result<Colour, FenParseError> {
        match s {
            "w" => Ok(Colour::White),
            "b" => Ok(Colour::Black),
            _ => Err(FenParseError::InvalidSide(s.to_string())),
        }
    }

    fn parse_castling(s: &str) -> Result<CastlingRights, FenParseError> {
        if s == "-" {
            return Ok(CastlingRights::default());
        }

        let mut rights = CastlingRights::default();
        for c in s.chars() {
            match c {
                'K' => rights.set(CastlingRights::WK),
                'Q' => rights.set(CastlingRights::WQ),
                'k' => rights.set(CastlingRights::BK),
                'q' => rights.set(CastlingRights::BQ),
                _ => return Err(FenParseError::InvalidCastling(s.to_string())),
            }
        }
        Ok(rights)
    }

    fn parse_ep(s: &str, turn: Colour) -> Result<Option<Square>, FenParseError> {
        if s == "-" {
            return Ok(None);
        }

        let square: Square = s
            .parse()
            .map_err(|_| FenParseError::InvalidEnPassant(s.to_string()))?;

        // The capture square sits behind the pawn that just double-pushed:
        // rank 6 when white is to move, rank 3 when black is.
        let expected = match turn {
            Colour::White => Rank::Six,
            Colour::Black => Rank::Three,
        };
        if square.rank() != expected {
            return Err(FenParseError::InvalidEnPassantRank {
                square: s.to_string(),
                expected,
                got: square.rank(),
                turn,
            });
        }

        Ok(Some(square))
    }

    fn parse_halfmove(s: &str) -> Result<u8, FenParseError> {
        let value: u8 = s
            .parse()
            .map_err(|_| FenParseError::InvalidHalfmoveClock(s.to_string()))?;
        if value > 100 {
            return Err(FenParseError::HalfmoveClockTooLarge(value));
        }
        Ok(value)
    }

    fn parse_fullmove(s: &str) -> Result<NonZeroUsize, FenParseError> {
        let value: usize = s
            .parse()
            .map_err(|_| FenParseError::InvalidFullmoveNumber(s.to_string()))?;
        NonZeroUsize::new(value).ok_or(FenParseError::FullmoveNumberZero)
    }
}
