use std::path::PathBuf;

use thiserror::Error;

use crate::chess::{piece::Colour, types::Rank};

/// Reasons that a FEN string might fail to parse.
///
/// Only the structure of the string is validated, not the legality of the
/// position it encodes: boards with missing kings or impossible material are
/// accepted, because synthetic positions of that kind are deliberately fed to
/// the feature encoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FenParseError {
    #[error("FEN is missing the board segment")]
    MissingBoard,
    #[error("FEN board has {0} segments, expected 8")]
    BoardSegments(usize),
    #[error("FEN board contains adjacent digits")]
    AdjacentDigits,
    #[error("FEN board segment does not describe exactly 8 squares")]
    BadSquaresInSegment,
    #[error("unexpected character {0:?} in FEN board")]
    UnexpectedCharacter(char),
    #[error("FEN is missing the side-to-move field")]
    MissingSide,
    #[error("invalid side-to-move {0:?}")]
    InvalidSide(String),
    #[error("FEN is missing the castling field")]
    MissingCastling,
    #[error("invalid castling field {0:?}")]
    InvalidCastling(String),
    #[error("FEN is missing the en passant field")]
    MissingEnPassant,
    #[error("invalid en passant square {0:?}")]
    InvalidEnPassant(String),
    #[error(
        "en passant square {square:?} is on rank {got:?}, expected rank {expected:?} with {turn} to move"
    )]
    InvalidEnPassantRank {
        square: String,
        expected: Rank,
        got: Rank,
        turn: Colour,
    },
    #[error("FEN is missing the halfmove clock")]
    MissingHalfmoveClock,
    #[error("invalid halfmove clock {0:?}")]
    InvalidHalfmoveClock(String),
    #[error("halfmove clock {0} is larger than 100")]
    HalfmoveClockTooLarge(u8),
    #[error("FEN is missing the fullmove number")]
    MissingFullmoveNumber,
    #[error("invalid fullmove number {0:?}")]
    InvalidFullmoveNumber(String),
    #[error("fullmove number must be at least 1")]
    FullmoveNumberZero,
    #[error("unexpected extra tokens after the fullmove number")]
    ExtraTokens,
}

/// Reasons that a move string in coordinate notation might fail to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveParseError {
    #[error("move string has length {0}, expected 4 or 5")]
    InvalidLength(usize),
    #[error("invalid from-square {0:?}")]
    InvalidFromSquare(String),
    #[error("invalid to-square {0:?}")]
    InvalidToSquare(String),
    #[error("invalid promotion piece {0:?}")]
    InvalidPromotionPiece(char),
    #[error("move {0:?} is not legal in this position")]
    IllegalMove(String),
}

/// Reasons that a weight file or checkpoint might fail to load.
///
/// All of these are fatal: evaluating with weights whose shapes do not match
/// the compiled-in layer dimensions produces plausible-looking garbage, so
/// nothing here is recoverable by the caller.
#[derive(Debug, Error)]
pub enum WeightLoadError {
    #[error("weight file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} holds {got} bytes, expected {expected} for this tensor shape", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: usize,
        got: usize,
    },
    #[error("bad checkpoint magic {got:?}, expected {expected:?}")]
    BadMagic { expected: [u8; 4], got: [u8; 4] },
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),
    #[error("checkpoint {field} is {got}, compiled for {expected}")]
    DimensionMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("unknown activation tag {0}")]
    BadActivationTag(u8),
}

/// Reasons that a tensor might fail to serialise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("cannot serialise a rank-{0} tensor, only ranks 1 and 2 are supported")]
    UnsupportedRank(usize),
}
