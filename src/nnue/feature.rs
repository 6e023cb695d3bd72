use arrayvec::ArrayVec;

use crate::{
    chess::{board::Board, piece::Piece, types::Square},
    nnue::INPUT,
};

/// Active feature indices for one position, from one perspective.
/// A board has at most 64 occupied squares, one feature each.
pub type FeatureList = ArrayVec<u16, 64>;

/// The feature index of `piece` standing on `sq`: the piece's plane selects
/// a 64-wide block, the square selects the slot within it.
pub const fn feature_index(piece: Piece, sq: Square) -> usize {
    piece.index() * 64 + sq.index()
}

const fn flip_table() -> [u16; INPUT] {
    let mut table = [0; INPUT];
    let mut index = 0;
    while index < INPUT {
        let plane = index / 64;
        let sq = index % 64;
        #[allow(clippy::cast_possible_truncation)]
        {
            table[index] = (((plane + 6) % 12) * 64 + (sq ^ 56)) as u16;
        }
        index += 1;
    }
    table
}

/// Index permutation swapping the colour plane groups and flipping ranks.
/// `FLIP[f]` is the feature seen from the other side of the board; applying
/// it twice is the identity.
pub static FLIP: [u16; INPUT] = flip_table();

/// The active features of `board` in the absolute (white) frame.
pub fn active_features(board: &Board) -> FeatureList {
    let mut features = FeatureList::new();
    for sq in board.occupied() {
        if let Some(piece) = board.piece_at(sq) {
            #[allow(clippy::cast_possible_truncation)]
            features.push(feature_index(piece, sq) as u16);
        }
    }
    features
}

/// The same position seen from the other perspective.
pub fn flipped_features(features: &FeatureList) -> FeatureList {
    features.iter().map(|&f| FLIP[usize::from(f)]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::piece::Colour;

    #[test]
    fn feature_index_layout() {
        // White pawn on a1 is feature 0; plane stride is 64.
        assert_eq!(feature_index(Piece::WP, Square::A1), 0);
        assert_eq!(feature_index(Piece::WP, Square::H8), 63);
        assert_eq!(feature_index(Piece::WN, Square::A1), 64);
        assert_eq!(feature_index(Piece::WK, Square::A1), 5 * 64);
        assert_eq!(feature_index(Piece::BP, Square::A1), 6 * 64);
        assert_eq!(feature_index(Piece::BK, Square::H8), 767);
    }

    #[test]
    fn flip_is_an_involution() {
        for f in 0..INPUT {
            assert_eq!(usize::from(FLIP[usize::from(FLIP[f])]), f);
        }
    }

    #[test]
    fn flip_swaps_colour_and_mirrors_rank() {
        let wp_e2 = feature_index(Piece::WP, Square::E2);
        let bp_e7 = feature_index(Piece::BP, Square::E7);
        assert_eq!(usize::from(FLIP[wp_e2]), bp_e7);
        let bk_g8 = feature_index(Piece::BK, Square::G8);
        let wk_g1 = feature_index(Piece::WK, Square::G1);
        assert_eq!(usize::from(FLIP[bk_g8]), wk_g1);
    }

    #[test]
    fn startpos_feature_extraction() {
        let board = Board::startpos();
        let features = active_features(&board);
        assert_eq!(features.len(), 32);
        assert!(features.contains(&(feature_index(Piece::WK, Square::E1) as u16)));
        assert!(features.contains(&(feature_index(Piece::BQ, Square::D8) as u16)));
        // The startpos is symmetric: flipping it re-derives the same set.
        let mut flipped: Vec<u16> = flipped_features(&features).into_iter().collect();
        let mut original: Vec<u16> = features.into_iter().collect();
        flipped.sort_unstable();
        original.sort_unstable();
        assert_eq!(flipped, original);
    }

    #[test]
    fn kingless_boards_encode() {
        let board = Board::from_fen_relaxed("8/8/8/8/8/8/8/8 w - - 0 1").unwrap();
        assert!(active_features(&board).is_empty());
        let lone_rook = Board::from_fen_relaxed("8/8/8/3r4/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(lone_rook.piece_count(), 1);
        assert_eq!(active_features(&lone_rook).len(), 1);
    }

    #[test]
    fn dense_encoding_round_trips_piece_count() {
        // Active features scattered into the 768-slot image must reproduce
        // the piece count exactly: one slot per occupied square, no
        // collisions between planes.
        let fens = [
            crate::chess::board::STARTPOS_FEN,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        ];
        for fen in fens {
            let board = Board::from_fen(fen).unwrap();
            let mut dense = [0.0f32; INPUT];
            for feature in active_features(&board) {
                dense[usize::from(feature)] = 1.0;
            }
            let mut occupancy = 0u32;
            for sq in 0..64 {
                let max_over_planes = (0..12)
                    .map(|plane| dense[plane * 64 + sq])
                    .fold(0.0f32, f32::max);
                #[allow(clippy::float_cmp)]
                if max_over_planes == 1.0 {
                    occupancy += 1;
                }
            }
            assert_eq!(occupancy, board.piece_count(), "occupancy mismatch for {fen}");
        }
    }

    #[test]
    fn colour_of_every_flipped_plane_swaps() {
        for piece in Piece::all() {
            for sq in Square::all() {
                let f = feature_index(piece, sq);
                let flipped = usize::from(FLIP[f]);
                let flipped_plane = flipped / 64;
                let expected_colour = match piece.colour() {
                    Colour::White => 1,
                    Colour::Black => 0,
                };
                assert_eq!(flipped_plane / 6, expected_colour);
                assert_eq!(flipped % 64, sq.index() ^ 56);
            }
        }
    }
}
