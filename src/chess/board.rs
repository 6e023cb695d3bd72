use arrayvec::ArrayVec;

use crate::{
    chess::{
        chessmove::Move,
        fen::Fen,
        piece::{Colour, Piece, PieceType},
        squareset::SquareSet,
        types::{CastlingRights, File, Rank, Square},
    },
    errors::{FenParseError, MoveParseError},
    rng::XorShiftState,
};

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// An upper bound on the number of moves in any reachable position.
pub const MAX_POSITION_MOVES: usize = 218;

pub type MoveList = ArrayVec<Move, MAX_POSITION_MOVES>;

const fn init_hash_keys() -> ([[u64; 64]; 12], [u64; 64], [u64; 16], u64) {
    let mut state = XorShiftState::new();
    let mut piece_keys = [[0; 64]; 12];
    let mut index = 0;
    while index < 12 {
        let mut sq = 0;
        while sq < 64 {
            let key;
            (key, state) = state.next_self();
            piece_keys[index][sq] = key;
            sq += 1;
        }
        index += 1;
    }
    let mut ep_keys = [0; 64];
    let mut sq = 0;
    while sq < 64 {
        let key;
        (key, state) = state.next_self();
        ep_keys[sq] = key;
        sq += 1;
    }
    let mut castle_keys = [0; 16];
    let mut index = 0;
    while index < 16 {
        let key;
        (key, state) = state.next_self();
        castle_keys[index] = key;
        index += 1;
    }
    let (side_key, _) = state.next_self();
    (piece_keys, ep_keys, castle_keys, side_key)
}

static PIECE_KEYS: [[u64; 64]; 12] = init_hash_keys().0;
static EP_KEYS: [u64; 64] = init_hash_keys().1;
static CASTLE_KEYS: [u64; 16] = init_hash_keys().2;
const SIDE_KEY: u64 = init_hash_keys().3;

const fn leaper_attacks<const N: usize>(deltas: [(i8, i8); N]) -> [SquareSet; 64] {
    let mut attacks = [SquareSet::EMPTY; 64];
    let mut sq = 0;
    while sq < 64 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let (r, f) = ((sq / 8) as i8, (sq % 8) as i8);
        let mut i = 0;
        while i < N {
            let (dr, df) = deltas[i];
            let (nr, nf) = (r + dr, f + df);
            if nr >= 0 && nr < 8 && nf >= 0 && nf < 8 {
                #[allow(clippy::cast_sign_loss)]
                match Square::new((nr * 8 + nf) as u8) {
                    Some(target) => attacks[sq] = attacks[sq].add_square(target),
                    None => {}
                }
            }
            i += 1;
        }
        sq += 1;
    }
    attacks
}

static KNIGHT_ATTACKS: [SquareSet; 64] = leaper_attacks([
    (-2, -1),
    (-2, 1),
    (-1, -2),
    (-1, 2),
    (1, -2),
    (1, 2),
    (2, -1),
    (2, 1),
]);

static KING_ATTACKS: [SquareSet; 64] = leaper_attacks([
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
]);

const fn pawn_attack_table() -> [[SquareSet; 64]; 2] {
    let mut table = [[SquareSet::EMPTY; 64]; 2];
    let mut sq = 0;
    while sq < 64 {
        #[allow(clippy::cast_possible_truncation)]
        let set = match Square::new(sq as u8) {
            Some(s) => s.as_set(),
            None => SquareSet::EMPTY,
        };
        table[Colour::White as usize][sq] = set.north_east_one().union(set.north_west_one());
        table[Colour::Black as usize][sq] = set.south_east_one().union(set.south_west_one());
        sq += 1;
    }
    table
}

/// `PAWN_ATTACKS[c][sq]` is the set of squares a pawn of colour `c` standing
/// on `sq` attacks.
static PAWN_ATTACKS: [[SquareSet; 64]; 2] = pawn_attack_table();

const BISHOP_DIRS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
const ROOK_DIRS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

fn slider_attacks(from: Square, occupied: SquareSet, dirs: [(i8, i8); 4]) -> SquareSet {
    let mut attacks = SquareSet::EMPTY;
    #[allow(clippy::cast_possible_wrap)]
    let (r0, f0) = (from.rank().index() as i8, from.file().index() as i8);
    for (dr, df) in dirs {
        let (mut r, mut f) = (r0 + dr, f0 + df);
        while (0..8).contains(&r) && (0..8).contains(&f) {
            #[allow(clippy::cast_sign_loss)]
            // SAFETY: r and f are both within 0..8, so the index is within 0..64.
            let target = unsafe { Square::new_unchecked((r * 8 + f) as u8) };
            attacks = attacks.add_square(target);
            if occupied.contains_square(target) {
                break;
            }
            r += dr;
            f += df;
        }
    }
    attacks
}

pub fn bishop_attacks(from: Square, occupied: SquareSet) -> SquareSet {
    slider_attacks(from, occupied, BISHOP_DIRS)
}

pub fn rook_attacks(from: Square, occupied: SquareSet) -> SquareSet {
    slider_attacks(from, occupied, ROOK_DIRS)
}

/// A finished game, as far as the board alone can tell. Repetition needs the
/// key history of the whole game and is tracked by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEnd {
    Checkmate { winner: Colour },
    Stalemate,
    FiftyMoves,
    InsufficientMaterial,
}

/// A chess position. Copy-make: `make_move` mutates in place, and callers that
/// need the parent position keep a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    pieces: [SquareSet; 6],
    colours: [SquareSet; 2],
    piece_array: [Option<Piece>; 64],
    turn: Colour,
    castling: CastlingRights,
    ep_square: Option<Square>,
    halfmove_clock: u8,
    fullmove_number: u16,
    key: u64,
}

impl Default for Board {
    fn default() -> Self {
        Self::startpos()
    }
}

impl Board {
    pub fn startpos() -> Self {
        Self::from_fen(STARTPOS_FEN).expect("the starting position FEN is valid")
    }

    pub fn from_fen(fen: &str) -> Result<Self, FenParseError> {
        Ok(Self::from_parsed(&Fen::parse(fen)?))
    }

    pub fn from_fen_relaxed(fen: &str) -> Result<Self, FenParseError> {
        Ok(Self::from_parsed(&Fen::parse_relaxed(fen)?))
    }

    fn from_parsed(fen: &Fen) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let mut board = Self {
            pieces: [SquareSet::EMPTY; 6],
            colours: [SquareSet::EMPTY; 2],
            piece_array: [None; 64],
            turn: fen.turn,
            castling: fen.castling,
            ep_square: fen.ep,
            halfmove_clock: fen.halfmove,
            fullmove_number: fen.fullmove.get().min(usize::from(u16::MAX)) as u16,
            key: 0,
        };
        for sq in Square::all() {
            if let Some(piece) = fen.pieces[sq] {
                board.add_piece(sq, piece);
            }
        }
        // A declared en-passant square that cannot legally be taken is not
        // part of the position; drop it before the key is computed.
        if board.ep_square.is_some() && !board.legal_moves().iter().any(|m| m.is_ep()) {
            board.ep_square = None;
        }
        board.key = board.compute_key();
        board
    }

    pub const fn turn(&self) -> Colour {
        self.turn
    }

    pub const fn key(&self) -> u64 {
        self.key
    }

    pub const fn halfmove_clock(&self) -> u8 {
        self.halfmove_clock
    }

    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.piece_array[sq]
    }

    pub fn piece_set(&self, piece: Piece) -> SquareSet {
        self.pieces[piece.piece_type()] & self.colours[piece.colour()]
    }

    pub fn occupied(&self) -> SquareSet {
        self.colours[Colour::White] | self.colours[Colour::Black]
    }

    pub fn piece_count(&self) -> u32 {
        self.occupied().count()
    }

    pub fn king_sq(&self, side: Colour) -> Option<Square> {
        (self.pieces[PieceType::King] & self.colours[side]).first()
    }

    fn add_piece(&mut self, sq: Square, piece: Piece) {
        self.pieces[piece.piece_type()] |= sq.as_set();
        self.colours[piece.colour()] |= sq.as_set();
        self.piece_array[sq] = Some(piece);
    }

    fn remove_piece(&mut self, sq: Square) -> Option<Piece> {
        let piece = self.piece_array[sq].take()?;
        self.pieces[piece.piece_type()] -= sq.as_set();
        self.colours[piece.colour()] -= sq.as_set();
        Some(piece)
    }

    fn compute_key(&self) -> u64 {
        let mut key = 0;
        for piece in Piece::all() {
            for sq in self.piece_set(piece) {
                key ^= PIECE_KEYS[piece.index()][sq];
            }
        }
        if let Some(ep) = self.ep_square {
            key ^= EP_KEYS[ep];
        }
        key ^= CASTLE_KEYS[self.castling.hashkey_index()];
        if self.turn == Colour::Black {
            key ^= SIDE_KEY;
        }
        key
    }

    /// Is `sq` attacked by any piece of colour `by`?
    pub fn sq_attacked(&self, sq: Square, by: Colour) -> bool {
        let attackers = self.colours[by];
        let occupied = self.occupied();
        if (PAWN_ATTACKS[!by][sq] & self.pieces[PieceType::Pawn] & attackers).non_empty() {
            return true;
        }
        if (KNIGHT_ATTACKS[sq] & self.pieces[PieceType::Knight] & attackers).non_empty() {
            return true;
        }
        if (KING_ATTACKS[sq] & self.pieces[PieceType::King] & attackers).non_empty() {
            return true;
        }
        let diagonal = self.pieces[PieceType::Bishop] | self.pieces[PieceType::Queen];
        if (bishop_attacks(sq, occupied) & diagonal & attackers).non_empty() {
            return true;
        }
        let orthogonal = self.pieces[PieceType::Rook] | self.pieces[PieceType::Queen];
        (rook_attacks(sq, occupied) & orthogonal & attackers).non_empty()
    }

    fn attacked_king(&self, side: Colour) -> bool {
        self.king_sq(side)
            .is_some_and(|sq| self.sq_attacked(sq, !side))
    }

    pub fn in_check(&self) -> bool {
        self.attacked_king(self.turn)
    }

    /// Generate pseudo-legal moves: legality against own-king safety is the
    /// caller's job (see `legal_moves`).
    pub fn generate_moves(&self, moves: &mut MoveList) {
        let us = self.turn;
        let them = !us;
        let ours = self.colours[us];
        let theirs = self.colours[them];
        let occupied = ours | theirs;

        let (promo_rank, start_rank) = match us {
            Colour::White => (Rank::Eight, Rank::Two),
            Colour::Black => (Rank::One, Rank::Seven),
        };

        for from in self.pieces[PieceType::Pawn] & ours {
            if let Some(to) = from.pawn_push(us) {
                if !occupied.contains_square(to) {
                    if to.rank() == promo_rank {
                        push_promotions(moves, from, to);
                    } else {
                        moves.push(Move::new(from, to));
                        if from.rank() == start_rank {
                            if let Some(double) = to.pawn_push(us) {
                                if !occupied.contains_square(double) {
                                    moves.push(Move::new(from, double));
                                }
                            }
                        }
                    }
                }
            }
            for to in PAWN_ATTACKS[us][from] & theirs {
                if to.rank() == promo_rank {
                    push_promotions(moves, from, to);
                } else {
                    moves.push(Move::new(from, to));
                }
            }
            if let Some(ep) = self.ep_square {
                if PAWN_ATTACKS[us][from].contains_square(ep) {
                    moves.push(Move::new_with_flags(from, ep, Move::EP_FLAG));
                }
            }
        }

        for from in self.pieces[PieceType::Knight] & ours {
            for to in KNIGHT_ATTACKS[from] - ours {
                moves.push(Move::new(from, to));
            }
        }
        for from in self.pieces[PieceType::Bishop] & ours {
            for to in bishop_attacks(from, occupied) - ours {
                moves.push(Move::new(from, to));
            }
        }
        for from in self.pieces[PieceType::Rook] & ours {
            for to in rook_attacks(from, occupied) - ours {
                moves.push(Move::new(from, to));
            }
        }
        for from in self.pieces[PieceType::Queen] & ours {
            for to in (bishop_attacks(from, occupied) | rook_attacks(from, occupied)) - ours {
                moves.push(Move::new(from, to));
            }
        }
        for from in self.pieces[PieceType::King] & ours {
            for to in KING_ATTACKS[from] - ours {
                moves.push(Move::new(from, to));
            }
        }

        self.generate_castling(moves, occupied);
    }

    fn generate_castling(&self, moves: &mut MoveList, occupied: SquareSet) {
        let us = self.turn;
        let them = !us;
        let (king_from, rook_ks, rook_qs) = match us {
            Colour::White => (Square::E1, Square::H1, Square::A1),
            Colour::Black => (Square::E8, Square::H8, Square::A8),
        };
        if self.piece_array[king_from] != Some(Piece::new(us, PieceType::King)) {
            return;
        }
        let rook = Piece::new(us, PieceType::Rook);

        if self.castling.kingside(us) && self.piece_array[rook_ks] == Some(rook) {
            let (f_sq, g_sq) = match us {
                Colour::White => (Square::F1, Square::G1),
                Colour::Black => (Square::F8, Square::G8),
            };
            let path_clear =
                !occupied.contains_square(f_sq) && !occupied.contains_square(g_sq);
            if path_clear
                && !self.sq_attacked(king_from, them)
                && !self.sq_attacked(f_sq, them)
                && !self.sq_attacked(g_sq, them)
            {
                moves.push(Move::new_with_flags(king_from, g_sq, Move::CASTLE_FLAG));
            }
        }

        if self.castling.queenside(us) && self.piece_array[rook_qs] == Some(rook) {
            let (b_sq, c_sq, d_sq) = match us {
                Colour::White => (Square::B1, Square::C1, Square::D1),
                Colour::Black => (Square::B8, Square::C8, Square::D8),
            };
            let path_clear = !occupied.contains_square(b_sq)
                && !occupied.contains_square(c_sq)
                && !occupied.contains_square(d_sq);
            if path_clear
                && !self.sq_attacked(king_from, them)
                && !self.sq_attacked(d_sq, them)
                && !self.sq_attacked(c_sq, them)
            {
                moves.push(Move::new_with_flags(king_from, c_sq, Move::CASTLE_FLAG));
            }
        }
    }

    pub fn legal_moves(&self) -> MoveList {
        let mut pseudo = MoveList::new();
        self.generate_moves(&mut pseudo);
        let us = self.turn;
        let mut legal = MoveList::new();
        for &m in &pseudo {
            let mut child = *self;
            child.make_move(m);
            if !child.attacked_king(us) {
                legal.push(m);
            }
        }
        legal
    }

    /// Apply a move that came out of `generate_moves` for this position.
    pub fn make_move(&mut self, m: Move) {
        let us = self.turn;
        let them = !us;
        let from = m.from();
        let to = m.to();
        let Some(piece) = self.piece_array[from] else {
            debug_assert!(false, "make_move called with an empty from-square");
            return;
        };

        let mut reset_clock = piece.piece_type() == PieceType::Pawn;

        if m.is_ep() {
            if let Some(victim) = to.pawn_push(them) {
                self.remove_piece(victim);
            }
            reset_clock = true;
        } else if self.piece_array[to].is_some() {
            self.remove_piece(to);
            reset_clock = true;
        }

        self.remove_piece(from);
        let placed = match m.promotion_type() {
            Some(promo) => Piece::new(us, promo),
            None => piece,
        };
        self.add_piece(to, placed);

        if m.is_castle() {
            let (rook_from, rook_to) = match to {
                Square::G1 => (Square::H1, Square::F1),
                Square::C1 => (Square::A1, Square::D1),
                Square::G8 => (Square::H8, Square::F8),
                _ => (Square::A8, Square::D8),
            };
            if let Some(rook) = self.remove_piece(rook_from) {
                self.add_piece(rook_to, rook);
            }
        }

        // Only record an en-passant square when an enemy pawn stands ready
        // to take it; an idle right is not part of the position.
        let double_push = piece.piece_type() == PieceType::Pawn
            && from.inner().abs_diff(to.inner()) == 16;
        self.ep_square = if double_push {
            from.pawn_push(us).filter(|&ep| {
                (PAWN_ATTACKS[us][ep] & self.pieces[PieceType::Pawn] & self.colours[them])
                    .non_empty()
            })
        } else {
            None
        };

        self.castling
            .clear(castling_rights_mask(from) | castling_rights_mask(to));

        self.halfmove_clock = if reset_clock {
            0
        } else {
            self.halfmove_clock.saturating_add(1)
        };
        if us == Colour::Black {
            self.fullmove_number = self.fullmove_number.saturating_add(1);
        }
        self.turn = them;
        self.key = self.compute_key();
    }

    /// Interpret a move in coordinate notation ("e2e4", "a7a8q") against this
    /// position, resolving the castling and en passant flags from context.
    pub fn parse_uci_move(&self, s: &str) -> Result<Move, MoveParseError> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 && bytes.len() != 5 {
            return Err(MoveParseError::InvalidLength(bytes.len()));
        }
        let from = square_from_bytes(bytes[0], bytes[1])
            .ok_or_else(|| MoveParseError::InvalidFromSquare(lossy(&bytes[0..2])))?;
        let to = square_from_bytes(bytes[2], bytes[3])
            .ok_or_else(|| MoveParseError::InvalidToSquare(lossy(&bytes[2..4])))?;
        let promo = if bytes.len() == 5 {
            Some(match bytes[4] {
                b'q' => PieceType::Queen,
                b'r' => PieceType::Rook,
                b'b' => PieceType::Bishop,
                b'n' => PieceType::Knight,
                other => return Err(MoveParseError::InvalidPromotionPiece(char::from(other))),
            })
        } else {
            None
        };

        self.legal_moves()
            .iter()
            .copied()
            .find(|m| m.from() == from && m.to() == to && m.promotion_type() == promo)
            .ok_or_else(|| MoveParseError::IllegalMove(s.to_string()))
    }

    /// The endings the board can detect on its own. Threefold repetition is
    /// the caller's responsibility via `key()` history.
    pub fn end_state(&self) -> Option<GameEnd> {
        if self.legal_moves().is_empty() {
            return Some(if self.in_check() {
                GameEnd::Checkmate { winner: !self.turn }
            } else {
                GameEnd::Stalemate
            });
        }
        if self.halfmove_clock() >= 100 {
            return Some(GameEnd::FiftyMoves);
        }
        if self.insufficient_material() {
            return Some(GameEnd::InsufficientMaterial);
        }
        None
    }

    pub fn insufficient_material(&self) -> bool {
        let heavy = self.pieces[PieceType::Pawn]
            | self.pieces[PieceType::Rook]
            | self.pieces[PieceType::Queen];
        if heavy.non_empty() {
            return false;
        }
        let knights = self.pieces[PieceType::Knight];
        let bishops = self.pieces[PieceType::Bishop];
        if (knights | bishops).count() <= 1 {
            // K vs K, or a lone minor piece.
            return true;
        }
        if knights.non_empty() {
            return false;
        }
        // Bishops only: dead if they all stand on one square colour.
        (bishops & SquareSet::LIGHT_SQUARES).is_empty()
            || (bishops & SquareSet::DARK_SQUARES).is_empty()
    }

    pub fn fen(&self) -> String {
        let mut placement = String::new();
        for rank in Rank::all().rev() {
            let mut empty = 0u8;
            for file in File::all() {
                match self.piece_array[Square::from_rank_file(rank, file)] {
                    Some(piece) => {
                        if empty > 0 {
                            placement.push(char::from(b'0' + empty));
                            empty = 0;
                        }
                        placement.push(piece.char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                placement.push(char::from(b'0' + empty));
            }
            if rank != Rank::One {
                placement.push('/');
            }
        }

        let turn = match self.turn {
            Colour::White => 'w',
            Colour::Black => 'b',
        };
        let ep = self.ep_square.map_or("-", Square::name);
        format!(
            "{placement} {turn} {} {ep} {} {}",
            self.castling, self.halfmove_clock, self.fullmove_number
        )
    }

}

fn push_promotions(moves: &mut MoveList, from: Square, to: Square) {
    for promo in [
        PieceType::Queen,
        PieceType::Rook,
        PieceType::Bishop,
        PieceType::Knight,
    ] {
        moves.push(Move::new_promo(from, to, promo));
    }
}

/// The castling rights lost when a piece moves from, or a capture lands on,
/// the given square.
const fn castling_rights_mask(sq: Square) -> u8 {
    match sq {
        Square::E1 => CastlingRights::WK | CastlingRights::WQ,
        Square::H1 => CastlingRights::WK,
        Square::A1 => CastlingRights::WQ,
        Square::E8 => CastlingRights::BK | CastlingRights::BQ,
        Square::H8 => CastlingRights::BK,
        Square::A8 => CastlingRights::BQ,
        _ => 0,
    }
}

fn square_from_bytes(file: u8, rank: u8) -> Option<Square> {
    if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
        return None;
    }
    Square::new((rank - b'1') * 8 + (file - b'a'))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perft(board: &Board, depth: usize) -> u64 {
        if depth == 0 {
            return 1;
        }
        let moves = board.legal_moves();
        if depth == 1 {
            return moves.len() as u64;
        }
        let mut count = 0;
        for &m in &moves {
            let mut child = *board;
            child.make_move(m);
            count += perft(&child, depth - 1);
        }
        count
    }

    #[test]
    fn startpos_basics() {
        let board = Board::startpos();
        assert_eq!(board.turn(), Colour::White);
        assert_eq!(board.piece_count(), 32);
        assert_eq!(board.king_sq(Colour::White), Some(Square::E1));
        assert_eq!(board.king_sq(Colour::Black), Some(Square::E8));
        assert!(!board.in_check());
        assert_eq!(board.fen(), STARTPOS_FEN);
    }

    #[test]
    fn perft_startpos() {
        let board = Board::startpos();
        assert_eq!(perft(&board, 1), 20);
        assert_eq!(perft(&board, 2), 400);
        assert_eq!(perft(&board, 3), 8_902);
        assert_eq!(perft(&board, 4), 197_281);
    }

    #[test]
    fn perft_kiwipete() {
        let board = Board::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        assert_eq!(perft(&board, 1), 48);
        assert_eq!(perft(&board, 2), 2_039);
        assert_eq!(perft(&board, 3), 97_862);
    }

    #[test]
    fn perft_en_passant_pins() {
        let board = Board::from_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1").unwrap();
        assert_eq!(perft(&board, 1), 14);
        assert_eq!(perft(&board, 2), 191);
        assert_eq!(perft(&board, 3), 2_812);
    }

    #[test]
    fn perft_promotions() {
        let board =
            Board::from_fen("rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8").unwrap();
        assert_eq!(perft(&board, 1), 44);
        assert_eq!(perft(&board, 2), 1_486);
        assert_eq!(perft(&board, 3), 62_379);
    }

    #[test]
    fn make_move_updates_state() {
        let mut board = Board::startpos();
        let m = board.parse_uci_move("e2e4").unwrap();
        board.make_move(m);
        assert_eq!(board.turn(), Colour::Black);
        assert_eq!(board.piece_at(Square::E4), Some(Piece::WP));
        assert_eq!(board.piece_at(Square::E2), None);
        // No black pawn can take on e3, so no en-passant square is kept.
        assert_eq!(
            board.fen(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
    }

    #[test]
    fn en_passant_capture_removes_victim() {
        let mut board =
            Board::from_fen("rnbqkbnr/ppp1pppp/8/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3")
                .unwrap();
        let m = board.parse_uci_move("e5d6").unwrap();
        assert!(m.is_ep());
        board.make_move(m);
        assert_eq!(board.piece_at(Square::D6), Some(Piece::WP));
        assert_eq!(board.piece_at(Square::D5), None);
    }

    #[test]
    fn en_passant_square_needs_a_capturer() {
        // 2...d5 with no white pawn beside d5: the double push leaves no
        // en-passant square, and the key matches the same position declared
        // with an idle one.
        let mut quiet =
            Board::from_fen("rnbqkbnr/ppppp1pp/8/5p2/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2")
                .unwrap();
        let m = quiet.parse_uci_move("d7d5").unwrap();
        quiet.make_move(m);
        assert_eq!(quiet.ep_square, None);
        assert_eq!(
            quiet.fen(),
            "rnbqkbnr/ppp1p1pp/8/3p1p2/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 0 3"
        );
        let declared = Board::from_fen(
            "rnbqkbnr/ppp1p1pp/8/3p1p2/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq d6 0 3",
        )
        .unwrap();
        assert_eq!(quiet.key(), declared.key());

        // The same push beside a white pawn offers the capture, and the
        // square survives a FEN round trip.
        let mut offered =
            Board::from_fen("rnbqkbnr/ppppp1pp/8/4Pp2/8/8/PPPP1PPP/RNBQKBNR b KQkq - 0 2")
                .unwrap();
        let m = offered.parse_uci_move("d7d5").unwrap();
        offered.make_move(m);
        assert_eq!(offered.ep_square, Some(Square::D6));
        assert!(offered.parse_uci_move("e5d6").unwrap().is_ep());
        let same = Board::from_fen(&offered.fen()).unwrap();
        assert_eq!(offered.key(), same.key());
    }

    #[test]
    fn castling_is_blocked_through_check() {
        let board = Board::from_fen("r3k2r/8/8/8/8/8/5r2/R3K2R w KQkq - 0 1").unwrap();
        let moves: Vec<String> = board.legal_moves().iter().map(Move::to_string).collect();
        // f2 rook covers f1, so kingside is out; queenside path is safe.
        assert!(!moves.iter().any(|m| m == "e1g1"));
        assert!(moves.iter().any(|m| m == "e1c1"));
    }

    #[test]
    fn castling_moves_the_rook() {
        let mut board = Board::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let m = board.parse_uci_move("e1g1").unwrap();
        assert!(m.is_castle());
        board.make_move(m);
        assert_eq!(board.piece_at(Square::G1), Some(Piece::WK));
        assert_eq!(board.piece_at(Square::F1), Some(Piece::WR));
        assert_eq!(board.piece_at(Square::H1), None);
        // Black keeps both rights, but the f1 rook now covers f8 down the
        // open file, so only the queenside is playable this move.
        assert!(board.fen().contains(" kq "));
        assert!(!board.legal_moves().iter().any(|m| m.to_string() == "e8g8"));
        assert!(board.legal_moves().iter().any(|m| m.to_string() == "e8c8"));
    }

    #[test]
    fn rook_capture_clears_castling_rights() {
        let mut board = Board::from_fen("r3k2r/8/8/8/8/8/6B1/R3K2R w KQkq - 0 1").unwrap();
        let m = board.parse_uci_move("g2a8").unwrap();
        board.make_move(m);
        // Black lost queenside rights when the a8 rook fell.
        assert!(!board.legal_moves().iter().any(|m| m.to_string() == "e8c8"));
        assert!(board.legal_moves().iter().any(|m| m.to_string() == "e8g8"));
    }

    #[test]
    fn detects_checkmate() {
        // Fool's mate.
        let board =
            Board::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 0 3")
                .unwrap();
        assert_eq!(
            board.end_state(),
            Some(GameEnd::Checkmate {
                winner: Colour::Black
            })
        );
    }

    #[test]
    fn detects_stalemate() {
        let board = Board::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert!(!board.in_check());
        assert_eq!(board.end_state(), Some(GameEnd::Stalemate));
    }

    #[test]
    fn detects_fifty_move_rule() {
        let board = Board::from_fen("k7/8/8/8/8/8/8/K6R w - - 100 80").unwrap();
        assert_eq!(board.end_state(), Some(GameEnd::FiftyMoves));
    }

    #[test]
    fn detects_insufficient_material() {
        assert!(Board::from_fen("k7/8/8/8/8/8/8/7K w - - 0 1")
            .unwrap()
            .insufficient_material());
        assert!(Board::from_fen("kb6/8/8/8/8/8/8/7K w - - 0 1")
            .unwrap()
            .insufficient_material());
        // Two bishops on the same square colour cannot mate.
        assert!(Board::from_fen("k7/8/8/4b3/8/2b5/8/K7 w - - 0 1")
            .unwrap()
            .insufficient_material());
        // Opposite-coloured bishops can.
        assert!(!Board::from_fen("k7/8/8/8/8/2bb4/8/K7 w - - 0 1")
            .unwrap()
            .insufficient_material());
        // A queen is plenty.
        assert!(!Board::from_fen("kq6/8/8/8/8/8/8/7K w - - 0 1")
            .unwrap()
            .insufficient_material());
    }

    #[test]
    fn promotion_moves_parse_and_apply() {
        let mut board = Board::from_fen("8/P7/8/8/8/8/8/k6K w - - 0 1").unwrap();
        let m = board.parse_uci_move("a7a8q").unwrap();
        assert!(m.is_promo());
        board.make_move(m);
        assert_eq!(board.piece_at(Square::A8), Some(Piece::WQ));
        assert!(board.piece_at(Square::A7).is_none());
    }

    #[test]
    fn illegal_moves_are_rejected() {
        let board = Board::startpos();
        assert!(matches!(
            board.parse_uci_move("e2e5"),
            Err(MoveParseError::IllegalMove(_))
        ));
        assert!(matches!(
            board.parse_uci_move("e2"),
            Err(MoveParseError::InvalidLength(2))
        ));
        assert!(matches!(
            board.parse_uci_move("z2e4"),
            Err(MoveParseError::InvalidFromSquare(_))
        ));
        assert!(matches!(
            board.parse_uci_move("a7a8x"),
            Err(MoveParseError::InvalidPromotionPiece('x'))
        ));
    }

    #[test]
    fn repetition_keys_match_for_repeated_positions() {
        let mut board = Board::startpos();
        let initial_key = board.key();
        for uci in ["g1f3", "g8f6", "f3g1", "f6g8"] {
            let m = board.parse_uci_move(uci).unwrap();
            board.make_move(m);
        }
        assert_eq!(board.key(), initial_key);

        let mut other = Board::startpos();
        let m = other.parse_uci_move("e2e4").unwrap();
        other.make_move(m);
        assert_ne!(other.key(), initial_key);
    }

    #[test]
    fn halfmove_clock_resets_on_pawn_moves_and_captures() {
        let mut board = Board::startpos();
        for uci in ["g1f3", "g8f6"] {
            let m = board.parse_uci_move(uci).unwrap();
            board.make_move(m);
        }
        assert_eq!(board.halfmove_clock(), 2);
        let m = board.parse_uci_move("e2e4").unwrap();
        board.make_move(m);
        assert_eq!(board.halfmove_clock(), 0);
    }

    #[test]
    fn fen_round_trip() {
        let fens = [
            STARTPOS_FEN,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "rnbqkbnr/ppp1pppp/8/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3",
        ];
        for fen in fens {
            assert_eq!(Board::from_fen(fen).unwrap().fen(), fen);
        }
    }
}
