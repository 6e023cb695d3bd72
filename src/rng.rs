const SEED: u128 = 0x9E37_79B9_7F4A_7C15_F39C_C060_5CED_C834;

/// A xorshift generator that can run in const context, used to build the
/// Zobrist key tables at compile time.
pub struct XorShiftState {
    state: u128,
}

impl XorShiftState {
    pub const fn new() -> Self {
        Self { state: SEED }
    }

    /// Generates the next random number in the sequence, consuming self.
    /// This is done to allow for const evaluation.
    pub const fn next_self(mut self) -> (u64, Self) {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        #[allow(clippy::cast_possible_truncation)]
        let r = x as u64;
        let r = r ^ (x >> 64) as u64; // fold in the high bits.
        (r, self)
    }
}
