pub mod export;
pub mod feature;
pub mod network;

/// Input features: 12 piece planes of 64 squares.
pub const INPUT: usize = 768;
/// Accumulator width per perspective.
pub const HIDDEN: usize = 1024;
/// Material-bucketed output heads.
pub const OUTPUT_BUCKETS: usize = 8;
