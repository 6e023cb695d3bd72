use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use rand::Rng;

use crate::{
    chess::{board::Board, piece::Colour},
    errors::WeightLoadError,
    nnue::{
        HIDDEN, INPUT, OUTPUT_BUCKETS,
        feature::{active_features, flipped_features},
    },
};

pub const CHECKPOINT_MAGIC: [u8; 4] = *b"VDGW";
const CHECKPOINT_VERSION: u32 = 1;
const OPTIMIZER_MAGIC: [u8; 4] = *b"ADAM";

/// Elementwise nonlinearity applied to the concatenated accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    /// `clamp(x, 0, 1)^2`.
    SquaredClampedReLU,
    /// `l*x` below zero, `x^2` inside `[0, 1]`, `l*(x - 1) + 1` above one.
    /// The leak keeps gradients alive outside the clamp range during
    /// training, and must be reproduced exactly at inference time for
    /// weights trained under it.
    LeakySquaredClampedReLU { leak: f32 },
}

impl Default for Activation {
    fn default() -> Self {
        Self::LeakySquaredClampedReLU {
            leak: Self::DEFAULT_LEAK,
        }
    }
}

impl Activation {
    pub const DEFAULT_LEAK: f32 = 0.01;

    pub fn forward(self, x: f32) -> f32 {
        match self {
            Self::SquaredClampedReLU => {
                let clamped = x.clamp(0.0, 1.0);
                clamped * clamped
            }
            Self::LeakySquaredClampedReLU { leak } => {
                if x < 0.0 {
                    leak * x
                } else if x <= 1.0 {
                    x * x
                } else {
                    leak * (x - 1.0) + 1.0
                }
            }
        }
    }

    pub fn derivative(self, x: f32) -> f32 {
        match self {
            Self::SquaredClampedReLU => {
                if x <= 0.0 || x >= 1.0 {
                    0.0
                } else {
                    2.0 * x
                }
            }
            Self::LeakySquaredClampedReLU { leak } => {
                if (0.0..=1.0).contains(&x) {
                    2.0 * x
                } else {
                    leak
                }
            }
        }
    }

    pub const fn tag(self) -> u8 {
        match self {
            Self::SquaredClampedReLU => 0,
            Self::LeakySquaredClampedReLU { .. } => 1,
        }
    }

    pub const fn leak(self) -> f32 {
        match self {
            Self::SquaredClampedReLU => 0.0,
            Self::LeakySquaredClampedReLU { leak } => leak,
        }
    }

    pub fn from_tag(tag: u8, leak: f32) -> Option<Self> {
        match tag {
            0 => Some(Self::SquaredClampedReLU),
            1 => Some(Self::LeakySquaredClampedReLU { leak }),
            _ => None,
        }
    }
}

/// Map a total piece count to an output head. Out-of-range counts
/// (synthetic positions, promoted-pawn armies) clamp into range rather than
/// fail, matching the convention the deployed weights were trained under.
pub const fn output_bucket(piece_count: u32) -> usize {
    let index = piece_count.saturating_sub(2) as usize * OUTPUT_BUCKETS / 31;
    if index > OUTPUT_BUCKETS - 1 {
        OUTPUT_BUCKETS - 1
    } else {
        index
    }
}

/// Adam moment estimates, flattened over the parameters in the canonical
/// tensor order (accumulation weights, accumulation biases, output weights,
/// output biases).
pub struct OptimizerState {
    pub step: u64,
    pub first_moment: Vec<f32>,
    pub second_moment: Vec<f32>,
}

impl OptimizerState {
    pub fn zeroed() -> Self {
        Self {
            step: 0,
            first_moment: vec![0.0; Network::parameter_count()],
            second_moment: vec![0.0; Network::parameter_count()],
        }
    }
}

/// The evaluation network. Constructed once, then shared immutably between
/// evaluation callers; only the trainer mutates it, between forward passes.
#[derive(Clone)]
pub struct Network {
    pub activation: Activation,
    /// Accumulation weights, feature-major: entry `f * HIDDEN + h` is the
    /// contribution of feature `f` to accumulator element `h`.
    pub accumulation_weights: Vec<f32>,
    pub accumulation_biases: Vec<f32>,
    /// Output weights, one row of `2 * HIDDEN` per bucket.
    pub output_weights: Vec<f32>,
    pub output_biases: Vec<f32>,
}

/// Intermediate products of one forward pass, kept for the backward pass.
pub struct ForwardCache {
    /// Pre-activation concatenated accumulator, mover's half first.
    pub pre_activation: Vec<f32>,
    pub activated: Vec<f32>,
    /// Side-to-move-relative output.
    pub output: f32,
}

impl Default for ForwardCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardCache {
    pub fn new() -> Self {
        Self {
            pre_activation: vec![0.0; 2 * HIDDEN],
            activated: vec![0.0; 2 * HIDDEN],
            output: 0.0,
        }
    }
}

impl Network {
    pub fn zeroed(activation: Activation) -> Self {
        Self {
            activation,
            accumulation_weights: vec![0.0; INPUT * HIDDEN],
            accumulation_biases: vec![0.0; HIDDEN],
            output_weights: vec![0.0; OUTPUT_BUCKETS * 2 * HIDDEN],
            output_biases: vec![0.0; OUTPUT_BUCKETS],
        }
    }

    /// Uniform init in `±1/sqrt(fan_in)` per layer.
    pub fn init(activation: Activation, rng: &mut impl Rng) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let acc_bound = 1.0 / (INPUT as f32).sqrt();
        #[allow(clippy::cast_precision_loss)]
        let out_bound = 1.0 / ((2 * HIDDEN) as f32).sqrt();
        let mut network = Self::zeroed(activation);
        for w in network
            .accumulation_weights
            .iter_mut()
            .chain(&mut network.accumulation_biases)
        {
            *w = rng.random_range(-acc_bound..acc_bound);
        }
        for w in network
            .output_weights
            .iter_mut()
            .chain(&mut network.output_biases)
        {
            *w = rng.random_range(-out_bound..out_bound);
        }
        network
    }

    pub const fn parameter_count() -> usize {
        INPUT * HIDDEN + HIDDEN + OUTPUT_BUCKETS * 2 * HIDDEN + OUTPUT_BUCKETS
    }

    /// The tensors in canonical flat order.
    pub fn tensors(&self) -> [&[f32]; 4] {
        [
            &self.accumulation_weights,
            &self.accumulation_biases,
            &self.output_weights,
            &self.output_biases,
        ]
    }

    /// Accumulation layer: bias plus the sum of the weight rows of the
    /// active features. `out` must be `HIDDEN` long.
    pub fn accumulate(&self, features: &[u16], out: &mut [f32]) {
        out.copy_from_slice(&self.accumulation_biases);
        for &feature in features {
            let row = &self.accumulation_weights[usize::from(feature) * HIDDEN..][..HIDDEN];
            for (acc, w) in out.iter_mut().zip(row) {
                *acc += w;
            }
        }
    }

    pub fn bucket_row(&self, bucket: usize) -> &[f32] {
        &self.output_weights[bucket * 2 * HIDDEN..][..2 * HIDDEN]
    }

    /// One forward pass with the mover's features first, filling `cache`
    /// for a subsequent backward pass. `cache.output` is mover-relative.
    pub fn forward_into(&self, me: &[u16], opp: &[u16], bucket: usize, cache: &mut ForwardCache) {
        self.accumulate(me, &mut cache.pre_activation[..HIDDEN]);
        self.accumulate(opp, &mut cache.pre_activation[HIDDEN..]);
        for (a, &x) in cache.activated.iter_mut().zip(&cache.pre_activation) {
            *a = self.activation.forward(x);
        }
        let mut output = self.output_biases[bucket];
        for (w, x) in self.bucket_row(bucket).iter().zip(&cache.activated) {
            output += w * x;
        }
        cache.output = output;
    }

    /// Evaluate a position, returning white-positive centipawns.
    pub fn evaluate(&self, board: &Board) -> f32 {
        let white = active_features(board);
        let black = flipped_features(&white);
        let bucket = output_bucket(board.piece_count());
        let mut cache = ForwardCache::new();
        match board.turn() {
            Colour::White => {
                self.forward_into(&white, &black, bucket, &mut cache);
                cache.output
            }
            Colour::Black => {
                self.forward_into(&black, &white, bucket, &mut cache);
                -cache.output
            }
        }
    }

    pub fn save_checkpoint(
        &self,
        path: &Path,
        optimizer: Option<&OptimizerState>,
    ) -> Result<(), WeightLoadError> {
        let io_err = |source| WeightLoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        self.write_checkpoint(&mut writer, optimizer).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }

    fn write_checkpoint(
        &self,
        writer: &mut impl Write,
        optimizer: Option<&OptimizerState>,
    ) -> io::Result<()> {
        writer.write_all(&CHECKPOINT_MAGIC)?;
        writer.write_all(&CHECKPOINT_VERSION.to_le_bytes())?;
        writer.write_all(&[self.activation.tag()])?;
        writer.write_all(&self.activation.leak().to_le_bytes())?;
        for dim in [INPUT, HIDDEN, OUTPUT_BUCKETS] {
            #[allow(clippy::cast_possible_truncation)]
            writer.write_all(&(dim as u32).to_le_bytes())?;
        }
        for tensor in self.tensors() {
            write_f32s(writer, tensor)?;
        }
        if let Some(state) = optimizer {
            writer.write_all(&OPTIMIZER_MAGIC)?;
            writer.write_all(&state.step.to_le_bytes())?;
            write_f32s(writer, &state.first_moment)?;
            write_f32s(writer, &state.second_moment)?;
        }
        Ok(())
    }

    pub fn load_checkpoint(path: &Path) -> Result<(Self, Option<OptimizerState>), WeightLoadError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => WeightLoadError::NotFound {
                path: path.to_path_buf(),
            },
            _ => WeightLoadError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let mut reader = BufReader::new(file);
        Self::read_checkpoint(&mut reader, path)
    }

    fn read_checkpoint(
        reader: &mut impl Read,
        path: &Path,
    ) -> Result<(Self, Option<OptimizerState>), WeightLoadError> {
        let io_err = |source| WeightLoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(io_err)?;
        if magic != CHECKPOINT_MAGIC {
            return Err(WeightLoadError::BadMagic {
                expected: CHECKPOINT_MAGIC,
                got: magic,
            });
        }
        let version = read_u32(reader).map_err(io_err)?;
        if version != CHECKPOINT_VERSION {
            return Err(WeightLoadError::UnsupportedVersion(version));
        }
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag).map_err(io_err)?;
        let leak = read_f32(reader).map_err(io_err)?;
        let activation =
            Activation::from_tag(tag[0], leak).ok_or(WeightLoadError::BadActivationTag(tag[0]))?;
        for (field, expected) in [
            ("input dimension", INPUT),
            ("hidden dimension", HIDDEN),
            ("bucket count", OUTPUT_BUCKETS),
        ] {
            let got = read_u32(reader).map_err(io_err)? as usize;
            if got != expected {
                return Err(WeightLoadError::DimensionMismatch {
                    field,
                    expected,
                    got,
                });
            }
        }

        let mut network = Self::zeroed(activation);
        read_f32s(reader, &mut network.accumulation_weights).map_err(io_err)?;
        read_f32s(reader, &mut network.accumulation_biases).map_err(io_err)?;
        read_f32s(reader, &mut network.output_weights).map_err(io_err)?;
        read_f32s(reader, &mut network.output_biases).map_err(io_err)?;

        let optimizer = match read_optional_magic(reader).map_err(io_err)? {
            None => None,
            Some(magic) if magic == OPTIMIZER_MAGIC => {
                let mut step = [0u8; 8];
                reader.read_exact(&mut step).map_err(io_err)?;
                let mut state = OptimizerState::zeroed();
                state.step = u64::from_le_bytes(step);
                read_f32s(reader, &mut state.first_moment).map_err(io_err)?;
                read_f32s(reader, &mut state.second_moment).map_err(io_err)?;
                Some(state)
            }
            Some(magic) => {
                return Err(WeightLoadError::BadMagic {
                    expected: OPTIMIZER_MAGIC,
                    got: magic,
                });
            }
        };

        Ok((network, optimizer))
    }
}

fn write_f32s(writer: &mut impl Write, data: &[f32]) -> io::Result<()> {
    for value in data {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_f32s(reader: &mut impl Read, data: &mut [f32]) -> io::Result<()> {
    let mut bytes = [0u8; 4];
    for value in data {
        reader.read_exact(&mut bytes)?;
        *value = f32::from_le_bytes(bytes);
    }
    Ok(())
}

fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_f32(reader: &mut impl Read) -> io::Result<f32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(f32::from_le_bytes(bytes))
}

/// Read a four-byte magic, or `None` at a clean end-of-file.
fn read_optional_magic(reader: &mut impl Read) -> io::Result<Option<[u8; 4]>> {
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = reader.read(&mut magic[filled..])?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(io::ErrorKind::UnexpectedEof.into())
            };
        }
        filled += n;
    }
    Ok(Some(magic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn test_network(activation: Activation) -> Network {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        Network::init(activation, &mut rng)
    }

    fn swap_case(c: char) -> char {
        if c.is_ascii_uppercase() {
            c.to_ascii_lowercase()
        } else if c.is_ascii_lowercase() {
            c.to_ascii_uppercase()
        } else {
            c
        }
    }

    /// Colour-swap the pieces and flip the ranks, producing the mirror
    /// image of a position with the opposite side to move.
    fn mirrored(fen: &str) -> Board {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        assert_eq!(fields[3], "-", "mirror helper does not translate ep squares");
        let placement: Vec<String> = fields[0]
            .split('/')
            .rev()
            .map(|rank| rank.chars().map(swap_case).collect())
            .collect();
        let turn = if fields[1] == "w" { "b" } else { "w" };
        let castling = if fields[2] == "-" {
            "-".to_string()
        } else {
            ['K', 'Q', 'k', 'q']
                .iter()
                .filter(|&&c| fields[2].contains(swap_case(c)))
                .collect()
        };
        let fen = format!(
            "{} {turn} {castling} - {} {}",
            placement.join("/"),
            fields[4],
            fields[5]
        );
        Board::from_fen(&fen).unwrap()
    }

    #[test]
    fn mirror_symmetry_both_activations() {
        let fens = [
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 b - - 0 1",
            "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1",
        ];
        for activation in [
            Activation::SquaredClampedReLU,
            Activation::LeakySquaredClampedReLU { leak: 0.01 },
        ] {
            let network = test_network(activation);
            for fen in fens {
                let board = Board::from_fen(fen).unwrap();
                let mirror = mirrored(fen);
                let eval = network.evaluate(&board);
                let mirror_eval = network.evaluate(&mirror);
                assert!(
                    (eval + mirror_eval).abs() < 1e-4,
                    "{activation:?} on {fen}: {eval} vs mirrored {mirror_eval}"
                );
            }
        }
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(output_bucket(2), 0);
        assert_eq!(output_bucket(33), OUTPUT_BUCKETS - 1);
        // Clamps below and above the normal range.
        assert_eq!(output_bucket(0), 0);
        assert_eq!(output_bucket(1), 0);
        assert_eq!(output_bucket(64), OUTPUT_BUCKETS - 1);
        // Full boards land in the top bucket.
        assert_eq!(output_bucket(32), OUTPUT_BUCKETS - 1);
        // Monotone over the legal range.
        let mut previous = 0;
        for n in 2..=32 {
            let bucket = output_bucket(n);
            assert!(bucket >= previous);
            assert!(bucket < OUTPUT_BUCKETS);
            previous = bucket;
        }
    }

    #[test]
    fn evaluation_is_deterministic() {
        let network = test_network(Activation::default());
        let board =
            Board::from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1")
                .unwrap();
        let first = network.evaluate(&board);
        let second = network.evaluate(&board);
        assert!(first.to_bits() == second.to_bits());
    }

    #[test]
    fn startpos_scenario() {
        let board = Board::startpos();
        assert_eq!(board.piece_count(), 32);
        assert_eq!(output_bucket(board.piece_count()), 7);
        // The startpos is its own mirror, so white-to-move and black-to-move
        // evaluations are exact negations.
        let network = test_network(Activation::default());
        let white_view = network.evaluate(&board);
        let black_view = network.evaluate(&mirrored(crate::chess::board::STARTPOS_FEN));
        assert!((white_view + black_view).abs() < 1e-4);
    }

    #[test]
    fn activation_derivatives_match_finite_differences() {
        let h = 1e-3;
        for activation in [
            Activation::SquaredClampedReLU,
            Activation::LeakySquaredClampedReLU { leak: 0.01 },
        ] {
            // Sample points away from the kinks at 0 and 1.
            for x in [-1.5f32, -0.4, 0.2, 0.5, 0.9, 1.3, 2.5] {
                let numeric = (activation.forward(x + h) - activation.forward(x - h)) / (2.0 * h);
                let analytic = activation.derivative(x);
                assert!(
                    (numeric - analytic).abs() < 1e-2,
                    "{activation:?} at {x}: analytic {analytic}, numeric {numeric}"
                );
            }
        }
    }

    #[test]
    fn checkpoint_round_trip() {
        let network = test_network(Activation::LeakySquaredClampedReLU { leak: 0.125 });
        let mut optimizer = OptimizerState::zeroed();
        optimizer.step = 42;
        optimizer.first_moment[17] = 0.5;
        optimizer.second_moment[93] = 2.0;

        let path = std::env::temp_dir().join(format!(
            "verdigris_checkpoint_test_{}.bin",
            std::process::id()
        ));
        network
            .save_checkpoint(&path, Some(&optimizer))
            .expect("save failed");
        let (reloaded, reloaded_opt) = Network::load_checkpoint(&path).expect("load failed");
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.activation, network.activation);
        for (a, b) in reloaded.tensors().iter().zip(network.tensors().iter()) {
            assert_eq!(a.len(), b.len());
            assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
        let reloaded_opt = reloaded_opt.expect("optimizer state lost");
        assert_eq!(reloaded_opt.step, 42);
        assert!(
            reloaded_opt
                .first_moment
                .iter()
                .zip(&optimizer.first_moment)
                .all(|(x, y)| x.to_bits() == y.to_bits())
        );
    }

    #[test]
    fn checkpoint_without_optimizer_state() {
        let network = test_network(Activation::SquaredClampedReLU);
        let path = std::env::temp_dir().join(format!(
            "verdigris_checkpoint_bare_test_{}.bin",
            std::process::id()
        ));
        network.save_checkpoint(&path, None).expect("save failed");
        let (reloaded, optimizer) = Network::load_checkpoint(&path).expect("load failed");
        std::fs::remove_file(&path).ok();
        assert_eq!(reloaded.activation, Activation::SquaredClampedReLU);
        assert!(optimizer.is_none());
    }

    #[test]
    fn checkpoint_rejects_garbage() {
        let path = std::env::temp_dir().join(format!(
            "verdigris_checkpoint_garbage_test_{}.bin",
            std::process::id()
        ));
        std::fs::write(&path, b"not a checkpoint at all").unwrap();
        let result = Network::load_checkpoint(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(WeightLoadError::BadMagic { .. })));

        let missing = Network::load_checkpoint(Path::new("/nonexistent/of/course.bin"));
        assert!(matches!(missing, Err(WeightLoadError::NotFound { .. })));
    }
}
