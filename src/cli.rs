use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{arena, nnue::export, nnue::network::Activation};

#[derive(Parser)]
#[clap(author, version, about)]
pub struct Cli {
    #[clap(subcommand)]
    pub subcommand: Subcommands,
}

#[derive(Subcommand)]
pub enum Subcommands {
    /// Train a network on an evaluation corpus.
    Train {
        /// Path to the TOML training configuration.
        #[clap(long, value_name = "PATH")]
        config: PathBuf,
        /// Checkpoint to resume from, optimiser state included.
        #[clap(long, value_name = "PATH")]
        resume: Option<PathBuf>,
    },
    /// Export a checkpoint as quantised big-endian weight files.
    Export {
        #[clap(long, value_name = "PATH")]
        checkpoint: PathBuf,
        /// Directory to write the weight files into.
        #[clap(long, value_name = "DIR")]
        output: PathBuf,
        /// Quantisation scale.
        #[clap(long, default_value_t = export::DEFAULT_SCALE)]
        scale: f32,
        /// Also dump each tensor as CSV.
        #[clap(long)]
        csv: bool,
    },
    /// Check exported weight files against their source checkpoint.
    Verify {
        #[clap(long, value_name = "PATH")]
        checkpoint: PathBuf,
        /// Directory holding the exported weight files.
        #[clap(long, value_name = "DIR")]
        weights: PathBuf,
        #[clap(long, default_value_t = export::DEFAULT_SCALE)]
        scale: f32,
    },
    /// Evaluate a position with exported weights.
    Eval {
        /// Directory holding the exported weight files.
        #[clap(long, value_name = "DIR")]
        weights: PathBuf,
        /// The position to evaluate. When omitted, FENs are read from
        /// stdin, one per line.
        #[clap(long, value_name = "FEN")]
        fen: Option<String>,
        /// Activation the weights were trained with ("leaky" or "screlu").
        #[clap(long, default_value = "leaky")]
        activation: String,
        #[clap(long, default_value_t = Activation::DEFAULT_LEAK)]
        leak: f32,
        #[clap(long, default_value_t = export::DEFAULT_SCALE)]
        scale: f32,
    },
    /// Print statistics about an evaluation corpus, dumping distributions
    /// as CSV files.
    Stats {
        /// A corpus file, or a directory of corpus files.
        #[clap(long, value_name = "PATH")]
        input: PathBuf,
    },
    /// Count the usable positions in an evaluation corpus.
    CountPositions {
        /// A corpus file, or a directory of corpus files.
        #[clap(long, value_name = "PATH")]
        input: PathBuf,
    },
    /// Run a round-robin match between UCI engine binaries.
    Arena {
        /// Directory of engine executables.
        #[clap(long, value_name = "DIR")]
        engines: PathBuf,
        /// Games per engine pair.
        #[clap(long, default_value_t = arena::DEFAULT_GAMES)]
        games: u32,
        /// Results table to append to.
        #[clap(long, value_name = "PATH")]
        output: PathBuf,
        /// Milliseconds per move.
        #[clap(long, default_value_t = arena::DEFAULT_MOVETIME)]
        movetime: u64,
    },
}
