#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]
#![deny(missing_docs)]

//! Verdigris, an NNUE evaluation trainer and match harness for chess engines.

use std::io::BufRead;

use anyhow::{Context, bail};

use crate::{chess::board::Board, nnue::export, nnue::network::Network};

mod arena;
mod chess;
mod cli;
mod corpus;
mod errors;
mod nnue;
mod rng;
mod train;

/// The name of the program.
pub static NAME: &str = "Verdigris";
/// The version of the program.
pub static VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let cli = <cli::Cli as clap::Parser>::parse();

    match cli.subcommand {
        cli::Subcommands::Train { config, resume } => {
            train::train_main(&config, resume.as_deref())
        }
        cli::Subcommands::Export {
            checkpoint,
            output,
            scale,
            csv,
        } => {
            let (network, _) = Network::load_checkpoint(&checkpoint)?;
            export::export_network(&network, &output, scale, csv)?;
            println!("Exported weights to {}", output.display());
            Ok(())
        }
        cli::Subcommands::Verify {
            checkpoint,
            weights,
            scale,
        } => {
            let (network, _) = Network::load_checkpoint(&checkpoint)?;
            let error = export::max_reconstruction_error(&network, &weights, scale)?;
            // Half a quantisation step, with a whisker of slack for values
            // that round from exactly halfway.
            let bound = 0.51 / scale;
            if error > bound {
                bail!("Reconstruction error {error} exceeds the quantisation bound {bound}.");
            }
            println!(
                "Weights at {} match the checkpoint (max error {error}).",
                weights.display()
            );
            Ok(())
        }
        cli::Subcommands::Eval {
            weights,
            fen,
            activation,
            leak,
            scale,
        } => {
            let activation = train::parse_activation(&activation, leak)?;
            let network = export::load_exported(&weights, scale, activation)?;
            if let Some(fen) = fen {
                let board = Board::from_fen_relaxed(&fen)?;
                println!("{:+.1}", network.evaluate(&board));
            } else {
                for line in std::io::stdin().lock().lines() {
                    let line = line.with_context(|| "Failed to read a FEN from stdin")?;
                    let fen = line.trim();
                    if fen.is_empty() {
                        continue;
                    }
                    match Board::from_fen_relaxed(fen) {
                        Ok(board) => println!("{:+.1}", network.evaluate(&board)),
                        Err(err) => eprintln!("[WARN] unusable FEN \"{fen}\": {err}"),
                    }
                }
            }
            Ok(())
        }
        cli::Subcommands::Stats { input } => corpus::dataset_stats(&input),
        cli::Subcommands::CountPositions { input } => corpus::dataset_count(&input),
        cli::Subcommands::Arena {
            engines,
            games,
            output,
            movetime,
        } => arena::arena_main(&engines, games, &output, movetime),
    }
}
