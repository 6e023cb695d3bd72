use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
};

use anyhow::{Context, anyhow, bail};
use fxhash::FxHashMap;
use serde::Deserialize;
use vec1::Vec1;

use crate::{
    chess::{board::Board, piece::Colour},
    nnue::feature::{FeatureList, active_features},
};

/// Mate-in-`m` maps to `±(MATE_BASE - |m|)` centipawns.
pub const MATE_BASE: i32 = 10_000;
/// Training targets are clamped to this window.
pub const EVAL_CLAMP: i32 = 5_000;

const LINES_PER_CHUNK: usize = 1024;

/// One line of the evaluation corpus.
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub fen: String,
    pub evals: Vec<Eval>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Eval {
    pub depth: u32,
    pub pvs: Vec1<Pv>,
}

/// A principal variation carries either a centipawn score or a distance
/// to mate, both from white's point of view.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum Pv {
    Centipawns { cp: i32 },
    Mate { mate: i32 },
}

impl Record {
    /// The training target: the deepest evaluation's first principal
    /// variation, with mates pulled into the centipawn scale and the
    /// result clamped to `±EVAL_CLAMP`.
    pub fn target_cp(&self) -> Option<i32> {
        let deepest = self.evals.iter().max_by_key(|eval| eval.depth)?;
        let cp = match *deepest.pvs.first() {
            Pv::Centipawns { cp } => cp,
            Pv::Mate { mate } if mate >= 0 => MATE_BASE - mate,
            Pv::Mate { mate } => -MATE_BASE - mate,
        };
        Some(cp.clamp(-EVAL_CLAMP, EVAL_CLAMP))
    }
}

/// One prepared training sample.
pub struct Sample {
    /// Active features in the absolute (white) frame.
    pub features: FeatureList,
    pub turn: Colour,
    /// White-positive centipawn target.
    pub target: f32,
}

/// Parse one corpus line into a sample, or `None` if the line is
/// malformed or carries no usable evaluation.
pub fn parse_sample(line: &str) -> Option<Sample> {
    let record: Record = serde_json::from_str(line).ok()?;
    #[allow(clippy::cast_precision_loss)]
    let target = record.target_cp()? as f32;
    let board = Board::from_fen_relaxed(&record.fen).ok()?;
    Some(Sample {
        features: active_features(&board),
        turn: board.turn(),
        target,
    })
}

/// Wraps a reader and counts the bytes pulled through it, so that progress
/// through a compressed stream can be reported against the compressed
/// file length.
struct CountingReader<R> {
    inner: R,
    bytes_read: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

pub struct CorpusReader {
    pub lines: Box<dyn BufRead + Send>,
    pub bytes_read: Arc<AtomicU64>,
    pub file_len: u64,
}

/// Open a corpus file for line-oriented reading, decompressing `.zst`
/// inputs on the fly.
pub fn open_corpus_reader(path: &Path) -> anyhow::Result<CorpusReader> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let file_len = file
        .metadata()
        .with_context(|| format!("Failed to get metadata for {}", path.display()))?
        .len();
    let bytes_read = Arc::new(AtomicU64::new(0));
    let counting = CountingReader {
        inner: file,
        bytes_read: Arc::clone(&bytes_read),
    };
    let is_zst = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zst"));
    let lines = if is_zst {
        zstd_reader(counting)?
    } else {
        Box::new(BufReader::new(counting))
    };
    Ok(CorpusReader {
        lines,
        bytes_read,
        file_len,
    })
}

#[cfg(feature = "zstd")]
fn zstd_reader(file: CountingReader<File>) -> anyhow::Result<Box<dyn BufRead + Send>> {
    let decoder =
        zstd::Decoder::new(file).with_context(|| "Failed to initialise zstd decoder.")?;
    Ok(Box::new(BufReader::new(decoder)))
}

#[cfg(not(feature = "zstd"))]
fn zstd_reader(file: CountingReader<File>) -> anyhow::Result<Box<dyn BufRead + Send>> {
    let decoder = ruzstd::decoding::StreamingDecoder::new(file)
        .map_err(|e| anyhow!("Failed to initialise zstd decoder: {e}"))?;
    Ok(Box::new(BufReader::new(decoder)))
}

/// Expand a path into the corpus files underneath it: a file stands for
/// itself, a directory for every `.jsonl` / `.jsonl.zst` inside it.
pub fn discover_inputs(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    if path.is_dir() {
        for entry in path
            .read_dir()
            .with_context(|| format!("Failed to read directory {}", path.display()))?
        {
            let entry = entry?;
            let candidate = entry.path();
            let usable = candidate
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zst") || ext.eq_ignore_ascii_case("jsonl"));
            if usable {
                paths.push(candidate);
            }
        }
        paths.sort();
    } else {
        paths.push(path.to_owned());
    }
    if paths.is_empty() {
        bail!("No corpus files found at {}", path.display());
    }
    Ok(paths)
}

/// Load every usable sample from the given corpus files, parsing lines on
/// `threads` worker threads. Returns the samples and the number of lines
/// that were skipped as malformed or evaluation-free.
pub fn load_samples(
    inputs: &[PathBuf],
    limit: Option<usize>,
    threads: usize,
) -> anyhow::Result<(Vec<Sample>, u64)> {
    let threads = threads.max(1);
    let skipped = AtomicU64::new(0);
    let skipped = &skipped;
    let (sender, receiver) = mpsc::sync_channel::<Vec<String>>(threads * 2);
    let receiver = Mutex::new(receiver);
    let receiver = &receiver;

    let samples = std::thread::scope(|s| -> anyhow::Result<Vec<Sample>> {
        let mut handles = Vec::new();
        for _ in 0..threads {
            handles.push(s.spawn(move || {
                let mut samples = Vec::new();
                let mut rejected = 0u64;
                loop {
                    let chunk = {
                        let Ok(guard) = receiver.lock() else { break };
                        guard.recv()
                    };
                    let Ok(chunk) = chunk else { break };
                    for line in &chunk {
                        match parse_sample(line) {
                            Some(sample) => samples.push(sample),
                            None => rejected += 1,
                        }
                    }
                }
                skipped.fetch_add(rejected, Ordering::Relaxed);
                samples
            }));
        }

        let mut lines_sent = 0usize;
        let mut chunk = Vec::with_capacity(LINES_PER_CHUNK);
        'files: for path in inputs {
            println!("Reading {}", path.display());
            let reader = open_corpus_reader(path)?;
            let mut chunks_sent = 0u64;
            for line in reader.lines.lines() {
                let line =
                    line.with_context(|| format!("Failed to read {}", path.display()))?;
                chunk.push(line);
                lines_sent += 1;
                if chunk.len() == LINES_PER_CHUNK {
                    sender
                        .send(std::mem::take(&mut chunk))
                        .map_err(|_| anyhow!("A parsing thread exited early."))?;
                    chunk.reserve(LINES_PER_CHUNK);
                    chunks_sent += 1;
                    if chunks_sent % 256 == 0 && reader.file_len > 0 {
                        let progress = reader.bytes_read.load(Ordering::Relaxed);
                        let percentage = progress * 100 / reader.file_len;
                        print!("\rProgress: {percentage}%");
                        std::io::stdout()
                            .flush()
                            .with_context(|| "Failed to flush stdout!")?;
                    }
                }
                if limit.is_some_and(|limit| lines_sent >= limit) {
                    break 'files;
                }
            }
            println!("\rProgress: 100%");
        }
        if !chunk.is_empty() {
            sender
                .send(chunk)
                .map_err(|_| anyhow!("A parsing thread exited early."))?;
        }
        drop(sender);

        let mut all = Vec::new();
        for handle in handles {
            if let Ok(samples) = handle.join() {
                all.extend(samples);
            } else {
                bail!("Thread failed to join!");
            }
        }
        Ok(all)
    })?;

    Ok((samples, skipped.load(Ordering::Relaxed)))
}

#[derive(Default)]
struct CorpusStats {
    lines: u64,
    usable: u64,
    skipped: u64,
    eval_counts: FxHashMap<i32, u64>,
    piece_counts: FxHashMap<u32, u64>,
    depth_counts: FxHashMap<u32, u64>,
}

impl CorpusStats {
    fn absorb(&mut self, other: Self) {
        self.lines += other.lines;
        self.usable += other.usable;
        self.skipped += other.skipped;
        for (key, value) in other.eval_counts {
            *self.eval_counts.entry(key).or_default() += value;
        }
        for (key, value) in other.piece_counts {
            *self.piece_counts.entry(key).or_default() += value;
        }
        for (key, value) in other.depth_counts {
            *self.depth_counts.entry(key).or_default() += value;
        }
    }
}

fn scan_file(path: &Path, stdout_lock: &Mutex<()>, mpl: usize) -> anyhow::Result<CorpusStats> {
    let reader = open_corpus_reader(path)?;
    let mut stats = CorpusStats::default();
    for line in reader.lines.lines() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        stats.lines += 1;
        let parsed: Option<(Record, Board)> = serde_json::from_str::<Record>(&line)
            .ok()
            .and_then(|record| {
                let board = Board::from_fen_relaxed(&record.fen).ok()?;
                Some((record, board))
            });
        let usable = parsed.as_ref().and_then(|(record, _)| record.target_cp());
        match (parsed, usable) {
            (Some((record, board)), Some(target)) => {
                stats.usable += 1;
                *stats.eval_counts.entry(target).or_default() += 1;
                *stats.piece_counts.entry(board.piece_count()).or_default() += 1;
                if let Some(deepest) = record.evals.iter().map(|eval| eval.depth).max() {
                    *stats.depth_counts.entry(deepest).or_default() += 1;
                }
            }
            _ => stats.skipped += 1,
        }
    }
    let lock = stdout_lock
        .lock()
        .map_err(|_| anyhow!("Failed to lock mutex."))?;
    println!(
        "{:mpl$}: {} lines | {} usable | {} skipped",
        path.display(),
        stats.lines,
        stats.usable,
        stats.skipped
    );
    std::mem::drop(lock);
    Ok(stats)
}

/// Scan a corpus and print statistics about it, dumping the eval, piece
/// count, and depth distributions as CSV files in the working directory.
pub fn dataset_stats(input: &Path) -> anyhow::Result<()> {
    let paths = discover_inputs(input)?;
    println!("Scanning dataset at {}", input.display());

    let mpl = paths
        .iter()
        .map(|path| path.display().to_string().len())
        .max()
        .unwrap_or(0);
    let stdout_lock = Mutex::new(());
    let stdout_lock = &stdout_lock;

    let stats = std::thread::scope(|s| -> anyhow::Result<CorpusStats> {
        let mut handles = Vec::new();
        for path in &paths {
            handles.push(s.spawn(move || scan_file(path, stdout_lock, mpl)));
        }
        let mut stats = CorpusStats::default();
        for handle in handles {
            if let Ok(file_stats) = handle.join() {
                stats.absorb(file_stats?);
            } else {
                bail!("Thread failed to join!");
            }
        }
        Ok(stats)
    })?;

    println!("Lines: {}", stats.lines);
    println!("Usable positions: {}", stats.usable);
    println!("Skipped: {}", stats.skipped);

    println!("Writing eval counts to eval_counts.csv");
    let mut eval_counts = stats.eval_counts.into_iter().collect::<Vec<_>>();
    eval_counts.sort_unstable_by_key(|(eval, _)| *eval);
    let mut eval_counts_file = BufWriter::new(File::create("eval_counts.csv")?);
    writeln!(eval_counts_file, "eval,count")?;
    for (eval, count) in eval_counts {
        writeln!(eval_counts_file, "{eval},{count}")?;
    }
    eval_counts_file.flush()?;

    println!("Writing piece counts to piece_counts.csv");
    let mut piece_counts = stats.piece_counts.into_iter().collect::<Vec<_>>();
    piece_counts.sort_unstable_by_key(|(count, _)| *count);
    let mut piece_counts_file = BufWriter::new(File::create("piece_counts.csv")?);
    writeln!(piece_counts_file, "men,count")?;
    for (men, count) in piece_counts {
        writeln!(piece_counts_file, "{men},{count}")?;
    }
    piece_counts_file.flush()?;

    println!("Writing depth counts to depth_counts.csv");
    let mut depth_counts = stats.depth_counts.into_iter().collect::<Vec<_>>();
    depth_counts.sort_unstable_by_key(|(depth, _)| *depth);
    let mut depth_counts_file = BufWriter::new(File::create("depth_counts.csv")?);
    writeln!(depth_counts_file, "depth,count")?;
    for (depth, count) in depth_counts {
        writeln!(depth_counts_file, "{depth},{count}")?;
    }
    depth_counts_file.flush()?;

    Ok(())
}

/// Count the usable positions in a corpus, one worker thread per file.
pub fn dataset_count(input: &Path) -> anyhow::Result<()> {
    let paths = discover_inputs(input)?;

    let mpl = paths
        .iter()
        .map(|path| path.display().to_string().len())
        .max()
        .unwrap_or(0);
    let stdout_lock = Mutex::new(());
    let stdout_lock = &stdout_lock;

    let (total, usable) = std::thread::scope(|s| -> anyhow::Result<(u64, u64)> {
        let mut handles = Vec::new();
        for path in &paths {
            handles.push(s.spawn(move || -> anyhow::Result<(u64, u64)> {
                let reader = open_corpus_reader(path)?;
                let mut lines = 0u64;
                let mut usable = 0u64;
                for line in reader.lines.lines() {
                    let line =
                        line.with_context(|| format!("Failed to read {}", path.display()))?;
                    lines += 1;
                    if parse_sample(&line).is_some() {
                        usable += 1;
                    }
                }
                let lock = stdout_lock
                    .lock()
                    .map_err(|_| anyhow!("Failed to lock mutex."))?;
                println!("{:mpl$}: {lines} lines | {usable} usable", path.display());
                std::mem::drop(lock);
                Ok((lines, usable))
            }));
        }
        let (mut total, mut usable) = (0, 0);
        for handle in handles {
            let (file_lines, file_usable) = handle
                .join()
                .map_err(|_| anyhow!("Thread panicked."))
                .with_context(|| "Failed to join processing thread")?
                .with_context(|| "A processing job failed")?;
            total += file_lines;
            usable += file_usable;
        }
        Ok((total, usable))
    })?;

    println!();
    println!("Total lines: {total}");
    println!("Total usable positions: {usable}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{"fen":"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1","evals":[{"pvs":[{"cp":18,"line":"e2e4 e7e5"}],"knodes":12345,"depth":22},{"pvs":[{"cp":35,"line":"d2d4"},{"cp":30,"line":"e2e4"}],"knodes":67890,"depth":40}]}"#;

    #[test]
    fn target_takes_deepest_first_pv() {
        let record: Record = serde_json::from_str(RECORD).unwrap();
        assert_eq!(record.target_cp(), Some(35));
    }

    #[test]
    fn mate_scores_map_into_centipawns() {
        let mate = r#"{"fen":"k7/8/8/8/8/8/8/K6R w - - 0 1","evals":[{"pvs":[{"mate":3}],"depth":20}]}"#;
        let record: Record = serde_json::from_str(mate).unwrap();
        // 10000 - 3 = 9997, clamped to the training window.
        assert_eq!(record.target_cp(), Some(EVAL_CLAMP));

        let mated = r#"{"fen":"k7/8/8/8/8/8/8/K6R b - - 0 1","evals":[{"pvs":[{"mate":-5}],"depth":20}]}"#;
        let record: Record = serde_json::from_str(mated).unwrap();
        assert_eq!(record.target_cp(), Some(-EVAL_CLAMP));
    }

    #[test]
    fn extreme_centipawns_are_clamped() {
        let wild = r#"{"fen":"k7/8/8/8/8/8/8/K6R w - - 0 1","evals":[{"pvs":[{"cp":-7500}],"depth":18}]}"#;
        let record: Record = serde_json::from_str(wild).unwrap();
        assert_eq!(record.target_cp(), Some(-EVAL_CLAMP));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse_sample("not json at all").is_none());
        assert!(parse_sample(r#"{"fen":"8/8/8/8 w","evals":[]}"#).is_none());
        // An eval with an empty pvs list fails the non-empty guarantee.
        assert!(
            parse_sample(
                r#"{"fen":"k7/8/8/8/8/8/8/K6R w - - 0 1","evals":[{"pvs":[],"depth":10}]}"#
            )
            .is_none()
        );
        // No evals at all: parseable but unusable.
        assert!(
            parse_sample(r#"{"fen":"k7/8/8/8/8/8/8/K6R w - - 0 1","evals":[]}"#).is_none()
        );
    }

    #[test]
    fn samples_carry_features_and_turn() {
        let sample = parse_sample(RECORD).expect("startpos record should parse");
        assert_eq!(sample.features.len(), 32);
        assert_eq!(sample.turn, Colour::White);
        #[allow(clippy::float_cmp)]
        {
            assert_eq!(sample.target, 35.0);
        }
    }

    #[test]
    fn plain_jsonl_files_load() {
        let dir = std::env::temp_dir().join(format!("verdigris_corpus_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tiny.jsonl");
        let mate = r#"{"fen":"k7/8/8/8/8/8/8/K6R w - - 0 1","evals":[{"pvs":[{"mate":3}],"depth":20}]}"#;
        std::fs::write(&path, format!("{RECORD}\ngarbage line\n{mate}\n")).unwrap();

        let (samples, skipped) = load_samples(&[path], None, 2).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(skipped, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
