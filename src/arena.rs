use std::{
    fmt::{self, Display},
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use anyhow::{Context, bail};
use fxhash::FxHashMap;
use rand::Rng;

use crate::chess::{
    board::{Board, GameEnd},
    piece::Colour,
};

pub const DEFAULT_GAMES: u32 = 10;
pub const DEFAULT_MOVETIME: u64 = 100;

const RESULTS_HEADER: &str = "engine_1,engine_2,games,mean_score";

/// A UCI engine subprocess, handshaken and ready for `position`/`go`.
struct Engine {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Engine {
    fn launch(path: &Path) -> anyhow::Result<Self> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to launch engine {}", path.display()))?;
        let stdin = child
            .stdin
            .take()
            .with_context(|| format!("Failed to open stdin of {name}"))?;
        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("Failed to open stdout of {name}"))?;
        let mut engine = Self {
            name,
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        engine.send("uci")?;
        engine.wait_for("uciok")?;
        engine.send("isready")?;
        engine.wait_for("readyok")?;
        Ok(engine)
    }

    fn send(&mut self, command: &str) -> anyhow::Result<()> {
        writeln!(self.stdin, "{command}")
            .with_context(|| format!("Failed to write to engine {}", self.name))?;
        self.stdin
            .flush()
            .with_context(|| format!("Failed to flush pipe to engine {}", self.name))?;
        Ok(())
    }

    /// Read one line, or `None` if the engine has closed its stdout.
    fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let bytes = self
            .stdout
            .read_line(&mut line)
            .with_context(|| format!("Failed to read from engine {}", self.name))?;
        if bytes == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn wait_for(&mut self, token: &str) -> anyhow::Result<()> {
        while let Some(line) = self.read_line()? {
            if line.starts_with(token) {
                return Ok(());
            }
        }
        bail!("Engine {} exited before sending \"{token}\"", self.name)
    }

    /// Ask for a move in the position reached by `moves` from the start
    /// position. `None` means the engine died instead of answering.
    fn bestmove(&mut self, moves: &str, movetime: u64) -> anyhow::Result<Option<String>> {
        if moves.is_empty() {
            self.send("position startpos")?;
        } else {
            self.send(&format!("position startpos moves{moves}"))?;
        }
        self.send(&format!("go movetime {movetime}"))?;
        while let Some(line) = self.read_line()? {
            if let Some(rest) = line.strip_prefix("bestmove") {
                return Ok(rest.split_whitespace().next().map(str::to_string));
            }
        }
        Ok(None)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "quit");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    WhiteWin,
    BlackWin,
    Draw,
}

impl Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WhiteWin => write!(f, "1-0"),
            Self::BlackWin => write!(f, "0-1"),
            Self::Draw => write!(f, "1/2-1/2"),
        }
    }
}

const fn forfeit(side: Colour) -> GameOutcome {
    match side {
        Colour::White => GameOutcome::BlackWin,
        Colour::Black => GameOutcome::WhiteWin,
    }
}

/// Play one game between two launched engines, adjudicated by the rules
/// kernel. Repetition is tracked by position key; an engine that dies or
/// answers with an illegal move forfeits.
fn play_game(white: &mut Engine, black: &mut Engine, movetime: u64) -> anyhow::Result<GameOutcome> {
    let mut board = Board::default();
    let mut moves = String::new();
    let mut repetitions = FxHashMap::<u64, u32>::default();
    repetitions.insert(board.key(), 1);

    loop {
        if let Some(end) = board.end_state() {
            return Ok(match end {
                GameEnd::Checkmate {
                    winner: Colour::White,
                } => GameOutcome::WhiteWin,
                GameEnd::Checkmate {
                    winner: Colour::Black,
                } => GameOutcome::BlackWin,
                GameEnd::Stalemate | GameEnd::FiftyMoves | GameEnd::InsufficientMaterial => {
                    GameOutcome::Draw
                }
            });
        }
        if repetitions.get(&board.key()).copied().unwrap_or(0) >= 3 {
            return Ok(GameOutcome::Draw);
        }

        let side = board.turn();
        let mover = match side {
            Colour::White => &mut *white,
            Colour::Black => &mut *black,
        };
        let Some(uci) = mover.bestmove(&moves, movetime)? else {
            eprintln!("[WARN] engine {} died mid-game.", mover.name);
            return Ok(forfeit(side));
        };
        match board.parse_uci_move(&uci) {
            Ok(m) => {
                board.make_move(m);
                moves.push(' ');
                moves.push_str(&uci);
                *repetitions.entry(board.key()).or_default() += 1;
            }
            Err(err) => {
                eprintln!(
                    "[WARN] engine {} played an unacceptable move \"{uci}\" in {}: {err}",
                    mover.name,
                    board.fen()
                );
                return Ok(forfeit(side));
            }
        }
    }
}

/// Play a match between two engine binaries, colours alternating from a
/// random start, fresh processes each game. Returns the mean score from
/// the first engine's perspective.
fn play_pair(first: &Path, second: &Path, games: u32, movetime: u64) -> anyhow::Result<f64> {
    let mut total = 0.0f64;
    let mut first_is_white = rand::rng().random_bool(0.5);
    for game in 1..=games {
        let (white_path, black_path) = if first_is_white {
            (first, second)
        } else {
            (second, first)
        };
        let mut white = Engine::launch(white_path)?;
        let mut black = Engine::launch(black_path)?;
        let outcome = play_game(&mut white, &mut black, movetime)?;
        let score = match outcome {
            GameOutcome::WhiteWin => {
                if first_is_white {
                    1.0
                } else {
                    0.0
                }
            }
            GameOutcome::BlackWin => {
                if first_is_white {
                    0.0
                } else {
                    1.0
                }
            }
            GameOutcome::Draw => 0.5,
        };
        total += score;
        println!("  game {game}/{games}: {outcome}");
        first_is_white = !first_is_white;
    }
    Ok(total / f64::from(games))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairResult {
    pub games: u32,
    pub mean_score: f64,
}

pub type Results = FxHashMap<(String, String), PairResult>;

/// Read a results table written by an earlier run. A missing file is an
/// empty table.
pub fn load_results(path: &Path) -> anyhow::Result<Results> {
    let mut results = Results::default();
    let Ok(content) = fs::read_to_string(path) else {
        return Ok(results);
    };
    for (index, line) in content.lines().enumerate() {
        if index == 0 && line == RESULTS_HEADER {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let &[engine_1, engine_2, games, mean_score] = fields.as_slice() else {
            bail!("Malformed results line in {}: {line}", path.display());
        };
        let games = games
            .parse()
            .with_context(|| format!("Bad game count in {}: {line}", path.display()))?;
        let mean_score = mean_score
            .parse()
            .with_context(|| format!("Bad mean score in {}: {line}", path.display()))?;
        results.insert(
            (engine_1.to_string(), engine_2.to_string()),
            PairResult { games, mean_score },
        );
    }
    Ok(results)
}

pub fn save_results(path: &Path, results: &Results) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create results file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{RESULTS_HEADER}")?;
    let mut rows: Vec<_> = results.iter().collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((engine_1, engine_2), result) in rows {
        writeln!(
            writer,
            "{engine_1},{engine_2},{},{}",
            result.games, result.mean_score
        )?;
    }
    writer.flush()?;
    Ok(())
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

fn discover_engines(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut engines = Vec::new();
    for entry in dir
        .read_dir()
        .with_context(|| format!("Failed to read engines directory {}", dir.display()))?
    {
        let path = entry?.path();
        if is_executable(&path) {
            engines.push(path);
        }
    }
    engines.sort();
    Ok(engines)
}

fn engine_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Round-robin every unordered pair of engines in `engines_dir`, skipping
/// pairs already present in the results file, persisting after each pair.
pub fn arena_main(
    engines_dir: &Path,
    games: u32,
    output: &Path,
    movetime: u64,
) -> anyhow::Result<()> {
    let engines = discover_engines(engines_dir)?;
    if engines.len() < 2 {
        bail!(
            "Need at least two engine binaries in {}, found {}.",
            engines_dir.display(),
            engines.len()
        );
    }
    println!("Found {} engines.", engines.len());

    let mut results = load_results(output)?;
    for i in 0..engines.len() {
        for j in i + 1..engines.len() {
            let key = (engine_name(&engines[i]), engine_name(&engines[j]));
            if results.contains_key(&key) {
                println!("Skipping {} vs {} (already recorded).", key.0, key.1);
                continue;
            }
            println!("{} vs {}:", key.0, key.1);
            let mean_score = play_pair(&engines[i], &engines[j], games, movetime)?;
            println!("  mean score {mean_score:.3}");
            results.insert(key, PairResult { games, mean_score });
            save_results(output, &results)?;
        }
    }

    Ok(())
}
