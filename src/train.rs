use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use anyhow::{Context, bail};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    chess::piece::Colour,
    corpus::{self, Sample},
    nnue::{
        HIDDEN, INPUT, OUTPUT_BUCKETS,
        feature::flipped_features,
        network::{Activation, ForwardCache, Network, OptimizerState, output_bucket},
    },
};

static STOP_TRAINING: AtomicBool = AtomicBool::new(false);

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Corpus files or directories to search for `.jsonl` / `.jsonl.zst`.
    pub corpus: Vec<PathBuf>,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
    /// "leaky" or "screlu".
    #[serde(default = "default_activation")]
    pub activation: String,
    #[serde(default = "default_leak")]
    pub leak: f32,
    /// Worker threads for corpus loading.
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Cap on the number of corpus lines read, for smoke runs.
    #[serde(default)]
    pub max_positions: Option<usize>,
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
}

fn default_epochs() -> usize {
    100
}
fn default_batch_size() -> usize {
    256
}
fn default_learning_rate() -> f32 {
    1e-3
}
fn default_weight_decay() -> f32 {
    1e-5
}
fn default_activation() -> String {
    "leaky".to_string()
}
fn default_leak() -> f32 {
    Activation::DEFAULT_LEAK
}
fn default_threads() -> usize {
    num_cpus::get()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("runs")
}
fn default_seed() -> u64 {
    42
}
fn default_checkpoint_every() -> usize {
    10
}

/// Resolve an activation named on the command line or in a config file.
pub fn parse_activation(kind: &str, leak: f32) -> anyhow::Result<Activation> {
    match kind {
        "screlu" => Ok(Activation::SquaredClampedReLU),
        "leaky" => Ok(Activation::LeakySquaredClampedReLU { leak }),
        other => bail!("Unknown activation \"{other}\" (expected \"screlu\" or \"leaky\")"),
    }
}

impl TrainConfig {
    pub fn activation(&self) -> anyhow::Result<Activation> {
        parse_activation(&self.activation, self.leak)
    }

    /// Reject values the training loop divides by.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.checkpoint_every == 0 {
            bail!("checkpoint_every must be at least 1");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<TrainConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: TrainConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Gradient buffers matching the network's tensors, plus scratch for the
/// derivative at the accumulation layer.
struct Gradients {
    accumulation_weights: Vec<f32>,
    accumulation_biases: Vec<f32>,
    output_weights: Vec<f32>,
    output_biases: Vec<f32>,
    pre_gradient: Vec<f32>,
}

impl Gradients {
    fn zeroed() -> Self {
        Self {
            accumulation_weights: vec![0.0; INPUT * HIDDEN],
            accumulation_biases: vec![0.0; HIDDEN],
            output_weights: vec![0.0; OUTPUT_BUCKETS * 2 * HIDDEN],
            output_biases: vec![0.0; OUTPUT_BUCKETS],
            pre_gradient: vec![0.0; 2 * HIDDEN],
        }
    }

    fn clear(&mut self) {
        self.accumulation_weights.fill(0.0);
        self.accumulation_biases.fill(0.0);
        self.output_weights.fill(0.0);
        self.output_biases.fill(0.0);
    }

    fn scale(&mut self, factor: f32) {
        for g in self
            .accumulation_weights
            .iter_mut()
            .chain(&mut self.accumulation_biases)
            .chain(&mut self.output_weights)
            .chain(&mut self.output_biases)
        {
            *g *= factor;
        }
    }
}

/// Forward one sample and accumulate its gradient contribution,
/// returning the squared error.
fn accumulate_sample(
    network: &Network,
    gradients: &mut Gradients,
    cache: &mut ForwardCache,
    sample: &Sample,
) -> f32 {
    let white = &sample.features;
    let black = flipped_features(white);
    let (me, opp) = match sample.turn {
        Colour::White => (white, &black),
        Colour::Black => (&black, white),
    };
    #[allow(clippy::cast_possible_truncation)]
    let bucket = output_bucket(white.len() as u32);
    network.forward_into(me, opp, bucket, cache);

    let sign = match sample.turn {
        Colour::White => 1.0,
        Colour::Black => -1.0,
    };
    let prediction = sign * cache.output;
    let error = prediction - sample.target;
    // d(error^2) / d(mover-relative output)
    let g_out = 2.0 * error * sign;

    let Gradients {
        accumulation_weights,
        accumulation_biases,
        output_weights,
        output_biases,
        pre_gradient,
    } = gradients;

    output_biases[bucket] += g_out;
    let weight_row = network.bucket_row(bucket);
    let grad_row = &mut output_weights[bucket * 2 * HIDDEN..][..2 * HIDDEN];
    for i in 0..2 * HIDDEN {
        grad_row[i] += g_out * cache.activated[i];
        let d_activated = g_out * weight_row[i];
        pre_gradient[i] = d_activated * network.activation.derivative(cache.pre_activation[i]);
    }

    // Both halves share the accumulation layer.
    for h in 0..HIDDEN {
        accumulation_biases[h] += pre_gradient[h] + pre_gradient[HIDDEN + h];
    }
    for &feature in me {
        let row = &mut accumulation_weights[usize::from(feature) * HIDDEN..][..HIDDEN];
        for (w, g) in row.iter_mut().zip(&pre_gradient[..HIDDEN]) {
            *w += g;
        }
    }
    for &feature in opp {
        let row = &mut accumulation_weights[usize::from(feature) * HIDDEN..][..HIDDEN];
        for (w, g) in row.iter_mut().zip(&pre_gradient[HIDDEN..]) {
            *w += g;
        }
    }

    error * error
}

/// One bias-corrected Adam update, with L2 weight decay folded into the
/// gradient.
fn adam_step(
    params: &mut [f32],
    grads: &[f32],
    first: &mut [f32],
    second: &mut [f32],
    step: u64,
    learning_rate: f32,
    weight_decay: f32,
) {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let exponent = step.min(i32::MAX as u64) as i32;
    let bias1 = 1.0 - BETA1.powi(exponent);
    let bias2 = 1.0 - BETA2.powi(exponent);
    for (((param, &grad), m), v) in params.iter_mut().zip(grads).zip(first).zip(second) {
        let grad = grad + weight_decay * *param;
        *m = BETA1 * *m + (1.0 - BETA1) * grad;
        *v = BETA2 * *v + (1.0 - BETA2) * grad * grad;
        let m_hat = *m / bias1;
        let v_hat = *v / bias2;
        *param -= learning_rate * m_hat / (v_hat.sqrt() + EPSILON);
    }
}

/// Accumulate the batch's mean gradient and take one optimiser step.
/// Returns the summed squared error of the batch.
fn train_batch(
    network: &mut Network,
    optimizer: &mut OptimizerState,
    gradients: &mut Gradients,
    cache: &mut ForwardCache,
    batch: &[Sample],
    learning_rate: f32,
    weight_decay: f32,
) -> f64 {
    gradients.clear();
    let mut loss = 0.0f64;
    for sample in batch {
        loss += f64::from(accumulate_sample(network, gradients, cache, sample));
    }
    #[allow(clippy::cast_precision_loss)]
    gradients.scale(1.0 / batch.len() as f32);

    optimizer.step += 1;
    let step = optimizer.step;
    let mut offset = 0;
    for (params, grads) in [
        (
            &mut network.accumulation_weights,
            &gradients.accumulation_weights,
        ),
        (
            &mut network.accumulation_biases,
            &gradients.accumulation_biases,
        ),
        (&mut network.output_weights, &gradients.output_weights),
        (&mut network.output_biases, &gradients.output_biases),
    ] {
        let len = params.len();
        adam_step(
            params,
            grads,
            &mut optimizer.first_moment[offset..offset + len],
            &mut optimizer.second_moment[offset..offset + len],
            step,
            learning_rate,
            weight_decay,
        );
        offset += len;
    }

    loss
}

pub fn train_main(config_path: &Path, resume: Option<&Path>) -> anyhow::Result<()> {
    println!("{} {} trainer", crate::NAME, crate::VERSION);
    let config = load_config(config_path)?;
    let activation = config.activation()?;

    ctrlc::set_handler(move || {
        STOP_TRAINING.store(true, Ordering::SeqCst);
        println!("Stopping training, please don't force quit.");
    })
    .with_context(|| "Failed to set Ctrl-C handler")?;

    let mut inputs = Vec::new();
    for path in &config.corpus {
        inputs.extend(corpus::discover_inputs(path)?);
    }
    let (mut samples, skipped) =
        corpus::load_samples(&inputs, config.max_positions, config.threads)?;
    if samples.is_empty() {
        bail!("No usable positions in the corpus.");
    }
    println!("Loaded {} positions ({skipped} skipped).", samples.len());

    let run_id = format!("run_{}", chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S"));
    let run_dir = config.output_dir.join(&run_id);
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;
    println!(
        "This run will be saved to the directory \"{}\"",
        run_dir.display()
    );
    let resolved = toml::to_string_pretty(&config)
        .with_context(|| "Failed to serialise resolved config")?;
    fs::write(run_dir.join("config.toml"), resolved)
        .with_context(|| "Failed to write resolved config")?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let (mut network, mut optimizer) = if let Some(checkpoint) = resume {
        let (network, optimizer) = Network::load_checkpoint(checkpoint)?;
        let optimizer = optimizer.unwrap_or_else(OptimizerState::zeroed);
        if network.activation.tag() != activation.tag() {
            eprintln!(
                "[WARN] checkpoint activation differs from the config; keeping the checkpoint's."
            );
        }
        println!(
            "Resumed from {} at optimiser step {}.",
            checkpoint.display(),
            optimizer.step
        );
        (network, optimizer)
    } else {
        (Network::init(activation, &mut rng), OptimizerState::zeroed())
    };

    let start = Instant::now();
    let batches_per_epoch = samples.len().div_ceil(config.batch_size);
    let mut cache = ForwardCache::new();
    let mut gradients = Gradients::zeroed();

    'training: for epoch in 1..=config.epochs {
        samples.shuffle(&mut rng);
        let mut epoch_loss = 0.0f64;
        let mut seen = 0usize;
        for (batch_index, batch) in samples.chunks(config.batch_size).enumerate() {
            if STOP_TRAINING.load(Ordering::SeqCst) {
                println!();
                println!("Interrupted at epoch {epoch}, saving a final checkpoint.");
                break 'training;
            }
            epoch_loss += train_batch(
                &mut network,
                &mut optimizer,
                &mut gradients,
                &mut cache,
                batch,
                config.learning_rate,
                config.weight_decay,
            );
            seen += batch.len();
            if batch_index % 64 == 0 {
                #[allow(clippy::cast_precision_loss)]
                let running = epoch_loss / seen as f64;
                print!(
                    "\rEpoch {epoch}/{}: batch {}/{batches_per_epoch}, loss {running:.2}",
                    config.epochs,
                    batch_index + 1
                );
                std::io::stdout()
                    .flush()
                    .with_context(|| "Failed to flush stdout!")?;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let mean_loss = epoch_loss / seen.max(1) as f64;
        println!(
            "\rEpoch {epoch}/{}: mean loss {mean_loss:.2}, {:.1}s elapsed.",
            config.epochs,
            start.elapsed().as_secs_f64()
        );
        if epoch % config.checkpoint_every == 0 && epoch != config.epochs {
            let path = run_dir.join(format!("checkpoint_{epoch}.bin"));
            network.save_checkpoint(&path, Some(&optimizer))?;
            println!("Saved checkpoint to {}", path.display());
        }
    }

    let final_path = run_dir.join("checkpoint_final.bin");
    network.save_checkpoint(&final_path, Some(&optimizer))?;
    println!("Saved final checkpoint to {}", final_path.display());

    Ok(())
}
