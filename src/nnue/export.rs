use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::Context;
use memmap2::Mmap;

use crate::{
    errors::{SerializationError, WeightLoadError},
    nnue::{
        HIDDEN, INPUT, OUTPUT_BUCKETS,
        network::{Activation, Network},
    },
};

/// Fixed-point scale of the deployed weight files.
pub const DEFAULT_SCALE: f32 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    // The deployed files are big-endian; little-endian output is kept for
    // tooling that wants host-order dumps.
    #[allow(dead_code)]
    LittleEndian,
}

/// Quantise and serialise one tensor for the engine-side consumer:
/// column-major traversal, each value `round(w * scale)` narrowed to i32,
/// emitted in the requested byte order. `data` is row-major. Scalars are
/// treated as 1x1 and vectors as single-row matrices.
pub fn serialise_tensor(
    shape: &[usize],
    data: &[f32],
    scale: f32,
    order: ByteOrder,
) -> Result<Vec<u8>, SerializationError> {
    let (rows, cols) = matrix_shape(shape)?;
    assert_eq!(data.len(), rows * cols, "tensor data does not match its shape");
    let mut buffer = Vec::with_capacity(rows * cols * 4);
    for c in 0..cols {
        for r in 0..rows {
            #[allow(clippy::cast_possible_truncation)]
            let quantised = (data[r * cols + c] * scale).round() as i32;
            let bytes = match order {
                ByteOrder::BigEndian => quantised.to_be_bytes(),
                ByteOrder::LittleEndian => quantised.to_le_bytes(),
            };
            buffer.extend_from_slice(&bytes);
        }
    }
    Ok(buffer)
}

/// Invert `serialise_tensor`, reconstructing row-major f32 data.
pub fn deserialise_tensor(
    shape: &[usize],
    bytes: &[u8],
    scale: f32,
    order: ByteOrder,
) -> Result<Vec<f32>, SerializationError> {
    let (rows, cols) = matrix_shape(shape)?;
    assert_eq!(
        bytes.len(),
        rows * cols * 4,
        "byte length does not match the tensor shape"
    );
    let mut data = vec![0.0; rows * cols];
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let quantised = match order {
            ByteOrder::BigEndian => i32::from_be_bytes(raw),
            ByteOrder::LittleEndian => i32::from_le_bytes(raw),
        };
        let (c, r) = (i / rows, i % rows);
        #[allow(clippy::cast_precision_loss)]
        {
            data[r * cols + c] = quantised as f32 / scale;
        }
    }
    Ok(data)
}

fn matrix_shape(shape: &[usize]) -> Result<(usize, usize), SerializationError> {
    match *shape {
        [] => Ok((1, 1)),
        [n] => Ok((1, n)),
        [rows, cols] => Ok((rows, cols)),
        _ => Err(SerializationError::UnsupportedRank(shape.len())),
    }
}

/// The accumulation weights as the deployed `HIDDEN x INPUT` matrix.
/// Internal storage is feature-major, so this is a transpose.
fn accumulation_matrix(network: &Network) -> Vec<f32> {
    let mut matrix = vec![0.0; HIDDEN * INPUT];
    for f in 0..INPUT {
        for h in 0..HIDDEN {
            matrix[h * INPUT + f] = network.accumulation_weights[f * HIDDEN + h];
        }
    }
    matrix
}

/// Write the deployed weight files into `dir`: one big-endian fixed-point
/// `.bin` per tensor, plus CSV float dumps when requested.
pub fn export_network(network: &Network, dir: &Path, scale: f32, csv: bool) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let accumulation = accumulation_matrix(network);
    write_tensor(dir, "accumulation.weight", &[HIDDEN, INPUT], &accumulation, scale, csv)?;
    write_tensor(
        dir,
        "accumulation.bias",
        &[HIDDEN],
        &network.accumulation_biases,
        scale,
        csv,
    )?;
    write_tensor(
        dir,
        "output.weight",
        &[OUTPUT_BUCKETS, 2 * HIDDEN],
        &network.output_weights,
        scale,
        csv,
    )?;
    write_tensor(
        dir,
        "output.bias",
        &[OUTPUT_BUCKETS],
        &network.output_biases,
        scale,
        csv,
    )?;
    Ok(())
}

fn write_tensor(
    dir: &Path,
    name: &str,
    shape: &[usize],
    data: &[f32],
    scale: f32,
    csv: bool,
) -> anyhow::Result<()> {
    let bytes = serialise_tensor(shape, data, scale, ByteOrder::BigEndian)?;
    let path = dir.join(format!("{name}.bin"));
    fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
    if csv {
        write_csv(dir, name, shape, data)?;
    }
    Ok(())
}

/// Float dump for inspection: a `<name> <rows> <cols>` header, then one
/// column per line in the same column-major order as the binary format.
fn write_csv(dir: &Path, name: &str, shape: &[usize], data: &[f32]) -> anyhow::Result<()> {
    let (rows, cols) = matrix_shape(shape)?;
    let path = dir.join(format!("{name}.csv"));
    let file =
        File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{name} {rows} {cols}")?;
    for c in 0..cols {
        for r in 0..rows {
            if r > 0 {
                write!(writer, ",")?;
            }
            write!(writer, "{}", data[r * cols + c])?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Load and validate a deployed weight directory, reconstructing an f32
/// network. The deployed format does not record the activation; the caller
/// names the variant the weights were trained under.
pub fn load_exported(
    dir: &Path,
    scale: f32,
    activation: Activation,
) -> Result<Network, WeightLoadError> {
    let acc_weights = load_tensor(dir, "accumulation.weight", &[HIDDEN, INPUT], scale)?;
    let acc_biases = load_tensor(dir, "accumulation.bias", &[HIDDEN], scale)?;
    let out_weights = load_tensor(dir, "output.weight", &[OUTPUT_BUCKETS, 2 * HIDDEN], scale)?;
    let out_biases = load_tensor(dir, "output.bias", &[OUTPUT_BUCKETS], scale)?;

    let mut network = Network::zeroed(activation);
    // Back from the deployed HIDDEN x INPUT matrix to feature-major storage.
    for h in 0..HIDDEN {
        for f in 0..INPUT {
            network.accumulation_weights[f * HIDDEN + h] = acc_weights[h * INPUT + f];
        }
    }
    network.accumulation_biases = acc_biases;
    network.output_weights = out_weights;
    network.output_biases = out_biases;
    Ok(network)
}

fn load_tensor(
    dir: &Path,
    name: &str,
    shape: &[usize],
    scale: f32,
) -> Result<Vec<f32>, WeightLoadError> {
    let path = dir.join(format!("{name}.bin"));
    let file = File::open(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => WeightLoadError::NotFound { path: path.clone() },
        _ => WeightLoadError::Io {
            path: path.clone(),
            source: e,
        },
    })?;
    // SAFETY: the mapping is read-only and only observed as a byte slice.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| WeightLoadError::Io {
        path: path.clone(),
        source: e,
    })?;
    let expected = shape.iter().product::<usize>() * 4;
    if mmap.len() != expected {
        return Err(WeightLoadError::SizeMismatch {
            path,
            expected,
            got: mmap.len(),
        });
    }
    match deserialise_tensor(shape, &mmap, scale, ByteOrder::BigEndian) {
        Ok(data) => Ok(data),
        // The deployed tensor table only holds rank 1 and 2 shapes.
        Err(SerializationError::UnsupportedRank(_)) => unreachable!(),
    }
}

/// Reload an export and report the maximum absolute difference against a
/// reference network. Quantisation bounds this at about 0.5/scale per value,
/// the "about" covering values that land exactly on a rounding boundary.
pub fn max_reconstruction_error(
    reference: &Network,
    dir: &Path,
    scale: f32,
) -> Result<f32, WeightLoadError> {
    let reloaded = load_exported(dir, scale, reference.activation)?;
    let mut max_error = 0.0f32;
    for (a, b) in reference.tensors().iter().zip(reloaded.tensors().iter()) {
        for (x, y) in a.iter().zip(b.iter()) {
            max_error = max_error.max((x - y).abs());
        }
    }
    Ok(max_error)
}
