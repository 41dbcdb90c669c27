//! Small in-process language model used as the default inference backend.
//!
//! The architecture is deliberately tiny: token embedding, a causal running
//! mean over the window, RMS normalisation and a linear head. It is enough to
//! make the output depend on context and to exercise the generation loop
//! without an external runtime.

use crate::backend::InferenceBackend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytemuck::{cast_slice, Pod, Zeroable};
use memmap2::MmapOptions;
use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const MAGIC: [u8; 4] = *b"CGLM";
const VERSION: u32 = 1;

/// Shape and initialisation settings for [`TinyLm`].
#[derive(Clone, Debug)]
pub struct TinyLmConfig {
    pub vocab_size: usize,
    /// Embedding/hidden dimension.
    pub dim: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for TinyLmConfig {
    fn default() -> Self {
        Self { vocab_size: 65, dim: 32, seed: 0 }
    }
}

/// Fixed-size header at the start of a weight file. Integers are stored
/// little-endian, as are all weights that follow.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Header {
    magic: [u8; 4],
    version: u32,
    vocab_size: u32,
    dim: u32,
}

const HEADER_LEN: usize = std::mem::size_of::<Header>();

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize, scale: f32) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-scale..scale))
}

/// Embedding, running-mean mixer, RMS norm and vocabulary head.
pub struct TinyLm {
    embed: Array2<f32>, // vocab_size x dim
    norm: Array1<f32>,  // dim
    head: Array2<f32>,  // vocab_size x dim
    bias: Array1<f32>,  // vocab_size
    eps: f32,
}

impl TinyLm {
    /// Randomly initialised model.
    pub fn new(config: &TinyLmConfig) -> Result<Self> {
        if config.vocab_size == 0 || config.dim == 0 {
            return Err(Error::Config(format!(
                "model needs non-zero sizes, got vocab_size={} dim={}",
                config.vocab_size, config.dim
            )));
        }
        let mut rng = StdRng::seed_from_u64(config.seed);
        let scale = 1.0 / (config.dim as f32).sqrt();
        let embed = random_matrix(&mut rng, config.vocab_size, config.dim, 1.0);
        let head = random_matrix(&mut rng, config.vocab_size, config.dim, scale);
        let bias = Array1::from_shape_fn(config.vocab_size, |_| rng.gen_range(-0.1..0.1));
        Ok(Self { embed, norm: Array1::ones(config.dim), head, bias, eps: 1e-6 })
    }

    pub fn vocab_size(&self) -> usize {
        self.embed.nrows()
    }

    pub fn dim(&self) -> usize {
        self.embed.ncols()
    }

    /// Logits for every position, shape `[tokens.len(), vocab_size]`.
    pub fn forward(&self, tokens: &[usize]) -> Result<Array2<f32>> {
        let vocab = self.vocab_size();
        let mut h = Array2::<f32>::zeros((tokens.len(), self.dim()));
        for (i, &tok) in tokens.iter().enumerate() {
            if tok >= vocab {
                return Err(Error::Backend(format!(
                    "token {} outside model vocabulary of {}",
                    tok, vocab
                )));
            }
            h.row_mut(i).assign(&self.embed.row(tok));
        }

        // Position t sees the mean of positions 0..=t.
        let mut running = Array1::<f32>::zeros(self.dim());
        let mut mixed = h.clone();
        for (t, mut row) in mixed.axis_iter_mut(Axis(0)).enumerate() {
            running += &h.row(t);
            let mean = &running / (t + 1) as f32;
            row += &mean;
        }

        let ms = mixed.mapv(|v| v * v).mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(0));
        let denom = ms.mapv(|m| (m + self.eps).sqrt()).insert_axis(Axis(1));
        let normed = (mixed / &denom) * &self.norm.view().insert_axis(Axis(0));

        Ok(normed.dot(&self.head.t()) + &self.bias.view().insert_axis(Axis(0)))
    }

    /// Write the weights to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header = Header {
            magic: MAGIC,
            version: VERSION.to_le(),
            vocab_size: (self.vocab_size() as u32).to_le(),
            dim: (self.dim() as u32).to_le(),
        };
        let mut f = File::create(path)?;
        f.write_all(bytemuck::bytes_of(&header))?;
        for tensor in [
            self.embed.iter().copied().collect::<Vec<f32>>(),
            self.norm.to_vec(),
            self.head.iter().copied().collect(),
            self.bias.to_vec(),
        ] {
            let bits: Vec<u32> = tensor.iter().map(|v| v.to_bits().to_le()).collect();
            f.write_all(cast_slice(&bits))?;
        }
        Ok(())
    }

    /// Read weights into memory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| Error::Backend(format!("cannot read model {:?}: {}", path.as_ref(), e)))?;
        Self::from_bytes(&bytes)
    }

    /// Read weights through a memory map.
    pub fn load_mmap<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::Backend(format!("cannot open model {:?}: {}", path.as_ref(), e)))?;
        // The map is only read while `file` is open and is dropped before returning.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::from_bytes(&mmap[..])
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Backend("model file is truncated".into()));
        }
        let header: Header = bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]);
        if header.magic != MAGIC {
            return Err(Error::Backend("not a model file (bad magic)".into()));
        }
        let version = u32::from_le(header.version);
        if version != VERSION {
            return Err(Error::Backend(format!("unsupported model version {}", version)));
        }
        let vocab = u32::from_le(header.vocab_size) as usize;
        let dim = u32::from_le(header.dim) as usize;
        if vocab == 0 || dim == 0 {
            return Err(Error::Backend("model file declares an empty shape".into()));
        }

        let mut reader = FloatReader { bytes, offset: HEADER_LEN };
        let embed = reader.matrix(vocab, dim)?;
        let norm = Array1::from(reader.floats(dim)?);
        let head = reader.matrix(vocab, dim)?;
        let bias = Array1::from(reader.floats(vocab)?);
        if reader.offset != bytes.len() {
            return Err(Error::Backend(format!(
                "model file has {} trailing bytes",
                bytes.len() - reader.offset
            )));
        }
        Ok(Self { embed, norm, head, bias, eps: 1e-6 })
    }
}

fn truncated() -> Error {
    Error::Backend("model file is truncated".into())
}

struct FloatReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl FloatReader<'_> {
    fn floats(&mut self, count: usize) -> Result<Vec<f32>> {
        let end = count
            .checked_mul(4)
            .and_then(|len| self.offset.checked_add(len))
            .ok_or_else(truncated)?;
        let chunk = self.bytes.get(self.offset..end).ok_or_else(truncated)?;
        self.offset = end;
        Ok(chunk
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn matrix(&mut self, rows: usize, cols: usize) -> Result<Array2<f32>> {
        let data = self.floats(rows.checked_mul(cols).ok_or_else(truncated)?)?;
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Backend(e.to_string()))
    }
}

#[async_trait]
impl InferenceBackend for TinyLm {
    fn vocab_size(&self) -> usize {
        TinyLm::vocab_size(self)
    }

    async fn infer(&self, ids: Array2<i64>) -> Result<Array3<f32>> {
        if ids.nrows() != 1 || ids.ncols() == 0 {
            return Err(Error::Backend(format!(
                "expected input of shape [1, n>0], got {:?}",
                ids.shape()
            )));
        }
        let tokens = ids
            .iter()
            .map(|&id| {
                usize::try_from(id).map_err(|_| Error::Backend(format!("negative token id {}", id)))
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(self.forward(&tokens)?.insert_axis(Axis(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> TinyLm {
        TinyLm::new(&TinyLmConfig { vocab_size: 7, dim: 4, seed: 3 }).unwrap()
    }

    #[test]
    fn test_forward_shape() {
        let model = small();
        let logits = model.forward(&[0, 1, 2]).unwrap();
        assert_eq!(logits.shape(), &[3, 7]);
        assert!(logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_forward_is_causal() {
        let model = small();
        let short = model.forward(&[4, 2]).unwrap();
        let long = model.forward(&[4, 2, 6, 1]).unwrap();
        for (a, b) in short.iter().zip(long.slice(ndarray::s![..2, ..]).iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = small().forward(&[1, 5]).unwrap();
        let b = small().forward(&[1, 5]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_out_of_vocab_token() {
        assert!(matches!(small().forward(&[7]), Err(Error::Backend(_))));
    }

    #[test]
    fn test_zero_sized_config() {
        let cfg = TinyLmConfig { vocab_size: 0, dim: 4, seed: 0 };
        assert!(matches!(TinyLm::new(&cfg), Err(Error::Config(_))));
    }

    fn header_bytes(vocab_size: u32, dim: u32) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        for field in [VERSION, vocab_size, dim] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_huge_declared_shape_is_backend_error() {
        let mut bytes = header_bytes(u32::MAX, u32::MAX);
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(matches!(TinyLm::from_bytes(&bytes), Err(Error::Backend(_))));
    }

    #[test]
    fn test_file_layout_is_little_endian() {
        let model = small();
        let file = tempfile::NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();
        let bytes = std::fs::read(file.path()).unwrap();
        assert_eq!(&bytes[..HEADER_LEN], header_bytes(7, 4).as_slice());
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 4], &model.embed[[0, 0]].to_le_bytes());
        let last = model.bias[6].to_le_bytes();
        assert_eq!(&bytes[bytes.len() - 4..], &last);
    }

    #[test]
    fn test_rejects_bad_bytes() {
        assert!(TinyLm::from_bytes(b"CG").is_err());
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(b"XXXX");
        assert!(TinyLm::from_bytes(&bytes).is_err());
    }
}
