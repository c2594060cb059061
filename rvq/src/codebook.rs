use std::fmt;

use candle::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::RvqConfig;
use crate::RvqError;
use crate::kmeans::{dims2, kmeans, nearest, one_hot};

/// A single quantization stage: `codebook_size` codewords of dimension `dim`,
/// trained with exponential moving averages.
///
/// # Algorithm
///
/// For every input row the nearest codeword by Euclidean distance is chosen.
/// In training mode, per-codeword assignment counts and vector sums are
/// folded into `cluster_size` and `embed_avg` with decay `decay`, and the
/// codewords become `embed_avg / smoothed(cluster_size)`, where smoothing is
/// Laplace smoothing with `eps`. Codewords whose `cluster_size` drops below
/// `threshold_ema_dead_code` are replaced by k-means centroids of the batch.
pub struct EuclideanCodebook {
    dim: usize,
    codebook_size: usize,
    decay: f64,
    eps: f64,
    kmeans_iters: usize,
    threshold_ema_dead_code: f64,
    initted: bool,
    embed: Tensor,        // [K, D]
    embed_avg: Tensor,    // [K, D]
    cluster_size: Tensor, // [K]
    rng: StdRng,
}

/// EMA training statistics of one codebook.
#[derive(Debug, Clone)]
pub struct EmaState {
    /// Decayed assignment count per codeword, `[K]`.
    pub cluster_size: Tensor,

    /// Decayed sum of the vectors assigned to each codeword, `[K, D]`.
    pub embed_avg: Tensor,
}

impl fmt::Debug for EuclideanCodebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EuclideanCodebook")
            .field("dim", &self.dim)
            .field("codebook_size", &self.codebook_size)
            .field("initted", &self.initted)
            .finish()
    }
}

impl EuclideanCodebook {
    /// Creates a codebook for one stage.
    ///
    /// With `kmeans_init` the codewords are zero until the first call to
    /// [`EuclideanCodebook::forward`]. Otherwise they are drawn uniformly
    /// from `±sqrt(6 / dim)` and the codebook is ready immediately.
    pub fn new(cfg: &RvqConfig, seed: u64, device: &Device) -> Result<Self, RvqError> {
        cfg.validate()?;
        let (k, d) = (cfg.codebook_size, cfg.dim);
        let mut rng = StdRng::seed_from_u64(seed);

        let (embed, initted) = if cfg.kmeans_init {
            (Tensor::zeros((k, d), DType::F32, device)?, false)
        } else {
            let bound = (6.0 / d as f64).sqrt() as f32;
            let data: Vec<f32> = (0..k * d).map(|_| rng.gen_range(-bound..bound)).collect();
            (Tensor::from_vec(data, (k, d), device)?, true)
        };

        Ok(Self {
            dim: d,
            codebook_size: k,
            decay: cfg.decay,
            eps: cfg.eps,
            kmeans_iters: cfg.kmeans_iters,
            threshold_ema_dead_code: cfg.threshold_ema_dead_code,
            initted,
            embed_avg: embed.clone(),
            embed,
            cluster_size: Tensor::zeros(k, DType::F32, device)?,
            rng,
        })
    }

    /// Creates an initialized codebook from existing codewords (`[K, D]`),
    /// e.g. restored from a checkpoint. `cfg.codebook_size` and `cfg.dim`
    /// must match the tensor.
    ///
    /// Pass the saved [`EmaState`] to resume training exactly where it
    /// stopped. Without it, every codeword starts with a cluster size of
    /// `max(threshold_ema_dead_code, 1) / (1 - decay)`, one EMA horizon
    /// above the revival threshold, and `embed_avg = embed * cluster_size`,
    /// so a training step leaves unselected codewords in place.
    pub fn from_embed(
        cfg: &RvqConfig,
        seed: u64,
        embed: Tensor,
        ema: Option<EmaState>,
    ) -> Result<Self, RvqError> {
        cfg.validate()?;
        let (k, d) = dims2(&embed)?;
        check_dim(cfg.codebook_size, k)?;
        check_dim(cfg.dim, d)?;
        let embed = embed.to_dtype(DType::F32)?;
        let device = embed.device().clone();

        let (cluster_size, embed_avg) = match ema {
            Some(state) => {
                let (sk, sd) = dims2(&state.embed_avg)?;
                check_dim(k, sk)?;
                check_dim(d, sd)?;
                match state.cluster_size.dims() {
                    &[n] => check_dim(k, n)?,
                    other => {
                        return Err(RvqError::Shape {
                            expected: 1,
                            got: other.to_vec(),
                        });
                    }
                }
                (
                    state.cluster_size.to_dtype(DType::F32)?.to_device(&device)?,
                    state.embed_avg.to_dtype(DType::F32)?.to_device(&device)?,
                )
            }
            None => {
                let size = cfg.threshold_ema_dead_code.max(1.0) / (1.0 - cfg.decay);
                (
                    Tensor::ones(k, DType::F32, &device)?.affine(size, 0.0)?,
                    embed.affine(size, 0.0)?,
                )
            }
        };

        Ok(Self {
            dim: d,
            codebook_size: k,
            decay: cfg.decay,
            eps: cfg.eps,
            kmeans_iters: cfg.kmeans_iters,
            threshold_ema_dead_code: cfg.threshold_ema_dead_code,
            initted: true,
            embed,
            embed_avg,
            cluster_size,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Returns true once the codewords hold real values.
    pub fn is_initialized(&self) -> bool {
        self.initted
    }

    /// Returns the codewords, `[K, D]`.
    pub fn embed(&self) -> &Tensor {
        &self.embed
    }

    /// Returns the EMA assignment count per codeword, `[K]`.
    pub fn cluster_size(&self) -> &Tensor {
        &self.cluster_size
    }

    /// Returns the EMA sum of assigned vectors per codeword, `[K, D]`.
    pub fn embed_avg(&self) -> &Tensor {
        &self.embed_avg
    }

    /// Snapshot of the training statistics, for saving next to
    /// [`EuclideanCodebook::embed`].
    pub fn ema_state(&self) -> EmaState {
        EmaState {
            cluster_size: self.cluster_size.clone(),
            embed_avg: self.embed_avg.clone(),
        }
    }

    pub fn codebook_size(&self) -> usize {
        self.codebook_size
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Index of the nearest codeword for every row of `x` (`[M, D]`).
    /// Read-only: never initializes or updates the codebook, and fails
    /// with [`RvqError::NotInitialized`] (stage 0) before initialization.
    pub fn quantize(&self, x: &Tensor) -> Result<Tensor, RvqError> {
        if !self.initted {
            return Err(RvqError::NotInitialized(0));
        }
        self.check_input(x)?;
        Ok(nearest(&x.to_dtype(DType::F32)?, &self.embed)?)
    }

    /// Codewords for `u32` indices of shape `[M]`, as `[M, D]`.
    pub fn dequantize(&self, indices: &Tensor) -> Result<Tensor, RvqError> {
        Ok(self.embed.index_select(indices, 0)?)
    }

    /// Quantizes `x` (`[M, D]`), returning `(codewords [M, D], indices [M])`.
    ///
    /// Initializes the codebook from `x` first if needed. With `train`, the
    /// codebook is then updated toward `x`; the returned codewords are the
    /// ones selected before the update.
    pub fn forward(&mut self, x: &Tensor, train: bool) -> Result<(Tensor, Tensor), RvqError> {
        self.check_input(x)?;
        let x = x.to_dtype(DType::F32)?;
        self.init_embed(&x)?;

        let indices = nearest(&x, &self.embed)?;
        let quantized = self.embed.index_select(&indices, 0)?;

        if train {
            self.ema_update(&x, &indices)?;
            self.expire_codes(&x)?;
        }

        Ok((quantized, indices))
    }

    fn check_input(&self, x: &Tensor) -> Result<(), RvqError> {
        let (m, d) = dims2(x)?;
        if d != self.dim {
            return Err(RvqError::DimensionMismatch {
                expected: self.dim,
                got: d,
            });
        }
        if m == 0 {
            return Err(RvqError::EmptyInput);
        }
        Ok(())
    }

    fn init_embed(&mut self, x: &Tensor) -> Result<(), RvqError> {
        if self.initted {
            return Ok(());
        }
        let (means, bins) = kmeans(x, self.codebook_size, self.kmeans_iters, &mut self.rng)?;
        debug!(
            samples = x.dim(0)?,
            codes = self.codebook_size,
            "rvq: codebook initialized with k-means"
        );
        self.embed_avg = means.clone();
        self.embed = means;
        self.cluster_size = bins;
        self.initted = true;
        Ok(())
    }

    fn ema_update(&mut self, x: &Tensor, indices: &Tensor) -> Result<(), RvqError> {
        let assign = one_hot(indices, self.codebook_size)?;
        let counts = assign.sum(0)?;
        let sums = assign.t()?.contiguous()?.matmul(x)?;

        self.cluster_size = ema(&self.cluster_size, &counts, self.decay)?;
        self.embed_avg = ema(&self.embed_avg, &sums, self.decay)?;

        // Laplace smoothing: (n_k + eps) / (n + K * eps) * n
        let n = self.cluster_size.sum_all()?.to_scalar::<f32>()? as f64;
        let scale = n / (n + self.codebook_size as f64 * self.eps);
        let smoothed = self
            .cluster_size
            .affine(1.0, self.eps)?
            .affine(scale, 0.0)?
            .unsqueeze(1)?;
        self.embed = self.embed_avg.broadcast_div(&smoothed)?;
        Ok(())
    }

    fn expire_codes(&mut self, x: &Tensor) -> Result<(), RvqError> {
        let threshold = self.threshold_ema_dead_code;
        if threshold <= 0.0 {
            return Ok(());
        }

        let mut sizes = self.cluster_size.to_vec1::<f32>()?;
        let dead: Vec<usize> = sizes
            .iter()
            .enumerate()
            .filter(|&(_, &s)| (s as f64) < threshold)
            .map(|(i, _)| i)
            .collect();
        if dead.is_empty() {
            return Ok(());
        }

        let (fresh, _) = kmeans(x, dead.len(), self.kmeans_iters, &mut self.rng)?;
        let fresh = fresh.to_vec2::<f32>()?;
        let mut embed = self.embed.to_vec2::<f32>()?;
        let mut embed_avg = self.embed_avg.to_vec2::<f32>()?;
        let t = threshold as f32;
        for (&code, row) in dead.iter().zip(fresh) {
            embed_avg[code] = row.iter().map(|v| v * t).collect();
            embed[code] = row;
            sizes[code] = t;
        }

        let device = self.embed.device().clone();
        let shape = (self.codebook_size, self.dim);
        self.embed = Tensor::from_vec(embed.concat(), shape, &device)?;
        self.embed_avg = Tensor::from_vec(embed_avg.concat(), shape, &device)?;
        self.cluster_size = Tensor::from_vec(sizes, self.codebook_size, &device)?;
        debug!(dead = dead.len(), "rvq: revived dead codes");
        Ok(())
    }
}

fn check_dim(expected: usize, got: usize) -> Result<(), RvqError> {
    if expected != got {
        return Err(RvqError::DimensionMismatch { expected, got });
    }
    Ok(())
}

/// `old * decay + new * (1 - decay)`
fn ema(old: &Tensor, new: &Tensor, decay: f64) -> candle::Result<Tensor> {
    old.affine(decay, 0.0)? + new.affine(1.0 - decay, 0.0)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(k: usize, d: usize) -> RvqConfig {
        RvqConfig::new(d).with_codebook_size(k).with_num_quantizers(1)
    }

    #[test]
    fn kmeans_init_on_first_forward() {
        let mut cb = EuclideanCodebook::new(&cfg(2, 2), 0, &Device::Cpu).unwrap();
        assert!(!cb.is_initialized());

        let x = Tensor::new(&[[0f32, 0.0], [0.0, 0.1], [5.0, 5.0], [5.1, 5.0]], &Device::Cpu)
            .unwrap();
        let (q, idx) = cb.forward(&x, false).unwrap();
        assert!(cb.is_initialized());
        assert_eq!(q.dims(), &[4, 2]);

        let idx = idx.to_vec1::<u32>().unwrap();
        assert_eq!(idx[0], idx[1]);
        assert_eq!(idx[2], idx[3]);
        assert_ne!(idx[0], idx[2]);
    }

    #[test]
    fn random_init_without_kmeans() {
        let mut c = cfg(8, 4);
        c.kmeans_init = false;
        let cb = EuclideanCodebook::new(&c, 1, &Device::Cpu).unwrap();
        assert!(cb.is_initialized());

        let bound = (6.0f32 / 4.0).sqrt();
        for row in cb.embed().to_vec2::<f32>().unwrap() {
            for v in row {
                assert!(v.abs() <= bound);
            }
        }
    }

    fn column(values: &[f32]) -> Tensor {
        Tensor::from_vec(values.to_vec(), (values.len(), 1), &Device::Cpu).unwrap()
    }

    fn flat(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    fn assert_close(got: &[f32], want: &[f32], tol: f32) {
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() <= tol, "got {got:?}, want {want:?}");
        }
    }

    #[test]
    fn inference_leaves_codebook_untouched() {
        let embed = Tensor::new(&[[0f32, 0.0], [1.0, 1.0]], &Device::Cpu).unwrap();
        let mut cb = EuclideanCodebook::from_embed(&cfg(2, 2), 0, embed, None).unwrap();
        let before = cb.embed().to_vec2::<f32>().unwrap();

        let x = Tensor::new(&[[0.9f32, 0.8]], &Device::Cpu).unwrap();
        cb.forward(&x, false).unwrap();
        assert_eq!(cb.embed().to_vec2::<f32>().unwrap(), before);
    }

    #[test]
    fn restored_codewords_survive_a_training_step() {
        let mut cb =
            EuclideanCodebook::from_embed(&cfg(4, 1), 0, column(&[0.0, 10.0, 20.0, 30.0]), None)
                .unwrap();

        // Only codeword 0 is selected.
        cb.forward(&column(&[0.1, -0.1]), true).unwrap();
        let embed = flat(cb.embed());
        assert_close(&embed[1..], &[10.0, 20.0, 30.0], 1e-3);
        assert!(flat(cb.cluster_size()).iter().all(|&s| s > 2.0));
    }

    #[test]
    fn restored_codewords_survive_without_revival() {
        let mut c = cfg(2, 1);
        c.threshold_ema_dead_code = 0.0;
        let mut cb = EuclideanCodebook::from_embed(&c, 0, column(&[0.0, 10.0]), None).unwrap();

        cb.forward(&column(&[3.0, 3.0]), true).unwrap();
        assert_close(&flat(cb.embed())[1..], &[10.0], 1e-3);
    }

    #[test]
    fn saved_ema_state_resumes_training() {
        let mut c = cfg(2, 1);
        c.threshold_ema_dead_code = 0.0;
        let mut trained = EuclideanCodebook::from_embed(&c, 0, column(&[0.0, 10.0]), None).unwrap();
        let x = column(&[1.0, 2.0, 9.0]);
        for _ in 0..3 {
            trained.forward(&x, true).unwrap();
        }

        let mut restored =
            EuclideanCodebook::from_embed(&c, 0, trained.embed().clone(), Some(trained.ema_state()))
                .unwrap();
        assert_eq!(flat(restored.cluster_size()), flat(trained.cluster_size()));
        assert_eq!(flat(restored.embed_avg()), flat(trained.embed_avg()));

        trained.forward(&x, true).unwrap();
        restored.forward(&x, true).unwrap();
        assert_eq!(flat(restored.embed()), flat(trained.embed()));
    }

    #[test]
    fn saved_ema_state_shape_is_checked() {
        let state = EmaState {
            cluster_size: Tensor::ones(3, DType::F32, &Device::Cpu).unwrap(),
            embed_avg: column(&[0.0, 1.0]),
        };
        assert!(matches!(
            EuclideanCodebook::from_embed(&cfg(2, 1), 0, column(&[0.0, 1.0]), Some(state)),
            Err(RvqError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn ema_step_applies_laplace_smoothing() {
        let mut c = cfg(2, 1).with_decay(0.5);
        c.eps = 0.5;
        c.threshold_ema_dead_code = 0.0;
        let state = EmaState {
            cluster_size: Tensor::new(&[1f32, 1.0], &Device::Cpu).unwrap(),
            embed_avg: column(&[0.0, 10.0]),
        };
        let mut cb = EuclideanCodebook::from_embed(&c, 0, column(&[0.0, 10.0]), Some(state))
            .unwrap();

        // All three rows pick codeword 0: counts [3, 0], sums [6, 0].
        cb.forward(&column(&[2.0, 2.0, 2.0]), true).unwrap();

        // cluster_size = 0.5 * [1, 1] + 0.5 * [3, 0] = [2, 0.5]
        // embed_avg    = 0.5 * [0, 10] + 0.5 * [6, 0] = [3, 5]
        // smoothed     = (size + 0.5) / (2.5 + 2 * 0.5) * 2.5 = [25/14, 5/7]
        // embed        = embed_avg / smoothed = [1.68, 7]
        assert_close(&flat(cb.cluster_size()), &[2.0, 0.5], 1e-6);
        assert_close(&flat(cb.embed_avg()), &[3.0, 5.0], 1e-6);
        assert_close(&flat(cb.embed()), &[1.68, 7.0], 1e-5);
    }

    #[test]
    fn ema_moves_codeword_toward_inputs() {
        let mut c = cfg(2, 2);
        c.threshold_ema_dead_code = 0.0;
        let embed = Tensor::new(&[[0f32, 0.0], [10.0, 10.0]], &Device::Cpu).unwrap();
        let mut cb = EuclideanCodebook::from_embed(&c, 0, embed, None).unwrap();

        let x = Tensor::new(&[[1f32, 1.0], [1.0, 1.0]], &Device::Cpu).unwrap();
        for _ in 0..200 {
            cb.forward(&x, true).unwrap();
        }
        let code = &cb.embed().to_vec2::<f32>().unwrap()[0];
        assert!((code[0] - 1.0).abs() < 0.05, "got {code:?}");
        assert!((code[1] - 1.0).abs() < 0.05, "got {code:?}");
    }

    #[test]
    fn dead_codes_are_revived() {
        let embed = Tensor::new(&[[0f32, 0.0], [100.0, 100.0]], &Device::Cpu).unwrap();
        let state = EmaState {
            cluster_size: Tensor::new(&[2f32, 2.0], &Device::Cpu).unwrap(),
            embed_avg: embed.affine(2.0, 0.0).unwrap(),
        };
        let mut cb = EuclideanCodebook::from_embed(&cfg(2, 2), 0, embed, Some(state)).unwrap();

        // Code 1 is not chosen, so its cluster size decays to 1.9, below 2.
        let x = Tensor::new(&[[0.1f32, 0.0], [0.0, 0.1], [3.0, 3.0]], &Device::Cpu).unwrap();
        cb.forward(&x, true).unwrap();

        let code = cb.embed().to_vec2::<f32>().unwrap()[1].clone();
        assert!(code[0] < 10.0, "dead code should be replaced, got {code:?}");
        assert_eq!(flat(cb.cluster_size())[1], 2.0);
        let avg = &cb.embed_avg().to_vec2::<f32>().unwrap()[1];
        assert_close(avg, &[code[0] * 2.0, code[1] * 2.0], 1e-6);
    }

    #[test]
    fn quantize_requires_initialized_codebook() {
        let cb = EuclideanCodebook::new(&cfg(2, 2), 0, &Device::Cpu).unwrap();
        let x = Tensor::new(&[[5f32, 1.0], [-3.0, 2.0]], &Device::Cpu).unwrap();
        assert!(matches!(cb.quantize(&x), Err(RvqError::NotInitialized(0))));
    }

    #[test]
    fn rejects_wrong_dimension() {
        let mut cb = EuclideanCodebook::new(&cfg(2, 3), 0, &Device::Cpu).unwrap();
        let x = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            cb.forward(&x, false),
            Err(RvqError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn from_embed_checks_shape() {
        let embed = Tensor::zeros((3, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            EuclideanCodebook::from_embed(&cfg(2, 2), 0, embed, None),
            Err(RvqError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }
}
