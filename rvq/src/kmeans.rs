//! Euclidean k-means used to seed and revive codebooks.

use candle::{D, DType, Tensor};
use rand::Rng;
use rand::rngs::StdRng;

use crate::RvqError;

/// Runs Lloyd's k-means over `samples` (`[M, D]`).
///
/// Initial means are drawn from the samples: without replacement when
/// there are at least `num_clusters` samples, with replacement otherwise.
/// A cluster that receives no samples in an iteration keeps its
/// previous mean.
///
/// Returns `(means [K, D], bins [K])` where `bins` holds the number of
/// samples assigned to each mean in the last iteration (zeros when
/// `iters` is 0).
pub fn kmeans(
    samples: &Tensor,
    num_clusters: usize,
    iters: usize,
    rng: &mut StdRng,
) -> Result<(Tensor, Tensor), RvqError> {
    let (m, dim) = dims2(samples)?;
    if m == 0 {
        return Err(RvqError::EmptyInput);
    }
    if num_clusters == 0 {
        return Err(RvqError::InvalidConfig(
            "kmeans: num_clusters must be positive".into(),
        ));
    }
    let samples = samples.to_dtype(DType::F32)?;
    let device = samples.device();

    let mut means = sample_vectors(&samples, num_clusters, rng)?;
    let mut bins = Tensor::zeros(num_clusters, DType::F32, device)?;

    for _ in 0..iters {
        let buckets = nearest(&samples, &means)?;
        let assign = one_hot(&buckets, num_clusters)?;
        bins = assign.sum(0)?;
        let sums = assign.t()?.contiguous()?.matmul(&samples)?;

        let counts = bins.to_vec1::<f32>()?;
        let empty: Vec<u8> = counts.iter().map(|&c| u8::from(c == 0.0)).collect();
        let clamped: Vec<f32> = counts.iter().map(|&c| c.max(1.0)).collect();

        let clamped = Tensor::from_vec(clamped, (num_clusters, 1), device)?;
        let new_means = sums.broadcast_div(&clamped)?;
        let empty = Tensor::from_vec(empty, (num_clusters, 1), device)?
            .broadcast_as((num_clusters, dim))?
            .contiguous()?;
        means = empty.where_cond(&means, &new_means)?;
    }

    Ok((means, bins))
}

/// Index of the nearest row of `codes` (`[K, D]`) for every row of `x` (`[M, D]`),
/// by squared Euclidean distance. Returns a `u32` tensor of shape `[M]`.
pub(crate) fn nearest(x: &Tensor, codes: &Tensor) -> candle::Result<Tensor> {
    // |x - c|^2 = |x|^2 - 2 x.c + |c|^2
    let xx = x.sqr()?.sum_keepdim(1)?;
    let cc = codes.sqr()?.sum(1)?.unsqueeze(0)?;
    let xc = x.matmul(&codes.t()?.contiguous()?)?;
    let dist = xx.broadcast_sub(&xc.affine(2.0, 0.0)?)?.broadcast_add(&cc)?;
    dist.argmin(D::Minus1)
}

/// One-hot assignment matrix `[M, K]` (f32) for `u32` indices of shape `[M]`.
pub(crate) fn one_hot(indices: &Tensor, k: usize) -> candle::Result<Tensor> {
    let classes = Tensor::arange(0u32, k as u32, indices.device())?.unsqueeze(0)?;
    indices
        .unsqueeze(1)?
        .broadcast_eq(&classes)?
        .to_dtype(DType::F32)
}

/// Draws `num` rows from `samples`.
fn sample_vectors(samples: &Tensor, num: usize, rng: &mut StdRng) -> Result<Tensor, RvqError> {
    let m = samples.dim(0)?;
    let picks: Vec<u32> = if m >= num {
        rand::seq::index::sample(rng, m, num)
            .into_iter()
            .map(|i| i as u32)
            .collect()
    } else {
        (0..num).map(|_| rng.gen_range(0..m) as u32).collect()
    };
    let picks = Tensor::from_vec(picks, num, samples.device())?;
    Ok(samples.index_select(&picks, 0)?)
}

pub(crate) fn dims2(t: &Tensor) -> Result<(usize, usize), RvqError> {
    match t.dims() {
        &[a, b] => Ok((a, b)),
        other => Err(RvqError::Shape {
            expected: 2,
            got: other.to_vec(),
        }),
    }
}
