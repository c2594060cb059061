use candle::{DType, Device, Tensor};
use openmusiclm_encodec::{Bandwidth, EncodecError, EncodedFrame, NeuralCodec, create_encodec_24khz};

const HOP: usize = 320;
const CHUNK_FRAMES: usize = 15;
const LEVELS: usize = 16;

/// A toy codec: every HOP samples collapse to their mean, which is then
/// scalar-quantized by a residual stack of uniform 16-level quantizers
/// with shrinking step sizes. Long inputs are split into chunks of
/// CHUNK_FRAMES frames, like a streaming codec would.
struct ToyCodec {
    bandwidth: Option<f64>,
    total_quantizers: usize,
}

impl ToyCodec {
    fn new() -> Self {
        Self {
            bandwidth: None,
            total_quantizers: 32,
        }
    }

    fn active(&self) -> usize {
        let kbps = self.bandwidth.unwrap_or(Bandwidth::MAX_KBPS);
        Bandwidth::try_from(kbps)
            .map(|b| b.num_quantizers(self.total_quantizers))
            .unwrap_or(self.total_quantizers)
    }
}

fn step(stage: usize) -> f32 {
    0.25 / 4f32.powi(stage as i32)
}

fn level(stage: usize, k: u32) -> f32 {
    (k as f32 - (LEVELS as f32 - 1.0) / 2.0) * step(stage)
}

impl NeuralCodec for ToyCodec {
    fn sample_rate(&self) -> usize {
        24_000
    }

    fn channels(&self) -> usize {
        1
    }

    fn bandwidth(&self) -> Option<f64> {
        self.bandwidth
    }

    fn set_target_bandwidth(&mut self, kbps: f64) -> Result<(), EncodecError> {
        self.bandwidth = Some(kbps);
        Ok(())
    }

    fn total_quantizers(&self) -> usize {
        self.total_quantizers
    }

    fn encode(&self, wav: &Tensor) -> Result<Vec<EncodedFrame>, EncodecError> {
        let (b, _, t) = wav.dims3()?;
        let n_q = self.active();
        let wav = wav.mean(1)?.to_vec2::<f32>()?;
        let n_frames = t.div_ceil(HOP);

        // codes[item][stage][frame]
        let mut codes = vec![vec![vec![0u32; n_frames]; n_q]; b];
        for (item, samples) in wav.iter().enumerate() {
            for f in 0..n_frames {
                let window = &samples[f * HOP..((f + 1) * HOP).min(t)];
                let mut residual = window.iter().sum::<f32>() / window.len() as f32;
                for (stage, row) in codes[item].iter_mut().enumerate() {
                    let k = (residual / step(stage) + (LEVELS as f32 - 1.0) / 2.0)
                        .round()
                        .clamp(0.0, LEVELS as f32 - 1.0) as u32;
                    residual -= level(stage, k);
                    row[f] = k;
                }
            }
        }

        let mut frames = Vec::new();
        for start in (0..n_frames).step_by(CHUNK_FRAMES) {
            let len = CHUNK_FRAMES.min(n_frames - start);
            let data: Vec<u32> = codes
                .iter()
                .flat_map(move |stages| {
                    stages
                        .iter()
                        .flat_map(move |row| row[start..start + len].to_vec())
                })
                .collect();
            frames.push(EncodedFrame::new(Tensor::from_vec(
                data,
                (b, n_q, len),
                &Device::Cpu,
            )?));
        }
        Ok(frames)
    }

    fn decode(&self, frames: &[EncodedFrame]) -> Result<Tensor, EncodecError> {
        let chunks: Vec<&Tensor> = frames.iter().map(|f| &f.codes).collect();
        let codes = Tensor::cat(&chunks, 2)?.to_vec3::<u32>()?;
        let wav: Vec<f32> = codes
            .iter()
            .flat_map(|stages| {
                let n_frames = stages.first().map_or(0, |s| s.len());
                (0..n_frames).flat_map(move |f| {
                    let v: f32 = stages
                        .iter()
                        .enumerate()
                        .map(|(stage, row)| level(stage, row[f]))
                        .sum();
                    std::iter::repeat_n(v, HOP)
                })
            })
            .collect();
        let b = codes.len();
        let t = wav.len() / b.max(1);
        Ok(Tensor::from_vec(wav, (b, 1, t), &Device::Cpu)?)
    }
}

fn sine(batch: usize, len: usize) -> Tensor {
    let data: Vec<f32> = (0..batch * len)
        .map(|i| {
            let (item, t) = (i / len, i % len);
            0.8 * ((t as f32 / 24_000.0) * 2.0 * std::f32::consts::PI * (3.0 + item as f32)).sin()
        })
        .collect();
    Tensor::from_vec(data, (batch, len), &Device::Cpu).unwrap()
}

#[test]
fn roundtrip_keeps_batch_and_length_within_one_hop() {
    for len in [HOP * 40, HOP * 40 + 1, 24_000, 7_777] {
        let w = create_encodec_24khz(ToyCodec::new(), 6.0).unwrap();
        let wav = sine(3, len);
        let codes = w.encode(&wav).unwrap();
        assert_eq!(codes.dims(), &[3, len.div_ceil(HOP), w.num_quantizers()]);

        let out = w.decode_from_codebook_indices(&codes).unwrap();
        let (b, c, t) = out.dims3().unwrap();
        assert_eq!(b, 3);
        assert_eq!(c, 1);
        assert!(t >= len && t - len < HOP, "len {len} decoded to {t}");
    }
}

#[test]
fn roundtrip_reconstructs_frame_means_at_every_bandwidth() {
    let len = HOP * 50;
    let wav = sine(2, len);
    let means = wav
        .reshape((2, len / HOP, HOP))
        .unwrap()
        .mean(2)
        .unwrap()
        .to_vec2::<f32>()
        .unwrap();

    for b in Bandwidth::ALL {
        let w = create_encodec_24khz(ToyCodec::new(), b.kbps()).unwrap();
        let (_, codes, _) = w.forward(&wav, true).unwrap();
        assert_eq!(codes.dim(2).unwrap(), b.num_quantizers(32));

        let out = w
            .decode_from_codebook_indices(&codes)
            .unwrap()
            .squeeze(1)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        let tolerance = step(w.num_quantizers() - 1) / 2.0 + 1e-4;
        for (item, frame_means) in means.iter().enumerate() {
            for (f, &m) in frame_means.iter().enumerate() {
                let got = out[item][f * HOP];
                assert!((got - m).abs() <= tolerance, "{b}: frame {f}: {got} vs {m}");
            }
        }
    }
}

#[test]
fn multi_chunk_encoding_decodes_as_one_frame() {
    let w = create_encodec_24khz(ToyCodec::new(), 12.0).unwrap();
    let len = HOP * CHUNK_FRAMES * 3 + 5;
    let codes = w.encode(&sine(1, len)).unwrap();
    assert_eq!(codes.dims(), &[1, CHUNK_FRAMES * 3 + 1, 16]);

    let decoded = w.decode_from_codebook_indices(&codes).unwrap();
    assert_eq!(decoded.dims(), &[1, 1, (CHUNK_FRAMES * 3 + 1) * HOP]);
}

#[test]
fn rank_four_input_is_rejected() {
    let w = create_encodec_24khz(ToyCodec::new(), 24.0).unwrap();
    let bad = Tensor::zeros((1, 1, 1, 10), DType::F32, &Device::Cpu).unwrap();
    assert!(matches!(w.encode(&bad), Err(EncodecError::Shape { .. })));
}
