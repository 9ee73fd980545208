//! Spectrogram rendering: STFT -> Mel filterbank -> 3-channel normalized image.

use ndarray::{Array2, Array3};
use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::config::Config;

/// Added to the peak before normalizing so silent clips stay finite.
pub const NORM_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone)]
pub struct MelConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f32,
    pub f_max: f32,
    /// Reflect-pad `n_fft / 2` samples on both sides so frames are centered.
    pub center: bool,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 32000,
            n_fft: 1024,
            hop_length: 512,
            n_mels: 128,
            f_min: 0.0,
            f_max: 16000.0,
            center: true,
        }
    }
}

impl From<&Config> for MelConfig {
    fn from(config: &Config) -> Self {
        Self {
            sample_rate: config.sample_rate,
            n_fft: config.spectrogram.n_fft,
            hop_length: config.hop_length(),
            n_mels: config.spectrogram.n_mels,
            f_min: config.spectrogram.f_min,
            f_max: config.f_max(),
            center: true,
        }
    }
}

/// Precomputed mel spectrogram transform. Cheap to share across threads.
pub struct MelSpectrogram {
    config: MelConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    mel_filterbank: Vec<Vec<f32>>, // [n_mels, n_fft/2 + 1]
}

impl MelSpectrogram {
    pub fn new(config: MelConfig) -> Self {
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        // Periodic Hann window
        let window: Vec<f32> = (0..config.n_fft)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / config.n_fft as f32).cos()))
            .collect();

        let mel_filterbank = create_mel_filterbank(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            config.f_min,
            config.f_max,
        );

        Self {
            config,
            fft,
            window,
            mel_filterbank,
        }
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// Power mel spectrogram, shape `[n_mels, n_frames]`.
    pub fn transform(&self, samples: &[f32]) -> Array2<f32> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let (n_mels, n_frames) = self.output_shape(samples.len());
        let mut spectrogram = Array2::zeros((n_mels, n_frames));
        if n_frames == 0 {
            return spectrogram;
        }

        let padded;
        let signal: &[f32] = if self.config.center {
            padded = reflect_pad(samples, n_fft / 2);
            &padded
        } else {
            samples
        };

        // Scratch buffers
        let mut input = vec![0.0f32; n_fft];
        let mut spectrum = self.fft.make_output_vec();
        let mut power = vec![0.0f32; spectrum.len()];

        for frame in 0..n_frames {
            let start = frame * hop;
            for i in 0..n_fft {
                input[i] = signal.get(start + i).copied().unwrap_or(0.0) * self.window[i];
            }

            // Input and output lengths always match the plan.
            if self.fft.process(&mut input, &mut spectrum).is_err() {
                continue;
            }
            for (p, c) in power.iter_mut().zip(&spectrum) {
                *p = c.norm_sqr();
            }

            for (mel_idx, mel_filter) in self.mel_filterbank.iter().enumerate() {
                spectrogram[[mel_idx, frame]] = mel_filter
                    .iter()
                    .zip(&power)
                    .map(|(w, p)| w * p)
                    .sum();
            }
        }

        spectrogram
    }

    /// Mel spectrogram replicated across 3 channels and scaled by its peak
    /// magnitude, shape `[3, n_mels, n_frames]`, values in `[-1, 1]`.
    pub fn render(&self, samples: &[f32]) -> Array3<f32> {
        let mel = self.transform(samples);
        let peak = mel.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let mel = mel / (peak + NORM_EPSILON);
        let mut image = Array3::zeros((3, mel.nrows(), mel.ncols()));
        for mut channel in image.outer_iter_mut() {
            channel.assign(&mel);
        }
        image
    }

    /// Output shape `(n_mels, n_frames)` for a given input length.
    pub fn output_shape(&self, n_samples: usize) -> (usize, usize) {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n_frames = if self.config.center {
            if n_samples == 0 {
                0
            } else {
                n_samples / hop + 1
            }
        } else if n_samples >= n_fft {
            (n_samples - n_fft) / hop + 1
        } else {
            0
        };
        (self.config.n_mels, n_frames)
    }
}

/// Mirror `pad` samples on each side, excluding the edge sample. Falls back
/// to zeros where the signal is too short to reflect.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let n = samples.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    for i in (1..=pad).rev() {
        out.push(if i < n { samples[i] } else { 0.0 });
    }
    out.extend_from_slice(samples);
    for i in 1..=pad {
        out.push(if i < n { samples[n - 1 - i] } else { 0.0 });
    }
    out
}

/// Triangular mel filterbank (HTK mel scale, no area normalization).
fn create_mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    f_min: f32,
    f_max: f32,
) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;

    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0);

    let mel_min = hz_to_mel(f_min);
    let mel_max = hz_to_mel(f_max);

    // n_mels + 2 edge frequencies
    let hz_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let bin_hz: Vec<f32> = (0..n_bins)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            bin_hz
                .iter()
                .map(|&f| {
                    let rising = (f - left) / (center - left).max(f32::EPSILON);
                    let falling = (right - f) / (right - center).max(f32::EPSILON);
                    rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    fn sine(freq: f32, sample_rate: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_output_shape() {
        let transform = MelSpectrogram::new(MelConfig::default());
        // 5 seconds at 32kHz, centered, hop 512
        assert_eq!(transform.output_shape(160000), (128, 313));

        let uncentered = MelSpectrogram::new(MelConfig {
            hop_length: 320,
            center: false,
            ..MelConfig::default()
        });
        // (160000 - 1024) / 320 + 1
        assert_eq!(uncentered.output_shape(160000), (128, 497));
    }

    #[test]
    fn test_render_is_normalized() {
        let transform = MelSpectrogram::new(MelConfig::default());
        let image = transform.render(&sine(440.0, 32000, 32000));
        assert_eq!(image.dim(), (3, 128, 63));
        let peak = image.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak <= 1.0 && peak > 0.99);
        assert!(image.iter().all(|v| v.is_finite()));
        assert_eq!(image.index_axis(Axis(0), 0), image.index_axis(Axis(0), 2));
    }

    #[test]
    fn test_render_silence_is_finite() {
        let transform = MelSpectrogram::new(MelConfig::default());
        let image = transform.render(&vec![0.0; 16000]);
        assert!(image.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_energy_lands_in_expected_band() {
        let transform = MelSpectrogram::new(MelConfig::default());
        let low = transform.transform(&sine(300.0, 32000, 16000));
        let high = transform.transform(&sine(8000.0, 32000, 16000));
        let argmax = |spec: &Array2<f32>| {
            let col = spec.column(10);
            (0..col.len())
                .max_by(|&a, &b| col[a].total_cmp(&col[b]))
                .unwrap()
        };
        assert!(argmax(&low) < argmax(&high));
    }

    #[test]
    fn test_reflect_pad() {
        assert_eq!(reflect_pad(&[1.0, 2.0, 3.0, 4.0], 2), vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
    }
}
